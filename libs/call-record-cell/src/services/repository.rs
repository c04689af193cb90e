use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{postgrest_timestamp, SupabaseClient};
use shared_models::error::AppError;

use crate::error::CallRecordError;
use crate::models::{CallRecord, SyncStatus};

#[async_trait]
pub trait CallRecordRepository: Send + Sync {
    async fn find_by_call_id(&self, call_id: &str) -> Result<Option<CallRecord>, CallRecordError>;

    /// Fails with `AppError::Conflict` when the `call_id` already exists.
    async fn insert(&self, record: &CallRecord) -> Result<CallRecord, CallRecordError>;

    /// Replaces the stored row only while its revision still equals
    /// `expected_revision`. `None` means another writer got there first.
    async fn compare_and_swap(
        &self,
        record: &CallRecord,
        expected_revision: i64,
    ) -> Result<Option<CallRecord>, CallRecordError>;

    /// Active records in `error`, then never-synced records, then records
    /// last synced before `synced_before`, oldest first.
    async fn stale(&self, synced_before: DateTime<Utc>, limit: usize) -> Result<Vec<CallRecord>, CallRecordError>;

    async fn recent_for_practice(&self, practice_id: Uuid, limit: usize) -> Result<Vec<CallRecord>, CallRecordError>;

    /// Latest `start_timestamp` across all records.
    async fn latest_start_timestamp(&self) -> Result<Option<DateTime<Utc>>, CallRecordError>;
}

#[derive(Default)]
pub struct InMemoryCallRecordRepository {
    records: RwLock<HashMap<String, CallRecord>>,
}

impl InMemoryCallRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CallRecordRepository for InMemoryCallRecordRepository {
    async fn find_by_call_id(&self, call_id: &str) -> Result<Option<CallRecord>, CallRecordError> {
        Ok(self.records.read().await.get(call_id).cloned())
    }

    async fn insert(&self, record: &CallRecord) -> Result<CallRecord, CallRecordError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.call_id) {
            return Err(AppError::Conflict(format!("Call record {} already exists", record.call_id)).into());
        }
        records.insert(record.call_id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn compare_and_swap(
        &self,
        record: &CallRecord,
        expected_revision: i64,
    ) -> Result<Option<CallRecord>, CallRecordError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.call_id) {
            Some(stored) if stored.revision == expected_revision => {
                *stored = record.clone();
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn stale(&self, synced_before: DateTime<Utc>, limit: usize) -> Result<Vec<CallRecord>, CallRecordError> {
        let records = self.records.read().await;
        let mut stale: Vec<CallRecord> = records
            .values()
            .filter(|r| r.is_active)
            .filter(|r| {
                r.sync_status == SyncStatus::Error
                    || r.last_synced_at.map_or(true, |synced| synced < synced_before)
            })
            .cloned()
            .collect();

        // Option orders None first, so never-synced records lead the rest.
        stale.sort_by(|a, b| {
            (a.sync_status != SyncStatus::Error, a.last_synced_at, &a.call_id)
                .cmp(&(b.sync_status != SyncStatus::Error, b.last_synced_at, &b.call_id))
        });
        stale.truncate(limit);
        Ok(stale)
    }

    async fn recent_for_practice(&self, practice_id: Uuid, limit: usize) -> Result<Vec<CallRecord>, CallRecordError> {
        let records = self.records.read().await;
        let mut recent: Vec<CallRecord> = records
            .values()
            .filter(|r| r.practice_id == practice_id && r.is_active)
            .cloned()
            .collect();

        recent.sort_by(|a, b| match (a.start_timestamp, b.start_timestamp) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.call_id.cmp(&b.call_id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.call_id.cmp(&b.call_id),
        });
        recent.truncate(limit);
        Ok(recent)
    }

    async fn latest_start_timestamp(&self) -> Result<Option<DateTime<Utc>>, CallRecordError> {
        Ok(self.records.read().await.values().filter_map(|r| r.start_timestamp).max())
    }
}

/// PostgREST-backed store for the `call_records` table.
pub struct SupabaseCallRecordRepository {
    supabase: Arc<SupabaseClient>,
}

const CALL_RECORDS_PATH: &str = "/rest/v1/call_records";
const STALE_ORDER: &str = "last_synced_at.asc.nullsfirst,call_id.asc";

impl SupabaseCallRecordRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, query: &[(&str, String)]) -> Result<Vec<CallRecord>, CallRecordError> {
        let rows: Vec<CallRecord> = self.supabase.request(Method::GET, CALL_RECORDS_PATH, query, None).await?;
        Ok(rows)
    }
}

#[async_trait]
impl CallRecordRepository for SupabaseCallRecordRepository {
    async fn find_by_call_id(&self, call_id: &str) -> Result<Option<CallRecord>, CallRecordError> {
        let rows = self
            .select(&[("call_id", format!("eq.{}", call_id)), ("limit", "1".to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, record: &CallRecord) -> Result<CallRecord, CallRecordError> {
        let body = serde_json::to_value(record)?;

        let result: Vec<CallRecord> = self.supabase.request_with_headers(
            Method::POST,
            CALL_RECORDS_PATH,
            &[],
            Some(body),
            Some(SupabaseClient::representation_headers()),
        ).await?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Database(format!("Failed to create call record {}", record.call_id)).into())
    }

    async fn compare_and_swap(
        &self,
        record: &CallRecord,
        expected_revision: i64,
    ) -> Result<Option<CallRecord>, CallRecordError> {
        let body = serde_json::to_value(record)?;

        let result: Vec<CallRecord> = self.supabase.request_with_headers(
            Method::PATCH,
            CALL_RECORDS_PATH,
            &[
                ("call_id", format!("eq.{}", record.call_id)),
                ("revision", format!("eq.{}", expected_revision)),
            ],
            Some(body),
            Some(SupabaseClient::representation_headers()),
        ).await?;

        if result.is_empty() {
            debug!("Revision {} of call {} is no longer current", expected_revision, record.call_id);
        }
        Ok(result.into_iter().next())
    }

    async fn stale(&self, synced_before: DateTime<Utc>, limit: usize) -> Result<Vec<CallRecord>, CallRecordError> {
        let mut stale = self
            .select(&[
                ("is_active", "eq.true".to_string()),
                ("sync_status", format!("eq.{}", SyncStatus::Error)),
                ("order", STALE_ORDER.to_string()),
                ("limit", limit.to_string()),
            ])
            .await?;

        let remaining = limit.saturating_sub(stale.len());
        if remaining > 0 {
            let outdated = self
                .select(&[
                    ("is_active", "eq.true".to_string()),
                    ("sync_status", format!("neq.{}", SyncStatus::Error)),
                    (
                        "or",
                        format!("(last_synced_at.is.null,last_synced_at.lt.{})", postgrest_timestamp(&synced_before)),
                    ),
                    ("order", STALE_ORDER.to_string()),
                    ("limit", remaining.to_string()),
                ])
                .await?;
            stale.extend(outdated);
        }

        Ok(stale)
    }

    async fn recent_for_practice(&self, practice_id: Uuid, limit: usize) -> Result<Vec<CallRecord>, CallRecordError> {
        self.select(&[
            ("practice_id", format!("eq.{}", practice_id)),
            ("is_active", "eq.true".to_string()),
            ("order", "start_timestamp.desc.nullslast,call_id.asc".to_string()),
            ("limit", limit.to_string()),
        ])
        .await
    }

    async fn latest_start_timestamp(&self) -> Result<Option<DateTime<Utc>>, CallRecordError> {
        #[derive(Deserialize)]
        struct Row {
            start_timestamp: Option<DateTime<Utc>>,
        }

        let rows: Vec<Row> = self.supabase.request(
            Method::GET,
            CALL_RECORDS_PATH,
            &[
                ("select", "start_timestamp".to_string()),
                ("start_timestamp", "not.is.null".to_string()),
                ("order", "start_timestamp.desc".to_string()),
                ("limit", "1".to_string()),
            ],
            None,
        ).await?;

        Ok(rows.into_iter().next().and_then(|row| row.start_timestamp))
    }
}
