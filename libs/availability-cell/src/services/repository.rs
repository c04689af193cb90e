use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{postgrest_timestamp, SupabaseClient};
use shared_models::error::AppError;

use crate::error::AvailabilityError;
use crate::models::{
    weekday_from_index, weekday_to_index, AvailabilityWindow, RecurrenceRule, UtcInterval, WindowKind,
};

#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    async fn insert(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, AvailabilityError>;

    async fn get(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, AvailabilityError>;

    /// Active windows of the vet that may produce an occurrence inside `range`.
    async fn active_for_vet(
        &self,
        vet_user_id: Uuid,
        range: &UtcInterval,
    ) -> Result<Vec<AvailabilityWindow>, AvailabilityError>;

    /// Active windows of the practice, newest anchor first.
    async fn active_for_practice(&self, practice_id: Uuid) -> Result<Vec<AvailabilityWindow>, AvailabilityError>;

    /// Soft-invalidates a window; `None` if it does not exist.
    async fn deactivate(
        &self,
        window_id: Uuid,
        superseded_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, AvailabilityError>;
}

#[derive(Default)]
pub struct InMemoryAvailabilityRepository {
    windows: RwLock<HashMap<Uuid, AvailabilityWindow>>,
}

impl InMemoryAvailabilityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityRepository for InMemoryAvailabilityRepository {
    async fn insert(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, AvailabilityError> {
        let mut windows = self.windows.write().await;
        if windows.contains_key(&window.id) {
            return Err(AppError::Conflict(format!("Availability window {} already exists", window.id)).into());
        }
        windows.insert(window.id, window.clone());
        Ok(window.clone())
    }

    async fn get(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, AvailabilityError> {
        Ok(self.windows.read().await.get(&window_id).cloned())
    }

    async fn active_for_vet(
        &self,
        vet_user_id: Uuid,
        range: &UtcInterval,
    ) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        let windows = self.windows.read().await;
        let mut matching: Vec<AvailabilityWindow> = windows
            .values()
            .filter(|w| w.vet_user_id == vet_user_id && w.may_intersect(range))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.start_utc.cmp(&b.start_utc).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn active_for_practice(&self, practice_id: Uuid) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        let windows = self.windows.read().await;
        let mut matching: Vec<AvailabilityWindow> = windows
            .values()
            .filter(|w| w.practice_id == practice_id && w.is_active)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_utc.cmp(&a.start_utc).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn deactivate(
        &self,
        window_id: Uuid,
        superseded_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, AvailabilityError> {
        let mut windows = self.windows.write().await;
        Ok(windows.get_mut(&window_id).map(|window| {
            window.is_active = false;
            window.superseded_by = superseded_by;
            window.updated_at = at;
            window.clone()
        }))
    }
}

/// Row shape of the `vet_availability` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRow {
    pub id: Uuid,
    pub practice_id: Uuid,
    pub vet_user_id: Uuid,
    pub start_local: NaiveTime,
    pub end_local: NaiveTime,
    pub timezone: String,
    pub spans_midnight: bool,
    pub kind: String,
    pub specific_date: Option<NaiveDate>,
    pub weekdays: Option<Vec<i32>>,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub is_active: bool,
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const KIND_ONE_OFF: &str = "one_off";
const KIND_RECURRING: &str = "recurring";

impl From<&AvailabilityWindow> for AvailabilityRow {
    fn from(window: &AvailabilityWindow) -> Self {
        let (kind, specific_date, weekdays, effective_from, effective_until) = match &window.kind {
            WindowKind::OneOff { date } => (KIND_ONE_OFF, Some(*date), None, None, None),
            WindowKind::Recurring(rule) => (
                KIND_RECURRING,
                None,
                Some(rule.weekdays.iter().map(|d| weekday_to_index(*d)).collect()),
                Some(rule.effective_from),
                rule.effective_until,
            ),
        };

        Self {
            id: window.id,
            practice_id: window.practice_id,
            vet_user_id: window.vet_user_id,
            start_local: window.start_local,
            end_local: window.end_local,
            timezone: window.timezone.clone(),
            spans_midnight: window.spans_midnight,
            kind: kind.to_string(),
            specific_date,
            weekdays,
            effective_from,
            effective_until,
            start_utc: window.start_utc,
            end_utc: window.end_utc,
            is_active: window.is_active,
            superseded_by: window.superseded_by,
            created_at: window.created_at,
            updated_at: window.updated_at,
        }
    }
}

impl TryFrom<AvailabilityRow> for AvailabilityWindow {
    type Error = AvailabilityError;

    fn try_from(row: AvailabilityRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| AppError::Database(format!("vet_availability {}: {}", row.id, what));

        let kind = match row.kind.as_str() {
            KIND_ONE_OFF => WindowKind::OneOff {
                date: row.specific_date.ok_or_else(|| corrupt("one-off row without specific_date"))?,
            },
            KIND_RECURRING => {
                let weekdays = row
                    .weekdays
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|i| weekday_from_index(*i).ok_or_else(|| corrupt("weekday out of range")))
                    .collect::<Result<Vec<_>, _>>()?;
                WindowKind::Recurring(RecurrenceRule {
                    weekdays,
                    effective_from: row
                        .effective_from
                        .ok_or_else(|| corrupt("recurring row without effective_from"))?,
                    effective_until: row.effective_until,
                })
            }
            other => return Err(corrupt(&format!("unknown kind {:?}", other)).into()),
        };

        Ok(Self {
            id: row.id,
            practice_id: row.practice_id,
            vet_user_id: row.vet_user_id,
            start_local: row.start_local,
            end_local: row.end_local,
            timezone: row.timezone,
            spans_midnight: row.spans_midnight,
            kind,
            start_utc: row.start_utc,
            end_utc: row.end_utc,
            is_active: row.is_active,
            superseded_by: row.superseded_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgREST-backed store for the `vet_availability` table.
pub struct SupabaseAvailabilityRepository {
    supabase: Arc<SupabaseClient>,
}

const AVAILABILITY_PATH: &str = "/rest/v1/vet_availability";

impl SupabaseAvailabilityRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn into_windows(rows: Vec<AvailabilityRow>) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        rows.into_iter().map(AvailabilityWindow::try_from).collect()
    }
}

#[async_trait]
impl AvailabilityRepository for SupabaseAvailabilityRepository {
    async fn insert(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, AvailabilityError> {
        let body = serde_json::to_value(AvailabilityRow::from(window))?;

        let result: Vec<AvailabilityRow> = self.supabase.request_with_headers(
            Method::POST,
            AVAILABILITY_PATH,
            &[],
            Some(body),
            Some(SupabaseClient::representation_headers()),
        ).await?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Database("Failed to create availability".to_string()))?;

        debug!("Availability window stored with ID: {}", row.id);
        AvailabilityWindow::try_from(row)
    }

    async fn get(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, AvailabilityError> {
        let result: Vec<AvailabilityRow> = self.supabase.request(
            Method::GET,
            AVAILABILITY_PATH,
            &[("id", format!("eq.{}", window_id)), ("limit", "1".to_string())],
            None,
        ).await?;

        result.into_iter().next().map(AvailabilityWindow::try_from).transpose()
    }

    async fn active_for_vet(
        &self,
        vet_user_id: Uuid,
        range: &UtcInterval,
    ) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        let start = postgrest_timestamp(&range.start);
        let end = postgrest_timestamp(&range.end);
        let earliest_relevant = (range.start - Duration::days(2)).date_naive();

        let candidates = format!(
            "(and(kind.eq.{one_off},start_utc.lt.{end},end_utc.gt.{start}),\
             and(kind.eq.{recurring},start_utc.lt.{end},or(effective_until.is.null,effective_until.gte.{until})))",
            one_off = KIND_ONE_OFF,
            recurring = KIND_RECURRING,
            start = start,
            end = end,
            until = earliest_relevant,
        );

        let result: Vec<AvailabilityRow> = self.supabase.request(
            Method::GET,
            AVAILABILITY_PATH,
            &[
                ("vet_user_id", format!("eq.{}", vet_user_id)),
                ("is_active", "eq.true".to_string()),
                ("or", candidates),
                ("order", "start_utc.asc,id.asc".to_string()),
            ],
            None,
        ).await?;

        Self::into_windows(result)
    }

    async fn active_for_practice(&self, practice_id: Uuid) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        let result: Vec<AvailabilityRow> = self.supabase.request(
            Method::GET,
            AVAILABILITY_PATH,
            &[
                ("practice_id", format!("eq.{}", practice_id)),
                ("is_active", "eq.true".to_string()),
                ("order", "start_utc.desc,id.asc".to_string()),
            ],
            None,
        ).await?;

        Self::into_windows(result)
    }

    async fn deactivate(
        &self,
        window_id: Uuid,
        superseded_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, AvailabilityError> {
        let update = json!({
            "is_active": false,
            "superseded_by": superseded_by,
            "updated_at": postgrest_timestamp(&at),
        });

        let result: Vec<AvailabilityRow> = self.supabase.request_with_headers(
            Method::PATCH,
            AVAILABILITY_PATH,
            &[("id", format!("eq.{}", window_id))],
            Some(update),
            Some(SupabaseClient::representation_headers()),
        ).await?;

        result.into_iter().next().map(AvailabilityWindow::try_from).transpose()
    }
}
