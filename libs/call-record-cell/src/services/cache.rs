use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_utils::clock::Clock;
use shared_utils::phone;

use crate::error::CallRecordError;
use crate::models::{CallPayload, CallRecord};
use crate::services::directory::PetOwnerDirectory;
use crate::services::repository::CallRecordRepository;

/// Compare-and-swap attempts before a write gives up with `Contention`.
pub const MAX_UPSERT_ATTEMPTS: usize = 5;

enum Attempt {
    Written(CallRecord),
    IdentityFailed(String),
    Lost,
}

/// Local cache of provider call records.
///
/// Every write is a revision compare-and-swap on a single row, so
/// concurrent writers of one `call_id` serialize and different calls never
/// contend.
pub struct CallRecordCache {
    repository: Arc<dyn CallRecordRepository>,
    directory: Arc<dyn PetOwnerDirectory>,
    clock: Arc<dyn Clock>,
}

impl CallRecordCache {
    pub fn new(
        repository: Arc<dyn CallRecordRepository>,
        directory: Arc<dyn PetOwnerDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            directory,
            clock,
        }
    }

    /// Create or refresh the record for `payload.call_id`.
    ///
    /// Provider fields always win. The caller's owner id is kept unless the
    /// normalized `from_number` (or practice) changed. If the owner
    /// directory cannot be reached the record is stored in `error` and the
    /// call fails with `IdentityResolution`.
    #[instrument(skip(self, payload), fields(call_id = %payload.call_id))]
    pub async fn upsert(&self, payload: CallPayload) -> Result<CallRecord, CallRecordError> {
        payload.validate()?;

        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            let current = match self.repository.find_by_call_id(&payload.call_id).await? {
                Some(record) => record,
                None => {
                    let pending = CallRecord::first_observation(&payload, self.clock.now());
                    match self.repository.insert(&pending).await {
                        Ok(record) => {
                            debug!("First observation of call {}", record.call_id);
                            record
                        }
                        Err(e) if e.is_insert_conflict() => {
                            debug!("Call {} inserted concurrently (attempt {})", payload.call_id, attempt);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            match self.apply(current, &payload).await? {
                Attempt::Written(record) => return Ok(record),
                Attempt::IdentityFailed(reason) => {
                    return Err(CallRecordError::IdentityResolution {
                        call_id: payload.call_id,
                        reason,
                    })
                }
                Attempt::Lost => debug!("Lost revision race for call {} (attempt {})", payload.call_id, attempt),
            }
        }

        warn!("Giving up on call {} after {} attempts", payload.call_id, MAX_UPSERT_ATTEMPTS);
        Err(CallRecordError::Contention(payload.call_id))
    }

    async fn apply(&self, current: CallRecord, payload: &CallPayload) -> Result<Attempt, CallRecordError> {
        let expected = current.revision;
        let now = self.clock.now();
        let mut next = current.next_revision(now);

        let caller_changed = next.apply_payload(payload);
        if caller_changed {
            next.caller_pet_owner_id = None;
        }

        let mut failure = None;
        if next.caller_pet_owner_id.is_none() {
            match self.resolve_caller_identity(&next).await {
                Ok(owner) => next.caller_pet_owner_id = owner,
                Err(e) => failure = Some(e.to_string()),
            }
        }

        match &failure {
            None => next.mark_synced(now),
            Some(reason) => {
                warn!("Caller lookup failed for call {}: {}", next.call_id, reason);
                next.mark_failed(format!("caller identity: {}", reason));
            }
        }

        Ok(match (self.repository.compare_and_swap(&next, expected).await?, failure) {
            (None, _) => Attempt::Lost,
            (Some(_), Some(reason)) => Attempt::IdentityFailed(reason),
            (Some(stored), None) => {
                debug!("Call {} synced at revision {}", stored.call_id, stored.revision);
                Attempt::Written(stored)
            }
        })
    }

    /// Record a failed sync attempt. Only `sync_status` and `sync_error`
    /// change; `last_synced_at` stays where the last success left it.
    #[instrument(skip(self, reason))]
    pub async fn mark_error(&self, call_id: &str, reason: &str) -> Result<CallRecord, CallRecordError> {
        let record = self
            .update_with(call_id, |record| record.mark_failed(reason))
            .await?;
        info!("Call {} marked as errored: {}", call_id, reason);
        Ok(record)
    }

    /// The single pet owner of the record's practice whose phone matches
    /// the caller. No match, several matches and unusable numbers all give
    /// `None`.
    pub async fn resolve_caller_identity(&self, record: &CallRecord) -> Result<Option<Uuid>, CallRecordError> {
        let Some(caller) = record.normalized_caller() else {
            return Ok(None);
        };

        let owners = self.directory.owners_for_practice(record.practice_id).await?;
        let mut candidates = owners
            .iter()
            .filter(|owner| owner.phone.as_deref().is_some_and(|p| phone::matches(p, &caller)));

        match (candidates.next(), candidates.next()) {
            (Some(owner), None) => Ok(Some(owner.id)),
            (Some(_), Some(_)) => {
                debug!("Caller of {} matches several owners, leaving unassigned", record.call_id);
                Ok(None)
            }
            (None, _) => Ok(None),
        }
    }

    /// Records due for a refresh: errors first, then never-synced, then the
    /// oldest synced. Records synced within `max_age` are not returned.
    pub async fn find_stale(&self, max_age: Duration, limit: usize) -> Result<Vec<CallRecord>, CallRecordError> {
        let cutoff = self.clock.now() - max_age;
        self.repository.stale(cutoff, limit).await
    }

    pub async fn get(&self, call_id: &str) -> Result<CallRecord, CallRecordError> {
        self.repository
            .find_by_call_id(call_id)
            .await?
            .ok_or_else(|| CallRecordError::NotFound(call_id.to_string()))
    }

    pub async fn recent_for_practice(&self, practice_id: Uuid, limit: usize) -> Result<Vec<CallRecord>, CallRecordError> {
        self.repository.recent_for_practice(practice_id, limit).await
    }

    /// Soft delete; the record stops appearing in listings and refreshes.
    pub async fn deactivate(&self, call_id: &str) -> Result<CallRecord, CallRecordError> {
        self.update_with(call_id, |record| record.is_active = false).await
    }

    pub async fn latest_call_start(&self) -> Result<Option<DateTime<Utc>>, CallRecordError> {
        self.repository.latest_start_timestamp().await
    }

    async fn update_with<F>(&self, call_id: &str, change: F) -> Result<CallRecord, CallRecordError>
    where
        F: Fn(&mut CallRecord),
    {
        for _ in 0..MAX_UPSERT_ATTEMPTS {
            let current = self.get(call_id).await?;
            let mut next = current.next_revision(self.clock.now());
            change(&mut next);

            if let Some(stored) = self.repository.compare_and_swap(&next, current.revision).await? {
                return Ok(stored);
            }
        }

        Err(CallRecordError::Contention(call_id.to_string()))
    }
}
