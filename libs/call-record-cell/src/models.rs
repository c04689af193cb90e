use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_utils::phone;

use crate::error::CallRecordError;

/// Outcome of the latest sync attempt for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallAnalysis {
    pub summary: Option<String>,
    pub user_sentiment: Option<String>,
    pub call_successful: Option<bool>,
    pub in_voicemail: Option<bool>,
    pub custom_data: Option<Value>,
}

/// Provider-owned view of a call, as fetched from the telephony API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    pub call_id: String,
    pub practice_id: Uuid,
    pub agent_id: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub direction: Option<String>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub call_status: Option<String>,
    pub disconnect_reason: Option<String>,
    pub transcript: Option<String>,
    pub recording_url: Option<String>,
    #[serde(default)]
    pub analysis: CallAnalysis,
}

impl CallPayload {
    pub fn validate(&self) -> Result<(), CallRecordError> {
        if self.call_id.trim().is_empty() {
            return Err(CallRecordError::Validation("call_id must not be empty".to_string()));
        }
        if let (Some(start), Some(end)) = (self.start_timestamp, self.end_timestamp) {
            if end < start {
                return Err(CallRecordError::Validation(format!(
                    "Call {} ends before it starts",
                    self.call_id
                )));
            }
        }
        Ok(())
    }
}

/// Locally cached call, one row per `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub practice_id: Uuid,
    pub agent_id: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub direction: Option<String>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub call_status: Option<String>,
    pub disconnect_reason: Option<String>,
    pub transcript: Option<String>,
    pub recording_url: Option<String>,
    #[serde(default)]
    pub analysis: CallAnalysis,
    pub caller_pet_owner_id: Option<Uuid>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// A `pending` record for a call seen for the first time.
    pub fn first_observation(payload: &CallPayload, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            call_id: payload.call_id.clone(),
            practice_id: payload.practice_id,
            agent_id: None,
            from_number: None,
            to_number: None,
            direction: None,
            start_timestamp: None,
            end_timestamp: None,
            duration_ms: None,
            call_status: None,
            disconnect_reason: None,
            transcript: None,
            recording_url: None,
            analysis: CallAnalysis::default(),
            caller_pet_owner_id: None,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            last_synced_at: None,
            is_active: true,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        record.apply_payload(payload);
        record
    }

    /// Overwrites every provider-owned field. Returns true when the caller
    /// key (practice plus normalized `from_number`) changed, which makes
    /// the current `caller_pet_owner_id` meaningless.
    pub fn apply_payload(&mut self, payload: &CallPayload) -> bool {
        let before = self.caller_key();

        self.practice_id = payload.practice_id;
        self.agent_id = payload.agent_id.clone();
        self.from_number = payload.from_number.clone();
        self.to_number = payload.to_number.clone();
        self.direction = payload.direction.clone();
        self.start_timestamp = payload.start_timestamp;
        self.end_timestamp = payload.end_timestamp;
        self.duration_ms = payload.duration_ms;
        self.call_status = payload.call_status.clone();
        self.disconnect_reason = payload.disconnect_reason.clone();
        self.transcript = payload.transcript.clone();
        self.recording_url = payload.recording_url.clone();
        self.analysis = payload.analysis.clone();

        before != self.caller_key()
    }

    pub fn normalized_caller(&self) -> Option<String> {
        self.from_number.as_deref().and_then(phone::normalize)
    }

    fn caller_key(&self) -> (Uuid, Option<String>) {
        (self.practice_id, self.normalized_caller())
    }

    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.sync_status = SyncStatus::Synced;
        self.sync_error = None;
        self.last_synced_at = Some(self.last_synced_at.map_or(now, |previous| previous.max(now)));
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.sync_status = SyncStatus::Error;
        self.sync_error = Some(reason.into());
    }

    /// Next revision of this record, stamped at `now`.
    pub fn next_revision(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.revision = self.revision + 1;
        next.updated_at = now;
        next
    }
}

/// Directory entry used to match callers to pet owners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetOwner {
    pub id: Uuid,
    pub practice_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

impl PetOwner {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn payload(from: &str) -> CallPayload {
        CallPayload {
            call_id: "call_1".to_string(),
            practice_id: Uuid::nil(),
            agent_id: Some("agent".to_string()),
            from_number: Some(from.to_string()),
            to_number: None,
            direction: Some("inbound".to_string()),
            start_timestamp: None,
            end_timestamp: None,
            duration_ms: Some(1000),
            call_status: Some("ended".to_string()),
            disconnect_reason: None,
            transcript: None,
            recording_url: None,
            analysis: CallAnalysis::default(),
        }
    }

    #[test]
    fn sync_status_uses_snake_case() {
        assert_eq!(serde_json::to_value(SyncStatus::Synced).unwrap(), "synced");
        let parsed: SyncStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(parsed, SyncStatus::Error);
    }

    #[test]
    fn reformatted_number_is_not_a_caller_change() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let mut record = CallRecord::first_observation(&payload("+1 (555) 123-4567"), now);

        assert!(!record.apply_payload(&payload("555.123.4567")));
        assert!(record.apply_payload(&payload("555.123.9999")));
    }

    #[test]
    fn last_synced_never_moves_backwards() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let mut record = CallRecord::first_observation(&payload("5551234567"), now);

        record.mark_synced(now);
        record.mark_synced(now - Duration::minutes(5));
        assert_eq!(record.last_synced_at, Some(now));
    }

    #[test]
    fn rejects_blank_call_id() {
        let mut blank = payload("5551234567");
        blank.call_id = "  ".to_string();
        assert!(matches!(blank.validate(), Err(CallRecordError::Validation(_))));
    }
}
