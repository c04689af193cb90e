use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use call_record_cell::{CallAnalysis, CallPayload};

use crate::error::CallSyncError;

/// A call as the telephony provider reports it. Timestamps are epoch
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCall {
    pub call_id: String,
    pub agent_id: Option<String>,
    pub call_status: Option<String>,
    pub direction: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
    pub duration_ms: Option<i64>,
    pub disconnection_reason: Option<String>,
    pub transcript: Option<String>,
    pub recording_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub call_analysis: Option<ProviderCallAnalysis>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallAnalysis {
    pub call_summary: Option<String>,
    pub user_sentiment: Option<String>,
    pub call_successful: Option<bool>,
    pub in_voicemail: Option<bool>,
    pub custom_analysis_data: Option<Value>,
}

impl ProviderCall {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_timestamp.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    fn practice_id(&self) -> Option<Uuid> {
        self.metadata
            .as_ref()?
            .get("practice_id")?
            .as_str()
            .and_then(|id| Uuid::parse_str(id.trim()).ok())
    }
}

fn millis(call_id: &str, field: &str, value: Option<i64>) -> Result<Option<DateTime<Utc>>, CallSyncError> {
    value
        .map(|ms| {
            Utc.timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| CallSyncError::InvalidPayload(format!("{} of call {} is out of range", field, call_id)))
        })
        .transpose()
}

impl TryFrom<ProviderCall> for CallPayload {
    type Error = CallSyncError;

    fn try_from(call: ProviderCall) -> Result<Self, Self::Error> {
        let practice_id = call
            .practice_id()
            .ok_or_else(|| CallSyncError::MissingPractice(call.call_id.clone()))?;
        let start_timestamp = millis(&call.call_id, "start_timestamp", call.start_timestamp)?;
        let end_timestamp = millis(&call.call_id, "end_timestamp", call.end_timestamp)?;
        let analysis = call.call_analysis.unwrap_or_default();

        Ok(CallPayload {
            call_id: call.call_id,
            practice_id,
            agent_id: call.agent_id,
            from_number: call.from_number,
            to_number: call.to_number,
            direction: call.direction,
            start_timestamp,
            end_timestamp,
            duration_ms: call.duration_ms,
            call_status: call.call_status,
            disconnect_reason: call.disconnection_reason,
            transcript: call.transcript,
            recording_url: call.recording_url,
            analysis: CallAnalysis {
                summary: analysis.call_summary,
                user_sentiment: analysis.user_sentiment,
                call_successful: analysis.call_successful,
                in_voicemail: analysis.in_voicemail,
                custom_data: analysis.custom_analysis_data,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListCallsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_criteria: Option<CallFilterCriteria>,
    /// Exclusive: listing resumes after this call id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination_key: Option<String>,
    pub limit: usize,
    pub sort_order: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallFilterCriteria {
    pub start_timestamp: TimestampThreshold,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimestampThreshold {
    pub lower_threshold: i64,
}

/// Counters for one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Calls returned by the provider listing.
    pub fetched: usize,
    /// Listed calls written to the cache.
    pub synced: usize,
    /// Stale records refreshed from the provider.
    pub refreshed: usize,
    pub failed: usize,
}
