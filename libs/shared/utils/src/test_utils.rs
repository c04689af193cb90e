use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;

use crate::clock::Clock;

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub telephony_api_base_url: String,
    pub telephony_api_key: String,
    pub default_practice_timezone: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "test-service-key".to_string(),
            telephony_api_base_url: "http://localhost:54400".to_string(),
            telephony_api_key: "test-telephony-key".to_string(),
            default_practice_timezone: "UTC".to_string(),
        }
    }
}

impl TestConfig {
    /// Points both the PostgREST and telephony endpoints at a mock server.
    pub fn with_mock_uri(uri: &str) -> Self {
        Self {
            supabase_url: uri.to_string(),
            telephony_api_base_url: uri.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_service_key: self.supabase_service_key.clone(),
            default_practice_timezone: self.default_practice_timezone.clone(),
            telephony_api_base_url: self.telephony_api_base_url.clone(),
            telephony_api_key: self.telephony_api_key.clone(),
            ..AppConfig::default()
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 2025-01-10 12:00:00 UTC.
    pub fn fixed() -> Self {
        Self::new(Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap())
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn practice_timezone_response(timezone: &str) -> serde_json::Value {
        json!([{ "timezone": timezone }])
    }

    pub fn pet_owner_response(practice_id: Uuid, owner_id: Uuid, phone: &str) -> serde_json::Value {
        json!({
            "id": owner_id,
            "practice_id": practice_id,
            "first_name": "Test",
            "last_name": "Owner",
            "phone": phone,
            "is_active": true
        })
    }

    /// A call as the voice-agent provider returns it.
    pub fn provider_call_response(call_id: &str, practice_id: Uuid, from_number: &str) -> serde_json::Value {
        json!({
            "call_id": call_id,
            "agent_id": "agent_test_001",
            "call_status": "ended",
            "direction": "inbound",
            "from_number": from_number,
            "to_number": "+15559870000",
            "start_timestamp": 1736510400000i64,
            "end_timestamp": 1736510580000i64,
            "duration_ms": 180000,
            "disconnection_reason": "user_hangup",
            "transcript": "Agent: Thanks for calling.\nUser: I need to book a checkup.",
            "recording_url": "https://recordings.example.com/call.wav",
            "metadata": { "practice_id": practice_id.to_string() },
            "call_analysis": {
                "call_summary": "Caller booked a wellness checkup.",
                "user_sentiment": "Positive",
                "call_successful": true,
                "in_voicemail": false,
                "custom_analysis_data": { "pet_name": "Biscuit" }
            }
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}
