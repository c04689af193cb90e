use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use call_record_cell::CallPayload;
use call_sync_cell::*;
use shared_config::AppConfig;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn client_for(server: &MockServer) -> RetellClient {
    RetellClient::new(&TestConfig::with_mock_uri(&server.uri()).to_app_config()).expect("telephony is configured")
}

#[tokio::test]
async fn test_list_calls_sends_threshold_and_key() {
    let mock_server = MockServer::start().await;
    let practice_id = Uuid::new_v4();
    let since = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/list-calls"))
        .and(header("Authorization", "Bearer test-telephony-key"))
        .and(body_json(json!({
            "filter_criteria": { "start_timestamp": { "lower_threshold": 1736510400000i64 } },
            "limit": 25,
            "sort_order": "descending"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::provider_call_response("call_1", practice_id, "+15551234567")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let calls = client_for(&mock_server).list_calls(Some(since), None, 25).await.unwrap();

    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].started_at(), Some(since));

    let payload = CallPayload::try_from(calls[0].clone()).unwrap();
    assert_eq!(payload.practice_id, practice_id);
    assert_eq!(payload.duration_ms, Some(180_000));
    assert_eq!(payload.analysis.user_sentiment.as_deref(), Some("Positive"));
    assert_eq!(payload.analysis.custom_data, Some(json!({ "pet_name": "Biscuit" })));
}

#[tokio::test]
async fn test_list_calls_without_watermark_has_no_filter() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/list-calls"))
        .and(body_json(json!({ "limit": 10, "sort_order": "descending" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let calls = client_for(&mock_server).list_calls(None, None, 10).await.unwrap();
    assert!(calls.is_empty());
}

#[tokio::test]
async fn test_list_calls_continues_after_pagination_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/list-calls"))
        .and(body_json(json!({
            "pagination_key": "call_9",
            "limit": 2,
            "sort_order": "descending"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let calls = client_for(&mock_server)
        .list_calls(None, Some("call_9".to_string()), 2)
        .await
        .unwrap();
    assert!(calls.is_empty());
}

#[tokio::test]
async fn test_get_call_reads_single_call() {
    let mock_server = MockServer::start().await;
    let practice_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/v2/get-call/call_42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            MockSupabaseResponses::provider_call_response("call_42", practice_id, "5551234567"),
        ))
        .mount(&mock_server)
        .await;

    let call = client_for(&mock_server).get_call("call_42").await.unwrap();
    assert_eq!(call.call_id, "call_42");
    assert_eq!(call.disconnection_reason.as_deref(), Some("user_hangup"));
}

#[tokio::test]
async fn test_provider_errors_carry_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/get-call/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("call not found"))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).get_call("missing").await;
    assert_matches!(result, Err(CallSyncError::Provider { status: 404, body }) if body == "call not found");
}

#[test]
fn test_client_requires_api_key() {
    let config = AppConfig {
        telephony_api_key: String::new(),
        ..TestConfig::default().to_app_config()
    };

    assert_matches!(RetellClient::new(&config).err(), Some(CallSyncError::NotConfigured));
}
