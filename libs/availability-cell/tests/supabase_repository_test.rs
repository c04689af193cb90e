use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use availability_cell::*;
use shared_database::SupabaseClient;
use shared_models::error::AppError;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn client_for(server: &MockServer) -> Arc<SupabaseClient> {
    Arc::new(SupabaseClient::new(&TestConfig::with_mock_uri(&server.uri()).to_app_config()))
}

fn recurring_row(id: Uuid, practice_id: Uuid, vet_user_id: Uuid) -> serde_json::Value {
    json!({
        "id": id,
        "practice_id": practice_id,
        "vet_user_id": vet_user_id,
        "start_local": "22:00:00",
        "end_local": "02:00:00",
        "timezone": "America/Los_Angeles",
        "spans_midnight": true,
        "kind": "recurring",
        "specific_date": null,
        "weekdays": [5],
        "effective_from": "2025-01-10",
        "effective_until": null,
        "start_utc": "2025-01-11T06:00:00Z",
        "end_utc": "2025-01-11T10:00:00Z",
        "is_active": true,
        "superseded_by": null,
        "created_at": "2025-01-01T00:00:00Z",
        "updated_at": "2025-01-01T00:00:00Z"
    })
}

#[tokio::test]
async fn test_practice_timezone_is_read_from_practices() {
    let mock_server = MockServer::start().await;
    let practice_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/practices"))
        .and(query_param("id", format!("eq.{}", practice_id)))
        .and(query_param("select", "timezone"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockSupabaseResponses::practice_timezone_response("Europe/Berlin")),
        )
        .mount(&mock_server)
        .await;

    let provider = SupabasePracticeTimezones::new(client_for(&mock_server));
    let timezone = provider.timezone(practice_id).await.unwrap();

    assert_eq!(timezone.as_deref(), Some("Europe/Berlin"));
}

#[tokio::test]
async fn test_unknown_practice_has_no_timezone() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/practices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let provider = SupabasePracticeTimezones::new(client_for(&mock_server));
    assert_eq!(provider.timezone(Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn test_active_for_vet_decodes_recurring_rows() {
    let mock_server = MockServer::start().await;
    let (id, practice_id, vet_user_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_availability"))
        .and(query_param("vet_user_id", format!("eq.{}", vet_user_id)))
        .and(query_param("is_active", "eq.true"))
        .and(query_param("order", "start_utc.asc,id.asc"))
        .and(header("apikey", "test-service-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([recurring_row(id, practice_id, vet_user_id)])),
        )
        .mount(&mock_server)
        .await;

    let repository = SupabaseAvailabilityRepository::new(client_for(&mock_server));
    let range = UtcInterval::new(
        Utc.with_ymd_and_hms(2025, 1, 17, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 1, 19, 0, 0, 0).unwrap(),
    )
    .unwrap();

    let windows = repository.active_for_vet(vet_user_id, &range).await.unwrap();
    assert_eq!(windows.len(), 1);

    let window = &windows[0];
    assert_eq!(window.id, id);
    assert!(window.spans_midnight);
    assert_eq!(window.start_local, NaiveTime::from_hms_opt(22, 0, 0).unwrap());
    assert_matches!(
        &window.kind,
        WindowKind::Recurring(rule) if rule.weekdays == vec![chrono::Weekday::Fri]
            && rule.effective_from == NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    );

    // Friday 2025-01-17 22:00 PST
    let listing = AvailabilityListing::new(windows, range).unwrap();
    let starts: Vec<_> = listing.iter().map(|o| o.start_utc).collect();
    assert_eq!(starts, vec![Utc.with_ymd_and_hms(2025, 1, 18, 6, 0, 0).unwrap()]);
}

#[tokio::test]
async fn test_corrupt_row_is_a_storage_error() {
    let mock_server = MockServer::start().await;
    let id = Uuid::new_v4();
    let mut row = recurring_row(id, Uuid::new_v4(), Uuid::new_v4());
    row["kind"] = json!("fortnightly");

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&mock_server)
        .await;

    let repository = SupabaseAvailabilityRepository::new(client_for(&mock_server));
    let result = repository.get(id).await;

    assert_matches!(result, Err(AvailabilityError::Storage(AppError::Database(_))));
}

#[tokio::test]
async fn test_deactivate_patches_the_row() {
    let mock_server = MockServer::start().await;
    let (id, successor) = (Uuid::new_v4(), Uuid::new_v4());
    let mut row = recurring_row(id, Uuid::new_v4(), Uuid::new_v4());
    row["is_active"] = json!(false);
    row["superseded_by"] = json!(successor);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_availability"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "is_active": false, "superseded_by": successor })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let repository = SupabaseAvailabilityRepository::new(client_for(&mock_server));
    let window = repository
        .deactivate(id, Some(successor), Utc::now())
        .await
        .unwrap()
        .expect("row exists");

    assert!(!window.is_active);
    assert_eq!(window.superseded_by, Some(successor));
}

#[tokio::test]
async fn test_deactivate_missing_row_is_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let repository = SupabaseAvailabilityRepository::new(client_for(&mock_server));
    assert!(repository.deactivate(Uuid::new_v4(), None, Utc::now()).await.unwrap().is_none());
}
