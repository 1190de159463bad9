use std::time::Duration;

use chrono::TimeZone;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use withings::measure::{
    ActivityField, MeasureCategory, MeasureGetOptions, MeasureType, WorkoutField,
};
use withings::{CallContext, CancelReason, Error, ErrorKind};

use crate::common;

#[tokio::test]
async fn test_getmeas_form_and_decode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/measure"))
        .and(body_string_contains("action=getmeas"))
        .and(body_string_contains("category=1"))
        .and(body_string_contains("meastypes=1%2C6"))
        .and(body_string_contains("lastupdate=1600000000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {
                "updatetime": 1_600_000_100,
                "timezone": "Europe/Paris",
                "measuregrps": [{
                    "grpid": 1, "attrib": 0, "date": 1_600_000_050, "created": 1_600_000_060,
                    "category": 1, "deviceid": "dev",
                    "measures": [
                        {"value": 80250, "type": 1, "unit": -3},
                        {"value": 215, "type": 6, "unit": -1}
                    ]
                }],
                "more": 0,
                "offset": 0
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let since = chrono::Utc.timestamp_opt(1_600_000_000, 0).unwrap();
    let (measures, response) = common::api_client(&server)
        .measure()
        .getmeas(
            &CallContext::new(),
            &[MeasureType::Weight, MeasureType::FatRatio],
            MeasureCategory::Real,
            &MeasureGetOptions::last_update(since),
        )
        .await
        .unwrap();

    assert_eq!(measures.timezone.as_deref(), Some("Europe/Paris"));
    let group = &measures.measure_groups[0];
    assert_eq!(group.measures.len(), 2);
    let fat = group.measures_of(MeasureType::FatRatio).next().unwrap();
    assert!((fat.real_value() - 21.5).abs() < 1e-9);
    assert_eq!(response.http_status.as_u16(), 200);
    assert_eq!(response.next_offset(), None);
}

#[tokio::test]
async fn test_non_zero_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/measure"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 401,
            "body": {"more": true, "offset": 12},
            "error": "XRequestID: Not provided invalid_token: The access token provided is invalid"
        })))
        .mount(&server)
        .await;

    let err = common::api_client(&server)
        .measure()
        .getactivity(
            &CallContext::new(),
            &[ActivityField::Steps],
            &MeasureGetOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Api);
    match err {
        Error::Api { status, message, meta } => {
            assert!(status.is_auth_failure());
            assert!(message.unwrap().contains("invalid_token"));
            assert!(meta.pagination.more);
            assert_eq!(meta.pagination.offset, 12);
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_activity_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/measure"))
        .and(body_string_contains("offset=5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {"activities": [{"date": "2020-09-15", "steps": 30}], "more": false, "offset": 0}
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/measure"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {
                "activities": [
                    {"date": "2020-09-13", "steps": 10},
                    {"date": "2020-09-14", "steps": 20}
                ],
                "more": true,
                "offset": 5
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = common::api_client(&server);
    let ctx = CallContext::new();
    let mut opts = MeasureGetOptions::default();
    let mut steps = Vec::new();
    loop {
        let (page, response) = client
            .measure()
            .getactivity(&ctx, &[ActivityField::Steps], &opts)
            .await
            .unwrap();
        steps.extend(page.activities.iter().filter_map(|a| a.steps));
        match response.next_offset() {
            Some(offset) => opts = opts.with_offset(offset),
            None => break,
        }
    }
    assert_eq!(steps, vec![10, 20, 30]);
}

#[tokio::test]
async fn test_empty_body_is_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/measure"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (workouts, response) = common::api_client(&server)
        .measure()
        .getworkouts(
            &CallContext::new(),
            &[WorkoutField::Calories],
            &MeasureGetOptions::default(),
        )
        .await
        .unwrap();
    assert!(workouts.series.is_empty());
    assert!(response.status.is_success());
    assert!(!response.more);
}

#[tokio::test]
async fn test_getworkouts_decode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/measure"))
        .and(body_string_contains("action=getworkouts"))
        .and(body_string_contains("data_fields=calories%2Csteps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {
                "series": [{
                    "category": 1, "timezone": "Europe/Paris", "model": 55, "attrib": 7,
                    "startdate": 1_600_000_000, "enddate": 1_600_003_600,
                    "date": "2020-09-13", "deviceid": "dev", "modified": 1_600_004_000,
                    "data": {"calories": 312.5, "steps": 5400, "hr_average": null}
                }],
                "more": false,
                "offset": 0
            }
        })))
        .mount(&server)
        .await;

    let (workouts, _) = common::api_client(&server)
        .measure()
        .getworkouts(
            &CallContext::new(),
            &[WorkoutField::Calories, WorkoutField::Steps],
            &MeasureGetOptions::default(),
        )
        .await
        .unwrap();
    let workout = &workouts.series[0];
    assert_eq!(workout.end_date - workout.start_date, 3600);
    assert_eq!(workout.data.calories, Some(312.5));
    assert_eq!(workout.data.steps, Some(5400));
    assert_eq!(workout.data.hr_average, None);
}

#[tokio::test]
async fn test_payload_mismatch_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/measure"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {"activities": "nope"}
        })))
        .mount(&server)
        .await;

    let err = common::api_client(&server)
        .measure()
        .getactivity(
            &CallContext::new(),
            &[ActivityField::Steps],
            &MeasureGetOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}

#[tokio::test]
async fn test_deadline_cancels_slow_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/measure"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": 0, "body": {}}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
    let err = common::api_client(&server)
        .measure()
        .getmeas(
            &ctx,
            &[MeasureType::Weight],
            MeasureCategory::Real,
            &MeasureGetOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(CancelReason::DeadlineExceeded)));
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_invalid_arguments_fail_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = common::api_client(&server)
        .measure()
        .getmeas(
            &CallContext::new(),
            &[],
            MeasureCategory::Real,
            &MeasureGetOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}
