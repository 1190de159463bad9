use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use withings::measure::{MeasureCategory, MeasureGetOptions, MeasureType};
use withings::oauth::{Credential, TokenSource};
use withings::{ApiStatus, CallContext, CancelReason, Error};

use crate::common;

fn expired(refresh_token: &str) -> Credential {
    Credential::new("stale")
        .with_refresh_token(refresh_token)
        .with_expiry(chrono::Utc::now() - chrono::Duration::seconds(5))
}

#[tokio::test]
async fn test_exchange_sends_authorization_code_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("action=requesttoken"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("a1", Some("r1"))))
        .expect(1)
        .mount(&server)
        .await;

    let config = common::oauth_config(&server);
    let credential = config.exchange(&CallContext::new(), "the-code").await.unwrap();

    assert_eq!(credential.access_token, "a1");
    assert_eq!(credential.refresh_token.as_deref(), Some("r1"));
    assert_eq!(credential.token_type, "Bearer");
    assert_eq!(credential.user_id(), Some(363));
    assert_eq!(credential.scopes(), vec!["user.info", "user.metrics"]);
    assert!(credential.valid());

    let body = common::request_body(&server, 0).await;
    assert!(body.contains(&format!("client_id={}", common::CLIENT_ID)));
    assert!(body.contains(&format!("client_secret={}", common::CLIENT_SECRET)));
    assert!(body.contains("redirect_uri=https%3A%2F%2Fapp.test%2Fcallback"));
    assert!(!body.contains("refresh_token"));
}

#[tokio::test]
async fn test_refresh_sends_refresh_grant_and_rotates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("a2", Some("r2"))))
        .expect(1)
        .mount(&server)
        .await;

    let config = common::oauth_config(&server);
    let fresh = config
        .refresh(&CallContext::new(), &expired("r1"))
        .await
        .unwrap();

    assert_eq!(fresh.access_token, "a2");
    assert_eq!(fresh.refresh_token.as_deref(), Some("r2"));

    let body = common::request_body(&server, 0).await;
    assert!(!body.contains("code="));
    assert!(!body.contains("redirect_uri"));
}

#[tokio::test]
async fn test_refresh_carries_over_unrotated_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("a2", None)))
        .mount(&server)
        .await;

    let config = common::oauth_config(&server);
    let fresh = config
        .refresh(&CallContext::new(), &expired("r1"))
        .await
        .unwrap();
    assert_eq!(fresh.access_token, "a2");
    assert_eq!(fresh.refresh_token.as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_token_envelope_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 503,
            "body": {},
            "error": "Invalid Params: invalid code"
        })))
        .mount(&server)
        .await;

    let err = common::oauth_config(&server)
        .exchange(&CallContext::new(), "bad")
        .await
        .unwrap_err();
    match err {
        Error::Token(token) => {
            assert_eq!(token.http_status, 200);
            assert_eq!(token.status, Some(ApiStatus::new(503)));
            assert_eq!(token.description.as_deref(), Some("Invalid Params: invalid code"));
        }
        other => panic!("expected token error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_http_error_keeps_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = common::oauth_config(&server)
        .exchange(&CallContext::new(), "code")
        .await
        .unwrap_err();
    match err {
        Error::Token(token) => {
            assert_eq!(token.http_status, 502);
            assert!(token.status.is_none());
            assert_eq!(token.description.as_deref(), Some("bad gateway"));
        }
        other => panic!("expected token error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_missing_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": 0, "body": {"userid": 1}})),
        )
        .mount(&server)
        .await;

    let err = common::oauth_config(&server)
        .exchange(&CallContext::new(), "code")
        .await
        .unwrap_err();
    match err {
        Error::Token(token) => {
            assert_eq!(
                token.description.as_deref(),
                Some("server response missing access_token")
            );
        }
        other => panic!("expected token error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_callers_refresh_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::token_body("fresh", Some("r2")))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let notified = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notified);
    let source = Arc::new(
        common::oauth_config(&server)
            .token_source(expired("r1"))
            .with_refresh_listener(move |cred| {
                assert_eq!(cred.access_token, "fresh");
                seen.fetch_add(1, Ordering::SeqCst);
            }),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let source = Arc::clone(&source);
        handles.push(tokio::spawn(async move {
            source.token(&CallContext::new()).await
        }));
    }
    for handle in handles {
        let credential = handle.await.unwrap().unwrap();
        assert_eq!(credential.access_token, "fresh");
    }

    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(source.current().await.refresh_token.as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_authorized_client_attaches_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/measure"))
        .and(header("authorization", "Bearer live-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {"updatetime": 1, "measuregrps": []}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credential = Credential::new("live-token").with_expires_in(3600);
    let client = common::oauth_config(&server).client(credential).unwrap();
    let (measures, response) = client
        .measure()
        .getmeas(
            &CallContext::new(),
            &[MeasureType::Weight],
            MeasureCategory::Real,
            &MeasureGetOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(measures.update_time, 1);
    assert!(response.status.is_success());
}

#[tokio::test]
async fn test_authorized_client_refreshes_before_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("renewed", None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/measure"))
        .and(header("authorization", "Bearer renewed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": 0, "body": {}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = common::oauth_config(&server).client(expired("r1")).unwrap();
    client
        .measure()
        .getmeas(
            &CallContext::new(),
            &[MeasureType::Weight],
            MeasureCategory::Real,
            &MeasureGetOptions::default(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_callers_share_failed_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": 503, "error": "Invalid Params"}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let notified = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notified);
    let source = Arc::new(
        common::oauth_config(&server)
            .token_source(expired("r1"))
            .with_refresh_listener(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let source = Arc::clone(&source);
        handles.push(tokio::spawn(async move {
            source.token(&CallContext::new()).await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::new(503)));
    }

    assert_eq!(notified.load(Ordering::SeqCst), 0);
    assert_eq!(source.current().await.access_token, "stale");
}

#[tokio::test]
async fn test_deadline_aborts_wait_on_shared_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::token_body("fresh", Some("r2")))
                .set_delay(Duration::from_millis(400)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let source = Arc::new(common::oauth_config(&server).token_source(expired("r1")));

    let refreshing = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.token(&CallContext::new()).await })
    };
    // Let the first caller take the lock and start refreshing.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
    let err = source.token(&ctx).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(CancelReason::DeadlineExceeded)));

    let credential = refreshing.await.unwrap().unwrap();
    assert_eq!(credential.access_token, "fresh");
    assert_eq!(source.current().await.access_token, "fresh");
}

#[tokio::test]
async fn test_token_requests_ignore_api_base() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("a1", Some("r1"))))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = common::oauth_config(&server);
    config.endpoint.api_base = "https://api.example.com".into();
    let credential = config.exchange(&CallContext::new(), "code").await.unwrap();
    assert_eq!(credential.access_token, "a1");
    assert!(config.client(credential).is_err());
}
