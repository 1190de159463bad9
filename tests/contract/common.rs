use std::sync::Arc;

use wiremock::MockServer;

use withings::Client;
use withings::net::HttpClient;
use withings::oauth::{Endpoint, OAuthConfig};

pub const CLIENT_ID: &str = "client-id";
pub const CLIENT_SECRET: &str = "client-secret";

/// Endpoints pointing at the mock server.
pub fn endpoint(server: &MockServer) -> Endpoint {
    let base = server.uri();
    Endpoint::new(
        format!("{base}/oauth2_user/authorize2"),
        format!("{base}/v2/oauth2"),
        format!("{base}/"),
    )
}

pub fn oauth_config(server: &MockServer) -> OAuthConfig {
    OAuthConfig::new(CLIENT_ID, CLIENT_SECRET, endpoint(server))
        .with_redirect_url("https://app.test/callback")
        .with_scopes(["user.info", "user.metrics"])
}

/// Unauthenticated API client for the mock server.
pub fn api_client(server: &MockServer) -> Client {
    Client::new(Arc::new(HttpClient::new()), &format!("{}/", server.uri())).unwrap()
}

/// Successful token endpoint response.
pub fn token_body(access_token: &str, refresh_token: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "userid": "363",
        "access_token": access_token,
        "expires_in": 10800,
        "scope": "user.info,user.metrics",
        "csrf_token": "csrf",
        "token_type": "Bearer"
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = serde_json::Value::from(refresh);
    }
    serde_json::json!({ "status": 0, "body": body })
}

/// Form body of the `index`th request the server received.
pub async fn request_body(server: &MockServer, index: usize) -> String {
    let requests = server.received_requests().await.unwrap();
    String::from_utf8(requests[index].body.clone()).unwrap()
}
