//! Token endpoint requests.
//!
//! Withings takes an extra `action=requesttoken` parameter, expects the
//! client credentials in the form body and wraps the token in the usual
//! `{status, body}` envelope instead of returning it at the top level.

use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::envelope::{Enveloped, Envelope};
use crate::error::{Error, Result, TokenError};
use crate::transport::{Form, Transport};

use super::token::Credential;

const ACTION_REQUEST_TOKEN: &str = "requesttoken";

/// The two grants the token endpoint accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantRequest {
    /// Exchange the code returned to the redirect URI.
    AuthorizationCode {
        code: String,
        redirect_uri: Option<String>,
    },
    /// Renew with a refresh token.
    RefreshToken { refresh_token: String },
}

impl GrantRequest {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Form body for this grant, client credentials included.
    pub fn to_form(&self, client_id: &str, client_secret: &str) -> Form {
        let mut form = Form::new();
        form.insert("action".into(), ACTION_REQUEST_TOKEN.into());
        form.insert("grant_type".into(), self.grant_type().into());
        form.insert("client_id".into(), client_id.into());
        form.insert("client_secret".into(), client_secret.into());

        match self {
            Self::AuthorizationCode { code, redirect_uri } => {
                form.insert("code".into(), code.clone());
                if let Some(uri) = redirect_uri {
                    form.insert("redirect_uri".into(), uri.clone());
                }
            }
            Self::RefreshToken { refresh_token } => {
                form.insert("refresh_token".into(), refresh_token.clone());
            }
        }
        form
    }
}

/// Token payload inside the envelope `body`.
#[derive(Debug, Default, Deserialize)]
struct TokenPayload {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TokenPayload {
    fn into_credential(self) -> Credential {
        let mut credential = Credential::new(self.access_token);
        if let Some(token_type) = self.token_type.filter(|t| !t.is_empty()) {
            credential.token_type = token_type;
        }
        credential.refresh_token = self.refresh_token.filter(|t| !t.is_empty());
        credential.extra = self.extra;
        credential.with_expires_in(self.expires_in.unwrap_or_default())
    }
}

/// POST `form` to `token_url` and map the response to a credential.
pub(crate) async fn retrieve_token(
    transport: &Transport,
    ctx: &CallContext,
    token_url: &str,
    form: &Form,
) -> Result<Credential> {
    let request = transport.new_request(Method::POST, token_url, Some(form))?;
    let response = transport.bare_execute(ctx, request).await?;
    let http_status = response.status();
    let raw = ctx.run(async { response.bytes().await.map_err(Error::from) }).await?;

    if !http_status.is_success() {
        warn!(status = http_status.as_u16(), "Token endpoint returned HTTP error");
        return Err(TokenError {
            http_status: http_status.as_u16(),
            status: None,
            description: Some(String::from_utf8_lossy(&raw).into_owned()),
        }
        .into());
    }

    let envelope = Envelope::parse(&raw)?;
    if !envelope.status().is_success() {
        warn!(status = %envelope.status(), "Token endpoint rejected grant");
        return Err(TokenError {
            http_status: http_status.as_u16(),
            status: Some(envelope.status()),
            description: envelope.meta().error.clone(),
        }
        .into());
    }

    let payload: Enveloped<TokenPayload> = envelope.payload()?;
    if payload.body.access_token.is_empty() {
        return Err(TokenError {
            http_status: http_status.as_u16(),
            status: Some(envelope.status()),
            description: Some("server response missing access_token".into()),
        }
        .into());
    }

    debug!("Token endpoint issued credential");
    Ok(payload.body.into_credential())
}
