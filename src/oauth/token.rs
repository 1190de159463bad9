//! Issued credential and expiry checks.
//!
//! A [`Credential`] is produced only by the token endpoint. It is never
//! mutated after issuance: a refresh yields a new value that replaces the
//! old one wholesale.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Safety margin for expiry checks (10 seconds).
///
/// A credential is considered expired this long before its actual expiry
/// so a request in flight does not race the server-side cutoff.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// OAuth credential issued by the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    /// The access token sent with API requests.
    pub access_token: String,

    /// Token type, typically "Bearer".
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token; absent when the grant did not yield one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When the access token expires. `None` means it never does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,

    /// Non-standard fields returned alongside the token (`userid`, `scope`,
    /// `csrf_token`, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// A bearer credential with no refresh token and no expiry.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: None,
            expiry: None,
            extra: Map::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Set the expiry `expires_in` seconds from now. Non-positive values
    /// leave the expiry unset.
    pub fn with_expires_in(mut self, expires_in: i64) -> Self {
        if expires_in > 0 {
            self.expiry = Some(Utc::now() + chrono::Duration::seconds(expires_in));
        }
        self
    }

    /// Whether the access token is expired or within the safety margin.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// [`is_expired`](Self::is_expired) against an explicit clock.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => {
                let margin = chrono::Duration::from_std(EXPIRY_SAFETY_MARGIN)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                now >= expiry - margin
            }
            None => false,
        }
    }

    /// Non-empty and not expired.
    #[must_use]
    pub fn valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }

    /// Duration until the access token expires.
    ///
    /// Returns `Duration::ZERO` if it has already expired or has no expiry.
    pub fn time_until_expiry(&self) -> Duration {
        self.expiry
            .and_then(|expiry| (expiry - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// A raw extra field by key.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// The Withings user id, sent either as a number or a numeric string.
    pub fn user_id(&self) -> Option<i64> {
        match self.extra("userid")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The granted scopes as sent by the server (comma separated).
    pub fn scope(&self) -> Option<&str> {
        self.extra("scope").and_then(Value::as_str)
    }

    /// The granted scopes split on `,`.
    pub fn scopes(&self) -> Vec<&str> {
        self.scope()
            .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Value for the `Authorization` header.
    pub fn authorization_value(&self) -> String {
        let token_type = if self.token_type.is_empty() {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{token_type} {}", self.access_token)
    }
}
