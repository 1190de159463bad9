//! Error types for the Withings client.
//!
//! Errors fall into four families that callers can branch on through
//! [`Error::kind`]: configuration problems detected before any request,
//! transport failures (including cancellation), decode failures, and
//! API-level failures reported inside the response envelope.

use std::fmt;
use std::sync::Arc;

use crate::context::CancelReason;
use crate::envelope::{ApiStatus, EnvelopeMeta};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the Withings client.
///
/// Cloneable so one failed refresh can be reported to every caller that
/// waited on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid configuration (malformed endpoint, bad base URL, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required client credential is missing.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// HTTP client error.
    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// The HTTP request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The caller's context was cancelled or its deadline passed.
    #[error("Request cancelled: {0}")]
    Cancelled(CancelReason),

    /// The response body could not be decoded.
    #[error("Failed to decode {stage}: {source}")]
    Decode {
        stage: DecodeStage,
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The envelope carried a non-zero status.
    #[error("API error (status {status}){}", fmt_message(.message))]
    Api {
        status: ApiStatus,
        message: Option<String>,
        meta: EnvelopeMeta,
    },

    /// The token endpoint rejected a grant request.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The held credential cannot be refreshed; the user has to go through
    /// the consent page again.
    #[error("Re-authorization required: no refresh token available")]
    ReauthorizationRequired,

    /// Invalid arguments for a resource call.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn fmt_message(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Decode,
    Api,
    InvalidRequest,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::MissingCredential(_) => ErrorKind::Configuration,
            Self::Network(_) | Self::Timeout | Self::Cancelled(_) => ErrorKind::Transport,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Api { .. } | Self::Token(_) | Self::ReauthorizationRequired => ErrorKind::Api,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Whether this error came from the network layer rather than the API.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// The envelope status carried by an API or token error, if any.
    pub fn api_status(&self) -> Option<ApiStatus> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Token(e) => e.status,
            _ => None,
        }
    }

    pub(crate) fn decode(stage: DecodeStage, source: serde_json::Error) -> Self {
        Self::Decode {
            stage,
            source: Arc::new(source),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(Arc::new(err))
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid URL: {err}"))
    }
}

/// Which pass of the envelope decoder failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The raw body is not valid JSON.
    Json,
    /// The `{status, body: {more, offset}}` metadata pass.
    Envelope,
    /// The caller's payload pass.
    Payload,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "response JSON"),
            Self::Envelope => write!(f, "response envelope"),
            Self::Payload => write!(f, "response payload"),
        }
    }
}

/// Error reported by the token endpoint.
///
/// Either the HTTP status was outside 2xx, or the envelope status was
/// non-zero, or a successful response did not contain a usable token.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "Token request failed{}{}: {}",
    fmt_http(.http_status),
    fmt_status(.status),
    fmt_description(.description)
)]
pub struct TokenError {
    /// HTTP status of the token endpoint response.
    pub http_status: u16,
    /// Envelope status, when the body could be decoded.
    pub status: Option<ApiStatus>,
    /// Provider-supplied description, or the raw body for HTTP failures.
    pub description: Option<String>,
}

fn fmt_http(status: &u16) -> String {
    if (200..300).contains(status) {
        String::new()
    } else {
        format!(" (HTTP {status})")
    }
}

fn fmt_description(description: &Option<String>) -> &str {
    description.as_deref().unwrap_or("unknown error")
}

fn fmt_status(status: &Option<ApiStatus>) -> String {
    match status {
        Some(s) => format!(" (status {s})"),
        None => String::new(),
    }
}
