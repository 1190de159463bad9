//! Typed client for the Withings health data API.
//!
//! Two protocol layers sit under every call:
//!
//! - [`oauth`]: the Withings OAuth2 dialect (comma-joined scopes,
//!   `action=requesttoken`, enveloped token responses) and an
//!   auto-refreshing credential source;
//! - [`envelope`]: the `{status, body, error}` response envelope with its
//!   pagination cursor, decoded once into metadata and a typed payload.
//!
//! [`Client`] composes a shared [`transport::Transport`] with the resource
//! services ([`measure::MeasureService`]).

pub mod client;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod measure;
pub mod net;
pub mod oauth;
pub mod transport;

pub use client::Client;
pub use context::{CallContext, CancelReason};
pub use envelope::{ApiStatus, EnvelopeMeta};
pub use error::{Error, ErrorKind, Result};
pub use oauth::{Credential, OAuthConfig};
pub use transport::Response;
