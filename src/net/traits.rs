//! Networking traits.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::Result;

/// Executes a prepared HTTP request.
///
/// The transport only depends on this trait, so callers can swap in a
/// decorated executor (e.g. one that attaches an access token) or a test
/// double without touching request construction or decoding.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Send `request` and return the raw response.
    ///
    /// Implementations should bind any waiting they do to `ctx`.
    async fn execute(&self, ctx: &CallContext, request: reqwest::Request) -> Result<reqwest::Response>;
}
