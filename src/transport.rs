//! Request construction and envelope-aware execution.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderValue, USER_AGENT};
use reqwest::{Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::context::CallContext;
use crate::envelope::{ApiStatus, Envelope};
use crate::error::{Error, Result};
use crate::net::HttpExecutor;
use crate::net::client::USER_AGENT as DEFAULT_USER_AGENT;

/// Form parameters, kept sorted so encoded bodies are reproducible.
pub type Form = BTreeMap<String, String>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Envelope and HTTP metadata of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub http_status: StatusCode,
    pub status: ApiStatus,
    pub more: bool,
    pub offset: i64,
    pub error: Option<String>,
}

impl Response {
    /// Offset to request next, or `None` when the listing is exhausted.
    pub fn next_offset(&self) -> Option<i64> {
        self.more.then_some(self.offset)
    }
}

/// Shared HTTP plumbing for every sub-client.
///
/// Holds the API base endpoint, the identification header and the executor.
/// Cheap to share behind an `Arc`; carries no per-call state.
pub struct Transport {
    executor: Arc<dyn HttpExecutor>,
    base_url: Url,
    user_agent: HeaderValue,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url.as_str())
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a transport rooted at `base_url`.
    ///
    /// The base must parse and its path must end in `/`, otherwise relative
    /// paths would silently replace its last segment.
    pub fn new(executor: Arc<dyn HttpExecutor>, base_url: &str) -> Result<Self> {
        // Checked on the raw string: parsing turns a bare host into path "/".
        if !base_url.ends_with('/') {
            return Err(Error::Config(format!(
                "base URL {base_url} must have a trailing slash"
            )));
        }
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("base URL {base_url} cannot be a base")));
        }
        Ok(Self {
            executor,
            base_url,
            user_agent: HeaderValue::from_static(DEFAULT_USER_AGENT),
        })
    }

    /// Override the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: &str) -> Result<Self> {
        self.user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| Error::Config(format!("invalid user agent: {e}")))?;
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base endpoint.
    ///
    /// Relative paths (no leading slash) are appended to the base path;
    /// absolute URLs are returned unchanged.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(path) {
            return Ok(absolute);
        }
        Ok(self.base_url.join(path)?)
    }

    /// Build a request for `path`, form-encoding `form` into the body.
    pub fn new_request(&self, method: Method, path: &str, form: Option<&Form>) -> Result<Request> {
        let url = self.resolve(path)?;
        let mut request = Request::new(method, url);
        request
            .headers_mut()
            .insert(USER_AGENT, self.user_agent.clone());

        if let Some(form) = form {
            let body = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(form.iter())
                .finish();
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
            *request.body_mut() = Some(body.into());
        }
        Ok(request)
    }

    /// Send `request` through the executor, bound to `ctx`.
    pub async fn bare_execute(&self, ctx: &CallContext, request: Request) -> Result<reqwest::Response> {
        ctx.run(self.executor.execute(ctx, request)).await
    }

    /// Send `request`, decode the envelope and the payload.
    ///
    /// A non-zero envelope status is returned as [`Error::Api`] before the
    /// payload is decoded.
    #[instrument(skip(self, ctx, request), fields(url = %request.url()))]
    pub async fn execute<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        request: Request,
    ) -> Result<(T, Response)> {
        let response = self.bare_execute(ctx, request).await?;
        let http_status = response.status();
        let raw = ctx.run(async { response.bytes().await.map_err(Error::from) }).await?;
        debug!(http_status = http_status.as_u16(), bytes = raw.len(), "Received response");

        let envelope = Envelope::parse(&raw)?;
        if let Err(err) = envelope.check_status() {
            warn!(status = %envelope.status(), "API returned error status");
            return Err(err);
        }

        let payload = envelope.payload()?;
        let meta = envelope.meta();
        Ok((
            payload,
            Response {
                http_status,
                status: meta.status,
                more: meta.pagination.more,
                offset: meta.pagination.offset,
                error: meta.error.clone(),
            },
        ))
    }

    /// POST `form` to `path` and decode the response.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        path: &str,
        form: &Form,
    ) -> Result<(T, Response)> {
        let request = self.new_request(Method::POST, path, Some(form))?;
        self.execute(ctx, request).await
    }
}
