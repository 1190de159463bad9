//! Credential sources.
//!
//! [`ReuseTokenSource`] hands out the held credential while it is valid and
//! refreshes it, once, when it is not. [`AuthorizedExecutor`] attaches the
//! resulting token to every outgoing request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::net::HttpExecutor;

use super::OAuthConfig;
use super::token::Credential;

/// Something that can produce a valid credential.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a credential that is valid for at least the safety margin.
    async fn token(&self, ctx: &CallContext) -> Result<Credential>;
}

/// Always returns the same credential.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    credential: Credential,
}

impl StaticTokenSource {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self, _ctx: &CallContext) -> Result<Credential> {
        Ok(self.credential.clone())
    }
}

/// Callback invoked with every newly issued credential.
pub type RefreshListener = Arc<dyn Fn(&Credential) + Send + Sync>;

/// Auto-refreshing credential holder.
///
/// The held credential sits behind an async mutex. A caller that finds it
/// expired refreshes while still holding the lock, so callers queued behind
/// it observe the outcome instead of refreshing again: the new credential
/// on success, the same error on failure.
pub struct ReuseTokenSource {
    config: OAuthConfig,
    current: Mutex<Held>,
    /// Completed refresh attempts. Only changed with `current` locked.
    attempts: AtomicU64,
    listener: Option<RefreshListener>,
}

struct Held {
    credential: Credential,
    /// Outcome of the latest attempt when it failed.
    failure: Option<Error>,
}

impl std::fmt::Debug for ReuseTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReuseTokenSource")
            .field("config", &self.config)
            .field("attempts", &self.attempts.load(Ordering::Relaxed))
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

impl ReuseTokenSource {
    pub fn new(config: OAuthConfig, credential: Credential) -> Self {
        Self {
            config,
            current: Mutex::new(Held {
                credential,
                failure: None,
            }),
            attempts: AtomicU64::new(0),
            listener: None,
        }
    }

    /// Register a callback for rotated credentials, e.g. to persist them.
    pub fn with_refresh_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Credential) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Snapshot of the held credential, without refreshing.
    pub async fn current(&self) -> Credential {
        self.current.lock().await.credential.clone()
    }
}

#[async_trait]
impl TokenSource for ReuseTokenSource {
    #[instrument(skip(self, ctx))]
    async fn token(&self, ctx: &CallContext) -> Result<Credential> {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut held = ctx.run(async { Ok::<_, Error>(self.current.lock().await) }).await?;
        if held.credential.valid() {
            return Ok(held.credential.clone());
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            // A refresh finished while this caller waited for the lock.
            if let Some(err) = &held.failure {
                return Err(err.clone());
            }
        }
        if held.credential.refresh_token.is_none() {
            return Err(Error::ReauthorizationRequired);
        }

        debug!("Held credential expired, refreshing");
        let outcome = self.config.refresh(ctx, &held.credential).await;
        match outcome {
            Ok(fresh) => {
                held.credential = fresh.clone();
                held.failure = None;
                self.attempts.fetch_add(1, Ordering::Release);
                drop(held);

                info!("Token refreshed successfully");
                if let Some(listener) = &self.listener {
                    listener(&fresh);
                }
                Ok(fresh)
            }
            // The refreshing caller gave up; whoever is next tries again.
            Err(err @ Error::Cancelled(_)) => Err(err),
            Err(err) => {
                warn!(error = %err, "Token refresh failed");
                held.failure = Some(err.clone());
                self.attempts.fetch_add(1, Ordering::Release);
                Err(err)
            }
        }
    }
}

/// Executor decorator that sets the `Authorization` header.
#[derive(Clone)]
pub struct AuthorizedExecutor {
    inner: Arc<dyn HttpExecutor>,
    source: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for AuthorizedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedExecutor").finish_non_exhaustive()
    }
}

impl AuthorizedExecutor {
    pub fn new(inner: Arc<dyn HttpExecutor>, source: Arc<dyn TokenSource>) -> Self {
        Self { inner, source }
    }
}

#[async_trait]
impl HttpExecutor for AuthorizedExecutor {
    async fn execute(&self, ctx: &CallContext, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let credential = self.source.token(ctx).await?;
        let mut value = HeaderValue::from_str(&credential.authorization_value())
            .map_err(|_| Error::Config("access token contains invalid header characters".into()))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        self.inner.execute(ctx, request).await
    }
}
