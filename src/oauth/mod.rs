//! Withings OAuth2 dialect.
//!
//! Differences from the common authorization-code flow:
//!
//! - scopes are joined with `,` instead of a space;
//! - the token endpoint needs `action=requesttoken` and takes the client
//!   credentials in the form body;
//! - token responses are wrapped in the `{status, body}` envelope and carry
//!   extra fields (`userid`, `csrf_token`, ...).
//!
//! # Architecture
//!
//! - [`OAuthConfig`] - client credentials and endpoints; builds the consent
//!   URL and performs the code exchange and refresh grants
//! - [`Credential`] - issued token with expiry checking and extras
//! - [`GrantRequest`] - the two token endpoint grants
//! - [`ReuseTokenSource`] - auto-refreshing, single-flight credential holder
//! - [`AuthorizedExecutor`] - attaches the credential to every request
//!
//! # Example
//!
//! ```rust,ignore
//! use withings::{CallContext, oauth::{Endpoint, OAuthConfig}};
//!
//! let config = OAuthConfig::new(client_id, client_secret, Endpoint::public())
//!     .with_redirect_url("https://example.com/callback")
//!     .with_scopes(["user.info", "user.metrics"]);
//! let url = config.auth_code_url("state", &[])?;
//! // ... user consents, redirect delivers `code` ...
//! let credential = config.exchange(&CallContext::new(), &code).await?;
//! let client = config.client(credential)?;
//! ```

pub mod grant;
pub mod source;
pub mod token;

pub use grant::GrantRequest;
pub use source::{AuthorizedExecutor, RefreshListener, ReuseTokenSource, StaticTokenSource, TokenSource};
pub use token::{Credential, EXPIRY_SAFETY_MARGIN};

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument};
use url::Url;

use crate::client::Client;
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::net::{HttpClient, HttpExecutor};
use crate::transport::Transport;

/// Public cloud authorization endpoint.
pub const PUBLIC_AUTH_URL: &str = "https://account.withings.com/oauth2_user/authorize2";
/// Public cloud token endpoint.
pub const PUBLIC_TOKEN_URL: &str = "https://wbsapi.withings.net/v2/oauth2";
/// Public cloud API base.
pub const PUBLIC_API_BASE: &str = "https://wbsapi.withings.net/";

/// HIPAA cloud authorization endpoint.
pub const HIPAA_AUTH_URL: &str = "https://account.us.withingsmed.com/oauth2_user/authorize2";
/// HIPAA cloud token endpoint.
pub const HIPAA_TOKEN_URL: &str = "https://wbsapi.us.withingsmed.net/v2/oauth2";
/// HIPAA cloud API base.
pub const HIPAA_API_BASE: &str = "https://wbsapi.us.withingsmed.net/";

/// Scope granting access to user profile information.
pub const SCOPE_USER_INFO: &str = "user.info";
/// Scope granting access to measurements.
pub const SCOPE_USER_METRICS: &str = "user.metrics";
/// Scope granting access to activity data.
pub const SCOPE_USER_ACTIVITY: &str = "user.activity";
/// Scope granting access to sleep events.
pub const SCOPE_USER_SLEEP_EVENTS: &str = "user.sleepevents";

/// The three URLs a deployment needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub auth_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl Endpoint {
    pub fn new(auth_url: impl Into<String>, token_url: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            api_base: api_base.into(),
        }
    }

    /// Public cloud.
    pub fn public() -> Self {
        Self::new(PUBLIC_AUTH_URL, PUBLIC_TOKEN_URL, PUBLIC_API_BASE)
    }

    /// HIPAA compliant US cloud.
    pub fn hipaa() -> Self {
        Self::new(HIPAA_AUTH_URL, HIPAA_TOKEN_URL, HIPAA_API_BASE)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::public()
    }
}

/// Extra authorization URL parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUrlParam {
    key: String,
    value: String,
}

impl AuthUrlParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// `mode=demo`: authorize against the Withings demo account.
    pub fn mode_demo() -> Self {
        Self::new("mode", "demo")
    }
}

/// OAuth client configuration.
#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: Option<String>,
    pub scopes: Vec<String>,
    pub endpoint: Endpoint,
    user_agent: Option<String>,
    executor: Arc<dyn HttpExecutor>,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("endpoint", &self.endpoint)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: None,
            scopes: Vec::new(),
            endpoint,
            user_agent: None,
            executor: Arc::new(HttpClient::new()),
        }
    }

    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = Some(redirect_url.into());
        self
    }

    /// Set the requested scopes. Order is kept in the encoded URL.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Use `executor` for token requests and for clients built from this
    /// configuration.
    pub fn with_executor(mut self, executor: Arc<dyn HttpExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Override the `User-Agent` sent to the token endpoint and the API.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn executor(&self) -> Arc<dyn HttpExecutor> {
        Arc::clone(&self.executor)
    }

    /// Consent page URL the user is sent to.
    ///
    /// Core parameters are sorted by key; extra parameters never replace a
    /// core parameter. Each scope is percent-encoded on its own and the
    /// separator stays a literal `,`.
    pub fn auth_code_url(&self, state: &str, params: &[AuthUrlParam]) -> Result<Url> {
        if self.client_id.is_empty() {
            return Err(Error::MissingCredential("client_id".into()));
        }
        let mut url = Url::parse(&self.endpoint.auth_url)
            .map_err(|e| Error::Config(format!("invalid authorization URL: {e}")))?;

        let mut pairs: BTreeMap<&str, String> = BTreeMap::new();
        pairs.insert("client_id", urlencoding::encode(&self.client_id).into_owned());
        pairs.insert("response_type", "code".into());
        if let Some(redirect) = &self.redirect_url {
            pairs.insert("redirect_uri", urlencoding::encode(redirect).into_owned());
        }
        if !self.scopes.is_empty() {
            pairs.insert("scope", encode_scopes(&self.scopes));
        }
        if !state.is_empty() {
            pairs.insert("state", urlencoding::encode(state).into_owned());
        }
        for param in params {
            pairs
                .entry(param.key.as_str())
                .or_insert_with(|| urlencoding::encode(&param.value).into_owned());
        }

        let encoded = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), v))
            .collect::<Vec<_>>()
            .join("&");
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
            _ => encoded,
        };
        url.set_query(Some(&query));
        Ok(url)
    }

    /// Exchange an authorization code for a credential.
    #[instrument(skip(self, ctx, code))]
    pub async fn exchange(&self, ctx: &CallContext, code: &str) -> Result<Credential> {
        let grant = GrantRequest::AuthorizationCode {
            code: code.to_string(),
            redirect_uri: self.redirect_url.clone(),
        };
        let credential = self.request_token(ctx, &grant).await?;
        info!(user_id = ?credential.user_id(), "Authorization code exchanged");
        Ok(credential)
    }

    /// Renew `credential` with its refresh token.
    ///
    /// When the server does not rotate the refresh token the previous one
    /// is carried over to the new credential.
    #[instrument(skip(self, ctx, credential))]
    pub async fn refresh(&self, ctx: &CallContext, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(Error::ReauthorizationRequired)?;

        let grant = GrantRequest::RefreshToken {
            refresh_token: refresh_token.clone(),
        };
        let mut fresh = self.request_token(ctx, &grant).await?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token);
        }
        Ok(fresh)
    }

    /// Auto-refreshing source seeded with `credential`.
    pub fn token_source(&self, credential: Credential) -> ReuseTokenSource {
        ReuseTokenSource::new(self.clone(), credential)
    }

    /// API client that authorizes every call with `credential`, refreshing
    /// it as needed.
    pub fn client(&self, credential: Credential) -> Result<Client> {
        self.client_with_source(Arc::new(self.token_source(credential)))
    }

    /// API client that authorizes every call with tokens from `source`.
    pub fn client_with_source(&self, source: Arc<dyn TokenSource>) -> Result<Client> {
        let executor = AuthorizedExecutor::new(self.executor(), source);
        let transport = self.transport(Arc::new(executor), &self.endpoint.api_base)?;
        Ok(Client::from_transport(transport))
    }

    fn transport(&self, executor: Arc<dyn HttpExecutor>, base_url: &str) -> Result<Transport> {
        let transport = Transport::new(executor, base_url)?;
        match &self.user_agent {
            Some(user_agent) => transport.with_user_agent(user_agent),
            None => Ok(transport),
        }
    }

    async fn request_token(&self, ctx: &CallContext, grant: &GrantRequest) -> Result<Credential> {
        if self.client_id.is_empty() {
            return Err(Error::MissingCredential("client_id".into()));
        }
        if self.client_secret.is_empty() {
            return Err(Error::MissingCredential("client_secret".into()));
        }
        // Token requests do not depend on the API base.
        let origin = Url::parse(&self.endpoint.token_url)
            .and_then(|url| url.join("/"))
            .map_err(|e| Error::Config(format!("invalid token URL: {e}")))?;

        let transport = self.transport(self.executor(), origin.as_str())?;
        let form = grant.to_form(&self.client_id, &self.client_secret);
        grant::retrieve_token(&transport, ctx, &self.endpoint.token_url, &form).await
    }
}

/// Percent-encode each scope and join them with a literal `,`.
pub fn encode_scopes<S: AsRef<str>>(scopes: &[S]) -> String {
    scopes
        .iter()
        .map(|s| urlencoding::encode(s.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}
