use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::net::HttpClient;
use crate::oauth::{
    Endpoint, OAuthConfig, SCOPE_USER_ACTIVITY, SCOPE_USER_INFO, SCOPE_USER_METRICS,
};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "oauth.client_id") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Settings taken from the environment. Not serialized.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub region: Region,
    /// Overrides the region's authorization endpoint.
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Overrides the region's token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("region", &self.region)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: None,
            scopes: default_scopes(),
            region: Region::default(),
            auth_url: None,
            token_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Overrides the region's API base. Must end in `/`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_agent: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Which Withings cloud to talk to.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    #[default]
    Public,
    Hipaa,
}

impl Region {
    pub fn endpoint(self) -> Endpoint {
        match self {
            Self::Public => Endpoint::public(),
            Self::Hipaa => Endpoint::hipaa(),
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Hipaa => write!(f, "hipaa"),
        }
    }
}

impl FromStr for Region {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "hipaa" | "us-med" => Ok(Self::Hipaa),
            _ => Err(format!("Unknown region: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_scopes() -> Vec<String> {
    [SCOPE_USER_INFO, SCOPE_USER_METRICS, SCOPE_USER_ACTIVITY]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
const fn default_request_timeout_secs() -> u64 {
    60
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading, env overrides, and client construction
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `WITHINGS_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save the file-level configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `WITHINGS_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }

        // -- OAuth --
        env_str!("oauth.client_id", "WITHINGS_CLIENT_ID", self.oauth.client_id);
        env_str!("oauth.client_secret", "WITHINGS_CLIENT_SECRET", self.oauth.client_secret);
        env_opt_str!("oauth.redirect_url", "WITHINGS_REDIRECT_URL", self.oauth.redirect_url);
        if let Ok(val) = std::env::var("WITHINGS_SCOPES") {
            self.oauth.scopes = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("oauth.scopes", "WITHINGS_SCOPES");
        }
        env_parse!("oauth.region", "WITHINGS_REGION", self.oauth.region);
        env_opt_str!("oauth.auth_url", "WITHINGS_AUTH_URL", self.oauth.auth_url);
        env_opt_str!("oauth.token_url", "WITHINGS_TOKEN_URL", self.oauth.token_url);

        // -- API --
        env_opt_str!("api.base_url", "WITHINGS_API_BASE_URL", self.api.base_url);
        env_opt_str!("api.user_agent", "WITHINGS_USER_AGENT", self.api.user_agent);
        env_parse!(
            "api.request_timeout_secs",
            "WITHINGS_REQUEST_TIMEOUT_SECS",
            self.api.request_timeout_secs
        );
        env_parse!(
            "api.connect_timeout_secs",
            "WITHINGS_CONNECT_TIMEOUT_SECS",
            self.api.connect_timeout_secs
        );

        // -- Logging --
        env_str!("logging.level", "WITHINGS_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "WITHINGS_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }

    /// Check the settings needed to talk to the API.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() {
            return Err(Error::MissingCredential("oauth.client_id".into()));
        }
        if self.oauth.client_secret.is_empty() {
            return Err(Error::MissingCredential("oauth.client_secret".into()));
        }
        let endpoint = self.endpoint();
        for (name, value) in [
            ("oauth.auth_url", &endpoint.auth_url),
            ("oauth.token_url", &endpoint.token_url),
            ("api.base_url", &endpoint.api_base),
        ] {
            url::Url::parse(value).map_err(|e| Error::Config(format!("{name}: {e}")))?;
        }
        if !endpoint.api_base.ends_with('/') {
            return Err(Error::Config("api.base_url must end with '/'".into()));
        }
        Ok(())
    }

    /// Region endpoints with any explicit URL overrides applied.
    pub fn endpoint(&self) -> Endpoint {
        let mut endpoint = self.oauth.region.endpoint();
        if let Some(url) = &self.oauth.auth_url {
            endpoint.auth_url.clone_from(url);
        }
        if let Some(url) = &self.oauth.token_url {
            endpoint.token_url.clone_from(url);
        }
        if let Some(url) = &self.api.base_url {
            endpoint.api_base.clone_from(url);
        }
        endpoint
    }

    /// HTTP client with the configured timeouts.
    pub fn http_client(&self) -> HttpClient {
        HttpClient::builder()
            .request_timeout(Duration::from_secs(self.api.request_timeout_secs))
            .connect_timeout(Duration::from_secs(self.api.connect_timeout_secs))
            .build()
    }

    /// Validated OAuth configuration.
    pub fn oauth_config(&self) -> Result<OAuthConfig> {
        self.validate()?;
        let mut config = OAuthConfig::new(
            self.oauth.client_id.clone(),
            self.oauth.client_secret.clone(),
            self.endpoint(),
        )
        .with_scopes(self.oauth.scopes.iter().cloned())
        .with_executor(Arc::new(self.http_client()));
        if let Some(redirect) = &self.oauth.redirect_url {
            config = config.with_redirect_url(redirect.clone());
        }
        if let Some(user_agent) = &self.api.user_agent {
            config = config.with_user_agent(user_agent.clone());
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
