//! Configuration management for acton-link
//!
//! Configuration is loaded from multiple sources with clear precedence:
//!
//! 1. Environment variables (highest priority, `ACTON_LINK_` prefix, `__` for nesting)
//! 2. `./config.toml` (development)
//! 3. `~/.config/acton-link/{service}/config.toml` (user config, XDG)
//! 4. `/etc/acton-link/{service}/config.toml` (system config)
//! 5. Hardcoded defaults (fallback)
//!
//! Environment variable format: `ACTON_LINK_SECTION__FIELD_NAME`
//! - Example: `ACTON_LINK_LINKING__CHALLENGE_TTL_SECS=300`
//! - Example: `ACTON_LINK_PROVIDERS__LINKEDIN__CLIENT_SECRET=...`
//!
//! # Example Configuration
//!
//! ```toml
//! [service]
//! name = "acton-link"
//! bind_address = "0.0.0.0:3978"
//! base_uri = "https://bot.example.com"
//!
//! [linking]
//! correlation_ttl_secs = 600
//! challenge_ttl_secs = 600
//! max_challenge_attempts = 5
//!
//! [providers.azure]
//! kind = "azure_ad_v1"
//! client_id = "..."
//! client_secret = "..."
//!
//! [providers.linkedin]
//! kind = "linked_in"
//! client_id = "..."
//! client_secret = "..."
//! scopes = ["openid", "profile", "email"]
//!
//! [redis]
//! url = "redis://127.0.0.1:6379"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::linking::challenge::DEFAULT_CHALLENGE_TTL_SECS;
use crate::agents::DEFAULT_MAX_CHALLENGE_ATTEMPTS;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ACTON_LINK_";

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name, used for config paths and logs
    pub name: String,

    /// Socket address the HTTP server binds to
    pub bind_address: String,

    /// Public base URI; callback URLs are derived from it
    pub base_uri: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "acton-link".to_string(),
            bind_address: "127.0.0.1:3978".to_string(),
            base_uri: "http://localhost:3978".to_string(),
        }
    }
}

/// Linking flow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingSettings {
    /// Lifetime of a correlation entry (sign-in URL) in seconds
    pub correlation_ttl_secs: u64,

    /// Lifetime of a challenge code in seconds
    pub challenge_ttl_secs: u64,

    /// Wrong codes accepted before the pending token is discarded
    pub max_challenge_attempts: u32,

    /// Timeout for each provider request in seconds
    pub provider_timeout_secs: u64,

    /// Interval of the background expiry sweep in seconds
    pub sweep_interval_secs: u64,

    /// Provider used when a command names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
}

impl Default for LinkingSettings {
    fn default() -> Self {
        Self {
            correlation_ttl_secs: 600,
            challenge_ttl_secs: DEFAULT_CHALLENGE_TTL_SECS,
            max_challenge_attempts: DEFAULT_MAX_CHALLENGE_ATTEMPTS,
            provider_timeout_secs: 10,
            sweep_interval_secs: 60,
            default_provider: None,
        }
    }
}

impl LinkingSettings {
    /// Correlation entry lifetime
    #[must_use]
    pub const fn correlation_ttl(&self) -> Duration {
        Duration::from_secs(self.correlation_ttl_secs)
    }

    /// Challenge lifetime
    #[must_use]
    pub const fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    /// Provider request timeout
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Sweep interval, never zero
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Reject settings that would make every sign-in fail
    ///
    /// # Errors
    ///
    /// Returns an error naming the first lifetime, timeout or attempt cap
    /// that is zero
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("linking.correlation_ttl_secs", self.correlation_ttl_secs),
            ("linking.challenge_ttl_secs", self.challenge_ttl_secs),
            ("linking.provider_timeout_secs", self.provider_timeout_secs),
            ("linking.max_challenge_attempts", u64::from(self.max_challenge_attempts)),
        ] {
            anyhow::ensure!(value > 0, "{name} must be greater than zero");
        }
        Ok(())
    }
}

/// Supported provider flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Azure AD v1 endpoints with Microsoft Graph as resource
    #[serde(alias = "azureADv1")]
    AzureAdV1,
    /// LinkedIn OAuth2
    #[serde(alias = "linkedIn", alias = "linkedin")]
    LinkedIn,
    /// Any provider with explicitly configured endpoints
    Generic,
}

/// One configured identity provider
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider flavour
    pub kind: ProviderKind,

    /// Name shown to users; defaults per kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// OAuth2 client id
    pub client_id: String,

    /// OAuth2 client secret
    pub client_secret: String,

    /// Callback URL; defaults to `{base_uri}/auth/{name}/callback`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// Scopes requested on every authorization URL
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Authorization endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    /// Token endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,

    /// Profile endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,

    /// Fixed query parameters added to every authorization URL
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authorization_params: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Minimal configuration for a provider kind
    #[must_use]
    pub fn new(kind: ProviderKind, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            kind,
            display_name: None,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: None,
            scopes: Vec::new(),
            auth_url: None,
            token_url: None,
            profile_url: None,
            authorization_params: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("display_name", &self.display_name)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("profile_url", &self.profile_url)
            .field("authorization_params", &self.authorization_params)
            .finish()
    }
}

/// Durable correlation store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// Complete acton-link configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Service settings
    #[serde(default)]
    pub service: ServiceSettings,

    /// Linking flow settings
    #[serde(default)]
    pub linking: LinkingSettings,

    /// Identity providers keyed by route name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Durable correlation store; in-process store when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisSettings>,
}

impl LinkConfig {
    /// Load configuration for a specific service
    ///
    /// Searches for configuration in XDG-compliant locations with precedence:
    /// 1. Environment variables (`ACTON_LINK_*`, use `__` for nesting)
    /// 2. `./config.toml`
    /// 3. `~/.config/acton-link/{service_name}/config.toml`
    /// 4. `/etc/acton-link/{service_name}/config.toml`
    /// 5. Defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be parsed or the merged
    /// values do not deserialize
    pub fn load_for_service(service_name: &str) -> anyhow::Result<Self> {
        let mut figment = Figment::new()
            // 5. Start with defaults (lowest priority)
            .merge(Toml::string(&toml::to_string(&Self::default())?));

        // 4. System config: /etc/acton-link/{service_name}/config.toml
        let system_config = PathBuf::from("/etc/acton-link")
            .join(service_name)
            .join("config.toml");
        if system_config.exists() {
            figment = figment.merge(Toml::file(&system_config));
        }

        // 3. User config: ~/.config/acton-link/{service_name}/config.toml
        let user_config = Self::recommended_path(service_name);
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }

        // 2. Local config: ./config.toml
        let local_config = PathBuf::from("./config.toml");
        if local_config.exists() {
            figment = figment.merge(Toml::file(&local_config));
        }

        // 1. Environment variables (highest priority, double underscore for nesting)
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));

        let config: Self = figment.extract()?;
        config.linking.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, then environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the file contains invalid TOML or the merged values
    /// do not deserialize
    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let config = Figment::new()
            .merge(Toml::string(&toml::to_string(&Self::default())?))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true))
            .extract::<Self>()?;

        config.linking.validate()?;
        Ok(config)
    }

    /// Get the recommended XDG config path for a service
    #[must_use]
    pub fn recommended_path(service_name: &str) -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from("./config.toml"),
            |config_dir| {
                config_dir
                    .join("acton-link")
                    .join(service_name)
                    .join("config.toml")
            },
        )
    }

    /// Callback URL for a provider route name
    ///
    /// Uses the provider's explicit `redirect_uri` when set, otherwise
    /// `{base_uri}/auth/{name}/callback`.
    #[must_use]
    pub fn redirect_uri_for(&self, name: &str, provider: &ProviderConfig) -> String {
        provider.redirect_uri.clone().unwrap_or_else(|| {
            format!(
                "{}/auth/{name}/callback",
                self.service.base_uri.trim_end_matches('/')
            )
        })
    }
}
