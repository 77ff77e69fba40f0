//! Logging
//!
//! Structured `tracing` output: pretty in debug builds, JSON in release.
//! `RUST_LOG` overrides the default filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to startup logs
    pub service_name: String,

    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self::new("acton-link")
    }
}

impl ObservabilityConfig {
    /// Create config for a service
    pub fn new(service_name: impl Into<String>) -> Self {
        let default_filter = if cfg!(debug_assertions) {
            "debug,acton_link=trace,tower_http=debug"
        } else {
            "info"
        };

        Self {
            service_name: service_name.into(),
            default_filter: default_filter.to_string(),
        }
    }

    /// Replace the fallback filter
    #[must_use]
    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns error if a global subscriber is already set
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    #[cfg(debug_assertions)]
    registry
        .with(tracing_subscriber::fmt::layer().pretty())
        .try_init()?;

    #[cfg(not(debug_assertions))]
    registry
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()?;

    tracing::info!(service = %config.service_name, "Logging initialized");
    Ok(())
}
