//! Provider registry
//!
//! Configured providers keyed by their route name (the `{provider}` segment of
//! `/auth/{provider}/callback`).

use std::collections::BTreeMap;
use std::sync::Arc;

use super::providers::{azure_ad, linkedin, AzureAdProvider, GenericProvider, LinkedInProvider};
use super::types::{OAuth2Provider, OAuthError};
use crate::config::{LinkConfig, ProviderKind};
use crate::linking::ProviderName;

/// A configured provider adapter with its display name
#[derive(Clone)]
pub struct RegisteredProvider {
    /// Name shown to users
    pub display_name: String,
    /// Adapter for the provider's endpoints
    pub adapter: Arc<dyn OAuth2Provider>,
}

/// Configured providers keyed by route name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderName, RegisteredProvider>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider in `config.providers`
    ///
    /// # Errors
    ///
    /// Returns the first provider configuration error, prefixed with its name
    pub fn from_config(config: &LinkConfig) -> Result<Self, OAuthError> {
        let timeout = config.linking.provider_timeout();
        let mut registry = Self::new();

        for (name, provider) in &config.providers {
            let redirect_uri = config.redirect_uri_for(name, provider);
            let adapter: Arc<dyn OAuth2Provider> = match provider.kind {
                ProviderKind::AzureAdV1 => {
                    Arc::new(AzureAdProvider::new(provider, redirect_uri, timeout)?)
                }
                ProviderKind::LinkedIn => {
                    Arc::new(LinkedInProvider::new(provider, redirect_uri, timeout)?)
                }
                ProviderKind::Generic => Arc::new(
                    GenericProvider::new(provider, redirect_uri, timeout)
                        .map_err(|e| OAuthError::InvalidConfig(format!("provider {name}: {e}")))?,
                ),
            };
            let default_display = match provider.kind {
                ProviderKind::AzureAdV1 => azure_ad::DISPLAY_NAME,
                ProviderKind::LinkedIn => linkedin::DISPLAY_NAME,
                ProviderKind::Generic => name.as_str(),
            };

            let display_name = provider
                .display_name
                .clone()
                .unwrap_or_else(|| default_display.to_string());

            tracing::debug!(provider = %name, kind = ?provider.kind, "Registered OAuth2 provider");
            registry.register(ProviderName::new(name), display_name, adapter);
        }

        Ok(registry)
    }

    /// Add or replace a provider
    pub fn register(
        &mut self,
        name: ProviderName,
        display_name: impl Into<String>,
        adapter: Arc<dyn OAuth2Provider>,
    ) {
        self.providers.insert(
            name,
            RegisteredProvider {
                display_name: display_name.into(),
                adapter,
            },
        );
    }

    /// Look up a provider
    #[must_use]
    pub fn get(&self, name: &ProviderName) -> Option<&RegisteredProvider> {
        self.providers.get(name)
    }

    /// Display name for a provider, falling back to its route name
    #[must_use]
    pub fn display_name(&self, name: &ProviderName) -> String {
        self.providers
            .get(name)
            .map_or_else(|| name.to_string(), |p| p.display_name.clone())
    }

    /// Registered provider names in order
    pub fn names(&self) -> impl Iterator<Item = &ProviderName> {
        self.providers.keys()
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
