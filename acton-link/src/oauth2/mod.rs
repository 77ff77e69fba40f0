//! OAuth2 provider adapters
//!
//! A provider adapter builds authorization URLs carrying a fresh correlation
//! token as `state` and redeems authorization codes for access tokens. The
//! [`ProviderRegistry`] holds every configured adapter keyed by route name.

pub mod providers;
pub mod registry;
pub mod types;

pub use registry::{ProviderRegistry, RegisteredProvider};
pub use types::{AuthorizationUrl, ConfiguredClient, OAuth2Provider, OAuthError};

#[cfg(test)]
pub use types::MockOAuth2Provider;
