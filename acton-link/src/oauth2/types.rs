//! OAuth2 provider types

use async_trait::async_trait;
use oauth2::{basic::BasicClient, EndpointNotSet, EndpointSet};
use thiserror::Error;

use crate::linking::RedeemedToken;

/// Type alias for a configured `BasicClient` with auth and token URLs set
///
/// In oauth2 5.0, `BasicClient` uses typestate to track which endpoints are
/// configured:
/// - `EndpointSet` for `HasAuthUrl` - Authorization endpoint is configured
/// - `EndpointNotSet` for `HasDeviceAuthUrl` - Device flow not used
/// - `EndpointNotSet` for `HasIntrospectionUrl` - Token introspection not used
/// - `EndpointNotSet` for `HasRevocationUrl` - Token revocation not used
/// - `EndpointSet` for `HasTokenUrl` - Token exchange endpoint is configured
pub type ConfiguredClient = BasicClient<
    EndpointSet,    // HasAuthUrl
    EndpointNotSet, // HasDeviceAuthUrl
    EndpointNotSet, // HasIntrospectionUrl
    EndpointNotSet, // HasRevocationUrl
    EndpointSet,    // HasTokenUrl
>;

/// Authorization URL together with the correlation token embedded as `state`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationUrl {
    /// URL the user opens in a browser
    pub url: String,
    /// Fresh correlation token carried in the `state` parameter
    pub correlation_token: String,
}

/// Provider adapter errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    /// Provider configuration is unusable
    #[error("Invalid OAuth2 provider configuration: {0}")]
    InvalidConfig(String),

    /// Authorization code exchange failed
    #[error("Failed to exchange authorization code for token: {0}")]
    TokenExchangeFailed(String),

    /// Provider did not answer within the configured timeout
    #[error("OAuth2 provider request timed out")]
    Timeout,

    /// Profile request failed
    #[error("Failed to fetch user profile: {0}")]
    ProfileFailed(String),

    /// Provider has no profile endpoint configured
    #[error("Provider has no profile endpoint")]
    ProfileNotSupported,
}

impl OAuthError {
    pub(crate) fn from_reqwest(error: reqwest::Error, wrap: fn(String) -> Self) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            // Without the URL: some providers put credentials in query strings
            wrap(error.without_url().to_string())
        }
    }
}

/// Uniform interface to an OAuth2 identity provider
///
/// Each operation makes at most one outbound network call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuth2Provider: Send + Sync {
    /// Build an authorization URL with a fresh correlation token as `state`
    ///
    /// `extra_params` are added to the query string; parameters the provider
    /// fixes itself win over extras with the same name, and protocol parameters
    /// (`response_type`, `client_id`, `redirect_uri`, `state`) are never
    /// overridden.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built
    fn authorization_url(
        &self,
        extra_params: &[(String, String)],
    ) -> Result<AuthorizationUrl, OAuthError>;

    /// Exchange an authorization code for an access token
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::TokenExchangeFailed`] or [`OAuthError::Timeout`]
    async fn redeem_code(&self, code: &str) -> Result<RedeemedToken, OAuthError>;

    /// Fetch the signed-in user's profile as JSON
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::ProfileFailed`], [`OAuthError::Timeout`] or
    /// [`OAuthError::ProfileNotSupported`]
    async fn fetch_profile(&self, access_token: &str) -> Result<serde_json::Value, OAuthError>;
}
