//! Azure AD v1 OAuth2 provider
//!
//! Uses the v1 `common` endpoints with Microsoft Graph as the `resource`. The
//! v1 token endpoint reports `expires_in` and `expires_on` as strings, which
//! the base provider's lenient token parsing accepts.

use async_trait::async_trait;
use std::time::Duration;

use super::base::{BaseOAuthProvider, ProviderEndpoints};
use crate::config::ProviderConfig;
use crate::linking::RedeemedToken;
use crate::oauth2::types::{AuthorizationUrl, OAuth2Provider, OAuthError};

/// Authorization endpoint
pub const AUTHORIZATION_URL: &str = "https://login.microsoftonline.com/common/oauth2/authorize";
/// Token endpoint
pub const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/token";
/// Microsoft Graph profile endpoint
pub const PROFILE_URL: &str = "https://graph.microsoft.com/v1.0/me";
/// Resource requested for the access token
pub const GRAPH_RESOURCE: &str = "https://graph.microsoft.com";
/// Default display name
pub const DISPLAY_NAME: &str = "Azure AD";

/// Azure AD v1 OAuth2 provider
pub struct AzureAdProvider {
    base: BaseOAuthProvider,
}

impl AzureAdProvider {
    /// Create a new Azure AD v1 provider
    ///
    /// A `resource` entry in `authorization_params` replaces Microsoft Graph
    /// for both the authorization URL and code redemption.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(
        config: &ProviderConfig,
        redirect_uri: String,
        timeout: Duration,
    ) -> Result<Self, OAuthError> {
        let defaults = ProviderEndpoints {
            auth_url: AUTHORIZATION_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            profile_url: Some(PROFILE_URL.to_string()),
        };
        let resource = config
            .authorization_params
            .get("resource")
            .cloned()
            .unwrap_or_else(|| GRAPH_RESOURCE.to_string());

        let base = BaseOAuthProvider::from_config(defaults, config, redirect_uri, timeout)?
            .with_authorization_param("response_mode", "query")
            .with_authorization_param("resource", resource.clone())
            .with_token_param("resource", resource);

        Ok(Self { base })
    }
}

#[async_trait]
impl OAuth2Provider for AzureAdProvider {
    fn authorization_url(
        &self,
        extra_params: &[(String, String)],
    ) -> Result<AuthorizationUrl, OAuthError> {
        self.base.authorization_url(extra_params)
    }

    async fn redeem_code(&self, code: &str) -> Result<RedeemedToken, OAuthError> {
        self.base.redeem_code(code).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<serde_json::Value, OAuthError> {
        self.base.fetch_profile(access_token).await
    }
}
