//! LinkedIn OAuth2 provider

use async_trait::async_trait;
use std::time::Duration;

use super::base::{BaseOAuthProvider, ProviderEndpoints};
use crate::config::ProviderConfig;
use crate::linking::RedeemedToken;
use crate::oauth2::types::{AuthorizationUrl, OAuth2Provider, OAuthError};

/// Authorization endpoint
pub const AUTHORIZATION_URL: &str = "https://www.linkedin.com/oauth/v2/authorization";
/// Token endpoint
pub const TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
/// OpenID Connect userinfo endpoint
pub const PROFILE_URL: &str = "https://api.linkedin.com/v2/userinfo";
/// Default display name
pub const DISPLAY_NAME: &str = "LinkedIn";

/// LinkedIn OAuth2 provider
///
/// Scopes are optional; when none are configured the app's default scopes apply.
pub struct LinkedInProvider {
    base: BaseOAuthProvider,
}

impl LinkedInProvider {
    /// Create a new LinkedIn provider
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

        Ok(Self {
            base: BaseOAuthProvider::from_config(defaults, config, redirect_uri, timeout)?,
        })
    }
}

#[async_trait]
impl OAuth2Provider for LinkedInProvider {
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
