//! Provider with explicitly configured endpoints

use async_trait::async_trait;
use std::time::Duration;

use super::base::{BaseOAuthProvider, ProviderEndpoints};
use crate::config::ProviderConfig;
use crate::linking::RedeemedToken;
use crate::oauth2::types::{AuthorizationUrl, OAuth2Provider, OAuthError};

/// Any OAuth2 provider configured with `auth_url` and `token_url`
pub struct GenericProvider {
    base: BaseOAuthProvider,
}

impl GenericProvider {
    /// Create a provider from explicit endpoints
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::InvalidConfig`] if `auth_url` or `token_url` is
    /// missing or invalid
    pub fn new(
        config: &ProviderConfig,
        redirect_uri: String,
        timeout: Duration,
    ) -> Result<Self, OAuthError> {
        let auth_url = config
            .auth_url
            .clone()
            .ok_or_else(|| OAuthError::InvalidConfig("auth_url is required".to_string()))?;
        let token_url = config
            .token_url
            .clone()
            .ok_or_else(|| OAuthError::InvalidConfig("token_url is required".to_string()))?;

        let defaults = ProviderEndpoints {
            auth_url,
            token_url,
            profile_url: None,
        };

        Ok(Self {
            base: BaseOAuthProvider::from_config(defaults, config, redirect_uri, timeout)?,
        })
    }
}

#[async_trait]
impl OAuth2Provider for GenericProvider {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn test_endpoints_required() {
        let config = ProviderConfig::new(ProviderKind::Generic, "client", "secret");
        let result = GenericProvider::new(&config, "http://localhost/cb".to_string(), Duration::from_secs(1));
        assert!(matches!(result, Err(OAuthError::InvalidConfig(_))));
    }

    #[test]
    fn test_configured_params_are_fixed() {
        let mut config = ProviderConfig::new(ProviderKind::Generic, "client", "secret");
        config.auth_url = Some("https://idp.example/authorize".to_string());
        config.token_url = Some("https://idp.example/token".to_string());
        config
            .authorization_params
            .insert("prompt".to_string(), "consent".to_string());

        let provider =
            GenericProvider::new(&config, "http://localhost/cb".to_string(), Duration::from_secs(1))
                .unwrap();
        let extras = vec![("prompt".to_string(), "none".to_string())];
        let auth = provider.authorization_url(&extras).unwrap();

        assert!(auth.url.contains("prompt=consent"));
        assert!(!auth.url.contains("prompt=none"));
    }
}
