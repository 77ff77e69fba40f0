//! Base OAuth2 provider implementation with shared logic
//!
//! `BaseOAuthProvider` holds everything the concrete providers share: the
//! `oauth2` client used to build authorization URLs, the HTTP client used for
//! code redemption and profile lookups, and the provider-fixed query and form
//! parameters.
//!
//! Code redemption posts the form directly instead of going through
//! `oauth2`'s token request, because some providers (Azure AD v1) return
//! `expires_in` as a string or only send `expires_on`, which the strict
//! standard token response rejects.

use chrono::{DateTime, Utc};
use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope, TokenUrl,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::linking::{generate_correlation_token, RedeemedToken};
use crate::oauth2::types::{AuthorizationUrl, ConfiguredClient, OAuthError};

/// Query parameters owned by the protocol; callers cannot set them
const RESERVED_PARAMS: &[&str] = &["response_type", "client_id", "redirect_uri", "state", "scope"];

/// Endpoints of an OAuth2 provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// Authorization endpoint
    pub auth_url: String,
    /// Token endpoint
    pub token_url: String,
    /// Profile endpoint, if the provider has one
    pub profile_url: Option<String>,
}

/// Client credentials and callback for one provider registration
#[derive(Clone)]
pub struct ClientRegistration {
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Callback URL registered with the provider
    pub redirect_uri: String,
}

impl std::fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Base OAuth2 provider containing shared logic for all providers
pub struct BaseOAuthProvider {
    /// Configured OAuth2 client
    client: ConfiguredClient,
    /// Reusable HTTP client with the provider timeout applied
    http_client: reqwest::Client,
    registration: ClientRegistration,
    token_url: String,
    profile_url: Option<String>,
    scopes: Vec<String>,
    /// Query parameters that win over caller extras
    authorization_params: BTreeMap<String, String>,
    /// Extra form fields sent with code redemption
    token_params: BTreeMap<String, String>,
}

impl BaseOAuthProvider {
    /// Create a new base OAuth2 provider
    ///
    /// `timeout` bounds every outbound request; exceeding it surfaces as
    /// [`OAuthError::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns error if any URL is invalid or the HTTP client cannot be built
    pub fn new(
        endpoints: &ProviderEndpoints,
        registration: ClientRegistration,
        timeout: Duration,
    ) -> Result<Self, OAuthError> {
        if registration.client_id.is_empty() {
            return Err(OAuthError::InvalidConfig("client_id is empty".to_string()));
        }

        // oauth2 5.0 API: BasicClient::new() only takes ClientId
        let client = BasicClient::new(ClientId::new(registration.client_id.clone()))
            .set_client_secret(ClientSecret::new(registration.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(endpoints.auth_url.clone())
                    .map_err(|e| OAuthError::InvalidConfig(format!("Invalid auth URL: {e}")))?,
            )
            .set_token_uri(
                TokenUrl::new(endpoints.token_url.clone())
                    .map_err(|e| OAuthError::InvalidConfig(format!("Invalid token URL: {e}")))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(registration.redirect_uri.clone())
                    .map_err(|e| OAuthError::InvalidConfig(format!("Invalid redirect URI: {e}")))?,
            );

        // Token endpoints must not redirect the code elsewhere
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OAuthError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            http_client,
            registration,
            token_url: endpoints.token_url.clone(),
            profile_url: endpoints.profile_url.clone(),
            scopes: Vec::new(),
            authorization_params: BTreeMap::new(),
            token_params: BTreeMap::new(),
        })
    }

    /// Build from provider configuration over per-kind default endpoints
    ///
    /// Endpoint overrides, scopes and fixed authorization parameters in
    /// `config` are applied on top of `defaults`.
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn from_config(
        defaults: ProviderEndpoints,
        config: &ProviderConfig,
        redirect_uri: String,
        timeout: Duration,
    ) -> Result<Self, OAuthError> {
        let endpoints = ProviderEndpoints {
            auth_url: config.auth_url.clone().unwrap_or(defaults.auth_url),
            token_url: config.token_url.clone().unwrap_or(defaults.token_url),
            profile_url: config.profile_url.clone().or(defaults.profile_url),
        };
        let registration = ClientRegistration {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri,
        };

        let mut provider = Self::new(&endpoints, registration, timeout)?
            .with_scopes(config.scopes.iter().cloned());
        for (name, value) in &config.authorization_params {
            provider = provider.with_authorization_param(name.clone(), value.clone());
        }
        Ok(provider)
    }

    /// Request these scopes on every authorization URL
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = String>) -> Self {
        self.scopes = scopes.into_iter().filter(|s| !s.is_empty()).collect();
        self
    }

    /// Fix a query parameter on every authorization URL
    ///
    /// Protocol parameters are ignored.
    #[must_use]
    pub fn with_authorization_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !RESERVED_PARAMS.contains(&name.as_str()) {
            self.authorization_params.insert(name, value.into());
        }
        self
    }

    /// Send an extra form field with every code redemption
    #[must_use]
    pub fn with_token_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.token_params.insert(name.into(), value.into());
        self
    }

    /// Callback URL this provider redirects to
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.registration.redirect_uri
    }

    /// Generate an authorization URL with a fresh correlation token as `state`
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match the provider trait
    pub fn authorization_url(
        &self,
        extra_params: &[(String, String)],
    ) -> Result<AuthorizationUrl, OAuthError> {
        let correlation_token = generate_correlation_token();
        let state = correlation_token.clone();

        let mut auth_url_builder = self.client.authorize_url(move || CsrfToken::new(state));

        for scope in &self.scopes {
            auth_url_builder = auth_url_builder.add_scope(Scope::new(scope.clone()));
        }

        let mut params: BTreeMap<String, String> = extra_params
            .iter()
            .filter(|(name, _)| !RESERVED_PARAMS.contains(&name.as_str()))
            .cloned()
            .collect();
        params.extend(
            self.authorization_params
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        for (name, value) in params {
            auth_url_builder = auth_url_builder.add_extra_param(name, value);
        }

        let (auth_url, _state) = auth_url_builder.url();

        Ok(AuthorizationUrl {
            url: auth_url.to_string(),
            correlation_token,
        })
    }

    /// Exchange an authorization code for an access token
    ///
    /// # Errors
    ///
    /// Returns error if the request fails, times out, or the provider answers
    /// without an access token
    pub async fn redeem_code(&self, code: &str) -> Result<RedeemedToken, OAuthError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.registration.client_id.as_str()),
            ("client_secret", self.registration.client_secret.as_str()),
            ("redirect_uri", self.registration.redirect_uri.as_str()),
        ];
        form.extend(
            self.token_params
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );

        let response = self
            .http_client
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| OAuthError::from_reqwest(e, OAuthError::TokenExchangeFailed))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::from_reqwest(e, OAuthError::TokenExchangeFailed))?;

        parse_token_response(status, &body, Utc::now())
    }

    /// Fetch profile JSON from the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if no profile endpoint is configured, the HTTP request
    /// fails, or the response is not successful JSON
    pub async fn fetch_profile(&self, access_token: &str) -> Result<serde_json::Value, OAuthError> {
        let Some(profile_url) = &self.profile_url else {
            return Err(OAuthError::ProfileNotSupported);
        };

        let response = self
            .http_client
            .get(profile_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::from_reqwest(e, OAuthError::ProfileFailed))?;

        if !response.status().is_success() {
            return Err(OAuthError::ProfileFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OAuthError::from_reqwest(e, OAuthError::ProfileFailed))
    }
}

/// Number that some providers send as a JSON string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(i64),
    Text(String),
}

impl Lenient {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    expires_in: Option<Lenient>,
    expires_on: Option<Lenient>,
    error: Option<String>,
}

fn parse_token_response(
    status: reqwest::StatusCode,
    body: &str,
    now: DateTime<Utc>,
) -> Result<RedeemedToken, OAuthError> {
    let parsed: Option<TokenEndpointResponse> = serde_json::from_str(body).ok();

    if !status.is_success() {
        let error = parsed
            .and_then(|p| p.error)
            .unwrap_or_else(|| "no error code".to_string());
        return Err(OAuthError::TokenExchangeFailed(format!("HTTP {status}: {error}")));
    }

    let parsed = parsed.ok_or_else(|| {
        OAuthError::TokenExchangeFailed("Token response is not valid JSON".to_string())
    })?;

    if let Some(error) = parsed.error {
        return Err(OAuthError::TokenExchangeFailed(error));
    }

    let access_token = parsed
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            OAuthError::TokenExchangeFailed("Token response has no access_token".to_string())
        })?;

    let expires_at = parsed
        .expires_in
        .and_then(|v| v.as_i64())
        .and_then(|secs| now.checked_add_signed(chrono::Duration::seconds(secs)))
        .or_else(|| {
            parsed
                .expires_on
                .and_then(|v| v.as_i64())
                .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        });

    Ok(RedeemedToken::new(access_token, expires_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2::url::Url;
    use reqwest::StatusCode;

    fn registration() -> ClientRegistration {
        ClientRegistration {
            client_id: "client-123".to_string(),
            client_secret: "shh".to_string(),
            redirect_uri: "http://localhost:3978/auth/example/callback".to_string(),
        }
    }

    fn endpoints() -> ProviderEndpoints {
        ProviderEndpoints {
            auth_url: "https://idp.example/authorize".to_string(),
            token_url: "https://idp.example/token".to_string(),
            profile_url: None,
        }
    }

    fn query(url: &str) -> BTreeMap<String, String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_authorization_url_carries_state_and_client() {
        let provider =
            BaseOAuthProvider::new(&endpoints(), registration(), Duration::from_secs(5)).unwrap();

        let auth = provider.authorization_url(&[]).unwrap();
        let params = query(&auth.url);

        assert!(auth.url.starts_with("https://idp.example/authorize?"));
        assert_eq!(params["state"], auth.correlation_token);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "http://localhost:3978/auth/example/callback");
        assert!(!params.contains_key("scope"));
    }

    #[test]
    fn test_each_url_gets_fresh_state() {
        let provider =
            BaseOAuthProvider::new(&endpoints(), registration(), Duration::from_secs(5)).unwrap();

        let first = provider.authorization_url(&[]).unwrap();
        let second = provider.authorization_url(&[]).unwrap();
        assert_ne!(first.correlation_token, second.correlation_token);
    }

    #[test]
    fn test_fixed_params_win_over_extras() {
        let provider = BaseOAuthProvider::new(&endpoints(), registration(), Duration::from_secs(5))
            .unwrap()
            .with_authorization_param("response_mode", "query")
            .with_scopes(vec!["openid".to_string(), "profile".to_string()]);

        let extras = vec![
            ("response_mode".to_string(), "form_post".to_string()),
            ("login_hint".to_string(), "ada@example.com".to_string()),
            ("state".to_string(), "attacker".to_string()),
            ("client_id".to_string(), "other".to_string()),
        ];
        let auth = provider.authorization_url(&extras).unwrap();
        let params = query(&auth.url);

        assert_eq!(params["response_mode"], "query");
        assert_eq!(params["login_hint"], "ada@example.com");
        assert_eq!(params["state"], auth.correlation_token);
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["scope"], "openid profile");
    }

    #[test]
    fn test_reserved_fixed_params_are_ignored() {
        let provider = BaseOAuthProvider::new(&endpoints(), registration(), Duration::from_secs(5))
            .unwrap()
            .with_authorization_param("state", "fixed");

        let auth = provider.authorization_url(&[]).unwrap();
        assert_eq!(query(&auth.url)["state"], auth.correlation_token);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = endpoints();
        bad.auth_url = "not a url".to_string();
        assert!(matches!(
            BaseOAuthProvider::new(&bad, registration(), Duration::from_secs(5)),
            Err(OAuthError::InvalidConfig(_))
        ));

        let mut no_client = registration();
        no_client.client_id = String::new();
        assert!(matches!(
            BaseOAuthProvider::new(&endpoints(), no_client, Duration::from_secs(5)),
            Err(OAuthError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_registration_debug_redacts_secret() {
        assert!(!format!("{:?}", registration()).contains("shh"));
    }

    #[test]
    fn test_parse_numeric_expires_in() {
        let now = Utc::now();
        let token = parse_token_response(
            StatusCode::OK,
            r#"{"access_token":"at","expires_in":3600}"#,
            now,
        )
        .unwrap();
        assert_eq!(token.expires_at, Some(now + chrono::Duration::seconds(3600)));
    }

    #[test]
    fn test_parse_string_expires_in_and_expires_on() {
        let now = Utc::now();
        let token = parse_token_response(
            StatusCode::OK,
            r#"{"access_token":"at","expires_in":"3599","expires_on":"1700000000"}"#,
            now,
        )
        .unwrap();
        assert_eq!(token.expires_at, Some(now + chrono::Duration::seconds(3599)));

        let token = parse_token_response(
            StatusCode::OK,
            r#"{"access_token":"at","expires_on":"1700000000"}"#,
            now,
        )
        .unwrap();
        assert_eq!(token.expires_at, DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn test_parse_failures() {
        let now = Utc::now();

        let err = parse_token_response(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"code reused"}"#,
            now,
        )
        .unwrap_err();
        assert_eq!(
            err,
            OAuthError::TokenExchangeFailed("HTTP 400 Bad Request: invalid_grant".to_string())
        );

        assert!(parse_token_response(StatusCode::OK, "<html>", now).is_err());
        assert!(parse_token_response(StatusCode::OK, r#"{"expires_in":10}"#, now).is_err());
        assert!(parse_token_response(StatusCode::OK, r#"{"error":"denied"}"#, now).is_err());
    }

    #[tokio::test]
    async fn test_profile_requires_endpoint() {
        let provider =
            BaseOAuthProvider::new(&endpoints(), registration(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            provider.fetch_profile("at").await,
            Err(OAuthError::ProfileNotSupported)
        );
    }

    #[tokio::test]
    async fn test_redeem_posts_form_and_times_out() {
        use axum::{routing::post, Form, Json, Router};

        async fn token(Form(form): Form<BTreeMap<String, String>>) -> Json<serde_json::Value> {
            if form.get("code").map(String::as_str) == Some("slow") {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            assert_eq!(form["grant_type"], "authorization_code");
            assert_eq!(form["client_secret"], "shh");
            assert_eq!(form["resource"], "https://graph.example");
            Json(serde_json::json!({ "access_token": "at-1", "expires_in": "60" }))
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/token", post(token)))
                .await
                .unwrap();
        });

        let endpoints = ProviderEndpoints {
            auth_url: format!("http://{addr}/authorize"),
            token_url: format!("http://{addr}/token"),
            profile_url: None,
        };
        let provider = BaseOAuthProvider::new(&endpoints, registration(), Duration::from_millis(200))
            .unwrap()
            .with_token_param("resource", "https://graph.example");

        let token = provider.redeem_code("good").await.unwrap();
        assert!(token.expires_at.is_some());

        assert_eq!(provider.redeem_code("slow").await, Err(OAuthError::Timeout));
    }
}
