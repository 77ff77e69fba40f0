//! Linking state machine
//!
//! [`LinkingService`] sequences the four steps of a link: handing out an
//! authorization URL, completing the provider callback, verifying the
//! challenge code and signing out. Per-key state lives in the
//! [`LinkStateAgent`](crate::agents::LinkStateAgent); correlation entries live
//! in a [`CorrelationStore`].
//!
//! Redemption and correlation failures are terminal for the attempt. Nothing
//! here retries a provider call.

use acton_reactive::prelude::{AgentHandle, AgentHandleInterface, AgentRuntime};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use super::address::{ConversationAddress, ConversationId, LinkKey, ProviderName};
use super::challenge::ChallengeCode;
use super::store::{CorrelationEntry, CorrelationStore};
use super::token::{PendingToken, VerifiedToken};
use super::LinkStatus;
use crate::agents::{
    await_reply, AbandonAuthorization, CheckOutstanding, GetLinkStatus, IssueChallenge,
    LinkStateAgent, MatchPendingChallenge, PendingProviders, ReserveOutcome, ReserveSignIn,
    SignOut, SignOutOutcome, VerifiedAccess, VerifyChallenge,
};
use crate::config::LinkingSettings;
use crate::error::{CallbackFailure, LinkError};
use crate::oauth2::{AuthorizationUrl, ProviderRegistry, RegisteredProvider};

const LINK_STATE: &str = "link_state";

/// Outcome of asking to sign in
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignInStart {
    /// The user should open this URL
    AuthorizationRequired(AuthorizationUrl),
    /// A redeemed token is waiting for its challenge code
    AlreadyPending,
    /// The conversation is already linked
    AlreadyVerified,
}

/// Query parameters of a provider callback
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthorizationCallback {
    /// Correlation token echoed by the provider
    pub state: Option<String>,
    /// Authorization code
    pub code: Option<String>,
    /// OAuth error code when the user or provider declined
    pub error: Option<String>,
    /// Human-readable error detail from the provider
    pub error_description: Option<String>,
}

/// A challenge issued by a completed callback
#[derive(Clone, Debug)]
pub struct IssuedChallenge {
    /// Conversation the sign-in belongs to
    pub conversation_address: ConversationAddress,
    /// Provider that was signed in to
    pub provider: ProviderName,
    /// Provider name shown to users
    pub provider_display_name: String,
    /// Code the user must present in the conversation
    pub challenge: ChallengeCode,
    /// When the code stops being accepted
    pub challenge_expires_at: DateTime<Utc>,
}

/// The linking state machine
#[derive(Clone)]
pub struct LinkingService {
    providers: ProviderRegistry,
    store: Arc<dyn CorrelationStore>,
    link_state: AgentHandle,
    settings: LinkingSettings,
}

impl LinkingService {
    /// Wrap a running link state agent
    #[must_use]
    pub fn new(
        providers: ProviderRegistry,
        store: Arc<dyn CorrelationStore>,
        link_state: AgentHandle,
        settings: LinkingSettings,
    ) -> Self {
        Self {
            providers,
            store,
            link_state,
            settings,
        }
    }

    /// Spawn a link state agent and wrap it
    ///
    /// # Errors
    ///
    /// Returns error if the agent cannot be spawned
    pub async fn spawn(
        runtime: &mut AgentRuntime,
        providers: ProviderRegistry,
        store: Arc<dyn CorrelationStore>,
        settings: LinkingSettings,
    ) -> anyhow::Result<Self> {
        let link_state = LinkStateAgent::spawn(runtime, settings.max_challenge_attempts).await?;
        Ok(Self::new(providers, store, link_state, settings))
    }

    /// Configured providers
    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Link state agent handle
    #[must_use]
    pub const fn link_state(&self) -> &AgentHandle {
        &self.link_state
    }

    fn provider(&self, name: &ProviderName) -> Result<&RegisteredProvider, LinkError> {
        self.providers
            .get(name)
            .ok_or_else(|| LinkError::UnknownProvider(name.to_string()))
    }

    /// Start a sign-in for a conversation
    ///
    /// Returns [`SignInStart::AlreadyPending`] or [`SignInStart::AlreadyVerified`]
    /// without creating a correlation entry if a token exists. Otherwise stores
    /// a fresh correlation entry and returns its authorization URL; an older
    /// outstanding URL for the same provider stops working.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownProvider`] or [`LinkError::Unavailable`]
    pub async fn begin_sign_in(
        &self,
        address: &ConversationAddress,
        provider: &ProviderName,
        extra_params: &[(String, String)],
    ) -> Result<SignInStart, LinkError> {
        let registered = self.provider(provider)?;
        let key = LinkKey::new(address.conversation_id(), provider.clone());

        let authorization = registered
            .adapter
            .authorization_url(extra_params)
            .map_err(|e| {
                tracing::error!(provider = %provider, error = %e, "Failed to build authorization URL");
                LinkError::Unavailable(e.to_string())
            })?;

        let ttl = self.settings.correlation_ttl();
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| LinkError::Unavailable("correlation TTL out of range".to_string()))?;

        let (request, rx) = ReserveSignIn::new(
            key.clone(),
            authorization.correlation_token.clone(),
            expires_at,
            now,
        );
        self.link_state.send(request).await;

        let superseded = match await_reply(rx, LINK_STATE).await? {
            ReserveOutcome::AlreadyPending => {
                tracing::debug!(link = %key, "Sign-in requested while verification pending");
                return Ok(SignInStart::AlreadyPending);
            }
            ReserveOutcome::AlreadyVerified => {
                tracing::debug!(link = %key, "Sign-in requested while already linked");
                return Ok(SignInStart::AlreadyVerified);
            }
            ReserveOutcome::Reserved { superseded } => superseded,
        };

        let entry = CorrelationEntry::new(
            authorization.correlation_token.clone(),
            address.clone(),
            provider.clone(),
        );
        if let Err(e) = self.store.put(entry, ttl).await {
            tracing::error!(
                link = %key,
                correlation_token = %authorization.correlation_token,
                error = %e,
                "Failed to store correlation entry"
            );
            self.link_state
                .send(AbandonAuthorization::new(
                    key,
                    authorization.correlation_token.clone(),
                ))
                .await;
            return Err(LinkError::Unavailable(e.to_string()));
        }

        if let Some(previous) = superseded {
            self.delete_correlation(&previous).await;
        }

        tracing::info!(
            provider = %provider,
            conversation_id = %key.conversation_id,
            correlation_token = %authorization.correlation_token,
            "Issued authorization URL"
        );
        Ok(SignInStart::AuthorizationRequired(authorization))
    }

    /// Complete the provider callback for `route_provider`
    ///
    /// Consumes the correlation entry named by `state` before anything else,
    /// so a duplicate delivery of the same callback fails with
    /// [`LinkError::CorrelationNotFound`]. On success the redeemed token is
    /// stored unverified behind a fresh challenge code.
    ///
    /// With a durable store, an entry that this instance holds no record for
    /// (another instance issued it, or this one restarted) is accepted; the
    /// store alone then decides whether the authorization is still live.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::CorrelationNotFound`], [`LinkError::AuthorizationDenied`],
    /// [`LinkError::RedemptionFailed`], [`LinkError::UnknownProvider`] or
    /// [`LinkError::Unavailable`]. Once the entry has been consumed the failure
    /// carries the conversation address.
    pub async fn complete_authorization_callback(
        &self,
        route_provider: &ProviderName,
        callback: &AuthorizationCallback,
    ) -> Result<IssuedChallenge, CallbackFailure> {
        let registered = self.provider(route_provider)?;

        let Some(state) = callback.state.as_deref().filter(|s| !s.is_empty()) else {
            tracing::warn!(provider = %route_provider, "Callback without state");
            return Err(LinkError::CorrelationNotFound.into());
        };

        let entry = self
            .store
            .take(state)
            .await
            .map_err(|e| {
                tracing::error!(provider = %route_provider, correlation_token = %state, error = %e, "Correlation lookup failed");
                LinkError::Unavailable(e.to_string())
            })?
            .ok_or_else(|| {
                tracing::warn!(
                    provider = %route_provider,
                    correlation_token = %state,
                    "Unknown, consumed or expired correlation token"
                );
                LinkError::CorrelationNotFound
            })?;

        let address = entry.conversation_address.clone();
        self.redeem_for_entry(registered, route_provider, callback, state, entry)
            .await
            .map_err(|error| CallbackFailure::for_conversation(address, error))
    }

    #[allow(clippy::too_many_lines)]
    async fn redeem_for_entry(
        &self,
        registered: &RegisteredProvider,
        route_provider: &ProviderName,
        callback: &AuthorizationCallback,
        state: &str,
        entry: CorrelationEntry,
    ) -> Result<IssuedChallenge, LinkError> {
        let key = LinkKey::new(
            entry.conversation_address.conversation_id(),
            entry.provider.clone(),
        );

        if entry.correlation_token != state || entry.provider != *route_provider {
            tracing::warn!(
                provider = %route_provider,
                expected_provider = %entry.provider,
                correlation_token = %state,
                "Callback does not match its correlation entry"
            );
            self.abandon(&key, state).await;
            return Err(LinkError::CorrelationNotFound);
        }

        let code = match (&callback.error, callback.code.as_deref()) {
            (None, Some(code)) if !code.is_empty() => code,
            (error, _) => {
                let reason = error.clone().unwrap_or_else(|| "missing code".to_string());
                tracing::warn!(
                    provider = %route_provider,
                    conversation_id = %key.conversation_id,
                    correlation_token = %state,
                    reason = %reason,
                    description = callback.error_description.as_deref().unwrap_or(""),
                    "Authorization denied"
                );
                self.abandon(&key, state).await;
                return Err(LinkError::AuthorizationDenied(reason));
            }
        };

        let accept_unrecorded = self.store.is_durable();
        let (request, rx) =
            CheckOutstanding::new(key.clone(), state.to_string(), accept_unrecorded, Utc::now());
        self.link_state.send(request).await;
        if !await_reply(rx, LINK_STATE).await? {
            tracing::warn!(
                provider = %route_provider,
                conversation_id = %key.conversation_id,
                correlation_token = %state,
                "Authorization superseded or signed out before callback"
            );
            return Err(LinkError::CorrelationNotFound);
        }

        let redeemed = match registered.adapter.redeem_code(code).await {
            Ok(redeemed) => redeemed,
            Err(e) => {
                tracing::error!(
                    provider = %route_provider,
                    conversation_id = %key.conversation_id,
                    correlation_token = %state,
                    error = %e,
                    "Code redemption failed"
                );
                self.abandon(&key, state).await;
                return Err(LinkError::RedemptionFailed(e.to_string()));
            }
        };

        let now = Utc::now();
        let challenge = ChallengeCode::generate();
        let challenge_expires_at = chrono::Duration::from_std(self.settings.challenge_ttl())
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| LinkError::Unavailable("challenge TTL out of range".to_string()))?;

        let pending = PendingToken::new(redeemed, challenge.clone(), challenge_expires_at);
        let (request, rx) =
            IssueChallenge::new(key.clone(), state.to_string(), pending, accept_unrecorded, now);
        self.link_state.send(request).await;
        if !await_reply(rx, LINK_STATE).await? {
            tracing::warn!(
                provider = %route_provider,
                conversation_id = %key.conversation_id,
                correlation_token = %state,
                "Authorization superseded during redemption, token dropped"
            );
            return Err(LinkError::CorrelationNotFound);
        }

        tracing::info!(
            provider = %route_provider,
            conversation_id = %key.conversation_id,
            correlation_token = %state,
            challenge_expires_at = %challenge_expires_at,
            "Authorization completed, challenge issued"
        );

        Ok(IssuedChallenge {
            conversation_address: entry.conversation_address,
            provider: entry.provider,
            provider_display_name: registered.display_name.clone(),
            challenge,
            challenge_expires_at,
        })
    }

    /// Present a challenge code
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotLinked`] without a pending token,
    /// [`LinkError::AlreadyLinked`] for a verified one,
    /// [`LinkError::ChallengeMismatch`], [`LinkError::TooManyAttempts`] or
    /// [`LinkError::ChallengeExpired`]
    pub async fn verify(
        &self,
        conversation_id: &ConversationId,
        provider: &ProviderName,
        presented_code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, LinkError> {
        let key = LinkKey::new(conversation_id.clone(), provider.clone());
        let (request, rx) = VerifyChallenge::new(key.clone(), presented_code.to_string(), now);
        self.link_state.send(request).await;

        let result = await_reply(rx, LINK_STATE).await?;
        if let Err(e) = &result {
            tracing::info!(
                provider = %provider,
                conversation_id = %conversation_id,
                error = %e,
                "Challenge verification failed"
            );
        }
        result
    }

    /// Clear any pending or verified token; idempotent
    ///
    /// Also invalidates an outstanding sign-in URL.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] if the link state agent is gone
    pub async fn sign_out(
        &self,
        conversation_id: &ConversationId,
        provider: &ProviderName,
    ) -> Result<SignOutOutcome, LinkError> {
        let key = LinkKey::new(conversation_id.clone(), provider.clone());
        let (request, rx) = SignOut::new(key);
        self.link_state.send(request).await;

        let outcome = await_reply(rx, LINK_STATE).await?;
        if let Some(abandoned) = &outcome.abandoned {
            self.delete_correlation(abandoned).await;
        }
        Ok(outcome)
    }

    /// Verified token for resource calls, if any
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] if the link state agent is gone
    pub async fn verified_token(
        &self,
        conversation_id: &ConversationId,
        provider: &ProviderName,
    ) -> Result<Option<VerifiedToken>, LinkError> {
        let key = LinkKey::new(conversation_id.clone(), provider.clone());
        let (request, rx) = VerifiedAccess::new(key, Utc::now());
        self.link_state.send(request).await;
        await_reply(rx, LINK_STATE).await
    }

    /// Fetch the linked user's profile
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotLinked`] without a verified token, or
    /// [`LinkError::ProfileUnavailable`] if the provider call fails
    pub async fn fetch_profile(
        &self,
        conversation_id: &ConversationId,
        provider: &ProviderName,
    ) -> Result<serde_json::Value, LinkError> {
        let registered = self.provider(provider)?;
        let token = self
            .verified_token(conversation_id, provider)
            .await?
            .ok_or(LinkError::NotLinked)?;

        registered
            .adapter
            .fetch_profile(token.access_token())
            .await
            .map_err(|e| {
                tracing::warn!(
                    provider = %provider,
                    conversation_id = %conversation_id,
                    error = %e,
                    "Profile lookup failed"
                );
                LinkError::ProfileUnavailable(e.to_string())
            })
    }

    /// Lifecycle state of a link
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] if the link state agent is gone
    pub async fn status(
        &self,
        conversation_id: &ConversationId,
        provider: &ProviderName,
    ) -> Result<LinkStatus, LinkError> {
        let key = LinkKey::new(conversation_id.clone(), provider.clone());
        let (request, rx) = GetLinkStatus::new(key, Utc::now());
        self.link_state.send(request).await;
        await_reply(rx, LINK_STATE).await
    }

    /// Providers waiting for a challenge code in a conversation
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] if the link state agent is gone
    pub async fn pending_providers(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ProviderName>, LinkError> {
        let (request, rx) = PendingProviders::new(conversation_id.clone(), Utc::now());
        self.link_state.send(request).await;
        await_reply(rx, LINK_STATE).await
    }

    /// Pending provider whose challenge equals `code`, without counting an attempt
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] if the link state agent is gone
    pub async fn match_pending_challenge(
        &self,
        conversation_id: &ConversationId,
        code: &str,
    ) -> Result<Option<ProviderName>, LinkError> {
        let (request, rx) =
            MatchPendingChallenge::new(conversation_id.clone(), code.to_string(), Utc::now());
        self.link_state.send(request).await;
        await_reply(rx, LINK_STATE).await
    }

    async fn abandon(&self, key: &LinkKey, correlation_token: &str) {
        self.link_state
            .send(AbandonAuthorization::new(
                key.clone(),
                correlation_token.to_string(),
            ))
            .await;
    }

    async fn delete_correlation(&self, correlation_token: &str) {
        if let Err(e) = self.store.delete(correlation_token).await {
            tracing::warn!(
                correlation_token = %correlation_token,
                error = %e,
                "Failed to delete superseded correlation entry"
            );
        }
    }
}
