//! Link State Agent
//!
//! Owns one [`LinkRecord`] per (conversation, provider). All transitions of the
//! linking state machine run inside this agent's mailbox, so challenge issuance,
//! verification and sign-out for the same key never interleave.
//!
//! A record holds at most one outstanding authorization (the correlation token
//! of the newest sign-in URL) and at most one token, pending or verified.
//! Issuing a challenge is a compare-and-set on the outstanding authorization:
//! a callback for a superseded or signed-out request cannot install a token.

use crate::agents::default_agent_config;
use crate::agents::request_reply::{create_request_reply, send_response, ResponseChannel};
use crate::error::LinkError;
use crate::linking::{
    ChallengeOutcome, ConversationId, LinkKey, LinkStatus, PendingToken, ProviderName,
    VerifiedToken,
};
use acton_reactive::prelude::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type LinkStateAgentBuilder = ManagedAgent<Idle, LinkStateAgent>;

/// Default number of wrong codes before a pending token is discarded
pub const DEFAULT_MAX_CHALLENGE_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug)]
struct OutstandingAuthorization {
    correlation_token: String,
    expires_at: DateTime<Utc>,
}

/// Link record for one (conversation, provider)
#[derive(Clone, Debug, Default)]
pub struct LinkRecord {
    outstanding: Option<OutstandingAuthorization>,
    token: Option<PendingToken>,
}

impl LinkRecord {
    fn is_empty(&self) -> bool {
        self.outstanding.is_none() && self.token.is_none()
    }

    fn outstanding_matches(&self, correlation_token: &str, now: DateTime<Utc>) -> bool {
        self.outstanding
            .as_ref()
            .is_some_and(|o| o.correlation_token == correlation_token && now < o.expires_at)
    }

    /// Drop a token that can no longer be used
    fn discard_stale_token(&mut self, now: DateTime<Utc>) {
        let stale = self.token.as_ref().is_some_and(|token| {
            token.is_challenge_expired(now) || (token.is_verified() && token.is_access_expired(now))
        });
        if stale {
            self.token = None;
        }
    }
}

/// Link state agent model
#[derive(Debug, Clone)]
pub struct LinkStateAgent {
    records: HashMap<LinkKey, LinkRecord>,
    max_challenge_attempts: u32,
}

impl Default for LinkStateAgent {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            max_challenge_attempts: DEFAULT_MAX_CHALLENGE_ATTEMPTS,
        }
    }
}

/// Result of asking to start a sign-in
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Sign-in may proceed; `superseded` is the previous outstanding
    /// correlation token, whose entry should be deleted
    Reserved {
        /// Correlation token of the sign-in this one replaces
        superseded: Option<String>,
    },
    /// A token is waiting for its challenge code
    AlreadyPending,
    /// A verified token exists
    AlreadyVerified,
}

/// Result of signing out
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignOutOutcome {
    /// A pending or verified token was removed
    pub signed_out: bool,
    /// Correlation token of an abandoned sign-in, whose entry should be deleted
    pub abandoned: Option<String>,
}

// ============================================================================
// Messages
// ============================================================================

/// Reserve a (conversation, provider) for a new sign-in
#[derive(Clone, Debug)]
pub struct ReserveSignIn {
    /// Link being started
    pub key: LinkKey,
    /// Correlation token of the new authorization URL
    pub correlation_token: String,
    /// When the correlation entry lapses
    pub expires_at: DateTime<Utc>,
    /// Current time
    pub now: DateTime<Utc>,
    /// Response channel
    pub response_tx: ResponseChannel<ReserveOutcome>,
}

impl ReserveSignIn {
    /// Create a new reservation request
    #[must_use]
    pub fn new(
        key: LinkKey,
        correlation_token: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<ReserveOutcome>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            key,
            correlation_token,
            expires_at,
            now,
            response_tx,
        };
        (request, rx)
    }
}

/// Ask whether a correlation token is the outstanding authorization for a key
#[derive(Clone, Debug)]
pub struct CheckOutstanding {
    /// Link being completed
    pub key: LinkKey,
    /// Correlation token presented by the callback
    pub correlation_token: String,
    /// Accept a token this agent never recorded (durable correlation store)
    pub accept_unrecorded: bool,
    /// Current time
    pub now: DateTime<Utc>,
    /// Response channel
    pub response_tx: ResponseChannel<bool>,
}

impl CheckOutstanding {
    /// Create a new check request
    #[must_use]
    pub fn new(
        key: LinkKey,
        correlation_token: String,
        accept_unrecorded: bool,
        now: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            key,
            correlation_token,
            accept_unrecorded,
            now,
            response_tx,
        };
        (request, rx)
    }
}

/// Install a pending token if `correlation_token` is still outstanding
#[derive(Clone, Debug)]
pub struct IssueChallenge {
    /// Link being completed
    pub key: LinkKey,
    /// Correlation token the token was redeemed for
    pub correlation_token: String,
    /// Redeemed, unverified token with its challenge
    pub token: PendingToken,
    /// Accept a token this agent never recorded (durable correlation store)
    pub accept_unrecorded: bool,
    /// Current time
    pub now: DateTime<Utc>,
    /// Response channel; `false` if the authorization was superseded
    pub response_tx: ResponseChannel<bool>,
}

impl IssueChallenge {
    /// Create a new issue request
    #[must_use]
    pub fn new(
        key: LinkKey,
        correlation_token: String,
        token: PendingToken,
        accept_unrecorded: bool,
        now: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            key,
            correlation_token,
            token,
            accept_unrecorded,
            now,
            response_tx,
        };
        (request, rx)
    }
}

/// Forget an outstanding authorization that failed (fire-and-forget)
#[derive(Clone, Debug)]
pub struct AbandonAuthorization {
    /// Link whose authorization failed
    pub key: LinkKey,
    /// Correlation token of the failed authorization
    pub correlation_token: String,
}

impl AbandonAuthorization {
    /// Create a new abandon request
    #[must_use]
    pub const fn new(key: LinkKey, correlation_token: String) -> Self {
        Self {
            key,
            correlation_token,
        }
    }
}

/// Present a challenge code for a key
#[derive(Clone, Debug)]
pub struct VerifyChallenge {
    /// Link being verified
    pub key: LinkKey,
    /// Code presented by the user
    pub code: String,
    /// Time of presentation
    pub now: DateTime<Utc>,
    /// Response channel
    pub response_tx: ResponseChannel<Result<VerifiedToken, LinkError>>,
}

impl VerifyChallenge {
    /// Create a new verify request
    #[must_use]
    pub fn new(
        key: LinkKey,
        code: String,
        now: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<Result<VerifiedToken, LinkError>>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            key,
            code,
            now,
            response_tx,
        };
        (request, rx)
    }
}

/// Clear every token and outstanding authorization for a key
#[derive(Clone, Debug)]
pub struct SignOut {
    /// Link being cleared
    pub key: LinkKey,
    /// Response channel
    pub response_tx: ResponseChannel<SignOutOutcome>,
}

impl SignOut {
    /// Create a new sign-out request
    #[must_use]
    pub fn new(key: LinkKey) -> (Self, oneshot::Receiver<SignOutOutcome>) {
        let (response_tx, rx) = create_request_reply();
        (Self { key, response_tx }, rx)
    }
}

/// Read the lifecycle state of a key
#[derive(Clone, Debug)]
pub struct GetLinkStatus {
    /// Link to inspect
    pub key: LinkKey,
    /// Current time
    pub now: DateTime<Utc>,
    /// Response channel
    pub response_tx: ResponseChannel<LinkStatus>,
}

impl GetLinkStatus {
    /// Create a new status request
    #[must_use]
    pub fn new(key: LinkKey, now: DateTime<Utc>) -> (Self, oneshot::Receiver<LinkStatus>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            key,
            now,
            response_tx,
        };
        (request, rx)
    }
}

/// Fetch the verified token for a key, if any
#[derive(Clone, Debug)]
pub struct VerifiedAccess {
    /// Link to read
    pub key: LinkKey,
    /// Current time
    pub now: DateTime<Utc>,
    /// Response channel
    pub response_tx: ResponseChannel<Option<VerifiedToken>>,
}

impl VerifiedAccess {
    /// Create a new access request
    #[must_use]
    pub fn new(key: LinkKey, now: DateTime<Utc>) -> (Self, oneshot::Receiver<Option<VerifiedToken>>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            key,
            now,
            response_tx,
        };
        (request, rx)
    }
}

/// List providers with a live, unverified token in a conversation
#[derive(Clone, Debug)]
pub struct PendingProviders {
    /// Conversation to inspect
    pub conversation_id: ConversationId,
    /// Current time
    pub now: DateTime<Utc>,
    /// Response channel, sorted by provider name
    pub response_tx: ResponseChannel<Vec<ProviderName>>,
}

impl PendingProviders {
    /// Create a new pending-providers request
    #[must_use]
    pub fn new(
        conversation_id: ConversationId,
        now: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<Vec<ProviderName>>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            conversation_id,
            now,
            response_tx,
        };
        (request, rx)
    }
}

/// Find the pending provider whose challenge equals a code
///
/// Read-only: no attempt is counted.
#[derive(Clone, Debug)]
pub struct MatchPendingChallenge {
    /// Conversation to inspect
    pub conversation_id: ConversationId,
    /// Code presented by the user
    pub code: String,
    /// Current time
    pub now: DateTime<Utc>,
    /// Response channel
    pub response_tx: ResponseChannel<Option<ProviderName>>,
}

impl MatchPendingChallenge {
    /// Create a new match request
    #[must_use]
    pub fn new(
        conversation_id: ConversationId,
        code: String,
        now: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<Option<ProviderName>>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            conversation_id,
            code,
            now,
            response_tx,
        };
        (request, rx)
    }
}

/// Discard expired challenges and lapsed authorizations
#[derive(Clone, Debug)]
pub struct CleanupExpired;

// ============================================================================
// Agent
// ============================================================================

impl LinkStateAgent {
    /// Spawn the link state agent
    ///
    /// # Errors
    ///
    /// Returns error if agent configuration or spawning fails
    pub async fn spawn(
        runtime: &mut AgentRuntime,
        max_challenge_attempts: u32,
    ) -> anyhow::Result<AgentHandle> {
        let config = default_agent_config("link_state")?;
        let mut builder = runtime.new_agent_with_config::<Self>(config).await;
        builder.model.max_challenge_attempts = max_challenge_attempts.max(1);
        Self::configure_handlers(builder).await
    }

    #[allow(clippy::too_many_lines)]
    async fn configure_handlers(mut builder: LinkStateAgentBuilder) -> anyhow::Result<AgentHandle> {
        builder
            .mutate_on::<ReserveSignIn>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let outcome = agent.model.reserve_sign_in(
                    &msg.key,
                    msg.correlation_token.clone(),
                    msg.expires_at,
                    msg.now,
                );

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, outcome).await;
                })
            })
            .mutate_on::<CheckOutstanding>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let outstanding = agent.model.is_outstanding(
                    &msg.key,
                    &msg.correlation_token,
                    msg.accept_unrecorded,
                    msg.now,
                );

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, outstanding).await;
                })
            })
            .mutate_on::<IssueChallenge>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let issued = agent.model.issue_challenge(
                    &msg.key,
                    &msg.correlation_token,
                    msg.token.clone(),
                    msg.accept_unrecorded,
                    msg.now,
                );

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, issued).await;
                })
            })
            .mutate_on::<AbandonAuthorization>(|agent, envelope| {
                let msg = envelope.message();
                agent.model.abandon(&msg.key, &msg.correlation_token);
                AgentReply::immediate()
            })
            .mutate_on::<VerifyChallenge>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let result = agent.model.verify(&msg.key, &msg.code, msg.now);

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, result).await;
                })
            })
            .mutate_on::<SignOut>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let outcome = agent.model.sign_out(&msg.key);

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, outcome).await;
                })
            })
            .mutate_on::<GetLinkStatus>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let status = agent.model.status(&msg.key, msg.now);

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, status).await;
                })
            })
            .mutate_on::<VerifiedAccess>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let token = agent.model.verified_access(&msg.key, msg.now);

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, token).await;
                })
            })
            .mutate_on::<PendingProviders>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let providers = agent.model.pending_providers(&msg.conversation_id, msg.now);

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, providers).await;
                })
            })
            .mutate_on::<MatchPendingChallenge>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let provider =
                    agent
                        .model
                        .match_pending_challenge(&msg.conversation_id, &msg.code, msg.now);

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, provider).await;
                })
            })
            .mutate_on::<CleanupExpired>(|agent, _envelope| {
                let removed = agent.model.cleanup_expired(Utc::now());

                if removed > 0 {
                    tracing::debug!(
                        removed = removed,
                        remaining = agent.model.records.len(),
                        "Cleaned up expired link records"
                    );
                }

                AgentReply::immediate()
            })
            .after_start(|_agent| async {
                tracing::info!("Link state agent started");
            })
            .after_stop(|agent| {
                let records = agent.model.records.len();
                async move {
                    tracing::info!(records = records, "Link state agent stopped");
                }
            });

        Ok(builder.start().await)
    }

    fn reserve_sign_in(
        &mut self,
        key: &LinkKey,
        correlation_token: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ReserveOutcome {
        let record = self.records.entry(key.clone()).or_default();
        record.discard_stale_token(now);

        match &record.token {
            Some(token) if token.is_verified() => return ReserveOutcome::AlreadyVerified,
            Some(_) => return ReserveOutcome::AlreadyPending,
            None => {}
        }

        let superseded = record
            .outstanding
            .replace(OutstandingAuthorization {
                correlation_token,
                expires_at,
            })
            .map(|previous| previous.correlation_token);

        if let Some(previous) = &superseded {
            tracing::debug!(
                link = %key,
                superseded = %previous,
                "New sign-in supersedes outstanding authorization"
            );
        }

        ReserveOutcome::Reserved { superseded }
    }

    /// Whether a callback for `correlation_token` may complete
    ///
    /// A record that knows of a sign-in or a token decides by its outstanding
    /// authorization. Without one, `accept_unrecorded` decides.
    fn is_outstanding(
        &self,
        key: &LinkKey,
        correlation_token: &str,
        accept_unrecorded: bool,
        now: DateTime<Utc>,
    ) -> bool {
        match self.records.get(key) {
            Some(record) if !record.is_empty() => record.outstanding_matches(correlation_token, now),
            _ => accept_unrecorded,
        }
    }

    fn issue_challenge(
        &mut self,
        key: &LinkKey,
        correlation_token: &str,
        token: PendingToken,
        accept_unrecorded: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_outstanding(key, correlation_token, accept_unrecorded, now) {
            tracing::warn!(
                link = %key,
                correlation_token = %correlation_token,
                "Authorization no longer outstanding, challenge not issued"
            );
            return false;
        }

        let record = self.records.entry(key.clone()).or_default();
        record.outstanding = None;
        record.token = Some(token);
        tracing::info!(link = %key, correlation_token = %correlation_token, "Issued challenge");
        true
    }

    fn abandon(&mut self, key: &LinkKey, correlation_token: &str) {
        if let Some(record) = self.records.get_mut(key) {
            if record
                .outstanding
                .as_ref()
                .is_some_and(|o| o.correlation_token == correlation_token)
            {
                record.outstanding = None;
                tracing::debug!(link = %key, correlation_token = %correlation_token, "Abandoned authorization");
            }
            if record.is_empty() {
                self.records.remove(key);
            }
        }
    }

    fn verify(
        &mut self,
        key: &LinkKey,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, LinkError> {
        let max_attempts = self.max_challenge_attempts;
        let Some(record) = self.records.get_mut(key) else {
            return Err(LinkError::NotLinked);
        };
        let Some(token) = record.token.as_mut() else {
            return Err(LinkError::NotLinked);
        };

        if token.is_verified() {
            return Err(LinkError::AlreadyLinked);
        }

        let result = match token.check(code, now) {
            ChallengeOutcome::Verified => {
                tracing::info!(link = %key, "Challenge verified");
                return Ok(token.mark_verified());
            }
            ChallengeOutcome::Expired => {
                tracing::warn!(link = %key, "Challenge expired, discarding pending token");
                Err(LinkError::ChallengeExpired)
            }
            ChallengeOutcome::Mismatch => {
                let failed = token.record_mismatch();
                if failed >= max_attempts {
                    tracing::warn!(
                        link = %key,
                        failed_attempts = failed,
                        "Challenge attempts exhausted, discarding pending token"
                    );
                    Err(LinkError::TooManyAttempts)
                } else {
                    tracing::debug!(link = %key, failed_attempts = failed, "Challenge mismatch");
                    return Err(LinkError::ChallengeMismatch {
                        remaining_attempts: max_attempts - failed,
                    });
                }
            }
        };

        record.token = None;
        if record.is_empty() {
            self.records.remove(key);
        }
        result
    }

    fn sign_out(&mut self, key: &LinkKey) -> SignOutOutcome {
        let Some(record) = self.records.remove(key) else {
            return SignOutOutcome {
                signed_out: false,
                abandoned: None,
            };
        };

        let outcome = SignOutOutcome {
            signed_out: record.token.is_some(),
            abandoned: record.outstanding.map(|o| o.correlation_token),
        };
        tracing::info!(link = %key, signed_out = outcome.signed_out, "Signed out");
        outcome
    }

    fn status(&self, key: &LinkKey, now: DateTime<Utc>) -> LinkStatus {
        let Some(record) = self.records.get(key) else {
            return LinkStatus::NoToken;
        };

        match &record.token {
            Some(token) if token.is_verified() && !token.is_access_expired(now) => {
                LinkStatus::Verified
            }
            Some(token) if !token.is_verified() && !token.is_challenge_expired(now) => {
                LinkStatus::PendingVerification {
                    challenge_expires_at: token.challenge_expiry(),
                }
            }
            _ if record
                .outstanding
                .as_ref()
                .is_some_and(|o| now < o.expires_at) =>
            {
                LinkStatus::AuthorizationRequested
            }
            _ => LinkStatus::NoToken,
        }
    }

    fn verified_access(&mut self, key: &LinkKey, now: DateTime<Utc>) -> Option<VerifiedToken> {
        let record = self.records.get_mut(key)?;
        let token = record.token.as_ref()?;

        if token.is_verified() && token.is_access_expired(now) {
            tracing::info!(link = %key, "Verified access token lapsed");
            record.token = None;
            if record.is_empty() {
                self.records.remove(key);
            }
            return None;
        }

        token.as_verified()
    }

    fn pending_providers(
        &self,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) -> Vec<ProviderName> {
        let mut providers: Vec<ProviderName> = self
            .records
            .iter()
            .filter(|(key, _)| &key.conversation_id == conversation_id)
            .filter(|(_, record)| {
                record
                    .token
                    .as_ref()
                    .is_some_and(|token| !token.is_verified() && !token.is_challenge_expired(now))
            })
            .map(|(key, _)| key.provider.clone())
            .collect();
        providers.sort();
        providers
    }

    fn match_pending_challenge(
        &self,
        conversation_id: &ConversationId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Option<ProviderName> {
        self.records
            .iter()
            .filter(|(key, _)| &key.conversation_id == conversation_id)
            .find(|(_, record)| {
                record.token.as_ref().is_some_and(|token| {
                    !token.is_verified() && token.check(code, now) == ChallengeOutcome::Verified
                })
            })
            .map(|(key, _)| key.provider.clone())
    }

    fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();

        for record in self.records.values_mut() {
            if record
                .token
                .as_ref()
                .is_some_and(|token| token.is_challenge_expired(now))
            {
                record.token = None;
            }
            if record.outstanding.as_ref().is_some_and(|o| now >= o.expires_at) {
                record.outstanding = None;
            }
        }
        self.records.retain(|_, record| !record.is_empty());

        before - self.records.len()
    }
}

/// Send [`CleanupExpired`] to the link state agent every `interval`
pub fn start_sweeper(handle: AgentHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            tracing::trace!("Triggering link state sweep");
            handle.send(CleanupExpired).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linking::{ChallengeCode, RedeemedToken};
    use chrono::Duration as ChronoDuration;

    fn key(conversation: &str, provider: &str) -> LinkKey {
        LinkKey::new(ConversationId::new(conversation), ProviderName::new(provider))
    }

    fn pending(code: &str, now: DateTime<Utc>) -> PendingToken {
        PendingToken::new(
            RedeemedToken::new("access", Some(now + ChronoDuration::hours(1))),
            ChallengeCode::parse(code).unwrap(),
            now + ChronoDuration::minutes(10),
        )
    }

    /// Reserve and issue a challenge directly on the model
    fn model_with_pending(key: &LinkKey, code: &str, now: DateTime<Utc>) -> LinkStateAgent {
        let mut model = LinkStateAgent::default();
        let outcome =
            model.reserve_sign_in(key, "state-1".to_string(), now + ChronoDuration::minutes(10), now);
        assert_eq!(outcome, ReserveOutcome::Reserved { superseded: None });
        assert!(model.issue_challenge(key, "state-1", pending(code, now), false, now));
        model
    }

    #[test]
    fn test_new_sign_in_supersedes_outstanding() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = LinkStateAgent::default();
        let expires = now + ChronoDuration::minutes(10);

        model.reserve_sign_in(&key, "old".to_string(), expires, now);
        let outcome = model.reserve_sign_in(&key, "new".to_string(), expires, now);

        assert_eq!(
            outcome,
            ReserveOutcome::Reserved {
                superseded: Some("old".to_string())
            }
        );
        assert!(!model.is_outstanding(&key, "old", false, now));
        assert!(model.is_outstanding(&key, "new", false, now));
        assert!(!model.issue_challenge(&key, "old", pending("123456", now), false, now));
    }

    #[test]
    fn test_reserve_reports_existing_tokens() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = model_with_pending(&key, "123456", now);
        let expires = now + ChronoDuration::minutes(10);

        assert_eq!(
            model.reserve_sign_in(&key, "again".to_string(), expires, now),
            ReserveOutcome::AlreadyPending
        );

        model.verify(&key, "123456", now).unwrap();
        assert_eq!(
            model.reserve_sign_in(&key, "again".to_string(), expires, now),
            ReserveOutcome::AlreadyVerified
        );
    }

    #[test]
    fn test_expired_pending_does_not_block_sign_in() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = model_with_pending(&key, "123456", now);
        let later = now + ChronoDuration::minutes(11);

        let outcome =
            model.reserve_sign_in(&key, "fresh".to_string(), later + ChronoDuration::minutes(10), later);
        assert_eq!(outcome, ReserveOutcome::Reserved { superseded: None });
    }

    #[test]
    fn test_verify_match_then_already_linked() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = model_with_pending(&key, "123456", now);

        let token = model.verify(&key, "123456", now).unwrap();
        assert_eq!(token.access_token(), "access");
        assert_eq!(model.status(&key, now), LinkStatus::Verified);

        // A later mismatch never downgrades a verified token
        assert_eq!(model.verify(&key, "000000", now), Err(LinkError::AlreadyLinked));
        assert!(model.verified_access(&key, now).is_some());
    }

    #[test]
    fn test_verify_without_token_is_not_linked() {
        let now = Utc::now();
        let mut model = LinkStateAgent::default();
        assert_eq!(
            model.verify(&key("c-1", "linkedin"), "123456", now),
            Err(LinkError::NotLinked)
        );
    }

    #[test]
    fn test_expired_challenge_discards_token() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = model_with_pending(&key, "123456", now);
        let later = now + ChronoDuration::minutes(10);

        assert_eq!(model.verify(&key, "123456", later), Err(LinkError::ChallengeExpired));
        assert_eq!(model.verify(&key, "123456", later), Err(LinkError::NotLinked));
        assert_eq!(model.status(&key, later), LinkStatus::NoToken);
    }

    #[test]
    fn test_mismatch_until_attempts_exhausted() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = model_with_pending(&key, "123456", now);

        for remaining in (1..DEFAULT_MAX_CHALLENGE_ATTEMPTS).rev() {
            assert_eq!(
                model.verify(&key, "654321", now),
                Err(LinkError::ChallengeMismatch {
                    remaining_attempts: remaining
                })
            );
        }
        assert_eq!(model.verify(&key, "654321", now), Err(LinkError::TooManyAttempts));
        assert_eq!(model.verify(&key, "123456", now), Err(LinkError::NotLinked));
    }

    #[test]
    fn test_mismatch_then_match_verifies() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = model_with_pending(&key, "123456", now);

        assert!(model.verify(&key, "111111", now).is_err());
        assert!(model.verify(&key, "123456", now).is_ok());
    }

    #[test]
    fn test_sign_out_is_idempotent() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = model_with_pending(&key, "123456", now);

        assert_eq!(
            model.sign_out(&key),
            SignOutOutcome {
                signed_out: true,
                abandoned: None
            }
        );
        assert_eq!(
            model.sign_out(&key),
            SignOutOutcome {
                signed_out: false,
                abandoned: None
            }
        );
        assert_eq!(model.verify(&key, "123456", now), Err(LinkError::NotLinked));
    }

    #[test]
    fn test_sign_out_abandons_outstanding_authorization() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = LinkStateAgent::default();
        model.reserve_sign_in(&key, "state-1".to_string(), now + ChronoDuration::minutes(10), now);

        let outcome = model.sign_out(&key);
        assert_eq!(outcome.abandoned.as_deref(), Some("state-1"));
        assert!(!outcome.signed_out);
        assert!(!model.issue_challenge(&key, "state-1", pending("123456", now), false, now));
    }

    #[test]
    fn test_abandon_only_clears_matching_state() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = LinkStateAgent::default();
        model.reserve_sign_in(&key, "current".to_string(), now + ChronoDuration::minutes(10), now);

        model.abandon(&key, "stale");
        assert!(model.is_outstanding(&key, "current", false, now));

        model.abandon(&key, "current");
        assert_eq!(model.status(&key, now), LinkStatus::NoToken);
    }

    #[test]
    fn test_unrecorded_authorization_needs_durable_store() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = LinkStateAgent::default();

        assert!(!model.is_outstanding(&key, "elsewhere", false, now));
        assert!(!model.issue_challenge(&key, "elsewhere", pending("123456", now), false, now));
        assert!(model.records.is_empty());

        assert!(model.is_outstanding(&key, "elsewhere", true, now));
        assert!(model.issue_challenge(&key, "elsewhere", pending("123456", now), true, now));
        assert!(matches!(
            model.status(&key, now),
            LinkStatus::PendingVerification { .. }
        ));

        // A record that knows better still wins
        assert!(!model.is_outstanding(&key, "another", true, now));
        let mut model = LinkStateAgent::default();
        model.reserve_sign_in(&key, "current".to_string(), now + ChronoDuration::minutes(10), now);
        assert!(!model.issue_challenge(&key, "old", pending("123456", now), true, now));
    }

    #[test]
    fn test_status_transitions() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = LinkStateAgent::default();
        assert_eq!(model.status(&key, now), LinkStatus::NoToken);

        model.reserve_sign_in(&key, "s".to_string(), now + ChronoDuration::minutes(10), now);
        assert_eq!(model.status(&key, now), LinkStatus::AuthorizationRequested);

        model.issue_challenge(&key, "s", pending("123456", now), false, now);
        assert_eq!(
            model.status(&key, now),
            LinkStatus::PendingVerification {
                challenge_expires_at: now + ChronoDuration::minutes(10)
            }
        );

        model.verify(&key, "123456", now).unwrap();
        assert_eq!(model.status(&key, now), LinkStatus::Verified);
    }

    #[test]
    fn test_lapsed_access_token_is_dropped() {
        let now = Utc::now();
        let key = key("c-1", "linkedin");
        let mut model = model_with_pending(&key, "123456", now);
        model.verify(&key, "123456", now).unwrap();

        assert!(model.verified_access(&key, now + ChronoDuration::hours(2)).is_none());
        assert_eq!(model.status(&key, now), LinkStatus::NoToken);
    }

    #[test]
    fn test_pending_providers_and_matching() {
        let now = Utc::now();
        let linkedin = key("c-1", "linkedin");
        let azure = key("c-1", "azure");
        let other = key("c-2", "linkedin");

        let mut model = model_with_pending(&linkedin, "111111", now);
        for (key, code) in [(&azure, "222222"), (&other, "333333")] {
            model.reserve_sign_in(key, "state-1".to_string(), now + ChronoDuration::minutes(10), now);
            model.issue_challenge(key, "state-1", pending(code, now), false, now);
        }

        let conversation = ConversationId::new("c-1");
        assert_eq!(
            model.pending_providers(&conversation, now),
            vec![ProviderName::new("azure"), ProviderName::new("linkedin")]
        );
        assert_eq!(
            model.match_pending_challenge(&conversation, "222222", now),
            Some(ProviderName::new("azure"))
        );
        assert_eq!(model.match_pending_challenge(&conversation, "333333", now), None);
    }

    #[test]
    fn test_cleanup_discards_expired() {
        let now = Utc::now();
        let pending_key = key("c-1", "linkedin");
        let outstanding_key = key("c-1", "azure");

        let mut model = model_with_pending(&pending_key, "123456", now);
        model.reserve_sign_in(
            &outstanding_key,
            "s".to_string(),
            now + ChronoDuration::minutes(5),
            now,
        );

        assert_eq!(model.cleanup_expired(now), 0);
        assert_eq!(model.cleanup_expired(now + ChronoDuration::minutes(11)), 2);
        assert!(model.records.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_agent_issue_and_verify() {
        let mut runtime = ActonApp::launch();
        let handle = LinkStateAgent::spawn(&mut runtime, 3).await.unwrap();
        let now = Utc::now();
        let key = key("c-1", "linkedin");

        let (request, rx) =
            ReserveSignIn::new(key.clone(), "s".to_string(), now + ChronoDuration::minutes(10), now);
        handle.send(request).await;
        assert_eq!(rx.await.unwrap(), ReserveOutcome::Reserved { superseded: None });

        let (request, rx) =
            IssueChallenge::new(key.clone(), "s".to_string(), pending("123456", now), false, now);
        handle.send(request).await;
        assert!(rx.await.unwrap());

        let (request, rx) = VerifyChallenge::new(key.clone(), "123456".to_string(), now);
        handle.send(request).await;
        assert!(rx.await.unwrap().is_ok());

        let (request, rx) = VerifiedAccess::new(key, now);
        handle.send(request).await;
        assert!(rx.await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_agent_respects_configured_attempts() {
        let mut runtime = ActonApp::launch();
        let handle = LinkStateAgent::spawn(&mut runtime, 1).await.unwrap();
        let now = Utc::now();
        let key = key("c-1", "linkedin");

        let (request, rx) =
            ReserveSignIn::new(key.clone(), "s".to_string(), now + ChronoDuration::minutes(10), now);
        handle.send(request).await;
        rx.await.unwrap();
        let (request, rx) =
            IssueChallenge::new(key.clone(), "s".to_string(), pending("123456", now), false, now);
        handle.send(request).await;
        rx.await.unwrap();

        let (request, rx) = VerifyChallenge::new(key, "000000".to_string(), now);
        handle.send(request).await;
        assert_eq!(rx.await.unwrap(), Err(LinkError::TooManyAttempts));
    }
}
