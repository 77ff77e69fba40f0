//! acton-reactive agents
//!
//! Shared mutable state lives inside agents so that every mutation is
//! serialized through one mailbox:
//!
//! - [`CorrelationAgent`]: pending correlation entries (OAuth `state` →
//!   conversation address), single-use and TTL-bound
//! - [`LinkStateAgent`]: per (conversation, provider) link records holding the
//!   outstanding authorization and the pending or verified token

use acton_reactive::prelude::{AgentConfig, Ern};

pub mod correlation;
pub mod link_state;
pub mod request_reply;

pub use correlation::{
    start_sweeper as start_correlation_sweeper, AgentCorrelationStore,
    CleanupExpired as CorrelationCleanupExpired, CorrelationAgent, DeleteEntry, PutEntry,
    TakeEntry,
};
pub use link_state::{
    start_sweeper as start_link_state_sweeper, AbandonAuthorization, CheckOutstanding,
    CleanupExpired as LinkCleanupExpired, GetLinkStatus, IssueChallenge, LinkStateAgent,
    MatchPendingChallenge, PendingProviders, ReserveOutcome, ReserveSignIn, SignOut,
    SignOutOutcome, VerifiedAccess, VerifyChallenge, DEFAULT_MAX_CHALLENGE_ATTEMPTS,
};
pub use request_reply::{await_reply, create_request_reply, send_response, ResponseChannel};

/// Create an agent configuration rooted at `name`
///
/// # Errors
///
/// Returns an error if the ERN cannot be created from `name`
pub fn default_agent_config(name: &str) -> anyhow::Result<AgentConfig> {
    AgentConfig::new(Ern::with_root(name)?, None, None)
}
