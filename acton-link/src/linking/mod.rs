//! Linking core
//!
//! Per (conversation, provider) lifecycle:
//!
//! ```text
//! NoToken -> AuthorizationRequested -> PendingVerification -> Verified
//!               (correlation entry)        (PendingToken)     (VerifiedToken)
//! ```
//!
//! `PendingVerification` falls back to `NoToken` on challenge expiry, attempt
//! exhaustion or sign-out; `Verified` falls back on sign-out or when the
//! access token lapses.

use chrono::{DateTime, Utc};

pub mod address;
pub mod challenge;
pub mod service;
pub mod store;
pub mod token;

pub use address::{ConversationAddress, ConversationId, LinkKey, ProviderName};
pub use challenge::{ChallengeCode, ChallengeOutcome};
pub use service::{AuthorizationCallback, IssuedChallenge, LinkingService, SignInStart};
pub use store::{generate_correlation_token, CorrelationEntry, CorrelationStore, StoreError};
pub use token::{PendingToken, RedeemedToken, VerifiedToken};

#[cfg(feature = "redis")]
pub use store::RedisCorrelationStore;

/// Observable state of one (conversation, provider) link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    /// Nothing outstanding
    NoToken,
    /// A sign-in URL was handed out and its callback has not arrived
    AuthorizationRequested,
    /// A token was redeemed and waits for its challenge code
    PendingVerification {
        /// When the challenge stops being accepted
        challenge_expires_at: DateTime<Utc>,
    },
    /// The token may be used for resource calls
    Verified,
}
