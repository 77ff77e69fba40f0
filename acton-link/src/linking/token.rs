//! Pending and verified access tokens
//!
//! Access tokens never appear in `Debug` output. A [`PendingToken`] exposes no
//! accessor for its access token at all; the only way to reach it is through a
//! [`VerifiedToken`], which exists only after a successful challenge match.

use chrono::{DateTime, Utc};
use std::fmt;

use super::challenge::{self, ChallengeCode, ChallengeOutcome};

/// Access token returned by a provider's token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct RedeemedToken {
    access_token: String,
    /// When the access token stops working, if the provider said
    pub expires_at: Option<DateTime<Utc>>,
}

impl RedeemedToken {
    /// Wrap a freshly redeemed access token
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }
}

impl fmt::Debug for RedeemedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedeemedToken")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A redeemed token waiting for its challenge to be answered
#[derive(Clone)]
pub struct PendingToken {
    access_token: String,
    access_token_expiry: Option<DateTime<Utc>>,
    challenge: ChallengeCode,
    challenge_expiry: DateTime<Utc>,
    verified: bool,
    failed_attempts: u32,
}

impl PendingToken {
    /// Create an unverified token guarded by `challenge`
    #[must_use]
    pub fn new(
        redeemed: RedeemedToken,
        challenge: ChallengeCode,
        challenge_expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: redeemed.access_token,
            access_token_expiry: redeemed.expires_at,
            challenge,
            challenge_expiry,
            verified: false,
            failed_attempts: 0,
        }
    }

    /// Whether the challenge has been answered
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        self.verified
    }

    /// When the challenge stops being accepted
    #[must_use]
    pub const fn challenge_expiry(&self) -> DateTime<Utc> {
        self.challenge_expiry
    }

    /// Mismatched codes presented so far
    #[must_use]
    pub const fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// An unverified token whose challenge window has closed
    #[must_use]
    pub fn is_challenge_expired(&self, now: DateTime<Utc>) -> bool {
        !self.verified && now >= self.challenge_expiry
    }

    /// A verified token whose access token has lapsed
    #[must_use]
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_token_expiry.is_some_and(|expiry| now >= expiry)
    }

    /// Compare a presented code without changing any state
    #[must_use]
    pub fn check(&self, presented: &str, now: DateTime<Utc>) -> ChallengeOutcome {
        challenge::validate(&self.challenge, self.challenge_expiry, presented, now)
    }

    /// Record a mismatched code and return the new failure count
    pub const fn record_mismatch(&mut self) -> u32 {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.failed_attempts
    }

    /// Mark the token verified and hand out its usable form
    pub fn mark_verified(&mut self) -> VerifiedToken {
        self.verified = true;
        self.verified_token()
    }

    /// The usable token, if verified
    #[must_use]
    pub fn as_verified(&self) -> Option<VerifiedToken> {
        self.verified.then(|| self.verified_token())
    }

    fn verified_token(&self) -> VerifiedToken {
        VerifiedToken {
            access_token: self.access_token.clone(),
            expires_at: self.access_token_expiry,
        }
    }
}

impl fmt::Debug for PendingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingToken")
            .field("access_token", &"[redacted]")
            .field("access_token_expiry", &self.access_token_expiry)
            .field("challenge", &self.challenge)
            .field("challenge_expiry", &self.challenge_expiry)
            .field("verified", &self.verified)
            .field("failed_attempts", &self.failed_attempts)
            .finish()
    }
}

/// An access token that may be used for resource calls
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl VerifiedToken {
    /// Bearer token for resource calls
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// When the access token lapses, if known
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl fmt::Debug for VerifiedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedToken")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
