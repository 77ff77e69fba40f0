//! Linking errors
//!
//! [`LinkError`] is the taxonomy every linking operation reports. Variants carry
//! only diagnostic context that is safe to log (provider names, reasons); no
//! variant ever holds an access token. What the user sees is produced by
//! [`LinkError::user_message`], which never includes the internal detail.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::linking::ConversationAddress;

/// Errors reported by the linking flow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Unknown, already consumed, expired or superseded correlation token
    #[error("Correlation token not found")]
    CorrelationNotFound,

    /// Provider callback arrived without an authorization code
    #[error("Authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    /// Code-for-token exchange failed; terminal for the attempt
    #[error("Code redemption failed: {0}")]
    RedemptionFailed(String),

    /// Challenge presented at or after its expiry; the pending token is gone
    #[error("Challenge code expired")]
    ChallengeExpired,

    /// Challenge did not match; the user may try again until expiry
    #[error("Challenge code mismatch ({remaining_attempts} attempts left)")]
    ChallengeMismatch {
        /// Attempts left before the pending token is discarded
        remaining_attempts: u32,
    },

    /// The attempt cap was reached; the pending token is gone
    #[error("Too many incorrect challenge codes")]
    TooManyAttempts,

    /// A pending or verified token already exists for this provider
    #[error("Already linked")]
    AlreadyLinked,

    /// No pending or verified token exists for this provider
    #[error("Not linked")]
    NotLinked,

    /// Route or command named a provider that is not configured
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Profile lookup failed after a successful link
    #[error("Profile unavailable: {0}")]
    ProfileUnavailable(String),

    /// Backing store or agent failure
    #[error("Linking backend unavailable: {0}")]
    Unavailable(String),
}

impl LinkError {
    /// Plain status line for the conversation
    ///
    /// Never includes tokens, provider responses or other internal detail.
    #[must_use]
    pub fn user_message(&self, provider_display_name: &str) -> String {
        match self {
            Self::CorrelationNotFound
            | Self::AuthorizationDenied(_)
            | Self::RedemptionFailed(_) => format!(
                "Sorry, there was an error signing in to {provider_display_name}. Please try again."
            ),
            Self::ChallengeExpired => format!(
                "That verification code has expired. Please sign in to {provider_display_name} again."
            ),
            Self::ChallengeMismatch { .. } => {
                "That verification code doesn't match. Please check the number shown after you signed in and try again."
                    .to_string()
            }
            Self::TooManyAttempts => format!(
                "Too many incorrect verification codes. Please sign in to {provider_display_name} again."
            ),
            Self::AlreadyLinked => format!("You're already signed in to {provider_display_name}."),
            Self::NotLinked => format!(
                "I don't have a sign-in to {provider_display_name} waiting for verification. If you just signed in, please try again in a moment."
            ),
            Self::UnknownProvider(_) => "Sorry, I don't know that sign-in provider.".to_string(),
            Self::ProfileUnavailable(_) => {
                format!("Sorry, I couldn't load your {provider_display_name} profile right now.")
            }
            Self::Unavailable(_) => "Sorry, something went wrong. Please try again.".to_string(),
        }
    }

    /// HTTP status for this error
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::CorrelationNotFound
            | Self::AuthorizationDenied(_)
            | Self::ChallengeMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::ChallengeExpired | Self::TooManyAttempts => StatusCode::GONE,
            Self::RedemptionFailed(_) | Self::ProfileUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::AlreadyLinked => StatusCode::CONFLICT,
            Self::NotLinked => StatusCode::UNAUTHORIZED,
            Self::UnknownProvider(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// A failed provider callback
///
/// `address` is set once the correlation entry has been consumed, so the
/// failure can also be reported to the conversation that started the sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct CallbackFailure {
    /// Conversation the consumed correlation entry pointed at
    pub address: Option<ConversationAddress>,
    /// What went wrong
    pub error: LinkError,
}

impl CallbackFailure {
    /// A failure for a known conversation
    #[must_use]
    pub const fn for_conversation(address: ConversationAddress, error: LinkError) -> Self {
        Self {
            address: Some(address),
            error,
        }
    }
}

impl From<LinkError> for CallbackFailure {
    fn from(error: LinkError) -> Self {
        Self {
            address: None,
            error,
        }
    }
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let message = match self {
            Self::UnknownProvider(_) => "Unknown sign-in provider",
            Self::Unavailable(_) => "Service temporarily unavailable",
            Self::NotLinked => "Not signed in",
            Self::AlreadyLinked => "Already signed in",
            _ => "Sign-in could not be completed",
        };

        (self.status_code(), message).into_response()
    }
}
