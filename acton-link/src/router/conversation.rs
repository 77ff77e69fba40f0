//! Conversation-facing replies

use async_trait::async_trait;
use serde::Serialize;

use crate::linking::ConversationAddress;

/// Message sent back into a conversation
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Card with a sign-in button
    SignInCard {
        /// Provider name shown to the user
        provider_display_name: String,
        /// Authorization URL the button opens
        sign_in_url: String,
    },
    /// Plain status line
    Status {
        /// Text shown to the user
        text: String,
    },
    /// Linked profile
    Profile {
        /// Provider name shown to the user
        provider_display_name: String,
        /// Profile document as returned by the provider
        profile: serde_json::Value,
    },
}

impl OutboundMessage {
    /// Status line
    #[must_use]
    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { text: text.into() }
    }

    /// Text rendering for channels without cards
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::SignInCard {
                provider_display_name,
                ..
            } => format!("Click below to sign in to {provider_display_name}"),
            Self::Status { text } => text.clone(),
            Self::Profile {
                provider_display_name,
                profile,
            } => {
                let name = profile_display_name(profile).unwrap_or("your account");
                format!("You're signed in to {provider_display_name} as {name}.")
            }
        }
    }
}

/// Best display name in a profile document
///
/// Covers OpenID Connect userinfo, Microsoft Graph and LinkedIn shapes.
fn profile_display_name(profile: &serde_json::Value) -> Option<&str> {
    ["name", "displayName", "formattedName", "userPrincipalName", "email"]
        .iter()
        .find_map(|field| profile.get(field).and_then(serde_json::Value::as_str))
        .filter(|name| !name.is_empty())
}

/// Delivers messages to a conversation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationSink: Send + Sync {
    /// Send one message to the conversation at `address`
    ///
    /// # Errors
    ///
    /// Returns an error if the channel rejects the message
    async fn send_to_conversation(
        &self,
        address: &ConversationAddress,
        message: OutboundMessage,
    ) -> anyhow::Result<()>;
}

/// Sink that writes replies to the log
///
/// Used by the standalone binary when no chat channel connector is wired in.
/// Sign-in URLs carry only the correlation token, never an access token.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingConversationSink;

#[async_trait]
impl ConversationSink for TracingConversationSink {
    async fn send_to_conversation(
        &self,
        address: &ConversationAddress,
        message: OutboundMessage,
    ) -> anyhow::Result<()> {
        match &message {
            OutboundMessage::SignInCard { sign_in_url, .. } => tracing::info!(
                channel_id = %address.channel_id,
                conversation_id = %address.conversation_id,
                sign_in_url = %sign_in_url,
                "{}",
                message.text()
            ),
            _ => tracing::info!(
                channel_id = %address.channel_id,
                conversation_id = %address.conversation_id,
                "{}",
                message.text()
            ),
        }
        Ok(())
    }
}
