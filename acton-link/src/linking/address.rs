//! Conversation addressing and link keys

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a conversation, derived from its [`ConversationAddress`]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap a conversation identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where to deliver messages for a conversation
///
/// Opaque to the linking core apart from [`ConversationAddress::conversation_id`].
/// Unknown fields supplied by the chat channel are kept in `extra` so that the
/// address round-trips through the correlation store unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAddress {
    /// Channel the conversation lives on
    pub channel_id: String,
    /// User on the other end of the conversation
    pub user_id: String,
    /// Conversation identifier
    pub conversation_id: String,
    /// Endpoint replies are delivered to, if the channel has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    /// Any other channel-specific addressing data
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConversationAddress {
    /// Build an address from its three required parts
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            service_url: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the service endpoint
    #[must_use]
    pub fn with_service_url(mut self, service_url: impl Into<String>) -> Self {
        self.service_url = Some(service_url.into());
        self
    }

    /// Conversation id used to key link records
    #[must_use]
    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::new(self.conversation_id.clone())
    }
}

/// Configured provider name, normalized to lowercase
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ProviderName(String);

impl ProviderName {
    /// Normalize and wrap a provider name
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_ascii_lowercase())
    }

    /// Get the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ProviderName {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<ProviderName> for String {
    fn from(value: ProviderName) -> Self {
        value.0
    }
}

impl From<&str> for ProviderName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a link record: one per (conversation, provider)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LinkKey {
    /// Conversation the link belongs to
    pub conversation_id: ConversationId,
    /// Provider being linked
    pub provider: ProviderName,
}

impl LinkKey {
    /// Create a link key
    #[must_use]
    pub const fn new(conversation_id: ConversationId, provider: ProviderName) -> Self {
        Self {
            conversation_id,
            provider,
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conversation_id, self.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_name_is_normalized() {
        assert_eq!(ProviderName::new(" LinkedIn "), ProviderName::new("linkedin"));
        assert_eq!(ProviderName::from("AzureADv1").as_str(), "azureadv1");
    }

    #[test]
    fn test_address_round_trips_unknown_fields() {
        let json = serde_json::json!({
            "channelId": "msteams",
            "userId": "u-1",
            "conversationId": "c-1",
            "serviceUrl": "https://smba.example/",
            "tenant": { "id": "t-1" }
        });

        let address: ConversationAddress = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(address.conversation_id().as_str(), "c-1");
        assert_eq!(address.extra.get("tenant"), Some(&serde_json::json!({ "id": "t-1" })));
        assert_eq!(serde_json::to_value(&address).unwrap(), json);
    }

    #[test]
    fn test_link_key_display() {
        let key = LinkKey::new(ConversationId::new("c-1"), ProviderName::new("linkedin"));
        assert_eq!(key.to_string(), "c-1/linkedin");
    }
}
