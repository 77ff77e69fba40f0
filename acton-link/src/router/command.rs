//! Inbound activities and the commands decoded from them
//!
//! Chat channels deliver either plain messages or "invoke" side-channel
//! signals (button presses, sign-in completion notifications). Both are
//! normalized into a [`ConversationTurn`] and decoded once into a closed
//! [`LinkCommand`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::linking::{ConversationAddress, ProviderName};
use crate::oauth2::ProviderRegistry;

/// Invoke name a sign-in completion page uses to report the challenge code
pub const VERIFY_STATE_INVOKE: &str = "signin/verifyState";

/// Activity posted by a chat channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundActivity {
    /// A message typed by the user
    Message {
        /// Where the message came from
        address: ConversationAddress,
        /// Message text
        #[serde(default)]
        text: String,
    },
    /// A side-channel signal
    Invoke(InvokeActivity),
}

/// Side-channel signal from a chat channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvokeActivity {
    /// Where the signal came from
    pub address: ConversationAddress,
    /// Signal name, e.g. `signin/verifyState`
    #[serde(default)]
    pub name: String,
    /// Signal payload
    #[serde(default)]
    pub value: Value,
}

impl InboundActivity {
    /// Normalize into a conversational turn
    ///
    /// An invoke becomes a synthetic message whose text is the payload's
    /// `command` (or the invoke name) followed by the JSON payload; the
    /// original invoke is kept on the turn.
    #[must_use]
    pub fn into_turn(self) -> ConversationTurn {
        match self {
            Self::Message { address, text } => ConversationTurn {
                address,
                text,
                original_invoke: None,
            },
            Self::Invoke(invoke) => {
                let command = invoke
                    .value
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or(invoke.name.as_str());
                let text = format!("{command} {}", invoke.value);
                ConversationTurn {
                    address: invoke.address.clone(),
                    text,
                    original_invoke: Some(invoke),
                }
            }
        }
    }
}

/// One turn of conversation as seen by the router
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationTurn {
    /// Where to reply
    pub address: ConversationAddress,
    /// Message text, synthetic for invokes
    pub text: String,
    /// The invoke this turn was built from, if any
    pub original_invoke: Option<InvokeActivity>,
}

/// Linking command decoded from a turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkCommand {
    /// Start a sign-in
    SignIn(ProviderName),
    /// Show the linked profile
    ShowProfile(ProviderName),
    /// Drop the link
    SignOut(ProviderName),
    /// Present a challenge code; without a provider it is matched against
    /// every pending provider in the conversation
    VerifyChallenge {
        /// Presented code
        code: String,
        /// Provider named by the signal, if any
        provider: Option<ProviderName>,
    },
}

impl LinkCommand {
    /// Decode an explicit command from a turn
    ///
    /// Recognizes the `signin/verifyState` invoke, invoke payloads with a
    /// `command` of `login`, `profile` or `logout`, and the text commands
    /// `SignIn`, `ShowProfile` and `SignOut` optionally followed by a
    /// provider name. Commands without a provider use `default_provider`, as
    /// do text commands whose next word is not a registered provider.
    /// Free-text challenge codes are not decoded here because they only count
    /// while a sign-in is pending.
    #[must_use]
    pub fn decode(
        turn: &ConversationTurn,
        providers: &ProviderRegistry,
        default_provider: Option<&ProviderName>,
    ) -> Option<Self> {
        match &turn.original_invoke {
            Some(invoke) => Self::decode_invoke(invoke, default_provider),
            None => Self::decode_text(&turn.text, providers, default_provider),
        }
    }

    fn decode_invoke(invoke: &InvokeActivity, default_provider: Option<&ProviderName>) -> Option<Self> {
        let provider = invoke
            .value
            .get("provider")
            .and_then(Value::as_str)
            .map(ProviderName::new);

        if invoke.name == VERIFY_STATE_INVOKE {
            let code = match invoke.value.get("state")? {
                Value::String(code) => code.trim().to_string(),
                Value::Number(code) => code.to_string(),
                _ => return None,
            };
            return Some(Self::VerifyChallenge { code, provider });
        }

        let provider = provider.or_else(|| default_provider.cloned())?;
        match invoke.value.get("command").and_then(Value::as_str)? {
            "login" => Some(Self::SignIn(provider)),
            "profile" => Some(Self::ShowProfile(provider)),
            "logout" => Some(Self::SignOut(provider)),
            _ => None,
        }
    }

    fn decode_text(
        text: &str,
        providers: &ProviderRegistry,
        default_provider: Option<&ProviderName>,
    ) -> Option<Self> {
        let mut words = text.split_whitespace();
        let verb = words.next()?;
        let named = words.next().map(ProviderName::new);

        // "signin please" still means the default provider; an unknown name
        // without a default is kept so the user hears it is unknown
        let provider = match named {
            Some(name) if providers.get(&name).is_some() => Some(name),
            named => default_provider.cloned().or(named),
        };

        let build: fn(ProviderName) -> Self = if verb.eq_ignore_ascii_case("signin") {
            Self::SignIn
        } else if verb.eq_ignore_ascii_case("showprofile") {
            Self::ShowProfile
        } else if verb.eq_ignore_ascii_case("signout") {
            Self::SignOut
        } else {
            return None;
        };

        provider.map(build)
    }

    /// Provider the command is for, if it names one
    #[must_use]
    pub const fn provider(&self) -> Option<&ProviderName> {
        match self {
            Self::SignIn(p) | Self::ShowProfile(p) | Self::SignOut(p) => Some(p),
            Self::VerifyChallenge { provider, .. } => provider.as_ref(),
        }
    }
}
