//! Event router
//!
//! Turns inbound conversation activity into linking operations and replies.
//! A challenge code reaches [`LinkingService::verify`] through one of two
//! paths:
//!
//! 1. the `signin/verifyState` invoke, routed immediately whatever else the
//!    conversation is doing
//! 2. a plain message containing a standalone six-digit run, consulted only
//!    while some provider in the conversation has a pending token
//!
//! Anything else is handed back as [`RouteOutcome::Unhandled`] for ordinary
//! conversation handling.

pub mod command;
pub mod conversation;
pub mod extract;

pub use command::{ConversationTurn, InboundActivity, InvokeActivity, LinkCommand, VERIFY_STATE_INVOKE};
pub use conversation::{ConversationSink, OutboundMessage, TracingConversationSink};
pub use extract::extract_challenge_code;

use chrono::Utc;
use std::sync::Arc;

use crate::error::LinkError;
use crate::linking::{ConversationAddress, LinkingService, ProviderName, SignInStart};

/// What the router did with a turn
#[derive(Clone, Debug, PartialEq)]
pub enum RouteOutcome {
    /// The turn was a linking command and has been answered
    Handled(LinkCommand),
    /// Not a linking command
    Unhandled(ConversationTurn),
}

impl RouteOutcome {
    /// Whether the turn was consumed
    #[must_use]
    pub const fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }
}

/// Routes conversation turns to the linking service
#[derive(Clone)]
pub struct EventRouter {
    linking: LinkingService,
    sink: Arc<dyn ConversationSink>,
    default_provider: Option<ProviderName>,
}

impl EventRouter {
    /// Create a router
    ///
    /// Commands that name no provider go to `default_provider`, or to the only
    /// registered provider when exactly one is configured.
    #[must_use]
    pub fn new(
        linking: LinkingService,
        sink: Arc<dyn ConversationSink>,
        default_provider: Option<ProviderName>,
    ) -> Self {
        let default_provider = default_provider.or_else(|| {
            let mut names = linking.providers().names();
            match (names.next(), names.next()) {
                (Some(only), None) => Some(only.clone()),
                _ => None,
            }
        });

        Self {
            linking,
            sink,
            default_provider,
        }
    }

    /// Provider used when a command names none
    #[must_use]
    pub const fn default_provider(&self) -> Option<&ProviderName> {
        self.default_provider.as_ref()
    }

    /// Route an inbound activity
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] if linking state cannot be read.
    /// Linking failures for a recognized command are answered in the
    /// conversation and do not surface here.
    pub async fn route(&self, activity: InboundActivity) -> Result<RouteOutcome, LinkError> {
        self.route_turn(activity.into_turn()).await
    }

    /// Route a normalized turn
    ///
    /// # Errors
    ///
    /// See [`EventRouter::route`]
    pub async fn route_turn(&self, turn: ConversationTurn) -> Result<RouteOutcome, LinkError> {
        if let Some(command) =
            LinkCommand::decode(&turn, self.linking.providers(), self.default_provider.as_ref())
        {
            self.execute(&turn.address, &command).await?;
            return Ok(RouteOutcome::Handled(command));
        }

        if turn.original_invoke.is_none() {
            let conversation = turn.address.conversation_id();
            if !self.linking.pending_providers(&conversation).await?.is_empty() {
                if let Some(code) = extract_challenge_code(&turn.text) {
                    let command = LinkCommand::VerifyChallenge {
                        code: code.to_string(),
                        provider: None,
                    };
                    self.execute(&turn.address, &command).await?;
                    return Ok(RouteOutcome::Handled(command));
                }
            }
        }

        Ok(RouteOutcome::Unhandled(turn))
    }

    /// Run a decoded command and reply in the conversation
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] if linking state cannot be read
    pub async fn execute(
        &self,
        address: &ConversationAddress,
        command: &LinkCommand,
    ) -> Result<(), LinkError> {
        match command {
            LinkCommand::SignIn(provider) => self.sign_in(address, provider).await,
            LinkCommand::ShowProfile(provider) => self.show_profile(address, provider).await,
            LinkCommand::SignOut(provider) => self.sign_out(address, provider).await,
            LinkCommand::VerifyChallenge { code, provider } => {
                self.verify(address, code, provider.as_ref()).await
            }
        }
    }

    /// Send a reply, logging delivery failures
    pub async fn reply(&self, address: &ConversationAddress, message: OutboundMessage) {
        if let Err(e) = self.sink.send_to_conversation(address, message).await {
            tracing::warn!(
                conversation_id = %address.conversation_id,
                error = %e,
                "Failed to deliver conversation reply"
            );
        }
    }

    /// Reply with a status line, or fail for backend errors
    async fn reply_error(
        &self,
        address: &ConversationAddress,
        provider: &ProviderName,
        error: &LinkError,
    ) -> Result<(), LinkError> {
        let display_name = self.linking.providers().display_name(provider);
        self.reply(address, OutboundMessage::status(error.user_message(&display_name)))
            .await;
        match error {
            LinkError::Unavailable(_) => Err(error.clone()),
            _ => Ok(()),
        }
    }

    async fn sign_in(
        &self,
        address: &ConversationAddress,
        provider: &ProviderName,
    ) -> Result<(), LinkError> {
        let display_name = self.linking.providers().display_name(provider);
        match self.linking.begin_sign_in(address, provider, &[]).await {
            Ok(SignInStart::AuthorizationRequired(authorization)) => {
                self.reply(
                    address,
                    OutboundMessage::SignInCard {
                        provider_display_name: display_name,
                        sign_in_url: authorization.url,
                    },
                )
                .await;
                Ok(())
            }
            Ok(SignInStart::AlreadyVerified) => {
                self.reply(
                    address,
                    OutboundMessage::status(format!("You're already signed in to {display_name}.")),
                )
                .await;
                Ok(())
            }
            Ok(SignInStart::AlreadyPending) => {
                self.reply(
                    address,
                    OutboundMessage::status(format!(
                        "Please enter the verification code shown after you signed in to {display_name}."
                    )),
                )
                .await;
                Ok(())
            }
            Err(e) => self.reply_error(address, provider, &e).await,
        }
    }

    async fn show_profile(
        &self,
        address: &ConversationAddress,
        provider: &ProviderName,
    ) -> Result<(), LinkError> {
        let display_name = self.linking.providers().display_name(provider);
        match self
            .linking
            .fetch_profile(&address.conversation_id(), provider)
            .await
        {
            Ok(profile) => {
                self.reply(
                    address,
                    OutboundMessage::Profile {
                        provider_display_name: display_name,
                        profile,
                    },
                )
                .await;
                Ok(())
            }
            Err(LinkError::NotLinked) => {
                self.reply(
                    address,
                    OutboundMessage::status(format!(
                        "Please sign in to {display_name} so I can access your profile."
                    )),
                )
                .await;
                Ok(())
            }
            Err(e) => self.reply_error(address, provider, &e).await,
        }
    }

    async fn sign_out(
        &self,
        address: &ConversationAddress,
        provider: &ProviderName,
    ) -> Result<(), LinkError> {
        if self.linking.providers().get(provider).is_none() {
            return self
                .reply_error(address, provider, &LinkError::UnknownProvider(provider.to_string()))
                .await;
        }

        let display_name = self.linking.providers().display_name(provider);
        let outcome = self
            .linking
            .sign_out(&address.conversation_id(), provider)
            .await?;

        let text = if outcome.signed_out {
            format!("You're now signed out of {display_name}.")
        } else {
            format!("You're already signed out of {display_name}.")
        };
        self.reply(address, OutboundMessage::status(text)).await;
        Ok(())
    }

    async fn verify(
        &self,
        address: &ConversationAddress,
        code: &str,
        provider: Option<&ProviderName>,
    ) -> Result<(), LinkError> {
        let conversation = address.conversation_id();

        // A wrong code counts against every pending provider it could be for
        let targets = match provider {
            Some(provider) => vec![provider.clone()],
            None => match self.linking.match_pending_challenge(&conversation, code).await? {
                Some(provider) => vec![provider],
                None => self.linking.pending_providers(&conversation).await?,
            },
        };

        if targets.is_empty() {
            tracing::info!(conversation_id = %conversation, "Challenge code without a pending sign-in");
            self.reply(
                address,
                OutboundMessage::status(
                    "I don't have a sign-in waiting for verification. If you just signed in, please try again in a moment.",
                ),
            )
            .await;
            return Ok(());
        }

        let now = Utc::now();
        let mut first_error = None;
        for target in &targets {
            match self.linking.verify(&conversation, target, code, now).await {
                Ok(_) => {
                    let display_name = self.linking.providers().display_name(target);
                    self.reply(
                        address,
                        OutboundMessage::status(format!("You're now signed in to {display_name}.")),
                    )
                    .await;
                    return self.show_profile(address, target).await;
                }
                Err(e) => {
                    first_error.get_or_insert((target.clone(), e));
                }
            }
        }

        match first_error {
            Some((target, e)) => self.reply_error(address, &target, &e).await,
            None => Ok(()),
        }
    }
}
