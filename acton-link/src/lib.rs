//! acton-link: link out-of-band OAuth2 sign-ins to live chat conversations
//!
//! A chat user asks to sign in to a provider. The service hands out an
//! authorization URL whose `state` is a single-use correlation token, redeems
//! the code on the provider callback, and shows the user a six-digit challenge
//! code in the browser. The access token becomes usable only after that code
//! is typed back into the originating conversation, proving the person in the
//! chat is the person who signed in.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use acton_link::prelude::*;
//! use acton_reactive::prelude::ActonApp;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LinkConfig::load_for_service("acton-link")?;
//!     let providers = ProviderRegistry::from_config(&config)?;
//!
//!     let mut runtime = ActonApp::launch();
//!     let state = LinkAppState::new(
//!         &mut runtime,
//!         config.clone(),
//!         providers,
//!         Arc::new(TracingConversationSink),
//!     )
//!     .await?;
//!
//!     let listener = tokio::net::TcpListener::bind(&config.service.bind_address).await?;
//!     axum::serve(listener, routes(state.clone())).await?;
//!
//!     state.stop_background_tasks();
//!     runtime.shutdown_all().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `redis` - Redis-backed correlation store (default)
//! - `cli` - the `acton-link` binary (default)

// Lint configuration is handled at the workspace level in Cargo.toml
#![allow(clippy::missing_errors_doc)]

pub mod agents;
pub mod config;
pub mod error;
pub mod handlers;
pub mod linking;
pub mod oauth2;
pub mod observability;
pub mod router;
pub mod state;

#[cfg(test)]
pub mod testing;

pub mod prelude {
    //! Convenience re-exports for common types and traits
    //!
    //! ```rust
    //! use acton_link::prelude::*;
    //! ```

    pub use crate::config::{LinkConfig, LinkingSettings, ProviderConfig, ProviderKind};
    pub use crate::error::{CallbackFailure, LinkError};
    pub use crate::handlers::routes;
    pub use crate::linking::{
        AuthorizationCallback, ChallengeCode, ConversationAddress, ConversationId,
        CorrelationStore, LinkStatus, LinkingService, ProviderName, SignInStart, VerifiedToken,
    };
    pub use crate::oauth2::{OAuth2Provider, OAuthError, ProviderRegistry};
    pub use crate::observability::ObservabilityConfig;
    pub use crate::router::{
        ConversationSink, EventRouter, InboundActivity, LinkCommand, OutboundMessage,
        RouteOutcome, TracingConversationSink,
    };
    pub use crate::state::LinkAppState;
}
