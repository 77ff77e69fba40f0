//! HTTP handlers
//!
//! - `GET /auth/{provider}/callback` completes an authorization and shows the
//!   challenge code to the user
//! - `POST /api/messages` accepts conversation activity for the event router
//! - `GET /health` liveness

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::LinkError;
use crate::linking::{AuthorizationCallback, ProviderName};
use crate::router::{InboundActivity, OutboundMessage, RouteOutcome};
use crate::state::LinkAppState;

/// Build the application router
pub fn routes(state: LinkAppState) -> Router {
    Router::new()
        .route("/auth/{provider}/callback", get(authorization_callback))
        .route("/api/messages", post(receive_activity))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Provider redirect target
///
/// Renders the challenge code on success. Failures render a generic page and,
/// once the conversation is known, send the same status line to it; the
/// reason is only logged.
pub async fn authorization_callback(
    State(state): State<LinkAppState>,
    Path(provider): Path<String>,
    Query(callback): Query<AuthorizationCallback>,
) -> Response {
    let provider = ProviderName::new(&provider);
    let display_name = state.linking().providers().display_name(&provider);

    match state
        .linking()
        .complete_authorization_callback(&provider, &callback)
        .await
    {
        Ok(issued) => {
            state
                .router()
                .reply(
                    &issued.conversation_address,
                    OutboundMessage::status(format!(
                        "To finish signing in to {}, type the verification code shown in your browser.",
                        issued.provider_display_name
                    )),
                )
                .await;

            render_page(
                StatusCode::OK,
                &ChallengePage {
                    provider_display_name: &issued.provider_display_name,
                    code: issued.challenge.as_str(),
                },
            )
        }
        Err(failure) => {
            let message = failure.error.user_message(&display_name);
            if let Some(address) = &failure.address {
                state
                    .router()
                    .reply(address, OutboundMessage::status(message.clone()))
                    .await;
            }

            render_page(
                failure.error.status_code(),
                &SignInErrorPage {
                    provider_display_name: &display_name,
                    message: &message,
                },
            )
        }
    }
}

/// Reply to `POST /api/messages`
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityResponse {
    /// Whether the activity was a linking command
    pub handled: bool,
}

/// Inbound conversation activity
///
/// Turns that are not linking commands get the command help line.
pub async fn receive_activity(
    State(state): State<LinkAppState>,
    Json(activity): Json<InboundActivity>,
) -> Result<Json<ActivityResponse>, LinkError> {
    let handled = match state.router().route(activity).await? {
        RouteOutcome::Handled(command) => {
            tracing::debug!(command = ?command, "Handled linking command");
            true
        }
        RouteOutcome::Unhandled(turn) => {
            state
                .router()
                .reply(
                    &turn.address,
                    OutboundMessage::status(
                        "I didn't understand. Try SignIn, ShowProfile or SignOut.",
                    ),
                )
                .await;
            false
        }
    };

    Ok(Json(ActivityResponse { handled }))
}

/// Liveness check
pub async fn health(State(state): State<LinkAppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": state.config().service.name,
            "providers": state.linking().providers().len(),
        })),
    )
}

#[derive(Template)]
#[template(path = "challenge.html")]
struct ChallengePage<'a> {
    provider_display_name: &'a str,
    code: &'a str,
}

#[derive(Template)]
#[template(path = "sign_in_error.html")]
struct SignInErrorPage<'a> {
    provider_display_name: &'a str,
    message: &'a str,
}

fn render_page<T: Template>(status: StatusCode, page: &T) -> Response {
    match page.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Template rendering failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Template rendering failed").into_response()
        }
    }
}
