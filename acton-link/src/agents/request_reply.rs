//! Request-reply helpers for calling agents from async code
//!
//! Callers that need an answer from an agent (the callback handler waiting on a
//! correlation lookup, the router waiting on a verification result) put a
//! oneshot sender inside the message. Messages must be `Clone`, so the sender
//! is wrapped in `Arc<Mutex<Option<...>>>` and taken exactly once when the
//! agent answers.

use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

use crate::error::LinkError;

/// Response channel embedded in agent request messages
pub type ResponseChannel<T> = Arc<Mutex<Option<oneshot::Sender<T>>>>;

/// Create both halves of a request-reply exchange
///
/// The `ResponseChannel` goes into the message, the receiver is awaited by the
/// caller.
#[must_use]
pub fn create_request_reply<T>() -> (ResponseChannel<T>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    (Arc::new(Mutex::new(Some(tx))), rx)
}

/// Answer a request through its response channel
///
/// # Errors
///
/// Returns `Err(value)` if the caller stopped waiting or the channel was
/// already used.
pub async fn send_response<T>(response_tx: ResponseChannel<T>, value: T) -> Result<(), T> {
    let tx = response_tx.lock().await.take();
    match tx {
        Some(tx) => tx.send(value),
        None => Err(value),
    }
}

/// Await an agent's answer, mapping a dropped channel to [`LinkError::Unavailable`]
///
/// # Errors
///
/// Returns [`LinkError::Unavailable`] if the agent stopped before replying.
pub async fn await_reply<T>(rx: oneshot::Receiver<T>, agent: &str) -> Result<T, LinkError> {
    rx.await.map_err(|_| {
        tracing::error!(agent = %agent, "Agent dropped response channel");
        LinkError::Unavailable(format!("{agent} did not reply"))
    })
}
