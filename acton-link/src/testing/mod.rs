//! Test fixtures
//!
//! - [`AgentTestRuntime`] - actor runtime that shuts itself down on drop
//! - [`FakeProvider`] - in-memory provider adapter
//! - [`RecordingSink`] - conversation sink that keeps what it was sent
//! - [`DurableStore`] - in-process store that reports itself durable
//! - [`TestServer`] - `axum-test` server over the app routes

use acton_reactive::prelude::{ActonApp, AgentRuntime};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::agents::AgentCorrelationStore;
use crate::linking::{
    generate_correlation_token, ConversationAddress, CorrelationEntry, CorrelationStore,
    RedeemedToken, StoreError,
};
use crate::oauth2::{AuthorizationUrl, OAuth2Provider, OAuthError};
use crate::router::{ConversationSink, OutboundMessage};

pub use axum_test::TestServer;

/// Actor runtime for a single test
///
/// Spawn agents through [`AgentTestRuntime::runtime_mut`]; the runtime is shut
/// down in the background when the wrapper is dropped.
pub struct AgentTestRuntime {
    runtime: AgentRuntime,
}

impl AgentTestRuntime {
    /// Launch a fresh runtime
    #[must_use]
    pub fn new() -> Self {
        Self {
            runtime: ActonApp::launch(),
        }
    }

    /// Runtime to spawn agents on
    pub fn runtime_mut(&mut self) -> &mut AgentRuntime {
        &mut self.runtime
    }
}

impl Default for AgentTestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AgentTestRuntime {
    fn drop(&mut self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let mut runtime = std::mem::take(&mut self.runtime);
            handle.spawn(async move {
                let _ = runtime.shutdown_all().await;
            });
        }
    }
}

/// Provider adapter that never leaves the process
///
/// Authorization URLs carry a real correlation token; any code redeems to
/// `"{name}-access-{code}"` and the profile is `{"name": "Test User"}`.
#[derive(Clone, Debug)]
pub struct FakeProvider {
    name: String,
}

impl FakeProvider {
    /// Fake for the provider called `name`
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// `state` query parameter of an authorization URL
    ///
    /// # Panics
    ///
    /// Panics if the URL has no `state`
    #[must_use]
    pub fn state_from_url(url: &str) -> String {
        let url = oauth2::url::Url::parse(url).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }
}

#[async_trait]
impl OAuth2Provider for FakeProvider {
    fn authorization_url(
        &self,
        _extra_params: &[(String, String)],
    ) -> Result<AuthorizationUrl, OAuthError> {
        let correlation_token = generate_correlation_token();
        Ok(AuthorizationUrl {
            url: format!(
                "https://{}.example/authorize?state={correlation_token}",
                self.name
            ),
            correlation_token,
        })
    }

    async fn redeem_code(&self, code: &str) -> Result<RedeemedToken, OAuthError> {
        Ok(RedeemedToken::new(format!("{}-access-{code}", self.name), None))
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<serde_json::Value, OAuthError> {
        Ok(serde_json::json!({ "name": "Test User" }))
    }
}

/// Conversation sink that records every message
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<(ConversationAddress, OutboundMessage)>>>,
}

impl RecordingSink {
    /// Messages in send order
    #[must_use]
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Text rendering of every message
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.messages().iter().map(OutboundMessage::text).collect()
    }

    /// Most recent message
    #[must_use]
    pub fn last(&self) -> Option<OutboundMessage> {
        self.sent.lock().unwrap().last().map(|(_, m)| m.clone())
    }

    /// Addresses messages were sent to
    #[must_use]
    pub fn addresses(&self) -> Vec<ConversationAddress> {
        self.sent.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }
}

#[async_trait]
impl ConversationSink for RecordingSink {
    async fn send_to_conversation(
        &self,
        address: &ConversationAddress,
        message: OutboundMessage,
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((address.clone(), message));
        Ok(())
    }
}

/// Agent-backed store standing in for a shared durable backend
///
/// Clones share the same entries, so several linking services can use it as
/// instances of one deployment would use Redis.
#[derive(Clone)]
pub struct DurableStore {
    inner: AgentCorrelationStore,
}

impl DurableStore {
    /// Spawn the backing agent
    ///
    /// # Panics
    ///
    /// Panics if the agent cannot be spawned
    pub async fn spawn(runtime: &mut AgentTestRuntime) -> Self {
        Self {
            inner: AgentCorrelationStore::spawn(runtime.runtime_mut()).await.unwrap(),
        }
    }
}

#[async_trait]
impl CorrelationStore for DurableStore {
    async fn put(&self, entry: CorrelationEntry, ttl: Duration) -> Result<(), StoreError> {
        self.inner.put(entry, ttl).await
    }

    async fn take(&self, correlation_token: &str) -> Result<Option<CorrelationEntry>, StoreError> {
        self.inner.take(correlation_token).await
    }

    async fn delete(&self, correlation_token: &str) -> Result<(), StoreError> {
        self.inner.delete(correlation_token).await
    }

    fn is_durable(&self) -> bool {
        true
    }
}
