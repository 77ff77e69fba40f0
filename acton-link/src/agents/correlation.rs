//! Correlation Agent
//!
//! Process-local correlation store. Entries are held in the agent model, so
//! `take` (read plus removal) is a single mailbox step and duplicate callback
//! deliveries cannot both observe the same entry. Expiry is checked on every
//! access and by a periodic [`CleanupExpired`] sweep.

use crate::agents::default_agent_config;
use crate::agents::request_reply::{create_request_reply, send_response, ResponseChannel};
use crate::linking::store::{validate_ttl, CorrelationEntry, CorrelationStore, StoreError};
use acton_reactive::prelude::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type CorrelationAgentBuilder = ManagedAgent<Idle, CorrelationAgent>;

#[derive(Clone, Debug)]
struct StoredEntry {
    entry: CorrelationEntry,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Correlation agent model
#[derive(Debug, Default, Clone)]
pub struct CorrelationAgent {
    entries: HashMap<String, StoredEntry>,
}

impl CorrelationAgent {
    fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.is_expired(now));
        before - self.entries.len()
    }
}

/// Store a correlation entry; replies `false` if the token is already live
#[derive(Clone, Debug)]
pub struct PutEntry {
    /// Entry to store
    pub entry: CorrelationEntry,
    /// When the entry lapses
    pub expires_at: DateTime<Utc>,
    /// Response channel
    pub response_tx: ResponseChannel<bool>,
}

impl PutEntry {
    /// Create a new put request
    #[must_use]
    pub fn new(entry: CorrelationEntry, expires_at: DateTime<Utc>) -> (Self, oneshot::Receiver<bool>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            entry,
            expires_at,
            response_tx,
        };
        (request, rx)
    }
}

/// Remove and return a live correlation entry
#[derive(Clone, Debug)]
pub struct TakeEntry {
    /// Correlation token to consume
    pub correlation_token: String,
    /// Response channel
    pub response_tx: ResponseChannel<Option<CorrelationEntry>>,
}

impl TakeEntry {
    /// Create a new take request
    #[must_use]
    pub fn new(correlation_token: String) -> (Self, oneshot::Receiver<Option<CorrelationEntry>>) {
        let (response_tx, rx) = create_request_reply();
        let request = Self {
            correlation_token,
            response_tx,
        };
        (request, rx)
    }
}

/// Remove a correlation entry (fire-and-forget)
#[derive(Clone, Debug)]
pub struct DeleteEntry {
    /// Correlation token to remove
    pub correlation_token: String,
}

impl DeleteEntry {
    /// Create a new delete request
    #[must_use]
    pub const fn new(correlation_token: String) -> Self {
        Self { correlation_token }
    }
}

/// Drop every expired entry
#[derive(Clone, Debug)]
pub struct CleanupExpired;

impl CorrelationAgent {
    /// Spawn the correlation agent
    ///
    /// # Errors
    ///
    /// Returns error if agent configuration or spawning fails
    pub async fn spawn(runtime: &mut AgentRuntime) -> anyhow::Result<AgentHandle> {
        let config = default_agent_config("correlation_store")?;
        let builder = runtime.new_agent_with_config::<Self>(config).await;
        Self::configure_handlers(builder).await
    }

    async fn configure_handlers(
        mut builder: CorrelationAgentBuilder,
    ) -> anyhow::Result<AgentHandle> {
        builder
            .mutate_on::<PutEntry>(|agent, envelope| {
                let msg = envelope.message();
                let response_tx = msg.response_tx.clone();
                let now = Utc::now();
                let token = msg.entry.correlation_token.clone();

                let occupied = agent
                    .model
                    .entries
                    .get(&token)
                    .is_some_and(|stored| !stored.is_expired(now));

                if !occupied {
                    agent.model.entries.insert(
                        token.clone(),
                        StoredEntry {
                            entry: msg.entry.clone(),
                            expires_at: msg.expires_at,
                        },
                    );
                    tracing::debug!(
                        correlation_token = %token,
                        provider = %msg.entry.provider,
                        expires_at = %msg.expires_at,
                        "Stored correlation entry"
                    );
                }

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, !occupied).await;
                })
            })
            .mutate_on::<TakeEntry>(|agent, envelope| {
                let token = envelope.message().correlation_token.clone();
                let response_tx = envelope.message().response_tx.clone();
                let now = Utc::now();

                let entry = agent.model.entries.remove(&token).and_then(|stored| {
                    if stored.is_expired(now) {
                        tracing::warn!(correlation_token = %token, "Correlation entry expired");
                        None
                    } else {
                        tracing::debug!(
                            correlation_token = %token,
                            provider = %stored.entry.provider,
                            "Consumed correlation entry"
                        );
                        Some(stored.entry)
                    }
                });

                AgentReply::from_async(async move {
                    let _ = send_response(response_tx, entry).await;
                })
            })
            .mutate_on::<DeleteEntry>(|agent, envelope| {
                let token = &envelope.message().correlation_token;

                if agent.model.entries.remove(token).is_some() {
                    tracing::debug!(correlation_token = %token, "Removed correlation entry");
                }

                AgentReply::immediate()
            })
            .mutate_on::<CleanupExpired>(|agent, _envelope| {
                let removed = agent.model.cleanup_expired(Utc::now());

                if removed > 0 {
                    tracing::debug!(
                        removed = removed,
                        remaining = agent.model.entries.len(),
                        "Cleaned up expired correlation entries"
                    );
                }

                AgentReply::immediate()
            })
            .after_start(|_agent| async {
                tracing::info!("Correlation agent started");
            })
            .after_stop(|agent| {
                let pending = agent.model.entries.len();
                async move {
                    tracing::info!(pending = pending, "Correlation agent stopped");
                }
            });

        Ok(builder.start().await)
    }
}

/// Send [`CleanupExpired`] to the correlation agent every `interval`
pub fn start_sweeper(handle: AgentHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            tracing::trace!("Triggering correlation sweep");
            handle.send(CleanupExpired).await;
        }
    })
}

/// [`CorrelationStore`] backed by a [`CorrelationAgent`]
#[derive(Clone)]
pub struct AgentCorrelationStore {
    handle: AgentHandle,
}

impl AgentCorrelationStore {
    /// Wrap a running correlation agent
    #[must_use]
    pub const fn new(handle: AgentHandle) -> Self {
        Self { handle }
    }

    /// Spawn a correlation agent and wrap it
    ///
    /// # Errors
    ///
    /// Returns error if the agent cannot be spawned
    pub async fn spawn(runtime: &mut AgentRuntime) -> anyhow::Result<Self> {
        Ok(Self::new(CorrelationAgent::spawn(runtime).await?))
    }

    /// Handle of the backing agent
    #[must_use]
    pub const fn handle(&self) -> &AgentHandle {
        &self.handle
    }
}

#[async_trait]
impl CorrelationStore for AgentCorrelationStore {
    async fn put(&self, entry: CorrelationEntry, ttl: Duration) -> Result<(), StoreError> {
        let ttl = validate_ttl(ttl)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::InvalidTtl(e.to_string()))?;
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| StoreError::InvalidTtl("TTL overflows the clock".to_string()))?;

        let (request, rx) = PutEntry::new(entry, expires_at);
        self.handle.send(request).await;

        if rx.await.map_err(|_| StoreError::Unavailable)? {
            Ok(())
        } else {
            Err(StoreError::DuplicateToken)
        }
    }

    async fn take(&self, correlation_token: &str) -> Result<Option<CorrelationEntry>, StoreError> {
        let (request, rx) = TakeEntry::new(correlation_token.to_string());
        self.handle.send(request).await;
        rx.await.map_err(|_| StoreError::Unavailable)
    }

    async fn delete(&self, correlation_token: &str) -> Result<(), StoreError> {
        self.handle
            .send(DeleteEntry::new(correlation_token.to_string()))
            .await;
        Ok(())
    }
}
