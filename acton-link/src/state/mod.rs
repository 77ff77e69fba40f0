//! Application state
//!
//! Ties configuration, the linking service, the event router and background
//! sweepers together for the HTTP handlers.

use acton_reactive::prelude::AgentRuntime;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::agents::{start_correlation_sweeper, start_link_state_sweeper, AgentCorrelationStore};
use crate::config::LinkConfig;
use crate::linking::{CorrelationStore, LinkingService, ProviderName};
use crate::oauth2::ProviderRegistry;
use crate::observability::ObservabilityConfig;
use crate::router::{ConversationSink, EventRouter};

/// Shared state for acton-link handlers
#[derive(Clone)]
pub struct LinkAppState {
    config: Arc<LinkConfig>,
    observability: Arc<ObservabilityConfig>,
    linking: LinkingService,
    router: EventRouter,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl LinkAppState {
    /// Build state with the correlation store the configuration asks for
    ///
    /// Uses Redis when `[redis]` is configured and the `redis` feature is
    /// enabled, otherwise an in-process correlation agent with its own
    /// expiry sweeper.
    ///
    /// # Errors
    ///
    /// Returns error if an agent cannot be spawned or Redis cannot be reached
    pub async fn new(
        runtime: &mut AgentRuntime,
        config: LinkConfig,
        providers: ProviderRegistry,
        sink: Arc<dyn ConversationSink>,
    ) -> anyhow::Result<Self> {
        #[cfg(feature = "redis")]
        {
            if let Some(redis) = &config.redis {
                let store = crate::linking::RedisCorrelationStore::connect(&redis.url)?;
                tracing::info!("Using Redis correlation store");
                return Self::with_store(runtime, config, providers, Arc::new(store), sink).await;
            }
        }

        #[cfg(not(feature = "redis"))]
        {
            if config.redis.is_some() {
                tracing::warn!("Redis configured but the redis feature is disabled; using in-process store");
            }
        }

        let store = AgentCorrelationStore::spawn(runtime).await?;
        let sweeper = start_correlation_sweeper(store.handle().clone(), config.linking.sweep_interval());

        let state = Self::with_store(runtime, config, providers, Arc::new(store), sink).await?;
        state.track(sweeper);
        Ok(state)
    }

    /// Build state around an existing correlation store
    ///
    /// # Errors
    ///
    /// Returns error if the link state agent cannot be spawned
    pub async fn with_store(
        runtime: &mut AgentRuntime,
        config: LinkConfig,
        providers: ProviderRegistry,
        store: Arc<dyn CorrelationStore>,
        sink: Arc<dyn ConversationSink>,
    ) -> anyhow::Result<Self> {
        let linking =
            LinkingService::spawn(runtime, providers, store, config.linking.clone()).await?;
        let sweeper =
            start_link_state_sweeper(linking.link_state().clone(), config.linking.sweep_interval());

        let default_provider = config
            .linking
            .default_provider
            .as_deref()
            .map(ProviderName::new);
        let router = EventRouter::new(linking.clone(), sink, default_provider);
        let observability = ObservabilityConfig::new(config.service.name.clone());

        let state = Self {
            config: Arc::new(config),
            observability: Arc::new(observability),
            linking,
            router,
            background: Arc::new(Mutex::new(Vec::new())),
        };
        state.track(sweeper);
        Ok(state)
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.background.lock() {
            tasks.push(task);
        }
    }

    /// Abort the expiry sweepers
    pub fn stop_background_tasks(&self) {
        if let Ok(mut tasks) = self.background.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Observability configuration
    #[must_use]
    pub fn observability(&self) -> &ObservabilityConfig {
        &self.observability
    }

    /// Linking service
    #[must_use]
    pub const fn linking(&self) -> &LinkingService {
        &self.linking
    }

    /// Event router
    #[must_use]
    pub const fn router(&self) -> &EventRouter {
        &self.router
    }
}
