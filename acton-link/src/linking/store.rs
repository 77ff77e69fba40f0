//! Correlation store
//!
//! Maps a correlation token (the OAuth `state` parameter) back to the
//! conversation that asked to sign in. Entries are single-use: `take` returns
//! an entry at most once, and removal happens in the same step as the read.
//! Entries also lapse on their own after their TTL.
//!
//! Two implementations ship with the crate:
//!
//! - [`AgentCorrelationStore`](crate::agents::AgentCorrelationStore): process
//!   local, backed by an actor with a background sweep
//! - [`RedisCorrelationStore`]: durable (requires the `redis` feature). Sign-in
//!   URLs survive a restart and can be completed by any instance sharing the
//!   server. Pending and verified tokens still live in the instance that
//!   completed the callback, so chat traffic for a conversation must keep
//!   reaching that instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::address::{ConversationAddress, ProviderName};

/// Generate an unguessable correlation token
///
/// 32 random bytes from the thread-local CSPRNG, hex encoded.
#[must_use]
pub fn generate_correlation_token() -> String {
    use rand::Rng;

    let random_bytes: [u8; 32] = rand::rng().random();
    hex::encode(random_bytes)
}

/// A sign-in request waiting for its provider callback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    /// Token embedded as the OAuth `state` parameter
    pub correlation_token: String,
    /// Conversation that started the sign-in
    pub conversation_address: ConversationAddress,
    /// Provider the user is signing in to
    pub provider: ProviderName,
    /// When the sign-in started
    pub created_at: DateTime<Utc>,
}

impl CorrelationEntry {
    /// Create an entry stamped with the current time
    #[must_use]
    pub fn new(
        correlation_token: String,
        conversation_address: ConversationAddress,
        provider: ProviderName,
    ) -> Self {
        Self {
            correlation_token,
            conversation_address,
            provider,
            created_at: Utc::now(),
        }
    }
}

/// Correlation store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// An entry with this token already exists
    #[error("Correlation token already in use")]
    DuplicateToken,

    /// TTL is zero or too large for the backend
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    /// The store's agent is gone
    #[error("Correlation store unavailable")]
    Unavailable,

    /// Backend command failed
    #[error("Correlation store backend error: {0}")]
    Backend(String),

    /// Entry could not be encoded or decoded
    #[error("Correlation entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Short-lived, single-use mapping of correlation token to conversation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Store an entry that lapses after `ttl`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateToken`] if the token is already stored,
    /// [`StoreError::InvalidTtl`] for a zero TTL, or a backend error.
    async fn put(&self, entry: CorrelationEntry, ttl: Duration) -> Result<(), StoreError>;

    /// Remove and return an entry; `None` if unknown, consumed or expired
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn take(&self, correlation_token: &str) -> Result<Option<CorrelationEntry>, StoreError>;

    /// Remove an entry if present
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn delete(&self, correlation_token: &str) -> Result<(), StoreError>;

    /// Whether entries outlive this process
    ///
    /// A durable store is the only record of a sign-in started elsewhere, so
    /// a callback whose entry it returns is trusted without a local record.
    fn is_durable(&self) -> bool {
        false
    }
}

pub(crate) fn validate_ttl(ttl: Duration) -> Result<Duration, StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl("TTL must be greater than zero".to_string()));
    }
    Ok(ttl)
}

#[cfg(feature = "redis")]
pub use redis_store::RedisCorrelationStore;

#[cfg(feature = "redis")]
mod redis_store {
    use super::{validate_ttl, CorrelationEntry, CorrelationStore, StoreError};
    use async_trait::async_trait;
    use deadpool_redis::{Config, Pool as RedisPool, Runtime};
    use std::time::Duration;
    use tracing::debug;

    /// Default key prefix for correlation entries
    const DEFAULT_PREFIX: &str = "acton-link:correlation:";

    /// Durable correlation store backed by Redis
    ///
    /// `put` uses `SET .. EX .. NX`, `take` uses `GETDEL`, so both single
    /// consumption and expiry are enforced by the server.
    #[derive(Clone)]
    pub struct RedisCorrelationStore {
        pool: RedisPool,
        prefix: String,
    }

    impl RedisCorrelationStore {
        /// Wrap an existing pool
        #[must_use]
        pub fn new(pool: RedisPool) -> Self {
            Self {
                pool,
                prefix: DEFAULT_PREFIX.to_string(),
            }
        }

        /// Create a pool for `url` and wrap it
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Backend`] if the pool cannot be created
        pub fn connect(url: &str) -> Result<Self, StoreError> {
            let pool = Config::from_url(url)
                .create_pool(Some(Runtime::Tokio1))
                .map_err(|e| StoreError::Backend(format!("Failed to create Redis pool: {e}")))?;
            Ok(Self::new(pool))
        }

        /// Use a different key prefix
        #[must_use]
        pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
            self.prefix = prefix.into();
            self
        }

        fn key(&self, correlation_token: &str) -> String {
            format!("{}{correlation_token}", self.prefix)
        }

        async fn connection(&self) -> Result<deadpool_redis::Connection, StoreError> {
            self.pool
                .get()
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to get Redis connection: {e}")))
        }
    }

    impl std::fmt::Debug for RedisCorrelationStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisCorrelationStore")
                .field("prefix", &self.prefix)
                .finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl CorrelationStore for RedisCorrelationStore {
        async fn put(&self, entry: CorrelationEntry, ttl: Duration) -> Result<(), StoreError> {
            let ttl = validate_ttl(ttl)?;
            let ttl_secs = ttl.as_secs().max(1);
            let value = serde_json::to_string(&entry)?;
            let mut conn = self.connection().await?;

            let stored: Option<String> = redis::cmd("SET")
                .arg(self.key(&entry.correlation_token))
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .arg("NX")
                .query_async(&mut *conn)
                .await
                .map_err(|e| StoreError::Backend(format!("Redis SET failed: {e}")))?;

            if stored.is_none() {
                return Err(StoreError::DuplicateToken);
            }

            debug!(
                correlation_token = %entry.correlation_token,
                provider = %entry.provider,
                ttl_secs = ttl_secs,
                "Stored correlation entry (Redis)"
            );
            Ok(())
        }

        async fn take(
            &self,
            correlation_token: &str,
        ) -> Result<Option<CorrelationEntry>, StoreError> {
            let mut conn = self.connection().await?;

            let value: Option<String> = redis::cmd("GETDEL")
                .arg(self.key(correlation_token))
                .query_async(&mut *conn)
                .await
                .map_err(|e| StoreError::Backend(format!("Redis GETDEL failed: {e}")))?;

            value
                .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
                .transpose()
        }

        async fn delete(&self, correlation_token: &str) -> Result<(), StoreError> {
            let mut conn = self.connection().await?;

            let _: i64 = redis::cmd("DEL")
                .arg(self.key(correlation_token))
                .query_async(&mut *conn)
                .await
                .map_err(|e| StoreError::Backend(format!("Redis DEL failed: {e}")))?;

            Ok(())
        }

        fn is_durable(&self) -> bool {
            true
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_keys_are_prefixed() {
            let store = RedisCorrelationStore::connect("redis://127.0.0.1:6379").unwrap();
            assert_eq!(store.key("abc"), "acton-link:correlation:abc");

            let store = store.with_prefix("bot:");
            assert_eq!(store.key("abc"), "bot:abc");
            assert!(store.is_durable());
        }

        #[tokio::test]
        async fn test_zero_ttl_rejected_before_connecting() {
            let store = RedisCorrelationStore::connect("redis://127.0.0.1:1").unwrap();
            let entry = CorrelationEntry::new(
                "t".to_string(),
                crate::linking::ConversationAddress::new("test", "u", "c"),
                crate::linking::ProviderName::new("p"),
            );

            let result = store.put(entry, Duration::ZERO).await;
            assert!(matches!(result, Err(StoreError::InvalidTtl(_))));
        }
    }
}
