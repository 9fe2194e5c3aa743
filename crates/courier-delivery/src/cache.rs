//! Post-send metadata cache.
//!
//! After a successful send the dispatcher records `{messageId, sent_at}`
//! under `msg:{id}:meta` with an expiry. Writes are best effort: callers log
//! failures and carry on.

use std::{future::Future, pin::Pin, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use courier_core::MessageId;
use redis::{aio::MultiplexedConnection, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{DispatchError, Result};

/// Metadata recorded for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMeta {
    /// Identifier the provider assigned.
    #[serde(rename = "messageId")]
    pub message_id: String,
    /// RFC 3339 timestamp of the send.
    pub sent_at: String,
}

impl SentMeta {
    /// Builds metadata for a send accepted at `sent_at`.
    pub fn new(provider_message_id: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            message_id: provider_message_id.into(),
            sent_at: sent_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Cache key holding the metadata of message `id`.
pub fn sent_meta_key(id: MessageId) -> String {
    format!("msg:{id}:meta")
}

/// Best-effort store for post-send metadata.
pub trait MetadataCache: Send + Sync + 'static {
    /// Writes the metadata for `id`, replacing any previous value.
    fn set_sent_meta<'a>(
        &'a self,
        id: MessageId,
        meta: &'a SentMeta,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Configuration for the Redis metadata cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL.
    pub url: String,
    /// Expiry applied to every metadata key.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            ttl: Duration::from_secs(crate::DEFAULT_SENT_META_TTL_SECONDS),
        }
    }
}

/// Redis-backed metadata cache.
///
/// Connects on first use, so a Redis outage at startup only degrades cache
/// writes. A failed connection attempt is retried on the next write.
pub struct RedisMetadataCache {
    client: Client,
    connection: OnceCell<MultiplexedConnection>,
    ttl_seconds: u64,
}

impl RedisMetadataCache {
    /// Creates a cache for the given configuration without connecting.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the URL is malformed or the
    /// TTL is zero.
    pub fn new(config: CacheConfig) -> Result<Self> {
        if config.ttl.as_secs() == 0 {
            return Err(DispatchError::configuration("cache ttl must be at least one second"));
        }

        let client = Client::open(config.url.as_str())
            .map_err(|e| DispatchError::configuration(format!("invalid redis url: {e}")))?;

        Ok(Self { client, connection: OnceCell::new(), ttl_seconds: config.ttl.as_secs() })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                debug!("opening redis connection");
                self.client.get_multiplexed_async_connection().await
            })
            .await
            .map_err(|e| DispatchError::cache(format!("redis connection failed: {e}")))?;

        Ok(connection.clone())
    }

    async fn write(&self, id: MessageId, meta: &SentMeta) -> Result<()> {
        let payload = serde_json::to_string(meta)
            .map_err(|e| DispatchError::cache(format!("failed to encode metadata: {e}")))?;
        let mut connection = self.connection().await?;

        let _: () = redis::cmd("SET")
            .arg(sent_meta_key(id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut connection)
            .await
            .map_err(|e| DispatchError::cache(format!("redis write failed: {e}")))?;

        Ok(())
    }
}

impl MetadataCache for RedisMetadataCache {
    fn set_sent_meta<'a>(
        &'a self,
        id: MessageId,
        meta: &'a SentMeta,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.write(id, meta))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn key_follows_message_id() {
        let id = MessageId::new();
        assert_eq!(sent_meta_key(id), format!("msg:{id}:meta"));
    }

    #[test]
    fn meta_serializes_with_provider_field_names() {
        let sent_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let meta = SentMeta::new("prov-1", sent_at);

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"messageId": "prov-1", "sent_at": "2024-05-01T12:30:00Z"})
        );
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let result = RedisMetadataCache::new(CacheConfig {
            ttl: Duration::ZERO,
            ..CacheConfig::default()
        });
        assert!(matches!(result, Err(DispatchError::Configuration { .. })));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let result = RedisMetadataCache::new(CacheConfig {
            url: "not a url".to_string(),
            ..CacheConfig::default()
        });
        assert!(matches!(result, Err(DispatchError::Configuration { .. })));
    }

    #[tokio::test]
    async fn unreachable_redis_fails_the_write_only() {
        let cache = RedisMetadataCache::new(CacheConfig {
            url: "redis://127.0.0.1:1/0".to_string(),
            ..CacheConfig::default()
        })
        .unwrap();

        let meta = SentMeta::new("prov-1", Utc::now());
        let result = cache.set_sent_meta(MessageId::new(), &meta).await;
        assert!(matches!(result, Err(DispatchError::CacheWrite { .. })));
    }
}
