//! Redis edge cache backend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::{Client, aio::ConnectionManager};
use tintbox_backend::{Backend, BackendError, BackendResult, DeleteStatus};
use tintbox_core::{BackendLabel, CacheEntry, CacheKey, Raw};
use tokio::sync::OnceCell;
use tracing::trace;

use crate::error::Error;
use crate::kv::RedisKvStore;

const FIELD_DATA: &str = "d";
const FIELD_CACHED_AT: &str = "c";
const FIELD_TTL: &str = "t";
const FIELD_SWR: &str = "s";

/// Client plus a connection manager created on first use.
#[derive(Clone)]
pub(crate) struct LazyConnection {
    client: Client,
    manager: OnceCell<ConnectionManager>,
}

impl LazyConnection {
    pub(crate) fn open(connection_info: String) -> Result<Self, Error> {
        Ok(Self {
            client: Client::open(connection_info)?,
            manager: OnceCell::new(),
        })
    }

    pub(crate) async fn get(&self) -> Result<ConnectionManager, Error> {
        trace!("Get connection manager");
        let manager = self
            .manager
            .get_or_try_init(|| {
                trace!("Initialize new redis connection manager");
                self.client.get_connection_manager()
            })
            .await?;
        Ok(manager.clone())
    }
}

/// Redis edge cache backend based on the redis-rs crate.
///
/// Each entry is a hash holding the payload and its freshness metadata. The
/// key is given a Redis TTL of `ttl + swr` seconds, after which Redis reaps it.
#[derive(Clone)]
pub struct RedisBackend {
    connection: LazyConnection,
    key_prefix: String,
    label: BackendLabel,
}

impl RedisBackend {
    /// Creates a backend connected to `redis://127.0.0.1/`.
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self::builder().build()?)
    }

    /// Creates a new builder with default settings.
    #[must_use]
    pub fn builder() -> RedisBackendBuilder {
        RedisBackendBuilder::default()
    }

    /// Returns a rate limit store sharing this backend's client.
    pub fn kv_store(&self) -> RedisKvStore {
        RedisKvStore::from_connection(self.connection.clone())
    }

    fn redis_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

/// Part of builder pattern implementation for [`RedisBackend`].
pub struct RedisBackendBuilder {
    connection_info: String,
    key_prefix: String,
    label: BackendLabel,
}

impl Default for RedisBackendBuilder {
    fn default() -> Self {
        Self {
            connection_info: "redis://127.0.0.1/".to_owned(),
            key_prefix: "tintbox:".to_owned(),
            label: BackendLabel::new_static("redis"),
        }
    }
}

impl RedisBackendBuilder {
    /// Set connection info (host, port, database, etc.).
    pub fn server(mut self, connection_info: impl Into<String>) -> Self {
        self.connection_info = connection_info.into();
        self
    }

    /// Set the prefix prepended to every cache key. Defaults to `tintbox:`.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the label used in logs and metrics.
    pub fn label(mut self, label: impl Into<BackendLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Create new instance of Redis backend with passed settings.
    pub fn build(self) -> Result<RedisBackend, Error> {
        Ok(RedisBackend {
            connection: LazyConnection::open(self.connection_info)?,
            key_prefix: self.key_prefix,
            label: self.label,
        })
    }
}

type EnvelopeFields = (Option<Vec<u8>>, Option<String>, Option<u64>, Option<u64>);

fn decode_envelope(fields: EnvelopeFields) -> Result<Option<CacheEntry<Raw>>, Error> {
    let (data, cached_at, ttl, swr) = fields;
    let Some(data) = data else {
        return Ok(None);
    };
    let (Some(cached_at), Some(ttl), Some(swr)) = (cached_at, ttl, swr) else {
        return Err(Error::Corrupt("cache entry without metadata".to_owned()));
    };
    let cached_at = DateTime::parse_from_rfc3339(&cached_at)
        .map_err(|error| Error::Corrupt(format!("cached_at `{cached_at}`: {error}")))?
        .with_timezone(&Utc);
    Ok(Some(CacheEntry::new(Bytes::from(data), cached_at, ttl, swr)))
}

fn encode_cached_at(cached_at: DateTime<Utc>) -> String {
    cached_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[async_trait]
impl Backend for RedisBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>> {
        let mut con = self.connection.get().await?;
        let fields: EnvelopeFields = redis::cmd("HMGET")
            .arg(self.redis_key(key))
            .arg(FIELD_DATA)
            .arg(FIELD_CACHED_AT)
            .arg(FIELD_TTL)
            .arg(FIELD_SWR)
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(decode_envelope(fields)?)
    }

    async fn write(&self, key: &CacheKey, entry: CacheEntry<Raw>) -> BackendResult<()> {
        let mut con = self.connection.get().await?;
        let redis_key = self.redis_key(key);

        // Replace the whole hash so no field of an older entry survives.
        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&redis_key)
            .ignore()
            .cmd("HSET")
            .arg(&redis_key)
            .arg(FIELD_DATA)
            .arg(entry.payload().as_ref())
            .arg(FIELD_CACHED_AT)
            .arg(encode_cached_at(entry.cached_at()))
            .arg(FIELD_TTL)
            .arg(entry.ttl())
            .arg(FIELD_SWR)
            .arg(entry.swr())
            .ignore()
            .cmd("EXPIRE")
            .arg(&redis_key)
            .arg(entry.physical_ttl().as_secs())
            .ignore()
            .query_async::<()>(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        let mut con = self.connection.get().await?;
        let deleted: u32 = redis::cmd("DEL")
            .arg(self.redis_key(key))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;

        if deleted > 0 {
            Ok(DeleteStatus::Deleted)
        } else {
            Ok(DeleteStatus::Missing)
        }
    }

    fn label(&self) -> BackendLabel {
        self.label.clone()
    }
}
