//! Redis-backed [`KvStore`] for the distributed rate limiter.
//!
//! Each record is a hash: `n` count, `w` window start and `e` window end (both
//! epoch milliseconds) and `v` version. The conditional write runs as one Lua
//! script, so the version check and the update are atomic on the server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use tintbox_ratelimit::{KvError, KvStore, Versioned, WindowRecord, WriteOutcome};
use tracing::trace;

use crate::backend::LazyConnection;
use crate::error::Error;

/// Compare-and-set on the `v` field.
///
/// `ARGV[1]` is the expected version (empty for "no record"). A new record
/// starts at its window start in milliseconds, so a key that is reaped and
/// recreated does not reuse an old version. Returns the new version, or -1 on
/// a conflict.
const COMPARE_AND_SET: &str = r"
local current = redis.call('HGET', KEYS[1], 'v')
if ARGV[1] == '' then
  if current then return -1 end
  redis.call('HSET', KEYS[1], 'v', ARGV[3])
elseif current ~= ARGV[1] then
  return -1
end
redis.call('HSET', KEYS[1], 'n', ARGV[2], 'w', ARGV[3], 'e', ARGV[4])
redis.call('PEXPIREAT', KEYS[1], ARGV[4])
if ARGV[1] == '' then
  return tonumber(ARGV[3])
end
return redis.call('HINCRBY', KEYS[1], 'v', 1)
";

/// Rate limit store on Redis.
///
/// Build one with [`RedisKvStore::builder`] or share a cache backend's client
/// through [`RedisBackend::kv_store`](crate::RedisBackend::kv_store).
#[derive(Clone)]
pub struct RedisKvStore {
    connection: LazyConnection,
    script: Script,
}

impl RedisKvStore {
    /// Creates a builder connecting to `redis://127.0.0.1/` by default.
    pub fn builder() -> RedisKvStoreBuilder {
        RedisKvStoreBuilder {
            connection_info: "redis://127.0.0.1/".to_owned(),
        }
    }

    pub(crate) fn from_connection(connection: LazyConnection) -> Self {
        Self {
            connection,
            script: Script::new(COMPARE_AND_SET),
        }
    }
}

/// Builder for [`RedisKvStore`].
pub struct RedisKvStoreBuilder {
    connection_info: String,
}

impl RedisKvStoreBuilder {
    /// Set connection info (host, port, database, etc.).
    pub fn server(mut self, connection_info: impl Into<String>) -> Self {
        self.connection_info = connection_info.into();
        self
    }

    /// Creates the store. The connection is established on first use.
    pub fn build(self) -> Result<RedisKvStore, Error> {
        Ok(RedisKvStore::from_connection(LazyConnection::open(
            self.connection_info,
        )?))
    }
}

type RecordFields = (Option<u64>, Option<i64>, Option<i64>, Option<u64>);

fn millis(value: i64, field: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| Error::Corrupt(format!("{field} `{value}` out of range")))
}

fn decode_record(fields: RecordFields) -> Result<Option<Versioned<WindowRecord>>, Error> {
    let (count, window_start, expires_at, version) = fields;
    let Some(version) = version else {
        return Ok(None);
    };
    let (Some(count), Some(window_start), Some(expires_at)) = (count, window_start, expires_at)
    else {
        return Err(Error::Corrupt("rate limit record without window".to_owned()));
    };
    Ok(Some(Versioned {
        value: WindowRecord {
            count,
            window_start: millis(window_start, "window_start")?,
            expires_at: millis(expires_at, "expires_at")?,
        },
        version,
    }))
}

fn write_outcome(reply: i64) -> WriteOutcome {
    match u64::try_from(reply) {
        Ok(version) => WriteOutcome::Applied { version },
        Err(_) => WriteOutcome::Conflict,
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn read(&self, key: &str) -> Result<Option<Versioned<WindowRecord>>, KvError> {
        let mut con = self.connection.get().await?;
        let fields: RecordFields = redis::cmd("HMGET")
            .arg(key)
            .arg("n")
            .arg("w")
            .arg("e")
            .arg("v")
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(decode_record(fields)?)
    }

    async fn write_if_version(
        &self,
        key: &str,
        record: &WindowRecord,
        expected: Option<u64>,
    ) -> Result<WriteOutcome, KvError> {
        let mut con = self.connection.get().await?;
        let expected = expected.map(|v| v.to_string()).unwrap_or_default();
        let reply: i64 = self
            .script
            .key(key)
            .arg(&expected)
            .arg(record.count)
            .arg(record.window_start.timestamp_millis())
            .arg(record.expires_at.timestamp_millis())
            .invoke_async(&mut con)
            .await
            .map_err(Error::from)?;
        let outcome = write_outcome(reply);
        trace!(key, ?outcome, "compare-and-set");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_record() {
        let record = decode_record((Some(3), Some(1_000), Some(61_000), Some(7)))
            .unwrap()
            .unwrap();
        assert_eq!(record.version, 7);
        assert_eq!(record.value.count, 3);
        assert_eq!(record.value.window_start.timestamp_millis(), 1_000);
        assert_eq!(record.value.expires_at.timestamp_millis(), 61_000);
    }

    #[test]
    fn test_absent_and_corrupt_records() {
        assert!(decode_record((None, None, None, None)).unwrap().is_none());
        assert!(matches!(
            decode_record((None, Some(1), Some(2), Some(1))),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_script_reply_mapping() {
        assert_eq!(write_outcome(-1), WriteOutcome::Conflict);
        assert_eq!(write_outcome(42), WriteOutcome::Applied { version: 42 });
    }
}
