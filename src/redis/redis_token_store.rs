//! ## 日本語
//!
//! Redis/Valkey に token レコードを JSON で保存する [`crate::TokenStore`] 実装です。
//!
//! 更新は Lua スクリプトで `resource_version` を比較してから書き込むため、
//! 複数プロセスから同じ token を更新しても後勝ちで上書きされることはありません。
//!
//! ## English
//!
//! A [`crate::TokenStore`] that keeps token records as JSON in Redis/Valkey.
//!
//! Updates run as a Lua script that compares `resource_version` before writing,
//! so concurrent writers from several processes get a conflict instead of a
//! lost update.

use crate::models::{StoreError, TokenRecord};
use crate::store::TokenStore;
use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::Mutex;

const UPDATE_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if not cur then
  return -1
end

local stored = cjson.decode(cur)
if tonumber(stored['resource_version']) ~= tonumber(ARGV[1]) then
  return 0
end

redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
return 1
"#;

/// ## 日本語
///
/// Redis/Valkey をバックエンドにした token ストア。
///
/// key は `prefix + token 名`、value は JSON エンコードされた [`TokenRecord`] です。
/// 絶対有効期限を持つ token は、その時刻に Redis の TTL で削除されます。
///
/// ## English
///
/// A token store backed by Redis/Valkey.
///
/// Records are stored under `prefix + token name` as JSON-encoded
/// [`TokenRecord`] values. Tokens with an absolute lifetime get a Redis TTL so
/// they disappear when they expire.
#[derive(Clone)]
pub struct RedisTokenStore {
    // Always ends with ':'.
    prefix: String,
    connections: Arc<Vec<Mutex<redis::aio::ConnectionManager>>>,
    next_index: Arc<AtomicUsize>,
    update_script: Arc<Script>,
}

fn normalize_prefix(prefix: impl Into<String>) -> String {
    let mut prefix = prefix.into();
    if !prefix.ends_with(':') {
        prefix.push(':');
    }
    prefix
}

fn encode(record: &TokenRecord) -> Result<String, StoreError> {
    serde_json::to_string(record)
        .map_err(|e| StoreError::Backend(format!("serialize token record: {e}")))
}

fn decode(value: &str) -> Result<TokenRecord, StoreError> {
    serde_json::from_str(value)
        .map_err(|e| StoreError::Backend(format!("deserialize token record: {e}")))
}

impl RedisTokenStore {
    /// ## 日本語
    ///
    /// 既存の非同期接続マネージャからストアを作成します。`prefix` は常に `:` で終わるよう
    /// 正規化されます。
    ///
    /// ## English
    ///
    /// Creates a store from an existing async connection manager. The `prefix`
    /// is normalized to always end with `:`.
    pub fn new(prefix: impl Into<String>, connection: redis::aio::ConnectionManager) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
            connections: Arc::new(vec![Mutex::new(connection)]),
            next_index: Arc::new(AtomicUsize::new(0)),
            update_script: Arc::new(Script::new(UPDATE_SCRIPT)),
        }
    }

    /// ## 日本語
    ///
    /// `redis_url` に接続し、4 本の接続を持つストアを作成します。
    ///
    /// ## English
    ///
    /// Connects to `redis_url` and opens a pool of four connections, e.g.
    /// `redis://127.0.0.1/` or `redis://:password@127.0.0.1/0`.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;

        let mut connections = Vec::with_capacity(4);
        for _ in 0..4 {
            connections.push(Mutex::new(client.get_connection_manager().await?));
        }
        Ok(Self {
            prefix: normalize_prefix(prefix),
            connections: Arc::new(connections),
            next_index: Arc::new(AtomicUsize::new(0)),
            update_script: Arc::new(Script::new(UPDATE_SCRIPT)),
        })
    }

    /// Locks and returns the next connection from the pool.
    async fn lock_connection(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, redis::aio::ConnectionManager>, StoreError> {
        let len = self.connections.len();
        if len == 0 {
            return Err(StoreError::Backend("no redis connections".into()));
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed) % len;
        match self.connections.get(index) {
            Some(conn) => Ok(conn.lock().await),
            None => Err(StoreError::Backend("no redis connections".into())),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// ## 日本語
    ///
    /// レコードを無条件に保存します（`resource_version` は 1 になります）。
    /// 絶対有効期限を既に過ぎたレコードは保存せず、エラーを返します。
    ///
    /// ## English
    ///
    /// Stores `record` unconditionally as version 1. Tokens with an absolute
    /// lifetime get a TTL matching their remaining lifetime; a record whose
    /// lifetime has already run out is rejected with [`StoreError::Backend`].
    pub async fn insert(&self, mut record: TokenRecord) -> Result<TokenRecord, StoreError> {
        record.resource_version = 1;
        let key = self.key(&record.name);
        let value = encode(&record)?;
        let ttl = match record.expires_at() {
            Some(expires_at) => match (expires_at - chrono::Utc::now()).num_seconds() {
                seconds if seconds > 0 => Some(seconds.unsigned_abs()),
                _ => {
                    return Err(StoreError::Backend(
                        "token record has already expired".into(),
                    ));
                }
            },
            None => None,
        };

        let mut connection = self.lock_connection().await?;
        match ttl {
            Some(seconds) => {
                let _: () = connection.set_ex(key, value, seconds).await?;
            }
            None => {
                let _: () = connection.set(key, value).await?;
            }
        }
        Ok(record)
    }

    /// Deletes a token. Deleting a missing token is treated as success.
    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let key = self.key(name);
        let mut connection = self.lock_connection().await?;
        let _: i64 = connection.del(key).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, name: &str) -> Result<TokenRecord, StoreError> {
        let key = self.key(name);
        let mut connection = self.lock_connection().await?;
        let value: Option<String> = connection.get(key).await?;
        let Some(value) = value else {
            return Err(StoreError::NotFound(name.to_string()));
        };
        decode(&value)
    }

    async fn update(&self, record: &TokenRecord) -> Result<TokenRecord, StoreError> {
        let key = self.key(&record.name);
        let mut updated = record.clone();
        updated.resource_version = record.resource_version.saturating_add(1);
        let value = encode(&updated)?;

        let mut connection = self.lock_connection().await?;
        let outcome: i64 = self
            .update_script
            .key(&key)
            .arg(record.resource_version)
            .arg(&value)
            .invoke_async(&mut *connection)
            .await?;

        match outcome {
            1 => Ok(updated),
            0 => Err(StoreError::Conflict(record.name.clone())),
            _ => Err(StoreError::NotFound(record.name.clone())),
        }
    }
}
