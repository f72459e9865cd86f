//! ## 日本語
//!
//! token レコードを読み書きするストアの抽象と、インメモリ実装です。
//!
//! ## English
//!
//! Token record store abstraction and its in-memory implementation.

use crate::models::{StoreError, TokenRecord};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// ## 日本語
///
/// token レコードを名前で取得・更新するストア。
///
/// `update` は楽観的排他制御を行います。渡されたレコードの `resource_version` が
/// 保存済みのものと異なる場合は [`StoreError::Conflict`] を返します。
///
/// ## English
///
/// Key-addressed get/update of token records.
///
/// `update` uses optimistic concurrency: when the record's `resource_version`
/// differs from the stored one it fails with [`StoreError::Conflict`].
/// Successful updates return the stored record with its new version.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<TokenRecord, StoreError>;

    async fn update(&self, record: &TokenRecord) -> Result<TokenRecord, StoreError>;
}

/// ## 日本語
///
/// インメモリの [`TokenStore`]。`Clone` は同じマップへのハンドルを増やすだけです。
///
/// ## English
///
/// In-memory [`TokenStore`]. `Clone` creates another handle to the same map.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    records: Arc<Mutex<HashMap<String, TokenRecord>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("token store mutex poisoned".into())
    }

    /// Stores `record` unconditionally as version 1 and returns the stored copy.
    pub fn insert(&self, mut record: TokenRecord) -> Result<TokenRecord, StoreError> {
        record.resource_version = 1;
        self.records
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(record.name.clone(), record.clone());
        Ok(record)
    }

    /// Deletes a token. Deleting a missing token is treated as success.
    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| Self::poisoned())?
            .remove(name);
        Ok(())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.lock().map_err(|_| Self::poisoned())?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, name: &str) -> Result<TokenRecord, StoreError> {
        self.records
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn update(&self, record: &TokenRecord) -> Result<TokenRecord, StoreError> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        let Some(current) = records.get_mut(&record.name) else {
            return Err(StoreError::NotFound(record.name.clone()));
        };
        if current.resource_version != record.resource_version {
            return Err(StoreError::Conflict(record.name.clone()));
        }

        let mut updated = record.clone();
        updated.resource_version = current.resource_version.saturating_add(1);
        *current = updated.clone();
        Ok(updated)
    }
}
