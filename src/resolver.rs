//! Client policy lookup and the effective inactivity timeout rule.

use crate::models::{ClientPolicy, RTokenError, StoreError};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// ## 日本語
///
/// クライアントポリシーのローカルな（結果整合の）リスター。呼び出しごとに
/// ネットワークへ問い合わせることは想定しません。
///
/// ## English
///
/// A local, eventually-consistent lister of client policies. Implementations
/// are expected to answer from a local cache, not a network round trip.
pub trait ClientLister: Send + Sync {
    fn get(&self, name: &str) -> Result<ClientPolicy, StoreError>;
}

/// In-memory [`ClientLister`]. `Clone` shares the same map.
#[derive(Clone, Default)]
pub struct MemoryClientLister {
    clients: Arc<RwLock<HashMap<String, ClientPolicy>>>,
}

impl MemoryClientLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a client policy.
    pub fn set(&self, policy: ClientPolicy) -> Result<(), StoreError> {
        self.clients
            .write()
            .map_err(|_| StoreError::Backend("client lister lock poisoned".into()))?
            .insert(policy.name.clone(), policy);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.clients
            .write()
            .map_err(|_| StoreError::Backend("client lister lock poisoned".into()))?
            .remove(name);
        Ok(())
    }
}

impl ClientLister for MemoryClientLister {
    fn get(&self, name: &str) -> Result<ClientPolicy, StoreError> {
        self.clients
            .read()
            .map_err(|_| StoreError::Backend("client lister lock poisoned".into()))?
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

/// ## 日本語
///
/// クライアント名から有効な非アクティブタイムアウト（秒、`0` は無期限）を求めます。
///
/// 規則：
/// 1. 上書き無し → クラスタのデフォルト
/// 2. 上書きが `0`（または負）→ 無期限
/// 3. 上書きが正 → `max(上書き, クラスタ最小値)`
///
/// ## English
///
/// Resolves the effective inactivity timeout (seconds, `0` = never) for a client.
///
/// Rules, in order:
/// 1. no override → cluster default
/// 2. override `0` (or negative) → never
/// 3. positive override → `max(override, cluster minimum)`
#[derive(Clone)]
pub struct ClientTimeoutResolver {
    lister: Arc<dyn ClientLister>,
    default_timeout_seconds: i64,
    minimum_timeout_seconds: i64,
}

impl ClientTimeoutResolver {
    pub fn new(
        lister: Arc<dyn ClientLister>,
        default_timeout_seconds: i64,
        minimum_timeout_seconds: i64,
    ) -> Self {
        Self {
            lister,
            default_timeout_seconds,
            minimum_timeout_seconds,
        }
    }

    pub fn resolve(&self, client_name: &str) -> Result<i64, RTokenError> {
        let policy = self
            .lister
            .get(client_name)
            .map_err(|err| RTokenError::PolicyResolution {
                client: client_name.to_string(),
                reason: err.to_string(),
            })?;

        Ok(match policy.access_token_inactivity_timeout_seconds {
            None => self.default_timeout_seconds.max(0),
            Some(timeout) if timeout <= 0 => 0,
            Some(timeout) => timeout.max(self.minimum_timeout_seconds),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(policies: Vec<ClientPolicy>) -> ClientTimeoutResolver {
        let lister = MemoryClientLister::new();
        for policy in policies {
            let _ = lister.set(policy);
        }
        ClientTimeoutResolver::new(Arc::new(lister), 30, 10)
    }

    #[test]
    fn missing_override_uses_default() {
        let resolver = resolver_with(vec![ClientPolicy::new("console", None)]);
        assert_eq!(resolver.resolve("console").ok(), Some(30));
    }

    #[test]
    fn zero_override_never_times_out() {
        let resolver = resolver_with(vec![ClientPolicy::new("cli", Some(0))]);
        assert_eq!(resolver.resolve("cli").ok(), Some(0));
    }

    #[test]
    fn small_override_is_clamped_to_minimum() {
        let resolver = resolver_with(vec![ClientPolicy::new("quick", Some(3))]);
        assert_eq!(resolver.resolve("quick").ok(), Some(10));
    }

    #[test]
    fn large_override_is_kept() {
        let resolver = resolver_with(vec![ClientPolicy::new("slow", Some(15))]);
        assert_eq!(resolver.resolve("slow").ok(), Some(15));
    }

    #[test]
    fn lister_failure_is_a_policy_error() {
        let resolver = resolver_with(Vec::new());
        let err = resolver.resolve("ghost").err();
        assert!(matches!(err, Some(RTokenError::PolicyResolution { .. })));
        assert!(!err.is_some_and(|err| err.is_timed_out()));
    }
}
