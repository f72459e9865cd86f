use crate::cache::{CacheEntry, DeadlineCache};
use crate::chain::TokenValidator;
use crate::clock::Clock;
use crate::config::TimeoutConfig;
use crate::flush::FlushEngine;
use crate::hooks::{NoopObserver, TimeoutObserver};
use crate::models::{RTokenError, TokenRecord, UserRecord};
use crate::resolver::{ClientLister, ClientTimeoutResolver};
use crate::store::TokenStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// ## 日本語
///
/// token の非アクティブタイムアウトを検証し、使用のたびに期限を延長します。
///
/// 延長した期限はまずメモリ上の [`DeadlineCache`] に書かれ、ストアへの書き込みは
/// [`FlushEngine`] がまとめて行います。次回の定期 flush までに期限が切れる恐れが
/// ある場合だけ、検証の中で同期的に緊急 flush を要求します。
///
/// ## English
///
/// Enforces the inactivity timeout of tokens and extends it on every use.
///
/// Extended deadlines go to the in-memory [`DeadlineCache`] first; store
/// writes are batched by the [`FlushEngine`]. Only when a deadline could pass
/// before the next scheduled flush does validation synchronously request an
/// emergency flush.
///
/// The background loop must be started explicitly with
/// [`TimeoutValidator::run`]:
///
/// ```no_run
/// use std::sync::Arc;
/// use r_token_idle::{
///     MemoryClientLister, MemoryTokenStore, SystemClock, TimeoutConfig, TimeoutValidator,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> Result<(), r_token_idle::RTokenError> {
/// let validator = Arc::new(TimeoutValidator::new(
///     &TimeoutConfig::new(600, 300),
///     Arc::new(MemoryTokenStore::new()),
///     Arc::new(MemoryClientLister::new()),
///     Arc::new(SystemClock),
/// )?);
///
/// let shutdown = CancellationToken::new();
/// let background = Arc::clone(&validator);
/// let child = shutdown.child_token();
/// tokio::spawn(async move { background.run(child).await });
/// # Ok(())
/// # }
/// ```
pub struct TimeoutValidator {
    cache: DeadlineCache,
    resolver: ClientTimeoutResolver,
    engine: Arc<FlushEngine>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn TimeoutObserver>,
}

impl TimeoutValidator {
    pub fn new(
        config: &TimeoutConfig,
        store: Arc<dyn TokenStore>,
        lister: Arc<dyn ClientLister>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RTokenError> {
        Self::with_observer(config, store, lister, clock, Arc::new(NoopObserver))
    }

    /// Like [`TimeoutValidator::new`], reporting cache writes and flushes to `observer`.
    pub fn with_observer(
        config: &TimeoutConfig,
        store: Arc<dyn TokenStore>,
        lister: Arc<dyn ClientLister>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn TimeoutObserver>,
    ) -> Result<Self, RTokenError> {
        config.validate()?;

        let cache = DeadlineCache::new();
        let resolver = ClientTimeoutResolver::new(
            lister,
            config.default_timeout_seconds,
            config.minimum_timeout_seconds,
        );
        let engine = Arc::new(FlushEngine::new(
            cache.clone(),
            store,
            Arc::clone(&clock),
            Arc::clone(&observer),
            config.tick_interval(),
            config.safety_margin(),
        ));

        Ok(Self {
            cache,
            resolver,
            engine,
            clock,
            observer,
        })
    }

    pub fn cache(&self) -> &DeadlineCache {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<FlushEngine> {
        &self.engine
    }

    /// ## 日本語
    ///
    /// token を検証します。
    ///
    /// 振る舞い：
    /// - 期限内：期限を `now + 有効タイムアウト` に延長して `Ok(())`
    /// - 期限切れ：キャッシュから削除して [`RTokenError::TimedOut`]
    /// - クライアントポリシーの取得失敗：[`RTokenError::PolicyResolution`]（キャッシュは更新しない）
    ///
    /// 緊急 flush の失敗は返さず、ログに残すだけです。
    ///
    /// ## English
    ///
    /// Validates a token.
    ///
    /// Behavior:
    /// - within its deadline: extends the deadline to `now + effective timeout`, returns `Ok(())`
    /// - past its deadline: evicts it and returns [`RTokenError::TimedOut`]
    /// - client policy lookup failure: [`RTokenError::PolicyResolution`], cache untouched
    ///
    /// A failed emergency flush is logged, never returned: the token stays valid
    /// in memory either way.
    pub async fn validate(&self, token: &TokenRecord, _user: &UserRecord) -> Result<(), RTokenError> {
        let now = self.clock.now();

        let (current, persisted) = match self.cache.get(&token.name)? {
            Some(entry) => (entry.extended_deadline, entry.persisted_deadline),
            None => {
                let baseline = token.persisted_deadline();
                if !baseline.has_passed(now) && token.outlived_by_inactivity() {
                    // Absolute expiry comes first; nothing to extend.
                    return Ok(());
                }
                (baseline, baseline)
            }
        };

        if current.has_passed(now) {
            self.cache.evict(&token.name)?;
            debug!(user = %token.user_name, client = %token.client_name, "token timed out");
            return Err(RTokenError::TimedOut);
        }

        let effective = self.resolver.resolve(&token.client_name)?;
        let entry = CacheEntry::new(now, effective, token.creation_timestamp, persisted);
        let deadline = entry.extended_deadline;
        if !self.cache.extend(&token.name, entry.clone())? {
            // A concurrent validation with a later clock reading already extended it.
            return Ok(());
        }
        self.observer.on_cache_put(&token.name, &entry);

        let horizon = self.engine.flush_horizon();
        if deadline.is_before(horizon) {
            debug!(
                user = %token.user_name,
                client = %token.client_name,
                %horizon,
                "token timeout falls before next flush, forcing flush"
            );
            if let Err(err) = self.engine.flush_one(&token.name).await {
                warn!(
                    user = %token.user_name,
                    client = %token.client_name,
                    error = %err,
                    "emergency flush failed"
                );
            }
        }

        Ok(())
    }

    /// Runs the background flush loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.engine.run(shutdown).await;
    }
}

#[async_trait]
impl TokenValidator for TimeoutValidator {
    async fn validate(&self, token: &TokenRecord, user: &UserRecord) -> Result<(), RTokenError> {
        TimeoutValidator::validate(self, token, user).await
    }
}
