//! ## 日本語
//!
//! dirty なキャッシュエントリをストアへ書き戻す flush engine です。
//!
//! 2 つの入口があります：
//! - [`FlushEngine::flush`]：tick ごとの定期 flush
//! - [`FlushEngine::flush_one`]：validator から同期的に呼ばれる 1 件だけの緊急 flush
//!
//! どちらも同じ非同期 mutex を保持したまま実行されるため、ストアへの書き込みは
//! 常に 1 つの書き手に直列化されます。
//!
//! ## English
//!
//! Writes dirty cache entries back to the token store.
//!
//! Two entry points:
//! - [`FlushEngine::flush`]: the scheduled flush run on every tick
//! - [`FlushEngine::flush_one`]: the single-entry emergency flush requested by the validator
//!
//! Both hold the same async mutex for their whole duration, so store writes
//! always go through a single writer.

use crate::cache::{CacheEntry, DeadlineCache};
use crate::clock::Clock;
use crate::deadline::saturating_add;
use crate::hooks::TimeoutObserver;
use crate::models::{RTokenError, StoreError};
use crate::store::TokenStore;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counts from one scheduled flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub horizon: DateTime<Utc>,
    /// Dirty entries due before the horizon.
    pub candidates: usize,
    /// Dirty entries whose persisted deadline is still past the horizon.
    pub deferred: usize,
    pub written: usize,
    /// The store already held the value, so no write was issued.
    pub unchanged: usize,
    /// Writes that failed; the entries stay dirty for the next tick.
    pub failed: usize,
    /// Tokens that no longer exist in the store.
    pub missing: usize,
    /// Expired entries removed after the flush.
    pub evicted: usize,
}

impl FlushReport {
    fn new(horizon: DateTime<Utc>) -> Self {
        Self {
            horizon,
            candidates: 0,
            deferred: 0,
            written: 0,
            unchanged: 0,
            failed: 0,
            missing: 0,
            evicted: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persisted {
    Written,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abandoned {
    /// The token is gone from the store; its entry was evicted.
    Missing,
    /// The entry is dirty again for the next tick.
    Failed,
}

/// ## 日本語
///
/// 延長された期限をストアへ書き戻すエンジン。
///
/// [`FlushEngine::run`] がバックグラウンドで tick ごとに [`FlushEngine::flush`] を呼び、
/// validator は次回 tick までに期限が切れそうな token について
/// [`FlushEngine::flush_one`] を直接呼びます。
///
/// ## English
///
/// Persists extended deadlines to the token store.
///
/// [`FlushEngine::run`] calls [`FlushEngine::flush`] on every tick, and the
/// validator calls [`FlushEngine::flush_one`] directly for tokens whose
/// deadline falls before the next tick plus the safety margin.
pub struct FlushEngine {
    cache: DeadlineCache,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn TimeoutObserver>,
    tick_interval: Duration,
    safety_margin: Duration,
    writer: tokio::sync::Mutex<()>,
    next_tick: Mutex<Option<DateTime<Utc>>>,
}

impl FlushEngine {
    pub fn new(
        cache: DeadlineCache,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn TimeoutObserver>,
        tick_interval: Duration,
        safety_margin: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            clock,
            observer,
            tick_interval,
            safety_margin,
            writer: tokio::sync::Mutex::new(()),
            next_tick: Mutex::new(None),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// ## 日本語
    ///
    /// 次回の定期 flush 時刻に安全マージンを足した時刻を返します。
    ///
    /// ループがまだ次回 tick を予約していない、または予約時刻を過ぎている場合は
    /// `now + tick_interval` を次回 tick とみなします。
    ///
    /// ## English
    ///
    /// The next scheduled flush time plus the safety margin.
    ///
    /// When the loop has not scheduled a tick yet, or is running behind, the
    /// next tick is assumed to be `now + tick_interval`.
    pub fn flush_horizon(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let scheduled = self
            .next_tick
            .lock()
            .map(|next_tick| *next_tick)
            .unwrap_or(None);
        let next_tick = match scheduled {
            Some(at) if at > now => at,
            _ => saturating_add(now, self.tick_interval),
        };
        saturating_add(next_tick, self.safety_margin)
    }

    fn schedule_next_tick(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let next_tick = saturating_add(from, self.tick_interval);
        if let Ok(mut scheduled) = self.next_tick.lock() {
            *scheduled = Some(next_tick);
        }
        next_tick
    }

    /// ## 日本語
    ///
    /// dirty なエントリのうち、永続化済みの期限が `horizon` より前に切れるものを
    /// ストアへ書き戻します。まだ安全なものは dirty のまま次回 tick に回します。
    ///
    /// - 競合・タイムアウトで失敗したものは同じ flush の最後に 1 回だけ再試行
    /// - それでも失敗したものは dirty に戻し、次回 tick で再試行
    /// - ストアから消えた token はキャッシュからも削除
    /// - 最後に期限切れのエントリを削除
    ///
    /// 書き込み失敗は呼び出し側に返さず、ログに残すだけです。
    ///
    /// ## English
    ///
    /// Writes back the dirty entries whose persisted deadline would pass before
    /// `horizon`. Entries whose persisted deadline is still safe stay dirty, so
    /// an active token costs one write per timeout window rather than per tick.
    ///
    /// - conflicts and server timeouts are retried once at the end of the same flush
    /// - anything still failing is marked dirty again for the next tick
    /// - tokens deleted from the store are evicted from the cache
    /// - entries whose deadline has passed are evicted afterwards
    ///
    /// Write failures are logged, never returned.
    pub async fn flush(&self, horizon: DateTime<Utc>) -> FlushReport {
        let _writer = self.writer.lock().await;
        let mut report = FlushReport::new(horizon);
        debug!(%horizon, "flushing token inactivity timeouts");

        let snapshot = match self.cache.snapshot_due(horizon) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "could not read dirty deadlines");
                self.observer.on_flush(&report);
                return report;
            }
        };
        report.candidates = snapshot.due.len();
        report.deferred = snapshot.deferred;

        let mut retry = Vec::new();
        for (name, entry) in snapshot.due {
            match self.persist(&name, &entry).await {
                Ok(persisted) => Self::count(&mut report, persisted),
                Err(err) if err.is_retryable() => {
                    debug!(error = %err, "token timeout update deferred");
                    retry.push((name, entry));
                }
                Err(err) => Self::tally(&mut report, self.give_up(&name, &err)),
            }
        }

        for (name, entry) in retry {
            match self.persist(&name, &entry).await {
                Ok(persisted) => Self::count(&mut report, persisted),
                Err(err) => Self::tally(&mut report, self.give_up(&name, &err)),
            }
        }

        match self.cache.evict_expired(self.clock.now()) {
            Ok(evicted) => report.evicted = evicted,
            Err(err) => warn!(error = %err, "could not evict expired deadlines"),
        }

        debug!(
            written = report.written,
            unchanged = report.unchanged,
            failed = report.failed,
            deferred = report.deferred,
            candidates = report.candidates,
            "flushed token inactivity timeouts"
        );
        self.observer.on_flush(&report);
        report
    }

    /// ## 日本語
    ///
    /// 1 件のエントリだけを即座に書き戻します（緊急 flush）。
    ///
    /// 返り値：
    /// - 書き込みを行った：`Ok(true)`
    /// - エントリが無い、clean、またはストアが既に同じ値：`Ok(false)`
    /// - 書き込み失敗：`Err`（エントリは dirty に戻り、次回 tick で再試行）
    ///
    /// ## English
    ///
    /// Persists a single entry right away (emergency flush).
    ///
    /// Returns:
    /// - `Ok(true)` when a write was issued
    /// - `Ok(false)` when the entry is missing, clean, or already persisted
    /// - `Err` when the write failed; the entry is dirty again for the next tick
    pub async fn flush_one(&self, name: &str) -> Result<bool, RTokenError> {
        let _writer = self.writer.lock().await;
        let Some(entry) = self.cache.take_dirty(name)? else {
            self.observer.on_emergency_flush(name, false);
            return Ok(false);
        };

        let mut result = self.persist(name, &entry).await;
        if let Err(err) = &result
            && err.is_retryable()
        {
            result = self.persist(name, &entry).await;
        }

        match result {
            Ok(persisted) => {
                let written = persisted == Persisted::Written;
                self.observer.on_emergency_flush(name, written);
                Ok(written)
            }
            Err(err) => {
                self.give_up(name, &err);
                self.observer.on_emergency_flush(name, false);
                Err(err.into())
            }
        }
    }

    async fn persist(&self, name: &str, entry: &CacheEntry) -> Result<Persisted, StoreError> {
        let seconds = entry.seconds_to_persist();
        let mut record = self.store.get(name).await?;
        if record.inactivity_timeout_seconds == seconds {
            self.record_persisted(name, entry);
            return Ok(Persisted::Unchanged);
        }

        record.inactivity_timeout_seconds = seconds;
        let record = self.store.update(&record).await?;
        self.record_persisted(name, entry);
        // Token names are credentials; log the owner only.
        debug!(
            user = %record.user_name,
            client = %record.client_name,
            inactivity_timeout_seconds = seconds,
            "persisted token inactivity timeout"
        );
        Ok(Persisted::Written)
    }

    fn record_persisted(&self, name: &str, entry: &CacheEntry) {
        if let Err(err) = self.cache.mark_persisted(name, entry.persist_target()) {
            warn!(error = %err, "could not record persisted deadline");
        }
    }

    fn count(report: &mut FlushReport, persisted: Persisted) {
        match persisted {
            Persisted::Written => report.written += 1,
            Persisted::Unchanged => report.unchanged += 1,
        }
    }

    fn tally(report: &mut FlushReport, abandoned: Abandoned) {
        match abandoned {
            Abandoned::Missing => report.missing += 1,
            Abandoned::Failed => report.failed += 1,
        }
    }

    fn give_up(&self, name: &str, err: &StoreError) -> Abandoned {
        if err.is_not_found() {
            if let Err(err) = self.cache.evict(name) {
                warn!(error = %err, "could not evict deleted token");
            }
            return Abandoned::Missing;
        }

        warn!(error = %err, "token inactivity timeout was not updated, retrying on next tick");
        if let Err(err) = self.cache.mark_dirty(name) {
            warn!(error = %err, "could not mark deadline dirty");
        }
        Abandoned::Failed
    }

    /// ## 日本語
    ///
    /// 定期 flush ループを実行します。`shutdown` がキャンセルされると戻ります。
    ///
    /// 実行中の緊急 flush は呼び出し側のタスクで動くため、停止の影響を受けずに完了します。
    ///
    /// ## English
    ///
    /// Runs the scheduled flush loop until `shutdown` is cancelled.
    ///
    /// Emergency flushes run on their callers' tasks and are allowed to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_interval = ?self.tick_interval,
            safety_margin = ?self.safety_margin,
            "started token timeout flush loop"
        );
        let mut ticker = self.clock.ticker(self.tick_interval);
        self.schedule_next_tick(self.clock.now());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fired_at = ticker.tick() => {
                    let next_tick = self.schedule_next_tick(fired_at);
                    self.flush(saturating_add(next_tick, self.safety_margin)).await;
                }
            }
        }

        info!("stopped token timeout flush loop");
    }
}
