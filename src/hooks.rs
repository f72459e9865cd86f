//! Observation hooks on the cache-write and flush paths.
//!
//! Every method has an empty default, so an observer only implements the
//! events it cares about. Hooks run inline on the calling task and must not
//! block.

use crate::cache::CacheEntry;
use crate::flush::FlushReport;

/// ## 日本語
///
/// キャッシュ書き込みと flush を観測するためのフック。テストで
/// 「バックグラウンドの処理が終わるまで待つ」用途に使います。
///
/// ## English
///
/// Callbacks fired by the validator and the flush engine. Tests use them to
/// wait for background effects instead of sleeping.
pub trait TimeoutObserver: Send + Sync {
    /// A validation wrote a new deadline into the cache.
    fn on_cache_put(&self, _name: &str, _entry: &CacheEntry) {}

    /// An emergency flush finished. `written` is `true` when a store write
    /// happened.
    fn on_emergency_flush(&self, _name: &str, _written: bool) {}

    /// A scheduled flush finished.
    fn on_flush(&self, _report: &FlushReport) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TimeoutObserver for NoopObserver {}
