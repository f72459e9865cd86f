#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::empty_loop)]
#![deny(clippy::indexing_slicing)]
#![deny(unused)]
//! # r-token-idle
//!
//! Inactivity timeouts for bearer tokens, with a write-back cache of extended
//! deadlines.
//!
//! A token stops being usable once it has not been used for a configurable
//! period, and every successful use pushes that deadline forward. Writing the
//! new deadline to the token record on every request would cost one store
//! write per request, so this crate keeps extended deadlines in memory and
//! flushes them in batches.
//!
//! The main building blocks:
//! - [`TimeoutValidator`]: accepts or rejects a token and extends its deadline.
//! - [`FlushEngine`]: persists extended deadlines on a ticker, plus an emergency
//!   path for tokens that would expire before the next tick.
//! - [`DeadlineCache`]: the in-memory map of extended deadlines.
//! - [`ClientTimeoutResolver`]: turns a client's policy into an effective timeout.
//! - [`ValidatorChain`]: runs the timeout check next to [`ExpirationValidator`]
//!   and [`UidValidator`].
//!
//! ## How validation works
//!
//! 1. The caller fetches the token and user records and calls
//!    [`TimeoutValidator::validate`].
//! 2. The current deadline is the cached one, or, for a token this process has
//!    not seen yet, the one implied by the persisted record.
//! 3. A token past its deadline is rejected with [`RTokenError::TimedOut`].
//! 4. Otherwise the deadline becomes `now + effective timeout` and the entry is
//!    marked dirty. If that deadline falls before the next flush plus a safety
//!    margin, the entry is flushed before returning.
//! 5. [`TimeoutValidator::run`] flushes dirty entries on every tick.
//!
//! ## 日本語
//!
//! bearer token の非アクティブタイムアウトを、延長済み期限の write-back キャッシュで
//! 実装するライブラリです。
//!
//! token は一定時間使われないと無効になり、使われるたびに期限が延長されます。
//! 毎回レコードを書き換えるとリクエストごとにストアへの書き込みが発生するため、
//! 延長した期限はメモリ上に保持し、まとめて flush します。
//!
//! 1. 呼び出し側が token とユーザーのレコードを取得し、[`TimeoutValidator::validate`] を呼ぶ。
//! 2. 現在の期限はキャッシュの値、未知の token ならレコードから求めた値。
//! 3. 期限切れなら [`RTokenError::TimedOut`] で拒否。
//! 4. 期限内なら `now + 有効タイムアウト` に延長し dirty にする。次回 flush + 安全マージン
//!    より前に切れる場合は、戻る前に flush する。
//! 5. [`TimeoutValidator::run`] が tick ごとに dirty なエントリを flush する。

mod cache;
mod chain;
mod clock;
mod config;
mod deadline;
mod flush;
mod hooks;
mod models;
mod resolver;
mod store;
mod validator;

#[cfg(feature = "redis")]
mod redis;

pub use crate::cache::{CacheEntry, DeadlineCache, DueEntries};
pub use crate::chain::{ExpirationValidator, TokenValidator, UidValidator, ValidatorChain};
pub use crate::clock::{Clock, FakeClock, SystemClock, Ticker};
pub use crate::config::{
    DEFAULT_MINIMUM_TIMEOUT_SECONDS, DEFAULT_SAFETY_MARGIN_SECONDS, DEFAULT_TICK_DIVISOR,
    TimeoutConfig,
};
pub use crate::deadline::Deadline;
pub use crate::flush::{FlushEngine, FlushReport};
pub use crate::hooks::{NoopObserver, TimeoutObserver};
pub use crate::models::{ClientPolicy, RTokenError, StoreError, TokenRecord, UserRecord};
pub use crate::resolver::{ClientLister, ClientTimeoutResolver, MemoryClientLister};
pub use crate::store::{MemoryTokenStore, TokenStore};
pub use crate::validator::TimeoutValidator;

#[cfg(feature = "redis")]
pub use crate::redis::RedisTokenStore;
