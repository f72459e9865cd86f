//! ## 日本語
//!
//! 現在時刻と周期的な tick を提供する時計の抽象です。
//!
//! 本番では [`SystemClock`]、テストでは任意に時刻を進められる [`FakeClock`] を使います。
//!
//! ## English
//!
//! Clock and ticker abstraction.
//!
//! Production code uses [`SystemClock`]; tests use [`FakeClock`], which only
//! moves when told to and delivers at most one buffered tick per ticker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// A periodic wake-up source created by a [`Clock`].
#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick and returns the clock time it fired at.
    async fn tick(&mut self) -> DateTime<Utc>;
}

/// Supplies the current time and tickers.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Creates a ticker firing every `interval`. The first tick happens one
    /// interval after creation.
    fn ticker(&self, interval: Duration) -> Box<dyn Ticker>;
}

/// Wall clock backed by `chrono::Utc` and `tokio::time::interval`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn ticker(&self, interval: Duration) -> Box<dyn Ticker> {
        let start = tokio::time::Instant::now() + interval;
        let mut interval = tokio::time::interval_at(start, interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Box::new(IntervalTicker { interval })
    }
}

struct IntervalTicker {
    interval: tokio::time::Interval,
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> DateTime<Utc> {
        self.interval.tick().await;
        Utc::now()
    }
}

struct FakeTickerSlot {
    interval: chrono::Duration,
    next: DateTime<Utc>,
    sender: mpsc::Sender<DateTime<Utc>>,
}

struct FakeState {
    now: DateTime<Utc>,
    tickers: Vec<FakeTickerSlot>,
}

/// ## 日本語
///
/// テスト用の時計。[`FakeClock::step`] を呼んだときだけ時刻が進みます。
///
/// 各 ticker はバッファ 1 のチャネルを持ち、未消費の tick がある間は新しい tick を
/// 捨てます（実時間の ticker が遅延したときと同じ挙動）。
///
/// ## English
///
/// A controllable clock for tests. Time only moves when [`FakeClock::step`] or
/// [`FakeClock::set`] is called.
///
/// Each ticker owns a channel with a single buffered slot; while a tick is
/// pending, further ticks are dropped, like a real ticker whose reader fell
/// behind. `Clone` shares the same underlying time.
#[derive(Clone)]
pub struct FakeClock {
    state: Arc<Mutex<FakeState>>,
    registered: Arc<Notify>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                now,
                tickers: Vec::new(),
            })),
            registered: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advances the clock by `step` and fires every ticker whose next tick is due.
    pub fn step(&self, step: Duration) {
        let step = chrono::Duration::from_std(step).unwrap_or(chrono::Duration::MAX);
        let mut state = self.lock();
        let now = state
            .now
            .checked_add_signed(step)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::advance(&mut state, now);
    }

    /// Moves the clock to `now`, firing due tickers. Moving backwards only
    /// changes the reported time.
    pub fn set(&self, now: DateTime<Utc>) {
        let mut state = self.lock();
        Self::advance(&mut state, now);
    }

    fn advance(state: &mut FakeState, now: DateTime<Utc>) {
        state.now = now;
        state.tickers.retain(|slot| !slot.sender.is_closed());
        for slot in state.tickers.iter_mut() {
            if now < slot.next {
                continue;
            }
            // A full buffer drops the tick.
            let _ = slot.sender.try_send(now);
            if slot.interval <= chrono::Duration::zero() {
                slot.next = now;
                continue;
            }
            while slot.next <= now {
                match slot.next.checked_add_signed(slot.interval) {
                    Some(next) => slot.next = next,
                    None => {
                        slot.next = DateTime::<Utc>::MAX_UTC;
                        break;
                    }
                }
            }
        }
    }

    /// Number of live tickers created from this clock.
    pub fn ticker_count(&self) -> usize {
        let mut state = self.lock();
        state.tickers.retain(|slot| !slot.sender.is_closed());
        state.tickers.len()
    }

    /// Waits until at least `count` tickers exist, so a test can step the
    /// clock knowing the background loop is listening.
    pub async fn wait_for_tickers(&self, count: usize) {
        loop {
            let notified = self.registered.notified();
            if self.ticker_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn ticker(&self, interval: Duration) -> Box<dyn Ticker> {
        let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
        let (sender, receiver) = mpsc::channel(1);
        {
            let mut state = self.lock();
            let next = state
                .now
                .checked_add_signed(interval)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            state.tickers.push(FakeTickerSlot {
                interval,
                next,
                sender,
            });
        }
        self.registered.notify_waiters();
        Box::new(FakeTicker { receiver })
    }
}

struct FakeTicker {
    receiver: mpsc::Receiver<DateTime<Utc>>,
}

#[async_trait]
impl Ticker for FakeTicker {
    async fn tick(&mut self) -> DateTime<Utc> {
        match self.receiver.recv().await {
            Some(at) => at,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default()
    }

    #[tokio::test]
    async fn fake_ticker_fires_once_per_interval() {
        let clock = FakeClock::new(t0());
        let mut ticker = clock.ticker(Duration::from_secs(3));

        clock.step(Duration::from_secs(2));
        clock.step(Duration::from_secs(1));

        let fired = ticker.tick().await;
        assert_eq!(fired, t0() + chrono::Duration::seconds(3));
    }

    #[tokio::test]
    async fn fake_ticker_buffers_a_single_tick() {
        let clock = FakeClock::new(t0());
        let mut ticker = clock.ticker(Duration::from_secs(1));

        clock.step(Duration::from_secs(1));
        clock.step(Duration::from_secs(1));
        clock.step(Duration::from_secs(1));

        assert_eq!(ticker.tick().await, t0() + chrono::Duration::seconds(1));
        let next = tokio::time::timeout(Duration::from_millis(20), ticker.tick()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn dropped_tickers_are_forgotten() {
        let clock = FakeClock::new(t0());
        let ticker = clock.ticker(Duration::from_secs(1));
        assert_eq!(clock.ticker_count(), 1);
        drop(ticker);
        assert_eq!(clock.ticker_count(), 0);
    }
}
