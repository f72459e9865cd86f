//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use r_token_idle::{
    CacheEntry, ClientPolicy, FakeClock, FlushReport, MemoryClientLister, MemoryTokenStore,
    StoreError, TimeoutConfig, TimeoutObserver, TimeoutValidator, TokenRecord, TokenStore,
    UserRecord,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn secs(seconds: u64) -> Duration {
    Duration::from_secs(seconds)
}

/// Wraps [`MemoryTokenStore`], counting writes and injecting failures.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryTokenStore,
    updates: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    failures: Arc<Mutex<Vec<StoreError>>>,
    update_delay: Arc<Mutex<Option<Duration>>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful writes.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Writes attempted, including injected failures.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The next `update` calls fail with these errors, in order.
    pub fn fail_next(&self, errors: Vec<StoreError>) {
        *self.failures.lock().unwrap() = errors;
    }

    pub fn delay_updates(&self, delay: Duration) {
        *self.update_delay.lock().unwrap() = Some(delay);
    }

    pub async fn persisted_timeout(&self, name: &str) -> i64 {
        self.inner.get(name).await.unwrap().inactivity_timeout_seconds
    }
}

#[async_trait]
impl TokenStore for CountingStore {
    async fn get(&self, name: &str) -> Result<TokenRecord, StoreError> {
        self.inner.get(name).await
    }

    async fn update(&self, record: &TokenRecord) -> Result<TokenRecord, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.update_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let injected = {
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        if let Some(err) = injected {
            return Err(err);
        }
        let updated = self.inner.update(record).await?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Put(String, CacheEntry),
    Emergency(String, bool),
    Flush(FlushReport),
}

/// Records every hook call and lets tests wait for flushes.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
    notify: Notify,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn emergency_flushes(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Emergency(name, written) => Some((name, written)),
                _ => None,
            })
            .collect()
    }

    pub fn flushes(&self) -> Vec<FlushReport> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Flush(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    pub fn puts(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Put(..)))
            .count()
    }

    /// Waits until at least `count` scheduled flushes have completed.
    pub async fn wait_for_flushes(&self, count: usize) -> Vec<FlushReport> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                let flushes = self.flushes();
                if flushes.len() >= count {
                    return flushes;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for flush")
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
        self.notify.notify_waiters();
    }
}

impl TimeoutObserver for RecordingObserver {
    fn on_cache_put(&self, name: &str, entry: &CacheEntry) {
        self.push(Event::Put(name.to_string(), entry.clone()));
    }

    fn on_emergency_flush(&self, name: &str, written: bool) {
        self.push(Event::Emergency(name.to_string(), written));
    }

    fn on_flush(&self, report: &FlushReport) {
        self.push(Event::Flush(report.clone()));
    }
}

/// Validator wired to a fake clock, a counting store, and an in-memory lister.
pub struct Harness {
    pub clock: FakeClock,
    pub store: CountingStore,
    pub lister: MemoryClientLister,
    pub observer: Arc<RecordingObserver>,
    pub validator: Arc<TimeoutValidator>,
    pub user: UserRecord,
}

impl Harness {
    /// Cluster default 30s, minimum 10s: ticks every 10/3 s with a 10s margin.
    pub fn new() -> Self {
        Self::with_config(TimeoutConfig::new(30, 10))
    }

    pub fn with_config(config: TimeoutConfig) -> Self {
        let clock = FakeClock::new(t0());
        let store = CountingStore::new();
        let lister = MemoryClientLister::new();
        let observer = Arc::new(RecordingObserver::default());
        let validator = TimeoutValidator::with_observer(
            &config,
            Arc::new(store.clone()),
            Arc::new(lister.clone()),
            Arc::new(clock.clone()),
            observer.clone(),
        )
        .unwrap();

        Self {
            clock,
            store,
            lister,
            observer,
            validator: Arc::new(validator),
            user: UserRecord::new("alice", "uid-alice"),
        }
    }

    pub fn set_client(&self, name: &str, timeout: Option<i64>) {
        self.lister.set(ClientPolicy::new(name, timeout)).unwrap();
    }

    /// Issues a token at the current fake time with `timeout` persisted.
    pub fn issue(&self, client: &str, timeout: i64) -> TokenRecord {
        let record = TokenRecord::issue(client, &self.user, self.clock_now())
            .with_inactivity_timeout(timeout);
        self.store.inner.insert(record).unwrap()
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use r_token_idle::Clock;
        self.clock.now()
    }

    /// Re-reads the token as a caller would before validating.
    pub async fn fetch(&self, token: &TokenRecord) -> TokenRecord {
        self.store.inner.get(&token.name).await.unwrap()
    }

    pub async fn validate(&self, token: &TokenRecord) -> Result<(), r_token_idle::RTokenError> {
        let current = self.fetch(token).await;
        self.validator.validate(&current, &self.user).await
    }

    pub async fn flush(&self) -> FlushReport {
        let horizon = self.validator.engine().flush_horizon();
        self.validator.engine().flush(horizon).await
    }
}
