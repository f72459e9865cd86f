//! ## 日本語
//!
//! 非アクティブタイムアウトの設定です。
//!
//! ## English
//!
//! Inactivity timeout settings.

use crate::RTokenError;
use serde::Deserialize;
use std::time::Duration;

/// ## 日本語
///
/// クラスタ全体の非アクティブタイムアウト設定。
///
/// - `default_timeout_seconds`：クライアントが上書きしない場合の値（`0` 以下は無効化）
/// - `minimum_timeout_seconds`：クライアントの上書き値の下限。flush の周期もここから決まる
/// - `tick_divisor`：flush 周期 = 最小値 / `tick_divisor`
/// - `safety_margin_seconds`：次回 flush に足す余裕。これより早く切れる token は即時 flush
///
/// ## English
///
/// Cluster-wide inactivity timeout settings.
///
/// - `default_timeout_seconds`: used when a client sets no override (`<= 0` disables)
/// - `minimum_timeout_seconds`: lower bound for client overrides; also sets the flush cadence
/// - `tick_divisor`: flush interval = minimum / `tick_divisor`
/// - `safety_margin_seconds`: added to the next flush time; tokens expiring earlier
///   are flushed immediately
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_timeout_seconds: i64,
    pub minimum_timeout_seconds: i64,
    pub tick_divisor: u32,
    pub safety_margin_seconds: u64,
}

pub const DEFAULT_MINIMUM_TIMEOUT_SECONDS: i64 = 300;
pub const DEFAULT_TICK_DIVISOR: u32 = 3;
pub const DEFAULT_SAFETY_MARGIN_SECONDS: u64 = 10;

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 0,
            minimum_timeout_seconds: DEFAULT_MINIMUM_TIMEOUT_SECONDS,
            tick_divisor: DEFAULT_TICK_DIVISOR,
            safety_margin_seconds: DEFAULT_SAFETY_MARGIN_SECONDS,
        }
    }
}

impl TimeoutConfig {
    pub fn new(default_timeout_seconds: i64, minimum_timeout_seconds: i64) -> Self {
        Self {
            default_timeout_seconds,
            minimum_timeout_seconds,
            ..Self::default()
        }
    }

    pub fn with_safety_margin(mut self, seconds: u64) -> Self {
        self.safety_margin_seconds = seconds;
        self
    }

    pub fn with_tick_divisor(mut self, divisor: u32) -> Self {
        self.tick_divisor = divisor;
        self
    }

    /// Rejects settings the flush loop cannot run with.
    pub fn validate(&self) -> Result<(), RTokenError> {
        if self.minimum_timeout_seconds <= 0 {
            return Err(RTokenError::Config(format!(
                "minimum_timeout_seconds must be positive, got {}",
                self.minimum_timeout_seconds
            )));
        }
        if self.tick_divisor == 0 {
            return Err(RTokenError::Config("tick_divisor must be non-zero".into()));
        }
        if self.tick_interval().is_zero() {
            return Err(RTokenError::Config(format!(
                "tick interval rounds to zero ({}s / {})",
                self.minimum_timeout_seconds, self.tick_divisor
            )));
        }
        Ok(())
    }

    /// Wake-up interval of the flush loop.
    pub fn tick_interval(&self) -> Duration {
        let minimum = u64::try_from(self.minimum_timeout_seconds).unwrap_or(0);
        Duration::from_secs(minimum)
            .checked_div(self.tick_divisor)
            .unwrap_or(Duration::ZERO)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_seconds)
    }
}
