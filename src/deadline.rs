//! Absolute deadlines with an explicit "never" value.

use chrono::{DateTime, Utc};

/// ## 日本語
///
/// token が無効になる絶対時刻。`Never` はタイムアウトしないことを表し、
/// どの時刻よりも後として順序付けられます。
///
/// ## English
///
/// The absolute point in time at which a token becomes invalid. `Never` orders
/// after every concrete instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Deadline {
    At(DateTime<Utc>),
    Never,
}

impl Deadline {
    /// `base + seconds`, where `0` means [`Deadline::Never`].
    ///
    /// Offsets that overflow the calendar are treated as never.
    pub fn from_offset(base: DateTime<Utc>, seconds: i64) -> Self {
        if seconds == 0 {
            return Deadline::Never;
        }
        chrono::Duration::try_seconds(seconds)
            .and_then(|offset| base.checked_add_signed(offset))
            .map_or(Deadline::Never, Deadline::At)
    }

    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        match self {
            Deadline::At(at) => now >= *at,
            Deadline::Never => false,
        }
    }

    pub fn is_before(&self, instant: DateTime<Utc>) -> bool {
        match self {
            Deadline::At(at) => *at < instant,
            Deadline::Never => false,
        }
    }

    /// ## 日本語
    ///
    /// `created_at` からこの期限までの秒数を、レコードに書き込む値として返します。
    ///
    /// 端数は切り上げ、結果は `1..=i64::MAX` に飽和させます（`0` は「無期限」を意味するため）。
    /// `Never` は `0` になります。
    ///
    /// ## English
    ///
    /// Seconds from `created_at` to this deadline, as stored in the token record.
    ///
    /// Fractions round up so the persisted deadline is never earlier than the
    /// in-memory one. The result saturates to `1..=i64::MAX` because `0` means
    /// "never". [`Deadline::Never`] persists as `0`.
    pub fn seconds_since(&self, created_at: DateTime<Utc>) -> i64 {
        match self {
            Deadline::Never => 0,
            Deadline::At(at) => {
                let millis = (*at - created_at).num_milliseconds();
                let seconds = millis.div_euclid(1000) + i64::from(millis.rem_euclid(1000) != 0);
                seconds.max(1)
            }
        }
    }
}

/// `instant + duration`, saturating at the latest representable time.
pub(crate) fn saturating_add(instant: DateTime<Utc>, duration: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|duration| instant.checked_add_signed(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
