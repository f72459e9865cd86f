use crate::RTokenError;
use crate::deadline::Deadline;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// ## 日本語
///
/// 1 つの token について、メモリ上で延長された期限を保持するエントリ。
///
/// - `extended_deadline`：最後に使われた時刻 + 有効タイムアウト
/// - `persisted_deadline`：ストアのレコードが現在表している期限（分かっている範囲で）
/// - `dirty`：最後の flush 以降に期限が進んだ
///
/// ## English
///
/// The in-memory extended deadline of one token.
///
/// `persisted_deadline` is the deadline the store is known to hold. A dirty
/// entry only has to be written once that persisted deadline is at risk of
/// passing before the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub extended_deadline: Deadline,
    /// The client policy in force when the deadline was computed. `0` means never.
    pub effective_timeout_seconds: i64,
    /// Creation time of the token; the persisted timeout is measured from it.
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub persisted_deadline: Deadline,
    pub dirty: bool,
}

impl CacheEntry {
    /// A dirty entry for a token used at `last_used_at`, expiring
    /// `effective_timeout_seconds` later (`0` = never).
    pub fn new(
        last_used_at: DateTime<Utc>,
        effective_timeout_seconds: i64,
        created_at: DateTime<Utc>,
        persisted_deadline: Deadline,
    ) -> Self {
        Self {
            extended_deadline: Deadline::from_offset(last_used_at, effective_timeout_seconds),
            effective_timeout_seconds,
            created_at,
            last_used_at,
            persisted_deadline,
            dirty: true,
        }
    }

    /// The value to write into `inactivity_timeout_seconds`.
    pub fn seconds_to_persist(&self) -> i64 {
        self.extended_deadline.seconds_since(self.created_at)
    }

    /// The deadline the record will hold once [`CacheEntry::seconds_to_persist`]
    /// is written. Rounding makes it up to a second later than `extended_deadline`.
    pub fn persist_target(&self) -> Deadline {
        Deadline::from_offset(self.created_at, self.seconds_to_persist())
    }

    /// Whether the store already holds this entry's deadline.
    pub fn is_in_sync(&self) -> bool {
        self.persisted_deadline == self.persist_target()
    }

    /// ## 日本語
    ///
    /// `horizon`（次回 flush + 安全マージン）までに書き込みが必要かどうか。
    ///
    /// - 永続化済みの期限が `horizon` より前に切れる
    /// - 永続化済みの期限がメモリ上の期限より後（ポリシーが厳しくなった）
    /// - メモリ上の期限が無期限になった
    ///
    /// ## English
    ///
    /// Whether this entry has to be written before `horizon`:
    /// - the persisted deadline passes before `horizon`
    /// - the persisted deadline is later than the in-memory one (a tightened policy)
    /// - the in-memory deadline became [`Deadline::Never`]
    pub fn is_due(&self, horizon: DateTime<Utc>) -> bool {
        let target = self.persist_target();
        self.persisted_deadline.is_before(horizon)
            || self.persisted_deadline > target
            || target == Deadline::Never
    }
}

/// Result of [`DeadlineCache::snapshot_due`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueEntries {
    /// Entries to write now; their dirty flags are cleared.
    pub due: Vec<(String, CacheEntry)>,
    /// Dirty entries whose persisted deadline is still safe; they stay dirty.
    pub deferred: usize,
}

/// ## 日本語
///
/// token 名から延長済み期限へのインメモリマップです。
///
/// 内部は `Arc<Mutex<...>>` なので `Clone` は同じマップへのハンドルを増やすだけです。
/// 多数の validator 呼び出しと 1 つの flush タスクから同時に使われます。
///
/// ## English
///
/// In-memory map from token name to its extended deadline.
///
/// Internally it uses an `Arc<Mutex<...>>`, so `Clone` creates another handle
/// to the same map. It is shared by many validating callers and the single
/// flush task.
#[derive(Clone, Default)]
pub struct DeadlineCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl DeadlineCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get(&self, name: &str) -> Result<Option<CacheEntry>, RTokenError> {
        let entries = self.entries.lock().map_err(|_| RTokenError::MutexPoisoned)?;
        Ok(entries.get(name).cloned())
    }

    /// Inserts or overwrites the entry for `name`.
    pub fn put(&self, name: &str, entry: CacheEntry) -> Result<(), RTokenError> {
        self.entries
            .lock()
            .map_err(|_| RTokenError::MutexPoisoned)?
            .insert(name.to_string(), entry);
        Ok(())
    }

    /// ## 日本語
    ///
    /// validator からの期限延長を書き込みます。
    ///
    /// - 既存エントリの方が新しい時刻の使用を表している場合は何もしない（`false`）
    /// - 既存エントリがあれば、その `persisted_deadline` を引き継ぐ
    ///
    /// 同じ token の検証が並行しても、最後に残るのは最も新しい使用の期限です。
    ///
    /// ## English
    ///
    /// Records an extension from a validation.
    ///
    /// Returns `false` and leaves the map untouched when the existing entry
    /// comes from a later use. Otherwise the existing `persisted_deadline` is
    /// carried over, since it may have been advanced by a flush after the
    /// caller read it. Concurrent validations of one token therefore always
    /// leave the deadline of the latest use.
    pub fn extend(&self, name: &str, mut entry: CacheEntry) -> Result<bool, RTokenError> {
        let mut entries = self.entries.lock().map_err(|_| RTokenError::MutexPoisoned)?;
        if let Some(existing) = entries.get(name) {
            if existing.last_used_at > entry.last_used_at {
                return Ok(false);
            }
            entry.persisted_deadline = existing.persisted_deadline;
        }
        entries.insert(name.to_string(), entry);
        Ok(true)
    }

    /// Removes the entry for `name`. Removing a missing entry is not an error.
    pub fn evict(&self, name: &str) -> Result<Option<CacheEntry>, RTokenError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| RTokenError::MutexPoisoned)?
            .remove(name))
    }

    /// ## 日本語
    ///
    /// dirty なエントリをすべて返し、同じロックの中で dirty フラグを下ろします。
    ///
    /// 同時に 2 回呼ばれても、同じ更新が 2 回返されることはありません。
    ///
    /// ## English
    ///
    /// Returns every dirty entry and clears its dirty flag under the same lock.
    ///
    /// Two concurrent callers never both receive the same logical update.
    pub fn snapshot_dirty(&self) -> Result<Vec<(String, CacheEntry)>, RTokenError> {
        let mut entries = self.entries.lock().map_err(|_| RTokenError::MutexPoisoned)?;
        let mut dirty = Vec::new();
        for (name, entry) in entries.iter_mut().filter(|(_, entry)| entry.dirty) {
            dirty.push((name.clone(), entry.clone()));
            entry.dirty = false;
        }
        Ok(dirty)
    }

    /// ## 日本語
    ///
    /// dirty なエントリのうち、`horizon` までに書き込みが必要なものだけを返し、
    /// その dirty フラグを下ろします。ストアと既に一致しているものはフラグだけ下ろし、
    /// まだ安全なものは dirty のまま残します。
    ///
    /// ## English
    ///
    /// Like [`DeadlineCache::snapshot_dirty`], but only returns entries that are
    /// [due](CacheEntry::is_due) before `horizon`. Entries already in sync with
    /// the store are marked clean without being returned; the rest stay dirty.
    pub fn snapshot_due(&self, horizon: DateTime<Utc>) -> Result<DueEntries, RTokenError> {
        let mut entries = self.entries.lock().map_err(|_| RTokenError::MutexPoisoned)?;
        let mut snapshot = DueEntries::default();
        for (name, entry) in entries.iter_mut().filter(|(_, entry)| entry.dirty) {
            if entry.is_in_sync() {
                entry.dirty = false;
            } else if entry.is_due(horizon) {
                snapshot.due.push((name.clone(), entry.clone()));
                entry.dirty = false;
            } else {
                snapshot.deferred += 1;
            }
        }
        Ok(snapshot)
    }

    /// Single-entry form of [`DeadlineCache::snapshot_dirty`]. Returns `None`
    /// when the entry is missing or clean.
    pub fn take_dirty(&self, name: &str) -> Result<Option<CacheEntry>, RTokenError> {
        let mut entries = self.entries.lock().map_err(|_| RTokenError::MutexPoisoned)?;
        let Some(entry) = entries.get_mut(name) else {
            return Ok(None);
        };
        if !entry.dirty {
            return Ok(None);
        }
        let snapshot = entry.clone();
        entry.dirty = false;
        Ok(Some(snapshot))
    }

    /// Sets the dirty flag again after a failed write. Returns `false` if the
    /// entry has been evicted in the meantime.
    pub fn mark_dirty(&self, name: &str) -> Result<bool, RTokenError> {
        let mut entries = self.entries.lock().map_err(|_| RTokenError::MutexPoisoned)?;
        match entries.get_mut(name) {
            Some(entry) => {
                entry.dirty = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Records that the store now holds `persisted`. Returns `false` if the
    /// entry has been evicted in the meantime.
    pub fn mark_persisted(&self, name: &str, persisted: Deadline) -> Result<bool, RTokenError> {
        let mut entries = self.entries.lock().map_err(|_| RTokenError::MutexPoisoned)?;
        match entries.get_mut(name) {
            Some(entry) => {
                entry.persisted_deadline = persisted;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes entries whose deadline has passed at `now` and returns how many
    /// were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, RTokenError> {
        let mut entries = self.entries.lock().map_err(|_| RTokenError::MutexPoisoned)?;
        let original_len = entries.len();
        entries.retain(|_name, entry| !entry.extended_deadline.has_passed(now));
        Ok(original_len - entries.len())
    }

    pub fn len(&self) -> Result<usize, RTokenError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| RTokenError::MutexPoisoned)?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool, RTokenError> {
        Ok(self.len()? == 0)
    }
}
