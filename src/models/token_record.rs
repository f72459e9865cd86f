use crate::deadline::Deadline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ## 日本語
///
/// ストアに永続化されている access token のレコードです。
///
/// `inactivity_timeout_seconds` は `creation_timestamp` からの秒数で、
/// この時刻を過ぎると非アクティブとして無効になります。`0` はタイムアウト無し。
/// このフィールドを書き換えるのは flush だけです。
///
/// ## English
///
/// A persisted access token record.
///
/// `inactivity_timeout_seconds` is measured from `creation_timestamp`; once that
/// point passes the token is unusable due to inactivity. `0` means the token
/// never times out. Only a flush rewrites this field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub name: String,
    pub client_name: String,
    pub user_name: String,
    pub user_uid: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub creation_timestamp: DateTime<Utc>,
    /// Absolute lifetime from creation in seconds. `0` disables it.
    #[serde(default)]
    pub expires_in_seconds: i64,
    #[serde(default)]
    pub inactivity_timeout_seconds: i64,
    /// Optimistic concurrency version, owned by the store.
    #[serde(default)]
    pub resource_version: u64,
}

impl TokenRecord {
    /// ## 日本語
    ///
    /// 新しい token レコードを作成します。名前は UUID v4 文字列です。
    ///
    /// ## English
    ///
    /// Creates a new token record for `user`, named with a UUID v4 string.
    pub fn issue(client_name: &str, user: &UserRecord, now: DateTime<Utc>) -> Self {
        Self {
            name: uuid::Uuid::new_v4().to_string(),
            client_name: client_name.to_string(),
            user_name: user.name.clone(),
            user_uid: user.uid.clone(),
            scopes: Vec::new(),
            creation_timestamp: now,
            expires_in_seconds: 0,
            inactivity_timeout_seconds: 0,
            resource_version: 0,
        }
    }

    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_in_seconds = seconds;
        self
    }

    pub fn with_inactivity_timeout(mut self, seconds: i64) -> Self {
        self.inactivity_timeout_seconds = seconds;
        self
    }

    /// The deadline implied by the persisted inactivity timeout.
    pub fn persisted_deadline(&self) -> Deadline {
        Deadline::from_offset(self.creation_timestamp, self.inactivity_timeout_seconds)
    }

    /// The absolute expiry, if the token has one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.expires_in_seconds <= 0 {
            return None;
        }
        chrono::Duration::try_seconds(self.expires_in_seconds)
            .and_then(|lifetime| self.creation_timestamp.checked_add_signed(lifetime))
    }

    /// Whether the persisted inactivity timeout already reaches the absolute expiry,
    /// in which case the token dies of old age before it can time out.
    pub fn outlived_by_inactivity(&self) -> bool {
        self.expires_in_seconds != 0
            && self.inactivity_timeout_seconds != 0
            && self.expires_in_seconds <= self.inactivity_timeout_seconds
    }
}

/// The user a token was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub uid: String,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }
}

/// ## 日本語
///
/// OAuth クライアントの非アクティブタイムアウトポリシー。
///
/// - `None`：クラスタのデフォルトを使う
/// - `Some(0)`：タイムアウトしない
/// - 正の値：クラスタ最小値未満なら最小値に切り上げ
///
/// ## English
///
/// Inactivity timeout policy of an OAuth client.
///
/// - `None`: use the cluster default
/// - `Some(0)`: tokens never time out
/// - positive: clamped up to the cluster minimum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPolicy {
    pub name: String,
    #[serde(default)]
    pub access_token_inactivity_timeout_seconds: Option<i64>,
}

impl ClientPolicy {
    pub fn new(name: impl Into<String>, timeout_seconds: Option<i64>) -> Self {
        Self {
            name: name.into(),
            access_token_inactivity_timeout_seconds: timeout_seconds,
        }
    }
}
