//! ## 日本語
//!
//! r-token-idle のエラー型です。
//!
//! [`RTokenError`] は validator と flush engine が返すエラー、[`StoreError`] は
//! token ストアの実装が返すエラーです。タイムアウトは通常の障害と区別できるよう
//! 専用のバリアント [`RTokenError::TimedOut`] で表します。
//!
//! ## English
//!
//! Error types for r-token-idle.
//!
//! [`RTokenError`] is returned by the validators and the flush engine, while
//! [`StoreError`] is returned by token store implementations. A timed-out token
//! is reported through the dedicated [`RTokenError::TimedOut`] variant so callers
//! can treat it like a missing token instead of a service fault.

/// ## 日本語
///
/// r-token-idle が返すエラーの集合。
///
/// ## English
///
/// Errors returned by r-token-idle.
#[derive(Debug, thiserror::Error)]
pub enum RTokenError {
    /// ## 日本語
    ///
    /// 非アクティブ期限を過ぎた token。呼び出し側は「token が存在しない」と同様に扱う。
    ///
    /// ## English
    ///
    /// The token's inactivity deadline has passed. Callers should treat this the
    /// same way as a token that does not exist.
    #[error("token timed out")]
    TimedOut,

    /// The token is past its absolute lifetime.
    #[error("token expired")]
    Expired,

    /// The token was issued to a different incarnation of the user.
    #[error("user UID does not match token")]
    UidMismatch,

    /// ## 日本語
    ///
    /// クライアントのタイムアウトポリシーを取得できなかった（fail-closed）。
    ///
    /// ## English
    ///
    /// The client's timeout policy could not be resolved. The token is rejected
    /// and no deadline is cached.
    #[error("failed to resolve timeout policy for client {client:?}: {reason}")]
    PolicyResolution { client: String, reason: String },

    /// A token store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid timeout configuration.
    #[error("invalid timeout configuration: {0}")]
    Config(String),

    /// ## 日本語
    ///
    /// 内部 mutex が poisoned になった。
    ///
    /// ## English
    ///
    /// The internal mutex has been poisoned.
    #[error("deadline cache mutex poisoned")]
    MutexPoisoned,
}

impl RTokenError {
    /// ## 日本語
    ///
    /// 非アクティブタイムアウトによる拒否かどうかを返します。
    ///
    /// ## English
    ///
    /// Returns whether this error is the inactivity timeout sentinel.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, RTokenError::TimedOut)
    }
}

/// Errors returned by [`crate::TokenStore`] implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("token {0:?} not found")]
    NotFound(String),

    /// The record was modified since it was read.
    #[error("token {0:?} was modified concurrently")]
    Conflict(String),

    #[error("token store timed out")]
    ServerTimeout,

    #[error("token store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Conflicts and server timeouts are worth one immediate retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::ServerTimeout)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return StoreError::ServerTimeout;
        }
        StoreError::Backend(err.to_string())
    }
}
