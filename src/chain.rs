//! ## 日本語
//!
//! 複数の validator を順に実行するチェーンと、タイムアウト以外の独立した validator です。
//!
//! ## English
//!
//! The validator contract, a chain composer, and the validators that run next
//! to the inactivity timeout check.

use crate::clock::Clock;
use crate::models::{RTokenError, TokenRecord, UserRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// ## 日本語
///
/// token とユーザーを受け取り、受理（`Ok(())`）か拒否（`Err`）を返す validator。
///
/// ## English
///
/// Accepts (`Ok(())`) or rejects (`Err`) an already-fetched token and its user.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &TokenRecord, user: &UserRecord) -> Result<(), RTokenError>;
}

/// Runs validators in order; the first rejection wins.
#[derive(Clone, Default)]
pub struct ValidatorChain {
    validators: Vec<Arc<dyn TokenValidator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

#[async_trait]
impl TokenValidator for ValidatorChain {
    async fn validate(&self, token: &TokenRecord, user: &UserRecord) -> Result<(), RTokenError> {
        for validator in &self.validators {
            validator.validate(token, user).await?;
        }
        Ok(())
    }
}

/// Rejects tokens past their absolute lifetime with [`RTokenError::Expired`].
#[derive(Clone)]
pub struct ExpirationValidator {
    clock: Arc<dyn Clock>,
}

impl ExpirationValidator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl TokenValidator for ExpirationValidator {
    async fn validate(&self, token: &TokenRecord, _user: &UserRecord) -> Result<(), RTokenError> {
        match token.expires_at() {
            Some(expires_at) if self.clock.now() >= expires_at => Err(RTokenError::Expired),
            _ => Ok(()),
        }
    }
}

/// Rejects tokens whose recorded user UID differs from the current user's,
/// e.g. after the user was deleted and recreated under the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct UidValidator;

#[async_trait]
impl TokenValidator for UidValidator {
    async fn validate(&self, token: &TokenRecord, user: &UserRecord) -> Result<(), RTokenError> {
        if token.user_uid != user.uid {
            return Err(RTokenError::UidMismatch);
        }
        Ok(())
    }
}
