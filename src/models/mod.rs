//! Records and error types shared across the crate.
//!
//! The token, user, and client records mirror what the backing store and the
//! client registry hand to the validator. The error types are returned by the
//! validator, the flush engine, and the store implementations.

mod rtoken_error;
mod token_record;

pub use rtoken_error::{RTokenError, StoreError};
pub use token_record::{ClientPolicy, TokenRecord, UserRecord};
