//! ## 日本語
//!
//! Redis/Valkey バックエンドの token ストアです。
//!
//! `redis` feature により [`RedisTokenStore`] が利用可能になります。
//!
//! ## English
//!
//! Redis/Valkey-backed token store.
//!
//! Enabling the `redis` feature makes [`RedisTokenStore`] available.

mod redis_token_store;

pub use redis_token_store::RedisTokenStore;
