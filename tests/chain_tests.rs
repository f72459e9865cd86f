//! Composition of the timeout validator with the expiry and UID validators.

mod common;

use common::{Harness, secs};
use r_token_idle::{
    ExpirationValidator, RTokenError, TokenRecord, TokenValidator, UidValidator, UserRecord,
    ValidatorChain,
};
use std::sync::Arc;

fn chain(h: &Harness) -> ValidatorChain {
    ValidatorChain::new()
        .with(Arc::new(ExpirationValidator::new(Arc::new(h.clock.clone()))))
        .with(Arc::new(UidValidator))
        .with(h.validator.clone())
}

#[tokio::test]
async fn chain_accepts_valid_token() {
    let h = Harness::new();
    h.set_client("console", None);
    let token = h.issue("console", 30);

    let chain = chain(&h);
    assert_eq!(chain.len(), 3);
    chain.validate(&token, &h.user).await.unwrap();
    assert!(h.validator.cache().get(&token.name).unwrap().is_some());
}

#[tokio::test]
async fn expired_token_is_rejected_before_timeout_check() {
    let h = Harness::new();
    h.set_client("console", None);
    let record = TokenRecord::issue("console", &h.user, h.clock_now())
        .with_expires_in(60)
        .with_inactivity_timeout(30);
    let token = h.store.inner.insert(record).unwrap();

    h.clock.step(secs(61));

    let err = chain(&h).validate(&token, &h.user).await.unwrap_err();
    assert!(matches!(err, RTokenError::Expired));
}

#[tokio::test]
async fn recreated_user_is_rejected() {
    let h = Harness::new();
    h.set_client("console", None);
    let token = h.issue("console", 30);
    let recreated = UserRecord::new("alice", "uid-alice-2");

    let err = chain(&h).validate(&token, &recreated).await.unwrap_err();
    assert!(matches!(err, RTokenError::UidMismatch));
    // Rejected before the timeout validator could extend anything.
    assert!(h.validator.cache().is_empty().unwrap());
}

#[tokio::test]
async fn timed_out_token_surfaces_sentinel_through_chain() {
    let h = Harness::new();
    h.set_client("console", None);
    let token = h.issue("console", 30);

    h.clock.step(secs(31));

    let err = chain(&h).validate(&token, &h.user).await.unwrap_err();
    assert!(err.is_timed_out());
}

#[tokio::test]
async fn empty_chain_accepts() {
    let h = Harness::new();
    let token = h.issue("console", 30);
    let chain = ValidatorChain::new();

    assert!(chain.is_empty());
    chain.validate(&token, &h.user).await.unwrap();
}
