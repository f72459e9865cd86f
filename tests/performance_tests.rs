//! Performance and stress tests for r-token-idle.
//!
//! These tests verify that store writes are amortized under load.

mod common;

use common::{Harness, secs};
use std::time::Instant;

#[cfg(test)]
mod performance {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_validations_batch_store_writes() {
        let h = Harness::new();
        h.set_client("console", None);
        // Persisted 10s after issue, so every record is due at the first flush.
        let tokens: Vec<_> = (0..100).map(|_| h.issue("console", 10)).collect();
        h.clock.step(secs(1));

        let start = Instant::now();
        let mut handles = Vec::new();
        for token in tokens.iter().cloned() {
            let validator = h.validator.clone();
            let user = h.user.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    validator.validate(&token, &user).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let duration = start.elapsed();
        println!("1000 validations in {:?}", duration);

        // No emergency flushes for a 30s timeout, so nothing written yet.
        assert_eq!(h.store.attempts(), 0);
        assert_eq!(h.validator.cache().len().unwrap(), 100);

        let report = h.flush().await;
        assert_eq!(report.written, 100);
        assert_eq!(h.store.updates(), 100);
    }

    #[tokio::test]
    async fn validate_performance() {
        let h = Harness::new();
        h.set_client("console", None);
        let token = h.issue("console", 30);
        let iterations = 1000;

        let start = Instant::now();
        for _ in 0..iterations {
            h.validator.validate(&token, &h.user).await.unwrap();
        }
        let duration = start.elapsed();

        println!("Validated {} times in {:?}", iterations, duration);
        println!("Average time per validation: {:?}", duration / iterations);

        // Should be reasonably fast (< 1ms per validation on average)
        assert!(duration.as_millis() < (iterations as u128));
    }
}
