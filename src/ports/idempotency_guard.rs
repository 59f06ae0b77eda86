//! Idempotency guard port.
//!
//! Insert-if-absent over a uniquely keyed set of processed event ids.
//! The webhook pipeline claims reconciled events inside the per-user unit
//! of work; this port covers the fast duplicate check and events that are
//! acknowledged without touching any user state.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;

#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Records `key` if absent.
    ///
    /// Returns `true` for exactly one caller per key, across restarts and
    /// concurrent callers. A uniqueness conflict is `Ok(false)`, not an error.
    async fn admit(&self, key: &str) -> Result<bool, DomainError>;

    /// Whether `key` has already been recorded.
    async fn is_processed(&self, key: &str) -> Result<bool, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct SetGuard {
        keys: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl IdempotencyGuard for SetGuard {
        async fn admit(&self, key: &str) -> Result<bool, DomainError> {
            Ok(self.keys.lock().await.insert(key.to_string()))
        }

        async fn is_processed(&self, key: &str) -> Result<bool, DomainError> {
            Ok(self.keys.lock().await.contains(key))
        }
    }

    #[tokio::test]
    async fn only_one_concurrent_caller_admits() {
        let guard = Arc::new(SetGuard {
            keys: Mutex::new(HashSet::new()),
        });

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.admit("evt_1").await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert!(guard.is_processed("evt_1").await.unwrap());
    }
}
