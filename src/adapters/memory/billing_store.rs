//! In-memory entitlement store and idempotency guard.
//!
//! Mirrors the Postgres adapter's guarantees inside one process: a tokio
//! mutex per user serializes units of work, commits apply all-or-nothing,
//! and the same constraints the schema enforces (one active entitlement
//! per user, non-negative balances, unique processed keys) are checked on
//! commit. Suitable for tests and single-node development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::billing::{SubscriptionHistoryEntry, UserBillingState};
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::{BillingChange, EntitlementStore, IdempotencyGuard, UserUnitOfWork};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, UserBillingState>,
    history: Vec<SubscriptionHistoryEntry>,
    processed: HashSet<String>,
}

/// Process-local billing store.
///
/// Implements both [`EntitlementStore`] and [`IdempotencyGuard`] over one
/// processed-key set, so keys claimed inside a unit of work are visible to
/// the guard and vice versa.
#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    tables: Arc<Mutex<Tables>>,
    user_locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
    failing_commits: Arc<AtomicUsize>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a database error.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of recorded processed keys.
    pub async fn processed_count(&self) -> usize {
        self.tables.lock().await.processed.len()
    }

    async fn user_lock(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(user_id.clone()).or_default().clone()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EntitlementStore for InMemoryBillingStore {
    async fn begin(&self, user_id: &UserId) -> Result<Box<dyn UserUnitOfWork>, DomainError> {
        let guard = self.user_lock(user_id).await.lock_owned().await;
        let state = self.load(user_id).await?;

        Ok(Box::new(InMemoryUnitOfWork {
            _guard: guard,
            store: self.clone(),
            state,
            admitted: Vec::new(),
        }))
    }

    async fn load(&self, user_id: &UserId) -> Result<UserBillingState, DomainError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserBillingState::empty(user_id.clone())))
    }

    async fn history(&self, user_id: &UserId) -> Result<Vec<SubscriptionHistoryEntry>, DomainError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .history
            .iter()
            .filter(|h| &h.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_user_by_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<UserId>, DomainError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|s| s.by_subscription(provider_subscription_id).is_some())
            .map(|s| s.user_id.clone()))
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryBillingStore {
    async fn admit(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.tables.lock().await.processed.insert(key.to_string()))
    }

    async fn is_processed(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.tables.lock().await.processed.contains(key))
    }
}

struct InMemoryUnitOfWork {
    _guard: OwnedMutexGuard<()>,
    store: InMemoryBillingStore,
    state: UserBillingState,
    admitted: Vec<String>,
}

#[async_trait]
impl UserUnitOfWork for InMemoryUnitOfWork {
    fn state(&self) -> &UserBillingState {
        &self.state
    }

    async fn admit(&mut self, key: &str) -> Result<bool, DomainError> {
        if self.admitted.iter().any(|k| k == key) {
            return Ok(false);
        }
        if self.store.tables.lock().await.processed.contains(key) {
            return Ok(false);
        }
        self.admitted.push(key.to_string());
        Ok(true)
    }

    async fn commit(self: Box<Self>, change: BillingChange) -> Result<(), DomainError> {
        if self.store.take_injected_failure() {
            return Err(DomainError::database("injected commit failure"));
        }
        if change.state.user_id != self.state.user_id {
            return Err(DomainError::new(
                ErrorCode::InternalError,
                "unit of work committed state for another user",
            ));
        }
        check_constraints(&change.state)?;

        let mut tables = self.store.tables.lock().await;

        if let Some(key) = self.admitted.iter().find(|k| tables.processed.contains(*k)) {
            return Err(DomainError::new(
                ErrorCode::ConstraintViolation,
                format!("processed key {} already recorded", key),
            ));
        }
        if let Some(owner) = subscription_owned_elsewhere(&tables, &change.state) {
            return Err(DomainError::new(
                ErrorCode::ConstraintViolation,
                format!("subscription already belongs to user {}", owner),
            ));
        }

        tables.processed.extend(self.admitted.iter().cloned());
        tables.history.extend(change.history);
        tables.users.insert(change.state.user_id.clone(), change.state);
        Ok(())
    }
}

fn check_constraints(state: &UserBillingState) -> Result<(), DomainError> {
    if state.active_count() > 1 {
        return Err(DomainError::new(
            ErrorCode::ConstraintViolation,
            format!("user {} would have more than one active entitlement", state.user_id),
        ));
    }
    if state.credits.available_credits < 0 || state.minutes.available_minutes < 0 {
        return Err(DomainError::new(
            ErrorCode::ConstraintViolation,
            format!("user {} would have a negative balance", state.user_id),
        ));
    }
    Ok(())
}

fn subscription_owned_elsewhere(tables: &Tables, state: &UserBillingState) -> Option<UserId> {
    state.entitlements.iter().find_map(|e| {
        tables
            .users
            .values()
            .filter(|other| other.user_id != state.user_id)
            .find(|other| other.by_subscription(&e.provider_subscription_id).is_some())
            .map(|other| other.user_id.clone())
    })
}
