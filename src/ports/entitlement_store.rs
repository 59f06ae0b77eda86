//! Entitlement store port.
//!
//! Persistence for everything the reconciliation handlers touch: the
//! entitlement rows, both ledgers, the history log, and the processed-key
//! set. Writes only happen through a [`UserUnitOfWork`], which is both the
//! per-user mutual-exclusion scope and the atomic commit boundary.

use async_trait::async_trait;

use crate::domain::billing::{SubscriptionHistoryEntry, UserBillingState};
use crate::domain::foundation::{DomainError, UserId};

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Opens the unit of work for `user_id`.
    ///
    /// Waits while another unit for the same user is open. Units for
    /// different users never wait on each other.
    async fn begin(&self, user_id: &UserId) -> Result<Box<dyn UserUnitOfWork>, DomainError>;

    /// Reads the committed state without locking. Unknown users get
    /// [`UserBillingState::empty`].
    async fn load(&self, user_id: &UserId) -> Result<UserBillingState, DomainError>;

    /// History entries for `user_id`, oldest first.
    async fn history(&self, user_id: &UserId) -> Result<Vec<SubscriptionHistoryEntry>, DomainError>;

    /// Owner of an entitlement row for the subscription, if any.
    async fn find_user_by_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<UserId>, DomainError>;
}

/// Exclusive, atomic unit of work over one user's billing state.
///
/// Dropping the unit without calling [`commit`](UserUnitOfWork::commit)
/// discards every change, including admitted keys.
#[async_trait]
pub trait UserUnitOfWork: Send {
    /// State as of when the unit was opened.
    fn state(&self) -> &UserBillingState;

    /// Claims a processed key (an event id or `refund:<attempt>`).
    ///
    /// Returns `false` if a committed unit already claimed it. The claim
    /// becomes durable only on commit.
    async fn admit(&mut self, key: &str) -> Result<bool, DomainError>;

    /// Writes `change` and every admitted key together.
    async fn commit(self: Box<Self>, change: BillingChange) -> Result<(), DomainError>;
}

/// New state for the user plus history entries to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingChange {
    pub state: UserBillingState,
    pub history: Vec<SubscriptionHistoryEntry>,
}

impl BillingChange {
    pub fn new(state: UserBillingState, history: Vec<SubscriptionHistoryEntry>) -> Self {
        Self { state, history }
    }
}

/// Processed key recorded for a refund attempt.
pub fn refund_key(attempt_id: &str) -> String {
    format!("refund:{}", attempt_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entitlement_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn EntitlementStore) {}
        fn _accepts_unit(_unit: Box<dyn UserUnitOfWork>) {}
    }

    #[test]
    fn refund_keys_cannot_collide_with_event_ids() {
        assert_eq!(refund_key("gen-42"), "refund:gen-42");
        assert!(!refund_key("evt_1").starts_with("evt_"));
    }
}
