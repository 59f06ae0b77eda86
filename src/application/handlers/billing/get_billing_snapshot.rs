//! Read-side queries: entitlement snapshot and subscription history.

use std::sync::Arc;

use crate::domain::billing::{BillingError, BillingSnapshot, SubscriptionHistoryEntry};
use crate::domain::foundation::UserId;
use crate::ports::EntitlementStore;

#[derive(Debug, Clone)]
pub struct GetBillingSnapshotQuery {
    pub user_id: UserId,
}

/// Serves the dashboard and the generation pre-flight check. Unknown users
/// get status `none` and zero balances.
pub struct GetBillingSnapshotHandler {
    store: Arc<dyn EntitlementStore>,
}

impl GetBillingSnapshotHandler {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, query: GetBillingSnapshotQuery) -> Result<BillingSnapshot, BillingError> {
        let state = self.store.load(&query.user_id).await?;
        Ok(state.snapshot())
    }
}

#[derive(Debug, Clone)]
pub struct GetSubscriptionHistoryQuery {
    pub user_id: UserId,
}

pub struct GetSubscriptionHistoryHandler {
    store: Arc<dyn EntitlementStore>,
}

impl GetSubscriptionHistoryHandler {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionHistoryQuery,
    ) -> Result<Vec<SubscriptionHistoryEntry>, BillingError> {
        Ok(self.store.history(&query.user_id).await?)
    }
}
