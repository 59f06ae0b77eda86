//! RefundMinutesHandler - Returns minutes of a failed or aborted generation.

use std::sync::Arc;

use crate::domain::billing::{refund, BillingError, Catalog, LedgerBalance};
use crate::domain::foundation::UserId;
use crate::ports::{refund_key, BillingChange, EntitlementStore};

#[derive(Debug, Clone)]
pub struct RefundMinutesCommand {
    pub user_id: UserId,
    pub minutes: i64,
    /// Generation attempt; makes the refund apply at most once.
    pub attempt_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundMinutesResult {
    pub balance: LedgerBalance,
    pub already_refunded: bool,
}

/// Handler for generation refunds.
///
/// With an attempt id, the refund key is claimed in the same unit of work
/// as the ledger write. Without one, the caller must not repeat the call.
pub struct RefundMinutesHandler {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<Catalog>,
}

impl RefundMinutesHandler {
    pub fn new(store: Arc<dyn EntitlementStore>, catalog: Arc<Catalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn handle(&self, cmd: RefundMinutesCommand) -> Result<RefundMinutesResult, BillingError> {
        let mut uow = self.store.begin(&cmd.user_id).await?;

        if let Some(attempt_id) = cmd.attempt_id.as_deref() {
            if !uow.admit(&refund_key(attempt_id)).await? {
                tracing::info!(user_id = %cmd.user_id, attempt_id, "Refund already applied");
                let state = uow.state();
                return Ok(RefundMinutesResult {
                    balance: LedgerBalance {
                        remaining_credits: state.credits.available_credits,
                        remaining_minutes: state.minutes.available_minutes,
                    },
                    already_refunded: true,
                });
            }
        }

        let mut state = uow.state().clone();
        let balance = refund(
            &mut state.credits,
            &mut state.minutes,
            cmd.minutes,
            self.catalog.credits_per_minute(),
        )?;

        uow.commit(BillingChange::new(state, Vec::new()))
            .await
            .map_err(|e| {
                tracing::error!(user_id = %cmd.user_id, error = %e, "Refund commit failed");
                BillingError::from(e)
            })?;

        tracing::info!(
            user_id = %cmd.user_id,
            minutes = cmd.minutes,
            attempt_id = ?cmd.attempt_id,
            "Minutes refunded"
        );

        Ok(RefundMinutesResult {
            balance,
            already_refunded: false,
        })
    }
}
