//! DebitMinutesHandler - Pre-flight debit for a meditation generation.

use std::sync::Arc;

use crate::domain::billing::{debit, BillingError, Catalog, LedgerBalance};
use crate::domain::foundation::UserId;
use crate::ports::{BillingChange, EntitlementStore};

#[derive(Debug, Clone)]
pub struct DebitMinutesCommand {
    pub user_id: UserId,
    pub minutes: i64,
}

/// Handler for generation debits.
///
/// Check and write run inside the user's unit of work, so two concurrent
/// debits never both pass the balance check against the same snapshot.
pub struct DebitMinutesHandler {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<Catalog>,
}

impl DebitMinutesHandler {
    pub fn new(store: Arc<dyn EntitlementStore>, catalog: Arc<Catalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn handle(&self, cmd: DebitMinutesCommand) -> Result<LedgerBalance, BillingError> {
        let uow = self.store.begin(&cmd.user_id).await?;
        let mut state = uow.state().clone();

        let balance = match debit(
            &mut state.credits,
            &mut state.minutes,
            cmd.minutes,
            self.catalog.credits_per_minute(),
        ) {
            Ok(balance) => balance,
            Err(e) => {
                tracing::debug!(user_id = %cmd.user_id, minutes = cmd.minutes, error = %e, "Debit refused");
                return Err(e);
            }
        };

        uow.commit(BillingChange::new(state, Vec::new()))
            .await
            .map_err(|e| {
                tracing::error!(user_id = %cmd.user_id, error = %e, "Debit commit failed");
                BillingError::from(e)
            })?;

        tracing::info!(
            user_id = %cmd.user_id,
            minutes = cmd.minutes,
            remaining_credits = balance.remaining_credits,
            "Minutes debited"
        );
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::domain::billing::UserBillingState;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    async fn store_with_balance(credits: i64, minutes: i64) -> InMemoryBillingStore {
        let store = InMemoryBillingStore::new();
        let uow = store.begin(&user()).await.unwrap();
        let mut state = UserBillingState::empty(user());
        state.credits.grant(credits);
        state.minutes.grant(minutes);
        uow.commit(BillingChange::new(state, Vec::new())).await.unwrap();
        store
    }

    fn handler(store: &InMemoryBillingStore) -> DebitMinutesHandler {
        DebitMinutesHandler::new(
            Arc::new(store.clone()),
            Arc::new(Catalog::standard(10).unwrap()),
        )
    }

    fn cmd(minutes: i64) -> DebitMinutesCommand {
        DebitMinutesCommand {
            user_id: user(),
            minutes,
        }
    }

    #[tokio::test]
    async fn debit_then_insufficient_leaves_balance_unchanged() {
        let store = store_with_balance(105, 10).await;
        let handler = handler(&store);

        let balance = handler.handle(cmd(5)).await.unwrap();
        assert_eq!(balance.remaining_credits, 55);
        assert_eq!(balance.remaining_minutes, 5);

        let err = handler.handle(cmd(10)).await.unwrap_err();
        assert!(matches!(err, BillingError::InsufficientCredits { required: 100, available: 55 }));

        let state = store.load(&user()).await.unwrap();
        assert_eq!(state.credits.available_credits, 55);
        assert_eq!(state.minutes.available_minutes, 5);
        assert_eq!(state.minutes.total_minutes_used, 5);
    }

    #[tokio::test]
    async fn concurrent_debits_cannot_overdraw() {
        let store = store_with_balance(100, 10).await;
        let handler = Arc::new(handler(&store));

        let a = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle(cmd(6)).await }
        });
        let b = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle(cmd(6)).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(BillingError::InsufficientCredits { .. }))));

        let state = store.load(&user()).await.unwrap();
        assert_eq!(state.credits.available_credits, 40);
        assert_eq!(state.minutes.available_minutes, 4);
    }

    #[tokio::test]
    async fn unknown_user_has_nothing_to_debit() {
        let store = InMemoryBillingStore::new();
        let err = handler(&store).handle(cmd(1)).await.unwrap_err();
        assert!(matches!(err, BillingError::InsufficientCredits { available: 0, .. }));
    }

    #[tokio::test]
    async fn storage_failure_is_retryable() {
        let store = store_with_balance(100, 10).await;
        store.fail_next_commits(1);

        let err = handler(&store).handle(cmd(1)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.load(&user()).await.unwrap().credits.available_credits, 100);
    }
}
