//! StartPortalSessionHandler - Opens the self-service billing portal.

use std::sync::Arc;

use super::checkout_support::RedirectUrls;
use crate::domain::billing::BillingError;
use crate::domain::foundation::UserId;
use crate::ports::{CustomerRegistry, PaymentProvider};

#[derive(Debug, Clone)]
pub struct StartPortalSessionCommand {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPortalSessionResult {
    pub portal_url: String,
    /// Duplicate subscriptions canceled before opening the portal.
    pub canceled_duplicates: Vec<String>,
}

/// Handler for portal sessions.
///
/// Before opening the portal, every active subscription except the newest
/// is canceled with proration. The cleanup is best effort: a failed
/// cancellation is logged and skipped.
pub struct StartPortalSessionHandler {
    registry: Arc<dyn CustomerRegistry>,
    payment_provider: Arc<dyn PaymentProvider>,
    urls: RedirectUrls,
}

impl StartPortalSessionHandler {
    pub fn new(
        registry: Arc<dyn CustomerRegistry>,
        payment_provider: Arc<dyn PaymentProvider>,
        urls: RedirectUrls,
    ) -> Self {
        Self {
            registry,
            payment_provider,
            urls,
        }
    }

    pub async fn handle(
        &self,
        cmd: StartPortalSessionCommand,
    ) -> Result<StartPortalSessionResult, BillingError> {
        let customer_id = self
            .registry
            .find_customer_id(&cmd.user_id)
            .await?
            .ok_or(BillingError::CustomerNotFound)?;

        let canceled_duplicates = self.cancel_duplicates(&cmd.user_id, &customer_id).await?;

        let session = self
            .payment_provider
            .create_portal_session(&customer_id, &self.urls.portal_return())
            .await?;

        Ok(StartPortalSessionResult {
            portal_url: session.url,
            canceled_duplicates,
        })
    }

    async fn cancel_duplicates(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> Result<Vec<String>, BillingError> {
        let mut active = self
            .payment_provider
            .list_active_subscriptions(customer_id)
            .await?;
        if active.len() <= 1 {
            return Ok(Vec::new());
        }

        active.sort_by(|a, b| b.created.cmp(&a.created));
        tracing::warn!(
            user_id = %user_id,
            customer_id,
            count = active.len(),
            keep = %active[0].id,
            "Multiple active subscriptions; canceling older ones"
        );

        let mut canceled = Vec::new();
        for duplicate in active.iter().skip(1) {
            match self
                .payment_provider
                .cancel_subscription(&duplicate.id, true)
                .await
            {
                Ok(_) => canceled.push(duplicate.id.clone()),
                Err(e) => tracing::warn!(
                    subscription_id = %duplicate.id,
                    error = %e,
                    "Failed to cancel duplicate subscription"
                ),
            }
        }
        Ok(canceled)
    }
}
