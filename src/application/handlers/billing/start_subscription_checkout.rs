//! StartSubscriptionCheckoutHandler - Opens a hosted checkout for a plan.

use std::collections::HashMap;
use std::sync::Arc;

use super::checkout_support::{ensure_customer, RedirectUrls};
use crate::domain::billing::{BillingError, Catalog};
use crate::domain::foundation::UserId;
use crate::domain::webhook::metadata_keys;
use crate::ports::{CheckoutMode, CreateCheckoutRequest, CustomerRegistry, PaymentProvider};

/// Command to start a subscription checkout.
#[derive(Debug, Clone)]
pub struct StartSubscriptionCheckoutCommand {
    pub user_id: UserId,
    pub price_id: String,
    /// Used only when a customer record has to be created.
    pub email: Option<String>,
}

/// Result of a started checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCheckoutResult {
    pub session_id: String,
    pub checkout_url: String,
}

/// Handler for subscription checkouts.
///
/// The session is tagged with the user and price so the completion event
/// is attributable without a customer lookup, and the created subscription
/// inherits the user id for its own lifecycle events.
pub struct StartSubscriptionCheckoutHandler {
    catalog: Arc<Catalog>,
    registry: Arc<dyn CustomerRegistry>,
    payment_provider: Arc<dyn PaymentProvider>,
    urls: RedirectUrls,
}

impl StartSubscriptionCheckoutHandler {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<dyn CustomerRegistry>,
        payment_provider: Arc<dyn PaymentProvider>,
        urls: RedirectUrls,
    ) -> Self {
        Self {
            catalog,
            registry,
            payment_provider,
            urls,
        }
    }

    pub async fn handle(
        &self,
        cmd: StartSubscriptionCheckoutCommand,
    ) -> Result<StartCheckoutResult, BillingError> {
        // 1. Fail fast on unknown prices
        self.catalog.plan(&cmd.price_id)?;

        // 2. Look up or create the processor customer
        let customer_id = ensure_customer(
            self.registry.as_ref(),
            self.payment_provider.as_ref(),
            &cmd.user_id,
            cmd.email,
        )
        .await?;

        // 3. Open the session
        let metadata = HashMap::from([
            (metadata_keys::USER_ID.to_string(), cmd.user_id.to_string()),
            (metadata_keys::PRICE_ID.to_string(), cmd.price_id.clone()),
            (
                metadata_keys::TYPE.to_string(),
                metadata_keys::TYPE_SUBSCRIPTION.to_string(),
            ),
        ]);
        let subscription_metadata =
            HashMap::from([(metadata_keys::USER_ID.to_string(), cmd.user_id.to_string())]);

        let session = self
            .payment_provider
            .create_checkout_session(CreateCheckoutRequest {
                customer_id,
                mode: CheckoutMode::Subscription,
                price_id: cmd.price_id.clone(),
                success_url: self.urls.checkout_success(),
                cancel_url: self.urls.subscription_cancel(),
                metadata,
                subscription_metadata,
            })
            .await?;

        tracing::info!(
            user_id = %cmd.user_id,
            price_id = %cmd.price_id,
            session_id = %session.id,
            "Subscription checkout started"
        );

        Ok(StartCheckoutResult {
            session_id: session.id,
            checkout_url: session.url,
        })
    }
}
