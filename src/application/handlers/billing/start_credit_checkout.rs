//! StartCreditCheckoutHandler - Opens a one-time checkout for a credit package.

use std::collections::HashMap;
use std::sync::Arc;

use super::checkout_support::{ensure_customer, RedirectUrls};
use super::start_subscription_checkout::StartCheckoutResult;
use crate::domain::billing::{BillingError, Catalog};
use crate::domain::foundation::UserId;
use crate::domain::webhook::metadata_keys;
use crate::ports::{CheckoutMode, CreateCheckoutRequest, CustomerRegistry, PaymentProvider};

/// Command to start a credit package purchase.
#[derive(Debug, Clone)]
pub struct StartCreditCheckoutCommand {
    pub user_id: UserId,
    /// Package id, which is also the processor price of the line item.
    pub package_id: String,
    pub email: Option<String>,
}

pub struct StartCreditCheckoutHandler {
    catalog: Arc<Catalog>,
    registry: Arc<dyn CustomerRegistry>,
    payment_provider: Arc<dyn PaymentProvider>,
    urls: RedirectUrls,
}

impl StartCreditCheckoutHandler {
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
        cmd: StartCreditCheckoutCommand,
    ) -> Result<StartCheckoutResult, BillingError> {
        self.catalog.package(&cmd.package_id)?;

        let customer_id = ensure_customer(
            self.registry.as_ref(),
            self.payment_provider.as_ref(),
            &cmd.user_id,
            cmd.email,
        )
        .await?;

        let metadata = HashMap::from([
            (metadata_keys::USER_ID.to_string(), cmd.user_id.to_string()),
            (metadata_keys::PACKAGE_ID.to_string(), cmd.package_id.clone()),
            (
                metadata_keys::TYPE.to_string(),
                metadata_keys::TYPE_CREDIT_PURCHASE.to_string(),
            ),
        ]);

        let session = self
            .payment_provider
            .create_checkout_session(CreateCheckoutRequest {
                customer_id,
                mode: CheckoutMode::Payment,
                price_id: cmd.package_id.clone(),
                success_url: self.urls.checkout_success(),
                cancel_url: self.urls.credits_cancel(),
                metadata,
                subscription_metadata: HashMap::new(),
            })
            .await?;

        tracing::info!(
            user_id = %cmd.user_id,
            package_id = %cmd.package_id,
            session_id = %session.id,
            "Credit checkout started"
        );

        Ok(StartCheckoutResult {
            session_id: session.id,
            checkout_url: session.url,
        })
    }
}
