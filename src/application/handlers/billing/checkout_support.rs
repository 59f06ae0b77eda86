//! Pieces shared by the checkout and portal initiators.

use crate::domain::billing::BillingError;
use crate::domain::foundation::UserId;
use crate::ports::{CreateCustomerRequest, CustomerRegistry, PaymentProvider};

/// Redirect targets derived from the public site URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectUrls {
    site_url: String,
}

impl RedirectUrls {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn checkout_success(&self) -> String {
        format!("{}/dashboard?success=true", self.site_url)
    }

    pub fn subscription_cancel(&self) -> String {
        format!("{}/dashboard?canceled=true", self.site_url)
    }

    pub fn credits_cancel(&self) -> String {
        format!("{}/credits?canceled=true", self.site_url)
    }

    pub fn portal_return(&self) -> String {
        format!("{}/dashboard", self.site_url)
    }
}

/// Returns the user's processor customer, creating and registering one on
/// first use.
pub(super) async fn ensure_customer(
    registry: &dyn CustomerRegistry,
    payment_provider: &dyn PaymentProvider,
    user_id: &UserId,
    email: Option<String>,
) -> Result<String, BillingError> {
    if let Some(customer_id) = registry.find_customer_id(user_id).await? {
        return Ok(customer_id);
    }

    let customer = payment_provider
        .create_customer(CreateCustomerRequest {
            user_id: user_id.clone(),
            email,
        })
        .await?;

    registry.save_customer_id(user_id, &customer.id).await?;
    tracing::info!(user_id = %user_id, customer_id = %customer.id, "Registered payment customer");

    Ok(customer.id)
}
