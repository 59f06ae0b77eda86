//! Payment processor configuration

use secrecy::SecretString;
use serde::Deserialize;

use super::error::ValidationError;

/// Stripe credentials and checkout redirect base.
#[derive(Clone, Default, Deserialize)]
pub struct PaymentConfig {
    pub stripe_api_key: String,

    pub stripe_webhook_secret: String,

    /// Public site origin used for checkout and portal redirects
    pub site_url: String,

    /// Override for the Stripe API origin (test doubles, proxies)
    pub stripe_api_base: Option<String>,

    /// Reject webhook events whose `livemode` flag is false
    #[serde(default)]
    pub require_livemode: bool,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("stripe_api_key", &"[REDACTED]")
            .field("stripe_webhook_secret", &"[REDACTED]")
            .field("site_url", &self.site_url)
            .field("stripe_api_base", &self.stripe_api_base)
            .field("require_livemode", &self.require_livemode)
            .finish()
    }
}

impl PaymentConfig {
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_live_")
    }

    pub fn api_key(&self) -> SecretString {
        SecretString::new(self.stripe_api_key.clone())
    }

    pub fn webhook_secret(&self) -> SecretString {
        SecretString::new(self.stripe_webhook_secret.clone())
    }

    /// Site origin without a trailing slash.
    pub fn site_origin(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }

    pub fn validate(&self, production: bool) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_API_KEY"));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_WEBHOOK_SECRET"));
        }
        if self.site_url.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__SITE_URL"));
        }

        if !self.stripe_api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }

        let https = self.site_url.starts_with("https://");
        if !https && !self.site_url.starts_with("http://") {
            return Err(ValidationError::InvalidSiteUrl);
        }
        if production && !https {
            return Err(ValidationError::SiteUrlMustBeHttps);
        }

        Ok(())
    }
}
