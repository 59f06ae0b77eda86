//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` port against the Stripe REST API using
//! form-encoded requests authenticated with the secret key.
//!
//! Webhook verification is not done here; it belongs to the webhook domain
//! (`WebhookVerifier`) so the pipeline can run without network access.
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key).with_timeout(Duration::from_secs(10));
//! let adapter = StripePaymentAdapter::new(config)?;
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::domain::webhook::SubscriptionObject;
use crate::ports::{
    CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest, Customer, PaymentError,
    PaymentErrorCode, PaymentProvider, PortalSession, Subscription, SubscriptionStatus,
};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for the API; overridden in tests.
    api_base_url: String,

    /// Per-request timeout.
    timeout: Duration,
}

impl StripeConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Stripe payment provider adapter.
pub struct StripePaymentAdapter {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripePaymentAdapter {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::network(format!("http client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base_url, path)
    }

    /// Sends a request and decodes the JSON body, mapping Stripe errors.
    ///
    /// Returns `Ok(None)` on 404 so lookups can report absence.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>, PaymentError> {
        let response = request
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(operation, error = %e, "Stripe request failed");
                PaymentError::network(e.to_string())
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = map_api_error(status.as_u16(), &body);
            tracing::error!(
                operation,
                status = status.as_u16(),
                code = %error.code,
                provider_code = ?error.provider_code,
                "Stripe API error"
            );
            return Err(error);
        }

        response.json::<T>().await.map(Some).map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("Failed to parse Stripe response: {}", e),
            )
        })
    }

    async fn send_required<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        resource: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PaymentError> {
        self.send(operation, request)
            .await?
            .ok_or_else(|| PaymentError::not_found(resource))
    }
}

#[async_trait]
impl PaymentProvider for StripePaymentAdapter {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, PaymentError> {
        let mut params = vec![("metadata[user_id]", request.user_id.to_string())];
        if let Some(email) = &request.email {
            params.push(("email", email.clone()));
        }

        let customer: StripeCustomer = self
            .send_required(
                "create_customer",
                "Customer",
                self.http_client.post(self.url("customers")).form(&params),
            )
            .await?;

        tracing::info!(user_id = %request.user_id, customer_id = %customer.id, "Stripe customer created");

        Ok(Customer {
            id: customer.id,
            email: customer.email.or(request.email),
        })
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Subscription>, PaymentError> {
        let sub: Option<SubscriptionObject> = self
            .send(
                "get_subscription",
                self.http_client
                    .get(self.url(&format!("subscriptions/{}", subscription_id))),
            )
            .await?;

        Ok(sub.map(to_subscription))
    }

    async fn list_active_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<Subscription>, PaymentError> {
        let list: StripeList<SubscriptionObject> = self
            .send_required(
                "list_active_subscriptions",
                "Customer",
                self.http_client.get(self.url("subscriptions")).query(&[
                    ("customer", customer_id),
                    ("status", "active"),
                    ("limit", "100"),
                ]),
            )
            .await?;

        Ok(list.data.into_iter().map(to_subscription).collect())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        prorate: bool,
    ) -> Result<Subscription, PaymentError> {
        let prorate = if prorate { "true" } else { "false" };
        let sub: SubscriptionObject = self
            .send_required(
                "cancel_subscription",
                "Subscription",
                self.http_client
                    .delete(self.url(&format!("subscriptions/{}", subscription_id)))
                    .form(&[("prorate", prorate)]),
            )
            .await?;

        Ok(to_subscription(sub))
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let params = checkout_params(&request);

        let session: StripeSession = self
            .send_required(
                "create_checkout_session",
                "Checkout session",
                self.http_client
                    .post(self.url("checkout/sessions"))
                    .form(&params),
            )
            .await?;

        let url = session.url.ok_or_else(|| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                "Checkout session returned without a URL",
            )
        })?;

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, PaymentError> {
        let session: StripeSession = self
            .send_required(
                "create_portal_session",
                "Customer",
                self.http_client
                    .post(self.url("billing_portal/sessions"))
                    .form(&[("customer", customer_id), ("return_url", return_url)]),
            )
            .await?;

        let url = session.url.ok_or_else(|| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                "Portal session returned without a URL",
            )
        })?;

        Ok(PortalSession {
            id: session.id,
            url,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Wire types and mapping
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Form fields for a single-item checkout session.
fn checkout_params(request: &CreateCheckoutRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), request.mode.as_str().to_string()),
        ("customer".to_string(), request.customer_id.clone()),
        ("line_items[0][price]".to_string(), request.price_id.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];

    params.extend(form_map("metadata", &request.metadata));
    params.extend(form_map(
        "subscription_data[metadata]",
        &request.subscription_metadata,
    ));
    params
}

fn form_map(prefix: &str, map: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut entries: Vec<_> = map
        .iter()
        .map(|(k, v)| (format!("{}[{}]", prefix, k), v.clone()))
        .collect();
    entries.sort();
    entries
}

fn to_subscription(sub: SubscriptionObject) -> Subscription {
    let price_id = sub.price_id().map(str::to_string);
    Subscription {
        status: SubscriptionStatus::parse(&sub.status),
        customer_id: sub.customer.unwrap_or_default(),
        price_id,
        current_period_start: sub.current_period_start,
        current_period_end: sub.current_period_end,
        cancel_at_period_end: sub.cancel_at_period_end,
        created: sub.created.unwrap_or(sub.current_period_start),
        id: sub.id,
    }
}

fn map_api_error(status: u16, body: &str) -> PaymentError {
    let parsed = serde_json::from_str::<StripeErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|e| e.error.message.clone())
        .unwrap_or_else(|| format!("Stripe API error (HTTP {})", status));

    let code = match status {
        400 | 402 | 409 => PaymentErrorCode::InvalidRequest,
        401 | 403 => PaymentErrorCode::AuthenticationError,
        404 => PaymentErrorCode::NotFound,
        429 => PaymentErrorCode::RateLimitExceeded,
        500..=599 => PaymentErrorCode::ProviderError,
        _ => PaymentErrorCode::Unknown,
    };

    let error = PaymentError::new(code, message);
    match parsed.and_then(|e| e.error.code) {
        Some(provider_code) => error.with_provider_code(provider_code),
        None => error,
    }
}
