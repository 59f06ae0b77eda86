//! Mock payment provider for testing.
//!
//! Configurable in-process implementation of `PaymentProvider` for unit and
//! integration tests. Supports:
//! - Seeded subscriptions (looked up, listed and canceled)
//! - Error injection, per method or for the next call
//! - Call tracking, including the last checkout request

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::ports::{
    CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest, Customer, PaymentError,
    PaymentProvider, PortalSession, Subscription, SubscriptionStatus,
};

/// Mock payment provider for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockPaymentProvider::new();
/// mock.add_subscription(subscription);
/// mock.set_method_error("cancel_subscription", PaymentError::network("reset"));
///
/// let subs = mock.list_active_subscriptions("cus_1").await?;
/// assert_eq!(mock.call_count("list_active_subscriptions"), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockPaymentProvider {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Seeded subscriptions by ID.
    subscriptions: HashMap<String, Subscription>,

    /// Customers created through the mock.
    customers: HashMap<String, Customer>,

    /// Checkout requests in arrival order.
    checkout_requests: Vec<CreateCheckoutRequest>,

    /// Error to return on next call.
    next_error: Option<PaymentError>,

    /// Errors by method name; persist until cleared.
    method_errors: HashMap<String, PaymentError>,

    /// Errors for one specific subscription on cancel.
    cancel_errors: HashMap<String, PaymentError>,

    call_log: Vec<MethodCall>,

    sequence: u64,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Add a subscription to the "database".
    pub fn add_subscription(&self, subscription: Subscription) {
        let id = subscription.id.clone();
        self.state().subscriptions.insert(id, subscription);
    }

    /// Set an error to return on the next call to any method.
    pub fn set_error(&self, error: PaymentError) {
        self.state().next_error = Some(error);
    }

    /// Set an error for a specific method.
    pub fn set_method_error(&self, method: &str, error: PaymentError) {
        self.state()
            .method_errors
            .insert(method.to_string(), error);
    }

    /// Make cancellation of one subscription fail.
    pub fn fail_cancel_of(&self, subscription_id: &str, error: PaymentError) {
        self.state()
            .cancel_errors
            .insert(subscription_id.to_string(), error);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.next_error = None;
        state.method_errors.clear();
        state.cancel_errors.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.state().call_log.iter().any(|c| c.method == method)
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn last_checkout_request(&self) -> Option<CreateCheckoutRequest> {
        self.state().checkout_requests.last().cloned()
    }

    /// Current view of a seeded subscription.
    pub fn subscription(&self, subscription_id: &str) -> Option<Subscription> {
        self.state().subscriptions.get(subscription_id).cloned()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_call(&self, method: &str, args: Vec<String>) {
        self.state().call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
    }

    fn check_error(&self, method: &str) -> Result<(), PaymentError> {
        let mut state = self.state();

        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }

        // Global error is consumed
        if let Some(error) = state.next_error.take() {
            return Err(error);
        }

        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state();
        state.sequence += 1;
        format!("{}_mock_{}", prefix, state.sequence)
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, PaymentError> {
        self.record_call("create_customer", vec![request.user_id.to_string()]);
        self.check_error("create_customer")?;

        let customer = Customer {
            id: self.next_id("cus"),
            email: request.email,
        };
        self.state()
            .customers
            .insert(customer.id.clone(), customer.clone());

        Ok(customer)
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Subscription>, PaymentError> {
        self.record_call("get_subscription", vec![subscription_id.to_string()]);
        self.check_error("get_subscription")?;

        Ok(self.subscription(subscription_id))
    }

    async fn list_active_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<Subscription>, PaymentError> {
        self.record_call("list_active_subscriptions", vec![customer_id.to_string()]);
        self.check_error("list_active_subscriptions")?;

        let mut subs: Vec<Subscription> = self
            .state()
            .subscriptions
            .values()
            .filter(|s| s.customer_id == customer_id && s.status == SubscriptionStatus::Active)
            .cloned()
            .collect();
        subs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(subs)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        prorate: bool,
    ) -> Result<Subscription, PaymentError> {
        self.record_call(
            "cancel_subscription",
            vec![subscription_id.to_string(), prorate.to_string()],
        );
        self.check_error("cancel_subscription")?;

        let mut state = self.state();
        if let Some(error) = state.cancel_errors.get(subscription_id) {
            return Err(error.clone());
        }

        let subscription = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| PaymentError::not_found("Subscription"))?;
        subscription.status = SubscriptionStatus::Canceled;

        Ok(subscription.clone())
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.record_call(
            "create_checkout_session",
            vec![
                request.customer_id.clone(),
                request.mode.as_str().to_string(),
                request.price_id.clone(),
            ],
        );
        self.check_error("create_checkout_session")?;

        let id = self.next_id("cs");
        self.state().checkout_requests.push(request);

        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.com/c/pay/{}", id),
            id,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, PaymentError> {
        self.record_call(
            "create_portal_session",
            vec![customer_id.to_string(), return_url.to_string()],
        );
        self.check_error("create_portal_session")?;

        let id = self.next_id("bps");
        Ok(PortalSession {
            url: format!("https://billing.stripe.com/p/session/{}", id),
            id,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Test Helpers
// ════════════════════════════════════════════════════════════════════════════════

impl MockPaymentProvider {
    /// Builds an active subscription with a 30-day period starting at `created`.
    pub fn active_subscription(
        subscription_id: &str,
        customer_id: &str,
        price_id: &str,
        created: i64,
    ) -> Subscription {
        Subscription {
            id: subscription_id.to_string(),
            customer_id: customer_id.to_string(),
            status: SubscriptionStatus::Active,
            price_id: Some(price_id.to_string()),
            current_period_start: created,
            current_period_end: created + 30 * 24 * 60 * 60,
            cancel_at_period_end: false,
            created,
        }
    }
}
