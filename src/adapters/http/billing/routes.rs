//! Axum router configuration for billing endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    create_credit_checkout, create_portal_session, create_subscription_checkout, debit_minutes,
    get_credits, get_history, handle_stripe_webhook, refund_minutes, BillingAppState,
};

/// User endpoints, authenticated via `X-User-Id`.
///
/// # Routes
/// - `GET /credits` - Entitlement snapshot
/// - `GET /history` - Subscription history
/// - `POST /checkout/subscription` - Start a plan checkout
/// - `POST /checkout/credits` - Start a credit package checkout
/// - `POST /portal` - Open the billing portal
/// - `POST /ledger/debit` - Debit generation minutes
/// - `POST /ledger/refund` - Refund generation minutes
pub fn billing_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/credits", get(get_credits))
        .route("/history", get(get_history))
        .route("/checkout/subscription", post(create_subscription_checkout))
        .route("/checkout/credits", post(create_credit_checkout))
        .route("/portal", post(create_portal_session))
        .route("/ledger/debit", post(debit_minutes))
        .route("/ledger/refund", post(refund_minutes))
}

/// Webhook endpoints. No user auth; deliveries are signature verified.
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// Billing and webhook routes, suitable for mounting under `/api`.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .nest("/billing", billing_routes())
        .nest("/webhooks", webhook_routes())
}
