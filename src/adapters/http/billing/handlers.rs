//! HTTP handlers for billing endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Json, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::{
    DebitMinutesCommand, DebitMinutesHandler, GetBillingSnapshotHandler, GetBillingSnapshotQuery,
    GetSubscriptionHistoryHandler, GetSubscriptionHistoryQuery, HandleBillingWebhookCommand,
    HandleBillingWebhookHandler, RedirectUrls, RefundMinutesCommand, RefundMinutesHandler,
    StartCreditCheckoutCommand, StartCreditCheckoutHandler, StartPortalSessionCommand,
    StartPortalSessionHandler, StartSubscriptionCheckoutCommand, StartSubscriptionCheckoutHandler,
};
use crate::domain::billing::{BillingError, Catalog};
use crate::domain::foundation::UserId;
use crate::domain::webhook::WebhookVerifier;
use crate::ports::{CustomerRegistry, EntitlementStore, IdempotencyGuard, PaymentProvider};

use super::dto::{
    CheckoutResponse, CreditCheckoutRequest, CreditsResponse, DebitRequest, ErrorResponse,
    HistoryEntryResponse, LedgerResponse, PortalResponse, RefundRequest, RefundResponse,
    SubscriptionCheckoutRequest, WebhookAckResponse,
};

/// Header carrying the provider's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Header carrying the authenticated caller, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "X-User-Id";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned for each request; handlers are built on demand from it.
#[derive(Clone)]
pub struct BillingAppState {
    pub store: Arc<dyn EntitlementStore>,
    pub guard: Arc<dyn IdempotencyGuard>,
    pub registry: Arc<dyn CustomerRegistry>,
    pub payment_provider: Arc<dyn PaymentProvider>,
    pub verifier: Arc<WebhookVerifier>,
    pub catalog: Arc<Catalog>,
    pub urls: RedirectUrls,
}

impl BillingAppState {
    pub fn webhook_handler(&self) -> HandleBillingWebhookHandler {
        HandleBillingWebhookHandler::new(
            self.verifier.clone(),
            self.guard.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.payment_provider.clone(),
            self.catalog.clone(),
        )
    }

    pub fn subscription_checkout_handler(&self) -> StartSubscriptionCheckoutHandler {
        StartSubscriptionCheckoutHandler::new(
            self.catalog.clone(),
            self.registry.clone(),
            self.payment_provider.clone(),
            self.urls.clone(),
        )
    }

    pub fn credit_checkout_handler(&self) -> StartCreditCheckoutHandler {
        StartCreditCheckoutHandler::new(
            self.catalog.clone(),
            self.registry.clone(),
            self.payment_provider.clone(),
            self.urls.clone(),
        )
    }

    pub fn portal_handler(&self) -> StartPortalSessionHandler {
        StartPortalSessionHandler::new(
            self.registry.clone(),
            self.payment_provider.clone(),
            self.urls.clone(),
        )
    }

    pub fn snapshot_handler(&self) -> GetBillingSnapshotHandler {
        GetBillingSnapshotHandler::new(self.store.clone())
    }

    pub fn history_handler(&self) -> GetSubscriptionHistoryHandler {
        GetSubscriptionHistoryHandler::new(self.store.clone())
    }

    pub fn debit_handler(&self) -> DebitMinutesHandler {
        DebitMinutesHandler::new(self.store.clone(), self.catalog.clone())
    }

    pub fn refund_handler(&self) -> RefundMinutesHandler {
        RefundMinutesHandler::new(self.store.clone(), self.catalog.clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// User Context
// ════════════════════════════════════════════════════════════════════════════════

/// Authenticated caller, as asserted by the session layer in front of us.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Rejection type for AuthenticatedUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> Response {
        let error = ErrorResponse::new("AUTHENTICATION_REQUIRED", "Authentication is required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| UserId::new(s).ok())
            .ok_or(AuthenticationRequired)?;

        Ok(AuthenticatedUser { user_id })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/webhooks/stripe - Apply a payment-processor event
pub async fn handle_stripe_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, BillingApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = state
        .webhook_handler()
        .handle(HandleBillingWebhookCommand {
            payload: body.to_vec(),
            signature,
        })
        .await?;

    Ok(Json(WebhookAckResponse {
        received: true,
        outcome: outcome.kind(),
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/billing/credits - Entitlement snapshot for the caller
pub async fn get_credits(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let snapshot = state
        .snapshot_handler()
        .handle(GetBillingSnapshotQuery {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(CreditsResponse::from(snapshot)))
}

/// GET /api/billing/history - Subscription history for the caller
pub async fn get_history(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let entries = state
        .history_handler()
        .handle(GetSubscriptionHistoryQuery {
            user_id: user.user_id,
        })
        .await?;

    let body: Vec<HistoryEntryResponse> = entries.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/billing/checkout/subscription - Start a plan checkout
pub async fn create_subscription_checkout(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<SubscriptionCheckoutRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .subscription_checkout_handler()
        .handle(StartSubscriptionCheckoutCommand {
            user_id: user.user_id,
            price_id: request.price_id,
            email: request.email,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            checkout_url: result.checkout_url,
        }),
    ))
}

/// POST /api/billing/checkout/credits - Start a credit package checkout
pub async fn create_credit_checkout(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreditCheckoutRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .credit_checkout_handler()
        .handle(StartCreditCheckoutCommand {
            user_id: user.user_id,
            package_id: request.package_id,
            email: request.email,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            checkout_url: result.checkout_url,
        }),
    ))
}

/// POST /api/billing/portal - Open the billing portal
pub async fn create_portal_session(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .portal_handler()
        .handle(StartPortalSessionCommand {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(PortalResponse {
        portal_url: result.portal_url,
    }))
}

/// POST /api/billing/ledger/debit - Reserve minutes for a generation
pub async fn debit_minutes(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<DebitRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let balance = state
        .debit_handler()
        .handle(DebitMinutesCommand {
            user_id: user.user_id,
            minutes: request.minutes,
        })
        .await?;

    Ok(Json(LedgerResponse::from(balance)))
}

/// POST /api/billing/ledger/refund - Return minutes of a failed generation
pub async fn refund_minutes(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<RefundRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let result = state
        .refund_handler()
        .handle(RefundMinutesCommand {
            user_id: user.user_id,
            minutes: request.minutes,
            attempt_id: request.attempt_id,
        })
        .await?;

    Ok(Json(RefundResponse {
        remaining_credits: result.balance.remaining_credits,
        remaining_minutes: result.balance.remaining_minutes,
        already_refunded: result.already_refunded,
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct BillingApiError(pub BillingError);

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Billing request failed");
        }

        let body = ErrorResponse::new(self.0.code(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: BillingError) -> (StatusCode, serde_json::Value) {
        let response = BillingApiError(err).into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn customer_not_found_renders_404_with_guidance() {
        let (status, body) = render(BillingError::CustomerNotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "CUSTOMER_NOT_FOUND");
        assert_eq!(
            body["message"],
            "Customer not found. Please subscribe to a plan first."
        );
    }

    #[tokio::test]
    async fn insufficient_credits_renders_402() {
        let (status, body) = render(BillingError::InsufficientCredits {
            required: 100,
            available: 55,
        })
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["code"], "INSUFFICIENT_CREDITS");
    }

    #[tokio::test]
    async fn storage_conflict_renders_503() {
        let (status, _) = render(BillingError::StorageConflict("deadlock".into())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn extractor_requires_user_header() {
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/")
            .body(())
            .unwrap()
            .into_parts();
        assert!(AuthenticatedUser::from_request_parts(&mut parts, &())
            .await
            .is_err());

        let (mut parts, _) = axum::http::Request::builder()
            .uri("/")
            .header(USER_ID_HEADER, "user-9")
            .body(())
            .unwrap()
            .into_parts();
        let user = AuthenticatedUser::from_request_parts(&mut parts, &())
            .await
            .unwrap_or_else(|_| panic!("user header should authenticate"));
        assert_eq!(user.user_id.as_str(), "user-9");
    }
}
