//! HTTP adapter for billing endpoints.
//!
//! - `POST /api/webhooks/stripe` - Apply a payment-processor event
//! - `GET /api/billing/credits` - Entitlement snapshot
//! - `GET /api/billing/history` - Subscription history
//! - `POST /api/billing/checkout/subscription` - Start a plan checkout
//! - `POST /api/billing/checkout/credits` - Start a credit package checkout
//! - `POST /api/billing/portal` - Open the billing portal
//! - `POST /api/billing/ledger/debit` - Debit generation minutes
//! - `POST /api/billing/ledger/refund` - Refund generation minutes

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::{AuthenticatedUser, BillingApiError, BillingAppState};
pub use routes::billing_router;
