//! Billing handlers.
//!
//! ## Commands
//! - Applying payment-processor webhooks
//! - Starting subscription and credit checkouts
//! - Opening the billing portal (with duplicate-subscription cleanup)
//! - Debiting and refunding generation minutes
//!
//! ## Queries
//! - Entitlement snapshot
//! - Subscription history

mod checkout_support;
mod debit_minutes;
mod get_billing_snapshot;
mod handle_billing_webhook;
mod refund_minutes;
mod start_credit_checkout;
mod start_portal_session;
mod start_subscription_checkout;

pub use checkout_support::RedirectUrls;

// Commands
pub use debit_minutes::{DebitMinutesCommand, DebitMinutesHandler};
pub use handle_billing_webhook::{
    HandleBillingWebhookCommand, HandleBillingWebhookHandler, WebhookOutcome, WebhookOutcomeKind,
};
pub use refund_minutes::{RefundMinutesCommand, RefundMinutesHandler, RefundMinutesResult};
pub use start_credit_checkout::{StartCreditCheckoutCommand, StartCreditCheckoutHandler};
pub use start_portal_session::{
    StartPortalSessionCommand, StartPortalSessionHandler, StartPortalSessionResult,
};
pub use start_subscription_checkout::{
    StartCheckoutResult, StartSubscriptionCheckoutCommand, StartSubscriptionCheckoutHandler,
};

// Queries
pub use get_billing_snapshot::{
    GetBillingSnapshotHandler, GetBillingSnapshotQuery, GetSubscriptionHistoryHandler,
    GetSubscriptionHistoryQuery,
};
