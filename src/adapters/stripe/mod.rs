//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` port for Stripe:
//! - Customer creation
//! - Subscription lookup, listing and cancellation
//! - Hosted checkout and billing portal sessions
//!
//! Webhook signature verification lives in `domain::webhook`.
//!
//! # Configuration
//!
//! The secret key is read from `MEDITATION_BILLING__PAYMENT__API_KEY` and
//! handled as a `secrecy::SecretString`.

mod mock_payment_provider;
mod stripe_adapter;

pub use mock_payment_provider::{MethodCall, MockPaymentProvider};
pub use stripe_adapter::{StripeConfig, StripePaymentAdapter};
