//! Meditation Billing - subscription and credit reconciliation
//!
//! This crate keeps a meditation service's view of what each user has paid
//! for in step with the payment processor. Processor webhooks are verified,
//! deduplicated and folded into per-user entitlements, credit and minute
//! ledgers. The same ledgers back the debit and refund calls made when
//! meditations are generated.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
