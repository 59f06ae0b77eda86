//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `billing` - Entitlements, ledgers, catalog, and reconciliation
//! - `webhook` - Provider event verification and classification

pub mod billing;
pub mod foundation;
pub mod webhook;
