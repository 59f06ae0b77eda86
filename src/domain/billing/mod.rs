//! Billing domain.
//!
//! Entitlements, the two ledgers, the catalog that prices them, and the
//! pure reconciliation handlers that move a user's state forward when the
//! payment processor reports a change.
//!
//! # Module Organization
//!
//! - `catalog` - Price and credit-package lookup
//! - `entitlement` - Subscription-derived entitlement aggregate
//! - `ledger` - Credit and minute balances with debit/refund
//! - `history` - Append-only record of entitlements leaving `Active`
//! - `state` - Per-user state and its read-only snapshot
//! - `reconciliation` - Event handlers

mod catalog;
mod entitlement;
mod errors;
mod history;
mod ledger;
mod reconciliation;
mod state;
mod status;
mod tier;

pub use catalog::{Allotment, Catalog, CreditPackage, PlanEntry};
pub use entitlement::{BillingPeriod, Entitlement};
pub use errors::{BillingError, CatalogKind};
pub use history::{HistoryReason, SubscriptionHistoryEntry};
pub use ledger::{debit, refund, CreditLedger, LedgerBalance, MinuteLedger};
pub use reconciliation::{reconcile, BillingEvent, Effect, Reconciled, SubscriptionTerms};
pub use state::{BillingSnapshot, UserBillingState};
pub use status::EntitlementStatus;
pub use tier::PlanTier;
