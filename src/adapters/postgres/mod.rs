//! PostgreSQL adapters.
//!
//! - `PostgresBillingStore` - Entitlements, ledgers, history, processed keys
//! - `PostgresCustomerRegistry` - User to processor customer mapping
//!
//! Schema lives in `migrations/`.

mod billing_store;
mod customer_registry;

pub use billing_store::PostgresBillingStore;
pub use customer_registry::PostgresCustomerRegistry;
