//! In-process adapters for tests and local development.

mod billing_store;
mod customer_registry;

pub use billing_store::InMemoryBillingStore;
pub use customer_registry::InMemoryCustomerRegistry;
