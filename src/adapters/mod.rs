//! Adapters - Implementations of port interfaces.
//!
//! - `http` - axum routes and DTOs
//! - `memory` - in-process store, guard and registry
//! - `postgres` - sqlx-backed store and registry
//! - `stripe` - payment processor client and mock

pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;

pub use memory::{InMemoryBillingStore, InMemoryCustomerRegistry};
pub use postgres::{PostgresBillingStore, PostgresCustomerRegistry};
pub use stripe::{MockPaymentProvider, StripeConfig, StripePaymentAdapter};
