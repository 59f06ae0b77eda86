//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `EntitlementStore` / `UserUnitOfWork` - Per-user atomic persistence
//! - `IdempotencyGuard` - Processed event ids
//! - `CustomerRegistry` - User to processor customer mapping
//! - `PaymentProvider` - Outbound payment processor calls

mod customer_registry;
mod entitlement_store;
mod idempotency_guard;
mod payment_provider;

pub use customer_registry::CustomerRegistry;
pub use entitlement_store::{refund_key, BillingChange, EntitlementStore, UserUnitOfWork};
pub use idempotency_guard::IdempotencyGuard;
pub use payment_provider::{
    CheckoutMode, CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest, Customer,
    PaymentError, PaymentErrorCode, PaymentProvider, PortalSession, Subscription,
    SubscriptionStatus,
};
