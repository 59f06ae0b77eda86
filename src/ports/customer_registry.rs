//! Customer registry port.
//!
//! Maps users to their payment-processor customer ids. Written lazily by
//! the checkout initiator; read by the portal initiator and by the
//! webhook pipeline to attribute events that carry no user metadata.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, UserId};

#[async_trait]
pub trait CustomerRegistry: Send + Sync {
    async fn find_customer_id(&self, user_id: &UserId) -> Result<Option<String>, DomainError>;

    /// Stores the mapping. Re-saving the same pair is a no-op.
    async fn save_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<(), DomainError>;

    async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<UserId>, DomainError>;
}
