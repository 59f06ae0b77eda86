//! In-memory customer registry.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::CustomerRegistry;

#[derive(Default)]
pub struct InMemoryCustomerRegistry {
    customers: RwLock<HashMap<UserId, String>>,
}

impl InMemoryCustomerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerRegistry for InMemoryCustomerRegistry {
    async fn find_customer_id(&self, user_id: &UserId) -> Result<Option<String>, DomainError> {
        Ok(self.customers.read().await.get(user_id).cloned())
    }

    async fn save_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<(), DomainError> {
        let mut customers = self.customers.write().await;
        if let Some((owner, _)) = customers
            .iter()
            .find(|(owner, id)| id.as_str() == customer_id && *owner != user_id)
        {
            return Err(DomainError::new(
                ErrorCode::ConstraintViolation,
                format!("customer {} already belongs to {}", customer_id, owner),
            ));
        }
        customers.insert(user_id.clone(), customer_id.to_string());
        Ok(())
    }

    async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<UserId>, DomainError> {
        Ok(self
            .customers
            .read()
            .await
            .iter()
            .find(|(_, id)| id.as_str() == customer_id)
            .map(|(user, _)| user.clone()))
    }
}
