//! PostgreSQL implementation of CustomerRegistry.

use async_trait::async_trait;
use sqlx::PgPool;

use super::billing_store::db_error;
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::CustomerRegistry;

#[derive(Clone)]
pub struct PostgresCustomerRegistry {
    pool: PgPool,
}

impl PostgresCustomerRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRegistry for PostgresCustomerRegistry {
    async fn find_customer_id(&self, user_id: &UserId) -> Result<Option<String>, DomainError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT customer_id FROM billing_customers WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("find customer"))?;
        Ok(row.map(|(id,)| id))
    }

    async fn save_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO billing_customers (user_id, customer_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET customer_id = EXCLUDED.customer_id
            "#,
        )
        .bind(user_id.as_str())
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("save customer"))?;
        Ok(())
    }

    async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<UserId>, DomainError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM billing_customers WHERE customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("find customer owner"))?;

        row.map(|(id,)| {
            UserId::new(id).map_err(|e| {
                DomainError::new(ErrorCode::DatabaseError, format!("Invalid user_id in database: {}", e))
            })
        })
        .transpose()
    }
}
