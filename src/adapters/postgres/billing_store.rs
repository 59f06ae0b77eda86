//! PostgreSQL implementation of EntitlementStore and IdempotencyGuard.
//!
//! A unit of work is one transaction. It opens with a transaction-scoped
//! advisory lock on the user id, then reads the user's rows `FOR UPDATE`,
//! so two units for the same user run strictly one after the other while
//! other users proceed in parallel. Processed keys are inserted inside the
//! same transaction and become visible only with the state they gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::billing::{
    Allotment, BillingPeriod, CreditLedger, Entitlement, EntitlementStatus, HistoryReason,
    MinuteLedger, PlanTier, SubscriptionHistoryEntry, UserBillingState,
};
use crate::domain::foundation::{
    DomainError, EntitlementId, ErrorCode, HistoryEntryId, Timestamp, UserId,
};
use crate::ports::{BillingChange, EntitlementStore, IdempotencyGuard, UserUnitOfWork};

/// PostgreSQL billing store.
#[derive(Clone)]
pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntitlementRow {
    id: Uuid,
    user_id: String,
    provider_subscription_id: String,
    status: String,
    tier: String,
    current_period_minutes: i64,
    current_period_credits: i64,
    next_period_minutes: i64,
    next_period_credits: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    cancel_at_period_end: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntitlementRow> for Entitlement {
    type Error = DomainError;

    fn try_from(row: EntitlementRow) -> Result<Self, Self::Error> {
        let status: EntitlementStatus = row.status.parse().map_err(corrupt("status"))?;
        let tier: PlanTier = row.tier.parse().map_err(corrupt("tier"))?;
        let period = BillingPeriod::new(
            Timestamp::from_datetime(row.period_start),
            Timestamp::from_datetime(row.period_end),
        )
        .map_err(corrupt("period"))?;

        Ok(Entitlement {
            id: EntitlementId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(corrupt("user_id"))?,
            provider_subscription_id: row.provider_subscription_id,
            status,
            tier,
            current_period: Allotment::new(row.current_period_minutes, row.current_period_credits),
            next_period: Allotment::new(row.next_period_minutes, row.next_period_credits),
            period,
            cancel_at_period_end: row.cancel_at_period_end,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    user_id: String,
    provider_subscription_id: String,
    previous_status: String,
    new_status: String,
    reason: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for SubscriptionHistoryEntry {
    type Error = DomainError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionHistoryEntry {
            id: HistoryEntryId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(corrupt("user_id"))?,
            provider_subscription_id: row.provider_subscription_id,
            previous_status: row.previous_status.parse().map_err(corrupt("previous_status"))?,
            new_status: row.new_status.parse().map_err(corrupt("new_status"))?,
            reason: row.reason.parse::<HistoryReason>().map_err(corrupt("reason"))?,
            recorded_at: Timestamp::from_datetime(row.recorded_at),
        })
    }
}

const SELECT_ENTITLEMENTS: &str = r#"
    SELECT id, user_id, provider_subscription_id, status, tier,
           current_period_minutes, current_period_credits,
           next_period_minutes, next_period_credits,
           period_start, period_end, cancel_at_period_end, created_at, updated_at
    FROM entitlements
    WHERE user_id = $1
    ORDER BY created_at
"#;

async fn load_state(
    conn: &mut PgConnection,
    user_id: &UserId,
    for_update: bool,
) -> Result<UserBillingState, DomainError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };

    let rows: Vec<EntitlementRow> = sqlx::query_as(&format!("{}{}", SELECT_ENTITLEMENTS, lock))
        .bind(user_id.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error("load entitlements"))?;

    let credits: Option<(i64, i64)> = sqlx::query_as(&format!(
        "SELECT available_credits, total_credits_granted FROM credit_ledgers WHERE user_id = $1{}",
        lock
    ))
    .bind(user_id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error("load credit ledger"))?;

    let minutes: Option<(i64, i64)> = sqlx::query_as(&format!(
        "SELECT available_minutes, total_minutes_used FROM minute_ledgers WHERE user_id = $1{}",
        lock
    ))
    .bind(user_id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error("load minute ledger"))?;

    let mut state = UserBillingState::empty(user_id.clone());
    state.entitlements = rows
        .into_iter()
        .map(Entitlement::try_from)
        .collect::<Result<_, _>>()?;
    if let Some((available_credits, total_credits_granted)) = credits {
        state.credits = CreditLedger {
            available_credits,
            total_credits_granted,
        };
    }
    if let Some((available_minutes, total_minutes_used)) = minutes {
        state.minutes = MinuteLedger {
            available_minutes,
            total_minutes_used,
        };
    }
    Ok(state)
}

#[async_trait]
impl EntitlementStore for PostgresBillingStore {
    async fn begin(&self, user_id: &UserId) -> Result<Box<dyn UserUnitOfWork>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin transaction"))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error("acquire user lock"))?;

        let state = load_state(&mut *tx, user_id, true).await?;

        Ok(Box::new(PostgresUnitOfWork { tx, state }))
    }

    async fn load(&self, user_id: &UserId) -> Result<UserBillingState, DomainError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(db_error("acquire connection"))?;
        load_state(&mut *conn, user_id, false).await
    }

    async fn history(&self, user_id: &UserId) -> Result<Vec<SubscriptionHistoryEntry>, DomainError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, provider_subscription_id, previous_status, new_status,
                   reason, recorded_at
            FROM subscription_history
            WHERE user_id = $1
            ORDER BY recorded_at, id
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load history"))?;

        rows.into_iter().map(SubscriptionHistoryEntry::try_from).collect()
    }

    async fn find_user_by_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<UserId>, DomainError> {
        let owner: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM entitlements WHERE provider_subscription_id = $1",
        )
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("find subscription owner"))?;

        owner
            .map(|(id,)| UserId::new(id).map_err(corrupt("user_id")))
            .transpose()
    }
}

#[async_trait]
impl IdempotencyGuard for PostgresBillingStore {
    async fn admit(&self, key: &str) -> Result<bool, DomainError> {
        insert_processed_key(&self.pool, key).await
    }

    async fn is_processed(&self, key: &str) -> Result<bool, DomainError> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT event_key FROM processed_events WHERE event_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("check processed key"))?;
        Ok(found.is_some())
    }
}

async fn insert_processed_key<'e, E>(executor: E, key: &str) -> Result<bool, DomainError>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO processed_events (event_key) VALUES ($1) ON CONFLICT (event_key) DO NOTHING",
    )
    .bind(key)
    .execute(executor)
    .await
    .map_err(db_error("record processed key"))?;
    Ok(result.rows_affected() == 1)
}

struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
    state: UserBillingState,
}

#[async_trait]
impl UserUnitOfWork for PostgresUnitOfWork {
    fn state(&self) -> &UserBillingState {
        &self.state
    }

    async fn admit(&mut self, key: &str) -> Result<bool, DomainError> {
        insert_processed_key(&mut *self.tx, key).await
    }

    async fn commit(self: Box<Self>, change: BillingChange) -> Result<(), DomainError> {
        let PostgresUnitOfWork { mut tx, state: before } = *self;
        let after = change.state;
        let now = Utc::now();

        // Deactivations first so the one-active index never sees two rows
        let mut changed: Vec<&Entitlement> = after
            .entitlements
            .iter()
            .filter(|e| !before.entitlements.contains(e))
            .collect();
        changed.sort_by_key(|e| e.is_active());

        for entitlement in changed {
            upsert_entitlement(&mut tx, entitlement).await?;
        }

        if after.credits != before.credits {
            sqlx::query(
                r#"
                INSERT INTO credit_ledgers (user_id, available_credits, total_credits_granted, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id) DO UPDATE SET
                    available_credits = EXCLUDED.available_credits,
                    total_credits_granted = EXCLUDED.total_credits_granted,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(after.user_id.as_str())
            .bind(after.credits.available_credits)
            .bind(after.credits.total_credits_granted)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error("write credit ledger"))?;
        }

        if after.minutes != before.minutes {
            sqlx::query(
                r#"
                INSERT INTO minute_ledgers (user_id, available_minutes, total_minutes_used, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id) DO UPDATE SET
                    available_minutes = EXCLUDED.available_minutes,
                    total_minutes_used = EXCLUDED.total_minutes_used,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(after.user_id.as_str())
            .bind(after.minutes.available_minutes)
            .bind(after.minutes.total_minutes_used)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error("write minute ledger"))?;
        }

        for entry in &change.history {
            sqlx::query(
                r#"
                INSERT INTO subscription_history (
                    id, user_id, provider_subscription_id, previous_status, new_status,
                    reason, recorded_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.user_id.as_str())
            .bind(&entry.provider_subscription_id)
            .bind(entry.previous_status.as_str())
            .bind(entry.new_status.as_str())
            .bind(entry.reason.as_str())
            .bind(entry.recorded_at.as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(db_error("append history"))?;
        }

        tx.commit().await.map_err(db_error("commit transaction"))
    }
}

async fn upsert_entitlement(
    tx: &mut Transaction<'static, Postgres>,
    e: &Entitlement,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO entitlements (
            id, user_id, provider_subscription_id, status, tier,
            current_period_minutes, current_period_credits,
            next_period_minutes, next_period_credits,
            period_start, period_end, cancel_at_period_end, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            tier = EXCLUDED.tier,
            current_period_minutes = EXCLUDED.current_period_minutes,
            current_period_credits = EXCLUDED.current_period_credits,
            next_period_minutes = EXCLUDED.next_period_minutes,
            next_period_credits = EXCLUDED.next_period_credits,
            period_start = EXCLUDED.period_start,
            period_end = EXCLUDED.period_end,
            cancel_at_period_end = EXCLUDED.cancel_at_period_end,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(e.id.as_uuid())
    .bind(e.user_id.as_str())
    .bind(&e.provider_subscription_id)
    .bind(e.status.as_str())
    .bind(e.tier.as_str())
    .bind(e.current_period.minutes)
    .bind(e.current_period.credits)
    .bind(e.next_period.minutes)
    .bind(e.next_period.credits)
    .bind(e.period.start.as_datetime())
    .bind(e.period.end.as_datetime())
    .bind(e.cancel_at_period_end)
    .bind(e.created_at.as_datetime())
    .bind(e.updated_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(db_error("write entitlement"))?;
    Ok(())
}

/// Maps a sqlx error, keeping constraint and serialization failures apart.
pub(super) fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> DomainError {
    move |e| {
        let code = match e.as_database_error().and_then(|d| d.code()).as_deref() {
            Some("23505") | Some("23514") => ErrorCode::ConstraintViolation,
            Some("40001") | Some("40P01") => ErrorCode::SerializationFailure,
            _ => ErrorCode::DatabaseError,
        };
        DomainError::new(code, format!("Failed to {}: {}", context, e))
    }
}

fn corrupt<E: std::fmt::Display>(field: &'static str) -> impl Fn(E) -> DomainError {
    move |e| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid {} value in database: {}", field, e),
        )
        .with_detail("field", field)
    }
}
