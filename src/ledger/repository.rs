use super::models::*;
use super::LedgerStore;
use crate::error::{AppResult, LedgerError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres};
use tracing::{debug, info};

/// Postgres ledger - THE source of truth for orders and withdrawals
pub struct PgLedger {
    pub pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Balance computed by a single statement, so accruals and withdrawals
    /// come from the same snapshot.
    async fn fetch_balance<'e, E>(executor: E, owner: UserId) -> AppResult<Balance>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let balance = sqlx::query_as::<_, Balance>(
            r#"
            SELECT
                accrued.total - withdrawn.total AS current,
                withdrawn.total AS withdrawn
            FROM
                (SELECT COALESCE(SUM(accrual), 0)::NUMERIC AS total
                 FROM orders
                 WHERE owner = $1 AND status = 'PROCESSED') AS accrued,
                (SELECT COALESCE(SUM(sum), 0)::NUMERIC AS total
                 FROM withdrawals
                 WHERE owner = $1) AS withdrawn
            "#,
        )
        .bind(owner)
        .fetch_one(executor)
        .await?;

        Ok(balance)
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    // ========== ORDER OPERATIONS ==========

    async fn insert_order(&self, owner: UserId, number: OrderNumber) -> AppResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (number, owner)
            VALUES ($1, $2)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(number)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            info!("Order {} registered for user {}", number, owner);
            return Ok(InsertOutcome::Inserted);
        }

        // Orders are never deleted, so the conflicting row is still there.
        let existing: UserId = sqlx::query_scalar("SELECT owner FROM orders WHERE number = $1")
            .bind(number)
            .fetch_one(&self.pool)
            .await?;

        Ok(InsertOutcome::Existing(existing))
    }

    async fn orders_for(&self, owner: UserId) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT number, owner, status, accrual, uploaded_at
            FROM orders
            WHERE owner = $1
            ORDER BY uploaded_at DESC, number DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn live_orders(&self) -> AppResult<Vec<OrderNumber>> {
        let numbers = sqlx::query_scalar::<_, OrderNumber>(
            r#"
            SELECT number
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY uploaded_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(numbers)
    }

    async fn apply_accrual(&self, number: OrderNumber, update: AccrualUpdate) -> AppResult<bool> {
        // Terminal rows never match, which is what keeps PROCESSED/INVALID final.
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1 AND status = ANY($4)
            "#,
        )
        .bind(number)
        .bind(update.status)
        .bind(update.accrual)
        .bind(OrderStatus::sources_for(update.status))
        .execute(&self.pool)
        .await?;

        let changed = result.rows_affected() > 0;
        debug!("Order {} -> {} (changed: {})", number, update.status, changed);
        Ok(changed)
    }

    // ========== BALANCE OPERATIONS ==========

    async fn balance(&self, owner: UserId) -> AppResult<Balance> {
        Self::fetch_balance(&self.pool, owner).await
    }

    async fn withdraw(
        &self,
        owner: UserId,
        order: OrderNumber,
        sum: Decimal,
    ) -> AppResult<Withdrawal> {
        let mut tx = self.pool.begin().await?;

        // Serialize withdrawals per user; released on commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(owner.0)
            .execute(&mut *tx)
            .await?;

        let balance = Self::fetch_balance(&mut *tx, owner).await?;
        if !balance.has_available(sum) {
            // Dropping `tx` rolls back and releases the lock.
            return Err(LedgerError::InsufficientFunds {
                required: sum.to_string(),
                available: balance.current.to_string(),
            }
            .into());
        }

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals (owner, order_number, sum)
            VALUES ($1, $2, $3)
            RETURNING owner, order_number, sum, processed_at
            "#,
        )
        .bind(owner)
        .bind(order)
        .bind(sum)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Withdrawal of {} by user {} against order {}", sum, owner, order);
        Ok(withdrawal)
    }

    async fn withdrawals_for(&self, owner: UserId) -> AppResult<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT owner, order_number, sum, processed_at
            FROM withdrawals
            WHERE owner = $1
            ORDER BY processed_at DESC, id DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }
}
