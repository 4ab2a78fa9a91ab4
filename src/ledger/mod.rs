pub mod models;
pub mod repository;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::AppResult;
use models::{AccrualUpdate, Balance, InsertOutcome, Order, OrderNumber, UserId, Withdrawal};

pub use repository::PgLedger;

/// Durable record of orders and withdrawals.
///
/// Orders are never deleted and withdrawals are never mutated. Every
/// implementation must keep `withdraw` atomic per user: the balance it checks
/// is the balance at the instant the withdrawal commits.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new order, or report who already owns the number.
    async fn insert_order(&self, owner: UserId, number: OrderNumber) -> AppResult<InsertOutcome>;

    /// Orders of one user, most recent first.
    async fn orders_for(&self, owner: UserId) -> AppResult<Vec<Order>>;

    /// Numbers of every order still in NEW or PROCESSING.
    async fn live_orders(&self) -> AppResult<Vec<OrderNumber>>;

    /// Write a reconciliation result. Returns false when the order was
    /// already terminal (or unknown) and nothing changed.
    async fn apply_accrual(&self, number: OrderNumber, update: AccrualUpdate) -> AppResult<bool>;

    async fn balance(&self, owner: UserId) -> AppResult<Balance>;

    async fn withdraw(&self, owner: UserId, order: OrderNumber, sum: Decimal)
        -> AppResult<Withdrawal>;

    /// Withdrawals of one user, most recent first.
    async fn withdrawals_for(&self, owner: UserId) -> AppResult<Vec<Withdrawal>>;
}
