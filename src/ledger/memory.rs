use super::models::*;
use super::LedgerStore;
use crate::error::{AppResult, LedgerError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

#[derive(Default)]
struct State {
    /// Insertion order; listings walk it backwards.
    orders: Vec<Order>,
    withdrawals: Vec<Withdrawal>,
    writes: usize,
    live_scans: usize,
}

/// In-memory ledger for tests. One mutex guards everything, which gives
/// `withdraw` the same per-user atomicity the Postgres advisory lock does.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutations, for asserting that a rejected
    /// request never reached the store.
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    pub fn order(&self, number: OrderNumber) -> Option<Order> {
        self.state.lock().orders.iter().find(|o| o.number == number).cloned()
    }

    /// How many times `live_orders` ran, i.e. reconciliation passes started.
    pub fn live_scans(&self) -> usize {
        self.state.lock().live_scans
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_order(&self, owner: UserId, number: OrderNumber) -> AppResult<InsertOutcome> {
        let mut state = self.state.lock();
        if let Some(existing) = state.orders.iter().find(|o| o.number == number) {
            return Ok(InsertOutcome::Existing(existing.owner));
        }
        state.orders.push(Order {
            number,
            owner,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        });
        state.writes += 1;
        Ok(InsertOutcome::Inserted)
    }

    async fn orders_for(&self, owner: UserId) -> AppResult<Vec<Order>> {
        let state = self.state.lock();
        Ok(state.orders.iter().rev().filter(|o| o.owner == owner).cloned().collect())
    }

    async fn live_orders(&self) -> AppResult<Vec<OrderNumber>> {
        let mut state = self.state.lock();
        state.live_scans += 1;
        Ok(state
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .map(|o| o.number)
            .collect())
    }

    async fn apply_accrual(&self, number: OrderNumber, update: AccrualUpdate) -> AppResult<bool> {
        let mut state = self.state.lock();
        let Some(order) = state.orders.iter_mut().find(|o| o.number == number) else {
            return Ok(false);
        };
        if !order.status.can_transition_to(update.status) {
            return Ok(false);
        }
        order.status = update.status;
        order.accrual = update.accrual;
        state.writes += 1;
        Ok(true)
    }

    async fn balance(&self, owner: UserId) -> AppResult<Balance> {
        Ok(balance_of(&self.state.lock(), owner))
    }

    async fn withdraw(
        &self,
        owner: UserId,
        order: OrderNumber,
        sum: Decimal,
    ) -> AppResult<Withdrawal> {
        let mut state = self.state.lock();
        let balance = balance_of(&state, owner);
        if !balance.has_available(sum) {
            return Err(LedgerError::InsufficientFunds {
                required: sum.to_string(),
                available: balance.current.to_string(),
            }
            .into());
        }
        let withdrawal = Withdrawal {
            owner,
            order_number: order,
            sum,
            processed_at: Utc::now(),
        };
        state.withdrawals.push(withdrawal.clone());
        state.writes += 1;
        Ok(withdrawal)
    }

    async fn withdrawals_for(&self, owner: UserId) -> AppResult<Vec<Withdrawal>> {
        let state = self.state.lock();
        Ok(state.withdrawals.iter().rev().filter(|w| w.owner == owner).cloned().collect())
    }
}

fn balance_of(state: &State, owner: UserId) -> Balance {
    let accrued: Decimal = state
        .orders
        .iter()
        .filter(|o| o.owner == owner && o.status == OrderStatus::Processed)
        .filter_map(|o| o.accrual)
        .sum();
    let withdrawn: Decimal = state
        .withdrawals
        .iter()
        .filter(|w| w.owner == owner)
        .map(|w| w.sum)
        .sum();
    Balance { current: accrued - withdrawn, withdrawn }
}
