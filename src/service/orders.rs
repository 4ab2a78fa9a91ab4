use std::sync::Arc;

use tracing::warn;

use crate::accrual::ReconcileSignal;
use crate::error::{AppResult, LedgerError};
use crate::ledger::models::{InsertOutcome, Order, OrderNumber, UserId};
use crate::ledger::LedgerStore;

/// Result of a successful submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Newly stored; the reconciler has been signalled.
    Accepted,
    /// The caller already submitted this number.
    AlreadySubmitted,
}

/// Order intake: validates numbers, stores them and wakes the reconciler
pub struct OrderService {
    store: Arc<dyn LedgerStore>,
    signal: Arc<ReconcileSignal>,
}

impl OrderService {
    pub fn new(store: Arc<dyn LedgerStore>, signal: Arc<ReconcileSignal>) -> Self {
        Self { store, signal }
    }

    pub async fn submit(&self, user: UserId, raw: &str) -> AppResult<SubmitOutcome> {
        // Checksum failures never reach the store.
        let number = OrderNumber::parse(raw)?;

        match self.store.insert_order(user, number).await? {
            InsertOutcome::Inserted => {
                self.signal.signal();
                Ok(SubmitOutcome::Accepted)
            }
            InsertOutcome::Existing(owner) if owner == user => Ok(SubmitOutcome::AlreadySubmitted),
            InsertOutcome::Existing(owner) => {
                warn!("User {} tried to submit order {} owned by {}", user, number, owner);
                Err(LedgerError::OrderConflict(number.to_string()).into())
            }
        }
    }

    pub async fn orders(&self, user: UserId) -> AppResult<Vec<Order>> {
        self.store.orders_for(user).await
    }
}
