use crate::ledger::models::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ========== REQUEST MODELS ==========

/// Request to debit points against an order label
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    /// Kept raw so a bad checksum is reported as such, not as malformed JSON
    pub order: String,
    pub sum: Decimal,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: OrderNumber,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            number: order.number,
            status: order.status,
            accrual: order.accrual,
            uploaded_at: order.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl From<Balance> for BalanceResponse {
    fn from(balance: Balance) -> Self {
        Self {
            current: balance.current,
            withdrawn: balance.withdrawn,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: OrderNumber,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(withdrawal: Withdrawal) -> Self {
        Self {
            order: withdrawal.order_number,
            sum: withdrawal.sum,
            processed_at: withdrawal.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
