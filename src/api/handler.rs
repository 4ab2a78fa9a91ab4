use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::auth::AuthenticatedUser;
use super::models::*;
use crate::{
    error::{AppError, AppResult},
    service::{BalanceService, OrderService, SubmitOutcome},
};

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub balance: Arc<BalanceService>,
}

/// Upload an order number (plain-text body)
/// POST /api/user/orders
pub async fn submit_order(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    body: String,
) -> AppResult<StatusCode> {
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("Order number is required".to_string()));
    }

    match state.orders.submit(user, &body).await? {
        SubmitOutcome::Accepted => Ok(StatusCode::ACCEPTED),
        SubmitOutcome::AlreadySubmitted => Ok(StatusCode::OK),
    }
}

/// List the caller's orders, newest first
/// GET /api/user/orders
pub async fn list_orders(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> AppResult<Response> {
    let orders = state.orders.orders(user).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}

/// GET /api/user/balance
pub async fn get_balance(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> AppResult<Json<BalanceResponse>> {
    let balance = state.balance.balance(user).await?;
    Ok(Json(BalanceResponse::from(balance)))
}

/// Debit points against an order label
/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> AppResult<StatusCode> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    state.balance.withdraw(user, &request.order, request.sum).await?;
    Ok(StatusCode::OK)
}

/// List the caller's withdrawals, newest first
/// GET /api/user/withdrawals
pub async fn list_withdrawals(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> AppResult<Response> {
    let withdrawals = state.balance.withdrawals(user).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<WithdrawalResponse> =
        withdrawals.into_iter().map(WithdrawalResponse::from).collect();
    Ok(Json(body).into_response())
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
