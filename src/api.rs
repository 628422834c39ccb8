// HTTP handlers for the wallet backend

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use crate::error::WalletError;
use crate::models::{
    AdminAdjustRequest, AlertsRequest, BalanceResponse, Currency, HistoryRequest, HistoryResponse,
    SettleRequest, SettleResponse,
};
use crate::AppState;

fn error_response(err: WalletError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        WalletError::InvalidAmount => StatusCode::BAD_REQUEST,
        WalletError::InsufficientFunds { .. } => StatusCode::CONFLICT,
        WalletError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        WalletError::Unavailable(_) | WalletError::Overflow | WalletError::Persistence(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() })))
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_health = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    let queue_depth = state.ledger.queue_depth().await;

    Json(json!({
        "status": if db_health { "healthy" } else { "unhealthy" },
        "database": if db_health { "up" } else { "down" },
        "ledger_queue_depth": queue_depth,
    }))
}

/// Settle one spin: debit the bet, credit any win, log both.
pub async fn settle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SettleRequest>,
) -> Result<Json<SettleResponse>, (StatusCode, Json<Value>)> {
    let currency = req.currency;
    match state.spins.settle(&req).await {
        Ok(settlement) => Ok(Json(SettleResponse {
            transaction_id: settlement.transaction_id,
            balance: settlement.balance,
            currency,
        })),
        Err(err) => {
            if matches!(err, WalletError::Persistence(_) | WalletError::Unavailable(_)) {
                error!("Settlement failed for {}: {err}", req.user_id);
            }
            Err(error_response(err))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub currency: Currency,
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, (StatusCode, Json<Value>)> {
    match state.balances.get_balance(&user_id, query.currency).await {
        Ok(balance) => Ok(Json(BalanceResponse {
            user_id,
            currency: query.currency,
            balance,
        })),
        Err(err) => Err(error_response(err)),
    }
}

/// Paged ledger history for one wallet
pub async fn transaction_history(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HistoryRequest>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let (transactions, total) = state
        .store
        .transaction_history(&req.user_id, req.limit, req.offset)
        .await
        .map_err(|e| {
            error!("Failed to fetch transaction history: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(HistoryResponse {
        transactions,
        total,
        limit: req.limit,
        offset: req.offset,
    }))
}

/// Staff balance adjustment; flushed synchronously, never fraud-screened.
pub async fn admin_adjust(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdminAdjustRequest>,
) -> Result<Json<SettleResponse>, (StatusCode, Json<Value>)> {
    let currency = req.currency;
    match state.spins.admin_adjust(&req).await {
        Ok(settlement) => Ok(Json(SettleResponse {
            transaction_id: settlement.transaction_id,
            balance: settlement.balance,
            currency,
        })),
        Err(err) => {
            error!(
                "Admin adjustment for {} by {} failed: {err}",
                req.user_id, req.admin_id
            );
            Err(error_response(err))
        }
    }
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AlertsRequest>,
) -> Result<Json<Value>, StatusCode> {
    let alerts = state
        .store
        .list_alerts(req.status, req.limit, req.offset)
        .await
        .map_err(|e| {
            error!("Failed to list alerts: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(json!({
        "alerts": alerts,
        "limit": req.limit,
        "offset": req.offset,
    })))
}
