use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::AppState;
use crate::db::models::{BalancePool, WithdrawalRecord};
use crate::error::Result;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub source: BalancePool,
    /// Gross amount; the 2% fee comes out of this.
    pub amount: Decimal,
    pub destination_address: String,
}

pub async fn request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<WithdrawalRecord>)> {
    let withdrawal = state
        .withdrawals
        .request(
            user.id,
            request.source,
            request.amount,
            &request.destination_address,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<WithdrawalRecord>>> {
    let withdrawals = state.withdrawals.list_for_user(user.id).await?;
    Ok(Json(withdrawals))
}
