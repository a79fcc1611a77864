use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::AppState;
use crate::db::models::Stake;
use crate::error::Result;
use crate::ledger::staking::{self, StakeTier};
use crate::middleware::AuthUser;

pub async fn tiers() -> Json<[StakeTier; 4]> {
    Json(staking::tiers())
}

#[derive(Debug, Deserialize)]
pub struct StakeRequest {
    pub tier: String,
    pub amount: Decimal,
}

pub async fn stake(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<StakeRequest>,
) -> Result<(StatusCode, Json<Stake>)> {
    let stake = state
        .staking
        .create_stake(user.id, &request.tier, request.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(stake)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Stake>>> {
    let stakes = state.staking.list_for_user(user.id).await?;
    Ok(Json(stakes))
}

pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(stake_id): Path<Uuid>,
) -> Result<Json<Value>> {
    let (stake, payout) = state.staking.withdraw_stake(user.id, stake_id).await?;
    Ok(Json(json!({
        "stake": stake,
        "payout": payout,
    })))
}
