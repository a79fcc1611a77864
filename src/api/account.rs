use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::AppState;
use crate::db::models::Balance;
use crate::error::{ApiError, Result};
use crate::middleware::AuthUser;

pub async fn balance(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Balance>> {
    let balance: Balance = sqlx::query_as("SELECT * FROM balances WHERE user_id = $1")
        .bind(user.id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("balance for user {}", user.id)))?;

    Ok(Json(balance))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct ReferralEntry {
    id: Uuid,
    referred_user_id: Uuid,
    referred_username: String,
    level: i16,
    total_commission: Decimal,
    created_at: DateTime<Utc>,
}

pub async fn referrals(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Value>> {
    let entries: Vec<ReferralEntry> = sqlx::query_as(
        r#"
        SELECT r.id, r.referred_user_id, u.username AS referred_username,
               r.level, r.total_commission, r.created_at
        FROM referrals r
        JOIN users u ON u.id = r.referred_user_id
        WHERE r.referrer_id = $1
        ORDER BY r.level ASC, r.created_at ASC
        "#,
    )
    .bind(user.id)
    .fetch_all(&state.db_pool)
    .await?;

    let total_commission: Decimal = entries.iter().map(|e| e.total_commission).sum();

    Ok(Json(json!({
        "referral_code": user.referral_code,
        "total_commission": total_commission,
        "referrals": entries,
    })))
}
