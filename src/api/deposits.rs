use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::AppState;
use crate::db::models::DepositRecord;
use crate::error::Result;
use crate::ledger::deposits::ReportOutcome;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    /// Stable-asset units the user claims to have sent.
    pub amount: Decimal,
    pub tx_hash: Option<String>,
    pub description: Option<String>,
    pub proof_image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub outcome: ReportOutcome,
    pub deposit: DepositRecord,
}

pub async fn report(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<ReportRequest>,
) -> Result<(StatusCode, Json<ReportResponse>)> {
    let (deposit, outcome) = state
        .deposits
        .report(
            user.id,
            request.amount,
            request.tx_hash,
            request.description,
            request.proof_image_url,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ReportResponse { outcome, deposit })))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<DepositRecord>>> {
    let deposits = state.deposits.list_for_user(user.id).await?;
    Ok(Json(deposits))
}
