use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::AppState;
use crate::db::models::WalletLink;
use crate::error::Result;
use crate::ledger::wallet_proof::IssuedChallenge;
use crate::middleware::AuthUser;

pub async fn deposit_address(AuthUser(user): AuthUser) -> Json<Value> {
    Json(json!({
        "deposit_address": user.deposit_address,
    }))
}

pub async fn links(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<WalletLink>>> {
    let links = state.wallet_proof.linked_wallets(user.id).await?;
    Ok(Json(links))
}

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub address: String,
}

pub async fn challenge(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<ChallengeRequest>,
) -> Result<Json<IssuedChallenge>> {
    let challenge = state
        .wallet_proof
        .issue_challenge(user.id, &request.address)
        .await?;
    Ok(Json(challenge))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub address: String,
    pub nonce: String,
    /// 65-byte personal_sign signature over the challenge message, hex encoded.
    pub signature: String,
    pub issued_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn confirm(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<ConfirmRequest>,
) -> Result<(StatusCode, Json<WalletLink>)> {
    let link = state
        .wallet_proof
        .confirm_challenge(
            user.id,
            &request.address,
            &request.nonce,
            &request.signature,
            request.issued_at,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}
