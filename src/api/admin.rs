use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::AppState;
use crate::db::models::{
    DepositRecord, DepositSource, UnmatchedDeposit, WithdrawalRecord,
};
use crate::error::{ApiError, Result};
use crate::ledger::deposits::DepositInput;
use crate::ledger::staking::AccrualSummary;
use crate::middleware::AdminUser;
use crate::scanner::ScannerStatus;

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkReviewRequest {
    pub ids: Vec<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkItemResult {
    pub id: Uuid,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkReviewResponse {
    pub succeeded: u32,
    pub failed: u32,
    pub results: Vec<BulkItemResult>,
}

/// Bulk review is best-effort per item: one bad id does not roll back the rest,
/// and each item reports its own outcome.
async fn bulk_review<F, Fut>(ids: Vec<Uuid>, review: F) -> Result<Json<BulkReviewResponse>>
where
    F: Fn(Uuid) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if ids.is_empty() {
        return Err(ApiError::Validation("ids must not be empty".to_string()));
    }
    if ids.len() > 100 {
        return Err(ApiError::Validation(
            "at most 100 ids per bulk request".to_string(),
        ));
    }

    let mut results = Vec::with_capacity(ids.len());
    let mut succeeded = 0;
    let mut failed = 0;

    for id in ids {
        match review(id).await {
            Ok(()) => {
                succeeded += 1;
                results.push(BulkItemResult {
                    id,
                    ok: true,
                    error: None,
                });
            }
            Err(e) => {
                failed += 1;
                results.push(BulkItemResult {
                    id,
                    ok: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    Ok(Json(BulkReviewResponse {
        succeeded,
        failed,
        results,
    }))
}

pub async fn pending_deposits(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<DepositRecord>>> {
    let deposits = state.deposits.list_pending().await?;
    Ok(Json(deposits))
}

pub async fn approve_deposit(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Value>> {
    tracing::info!("Admin {} approving deposit {}", admin.username, id);
    let outcome = state.deposits.approve_by_id(id, request.notes).await?;
    Ok(Json(json!({
        "deposit": outcome.deposit,
        "credited": outcome.credited,
    })))
}

pub async fn reject_deposit(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<DepositRecord>> {
    tracing::info!("Admin {} rejecting deposit {}", admin.username, id);
    let deposit = state.deposits.reject_by_id(id, request.notes).await?;
    Ok(Json(deposit))
}

pub async fn bulk_approve_deposits(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(request): Json<BulkReviewRequest>,
) -> Result<Json<BulkReviewResponse>> {
    tracing::info!(
        "Admin {} bulk-approving {} deposits",
        admin.username,
        request.ids.len()
    );
    let notes = request.notes;
    bulk_review(request.ids, move |id| {
        let state = state.clone();
        let notes = notes.clone();
        async move { state.deposits.approve_by_id(id, notes).await.map(|_| ()) }
    })
    .await
}

pub async fn bulk_reject_deposits(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(request): Json<BulkReviewRequest>,
) -> Result<Json<BulkReviewResponse>> {
    tracing::info!(
        "Admin {} bulk-rejecting {} deposits",
        admin.username,
        request.ids.len()
    );
    let notes = request.notes;
    bulk_review(request.ids, move |id| {
        let state = state.clone();
        let notes = notes.clone();
        async move { state.deposits.reject_by_id(id, notes).await.map(|_| ()) }
    })
    .await
}

pub async fn pending_withdrawals(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<WithdrawalRecord>>> {
    let withdrawals = state.withdrawals.list_pending().await?;
    Ok(Json(withdrawals))
}

pub async fn approve_withdrawal(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<WithdrawalRecord>> {
    tracing::info!("Admin {} approving withdrawal {}", admin.username, id);
    let withdrawal = state.withdrawals.approve(id, request.notes).await?;
    Ok(Json(withdrawal))
}

pub async fn reject_withdrawal(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<WithdrawalRecord>> {
    tracing::info!("Admin {} rejecting withdrawal {}", admin.username, id);
    let withdrawal = state.withdrawals.reject(id, request.notes).await?;
    Ok(Json(withdrawal))
}

pub async fn bulk_approve_withdrawals(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(request): Json<BulkReviewRequest>,
) -> Result<Json<BulkReviewResponse>> {
    tracing::info!(
        "Admin {} bulk-approving {} withdrawals",
        admin.username,
        request.ids.len()
    );
    let notes = request.notes;
    bulk_review(request.ids, move |id| {
        let state = state.clone();
        let notes = notes.clone();
        async move { state.withdrawals.approve(id, notes).await.map(|_| ()) }
    })
    .await
}

pub async fn bulk_reject_withdrawals(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(request): Json<BulkReviewRequest>,
) -> Result<Json<BulkReviewResponse>> {
    tracing::info!(
        "Admin {} bulk-rejecting {} withdrawals",
        admin.username,
        request.ids.len()
    );
    let notes = request.notes;
    bulk_review(request.ids, move |id| {
        let state = state.clone();
        let notes = notes.clone();
        async move { state.withdrawals.reject(id, notes).await.map(|_| ()) }
    })
    .await
}

pub async fn unmatched_deposits(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<UnmatchedDeposit>>> {
    let unmatched: Vec<UnmatchedDeposit> = sqlx::query_as(
        "SELECT * FROM unmatched_deposits WHERE resolved = FALSE \
         ORDER BY block_number ASC LIMIT 200",
    )
    .fetch_all(&state.db_pool)
    .await?;
    Ok(Json(unmatched))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// The user the admin attributes this transfer to.
    pub user_id: Uuid,
}

/// Attributes an unmatched transfer to a user and credits it. Re-resolving the
/// same transfer is caught by the hash uniqueness in the deposit ledger.
pub async fn resolve_unmatched(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<Value>> {
    let unmatched: UnmatchedDeposit =
        sqlx::query_as("SELECT * FROM unmatched_deposits WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("unmatched deposit {}", id)))?;

    if unmatched.resolved {
        return Err(ApiError::Conflict(format!(
            "unmatched deposit {} is already resolved",
            id
        )));
    }

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(request.user_id)
        .fetch_optional(&state.db_pool)
        .await?;
    if exists.is_none() {
        return Err(ApiError::NotFound(format!("user {}", request.user_id)));
    }

    tracing::info!(
        "Admin {} resolving unmatched transfer {} to user {}",
        admin.username,
        unmatched.tx_hash,
        request.user_id
    );

    let outcome = state
        .deposits
        .credit(DepositInput {
            user_id: request.user_id,
            source: DepositSource::Wallet,
            amount: unmatched.amount,
            tx_hash: Some(unmatched.tx_hash.clone()),
            confirmations: 0,
            force: true,
            description: Some("resolved from unmatched transfers".to_string()),
            proof_image_url: None,
        })
        .await?;

    sqlx::query("UPDATE unmatched_deposits SET resolved = TRUE WHERE id = $1")
        .bind(id)
        .execute(&state.db_pool)
        .await?;

    Ok(Json(json!({
        "deposit": outcome.deposit,
        "credited": outcome.credited,
    })))
}

pub async fn scanner_status(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> Result<Json<ScannerStatus>> {
    let status = state.scanner.status().await?;
    Ok(Json(status))
}

/// Manual accrual trigger, same sweep the background task runs on its interval.
pub async fn trigger_accrual(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
) -> Result<Json<AccrualSummary>> {
    tracing::info!("Admin {} triggered an accrual sweep", admin.username);
    let summary = state.staking.process_rewards().await?;
    Ok(Json(summary))
}
