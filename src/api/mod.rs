pub mod account;
pub mod admin;
pub mod auth;
pub mod deposits;
pub mod health;
pub mod staking;
pub mod wallet;
pub mod withdrawals;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::ledger::{
    DepositLedger, StakeAccrualEngine, WalletProofService, WithdrawalProcessor,
};
use crate::scanner::ChainScanner;

pub struct AppState {
    pub db_pool: PgPool,
    pub config: Config,
    pub wallet_proof: WalletProofService,
    pub deposits: Arc<DepositLedger>,
    pub staking: StakeAccrualEngine,
    pub withdrawals: WithdrawalProcessor,
    pub scanner: Arc<ChainScanner>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // public
        .route("/health", get(health::health))
        .route("/auth/register", post(auth::register))
        .route("/staking/tiers", get(staking::tiers))
        // authenticated
        .route("/balance", get(account::balance))
        .route("/referrals", get(account::referrals))
        .route("/wallet/deposit-address", get(wallet::deposit_address))
        .route("/wallet/links", get(wallet::links))
        .route("/wallet/challenge", post(wallet::challenge))
        .route("/wallet/confirm", post(wallet::confirm))
        .route("/deposits", get(deposits::list))
        .route("/deposits/report", post(deposits::report))
        .route("/staking/stakes", get(staking::list).post(staking::stake))
        .route("/staking/stakes/:id/withdraw", post(staking::withdraw))
        .route(
            "/withdrawals",
            get(withdrawals::list).post(withdrawals::request),
        )
        // admin
        .route("/admin/deposits/pending", get(admin::pending_deposits))
        .route("/admin/deposits/:id/approve", post(admin::approve_deposit))
        .route("/admin/deposits/:id/reject", post(admin::reject_deposit))
        .route(
            "/admin/deposits/bulk-approve",
            post(admin::bulk_approve_deposits),
        )
        .route(
            "/admin/deposits/bulk-reject",
            post(admin::bulk_reject_deposits),
        )
        .route(
            "/admin/withdrawals/pending",
            get(admin::pending_withdrawals),
        )
        .route(
            "/admin/withdrawals/:id/approve",
            post(admin::approve_withdrawal),
        )
        .route(
            "/admin/withdrawals/:id/reject",
            post(admin::reject_withdrawal),
        )
        .route(
            "/admin/withdrawals/bulk-approve",
            post(admin::bulk_approve_withdrawals),
        )
        .route(
            "/admin/withdrawals/bulk-reject",
            post(admin::bulk_reject_withdrawals),
        )
        .route("/admin/unmatched", get(admin::unmatched_deposits))
        .route("/admin/unmatched/:id/resolve", post(admin::resolve_unmatched))
        .route("/admin/scanner/status", get(admin::scanner_status))
        .route("/admin/staking/accrue", post(admin::trigger_accrual))
        .with_state(state)
}
