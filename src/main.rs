use anyhow::Context;
use dotenvy as dotenv;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod api;
mod config;
mod db;
mod error;
mod evm;
mod ledger;
mod middleware;
mod scanner;

use api::AppState;
use config::Config;
use evm::EvmRpcClient;
use ledger::{
    CommissionEngine, DepositLedger, StakeAccrualEngine, WalletProofService,
    WithdrawalProcessor,
};
use scanner::ChainScanner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // trying multiple .env locations since working directory differs between dev and prod
    let _ = dotenv::from_filename_override(".env");
    let _ = dotenv::from_filename_override(concat!(env!("CARGO_MANIFEST_DIR"), "/.env"));
    let _ = dotenv::dotenv_override();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xnrt_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting XNRT platform backend");

    let config = Config::from_env().context("error with configuration")?;
    tracing::info!("Configuration loaded successfully");

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!()
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database connected and migrated");

    let rpc = Arc::new(EvmRpcClient::new(&config).context("Failed to initialize RPC client")?);
    tracing::info!("Chain RPC client pointed at {}", rpc.url());

    let house_user_id: Uuid =
        sqlx::query_scalar("SELECT id FROM users WHERE referral_code = $1")
            .bind(&config.house_referral_code)
            .fetch_optional(&db_pool)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "house account with referral code {} not found; did migrations run?",
                    config.house_referral_code
                )
            })?;
    tracing::info!("House account resolved: {}", house_user_id);

    let commission = CommissionEngine::new(house_user_id);
    let deposits = Arc::new(DepositLedger::new(
        db_pool.clone(),
        rpc.clone(),
        commission,
        &config,
    ));
    let wallet_proof = WalletProofService::new(db_pool.clone(), config.challenge_ttl_minutes);
    let staking = StakeAccrualEngine::new(db_pool.clone());
    let withdrawals = WithdrawalProcessor::new(db_pool.clone());
    let scanner = Arc::new(ChainScanner::new(
        db_pool.clone(),
        rpc.clone(),
        deposits.clone(),
        &config,
    ));

    // background chain scanner
    let scan_interval = config.scan_interval_seconds;
    tokio::spawn({
        let scanner = scanner.clone();
        async move {
            tracing::info!("Starting chain scanner (every {}s)", scan_interval);
            scanner.run(scan_interval).await;
        }
    });

    // background staking accrual sweep
    let accrual_pool = db_pool.clone();
    let accrual_interval = config.accrual_interval_seconds;
    tokio::spawn(async move {
        tracing::info!("Starting staking accrual task (every {}s)", accrual_interval);
        let engine = StakeAccrualEngine::new(accrual_pool);
        let mut interval = tokio::time::interval(Duration::from_secs(accrual_interval));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = engine.process_rewards().await {
                tracing::error!("Accrual sweep failed: {}", e);
            }
        }
    });

    let app_state = Arc::new(AppState {
        db_pool,
        config: config.clone(),
        wallet_proof,
        deposits,
        staking,
        withdrawals,
        scanner,
    });

    let app = api::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // in case the configured port is taken, try a few more before giving up
    let mut port = config.port;
    let mut listener = None;

    for _ in 0..10u16 {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => {
                listener = Some((addr, l));
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to bind to {}: {} (trying next port)", addr, e);
                port = port.saturating_add(1);
            }
        }
    }

    let (addr, listener) = listener.ok_or_else(|| {
        anyhow::anyhow!(
            "Failed to bind to any port in range {}..{}",
            config.port,
            config.port.saturating_add(9)
        )
    })?;

    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
