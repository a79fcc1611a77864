use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub evm_rpc_url: String,
    /// Stable-token (USDT) contract the scanner watches for incoming transfers.
    pub token_contract: String,
    pub token_decimals: u32,
    pub required_confirmations: u64,
    pub scan_interval_seconds: u64,
    pub scan_start_block: u64,
    pub max_blocks_per_scan: u64,
    /// XNRT credited per stable-token unit.
    pub conversion_rate: Decimal,
    pub house_referral_code: String,
    /// Secret for deterministic per-user deposit address derivation. The matching
    /// keys live with the treasury, never on this server.
    pub deposit_master_secret: String,
    pub rpc_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub challenge_ttl_minutes: i64,
    pub accrual_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // treating empty DATABASE_URL as unset because docker-compose was setting it to ""
        let mut database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());

        // fallback to loading .env next to the manifest in case working directory differs
        if database_url.is_none() {
            let env_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
            let _ = dotenvy::from_path_override(&env_path);
            database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        }

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            database_url: database_url.ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?,
            evm_rpc_url: env::var("EVM_RPC_URL")?,
            token_contract: env::var("TOKEN_CONTRACT")?.to_lowercase(),
            token_decimals: env::var("TOKEN_DECIMALS")
                .unwrap_or_else(|_| "6".to_string())
                .parse()?,
            required_confirmations: env::var("REQUIRED_CONFIRMATIONS")
                .unwrap_or_else(|_| "12".to_string())
                .parse()?,
            scan_interval_seconds: env::var("SCAN_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            scan_start_block: env::var("SCAN_START_BLOCK")
                .unwrap_or_else(|_| "0".to_string())
                .parse()?,
            max_blocks_per_scan: env::var("MAX_BLOCKS_PER_SCAN")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            conversion_rate: Decimal::from_str(
                &env::var("CONVERSION_RATE").unwrap_or_else(|_| "100".to_string()),
            )?,
            house_referral_code: env::var("HOUSE_REFERRAL_CODE")
                .unwrap_or_else(|_| "XNRTHOUSE".to_string()),
            deposit_master_secret: env::var("DEPOSIT_MASTER_SECRET")?,
            rpc_timeout_seconds: env::var("RPC_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            max_retry_attempts: env::var("MAX_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            challenge_ttl_minutes: env::var("CHALLENGE_TTL_MINUTES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            accrual_interval_seconds: env::var("ACCRUAL_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
        })
    }
}
