use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub referral_code: String,
    // weak back-reference to the referrer; the chain is not guaranteed acyclic
    pub referred_by: Option<Uuid>,
    pub is_admin: bool,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub deposit_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The four pools are independent buckets; every mutation goes through a guarded
/// UPDATE so no pool can go negative under concurrent requests.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Balance {
    pub user_id: Uuid,
    pub main: Decimal,
    pub staking: Decimal,
    pub mining: Decimal,
    pub referral: Decimal,
    pub total_earned: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "balance_pool", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BalancePool {
    Main,
    Staking,
    Mining,
    Referral,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletLink {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address: String,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address: String,
    pub nonce: String,
    pub message: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "deposit_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DepositSource {
    /// Transfer to a linked or assigned address, observed by the scanner.
    Wallet,
    /// Chain-verified transfer that did not land on a linked address.
    Exchange,
    /// User-reported deposit with no verifiable on-chain match.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "deposit_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Verified,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DepositRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: DepositSource,
    /// Stable-asset units as reported or observed on chain.
    pub amount: Decimal,
    /// XNRT credited on approval (amount x conversion rate).
    pub converted_amount: Decimal,
    pub tx_hash: Option<String>,
    pub confirmations: i32,
    pub status: DepositStatus,
    pub description: Option<String>,
    pub proof_image_url: Option<String>,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UnmatchedDeposit {
    pub id: Uuid,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    pub block_number: i64,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "stake_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StakeStatus {
    Active,
    Completed,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Stake {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: String,
    pub amount: Decimal,
    /// Percent per day, e.g. 1.1 for 1.1%.
    pub daily_rate: Decimal,
    pub duration_days: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Accrual checkpoint; advances in whole days only.
    pub last_accrued: DateTime<Utc>,
    pub accumulated_profit: Decimal,
    pub status: StakeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WithdrawalRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: BalancePool,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub destination_address: String,
    pub status: WithdrawalStatus,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScannerState {
    pub last_processed_block: i64,
    pub updated_at: DateTime<Utc>,
}
