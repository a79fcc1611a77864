pub mod commission;
pub mod deposits;
pub mod staking;
pub mod wallet_proof;
pub mod withdrawals;

pub use commission::CommissionEngine;
pub use deposits::DepositLedger;
pub use staking::StakeAccrualEngine;
pub use wallet_proof::WalletProofService;
pub use withdrawals::WithdrawalProcessor;

use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::models::BalancePool;
use crate::error::{ApiError, Result};

pub(crate) fn pool_column(pool: BalancePool) -> &'static str {
    match pool {
        BalancePool::Main => "main",
        BalancePool::Staking => "staking",
        BalancePool::Mining => "mining",
        BalancePool::Referral => "referral",
    }
}

/// Adds to one pool. Runs inside the caller's transaction so a credit is never
/// visible without the state transition that caused it.
pub(crate) async fn credit_pool(
    conn: &mut PgConnection,
    user_id: Uuid,
    pool: BalancePool,
    amount: Decimal,
) -> Result<()> {
    let column = pool_column(pool);
    let sql = format!(
        "UPDATE balances SET {column} = {column} + $2, updated_at = NOW() WHERE user_id = $1"
    );
    let result = sqlx::query(&sql)
        .bind(user_id)
        .bind(amount)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("balance for user {}", user_id)));
    }
    Ok(())
}

/// Credit that also counts toward the monotonic total_earned counter.
pub(crate) async fn credit_pool_earned(
    conn: &mut PgConnection,
    user_id: Uuid,
    pool: BalancePool,
    amount: Decimal,
) -> Result<()> {
    let column = pool_column(pool);
    let sql = format!(
        "UPDATE balances SET {column} = {column} + $2, total_earned = total_earned + $2, \
         updated_at = NOW() WHERE user_id = $1"
    );
    let result = sqlx::query(&sql)
        .bind(user_id)
        .bind(amount)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("balance for user {}", user_id)));
    }
    Ok(())
}

/// Guarded debit: the `pool >= amount` predicate makes the read-modify-write a
/// single atomic statement, so a racing debit cannot drive the pool negative.
pub(crate) async fn debit_pool(
    conn: &mut PgConnection,
    user_id: Uuid,
    pool: BalancePool,
    amount: Decimal,
) -> Result<()> {
    let column = pool_column(pool);
    let sql = format!(
        "UPDATE balances SET {column} = {column} - $2, updated_at = NOW() \
         WHERE user_id = $1 AND {column} >= $2"
    );
    let result = sqlx::query(&sql)
        .bind(user_id)
        .bind(amount)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        let available: Decimal =
            sqlx::query_scalar(&format!("SELECT {column} FROM balances WHERE user_id = $1"))
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?
                .unwrap_or(Decimal::ZERO);

        return Err(ApiError::InsufficientBalance {
            available,
            requested: amount,
        });
    }
    Ok(())
}
