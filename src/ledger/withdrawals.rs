use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{BalancePool, WithdrawalRecord, WithdrawalStatus};
use crate::error::{ApiError, Result};
use crate::evm::signature::normalize_address;
use crate::ledger::{credit_pool, debit_pool};

pub fn withdrawal_fee_rate() -> Decimal {
    dec!(0.02)
}

pub fn minimum_withdrawal(source: BalancePool) -> Decimal {
    match source {
        BalancePool::Main | BalancePool::Staking => dec!(500),
        BalancePool::Mining | BalancePool::Referral => dec!(2500),
    }
}

/// (fee, net payout) for a gross withdrawal amount.
pub fn compute_fee(amount: Decimal) -> (Decimal, Decimal) {
    let fee = amount * withdrawal_fee_rate();
    (fee, amount - fee)
}

/// Withdrawal lifecycle: the gross amount is debited when the request is
/// accepted, so it can never be spent twice while waiting for settlement.
/// Rejection is the only path that puts it back.
pub struct WithdrawalProcessor {
    db_pool: PgPool,
}

impl WithdrawalProcessor {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn request(
        &self,
        user_id: Uuid,
        source: BalancePool,
        amount: Decimal,
        destination: &str,
    ) -> Result<WithdrawalRecord> {
        let destination = normalize_address(destination)?;

        let minimum = minimum_withdrawal(source);
        if amount < minimum {
            return Err(ApiError::Validation(format!(
                "minimum withdrawal from the {:?} pool is {} XNRT",
                source, minimum
            )));
        }

        let (fee, net_amount) = compute_fee(amount);

        let mut tx = self.db_pool.begin().await?;
        debit_pool(&mut tx, user_id, source, amount).await?;

        let withdrawal: WithdrawalRecord = sqlx::query_as(
            r#"
            INSERT INTO withdrawals
                (user_id, source, amount, fee, net_amount, destination_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(source)
        .bind(amount)
        .bind(fee)
        .bind(net_amount)
        .bind(&destination)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(
            "Withdrawal {} requested: {} XNRT ({} net) from {:?} pool of user {}",
            withdrawal.id,
            amount,
            net_amount,
            source,
            user_id
        );
        Ok(withdrawal)
    }

    /// Approval records the settlement decision; the funds already left the
    /// pool at request time, so no balance changes here.
    pub async fn approve(&self, id: Uuid, notes: Option<String>) -> Result<WithdrawalRecord> {
        let updated: Option<WithdrawalRecord> = sqlx::query_as(
            "UPDATE withdrawals SET status = 'approved', \
             admin_notes = COALESCE($2, admin_notes), updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING *",
        )
        .bind(id)
        .bind(&notes)
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(withdrawal) = updated {
            tracing::info!(
                "Withdrawal {} approved: pay {} XNRT to {}",
                withdrawal.id,
                withdrawal.net_amount,
                withdrawal.destination_address
            );
            return Ok(withdrawal);
        }

        let existing = self.get(id).await?;
        match existing.status {
            // double-approve is a no-op
            WithdrawalStatus::Approved => Ok(existing),
            _ => Err(ApiError::Conflict(format!(
                "withdrawal {} was already rejected",
                id
            ))),
        }
    }

    /// Rejection refunds the gross amount to the pool it came from, in the same
    /// transaction as the status flip. The status guard makes the refund fire
    /// exactly once.
    pub async fn reject(&self, id: Uuid, notes: Option<String>) -> Result<WithdrawalRecord> {
        let mut tx = self.db_pool.begin().await?;

        let updated: Option<WithdrawalRecord> = sqlx::query_as(
            "UPDATE withdrawals SET status = 'rejected', \
             admin_notes = COALESCE($2, admin_notes), updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING *",
        )
        .bind(id)
        .bind(&notes)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(withdrawal) = updated {
            credit_pool(&mut tx, withdrawal.user_id, withdrawal.source, withdrawal.amount)
                .await?;
            tx.commit().await?;
            tracing::info!(
                "Withdrawal {} rejected: {} XNRT refunded to {:?} pool of user {}",
                withdrawal.id,
                withdrawal.amount,
                withdrawal.source,
                withdrawal.user_id
            );
            return Ok(withdrawal);
        }

        let existing = self.get(id).await?;
        match existing.status {
            // already rejected and refunded; never refund twice
            WithdrawalStatus::Rejected => Ok(existing),
            _ => Err(ApiError::Conflict(format!(
                "withdrawal {} was already approved",
                id
            ))),
        }
    }

    async fn get(&self, id: Uuid) -> Result<WithdrawalRecord> {
        let withdrawal = sqlx::query_as("SELECT * FROM withdrawals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("withdrawal {}", id)))?;
        Ok(withdrawal)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<WithdrawalRecord>> {
        let withdrawals = sqlx::query_as(
            "SELECT * FROM withdrawals WHERE user_id = $1 ORDER BY created_at DESC LIMIT 100",
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(withdrawals)
    }

    pub async fn list_pending(&self) -> Result<Vec<WithdrawalRecord>> {
        let withdrawals = sqlx::query_as(
            "SELECT * FROM withdrawals WHERE status = 'pending' ORDER BY created_at ASC LIMIT 200",
        )
        .fetch_all(&self.db_pool)
        .await?;
        Ok(withdrawals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_is_two_percent_of_gross() {
        let (fee, net) = compute_fee(dec!(5000));
        assert_eq!(fee, dec!(100));
        assert_eq!(net, dec!(4900));
        assert_eq!(fee + net, dec!(5000));
    }

    #[test]
    fn fee_math_is_exact_for_awkward_amounts() {
        let gross = dec!(1234.5678);
        let (fee, net) = compute_fee(gross);
        assert_eq!(fee + net, gross);
        assert_eq!(fee, gross * dec!(0.02));
    }

    #[test]
    fn minimums_differ_per_pool() {
        assert_eq!(minimum_withdrawal(BalancePool::Main), dec!(500));
        assert_eq!(minimum_withdrawal(BalancePool::Staking), dec!(500));
        assert_eq!(minimum_withdrawal(BalancePool::Mining), dec!(2500));
        assert_eq!(minimum_withdrawal(BalancePool::Referral), dec!(2500));
    }
}
