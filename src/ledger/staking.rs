use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{BalancePool, Stake, StakeStatus};
use crate::error::{ApiError, Result};
use crate::ledger::{credit_pool, credit_pool_earned, debit_pool};

#[derive(Debug, Clone, Serialize)]
pub struct StakeTier {
    pub name: &'static str,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// Percent per day.
    pub daily_rate: Decimal,
    pub duration_days: i64,
    pub apy_percent: Decimal,
}

pub fn tiers() -> [StakeTier; 4] {
    [
        StakeTier {
            name: "Sapphire",
            min_amount: dec!(1000),
            max_amount: dec!(9999),
            daily_rate: dec!(0.8),
            duration_days: 15,
            apy_percent: dec!(292),
        },
        StakeTier {
            name: "Royal Sapphire",
            min_amount: dec!(10000),
            max_amount: dec!(49999),
            daily_rate: dec!(1.1),
            duration_days: 30,
            apy_percent: dec!(401.5),
        },
        StakeTier {
            name: "Emerald",
            min_amount: dec!(50000),
            max_amount: dec!(199999),
            daily_rate: dec!(1.3),
            duration_days: 45,
            apy_percent: dec!(474.5),
        },
        StakeTier {
            name: "Imperial Diamond",
            min_amount: dec!(200000),
            max_amount: dec!(1000000),
            daily_rate: dec!(1.5),
            duration_days: 60,
            apy_percent: dec!(547.5),
        },
    ]
}

pub fn find_tier(name: &str) -> Option<StakeTier> {
    tiers().into_iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Profit for `elapsed_days` whole days, capped so accumulated profit can never
/// exceed rate x duration x amount no matter how late the sweep runs.
pub fn accrual_delta(
    amount: Decimal,
    daily_rate: Decimal,
    elapsed_days: i64,
    accumulated: Decimal,
    duration_days: i64,
) -> Decimal {
    if elapsed_days <= 0 {
        return Decimal::ZERO;
    }
    let per_day = amount * daily_rate / dec!(100);
    let max_profit = per_day * Decimal::from(duration_days);
    let delta = per_day * Decimal::from(elapsed_days);
    delta.min(max_profit - accumulated).max(Decimal::ZERO)
}

#[derive(Debug, Default, Serialize)]
pub struct AccrualSummary {
    pub stakes_accrued: u32,
    pub stakes_completed: u32,
    pub total_profit: Decimal,
}

pub struct StakeAccrualEngine {
    db_pool: PgPool,
}

impl StakeAccrualEngine {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Moves the principal from the main pool into the staking pool and opens
    /// the position. The principal stays visible in the staking balance for the
    /// whole term.
    pub async fn create_stake(
        &self,
        user_id: Uuid,
        tier_name: &str,
        amount: Decimal,
    ) -> Result<Stake> {
        let tier = find_tier(tier_name)
            .ok_or_else(|| ApiError::Validation(format!("unknown staking tier: {}", tier_name)))?;

        if amount < tier.min_amount || amount > tier.max_amount {
            return Err(ApiError::Validation(format!(
                "{} stakes must be between {} and {} XNRT",
                tier.name, tier.min_amount, tier.max_amount
            )));
        }

        let start = Utc::now();
        let end = start + Duration::days(tier.duration_days);

        let mut tx = self.db_pool.begin().await?;
        debit_pool(&mut tx, user_id, BalancePool::Main, amount).await?;
        credit_pool(&mut tx, user_id, BalancePool::Staking, amount).await?;

        let stake: Stake = sqlx::query_as(
            r#"
            INSERT INTO stakes
                (user_id, tier, amount, daily_rate, duration_days,
                 start_date, end_date, last_accrued, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $6, 'active')
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(tier.name)
        .bind(amount)
        .bind(tier.daily_rate)
        .bind(tier.duration_days)
        .bind(start)
        .bind(end)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(
            "Stake {} opened: {} XNRT in {} for user {}",
            stake.id,
            amount,
            tier.name,
            user_id
        );
        Ok(stake)
    }

    /// Accrues profit on every active stake. Each stake gets its own
    /// transaction, so one bad row cannot block the rest of the sweep.
    pub async fn process_rewards(&self) -> Result<AccrualSummary> {
        let stake_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM stakes WHERE status = 'active'")
                .fetch_all(&self.db_pool)
                .await?;

        let mut summary = AccrualSummary::default();
        for stake_id in stake_ids {
            match self.accrue_one(stake_id).await {
                Ok(Some((profit, completed))) => {
                    if profit > Decimal::ZERO {
                        summary.stakes_accrued += 1;
                        summary.total_profit += profit;
                    }
                    if completed {
                        summary.stakes_completed += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Accrual failed for stake {}: {}", stake_id, e);
                }
            }
        }

        if summary.stakes_accrued > 0 || summary.stakes_completed > 0 {
            tracing::info!(
                "Accrual sweep: {} XNRT over {} stakes, {} completed",
                summary.total_profit,
                summary.stakes_accrued,
                summary.stakes_completed
            );
        }
        Ok(summary)
    }

    /// Accrual is keyed to whole days elapsed since the checkpoint, and the
    /// checkpoint advances by exactly that many days. Running the sweep twice
    /// in the same day is a no-op; missing a day pays out both on the next run.
    async fn accrue_one(&self, stake_id: Uuid) -> Result<Option<(Decimal, bool)>> {
        let mut tx = self.db_pool.begin().await?;

        let stake: Option<Stake> =
            sqlx::query_as("SELECT * FROM stakes WHERE id = $1 AND status = 'active' FOR UPDATE")
                .bind(stake_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(stake) = stake else {
            return Ok(None);
        };

        let now = Utc::now();
        let accrue_until = now.min(stake.end_date);
        let elapsed = (accrue_until - stake.last_accrued).num_days();

        let profit = accrual_delta(
            stake.amount,
            stake.daily_rate,
            elapsed,
            stake.accumulated_profit,
            stake.duration_days,
        );

        if elapsed > 0 {
            let checkpoint = stake.last_accrued + Duration::days(elapsed);
            sqlx::query(
                "UPDATE stakes SET accumulated_profit = accumulated_profit + $2, \
                 last_accrued = $3 WHERE id = $1",
            )
            .bind(stake.id)
            .bind(profit)
            .bind(checkpoint)
            .execute(&mut *tx)
            .await?;

            if profit > Decimal::ZERO {
                credit_pool_earned(&mut tx, stake.user_id, BalancePool::Staking, profit).await?;
            }
        }

        let completed = now >= stake.end_date;
        if completed {
            sqlx::query("UPDATE stakes SET status = 'completed' WHERE id = $1")
                .bind(stake.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some((profit, completed)))
    }

    /// Pays out principal + profit from the staking pool into the main pool.
    /// Only completed stakes can be withdrawn, and only once.
    pub async fn withdraw_stake(&self, user_id: Uuid, stake_id: Uuid) -> Result<(Stake, Decimal)> {
        let mut tx = self.db_pool.begin().await?;

        let stake: Stake =
            sqlx::query_as("SELECT * FROM stakes WHERE id = $1 AND user_id = $2 FOR UPDATE")
                .bind(stake_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("stake {}", stake_id)))?;

        match stake.status {
            StakeStatus::Active => return Err(ApiError::NotMatured),
            StakeStatus::Withdrawn => {
                return Err(ApiError::Conflict(format!(
                    "stake {} was already withdrawn",
                    stake_id
                )))
            }
            StakeStatus::Completed => {}
        }

        let updated: Stake = sqlx::query_as(
            "UPDATE stakes SET status = 'withdrawn' \
             WHERE id = $1 AND status = 'completed' RETURNING *",
        )
        .bind(stake.id)
        .fetch_one(&mut *tx)
        .await?;

        let payout = updated.amount + updated.accumulated_profit;
        debit_pool(&mut tx, user_id, BalancePool::Staking, payout).await?;
        credit_pool(&mut tx, user_id, BalancePool::Main, payout).await?;

        tx.commit().await?;
        tracing::info!(
            "Stake {} withdrawn: {} XNRT to main pool of user {}",
            updated.id,
            payout,
            user_id
        );
        Ok((updated, payout))
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Stake>> {
        let stakes =
            sqlx::query_as("SELECT * FROM stakes WHERE user_id = $1 ORDER BY start_date DESC")
                .bind(user_id)
                .fetch_all(&self.db_pool)
                .await?;
        Ok(stakes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_cover_their_documented_ranges() {
        assert_eq!(find_tier("Sapphire").unwrap().daily_rate, dec!(0.8));
        assert_eq!(find_tier("royal sapphire").unwrap().duration_days, 30);
        assert_eq!(find_tier("Emerald").unwrap().min_amount, dec!(50000));
        assert_eq!(find_tier("Imperial Diamond").unwrap().max_amount, dec!(1000000));
        assert!(find_tier("Obsidian").is_none());
    }

    #[test]
    fn full_term_profit_matches_the_tier_promise() {
        // 10,000 XNRT in Royal Sapphire: 1.1%/day for 30 days = 3,300 profit
        let total = accrual_delta(dec!(10000), dec!(1.1), 30, Decimal::ZERO, 30);
        assert_eq!(total, dec!(3300));
    }

    #[test]
    fn same_day_rerun_accrues_nothing() {
        assert_eq!(
            accrual_delta(dec!(10000), dec!(1.1), 0, dec!(110), 30),
            Decimal::ZERO
        );
    }

    #[test]
    fn profit_is_capped_at_the_term_maximum() {
        // sweep running long after the end date must not overshoot the cap
        let almost_full = dec!(3190); // 29 days already paid
        let delta = accrual_delta(dec!(10000), dec!(1.1), 45, almost_full, 30);
        assert_eq!(delta, dec!(110));

        let at_cap = dec!(3300);
        assert_eq!(
            accrual_delta(dec!(10000), dec!(1.1), 45, at_cap, 30),
            Decimal::ZERO
        );
    }

    #[test]
    fn day_by_day_accrual_sums_to_the_full_term() {
        let mut accumulated = Decimal::ZERO;
        for _ in 0..15 {
            accumulated += accrual_delta(dec!(5000), dec!(0.8), 1, accumulated, 15);
        }
        assert_eq!(accumulated, dec!(600));
    }
}
