use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgConnection;
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::models::BalancePool;
use crate::error::Result;
use crate::ledger::{credit_pool, credit_pool_earned};

/// Commission rates per referral level, as fractions of the converted deposit.
pub fn commission_rates() -> [Decimal; 3] {
    [dec!(0.06), dec!(0.03), dec!(0.01)]
}

pub fn commission_amounts(converted_amount: Decimal) -> [Decimal; 3] {
    commission_rates().map(|rate| converted_amount * rate)
}

/// Walks the referrer chain of a paying user and distributes level commissions.
/// Levels with no eligible referrer fall back to the house account, so the full
/// 10% of every approved deposit is always paid out somewhere.
pub struct CommissionEngine {
    house_user_id: Uuid,
}

impl CommissionEngine {
    pub fn new(house_user_id: Uuid) -> Self {
        Self { house_user_id }
    }

    /// Runs inside the deposit's transaction: commission is never paid for a
    /// deposit that did not commit, and never lost for one that did.
    pub async fn distribute(
        &self,
        conn: &mut PgConnection,
        paying_user: Uuid,
        converted_amount: Decimal,
    ) -> Result<()> {
        // referred_by is not guaranteed acyclic; the visited set plus the
        // 3-level cap bound the walk no matter what the data looks like
        let mut visited: HashSet<Uuid> = HashSet::from([paying_user]);
        let mut current = paying_user;
        let mut chain_ended = false;

        for (index, commission) in commission_amounts(converted_amount).into_iter().enumerate() {
            let level = index as i16 + 1;

            let referrer = if chain_ended {
                None
            } else {
                let next: Option<Uuid> =
                    sqlx::query_scalar("SELECT referred_by FROM users WHERE id = $1")
                        .bind(current)
                        .fetch_optional(&mut *conn)
                        .await?
                        .flatten();

                match next {
                    Some(candidate) if !visited.insert(candidate) => {
                        tracing::warn!(
                            "Referral chain of user {} loops back at level {}; \
                             remaining commission goes to the house",
                            paying_user,
                            level
                        );
                        chain_ended = true;
                        None
                    }
                    Some(candidate) => {
                        current = candidate;
                        Some(candidate)
                    }
                    None => {
                        chain_ended = true;
                        None
                    }
                }
            };

            match referrer {
                Some(referrer_id) => {
                    credit_pool_earned(conn, referrer_id, BalancePool::Referral, commission)
                        .await?;

                    sqlx::query(
                        r#"
                        INSERT INTO referrals (referrer_id, referred_user_id, level, total_commission)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (referrer_id, referred_user_id)
                        DO UPDATE SET
                            total_commission = referrals.total_commission + EXCLUDED.total_commission,
                            updated_at = NOW()
                        "#,
                    )
                    .bind(referrer_id)
                    .bind(paying_user)
                    .bind(level)
                    .bind(commission)
                    .execute(&mut *conn)
                    .await?;

                    tracing::info!(
                        "Commission: {} XNRT to referrer {} (level {}) from user {}",
                        commission,
                        referrer_id,
                        level,
                        paying_user
                    );
                }
                None => {
                    credit_pool(conn, self.house_user_id, BalancePool::Referral, commission)
                        .await?;
                    tracing::debug!(
                        "Commission: {} XNRT to house (level {} unfilled) from user {}",
                        commission,
                        level,
                        paying_user
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_sum_to_ten_percent() {
        let total: Decimal = commission_rates().into_iter().sum();
        assert_eq!(total, dec!(0.10));
    }

    #[test]
    fn splits_match_the_documented_example() {
        // 1,000 USDT at rate 100 -> 100,000 XNRT converted
        let [level1, level2, level3] = commission_amounts(dec!(100000));
        assert_eq!(level1, dec!(6000));
        assert_eq!(level2, dec!(3000));
        assert_eq!(level3, dec!(1000));
    }

    #[test]
    fn full_pool_is_distributed_regardless_of_chain_length() {
        let converted = dec!(12345.6789);
        let total: Decimal = commission_amounts(converted).into_iter().sum();
        assert_eq!(total, converted * dec!(0.10));
    }
}
