use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::db::models::{BalancePool, DepositRecord, DepositSource, DepositStatus};
use crate::error::{ApiError, Result};
use crate::evm::EvmRpcClient;
use crate::ledger::{credit_pool_earned, CommissionEngine};

/// Single entry point for turning a deposit into balance. Idempotency rests on
/// the UNIQUE(tx_hash) constraint: a given chain transaction is credited at most
/// once platform-wide, no matter how many times or from how many paths it
/// arrives.
pub struct DepositLedger {
    db_pool: PgPool,
    rpc: Arc<EvmRpcClient>,
    commission: CommissionEngine,
    conversion_rate: Decimal,
    required_confirmations: i32,
    token_contract: String,
    token_decimals: u32,
}

#[derive(Debug, Clone)]
pub struct DepositInput {
    pub user_id: Uuid,
    pub source: DepositSource,
    /// Stable-asset units.
    pub amount: Decimal,
    pub tx_hash: Option<String>,
    pub confirmations: i32,
    /// Admin paths may bypass the confirmation threshold, never hash uniqueness.
    pub force: bool,
    pub description: Option<String>,
    pub proof_image_url: Option<String>,
}

#[derive(Debug)]
pub struct CreditOutcome {
    pub deposit: DepositRecord,
    /// False when the call was a no-op (already credited, or below threshold).
    pub credited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// On-chain transfer to a linked address, credited immediately.
    AutoCredited,
    /// On-chain transfer to a linked address, waiting for confirmations.
    PendingConfirmations,
    /// Chain-verified but not to a linked address; needs admin approval.
    VerifiedPendingReview,
    /// No verifiable on-chain match; queued for manual investigation.
    SubmittedForInvestigation,
}

impl DepositLedger {
    pub fn new(
        db_pool: PgPool,
        rpc: Arc<EvmRpcClient>,
        commission: CommissionEngine,
        config: &Config,
    ) -> Self {
        Self {
            db_pool,
            rpc,
            commission,
            conversion_rate: config.conversion_rate,
            required_confirmations: config.required_confirmations as i32,
            token_contract: config.token_contract.clone(),
            token_decimals: config.token_decimals,
        }
    }

    pub async fn credit(&self, input: DepositInput) -> Result<CreditOutcome> {
        if input.amount <= Decimal::ZERO {
            return Err(ApiError::Validation(
                "deposit amount must be positive".to_string(),
            ));
        }

        let converted = input.amount * self.conversion_rate;
        let mut tx = self.db_pool.begin().await?;

        if let Some(hash) = &input.tx_hash {
            // lock any existing record for this hash so concurrent approvals
            // serialize here instead of double-crediting
            let existing: Option<DepositRecord> =
                sqlx::query_as("SELECT * FROM deposits WHERE tx_hash = $1 FOR UPDATE")
                    .bind(hash)
                    .fetch_optional(&mut *tx)
                    .await?;

            if let Some(deposit) = existing {
                return self.settle_existing(tx, deposit, &input).await;
            }
        }

        let final_now =
            input.force || (input.tx_hash.is_some() && input.confirmations >= self.required_confirmations);
        let status = if final_now {
            DepositStatus::Approved
        } else {
            DepositStatus::Pending
        };

        let inserted: Option<DepositRecord> = sqlx::query_as(
            r#"
            INSERT INTO deposits
                (user_id, source, amount, converted_amount, tx_hash, confirmations,
                 status, description, proof_image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tx_hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(input.user_id)
        .bind(input.source)
        .bind(input.amount)
        .bind(converted)
        .bind(&input.tx_hash)
        .bind(input.confirmations)
        .bind(status)
        .bind(&input.description)
        .bind(&input.proof_image_url)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(deposit) = inserted else {
            // a concurrent writer inserted the same hash first; their
            // transaction owns the credit
            drop(tx);
            let deposit: DepositRecord = sqlx::query_as("SELECT * FROM deposits WHERE tx_hash = $1")
                .bind(&input.tx_hash)
                .fetch_one(&self.db_pool)
                .await?;
            return Ok(CreditOutcome {
                deposit,
                credited: false,
            });
        };

        if deposit.status == DepositStatus::Approved {
            self.apply_credit(&mut tx, &deposit).await?;
            tx.commit().await?;
            tracing::info!(
                "Deposit {} credited: {} XNRT to user {}",
                deposit.id,
                deposit.converted_amount,
                deposit.user_id
            );
            Ok(CreditOutcome {
                deposit,
                credited: true,
            })
        } else {
            tx.commit().await?;
            Ok(CreditOutcome {
                deposit,
                credited: false,
            })
        }
    }

    async fn settle_existing(
        &self,
        mut tx: Transaction<'_, Postgres>,
        deposit: DepositRecord,
        input: &DepositInput,
    ) -> Result<CreditOutcome> {
        match deposit.status {
            // already credited: return the existing result, mutate nothing
            DepositStatus::Approved => Ok(CreditOutcome {
                deposit,
                credited: false,
            }),
            DepositStatus::Rejected => Err(ApiError::Conflict(format!(
                "deposit {} was rejected",
                deposit.id
            ))),
            DepositStatus::Pending | DepositStatus::Verified => {
                if !input.force && input.confirmations < self.required_confirmations {
                    // below threshold: track the confirmation count only
                    let updated: DepositRecord = sqlx::query_as(
                        "UPDATE deposits SET confirmations = $2, updated_at = NOW() \
                         WHERE id = $1 RETURNING *",
                    )
                    .bind(deposit.id)
                    .bind(input.confirmations)
                    .fetch_one(&mut *tx)
                    .await?;
                    tx.commit().await?;
                    return Ok(CreditOutcome {
                        deposit: updated,
                        credited: false,
                    });
                }

                let updated: DepositRecord = sqlx::query_as(
                    "UPDATE deposits SET status = 'approved', \
                     confirmations = GREATEST(confirmations, $2), updated_at = NOW() \
                     WHERE id = $1 RETURNING *",
                )
                .bind(deposit.id)
                .bind(input.confirmations)
                .fetch_one(&mut *tx)
                .await?;

                self.apply_credit(&mut tx, &updated).await?;
                tx.commit().await?;
                tracing::info!(
                    "Deposit {} credited: {} XNRT to user {}",
                    updated.id,
                    updated.converted_amount,
                    updated.user_id
                );
                Ok(CreditOutcome {
                    deposit: updated,
                    credited: true,
                })
            }
        }
    }

    /// Balance mutation + commission cascade, inside the caller's transaction.
    async fn apply_credit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        deposit: &DepositRecord,
    ) -> Result<()> {
        credit_pool_earned(
            &mut *tx,
            deposit.user_id,
            BalancePool::Main,
            deposit.converted_amount,
        )
        .await?;
        self.commission
            .distribute(&mut *tx, deposit.user_id, deposit.converted_amount)
            .await
    }

    /// Manual deposit report. Tries to verify the claim on chain and picks one
    /// of three outcomes; an RPC failure degrades to investigation instead of
    /// failing the report.
    pub async fn report(
        &self,
        user_id: Uuid,
        amount: Decimal,
        tx_hash: Option<String>,
        description: Option<String>,
        proof_image_url: Option<String>,
    ) -> Result<(DepositRecord, ReportOutcome)> {
        if amount <= Decimal::ZERO {
            return Err(ApiError::Validation(
                "deposit amount must be positive".to_string(),
            ));
        }

        let tx_hash = tx_hash.map(|h| normalize_tx_hash(&h)).transpose()?;

        if let Some(hash) = &tx_hash {
            match self.rpc.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let logs = EvmRpcClient::receipt_transfer_logs(
                        &receipt,
                        &self.token_contract,
                        self.token_decimals,
                    );
                    let addresses = self.user_addresses(user_id).await?;

                    if let Some(log) = logs.iter().find(|l| addresses.contains(&l.to)) {
                        let head = self.rpc.block_number().await.unwrap_or(log.block_number);
                        let confirmations =
                            head.saturating_sub(log.block_number).saturating_add(1);

                        let outcome = self
                            .credit(DepositInput {
                                user_id,
                                source: DepositSource::Wallet,
                                amount: log.amount,
                                tx_hash: Some(log.tx_hash.clone()),
                                confirmations: confirmations.min(i32::MAX as u64) as i32,
                                force: false,
                                description,
                                proof_image_url,
                            })
                            .await?;

                        let kind = if outcome.deposit.status == DepositStatus::Approved {
                            ReportOutcome::AutoCredited
                        } else {
                            ReportOutcome::PendingConfirmations
                        };
                        return Ok((outcome.deposit, kind));
                    }

                    if !logs.is_empty() {
                        // chain-verified token transfer, but the destination is
                        // not one of the reporter's addresses (exchange origin)
                        let deposit = self
                            .insert_report(
                                user_id,
                                DepositSource::Exchange,
                                DepositStatus::Verified,
                                amount,
                                Some(hash.clone()),
                                description,
                                proof_image_url,
                            )
                            .await?;
                        return Ok((deposit, ReportOutcome::VerifiedPendingReview));
                    }
                }
                Ok(None) => {
                    tracing::info!("Reported tx {} not found on chain", hash);
                }
                Err(e) => {
                    tracing::warn!("Could not verify reported deposit on chain: {}", e);
                }
            }
        }

        let deposit = self
            .insert_report(
                user_id,
                DepositSource::Manual,
                DepositStatus::Pending,
                amount,
                tx_hash,
                description,
                proof_image_url,
            )
            .await?;
        Ok((deposit, ReportOutcome::SubmittedForInvestigation))
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_report(
        &self,
        user_id: Uuid,
        source: DepositSource,
        status: DepositStatus,
        amount: Decimal,
        tx_hash: Option<String>,
        description: Option<String>,
        proof_image_url: Option<String>,
    ) -> Result<DepositRecord> {
        let converted = amount * self.conversion_rate;

        let inserted: Option<DepositRecord> = sqlx::query_as(
            r#"
            INSERT INTO deposits
                (user_id, source, amount, converted_amount, tx_hash, status,
                 description, proof_image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tx_hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(source)
        .bind(amount)
        .bind(converted)
        .bind(&tx_hash)
        .bind(status)
        .bind(&description)
        .bind(&proof_image_url)
        .fetch_optional(&self.db_pool)
        .await?;

        inserted.ok_or_else(|| {
            ApiError::Conflict("this transaction hash has already been reported".to_string())
        })
    }

    /// Admin approval by record id. `force` semantics: the confirmation
    /// threshold does not apply, hash uniqueness already held at insert time.
    pub async fn approve_by_id(&self, id: Uuid, notes: Option<String>) -> Result<CreditOutcome> {
        let mut tx = self.db_pool.begin().await?;

        let deposit: DepositRecord =
            sqlx::query_as("SELECT * FROM deposits WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("deposit {}", id)))?;

        match deposit.status {
            DepositStatus::Approved => Ok(CreditOutcome {
                deposit,
                credited: false,
            }),
            DepositStatus::Rejected => Err(ApiError::Conflict(format!(
                "deposit {} was already rejected",
                id
            ))),
            DepositStatus::Pending | DepositStatus::Verified => {
                let updated: DepositRecord = sqlx::query_as(
                    "UPDATE deposits SET status = 'approved', \
                     admin_notes = COALESCE($2, admin_notes), updated_at = NOW() \
                     WHERE id = $1 RETURNING *",
                )
                .bind(id)
                .bind(&notes)
                .fetch_one(&mut *tx)
                .await?;

                self.apply_credit(&mut tx, &updated).await?;
                tx.commit().await?;
                tracing::info!(
                    "Deposit {} approved by admin: {} XNRT to user {}",
                    updated.id,
                    updated.converted_amount,
                    updated.user_id
                );
                Ok(CreditOutcome {
                    deposit: updated,
                    credited: true,
                })
            }
        }
    }

    /// Rejection performs no balance mutation: nothing was credited yet.
    pub async fn reject_by_id(&self, id: Uuid, notes: Option<String>) -> Result<DepositRecord> {
        let updated: Option<DepositRecord> = sqlx::query_as(
            "UPDATE deposits SET status = 'rejected', \
             admin_notes = COALESCE($2, admin_notes), updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'verified') RETURNING *",
        )
        .bind(id)
        .bind(&notes)
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(deposit) = updated {
            return Ok(deposit);
        }

        let existing: DepositRecord = sqlx::query_as("SELECT * FROM deposits WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("deposit {}", id)))?;

        match existing.status {
            // double-reject is a no-op, not an error
            DepositStatus::Rejected => Ok(existing),
            _ => Err(ApiError::Conflict(format!(
                "deposit {} was already credited",
                id
            ))),
        }
    }

    async fn user_addresses(&self, user_id: Uuid) -> Result<HashSet<String>> {
        let addresses: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT address FROM wallet_links WHERE user_id = $1
            UNION
            SELECT deposit_address FROM users WHERE id = $1 AND deposit_address IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(addresses.into_iter().collect())
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<DepositRecord>> {
        let deposits = sqlx::query_as(
            "SELECT * FROM deposits WHERE user_id = $1 ORDER BY created_at DESC LIMIT 100",
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(deposits)
    }

    pub async fn list_pending(&self) -> Result<Vec<DepositRecord>> {
        let deposits = sqlx::query_as(
            "SELECT * FROM deposits WHERE status IN ('pending', 'verified') \
             ORDER BY created_at ASC LIMIT 200",
        )
        .fetch_all(&self.db_pool)
        .await?;
        Ok(deposits)
    }
}

fn normalize_tx_hash(input: &str) -> Result<String> {
    let hash = input.trim().to_lowercase();
    let valid = hash
        .strip_prefix("0x")
        .map(|h| h.len() == 64 && h.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false);

    if !valid {
        return Err(ApiError::Validation(format!(
            "not a valid transaction hash: {}",
            input
        )));
    }
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_hash_normalization() {
        let hash = format!("0x{}", "AB".repeat(32));
        assert_eq!(
            normalize_tx_hash(&hash).unwrap(),
            format!("0x{}", "ab".repeat(32))
        );
        assert!(normalize_tx_hash("0x1234").is_err());
        assert!(normalize_tx_hash(&"ab".repeat(33)).is_err());
    }
}
