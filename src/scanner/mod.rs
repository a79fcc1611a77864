use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::db::models::{DepositSource, ScannerState};
use crate::error::Result;
use crate::evm::{EvmRpcClient, TransferLog};
use crate::ledger::deposits::{DepositInput, DepositLedger};

/// Polls the chain for token transfers into linked or assigned addresses and
/// credits them through the deposit ledger. Block progress is persisted, so a
/// restart resumes where the last successful cycle ended and no block window is
/// ever skipped.
pub struct ChainScanner {
    db_pool: PgPool,
    rpc: Arc<EvmRpcClient>,
    deposits: Arc<DepositLedger>,
    token_contract: String,
    token_decimals: u32,
    required_confirmations: u64,
    max_blocks_per_scan: u64,
    start_block: u64,
    // cycles must never overlap; a slow RPC round just makes the next tick skip
    running: tokio::sync::Mutex<()>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ScanOutcome {
    /// A previous cycle is still running.
    Skipped,
    /// Not enough confirmed blocks past the checkpoint yet.
    UpToDate { last_processed_block: u64 },
    Scanned {
        from_block: u64,
        to_block: u64,
        transfers_seen: usize,
        credited: u32,
        unmatched: u32,
    },
}

#[derive(Debug, Serialize)]
pub struct ScannerStatus {
    pub last_processed_block: i64,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub chain_head: Option<u64>,
    pub blocks_behind: Option<u64>,
}

impl ChainScanner {
    pub fn new(
        db_pool: PgPool,
        rpc: Arc<EvmRpcClient>,
        deposits: Arc<DepositLedger>,
        config: &Config,
    ) -> Self {
        Self {
            db_pool,
            rpc,
            deposits,
            token_contract: config.token_contract.clone(),
            token_decimals: config.token_decimals,
            required_confirmations: config.required_confirmations,
            max_blocks_per_scan: config.max_blocks_per_scan,
            start_block: config.scan_start_block,
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn run(self: Arc<Self>, interval_seconds: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(ScanOutcome::Scanned {
                    from_block,
                    to_block,
                    transfers_seen,
                    credited,
                    unmatched,
                }) => {
                    tracing::info!(
                        "Scanned blocks {}..={}: {} transfers, {} credited, {} unmatched",
                        from_block,
                        to_block,
                        transfers_seen,
                        credited,
                        unmatched
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    // checkpoint was not advanced; the window is retried next tick
                    tracing::error!("Scan cycle failed: {}", e);
                }
            }
        }
    }

    pub async fn tick(&self) -> Result<ScanOutcome> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("Scan cycle still running, skipping tick");
            return Ok(ScanOutcome::Skipped);
        };
        self.run_cycle().await
    }

    async fn run_cycle(&self) -> Result<ScanOutcome> {
        let last_processed = self.load_checkpoint().await?;
        let head = self.rpc.block_number().await?;

        // only blocks with the full confirmation depth are final enough to credit
        let safe_head = head.saturating_sub(self.required_confirmations);
        if safe_head <= last_processed {
            return Ok(ScanOutcome::UpToDate {
                last_processed_block: last_processed,
            });
        }

        let from_block = last_processed + 1;
        let to_block = safe_head.min(last_processed + self.max_blocks_per_scan);

        let logs = self
            .rpc
            .transfer_logs(&self.token_contract, self.token_decimals, from_block, to_block)
            .await?;

        let mut credited = 0u32;
        let mut unmatched = 0u32;
        let mut first_failed_block: Option<u64> = None;

        for log in &logs {
            // a failed transfer does not abort the cycle, but it must not be
            // lost either: its block is kept out of the checkpoint below
            match self.process_transfer(log, head).await {
                Ok(true) => credited += 1,
                Ok(false) => unmatched += 1,
                Err(e) => {
                    tracing::error!("Failed to process transfer {}: {}", log.tx_hash, e);
                    first_failed_block = Some(
                        first_failed_block
                            .map_or(log.block_number, |b| b.min(log.block_number)),
                    );
                }
            }
        }

        // advance at most to just below the earliest failure, so the next cycle
        // re-scans it; re-processing already-credited transfers in that window
        // is harmless because crediting is hash-idempotent
        let checkpoint = next_checkpoint(to_block, last_processed, first_failed_block);
        if checkpoint < to_block {
            tracing::warn!(
                "Scan checkpoint held at {} (window end {}) pending transfer retry",
                checkpoint,
                to_block
            );
        }
        self.save_checkpoint(checkpoint).await?;

        Ok(ScanOutcome::Scanned {
            from_block,
            to_block,
            transfers_seen: logs.len(),
            credited,
            unmatched,
        })
    }

    /// Returns true when the transfer was credited to a user, false when it was
    /// recorded as unmatched.
    async fn process_transfer(&self, log: &TransferLog, head: u64) -> Result<bool> {
        if log.amount <= Decimal::ZERO {
            return Ok(false);
        }

        let recipient = self.resolve_recipient(&log.to).await?;

        match recipient {
            Some(user_id) => {
                let confirmations = head.saturating_sub(log.block_number).saturating_add(1);
                let outcome = self
                    .deposits
                    .credit(DepositInput {
                        user_id,
                        source: DepositSource::Wallet,
                        amount: log.amount,
                        tx_hash: Some(log.tx_hash.clone()),
                        confirmations: confirmations.min(i32::MAX as u64) as i32,
                        force: false,
                        description: None,
                        proof_image_url: None,
                    })
                    .await?;
                Ok(outcome.credited)
            }
            None => {
                self.record_unmatched(log).await?;
                Ok(false)
            }
        }
    }

    /// Maps a destination address to a user, via explicit wallet links or the
    /// per-user assigned deposit address.
    async fn resolve_recipient(&self, address: &str) -> Result<Option<Uuid>> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM wallet_links WHERE address = $1
            UNION
            SELECT id FROM users WHERE deposit_address = $1
            LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(user_id)
    }

    async fn record_unmatched(&self, log: &TransferLog) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO unmatched_deposits (tx_hash, from_address, to_address, amount, block_number)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(&log.tx_hash)
        .bind(&log.from)
        .bind(&log.to)
        .bind(log.amount)
        .bind(log.block_number as i64)
        .execute(&self.db_pool)
        .await?;

        if inserted.rows_affected() > 0 {
            tracing::info!(
                "Unmatched transfer {}: {} tokens to {}",
                log.tx_hash,
                log.amount,
                log.to
            );
        }
        Ok(())
    }

    async fn load_checkpoint(&self) -> Result<u64> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT last_processed_block FROM scanner_state WHERE id = TRUE")
                .fetch_optional(&self.db_pool)
                .await?;

        match existing {
            Some(block) => Ok(block.max(0) as u64),
            None => {
                sqlx::query(
                    "INSERT INTO scanner_state (id, last_processed_block) VALUES (TRUE, $1) \
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(self.start_block as i64)
                .execute(&self.db_pool)
                .await?;
                Ok(self.start_block)
            }
        }
    }

    async fn save_checkpoint(&self, block: u64) -> Result<()> {
        sqlx::query(
            "UPDATE scanner_state SET last_processed_block = $1, updated_at = NOW() \
             WHERE id = TRUE AND last_processed_block < $1",
        )
        .bind(block as i64)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<ScannerStatus> {
        let state: Option<ScannerState> =
            sqlx::query_as("SELECT last_processed_block, updated_at FROM scanner_state WHERE id = TRUE")
                .fetch_optional(&self.db_pool)
                .await?;

        let last_processed_block = state
            .as_ref()
            .map(|s| s.last_processed_block)
            .unwrap_or(self.start_block as i64);
        let updated_at = state.map(|s| s.updated_at);

        let chain_head = match self.rpc.block_number().await {
            Ok(head) => Some(head),
            Err(e) => {
                tracing::warn!("Could not fetch chain head for status: {}", e);
                None
            }
        };

        let blocks_behind =
            chain_head.map(|head| head.saturating_sub(last_processed_block.max(0) as u64));

        Ok(ScannerStatus {
            last_processed_block,
            updated_at,
            chain_head,
            blocks_behind,
        })
    }
}

/// Highest block the checkpoint may advance to after a cycle. A failure inside
/// the window holds the checkpoint just below the earliest failed block, never
/// behind where it already was.
fn next_checkpoint(window_end: u64, last_processed: u64, first_failed_block: Option<u64>) -> u64 {
    match first_failed_block {
        Some(block) => block.saturating_sub(1).max(last_processed).min(window_end),
        None => window_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_cycle_advances_to_the_window_end() {
        assert_eq!(next_checkpoint(5000, 4000, None), 5000);
    }

    #[test]
    fn failed_transfer_holds_the_checkpoint_below_its_block() {
        // the failed block stays inside the next scan window
        assert_eq!(next_checkpoint(5000, 4000, Some(4500)), 4499);
    }

    #[test]
    fn earliest_failure_wins_even_at_the_window_edges() {
        assert_eq!(next_checkpoint(5000, 4000, Some(5000)), 4999);
        // failure in the first unscanned block: no advance at all
        assert_eq!(next_checkpoint(5000, 4000, Some(4001)), 4000);
    }

    #[test]
    fn checkpoint_never_regresses() {
        assert_eq!(next_checkpoint(5000, 4000, Some(3500)), 4000);
        assert_eq!(next_checkpoint(5000, 4000, Some(0)), 4000);
    }
}
