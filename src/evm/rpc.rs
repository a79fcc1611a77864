use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::Config;
use crate::error::{ApiError, Result};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Thin JSON-RPC client for the EVM chain. Every call has a request timeout and
/// bounded retries; a failure surfaces as ExternalUnavailable and the caller
/// decides whether to retry next cycle.
pub struct EvmRpcClient {
    http: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl EvmRpcClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            url: config.evm_rpc_url.clone(),
            max_retries: config.max_retry_attempts,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
            }

            match self.call_once(method, &params).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::warn!("RPC {} failed (attempt {}): {}", method, attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ApiError::ExternalUnavailable(format!("RPC {} failed", method))))
    }

    async fn call_once(&self, method: &str, params: &Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.http.post(&self.url).json(&body).send().await?;
        let payload: Value = response.json().await?;

        if let Some(err) = payload.get("error") {
            return Err(ApiError::ExternalUnavailable(format!(
                "RPC {} returned error: {}",
                method, err
            )));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| ApiError::ExternalUnavailable(format!("RPC {}: missing result", method)))
    }

    pub async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        result
            .as_str()
            .and_then(hex_to_u64)
            .ok_or_else(|| ApiError::ExternalUnavailable("invalid eth_blockNumber reply".into()))
    }

    /// Fetch decoded ERC-20 Transfer logs for `token` in `[from_block, to_block]`.
    /// A malformed log is skipped with a warning; it must not abort the scan.
    pub async fn transfer_logs(
        &self,
        token: &str,
        token_decimals: u32,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferLog>> {
        let params = json!([{
            "address": token,
            "topics": [TRANSFER_TOPIC],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        }]);

        let result = self.call("eth_getLogs", params).await?;
        let raw_logs = result
            .as_array()
            .ok_or_else(|| ApiError::ExternalUnavailable("eth_getLogs: not an array".into()))?;

        let mut logs = Vec::with_capacity(raw_logs.len());
        for raw in raw_logs {
            match TransferLog::parse(raw, token_decimals) {
                Some(log) => logs.push(log),
                None => tracing::warn!("Skipping malformed transfer log: {}", raw),
            }
        }

        Ok(logs)
    }

    /// Transaction receipt, or None when the hash is unknown to the chain.
    pub async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Value>> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        if result.is_null() {
            Ok(None)
        } else {
            Ok(Some(result))
        }
    }

    /// Decoded Transfer logs of `token` inside a single receipt.
    pub fn receipt_transfer_logs(
        receipt: &Value,
        token: &str,
        token_decimals: u32,
    ) -> Vec<TransferLog> {
        let Some(raw_logs) = receipt.get("logs").and_then(|l| l.as_array()) else {
            return Vec::new();
        };

        raw_logs
            .iter()
            .filter(|raw| {
                raw.get("address")
                    .and_then(|a| a.as_str())
                    .map(|a| a.eq_ignore_ascii_case(token))
                    .unwrap_or(false)
            })
            .filter_map(|raw| TransferLog::parse(raw, token_decimals))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TransferLog {
    pub tx_hash: String,
    pub block_number: u64,
    pub from: String,
    pub to: String,
    /// Token amount scaled down by the token's decimals.
    pub amount: Decimal,
}

impl TransferLog {
    pub fn parse(raw: &Value, token_decimals: u32) -> Option<Self> {
        let topics = raw.get("topics")?.as_array()?;
        if topics.len() < 3 || topics.first()?.as_str()? != TRANSFER_TOPIC {
            return None;
        }

        let tx_hash = raw.get("transactionHash")?.as_str()?.to_lowercase();
        let block_number = hex_to_u64(raw.get("blockNumber")?.as_str()?)?;
        let from = address_from_topic(topics.get(1)?.as_str()?)?;
        let to = address_from_topic(topics.get(2)?.as_str()?)?;

        let raw_value = hex_to_u128(raw.get("data")?.as_str()?)?;
        let amount = Decimal::try_from_i128_with_scale(raw_value as i128, token_decimals).ok()?;

        Some(Self {
            tx_hash,
            block_number,
            from,
            to,
            amount,
        })
    }
}

pub fn hex_to_u64(input: &str) -> Option<u64> {
    u64::from_str_radix(input.trim_start_matches("0x"), 16).ok()
}

fn hex_to_u128(input: &str) -> Option<u128> {
    let hex = input.trim_start_matches("0x");
    // amounts above u128 would be nonsense for a 6-decimal stable token
    if hex.len() > 32 {
        let (high, low) = hex.split_at(hex.len() - 32);
        if u128::from_str_radix(high, 16).ok()? != 0 {
            return None;
        }
        return u128::from_str_radix(low, 16).ok();
    }
    u128::from_str_radix(hex, 16).ok()
}

/// Topics pad addresses to 32 bytes; the address is the last 20.
fn address_from_topic(topic: &str) -> Option<String> {
    let hex = topic.trim_start_matches("0x");
    if hex.len() != 64 {
        return None;
    }
    Some(format!("0x{}", &hex[24..].to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_log() -> Value {
        json!({
            "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "topics": [
                TRANSFER_TOPIC,
                "0x000000000000000000000000a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0",
                "0x0000000000000000000000001111111111111111111111111111111111111111"
            ],
            "data": "0x000000000000000000000000000000000000000000000000000000003b9aca00",
            "blockNumber": "0x10d4f",
            "transactionHash": "0xABCDEF0123456789abcdef0123456789abcdef0123456789abcdef0123456789"
        })
    }

    #[test]
    fn parses_transfer_log() {
        let log = TransferLog::parse(&sample_log(), 6).expect("should parse");
        assert_eq!(log.block_number, 0x10d4f);
        assert_eq!(log.to, "0x1111111111111111111111111111111111111111");
        assert_eq!(log.from, "0xa1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0");
        // 1_000_000_000 raw units at 6 decimals = 1000 USDT
        assert_eq!(log.amount, dec!(1000));
        assert!(log.tx_hash.starts_with("0xabcdef"));
    }

    #[test]
    fn rejects_log_with_wrong_topic() {
        let mut raw = sample_log();
        raw["topics"][0] = json!("0x0000000000000000000000000000000000000000000000000000000000000000");
        assert!(TransferLog::parse(&raw, 6).is_none());
    }

    #[test]
    fn rejects_log_with_short_topics() {
        let mut raw = sample_log();
        raw["topics"] = json!([TRANSFER_TOPIC]);
        assert!(TransferLog::parse(&raw, 6).is_none());
    }

    #[test]
    fn rejects_garbage_data() {
        let mut raw = sample_log();
        raw["data"] = json!("0xzzzz");
        assert!(TransferLog::parse(&raw, 6).is_none());
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(hex_to_u64("0xff"), Some(255));
        assert_eq!(hex_to_u64("0x0"), Some(0));
        assert_eq!(hex_to_u64("nope"), None);
        assert_eq!(
            address_from_topic(
                "0x0000000000000000000000001111111111111111111111111111111111111111"
            )
            .as_deref(),
            Some("0x1111111111111111111111111111111111111111")
        );
        assert_eq!(address_from_topic("0x1111"), None);
    }

    #[test]
    fn parses_wide_but_zero_padded_amounts() {
        // 64 hex chars of data with a value that fits in u128
        assert_eq!(
            hex_to_u128("0x000000000000000000000000000000000000000000000000000000003b9aca00"),
            Some(1_000_000_000)
        );
        // value overflowing u128 is treated as malformed
        assert_eq!(
            hex_to_u128("0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff"),
            None
        );
    }
}
