use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, BLOCKS_PER_DAY, END_BLOCK};
use crate::error::{AppError, Result};
use crate::types::RawTransaction;

/// Sort order accepted by the txlist endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Thin client over the Etherscan account API.
///
/// Failures are classified, never retried here: network errors, HTTP 429/5xx
/// and rate-limit messages come back as retryable `ExternalSource` errors.
pub struct EtherscanClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EtherscanClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(source_error)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let api_key = cfg
            .etherscan_api_key
            .clone()
            .ok_or_else(|| AppError::Config("ETHERSCAN_API_KEY is not set".to_string()))?;
        Self::new(
            cfg.etherscan_api_url.clone(),
            api_key,
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }

    /// Normal transactions of `address` between two blocks (inclusive).
    pub async fn get_transactions(
        &self,
        address: &str,
        start_block: u64,
        end_block: u64,
        sort: SortOrder,
    ) -> Result<Vec<RawTransaction>> {
        let start = start_block.to_string();
        let end = end_block.to_string();
        let params = [
            ("module", "account"),
            ("action", "txlist"),
            ("address", address),
            ("startblock", start.as_str()),
            ("endblock", end.as_str()),
            ("sort", sort.as_str()),
            ("apikey", self.api_key.as_str()),
        ];
        let body = self.get_json(&params).await?;
        let txs = parse_txlist_response(body)?;
        info!(address, start_block, end_block, count = txs.len(), "Fetched transactions");
        Ok(txs)
    }

    /// Transactions from roughly the last `days` days.
    pub async fn get_recent_transactions(
        &self,
        address: &str,
        days: u64,
        sort: SortOrder,
    ) -> Result<Vec<RawTransaction>> {
        let latest = self.latest_block().await?;
        let start_block = latest.saturating_sub(BLOCKS_PER_DAY * days);
        debug!(latest, start_block, days, "Estimated start block");
        self.get_transactions(address, start_block, latest, sort).await
    }

    async fn latest_block(&self) -> Result<u64> {
        let params = [
            ("module", "proxy"),
            ("action", "eth_blockNumber"),
            ("apikey", self.api_key.as_str()),
        ];
        let body = self.get_json(&params).await?;
        parse_block_number(&body)
    }

    async fn get_json(&self, params: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .http
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(source_error)?;

        let status = resp.status();
        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            warn!(%status, retryable, "Etherscan request failed");
            return Err(AppError::ExternalSource {
                message: format!("HTTP {status}"),
                retryable,
            });
        }
        resp.json::<Value>().await.map_err(source_error)
    }
}

/// History of `ETHERSCAN_ADDRESS` used when training without a batch:
/// the last `days` days when given, otherwise everything.
pub async fn fetch_training_batch(cfg: &Config, days: Option<u64>) -> Result<Vec<RawTransaction>> {
    let address = cfg
        .etherscan_address
        .as_deref()
        .ok_or_else(|| AppError::Config("ETHERSCAN_ADDRESS is not set".to_string()))?;
    let client = EtherscanClient::from_config(cfg)?;
    let txs = match days {
        Some(days) => {
            client
                .get_recent_transactions(address, days, SortOrder::Desc)
                .await?
        }
        None => {
            client
                .get_transactions(address, 0, END_BLOCK, SortOrder::Asc)
                .await?
        }
    };
    if txs.is_empty() {
        return Err(AppError::ExternalSource {
            message: format!("no transactions found for {address}"),
            retryable: false,
        });
    }
    Ok(txs)
}

fn source_error(e: reqwest::Error) -> AppError {
    let retryable = e.is_timeout()
        || e.is_connect()
        || e.is_request()
        || e.status().is_some_and(|s| s.as_u16() == 429 || s.is_server_error());
    AppError::ExternalSource {
        message: e.to_string(),
        retryable,
    }
}

fn is_rate_limited(text: &str) -> bool {
    text.to_ascii_lowercase().contains("rate limit")
}

/// Interpret a txlist response body.
///
/// `status == "1"` carries the transactions; `status == "0"` with
/// "No transactions found" is an empty history. Anything else is an error,
/// retryable when it mentions a rate limit.
pub fn parse_txlist_response(body: Value) -> Result<Vec<RawTransaction>> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("");
    let message = body.get("message").and_then(Value::as_str).unwrap_or("");

    if status == "1" {
        let result = body.get("result").cloned().unwrap_or(Value::Array(Vec::new()));
        return serde_json::from_value(result).map_err(|e| AppError::ExternalSource {
            message: format!("unexpected txlist payload: {e}"),
            retryable: false,
        });
    }

    if message.contains("No transactions found") {
        return Ok(Vec::new());
    }

    let result_text = match body.get("result") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Err(AppError::ExternalSource {
        message: format!("Etherscan API error: {message} {result_text}").trim().to_string(),
        retryable: is_rate_limited(message) || is_rate_limited(&result_text),
    })
}

/// Parse the hex `result` of an `eth_blockNumber` proxy call.
pub fn parse_block_number(body: &Value) -> Result<u64> {
    let raw = body.get("result").and_then(Value::as_str).unwrap_or("");
    let hex = raw.trim_start_matches("0x");
    u64::from_str_radix(hex, 16).map_err(|_| AppError::ExternalSource {
        message: format!("unexpected eth_blockNumber result `{raw}`"),
        retryable: is_rate_limited(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_response_yields_transactions() {
        let body = json!({
            "status": "1",
            "message": "OK",
            "result": [
                {"hash": "0xa", "timeStamp": "1678901234", "value": "1000", "gas": "21000", "gasPrice": "50", "blockNumber": "1"},
                {"hash": "0xb", "timeStamp": "1678901300", "value": "0", "gas": "21000", "gasPrice": "60"}
            ]
        });
        let txs = parse_txlist_response(body).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].hash.as_deref(), Some("0xa"));
    }

    #[test]
    fn no_transactions_is_empty() {
        let body = json!({"status": "0", "message": "No transactions found", "result": []});
        assert!(parse_txlist_response(body).unwrap().is_empty());
    }

    #[test]
    fn rate_limit_is_retryable() {
        let body = json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached, please use API Key for higher rate limit"
        });
        let err = parse_txlist_response(body).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn other_api_errors_are_not_retryable() {
        let body = json!({"status": "0", "message": "NOTOK", "result": "Invalid API Key"});
        let err = parse_txlist_response(body).unwrap_err();
        assert!(matches!(err, AppError::ExternalSource { retryable: false, .. }));
    }

    #[test]
    fn parses_hex_block_number() {
        assert_eq!(parse_block_number(&json!({"result": "0x10d4f"})).unwrap(), 68943);
        assert!(parse_block_number(&json!({"result": "garbage"})).is_err());
    }
}
