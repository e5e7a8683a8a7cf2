//! ERC-20 inspection over EVM JSON-RPC (`eth_call` / `eth_getStorageAt`).

use crate::error::InspectError;
use crate::inspector::TokenInspector;
use crate::types::{non_null, Address, ContractModelToken, TokenMetadata};
use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, instrument, warn};

const SELECTOR_TOTAL_SUPPLY: &str = "0x18160ddd";
const SELECTOR_DECIMALS: &str = "0x313ce567";
const SELECTOR_OWNER: &str = "0x8da5dbcb";

/// `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`
pub const EIP1967_IMPLEMENTATION_SLOT: &str = "0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc";

/// Result of an `eth_call`: either return data or a revert.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallOutcome {
    Returned(String),
    Reverted(String),
}

/// Reads token facts through plain JSON-RPC calls.
pub struct EvmInspector {
    http: Client,
    rpc_url: String,
    retry_attempts: usize,
}

impl EvmInspector {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            rpc_url: rpc_url.into(),
            retry_attempts: 3,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, InspectError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        let (http, url, body) = (&self.http, &self.rpc_url, &body);
        RetryIf::spawn(
            strategy,
            || async move {
                let response = http
                    .post(url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| InspectError::Rpc(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(InspectError::Rpc(format!("HTTP {}", response.status())));
                }
                let value = response
                    .json::<Value>()
                    .await
                    .map_err(|e| InspectError::Decode(e.to_string()))?;
                // Node-side errors are retried here; reverts are left for the caller.
                match call_outcome(&value) {
                    Err(e @ InspectError::Rpc(_)) => Err(e),
                    _ => Ok(value),
                }
            },
            |e: &InspectError| e.is_transient(),
        )
        .await
    }

    async fn call(&self, token: &str, selector: &str) -> Result<CallOutcome, InspectError> {
        let response = self
            .rpc("eth_call", json!([{ "to": token, "data": selector }, "latest"]))
            .await?;
        call_outcome(&response)
    }

    async fn storage_at(&self, token: &str, slot: &str) -> Result<String, InspectError> {
        let response = self.rpc("eth_getStorageAt", json!([token, slot, "latest"])).await?;
        match call_outcome(&response)? {
            CallOutcome::Returned(word) => Ok(word),
            CallOutcome::Reverted(message) => Err(InspectError::Rpc(message)),
        }
    }

    async fn has_code(&self, token: &str) -> Result<bool, InspectError> {
        let response = self.rpc("eth_getCode", json!([token, "latest"])).await?;
        match call_outcome(&response)? {
            CallOutcome::Returned(code) => Ok(!strip_hex(&code).is_empty()),
            CallOutcome::Reverted(message) => Err(InspectError::Rpc(message)),
        }
    }
}

#[async_trait]
impl TokenInspector for EvmInspector {
    #[instrument(skip(self))]
    async fn fetch_token_metadata(&self, address: &str) -> Result<TokenMetadata, InspectError> {
        let token = validate_address(address)?;
        let not_a_token = |reason: String| InspectError::NotAMint {
            address: token.clone(),
            reason,
        };

        if !self.has_code(&token).await? {
            return Err(not_a_token("no contract code at address".to_string()));
        }

        let total_supply = match self.call(&token, SELECTOR_TOTAL_SUPPLY).await? {
            CallOutcome::Returned(word) => {
                parse_word(&word).ok_or_else(|| not_a_token("totalSupply() returned no data".to_string()))?
            }
            CallOutcome::Reverted(message) => return Err(not_a_token(format!("totalSupply() reverted: {}", message))),
        };

        let decimals = match self.call(&token, SELECTOR_DECIMALS).await? {
            CallOutcome::Returned(word) => parse_word(&word)
                .and_then(|d| u8::try_from(d).ok())
                .unwrap_or(18),
            CallOutcome::Reverted(_) => 18,
        };

        // A missing owner() function reverts; that just means no owner.
        let (owner, owner_unknown) = match self.call(&token, SELECTOR_OWNER).await {
            Ok(CallOutcome::Returned(word)) => (non_null(word_to_address(&word)), false),
            Ok(CallOutcome::Reverted(_)) => (None, false),
            Err(e) => {
                warn!("owner() lookup on {} failed: {}", token, e);
                (None, true)
            }
        };

        let implementation = non_null(word_to_address(
            &self.storage_at(&token, EIP1967_IMPLEMENTATION_SLOT).await?,
        ));

        debug!(
            "Decoded contract {}: supply {} decimals {} owner {:?} implementation {:?}",
            token, total_supply, decimals, owner, implementation
        );

        Ok(TokenMetadata::ContractModel(ContractModelToken {
            address: token,
            total_supply,
            decimals,
            owner,
            owner_unknown,
            implementation,
        }))
    }
}

/// Accepts `0x` + 40 hex digits and returns the lower-cased form.
pub fn validate_address(address: &str) -> Result<Address, InspectError> {
    let trimmed = address.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| InspectError::InvalidAddress(format!("{}: missing 0x prefix", address)))?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(InspectError::InvalidAddress(format!("{}: expected 40 hex digits", address)));
    }
    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}

/// JSON-RPC code geth and most BSC nodes use for `execution reverted`.
const REVERT_ERROR_CODE: i64 = 3;

/// Splits a JSON-RPC response into return data, a contract revert, or a node
/// error. Only reverts say something about the contract.
fn call_outcome(response: &Value) -> Result<CallOutcome, InspectError> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let code = error.get("code").and_then(Value::as_i64);
        if code == Some(REVERT_ERROR_CODE) || message.to_ascii_lowercase().contains("revert") {
            return Ok(CallOutcome::Reverted(message));
        }
        return Err(InspectError::Rpc(match code {
            Some(code) => format!("JSON-RPC error {}: {}", code, message),
            None => message,
        }));
    }
    response
        .get("result")
        .and_then(Value::as_str)
        .map(|s| CallOutcome::Returned(s.to_string()))
        .ok_or_else(|| InspectError::Decode("JSON-RPC response has neither result nor error".to_string()))
}

fn strip_hex(word: &str) -> &str {
    word.strip_prefix("0x").unwrap_or(word)
}

/// First 32-byte word of return data; `None` for empty data.
pub fn parse_word(data: &str) -> Option<U256> {
    let hex = strip_hex(data);
    if hex.is_empty() {
        return None;
    }
    let word = hex.get(..hex.len().min(64))?;
    U256::from_str_radix(word, 16).ok()
}

/// Address held in the low 20 bytes of a 32-byte word.
pub fn word_to_address(data: &str) -> Option<Address> {
    let hex = strip_hex(data);
    let address = hex.get(24..64)?;
    Some(format!("0x{}", address.to_ascii_lowercase()))
}
