//! Chain connection used by the swap executor: submit, confirm, fetch logs.

use crate::error::{ConnectionError, OnChainFailure};
use crate::execution::fees::FeeHints;
use crate::quote::SignedSwap;
use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig};
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::instruction::InstructionError;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::UiTransactionEncoding;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Compute budget assumed when turning a per-CU price into lamports.
pub const ESTIMATE_COMPUTE_UNITS: u64 = 200_000;

/// Final state reported by the chain for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// Landed but the program rejected it
    Failed(OnChainFailure),
    /// The blockhash expired before the transaction landed
    Expired,
}

/// Submission and confirmation interface to a chain.
#[async_trait]
pub trait ChainConnection: Send + Sync {
    /// Sends a signed transaction and returns its id.
    async fn submit(&self, swap: &SignedSwap) -> Result<String, ConnectionError>;

    /// Waits until the transaction is confirmed, fails or expires.
    ///
    /// Callers bound this with their own timeout.
    async fn await_confirmation(
        &self,
        transaction_id: &str,
        last_valid_block_height: Option<u64>,
    ) -> Result<Confirmation, ConnectionError>;

    /// Program log lines of a landed transaction, best effort.
    async fn fetch_transaction_logs(&self, transaction_id: &str) -> Option<Vec<String>>;
}

#[async_trait]
impl<T: ChainConnection + ?Sized> ChainConnection for Arc<T> {
    async fn submit(&self, swap: &SignedSwap) -> Result<String, ConnectionError> {
        (**self).submit(swap).await
    }

    async fn await_confirmation(
        &self,
        transaction_id: &str,
        last_valid_block_height: Option<u64>,
    ) -> Result<Confirmation, ConnectionError> {
        (**self).await_confirmation(transaction_id, last_valid_block_height).await
    }

    async fn fetch_transaction_logs(&self, transaction_id: &str) -> Option<Vec<String>> {
        (**self).fetch_transaction_logs(transaction_id).await
    }
}

/// Solana JSON-RPC connection.
pub struct SolanaConnection {
    rpc: Arc<RpcClient>,
    poll_interval: Duration,
}

impl SolanaConnection {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wallet balance in lamports.
    pub async fn balance(&self, owner: &Pubkey) -> Result<u64, ConnectionError> {
        self.rpc.get_balance(owner).await.map_err(from_client_error)
    }

    /// Fee hints from recent prioritization fees.
    #[instrument(skip(self))]
    pub async fn estimate_priority_fee(&self) -> FeeHints {
        match self.rpc.get_recent_prioritization_fees(&[]).await {
            Ok(samples) => {
                let prices: Vec<u64> = samples.iter().map(|s| s.prioritization_fee).collect();
                let estimate = priority_fee_from_samples(&prices, ESTIMATE_COMPUTE_UNITS);
                debug!("Priority fee estimate from {} samples: {:?}", prices.len(), estimate);
                FeeHints {
                    network_estimate: estimate,
                }
            }
            Err(e) => {
                warn!("Could not fetch recent prioritization fees: {}", e);
                FeeHints::default()
            }
        }
    }
}

#[async_trait]
impl ChainConnection for SolanaConnection {
    #[instrument(skip(self, swap), fields(fee = %swap.fee))]
    async fn submit(&self, swap: &SignedSwap) -> Result<String, ConnectionError> {
        let transaction: VersionedTransaction = bincode::deserialize(&swap.payload).map_err(|e| {
            ConnectionError::Rejected {
                message: format!("signed payload is not a transaction: {}", e),
                failure: None,
            }
        })?;

        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            max_retries: Some(0),
            ..Default::default()
        };
        let signature = self
            .rpc
            .send_transaction_with_config(&transaction, config)
            .await
            .map_err(from_client_error)?;

        debug!("Submitted transaction {}", signature);
        Ok(signature.to_string())
    }

    #[instrument(skip(self))]
    async fn await_confirmation(
        &self,
        transaction_id: &str,
        last_valid_block_height: Option<u64>,
    ) -> Result<Confirmation, ConnectionError> {
        let signature = Signature::from_str(transaction_id).map_err(|e| ConnectionError::Rejected {
            message: format!("invalid signature {}: {}", transaction_id, e),
            failure: None,
        })?;

        // The transaction may still land, so a failed poll is never terminal:
        // keep polling until the caller's timeout ends the attempt.
        loop {
            match self.rpc.get_signature_statuses(&[signature]).await {
                Ok(statuses) => {
                    if let Some(Some(status)) = statuses.value.first() {
                        if let Some(err) = &status.err {
                            return Ok(Confirmation::Failed(failure_from_transaction_error(err)));
                        }
                        if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                            return Ok(Confirmation::Confirmed);
                        }
                    }
                }
                Err(e) => warn!("Status poll for {} failed: {}", transaction_id, e),
            }

            if let Some(last_valid) = last_valid_block_height {
                match self.rpc.get_block_height().await {
                    Ok(height) if height > last_valid => {
                        debug!("Block height {} passed last valid height {}", height, last_valid);
                        return Ok(Confirmation::Expired);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Block height poll failed: {}", e),
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    #[instrument(skip(self))]
    async fn fetch_transaction_logs(&self, transaction_id: &str) -> Option<Vec<String>> {
        let signature = Signature::from_str(transaction_id).ok()?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let transaction = match self.rpc.get_transaction_with_config(&signature, config).await {
            Ok(transaction) => transaction,
            Err(e) => {
                debug!("Could not fetch logs for {}: {}", transaction_id, e);
                return None;
            }
        };
        match transaction.transaction.meta?.log_messages {
            OptionSerializer::Some(logs) => Some(logs),
            _ => None,
        }
    }
}

/// Structured form of a transaction error.
pub fn failure_from_transaction_error(error: &TransactionError) -> OnChainFailure {
    let (instruction_index, code) = match error {
        TransactionError::InstructionError(index, InstructionError::Custom(code)) => (Some(*index), Some(*code)),
        TransactionError::InstructionError(index, _) => (Some(*index), None),
        _ => (None, None),
    };
    OnChainFailure::new(instruction_index, code, format!("{:?}", error))
}

/// Classifies an RPC client error for the retry loop.
///
/// Preflight program errors are terminal; expired blockhashes, transport
/// failures and timeouts are retryable.
pub fn from_client_error(error: ClientError) -> ConnectionError {
    if let Some(transaction_error) = error.get_transaction_error() {
        return match transaction_error {
            TransactionError::BlockhashNotFound => ConnectionError::Expired(error.to_string()),
            TransactionError::InstructionError(..) => ConnectionError::Rejected {
                message: error.to_string(),
                failure: Some(failure_from_transaction_error(&transaction_error)),
            },
            TransactionError::WouldExceedMaxBlockCostLimit
            | TransactionError::WouldExceedMaxAccountCostLimit
            | TransactionError::WouldExceedAccountDataBlockLimit => ConnectionError::Transient(error.to_string()),
            _ => ConnectionError::Rejected {
                message: error.to_string(),
                failure: Some(failure_from_transaction_error(&transaction_error)),
            },
        };
    }

    match error.kind() {
        ClientErrorKind::Reqwest(inner) if inner.is_timeout() => ConnectionError::Timeout(error.to_string()),
        ClientErrorKind::Reqwest(_) | ClientErrorKind::Io(_) => ConnectionError::Transient(error.to_string()),
        _ => ConnectionError::from_rpc_message(error.to_string()),
    }
}

/// Median per-CU price (micro-lamports) converted to lamports for a compute budget.
pub fn priority_fee_from_samples(micro_lamports_per_cu: &[u64], compute_units: u64) -> Option<u64> {
    if micro_lamports_per_cu.is_empty() {
        return None;
    }
    let mut sorted = micro_lamports_per_cu.to_vec();
    sorted.sort_unstable();
    let median = sorted[sorted.len() / 2];
    let lamports = (median as u128 * compute_units as u128).div_ceil(1_000_000);
    match u64::try_from(lamports) {
        Ok(0) => None,
        Ok(fee) => Some(fee),
        Err(_) => Some(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_instruction_error() {
        let failure = failure_from_transaction_error(&TransactionError::InstructionError(
            4,
            InstructionError::Custom(6001),
        ));
        assert_eq!(failure.instruction_index, Some(4));
        assert_eq!(failure.code, Some(6001));
        assert!(failure.raw.contains("Custom(6001)"));

        let generic = failure_from_transaction_error(&TransactionError::AccountInUse);
        assert_eq!(generic.instruction_index, None);
        assert_eq!(generic.code, None);
    }

    #[test]
    fn test_client_error_classification() {
        let expired = from_client_error(ClientError::from(TransactionError::BlockhashNotFound));
        assert!(matches!(expired, ConnectionError::Expired(_)));

        let revert = from_client_error(ClientError::from(TransactionError::InstructionError(
            2,
            InstructionError::Custom(6001),
        )));
        match revert {
            ConnectionError::Rejected { failure: Some(failure), .. } => assert_eq!(failure.code, Some(6001)),
            other => panic!("unexpected {:?}", other),
        }

        let reset = from_client_error(ClientError::from(ClientErrorKind::Custom(
            "connection reset by peer".to_string(),
        )));
        assert!(matches!(reset, ConnectionError::Transient(_)));
        assert!(reset.is_retryable());
    }

    #[tokio::test]
    async fn test_failed_status_polls_keep_waiting() {
        // Every request to the "fails" mock returns unparseable data.
        let connection = SolanaConnection::new(Arc::new(RpcClient::new_mock("fails".to_string())))
            .with_poll_interval(Duration::from_millis(5));
        let signature = Signature::default().to_string();

        let wait = tokio::time::timeout(
            Duration::from_millis(100),
            connection.await_confirmation(&signature, Some(10)),
        )
        .await;
        assert!(wait.is_err(), "poll errors must not end the wait: {:?}", wait);
    }

    #[test]
    fn test_priority_fee_median() {
        assert_eq!(priority_fee_from_samples(&[], ESTIMATE_COMPUTE_UNITS), None);
        assert_eq!(priority_fee_from_samples(&[0, 0, 0], ESTIMATE_COMPUTE_UNITS), None);
        // median 50_000 micro-lamports/CU * 200k CU = 10_000 lamports
        assert_eq!(
            priority_fee_from_samples(&[1, 50_000, 900_000], ESTIMATE_COMPUTE_UNITS),
            Some(10_000)
        );
        assert_eq!(priority_fee_from_samples(&[3], 1), Some(1));
    }
}
