//! Error taxonomy shared by the inspector, quote providers and the swap executor.
//!
//! Every error answers one question for the retry loop: may the same step be
//! tried again? Input errors, on-chain failures and adverse price moves are
//! terminal; timeouts, expired blockhashes and transport failures are not.

use alloy_primitives::U256;
use std::fmt;
use thiserror::Error;

/// Failure talking to a venue's pricing/routing API.
#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("No route available: {0}")]
    NoRoute(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Venue API responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode venue response: {0}")]
    Decode(String),

    #[error("Failed to sign transaction: {0}")]
    Signing(String),
}

impl QuoteError {
    /// Transport failures, rate limiting and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            QuoteError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| is_transient_status(s.as_u16()))
            }
            QuoteError::Status { status, .. } => is_transient_status(*status),
            QuoteError::NoRoute(_) | QuoteError::Decode(_) | QuoteError::Signing(_) => false,
        }
    }
}

/// 429 and 5xx are worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Failure decoding a token's on-chain metadata.
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Account {address} is not a token mint: {reason}")]
    NotAMint { address: String, reason: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Failed to decode token data: {0}")]
    Decode(String),
}

impl InspectError {
    pub fn is_transient(&self) -> bool {
        matches!(self, InspectError::Rpc(_))
    }
}

/// Structured program error reported for a failed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainFailure {
    /// Index of the failing instruction, when the venue reports one
    pub instruction_index: Option<u8>,
    /// Program-specific numeric error code
    pub code: Option<u32>,
    /// Raw error rendering as returned by the chain
    pub raw: String,
}

impl OnChainFailure {
    pub fn new(instruction_index: Option<u8>, code: Option<u32>, raw: impl Into<String>) -> Self {
        Self {
            instruction_index,
            code,
            raw: raw.into(),
        }
    }
}

/// Failure on the chain connection (submit / confirm).
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transaction expired before landing: {0}")]
    Expired(String),

    #[error("Transient RPC failure: {0}")]
    Transient(String),

    #[error("RPC rejected transaction: {message}")]
    Rejected {
        message: String,
        failure: Option<OnChainFailure>,
    },
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::Rejected { .. })
    }

    /// Classifies an RPC error that is only available as text.
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();

        const EXPIRED: &[&str] = &["blockhash not found", "block height exceeded", "blockhash expired", "transaction expired"];
        const TIMEOUT: &[&str] = &["timed out", "timeout", "deadline has elapsed"];
        const TRANSIENT: &[&str] = &[
            "connection reset",
            "connection refused",
            "connection closed",
            "broken pipe",
            "429",
            "too many requests",
            "500",
            "502",
            "503",
            "504",
            "internal server error",
            "bad gateway",
            "service unavailable",
            "node is behind",
            "node is unhealthy",
        ];

        if EXPIRED.iter().any(|p| lower.contains(p)) {
            ConnectionError::Expired(message)
        } else if TIMEOUT.iter().any(|p| lower.contains(p)) {
            ConnectionError::Timeout(message)
        } else if TRANSIENT.iter().any(|p| lower.contains(p)) {
            ConnectionError::Transient(message)
        } else {
            ConnectionError::Rejected {
                message,
                failure: None,
            }
        }
    }
}

/// Trade parameters attached to terminal failures for post-mortem lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeContext {
    pub token: String,
    pub input_asset: String,
    pub amount: U256,
    pub slippage_bps: u16,
    pub expected_output: Option<U256>,
    pub minimum_output: Option<U256>,
}

impl fmt::Display for TradeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "token={} amount={} slippage={}bps",
            self.token, self.amount, self.slippage_bps
        )?;
        if let Some(expected) = self.expected_output {
            write!(f, " expected_out={}", expected)?;
        }
        if let Some(minimum) = self.minimum_output {
            write!(f, " min_out={}", minimum)?;
        }
        Ok(())
    }
}

/// Coarse classification surfaced to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad address, malformed amount, impossible slippage
    Validation,
    /// Refused to trade because the price moved since the quote
    PriceMoved,
    /// The venue could not price or build the trade
    Venue,
    /// The transaction reverted or the program rejected it
    OnChain,
    /// Transient failures outlasted the attempt cap
    RetriesExhausted,
    /// The caller cancelled between steps
    Cancelled,
}

/// Terminal outcome of a swap session.
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Price moved {deviation_bps} bps against the trade since the last quote (expected {previous_output}, now {current_output}); refusing to trade")]
    PriceMoved {
        previous_output: U256,
        current_output: U256,
        deviation_bps: u64,
    },

    #[error("Venue error: {source} ({context})")]
    Venue {
        #[source]
        source: QuoteError,
        context: Box<TradeContext>,
    },

    #[error("Transaction {transaction_id} failed on-chain: {message} ({context})")]
    OnChain {
        transaction_id: String,
        message: String,
        failure: OnChainFailure,
        logs: Vec<String>,
        context: Box<TradeContext>,
    },

    #[error("Transaction rejected: {message} ({context})")]
    Rejected {
        message: String,
        failure: Option<OnChainFailure>,
        /// Set when the rejection came after submission
        transaction_id: Option<String>,
        context: Box<TradeContext>,
    },

    #[error("Swap failed after {attempts} attempts, last error: {last_error} ({context})")]
    RetriesExhausted {
        attempts: u32,
        last_error: String,
        transaction_id: Option<String>,
        context: Box<TradeContext>,
    },

    #[error("Swap cancelled")]
    Cancelled { transaction_id: Option<String> },
}

impl SwapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::Validation(_) => ErrorKind::Validation,
            SwapError::PriceMoved { .. } => ErrorKind::PriceMoved,
            SwapError::Venue { .. } => ErrorKind::Venue,
            SwapError::OnChain { .. } | SwapError::Rejected { .. } => ErrorKind::OnChain,
            SwapError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            SwapError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Id of the last submitted transaction, when one exists.
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            SwapError::OnChain { transaction_id, .. } => Some(transaction_id),
            SwapError::Rejected { transaction_id, .. }
            | SwapError::RetriesExhausted { transaction_id, .. }
            | SwapError::Cancelled { transaction_id } => transaction_id.as_deref(),
            _ => None,
        }
    }

    /// Raw chain error, for on-chain failures.
    pub fn raw_on_chain_error(&self) -> Option<&OnChainFailure> {
        match self {
            SwapError::OnChain { failure, .. } => Some(failure),
            SwapError::Rejected { failure, .. } => failure.as_ref(),
            _ => None,
        }
    }

    /// Recent program log lines captured for an on-chain failure.
    pub fn logs(&self) -> &[String] {
        match self {
            SwapError::OnChain { logs, .. } => logs,
            _ => &[],
        }
    }

    pub fn context(&self) -> Option<&TradeContext> {
        match self {
            SwapError::Venue { context, .. }
            | SwapError::OnChain { context, .. }
            | SwapError::Rejected { context, .. }
            | SwapError::RetriesExhausted { context, .. } => Some(context),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SwapError>;
