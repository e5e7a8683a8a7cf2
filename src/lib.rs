//! safebuy - single-token buying bot with anti-scam checks
//!
//! The crate has two cores: the [`risk`] engine, which inspects a token's
//! on-chain metadata and simulates a buy/sell round trip to flag honeypots,
//! taxes and dangerous authorities, and the [`execution`] state machine, which
//! submits the swap, confirms it under a deadline and retries transient
//! failures with an escalating fee.

pub mod config;
pub mod error;
pub mod execution;
pub mod inspector;
pub mod quote;
pub mod risk;
pub mod types;

// Re-export main types for convenience
pub use config::{BotConfig, BotConfigBuilder, ExecutorConfig, RiskPolicy};
pub use error::{ErrorKind, SwapError};
pub use execution::{SwapExecutor, SwapReceipt, TradeRequest};
pub use risk::{assess_risk, RiskAssessment, RiskEngine, RiskLevel};
pub use types::{Quote, TokenMetadata, Venue};
