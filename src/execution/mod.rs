//! Swap execution: fee escalation, quote freshness, submission and
//! confirmation, and decoding of on-chain failures.

pub mod connection;
pub mod diagnostics;
pub mod executor;
pub mod fees;
pub mod freshness;

pub use connection::{ChainConnection, Confirmation, SolanaConnection};
pub use executor::{AttemptOutcome, SwapAttempt, SwapExecutor, SwapReceipt, TradeRequest};
pub use fees::{FeeHints, FeeSchedule, FeeSetting};
