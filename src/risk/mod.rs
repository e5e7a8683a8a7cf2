//! Token risk assessment.
//!
//! [`RiskEngine`] runs a fixed battery of independent checks (round-trip
//! honeypot simulation, proxy and authority checks, Token-2022 extensions,
//! zero supply) and folds their findings into one [`RiskAssessment`].

pub mod checks;
pub mod engine;
pub mod extensions;
pub mod types;

pub use engine::{assess_risk, RiskEngine};
pub use extensions::{extensions_from_mint, parse_extensions};
pub use types::{Category, RiskAssessment, RiskFinding, RiskLevel, Severity};
