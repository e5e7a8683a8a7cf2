//! Core types and data structures shared by the risk engine and the swap executor.

use crate::error::SwapError;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Chain-native address rendering (base58 on Solana, 0x-hex on EVM chains).
pub type Address = String;

/// Wrapped SOL mint, the input asset for Solana buys.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Wrapped BNB contract, the input asset for BSC buys.
pub const WBNB_ADDRESS: &str = "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c";

/// Basis-point denominator (1 bps = 0.01%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Trading venue a token is bought on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    /// Solana, routed through Jupiter
    Solana,
    /// BNB Smart Chain, priced through 0x / PancakeSwap
    Bsc,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Solana => "solana",
            Venue::Bsc => "bsc",
        }
    }

    /// The asset spent when buying on this venue.
    pub fn native_input_asset(&self) -> &'static str {
        match self {
            Venue::Solana => WSOL_MINT,
            Venue::Bsc => WBNB_ADDRESS,
        }
    }

    /// Decimals of the native input asset.
    pub fn native_decimals(&self) -> u8 {
        match self {
            Venue::Solana => 9,
            Venue::Bsc => 18,
        }
    }

    /// Block explorer link for a transaction id.
    pub fn explorer_url(&self, transaction_id: &str) -> String {
        match self {
            Venue::Solana => format!("https://solscan.io/tx/{}", transaction_id),
            Venue::Bsc => format!("https://bscscan.com/tx/{}", transaction_id),
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solana" | "sol" => Ok(Venue::Solana),
            "bsc" | "bnb" => Ok(Venue::Bsc),
            other => Err(format!("unknown chain '{}', expected 'solana' or 'bsc'", other)),
        }
    }
}

/// True when an address is absent or the chain's null/default address.
pub fn is_null_address(address: &str) -> bool {
    let trimmed = address.trim();
    if trimmed.is_empty() || trimmed == "11111111111111111111111111111111" {
        return true;
    }
    match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => hex.chars().all(|c| c == '0'),
        None => false,
    }
}

/// Normalizes an optional authority so that null addresses read as "none".
pub fn non_null(address: Option<Address>) -> Option<Address> {
    address.filter(|a| !is_null_address(a))
}

/// Token program that owns an account-model mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenProgram {
    SplToken,
    Token2022,
}

/// Programmable token extension decoded from a Token-2022 mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenExtension {
    /// Fee withheld on every transfer
    TransferFee { basis_points: u16, maximum_fee: u64 },
    /// Delegate that can move or burn any holder's tokens
    PermanentDelegate { delegate: Option<Address> },
    /// Tokens cannot be transferred at all
    NonTransferable,
    /// Custom program invoked on every transfer
    TransferHook { program_id: Option<Address> },
    /// Extension type without risk semantics
    Other { extension_type: u16 },
}

/// Decoded mint of an account-model chain (Solana SPL / Token-2022).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountModelToken {
    pub address: Address,
    pub program: TokenProgram,
    pub total_supply: U256,
    pub decimals: u8,
    pub mint_authority: Option<Address>,
    pub freeze_authority: Option<Address>,
    pub extensions: Vec<TokenExtension>,
}

/// Decoded facts about an EVM token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractModelToken {
    pub address: Address,
    pub total_supply: U256,
    pub decimals: u8,
    /// Result of `owner()`, `None` when the function is absent or renounced
    pub owner: Option<Address>,
    /// `owner()` could not be read (node errors outlasted the retries)
    #[serde(default)]
    pub owner_unknown: bool,
    /// Non-zero EIP-1967 implementation slot
    pub implementation: Option<Address>,
}

/// On-chain token metadata, tagged by chain model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenMetadata {
    AccountModel(AccountModelToken),
    ContractModel(ContractModelToken),
}

/// Venue-agnostic view the risk checks read from.
pub trait TokenRiskSurface {
    fn address(&self) -> &str;
    fn total_supply(&self) -> U256;
    fn decimals(&self) -> u8;
    /// Active mint authority (account model only).
    fn has_mint_risk(&self) -> bool;
    /// Active freeze authority (account model only).
    fn has_freeze_risk(&self) -> bool;
    /// Un-renounced contract owner (contract model only).
    fn has_owner_risk(&self) -> bool;
    /// The owner lookup failed, so owner risk is unknown rather than absent.
    fn ownership_unknown(&self) -> bool;
    fn proxy_implementation(&self) -> Option<&str>;
    fn extensions(&self) -> &[TokenExtension];
}

impl TokenRiskSurface for TokenMetadata {
    fn address(&self) -> &str {
        match self {
            TokenMetadata::AccountModel(t) => &t.address,
            TokenMetadata::ContractModel(t) => &t.address,
        }
    }

    fn total_supply(&self) -> U256 {
        match self {
            TokenMetadata::AccountModel(t) => t.total_supply,
            TokenMetadata::ContractModel(t) => t.total_supply,
        }
    }

    fn decimals(&self) -> u8 {
        match self {
            TokenMetadata::AccountModel(t) => t.decimals,
            TokenMetadata::ContractModel(t) => t.decimals,
        }
    }

    fn has_mint_risk(&self) -> bool {
        match self {
            TokenMetadata::AccountModel(t) => {
                t.mint_authority.as_deref().is_some_and(|a| !is_null_address(a))
            }
            TokenMetadata::ContractModel(_) => false,
        }
    }

    fn has_freeze_risk(&self) -> bool {
        match self {
            TokenMetadata::AccountModel(t) => {
                t.freeze_authority.as_deref().is_some_and(|a| !is_null_address(a))
            }
            TokenMetadata::ContractModel(_) => false,
        }
    }

    fn has_owner_risk(&self) -> bool {
        match self {
            TokenMetadata::AccountModel(_) => false,
            TokenMetadata::ContractModel(t) => {
                t.owner.as_deref().is_some_and(|a| !is_null_address(a))
            }
        }
    }

    fn ownership_unknown(&self) -> bool {
        match self {
            TokenMetadata::AccountModel(_) => false,
            TokenMetadata::ContractModel(t) => t.owner_unknown,
        }
    }

    fn proxy_implementation(&self) -> Option<&str> {
        match self {
            TokenMetadata::AccountModel(_) => None,
            TokenMetadata::ContractModel(t) => {
                t.implementation.as_deref().filter(|a| !is_null_address(a))
            }
        }
    }

    fn extensions(&self) -> &[TokenExtension] {
        match self {
            TokenMetadata::AccountModel(t) => &t.extensions,
            TokenMetadata::ContractModel(_) => &[],
        }
    }
}

/// One leg of a priced route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteHop {
    pub venue: String,
    pub in_amount: U256,
    pub out_amount: U256,
    pub fee_amount: Option<U256>,
}

/// Parameters of a quote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_asset: Address,
    pub output_asset: Address,
    pub amount: U256,
    pub slippage_bps: u16,
}

impl QuoteRequest {
    pub fn new(
        input_asset: impl Into<Address>,
        output_asset: impl Into<Address>,
        amount: U256,
        slippage_bps: u16,
    ) -> Self {
        Self {
            input_asset: input_asset.into(),
            output_asset: output_asset.into(),
            amount,
            slippage_bps,
        }
    }

    /// Request for the opposite direction of a quote, spending what it yields.
    pub fn reverse_of(quote: &Quote) -> Self {
        Self {
            input_asset: quote.output_asset.clone(),
            output_asset: quote.input_asset.clone(),
            amount: quote.output_amount,
            slippage_bps: quote.slippage_bps,
        }
    }
}

/// A priced route. Never mutated; a refresh produces a new value.
#[derive(Debug, Clone)]
pub struct Quote {
    pub input_asset: Address,
    pub output_asset: Address,
    pub input_amount: U256,
    pub output_amount: U256,
    /// Post-slippage floor, see [`minimum_output`]
    pub minimum_output_amount: U256,
    pub slippage_bps: u16,
    pub price_impact_pct: f64,
    pub route: Vec<RouteHop>,
    /// Sell tax declared by the venue's token metadata, if any
    pub declared_sell_tax_bps: Option<u32>,
    /// Venue response, replayed when building the transaction
    pub raw: serde_json::Value,
    pub fetched_at: Instant,
}

impl Quote {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }
}

/// `expected * (10000 - slippage_bps) / 10000`, floored, without intermediate overflow.
pub fn minimum_output(expected: U256, slippage_bps: u16) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let keep = U256::from(BPS_DENOMINATOR.saturating_sub(slippage_bps as u64));
    let whole = expected / denominator;
    let rest = expected % denominator;
    whole * keep + rest * keep / denominator
}

/// Parses a human decimal amount ("0.25") into base units.
pub fn parse_amount(input: &str, decimals: u8) -> Result<U256, SwapError> {
    let input = input.trim();
    let invalid = || SwapError::Validation(format!("malformed amount '{}'", input));

    if input.is_empty() || input.starts_with('-') {
        return Err(invalid());
    }
    let (whole, fraction) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };
    if fraction.len() > decimals as usize {
        return Err(SwapError::Validation(format!(
            "amount '{}' has more than {} decimal places",
            input, decimals
        )));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let digits = format!(
        "{}{}{}",
        if whole.is_empty() { "0" } else { whole },
        fraction,
        "0".repeat(decimals as usize - fraction.len())
    );
    let amount = U256::from_str_radix(&digits, 10).map_err(|_| invalid())?;
    if amount.is_zero() {
        return Err(SwapError::Validation("amount must be greater than zero".to_string()));
    }
    Ok(amount)
}

/// Renders base units as a decimal string.
///
/// Decimals too large for a `U256` scale (above 77) print the raw base units.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    let Some(scale) = U256::from(10u64).checked_pow(U256::from(decimals)) else {
        return amount.to_string();
    };
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_output_is_exact() {
        let floor = minimum_output(U256::from(1_000_000u64), 550);
        assert_eq!(floor, U256::from(945_000u64));
        assert_eq!(floor, minimum_output(U256::from(1_000_000u64), 550));
    }

    #[test]
    fn test_minimum_output_near_u256_max() {
        let floor = minimum_output(U256::MAX, 100);
        assert!(floor < U256::MAX);
        assert_eq!(minimum_output(U256::from(12_345u64), 0), U256::from(12_345u64));
        assert_eq!(minimum_output(U256::from(12_345u64), 10_000), U256::ZERO);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("0.25", 9).unwrap(), U256::from(250_000_000u64));
        assert_eq!(parse_amount("3", 6).unwrap(), U256::from(3_000_000u64));
        assert_eq!(parse_amount(".5", 1).unwrap(), U256::from(5u64));
        assert!(parse_amount("0", 9).is_err());
        assert!(parse_amount("-1", 9).is_err());
        assert!(parse_amount("1.2345", 2).is_err());
        assert!(parse_amount("1e9", 9).is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(U256::from(250_000_000u64), 9), "0.25");
        assert_eq!(format_amount(U256::from(3_000_000u64), 6), "3");
    }

    #[test]
    fn test_format_amount_with_absurd_decimals() {
        assert_eq!(format_amount(U256::from(123_456u64), 200), "123456");
        assert_eq!(format_amount(U256::from(5u64), 77), format!("0.{}5", "0".repeat(76)));
    }

    #[test]
    fn test_null_addresses() {
        assert!(is_null_address(""));
        assert!(is_null_address("0x0000000000000000000000000000000000000000"));
        assert!(is_null_address("11111111111111111111111111111111"));
        assert!(!is_null_address(WBNB_ADDRESS));
        assert!(!is_null_address(WSOL_MINT));
    }

    #[test]
    fn test_capabilities_follow_chain_model() {
        let mint = TokenMetadata::AccountModel(AccountModelToken {
            address: "Mint".to_string(),
            program: TokenProgram::SplToken,
            total_supply: U256::from(1u64),
            decimals: 6,
            mint_authority: None,
            freeze_authority: Some("Freezer".to_string()),
            extensions: vec![],
        });
        assert!(mint.has_freeze_risk());
        assert!(!mint.has_mint_risk());
        assert!(!mint.has_owner_risk());

        let contract = TokenMetadata::ContractModel(ContractModelToken {
            address: "0xabc".to_string(),
            total_supply: U256::from(1u64),
            decimals: 18,
            owner: Some("0x0000000000000000000000000000000000000000".to_string()),
            owner_unknown: false,
            implementation: None,
        });
        assert!(!contract.has_owner_risk());
        assert!(contract.proxy_implementation().is_none());
    }

    #[test]
    fn test_venue_from_str() {
        assert_eq!("SOL".parse::<Venue>().unwrap(), Venue::Solana);
        assert_eq!("bsc".parse::<Venue>().unwrap(), Venue::Bsc);
        assert!("eth".parse::<Venue>().is_err());
    }
}
