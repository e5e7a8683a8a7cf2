//! On-chain token inspection.
//!
//! Inspectors decode the venue-specific facts the risk engine needs (supply,
//! authorities or owner, proxy slot, Token-2022 extensions) into a
//! [`TokenMetadata`]. All chain-specific decoding lives here.

pub mod evm;
pub mod solana;

use crate::error::InspectError;
use crate::types::TokenMetadata;
use async_trait::async_trait;

pub use evm::EvmInspector;
pub use solana::SolanaInspector;

/// Fetches and decodes token metadata from a chain.
#[async_trait]
pub trait TokenInspector: Send + Sync {
    async fn fetch_token_metadata(&self, address: &str) -> Result<TokenMetadata, InspectError>;
}
