//! Quote providers: venue pricing/routing APIs.
//!
//! A [`QuoteProvider`] prices a trade; a [`SwapBuilder`] turns an accepted
//! quote into a signed, venue-specific transaction blob. Both the risk engine
//! (round-trip simulation) and the swap executor (freshness refresh) consume
//! them through these traits so tests can substitute in-memory fakes.

pub mod http;
pub mod jupiter;
pub mod zerox;

use crate::error::QuoteError;
use crate::execution::fees::FeeSetting;
use crate::types::{Quote, QuoteRequest};
use async_trait::async_trait;
use std::sync::Arc;

pub use http::RequestPacer;
pub use jupiter::JupiterClient;
pub use zerox::ZeroExClient;

/// Prices trades on one venue.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError>;
}

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedSwap {
    /// Serialized, signed transaction
    pub payload: Vec<u8>,
    /// Block height after which the transaction can no longer land
    pub last_valid_block_height: Option<u64>,
    /// Fee the transaction was built with
    pub fee: FeeSetting,
}

/// Builds and signs the swap transaction for an accepted quote.
#[async_trait]
pub trait SwapBuilder: Send + Sync {
    /// Builds a fresh transaction; each call yields a new blockhash/deadline.
    async fn build_signed_transaction(&self, quote: &Quote, fee: FeeSetting) -> Result<SignedSwap, QuoteError>;
}

#[async_trait]
impl<T: QuoteProvider + ?Sized> QuoteProvider for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        (**self).get_quote(request).await
    }
}

#[async_trait]
impl<T: SwapBuilder + ?Sized> SwapBuilder for Arc<T> {
    async fn build_signed_transaction(&self, quote: &Quote, fee: FeeSetting) -> Result<SignedSwap, QuoteError> {
        (**self).build_signed_transaction(quote, fee).await
    }
}
