//! Quote freshness gate.
//!
//! A quote older than the configured age is re-fetched before a transaction is
//! built from it. If the refreshed output is worse than the last accepted one
//! by more than the abort threshold the session stops with
//! [`SwapError::PriceMoved`]; smaller adverse moves above the warn threshold
//! are only logged.

use crate::config::ExecutorConfig;
use crate::error::SwapError;
use crate::types::{Quote, BPS_DENOMINATOR};
use alloy_primitives::U256;
use tracing::{debug, warn};

/// Adverse output move in basis points, rounded up. Improvements read as zero.
pub fn adverse_deviation_bps(previous_output: U256, current_output: U256) -> u64 {
    if previous_output.is_zero() || current_output >= previous_output {
        return 0;
    }
    let loss = (previous_output - current_output) * U256::from(BPS_DENOMINATOR);
    let bps = (loss + previous_output - U256::from(1u64)) / previous_output;
    u64::try_from(bps).unwrap_or(BPS_DENOMINATOR)
}

/// Outcome of comparing a refreshed quote with the last accepted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceCheck {
    /// Within the warn threshold
    Accepted { deviation_bps: u64 },
    /// Logged, but trading continues
    Warned { deviation_bps: u64 },
    /// Beyond the abort threshold, but the caller opted in
    Overridden { deviation_bps: u64 },
}

/// Compares a refreshed quote to the previously accepted one.
pub fn check_price_move(
    previous: &Quote,
    refreshed: &Quote,
    config: &ExecutorConfig,
    allow_price_move: bool,
) -> Result<PriceCheck, SwapError> {
    let deviation_bps = adverse_deviation_bps(previous.output_amount, refreshed.output_amount);

    if deviation_bps > config.price_abort_bps {
        if !allow_price_move {
            warn!(
                "Price moved {} bps against the trade ({} -> {}), aborting",
                deviation_bps, previous.output_amount, refreshed.output_amount
            );
            return Err(SwapError::PriceMoved {
                previous_output: previous.output_amount,
                current_output: refreshed.output_amount,
                deviation_bps,
            });
        }
        warn!(
            "Price moved {} bps against the trade, continuing because the move was explicitly allowed",
            deviation_bps
        );
        return Ok(PriceCheck::Overridden { deviation_bps });
    }

    if deviation_bps > config.price_warn_bps {
        warn!(
            "Price moved {} bps against the trade since the last quote ({} -> {})",
            deviation_bps, previous.output_amount, refreshed.output_amount
        );
        return Ok(PriceCheck::Warned { deviation_bps });
    }

    debug!("Refreshed quote within {} bps of the previous one", deviation_bps);
    Ok(PriceCheck::Accepted { deviation_bps })
}
