//! Priority-fee settings and the per-attempt escalation schedule.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fee used on the first retry when the caller has no network estimate.
pub const DEFAULT_PRIORITY_FEE_LAMPORTS: u64 = 100_000;

/// Priority fee (lamports on Solana, gas price in wei on EVM chains).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeSetting {
    /// Let the venue pick the fee
    Auto,
    Fixed(u64),
}

impl FeeSetting {
    /// Automatic and zero fees both leave the choice to the venue.
    pub fn is_unset(&self) -> bool {
        matches!(self, FeeSetting::Auto | FeeSetting::Fixed(0))
    }

    pub fn amount(&self) -> Option<u64> {
        match self {
            FeeSetting::Auto => None,
            FeeSetting::Fixed(fee) => Some(*fee),
        }
    }
}

impl fmt::Display for FeeSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeSetting::Auto => f.write_str("auto"),
            FeeSetting::Fixed(fee) => write!(f, "{}", fee),
        }
    }
}

impl FromStr for FeeSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(FeeSetting::Auto);
        }
        s.parse::<u64>()
            .map(FeeSetting::Fixed)
            .map_err(|_| format!("expected 'auto' or an integer fee, got '{}'", s))
    }
}

/// Network fee information supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeHints {
    /// Recent network priority fee, in the venue's fee unit
    pub network_estimate: Option<u64>,
}

impl FeeHints {
    pub fn with_estimate(estimate: u64) -> Self {
        Self {
            network_estimate: Some(estimate),
        }
    }
}

/// `ceil(fee * 1.5^steps)` in exact integer arithmetic, saturating at `u64::MAX`.
pub fn escalate(fee: u64, steps: u32) -> u64 {
    // fee * 3^110 still fits in 256 bits and saturates u64 long before
    let steps = steps.min(110);
    let numerator = U256::from(fee) * U256::from(3u64).pow(U256::from(steps));
    let denominator = U256::from(2u64).pow(U256::from(steps));
    let result = (numerator + denominator - U256::from(1u64)) / denominator;
    u64::try_from(result).unwrap_or(u64::MAX)
}

/// Fee to use on each attempt of a swap session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    base: FeeSetting,
    fallback: u64,
}

impl FeeSchedule {
    pub fn new(base: FeeSetting, hints: &FeeHints, default_fee: u64) -> Self {
        let fallback = hints
            .network_estimate
            .filter(|estimate| *estimate > 0)
            .unwrap_or(default_fee)
            .max(1);
        Self { base, fallback }
    }

    /// Fee for a 1-based attempt number.
    ///
    /// A fixed fee F yields `ceil(F * 1.5^(k-1))`. An unset fee stays unset on
    /// the first attempt and switches to the network estimate (or the default
    /// floor) on the second, escalating from there.
    pub fn fee_for_attempt(&self, attempt: u32) -> FeeSetting {
        let attempt = attempt.max(1);
        if self.base.is_unset() {
            if attempt == 1 {
                self.base
            } else {
                FeeSetting::Fixed(escalate(self.fallback, attempt - 2))
            }
        } else {
            let base = self.base.amount().unwrap_or(self.fallback);
            FeeSetting::Fixed(escalate(base, attempt - 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalate_closed_form() {
        assert_eq!(escalate(1_000, 0), 1_000);
        assert_eq!(escalate(1_000, 1), 1_500);
        assert_eq!(escalate(1_000, 2), 2_250);
        assert_eq!(escalate(1_000, 3), 3_375);
        // ceil(3 * 2.25) = 7, not ceil(ceil(4.5) * 1.5) = 8
        assert_eq!(escalate(3, 2), 7);
        assert_eq!(escalate(1, 1), 2);
        assert_eq!(escalate(u64::MAX, 5), u64::MAX);
    }

    #[test]
    fn test_fixed_schedule_matches_ceil_formula() {
        for base in [1u64, 3, 7, 999, 5_000, 123_457] {
            let schedule = FeeSchedule::new(FeeSetting::Fixed(base), &FeeHints::default(), 10);
            for k in 1..=6u32 {
                let expected = (base as f64 * 1.5f64.powi(k as i32 - 1)).ceil() as u64;
                assert_eq!(schedule.fee_for_attempt(k), FeeSetting::Fixed(expected), "base {} attempt {}", base, k);
            }
        }
    }

    #[test]
    fn test_fixed_schedule_strictly_increases() {
        let schedule = FeeSchedule::new(FeeSetting::Fixed(1), &FeeHints::default(), 10);
        let fees: Vec<u64> = (1..=5).filter_map(|k| schedule.fee_for_attempt(k).amount()).collect();
        assert!(fees.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_auto_schedule_uses_hint_then_escalates() {
        let schedule = FeeSchedule::new(FeeSetting::Auto, &FeeHints::with_estimate(20_000), 100_000);
        assert_eq!(schedule.fee_for_attempt(1), FeeSetting::Auto);
        assert_eq!(schedule.fee_for_attempt(2), FeeSetting::Fixed(20_000));
        assert_eq!(schedule.fee_for_attempt(3), FeeSetting::Fixed(30_000));
    }

    #[test]
    fn test_auto_schedule_falls_back_to_default() {
        let schedule = FeeSchedule::new(FeeSetting::Fixed(0), &FeeHints::default(), DEFAULT_PRIORITY_FEE_LAMPORTS);
        assert_eq!(schedule.fee_for_attempt(1), FeeSetting::Fixed(0));
        assert_eq!(schedule.fee_for_attempt(2), FeeSetting::Fixed(DEFAULT_PRIORITY_FEE_LAMPORTS));
    }

    #[test]
    fn test_fee_setting_parse() {
        assert_eq!("auto".parse::<FeeSetting>().unwrap(), FeeSetting::Auto);
        assert_eq!("AUTO".parse::<FeeSetting>().unwrap(), FeeSetting::Auto);
        assert_eq!("5000".parse::<FeeSetting>().unwrap(), FeeSetting::Fixed(5_000));
        assert!("fast".parse::<FeeSetting>().is_err());
    }
}
