//! Individual risk checks.
//!
//! Each check is a pure function of already-fetched data and returns a
//! [`CheckReport`]; none of them can fail. Network access (the sell-side quote
//! of the round-trip simulation) happens in the engine, which hands the
//! outcome to [`round_trip`].

use crate::config::RiskPolicy;
use crate::error::QuoteError;
use crate::risk::types::{Category, CheckReport, RiskFinding};
use crate::types::{Quote, TokenExtension, TokenRiskSurface, BPS_DENOMINATOR};
use alloy_primitives::U256;
use serde_json::json;

/// Round-trip loss in basis points, floored. Gains read as zero loss.
pub fn round_trip_loss_bps(spent: U256, returned: U256) -> u64 {
    if spent.is_zero() || returned >= spent {
        return 0;
    }
    let loss = (spent - returned) * U256::from(BPS_DENOMINATOR) / spent;
    u64::try_from(loss).unwrap_or(BPS_DENOMINATOR)
}

/// Exact test of `loss / spent > threshold_bps / 10000` without rounding.
pub fn loss_exceeds(spent: U256, returned: U256, threshold_bps: u64) -> bool {
    if spent.is_zero() || returned >= spent {
        return false;
    }
    let loss = spent - returned;
    loss * U256::from(BPS_DENOMINATOR) > U256::from(threshold_bps) * spent
}

/// Classifies a round-trip as a step function of the loss.
pub fn classify_round_trip(spent: U256, returned: U256, policy: &RiskPolicy) -> Option<RiskFinding> {
    let loss_bps = round_trip_loss_bps(spent, returned);
    let loss_pct = format_bps(loss_bps);

    if loss_exceeds(spent, returned, policy.honeypot_critical_loss_bps) {
        Some(RiskFinding::critical(
            Category::Honeypot,
            format!("Extreme round-trip loss of {}% (likely honeypot)", loss_pct),
        ))
    } else if loss_exceeds(spent, returned, policy.honeypot_high_loss_bps) {
        Some(RiskFinding::high(
            Category::Honeypot,
            format!("High round-trip loss of {}% (possible hidden sell tax)", loss_pct),
        ))
    } else {
        None
    }
}

/// Honeypot check from a buy quote and the outcome of quoting its reverse.
pub fn round_trip(buy: &Quote, sell: Result<&Quote, &QuoteError>, policy: &RiskPolicy) -> CheckReport {
    let spent = buy.input_amount;

    match sell {
        Err(QuoteError::NoRoute(reason)) => CheckReport::new(
            Category::Honeypot,
            "round_trip",
            json!({ "spent": spent.to_string(), "sell_route": null, "reason": reason }),
        )
        .with_finding(RiskFinding::critical(
            Category::Honeypot,
            "HONEYPOT: no sell route available for this token",
        )),
        Err(other) => CheckReport::new(
            Category::Honeypot,
            "round_trip",
            json!({ "spent": spent.to_string(), "error": other.to_string() }),
        )
        .with_finding(RiskFinding::info(
            Category::Honeypot,
            format!("Round-trip simulation unavailable: {}", other),
        )),
        Ok(sell) if sell.output_amount.is_zero() => CheckReport::new(
            Category::Honeypot,
            "round_trip",
            json!({ "spent": spent.to_string(), "returned": "0" }),
        )
        .with_finding(RiskFinding::critical(
            Category::Honeypot,
            "HONEYPOT: selling the purchased tokens returns nothing",
        )),
        Ok(sell) => {
            let returned = sell.output_amount;
            let report = CheckReport::new(
                Category::Honeypot,
                "round_trip",
                json!({
                    "spent": spent.to_string(),
                    "tokens": buy.output_amount.to_string(),
                    "returned": returned.to_string(),
                    "loss_bps": round_trip_loss_bps(spent, returned),
                }),
            );
            match classify_round_trip(spent, returned, policy) {
                Some(finding) => report.with_finding(finding),
                None => report,
            }
        }
    }
}

/// Sell tax the venue declares in its token metadata.
pub fn declared_sell_tax(buy: &Quote, policy: &RiskPolicy) -> CheckReport {
    let report = CheckReport::new(
        Category::Honeypot,
        "declared_sell_tax",
        json!({ "sell_tax_bps": buy.declared_sell_tax_bps }),
    );
    match buy.declared_sell_tax_bps {
        Some(bps) if bps >= policy.high_sell_tax_bps => report.with_finding(RiskFinding::high(
            Category::Honeypot,
            format!("Declared sell tax of {}%", format_bps(bps as u64)),
        )),
        Some(bps) if bps > 0 => report.with_finding(RiskFinding::medium(
            Category::Honeypot,
            format!("Declared sell tax of {}%", format_bps(bps as u64)),
        )),
        _ => report,
    }
}

/// Buy-side price impact as reported by the venue.
pub fn price_impact(buy: &Quote, policy: &RiskPolicy) -> CheckReport {
    let report = CheckReport::new(
        Category::Liquidity,
        "price_impact",
        json!({ "price_impact_pct": buy.price_impact_pct, "hops": buy.route.len() }),
    );
    if buy.price_impact_pct > policy.max_price_impact_pct {
        report.with_finding(RiskFinding::medium(
            Category::Liquidity,
            format!(
                "Price impact of {:.2}% exceeds {:.2}% (thin liquidity)",
                buy.price_impact_pct, policy.max_price_impact_pct
            ),
        ))
    } else {
        report
    }
}

/// EIP-1967 upgradeable proxy.
pub fn proxy(token: &impl TokenRiskSurface) -> CheckReport {
    let implementation = token.proxy_implementation();
    let report = CheckReport::new(
        Category::Authority,
        "proxy",
        json!({ "implementation": implementation }),
    );
    match implementation {
        Some(implementation) => report.with_finding(RiskFinding::high(
            Category::Authority,
            format!(
                "Contract is an upgradeable proxy (implementation {}); the owner can change its logic",
                implementation
            ),
        )),
        None => report,
    }
}

/// Mint / freeze authority on account-model chains, owner on contract-model chains.
pub fn authority(token: &impl TokenRiskSurface) -> CheckReport {
    let mut report = CheckReport::new(
        Category::Authority,
        "authority",
        json!({
            "mint_authority": token.has_mint_risk(),
            "freeze_authority": token.has_freeze_risk(),
            "owner": token.has_owner_risk(),
            "owner_unknown": token.ownership_unknown(),
        }),
    );
    if token.has_freeze_risk() {
        report = report.with_finding(RiskFinding::high(
            Category::Authority,
            "Freeze authority is active: holders' token accounts can be frozen",
        ));
    }
    if token.has_mint_risk() {
        report = report.with_finding(RiskFinding::medium(
            Category::Authority,
            "Mint authority is active: supply can be inflated",
        ));
    }
    if token.has_owner_risk() {
        report = report.with_finding(RiskFinding::medium(
            Category::Authority,
            "Ownership not renounced",
        ));
    } else if token.ownership_unknown() {
        report = report.with_finding(RiskFinding::info(
            Category::Authority,
            "Ownership could not be determined: owner() lookup failed",
        ));
    }
    report
}

/// Token-2022 extensions that tax, block or redirect transfers.
pub fn extensions(token: &impl TokenRiskSurface, policy: &RiskPolicy) -> CheckReport {
    let list = token.extensions();
    let findings = list.iter().filter_map(|extension| extension_finding(extension, policy));
    CheckReport::new(
        Category::Extension,
        "extensions",
        serde_json::to_value(list).unwrap_or_default(),
    )
    .with_findings(findings.collect::<Vec<_>>())
}

fn extension_finding(extension: &TokenExtension, policy: &RiskPolicy) -> Option<RiskFinding> {
    match extension {
        TokenExtension::TransferFee { basis_points, maximum_fee } if *basis_points >= policy.extreme_transfer_fee_bps => {
            Some(RiskFinding::critical(
                Category::Extension,
                format!(
                    "EXTREME transfer fee of {}% (max {} base units per transfer)",
                    format_bps(*basis_points as u64),
                    maximum_fee
                ),
            ))
        }
        TokenExtension::TransferFee { basis_points, maximum_fee } if *basis_points > 0 => Some(RiskFinding::medium(
            Category::Extension,
            format!(
                "Transfer fee of {}% (max {} base units per transfer)",
                format_bps(*basis_points as u64),
                maximum_fee
            ),
        )),
        TokenExtension::PermanentDelegate { delegate: Some(delegate) } => Some(RiskFinding::critical(
            Category::Extension,
            format!("Permanent delegate {} can move or burn any holder's tokens", delegate),
        )),
        TokenExtension::NonTransferable => Some(RiskFinding::critical(
            Category::Extension,
            "Token is non-transferable and cannot be sold",
        )),
        TokenExtension::TransferHook { program_id: Some(program_id) } => Some(RiskFinding::high(
            Category::Extension,
            format!("Transfer hook program {} runs on every transfer and can block sells", program_id),
        )),
        _ => None,
    }
}

/// Zero total supply.
pub fn supply(token: &impl TokenRiskSurface) -> CheckReport {
    let total = token.total_supply();
    let report = CheckReport::new(
        Category::Liquidity,
        "supply",
        json!({ "total_supply": total.to_string(), "decimals": token.decimals() }),
    );
    if total.is_zero() {
        report.with_finding(RiskFinding::medium(Category::Liquidity, "Total supply is zero"))
    } else {
        report
    }
}

/// Renders basis points as a percentage with two decimals.
fn format_bps(bps: u64) -> String {
    format!("{}.{:02}", bps / 100, bps % 100)
}
