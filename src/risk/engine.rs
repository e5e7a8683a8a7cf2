//! Risk engine: runs the check battery over a token and aggregates the result.

use crate::config::RiskPolicy;
use crate::quote::QuoteProvider;
use crate::risk::checks;
use crate::risk::types::{Category, CheckReport, RiskAssessment, RiskFinding};
use crate::types::{Quote, QuoteRequest, TokenMetadata, TokenRiskSurface, Venue};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

/// Anti-scam heuristic engine.
///
/// Every check is best-effort: a failing sub-check becomes a finding and the
/// remaining checks still run, so [`RiskEngine::assess`] always returns an
/// assessment.
pub struct RiskEngine<Q> {
    quotes: Q,
    policy: RiskPolicy,
}

impl<Q: QuoteProvider> RiskEngine<Q> {
    pub fn new(quotes: Q, policy: RiskPolicy) -> Self {
        Self { quotes, policy }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Assesses a token, optionally with the buy quote for the intended trade.
    #[instrument(skip(self, metadata, buy_quote), fields(token = %metadata.address(), venue = %venue))]
    pub async fn assess(&self, metadata: &TokenMetadata, buy_quote: Option<&Quote>, venue: Venue) -> RiskAssessment {
        let mut reports = Vec::with_capacity(8);

        match buy_quote {
            Some(buy) => {
                reports.push(self.simulate_round_trip(buy).await);
                reports.push(checks::declared_sell_tax(buy, &self.policy));
                reports.push(checks::price_impact(buy, &self.policy));
            }
            None => reports.push(
                CheckReport::new(Category::Honeypot, "round_trip", json!({ "buy_quote": null })).with_finding(
                    RiskFinding::info(Category::Honeypot, "Round-trip simulation skipped: no buy quote"),
                ),
            ),
        }

        reports.push(checks::proxy(metadata));
        reports.push(checks::authority(metadata));
        reports.push(checks::extensions(metadata, &self.policy));
        reports.push(checks::supply(metadata));

        let assessment = RiskAssessment::from_reports(reports);
        info!(
            "Risk assessment for {}: {} ({} findings)",
            metadata.address(),
            assessment.level,
            assessment.findings.len()
        );
        assessment
    }

    /// Quotes selling the tokens the buy would yield back into the input asset.
    async fn simulate_round_trip(&self, buy: &Quote) -> CheckReport {
        let request = QuoteRequest::reverse_of(buy);
        let sell = self.quotes.get_quote(&request).await;
        match &sell {
            Ok(quote) => debug!(
                "Round trip on {}: spent {} got back {}",
                self.quotes.name(),
                buy.input_amount,
                quote.output_amount
            ),
            Err(e) => warn!("Sell quote failed on {}: {}", self.quotes.name(), e),
        }
        checks::round_trip(buy, sell.as_ref(), &self.policy)
    }
}

/// One-shot assessment with the default policy.
pub async fn assess_risk<Q: QuoteProvider>(
    quotes: Q,
    metadata: &TokenMetadata,
    buy_quote: Option<&Quote>,
    venue: Venue,
) -> RiskAssessment {
    RiskEngine::new(quotes, RiskPolicy::default())
        .assess(metadata, buy_quote, venue)
        .await
}
