//! 0x Swap API client (BNB Smart Chain pricing).

use crate::error::QuoteError;
use crate::quote::http::{read_json, RequestPacer};
use crate::quote::QuoteProvider;
use crate::types::{minimum_output, Quote, QuoteRequest, RouteHop, BPS_DENOMINATOR};
use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

pub const BSC_CHAIN_ID: u64 = 56;

/// Price-only client for the 0x permit2 endpoint.
pub struct ZeroExClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    chain_id: u64,
    pacer: RequestPacer,
}

impl ZeroExClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, requests_per_second: u32) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            chain_id: BSC_CHAIN_ID,
            pacer: RequestPacer::new(requests_per_second, 3),
        }
    }
}

#[async_trait]
impl QuoteProvider for ZeroExClient {
    fn name(&self) -> &'static str {
        "0x"
    }

    #[instrument(skip(self), fields(input = %request.input_asset, output = %request.output_asset, amount = %request.amount))]
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let url = format!("{}/swap/permit2/price", self.base_url);
        let query = [
            ("chainId", self.chain_id.to_string()),
            ("sellToken", request.input_asset.clone()),
            ("buyToken", request.output_asset.clone()),
            ("sellAmount", request.amount.to_string()),
            ("slippageBps", request.slippage_bps.to_string()),
        ];

        let (http, url, query, api_key) = (&self.http, &url, &query, self.api_key.as_deref());
        let raw: Value = self
            .pacer
            .run(|| async move {
                let mut builder = http.get(url).query(query).header("0x-version", "v2");
                if let Some(key) = api_key {
                    builder = builder.header("0x-api-key", key);
                }
                read_json::<Value>(builder.send().await?).await
            })
            .await?;

        let quote = parse_price(request, raw)?;
        debug!(
            "0x price: {} -> {} (sell tax {:?} bps)",
            quote.input_amount, quote.output_amount, quote.declared_sell_tax_bps
        );
        Ok(quote)
    }
}

/// Builds a [`Quote`] from a `/swap/permit2/price` response.
pub fn parse_price(request: &QuoteRequest, raw: Value) -> Result<Quote, QuoteError> {
    if raw.get("liquidityAvailable").and_then(Value::as_bool) == Some(false) {
        return Err(QuoteError::NoRoute("liquidityAvailable=false".to_string()));
    }

    let input_amount = amount(&raw, "sellAmount").unwrap_or(request.amount);
    let output_amount = amount(&raw, "buyAmount")
        .ok_or_else(|| QuoteError::Decode("missing field 'buyAmount'".to_string()))?;

    let price_impact_pct = match raw.get("estimatedPriceImpact") {
        Some(Value::String(s)) => s.parse::<f64>().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    };

    let route = raw
        .pointer("/route/fills")
        .and_then(Value::as_array)
        .map(|fills| {
            fills
                .iter()
                .map(|fill| fill_hop(fill, input_amount, output_amount))
                .collect()
        })
        .unwrap_or_default();

    let declared_sell_tax_bps = raw
        .pointer("/tokenMetadata/buyToken/sellTaxBps")
        .and_then(|v| match v {
            Value::String(s) => s.parse::<u32>().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        });

    Ok(Quote {
        input_asset: request.input_asset.clone(),
        output_asset: request.output_asset.clone(),
        input_amount,
        output_amount,
        minimum_output_amount: minimum_output(output_amount, request.slippage_bps),
        slippage_bps: request.slippage_bps,
        price_impact_pct,
        route,
        declared_sell_tax_bps,
        raw,
        fetched_at: Instant::now(),
    })
}

/// 0x reports each fill as a share of the whole trade.
fn fill_hop(fill: &Value, total_in: U256, total_out: U256) -> RouteHop {
    let share = fill
        .get("proportionBps")
        .and_then(|v| match v {
            Value::String(s) => s.parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        })
        .unwrap_or(BPS_DENOMINATOR)
        .min(BPS_DENOMINATOR);
    let portion = |total: U256| total * U256::from(share) / U256::from(BPS_DENOMINATOR);

    RouteHop {
        venue: fill
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        in_amount: portion(total_in),
        out_amount: portion(total_out),
        fee_amount: None,
    }
}

fn amount(value: &Value, field: &str) -> Option<U256> {
    match value.get(field)? {
        Value::String(s) => U256::from_str_radix(s, 10).ok(),
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WBNB_ADDRESS;
    use serde_json::json;

    const TOKEN: &str = "0x00000000000000000000000000000000000000aa";

    fn request() -> QuoteRequest {
        QuoteRequest::new(WBNB_ADDRESS, TOKEN, U256::from(10u64).pow(U256::from(17u64)), 100)
    }

    #[test]
    fn test_parse_price_with_tax() {
        let raw = json!({
            "liquidityAvailable": true,
            "sellAmount": "100000000000000000",
            "buyAmount": "5000000000000000000000",
            "route": {
                "fills": [
                    { "from": WBNB_ADDRESS, "to": TOKEN, "source": "PancakeSwap_V2", "proportionBps": "7000" },
                    { "from": WBNB_ADDRESS, "to": TOKEN, "source": "PancakeSwap_V3", "proportionBps": "3000" }
                ]
            },
            "tokenMetadata": {
                "buyToken": { "buyTaxBps": "0", "sellTaxBps": "1200" },
                "sellToken": { "buyTaxBps": "0", "sellTaxBps": "0" }
            }
        });
        let quote = parse_price(&request(), raw).unwrap();
        assert_eq!(quote.declared_sell_tax_bps, Some(1_200));
        assert_eq!(quote.route.len(), 2);
        assert_eq!(quote.route[0].venue, "PancakeSwap_V2");
        assert_eq!(
            quote.route[0].out_amount + quote.route[1].out_amount,
            quote.output_amount
        );
        assert_eq!(
            quote.minimum_output_amount,
            U256::from_str_radix("4950000000000000000000", 10).unwrap()
        );
    }

    #[test]
    fn test_no_liquidity_is_no_route() {
        let result = parse_price(&request(), json!({ "liquidityAvailable": false }));
        assert!(matches!(result, Err(QuoteError::NoRoute(_))));
    }

    #[test]
    fn test_missing_buy_amount() {
        let result = parse_price(&request(), json!({ "liquidityAvailable": true }));
        assert!(matches!(result, Err(QuoteError::Decode(_))));
    }
}
