//! Jupiter aggregator client (Solana).
//!
//! `GET /quote` prices a route, `POST /swap` returns an unsigned versioned
//! transaction for that route which is signed locally.

use crate::error::QuoteError;
use crate::execution::fees::FeeSetting;
use crate::quote::http::{read_json, RequestPacer};
use crate::quote::{QuoteProvider, SignedSwap, SwapBuilder};
use crate::types::{minimum_output, Quote, QuoteRequest, RouteHop};
use alloy_primitives::U256;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Jupiter error codes meaning the pair cannot be routed at all.
const NO_ROUTE_CODES: &[&str] = &[
    "COULD_NOT_FIND_ANY_ROUTE",
    "NO_ROUTES_FOUND",
    "TOKEN_NOT_TRADABLE",
    "ROUTE_PLAN_DOES_NOT_CONSUME_ALL_THE_AMOUNT",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
    last_valid_block_height: Option<u64>,
}

/// Jupiter v6 API client.
pub struct JupiterClient {
    http: Client,
    base_url: String,
    pacer: RequestPacer,
    signer: Option<Arc<Keypair>>,
}

impl JupiterClient {
    pub fn new(base_url: impl Into<String>, requests_per_second: u32) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pacer: RequestPacer::new(requests_per_second, 3),
            signer: None,
        }
    }

    /// Enables [`SwapBuilder`] by attaching the wallet that signs swaps.
    pub fn with_signer(mut self, signer: Arc<Keypair>) -> Self {
        self.signer = Some(signer);
        self
    }

    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<Value, QuoteError> {
        let url = format!("{}/quote", self.base_url);
        let amount = request.amount.to_string();
        let slippage = request.slippage_bps.to_string();
        let query = [
            ("inputMint", request.input_asset.as_str()),
            ("outputMint", request.output_asset.as_str()),
            ("amount", amount.as_str()),
            ("slippageBps", slippage.as_str()),
        ];

        let (http, url, query) = (&self.http, &url, &query);
        self.pacer
            .run(|| async move {
                let response = http.get(url).query(query).send().await?;
                read_json::<Value>(response).await.map_err(classify_error)
            })
            .await
    }
}

#[async_trait]
impl QuoteProvider for JupiterClient {
    fn name(&self) -> &'static str {
        "jupiter"
    }

    #[instrument(skip(self), fields(input = %request.input_asset, output = %request.output_asset, amount = %request.amount))]
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let raw = self.fetch_quote(request).await?;
        let quote = parse_quote(request, raw)?;
        debug!(
            "Jupiter quote: {} -> {} ({} hops, impact {:.4}%)",
            quote.input_amount,
            quote.output_amount,
            quote.route.len(),
            quote.price_impact_pct
        );
        Ok(quote)
    }
}

#[async_trait]
impl SwapBuilder for JupiterClient {
    #[instrument(skip(self, quote), fields(fee = %fee))]
    async fn build_signed_transaction(&self, quote: &Quote, fee: FeeSetting) -> Result<SignedSwap, QuoteError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| QuoteError::Signing("no signing keypair configured".to_string()))?;

        let url = format!("{}/swap", self.base_url);
        let body = swap_request_body(quote, &signer.pubkey().to_string(), fee);

        let (http, url, body) = (&self.http, &url, &body);
        let response: SwapResponse = self
            .pacer
            .run(|| async move {
                let response = http.post(url).json(body).send().await?;
                read_json::<SwapResponse>(response).await.map_err(classify_error)
            })
            .await?;

        let payload = sign_transaction(&response.swap_transaction, signer)?;
        debug!("Built swap transaction ({} bytes)", payload.len());

        Ok(SignedSwap {
            payload,
            last_valid_block_height: response.last_valid_block_height,
            fee,
        })
    }
}

/// Maps Jupiter's "no route" 400 responses to [`QuoteError::NoRoute`].
fn classify_error(error: QuoteError) -> QuoteError {
    match error {
        QuoteError::Status { status, body } if status == 400 || status == 404 => {
            let code = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("errorCode").and_then(Value::as_str).map(str::to_string));
            let no_route = match code.as_deref() {
                Some(code) => NO_ROUTE_CODES.contains(&code),
                None => NO_ROUTE_CODES.iter().any(|c| body.contains(c)),
            };
            if no_route {
                QuoteError::NoRoute(code.unwrap_or(body))
            } else {
                QuoteError::Status { status, body }
            }
        }
        other => other,
    }
}

/// Builds a [`Quote`] from a `/quote` response.
///
/// The minimum output is recomputed from our own slippage setting rather than
/// trusting `otherAmountThreshold`. `priceImpactPct` is a fraction and is
/// converted to percent.
pub fn parse_quote(request: &QuoteRequest, raw: Value) -> Result<Quote, QuoteError> {
    let input_amount = amount_field(&raw, "inAmount")?;
    let output_amount = amount_field(&raw, "outAmount")?;
    let price_impact_pct = match raw.get("priceImpactPct") {
        Some(Value::String(s)) => s.parse::<f64>().unwrap_or(0.0) * 100.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) * 100.0,
        _ => 0.0,
    };

    let route = raw
        .get("routePlan")
        .and_then(Value::as_array)
        .map(|plan| plan.iter().filter_map(parse_hop).collect())
        .unwrap_or_default();

    Ok(Quote {
        input_asset: request.input_asset.clone(),
        output_asset: request.output_asset.clone(),
        input_amount,
        output_amount,
        minimum_output_amount: minimum_output(output_amount, request.slippage_bps),
        slippage_bps: request.slippage_bps,
        price_impact_pct,
        route,
        declared_sell_tax_bps: None,
        raw,
        fetched_at: Instant::now(),
    })
}

fn parse_hop(step: &Value) -> Option<RouteHop> {
    let info = step.get("swapInfo")?;
    Some(RouteHop {
        venue: info
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        in_amount: amount_field(info, "inAmount").ok()?,
        out_amount: amount_field(info, "outAmount").ok()?,
        fee_amount: amount_field(info, "feeAmount").ok(),
    })
}

/// Body of a `/swap` request, with our own minimum output as the hard floor.
pub fn swap_request_body(quote: &Quote, user_public_key: &str, fee: FeeSetting) -> Value {
    let mut quote_response = quote.raw.clone();
    if let Some(object) = quote_response.as_object_mut() {
        object.insert(
            "otherAmountThreshold".to_string(),
            Value::String(quote.minimum_output_amount.to_string()),
        );
        object.insert("slippageBps".to_string(), json!(quote.slippage_bps));
    }

    let prioritization_fee = match fee {
        FeeSetting::Fixed(lamports) if lamports > 0 => json!(lamports),
        _ => json!("auto"),
    };

    json!({
        "quoteResponse": quote_response,
        "userPublicKey": user_public_key,
        "wrapAndUnwrapSol": true,
        "dynamicComputeUnitLimit": true,
        "prioritizationFeeLamports": prioritization_fee,
    })
}

/// Decodes the base64 transaction Jupiter returns and signs it.
fn sign_transaction(encoded: &str, signer: &Keypair) -> Result<Vec<u8>, QuoteError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| QuoteError::Decode(format!("swap transaction is not base64: {}", e)))?;
    let unsigned: VersionedTransaction = bincode::deserialize(&bytes)
        .map_err(|e| QuoteError::Decode(format!("swap transaction does not deserialize: {}", e)))?;
    let signed = VersionedTransaction::try_new(unsigned.message, &[signer])
        .map_err(|e| QuoteError::Signing(e.to_string()))?;
    bincode::serialize(&signed).map_err(|e| QuoteError::Signing(e.to_string()))
}

fn amount_field(value: &Value, field: &str) -> Result<U256, QuoteError> {
    let raw = value
        .get(field)
        .ok_or_else(|| QuoteError::Decode(format!("missing field '{}'", field)))?;
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(QuoteError::Decode(format!("field '{}' is not an amount", field))),
    };
    U256::from_str_radix(&text, 10).map_err(|e| QuoteError::Decode(format!("bad amount in '{}': {}", field, e)))
}
