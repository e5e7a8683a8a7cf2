//! Swap session behaviour against scripted venue and chain fakes.

use alloy_primitives::U256;
use async_trait::async_trait;
use safebuy::config::ExecutorConfig;
use safebuy::error::{ConnectionError, ErrorKind, OnChainFailure, QuoteError, SwapError};
use safebuy::execution::{AttemptOutcome, ChainConnection, Confirmation, FeeHints, FeeSetting, SwapExecutor, TradeRequest};
use safebuy::quote::{QuoteProvider, SignedSwap, SwapBuilder};
use safebuy::types::{Quote, QuoteRequest};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const INPUT: &str = "So11111111111111111111111111111111111111112";
const TOKEN: &str = "TokenMint1111111111111111111111111111111111";
const EXPECTED_OUT: u64 = 1_000_000;

fn quote(output: u64) -> Quote {
    Quote {
        input_asset: INPUT.to_string(),
        output_asset: TOKEN.to_string(),
        input_amount: U256::from(10_000_000u64),
        output_amount: U256::from(output),
        minimum_output_amount: U256::from(output),
        slippage_bps: 100,
        price_impact_pct: 0.1,
        route: vec![],
        declared_sell_tax_bps: None,
        raw: serde_json::Value::Null,
        fetched_at: Instant::now(),
    }
}

/// Venue whose quotes are scripted; an empty script prices at `EXPECTED_OUT`.
#[derive(Default)]
struct ScriptedVenue {
    quotes: Mutex<VecDeque<Result<u64, QuoteError>>>,
    quote_calls: AtomicUsize,
    build_errors: Mutex<VecDeque<QuoteError>>,
    built_with: Mutex<Vec<FeeSetting>>,
}

impl ScriptedVenue {
    fn quoting(outputs: impl IntoIterator<Item = Result<u64, QuoteError>>) -> Arc<Self> {
        Arc::new(Self {
            quotes: Mutex::new(outputs.into_iter().collect()),
            ..Self::default()
        })
    }

    fn failing_builds(errors: impl IntoIterator<Item = QuoteError>) -> Arc<Self> {
        Arc::new(Self {
            build_errors: Mutex::new(errors.into_iter().collect()),
            ..Self::default()
        })
    }

    fn built_with(&self) -> Vec<FeeSetting> {
        self.built_with.lock().unwrap().clone()
    }
}

fn unavailable() -> QuoteError {
    QuoteError::Status {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

#[async_trait]
impl QuoteProvider for ScriptedVenue {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn get_quote(&self, _request: &QuoteRequest) -> Result<Quote, QuoteError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.quotes.lock().unwrap().pop_front();
        next.unwrap_or(Ok(EXPECTED_OUT)).map(quote)
    }
}

#[async_trait]
impl SwapBuilder for ScriptedVenue {
    async fn build_signed_transaction(&self, _quote: &Quote, fee: FeeSetting) -> Result<SignedSwap, QuoteError> {
        self.built_with.lock().unwrap().push(fee);
        if let Some(error) = self.build_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(SignedSwap {
            payload: vec![1, 2, 3],
            last_valid_block_height: Some(1_000),
            fee,
        })
    }
}

enum Step {
    Confirm,
    Fail(OnChainFailure),
    Expire,
    Error(ConnectionError),
    Hang,
}

/// Chain whose confirmations follow a script; an empty script confirms.
#[derive(Default)]
struct ScriptedChain {
    submit_errors: Mutex<VecDeque<ConnectionError>>,
    steps: Mutex<VecDeque<Step>>,
    submits: AtomicUsize,
    landed_fees: Mutex<Vec<FeeSetting>>,
    logs: Vec<String>,
}

impl ScriptedChain {
    fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    fn landed_fees(&self) -> Vec<FeeSetting> {
        self.landed_fees.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainConnection for ScriptedChain {
    async fn submit(&self, swap: &SignedSwap) -> Result<String, ConnectionError> {
        let count = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.submit_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.landed_fees.lock().unwrap().push(swap.fee);
        Ok(format!("tx-{}", count))
    }

    async fn await_confirmation(
        &self,
        _transaction_id: &str,
        _last_valid_block_height: Option<u64>,
    ) -> Result<Confirmation, ConnectionError> {
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Confirm);
        match step {
            Step::Confirm => Ok(Confirmation::Confirmed),
            Step::Fail(failure) => Ok(Confirmation::Failed(failure)),
            Step::Expire => Ok(Confirmation::Expired),
            Step::Error(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn fetch_transaction_logs(&self, _transaction_id: &str) -> Option<Vec<String>> {
        Some(self.logs.clone())
    }
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        retry_backoff: Duration::from_millis(1),
        confirm_timeout: Duration::from_secs(5),
        ..ExecutorConfig::default()
    }
}

fn request() -> TradeRequest {
    TradeRequest::new(INPUT, TOKEN, U256::from(10_000_000u64), 100).with_fee(FeeSetting::Fixed(1_000))
}

fn executor(venue: &Arc<ScriptedVenue>, config: ExecutorConfig) -> SwapExecutor<Arc<ScriptedVenue>, Arc<ScriptedVenue>> {
    SwapExecutor::new(venue.clone(), venue.clone(), config)
}

#[tokio::test]
async fn test_confirms_on_first_attempt() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::default();

    let receipt = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.transaction_id, "tx-1");
    assert_eq!(receipt.attempts.len(), 1);
    assert_eq!(receipt.attempts[0].outcome, AttemptOutcome::Confirmed);
    assert_eq!(receipt.minimum_output, U256::from(990_000u64));
    assert_eq!(venue.quote_calls.load(Ordering::SeqCst), 1);
    assert!(receipt.confirmed_at <= chrono::Utc::now());
}

#[tokio::test]
async fn test_on_chain_failure_is_not_retried() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain {
        logs: (0..15).map(|i| format!("Program log: line {}", i)).collect(),
        ..ScriptedChain::with_steps([Step::Fail(OnChainFailure::new(
            Some(3),
            Some(6001),
            "InstructionError(3, Custom(6001))",
        ))])
    };

    let err = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(chain.submits(), 1);
    assert_eq!(err.kind(), ErrorKind::OnChain);
    assert_eq!(err.transaction_id(), Some("tx-1"));
    assert_eq!(err.raw_on_chain_error().and_then(|f| f.code), Some(6001));
    assert!(err.to_string().contains("SlippageToleranceExceeded"));
    assert_eq!(err.logs().len(), 10);
    assert_eq!(err.logs().last().map(String::as_str), Some("Program log: line 14"));
    assert_eq!(err.context().and_then(|c| c.minimum_output), Some(U256::from(990_000u64)));
}

#[tokio::test]
async fn test_timeout_then_success_escalates_fee() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::with_steps([Step::Error(ConnectionError::Timeout("rpc".into())), Step::Confirm]);

    let receipt = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.transaction_id, "tx-2");
    assert_eq!(receipt.attempts.len(), 2);
    assert_eq!(receipt.attempts[0].outcome, AttemptOutcome::TimedOut);
    assert_eq!(receipt.attempts[0].transaction_id.as_deref(), Some("tx-1"));
    assert_eq!(chain.landed_fees(), vec![FeeSetting::Fixed(1_000), FeeSetting::Fixed(1_500)]);
    assert_eq!(receipt.fee(), Some(FeeSetting::Fixed(1_500)));
}

#[tokio::test]
async fn test_hanging_confirmation_is_bounded() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::with_steps([Step::Hang, Step::Confirm]);
    let config = ExecutorConfig {
        confirm_timeout: Duration::from_millis(50),
        ..config()
    };

    let receipt = executor(&venue, config)
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.transaction_id, "tx-2");
    assert_eq!(receipt.attempts[0].outcome, AttemptOutcome::TimedOut);
    assert_eq!(chain.submits(), 2);
}

#[tokio::test]
async fn test_expired_blockhash_rebuilds_with_network_fee() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::with_steps([Step::Expire, Step::Confirm]);
    let request = request().with_fee(FeeSetting::Auto);

    let receipt = executor(&venue, config())
        .execute(&request, &chain, &FeeHints::with_estimate(5_000), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.transaction_id, "tx-2");
    assert_eq!(venue.built_with(), vec![FeeSetting::Auto, FeeSetting::Fixed(5_000)]);
}

#[tokio::test]
async fn test_retries_exhausted_after_attempt_cap() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::with_steps([
        Step::Error(ConnectionError::Timeout("rpc".into())),
        Step::Expire,
        Step::Error(ConnectionError::Transient("503".into())),
    ]);

    let err = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        SwapError::RetriesExhausted {
            attempts,
            transaction_id,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(transaction_id.as_deref(), Some("tx-3"));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(
        chain.landed_fees(),
        vec![FeeSetting::Fixed(1_000), FeeSetting::Fixed(1_500), FeeSetting::Fixed(2_250)]
    );
}

#[tokio::test]
async fn test_rejected_submission_is_terminal() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain {
        submit_errors: Mutex::new(VecDeque::from([ConnectionError::Rejected {
            message: "Transaction simulation failed: custom program error: 0x1771".into(),
            failure: Some(OnChainFailure::new(Some(2), Some(6001), "custom program error: 0x1771")),
        }])),
        ..ScriptedChain::default()
    };

    let err = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SwapError::Rejected { .. }));
    assert_eq!(err.kind(), ErrorKind::OnChain);
    assert_eq!(chain.submits(), 1);
}

#[tokio::test]
async fn test_transient_submit_failure_is_retried() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain {
        submit_errors: Mutex::new(VecDeque::from([ConnectionError::Transient("connection reset".into())])),
        ..ScriptedChain::default()
    };

    let receipt = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.transaction_id, "tx-2");
    assert_eq!(receipt.attempts[0].outcome, AttemptOutcome::NetworkError);
    assert_eq!(receipt.attempts[0].transaction_id, None);
}

#[tokio::test]
async fn test_stale_quote_with_adverse_move_aborts_before_submitting() {
    let venue = ScriptedVenue::quoting([Ok(800_000)]);
    let chain = ScriptedChain::default();
    let config = ExecutorConfig {
        max_quote_age: Duration::ZERO,
        ..config()
    };
    let request = request().with_quote(quote(EXPECTED_OUT));
    tokio::time::sleep(Duration::from_millis(2)).await;

    let err = executor(&venue, config)
        .execute(&request, &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SwapError::PriceMoved { deviation_bps: 2_000, .. }));
    assert_eq!(chain.submits(), 0);
    assert!(venue.built_with().is_empty());
}

#[tokio::test]
async fn test_allowed_price_move_trades_at_refreshed_floor() {
    let venue = ScriptedVenue::quoting([Ok(800_000)]);
    let chain = ScriptedChain::default();
    let config = ExecutorConfig {
        max_quote_age: Duration::ZERO,
        ..config()
    };
    let request = request().with_quote(quote(EXPECTED_OUT)).allowing_price_move(true);
    tokio::time::sleep(Duration::from_millis(2)).await;

    let receipt = executor(&venue, config)
        .execute(&request, &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.quote.output_amount, U256::from(800_000u64));
    assert_eq!(receipt.minimum_output, U256::from(792_000u64));
}

#[tokio::test]
async fn test_fresh_quote_is_reused() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::default();
    let request = request().with_quote(quote(EXPECTED_OUT));

    executor(&venue, config())
        .execute(&request, &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(venue.quote_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_route_is_a_venue_error() {
    let venue = ScriptedVenue::quoting([Err(QuoteError::NoRoute("COULD_NOT_FIND_ANY_ROUTE".into()))]);
    let chain = ScriptedChain::default();

    let err = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Venue);
    assert_eq!(chain.submits(), 0);
}

#[tokio::test]
async fn test_invalid_request_is_rejected_up_front() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::default();
    let request = TradeRequest::new(INPUT, TOKEN, U256::ZERO, 100);

    let err = executor(&venue, config())
        .execute(&request, &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(venue.quote_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancellation_during_confirmation() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::with_steps([Step::Hang]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.transaction_id(), Some("tx-1"));
    assert_eq!(chain.submits(), 1);
}

#[tokio::test]
async fn test_rejection_while_confirming_keeps_transaction_id() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain::with_steps([Step::Error(ConnectionError::from_rpc_message(
        "RPC response error -32602: invalid type: map, expected a string",
    ))]);

    let err = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SwapError::Rejected { .. }));
    assert_eq!(err.transaction_id(), Some("tx-1"));
    assert_eq!(chain.submits(), 1);
}

#[tokio::test]
async fn test_rejection_at_submit_has_no_transaction_id() {
    let venue = Arc::new(ScriptedVenue::default());
    let chain = ScriptedChain {
        submit_errors: Mutex::new(VecDeque::from([ConnectionError::Rejected {
            message: "insufficient funds for fee".into(),
            failure: None,
        }])),
        ..ScriptedChain::default()
    };

    let err = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.transaction_id(), None);
}

#[tokio::test]
async fn test_transient_refresh_failure_retries_with_higher_fee() {
    let venue = ScriptedVenue::quoting([Err(unavailable()), Ok(EXPECTED_OUT)]);
    let chain = ScriptedChain::default();
    let config = ExecutorConfig {
        max_quote_age: Duration::ZERO,
        ..config()
    };
    let request = request().with_quote(quote(EXPECTED_OUT));
    tokio::time::sleep(Duration::from_millis(2)).await;

    let receipt = executor(&venue, config)
        .execute(&request, &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.attempts.len(), 2);
    assert_eq!(receipt.attempts[0].outcome, AttemptOutcome::NetworkError);
    assert_eq!(receipt.attempts[0].transaction_id, None);
    assert_eq!(venue.built_with(), vec![FeeSetting::Fixed(1_500)]);
    assert_eq!(receipt.transaction_id, "tx-1");
}

#[tokio::test]
async fn test_transient_build_failure_retries_with_higher_fee() {
    let venue = ScriptedVenue::failing_builds([unavailable()]);
    let chain = ScriptedChain::default();

    let receipt = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.attempts[0].outcome, AttemptOutcome::NetworkError);
    assert_eq!(venue.built_with(), vec![FeeSetting::Fixed(1_000), FeeSetting::Fixed(1_500)]);
    assert_eq!(chain.landed_fees(), vec![FeeSetting::Fixed(1_500)]);
    assert_eq!(receipt.transaction_id, "tx-1");
}

#[tokio::test]
async fn test_signing_failure_is_terminal() {
    let venue = ScriptedVenue::failing_builds([QuoteError::Signing("signer does not match fee payer".into())]);
    let chain = ScriptedChain::default();

    let err = executor(&venue, config())
        .execute(&request(), &chain, &FeeHints::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Venue);
    assert_eq!(venue.built_with().len(), 1);
    assert_eq!(chain.submits(), 0);
}
