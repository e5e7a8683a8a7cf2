//! Swap execution state machine.
//!
//! Each attempt runs `refresh quote (if stale) -> build -> sign -> submit ->
//! await confirmation` and ends confirmed, failed on-chain, timed out or with
//! a network error. Timeouts, expired blockhashes and transient transport
//! failures are retried with an escalating priority fee and a freshly built
//! transaction; on-chain failures end the session immediately.

use crate::config::ExecutorConfig;
use crate::error::{ConnectionError, QuoteError, SwapError, TradeContext};
use crate::execution::connection::{ChainConnection, Confirmation};
use crate::execution::diagnostics::{describe_failure, tail_logs};
use crate::execution::fees::{FeeHints, FeeSchedule, FeeSetting};
use crate::execution::freshness::check_price_move;
use crate::quote::{QuoteProvider, SignedSwap, SwapBuilder};
use crate::types::{minimum_output, Address, Quote, QuoteRequest, BPS_DENOMINATOR};
use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What the caller wants bought.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub input_asset: Address,
    pub output_asset: Address,
    /// Amount of the input asset, in base units
    pub amount: U256,
    pub slippage_bps: u16,
    pub fee: FeeSetting,
    /// Trade even if a refreshed quote moved beyond the abort threshold
    pub allow_price_move: bool,
    /// Quote obtained earlier (e.g. during risk assessment), reused if fresh
    pub quote: Option<Quote>,
}

impl TradeRequest {
    pub fn new(input_asset: impl Into<Address>, output_asset: impl Into<Address>, amount: U256, slippage_bps: u16) -> Self {
        Self {
            input_asset: input_asset.into(),
            output_asset: output_asset.into(),
            amount,
            slippage_bps,
            fee: FeeSetting::Auto,
            allow_price_move: false,
            quote: None,
        }
    }

    pub fn with_fee(mut self, fee: FeeSetting) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_quote(mut self, quote: Quote) -> Self {
        self.quote = Some(quote);
        self
    }

    pub fn allowing_price_move(mut self, allow: bool) -> Self {
        self.allow_price_move = allow;
        self
    }

    pub fn validate(&self) -> Result<(), SwapError> {
        if self.input_asset.trim().is_empty() || self.output_asset.trim().is_empty() {
            return Err(SwapError::Validation("input and output assets are required".to_string()));
        }
        if self.input_asset == self.output_asset {
            return Err(SwapError::Validation("input and output assets are the same".to_string()));
        }
        if self.amount.is_zero() {
            return Err(SwapError::Validation("amount must be greater than zero".to_string()));
        }
        if self.slippage_bps as u64 >= BPS_DENOMINATOR {
            return Err(SwapError::Validation(format!(
                "slippage of {} bps leaves no minimum output",
                self.slippage_bps
            )));
        }
        if let Some(quote) = &self.quote {
            if quote.input_asset != self.input_asset || quote.output_asset != self.output_asset {
                return Err(SwapError::Validation(
                    "supplied quote does not match the requested pair".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn quote_request(&self) -> QuoteRequest {
        QuoteRequest::new(
            self.input_asset.clone(),
            self.output_asset.clone(),
            self.amount,
            self.slippage_bps,
        )
    }

    fn context(&self) -> TradeContext {
        TradeContext {
            token: self.output_asset.clone(),
            input_asset: self.input_asset.clone(),
            amount: self.amount,
            slippage_bps: self.slippage_bps,
            expected_output: None,
            minimum_output: None,
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Confirmed,
    FailedOnChain,
    TimedOut,
    NetworkError,
}

/// One execution try of a swap session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapAttempt {
    /// 1-based
    pub attempt_index: u32,
    pub fee: FeeSetting,
    pub transaction_id: Option<String>,
    pub outcome: AttemptOutcome,
}

/// Successful swap session.
#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub transaction_id: String,
    pub attempts: Vec<SwapAttempt>,
    /// Quote the confirmed transaction was built from
    pub quote: Quote,
    pub minimum_output: U256,
    pub confirmed_at: DateTime<Utc>,
}

impl SwapReceipt {
    pub fn fee(&self) -> Option<FeeSetting> {
        self.attempts.last().map(|a| a.fee)
    }
}

/// Why an attempt ended without a terminal result.
enum Retry {
    TimedOut(String),
    Network(String),
}

/// Drives swap sessions against a venue.
pub struct SwapExecutor<Q, B> {
    quotes: Q,
    builder: B,
    config: ExecutorConfig,
}

impl<Q: QuoteProvider, B: SwapBuilder> SwapExecutor<Q, B> {
    pub fn new(quotes: Q, builder: B, config: ExecutorConfig) -> Self {
        Self { quotes, builder, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs a swap session and returns the confirmed transaction.
    #[instrument(skip_all, fields(token = %request.output_asset, amount = %request.amount))]
    pub async fn execute<C>(
        &self,
        request: &TradeRequest,
        connection: &C,
        hints: &FeeHints,
        cancel: &CancellationToken,
    ) -> Result<SwapReceipt, SwapError>
    where
        C: ChainConnection + ?Sized,
    {
        request.validate()?;

        let mut context = request.context();
        let schedule = FeeSchedule::new(request.fee, hints, self.config.default_priority_fee);
        let total_attempts = self.config.total_attempts();

        let mut accepted = match &request.quote {
            Some(quote) => quote.clone(),
            None => self.fetch_quote(request, &context, cancel, None).await?,
        };

        let mut attempts: Vec<SwapAttempt> = Vec::with_capacity(total_attempts as usize);
        let mut last_error = String::from("no attempt made");
        let mut last_transaction: Option<String> = None;

        for attempt in 1..=total_attempts {
            if cancel.is_cancelled() {
                return Err(SwapError::Cancelled {
                    transaction_id: last_transaction,
                });
            }
            if attempt > 1 {
                self.backoff(cancel, last_transaction.as_deref()).await?;
            }

            let fee = schedule.fee_for_attempt(attempt);
            attempts.push(SwapAttempt {
                attempt_index: attempt,
                fee,
                transaction_id: None,
                outcome: AttemptOutcome::Pending,
            });
            info!("Swap attempt {}/{} with priority fee {}", attempt, total_attempts, fee);

            // Freshness gate: re-quote against the last accepted quote.
            if accepted.is_stale(self.config.max_quote_age) {
                debug!("Quote is {:?} old, refreshing", accepted.age());
                match self
                    .fetch_quote(request, &context, cancel, last_transaction.as_deref())
                    .await
                {
                    Ok(refreshed) => {
                        check_price_move(&accepted, &refreshed, &self.config, request.allow_price_move)?;
                        accepted = refreshed;
                    }
                    Err(SwapError::Venue { source, .. }) if source.is_transient() => {
                        last_error = source.to_string();
                        record(&mut attempts, None, AttemptOutcome::NetworkError);
                        warn!("Quote refresh failed, will retry: {}", last_error);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            let quote = self.with_floor(&accepted, request.slippage_bps);
            context.expected_output = Some(quote.output_amount);
            context.minimum_output = Some(quote.minimum_output_amount);

            let signed = match cancellable(cancel, None, self.builder.build_signed_transaction(&quote, fee)).await? {
                Ok(signed) => signed,
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    record(&mut attempts, None, AttemptOutcome::NetworkError);
                    warn!("Building the transaction failed, will retry: {}", e);
                    continue;
                }
                Err(e) => return Err(venue_error(e, &context)),
            };

            match self.submit_and_confirm(connection, &signed, &mut attempts, &context, cancel).await? {
                Ok(transaction_id) => {
                    info!("Swap confirmed: {} (attempt {})", transaction_id, attempt);
                    return Ok(SwapReceipt {
                        transaction_id,
                        attempts,
                        minimum_output: quote.minimum_output_amount,
                        quote,
                        confirmed_at: Utc::now(),
                    });
                }
                Err(retry) => {
                    if let Some(id) = attempts.last().and_then(|a| a.transaction_id.clone()) {
                        last_transaction = Some(id);
                    }
                    last_error = match retry {
                        Retry::TimedOut(message) | Retry::Network(message) => message,
                    };
                    warn!("Attempt {} did not confirm: {}", attempt, last_error);
                }
            }
        }

        error!("Swap failed after {} attempts: {}", total_attempts, last_error);
        Err(SwapError::RetriesExhausted {
            attempts: total_attempts,
            last_error,
            transaction_id: last_transaction,
            context: Box::new(context),
        })
    }

    /// Submits one signed transaction and waits for its outcome.
    ///
    /// The outer `Result` carries terminal errors; the inner one tells the
    /// session whether to retry.
    async fn submit_and_confirm<C>(
        &self,
        connection: &C,
        signed: &SignedSwap,
        attempts: &mut Vec<SwapAttempt>,
        context: &TradeContext,
        cancel: &CancellationToken,
    ) -> Result<Result<String, Retry>, SwapError>
    where
        C: ChainConnection + ?Sized,
    {
        let transaction_id = match cancellable(cancel, None, connection.submit(signed)).await? {
            Ok(id) => id,
            Err(ConnectionError::Rejected { message, failure }) => {
                return Err(SwapError::Rejected {
                    message,
                    failure,
                    transaction_id: None,
                    context: Box::new(context.clone()),
                });
            }
            Err(e) => {
                record(attempts, None, AttemptOutcome::NetworkError);
                return Ok(Err(Retry::Network(e.to_string())));
            }
        };
        debug!("Awaiting confirmation of {}", transaction_id);

        let wait = tokio::time::timeout(
            self.config.confirm_timeout,
            connection.await_confirmation(&transaction_id, signed.last_valid_block_height),
        );
        let confirmation = match cancellable(cancel, Some(&transaction_id), wait).await? {
            Ok(result) => result,
            Err(_) => {
                record(attempts, Some(&transaction_id), AttemptOutcome::TimedOut);
                return Ok(Err(Retry::TimedOut(format!(
                    "{} not confirmed within {:?}",
                    transaction_id, self.config.confirm_timeout
                ))));
            }
        };

        match confirmation {
            Ok(Confirmation::Confirmed) => {
                record(attempts, Some(&transaction_id), AttemptOutcome::Confirmed);
                Ok(Ok(transaction_id))
            }
            Ok(Confirmation::Failed(failure)) => {
                record(attempts, Some(&transaction_id), AttemptOutcome::FailedOnChain);
                let message = describe_failure(&failure);
                error!("Transaction {} failed on-chain: {}", transaction_id, message);
                let logs = self.recent_logs(connection, &transaction_id).await;
                Err(SwapError::OnChain {
                    transaction_id,
                    message,
                    failure,
                    logs,
                    context: Box::new(context.clone()),
                })
            }
            Ok(Confirmation::Expired) => {
                record(attempts, Some(&transaction_id), AttemptOutcome::TimedOut);
                Ok(Err(Retry::TimedOut(format!("{} expired before landing", transaction_id))))
            }
            Err(ConnectionError::Rejected { message, failure }) => {
                record(attempts, Some(&transaction_id), AttemptOutcome::FailedOnChain);
                error!("Transaction {} rejected while confirming: {}", transaction_id, message);
                Err(SwapError::Rejected {
                    message,
                    failure,
                    transaction_id: Some(transaction_id),
                    context: Box::new(context.clone()),
                })
            }
            Err(e @ (ConnectionError::Timeout(_) | ConnectionError::Expired(_))) => {
                record(attempts, Some(&transaction_id), AttemptOutcome::TimedOut);
                Ok(Err(Retry::TimedOut(e.to_string())))
            }
            Err(e) => {
                record(attempts, Some(&transaction_id), AttemptOutcome::NetworkError);
                Ok(Err(Retry::Network(e.to_string())))
            }
        }
    }

    async fn fetch_quote(
        &self,
        request: &TradeRequest,
        context: &TradeContext,
        cancel: &CancellationToken,
        transaction_id: Option<&str>,
    ) -> Result<Quote, SwapError> {
        let quote_request = request.quote_request();
        cancellable(cancel, transaction_id, self.quotes.get_quote(&quote_request))
            .await?
            .map_err(|e| venue_error(e, context))
    }

    /// The quote with the minimum output recomputed for the trade's slippage.
    fn with_floor(&self, quote: &Quote, slippage_bps: u16) -> Quote {
        Quote {
            minimum_output_amount: minimum_output(quote.output_amount, slippage_bps),
            slippage_bps,
            ..quote.clone()
        }
    }

    async fn backoff(&self, cancel: &CancellationToken, transaction_id: Option<&str>) -> Result<(), SwapError> {
        cancellable(cancel, transaction_id, tokio::time::sleep(self.config.retry_backoff)).await
    }

    /// Last program log lines of a failed transaction; fetch errors are ignored.
    async fn recent_logs<C>(&self, connection: &C, transaction_id: &str) -> Vec<String>
    where
        C: ChainConnection + ?Sized,
    {
        match tokio::time::timeout(
            self.config.log_fetch_timeout,
            connection.fetch_transaction_logs(transaction_id),
        )
        .await
        {
            Ok(Some(logs)) => tail_logs(logs, self.config.log_lines_kept),
            Ok(None) => Vec::new(),
            Err(_) => {
                debug!("Timed out fetching logs for {}", transaction_id);
                Vec::new()
            }
        }
    }
}

/// Races a step against cancellation.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    transaction_id: Option<&str>,
    step: F,
) -> Result<F::Output, SwapError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SwapError::Cancelled {
            transaction_id: transaction_id.map(str::to_string),
        }),
        output = step => Ok(output),
    }
}

fn record(attempts: &mut [SwapAttempt], transaction_id: Option<&str>, outcome: AttemptOutcome) {
    if let Some(attempt) = attempts.last_mut() {
        if let Some(id) = transaction_id {
            attempt.transaction_id = Some(id.to_string());
        }
        attempt.outcome = outcome;
    }
}

fn venue_error(source: QuoteError, context: &TradeContext) -> SwapError {
    SwapError::Venue {
        source,
        context: Box::new(context.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let ok = TradeRequest::new("SOL", "Token", U256::from(1u64), 100);
        assert!(ok.validate().is_ok());

        let zero = TradeRequest::new("SOL", "Token", U256::ZERO, 100);
        assert!(matches!(zero.validate(), Err(SwapError::Validation(_))));

        let same = TradeRequest::new("SOL", "SOL", U256::from(1u64), 100);
        assert!(same.validate().is_err());

        let all_slippage = TradeRequest::new("SOL", "Token", U256::from(1u64), 10_000);
        assert!(all_slippage.validate().is_err());
    }

    #[test]
    fn test_record_updates_last_attempt() {
        let mut attempts = vec![SwapAttempt {
            attempt_index: 1,
            fee: FeeSetting::Fixed(10),
            transaction_id: None,
            outcome: AttemptOutcome::Pending,
        }];
        record(&mut attempts, Some("sig"), AttemptOutcome::TimedOut);
        assert_eq!(attempts[0].transaction_id.as_deref(), Some("sig"));
        assert_eq!(attempts[0].outcome, AttemptOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, Some("sig"), std::future::pending::<()>()).await;
        assert!(matches!(
            result,
            Err(SwapError::Cancelled { transaction_id: Some(ref id) }) if id == "sig"
        ));
    }
}
