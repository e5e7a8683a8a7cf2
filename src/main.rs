//! safebuy command-line entry point.
//!
//! Inspects a token, prints its risk report and, unless told otherwise, buys
//! it with the configured wallet.

use alloy_primitives::U256;
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use safebuy::config::BotConfig;
use safebuy::error::SwapError;
use safebuy::execution::{SolanaConnection, SwapExecutor, SwapReceipt, TradeRequest};
use safebuy::inspector::{EvmInspector, SolanaInspector, TokenInspector};
use safebuy::quote::{JupiterClient, QuoteProvider, ZeroExClient};
use safebuy::risk::{RiskAssessment, RiskEngine};
use safebuy::types::{format_amount, parse_amount, Quote, QuoteRequest, TokenMetadata, TokenRiskSurface, Venue};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::Signer;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Buy a token after checking it for honeypots, taxes and dangerous authorities
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Token mint (Solana) or contract address (BSC)
    #[arg(value_name = "TOKEN_ADDRESS")]
    token: String,

    /// Chain to trade on: solana or bsc
    #[arg(short, long, default_value = "solana")]
    chain: Venue,

    /// Amount of SOL / BNB to spend
    #[arg(short, long, default_value = "0.01")]
    amount: String,

    /// Slippage tolerance in basis points (overrides SLIPPAGE_BPS)
    #[arg(short, long)]
    slippage_bps: Option<u16>,

    /// Only inspect and assess the token, never trade
    #[arg(long)]
    check_only: bool,

    /// Skip the interactive confirmation
    #[arg(short, long)]
    yes: bool,

    /// Trade even when the risk level is critical
    #[arg(long)]
    force: bool,

    /// Trade even if the price moved beyond the abort threshold since the quote
    #[arg(long)]
    allow_price_move: bool,

    /// Show debug output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let directive = if args.verbose { "safebuy=debug" } else { "safebuy=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .init();

    let mut config = BotConfig::from_env().context("Failed to load configuration")?;
    if let Some(slippage_bps) = args.slippage_bps {
        config.slippage_bps = slippage_bps;
        config.validate()?;
    }

    println!("\n🔍 safebuy");
    println!("================================\n");
    println!("🎯 Token: {}", args.token);
    println!("⛓️  Chain: {}", args.chain);

    match args.chain {
        Venue::Solana => run_solana(&args, &config).await,
        Venue::Bsc => run_bsc(&args, &config).await,
    }
}

async fn run_solana(args: &Args, config: &BotConfig) -> Result<()> {
    let rpc = Arc::new(RpcClient::new_with_timeout_and_commitment(
        config.solana_rpc_url.clone(),
        Duration::from_secs(config.rpc_timeout_seconds),
        CommitmentConfig::confirmed(),
    ));

    let keypair = if args.check_only {
        None
    } else {
        let keypair = Arc::new(config.load_keypair()?);
        println!("👛 Wallet: {}", keypair.pubkey());
        Some(keypair)
    };

    let venue = Venue::Solana;
    let amount = parse_amount(&args.amount, venue.native_decimals())?;

    let metadata = SolanaInspector::new(rpc.clone())
        .fetch_token_metadata(&args.token)
        .await
        .with_context(|| format!("Failed to inspect token {}", args.token))?;

    let mut jupiter = JupiterClient::new(&config.jupiter_api_url, config.requests_per_second);
    if let Some(keypair) = &keypair {
        jupiter = jupiter.with_signer(keypair.clone());
    }
    let jupiter = Arc::new(jupiter);

    let buy_quote = fetch_buy_quote(jupiter.as_ref(), venue, &metadata, amount, config.slippage_bps).await;
    let engine = RiskEngine::new(jupiter.clone(), config.risk.clone());
    let assessment = engine.assess(&metadata, buy_quote.as_ref(), venue).await;
    println!("\n{}", assessment);

    let Some(keypair) = keypair else {
        return Ok(());
    };
    let buy_quote = buy_quote.ok_or_else(|| anyhow!("No buy route for {}; nothing to trade", args.token))?;
    gate_on_risk(&assessment, args.force)?;

    let connection = SolanaConnection::new(rpc.clone());
    let balance = connection.balance(&keypair.pubkey()).await?;
    let needed = u64::try_from(amount)
        .unwrap_or(u64::MAX)
        .saturating_add(config.fee_reserve_lamports);
    if balance < needed {
        bail!(
            "Insufficient balance: {} SOL available, {} SOL needed including fee reserve",
            format_amount(U256::from(balance), 9),
            format_amount(U256::from(needed), 9)
        );
    }

    if !args.yes && !confirm(&args.amount, venue, &buy_quote, metadata.decimals())? {
        println!("Aborted.");
        return Ok(());
    }

    let hints = connection.estimate_priority_fee().await;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling swap");
            on_signal.cancel();
        }
    });

    let request = TradeRequest::new(venue.native_input_asset(), metadata.address(), amount, config.slippage_bps)
        .with_fee(config.priority_fee)
        .with_quote(buy_quote)
        .allowing_price_move(args.allow_price_move);
    let executor = SwapExecutor::new(jupiter.clone(), jupiter.clone(), config.executor.clone());

    match executor.execute(&request, &connection, &hints, &cancel).await {
        Ok(receipt) => {
            print_receipt(&receipt, venue, metadata.decimals());
            Ok(())
        }
        Err(e) => {
            print_failure(&e, venue);
            Err(e.into())
        }
    }
}

/// BSC is assessment-only: inspection and pricing, no signing.
async fn run_bsc(args: &Args, config: &BotConfig) -> Result<()> {
    let venue = Venue::Bsc;
    if !args.check_only {
        warn!("Trading on BSC is not supported; running the risk assessment only");
    }
    let amount = parse_amount(&args.amount, venue.native_decimals())?;

    let metadata = EvmInspector::new(&config.bsc_rpc_url, Duration::from_secs(config.rpc_timeout_seconds))
        .fetch_token_metadata(&args.token)
        .await
        .with_context(|| format!("Failed to inspect token {}", args.token))?;

    let zerox = ZeroExClient::new(&config.zerox_api_url, config.zerox_api_key.clone(), config.requests_per_second);
    let buy_quote = fetch_buy_quote(&zerox, venue, &metadata, amount, config.slippage_bps).await;
    let assessment = RiskEngine::new(zerox, config.risk.clone())
        .assess(&metadata, buy_quote.as_ref(), venue)
        .await;
    println!("\n{}", assessment);
    Ok(())
}

async fn fetch_buy_quote<Q: QuoteProvider + ?Sized>(
    quotes: &Q,
    venue: Venue,
    metadata: &TokenMetadata,
    amount: U256,
    slippage_bps: u16,
) -> Option<Quote> {
    let request = QuoteRequest::new(venue.native_input_asset(), metadata.address(), amount, slippage_bps);
    match quotes.get_quote(&request).await {
        Ok(quote) => {
            info!(
                "Buy quote: {} {} -> {} tokens (min {})",
                format_amount(quote.input_amount, venue.native_decimals()),
                venue.as_str(),
                format_amount(quote.output_amount, metadata.decimals()),
                format_amount(quote.minimum_output_amount, metadata.decimals())
            );
            Some(quote)
        }
        Err(e) => {
            warn!("No buy quote from {}: {}", quotes.name(), e);
            None
        }
    }
}

fn gate_on_risk(assessment: &RiskAssessment, force: bool) -> Result<()> {
    if assessment.is_critical() {
        if !force {
            bail!("Risk level is CRITICAL; refusing to buy (use --force to override)");
        }
        warn!("Risk level is CRITICAL; continuing because --force was given");
    }
    Ok(())
}

fn confirm(amount: &str, venue: Venue, quote: &Quote, decimals: u8) -> Result<bool> {
    print!(
        "Buy ~{} tokens (min {}) for {} {}? [y/N] ",
        format_amount(quote.output_amount, decimals),
        format_amount(quote.minimum_output_amount, decimals),
        amount,
        venue.as_str().to_uppercase()
    );
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_receipt(receipt: &SwapReceipt, venue: Venue, decimals: u8) {
    println!("\n✅ Swap confirmed after {} attempt(s)", receipt.attempts.len());
    println!("   • Transaction: {}", receipt.transaction_id);
    println!("   • Confirmed at: {}", receipt.confirmed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("   • Minimum output: {}", format_amount(receipt.minimum_output, decimals));
    if let Some(fee) = receipt.fee() {
        println!("   • Priority fee: {}", fee);
    }
    println!("   • Explorer: {}", venue.explorer_url(&receipt.transaction_id));
}

fn print_failure(error: &SwapError, venue: Venue) {
    println!("\n❌ Swap failed ({:?}): {}", error.kind(), error);
    if let Some(transaction_id) = error.transaction_id() {
        println!("   • Transaction: {}", transaction_id);
        println!("   • Explorer: {}", venue.explorer_url(transaction_id));
    }
    if let Some(failure) = error.raw_on_chain_error() {
        println!("   • Raw error: {}", failure.raw);
    }
    if let Some(context) = error.context() {
        println!("   • Trade: {}", context);
    }
    let logs = error.logs();
    if !logs.is_empty() {
        println!("   • Last program logs:");
        for line in logs {
            println!("     {}", line);
        }
    }
}
