//! Runtime configuration: venue endpoints, signer, risk thresholds and executor policy.
//!
//! Values come from the process environment (optionally seeded from a `.env`
//! file). Every threshold has a default so an empty environment is usable.

use crate::execution::fees::{FeeSetting, DEFAULT_PRIORITY_FEE_LAMPORTS};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{read_keypair_file, Keypair};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Thresholds used by the risk engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Round-trip loss above which a finding is `high`
    pub honeypot_high_loss_bps: u64,
    /// Round-trip loss above which a finding is `critical`
    pub honeypot_critical_loss_bps: u64,
    /// Transfer fee at or above which the extension is `critical`
    pub extreme_transfer_fee_bps: u16,
    /// Declared sell tax at or above which the finding is `high`
    pub high_sell_tax_bps: u32,
    /// Buy price impact (percent) above which a liquidity finding is raised
    pub max_price_impact_pct: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            honeypot_high_loss_bps: 2_000,
            honeypot_critical_loss_bps: 5_000,
            extreme_transfer_fee_bps: 1_000,
            high_sell_tax_bps: 1_000,
            max_price_impact_pct: 5.0,
        }
    }
}

/// Retry, confirmation and quote-freshness policy of the swap executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Bound on the confirmation wait of one attempt
    pub confirm_timeout: Duration,
    /// Quotes older than this are refreshed before building
    pub max_quote_age: Duration,
    /// Adverse output move that is logged
    pub price_warn_bps: u64,
    /// Adverse output move that aborts the session
    pub price_abort_bps: u64,
    /// Pause between attempts
    pub retry_backoff: Duration,
    /// Fee used on the first retry when no network estimate is available
    pub default_priority_fee: u64,
    /// Program log lines kept for on-chain failure reports
    pub log_lines_kept: usize,
    /// Bound on the best-effort log fetch after a failure
    pub log_fetch_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            confirm_timeout: Duration::from_secs(60),
            max_quote_age: Duration::from_secs(10),
            price_warn_bps: 200,
            price_abort_bps: 1_000,
            retry_backoff: Duration::from_millis(500),
            default_priority_fee: DEFAULT_PRIORITY_FEE_LAMPORTS,
            log_lines_kept: 10,
            log_fetch_timeout: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Complete bot configuration.
#[derive(Clone)]
pub struct BotConfig {
    pub solana_rpc_url: String,
    pub bsc_rpc_url: String,
    pub jupiter_api_url: String,
    pub zerox_api_url: String,
    pub zerox_api_key: Option<String>,
    /// Solana keypair JSON file
    pub keypair_path: PathBuf,
    /// Base58 secret key, takes precedence over `keypair_path`
    pub private_key: Option<String>,
    pub slippage_bps: u16,
    pub priority_fee: FeeSetting,
    /// Quote API pacing
    pub requests_per_second: u32,
    pub rpc_timeout_seconds: u64,
    /// Lamports kept aside for fees and rent when checking the balance
    pub fee_reserve_lamports: u64,
    pub risk: RiskPolicy,
    pub executor: ExecutorConfig,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("solana_rpc_url", &self.solana_rpc_url)
            .field("bsc_rpc_url", &self.bsc_rpc_url)
            .field("jupiter_api_url", &self.jupiter_api_url)
            .field("zerox_api_url", &self.zerox_api_url)
            .field("zerox_api_key", &self.zerox_api_key.as_ref().map(|_| "<redacted>"))
            .field("keypair_path", &self.keypair_path)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("slippage_bps", &self.slippage_bps)
            .field("priority_fee", &self.priority_fee)
            .field("requests_per_second", &self.requests_per_second)
            .field("rpc_timeout_seconds", &self.rpc_timeout_seconds)
            .field("fee_reserve_lamports", &self.fee_reserve_lamports)
            .field("risk", &self.risk)
            .field("executor", &self.executor)
            .finish()
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            solana_rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            bsc_rpc_url: "https://bsc-dataseed.binance.org".to_string(),
            jupiter_api_url: "https://quote-api.jup.ag/v6".to_string(),
            zerox_api_url: "https://api.0x.org".to_string(),
            zerox_api_key: None,
            keypair_path: default_keypair_path(),
            private_key: None,
            slippage_bps: 100,
            priority_fee: FeeSetting::Auto,
            requests_per_second: 5,
            rpc_timeout_seconds: 30,
            fee_reserve_lamports: 10_000_000,
            risk: RiskPolicy::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl BotConfig {
    /// Loads configuration from `.env` (if present) and the environment.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self {
            solana_rpc_url: get("SOLANA_RPC_URL").unwrap_or(defaults.solana_rpc_url),
            bsc_rpc_url: get("BSC_RPC_URL").unwrap_or(defaults.bsc_rpc_url),
            jupiter_api_url: get("JUPITER_API_URL").unwrap_or(defaults.jupiter_api_url),
            zerox_api_url: get("ZEROX_API_URL").unwrap_or(defaults.zerox_api_url),
            zerox_api_key: get("ZEROX_API_KEY"),
            keypair_path: get("KEYPAIR_PATH")
                .map(|p| expand_home(&p))
                .unwrap_or(defaults.keypair_path),
            private_key: get("PRIVATE_KEY"),
            slippage_bps: parse_or("SLIPPAGE_BPS", get("SLIPPAGE_BPS"), defaults.slippage_bps)?,
            priority_fee: match get("PRIORITY_FEE_LAMPORTS") {
                Some(raw) => raw
                    .parse::<FeeSetting>()
                    .map_err(|e| anyhow!("Invalid PRIORITY_FEE_LAMPORTS: {}", e))?,
                None => defaults.priority_fee,
            },
            requests_per_second: parse_or(
                "REQUESTS_PER_SECOND",
                get("REQUESTS_PER_SECOND"),
                defaults.requests_per_second,
            )?,
            rpc_timeout_seconds: parse_or(
                "RPC_TIMEOUT_SECS",
                get("RPC_TIMEOUT_SECS"),
                defaults.rpc_timeout_seconds,
            )?,
            fee_reserve_lamports: parse_or(
                "FEE_RESERVE_LAMPORTS",
                get("FEE_RESERVE_LAMPORTS"),
                defaults.fee_reserve_lamports,
            )?,
            risk: defaults.risk,
            executor: defaults.executor,
        };

        let risk = &mut config.risk;
        risk.honeypot_high_loss_bps = parse_or(
            "HONEYPOT_HIGH_LOSS_BPS",
            get("HONEYPOT_HIGH_LOSS_BPS"),
            risk.honeypot_high_loss_bps,
        )?;
        risk.honeypot_critical_loss_bps = parse_or(
            "HONEYPOT_CRITICAL_LOSS_BPS",
            get("HONEYPOT_CRITICAL_LOSS_BPS"),
            risk.honeypot_critical_loss_bps,
        )?;
        risk.max_price_impact_pct = parse_or(
            "MAX_PRICE_IMPACT_PCT",
            get("MAX_PRICE_IMPACT_PCT"),
            risk.max_price_impact_pct,
        )?;

        let executor = &mut config.executor;
        executor.max_retries = parse_or("BUY_RETRIES", get("BUY_RETRIES"), executor.max_retries)?;
        executor.confirm_timeout = Duration::from_secs(parse_or(
            "CONFIRM_TIMEOUT_SECS",
            get("CONFIRM_TIMEOUT_SECS"),
            executor.confirm_timeout.as_secs(),
        )?);
        executor.max_quote_age = Duration::from_secs(parse_or(
            "MAX_QUOTE_AGE_SECS",
            get("MAX_QUOTE_AGE_SECS"),
            executor.max_quote_age.as_secs(),
        )?);
        executor.price_warn_bps = parse_or("PRICE_WARN_BPS", get("PRICE_WARN_BPS"), executor.price_warn_bps)?;
        executor.price_abort_bps = parse_or("PRICE_ABORT_BPS", get("PRICE_ABORT_BPS"), executor.price_abort_bps)?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the executor cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.slippage_bps > 5_000 {
            return Err(anyhow!("SLIPPAGE_BPS {} exceeds 5000 (50%)", self.slippage_bps));
        }
        if self.risk.honeypot_high_loss_bps > self.risk.honeypot_critical_loss_bps {
            return Err(anyhow!(
                "HONEYPOT_HIGH_LOSS_BPS ({}) must not exceed HONEYPOT_CRITICAL_LOSS_BPS ({})",
                self.risk.honeypot_high_loss_bps,
                self.risk.honeypot_critical_loss_bps
            ));
        }
        if self.executor.price_warn_bps > self.executor.price_abort_bps {
            return Err(anyhow!(
                "PRICE_WARN_BPS ({}) must not exceed PRICE_ABORT_BPS ({})",
                self.executor.price_warn_bps,
                self.executor.price_abort_bps
            ));
        }
        if self.requests_per_second == 0 {
            return Err(anyhow!("REQUESTS_PER_SECOND must be positive"));
        }
        Ok(())
    }

    /// Loads the signing keypair, preferring `PRIVATE_KEY` over the key file.
    pub fn load_keypair(&self) -> Result<Keypair> {
        if let Some(encoded) = &self.private_key {
            let bytes = bs58::decode(encoded)
                .into_vec()
                .context("PRIVATE_KEY is not valid base58")?;
            return Keypair::from_bytes(&bytes).map_err(|e| anyhow!("PRIVATE_KEY is not a valid keypair: {}", e));
        }

        check_key_permissions(&self.keypair_path)?;
        read_keypair_file(&self.keypair_path)
            .map_err(|e| anyhow!("Failed to read keypair {}: {}", self.keypair_path.display(), e))
    }
}

/// Builder for programmatic configuration.
pub struct BotConfigBuilder {
    config: BotConfig,
}

impl BotConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BotConfig::default(),
        }
    }

    pub fn with_solana_rpc(mut self, url: impl Into<String>) -> Self {
        self.config.solana_rpc_url = url.into();
        self
    }

    pub fn with_jupiter_api(mut self, url: impl Into<String>) -> Self {
        self.config.jupiter_api_url = url.into();
        self
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.config.slippage_bps = slippage_bps;
        self
    }

    pub fn with_priority_fee(mut self, fee: FeeSetting) -> Self {
        self.config.priority_fee = fee;
        self
    }

    pub fn with_risk_policy(mut self, policy: RiskPolicy) -> Self {
        self.config.risk = policy;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.executor.max_retries = retries;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.config.executor.confirm_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<BotConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for BotConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid {}='{}': {}", key, value, e)),
        None => Ok(default),
    }
}

fn default_keypair_path() -> PathBuf {
    expand_home("~/.config/solana/id.json")
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Warns when a key file is readable by other users.
pub fn check_key_permissions(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Keypair file {} is not accessible", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(
                "Keypair file {} has permissions {:o}; restrict it with chmod 600",
                path.display(),
                mode & 0o777
            );
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}
