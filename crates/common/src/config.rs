use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How `submit` hands a notification to the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Return as soon as the record is queued (HTTP 202).
    Deferred,
    /// Wait until the record reaches a terminal status (HTTP 201).
    Blocking,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deferred" | "async" => Ok(DispatchMode::Deferred),
            "blocking" | "sync" => Ok(DispatchMode::Blocking),
            other => Err(format!("unknown dispatch mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Deferred => write!(f, "deferred"),
            DispatchMode::Blocking => write!(f, "blocking"),
        }
    }
}

/// Delay strategy between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    Fixed,
    Exponential,
}

impl FromStr for RetryBackoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(RetryBackoff::Fixed),
            "exponential" => Ok(RetryBackoff::Exponential),
            other => Err(format!("unknown retry backoff '{}'", other)),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen port (default: 5000)
    pub port: u16,

    /// Maximum delivery attempts per notification (default: 3)
    pub max_attempts: u32,

    /// Base delay between attempts in milliseconds (default: 500)
    pub retry_delay_ms: u64,

    /// Backoff strategy (default: fixed)
    pub retry_backoff: RetryBackoff,

    /// Upper bound for exponential backoff in milliseconds (default: 30000)
    pub retry_max_delay_ms: u64,

    /// Per-attempt delivery timeout in milliseconds (default: 5000)
    pub delivery_timeout_ms: u64,

    /// Maximum number of concurrent delivery attempts (default: 16)
    pub worker_concurrency: usize,

    /// Whether `POST /notifications` waits for a terminal status (default: deferred)
    pub dispatch_mode: DispatchMode,

    /// Webhook that receives deliveries. When unset, the simulated gateway is used.
    pub delivery_webhook_url: Option<String>,

    /// Failure probability of the simulated gateway (default: 0.2)
    pub failure_simulation_rate: f64,

    /// Artificial latency of the simulated gateway in milliseconds (default: 0)
    pub simulated_latency_ms: u64,

    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            max_attempts: 3,
            retry_delay_ms: 500,
            retry_backoff: RetryBackoff::Fixed,
            retry_max_delay_ms: 30_000,
            delivery_timeout_ms: 5_000,
            worker_concurrency: 16,
            dispatch_mode: DispatchMode::Deferred,
            delivery_webhook_url: None,
            failure_simulation_rate: 0.2,
            simulated_latency_ms: 0,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            port: parse_var(&lookup, "PORT", defaults.port)?,
            max_attempts: parse_var(&lookup, "MAX_ATTEMPTS", defaults.max_attempts)?,
            retry_delay_ms: parse_var(&lookup, "RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            retry_backoff: parse_var(&lookup, "RETRY_BACKOFF", defaults.retry_backoff)?,
            retry_max_delay_ms: parse_var(
                &lookup,
                "RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay_ms,
            )?,
            delivery_timeout_ms: parse_var(
                &lookup,
                "DELIVERY_TIMEOUT_MS",
                defaults.delivery_timeout_ms,
            )?,
            worker_concurrency: parse_var(
                &lookup,
                "WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
            dispatch_mode: parse_var(&lookup, "DISPATCH_MODE", defaults.dispatch_mode)?,
            delivery_webhook_url: lookup("DELIVERY_WEBHOOK_URL").filter(|v| !v.is_empty()),
            failure_simulation_rate: parse_var(
                &lookup,
                "FAILURE_SIMULATION_RATE",
                defaults.failure_simulation_rate,
            )?,
            simulated_latency_ms: parse_var(
                &lookup,
                "SIMULATED_LATENCY_MS",
                defaults.simulated_latency_ms,
            )?,
            log_json: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.log_json),
        };

        if config.worker_concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be at least 1");
        }
        if !(0.0..=1.0).contains(&config.failure_simulation_rate) {
            anyhow::bail!("FAILURE_SIMULATION_RATE must be between 0 and 1");
        }

        Ok(config)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        _ => Ok(default),
    }
}
