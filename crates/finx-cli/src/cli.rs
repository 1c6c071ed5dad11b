//! CLI argument definitions for finx.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Execute one request through the resilient engine |
//! | `classify` | Show the default classification for a status code |
//! | `backoff` | Print the exponential backoff schedule |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `-v` | off | Debug logs on stderr (`-vv` for trace) |
//!
//! # Examples
//!
//! ```bash
//! finx fetch https://cdn.finra.org/equity/regsho/daily/CNMSshvol20240105.txt --max-attempts 3
//! finx fetch regsho/daily -q date=20240105 --config finx.json --pretty
//! finx classify --status 429 -H retry-after:2
//! finx backoff --attempts 5 --base-ms 200 --jitter 0
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use finx_http::{CacheMode, HttpMethod};
use serde_json::Value;

/// finx - resilient HTTP fetches for data ingestion
#[derive(Debug, Parser)]
#[command(
    name = "finx",
    author,
    version,
    about = "Resilient HTTP fetches for finx data ingestion",
    propagate_version = true
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Increase log verbosity on stderr.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute one logical request with retries, deadlines and caching.
    ///
    /// # Examples
    ///
    ///   finx fetch https://api.iex.test/stable/stock/MSFT/quote
    ///   finx fetch stock/MSFT/quote --config finx.json -H accept:application/json
    ///   finx fetch search-index --method POST --body '{"q":"10-K"}' --idempotency-key k1
    Fetch(FetchArgs),

    /// Show how the default classifier treats a status code.
    ///
    /// # Examples
    ///
    ///   finx classify --status 503
    ///   finx classify --status 429 -H retry-after:2 --method POST
    Classify(ClassifyArgs),

    /// Print the delay before each retry under a backoff profile.
    ///
    /// # Examples
    ///
    ///   finx backoff --attempts 5
    ///   finx backoff --attempts 4 --base-ms 100 --max-ms 1000 --jitter 0
    Backoff(BackoffArgs),
}

/// Arguments for `fetch`.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Absolute http(s) URL, or a path resolved against the configured base URL.
    pub target: String,

    /// HTTP method.
    #[arg(long, default_value = "GET")]
    pub method: HttpMethod,

    /// Request header as `name:value`. Repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Query parameter as `key=value`. Repeating a key sends a list.
    #[arg(short = 'q', long = "query", value_parser = parse_query)]
    pub query: Vec<(String, String)>,

    /// Operation name used for overrides, breaker and limiter keys.
    #[arg(long, default_value = "cli.fetch")]
    pub operation: String,

    /// Maximum attempts including the first.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Overall budget in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Per-attempt timeout in milliseconds.
    #[arg(long)]
    pub attempt_timeout_ms: Option<u64>,

    /// Idempotency key; makes unsafe methods retryable.
    #[arg(long)]
    pub idempotency_key: Option<String>,

    /// Cache key for the response.
    #[arg(long)]
    pub cache_key: Option<String>,

    /// Cache mode (default, bypass, refresh). Requires `--cache-key`.
    #[arg(long, requires = "cache_key")]
    pub cache_mode: Option<CacheMode>,

    /// JSON request body.
    #[arg(long, value_parser = parse_json)]
    pub body: Option<Value>,

    /// JSON engine config file. Falls back to `FINX_CONFIG`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Answer every request with `200 {}` instead of using the network.
    #[arg(long, default_value_t = false)]
    pub mock: bool,
}

/// Arguments for `classify`.
#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// HTTP status code.
    #[arg(long)]
    pub status: u16,

    /// Response header as `name:value`. Repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Method used for the retry decision.
    #[arg(long, default_value = "GET")]
    pub method: HttpMethod,
}

/// Arguments for `backoff`.
#[derive(Debug, Args)]
pub struct BackoffArgs {
    /// Number of attempts; the schedule lists the delay after each failed one.
    #[arg(long)]
    pub attempts: u32,

    /// Base delay in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub base_ms: u64,

    /// Delay cap in milliseconds.
    #[arg(long, default_value_t = 3_000)]
    pub max_ms: u64,

    /// Jitter factor in `[0, 1]`.
    #[arg(long, default_value_t = 0.5)]
    pub jitter: f64,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header '{raw}' must be name:value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header '{raw}' has an empty name"));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

fn parse_query(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("query '{raw}' must be key=value"))?;
    if key.is_empty() {
        return Err(format!("query '{raw}' has an empty key"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|error| format!("body is not valid JSON: {error}"))
}
