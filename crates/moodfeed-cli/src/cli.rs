//! CLI argument definitions for moodfeed.
//!
//! # Commands
//!
//! | Command | Provider | Description |
//! |---------|----------|-------------|
//! | `quote` | Alpha Vantage | Latest quote for one or more stocks |
//! | `series` | Alpha Vantage | Intraday or daily OHLCV series |
//! | `search` | Alpha Vantage | Symbol search by keywords |
//! | `overview` | Alpha Vantage | Company profile and fundamentals |
//! | `dividends` | Polygon | Dividend history for a ticker |
//! | `tickers` | Polygon | Reference ticker listing |
//! | `crypto` | CoinMarketCap | Latest crypto quotes, by symbol or id |
//! | `listings` | CoinMarketCap | Crypto listings ranked by market cap |
//! | `trending` | CoinMarketCap | Top movers over a time period |
//! | `coin-info` | CoinMarketCap | Coin metadata |
//! | `coin-search` | CoinMarketCap | Find active coins by symbol |
//! | `metrics` | CoinMarketCap | Global crypto market metrics |
//! | `status` | all | Breaker, cache and disable-window state |
//! | `watch` | Alpha Vantage / CoinMarketCap | Poll quotes and print one envelope per run |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON configuration file |
//! | `--offline` | `false` | Serve cached/mock data only |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--no-cache` | `false` | Skip the response cache |
//! | `--timeout-ms` | provider default | Per-attempt timeout |
//! | `--max-retries` | provider default | Retries after the first attempt |
//!
//! # Examples
//!
//! ```bash
//! moodfeed quote AAPL MSFT --pretty
//! moodfeed series NVDA --interval 15min
//! moodfeed crypto BTC ETH --convert EUR
//! moodfeed crypto --ids 1,1027
//! moodfeed trending --period 7d --limit 5
//! moodfeed --offline listings --limit 5
//! moodfeed watch BTC ETH --crypto --every-secs 30 --count 4
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Resilient market-data CLI for the moodfeed proxy.
#[derive(Debug, Parser)]
#[command(
    name = "moodfeed",
    author,
    version,
    about = "Resilient market-data CLI",
    long_about = "moodfeed fetches market data from Polygon, Alpha Vantage and CoinMarketCap \
through the moodfeed proxy. Requests are retried with exponential backoff, guarded by a \
per-provider circuit breaker and fall back to cached or mock data when providers rate-limit.\n\
\n\
Use 'moodfeed <command> --help' for command-specific help."
)]
pub struct Cli {
    /// JSON configuration file (retry, breaker, fallback, ttls, providers).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Never call providers; answer from cache or mock data.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Neither read nor write the response cache.
    #[arg(long, global = true, default_value_t = false)]
    pub no_cache: bool,

    /// Per-attempt timeout in milliseconds, for every provider.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Retries after the first attempt, for every provider.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch the latest quote for one or more stock symbols.
    ///
    /// # Examples
    ///
    ///   moodfeed quote AAPL
    ///   moodfeed quote AAPL MSFT GOOGL --pretty
    Quote(QuoteArgs),

    /// Fetch an intraday or daily OHLCV series.
    ///
    /// Without --interval the daily series is returned.
    Series(SeriesArgs),

    /// Search symbols by ticker or company name.
    Search(SearchArgs),

    /// Fetch a company profile with fundamentals.
    Overview(OverviewArgs),

    /// Fetch dividend history for a ticker.
    Dividends(DividendsArgs),

    /// List reference tickers.
    Tickers(TickersArgs),

    /// Fetch the latest quotes for one or more crypto symbols.
    Crypto(CryptoArgs),

    /// List cryptocurrencies ranked by market cap.
    Listings(ListingsArgs),

    /// List trending cryptocurrencies.
    Trending(TrendingArgs),

    /// Fetch metadata (name, slug, category, links) for crypto symbols.
    CoinInfo(CoinInfoArgs),

    /// Find active cryptocurrencies by symbol.
    CoinSearch(CoinSearchArgs),

    /// Fetch global crypto market metrics.
    Metrics(MetricsArgs),

    /// Show circuit breaker, cache and API-disable state for every provider.
    Status(StatusArgs),

    /// Poll quotes periodically, printing one JSON line per run.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    /// One or more stock symbols (e.g., AAPL, MSFT).
    #[arg(required = true, num_args = 1..)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SeriesArgs {
    pub symbol: String,

    /// Intraday interval: 1min, 5min, 15min, 30min or 60min.
    #[arg(long)]
    pub interval: Option<String>,

    /// compact (latest 100 points) or full.
    #[arg(long, default_value = "compact")]
    pub output_size: String,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Free-form keywords (ticker or company name).
    pub keywords: String,
}

#[derive(Debug, Args)]
pub struct OverviewArgs {
    pub symbol: String,
}

#[derive(Debug, Args)]
pub struct DividendsArgs {
    pub symbol: String,
}

#[derive(Debug, Args)]
pub struct TickersArgs {
    #[arg(long, default_value = "stocks")]
    pub market: String,

    #[arg(long, default_value_t = 100)]
    pub limit: u32,
}

#[derive(Debug, Args)]
pub struct CryptoArgs {
    /// One or more crypto symbols (e.g., BTC, ETH).
    #[arg(num_args = 0.., required_unless_present = "ids", conflicts_with = "ids")]
    pub symbols: Vec<String>,

    /// CoinMarketCap ids instead of symbols, comma-separated (e.g., 1,1027).
    #[arg(long, value_delimiter = ',')]
    pub ids: Vec<u32>,

    /// Fiat currency prices are converted to.
    #[arg(long, default_value = "USD")]
    pub convert: String,
}

#[derive(Debug, Args)]
pub struct ListingsArgs {
    /// 1-based rank to start from.
    #[arg(long, default_value_t = 1)]
    pub start: u32,

    #[arg(long, default_value_t = 10)]
    pub limit: u32,

    #[arg(long, default_value = "USD")]
    pub convert: String,
}

#[derive(Debug, Args)]
pub struct TrendingArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: u32,

    /// Ranking window: 1h, 24h, 7d or 30d.
    #[arg(long, default_value = "24h")]
    pub period: String,
}

#[derive(Debug, Args)]
pub struct CoinInfoArgs {
    #[arg(required = true, num_args = 1..)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CoinSearchArgs {
    pub query: String,
}

#[derive(Debug, Args)]
pub struct MetricsArgs {
    #[arg(long, default_value = "USD")]
    pub convert: String,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Clear the cache, re-enable the API and reset every breaker before reporting.
    #[arg(long, default_value_t = false)]
    pub reset: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[arg(required = true, num_args = 1..)]
    pub symbols: Vec<String>,

    /// Treat symbols as crypto and poll CoinMarketCap instead of Alpha Vantage.
    #[arg(long, default_value_t = false)]
    pub crypto: bool,

    /// Seconds between polls.
    #[arg(long, default_value_t = 30)]
    pub every_secs: u64,

    /// Stop after this many polls; runs until Ctrl-C when omitted.
    #[arg(long)]
    pub count: Option<u32>,
}
