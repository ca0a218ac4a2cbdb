//! Synthetic market data served while upstream providers are unavailable.
//!
//! Quotes are derived from fixed seeds with a small random drift on every call, so screens
//! keep moving in degraded mode. The drift is cosmetic; the price relationships are not:
//! `low <= min(open, price)`, `high >= max(open, price)` and `change == price - previous_close`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::{Symbol, UtcDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Stock,
    Crypto,
}

/// Reference values a synthetic quote is generated around.
#[derive(Debug, Clone, PartialEq)]
pub struct MockSeed {
    pub symbol: Symbol,
    pub name: String,
    pub kind: AssetKind,
    pub reference_price: f64,
    pub average_volume: u64,
    pub market_cap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyntheticQuote {
    pub symbol: Symbol,
    pub name: String,
    pub kind: AssetKind,
    pub price: f64,
    pub previous_close: f64,
    pub change: f64,
    pub change_percent: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: u64,
    pub market_cap: f64,
    pub as_of: UtcDateTime,
}

/// One OHLCV point of a synthetic series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyntheticBar {
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

const STOCK_SEEDS: &[(&str, &str, f64, u64, f64)] = &[
    ("AAPL", "Apple Inc.", 189.84, 54_000_000, 2.95e12),
    ("MSFT", "Microsoft Corporation", 415.50, 21_000_000, 3.09e12),
    ("NVDA", "NVIDIA Corporation", 875.28, 42_000_000, 2.16e12),
    ("TSLA", "Tesla, Inc.", 175.34, 98_000_000, 5.58e11),
    ("AMZN", "Amazon.com, Inc.", 178.22, 37_000_000, 1.85e12),
    ("GOOGL", "Alphabet Inc.", 152.26, 28_000_000, 1.89e12),
    ("META", "Meta Platforms, Inc.", 493.50, 16_000_000, 1.26e12),
    ("SPY", "SPDR S&P 500 ETF Trust", 510.83, 72_000_000, 4.7e11),
];

const CRYPTO_SEEDS: &[(&str, &str, f64, u64, f64)] = &[
    ("BTC", "Bitcoin", 67_250.00, 31_000_000_000, 1.32e12),
    ("ETH", "Ethereum", 3_480.50, 15_000_000_000, 4.18e11),
    ("SOL", "Solana", 172.40, 3_200_000_000, 7.6e10),
    ("DOGE", "Dogecoin", 0.1612, 1_400_000_000, 2.3e10),
    ("ADA", "Cardano", 0.4587, 420_000_000, 1.6e10),
];

/// Catalog of symbols with synthetic data.
#[derive(Debug, Clone)]
pub struct MockCatalog {
    seeds: BTreeMap<Symbol, MockSeed>,
}

impl Default for MockCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty();
        let stocks = STOCK_SEEDS.iter().map(|seed| (seed, AssetKind::Stock));
        let crypto = CRYPTO_SEEDS.iter().map(|seed| (seed, AssetKind::Crypto));

        for (&(symbol, name, price, volume, market_cap), kind) in stocks.chain(crypto) {
            if let Ok(symbol) = Symbol::parse(symbol) {
                catalog.insert(MockSeed {
                    symbol,
                    name: name.to_owned(),
                    kind,
                    reference_price: price,
                    average_volume: volume,
                    market_cap,
                });
            }
        }
        catalog
    }
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            seeds: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, seed: MockSeed) {
        self.seeds.insert(seed.symbol.clone(), seed);
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.seeds.contains_key(symbol)
    }

    pub fn symbols(&self, kind: AssetKind) -> Vec<Symbol> {
        self.seeds
            .values()
            .filter(|seed| seed.kind == kind)
            .map(|seed| seed.symbol.clone())
            .collect()
    }

    pub fn seed(&self, symbol: &Symbol) -> Option<&MockSeed> {
        self.seeds.get(symbol)
    }

    pub fn quote(&self, symbol: &Symbol) -> Option<SyntheticQuote> {
        self.seeds.get(symbol).map(synthesize)
    }

    /// Quotes for every known symbol in `symbols`; unknown symbols are skipped.
    pub fn quotes(&self, symbols: &[Symbol]) -> Vec<SyntheticQuote> {
        symbols.iter().filter_map(|symbol| self.quote(symbol)).collect()
    }

    /// `points` bars spaced `step` apart, oldest first, ending now.
    pub fn series(&self, symbol: &Symbol, points: usize, step: Duration) -> Vec<SyntheticBar> {
        let Some(seed) = self.seeds.get(symbol) else {
            return Vec::new();
        };
        let decimals = decimals_for(seed.reference_price);
        let mut close = seed.reference_price;
        let mut bars = Vec::with_capacity(points);

        for index in (0..points).rev() {
            let offset = step.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
            let open = close;
            close = round_to(open * (1.0 + jitter(0.01)), decimals);
            let high = round_to(open.max(close) * (1.0 + fastrand::f64() * 0.004), decimals)
                .max(open)
                .max(close);
            let low = round_to(open.min(close) * (1.0 - fastrand::f64() * 0.004), decimals)
                .min(open)
                .min(close);
            bars.push(SyntheticBar {
                ts: UtcDateTime::ago(offset),
                open,
                high,
                low,
                close,
                volume: scaled_volume(seed.average_volume),
            });
        }
        bars
    }
}

fn synthesize(seed: &MockSeed) -> SyntheticQuote {
    let decimals = decimals_for(seed.reference_price);
    let previous_close = round_to(seed.reference_price, decimals);
    let price = round_to(previous_close * (1.0 + jitter(0.02)), decimals);
    let open = round_to(previous_close * (1.0 + jitter(0.005)), decimals);
    let high = round_to(price.max(open) * (1.0 + fastrand::f64() * 0.006), decimals)
        .max(price)
        .max(open);
    let low = round_to(price.min(open) * (1.0 - fastrand::f64() * 0.006), decimals)
        .min(price)
        .min(open);
    let change = round_to(price - previous_close, decimals);
    let change_percent = round_to(change / previous_close * 100.0, 2);

    SyntheticQuote {
        symbol: seed.symbol.clone(),
        name: seed.name.clone(),
        kind: seed.kind,
        price,
        previous_close,
        change,
        change_percent,
        open,
        high,
        low,
        volume: scaled_volume(seed.average_volume),
        market_cap: (seed.market_cap * price / seed.reference_price).round(),
        as_of: UtcDateTime::now(),
    }
}

/// Uniform value in `[-spread, spread]`.
fn jitter(spread: f64) -> f64 {
    (fastrand::f64() * 2.0 - 1.0) * spread
}

fn scaled_volume(average: u64) -> u64 {
    (average as f64 * (0.8 + fastrand::f64() * 0.4)).round() as u64
}

fn decimals_for(price: f64) -> i32 {
    if price < 1.0 {
        4
    } else {
        2
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    #[test]
    fn quotes_are_internally_consistent() {
        let catalog = MockCatalog::new();

        for raw in ["AAPL", "NVDA", "BTC", "DOGE", "ADA"] {
            for _ in 0..200 {
                let quote = catalog.quote(&symbol(raw)).expect("seeded symbol");
                assert!(quote.high >= quote.price, "{raw}: {quote:?}");
                assert!(quote.price >= quote.low, "{raw}: {quote:?}");
                assert!(quote.high >= quote.open && quote.open >= quote.low, "{raw}: {quote:?}");
                assert!(
                    (quote.change - (quote.price - quote.previous_close)).abs() < 1e-6,
                    "{raw}: {quote:?}"
                );
            }
        }
    }

    #[test]
    fn unknown_symbols_are_skipped() {
        let catalog = MockCatalog::new();
        assert!(catalog.quote(&symbol("ZZZZ")).is_none());

        let quotes = catalog.quotes(&[symbol("MSFT"), symbol("ZZZZ"), symbol("ETH")]);
        let symbols: Vec<&str> = quotes.iter().map(|quote| quote.symbol.as_str()).collect();
        assert_eq!(symbols, ["MSFT", "ETH"]);
    }

    #[test]
    fn catalog_separates_asset_kinds() {
        let catalog = MockCatalog::new();
        assert!(catalog.symbols(AssetKind::Crypto).contains(&symbol("SOL")));
        assert!(!catalog.symbols(AssetKind::Stock).contains(&symbol("SOL")));
    }

    #[test]
    fn series_is_ordered_and_bounded() {
        let catalog = MockCatalog::new();
        let bars = catalog.series(&symbol("TSLA"), 30, Duration::from_secs(86_400));

        assert_eq!(bars.len(), 30);
        assert!(bars.windows(2).all(|pair| pair[0].ts < pair[1].ts));
        assert!(bars
            .iter()
            .all(|bar| bar.high >= bar.open.max(bar.close) && bar.low <= bar.open.min(bar.close)));
        assert!(catalog.series(&symbol("ZZZZ"), 5, Duration::from_secs(60)).is_empty());
    }
}
