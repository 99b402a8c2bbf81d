use crate::domain::snapshot::MarketSnapshot;
use crate::domain::symbol::{benchmark_indexes, SymbolDescriptor};
use crate::market::provider::MarketDataProvider;
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Run-scoped memo of everything fetched from the market-data provider.
///
/// Construct one per run and drop it at the end; nothing is ever evicted.
/// Each memo table stays locked across its provider call, so a symbol is fetched
/// at most once even if callers overlap.
pub struct SnapshotCache {
    provider: Arc<dyn MarketDataProvider>,
    today: NaiveDate,
    history_days: i64,
    universe_indexes: Vec<String>,

    universe: Mutex<Option<Arc<Vec<SymbolDescriptor>>>>,
    snapshots: Mutex<HashMap<String, Arc<MarketSnapshot>>>,
    earnings: Mutex<HashMap<String, Option<Arc<Vec<NaiveDate>>>>>,
}

impl SnapshotCache {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        today: NaiveDate,
        history_days: i64,
        universe_indexes: Vec<String>,
    ) -> Self {
        Self {
            provider,
            today,
            history_days,
            universe_indexes,
            universe: Mutex::new(None),
            snapshots: Mutex::new(HashMap::new()),
            earnings: Mutex::new(HashMap::new()),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Constituents of the configured indexes, one symbol per company, followed by
    /// the benchmark indexes.
    pub async fn resolve_universe(&self) -> Result<Arc<Vec<SymbolDescriptor>>> {
        let mut guard = self.universe.lock().await;
        if let Some(universe) = guard.as_ref() {
            return Ok(universe.clone());
        }

        let constituents = self
            .provider
            .list_constituents(&self.universe_indexes)
            .await
            .context("failed to resolve universe constituents")?;

        let mut seen_names = HashSet::new();
        let mut seen_symbols = HashSet::new();
        let mut out = Vec::with_capacity(constituents.len() + 8);
        for descriptor in constituents.into_iter().chain(benchmark_indexes()) {
            let symbol = descriptor.symbol.trim().to_string();
            if symbol.is_empty() || !seen_symbols.insert(symbol.clone()) {
                continue;
            }
            // Dual listings: keep the first symbol seen for a company.
            if !descriptor.is_index && !seen_names.insert(descriptor.name.trim().to_string()) {
                continue;
            }
            out.push(SymbolDescriptor {
                symbol,
                ..descriptor
            });
        }

        tracing::info!(
            provider = self.provider.provider_name(),
            symbols = out.len(),
            "universe resolved"
        );

        let universe = Arc::new(out);
        *guard = Some(universe.clone());
        Ok(universe)
    }

    /// Price history plus descriptor for `symbol`. The first call fetches, later
    /// calls return the stored value. Fetch failures are returned, not cached.
    pub async fn snapshot(&self, symbol: &str) -> Result<Arc<MarketSnapshot>> {
        let mut guard = self.snapshots.lock().await;
        if let Some(snapshot) = guard.get(symbol) {
            return Ok(snapshot.clone());
        }

        let start = self.today - Duration::days(self.history_days);
        let history = self
            .provider
            .history(symbol, start, self.today)
            .await
            .with_context(|| format!("history fetch failed for {symbol}"))?;
        let fields = self
            .provider
            .descriptor(symbol)
            .await
            .with_context(|| format!("descriptor fetch failed for {symbol}"))?;

        let snapshot = Arc::new(MarketSnapshot {
            symbol: symbol.to_string(),
            history,
            fields,
        });
        guard.insert(symbol.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    /// Memoized earnings calendar. A failed lookup is cached as `None` and never
    /// affects the symbol's snapshot.
    pub async fn earnings_dates(&self, symbol: &str) -> Option<Arc<Vec<NaiveDate>>> {
        let mut guard = self.earnings.lock().await;
        if let Some(dates) = guard.get(symbol) {
            return dates.clone();
        }

        let dates = match self.provider.earnings_dates(symbol).await {
            Ok(dates) => Some(Arc::new(dates)),
            Err(err) => {
                tracing::debug!(%symbol, error = %err, "earnings dates unavailable");
                None
            }
        };
        guard.insert(symbol.to_string(), dates.clone());
        dates
    }
}

/// Most recent earnings date on or before `today`, at most a year back.
pub fn last_earnings_date(dates: &[NaiveDate], today: NaiveDate) -> Option<NaiveDate> {
    let earliest = today - Duration::days(365);
    dates
        .iter()
        .copied()
        .filter(|d| *d <= today && *d >= earliest)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMarketData;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn cache(provider: Arc<FakeMarketData>) -> SnapshotCache {
        SnapshotCache::new(provider, today(), 365, vec!["S&P 500".to_string()])
    }

    #[tokio::test]
    async fn snapshot_is_fetched_once() {
        let provider = Arc::new(FakeMarketData::new().with_stock(
            "AAPL",
            "Apple",
            json!({"industry": "Consumer Electronics"}),
        ));
        let cache = cache(provider.clone());

        let first = cache.snapshot("AAPL").await.unwrap();
        let second = cache.snapshot("AAPL").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.descriptor_calls("AAPL"), 1);
        assert_eq!(first.industry(), Some("Consumer Electronics"));
    }

    #[tokio::test]
    async fn snapshot_failure_propagates_and_is_retried() {
        let provider = Arc::new(FakeMarketData::new().with_failing("BAD"));
        let cache = cache(provider.clone());

        assert!(cache.snapshot("BAD").await.is_err());
        assert!(cache.snapshot("BAD").await.is_err());
        // History is fetched first and fails, so the descriptor is never asked for.
        assert_eq!(provider.history_calls("BAD"), 2);
        assert_eq!(provider.descriptor_calls("BAD"), 0);
    }

    #[tokio::test]
    async fn earnings_failure_is_cached_as_none() {
        let provider = Arc::new(FakeMarketData::new().with_stock("AAPL", "Apple", json!({})));
        let cache = cache(provider.clone());

        assert_eq!(cache.earnings_dates("AAPL").await, None);
        assert_eq!(cache.earnings_dates("AAPL").await, None);
        assert_eq!(provider.earnings_calls("AAPL"), 1);
        assert!(cache.snapshot("AAPL").await.is_ok());
    }

    #[tokio::test]
    async fn universe_dedupes_companies_and_appends_benchmarks() {
        let provider = Arc::new(
            FakeMarketData::new()
                .with_stock("GOOGL", "Alphabet", json!({}))
                .with_stock("GOOG", "Alphabet", json!({}))
                .with_stock("MSFT", "Microsoft", json!({}))
                .with_stock("MSFT", "Microsoft", json!({})),
        );
        let cache = cache(provider);

        let universe = cache.resolve_universe().await.unwrap();
        let stocks: Vec<&str> = universe
            .iter()
            .filter(|d| !d.is_index)
            .map(|d| d.symbol.as_str())
            .collect();
        assert_eq!(stocks, vec!["GOOGL", "MSFT"]);
        assert!(universe.iter().any(|d| d.is_index && d.symbol == "^GSPC"));
        assert_eq!(universe.iter().filter(|d| d.is_index).count(), 7);
    }

    #[test]
    fn picks_latest_past_earnings_date_within_a_year() {
        let dates = [
            NaiveDate::from_ymd_opt(2026, 4, 28).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 29).unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, 30).unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 30).unwrap(),
        ];
        assert_eq!(
            last_earnings_date(&dates, today()),
            NaiveDate::from_ymd_opt(2026, 1, 29)
        );
        assert_eq!(last_earnings_date(&dates[3..], today()), None);
    }
}
