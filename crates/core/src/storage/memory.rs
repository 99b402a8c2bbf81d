use crate::domain::analysis::StockAnalysisRecord;
use crate::domain::contract::{PortfolioAllocation, PortfolioRecord};
use crate::storage::{save_each, AnalysisStore};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Process-local store used by `--dry-run` and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stock_analysis: Mutex<BTreeMap<(String, NaiveDate), StockAnalysisRecord>>,
    portfolio: Mutex<BTreeMap<(String, NaiveDate), PortfolioRecord>>,
    stock_analysis_batches: AtomicUsize,
    /// Symbols whose writes are refused, to exercise partial saves.
    rejected: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn rejecting(symbols: &[&str]) -> Self {
        Self {
            rejected: symbols.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn check_writable(&self, symbol: &str) -> anyhow::Result<()> {
        anyhow::ensure!(!self.rejected.contains(symbol), "write rejected for {symbol}");
        Ok(())
    }

    /// Number of `save_stock_analysis` calls so far.
    pub fn stock_analysis_batches(&self) -> usize {
        self.stock_analysis_batches.load(Ordering::SeqCst)
    }

    pub async fn stock_analysis_for(&self, as_of_date: NaiveDate) -> Vec<StockAnalysisRecord> {
        self.stock_analysis
            .lock()
            .await
            .values()
            .filter(|r| r.as_of_date == as_of_date)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl AnalysisStore for MemoryStore {
    async fn save_stock_analysis(&self, records: &[StockAnalysisRecord]) -> anyhow::Result<usize> {
        self.stock_analysis_batches.fetch_add(1, Ordering::SeqCst);
        let saved = save_each("stock_analysis", records, |record| async move {
            self.check_writable(&record.symbol)?;
            self.stock_analysis
                .lock()
                .await
                .insert((record.symbol.clone(), record.as_of_date), record.clone());
            Ok::<(), anyhow::Error>(())
        })
        .await;
        Ok(saved)
    }

    async fn get_stock_analysis(
        &self,
        symbols: &[String],
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Vec<StockAnalysisRecord>> {
        let guard = self.stock_analysis.lock().await;
        Ok(symbols
            .iter()
            .filter_map(|symbol| guard.get(&(symbol.clone(), as_of_date)).cloned())
            .collect())
    }

    async fn save_portfolio(
        &self,
        allocations: &[PortfolioAllocation],
        as_of_date: NaiveDate,
    ) -> anyhow::Result<usize> {
        let records: Vec<PortfolioRecord> = allocations
            .iter()
            .cloned()
            .map(|allocation| allocation.into_record(as_of_date))
            .collect();
        let saved = save_each("portfolio", &records, |record| async move {
            self.check_writable(&record.symbol)?;
            self.portfolio
                .lock()
                .await
                .insert((record.symbol.clone(), record.as_of_date), record.clone());
            Ok::<(), anyhow::Error>(())
        })
        .await;
        Ok(saved)
    }

    async fn get_portfolio(&self) -> anyhow::Result<Vec<PortfolioRecord>> {
        Ok(self.portfolio.lock().await.values().cloned().collect())
    }

    async fn delete_portfolio(&self) -> anyhow::Result<u64> {
        let mut guard = self.portfolio.lock().await;
        let removed = guard.len() as u64;
        guard.clear();
        Ok(removed)
    }
}
