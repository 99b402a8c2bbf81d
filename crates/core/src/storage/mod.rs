use crate::domain::analysis::StockAnalysisRecord;
use crate::domain::contract::{PortfolioAllocation, PortfolioRecord};
use anyhow::Context;
use chrono::NaiveDate;
use std::future::Future;

pub mod lock;
pub mod memory;
pub mod postgres;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Durable records keyed by `(symbol, as_of_date)`.
///
/// Bulk saves are upserts that skip (and log) individual failing records; they
/// return how many records were written.
#[async_trait::async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn save_stock_analysis(&self, records: &[StockAnalysisRecord]) -> anyhow::Result<usize>;

    async fn get_stock_analysis(
        &self,
        symbols: &[String],
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Vec<StockAnalysisRecord>>;

    async fn save_portfolio(
        &self,
        allocations: &[PortfolioAllocation],
        as_of_date: NaiveDate,
    ) -> anyhow::Result<usize>;

    async fn get_portfolio(&self) -> anyhow::Result<Vec<PortfolioRecord>>;

    async fn delete_portfolio(&self) -> anyhow::Result<u64>;
}

/// A record stored under `(symbol, as_of_date)`.
pub(crate) trait Keyed {
    fn symbol(&self) -> &str;
    fn as_of_date(&self) -> NaiveDate;
}

impl Keyed for StockAnalysisRecord {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn as_of_date(&self) -> NaiveDate {
        self.as_of_date
    }
}

impl Keyed for PortfolioRecord {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn as_of_date(&self) -> NaiveDate {
        self.as_of_date
    }
}

/// Writes `records` one at a time with `upsert`. A record that fails is logged
/// and skipped; returns how many were written.
pub(crate) async fn save_each<'a, T, F, Fut>(table: &str, records: &'a [T], mut upsert: F) -> usize
where
    T: Keyed,
    F: FnMut(&'a T) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut saved: usize = 0;
    for record in records {
        match upsert(record).await {
            Ok(()) => saved += 1,
            Err(err) => tracing::warn!(
                table,
                symbol = %record.symbol(),
                as_of_date = %record.as_of_date(),
                error = %format!("{err:#}"),
                "save failed; skipping record"
            ),
        }
    }
    saved
}
