use crate::domain::analysis::StockAnalysisRecord;
use crate::domain::contract::{PortfolioAllocation, PortfolioRecord};
use crate::error::{ErrorKind, Service, ServiceError};
use crate::storage::{save_each, AnalysisStore};
use anyhow::Context;
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

type StockAnalysisRow = (
    String,
    NaiveDate,
    String,
    Option<String>,
    Option<f64>,
    Option<f64>,
    Option<String>,
    Option<String>,
    Option<String>,
    serde_json::Value,
);

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_stock_analysis(&self, record: &StockAnalysisRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO stock_analysis \
               (symbol, as_of_date, industry, name, close, rank, \
                stock_news, investment_decision, explanation, details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (symbol, as_of_date) DO UPDATE SET \
               industry = EXCLUDED.industry, \
               name = EXCLUDED.name, \
               close = EXCLUDED.close, \
               rank = EXCLUDED.rank, \
               stock_news = EXCLUDED.stock_news, \
               investment_decision = EXCLUDED.investment_decision, \
               explanation = EXCLUDED.explanation, \
               details = EXCLUDED.details, \
               updated_at = now()",
        )
        .persistent(false)
        .bind(&record.symbol)
        .bind(record.as_of_date)
        .bind(&record.industry)
        .bind(&record.name)
        .bind(record.close)
        .bind(record.rank)
        .bind(&record.stock_news)
        .bind(&record.investment_decision)
        .bind(&record.explanation)
        .bind(&record.details)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn upsert_portfolio(&self, record: &PortfolioRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO portfolio (symbol, as_of_date, name, number_of_shares_to_buy) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (symbol, as_of_date) DO UPDATE SET \
               name = EXCLUDED.name, \
               number_of_shares_to_buy = EXCLUDED.number_of_shares_to_buy, \
               updated_at = now()",
        )
        .persistent(false)
        .bind(&record.symbol)
        .bind(record.as_of_date)
        .bind(&record.name)
        .bind(record.number_of_shares_to_buy)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AnalysisStore for PgStore {
    async fn save_stock_analysis(&self, records: &[StockAnalysisRecord]) -> anyhow::Result<usize> {
        Ok(save_each("stock_analysis", records, |record| self.upsert_stock_analysis(record)).await)
    }

    async fn get_stock_analysis(
        &self,
        symbols: &[String],
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Vec<StockAnalysisRecord>> {
        let rows = sqlx::query_as::<_, StockAnalysisRow>(
            "SELECT symbol, as_of_date, industry, name, close, rank, \
                    stock_news, investment_decision, explanation, details \
             FROM stock_analysis \
             WHERE as_of_date = $1 AND symbol = ANY($2) \
             ORDER BY industry ASC, rank ASC NULLS LAST, symbol ASC",
        )
        .persistent(false)
        .bind(as_of_date)
        .bind(symbols)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)
        .context("select stock_analysis failed")?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    symbol,
                    as_of_date,
                    industry,
                    name,
                    close,
                    rank,
                    stock_news,
                    investment_decision,
                    explanation,
                    details,
                )| {
                    StockAnalysisRecord {
                        symbol,
                        as_of_date,
                        industry,
                        name,
                        close,
                        rank,
                        stock_news,
                        investment_decision,
                        explanation,
                        details,
                    }
                },
            )
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
        Ok(save_each("portfolio", &records, |record| self.upsert_portfolio(record)).await)
    }

    async fn get_portfolio(&self) -> anyhow::Result<Vec<PortfolioRecord>> {
        let rows = sqlx::query_as::<_, (String, NaiveDate, String, i64)>(
            "SELECT symbol, as_of_date, name, number_of_shares_to_buy \
             FROM portfolio \
             ORDER BY as_of_date DESC, symbol ASC",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)
        .context("select portfolio failed")?;

        Ok(rows
            .into_iter()
            .map(|(symbol, as_of_date, name, number_of_shares_to_buy)| PortfolioRecord {
                symbol,
                as_of_date,
                name,
                number_of_shares_to_buy,
            })
            .collect())
    }

    async fn delete_portfolio(&self) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM portfolio")
            .persistent(false)
            .execute(&self.pool)
            .await
            .map_err(storage_error)
            .context("delete portfolio failed")?;
        Ok(res.rows_affected())
    }
}

fn storage_error(err: sqlx::Error) -> ServiceError {
    let kind = match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ErrorKind::Connection
        }
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => ErrorKind::Malformed,
        _ => ErrorKind::Rejected,
    };
    ServiceError::new(Service::Storage, kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_transient() {
        assert!(storage_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!storage_error(sqlx::Error::RowNotFound).is_transient());
    }
}
