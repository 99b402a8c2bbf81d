use crate::config::RunOptions;
use crate::domain::analysis::StockAnalysisRecord;
use crate::llm::{LlmClient, PortfolioInput};
use crate::market::cache::SnapshotCache;
use crate::market::index::IndustryIndex;
use crate::search::{market_sentiment_query, SearchAgent};
use crate::storage::AnalysisStore;
use anyhow::Context;
use serde_json::Value;

pub const SENTIMENT_REGIONS: [&str; 3] = ["US", "EU", "China"];

/// The portfolio run. Reads the day's ranked analyses, asks for an allocation and
/// saves it. Returns the number of holdings written.
pub async fn run_portfolio(
    cache: &SnapshotCache,
    llm: &dyn LlmClient,
    search: &dyn SearchAgent,
    store: &dyn AnalysisStore,
    opts: &RunOptions,
    reset: bool,
) -> anyhow::Result<usize> {
    let as_of_date = cache.today();
    tracing::info!(%as_of_date, reset, "portfolio run started");

    let universe = cache.resolve_universe().await?;
    let index = IndustryIndex::build(cache, &universe).await;
    let symbols: Vec<String> = index
        .rankable_industries(opts.min_industry_size)
        .flat_map(|(_, members)| members.iter().map(|m| m.symbol.clone()))
        .collect();

    let market_sentiment = market_sentiment(search).await;

    let analyses = store
        .get_stock_analysis(&symbols, as_of_date)
        .await
        .context("loading stock analysis failed")?;
    if analyses.is_empty() {
        tracing::warn!(
            %as_of_date,
            symbols = symbols.len(),
            "no stock analysis for date; nothing to allocate"
        );
        return Ok(0);
    }

    let current_portfolio = store
        .get_portfolio()
        .await
        .context("loading current portfolio failed")?
        .into_iter()
        .map(|holding| serde_json::to_value(holding).unwrap_or(Value::Null))
        .collect();

    let input = PortfolioInput {
        as_of_date,
        market_sentiment,
        stocks: analyses.iter().map(portfolio_view).collect(),
        current_portfolio,
    };
    let allocations = llm.allocate_portfolio(input).await?;

    if reset {
        let removed = store
            .delete_portfolio()
            .await
            .context("deleting portfolio failed")?;
        tracing::info!(removed, "previous portfolio deleted");
    }

    let saved = store
        .save_portfolio(&allocations, as_of_date)
        .await
        .context("saving portfolio failed")?;
    tracing::info!(%as_of_date, allocations = allocations.len(), saved, "portfolio run finished");
    Ok(saved)
}

async fn market_sentiment(search: &dyn SearchAgent) -> String {
    let mut parts = Vec::with_capacity(SENTIMENT_REGIONS.len());
    for region in SENTIMENT_REGIONS {
        parts.push(search.query(&market_sentiment_query(region)).await);
    }
    parts.join("; ")
}

/// A persisted analysis as shown to the allocator, without the news text.
fn portfolio_view(record: &StockAnalysisRecord) -> Value {
    let mut view = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Value::Object(obj) = &mut view {
        obj.remove("stock_news");
        if let Some(Value::Object(details)) = obj.get_mut("details") {
            details.remove("StockNews");
        }
    }
    view
}
