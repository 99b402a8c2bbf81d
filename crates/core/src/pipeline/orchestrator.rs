use crate::config::RunOptions;
use crate::domain::analysis::{Rank, RankingOutcome, StockAnalysis};
use crate::domain::contract::{RankingResponse, RankingResult};
use crate::domain::snapshot::{round2, Fields, MarketSnapshot};
use crate::domain::symbol::SymbolDescriptor;
use crate::llm::{LlmClient, RankingInput};
use crate::market::cache::{last_earnings_date, SnapshotCache};
use crate::market::index::{Grouping, IndustryIndex};
use crate::market::peer::{average_field_name, PeerAggregator};
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::search::{stock_news_query, SearchAgent};
use crate::storage::AnalysisStore;
use anyhow::Context;
use chrono::NaiveDate;
use serde_json::Value;

/// Financial parameters averaged across each industry.
pub const TRACKED_PARAMETERS: [&str; 21] = [
    "trailingPE",
    "forwardPE",
    "averageVolume",
    "trailingAnnualDividendRate",
    "profitMargins",
    "shortRatio",
    "shortPercentOfFloat",
    "bookValue",
    "trailingEps",
    "forwardEps",
    "ebitda",
    "totalDebt",
    "totalRevenue",
    "debtToEquity",
    "freeCashflow",
    "earningsGrowth",
    "revenueGrowth",
    "operatingMargins",
    "pegRatio",
    "grossMargins",
    "ebitdaMargins",
];

/// Provider fields that only inflate the ranking payload.
pub const UNUSED_FIELDS: [&str; 18] = [
    "address1",
    "address2",
    "city",
    "state",
    "zip",
    "country",
    "phone",
    "fax",
    "website",
    "industry",
    "industryKey",
    "industryDisp",
    "sector",
    "sectorKey",
    "sectorDisp",
    "longBusinessSummary",
    "fullTimeEmployees",
    "companyOfficers",
];

pub struct RankingOrchestrator<'a> {
    cache: &'a SnapshotCache,
    index: &'a IndustryIndex,
    llm: &'a dyn LlmClient,
    search: &'a dyn SearchAgent,
    store: &'a dyn AnalysisStore,
    as_of_date: NaiveDate,
}

impl<'a> RankingOrchestrator<'a> {
    pub fn new(
        cache: &'a SnapshotCache,
        index: &'a IndustryIndex,
        llm: &'a dyn LlmClient,
        search: &'a dyn SearchAgent,
        store: &'a dyn AnalysisStore,
        as_of_date: NaiveDate,
    ) -> Self {
        Self {
            cache,
            index,
            llm,
            search,
            store,
            as_of_date,
        }
    }

    /// Enriches, ranks, orders and persists one industry. Returns the number of
    /// records written.
    pub async fn rank_industry(
        &self,
        industry: &str,
        members: &[SymbolDescriptor],
    ) -> anyhow::Result<usize> {
        let mut candidates = Vec::with_capacity(members.len());
        for member in members {
            candidates.push(self.enrich(member).await);
        }

        let input = RankingInput {
            industry: industry.to_string(),
            as_of_date: self.as_of_date,
            candidates: candidates.iter().map(StockAnalysis::candidate_json).collect(),
        };
        let response = self.llm.rank_industry(input).await?;
        if let RankingResponse::Raw(text) = &response {
            tracing::warn!(
                %industry,
                raw_len = text.len(),
                "ranking service returned unstructured output; all candidates unranked"
            );
        }

        let matched = merge_rankings(&mut candidates, response.results());
        let sorted = sort_by_rank(candidates);

        let records: Vec<_> = sorted
            .into_iter()
            .map(|candidate| candidate.into_record(industry, self.as_of_date))
            .collect();
        let saved = self
            .store
            .save_stock_analysis(&records)
            .await
            .with_context(|| format!("saving stock analysis for {industry} failed"))?;

        tracing::info!(
            %industry,
            as_of_date = %self.as_of_date,
            candidates = records.len(),
            matched,
            saved,
            "industry ranked"
        );
        Ok(saved)
    }

    /// Builds one candidate. Never fails: anything unavailable is left out and the
    /// candidate is submitted with what is known.
    async fn enrich(&self, member: &SymbolDescriptor) -> StockAnalysis {
        let snapshot = match self.cache.snapshot(&member.symbol).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(
                    symbol = %member.symbol,
                    error = %err,
                    "snapshot unavailable; submitting partial candidate"
                );
                None
            }
        };

        let mut fields = snapshot
            .as_deref()
            .map(|s| strip_unused_fields(&s.fields))
            .unwrap_or_default();
        if let Some(close) = snapshot.as_deref().and_then(MarketSnapshot::previous_close) {
            fields.insert("previousClose".to_string(), Value::from(close));
        }

        let peers = PeerAggregator::new(self.cache, self.index);
        for parameter in TRACKED_PARAMETERS {
            let own = snapshot
                .as_deref()
                .and_then(|s| s.number(parameter))
                .map(round2);
            fields.insert(
                parameter.to_string(),
                own.map(Value::from).unwrap_or(Value::Null),
            );

            if let Some(avg) = peers
                .peer_average(&member.symbol, Grouping::Industry, parameter)
                .await
            {
                fields.insert(average_field_name(Grouping::Industry, parameter), Value::from(avg));
            }
        }

        if let Some(dates) = self.cache.earnings_dates(&member.symbol).await {
            if let Some(last) = last_earnings_date(&dates, self.as_of_date) {
                fields.insert("lastEarningsDate".to_string(), Value::String(last.to_string()));
            }
        }

        let mut analysis = StockAnalysis::new(member.symbol.clone(), member.name.clone(), fields);
        let news = self.search.query(&stock_news_query(&member.name)).await;
        analysis.stock_news = Some(news).filter(|n| !n.trim().is_empty());
        analysis
    }
}

pub fn strip_unused_fields(fields: &Fields) -> Fields {
    fields
        .iter()
        .filter(|(k, _)| !UNUSED_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Copies each result onto the candidate with the same symbol. Returns how many
/// candidates were matched.
pub fn merge_rankings(candidates: &mut [StockAnalysis], results: &[RankingResult]) -> usize {
    for result in results {
        let Some(symbol) = result.symbol.as_deref().map(str::trim) else {
            continue;
        };
        for candidate in candidates.iter_mut().filter(|c| c.symbol == symbol) {
            candidate.ranking = Some(RankingOutcome {
                rank: Rank::normalize(&result.rank),
                explanation: result.explanation_text(),
                investment_decision: result.investment_decision_text(),
            });
        }
    }
    candidates.iter().filter(|c| c.ranking.is_some()).count()
}

/// Stable ascending sort by rank, unranked entries as the sentinel. If any rank
/// cannot be ordered the submission order is returned unchanged.
pub fn sort_by_rank(candidates: Vec<StockAnalysis>) -> Vec<StockAnalysis> {
    let keys: Result<Vec<f64>, String> = candidates
        .iter()
        .map(|c| c.sort_rank().map_err(str::to_string))
        .collect();

    match keys {
        Ok(keys) => {
            let mut keyed: Vec<(f64, StockAnalysis)> = keys.into_iter().zip(candidates).collect();
            keyed.sort_by(|(a, _), (b, _)| a.total_cmp(b));
            keyed.into_iter().map(|(_, c)| c).collect()
        }
        Err(raw) => {
            tracing::warn!(rank = %raw, "rank is not orderable; keeping submission order");
            candidates
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub industries_ranked: usize,
    pub industries_failed: usize,
    pub industries_skipped: usize,
    pub records_saved: usize,
}

/// The ranking run: resolve the universe, index it, then rank every large enough
/// industry one at a time.
///
/// Only universe resolution can fail the run; each industry runs under the retry
/// policy and is given up on quietly.
pub async fn run_stock_analysis(
    cache: &SnapshotCache,
    llm: &dyn LlmClient,
    search: &dyn SearchAgent,
    store: &dyn AnalysisStore,
    opts: &RunOptions,
) -> anyhow::Result<RunSummary> {
    let as_of_date = cache.today();
    tracing::info!(%as_of_date, "stock analysis run started");

    let universe = cache.resolve_universe().await?;
    let index = IndustryIndex::build(cache, &universe).await;

    let orchestrator = RankingOrchestrator::new(cache, &index, llm, search, store, as_of_date);
    let orchestrator = &orchestrator;
    let policy = RetryPolicy {
        max_attempts: opts.retry_max_attempts,
        delay: opts.retry_delay,
    };

    let mut summary = RunSummary::default();
    for (industry, members) in index.industries() {
        if members.len() < opts.min_industry_size {
            summary.industries_skipped += 1;
            tracing::debug!(%industry, members = members.len(), "too few peers; skipped");
            continue;
        }

        let work = move || orchestrator.rank_industry(industry, members);
        match with_retry(industry, policy, work).await {
            Some(saved) => {
                summary.industries_ranked += 1;
                summary.records_saved += saved;
            }
            None => summary.industries_failed += 1,
        }
    }

    tracing::info!(
        %as_of_date,
        ranked = summary.industries_ranked,
        failed = summary.industries_failed,
        skipped = summary.industries_skipped,
        records = summary.records_saved,
        "stock analysis run finished"
    );
    Ok(summary)
}
