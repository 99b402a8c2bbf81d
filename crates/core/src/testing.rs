//! In-memory collaborators for unit tests.

use crate::domain::contract::{PortfolioAllocation, RankingResponse};
use crate::domain::snapshot::{Fields, PriceBar};
use crate::domain::symbol::SymbolDescriptor;
use crate::error::{ErrorKind, Service, ServiceError};
use crate::llm::{LlmClient, PortfolioInput, RankingInput};
use crate::market::provider::MarketDataProvider;
use crate::search::SearchAgent;
use anyhow::Result;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct FakeMarketData {
    constituents: Vec<SymbolDescriptor>,
    descriptors: HashMap<String, Fields>,
    earnings: HashMap<String, Vec<NaiveDate>>,
    failing: HashSet<String>,
    history_calls: Mutex<HashMap<String, usize>>,
    descriptor_calls: Mutex<HashMap<String, usize>>,
    earnings_calls: Mutex<HashMap<String, usize>>,
}

impl FakeMarketData {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_stock(mut self, symbol: &str, name: &str, fields: Value) -> Self {
        self.constituents.push(SymbolDescriptor::stock(symbol, name));
        let fields: Fields = serde_json::from_value(fields).unwrap_or_default();
        self.descriptors.insert(symbol.to_string(), fields);
        self
    }

    pub(crate) fn with_earnings(mut self, symbol: &str, dates: Vec<NaiveDate>) -> Self {
        self.earnings.insert(symbol.to_string(), dates);
        self
    }

    pub(crate) fn with_failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    pub(crate) fn history_calls(&self, symbol: &str) -> usize {
        Self::calls(&self.history_calls, symbol)
    }

    pub(crate) fn descriptor_calls(&self, symbol: &str) -> usize {
        Self::calls(&self.descriptor_calls, symbol)
    }

    pub(crate) fn earnings_calls(&self, symbol: &str) -> usize {
        Self::calls(&self.earnings_calls, symbol)
    }

    fn calls(counter: &Mutex<HashMap<String, usize>>, symbol: &str) -> usize {
        counter.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }

    fn record_call(counter: &Mutex<HashMap<String, usize>>, symbol: &str) {
        *counter.lock().unwrap().entry(symbol.to_string()).or_default() += 1;
    }

    fn not_found(symbol: &str) -> anyhow::Error {
        ServiceError::new(
            Service::MarketData,
            ErrorKind::NotFound,
            format!("unknown symbol {symbol}"),
        )
        .into()
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for FakeMarketData {
    fn provider_name(&self) -> &'static str {
        "fake"
    }

    async fn list_constituents(&self, _indexes: &[String]) -> Result<Vec<SymbolDescriptor>> {
        Ok(self.constituents.clone())
    }

    async fn history(
        &self,
        symbol: &str,
        _start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        Self::record_call(&self.history_calls, symbol);
        if self.failing.contains(symbol) {
            return Err(Self::not_found(symbol));
        }
        Ok(vec![PriceBar {
            date: end,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: None,
        }])
    }

    async fn descriptor(&self, symbol: &str) -> Result<Fields> {
        Self::record_call(&self.descriptor_calls, symbol);
        if self.failing.contains(symbol) {
            return Err(Self::not_found(symbol));
        }
        self.descriptors
            .get(symbol)
            .cloned()
            .ok_or_else(|| Self::not_found(symbol))
    }

    async fn earnings_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>> {
        Self::record_call(&self.earnings_calls, symbol);
        self.earnings
            .get(symbol)
            .cloned()
            .ok_or_else(|| Self::not_found(symbol))
    }
}

type RankFn = Box<dyn Fn(&RankingInput) -> Result<RankingResponse> + Send + Sync>;

pub(crate) struct FakeLlm {
    rank: RankFn,
    allocations: Vec<PortfolioAllocation>,
    pub(crate) ranking_inputs: Mutex<Vec<RankingInput>>,
    pub(crate) portfolio_inputs: Mutex<Vec<PortfolioInput>>,
}

impl FakeLlm {
    /// Ranks candidates in reverse submission order.
    pub(crate) fn reversing() -> Self {
        Self::with_rank_fn(|input| {
            let n = input.candidates.len();
            let items = input
                .candidates
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    serde_json::json!({
                        "symbol": c["symbol"],
                        "rank": n - i,
                        "explanation": "peer comparison",
                        "investment_decision": "hold",
                    })
                })
                .collect();
            Ok(RankingResponse::from_list(items))
        })
    }

    pub(crate) fn with_rank_fn(
        f: impl Fn(&RankingInput) -> Result<RankingResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rank: Box::new(f),
            allocations: Vec::new(),
            ranking_inputs: Mutex::new(Vec::new()),
            portfolio_inputs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_allocations(mut self, allocations: Vec<PortfolioAllocation>) -> Self {
        self.allocations = allocations;
        self
    }

    pub(crate) fn ranking_calls(&self) -> usize {
        self.ranking_inputs.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl LlmClient for FakeLlm {
    async fn rank_industry(&self, input: RankingInput) -> Result<RankingResponse> {
        let out = (self.rank)(&input);
        self.ranking_inputs.lock().unwrap().push(input);
        out
    }

    async fn allocate_portfolio(&self, input: PortfolioInput) -> Result<Vec<PortfolioAllocation>> {
        self.portfolio_inputs.lock().unwrap().push(input);
        Ok(self.allocations.clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeSearch {
    pub(crate) queries: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl SearchAgent for FakeSearch {
    async fn query(&self, text: &str) -> String {
        self.queries.lock().unwrap().push(text.to_string());
        format!("results for: {text}")
    }
}
