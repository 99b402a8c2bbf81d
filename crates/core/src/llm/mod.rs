use crate::domain::contract::{PortfolioAllocation, RankingResponse};
use chrono::NaiveDate;
use serde_json::Value;

pub mod anthropic;
pub mod json;

#[derive(Debug, Clone)]
pub struct RankingInput {
    pub industry: String,
    pub as_of_date: NaiveDate,
    pub candidates: Vec<Value>,
}

impl RankingInput {
    pub fn candidates_json(&self) -> Value {
        serde_json::json!({ "candidates": self.candidates })
    }
}

#[derive(Debug, Clone)]
pub struct PortfolioInput {
    pub as_of_date: NaiveDate,
    pub market_sentiment: String,
    pub stocks: Vec<Value>,
    pub current_portfolio: Vec<Value>,
}

impl PortfolioInput {
    pub fn data_json(&self) -> Value {
        serde_json::json!({
            "general_market_sentiment": self.market_sentiment,
            "stocks": self.stocks,
            "current_portfolio": self.current_portfolio,
        })
    }
}

/// The generative service that scores candidates and proposes allocations.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn rank_industry(&self, input: RankingInput) -> anyhow::Result<RankingResponse>;

    async fn allocate_portfolio(
        &self,
        input: PortfolioInput,
    ) -> anyhow::Result<Vec<PortfolioAllocation>>;
}
