use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the ranking service's answer. Matched to candidates by symbol.
///
/// Fields stay loosely typed; the service is not trusted to respect the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub rank: Value,
    #[serde(default)]
    pub explanation: Value,
    #[serde(default)]
    pub investment_decision: Value,
}

impl RankingResult {
    pub fn explanation_text(&self) -> String {
        value_text(&self.explanation)
    }

    pub fn investment_decision_text(&self) -> String {
        value_text(&self.investment_decision)
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RankingResponse {
    Ranked(Vec<RankingResult>),
    /// Output that could not be decoded into a list; passed through unmodified.
    Raw(String),
}

impl RankingResponse {
    /// Decode a JSON list, keeping only entries that are objects.
    pub fn from_list(items: Vec<Value>) -> Self {
        let results = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RankingResult>(item) {
                Ok(r) => Some(r),
                Err(err) => {
                    tracing::debug!(error = %err, "dropping undecodable ranking entry");
                    None
                }
            })
            .collect();
        RankingResponse::Ranked(results)
    }

    pub fn results(&self) -> &[RankingResult] {
        match self {
            RankingResponse::Ranked(results) => results,
            RankingResponse::Raw(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAllocation {
    pub symbol: String,
    pub name: String,
    pub number_of_shares_to_buy: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub name: String,
    pub number_of_shares_to_buy: i64,
}

impl PortfolioAllocation {
    pub fn into_record(self, as_of_date: NaiveDate) -> PortfolioRecord {
        PortfolioRecord {
            symbol: self.symbol,
            as_of_date,
            name: self.name,
            number_of_shares_to_buy: self.number_of_shares_to_buy,
        }
    }
}
