use crate::domain::snapshot::Fields;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rank assigned to entries the ranking service did not (validly) rank. Sorts last.
pub const SENTINEL_RANK: i64 = 99;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rank {
    Position(i64),
    /// A finite non-integral rank such as `2.5`. Orders between the positions.
    Fractional(f64),
    /// A value the service returned that is neither a position nor a null marker.
    Unparsed(String),
}

impl Rank {
    pub fn sentinel() -> Self {
        Rank::Position(SENTINEL_RANK)
    }

    /// Null, `"None"`, `"null"` and `"N/A"` become the sentinel; finite numbers and
    /// numeric strings become orderable ranks; anything else is kept verbatim.
    pub fn normalize(raw: &Value) -> Self {
        match raw {
            Value::Null => Self::sentinel(),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Rank::Position(i),
                None => n
                    .as_f64()
                    .map(Self::from_f64)
                    .unwrap_or_else(|| Rank::Unparsed(n.to_string())),
            },
            Value::String(s) => {
                let t = s.trim();
                if is_null_marker(t) {
                    Self::sentinel()
                } else if let Ok(n) = t.parse::<i64>() {
                    Rank::Position(n)
                } else if let Some(f) = t.parse::<f64>().ok().filter(|f| f.is_finite()) {
                    Self::from_f64(f)
                } else {
                    Rank::Unparsed(t.to_string())
                }
            }
            other => Rank::Unparsed(other.to_string()),
        }
    }

    fn from_f64(f: f64) -> Self {
        if !f.is_finite() {
            Rank::Unparsed(f.to_string())
        } else if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            Rank::Position(f as i64)
        } else {
            Rank::Fractional(f)
        }
    }

    /// Ordering key, `None` when the rank cannot be ordered.
    pub fn sort_key(&self) -> Option<f64> {
        match self {
            Rank::Position(n) => Some(*n as f64),
            Rank::Fractional(f) => Some(*f),
            Rank::Unparsed(_) => None,
        }
    }
}

fn is_null_marker(s: &str) -> bool {
    s.is_empty()
        || s.eq_ignore_ascii_case("null")
        || s.eq_ignore_ascii_case("none")
        || s.eq_ignore_ascii_case("n/a")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingOutcome {
    pub rank: Rank,
    pub explanation: String,
    pub investment_decision: String,
}

/// One candidate of an industry: trimmed provider fields plus everything the
/// pipeline derived for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAnalysis {
    pub symbol: String,
    pub name: String,
    pub fields: Fields,
    pub stock_news: Option<String>,
    pub ranking: Option<RankingOutcome>,
}

impl StockAnalysis {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, fields: Fields) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            fields,
            stock_news: None,
            ranking: None,
        }
    }

    /// Rank used for ordering. Unranked entries sort as the sentinel.
    pub fn sort_rank(&self) -> Result<f64, &str> {
        match &self.ranking {
            None => Ok(SENTINEL_RANK as f64),
            Some(outcome) => match &outcome.rank {
                Rank::Unparsed(raw) => Err(raw.as_str()),
                rank => rank.sort_key().ok_or("unorderable rank"),
            },
        }
    }

    /// Flat mapping submitted to the ranking service.
    pub fn candidate_json(&self) -> Value {
        let mut obj: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        obj.insert("symbol".to_string(), Value::String(self.symbol.clone()));
        obj.insert("name".to_string(), Value::String(self.name.clone()));
        if let Some(news) = &self.stock_news {
            obj.insert("StockNews".to_string(), Value::String(news.clone()));
        }
        Value::Object(obj)
    }

    pub fn into_record(self, industry: &str, as_of_date: NaiveDate) -> StockAnalysisRecord {
        let close = self
            .fields
            .get("previousClose")
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite());

        let mut details = self.candidate_json();
        let (rank, explanation, investment_decision) = match self.ranking {
            Some(outcome) => {
                if let Value::Object(obj) = &mut details {
                    obj.insert(
                        "rank".to_string(),
                        serde_json::to_value(&outcome.rank).unwrap_or(Value::Null),
                    );
                    obj.insert(
                        "explanation".to_string(),
                        Value::String(outcome.explanation.clone()),
                    );
                    obj.insert(
                        "investment_decision".to_string(),
                        Value::String(outcome.investment_decision.clone()),
                    );
                }
                (
                    outcome.rank.sort_key(),
                    Some(outcome.explanation),
                    Some(outcome.investment_decision),
                )
            }
            None => (None, None, None),
        };

        StockAnalysisRecord {
            symbol: self.symbol,
            as_of_date,
            industry: industry.to_string(),
            name: Some(self.name).filter(|n| !n.trim().is_empty()),
            close,
            rank,
            stock_news: self.stock_news,
            investment_decision,
            explanation,
            details,
        }
    }
}

/// Persisted row, keyed by `(symbol, as_of_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAnalysisRecord {
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub industry: String,
    pub name: Option<String>,
    pub close: Option<f64>,
    pub rank: Option<f64>,
    pub stock_news: Option<String>,
    pub investment_decision: Option<String>,
    pub explanation: Option<String>,
    /// The final enriched snapshot as submitted plus the ranking triple.
    pub details: Value,
}
