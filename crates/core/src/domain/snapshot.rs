use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Provider-native descriptive and financial fields, keyed by provider field name.
pub type Fields = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// What the market-data provider knows about one symbol for this run.
///
/// Cached snapshots are shared read-only; enrichment builds a
/// [`StockAnalysis`](crate::domain::analysis::StockAnalysis) instead of mutating them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub history: Vec<PriceBar>,
    pub fields: Fields,
}

impl MarketSnapshot {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Non-empty text value of `name`.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Finite numeric value of `name`. Text, null and NaN collapse to `None`.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields
            .get(name)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
    }

    pub fn industry(&self) -> Option<&str> {
        self.text("industry")
    }

    pub fn sector(&self) -> Option<&str> {
        self.text("sector")
    }

    /// Provider's previous close, falling back to the last bar of the history.
    pub fn previous_close(&self) -> Option<f64> {
        self.number("previousClose")
            .or_else(|| self.history.last().map(|bar| bar.close))
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(fields: Value) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "AAPL".to_string(),
            history: vec![],
            fields: serde_json::from_value(fields).unwrap(),
        }
    }

    #[test]
    fn number_ignores_text_and_null() {
        let s = snapshot(json!({"a": 1.5, "b": "1.5", "c": null}));
        assert_eq!(s.number("a"), Some(1.5));
        assert_eq!(s.number("b"), None);
        assert_eq!(s.number("c"), None);
        assert_eq!(s.number("missing"), None);
    }

    #[test]
    fn blank_industry_is_treated_as_missing() {
        let s = snapshot(json!({"industry": "  ", "sector": "Technology"}));
        assert_eq!(s.industry(), None);
        assert_eq!(s.sector(), Some("Technology"));
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round2(12.345_6), 12.35);
        assert_eq!(round2(-0.004), -0.0);
        assert_eq!(round2(20.0), 20.0);
    }
}
