use crate::domain::contract::{PortfolioAllocation, RankingResponse};
use anyhow::Context;
use serde_json::Value;

/// Keys under which a model sometimes nests the list it was asked for.
const LIST_KEYS: [&str; 4] = ["rankings", "allocations", "items", "stocks"];

pub fn extract_json_list(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let mut inner = trimmed;
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
    }

    // Best-effort extraction: first '[' to last ']'.
    let start = inner.find('[')?;
    let end = inner.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(inner[start..=end].trim().to_string())
}

/// A JSON list from model output: the whole text, a list nested under a known key,
/// or the bracket-delimited part of surrounding prose.
pub fn parse_list(text: &str) -> Option<Vec<Value>> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        if let Some(items) = list_in(v) {
            return Some(items);
        }
    }

    let candidate = extract_json_list(text)?;
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

pub fn list_in(v: Value) -> Option<Vec<Value>> {
    match v {
        Value::Array(items) => Some(items),
        Value::Object(mut obj) => LIST_KEYS
            .iter()
            .find_map(|key| match obj.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }),
        _ => None,
    }
}

/// Structured rankings when a list can be recovered, otherwise the raw text.
pub fn parse_rankings(text: &str) -> RankingResponse {
    match parse_list(text) {
        Some(items) => RankingResponse::from_list(items),
        None => {
            tracing::warn!("ranking output is not a list; passing raw text through");
            RankingResponse::Raw(text.to_string())
        }
    }
}

pub fn parse_allocations(text: &str) -> anyhow::Result<Vec<PortfolioAllocation>> {
    let items = parse_list(text)
        .with_context(|| format!("portfolio output contains no JSON list: {text}"))?;
    Ok(decode_allocations(items))
}

pub fn decode_allocations(items: Vec<Value>) -> Vec<PortfolioAllocation> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<PortfolioAllocation>(item.clone()) {
            Ok(a) => Some(a),
            Err(err) => {
                tracing::warn!(%item, error = %err, "skipping undecodable allocation");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_json_list_handles_fenced_blocks() {
        let body = "[{\"symbol\":\"A\"}]";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json_list(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_list_falls_back_to_brackets() {
        let s = "Here is the ranking: [{\"symbol\":\"A\",\"rank\":1}] Hope it helps.";
        assert_eq!(
            extract_json_list(s),
            Some("[{\"symbol\":\"A\",\"rank\":1}]".to_string())
        );
        assert_eq!(extract_json_list("no list ] here ["), None);
    }

    #[test]
    fn parse_rankings_accepts_plain_nested_and_embedded_lists() {
        let plain = json!([{"symbol": "A", "rank": 1}]).to_string();
        assert_eq!(parse_rankings(&plain).results().len(), 1);

        let nested = json!({
            "rankings": [{"symbol": "A", "rank": 1}, {"symbol": "B", "rank": 2}]
        })
        .to_string();
        assert_eq!(parse_rankings(&nested).results().len(), 2);

        let prose = "Sure!\n[{\"symbol\": \"C\", \"rank\": \"N/A\"}]\nThanks";
        let parsed = parse_rankings(prose);
        assert_eq!(parsed.results()[0].symbol.as_deref(), Some("C"));
    }

    #[test]
    fn parse_rankings_passes_unparseable_text_through() {
        let text = "I am unable to rank [these stocks";
        assert_eq!(parse_rankings(text), RankingResponse::Raw(text.to_string()));
    }

    #[test]
    fn parse_allocations_skips_bad_entries() {
        let text = json!([
            {"symbol": "AAPL", "name": "Apple", "number_of_shares_to_buy": 10},
            {"symbol": "MSFT", "name": "Microsoft"}
        ])
        .to_string();
        let allocations = parse_allocations(&text).unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].number_of_shares_to_buy, 10);

        assert!(parse_allocations("nothing to see").is_err());
    }
}
