use crate::config::Settings;
use crate::error::{Service, ServiceError};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 15 * 60;
pub const MAX_CONTENT_CHARS: usize = 22_000;

/// Free-text web research. Never fails: an unreachable agent yields empty content.
#[async_trait::async_trait]
pub trait SearchAgent: Send + Sync {
    async fn query(&self, text: &str) -> String;
}

pub fn stock_news_query(company: &str) -> String {
    format!("latest news and analyst opinions about {company}")
}

pub fn market_sentiment_query(region: &str) -> String {
    format!("current stock market sentiment in {region}")
}

#[derive(Debug, Clone)]
pub struct HttpSearchAgent {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeRequest<'a> {
    session_id: String,
    input_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    completion: Vec<CompletionChunk>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    text: String,
}

impl HttpSearchAgent {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let url = settings.require_search_agent_url()?.to_string();
        let timeout_secs = std::env::var("SEARCH_AGENT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build search agent http client")?;

        Ok(Self {
            http,
            url,
            api_key: settings.search_agent_api_key.clone(),
        })
    }

    async fn invoke(&self, text: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }

        // One agent session per query.
        let req = InvokeRequest {
            session_id: uuid::Uuid::new_v4().to_string(),
            input_text: text,
        };

        let res = self
            .http
            .post(&self.url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .map_err(|err| ServiceError::from_reqwest(Service::Search, &err))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|err| ServiceError::from_reqwest(Service::Search, &err))?;
        if !status.is_success() {
            return Err(ServiceError::from_status(Service::Search, status, &body).into());
        }

        let parsed = serde_json::from_str::<InvokeResponse>(&body)
            .context("search agent response is not valid JSON")?;
        Ok(concat_chunks(&parsed.completion))
    }
}

#[async_trait::async_trait]
impl SearchAgent for HttpSearchAgent {
    async fn query(&self, text: &str) -> String {
        match self.invoke(text).await {
            Ok(content) => truncate_chars(content, MAX_CONTENT_CHARS),
            Err(err) => {
                tracing::warn!(
                    query = %text,
                    error = %err,
                    "search agent failed; continuing without content"
                );
                String::new()
            }
        }
    }
}

fn concat_chunks(chunks: &[CompletionChunk]) -> String {
    chunks.iter().map(|c| c.text.as_str()).collect()
}

pub fn truncate_chars(mut s: String, max_chars: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max_chars) {
        s.truncate(idx);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concatenates_completion_chunks() {
        let v = json!({"completion": [{"text": "Merck beat "}, {"text": "estimates."}, {}]});
        let parsed: InvokeResponse = serde_json::from_value(v).unwrap();
        assert_eq!(concat_chunks(&parsed.completion), "Merck beat estimates.");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo".to_string(), 2), "hé");
        assert_eq!(truncate_chars("abc".to_string(), 10), "abc");
    }

    #[test]
    fn request_uses_agent_field_names() {
        let req = InvokeRequest {
            session_id: "s".to_string(),
            input_text: "Merck News",
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"sessionId": "s", "inputText": "Merck News"}));
    }

    #[test]
    fn query_templates_name_the_subject() {
        assert!(stock_news_query("NVIDIA").contains("NVIDIA"));
        assert!(market_sentiment_query("EU").ends_with("EU"));
    }
}
