use crate::config::Settings;
use crate::domain::snapshot::{Fields, PriceBar};
use crate::domain::symbol::SymbolDescriptor;
use crate::error::{ErrorKind, Service, ServiceError};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Constituents of the named indexes, in listing order.
    async fn list_constituents(&self, indexes: &[String]) -> Result<Vec<SymbolDescriptor>>;

    async fn history(&self, symbol: &str, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<PriceBar>>;

    /// Descriptive and financial fields (`industry`, `sector`, `trailingPE`, ...).
    async fn descriptor(&self, symbol: &str) -> Result<Fields>;

    async fn earnings_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonMarketData {
    http: reqwest::Client,
    base_url: reqwest::Url,
    api_key: Option<String>,
    retries: u32,
}

#[derive(Debug, Deserialize)]
struct ConstituentsResponse {
    #[serde(default)]
    items: Vec<SymbolDescriptor>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    bars: Vec<PriceBar>,
}

#[derive(Debug, Deserialize)]
struct EarningsResponse {
    #[serde(default)]
    dates: Vec<NaiveDate>,
}

impl HttpJsonMarketData {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = reqwest::Url::parse(settings.require_data_provider_base_url()?)
            .context("DATA_PROVIDER_BASE_URL is not a valid URL")?;
        anyhow::ensure!(
            !base_url.cannot_be_a_base(),
            "DATA_PROVIDER_BASE_URL must be an http(s) base URL"
        );
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs = std::env::var("DATA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("DATA_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
        })
    }

    fn url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &reqwest::Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        let res = self
            .http
            .get(url.clone())
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .map_err(|err| ServiceError::from_reqwest(Service::MarketData, &err))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|err| ServiceError::from_reqwest(Service::MarketData, &err))?;

        if !status.is_success() {
            return Err(ServiceError::from_status(Service::MarketData, status, &text).into());
        }

        serde_json::from_str::<T>(&text).map_err(|err| {
            ServiceError::new(Service::MarketData, ErrorKind::Malformed, err.to_string())
                .with_raw_output(text)
                .into()
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: reqwest::Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once::<T>(&url, query).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt >= self.retries || !crate::error::is_transient(&err) {
                        return Err(err).with_context(|| format!("GET {url} failed"));
                    }
                    let backoff = backoff_for(attempt);
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        %url,
                        error = %err,
                        "data provider fetch failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Exponential backoff after failed `attempt` (1-based), capped at 64s.
fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(6))
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonMarketData {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn list_constituents(&self, indexes: &[String]) -> Result<Vec<SymbolDescriptor>> {
        let mut out = Vec::new();
        for index in indexes {
            let resp: ConstituentsResponse = self
                .get_json(self.url(&["v1", "constituents"]), &[("index", index.clone())])
                .await?;
            tracing::debug!(%index, constituents = resp.items.len(), "index constituents fetched");
            out.extend(resp.items.into_iter().filter(|d| !d.symbol.trim().is_empty()));
        }
        Ok(out)
    }

    async fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let resp: HistoryResponse = self
            .get_json(
                self.url(&["v1", "history", symbol]),
                &[
                    ("start", start.to_string()),
                    ("end", end.to_string()),
                    ("interval", "1d".to_string()),
                ],
            )
            .await?;
        Ok(resp.bars)
    }

    async fn descriptor(&self, symbol: &str) -> Result<Fields> {
        self.get_json(self.url(&["v1", "descriptor", symbol]), &[])
            .await
    }

    async fn earnings_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>> {
        let resp: EarningsResponse = self
            .get_json(self.url(&["v1", "earnings", symbol]), &[])
            .await?;
        Ok(resp.dates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> HttpJsonMarketData {
        HttpJsonMarketData {
            http: reqwest::Client::new(),
            base_url: reqwest::Url::parse(base).unwrap(),
            api_key: None,
            retries: 1,
        }
    }

    #[test]
    fn encodes_symbols_as_path_segments() {
        let c = client("https://data.example.com/api/");
        let url = c.url(&["v1", "descriptor", "AAPL"]);
        assert_eq!(url.as_str(), "https://data.example.com/api/v1/descriptor/AAPL");

        let c = client("https://data.example.com");
        let url = c.url(&["v1", "history", "BRK/B"]);
        assert_eq!(url.as_str(), "https://data.example.com/v1/history/BRK%2FB");
    }

    #[test]
    fn parses_history_and_constituent_shapes() {
        let v = json!({
            "bars": [
                {
                    "date": "2026-03-02",
                    "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5,
                    "volume": 1000.0
                },
                {"date": "2026-03-03", "open": 1.5, "high": 2.5, "low": 1.0, "close": 2.0}
            ]
        });
        let parsed: HistoryResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.bars.len(), 2);
        assert_eq!(parsed.bars[1].volume, None);

        let v = json!({"items": [{"symbol": "AAPL", "name": "Apple"}]});
        let parsed: ConstituentsResponse = serde_json::from_value(v).unwrap();
        assert!(!parsed.items[0].is_index);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(3), Duration::from_secs(4));
        assert_eq!(backoff_for(7), Duration::from_secs(64));
        assert_eq!(backoff_for(200), Duration::from_secs(64));
    }
}
