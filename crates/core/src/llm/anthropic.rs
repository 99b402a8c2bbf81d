use crate::config::Settings;
use crate::domain::contract::{PortfolioAllocation, RankingResponse};
use crate::error::{Service, ServiceError};
use crate::llm::json;
use crate::llm::{LlmClient, PortfolioInput, RankingInput};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 2500;
const DEFAULT_TIMEOUT_SECS: u64 = 15 * 60;

const TOOL_NAME_EMIT_RANKINGS: &str = "emit_rankings";
const TOOL_NAME_EMIT_PORTFOLIO: &str = "emit_portfolio";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

/// What came back from one forced-tool request.
#[derive(Debug, Clone, PartialEq)]
enum StructuredOutput {
    List(Vec<Value>),
    Text(String),
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: &CreateMessageRequest,
    ) -> anyhow::Result<CreateMessageResponse> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .map_err(|err| ServiceError::from_reqwest(Service::Ranking, &err))
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|err| ServiceError::from_reqwest(Service::Ranking, &err))
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            return Err(ServiceError::from_status(Service::Ranking, status, &text).into());
        }

        serde_json::from_str::<CreateMessageResponse>(&text)
            .with_context(|| format!("failed to decode Anthropic response: {text}"))
    }

    /// Sends one forced-tool request and returns the tool's list, or the text
    /// blocks when the model answered in prose.
    async fn structured_call(
        &self,
        system: String,
        user: String,
        tool: Tool,
        list_key: &str,
    ) -> anyhow::Result<StructuredOutput> {
        let tool_name = tool.name;
        let mut req = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system: Some(system),
            messages: vec![Message {
                role: "user",
                content: user,
            }],
            tools: Some(vec![tool]),
            tool_choice: Some(ToolChoice::Tool { name: tool_name }),
        };

        let mut res = self.create_message(&req).await?;

        // If the model hit max_tokens, retry once with a higher ceiling.
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.max_tokens.saturating_mul(2).max(4096);
            tracing::warn!(
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            req.max_tokens = bumped;
            res = self.create_message(&req).await?;
        }

        if let Some(input) = Self::tool_input(&res, tool_name) {
            if let Some(items) = json::list_in(input.clone()).or_else(|| match input.get(list_key) {
                Some(Value::String(s)) => json::parse_list(s),
                _ => None,
            }) {
                return Ok(StructuredOutput::List(items));
            }
            tracing::warn!(tool = tool_name, "tool input has no list; falling back to text");
        }

        Ok(StructuredOutput::Text(Self::response_text(&res)))
    }

    fn tool_input(res: &CreateMessageResponse, tool_name: &str) -> Option<Value> {
        res.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. } if name == tool_name => Some(input.clone()),
            _ => None,
        })
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn rankings_tool() -> Tool {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["rankings"],
            "properties": {
                "rankings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["symbol", "rank", "explanation", "investment_decision"],
                        "properties": {
                            "symbol": {"type": "string"},
                            "rank": {"type": ["integer", "null"]},
                            "explanation": {"type": "string"},
                            "investment_decision": {"type": "string"}
                        }
                    }
                }
            }
        });

        Tool {
            name: TOOL_NAME_EMIT_RANKINGS,
            description: "Emit the ranking of every candidate stock of the industry",
            input_schema: schema,
        }
    }

    fn portfolio_tool() -> Tool {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["allocations"],
            "properties": {
                "allocations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["symbol", "name", "number_of_shares_to_buy"],
                        "properties": {
                            "symbol": {"type": "string"},
                            "name": {"type": "string"},
                            "number_of_shares_to_buy": {"type": "integer"}
                        }
                    }
                }
            }
        });

        Tool {
            name: TOOL_NAME_EMIT_PORTFOLIO,
            description: "Emit the portfolio positions to hold",
            input_schema: schema,
        }
    }

    fn ranking_system_prompt(industry: &str, as_of_date: chrono::NaiveDate) -> String {
        format!(
            "You are an equity analyst covering the {industry} industry. Today is {as_of_date}.\n\
             Rank every candidate against its industry peers, 1 being the most attractive.\n\
             Fields named industryAverage* are peer averages for the field of the same name.\n\
             StockNews holds recent web research about the company.\n\
             For each candidate return symbol, rank, a short explanation and an \
             investment_decision (buy, hold or sell).\n\
             Use only the provided symbols."
        )
    }

    fn portfolio_system_prompt(as_of_date: chrono::NaiveDate) -> String {
        format!(
            "You are a portfolio manager. Today is {as_of_date}.\n\
             Build the portfolio to hold from the ranked stocks and the general market sentiment.\n\
             Return symbol, name and number_of_shares_to_buy for every position.\n\
             Use only the provided symbols."
        )
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn rank_industry(&self, input: RankingInput) -> anyhow::Result<RankingResponse> {
        let system = Self::ranking_system_prompt(&input.industry, input.as_of_date);
        let user = format!("Candidates JSON:\n{}", input.candidates_json());

        let out = self
            .structured_call(system, user, Self::rankings_tool(), "rankings")
            .await
            .with_context(|| format!("ranking request failed for industry {}", input.industry))?;

        Ok(match out {
            StructuredOutput::List(items) => RankingResponse::from_list(items),
            StructuredOutput::Text(text) => json::parse_rankings(&text),
        })
    }

    async fn allocate_portfolio(
        &self,
        input: PortfolioInput,
    ) -> anyhow::Result<Vec<PortfolioAllocation>> {
        let system = Self::portfolio_system_prompt(input.as_of_date);
        let user = format!("Data JSON:\n{}", input.data_json());

        let out = self
            .structured_call(system, user, Self::portfolio_tool(), "allocations")
            .await
            .context("portfolio request failed")?;

        match out {
            StructuredOutput::List(items) => Ok(json::decode_allocations(items)),
            StructuredOutput::Text(text) => json::parse_allocations(&text),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn response(v: Value) -> CreateMessageResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn reads_tool_use_input_and_ignores_other_blocks() {
        let res = response(json!({
            "content": [
                {"type": "thinking", "thinking": "...", "signature": "x"},
                {"type": "tool_use", "id": "toolu_1", "name": "emit_rankings",
                 "input": {"rankings": [{"symbol": "NVDA", "rank": 1}]}}
            ],
            "stop_reason": "tool_use"
        }));

        let input = AnthropicClient::tool_input(&res, TOOL_NAME_EMIT_RANKINGS).unwrap();
        let items = json::list_in(input).unwrap();
        assert_eq!(items.len(), 1);
        assert!(AnthropicClient::tool_input(&res, TOOL_NAME_EMIT_PORTFOLIO).is_none());
    }

    #[test]
    fn joins_text_blocks() {
        let res = response(json!({
            "content": [
                {"type": "text", "text": "[{\"symbol\": \"A\","},
                {"type": "text", "text": "\"rank\": 2}]"}
            ]
        }));
        let text = AnthropicClient::response_text(&res);
        let parsed = json::parse_rankings(&text);
        assert_eq!(parsed.results()[0].rank, json!(2));
    }

    #[test]
    fn ranking_prompt_names_industry_and_date() {
        let prompt = AnthropicClient::ranking_system_prompt(
            "Semiconductors",
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        );
        assert!(prompt.contains("Semiconductors"));
        assert!(prompt.contains("2026-03-02"));
    }

    #[test]
    fn request_serializes_forced_tool_choice() {
        let req = CreateMessageRequest {
            model: "m".to_string(),
            max_tokens: 10,
            temperature: 0.0,
            system: None,
            messages: vec![],
            tools: Some(vec![AnthropicClient::rankings_tool()]),
            tool_choice: Some(ToolChoice::Tool {
                name: TOOL_NAME_EMIT_RANKINGS,
            }),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["tool_choice"], json!({"type": "tool", "name": "emit_rankings"}));
        assert!(v.get("system").is_none());
        assert_eq!(v["tools"][0]["name"], json!("emit_rankings"));
    }
}
