pub mod domain;
pub mod error;
pub mod llm;
pub mod market;
pub mod pipeline;
pub mod search;
pub mod storage;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub data_provider_base_url: Option<String>,
        pub data_provider_api_key: Option<String>,
        pub search_agent_url: Option<String>,
        pub search_agent_api_key: Option<String>,
        pub role: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                data_provider_base_url: std::env::var("DATA_PROVIDER_BASE_URL").ok(),
                data_provider_api_key: std::env::var("DATA_PROVIDER_API_KEY").ok(),
                search_agent_url: std::env::var("SEARCH_AGENT_URL").ok(),
                search_agent_api_key: std::env::var("SEARCH_AGENT_API_KEY").ok(),
                role: std::env::var("ROLE").ok().filter(|s| !s.trim().is_empty()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
            self.data_provider_base_url
                .as_deref()
                .context("DATA_PROVIDER_BASE_URL is required")
        }

        pub fn require_search_agent_url(&self) -> anyhow::Result<&str> {
            self.search_agent_url
                .as_deref()
                .context("SEARCH_AGENT_URL is required")
        }
    }

    #[derive(Debug, Clone)]
    pub struct RunOptions {
        /// Index names whose constituents form the universe.
        pub universe_indexes: Vec<String>,

        /// Look-back window for price history.
        pub history_days: i64,

        /// Industries with fewer members are never ranked.
        pub min_industry_size: usize,

        pub retry_max_attempts: u32,
        pub retry_delay: std::time::Duration,
    }

    impl Default for RunOptions {
        fn default() -> Self {
            Self {
                universe_indexes: vec![
                    "S&P 500".to_string(),
                    "NASDAQ 100".to_string(),
                    "EURO STOXX 50".to_string(),
                ],
                history_days: 365,
                min_industry_size: 4,
                retry_max_attempts: 3,
                retry_delay: std::time::Duration::from_secs(15 * 60),
            }
        }
    }

    impl RunOptions {
        pub fn from_env() -> Self {
            let mut out = Self::default();

            if let Ok(s) = std::env::var("UNIVERSE_INDEXES") {
                let indexes: Vec<String> = s
                    .split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect();
                if !indexes.is_empty() {
                    out.universe_indexes = indexes;
                }
            }

            if let Ok(s) = std::env::var("HISTORY_DAYS") {
                if let Ok(n) = s.parse::<i64>() {
                    out.history_days = n;
                }
            }

            if let Ok(s) = std::env::var("MIN_INDUSTRY_SIZE") {
                if let Ok(n) = s.parse::<usize>() {
                    out.min_industry_size = n;
                }
            }

            if let Ok(s) = std::env::var("RETRY_MAX_ATTEMPTS") {
                if let Ok(n) = s.parse::<u32>() {
                    out.retry_max_attempts = n.max(1);
                }
            }

            if let Ok(s) = std::env::var("RETRY_DELAY_SECS") {
                if let Ok(n) = s.parse::<u64>() {
                    out.retry_delay = std::time::Duration::from_secs(n);
                }
            }

            out
        }
    }
}
