pub mod orchestrator;
pub mod portfolio;
pub mod retry;

pub use orchestrator::{run_stock_analysis, RankingOrchestrator, RunSummary};
pub use portfolio::run_portfolio;
pub use retry::{with_retry, RetryPolicy};
