use anyhow::Context;
use clap::{Parser, ValueEnum};
use peerrank_core::config::{RunOptions, Settings};
use peerrank_core::llm::anthropic::AnthropicClient;
use peerrank_core::market::cache::SnapshotCache;
use peerrank_core::market::provider::HttpJsonMarketData;
use peerrank_core::search::HttpSearchAgent;
use peerrank_core::storage::memory::MemoryStore;
use peerrank_core::storage::postgres::PgStore;
use peerrank_core::storage::AnalysisStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Rank every industry and persist the analyses.
    Ranking,
    /// Allocate a portfolio from the day's analyses.
    Portfolio,
}

impl RunMode {
    fn as_str(self) -> &'static str {
        match self {
            RunMode::Ranking => "ranking",
            RunMode::Portfolio => "portfolio",
        }
    }

    /// Mode from the deployment `ROLE`; portfolio when unset.
    fn from_role(role: Option<&str>) -> anyhow::Result<Self> {
        match role.map(str::trim) {
            None => Ok(RunMode::Portfolio),
            Some("STOCK_ANALYST") => Ok(RunMode::Ranking),
            Some("PORTFOLIO_MANAGER") => Ok(RunMode::Portfolio),
            Some(other) => anyhow::bail!(
                "unknown ROLE {other:?}; expected STOCK_ANALYST or PORTFOLIO_MANAGER"
            ),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "peerrank_worker")]
struct Args {
    /// Which run to perform. Falls back to the ROLE environment variable.
    #[arg(long, value_enum)]
    mode: Option<RunMode>,

    /// Run date (YYYY-MM-DD). Defaults to today's UTC date.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Keep results in memory instead of the database.
    #[arg(long)]
    dry_run: bool,

    /// Delete existing holdings before saving a new allocation.
    #[arg(long)]
    reset_portfolio: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    if let Err(err) = run(&settings, &args).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "run failed");
        return Err(err);
    }
    Ok(())
}

async fn run(settings: &Settings, args: &Args) -> anyhow::Result<()> {
    let mode = match args.mode {
        Some(mode) => mode,
        None => RunMode::from_role(settings.role.as_deref())?,
    };
    let as_of_date = peerrank_core::time::run_date::resolve_as_of_date(
        args.as_of_date.as_deref(),
        chrono::Utc::now(),
    )?;
    let opts = RunOptions::from_env();

    tracing::info!(mode = mode.as_str(), %as_of_date, dry_run = args.dry_run, "worker starting");

    let provider = HttpJsonMarketData::from_settings(settings)?;
    let cache = SnapshotCache::new(
        Arc::new(provider),
        as_of_date,
        opts.history_days,
        opts.universe_indexes.clone(),
    );
    let llm = AnthropicClient::from_settings(settings)?;
    let search = HttpSearchAgent::from_settings(settings)?;

    if args.dry_run {
        let store = MemoryStore::new();
        return execute(mode, args, &cache, &llm, &search, &store, &opts).await;
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    peerrank_core::storage::migrate(&pool).await?;

    let acquired =
        peerrank_core::storage::lock::try_acquire_run_lock(&pool, mode.as_str(), as_of_date).await?;
    if !acquired {
        tracing::warn!(
            mode = mode.as_str(),
            %as_of_date,
            "run lock not acquired; another run in progress"
        );
        return Ok(());
    }

    let store = PgStore::new(pool.clone());
    let result = execute(mode, args, &cache, &llm, &search, &store, &opts).await;

    let _ = peerrank_core::storage::lock::release_run_lock(&pool, mode.as_str(), as_of_date).await;
    result
}

async fn execute(
    mode: RunMode,
    args: &Args,
    cache: &SnapshotCache,
    llm: &AnthropicClient,
    search: &HttpSearchAgent,
    store: &dyn AnalysisStore,
    opts: &RunOptions,
) -> anyhow::Result<()> {
    match mode {
        RunMode::Ranking => {
            let summary =
                peerrank_core::pipeline::run_stock_analysis(cache, llm, search, store, opts).await?;
            tracing::info!(?summary, "ranking run complete");
        }
        RunMode::Portfolio => {
            let saved = peerrank_core::pipeline::run_portfolio(
                cache,
                llm,
                search,
                store,
                opts,
                args.reset_portfolio,
            )
            .await?;
            tracing::info!(saved, "portfolio run complete");
        }
    }
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
