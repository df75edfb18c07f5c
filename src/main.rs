use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context};
use clap::Parser;
use job_crawler::{
    config::{FileConfig, SiteOverrides},
    crawler::PageRangePolicy,
    identity::OfferIdPolicy,
    normalize::OfferFilter,
    runner::{FetcherKind, Runner, RunnerOptions},
    sites::{self, SUPPORTED_SITES},
    utils::{DEFAULT_KEYWORD, DEFAULT_LOG_LEVEL},
};
use log::{debug, warn};
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Job Listing Crawler CLI", long_about = None)]
struct Args {
    /// Sites to crawl, one after the other (occ, compu_trabajo)
    #[arg(required = true)]
    sites: Vec<String>,
    /// Search keyword used to build the listing URL
    #[arg(short = 'k', long)]
    keyword: Option<String>,
    /// Highest listing page to request
    #[arg(short = 'p', long)]
    max_pages: Option<u32>,
    /// Maximum number of fetches running at the same time
    #[arg(short = 'c', long)]
    concurrent_browsers: Option<usize>,
    /// Number of retries per page failing with a transient error
    #[arg(short = 'r', long)]
    retries: Option<u32>,
    /// Maximum time in seconds a single fetch may take
    #[arg(long, default_value_t = 60)]
    fetch_timeout: u64,
    /// Base delay in milliseconds between retries of a page
    #[arg(long, default_value_t = 500)]
    retry_backoff_ms: u64,
    /// Directory the JSON snapshots are written to
    #[arg(short = 'd', long)]
    data_dir: Option<PathBuf>,
    /// Whether the browser runs without a window
    #[arg(long)]
    headless: Option<bool>,
    /// How pages are retrieved
    #[arg(long, value_enum)]
    fetcher: Option<FetcherKind>,
    /// Look for the last listing page instead of requesting every page up to max-pages
    #[arg(long)]
    discover: bool,
    /// How offers are identified when deduplicating (url, hash)
    #[arg(long, default_value = "url")]
    id_policy: OfferIdPolicy,
    /// Drop offers published more than this many days ago
    #[arg(long)]
    max_age_days: Option<i64>,
    /// Drop offers with a readable salary below this amount
    #[arg(long)]
    min_salary: Option<f64>,
    /// TOML file with defaults and per-site limits
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log filter, overrides the config file (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let log_level = args
        .log_level
        .clone()
        .or_else(|| file.log_level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.into());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    debug!("Starting crawler with {:#?}", args);

    let keyword = args
        .keyword
        .as_deref()
        .or(file.keyword.as_deref())
        .unwrap_or(DEFAULT_KEYWORD);

    // resolve every site before the first one starts
    let strategies = args
        .sites
        .iter()
        .map(|name| {
            sites::by_name(name, Some(keyword)).ok_or_else(|| {
                anyhow!(
                    "unsupported site {}, expected one of {:?}",
                    name,
                    SUPPORTED_SITES
                )
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut builder = RunnerOptions::default_builder();
    builder
        .fetch_timeout(args.fetch_timeout)
        .retry_backoff_ms(args.retry_backoff_ms)
        .page_range(if args.discover {
            PageRangePolicy::Discover
        } else {
            PageRangePolicy::Eager
        })
        .id_policy(args.id_policy)
        .filter(OfferFilter {
            max_age_days: args.max_age_days,
            min_salary: args.min_salary,
        });
    if let Some(dir) = args.data_dir.clone().or_else(|| file.data_dir.clone()) {
        builder.data_dir(dir);
    }
    if let Some(headless) = args.headless.or(file.headless) {
        builder.headless(headless);
    }
    if let Some(fetcher) = args.fetcher.or(file.fetcher) {
        builder.fetcher(fetcher);
    }
    let options = builder.build()?;

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let runner = Runner::new(options, should_terminate.clone())?;

    let cli_limits = SiteOverrides {
        max_pages: args.max_pages,
        max_concurrent_browsers: args.concurrent_browsers,
        retries: args.retries,
    };

    for strategy in strategies {
        let name = strategy.service_name.clone();
        if should_terminate.load(Ordering::Relaxed) {
            warn!("cancelled, skipping {}", name);
            continue;
        }

        let limits = cli_limits.resolve(&file.site(&name));
        let report = runner
            .run_with(strategy, limits)
            .await
            .context(format!("could not crawl {}", name))?;

        println!("{}: {}", name, report.result.summary);
        for failure in &report.result.failures {
            println!("  page {} failed: {}", failure.page_num, failure.reason);
        }
        println!("Results saved to: {}", report.path.display());
    }

    Ok(())
}
