use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    browser_controller::BrowserFetcher,
    config::SiteLimits,
    crawler::{CrawlOptions, Crawler, PageRangePolicy},
    fetcher::{Fetcher, HttpFetcher},
    identity::OfferIdPolicy,
    normalize::OfferFilter,
    sink::ResultSink,
    sites::SiteStrategy,
    types::RunResult,
    utils::DATA_PATH,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FetcherKind {
    /// Renders pages in headless Chrome
    #[default]
    Browser,
    /// Plain HTTP GET, no script execution
    Http,
}

#[derive(Debug)]
pub struct RunReport {
    pub result: RunResult,
    pub path: PathBuf,
}

pub struct Runner {
    fetcher: Arc<dyn Fetcher>,
    sink: ResultSink,
    options: RunnerOptions,
    should_terminate: Arc<AtomicBool>,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // directory the snapshots are written to
    #[builder(default = "self.default_data_dir()")]
    data_dir: PathBuf,
    #[builder(default)]
    fetcher: FetcherKind,
    // only used by the browser fetcher
    #[builder(default = "true")]
    headless: bool,
    // per fetch timeout in seconds
    #[builder(default = "60")]
    fetch_timeout: u64,
    // retry delay unit in milliseconds
    #[builder(default = "500")]
    retry_backoff_ms: u64,
    #[builder(default)]
    page_range: PageRangePolicy,
    #[builder(default)]
    id_policy: OfferIdPolicy,
    #[builder(default)]
    filter: OfferFilter,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }
}

impl RunnerOptionsBuilder {
    fn default_data_dir(&self) -> PathBuf {
        DATA_PATH.clone()
    }
}

impl Runner {
    pub fn new(options: RunnerOptions, should_terminate: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(options.fetch_timeout);
        let fetcher: Arc<dyn Fetcher> = match options.fetcher {
            FetcherKind::Browser => Arc::new(BrowserFetcher::new(options.headless, timeout)),
            FetcherKind::Http => {
                Arc::new(HttpFetcher::new(timeout).context("could not build the http client")?)
            }
        };
        Ok(Self::with_fetcher(options, fetcher, should_terminate))
    }

    /// Runner over an already built port.
    pub fn with_fetcher(
        options: RunnerOptions,
        fetcher: Arc<dyn Fetcher>,
        should_terminate: Arc<AtomicBool>,
    ) -> Self {
        Runner {
            fetcher,
            sink: ResultSink::new(options.data_dir.clone()),
            options,
            should_terminate,
        }
    }

    pub async fn run(
        &self,
        strategy: SiteStrategy,
        max_pages: u32,
        max_concurrent_browsers: usize,
    ) -> anyhow::Result<RunReport> {
        let limits = SiteLimits {
            max_pages,
            max_concurrent_browsers,
            ..SiteLimits::default()
        };
        self.run_with(strategy, limits).await
    }

    pub async fn run_with(
        &self,
        strategy: SiteStrategy,
        limits: SiteLimits,
    ) -> anyhow::Result<RunReport> {
        let service_name = strategy.service_name.clone();
        let crawl_options = CrawlOptions::default_builder()
            .max_pages(limits.max_pages)
            .max_concurrent_browsers(limits.max_concurrent_browsers)
            .page_retries(limits.retries)
            .retry_backoff_ms(self.options.retry_backoff_ms)
            .fetch_timeout(Duration::from_secs(self.options.fetch_timeout))
            .page_range(self.options.page_range)
            .id_policy(self.options.id_policy)
            .filter(self.options.filter)
            .build()
            .context(format!("invalid crawl options for {}", service_name))?;

        debug!("starting {} with {:#?}", service_name, crawl_options);

        let mut crawler = Crawler::new(
            strategy,
            self.fetcher.clone(),
            crawl_options,
            self.should_terminate.clone(),
        );
        let (result, path) = crawler
            .run(&self.sink)
            .await
            .context(format!("crawl of {} failed", service_name))?;

        Ok(RunReport { result, path })
    }

    pub fn data_dir(&self) -> &std::path::Path {
        self.sink.data_dir()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{listing, test_site, MockFetcher};

    macro_rules! aw {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    #[test]
    fn runs_a_site_and_persists_it() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunnerOptions::default_builder()
            .data_dir(dir.path())
            .retry_backoff_ms(0u64)
            .build()
            .unwrap();
        let fetcher = Arc::new(MockFetcher::new(|url, schema, _| {
            if schema.name == "detail" {
                Ok(MockFetcher::detail(url))
            } else {
                Ok(listing(url, 2))
            }
        }));
        let runner = Runner::with_fetcher(options, fetcher, Arc::new(AtomicBool::new(false)));

        let report = aw!(runner.run(test_site(), 2, 2)).unwrap();
        assert_eq!(report.result.offers.len(), 4);
        assert_eq!(report.result.service_name, "test");
        assert!(report.path.starts_with(dir.path()));
        assert!(report.path.exists());
    }

    #[test]
    fn invalid_limits_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunnerOptions::default_builder()
            .data_dir(dir.path())
            .build()
            .unwrap();
        let fetcher = Arc::new(MockFetcher::new(|url, _, _| Ok(listing(url, 1))));
        let runner = Runner::with_fetcher(options, fetcher, Arc::new(AtomicBool::new(false)));

        assert!(aw!(runner.run(test_site(), 0, 2)).is_err());
        assert!(aw!(runner.run(test_site(), 1, 0)).is_err());
    }

    #[test]
    fn default_data_dir() {
        let options = RunnerOptions::default_builder().build().unwrap();
        assert_eq!(options.data_dir, *DATA_PATH);
        assert_eq!(options.fetcher, FetcherKind::Browser);
    }
}
