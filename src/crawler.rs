use std::{
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use chrono::Local;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::sleep};
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::{
    admission::Admission,
    fetcher::Fetcher,
    identity::OfferIdPolicy,
    normalize::OfferFilter,
    sink::{merge, ResultSink},
    sites::SiteStrategy,
    types::{CrawlError, FetchError, PageResult, PageStatus, RunResult},
    worker::PageWorker,
};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Which page numbers get a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRangePolicy {
    /// Every page in `1..=max_pages` at once; pages past the end come back empty.
    #[default]
    Eager,
    /// Find the last page with a few overview-only fetches first, then fan out.
    Discover,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct CrawlOptions {
    #[builder(default = "100")]
    max_pages: u32,
    // fetch calls allowed to run at the same time
    #[builder(default = "3")]
    max_concurrent_browsers: usize,
    // extra attempts for pages failing with a transient error
    #[builder(default = "2")]
    page_retries: u32,
    // unit of the exponential retry delay, 0 retries immediately
    #[builder(default = "500")]
    retry_backoff_ms: u64,
    #[builder(default = "Duration::from_secs(60)")]
    fetch_timeout: Duration,
    #[builder(default)]
    page_range: PageRangePolicy,
    #[builder(default)]
    id_policy: OfferIdPolicy,
    #[builder(default)]
    filter: OfferFilter,
}

impl CrawlOptions {
    pub fn default_builder() -> CrawlOptionsBuilder {
        CrawlOptionsBuilder::default()
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn max_concurrent_browsers(&self) -> usize {
        self.max_concurrent_browsers
    }
}

impl CrawlOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.max_pages {
            return Err("max_pages must be at least 1".into());
        }
        if let Some(0) = self.max_concurrent_browsers {
            return Err("max_concurrent_browsers must be at least 1".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    Draining,
    Done,
}

struct PageOutcome {
    page_num: u32,
    attempt: u32,
    result: Result<PageResult, CrawlError>,
}

/// Fans out one [`PageWorker`] per page and collects what they report.
///
/// Workers are spawned eagerly; the [`Admission`] limiter, not the number of
/// tasks, bounds how many fetches run at once. Results are gathered in
/// completion order through a single channel, so only this loop ever touches
/// the accumulated pages.
pub struct Crawler {
    strategy: Arc<SiteStrategy>,
    fetcher: Arc<dyn Fetcher>,
    options: CrawlOptions,
    should_terminate: Arc<AtomicBool>,
    state: CrawlState,
}

impl Crawler {
    pub fn new(
        strategy: SiteStrategy,
        fetcher: Arc<dyn Fetcher>,
        options: CrawlOptions,
        should_terminate: Arc<AtomicBool>,
    ) -> Crawler {
        Crawler {
            strategy: Arc::new(strategy),
            fetcher,
            options,
            should_terminate,
            state: CrawlState::Idle,
        }
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    fn transition(&mut self, next: CrawlState) {
        debug!(
            "{}: {:?} -> {:?}",
            self.strategy.service_name, self.state, next
        );
        self.state = next;
    }

    /// Crawls, then hands the result to `sink`. The snapshot is written even
    /// when the run was cancelled or found nothing.
    pub async fn run(&mut self, sink: &ResultSink) -> Result<(RunResult, PathBuf), CrawlError> {
        let result = self.crawl().await?;
        let path = sink
            .persist(&result, Local::now().naive_local())
            .map_err(|e| CrawlError::Persist(format!("{:#}", e)))?;
        self.transition(CrawlState::Done);
        Ok((result, path))
    }

    pub async fn crawl(&mut self) -> Result<RunResult, CrawlError> {
        self.transition(CrawlState::Running);

        let admission = Admission::new(
            self.options.max_concurrent_browsers,
            self.should_terminate.clone(),
        );
        let worker = PageWorker::new(
            self.strategy.clone(),
            self.fetcher.clone(),
            admission.clone(),
            self.options.fetch_timeout,
            self.options.id_policy,
        );

        let last_page = match self.options.page_range {
            PageRangePolicy::Eager => self.options.max_pages,
            PageRangePolicy::Discover => self.discover_last_page(&worker).await?,
        };

        info!(
            "initializing crawl of {} pages 1..={} with {} concurrent browsers and {} retries",
            self.strategy.service_name,
            last_page,
            self.options.max_concurrent_browsers,
            self.options.page_retries
        );

        let (outcome_tx, mut outcome_rx) =
            mpsc::channel::<PageOutcome>(self.options.max_concurrent_browsers + 10);

        for page_num in 1..=last_page {
            Self::spawn_page(worker.clone(), page_num, 0, None, outcome_tx.clone());
        }

        let mut outstanding = last_page as usize;
        let mut pages: Vec<PageResult> = Vec::with_capacity(outstanding);
        let mut retries = 0;
        let mut cancelled = false;

        // Queued workers see the flag at admission, so the loop only has to
        // react when the next outcome arrives.
        while outstanding > 0 {
            let outcome = match outcome_rx.recv().await {
                Some(outcome) => outcome,
                None => break,
            };
            outstanding -= 1;

            if !cancelled && admission.is_cancelled() {
                cancelled = true;
                warn!(
                    "{}: cancellation requested, draining {} pages",
                    self.strategy.service_name, outstanding
                );
                admission.shut();
            }

            let page = match outcome.result {
                Ok(page) => page,
                Err(e) => {
                    error!("{}: aborting run: {}", self.strategy.service_name, e);
                    admission.shut();
                    return Err(e);
                }
            };

            if self.should_retry(&page, outcome.attempt, &admission) {
                let delay = self.backoff(outcome.attempt);
                warn!(
                    "retrying page {} in {:?}, retried {} so far: {}",
                    outcome.page_num, delay, outcome.attempt, page.status
                );
                retries += 1;
                outstanding += 1;
                Self::spawn_page(
                    worker.clone(),
                    outcome.page_num,
                    outcome.attempt + 1,
                    Some(delay),
                    outcome_tx.clone(),
                );
            } else {
                let retry_skipped = cancelled && outcome.attempt < self.options.page_retries;
                let page = Self::settle(page, outcome.attempt, retry_skipped);
                info!(
                    "{} page {}: {} with {} offers",
                    self.strategy.service_name,
                    page.page_num,
                    page.status,
                    page.offers.len()
                );
                pages.push(page);
            }
        }

        self.transition(CrawlState::Draining);

        let mut result = merge(&self.strategy.service_name, pages, retries);
        if !self.options.filter.is_noop() {
            let now = Local::now().naive_local();
            let before = result.offers.len();
            result.offers.retain(|o| self.options.filter.accepts(o, now));
            result.summary.filtered_out = before - result.offers.len();
            result.summary.offers_found = result.offers.len();
        }

        info!("{}: {}", self.strategy.service_name, result.summary);
        for failure in &result.failures {
            debug!("page {} failed: {}", failure.page_num, failure.reason);
        }
        Ok(result)
    }

    fn should_retry(&self, page: &PageResult, attempt: u32, admission: &Admission) -> bool {
        matches!(&page.status, PageStatus::Failed(e) if e.is_transient())
            && attempt < self.options.page_retries
            && !admission.is_cancelled()
    }

    // a transient failure that ran out of attempts is final
    fn settle(page: PageResult, attempt: u32, retry_skipped: bool) -> PageResult {
        match page.status {
            PageStatus::Failed(FetchError::Transient(reason)) if retry_skipped => {
                debug!(
                    "page {} not retried, run cancelled: {}",
                    page.page_num, reason
                );
                PageResult::cancelled(page.page_num)
            }
            PageStatus::Failed(FetchError::Transient(reason)) => {
                error!(
                    "page {} could not be retrieved after {} attempts: {}",
                    page.page_num,
                    attempt + 1,
                    reason
                );
                PageResult::failed(
                    page.page_num,
                    FetchError::Permanent(format!(
                        "gave up after {} attempts: {}",
                        attempt + 1,
                        reason
                    )),
                )
            }
            _ => page,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        if self.options.retry_backoff_ms == 0 {
            return Duration::ZERO;
        }
        ExponentialBackoff::from_millis(2)
            .factor(self.options.retry_backoff_ms)
            .max_delay(MAX_RETRY_DELAY)
            .map(jitter)
            .nth(attempt as usize)
            .unwrap_or(MAX_RETRY_DELAY)
    }

    fn spawn_page(
        worker: PageWorker,
        page_num: u32,
        attempt: u32,
        delay: Option<Duration>,
        outcome_tx: mpsc::Sender<PageOutcome>,
    ) {
        tokio::spawn(async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }

            let result = AssertUnwindSafe(worker.process_page(page_num))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!("page {} worker panicked: {}", page_num, message);
                    Ok(PageResult::failed(
                        page_num,
                        FetchError::Permanent(format!("worker panicked: {}", message)),
                    ))
                });

            let outcome = PageOutcome {
                page_num,
                attempt,
                result,
            };
            if let Err(e) = outcome_tx.send(outcome).await {
                error!("could not report page {}: {}", page_num, e);
            }
        });
    }

    /// Exponential search (1, 2, 4, ...) until a page comes back empty, then a
    /// binary search for the last page that still lists offers.
    async fn discover_last_page(&self, worker: &PageWorker) -> Result<u32, CrawlError> {
        let max = self.options.max_pages;
        if !worker.has_listings(1).await? {
            // page 1 still gets a worker so the run records it as empty
            return Ok(1);
        }

        let mut has_data = 1u32;
        let mut candidate = 2u32;
        while candidate <= max && worker.has_listings(candidate).await? {
            has_data = candidate;
            candidate = candidate.saturating_mul(2);
        }
        let mut no_data = candidate.min(max.saturating_add(1));

        while no_data - has_data > 1 {
            let mid = has_data + (no_data - has_data) / 2;
            if worker.has_listings(mid).await? {
                has_data = mid;
            } else {
                no_data = mid;
            }
        }

        info!(
            "{}: probing found {} pages (max {})",
            self.strategy.service_name, has_data, max
        );
        Ok(has_data)
    }
}
