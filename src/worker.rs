use std::{panic, sync::Arc, time::Duration};

use chrono::Local;
use tokio::time::timeout;

use crate::{
    admission::{Admission, AdmissionError},
    fetcher::{Extraction, Fetcher},
    identity::OfferIdPolicy,
    sites::{Schema, SiteStrategy},
    types::{CrawlError, FetchError, JobOffer, OfferDetails, OverviewRecord, PageResult},
    utils::DATE_FORMAT,
};

enum FetchFailure {
    Fetch(FetchError),
    Admission(AdmissionError),
}

/// Processes one listing page: the overview pass, then one detail pass per row.
///
/// Holds no mutable state; clones share the strategy, the port and the limiter.
#[derive(Clone)]
pub struct PageWorker {
    strategy: Arc<SiteStrategy>,
    fetcher: Arc<dyn Fetcher>,
    admission: Admission,
    fetch_timeout: Duration,
    id_policy: OfferIdPolicy,
}

impl PageWorker {
    pub fn new(
        strategy: Arc<SiteStrategy>,
        fetcher: Arc<dyn Fetcher>,
        admission: Admission,
        fetch_timeout: Duration,
        id_policy: OfferIdPolicy,
    ) -> Self {
        PageWorker {
            strategy,
            fetcher,
            admission,
            fetch_timeout,
            id_policy,
        }
    }

    /// Only a closed limiter is an error; every other outcome is a [`PageResult`].
    pub async fn process_page(&self, page_num: u32) -> Result<PageResult, CrawlError> {
        let url = self.strategy.page_url(page_num);
        debug!("page {}: fetching overview {}", page_num, url);

        let overview = match self.fetch(&url, &self.strategy.overview_schema).await {
            Ok(o) => o,
            Err(FetchFailure::Fetch(e)) => return Ok(PageResult::failed(page_num, e)),
            Err(FetchFailure::Admission(AdmissionError::Cancelled)) => {
                return Ok(PageResult::cancelled(page_num))
            }
            Err(FetchFailure::Admission(AdmissionError::Closed)) => {
                return Err(CrawlError::AdmissionClosed)
            }
        };

        if overview.is_structural_empty() {
            debug!("page {}: no listing found", page_num);
            return Ok(PageResult::empty(page_num));
        }

        let mut offers = Vec::with_capacity(overview.records.len());
        for (idx, raw) in overview.records.iter().enumerate() {
            let record = OverviewRecord::from_raw(raw, &self.strategy.base_url, self.id_policy);
            let details = match self.fetch_details(page_num, idx, &record).await? {
                Some(details) => details,
                None => {
                    // rows without a detail pass are never emitted
                    debug!(
                        "page {}: cancelled before offer {} was enriched, dropping {} offers",
                        page_num,
                        idx,
                        overview.records.len()
                    );
                    return Ok(PageResult::cancelled(page_num));
                }
            };
            offers.push(JobOffer {
                overview: record,
                current_datetime: Local::now().format(DATE_FORMAT).to_string(),
                details,
            });
        }

        Ok(PageResult::ok(page_num, offers))
    }

    /// Overview-only fetch used to discover where a listing ends.
    pub async fn has_listings(&self, page_num: u32) -> Result<bool, CrawlError> {
        let url = self.strategy.page_url(page_num);
        match self.fetch(&url, &self.strategy.overview_schema).await {
            Ok(o) => Ok(!o.is_structural_empty()),
            Err(FetchFailure::Fetch(e)) if e.is_transient() => {
                // a flaky page must not truncate the range
                warn!("listing check of page {} failed, assuming it has data: {}", page_num, e);
                Ok(true)
            }
            Err(FetchFailure::Fetch(e)) => {
                warn!("listing check of page {} failed: {}", page_num, e);
                Ok(false)
            }
            Err(FetchFailure::Admission(AdmissionError::Cancelled)) => Ok(false),
            Err(FetchFailure::Admission(AdmissionError::Closed)) => Err(CrawlError::AdmissionClosed),
        }
    }

    /// `None` when the limiter refused the detail fetch because the run was cancelled.
    async fn fetch_details(
        &self,
        page_num: u32,
        idx: usize,
        record: &OverviewRecord,
    ) -> Result<Option<OfferDetails>, CrawlError> {
        let url = match &record.detail_url {
            Some(u) => u,
            None => {
                warn!(
                    "page {} offer {}: no detail url, keeping overview only",
                    page_num, idx
                );
                return Ok(Some(OfferDetails::default()));
            }
        };

        match self.fetch(url, &self.strategy.detail_schema).await {
            Ok(extraction) => {
                let mut details = extraction
                    .records
                    .first()
                    .map(|raw| OfferDetails::from_raw(raw, &self.strategy.base_url))
                    .unwrap_or_default();
                if details.is_empty() {
                    debug!("page {} offer {}: detail page had no fields", page_num, idx);
                } else if details.job_url.is_none() {
                    details.job_url = Some(url.clone());
                }
                Ok(Some(details))
            }
            Err(FetchFailure::Fetch(e)) => {
                warn!(
                    "page {} offer {}: detail fetch of {} failed, keeping overview only: {}",
                    page_num, idx, url, e
                );
                Ok(Some(OfferDetails::default()))
            }
            Err(FetchFailure::Admission(AdmissionError::Cancelled)) => Ok(None),
            Err(FetchFailure::Admission(AdmissionError::Closed)) => Err(CrawlError::AdmissionClosed),
        }
    }

    // The port call runs in its own task that owns the permit. Giving up on a
    // slow call does not free its slot: adapters doing blocking work can't be
    // interrupted, so the slot comes back only when the call really returns.
    async fn fetch(&self, url: &str, schema: &Schema) -> Result<Extraction, FetchFailure> {
        let permit = self.admission.admit().await.map_err(FetchFailure::Admission)?;

        let fetcher = self.fetcher.clone();
        let (target, schema) = (url.to_string(), schema.clone());
        let call = tokio::spawn(async move {
            let res = fetcher.fetch_and_extract(&target, &schema).await;
            drop(permit);
            res
        });

        match timeout(self.fetch_timeout, call).await {
            Ok(Ok(res)) => res.map_err(FetchFailure::Fetch),
            // surfaces as a worker panic, same as one raised in this task
            Ok(Err(e)) if e.is_panic() => panic::resume_unwind(e.into_panic()),
            Ok(Err(e)) => Err(FetchFailure::Fetch(FetchError::Transient(format!(
                "fetch of {} aborted: {}",
                url, e
            )))),
            Err(_elapsed) => {
                warn!(
                    "no response from {} within {:?}, its slot stays taken until it returns",
                    url, self.fetch_timeout
                );
                Err(FetchFailure::Fetch(FetchError::Transient(format!(
                    "no response from {} within {:?}",
                    url, self.fetch_timeout
                ))))
            }
        }
    }
}
