//! Helpers for testing: a scripted, instrumented [`Fetcher`] and fixtures.
//! Compiled for this crate's tests and behind the `testing` feature.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    fetcher::{Extraction, Fetcher},
    sites::{FieldRule, Pagination, Schema, SiteStrategy},
    types::{FetchError, RawRecord},
};

type Script = dyn Fn(&str, &Schema, usize) -> Result<Extraction, FetchError> + Send + Sync;
type Latency = dyn Fn(&str) -> Duration + Send + Sync;

/// Port double driven by a closure.
///
/// The closure receives the URL, the schema and how many times that URL was
/// requested before (0 on the first call), which is enough to script
/// transient-then-success sequences. Every call is counted, and the number of
/// calls running at the same time is tracked so tests can assert the
/// admission bound.
pub struct MockFetcher {
    script: Box<Script>,
    latency: Option<Box<Latency>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockFetcher {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &Schema, usize) -> Result<Extraction, FetchError> + Send + Sync + 'static,
    {
        MockFetcher {
            script: Box::new(script),
            latency: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(vec![]),
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.with_latency_by(move |_| latency)
    }

    /// Calls to `url` sleep for `latency(url)` before the script runs.
    pub fn with_latency_by<F>(mut self, latency: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        self.latency = Some(Box::new(latency));
        self
    }

    /// A detail page with every field filled in.
    pub fn detail(url: &str) -> Extraction {
        let mut raw = RawRecord::new();
        raw.insert("description".into(), format!("Details for {}", url));
        raw.insert("requirements".into(), "Python, SQL".into());
        raw.insert("salary".into(), "$20,000 - $25,000 Mensual".into());
        raw.insert("job_url".into(), url.into());
        Extraction::rows(vec![raw])
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.calls().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_and_extract(
        &self,
        url: &str,
        schema: &Schema,
    ) -> Result<Extraction, FetchError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            let previous = calls.iter().filter(|c| c.as_str() == url).count();
            calls.push(url.to_string());
            previous
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = &self.latency {
            let latency = latency(url);
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
        }
        (self.script)(url, schema, attempt)
    }
}

/// Page number encoded in a [`test_site`] listing URL.
pub fn page_of(url: &str) -> u32 {
    url.rsplit_once("page=")
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(1)
}

/// `n` overview rows for the listing page at `url`, each with its own detail URL.
pub fn listing(url: &str, n: usize) -> Extraction {
    let page = page_of(url);
    let records = (0..n)
        .map(|i| {
            let mut raw = RawRecord::new();
            raw.insert("title".into(), format!("Offer {} on page {}", i, page));
            raw.insert("company".into(), "ACME".into());
            raw.insert("location".into(), "Ciudad de México".into());
            raw.insert("relative_date".into(), "Hace 2 horas".into());
            raw.insert("description".into(), "Backend developer".into());
            raw.insert(
                "detail_url".into(),
                format!("https://jobs.test/offer/{}-{}", page, i),
            );
            raw
        })
        .collect();
    Extraction::rows(records)
}

/// Listing on `https://jobs.test/listing` with `?page=N` and a bare first page.
/// The schemas are named `overview` and `detail` so scripts can tell them apart.
pub fn test_site() -> SiteStrategy {
    SiteStrategy {
        service_name: "test".into(),
        base_url: "https://jobs.test".into(),
        listing_url: "https://jobs.test/listing".into(),
        pagination: Pagination::Query {
            param: "page".into(),
            bare_first_page: true,
        },
        overview_schema: Schema {
            name: "overview".into(),
            base_selector: "article".into(),
            wait_for: None,
            fields: vec![
                FieldRule::text("title", "h2"),
                FieldRule::attribute("detail_url", "a", "href"),
            ],
        },
        detail_schema: Schema {
            name: "detail".into(),
            base_selector: "main".into(),
            wait_for: None,
            fields: vec![FieldRule::text("description", "p")],
        },
    }
}
