//! The fetch-and-extract port the crawler drives, and its plain HTTP adapter.
//!
//! The crawler only ever sees [`Fetcher`]; how a page is obtained (plain HTTP,
//! a headless browser, a test double) is the adapter's business. Adapters
//! classify every failure as [`FetchError::Transient`] or
//! [`FetchError::Permanent`] and never retry on their own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::{
    extractor::extract,
    sites::Schema,
    types::{FetchError, RawRecord},
};

/// Records extracted from one page plus whether the page had the expected shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub records: Vec<RawRecord>,
    pub matched: bool,
}

impl Extraction {
    pub fn rows(records: Vec<RawRecord>) -> Self {
        Extraction {
            records,
            matched: true,
        }
    }

    /// The schema found nothing to anchor on; past the end of a listing.
    pub fn no_match() -> Self {
        Extraction {
            records: vec![],
            matched: false,
        }
    }

    pub fn is_structural_empty(&self) -> bool {
        self.records.is_empty() && !self.matched
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_and_extract(&self, url: &str, schema: &Schema)
        -> Result<Extraction, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )
            .build()?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_and_extract(
        &self,
        url: &str,
        schema: &Schema,
    ) -> Result<Extraction, FetchError> {
        debug!("fetching {}", url);
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = res.status();
        if let Some(outcome) = classify_status(status) {
            return outcome;
        }

        let body = res
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("reading body of {}: {}", url, e)))?;

        extract(&body, schema)
    }
}

/// `None` for success statuses; otherwise the outcome the status stands for.
pub fn classify_status(status: StatusCode) -> Option<Result<Extraction, FetchError>> {
    if status.is_success() {
        return None;
    }
    let outcome = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Ok(Extraction::no_match()),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            Err(FetchError::Transient(format!("status {}", status)))
        }
        s if s.is_server_error() => Err(FetchError::Transient(format!("status {}", s))),
        s => Err(FetchError::Permanent(format!("status {}", s))),
    };
    Some(outcome)
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_builder() {
        FetchError::Permanent(e.to_string())
    } else {
        // timeouts, connection resets, dns hiccups
        FetchError::Transient(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            Some(Ok(Extraction::no_match()))
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Some(Err(FetchError::Transient(_)))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(Err(FetchError::Transient(_)))
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            Some(Err(FetchError::Permanent(_)))
        ));
    }

    #[test]
    fn structural_empty() {
        assert!(Extraction::no_match().is_structural_empty());
        assert!(!Extraction::rows(vec![]).is_structural_empty());
    }
}
