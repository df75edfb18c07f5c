use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    identity::OfferIdPolicy,
    utils::{normalize_url, squash_whitespace},
};

/// One extracted element: field name to text.
pub type RawRecord = HashMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, connection resets, 5xx: worth another attempt.
    #[error("transient: {0}")]
    Transient(String),
    /// 4xx-class responses, malformed pages, invalid selectors.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("admission limiter closed while the run was still active")]
    AdmissionClosed,
    #[error("invalid crawl options: {0}")]
    InvalidOptions(String),
    #[error("could not persist results: {0}")]
    Persist(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewRecord {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub relative_date: Option<String>,
    #[serde(rename = "description")]
    pub short_description: Option<String>,
    pub offer_id: String,
    #[serde(skip)]
    pub detail_url: Option<String>,
}

impl OverviewRecord {
    pub fn from_raw(raw: &RawRecord, base_url: &str, policy: OfferIdPolicy) -> Self {
        let field = |name: &str| {
            raw.get(name)
                .map(|v| squash_whitespace(v))
                .filter(|v| !v.is_empty())
        };
        let detail_url = raw
            .get("detail_url")
            .and_then(|u| normalize_url(base_url, u));

        let mut record = OverviewRecord {
            title: field("title"),
            company: field("company"),
            location: field("location"),
            relative_date: field("relative_date"),
            short_description: field("description"),
            offer_id: String::new(),
            detail_url,
        };
        record.offer_id = policy.offer_id(&record);
        record
    }
}

/// Detail-page enrichment. All fields absent serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_url: Option<String>,
}

impl OfferDetails {
    pub fn from_raw(raw: &RawRecord, base_url: &str) -> Self {
        let field = |name: &str| {
            raw.get(name)
                .map(|v| squash_whitespace(v))
                .filter(|v| !v.is_empty())
        };
        OfferDetails {
            description: field("description"),
            requirements: field("requirements"),
            salary: field("salary"),
            job_url: raw.get("job_url").and_then(|u| normalize_url(base_url, u)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.requirements.is_none()
            && self.salary.is_none()
            && self.job_url.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOffer {
    #[serde(flatten)]
    pub overview: OverviewRecord,
    pub current_datetime: String,
    pub details: OfferDetails,
}

impl JobOffer {
    pub fn offer_id(&self) -> &str {
        &self.overview.offer_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    Ok,
    /// No structural match: the listing has no such page.
    Empty,
    Failed(FetchError),
    /// Refused admission after a run-level cancellation.
    Cancelled,
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageStatus::Ok => write!(f, "ok"),
            PageStatus::Empty => write!(f, "empty"),
            PageStatus::Failed(e) => write!(f, "failed ({})", e),
            PageStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    pub page_num: u32,
    pub offers: Vec<JobOffer>,
    pub status: PageStatus,
}

impl PageResult {
    pub fn ok(page_num: u32, offers: Vec<JobOffer>) -> Self {
        PageResult {
            page_num,
            offers,
            status: PageStatus::Ok,
        }
    }

    pub fn empty(page_num: u32) -> Self {
        Self::with_status(page_num, PageStatus::Empty)
    }

    pub fn failed(page_num: u32, error: FetchError) -> Self {
        Self::with_status(page_num, PageStatus::Failed(error))
    }

    pub fn cancelled(page_num: u32) -> Self {
        Self::with_status(page_num, PageStatus::Cancelled)
    }

    fn with_status(page_num: u32, status: PageStatus) -> Self {
        PageResult {
            page_num,
            offers: vec![],
            status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub pages_attempted: usize,
    pub pages_ok: usize,
    pub pages_empty: usize,
    pub pages_failed: usize,
    pub pages_cancelled: usize,
    pub offers_found: usize,
    pub duplicates_dropped: usize,
    pub filtered_out: usize,
    pub retries: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages attempted: {} ok, {} empty, {} failed, {} cancelled; {} offers ({} duplicates dropped, {} filtered out, {} retries)",
            self.pages_attempted,
            self.pages_ok,
            self.pages_empty,
            self.pages_failed,
            self.pages_cancelled,
            self.offers_found,
            self.duplicates_dropped,
            self.filtered_out,
            self.retries
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page_num: u32,
    pub reason: String,
}

/// Sorted, deduplicated output of one crawl of one site.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub service_name: String,
    pub offers: Vec<JobOffer>,
    pub failures: Vec<PageFailure>,
    pub summary: RunSummary,
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn overview_from_raw_cleans_fields() {
        let record = OverviewRecord::from_raw(
            &raw(&[
                ("title", "  Python\n Developer "),
                ("company", ""),
                ("detail_url", "/empleo/oferta/123/#top"),
            ]),
            "https://www.occ.com.mx",
            OfferIdPolicy::DetailUrl,
        );
        assert_eq!(record.title.as_deref(), Some("Python Developer"));
        assert_eq!(record.company, None);
        assert_eq!(
            record.detail_url.as_deref(),
            Some("https://www.occ.com.mx/empleo/oferta/123/")
        );
        assert_eq!(record.offer_id.len(), 16);
    }

    #[test]
    fn empty_details_serialize_as_empty_object() {
        let offer = JobOffer {
            overview: OverviewRecord::from_raw(
                &raw(&[("title", "Dev"), ("description", "short")]),
                "https://example.test",
                OfferIdPolicy::ContentHash,
            ),
            current_datetime: "2025-08-27 23:00:00".into(),
            details: OfferDetails::default(),
        };
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["details"], serde_json::json!({}));
        assert_eq!(json["description"], "short");
        assert_eq!(json["title"], "Dev");
        assert!(json.get("detail_url").is_none());
        assert!(json.get("short_description").is_none());
        assert_eq!(json["offer_id"], offer.offer_id());
    }

    #[test]
    fn details_keep_present_fields() {
        let details = OfferDetails::from_raw(
            &raw(&[("salary", "$20,000 Mensual"), ("job_url", "/oferta/9")]),
            "https://example.test",
        );
        assert!(!details.is_empty());
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["salary"], "$20,000 Mensual");
        assert_eq!(json["job_url"], "https://example.test/oferta/9");
        assert!(json.get("requirements").is_none());
    }
}
