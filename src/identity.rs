use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::OverviewRecord;

const ID_LEN: usize = 16;

/// How an offer's stable identifier is derived from its overview row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferIdPolicy {
    /// Hash of the normalised detail URL, falling back to the content hash
    /// for rows that carry no URL.
    #[default]
    DetailUrl,
    /// Hash of title, company and location.
    ContentHash,
}

impl OfferIdPolicy {
    pub fn offer_id(&self, record: &OverviewRecord) -> String {
        match (self, &record.detail_url) {
            (OfferIdPolicy::DetailUrl, Some(url)) => digest(url),
            _ => content_hash(record),
        }
    }
}

impl FromStr for OfferIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url" | "detail_url" => Ok(OfferIdPolicy::DetailUrl),
            "hash" | "content_hash" => Ok(OfferIdPolicy::ContentHash),
            other => Err(format!("unknown offer id policy {}", other)),
        }
    }
}

fn content_hash(record: &OverviewRecord) -> String {
    let part = |v: &Option<String>| v.as_deref().unwrap_or("").trim().to_lowercase();
    digest(&format!(
        "{}|{}|{}",
        part(&record.title),
        part(&record.company),
        part(&record.location)
    ))
}

fn digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    let mut hex = format!("{:x}", hash);
    hex.truncate(ID_LEN);
    hex
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(title: &str, url: Option<&str>) -> OverviewRecord {
        OverviewRecord {
            title: Some(title.into()),
            company: Some("ACME".into()),
            location: Some("CDMX".into()),
            relative_date: None,
            short_description: None,
            offer_id: String::new(),
            detail_url: url.map(Into::into),
        }
    }

    #[test]
    fn url_policy_ignores_content() {
        let a = record("Dev", Some("https://jobs.test/1"));
        let b = record("Senior Dev", Some("https://jobs.test/1"));
        assert_eq!(
            OfferIdPolicy::DetailUrl.offer_id(&a),
            OfferIdPolicy::DetailUrl.offer_id(&b)
        );
    }

    #[test]
    fn url_policy_falls_back_to_content() {
        let a = record("Dev", None);
        assert_eq!(
            OfferIdPolicy::DetailUrl.offer_id(&a),
            OfferIdPolicy::ContentHash.offer_id(&a)
        );
    }

    #[test]
    fn content_hash_is_case_and_space_insensitive() {
        let a = record(" Dev ", Some("https://jobs.test/1"));
        let b = record("dev", Some("https://jobs.test/2"));
        assert_eq!(
            OfferIdPolicy::ContentHash.offer_id(&a),
            OfferIdPolicy::ContentHash.offer_id(&b)
        );
        assert_eq!(OfferIdPolicy::ContentHash.offer_id(&a).len(), ID_LEN);
    }

    #[test]
    fn parses_from_cli_names() {
        assert_eq!("url".parse(), Ok(OfferIdPolicy::DetailUrl));
        assert_eq!("hash".parse(), Ok(OfferIdPolicy::ContentHash));
        assert!("uuid".parse::<OfferIdPolicy>().is_err());
    }
}
