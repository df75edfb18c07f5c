//! Site strategies: everything the crawler needs to know about one listing site.
//!
//! A strategy is plain data plus the pure [`SiteStrategy::page_url`] builder.
//! Supporting a new site means constructing a new [`SiteStrategy`] value, either
//! in code like [`occ`] and [`compu_trabajo`] or by deserializing one.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::utils::DEFAULT_KEYWORD;

pub const SUPPORTED_SITES: [&str; 2] = ["occ", "compu_trabajo"];

/// How a single field is read from a matched element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub selector: String,
    pub kind: FieldKind,
}

impl FieldRule {
    pub fn text(name: &str, selector: &str) -> Self {
        FieldRule {
            name: name.into(),
            selector: selector.into(),
            kind: FieldKind::Text,
        }
    }

    pub fn attribute(name: &str, selector: &str, attribute: &str) -> Self {
        FieldRule {
            name: name.into(),
            selector: selector.into(),
            kind: FieldKind::Attribute(attribute.into()),
        }
    }
}

/// Extraction schema: one record per `base_selector` match, fields read
/// relative to that element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub base_selector: String,
    /// Selector that must be present for the page to count as a structural match.
    pub wait_for: Option<String>,
    pub fields: Vec<FieldRule>,
}

/// Page numbering policy, declared once per site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pagination {
    /// `<listing_url>?<param>=<page>`; page 1 has no parameter when `bare_first_page`.
    Query { param: String, bare_first_page: bool },
    /// `first` for page 1, `pattern` with a `{page}` placeholder for the rest.
    Template { first: String, pattern: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStrategy {
    pub service_name: String,
    pub base_url: String,
    pub listing_url: String,
    pub pagination: Pagination,
    pub overview_schema: Schema,
    pub detail_schema: Schema,
}

impl SiteStrategy {
    /// Listing URL for `page` (1-based).
    pub fn page_url(&self, page: u32) -> String {
        match &self.pagination {
            Pagination::Query {
                param,
                bare_first_page,
            } => {
                if page <= 1 && *bare_first_page {
                    return self.listing_url.clone();
                }
                match Url::parse(&self.listing_url) {
                    Ok(mut url) => {
                        url.query_pairs_mut().append_pair(param, &page.to_string());
                        url.to_string()
                    }
                    Err(_) => format!("{}?{}={}", self.listing_url, param, page),
                }
            }
            Pagination::Template { first, pattern } => {
                if page <= 1 {
                    first.clone()
                } else {
                    pattern.replace("{page}", &page.to_string())
                }
            }
        }
    }
}

pub fn by_name(name: &str, keyword: Option<&str>) -> Option<SiteStrategy> {
    let keyword = keyword.unwrap_or(DEFAULT_KEYWORD);
    match name {
        "occ" => Some(occ(keyword)),
        "compu_trabajo" | "computrabajo" => Some(compu_trabajo(keyword)),
        _ => None,
    }
}

pub fn occ(keyword: &str) -> SiteStrategy {
    let base_url = "https://www.occ.com.mx";
    SiteStrategy {
        service_name: "occ".into(),
        base_url: base_url.into(),
        listing_url: format!("{}/empleos/de-{}/", base_url, urlencoding::encode(keyword)),
        pagination: Pagination::Query {
            param: "page".into(),
            bare_first_page: true,
        },
        overview_schema: Schema {
            name: "occ Job Scraper".into(),
            base_selector: "div.bg-bg-surface-default".into(),
            wait_for: Some("aside.col-span-12".into()),
            fields: vec![
                FieldRule::text("title", "h2.text-grey-900"),
                FieldRule::text("company", "span.line-clamp-title"),
                FieldRule::text("location", "div.no-alter-loc-text.mt-1 > p"),
                FieldRule::text(
                    "relative_date",
                    "div > div.flex.items-center.justify-between.mb-2 > div > span",
                ),
                FieldRule::text("description", "div.fs16.t_word_wrap"),
                FieldRule::attribute("detail_url", "a[href*='/empleo/oferta/']", "href"),
            ],
        },
        detail_schema: Schema {
            name: "occ Job Detail".into(),
            base_selector: "html".into(),
            wait_for: Some("#job-detail-container".into()),
            fields: vec![
                FieldRule::text("description", "#job-detail-container div.break-words"),
                FieldRule::text("requirements", "#job-detail-container ul"),
                FieldRule::text("salary", "#job-detail-container span.i_money + span"),
                FieldRule::attribute("job_url", "link[rel='canonical']", "href"),
            ],
        },
    }
}

pub fn compu_trabajo(keyword: &str) -> SiteStrategy {
    let base_url = "https://mx.computrabajo.com";
    SiteStrategy {
        service_name: "compu_trabajo".into(),
        base_url: base_url.into(),
        listing_url: format!("{}/trabajo-de-{}", base_url, urlencoding::encode(keyword)),
        pagination: Pagination::Query {
            param: "p".into(),
            bare_first_page: true,
        },
        overview_schema: Schema {
            name: "compu_trabajo Job Scraper".into(),
            base_selector: "article.box_offer".into(),
            wait_for: Some("#offersGridOfferContainer".into()),
            fields: vec![
                FieldRule::text("title", "a.js-o-link"),
                FieldRule::text("company", "p.dFlex"),
                FieldRule::text("location", "p:nth-child(3)"),
                FieldRule::text("relative_date", "p.fs13.fc_aux.mt15"),
                FieldRule::text("description", "div.fs16.t_word_wrap"),
                FieldRule::attribute("detail_url", "a.js-o-link", "href"),
            ],
        },
        detail_schema: Schema {
            name: "compu_trabajo Job Detail".into(),
            base_selector: "div.box_detail".into(),
            wait_for: Some("div.box_detail".into()),
            fields: vec![
                FieldRule::text("description", "div.t_word_wrap"),
                FieldRule::text("requirements", "ul.disc"),
                FieldRule::text("salary", "div.fs14 span.i_money + span"),
                FieldRule::attribute("job_url", "div.opt_bubble", "data-url"),
            ],
        },
    }
}
