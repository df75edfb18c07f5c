use scraper::{ElementRef, Html, Selector};

use crate::{
    fetcher::Extraction,
    sites::{FieldKind, Schema},
    types::{FetchError, RawRecord},
};

/// Applies `schema` to a rendered HTML document.
///
/// Fields without a match are left out of the record. A document that lacks
/// the `wait_for` marker or every base element is reported as unmatched.
pub fn extract(html: &str, schema: &Schema) -> Result<Extraction, FetchError> {
    let document = Html::parse_document(html);

    if let Some(wait_for) = &schema.wait_for {
        if document.select(&parse(wait_for)?).next().is_none() {
            debug!("{}: marker {} not found", schema.name, wait_for);
            return Ok(Extraction::no_match());
        }
    }

    let base = parse(&schema.base_selector)?;
    let fields = schema
        .fields
        .iter()
        .map(|rule| Ok((rule, parse(&rule.selector)?)))
        .collect::<Result<Vec<_>, FetchError>>()?;

    let records: Vec<RawRecord> = document
        .select(&base)
        .map(|element| {
            fields
                .iter()
                .filter_map(|(rule, selector)| {
                    let value = element
                        .select(selector)
                        .find_map(|found| read_field(found, &rule.kind))?;
                    Some((rule.name.clone(), value))
                })
                .collect()
        })
        .collect();

    if records.is_empty() {
        return Ok(Extraction::no_match());
    }
    Ok(Extraction::rows(records))
}

fn read_field(element: ElementRef, kind: &FieldKind) -> Option<String> {
    let value = match kind {
        FieldKind::Text => element.text().collect::<Vec<&str>>().join(" "),
        FieldKind::Attribute(name) => element.value().attr(name)?.to_string(),
    };
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector)
        .map_err(|e| FetchError::Permanent(format!("invalid selector {}: {:?}", selector, e)))
}
