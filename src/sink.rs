use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tempfile::NamedTempFile;

use crate::{
    types::{PageFailure, PageResult, PageStatus, RunResult, RunSummary},
    utils::FILE_TIMESTAMP_FORMAT,
};

/// Orders page results by page number (offers keep their in-page order),
/// drops repeated offer ids (first one wins) and tallies the summary.
///
/// The result does not depend on the order `pages` arrived in.
pub fn merge(service_name: &str, mut pages: Vec<PageResult>, retries: usize) -> RunResult {
    pages.sort_by_key(|p| p.page_num);

    let mut summary = RunSummary {
        pages_attempted: pages.len(),
        retries,
        ..RunSummary::default()
    };
    let mut failures = vec![];
    let mut total = 0;

    for page in &pages {
        match &page.status {
            PageStatus::Ok => summary.pages_ok += 1,
            PageStatus::Empty => summary.pages_empty += 1,
            PageStatus::Cancelled => summary.pages_cancelled += 1,
            PageStatus::Failed(e) => {
                summary.pages_failed += 1;
                failures.push(PageFailure {
                    page_num: page.page_num,
                    reason: e.to_string(),
                });
            }
        }
    }

    let offers = pages
        .into_iter()
        .filter(|p| p.status == PageStatus::Ok)
        .flat_map(|p| p.offers)
        .inspect(|_| total += 1)
        .unique_by(|o| o.overview.offer_id.clone())
        .collect::<Vec<_>>();

    summary.offers_found = offers.len();
    summary.duplicates_dropped = total - offers.len();

    RunResult {
        service_name: service_name.into(),
        offers,
        failures,
        summary,
    }
}

/// Writes run snapshots as JSON arrays under one data directory.
pub struct ResultSink {
    data_dir: PathBuf,
}

impl ResultSink {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        ResultSink {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `<service>_job_offers_<YYYYMMDD>_<HH>_<MM>.json`
    pub fn file_name(service_name: &str, captured_at: NaiveDateTime) -> String {
        format!(
            "{}_job_offers_{}.json",
            service_name,
            captured_at.format(FILE_TIMESTAMP_FORMAT)
        )
    }

    /// Serializes every offer of `result` and moves the file into place in one
    /// rename, so a half-written snapshot is never visible under its final name.
    pub fn persist(&self, result: &RunResult, captured_at: NaiveDateTime) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.data_dir).context(format!(
            "could not create data directory {:?}",
            self.data_dir
        ))?;
        let path = self
            .data_dir
            .join(Self::file_name(&result.service_name, captured_at));

        let tmp = NamedTempFile::new_in(&self.data_dir).context(format!(
            "could not create temporary file in {:?}",
            self.data_dir
        ))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            let mut ser = serde_json::Serializer::with_formatter(
                &mut writer,
                PrettyFormatter::with_indent(b"    "),
            );
            result
                .offers
                .serialize(&mut ser)
                .context("could not serialize offers")?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;

        tmp.persist(&path)
            .map_err(|e| anyhow!("could not move snapshot into {:?}: {}", path, e.error))?;

        info!(
            "{} offers from {} saved to {:?}",
            result.offers.len(),
            result.service_name,
            path
        );
        Ok(path)
    }
}
