//! Optional TOML file with defaults for the CLI.
//!
//! ```toml
//! data_dir = "data"
//! headless = true
//! keyword = "rust"
//!
//! [sites.occ]
//! max_pages = 20
//! max_concurrent_browsers = 4
//! ```
//!
//! Command line flags win over the file, the file wins over built-in defaults.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::runner::FetcherKind;

pub const DEFAULT_MAX_PAGES: u32 = 100;
pub const DEFAULT_MAX_CONCURRENT_BROWSERS: usize = 3;
pub const DEFAULT_RETRIES: u32 = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub headless: Option<bool>,
    pub log_level: Option<String>,
    pub keyword: Option<String>,
    pub fetcher: Option<FetcherKind>,
    #[serde(default)]
    pub sites: HashMap<String, SiteOverrides>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteOverrides {
    pub max_pages: Option<u32>,
    pub max_concurrent_browsers: Option<usize>,
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteLimits {
    pub max_pages: u32,
    pub max_concurrent_browsers: usize,
    pub retries: u32,
}

impl Default for SiteLimits {
    fn default() -> Self {
        SiteLimits {
            max_pages: DEFAULT_MAX_PAGES,
            max_concurrent_browsers: DEFAULT_MAX_CONCURRENT_BROWSERS,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loaded config from {:?}", path);
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn site(&self, name: &str) -> SiteOverrides {
        self.sites.get(name).copied().unwrap_or_default()
    }
}

impl SiteOverrides {
    /// Flags from `self` win, gaps are filled from `fallback`, then defaults.
    pub fn resolve(&self, fallback: &SiteOverrides) -> SiteLimits {
        let defaults = SiteLimits::default();
        SiteLimits {
            max_pages: self
                .max_pages
                .or(fallback.max_pages)
                .unwrap_or(defaults.max_pages),
            max_concurrent_browsers: self
                .max_concurrent_browsers
                .or(fallback.max_concurrent_browsers)
                .unwrap_or(defaults.max_concurrent_browsers),
            retries: self
                .retries
                .or(fallback.retries)
                .unwrap_or(defaults.retries),
        }
    }
}
