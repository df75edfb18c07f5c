use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::{browser::default_executable, Browser, LaunchOptions};
use std::time::Duration;
use tokio::task;

use crate::{
    extractor::extract,
    fetcher::{Extraction, Fetcher},
    sites::Schema,
    types::FetchError,
};

/// One browser session: launched on creation, killed on drop.
pub struct BrowserController {
    browser: Browser,
    timeout: Duration,
}

pub enum Rendered {
    Html(String),
    // the schema marker never showed up
    MarkerMissing,
}

impl BrowserController {
    pub fn new(headless: bool, timeout: Duration) -> Result<Self> {
        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let path = default_executable().map_err(|e| anyhow!(e))?;
        let options = LaunchOptions::default_builder()
            .path(Some(path))
            .headless(headless)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(timeout)
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .build()
            .map_err(|e| anyhow!("invalid browser launch options: {}", e))?;
        let browser = Browser::new(options).context("browser launching error")?;

        Ok(BrowserController { browser, timeout })
    }

    pub fn render(&self, url: &str, wait_for: Option<&str>) -> Result<Rendered> {
        let tab = self.browser.new_tab().context("could not create new tab")?;
        tab.set_default_timeout(self.timeout);

        let nv = match tab.navigate_to(url) {
            Ok(t) => t,
            Err(e) => {
                warn!("could not navigate to {} with error {}, retrying once", url, e);
                tab.navigate_to(url)?
            }
        };
        nv.wait_until_navigated()
            .context(format!("navigation to {} did not settle", url))?;

        if let Some(selector) = wait_for {
            if let Err(e) = tab.wait_for_element_with_custom_timeout(selector, self.timeout) {
                debug!("{} never rendered {}: {}", url, selector, e);
                return Ok(Rendered::MarkerMissing);
            }
        }

        let html = tab
            .get_content()
            .context(format!("could not read content of {}", url))?;
        Ok(Rendered::Html(html))
    }
}

pub struct BrowserFetcher {
    headless: bool,
    timeout: Duration,
}

impl BrowserFetcher {
    pub fn new(headless: bool, timeout: Duration) -> Self {
        BrowserFetcher { headless, timeout }
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch_and_extract(
        &self,
        url: &str,
        schema: &Schema,
    ) -> Result<Extraction, FetchError> {
        let headless = self.headless;
        let timeout = self.timeout;
        let u = url.to_string();
        let wait_for = schema.wait_for.clone();

        // headless_chrome is blocking, keep it off the runtime threads
        let rendered = task::spawn_blocking(move || {
            let browser = BrowserController::new(headless, timeout)?;
            browser.render(&u, wait_for.as_deref())
        })
        .await
        .map_err(|e| FetchError::Transient(format!("browser task for {} failed: {}", url, e)))?
        .map_err(|e| FetchError::Transient(format!("{:#}", e)))?;

        match rendered {
            Rendered::Html(html) => extract(&html, schema),
            Rendered::MarkerMissing => Ok(Extraction::no_match()),
        }
    }
}
