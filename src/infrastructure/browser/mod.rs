//! WebDriver-backed session driver for the survey portal.
//!
//! The harvester talks to the page exclusively through the [`SurveySession`]
//! trait, so the whole export flow can be exercised against a scripted
//! session in tests. [`WebDriverSession`] is the real implementation over a
//! remote geckodriver.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use thirtyfour::common::capabilities::firefox::FirefoxPreferences;
use thirtyfour::{By, DesiredCapabilities, WebDriver};

use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::BrowserConfig;

const VISIBILITY_POLL: Duration = Duration::from_millis(500);

/// MIME types the browser saves to disk without prompting.
const AUTO_SAVE_MIME_TYPES: &str = "text/csv, text/tab-separated-values, \
     application/vnd.ms-excel, \
     application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Element lookup key: a stable id or a class grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Class(String),
}

impl Locator {
    pub fn id(name: &str) -> Self {
        Locator::Id(name.to_string())
    }

    pub fn class(name: &str) -> Self {
        Locator::Class(name.to_string())
    }

    fn by(&self) -> By {
        match self {
            Locator::Id(name) => By::Id(name),
            Locator::Class(name) => By::ClassName(name),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(name) => write!(f, "#{}", name),
            Locator::Class(name) => write!(f, ".{}", name),
        }
    }
}

/// Capability interface the harvester drives the page through.
///
/// Lookups never error on absence: `await_visible` reports `false` after the
/// bounded timeout and `text_of` returns `None`, leaving the caller to decide
/// whether absence is fatal.
#[async_trait]
pub trait SurveySession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Wait, bounded by the session timeout, for an element to be visible.
    async fn await_visible(&self, locator: &Locator) -> bool;

    /// Text of the first matching element, if any.
    async fn text_of(&self, locator: &Locator) -> Option<String>;

    async fn click(&self, locator: &Locator) -> Result<()>;

    /// Click the nth matching element (zero-based).
    async fn click_nth(&self, locator: &Locator, index: usize) -> Result<()>;

    /// Number of elements currently matching the locator.
    async fn visible_count(&self, locator: &Locator) -> usize;

    async fn type_into(&self, locator: &Locator, text: &str) -> Result<()>;
}

/// Live browser session against a remote geckodriver endpoint.
///
/// Downloads land in the directory configured at `open` time; that directory
/// is the only filesystem this component touches.
pub struct WebDriverSession {
    driver: Option<WebDriver>,
    element_timeout: Duration,
}

impl WebDriverSession {
    pub async fn open(config: &BrowserConfig, download_dir: &Path) -> Result<Self> {
        let mut caps = DesiredCapabilities::firefox();
        if config.headless {
            caps.set_headless()
                .map_err(|e| AppError::Session(format!("failed to set headless mode: {}", e)))?;
        }

        let pref_err =
            |e: thirtyfour::error::WebDriverError| AppError::Session(format!("failed to set download preferences: {}", e));
        let mut prefs = FirefoxPreferences::new();
        prefs
            .set("browser.download.dir", download_dir.to_string_lossy().to_string())
            .map_err(pref_err)?;
        prefs.set("browser.download.folderList", 2).map_err(pref_err)?;
        prefs.set("browser.download.useDownloadDir", true).map_err(pref_err)?;
        prefs
            .set("browser.download.manager.showWhenStarting", false)
            .map_err(pref_err)?;
        prefs
            .set("browser.download.viewableInternally.enabledTypes", "")
            .map_err(pref_err)?;
        prefs
            .set("browser.helperApps.neverAsk.saveToDisk", AUTO_SAVE_MIME_TYPES)
            .map_err(pref_err)?;
        caps.set_preferences(prefs).map_err(pref_err)?;

        let driver = WebDriver::new(&config.server_url, caps).await.map_err(|e| {
            AppError::Session(format!(
                "could not reach webdriver at {}: {}",
                config.server_url, e
            ))
        })?;

        Ok(Self {
            driver: Some(driver),
            element_timeout: config.element_timeout,
        })
    }

    /// Quit the browser. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            driver
                .quit()
                .await
                .map_err(|e| AppError::Session(format!("failed to quit browser: {}", e)))?;
        }
        Ok(())
    }

    fn driver(&self) -> Result<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| AppError::Session("session already closed".to_string()))
    }
}

#[async_trait]
impl SurveySession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.driver()?
            .goto(url)
            .await
            .map_err(|e| AppError::Session(format!("navigation to {} failed: {}", url, e)))
    }

    async fn await_visible(&self, locator: &Locator) -> bool {
        let Ok(driver) = self.driver() else {
            return false;
        };
        let deadline = Instant::now() + self.element_timeout;
        loop {
            if let Ok(element) = driver.find(locator.by()).await {
                if element.is_displayed().await.unwrap_or(false) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(VISIBILITY_POLL).await;
        }
    }

    async fn text_of(&self, locator: &Locator) -> Option<String> {
        let driver = self.driver().ok()?;
        let element = driver.find(locator.by()).await.ok()?;
        element.text().await.ok()
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let element = self
            .driver()?
            .find(locator.by())
            .await
            .map_err(|e| AppError::Session(format!("element {} not found: {}", locator, e)))?;
        element
            .click()
            .await
            .map_err(|e| AppError::Session(format!("click on {} failed: {}", locator, e)))
    }

    async fn click_nth(&self, locator: &Locator, index: usize) -> Result<()> {
        let elements = self
            .driver()?
            .find_all(locator.by())
            .await
            .map_err(|e| AppError::Session(format!("lookup of {} failed: {}", locator, e)))?;
        let element = elements.get(index).ok_or_else(|| {
            AppError::Session(format!("no element {} at index {}", locator, index))
        })?;
        element
            .click()
            .await
            .map_err(|e| AppError::Session(format!("click on {}[{}] failed: {}", locator, index, e)))
    }

    async fn visible_count(&self, locator: &Locator) -> usize {
        match self.driver() {
            Ok(driver) => driver
                .find_all(locator.by())
                .await
                .map(|elements| elements.len())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    async fn type_into(&self, locator: &Locator, text: &str) -> Result<()> {
        let element = self
            .driver()?
            .find(locator.by())
            .await
            .map_err(|e| AppError::Session(format!("element {} not found: {}", locator, e)))?;
        element
            .send_keys(text)
            .await
            .map_err(|e| AppError::Session(format!("typing into {} failed: {}", locator, e)))
    }
}
