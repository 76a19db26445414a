//! Per-survey export harvest: login, navigate, read the response count,
//! trigger the export, and detect the downloaded file.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::domain::error::{AppError, Result};
use crate::domain::survey::SurveyConfig;
use crate::infrastructure::browser::{Locator, SurveySession};
use crate::infrastructure::config::PortalConfig;

const USERNAME_FIELD: &str = "edit-name";
const PASSWORD_FIELD: &str = "edit-pass";
const SUBMIT_BUTTON: &str = "edit-submit";
const EXPORT_SCREEN_MARKER: &str = "edit-format-delimited";
const POST_EXPORT_MARKER: &str = "edit-format-excel";
const RESPONSE_RANGE_FIELD: &str = "edit-range-range-type";
const SECTION_TITLE_CLASS: &str = "fieldset-title";

/// The download settings subsection is the third collapsible section when the
/// export screen shows all of them; it must be expanded before the response
/// count is reachable.
const SETTINGS_SECTION_COUNT: usize = 3;
const SETTINGS_SECTION_INDEX: usize = 2;

/// Count is embedded in text like "All submissions (42 total)".
static RESPONSE_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+)").unwrap());

/// Non-failure result of one harvest.
#[derive(Debug, Clone, PartialEq)]
pub enum Harvest {
    /// The portal reported zero responses; no export was triggered.
    Empty,
    Downloaded {
        file: PathBuf,
        response_count: u64,
    },
}

/// Bounds for the download polling loop.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
    /// Extra wait after growth is detected, so a file still being written is
    /// not picked up mid-flight.
    pub settle: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_secs(1),
            settle: Duration::from_secs(1),
        }
    }
}

pub struct ResponseHarvester<'a, S: SurveySession> {
    session: &'a S,
    portal: &'a PortalConfig,
    download_dir: PathBuf,
    poll: PollPolicy,
}

impl<'a, S: SurveySession> ResponseHarvester<'a, S> {
    pub fn new(session: &'a S, portal: &'a PortalConfig, download_dir: &Path) -> Self {
        Self {
            session,
            portal,
            download_dir: download_dir.to_path_buf(),
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub async fn run(&self, survey: &SurveyConfig) -> Result<Harvest> {
        info!("Starting browser ({} - {})", survey.id, survey.name);
        self.log_in().await?;
        info!("Navigating to survey responses");
        self.open_export_screen(survey).await?;

        let response_count = self.read_response_count().await?;
        info!("Responses to date: {}", response_count);
        if response_count == 0 {
            return Ok(Harvest::Empty);
        }

        let file = self.download_export().await?;
        info!("File downloaded: {}", file.display());
        Ok(Harvest::Downloaded {
            file,
            response_count,
        })
    }

    async fn log_in(&self) -> Result<()> {
        self.session.navigate(&self.portal.login_url).await?;

        let username = Locator::id(USERNAME_FIELD);
        if !self.session.await_visible(&username).await {
            return Err(AppError::AuthFailure("login form never appeared".to_string()));
        }
        self.session.type_into(&username, &self.portal.username).await?;

        let password = Locator::id(PASSWORD_FIELD);
        if !self.session.await_visible(&password).await {
            return Err(AppError::AuthFailure(
                "password field never appeared".to_string(),
            ));
        }
        self.session.type_into(&password, &self.portal.password).await?;

        self.session.click(&Locator::id(SUBMIT_BUTTON)).await
    }

    async fn open_export_screen(&self, survey: &SurveyConfig) -> Result<()> {
        let url = format!(
            "{}/node/{}/webform-results/download",
            self.portal.base_url, survey.id
        );
        self.session.navigate(&url).await?;
        if !self
            .session
            .await_visible(&Locator::id(EXPORT_SCREEN_MARKER))
            .await
        {
            return Err(AppError::NavigationTimeout(format!(
                "export screen for survey {} never rendered",
                survey.id
            )));
        }
        Ok(())
    }

    async fn read_response_count(&self) -> Result<u64> {
        let sections = Locator::class(SECTION_TITLE_CLASS);
        if self.session.await_visible(&sections).await
            && self.session.visible_count(&sections).await == SETTINGS_SECTION_COUNT
        {
            self.session
                .click_nth(&sections, SETTINGS_SECTION_INDEX)
                .await?;
        }

        match self
            .session
            .text_of(&Locator::id(RESPONSE_RANGE_FIELD))
            .await
        {
            Some(text) => parse_response_count(&text),
            None => Ok(0),
        }
    }

    async fn download_export(&self) -> Result<PathBuf> {
        let before = directory_snapshot(&self.download_dir)?;
        info!("Downloading responses");
        self.session.click(&Locator::id(SUBMIT_BUTTON)).await?;
        let _ = self
            .session
            .await_visible(&Locator::id(POST_EXPORT_MARKER))
            .await;
        info!("Waiting for download to complete");

        let mut grew = false;
        for _ in 0..self.poll.attempts {
            if directory_snapshot(&self.download_dir)?.len() > before.len() {
                grew = true;
                break;
            }
            tokio::time::sleep(self.poll.interval).await;
        }
        if !grew {
            return Err(AppError::DownloadTimeout(format!(
                "no new files in {} after {} attempts",
                self.download_dir.display(),
                self.poll.attempts
            )));
        }
        tokio::time::sleep(self.poll.settle).await;

        let after = directory_snapshot(&self.download_dir)?;
        let new_files: Vec<&String> = after.difference(&before).collect();
        match new_files.as_slice() {
            [only] => Ok(self.download_dir.join(only.as_str())),
            [] => Err(AppError::DownloadTimeout(
                "downloaded file disappeared before it could be read".to_string(),
            )),
            many => Err(AppError::AmbiguousDownload(format!(
                "{} new files appeared at once: {}",
                many.len(),
                many.iter().map(|name| name.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

fn parse_response_count(text: &str) -> Result<u64> {
    let captures = RESPONSE_COUNT.captures(text).ok_or_else(|| {
        AppError::Parse(format!("unrecognized response count text: {:?}", text))
    })?;
    captures[1]
        .parse::<u64>()
        .map_err(|e| AppError::Parse(format!("bad response count in {:?}: {}", text, e)))
}

fn directory_snapshot(dir: &Path) -> Result<BTreeSet<String>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AppError::Io(format!("failed to list {}: {}", dir.display(), e)))?;
    let mut names = BTreeSet::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| AppError::Io(format!("failed to list {}: {}", dir.display(), e)))?;
        if entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
            names.insert(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Session double driven by a fixed script: which elements are visible,
    /// what they say, and which files each submit click drops into the
    /// download directory.
    #[derive(Default)]
    struct ScriptedSession {
        visible: HashSet<String>,
        texts: HashMap<String, String>,
        class_counts: HashMap<String, usize>,
        clicks: Mutex<Vec<String>>,
        submit_batches: Mutex<VecDeque<Vec<PathBuf>>>,
    }

    fn key(locator: &Locator) -> String {
        match locator {
            Locator::Id(name) => format!("id:{}", name),
            Locator::Class(name) => format!("class:{}", name),
        }
    }

    impl ScriptedSession {
        fn show(&mut self, locator: &Locator) {
            self.visible.insert(key(locator));
        }

        fn submit_clicks(&self) -> usize {
            self.clicks
                .lock()
                .unwrap()
                .iter()
                .filter(|entry| *entry == &format!("id:{}", SUBMIT_BUTTON))
                .count()
        }

        fn with_login_screen() -> Self {
            let mut session = Self::default();
            session.show(&Locator::id(USERNAME_FIELD));
            session.show(&Locator::id(PASSWORD_FIELD));
            session
        }

        fn with_export_screen(count_text: &str) -> Self {
            let mut session = Self::with_login_screen();
            session.show(&Locator::id(EXPORT_SCREEN_MARKER));
            session.show(&Locator::class(SECTION_TITLE_CLASS));
            session
                .class_counts
                .insert(key(&Locator::class(SECTION_TITLE_CLASS)), 3);
            session.texts.insert(
                key(&Locator::id(RESPONSE_RANGE_FIELD)),
                count_text.to_string(),
            );
            session
        }
    }

    #[async_trait]
    impl SurveySession for ScriptedSession {
        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn await_visible(&self, locator: &Locator) -> bool {
            self.visible.contains(&key(locator))
        }

        async fn text_of(&self, locator: &Locator) -> Option<String> {
            self.texts.get(&key(locator)).cloned()
        }

        async fn click(&self, locator: &Locator) -> Result<()> {
            let clicked = key(locator);
            if clicked == format!("id:{}", SUBMIT_BUTTON) {
                if let Some(batch) = self.submit_batches.lock().unwrap().pop_front() {
                    for path in batch {
                        std::fs::write(&path, b"export").unwrap();
                    }
                }
            }
            self.clicks.lock().unwrap().push(clicked);
            Ok(())
        }

        async fn click_nth(&self, locator: &Locator, index: usize) -> Result<()> {
            self.clicks
                .lock()
                .unwrap()
                .push(format!("{}[{}]", key(locator), index));
            Ok(())
        }

        async fn visible_count(&self, locator: &Locator) -> usize {
            self.class_counts.get(&key(locator)).copied().unwrap_or(0)
        }

        async fn type_into(&self, _locator: &Locator, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    fn portal() -> PortalConfig {
        PortalConfig {
            login_url: "https://portal.test/user".to_string(),
            base_url: "https://portal.test".to_string(),
            username: "operator".to_string(),
            password: "secret".to_string(),
        }
    }

    fn survey() -> SurveyConfig {
        SurveyConfig {
            id: "45401".to_string(),
            file: "student.csv".to_string(),
            name: "Secondary student".to_string(),
            completion_threshold: Some(60),
        }
    }

    fn fast_poll() -> PollPolicy {
        PollPolicy {
            attempts: 3,
            interval: Duration::from_millis(1),
            settle: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_login_failure_when_form_never_appears() {
        let session = ScriptedSession::default();
        let portal = portal();
        let dir = TempDir::new().unwrap();
        let harvester = ResponseHarvester::new(&session, &portal, dir.path());
        assert!(matches!(
            harvester.run(&survey()).await,
            Err(AppError::AuthFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_navigation_timeout_when_export_screen_missing() {
        let session = ScriptedSession::with_login_screen();
        let portal = portal();
        let dir = TempDir::new().unwrap();
        let harvester = ResponseHarvester::new(&session, &portal, dir.path());
        assert!(matches!(
            harvester.run(&survey()).await,
            Err(AppError::NavigationTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_responses_short_circuits_to_empty() {
        let mut session = ScriptedSession::with_login_screen();
        session.show(&Locator::id(EXPORT_SCREEN_MARKER));
        // No count element at all reads as zero responses.
        let portal = portal();
        let dir = TempDir::new().unwrap();
        let harvester = ResponseHarvester::new(&session, &portal, dir.path());

        let harvest = harvester.run(&survey()).await.unwrap();
        assert_eq!(harvest, Harvest::Empty);
        // Only the login submit was clicked; no export was triggered.
        assert_eq!(session.submit_clicks(), 1);
    }

    #[tokio::test]
    async fn test_settings_section_expanded_when_three_sections() {
        let session = ScriptedSession::with_export_screen("All submissions (5 total)");
        let portal = portal();
        let dir = TempDir::new().unwrap();
        let harvester = ResponseHarvester::new(&session, &portal, dir.path());

        let count = harvester.read_response_count().await.unwrap();
        assert_eq!(count, 5);
        let clicks = session.clicks.lock().unwrap().clone();
        assert!(clicks.contains(&format!("class:{}[{}]", SECTION_TITLE_CLASS, 2)));
    }

    #[tokio::test]
    async fn test_download_selects_single_new_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.xlsx"), b"old").unwrap();
        std::fs::write(dir.path().join("b.xlsx"), b"old").unwrap();

        let session = ScriptedSession::with_export_screen("All submissions (2 total)");
        session
            .submit_batches
            .lock()
            .unwrap()
            .push_back(vec![dir.path().join("c.xlsx")]);
        let portal = portal();
        let harvester =
            ResponseHarvester::new(&session, &portal, dir.path()).with_poll_policy(fast_poll());

        let file = harvester.download_export().await.unwrap();
        assert_eq!(file, dir.path().join("c.xlsx"));
    }

    #[tokio::test]
    async fn test_two_new_files_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let session = ScriptedSession::with_export_screen("All submissions (2 total)");
        session.submit_batches.lock().unwrap().push_back(vec![
            dir.path().join("c.xlsx"),
            dir.path().join("d.xlsx"),
        ]);
        let portal = portal();
        let harvester =
            ResponseHarvester::new(&session, &portal, dir.path()).with_poll_policy(fast_poll());

        assert!(matches!(
            harvester.download_export().await,
            Err(AppError::AmbiguousDownload(_))
        ));
    }

    #[tokio::test]
    async fn test_no_new_file_times_out() {
        let dir = TempDir::new().unwrap();
        let session = ScriptedSession::with_export_screen("All submissions (2 total)");
        let portal = portal();
        let harvester =
            ResponseHarvester::new(&session, &portal, dir.path()).with_poll_policy(fast_poll());

        assert!(matches!(
            harvester.download_export().await,
            Err(AppError::DownloadTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_full_harvest_returns_file_and_count() {
        let dir = TempDir::new().unwrap();
        let mut session = ScriptedSession::with_export_screen("All submissions (7 total)");
        session.show(&Locator::id(POST_EXPORT_MARKER));
        session.submit_batches.lock().unwrap().push_back(Vec::new()); // login submit
        session
            .submit_batches
            .lock()
            .unwrap()
            .push_back(vec![dir.path().join("export.xlsx")]);
        let portal = portal();
        let harvester =
            ResponseHarvester::new(&session, &portal, dir.path()).with_poll_policy(fast_poll());

        let harvest = harvester.run(&survey()).await.unwrap();
        assert_eq!(
            harvest,
            Harvest::Downloaded {
                file: dir.path().join("export.xlsx"),
                response_count: 7,
            }
        );
        assert_eq!(session.submit_clicks(), 2);
    }

    #[test]
    fn test_parse_response_count_variants() {
        assert_eq!(
            parse_response_count("All submissions (42 total)").unwrap(),
            42
        );
        assert_eq!(parse_response_count("Responses (1)").unwrap(), 1);
        assert!(matches!(
            parse_response_count("no parenthetical here"),
            Err(AppError::Parse(_))
        ));
    }
}
