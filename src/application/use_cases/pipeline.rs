//! Sequential survey pipeline with per-survey failure isolation.

use chrono::{DateTime, Timelike, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::application::use_cases::dedup::Deduplicator;
use crate::application::use_cases::harvester::{Harvest, ResponseHarvester};
use crate::domain::error::{AppError, Result};
use crate::domain::response::{HarvestOutcome, RunReport};
use crate::domain::survey::SurveyConfig;
use crate::infrastructure::browser::WebDriverSession;
use crate::infrastructure::config::Settings;
use crate::infrastructure::display::VirtualDisplay;
use crate::infrastructure::sharepoint::PublicationSink;
use crate::infrastructure::spreadsheet::{read_raw_export, write_long_csv};
use crate::infrastructure::telegram::Notifier;

const BUCKET_HEADING: &str = "%a %b %d, %I:%M %p";

pub struct Pipeline<P, N> {
    settings: Settings,
    sink: P,
    notifier: N,
}

impl<P: PublicationSink, N: Notifier> Pipeline<P, N> {
    pub fn new(settings: Settings, sink: P, notifier: N) -> Self {
        Self {
            settings,
            sink,
            notifier,
        }
    }

    /// Attempt every configured survey, then report. One survey's failure
    /// never prevents the remaining surveys from being attempted; only the
    /// final sink read-back and notification are terminal.
    pub async fn run(&self) -> Result<RunReport> {
        let scratch = TempDir::new()
            .map_err(|e| AppError::Io(format!("failed to create scratch directory: {}", e)))?;

        let mut report = RunReport::default();
        for survey in &self.settings.surveys {
            let result = self.process_survey(survey, scratch.path()).await;
            record_outcome(&mut report, survey, result);
        }

        let files = self.sink.list_with_modified_time().await?;
        self.notifier.notify(&format_status_message(&files)).await?;
        Ok(report)
    }

    /// One survey, start to finish: harvest inside a fresh display/session
    /// pair, then dedup, write, and publish. The session and display are
    /// torn down on success and failure alike.
    async fn process_survey(
        &self,
        survey: &SurveyConfig,
        scratch: &Path,
    ) -> Result<HarvestOutcome> {
        let download_dir = scratch.join(format!("download-{}", survey.id));
        std::fs::create_dir_all(&download_dir).map_err(|e| {
            AppError::Io(format!("failed to create {}: {}", download_dir.display(), e))
        })?;

        let _display = VirtualDisplay::start();
        let mut session = WebDriverSession::open(&self.settings.browser, &download_dir).await?;
        let harvest = ResponseHarvester::new(&session, &self.settings.portal, &download_dir)
            .run(survey)
            .await;
        if let Err(err) = session.close().await {
            warn!("Failed to close browser session: {}", err);
        }

        match harvest? {
            Harvest::Empty => Ok(HarvestOutcome::Empty),
            Harvest::Downloaded {
                file,
                response_count,
            } => {
                info!("Opening file");
                let raw = read_raw_export(&file)?;
                let cleaned =
                    Deduplicator::new(survey.completion_threshold).clean(raw, &survey.name);

                let output = scratch.join(&survey.file);
                write_long_csv(&cleaned, &output)?;
                self.sink.upload(&output, &survey.file).await?;
                info!("------ Completed ({} - {}) ------", survey.id, survey.name);
                Ok(HarvestOutcome::Success {
                    file: survey.file.clone(),
                    response_count,
                })
            }
        }
    }
}

/// Fold a per-survey result into the report; errors become `Failed` entries
/// instead of unwinding the loop.
fn record_outcome(report: &mut RunReport, survey: &SurveyConfig, result: Result<HarvestOutcome>) {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Survey {} ({}) failed: {}", survey.id, survey.name, err);
            HarvestOutcome::Failed {
                cause: err.to_string(),
            }
        }
    };
    report.record(survey, outcome);
}

/// Render published files grouped by modification-time bucket: a bold
/// heading per bucket, one line per filename.
pub fn format_status_message(files: &BTreeMap<String, DateTime<Utc>>) -> String {
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<&str>> = BTreeMap::new();
    for (name, modified) in files {
        let bucket = modified
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(*modified);
        buckets.entry(bucket).or_default().push(name);
    }

    let mut message = String::new();
    for (bucket, names) in buckets {
        message.push_str(&format!("<b>{}</b>\n", bucket.format(BUCKET_HEADING)));
        for name in names {
            message.push_str(name);
            message.push('\n');
        }
        message.push('\n');
    }
    message
}
