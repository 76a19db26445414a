use chrono::NaiveDateTime;
use serde::Serialize;

use crate::domain::survey::SurveyConfig;

/// Leading columns of a raw export, guaranteed unique per row: serial id,
/// submission id, completed-at, submitted-at. Everything after them is an
/// answer column.
pub const IDENTITY_COLUMNS: usize = 4;

/// One submission row of a raw export.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub serial: String,
    pub sid: String,
    pub completed_at: NaiveDateTime,
    pub submitted_at: NaiveDateTime,
    /// Answer cells aligned to the export's question columns; `None` is a
    /// cell the respondent left empty.
    pub answers: Vec<Option<String>>,
}

impl Submission {
    /// Grouping key over all answer values, identity columns excluded.
    /// Missing values contribute nothing, so they compare equal to empty.
    pub fn fingerprint(&self) -> String {
        self.answers.iter().flatten().map(String::as_str).collect()
    }
}

/// A raw response export: question labels plus one `Submission` per row.
#[derive(Debug, Clone)]
pub struct RawExport {
    pub questions: Vec<String>,
    pub rows: Vec<Submission>,
}

impl RawExport {
    /// (rows, columns) including the identity columns.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), IDENTITY_COLUMNS + self.questions.len())
    }
}

/// One answer of one retained submission, long form.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord {
    pub serial: String,
    pub sid: String,
    pub completed_at: NaiveDateTime,
    pub submitted_at: NaiveDateTime,
    pub survey: String,
    pub question: String,
    pub response: String,
}

/// Deduplicated, reshaped table ready for publication.
#[derive(Debug, Clone, Default)]
pub struct CleanedLongTable {
    pub records: Vec<LongRecord>,
}

/// Terminal result of one survey's harvest.
#[derive(Debug, Clone, Serialize)]
pub enum HarvestOutcome {
    Success { file: String, response_count: u64 },
    Empty,
    Failed { cause: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SurveyReport {
    pub survey_id: String,
    pub survey_name: String,
    pub outcome: HarvestOutcome,
}

/// Aggregated result of a full run, one entry per configured survey.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub surveys: Vec<SurveyReport>,
}

impl RunReport {
    pub fn record(&mut self, survey: &SurveyConfig, outcome: HarvestOutcome) {
        self.surveys.push(SurveyReport {
            survey_id: survey.id.clone(),
            survey_name: survey.name.clone(),
            outcome,
        });
    }

    pub fn attempted(&self) -> usize {
        self.surveys.len()
    }

    pub fn failed(&self) -> usize {
        self.surveys
            .iter()
            .filter(|entry| matches!(entry.outcome, HarvestOutcome::Failed { .. }))
            .count()
    }
}
