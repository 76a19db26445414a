//! Time-windowed duplicate elimination and wide-to-long reshaping.
//!
//! Submissions with identical answers across every non-identity column are
//! treated as candidates for the same respondent re-submitting. Within such a
//! group, a row whose gap to the immediately preceding row (sorted by
//! submitted-at) is under the survey's completion threshold is dropped as a
//! rapid re-submit; rows spaced at or beyond the threshold are kept as
//! plausibly distinct attempts.

use std::collections::HashMap;
use tracing::info;

use crate::domain::response::{CleanedLongTable, LongRecord, RawExport, Submission};

pub struct Deduplicator {
    completion_threshold: Option<u64>,
}

impl Deduplicator {
    pub fn new(completion_threshold: Option<u64>) -> Self {
        Self {
            completion_threshold,
        }
    }

    /// Remove windowed duplicates and reshape to one row per answer.
    pub fn clean(&self, raw: RawExport, survey_name: &str) -> CleanedLongTable {
        let (total, width) = raw.shape();
        info!("Found [rows, columns]: [{}, {}]", total, width);

        let retained = match self.completion_threshold {
            Some(threshold) => {
                info!("Removing duplicates");
                retain_spaced_rows(raw.rows, threshold)
            }
            None => {
                info!("Completion threshold disabled, keeping all rows");
                raw.rows
            }
        };

        let removed = total - retained.len();
        let removed_pct = if total == 0 {
            0.0
        } else {
            removed as f64 / total as f64 * 100.0
        };
        info!(
            "Final [rows, columns]: [{}, {}] - {} ({:.1}%) duplicates removed",
            retained.len(),
            width,
            removed,
            removed_pct
        );

        reshape_long(&raw.questions, retained, survey_name)
    }
}

/// Drop every row whose gap to its predecessor within the same fingerprint
/// group (sorted by submitted-at, stable on ties) is strictly under the
/// threshold. Survivors keep their original table order.
fn retain_spaced_rows(rows: Vec<Submission>, threshold: u64) -> Vec<Submission> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, row) in rows.iter().enumerate() {
        groups.entry(row.fingerprint()).or_default().push(index);
    }

    let mut dropped = vec![false; rows.len()];
    for indices in groups.values_mut() {
        indices.sort_by_key(|&index| rows[index].submitted_at);
        for pair in indices.windows(2) {
            let gap = (rows[pair[1]].submitted_at - rows[pair[0]].submitted_at).num_seconds();
            if gap < threshold as i64 {
                dropped[pair[1]] = true;
            }
        }
    }

    rows.into_iter()
        .enumerate()
        .filter(|(index, _)| !dropped[*index])
        .map(|(_, row)| row)
        .collect()
}

/// One output row per answered question; unanswered cells are skipped.
fn reshape_long(
    questions: &[String],
    rows: Vec<Submission>,
    survey_name: &str,
) -> CleanedLongTable {
    let mut records = Vec::new();
    for row in rows {
        for (question, answer) in questions.iter().zip(row.answers.iter()) {
            if let Some(response) = answer {
                records.push(LongRecord {
                    serial: row.serial.clone(),
                    sid: row.sid.clone(),
                    completed_at: row.completed_at,
                    submitted_at: row.submitted_at,
                    survey: survey_name.to_string(),
                    question: question.clone(),
                    response: response.clone(),
                });
            }
        }
    }
    CleanedLongTable { records }
}
