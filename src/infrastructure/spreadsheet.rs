//! Raw export reading and cleaned table writing.

use calamine::{open_workbook, Data, DataType, Reader, Xlsx};
use chrono::NaiveDateTime;
use csv::WriterBuilder;
use std::path::Path;

use crate::domain::error::{AppError, Result};
use crate::domain::response::{CleanedLongTable, RawExport, Submission, IDENTITY_COLUMNS};

/// Portal exports carry two metadata rows before the header.
const METADATA_ROWS: usize = 2;

const OUTPUT_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp renderings seen in portal exports that are not native Excel
/// datetime cells.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%y %H:%M",
];

/// Read a downloaded response export: skip the metadata rows, take the header
/// as identity + question columns, and parse every remaining non-empty row.
pub fn read_raw_export(path: &Path) -> Result<RawExport> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .map_err(|e| AppError::Parse(format!("failed to open export {}: {}", path.display(), e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Parse(format!("no worksheet in export {}", path.display())))?
        .map_err(|e| AppError::Parse(format!("failed to read export sheet: {}", e)))?;

    let mut rows = range.rows().skip(METADATA_ROWS);
    let header = rows
        .next()
        .ok_or_else(|| AppError::Parse("export sheet has no header row".to_string()))?;
    if header.len() < IDENTITY_COLUMNS {
        return Err(AppError::Parse(format!(
            "export header has {} columns, expected at least {}",
            header.len(),
            IDENTITY_COLUMNS
        )));
    }
    let questions: Vec<String> = header[IDENTITY_COLUMNS..].iter().map(cell_string).collect();

    let mut submissions = Vec::new();
    for (index, row) in rows.enumerate() {
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let submission = submission_from_cells(row, questions.len()).map_err(|err| match err {
            AppError::Parse(msg) => AppError::Parse(format!("row {}: {}", index + 1, msg)),
            other => other,
        })?;
        submissions.push(submission);
    }

    Ok(RawExport {
        questions,
        rows: submissions,
    })
}

fn submission_from_cells(cells: &[Data], question_count: usize) -> Result<Submission> {
    let serial = cells.first().map(cell_string).unwrap_or_default();
    let sid = cells.get(1).map(cell_string).unwrap_or_default();
    let completed_at = cell_timestamp(cells.get(2), "completed")?;
    let submitted_at = cell_timestamp(cells.get(3), "submitted")?;

    let mut answers: Vec<Option<String>> =
        cells.iter().skip(IDENTITY_COLUMNS).map(cell_value).collect();
    answers.resize(question_count, None);

    Ok(Submission {
        serial,
        sid,
        completed_at,
        submitted_at,
        answers,
    })
}

fn cell_string(cell: &Data) -> String {
    cell.as_string()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}", cell))
}

fn cell_value(cell: &Data) -> Option<String> {
    if cell.is_empty() {
        None
    } else {
        Some(cell_string(cell))
    }
}

fn cell_timestamp(cell: Option<&Data>, column: &str) -> Result<NaiveDateTime> {
    let cell = cell.ok_or_else(|| AppError::Parse(format!("missing {} timestamp", column)))?;
    if let Some(timestamp) = cell.as_datetime() {
        return Ok(timestamp);
    }
    let text = cell_string(cell);
    for format in TIMESTAMP_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(text.trim(), format) {
            return Ok(timestamp);
        }
    }
    Err(AppError::Parse(format!(
        "unreadable {} timestamp: {:?}",
        column, text
    )))
}

/// Write the cleaned long table as CSV into the scratch directory.
pub fn write_long_csv(table: &CleanedLongTable, path: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .map_err(|e| AppError::Io(format!("failed to create {}: {}", path.display(), e)))?;

    writer
        .write_record([
            "Serial",
            "SID",
            "Completed Time",
            "Submitted Time",
            "survey",
            "Question",
            "Response",
        ])
        .map_err(|e| AppError::Io(format!("failed to write header: {}", e)))?;

    for record in &table.records {
        let completed = record.completed_at.format(OUTPUT_TIMESTAMP).to_string();
        let submitted = record.submitted_at.format(OUTPUT_TIMESTAMP).to_string();
        writer
            .write_record([
                record.serial.as_str(),
                record.sid.as_str(),
                completed.as_str(),
                submitted.as_str(),
                record.survey.as_str(),
                record.question.as_str(),
                record.response.as_str(),
            ])
            .map_err(|e| AppError::Io(format!("failed to write record: {}", e)))?;
    }

    writer
        .flush()
        .map_err(|e| AppError::Io(format!("failed to flush {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::response::LongRecord;
    use chrono::NaiveDate;

    fn timestamp(hms: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 5, 30)
            .unwrap()
            .and_hms_opt(hms.0, hms.1, hms.2)
            .unwrap()
    }

    #[test]
    fn test_submission_from_string_cells() {
        let cells = vec![
            Data::String("1".to_string()),
            Data::String("9001".to_string()),
            Data::String("2021-05-30 10:00:05".to_string()),
            Data::String("2021-05-30 10:00:00".to_string()),
            Data::String("Yes".to_string()),
            Data::Empty,
            Data::Float(4.0),
        ];
        let submission = submission_from_cells(&cells, 3).unwrap();
        assert_eq!(submission.serial, "1");
        assert_eq!(submission.sid, "9001");
        assert_eq!(submission.submitted_at, timestamp((10, 0, 0)));
        assert_eq!(
            submission.answers,
            vec![Some("Yes".to_string()), None, Some("4".to_string())]
        );
    }

    #[test]
    fn test_short_row_padded_to_question_count() {
        let cells = vec![
            Data::String("2".to_string()),
            Data::String("9002".to_string()),
            Data::String("2021-05-30 11:00:00".to_string()),
            Data::String("2021-05-30 11:00:00".to_string()),
            Data::String("No".to_string()),
        ];
        let submission = submission_from_cells(&cells, 3).unwrap();
        assert_eq!(submission.answers.len(), 3);
        assert_eq!(submission.answers[1], None);
        assert_eq!(submission.answers[2], None);
    }

    #[test]
    fn test_unreadable_timestamp_is_a_parse_error() {
        let cells = vec![
            Data::String("3".to_string()),
            Data::String("9003".to_string()),
            Data::String("yesterday".to_string()),
            Data::String("2021-05-30 11:00:00".to_string()),
        ];
        assert!(matches!(
            submission_from_cells(&cells, 0),
            Err(AppError::Parse(_))
        ));
    }

    #[test]
    fn test_slash_timestamp_format_accepted() {
        let parsed = cell_timestamp(
            Some(&Data::String("05/30/2021 10:15:00".to_string())),
            "submitted",
        )
        .unwrap();
        assert_eq!(parsed, timestamp((10, 15, 0)));
    }

    #[test]
    fn test_write_long_csv_round_trip() {
        let table = CleanedLongTable {
            records: vec![LongRecord {
                serial: "1".to_string(),
                sid: "9001".to_string(),
                completed_at: timestamp((10, 0, 5)),
                submitted_at: timestamp((10, 0, 0)),
                survey: "Secondary student".to_string(),
                question: "Overall, how satisfied were you?".to_string(),
                response: "Very satisfied".to_string(),
            }],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleaned.csv");
        write_long_csv(&table, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[4], "survey");
        assert_eq!(&headers[5], "Question");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][3], "2021-05-30 10:00:00");
        assert_eq!(&rows[0][6], "Very satisfied");
    }
}
