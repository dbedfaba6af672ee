//! `student_id,status,notes` register files.

use std::io::{Read, Write};

use serde::Serialize;

use crate::backend::{RecordedMark, SaveEntry};
use crate::session::AttendanceStatus;

pub const CSV_HEADER: [&str; 3] = ["student_id", "status", "notes"];

#[derive(Debug, thiserror::Error)]
pub enum CsvError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv header is missing the {0} column")]
    MissingColumn(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvWarning {
    pub line: u64,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct CsvImport {
    pub entries: Vec<SaveEntry>,
    pub warnings: Vec<CsvWarning>,
    pub total_rows: usize,
}

pub fn write_attendance_csv<W: Write>(out: W, marks: &[RecordedMark]) -> Result<(), CsvError> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(CSV_HEADER)?;
    for m in marks {
        wtr.write_record([m.student_id.as_str(), m.status.as_str(), m.notes.as_str()])?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

fn column(headers: &csv::StringRecord, name: &'static str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

/// Parses a register. Rows with a blank id or an unknown status are skipped
/// and reported; a later row for the same student replaces an earlier one.
pub fn read_attendance_csv<R: Read>(input: R) -> Result<CsvImport, CsvError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers = rdr.headers()?.clone();
    let id_col = column(&headers, "student_id").ok_or(CsvError::MissingColumn("student_id"))?;
    let status_col = column(&headers, "status").ok_or(CsvError::MissingColumn("status"))?;
    let notes_col = column(&headers, "notes");

    let mut out = CsvImport::default();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        out.total_rows += 1;

        let student_id = record.get(id_col).unwrap_or("");
        if student_id.is_empty() {
            out.warnings.push(CsvWarning {
                line,
                code: "missing_student_id",
                message: "student_id is required".to_string(),
            });
            continue;
        }
        let raw_status = record.get(status_col).unwrap_or("");
        let Some(status) = AttendanceStatus::parse(raw_status) else {
            out.warnings.push(CsvWarning {
                line,
                code: "bad_status",
                message: format!("status must be present, absent or late (got {:?})", raw_status),
            });
            continue;
        };
        let notes = notes_col
            .and_then(|c| record.get(c))
            .unwrap_or("")
            .to_string();

        let entry = SaveEntry {
            student_id: student_id.to_string(),
            status,
            notes,
        };
        match out.entries.iter_mut().find(|e| e.student_id == entry.student_id) {
            Some(existing) => *existing = entry,
            None => out.entries.push(entry),
        }
    }
    Ok(out)
}
