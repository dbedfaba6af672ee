//! Contract between attendance sessions and whatever stores attendance.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::AttendanceStatus;

pub const DEFAULT_REASONS: [&str; 4] = ["Sick", "Personal", "Travel", "Late Transport"];

/// One row of a save payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: String,
}

/// A mark as the backend has it stored. `status` stays raw: the backend is
/// not trusted to only hold the three known values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMark {
    pub student_id: String,
    pub status: String,
    #[serde(default)]
    pub notes: String,
}

/// Composite key used by the guided department/section/time-slot flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionKey {
    pub department_id: String,
    pub section: String,
    pub time_slot: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    pub saved: usize,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    NotFound,
    Invalid,
    AlreadySubmitted,
    Unavailable,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Invalid, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    /// IPC error code for this kind. `Invalid` and `Unavailable` go out as
    /// `rejected` and `backend_unavailable`.
    pub fn code(&self) -> &'static str {
        match self.kind {
            BackendErrorKind::NotFound => "not_found",
            BackendErrorKind::Invalid => "rejected",
            BackendErrorKind::AlreadySubmitted => "already_submitted",
            BackendErrorKind::Unavailable => "backend_unavailable",
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        Self::unavailable(e.to_string())
    }
}

pub trait AttendanceBackend {
    /// Raw roster payload; callers normalize it with `roster::normalize_roster`.
    fn class_students(&self, class_id: &str) -> Result<Value, BackendError>;

    fn class_attendance(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<RecordedMark>, BackendError>;

    fn save_class_attendance(
        &self,
        class_id: &str,
        date: NaiveDate,
        entries: &[SaveEntry],
    ) -> Result<SaveReceipt, BackendError>;

    fn section_students(&self, key: &SectionKey) -> Result<Value, BackendError>;

    fn section_attendance(&self, key: &SectionKey) -> Result<Vec<RecordedMark>, BackendError>;

    fn save_section_attendance(
        &self,
        key: &SectionKey,
        entries: &[SaveEntry],
    ) -> Result<SaveReceipt, BackendError>;

    /// Raw reasons payload, `{data:{reasons:[..]}}` or a bare array.
    fn attendance_reasons(&self) -> Result<Value, BackendError>;
}

/// Canned reasons from a backend payload, falling back to the defaults when
/// the payload is empty or malformed.
pub fn normalize_reasons(payload: &Value) -> Vec<String> {
    let rows = payload
        .as_array()
        .or_else(|| payload.pointer("/data/reasons").and_then(|v| v.as_array()))
        .or_else(|| payload.get("reasons").and_then(|v| v.as_array()));
    let mut out: Vec<String> = Vec::new();
    for v in rows.into_iter().flatten() {
        let label = match v {
            Value::String(s) => Some(s.as_str()),
            Value::Object(_) => v
                .get("label")
                .or_else(|| v.get("name"))
                .and_then(|l| l.as_str()),
            _ => None,
        };
        let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
            continue;
        };
        if !out.iter().any(|r| r == label) {
            out.push(label.to_string());
        }
    }
    if out.is_empty() {
        return DEFAULT_REASONS.iter().map(|s| s.to_string()).collect();
    }
    out
}
