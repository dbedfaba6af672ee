//! Session-scoped attendance state for one class/date (or one department
//! section/time slot/date).

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::backend::{
    AttendanceBackend, BackendError, BackendErrorKind, RecordedMark, SaveEntry, SectionKey,
};
use crate::roster::Student;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            _ => None,
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceEntry {
    pub status: AttendanceStatus,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
}

impl Summary {
    /// Unrecognized statuses (`None`) are skipped.
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Option<AttendanceStatus>>,
    {
        let mut s = Summary::default();
        for status in statuses.into_iter().flatten() {
            match status {
                AttendanceStatus::Present => s.present += 1,
                AttendanceStatus::Absent => s.absent += 1,
                AttendanceStatus::Late => s.late += 1,
            }
        }
        s
    }

    pub fn of_recorded(marks: &[RecordedMark]) -> Self {
        Self::tally(marks.iter().map(|m| AttendanceStatus::parse(&m.status)))
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.present + self.absent + self.late
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTarget {
    Class {
        class_id: String,
        date: NaiveDate,
    },
    DepartmentSection(SectionKey),
}

impl SaveTarget {
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Class { date, .. } => *date,
            Self::DepartmentSection(key) => key.date,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Class { class_id, date } => json!({
                "kind": "class",
                "classId": class_id,
                "date": date.to_string(),
            }),
            Self::DepartmentSection(key) => json!({
                "kind": "departmentSection",
                "departmentId": key.department_id,
                "section": key.section,
                "timeSlot": key.time_slot,
                "date": key.date.to_string(),
            }),
        }
    }

    pub fn roster(&self, backend: &dyn AttendanceBackend) -> Result<Value, BackendError> {
        match self {
            Self::Class { class_id, .. } => backend.class_students(class_id),
            Self::DepartmentSection(key) => backend.section_students(key),
        }
    }

    pub fn recorded(
        &self,
        backend: &dyn AttendanceBackend,
    ) -> Result<Vec<RecordedMark>, BackendError> {
        match self {
            Self::Class { class_id, date } => backend.class_attendance(class_id, *date),
            Self::DepartmentSection(key) => backend.section_attendance(key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Live,
    Demo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveState {
    Clean,
    Dirty,
    Saved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { count: usize, message: Option<String> },
    /// The backend refused because the register was already submitted; the
    /// map now holds the backend's copy.
    Refreshed { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown student key: {0}")]
    UnknownStudent(String),
    #[error("demo sessions use sample students and cannot be saved")]
    DemoSession,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownStudent(_) => "unknown_student",
            Self::DemoSession => "demo_session",
            Self::Backend(e) => e.code(),
        }
    }
}

pub struct AttendanceSession {
    id: String,
    target: SaveTarget,
    mode: SessionMode,
    roster: Vec<Student>,
    entries: HashMap<String, AttendanceEntry>,
    dirty: bool,
    saved_at: Option<DateTime<Utc>>,
}

impl AttendanceSession {
    pub fn new(id: String, target: SaveTarget, mode: SessionMode, roster: Vec<Student>) -> Self {
        let mut session = Self {
            id,
            target,
            mode,
            roster: Vec::new(),
            entries: HashMap::new(),
            dirty: false,
            saved_at: None,
        };
        session.initialize(roster);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &SaveTarget {
        &self.target
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn roster(&self) -> &[Student] {
        &self.roster
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[cfg(test)]
    pub fn entry(&self, key: &str) -> Option<&AttendanceEntry> {
        self.entries.get(key)
    }

    pub fn save_state(&self) -> SaveState {
        if self.dirty {
            SaveState::Dirty
        } else if self.saved_at.is_some() {
            SaveState::Saved
        } else {
            SaveState::Clean
        }
    }

    /// Replaces the map with a fresh one built from `roster`. Every keyed
    /// student starts present with empty notes; unkeyed students stay on the
    /// roster for display but get no entry.
    pub fn initialize(&mut self, roster: Vec<Student>) {
        self.entries = roster
            .iter()
            .filter_map(|s| s.key.clone())
            .map(|k| (k, AttendanceEntry::default()))
            .collect();
        self.roster = roster;
        self.dirty = false;
        self.saved_at = None;
    }

    /// Overlays marks already stored by the backend. Returns how many were
    /// applied.
    pub fn apply_recorded(&mut self, marks: &[RecordedMark]) -> usize {
        let mut applied = 0;
        for mark in marks {
            let Some(status) = AttendanceStatus::parse(&mark.status) else {
                debug!(student_id = %mark.student_id, status = %mark.status, "skipping unrecognized recorded status");
                continue;
            };
            if let Some(entry) = self.entries.get_mut(&mark.student_id) {
                entry.status = status;
                entry.notes = mark.notes.clone();
                applied += 1;
            }
        }
        applied
    }

    fn entry_mut(&mut self, key: &str) -> Result<&mut AttendanceEntry, SessionError> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| SessionError::UnknownStudent(key.to_string()))
    }

    pub fn set_status(&mut self, key: &str, status: AttendanceStatus) -> Result<(), SessionError> {
        self.entry_mut(key)?.status = status;
        self.dirty = true;
        Ok(())
    }

    pub fn set_notes(&mut self, key: &str, notes: impl Into<String>) -> Result<(), SessionError> {
        self.entry_mut(key)?.notes = notes.into();
        self.dirty = true;
        Ok(())
    }

    pub fn mark_all(&mut self, status: AttendanceStatus) {
        for entry in self.entries.values_mut() {
            entry.status = status;
        }
        self.dirty = true;
    }

    pub fn summary(&self) -> Summary {
        Summary::tally(self.entries.values().map(|e| Some(e.status)))
    }

    /// Save payload in roster order. Unkeyed students and repeated keys are
    /// left out.
    pub fn project_entries(&self) -> Vec<SaveEntry> {
        let mut seen: HashSet<&str> = HashSet::new();
        self.roster
            .iter()
            .filter_map(|s| s.key.as_deref())
            .filter(|k| seen.insert(*k))
            .filter_map(|k| {
                self.entries.get(k).map(|e| SaveEntry {
                    student_id: k.to_string(),
                    status: e.status,
                    notes: e.notes.clone(),
                })
            })
            .collect()
    }

    /// Submits the map. On failure the map and dirty flag are left exactly as
    /// they were; the caller decides whether to try again.
    pub fn save(&mut self, backend: &dyn AttendanceBackend) -> Result<SaveOutcome, SessionError> {
        if self.mode == SessionMode::Demo {
            return Err(SessionError::DemoSession);
        }
        let entries = self.project_entries();
        let result = match &self.target {
            SaveTarget::Class { class_id, date } => {
                backend.save_class_attendance(class_id, *date, &entries)
            }
            SaveTarget::DepartmentSection(key) => backend.save_section_attendance(key, &entries),
        };
        match result {
            Ok(receipt) => {
                self.dirty = false;
                self.saved_at = Some(Utc::now());
                info!(session_id = %self.id, saved = receipt.saved, "attendance saved");
                Ok(SaveOutcome::Saved {
                    count: receipt.saved,
                    message: receipt.message,
                })
            }
            Err(e) if e.kind == BackendErrorKind::AlreadySubmitted => {
                warn!(session_id = %self.id, "register already submitted, reloading recorded marks");
                let recorded = self.target.recorded(backend)?;
                let roster = std::mem::take(&mut self.roster);
                self.initialize(roster);
                self.apply_recorded(&recorded);
                Ok(SaveOutcome::Refreshed { message: e.message })
            }
            Err(e) => {
                warn!(session_id = %self.id, code = e.code(), error = %e, "attendance save failed");
                Err(e.into())
            }
        }
    }

    pub fn to_json(&self) -> Value {
        let students: Vec<Value> = self
            .roster
            .iter()
            .map(|s| {
                json!({
                    "key": s.key,
                    "localId": s.local_id,
                    "displayName": s.display_name,
                    "rollNumber": s.roll_number,
                    "saveable": s.is_keyed(),
                })
            })
            .collect();
        let entries: Vec<Value> = self
            .project_entries()
            .into_iter()
            .map(|e| {
                json!({
                    "studentKey": e.student_id,
                    "status": e.status,
                    "notes": e.notes,
                })
            })
            .collect();
        json!({
            "sessionId": self.id,
            "mode": self.mode,
            "saveState": self.save_state(),
            "savedAt": self.saved_at.map(|t| t.to_rfc3339()),
            "target": self.target.to_json(),
            "students": students,
            "entries": entries,
            "summary": self.summary(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SaveReceipt;
    use crate::roster::normalize_roster;
    use std::cell::RefCell;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).expect("date")
    }

    fn class_target() -> SaveTarget {
        SaveTarget::Class {
            class_id: "c1".to_string(),
            date: date(),
        }
    }

    fn session_for(payload: Value) -> AttendanceSession {
        AttendanceSession::new(
            "s1".to_string(),
            class_target(),
            SessionMode::Live,
            normalize_roster(&payload),
        )
    }

    fn two_students() -> AttendanceSession {
        session_for(json!([
            { "id": 1, "student_db_id": "u1" },
            { "id": 2, "student_db_id": "u2" }
        ]))
    }

    #[derive(Default)]
    struct FakeBackend {
        fail_with: Option<BackendError>,
        recorded: Vec<RecordedMark>,
        saved: RefCell<Vec<Vec<SaveEntry>>>,
    }

    impl AttendanceBackend for FakeBackend {
        fn class_students(&self, _class_id: &str) -> Result<Value, BackendError> {
            Ok(json!([]))
        }

        fn class_attendance(
            &self,
            _class_id: &str,
            _date: NaiveDate,
        ) -> Result<Vec<RecordedMark>, BackendError> {
            Ok(self.recorded.clone())
        }

        fn save_class_attendance(
            &self,
            _class_id: &str,
            _date: NaiveDate,
            entries: &[SaveEntry],
        ) -> Result<SaveReceipt, BackendError> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            self.saved.borrow_mut().push(entries.to_vec());
            Ok(SaveReceipt {
                saved: entries.len(),
                message: None,
            })
        }

        fn section_students(&self, _key: &SectionKey) -> Result<Value, BackendError> {
            Ok(json!([]))
        }

        fn section_attendance(&self, _key: &SectionKey) -> Result<Vec<RecordedMark>, BackendError> {
            Ok(self.recorded.clone())
        }

        fn save_section_attendance(
            &self,
            _key: &SectionKey,
            entries: &[SaveEntry],
        ) -> Result<SaveReceipt, BackendError> {
            self.save_class_attendance("", date(), entries)
        }

        fn attendance_reasons(&self) -> Result<Value, BackendError> {
            Ok(json!([]))
        }
    }

    #[test]
    fn initialize_keys_every_resolvable_student_as_present() {
        let s = session_for(json!([
            { "id": 1, "student_db_id": "u1" },
            { "id": 2 },
            { "id": "s3" }
        ]));
        let mut keys: Vec<&String> = s.entries.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["s3", "u1"]);
        assert!(s
            .entries
            .values()
            .all(|e| e.status == AttendanceStatus::Present && e.notes.is_empty()));
        assert_eq!(s.roster().len(), 3);
        assert_eq!(s.save_state(), SaveState::Clean);
    }

    #[test]
    fn reinitialize_discards_stale_entries() {
        let mut s = two_students();
        s.set_status("u1", AttendanceStatus::Absent).expect("set");
        s.initialize(normalize_roster(&json!([{ "student_db_id": "u3" }])));
        assert!(s.entry("u1").is_none());
        assert_eq!(s.entry("u3").map(|e| e.status), Some(AttendanceStatus::Present));
        assert!(!s.is_dirty());
    }

    #[test]
    fn set_status_and_notes_preserve_each_other() {
        let mut s = two_students();
        s.set_notes("u1", "Sick").expect("notes");
        s.set_status("u1", AttendanceStatus::Late).expect("status");
        let e = s.entry("u1").expect("entry");
        assert_eq!(e.status, AttendanceStatus::Late);
        assert_eq!(e.notes, "Sick");
        assert!(s.is_dirty());

        let err = s.set_status("nobody", AttendanceStatus::Absent).unwrap_err();
        assert_eq!(err.code(), "unknown_student");
    }

    #[test]
    fn mark_all_is_idempotent_and_keeps_notes() {
        let mut s = two_students();
        s.set_notes("u2", "Travel").expect("notes");
        s.mark_all(AttendanceStatus::Absent);
        let once = s.entries.clone();
        s.mark_all(AttendanceStatus::Absent);
        assert_eq!(s.entries, once);
        assert_eq!(s.entry("u2").map(|e| e.notes.as_str()), Some("Travel"));
        assert_eq!(s.summary().absent, 2);
    }

    #[test]
    fn summary_is_stable_and_sums_to_map_size() {
        let mut s = session_for(json!([
            { "student_db_id": "a" },
            { "student_db_id": "b" },
            { "student_db_id": "c" },
            { "student_db_id": "d" }
        ]));
        s.set_status("a", AttendanceStatus::Absent).expect("set");
        s.set_status("b", AttendanceStatus::Late).expect("set");
        let first = s.summary();
        assert_eq!(first, s.summary());
        assert_eq!(first.total(), s.len());
        assert_eq!(
            first,
            Summary {
                present: 2,
                absent: 1,
                late: 1
            }
        );
    }

    #[test]
    fn recorded_tally_ignores_unknown_statuses() {
        let marks = vec![
            RecordedMark {
                student_id: "a".into(),
                status: "present".into(),
                notes: String::new(),
            },
            RecordedMark {
                student_id: "b".into(),
                status: "excused".into(),
                notes: String::new(),
            },
        ];
        let s = Summary::of_recorded(&marks);
        assert_eq!(s.total(), 1);
    }

    #[test]
    fn projection_excludes_unkeyed_and_duplicate_students() {
        let s = session_for(json!([
            { "id": 1, "student_db_id": "u1" },
            { "id": 2 },
            { "id": 3, "student_db_id": "u3" },
            { "id": 4, "student_db_id": "u1" }
        ]));
        let entries = s.project_entries();
        let ids: Vec<&str> = entries.iter().map(|e| e.student_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u3"]);
    }

    #[test]
    fn worked_example_saves_roster_order_and_keeps_map() {
        let mut s = two_students();
        s.set_status("u1", AttendanceStatus::Absent).expect("set");
        s.set_notes("u1", "Sick").expect("notes");
        assert_eq!(
            s.summary(),
            Summary {
                present: 1,
                absent: 1,
                late: 0
            }
        );

        let backend = FakeBackend::default();
        let outcome = s.save(&backend).expect("save");
        assert_eq!(
            outcome,
            SaveOutcome::Saved {
                count: 2,
                message: None
            }
        );
        let saved = backend.saved.borrow();
        assert_eq!(
            saved[0],
            vec![
                SaveEntry {
                    student_id: "u1".into(),
                    status: AttendanceStatus::Absent,
                    notes: "Sick".into()
                },
                SaveEntry {
                    student_id: "u2".into(),
                    status: AttendanceStatus::Present,
                    notes: String::new()
                },
            ]
        );
        assert_eq!(s.save_state(), SaveState::Saved);
        assert_eq!(s.entry("u1").map(|e| e.status), Some(AttendanceStatus::Absent));

        s.set_status("u2", AttendanceStatus::Late).expect("set");
        assert_eq!(s.save_state(), SaveState::Dirty);
    }

    #[test]
    fn failed_save_leaves_map_and_dirty_flag() {
        let mut s = two_students();
        s.set_status("u2", AttendanceStatus::Late).expect("set");
        let backend = FakeBackend {
            fail_with: Some(BackendError::unavailable("server unreachable")),
            ..Default::default()
        };
        let err = s.save(&backend).unwrap_err();
        assert_eq!(err.to_string(), "server unreachable");
        assert_eq!(err.code(), "backend_unavailable");
        assert!(s.is_dirty());
        assert_eq!(s.entry("u2").map(|e| e.status), Some(AttendanceStatus::Late));
    }

    #[test]
    fn already_submitted_reloads_authoritative_marks() {
        let mut s = two_students();
        s.mark_all(AttendanceStatus::Absent);
        let backend = FakeBackend {
            fail_with: Some(BackendError::new(
                BackendErrorKind::AlreadySubmitted,
                "attendance already submitted",
            )),
            recorded: vec![RecordedMark {
                student_id: "u2".into(),
                status: "late".into(),
                notes: "Late Transport".into(),
            }],
            ..Default::default()
        };
        let outcome = s.save(&backend).expect("refresh");
        assert!(matches!(outcome, SaveOutcome::Refreshed { .. }));
        assert!(!s.is_dirty());
        assert_eq!(s.entry("u1").map(|e| e.status), Some(AttendanceStatus::Present));
        assert_eq!(s.entry("u2").map(|e| e.notes.as_str()), Some("Late Transport"));
    }

    #[test]
    fn demo_sessions_refuse_to_save() {
        let mut s = AttendanceSession::new(
            "demo".to_string(),
            class_target(),
            SessionMode::Demo,
            crate::roster::sample_roster(),
        );
        s.mark_all(AttendanceStatus::Present);
        let backend = FakeBackend::default();
        let err = s.save(&backend).unwrap_err();
        assert_eq!(err.code(), "demo_session");
        assert!(backend.saved.borrow().is_empty());
    }

    #[test]
    fn status_parse_is_lenient_about_case_and_space() {
        assert_eq!(AttendanceStatus::parse(" Late "), Some(AttendanceStatus::Late));
        assert_eq!(AttendanceStatus::parse("ABSENT"), Some(AttendanceStatus::Absent));
        assert_eq!(AttendanceStatus::parse("excused"), None);
    }
}
