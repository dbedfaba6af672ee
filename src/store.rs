//! Attendance backend over the workspace SQLite database.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::backend::{
    AttendanceBackend, BackendError, BackendErrorKind, RecordedMark, SaveEntry, SaveReceipt,
    SectionKey,
};
use crate::roster;
use crate::setup;

pub struct WorkspaceBackend<'a> {
    conn: &'a Connection,
}

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let local_no: i64 = r.get(0)?;
    let server_uuid: Option<String> = r.get(1)?;
    let roster_uuid: Option<String> = r.get(2)?;
    let first: String = r.get(3)?;
    let last: String = r.get(4)?;
    Ok(json!({
        "id": local_no,
        "student_db_id": server_uuid,
        "roster_uuid": roster_uuid,
        "first_name": first,
        "last_name": last,
        "roll_number": local_no,
    }))
}

fn mark_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RecordedMark> {
    Ok(RecordedMark {
        student_id: r.get(0)?,
        status: r.get(1)?,
        notes: r.get(2)?,
    })
}

fn roster_payload(students: Vec<Value>) -> Value {
    json!({ "success": true, "data": { "students": students } })
}

impl<'a> WorkspaceBackend<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn class_exists(&self, class_id: &str) -> Result<bool, BackendError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some())
    }

    fn department_exists(&self, department_id: &str) -> Result<bool, BackendError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM departments WHERE id = ?",
                [department_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    pub fn is_finalized(&self, class_id: &str, date: NaiveDate) -> Result<bool, BackendError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM attendance_finalized WHERE class_id = ? AND date = ?",
                (class_id, date.to_string()),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    /// Closes the register for a class/date; later saves are refused with
    /// `AlreadySubmitted`. Finalizing twice is a no-op.
    pub fn finalize(&self, class_id: &str, date: NaiveDate) -> Result<(), BackendError> {
        if !self.class_exists(class_id)? {
            return Err(BackendError::not_found("class not found"));
        }
        self.conn.execute(
            "INSERT INTO attendance_finalized(class_id, date, finalized_at)
             VALUES(?, ?, ?)
             ON CONFLICT(class_id, date) DO NOTHING",
            (class_id, date.to_string(), Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    fn check_section_key(&self, key: &SectionKey) -> Result<(), BackendError> {
        if !self.department_exists(&key.department_id)? {
            return Err(BackendError::not_found("department not found"));
        }
        let slots =
            setup::time_slots(self.conn).map_err(|e| BackendError::unavailable(e.to_string()))?;
        if !slots.iter().any(|s| s == &key.time_slot) {
            return Err(BackendError::invalid(format!(
                "unknown time slot: {}",
                key.time_slot
            )));
        }
        Ok(())
    }

    /// Every entry must name a student on `roster_payload`; nothing is written
    /// otherwise.
    fn check_entries(&self, roster_payload: &Value, entries: &[SaveEntry]) -> Result<(), BackendError> {
        let known: HashSet<String> = roster::normalize_roster(roster_payload)
            .into_iter()
            .filter_map(|s| s.key)
            .collect();
        let unknown: Vec<&str> = entries
            .iter()
            .map(|e| e.student_id.as_str())
            .filter(|id| !known.contains(*id))
            .collect();
        if !unknown.is_empty() {
            return Err(BackendError::invalid(format!(
                "unknown student_id: {}",
                unknown.join(", ")
            )));
        }
        Ok(())
    }

    fn saved_receipt(count: usize) -> SaveReceipt {
        SaveReceipt {
            saved: count,
            message: Some(format!("Attendance saved for {} students", count)),
        }
    }
}

impl AttendanceBackend for WorkspaceBackend<'_> {
    fn class_students(&self, class_id: &str) -> Result<Value, BackendError> {
        if !self.class_exists(class_id)? {
            return Err(BackendError::not_found("class not found"));
        }
        let mut stmt = self.conn.prepare(
            "SELECT local_no, server_uuid, roster_uuid, first_name, last_name
             FROM students
             WHERE class_id = ? AND active = 1
             ORDER BY sort_order",
        )?;
        let students = stmt
            .query_map([class_id], student_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roster_payload(students))
    }

    fn class_attendance(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<RecordedMark>, BackendError> {
        if !self.class_exists(class_id)? {
            return Err(BackendError::not_found("class not found"));
        }
        let mut stmt = self.conn.prepare(
            "SELECT ar.student_key, ar.status, ar.notes
             FROM attendance_records ar
             LEFT JOIN students s
               ON s.class_id = ar.class_id
              AND COALESCE(s.server_uuid, s.roster_uuid) = ar.student_key
             WHERE ar.class_id = ? AND ar.date = ?
             ORDER BY s.sort_order IS NULL, s.sort_order, ar.student_key",
        )?;
        let marks = stmt
            .query_map((class_id, date.to_string()), mark_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(marks)
    }

    fn save_class_attendance(
        &self,
        class_id: &str,
        date: NaiveDate,
        entries: &[SaveEntry],
    ) -> Result<SaveReceipt, BackendError> {
        let roster = self.class_students(class_id)?;
        if self.is_finalized(class_id, date)? {
            return Err(BackendError::new(
                BackendErrorKind::AlreadySubmitted,
                format!("attendance for {} has already been submitted", date),
            ));
        }
        self.check_entries(&roster, entries)?;

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for e in entries {
            tx.execute(
                "INSERT INTO attendance_records(class_id, date, student_key, status, notes, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)
                 ON CONFLICT(class_id, date, student_key) DO UPDATE SET
                   status = excluded.status,
                   notes = excluded.notes,
                   updated_at = excluded.updated_at",
                (class_id, date.to_string(), &e.student_id, e.status.as_str(), &e.notes, &now),
            )?;
        }
        tx.commit()?;
        Ok(Self::saved_receipt(entries.len()))
    }

    fn section_students(&self, key: &SectionKey) -> Result<Value, BackendError> {
        self.check_section_key(key)?;
        let mut stmt = self.conn.prepare(
            "SELECT s.local_no, s.server_uuid, s.roster_uuid, s.first_name, s.last_name
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE c.department_id = ? AND c.section = ? AND s.active = 1
             ORDER BY c.name, s.sort_order",
        )?;
        let students = stmt
            .query_map((&key.department_id, &key.section), student_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roster_payload(students))
    }

    fn section_attendance(&self, key: &SectionKey) -> Result<Vec<RecordedMark>, BackendError> {
        self.check_section_key(key)?;
        let mut stmt = self.conn.prepare(
            "SELECT student_key, status, notes
             FROM section_attendance_records
             WHERE department_id = ? AND section = ? AND time_slot = ? AND date = ?
             ORDER BY student_key",
        )?;
        let marks = stmt
            .query_map(
                (&key.department_id, &key.section, &key.time_slot, key.date.to_string()),
                mark_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(marks)
    }

    fn save_section_attendance(
        &self,
        key: &SectionKey,
        entries: &[SaveEntry],
    ) -> Result<SaveReceipt, BackendError> {
        let roster = self.section_students(key)?;
        self.check_entries(&roster, entries)?;

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for e in entries {
            tx.execute(
                "INSERT INTO section_attendance_records(
                   department_id, section, time_slot, date, student_key, status, notes, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(department_id, section, time_slot, date, student_key) DO UPDATE SET
                   status = excluded.status,
                   notes = excluded.notes,
                   updated_at = excluded.updated_at",
                (
                    &key.department_id,
                    &key.section,
                    &key.time_slot,
                    key.date.to_string(),
                    &e.student_id,
                    e.status.as_str(),
                    &e.notes,
                    &now,
                ),
            )?;
        }
        tx.commit()?;
        Ok(Self::saved_receipt(entries.len()))
    }

    fn attendance_reasons(&self) -> Result<Value, BackendError> {
        let setup =
            setup::attendance_setup(self.conn).map_err(|e| BackendError::unavailable(e.to_string()))?;
        Ok(json!({ "data": { "reasons": setup.reasons } }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::session::AttendanceStatus;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn open_temp(prefix: &str) -> (Connection, std::path::PathBuf) {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        (db::open_db(&p).expect("open db"), p)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 5).expect("date")
    }

    fn seed(conn: &Connection) {
        conn.execute("INSERT INTO departments(id, name) VALUES('d1', 'Science')", [])
            .expect("dept");
        conn.execute(
            "INSERT INTO classes(id, name, department_id, section) VALUES('c1', '8D', 'd1', 'A')",
            [],
        )
        .expect("class");
        for (i, (id, server, roster, first)) in [
            ("s1", Some("u1"), None, "Ada"),
            ("s2", None, Some("r2"), "Ben"),
            ("s3", None, None, "Cy"),
        ]
        .iter()
        .enumerate()
        {
            conn.execute(
                "INSERT INTO students(id, class_id, local_no, server_uuid, roster_uuid, last_name, first_name, active, sort_order)
                 VALUES(?, 'c1', ?, ?, ?, 'Test', ?, 1, ?)",
                (id, (i + 1) as i64, server, roster, first, i as i64),
            )
            .expect("student");
        }
    }

    fn entry(id: &str, status: AttendanceStatus) -> SaveEntry {
        SaveEntry {
            student_id: id.to_string(),
            status,
            notes: String::new(),
        }
    }

    #[test]
    fn class_roster_exposes_numeric_ids_and_optional_uuids() {
        let (conn, dir) = open_temp("rollcall-store-roster");
        seed(&conn);
        let backend = WorkspaceBackend::new(&conn);
        let students = roster::normalize_roster(&backend.class_students("c1").expect("roster"));
        let keys: Vec<Option<&str>> = students.iter().map(|s| s.key.as_deref()).collect();
        assert_eq!(keys, vec![Some("u1"), Some("r2"), None]);
        assert_eq!(students[2].display_name, "Cy Test");

        let missing = backend.class_students("nope").unwrap_err();
        assert_eq!(missing.kind, BackendErrorKind::NotFound);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn save_overwrites_and_rejects_unknown_students() {
        let (conn, dir) = open_temp("rollcall-store-save");
        seed(&conn);
        let backend = WorkspaceBackend::new(&conn);

        backend
            .save_class_attendance("c1", date(), &[entry("u1", AttendanceStatus::Absent)])
            .expect("first save");
        let receipt = backend
            .save_class_attendance(
                "c1",
                date(),
                &[entry("u1", AttendanceStatus::Late), entry("r2", AttendanceStatus::Present)],
            )
            .expect("second save");
        assert_eq!(receipt.saved, 2);

        let marks = backend.class_attendance("c1", date()).expect("marks");
        let pairs: Vec<(&str, &str)> = marks
            .iter()
            .map(|m| (m.student_id.as_str(), m.status.as_str()))
            .collect();
        assert_eq!(pairs, vec![("u1", "late"), ("r2", "present")]);

        let err = backend
            .save_class_attendance("c1", date(), &[entry("1", AttendanceStatus::Absent)])
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Invalid);
        assert_eq!(backend.class_attendance("c1", date()).expect("marks").len(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn finalized_register_reports_already_submitted() {
        let (conn, dir) = open_temp("rollcall-store-finalize");
        seed(&conn);
        let backend = WorkspaceBackend::new(&conn);
        backend.finalize("c1", date()).expect("finalize");
        backend.finalize("c1", date()).expect("finalize twice");
        let err = backend
            .save_class_attendance("c1", date(), &[entry("u1", AttendanceStatus::Absent)])
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::AlreadySubmitted);
        assert_eq!(err.code(), "already_submitted");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn section_roster_requires_known_department_and_slot() {
        let (conn, dir) = open_temp("rollcall-store-section");
        seed(&conn);
        let backend = WorkspaceBackend::new(&conn);
        let key = SectionKey {
            department_id: "d1".into(),
            section: "A".into(),
            time_slot: "08:00-09:00".into(),
            date: date(),
        };
        let roster = roster::normalize_roster(&backend.section_students(&key).expect("roster"));
        assert_eq!(roster.len(), 3);

        backend
            .save_section_attendance(&key, &[entry("r2", AttendanceStatus::Late)])
            .expect("save");
        let marks = backend.section_attendance(&key).expect("marks");
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].status, "late");

        let bad_slot = SectionKey {
            time_slot: "midnight".into(),
            ..key.clone()
        };
        assert_eq!(
            backend.section_students(&bad_slot).unwrap_err().kind,
            BackendErrorKind::Invalid
        );
        let bad_dept = SectionKey {
            department_id: "zz".into(),
            ..key
        };
        assert_eq!(
            backend.section_students(&bad_dept).unwrap_err().kind,
            BackendErrorKind::NotFound
        );
        let _ = std::fs::remove_dir_all(dir);
    }
}
