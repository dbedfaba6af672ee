use crate::backend::{normalize_reasons, AttendanceBackend};
use crate::csv_io;
use crate::ipc::helpers::{
    get_date, get_required_str, get_status, with_db, with_state, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use crate::session::{AttendanceSession, SaveOutcome, SaveTarget, SessionMode, Summary};
use crate::setup;
use crate::store::WorkspaceBackend;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_NOTES_CHARS: usize = 500;

fn class_target(params: &Value) -> Result<SaveTarget, HandlerErr> {
    Ok(SaveTarget::Class {
        class_id: get_required_str(params, "classId")?,
        date: get_date(params, "date")?,
    })
}

/// Loads the roster for `target` and registers a new session over it.
///
/// `demo` opens a labelled demo session over the sample roster without
/// touching the backend. A failed roster fetch only degrades to demo mode
/// when the workspace has `attendance.demoFallback` switched on.
pub(super) fn open_session(
    conn: &Connection,
    sessions: &mut HashMap<String, AttendanceSession>,
    target: SaveTarget,
    demo: bool,
) -> Result<Value, HandlerErr> {
    let settings = setup::attendance_setup(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let backend = WorkspaceBackend::new(conn);

    let mut fallback_reason: Option<String> = None;
    let (mode, students) = if demo {
        (SessionMode::Demo, roster::sample_roster())
    } else {
        match target.roster(&backend) {
            Ok(payload) => (SessionMode::Live, roster::normalize_roster(&payload)),
            Err(e) if settings.demo_fallback => {
                warn!(code = e.code(), error = %e, "roster fetch failed, opening demo session");
                fallback_reason = Some(e.message);
                (SessionMode::Demo, roster::sample_roster())
            }
            Err(e) => return Err(e.into()),
        }
    };

    let unkeyed = students.iter().filter(|s| !s.is_keyed()).count();
    let session_id = Uuid::new_v4().to_string();
    let mut session = AttendanceSession::new(session_id.clone(), target, mode, students);
    let mut recorded_applied = 0;
    if mode == SessionMode::Live && settings.overlay_recorded {
        let recorded = session.target().recorded(&backend)?;
        recorded_applied = session.apply_recorded(&recorded);
    }
    info!(
        session_id = %session_id,
        date = %session.target().date(),
        mode = ?session.mode(),
        students = session.roster().len(),
        entries = session.len(),
        unkeyed,
        "attendance session opened"
    );

    let mut result = session.to_json();
    result["unkeyedStudents"] = json!(unkeyed);
    result["recordedApplied"] = json!(recorded_applied);
    result["fallbackReason"] = json!(fallback_reason);
    sessions.insert(session_id, session);
    Ok(result)
}

fn session_mut<'a>(
    sessions: &'a mut HashMap<String, AttendanceSession>,
    params: &Value,
) -> Result<&'a mut AttendanceSession, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    sessions
        .get_mut(&session_id)
        .ok_or_else(|| HandlerErr::new("not_found", "session not found"))
}

fn session_open(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let target = class_target(params)?;
    let demo = params
        .get("demo")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    open_session(conn, &mut state.sessions, target, demo)
}

fn session_get(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    Ok(session_mut(&mut state.sessions, params)?.to_json())
}

fn session_set_status(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let session = session_mut(&mut state.sessions, params)?;
    let key = get_required_str(params, "studentKey")?;
    let status = get_status(params, "status")?;
    session.set_status(&key, status)?;
    Ok(session.to_json())
}

fn session_set_notes(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let session = session_mut(&mut state.sessions, params)?;
    let key = get_required_str(params, "studentKey")?;
    // Empty notes are allowed; they clear the reason.
    let notes = params
        .get("notes")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing notes"))?
        .trim();
    if notes.chars().count() > MAX_NOTES_CHARS {
        return Err(HandlerErr::bad_params(format!(
            "notes must be <= {} chars",
            MAX_NOTES_CHARS
        )));
    }
    session.set_notes(&key, notes)?;
    Ok(session.to_json())
}

fn session_mark_all(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let session = session_mut(&mut state.sessions, params)?;
    let status = get_status(params, "status")?;
    session.mark_all(status);
    Ok(session.to_json())
}

fn session_save(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let session = session_mut(&mut state.sessions, params)?;
    let backend = WorkspaceBackend::new(conn);
    let outcome = match session.save(&backend) {
        Ok(v) => v,
        Err(e) => {
            return Err(HandlerErr::from(e).with_details(json!({
                "sessionId": session.id(),
                "saveState": session.save_state()
            })))
        }
    };
    Ok(match outcome {
        SaveOutcome::Saved { count, message } => json!({
            "outcome": "saved",
            "saved": count,
            "message": message,
            "session": session.to_json()
        }),
        SaveOutcome::Refreshed { message } => json!({
            "outcome": "refreshed",
            "message": message,
            "session": session.to_json()
        }),
    })
}

fn session_close(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = state
        .sessions
        .remove(&session_id)
        .ok_or_else(|| HandlerErr::new("not_found", "session not found"))?;
    if session.is_dirty() {
        warn!(session_id = %session_id, "closing session with unsaved edits");
    }
    Ok(json!({ "closed": true, "discardedUnsaved": session.is_dirty() }))
}

fn attendance_reasons(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let payload = WorkspaceBackend::new(conn).attendance_reasons()?;
    Ok(json!({ "reasons": normalize_reasons(&payload) }))
}

fn attendance_class_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    let backend = WorkspaceBackend::new(conn);
    let marks = backend.class_attendance(&class_id, date)?;
    let finalized = backend.is_finalized(&class_id, date)?;
    Ok(json!({
        "classId": class_id,
        "date": date.to_string(),
        "finalized": finalized,
        "attendance": marks,
        "summary": Summary::of_recorded(&marks)
    }))
}

fn attendance_finalize(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    WorkspaceBackend::new(conn).finalize(&class_id, date)?;
    info!(class_id = %class_id, date = %date, "attendance register finalized");
    Ok(json!({ "ok": true }))
}

fn attendance_export_csv(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    let out_path = get_required_str(params, "outPath")?;
    let marks = WorkspaceBackend::new(conn).class_attendance(&class_id, date)?;

    let io_err = |e: String| HandlerErr::new("io_failed", e).with_details(json!({ "path": out_path }));
    let file = File::create(&out_path).map_err(|e| io_err(e.to_string()))?;
    csv_io::write_attendance_csv(BufWriter::new(file), &marks).map_err(|e| io_err(e.to_string()))?;
    info!(class_id = %class_id, rows = marks.len(), path = %out_path, "attendance csv exported");
    Ok(json!({ "path": out_path, "rows": marks.len() }))
}

fn attendance_import_csv(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    let in_path = get_required_str(params, "inPath")?;

    let file = File::open(&in_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })?;
    let parsed = csv_io::read_attendance_csv(file)
        .map_err(|e| HandlerErr::new("bad_csv", e.to_string()).with_details(json!({ "path": in_path })))?;
    if parsed.entries.is_empty() {
        return Err(HandlerErr::new("bad_csv", "no valid attendance rows")
            .with_details(json!({ "warnings": parsed.warnings })));
    }

    let receipt = WorkspaceBackend::new(conn).save_class_attendance(&class_id, date, &parsed.entries)?;
    info!(
        class_id = %class_id,
        imported = receipt.saved,
        skipped = parsed.warnings.len(),
        "attendance csv imported"
    );
    Ok(json!({
        "imported": receipt.saved,
        "totalRows": parsed.total_rows,
        "warnings": parsed.warnings,
        "message": receipt.message
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "attendance.reasons" => Some(with_db(state, req, attendance_reasons)),
        "attendance.classGet" => Some(with_db(state, req, attendance_class_get)),
        "attendance.finalize" => Some(with_db(state, req, attendance_finalize)),
        "attendance.exportCsv" => Some(with_db(state, req, attendance_export_csv)),
        "attendance.importCsv" => Some(with_db(state, req, attendance_import_csv)),
        "attendance.session.open" => Some(with_state(state, req, session_open)),
        "attendance.session.get" => Some(with_state(state, req, session_get)),
        "attendance.session.setStatus" => Some(with_state(state, req, session_set_status)),
        "attendance.session.setNotes" => Some(with_state(state, req, session_set_notes)),
        "attendance.session.markAll" => Some(with_state(state, req, session_mark_all)),
        "attendance.session.save" => Some(with_state(state, req, session_save)),
        "attendance.session.close" => Some(with_state(state, req, session_close)),
        _ => None,
    }
}
