use crate::ipc::helpers::{get_optional_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    Ok(())
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, local_no, server_uuid, roster_uuid, last_name, first_name, active, sort_order
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let students = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(4)?;
            let first: String = r.get(5)?;
            let server_uuid: Option<String> = r.get(2)?;
            let roster_uuid: Option<String> = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "localNo": r.get::<_, i64>(1)?,
                "serverUuid": server_uuid,
                "rosterUuid": roster_uuid,
                "displayName": format!("{}, {}", last, first),
                "active": r.get::<_, i64>(6)? != 0,
                "sortOrder": r.get::<_, i64>(7)?,
                "provisional": server_uuid.is_none() && roster_uuid.is_none()
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classId": class_id, "students": students }))
}

/// Adds a student to a class roster. The server UUID is assigned here unless
/// the student is `provisional` (awaiting enrollment), in which case the only
/// ids are the optional roster UUID and the class-local number.
fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let roster_uuid = get_optional_str(params, "rosterUuid");
    let provisional = params
        .get("provisional")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let active = params.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
    require_class(conn, &class_id)?;

    let (local_no, sort_order): (i64, i64) = conn.query_row(
        "SELECT COALESCE(MAX(local_no), 0) + 1, COALESCE(MAX(sort_order), -1) + 1
         FROM students WHERE class_id = ?",
        [&class_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let student_id = Uuid::new_v4().to_string();
    let server_uuid = (!provisional).then(|| Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO students(
           id, class_id, local_no, server_uuid, roster_uuid, last_name, first_name, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            local_no,
            &server_uuid,
            &roster_uuid,
            &last_name,
            &first_name,
            active as i64,
            sort_order,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;

    Ok(json!({
        "studentId": student_id,
        "localNo": local_no,
        "serverUuid": server_uuid,
        "rosterUuid": roster_uuid
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        _ => None,
    }
}
