use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, require_db, respond, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subquery so the count is not multiplied by joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.department_id,
           c.section,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1) AS student_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let department_id: Option<String> = row.get(2)?;
            let section: Option<String> = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "departmentId": department_id,
                "section": section,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn department_exists(conn: &Connection, department_id: &str) -> Result<bool, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM departments WHERE id = ?",
            [department_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let department_id = get_optional_str(params, "departmentId");
    let section = get_optional_str(params, "section");
    if section.is_some() && department_id.is_none() {
        return Err(HandlerErr::bad_params("section requires departmentId"));
    }
    if let Some(dep) = department_id.as_deref() {
        if !department_exists(conn, dep)? {
            return Err(HandlerErr::new("not_found", "department not found"));
        }
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, department_id, section) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &department_id, &section),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "classes" }))
    })?;

    Ok(json!({
        "classId": class_id,
        "name": name,
        "departmentId": department_id,
        "section": section
    }))
}

fn handle_departments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = require_db(state).and_then(|conn| {
        let mut stmt = conn.prepare(
            "SELECT
               d.id,
               d.name,
               (SELECT COUNT(DISTINCT c.section) FROM classes c
                 WHERE c.department_id = d.id AND c.section IS NOT NULL) AS section_count
             FROM departments d
             ORDER BY d.name",
        )?;
        let departments = stmt
            .query_map([], |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "sectionCount": row.get::<_, i64>(2)?
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "departments": departments }))
    });
    respond(&req.id, result)
}

fn departments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let department_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO departments(id, name) VALUES(?, ?)",
        (&department_id, &name),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "departments" }))
    })?;
    Ok(json!({ "departmentId": department_id, "name": name }))
}

fn sections_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department_id = get_required_str(params, "departmentId")?;
    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr::new("not_found", "department not found"));
    }
    let mut stmt = conn.prepare(
        "SELECT DISTINCT section FROM classes
         WHERE department_id = ? AND section IS NOT NULL
         ORDER BY section",
    )?;
    let sections = stmt
        .query_map([&department_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "departmentId": department_id, "sections": sections }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(with_db(state, req, classes_create)),
        "departments.list" => Some(handle_departments_list(state, req)),
        "departments.create" => Some(with_db(state, req, departments_create)),
        "sections.list" => Some(with_db(state, req, sections_list)),
        _ => None,
    }
}
