//! Roster normalization.
//!
//! The attendance backend hands back student rows in several shapes (`name`
//! vs `first_name`/`last_name`, numeric vs string ids, optional UUIDs). Every
//! roster passes through [`normalize_roster`] before anything else sees it,
//! so the rest of the daemon only deals with [`Student`].

use serde::Serialize;
use serde_json::Value;

const SERVER_KEY_FIELDS: [&str; 2] = ["student_db_id", "studentDbId"];
const ROSTER_KEY_FIELDS: [&str; 3] = ["student_uuid", "studentUuid", "roster_uuid"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    /// Identifier accepted by the backend in save payloads. `None` means the
    /// student can be shown but never saved.
    pub key: Option<String>,
    pub local_id: Option<String>,
    pub display_name: String,
    pub roll_number: Option<String>,
}

impl Student {
    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }
}

fn non_blank_str(v: Option<&Value>) -> Option<String> {
    let s = v?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn str_or_number(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_field(raw: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| non_blank_str(raw.get(*f)))
}

/// Server UUID, then roster UUID, then a string-typed `id`. Numeric ids are
/// local to the client and never resolve.
pub fn resolve_student_key(raw: &Value) -> Option<String> {
    first_field(raw, &SERVER_KEY_FIELDS)
        .or_else(|| first_field(raw, &ROSTER_KEY_FIELDS))
        .or_else(|| non_blank_str(raw.get("id")))
}

fn display_name(raw: &Value, local_id: Option<&str>) -> String {
    if let Some(name) = first_field(raw, &["name", "full_name", "displayName"]) {
        return name;
    }
    let first = first_field(raw, &["first_name", "firstName"]);
    let last = first_field(raw, &["last_name", "lastName"]);
    let joined = [first, last].into_iter().flatten().collect::<Vec<_>>().join(" ");
    if !joined.is_empty() {
        return joined;
    }
    match local_id {
        Some(id) => format!("Student {}", id),
        None => "Unnamed student".to_string(),
    }
}

pub fn normalize_student(raw: &Value) -> Option<Student> {
    if !raw.is_object() {
        return None;
    }
    let local_id = str_or_number(raw.get("id"));
    Some(Student {
        key: resolve_student_key(raw),
        display_name: display_name(raw, local_id.as_deref()),
        roll_number: ["roll_number", "rollNumber", "student_no"]
            .iter()
            .find_map(|f| str_or_number(raw.get(*f))),
        local_id,
    })
}

fn roster_rows(payload: &Value) -> Option<&Vec<Value>> {
    if let Some(rows) = payload.as_array() {
        return Some(rows);
    }
    payload
        .pointer("/data/students")
        .and_then(|v| v.as_array())
        .or_else(|| payload.get("students").and_then(|v| v.as_array()))
        .or_else(|| payload.get("data").and_then(|v| v.as_array()))
}

pub fn normalize_roster(payload: &Value) -> Vec<Student> {
    roster_rows(payload)
        .map(|rows| rows.iter().filter_map(normalize_student).collect())
        .unwrap_or_default()
}

/// Fixed roster for demo-mode sessions. Never used as a silent substitute for
/// a failed fetch.
pub fn sample_roster() -> Vec<Student> {
    [
        ("Aarav Sharma", "101"),
        ("Diya Patel", "102"),
        ("Kabir Singh", "103"),
        ("Meera Iyer", "104"),
        ("Rohan Gupta", "105"),
    ]
    .iter()
    .enumerate()
    .map(|(i, (name, roll))| Student {
        key: Some(format!("demo-{}", i + 1)),
        local_id: Some((i + 1).to_string()),
        display_name: name.to_string(),
        roll_number: Some(roll.to_string()),
    })
    .collect()
}
