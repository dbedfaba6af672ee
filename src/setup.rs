//! Workspace settings edited through `setup.get` / `setup.update`.

use serde_json::{json, Map, Value};

use crate::backend::DEFAULT_REASONS;
use crate::db;

const MAX_REASONS: usize = 12;
const MAX_REASON_CHARS: usize = 40;
const MAX_TIME_SLOTS: usize = 16;
const MAX_TIME_SLOT_CHARS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Attendance,
    Schedule,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [Self::Attendance, Self::Schedule];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            "schedule" => Some(Self::Schedule),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Attendance => "attendance",
            Self::Schedule => "schedule",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Attendance => "setup.attendance",
            Self::Schedule => "setup.schedule",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Attendance => json!({
            "reasons": DEFAULT_REASONS,
            "demoFallback": false,
            "overlayRecorded": true
        }),
        SetupSection::Schedule => json!({
            "timeSlots": ["08:00-09:00", "09:00-10:00", "10:15-11:15", "11:15-12:15"]
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_label_list(
    v: &Value,
    key: &str,
    max_items: usize,
    max_chars: usize,
) -> Result<Value, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    if items.len() > max_items {
        return Err(format!("{} must have at most {} items", key, max_items));
    }
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be an array of strings", key))?
            .trim();
        if s.is_empty() {
            return Err(format!("{} must not contain blank items", key));
        }
        if s.chars().count() > max_chars {
            return Err(format!("{} items must be <= {} chars", key, max_chars));
        }
        if !out.iter().any(|o| o == s) {
            out.push(s.to_string());
        }
    }
    Ok(json!(out))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Attendance => match k.as_str() {
                "reasons" => {
                    obj.insert(
                        k.clone(),
                        parse_label_list(v, k, MAX_REASONS, MAX_REASON_CHARS)?,
                    );
                }
                "demoFallback" | "overlayRecorded" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
            SetupSection::Schedule => match k.as_str() {
                "timeSlots" => {
                    obj.insert(
                        k.clone(),
                        parse_label_list(v, k, MAX_TIME_SLOTS, MAX_TIME_SLOT_CHARS)?,
                    );
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub fn update_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> Result<Value, UpdateError> {
    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch).map_err(UpdateError::Invalid)?;
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(current)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceSetup {
    pub reasons: Vec<String>,
    pub demo_fallback: bool,
    pub overlay_recorded: bool,
}

fn strings(v: Option<&Value>) -> Vec<String> {
    v.and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn attendance_setup(conn: &rusqlite::Connection) -> anyhow::Result<AttendanceSetup> {
    let v = load_section(conn, SetupSection::Attendance)?;
    Ok(AttendanceSetup {
        reasons: strings(v.get("reasons")),
        demo_fallback: v.get("demoFallback").and_then(|b| b.as_bool()).unwrap_or(false),
        overlay_recorded: v
            .get("overlayRecorded")
            .and_then(|b| b.as_bool())
            .unwrap_or(true),
    })
}

pub fn time_slots(conn: &rusqlite::Connection) -> anyhow::Result<Vec<String>> {
    let v = load_section(conn, SetupSection::Schedule)?;
    Ok(strings(v.get("timeSlots")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn open_temp() -> (rusqlite::Connection, std::path::PathBuf) {
        let p = std::env::temp_dir().join(format!(
            "rollcall-setup-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        (db::open_db(&p).expect("open db"), p)
    }

    #[test]
    fn defaults_include_canned_reasons() {
        let (conn, dir) = open_temp();
        let setup = attendance_setup(&conn).expect("setup");
        assert_eq!(setup.reasons, DEFAULT_REASONS.to_vec());
        assert!(!setup.demo_fallback);
        assert!(setup.overlay_recorded);
        assert_eq!(time_slots(&conn).expect("slots").len(), 4);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn update_validates_and_dedupes() {
        let (conn, dir) = open_temp();
        let patch = json!({ "reasons": ["Sick", " Dentist ", "Sick"], "demoFallback": true });
        update_section(
            &conn,
            SetupSection::Attendance,
            patch.as_object().expect("object"),
        )
        .expect("update");
        let setup = attendance_setup(&conn).expect("setup");
        assert_eq!(setup.reasons, vec!["Sick", "Dentist"]);
        assert!(setup.demo_fallback);

        let bad = json!({ "reasons": ["ok", ""] });
        let err = update_section(&conn, SetupSection::Attendance, bad.as_object().expect("obj"))
            .unwrap_err();
        assert!(matches!(err, UpdateError::Invalid(_)));

        let unknown = json!({ "colour": "blue" });
        let err = update_section(&conn, SetupSection::Schedule, unknown.as_object().expect("obj"))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown schedule field: colour");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn malformed_saved_field_falls_back_to_default() {
        let (conn, dir) = open_temp();
        db::settings_set_json(
            &conn,
            "setup.attendance",
            &json!({ "demoFallback": "yes", "overlayRecorded": false }),
        )
        .expect("seed");
        let setup = attendance_setup(&conn).expect("setup");
        assert!(!setup.demo_fallback);
        assert!(!setup.overlay_recorded);
        let _ = std::fs::remove_dir_all(dir);
    }
}
