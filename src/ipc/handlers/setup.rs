use crate::ipc::helpers::{get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::setup::{self, SetupSection, UpdateError};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::info;

fn setup_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        let value = setup::load_section(conn, section)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        out.insert(section.name().to_string(), value);
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let raw = get_required_str(params, "section")?;
    let section =
        SetupSection::parse(&raw).ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;

    let current = setup::update_section(conn, section, patch).map_err(|e| match e {
        UpdateError::Invalid(msg) => HandlerErr::bad_params(msg),
        UpdateError::Storage(e) => HandlerErr::new("db_update_failed", e.to_string()),
    })?;
    info!(section = section.name(), "setup section updated");
    Ok(json!({ "ok": true, "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, setup_get)),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
