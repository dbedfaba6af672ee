use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value;

use crate::backend::BackendError;
use crate::flow::FlowError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::{AttendanceStatus, SessionError};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<BackendError> for HandlerErr {
    fn from(e: BackendError) -> Self {
        Self::new(e.code(), e.message)
    }
}

impl From<SessionError> for HandlerErr {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Backend(b) => b.into(),
            other => Self::new(other.code(), other.to_string()),
        }
    }
}

impl From<FlowError> for HandlerErr {
    fn from(e: FlowError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

pub fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    get_optional_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_status(params: &Value, key: &str) -> Result<AttendanceStatus, HandlerErr> {
    let raw = get_required_str(params, key)?;
    AttendanceStatus::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!("{} must be one of: present, absent, late", key))
    })
}

/// Runs a handler body that only needs the workspace connection.
pub fn with_db(
    state: &AppState,
    req: &Request,
    f: fn(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    respond(&req.id, require_db(state).and_then(|conn| f(conn, &req.params)))
}

/// Runs a handler body that needs more of the state than the connection,
/// such as open sessions or flows.
pub fn with_state(
    state: &mut AppState,
    req: &Request,
    f: fn(&mut AppState, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    respond(&req.id, f(state, &req.params))
}
