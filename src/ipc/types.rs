use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::flow::GuidedFlow;
use crate::session::AttendanceSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything the daemon holds between requests. Sessions and flows are
/// in-memory only and belong to the currently selected workspace.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub sessions: HashMap<String, AttendanceSession>,
    pub flows: HashMap<String, GuidedFlow>,
}

impl AppState {
    /// Drops the open database and every session/flow tied to it.
    pub fn close_workspace(&mut self) {
        self.db = None;
        self.sessions.clear();
        self.flows.clear();
    }
}
