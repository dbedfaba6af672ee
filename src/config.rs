use std::env;
use std::path::PathBuf;

use tracing::info;

const LOG_ENV: &str = "ROLLCALL_LOG";
const WORKSPACE_ENV: &str = "ROLLCALL_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings read once at startup.
///
/// Workspace-level settings (reasons, time slots, demo fallback) live in the
/// workspace database instead; see `setup`.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            log_filter: var(LOG_ENV).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            workspace: var(WORKSPACE_ENV).map(PathBuf::from),
        }
    }

    /// Logs which values came from the environment. Call after the subscriber
    /// is installed.
    pub fn log_summary(&self) {
        info!(log_filter = %self.log_filter, "daemon config loaded");
        match &self.workspace {
            Some(p) => info!(workspace = %p.display(), "{WORKSPACE_ENV} set, workspace will be opened"),
            None => info!("{WORKSPACE_ENV} not set, waiting for workspace.select"),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
