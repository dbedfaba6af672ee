mod backend;
mod backup;
mod config;
mod csv_io;
mod db;
mod flow;
mod ipc;
mod roster;
mod session;
mod setup;
mod store;

use std::io::{self, BufRead, Write};

use serde_json::json;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let cfg = config::DaemonConfig::from_env();
    // stdout carries the IPC protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_filter))
        .with_writer(io::stderr)
        .init();
    cfg.log_summary();

    let mut state = ipc::AppState::default();
    if let Some(path) = cfg.workspace.clone() {
        if let Err(e) = ipc::select_workspace(&mut state, path.clone()) {
            warn!(workspace = %path.display(), error = %e, "startup workspace could not be opened");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!(error = %e, "dropping malformed request line");
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
