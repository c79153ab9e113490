mod backup;
mod config;
mod db;
mod eligibility;
mod ipc;
mod logging;

use std::io::{self, BufRead, Write};

fn main() {
    let cfg = config::DaemonConfig::from_env();
    logging::init(&cfg);

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = cfg.workspace.as_ref() {
        match db::open_db(path) {
            Ok(conn) => {
                tracing::info!(workspace = %path.display(), "opened workspace from environment");
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            Err(e) => {
                tracing::warn!(workspace = %path.display(), error = %e, "could not open workspace from environment");
            }
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "attendanced ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "dropping malformed request");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("attendanced shutting down");
}
