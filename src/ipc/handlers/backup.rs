use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn required_path(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

fn handle_export_workspace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_path(req, "outPath") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Flush pending pages so the copied file is complete.
    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!(error = %e, "wal checkpoint before export failed");
        }
    }

    let out = PathBuf::from(&out_path);
    match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(export) => {
            tracing::info!(path = %out_path, sha256 = %export.db_sha256, "workspace exported");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "path": out_path,
                    "bundleFormat": export.bundle_format,
                    "entryCount": export.entry_count,
                    "dbSha256": export.db_sha256
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "backup_export_failed",
            format!("{:#}", e),
            Some(json!({ "path": out_path })),
        ),
    }
}

fn handle_import_workspace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_path(req, "inPath") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // The open handle must be released before the file is replaced.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %in_path, error = %format!("{:#}", e), "workspace import failed");
            if let Some(previous) = state.workspace.as_ref() {
                state.db = db::open_db(previous).ok();
            }
            return err(
                &req.id,
                "backup_import_failed",
                format!("{:#}", e),
                Some(json!({ "path": in_path })),
            );
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            tracing::info!(
                workspace = %workspace_path.display(),
                format = %import.bundle_format_detected,
                "workspace imported"
            );
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspace" => Some(handle_export_workspace(state, req)),
        "backup.importWorkspace" => Some(handle_import_workspace(state, req)),
        _ => None,
    }
}
