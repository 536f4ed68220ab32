use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::Discipline;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

const DISCIPLINE_KEY: &str = "store.discipline";

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "discipline": state.discipline.map(Discipline::as_str),
        }),
    )
}

fn handle_session_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let status = state.session.status(Instant::now());
    ok(&req.id, json!(status))
}

/// The first open of a workspace fixes its discipline; later opens must agree.
fn resolve_discipline(
    conn: &rusqlite::Connection,
    requested: Option<Discipline>,
    fallback: Discipline,
) -> Result<Discipline, HandlerErr> {
    let stored = db::settings_get_json(conn, DISCIPLINE_KEY)
        .map_err(|e| HandlerErr::new("db_open_failed", e.to_string()))?
        .and_then(|v| v.as_str().and_then(Discipline::parse));
    match (stored, requested) {
        (Some(stored), Some(requested)) if stored != requested => Err(HandlerErr {
            code: "discipline_mismatch",
            message: format!(
                "workspace uses the {} discipline, not {}",
                stored.as_str(),
                requested.as_str()
            ),
            details: Some(json!({ "workspaceDiscipline": stored.as_str() })),
        }),
        (Some(stored), _) => Ok(stored),
        (None, requested) => {
            let chosen = requested.unwrap_or(fallback);
            db::settings_set_json(conn, DISCIPLINE_KEY, &json!(chosen.as_str()))
                .map_err(|e| HandlerErr::new("db_open_failed", e.to_string()))?;
            Ok(chosen)
        }
    }
}

/// Opens `path` as the active workspace, replacing any open one.
pub fn open_workspace(
    state: &mut AppState,
    path: &Path,
    requested: Option<Discipline>,
) -> Result<Discipline, HandlerErr> {
    let conn = db::open_db(path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    let discipline = resolve_discipline(&conn, requested, state.config.discipline)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.discipline = Some(discipline);
    state.session.reset();
    info!(
        workspace = %path.to_string_lossy(),
        discipline = discipline.as_str(),
        "workspace opened"
    );
    Ok(discipline)
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = get_optional_str(&req.params, "path").map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let requested = match get_optional_str(&req.params, "discipline") {
        None => None,
        Some(raw) => match Discipline::parse(&raw) {
            Some(d) => Some(d),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "discipline must be normalized or tally",
                    Some(json!({ "discipline": raw })),
                )
            }
        },
    };

    match open_workspace(state, &path, requested) {
        Ok(discipline) => ok(
            &req.id,
            json!({
                "workspacePath": path.to_string_lossy(),
                "discipline": discipline.as_str(),
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_workspace_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    let (Some(workspace_path), Some(discipline)) = (state.workspace.clone(), state.discipline)
    else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    match backup::export_workspace_bundle(&workspace_path, &out, discipline.as_str()) {
        Ok(export) => {
            info!(path = %out_path, sha256 = %export.db_sha256, "workspace bundle exported");
            ok(
                &req.id,
                json!({
                    "path": out_path,
                    "bundleFormat": export.bundle_format,
                    "entryCount": export.entry_count,
                    "dbSha256": export.db_sha256,
                }),
            )
        }
        Err(e) => {
            warn!(path = %out_path, error = %e, "bundle export failed");
            err(
                &req.id,
                "bundle_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    }
}

fn handle_workspace_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    let Some(workspace_path) = get_optional_str(&req.params, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
    else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "bundle_failed",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    let previous = state.workspace.clone().filter(|_| state.db.is_some());
    state.db = None;
    state.discipline = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %in_path, error = %e, "bundle import failed");
            // The previous database is untouched on failure; reopen it.
            if let Some(previous) = previous {
                let _ = open_workspace(state, &previous, None);
            }
            return err(
                &req.id,
                "bundle_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            );
        }
    };

    let requested = import.discipline.as_deref().and_then(Discipline::parse);
    match open_workspace(state, &workspace_path, requested) {
        Ok(discipline) => ok(
            &req.id,
            json!({
                "workspacePath": workspace_path.to_string_lossy(),
                "bundleFormatDetected": import.bundle_format_detected,
                "discipline": discipline.as_str(),
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "session.status" => Some(handle_session_status(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "workspace.exportBundle" => Some(handle_workspace_export_bundle(state, req)),
        "workspace.importBundle" => Some(handle_workspace_import_bundle(state, req)),
        _ => None,
    }
}
