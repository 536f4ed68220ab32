use crate::engine::Engine;
use crate::error::EngineError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{EventKind, StudentIdentity};
use crate::qr;
use crate::store::SqliteStore;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

/// Gate a scan through the session, decode the payload and run `op` on it.
/// Whatever `op` returns, the session cools down afterwards; an unreadable
/// payload releases it immediately.
fn run_scan(
    state: &mut AppState,
    req: &Request,
    cooldown: Duration,
    op: impl FnOnce(
        &mut Engine<SqliteStore<'_>>,
        &StudentIdentity,
    ) -> Result<serde_json::Value, EngineError>,
) -> serde_json::Value {
    let payload = match get_required_str(&req.params, "payload") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if state.db.is_none() || state.discipline.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }

    if let Err(busy) = state.session.accept(Instant::now()) {
        debug!(method = %req.method, "scan rejected while busy");
        return err(
            &req.id,
            "scanner_busy",
            busy.to_string(),
            Some(json!({ "retryAfterMs": busy.retry_after.as_millis() as u64 })),
        );
    }
    let identity = match qr::parse_payload(&payload) {
        Ok(v) => v,
        Err(e) => {
            state.session.reset();
            return HandlerErr::from(e).response(&req.id);
        }
    };
    state.session.processing();

    let result = match helpers::engine(state) {
        Ok(mut engine) => op(&mut engine, &identity).map_err(HandlerErr::from),
        Err(e) => Err(e),
    };
    state.session.finish(Instant::now(), cooldown);

    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let kind = match get_required_str(&req.params, "type") {
        Ok(raw) => match EventKind::parse(&raw) {
            Some(k) => k,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "type must be tardy or absence",
                    Some(json!({ "type": raw })),
                )
            }
        },
        Err(e) => return e.response(&req.id),
    };
    let comment = get_optional_str(&req.params, "comment");
    let cooldown = state.config.register_cooldown;

    run_scan(state, req, cooldown, |engine, identity| {
        let now = chrono::Local::now().naive_local();
        let registration = engine.register_event(identity, kind, comment.as_deref(), now)?;
        Ok(json!({ "registration": registration }))
    })
}

fn handle_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cooldown = state.config.lookup_cooldown;
    run_scan(state, req, cooldown, |engine, identity| {
        let records = engine.fetch_history(&identity.run)?;
        Ok(json!({
            "student": identity,
            "run": identity.key(),
            "empty": records.is_empty(),
            "records": records,
        }))
    })
}

fn handle_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cooldown = state.config.lookup_cooldown;
    run_scan(state, req, cooldown, |engine, identity| {
        let pending = engine.pending(&identity.run)?;
        Ok(json!({
            "student": identity,
            "run": identity.key(),
            "records": pending.records,
            "historyCount": pending.history_len,
            "allJustified": pending.all_justified,
        }))
    })
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cooldown = state.config.register_cooldown;
    run_scan(state, req, cooldown, |engine, identity| {
        let kinds = engine.summary(&identity.run)?;
        Ok(json!({
            "student": identity,
            "run": identity.key(),
            "kinds": kinds,
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scan.register" => Some(handle_register(state, req)),
        "scan.history" => Some(handle_history(state, req)),
        "scan.pending" => Some(handle_pending(state, req)),
        "scan.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
