use crate::ipc::error::ok;
use crate::ipc::helpers::{self, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{EventKind, RecordKey};
use crate::store::RecordRef;
use serde_json::json;

/// `recordId` wins; otherwise the composite key fields must all be present.
fn record_ref(params: &serde_json::Value) -> Result<RecordRef, HandlerErr> {
    if let Some(id) = get_optional_str(params, "recordId").filter(|s| !s.trim().is_empty()) {
        return Ok(RecordRef::Id(id.trim().to_string()));
    }
    let run = get_required_str(params, "run")?;
    let date = get_required_str(params, "date")?;
    let time = get_required_str(params, "time")?;
    let raw_kind = get_required_str(params, "type")?;
    let kind = EventKind::parse(&raw_kind).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "type must be tardy or absence".to_string(),
        details: Some(json!({ "type": raw_kind })),
    })?;
    Ok(RecordRef::Key(RecordKey {
        run,
        date,
        time,
        kind,
    }))
}

fn attendance_justify(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut engine = helpers::engine(state)?;
    let target = record_ref(params)?;
    // Blank names are rejected by the engine with their own error code.
    let guardian = get_optional_str(params, "guardianName").unwrap_or_default();
    let now = chrono::Local::now().naive_local();
    let justification = engine.justify_record(&target, &guardian, now)?;
    Ok(json!({ "justification": justification }))
}

fn handle_attendance_justify(state: &mut AppState, req: &Request) -> serde_json::Value {
    match attendance_justify(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.justify" => Some(handle_attendance_justify(state, req)),
        _ => None,
    }
}
