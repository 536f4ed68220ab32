use crate::engine::RecordFilter;
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, parse_params, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn records_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let engine = helpers::engine(state)?;
    let filter: RecordFilter = parse_params(params)?;
    let records = engine.list_records(&filter)?;
    let total = records.len();
    Ok(json!({ "records": records, "total": total }))
}

fn records_stats(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let engine = helpers::engine(state)?;
    let filter: RecordFilter = parse_params(params)?;
    Ok(json!({ "totals": engine.stats(&filter)? }))
}

fn handle_records_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    match records_list(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_records_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    match records_stats(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.list" => Some(handle_records_list(state, req)),
        "records.stats" => Some(handle_records_stats(state, req)),
        _ => None,
    }
}
