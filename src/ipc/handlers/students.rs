use crate::contact::ContactForm;
use crate::engine::{ImportRow, StudentFilter};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, get_required_str, parse_params, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::phone;
use serde_json::json;

fn students_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let engine = helpers::engine(state)?;
    let filter: StudentFilter = parse_params(params)?;
    let students = engine.students(&filter)?;
    let total = students.len();
    Ok(json!({ "students": students, "total": total }))
}

fn students_import(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut engine = helpers::engine(state)?;
    let Some(rows) = params.get("rows").filter(|v| v.is_array()) else {
        return Err(HandlerErr::new("bad_params", "missing rows"));
    };
    let rows: Vec<ImportRow> = serde_json::from_value(rows.clone())
        .map_err(|e| HandlerErr::new("bad_params", format!("invalid rows: {}", e)))?;
    let report = engine.import_students(&rows)?;
    Ok(json!(report))
}

fn contacts_update(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut engine = helpers::engine(state)?;
    let run = get_required_str(params, "run")?;
    let form: ContactForm = parse_params(params)?;
    let outcome = engine.update_contact(&run, &form)?;
    Ok(json!(outcome))
}

fn credentials_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let engine = helpers::engine(state)?;
    Ok(json!({ "credentials": engine.credentials()? }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    match students_list(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    match students_import(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_contacts_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    match contacts_update(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_credentials_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    match credentials_list(state) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

// Pure formatting; works without a workspace.
fn handle_phone_format(req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("phone").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing phone", None);
    };
    let normalized = phone::normalize(raw);
    ok(
        &req.id,
        json!({
            "display": phone::format_display(raw),
            "valid": phone::is_valid(raw),
            "normalized": normalized,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.import" => Some(handle_students_import(state, req)),
        "contacts.update" => Some(handle_contacts_update(state, req)),
        "credentials.list" => Some(handle_credentials_list(state, req)),
        "phone.format" => Some(handle_phone_format(req)),
        _ => None,
    }
}
