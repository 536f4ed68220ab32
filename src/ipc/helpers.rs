use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{error, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::store::SqliteStore;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        let details = match &e {
            EngineError::InvalidPhone(phone) => Some(json!({ "phone": phone })),
            EngineError::PartialFailure { committed, .. } => {
                serde_json::to_value(committed.as_ref()).ok()
            }
            _ => None,
        };
        match &e {
            EngineError::Backend(_) => error!(error = %e, "store call failed"),
            EngineError::PartialFailure { .. } => warn!(error = %e, "registration partially saved"),
            _ => {}
        }
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(HandlerErr::new("bad_params", format!("missing {}", key))),
    }
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Deserializes the whole params object; absent params mean all defaults.
pub fn parse_params<T: DeserializeOwned + Default>(
    params: &serde_json::Value,
) -> Result<T, HandlerErr> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))
}

pub fn engine(state: &AppState) -> Result<Engine<SqliteStore<'_>>, HandlerErr> {
    match (state.db.as_ref(), state.discipline) {
        (Some(conn), Some(discipline)) => Ok(Engine::new(SqliteStore::new(conn, discipline))),
        _ => Err(HandlerErr::new("no_workspace", "select a workspace first")),
    }
}
