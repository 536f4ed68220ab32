use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::session::ScanSession;
use crate::store::Discipline;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Set together with `db` once the workspace discipline is resolved.
    pub discipline: Option<Discipline>,
    pub session: ScanSession,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            workspace: None,
            db: None,
            discipline: None,
            session: ScanSession::new(),
            config,
        }
    }
}
