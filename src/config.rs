use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::Discipline;

pub const DEFAULT_LOG_FILTER: &str = "pasesd=info";

#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
    /// Discipline for workspaces that have not recorded one yet.
    pub discipline: Discipline,
    pub register_cooldown: Duration,
    pub lookup_cooldown: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            discipline: Discipline::Normalized,
            register_cooldown: Duration::from_millis(3000),
            lookup_cooldown: Duration::from_millis(1000),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let discipline = match non_empty("PASES_DISCIPLINE") {
            Some(raw) => Discipline::parse(&raw)
                .ok_or_else(|| anyhow!("PASES_DISCIPLINE must be normalized or tally, got {raw:?}"))?,
            None => defaults.discipline,
        };
        let millis = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match non_empty(key) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("{key} must be a whole number of milliseconds")),
                None => Ok(default),
            }
        };

        Ok(Self {
            workspace: non_empty("PASES_WORKSPACE").map(PathBuf::from),
            discipline,
            register_cooldown: millis("PASES_REGISTER_COOLDOWN_MS", defaults.register_cooldown)?,
            lookup_cooldown: millis("PASES_LOOKUP_COOLDOWN_MS", defaults.lookup_cooldown)?,
        })
    }
}
