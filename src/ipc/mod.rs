mod error;
mod handlers;
mod helpers;
mod router;
mod types;

use std::path::Path;

pub use router::handle_request;
pub use types::{AppState, Request};

/// Opens the configured startup workspace with its stored (or default) discipline.
pub fn open_startup_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    handlers::core::open_workspace(state, path, None)
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("{}: {}", e.code, e.message))
}
