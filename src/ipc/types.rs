use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line off stdin: `{id, method, params}`. `params` defaults to
/// null so bare calls like `health` need no params object.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state: the selected valuebook workspace and its open SQLite
/// connection. Both stay `None` until `workspace.select` succeeds; every
/// exam, record, and activity method requires them.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
