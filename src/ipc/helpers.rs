use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ActivityRow};
use rusqlite::Connection;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn db_conn_mut<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Connection, serde_json::Value> {
    state
        .db
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Fetch an activity and require that it has a computed run to read from.
pub fn computed_activity(
    conn: &Connection,
    req: &Request,
    activity_id: &str,
) -> Result<ActivityRow, serde_json::Value> {
    let activity = match store::fetch_activity(conn, activity_id) {
        Ok(Some(a)) => a,
        Ok(None) => {
            return Err(err(
                &req.id,
                "not_found",
                format!("unknown activity: {}", activity_id),
                None,
            ))
        }
        Err(e) => return Err(crate::ipc::error::engine_err(&req.id, e)),
    };
    if activity.computed_at.is_none() {
        return Err(err(
            &req.id,
            "not_computed",
            format!("activity {} has no computed results", activity_id),
            None,
        ));
    }
    Ok(activity)
}
