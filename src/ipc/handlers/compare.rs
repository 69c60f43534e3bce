use crate::compare;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{computed_activity, db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use crate::store;
use serde_json::json;

const DEFAULT_TIME_LIMIT: usize = 10;

fn handle_compare_time(state: &mut AppState, req: &Request) -> serde_json::Value {
    let limit = match req.params.get("limit") {
        None => DEFAULT_TIME_LIMIT,
        Some(v) => match v.as_u64() {
            Some(n) if n > 0 => n as usize,
            _ => return err(&req.id, "bad_params", "limit must be a positive integer", None),
        },
    };
    let policy = match policy::parse_policy(req.params.get("policy")) {
        Ok(p) => p,
        Err(e) => return engine_err(&req.id, e),
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::activity_summaries(conn, &policy) {
        Ok(rows) => ok(
            &req.id,
            json!({ "activities": compare::time_comparison(rows, limit) }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_compare_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = optional_str(req, "subject");
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = computed_activity(conn, req, &activity_id) {
        return resp;
    }
    match store::load_class_rows(conn, &activity_id, subject.as_deref()) {
        Ok(rows) => ok(
            &req.id,
            json!({
                "activityId": activity_id,
                "subject": subject,
                "classes": compare::rank_classes(rows),
            }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_compare_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = computed_activity(conn, req, &activity_id) {
        return resp;
    }
    match store::load_class_rows(conn, &activity_id, None) {
        Ok(rows) => ok(
            &req.id,
            json!({
                "activityId": activity_id,
                "subjects": compare::subject_rollup(&rows),
            }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_compare_teachers(state: &mut AppState, req: &Request) -> serde_json::Value {
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = optional_str(req, "subject");
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = computed_activity(conn, req, &activity_id) {
        return resp;
    }
    match store::load_teacher_rows(conn, &activity_id, subject.as_deref()) {
        Ok(rows) => ok(
            &req.id,
            json!({
                "activityId": activity_id,
                "teachers": compare::rank_teachers(&rows),
            }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "compare.time" => Some(handle_compare_time(state, req)),
        "compare.classes" => Some(handle_compare_classes(state, req)),
        "compare.subjects" => Some(handle_compare_subjects(state, req)),
        "compare.teachers" => Some(handle_compare_teachers(state, req)),
        _ => None,
    }
}
