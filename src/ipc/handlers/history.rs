use crate::history::build_tracking;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use crate::store;
use serde_json::json;

fn handle_history_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let policy = match policy::parse_policy(req.params.get("policy")) {
        Ok(p) => p,
        Err(e) => return engine_err(&req.id, e),
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::student_history_samples(conn, &student_id, &subject, &policy) {
        Ok(samples) => ok(&req.id, json!(build_tracking(&student_id, &subject, samples))),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_history_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_name = match required_str(req, "className") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::class_history_samples(conn, &class_name, &subject) {
        Ok(samples) => ok(&req.id, json!(build_tracking(&class_name, &subject, samples))),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_history_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::teacher_history_samples(conn, &teacher_id, &subject) {
        Ok(samples) => ok(&req.id, json!(build_tracking(&teacher_id, &subject, samples))),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "history.student" => Some(handle_history_student(state, req)),
        "history.class" => Some(handle_history_class(state, req)),
        "history.teacher" => Some(handle_history_teacher(state, req)),
        _ => None,
    }
}
