use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, db_conn_mut, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store;
use crate::valueadd::AssessmentRecord;
use chrono::NaiveDate;
use rusqlite::params;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

fn handle_exams_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let held_on = optional_str(req, "heldOn");
    if let Some(d) = &held_on {
        if NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
            return err(
                &req.id,
                "bad_params",
                format!("heldOn must be an ISO date: {}", d),
                None,
            );
        }
    }

    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(e) = conn.execute(
        "INSERT INTO exams(id, title, held_on) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET title = excluded.title, held_on = excluded.held_on",
        params![id, title, held_on],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "id": id, "title": title, "heldOn": held_on }))
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::list_exams(conn) {
        Ok(exams) => ok(&req.id, json!({ "exams": exams })),
        Err(e) => engine_err(&req.id, e),
    }
}

/// Wire shape of one score row on load. The exam comes from the request, not
/// from each row.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordInput {
    student_id: String,
    student_name: String,
    class_name: String,
    #[serde(default)]
    teacher_id: Option<String>,
    subject: String,
    #[serde(default)]
    score: Option<f64>,
}

fn handle_records_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("records").cloned() else {
        return err(&req.id, "bad_params", "missing records", None);
    };
    let inputs: Vec<RecordInput> = match serde_json::from_value(raw) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid records: {}", e), None),
    };

    let mut records = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.into_iter().enumerate() {
        if input.student_id.trim().is_empty()
            || input.subject.trim().is_empty()
            || input.class_name.trim().is_empty()
        {
            return err(
                &req.id,
                "bad_params",
                "studentId, subject and className must be non-empty",
                Some(json!({ "index": idx })),
            );
        }
        if input.score.map(|s| !s.is_finite()).unwrap_or(false) {
            return err(
                &req.id,
                "bad_params",
                "score must be a finite number or null",
                Some(json!({ "index": idx })),
            );
        }
        records.push(AssessmentRecord {
            student_id: input.student_id,
            student_name: input.student_name,
            class_name: input.class_name,
            teacher_id: input.teacher_id,
            subject: input.subject,
            exam_id: exam_id.clone(),
            score: input.score,
        });
    }

    let conn = match db_conn_mut(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::fetch_exam(conn, &exam_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("unknown exam: {}", exam_id),
                None,
            )
        }
        Err(e) => return engine_err(&req.id, e),
    }
    match store::upsert_records(conn, &exam_id, &records) {
        Ok(n) => ok(&req.id, json!({ "examId": exam_id, "loaded": n })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_records_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = optional_str(req, "subject");
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::fetch_exam(conn, &exam_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("unknown exam: {}", exam_id),
                None,
            )
        }
        Err(e) => return engine_err(&req.id, e),
    }
    match store::fetch_records(conn, &exam_id, subject.as_deref()) {
        Ok(records) => ok(&req.id, json!({ "examId": exam_id, "records": records })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.register" => Some(handle_exams_register(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        "records.load" => Some(handle_records_load(state, req)),
        "records.list" => Some(handle_records_list(state, req)),
        _ => None,
    }
}
