use crate::aggregate;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{computed_activity, db_conn, db_conn_mut, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use crate::store::{self, ActivityResults, ActivitySubjectStatus};
use crate::valueadd;
use chrono::Utc;
use rusqlite::params;
use serde_json::json;
use uuid::Uuid;

fn handle_activity_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let entry_exam_id = match required_str(req, "entryExamId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exit_exam_id = match required_str(req, "exitExamId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if entry_exam_id == exit_exam_id {
        return err(
            &req.id,
            "bad_params",
            "entry and exit exam must differ",
            None,
        );
    }

    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    for exam_id in [&entry_exam_id, &exit_exam_id] {
        match store::fetch_exam(conn, exam_id) {
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
    }

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO activities(id, title, entry_exam_id, exit_exam_id, created_at, computed_at)
         VALUES(?, ?, ?, ?, ?, NULL)",
        params![id, title, entry_exam_id, exit_exam_id, created_at],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({
            "id": id,
            "title": title,
            "entryExamId": entry_exam_id,
            "exitExamId": exit_exam_id,
            "createdAt": created_at,
        }),
    )
}

fn handle_activity_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::list_activities(conn) {
        Ok(activities) => ok(&req.id, json!({ "activities": activities })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_activity_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let policy = match policy::parse_policy(req.params.get("policy")) {
        Ok(p) => p,
        Err(e) => return engine_err(&req.id, e),
    };

    let conn = match db_conn_mut(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let activity = match store::fetch_activity(conn, &activity_id) {
        Ok(Some(a)) => a,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("unknown activity: {}", activity_id),
                None,
            )
        }
        Err(e) => return engine_err(&req.id, e),
    };

    let subjects = match store::subjects_for_exams(conn, &activity.entry_exam_id, &activity.exit_exam_id)
    {
        Ok(s) => s,
        Err(e) => return engine_err(&req.id, e),
    };
    if subjects.is_empty() {
        return err(
            &req.id,
            "insufficient_data",
            "no records loaded for either exam of the activity",
            None,
        );
    }

    // Per-subject standardization. A subject that cannot form both cohorts
    // is marked skipped instead of failing the whole run.
    let mut students = Vec::new();
    let mut subject_status = Vec::with_capacity(subjects.len());
    for subject in &subjects {
        let entry = match store::fetch_records(conn, &activity.entry_exam_id, Some(subject)) {
            Ok(r) => r,
            Err(e) => return engine_err(&req.id, e),
        };
        let exit = match store::fetch_records(conn, &activity.exit_exam_id, Some(subject)) {
            Ok(r) => r,
            Err(e) => return engine_err(&req.id, e),
        };
        match valueadd::compute_subject(
            subject,
            &activity.entry_exam_id,
            &activity.exit_exam_id,
            &entry,
            &exit,
            &policy,
        ) {
            Ok(out) => {
                subject_status.push(ActivitySubjectStatus {
                    subject: subject.clone(),
                    status: "computed".to_string(),
                    unpaired_entry: out.unpaired_entry as i64,
                    unpaired_exit: out.unpaired_exit as i64,
                });
                students.extend(out.students);
            }
            Err(e) if e.code == "insufficient_data" => {
                subject_status.push(ActivitySubjectStatus {
                    subject: subject.clone(),
                    status: "skipped".to_string(),
                    unpaired_entry: 0,
                    unpaired_exit: 0,
                });
            }
            Err(e) => return engine_err(&req.id, e),
        }
    }

    let classes = aggregate::aggregate_classes(&students, &policy);
    let teachers = aggregate::aggregate_teachers(&students, &policy);
    let balance = aggregate::subject_balance(&classes, &policy);
    let results = ActivityResults {
        computed_at: Utc::now().to_rfc3339(),
        subject_status,
        students,
        classes,
        teachers,
        balance,
    };
    if let Err(e) = store::replace_activity_results(conn, &activity_id, &results) {
        return engine_err(&req.id, e);
    }

    ok(
        &req.id,
        json!({
            "activityId": activity_id,
            "computedAt": results.computed_at,
            "subjects": results.subject_status,
            "studentCount": results.students.len(),
            "classCount": results.classes.len(),
            "teacherCount": results.teachers.len(),
        }),
    )
}

fn handle_activity_students(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match store::load_student_rows(conn, &activity_id, subject.as_deref()) {
        Ok(students) => ok(&req.id, json!({ "activityId": activity_id, "students": students })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_activity_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        Ok(classes) => ok(&req.id, json!({ "activityId": activity_id, "classes": classes })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_activity_teachers(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        Ok(teachers) => ok(&req.id, json!({ "activityId": activity_id, "teachers": teachers })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_activity_balance(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match store::load_balance_rows(conn, &activity_id) {
        Ok(balance) => ok(&req.id, json!({ "activityId": activity_id, "classes": balance })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activity.create" => Some(handle_activity_create(state, req)),
        "activity.list" => Some(handle_activity_list(state, req)),
        "activity.compute" => Some(handle_activity_compute(state, req)),
        "activity.students" => Some(handle_activity_students(state, req)),
        "activity.classes" => Some(handle_activity_classes(state, req)),
        "activity.teachers" => Some(handle_activity_teachers(state, req)),
        "activity.balance" => Some(handle_activity_balance(state, req)),
        _ => None,
    }
}
