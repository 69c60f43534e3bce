use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_valuebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn valuebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value["error"]["code"].as_str().expect("error code")
}

fn record(student: &str, subject: &str, score: serde_json::Value) -> serde_json::Value {
    json!({
        "studentId": student,
        "studentName": format!("Student {}", student),
        "className": "7A",
        "subject": subject,
        "score": score,
    })
}

#[test]
fn single_student_cohort_uses_degenerate_conventions() {
    let workspace = temp_dir("valuebook-single-student");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.register",
        json!({ "id": "e1", "title": "Entry" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.register",
        json!({ "id": "e2", "title": "Exit" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.load",
        json!({ "examId": "e1", "records": [record("solo", "math", json!(72.0))] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "records.load",
        json!({ "examId": "e2", "records": [record("solo", "math", json!(68.0))] }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "activity.create",
        json!({ "title": "Solo", "entryExamId": "e1", "exitExamId": "e2" }),
    );
    let activity_id = created["id"].as_str().expect("id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "activity.compute",
        json!({ "activityId": activity_id }),
    );

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "activity.students",
        json!({ "activityId": activity_id }),
    );
    let s = &students["students"][0];
    // Zero stddev pins z at 0 on both sides, so the raw drop adds no rate.
    assert_eq!(s["entryZ"].as_f64(), Some(0.0));
    assert_eq!(s["exitZ"].as_f64(), Some(0.0));
    assert_eq!(s["scoreValueAddedRate"].as_f64(), Some(0.0));
    assert_eq!(s["entryLevel"].as_str(), Some("A+"));
    assert_eq!(s["exitLevel"].as_str(), Some("A+"));
    assert_eq!(s["isConsolidated"].as_bool(), Some(true));
    assert_eq!(s["entryRankInClass"].as_i64(), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subject_without_scored_cohort_is_skipped_not_fatal() {
    let workspace = temp_dir("valuebook-skipped-subject");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.register",
        json!({ "id": "e1", "title": "Entry" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.register",
        json!({ "id": "e2", "title": "Exit" }),
    );
    // Chinese has no scored entry rows at all; math is complete.
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.load",
        json!({
            "examId": "e1",
            "records": [
                record("s1", "math", json!(60.0)),
                record("s2", "math", json!(80.0)),
                record("s1", "chinese", json!(null)),
            ],
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "records.load",
        json!({
            "examId": "e2",
            "records": [
                record("s1", "math", json!(65.0)),
                record("s2", "math", json!(82.0)),
                record("s1", "chinese", json!(70.0)),
            ],
        }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "activity.create",
        json!({ "title": "Mixed", "entryExamId": "e1", "exitExamId": "e2" }),
    );
    let activity_id = created["id"].as_str().expect("id").to_string();
    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "activity.compute",
        json!({ "activityId": activity_id }),
    );

    let subjects = computed["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 2);
    let chinese = subjects
        .iter()
        .find(|s| s["subject"].as_str() == Some("chinese"))
        .expect("chinese status");
    let math = subjects
        .iter()
        .find(|s| s["subject"].as_str() == Some("math"))
        .expect("math status");
    assert_eq!(chinese["status"].as_str(), Some("skipped"));
    assert_eq!(math["status"].as_str(), Some("computed"));
    assert_eq!(computed["studentCount"].as_u64(), Some(2));

    let chinese_rows = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "activity.students",
        json!({ "activityId": activity_id, "subject": "chinese" }),
    );
    assert_eq!(chinese_rows["students"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn result_reads_require_a_computed_run() {
    let workspace = temp_dir("valuebook-not-computed");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.register",
        json!({ "id": "e1", "title": "Entry" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.register",
        json!({ "id": "e2", "title": "Exit" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "activity.create",
        json!({ "title": "Pending", "entryExamId": "e1", "exitExamId": "e2" }),
    );
    let activity_id = created["id"].as_str().expect("id").to_string();

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "activity.students",
        json!({ "activityId": activity_id }),
    );
    assert_eq!(error_code(&resp), "not_computed");

    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "compare.classes",
        json!({ "activityId": activity_id, "subject": "math" }),
    );
    assert_eq!(error_code(&resp), "not_computed");

    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "activity.students",
        json!({ "activityId": "no-such-activity" }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "activity.create",
        json!({ "title": "Same", "entryExamId": "e1", "exitExamId": "e1" }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unpaired_students_are_reported_and_excluded() {
    let workspace = temp_dir("valuebook-unpaired");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.register",
        json!({ "id": "e1", "title": "Entry" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.register",
        json!({ "id": "e2", "title": "Exit" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.load",
        json!({
            "examId": "e1",
            "records": [
                record("s1", "math", json!(60.0)),
                record("s2", "math", json!(70.0)),
                record("s3", "math", json!(80.0)),
            ],
        }),
    );
    // s1 left, s9 arrived between the exams.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "records.load",
        json!({
            "examId": "e2",
            "records": [
                record("s2", "math", json!(71.0)),
                record("s3", "math", json!(82.0)),
                record("s9", "math", json!(50.0)),
            ],
        }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "activity.create",
        json!({ "title": "Churn", "entryExamId": "e1", "exitExamId": "e2" }),
    );
    let activity_id = created["id"].as_str().expect("id").to_string();
    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "activity.compute",
        json!({ "activityId": activity_id }),
    );

    assert_eq!(computed["studentCount"].as_u64(), Some(2));
    let status = &computed["subjects"][0];
    assert_eq!(status["unpairedEntry"].as_i64(), Some(1));
    assert_eq!(status["unpairedExit"].as_i64(), Some(1));

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "activity.students",
        json!({ "activityId": activity_id }),
    );
    let ids: Vec<&str> = students["students"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|s| s["studentId"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec!["s2", "s3"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
