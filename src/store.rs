use crate::aggregate::{ClassValueAdded, SubjectBalance, SubjectBalanceEntry, TeacherValueAdded};
use crate::error::EngineError;
use crate::history::{ActivityRef, TrendSample};
use crate::policy::GradingPolicy;
use crate::valueadd::{AssessmentRecord, StudentValueAdded};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRow {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_on: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRow {
    pub id: String,
    pub title: String,
    pub entry_exam_id: String,
    pub exit_exam_id: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySubjectStatus {
    pub subject: String,
    pub status: String,
    pub unpaired_entry: i64,
    pub unpaired_exit: i64,
}

/// Everything one compute run materializes for an activity.
#[derive(Debug, Clone)]
pub struct ActivityResults {
    pub computed_at: String,
    pub subject_status: Vec<ActivitySubjectStatus>,
    pub students: Vec<StudentValueAdded>,
    pub classes: Vec<ClassValueAdded>,
    pub teachers: Vec<TeacherValueAdded>,
    pub balance: Vec<SubjectBalance>,
}

pub fn fetch_exam(conn: &Connection, exam_id: &str) -> Result<Option<ExamRow>, EngineError> {
    conn.query_row(
        "SELECT id, title, held_on FROM exams WHERE id = ?",
        [exam_id],
        |r| {
            Ok(ExamRow {
                id: r.get(0)?,
                title: r.get(1)?,
                held_on: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(EngineError::db)
}

pub fn list_exams(conn: &Connection) -> Result<Vec<ExamRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT id, title, held_on FROM exams ORDER BY held_on IS NULL, held_on, id")
        .map_err(EngineError::db)?;
    stmt.query_map([], |r| {
        Ok(ExamRow {
            id: r.get(0)?,
            title: r.get(1)?,
            held_on: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(EngineError::db)
}

pub fn fetch_activity(
    conn: &Connection,
    activity_id: &str,
) -> Result<Option<ActivityRow>, EngineError> {
    conn.query_row(
        "SELECT id, title, entry_exam_id, exit_exam_id, created_at, computed_at
         FROM activities WHERE id = ?",
        [activity_id],
        |r| {
            Ok(ActivityRow {
                id: r.get(0)?,
                title: r.get(1)?,
                entry_exam_id: r.get(2)?,
                exit_exam_id: r.get(3)?,
                created_at: r.get(4)?,
                computed_at: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(EngineError::db)
}

pub fn list_activities(conn: &Connection) -> Result<Vec<ActivityRow>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, entry_exam_id, exit_exam_id, created_at, computed_at
             FROM activities ORDER BY created_at, id",
        )
        .map_err(EngineError::db)?;
    stmt.query_map([], |r| {
        Ok(ActivityRow {
            id: r.get(0)?,
            title: r.get(1)?,
            entry_exam_id: r.get(2)?,
            exit_exam_id: r.get(3)?,
            created_at: r.get(4)?,
            computed_at: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(EngineError::db)
}

/// Computed activities paired with their exit exam, in exam chronology.
pub fn list_computed_activities(
    conn: &Connection,
) -> Result<Vec<(ActivityRow, ExamRow)>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.entry_exam_id, a.exit_exam_id, a.created_at, a.computed_at,
                    e.id, e.title, e.held_on
             FROM activities a
             JOIN exams e ON e.id = a.exit_exam_id
             WHERE a.computed_at IS NOT NULL
             ORDER BY e.held_on IS NULL, e.held_on, e.id, a.id",
        )
        .map_err(EngineError::db)?;
    stmt.query_map([], |r| {
        Ok((
            ActivityRow {
                id: r.get(0)?,
                title: r.get(1)?,
                entry_exam_id: r.get(2)?,
                exit_exam_id: r.get(3)?,
                created_at: r.get(4)?,
                computed_at: r.get(5)?,
            },
            ExamRow {
                id: r.get(6)?,
                title: r.get(7)?,
                held_on: r.get(8)?,
            },
        ))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(EngineError::db)
}

/// The record store's query seam: all rows for an exam, optionally one
/// subject. Side-effect free and idempotent.
pub fn fetch_records(
    conn: &Connection,
    exam_id: &str,
    subject: Option<&str>,
) -> Result<Vec<AssessmentRecord>, EngineError> {
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<AssessmentRecord> {
        Ok(AssessmentRecord {
            student_id: r.get(0)?,
            student_name: r.get(1)?,
            class_name: r.get(2)?,
            teacher_id: r.get(3)?,
            subject: r.get(4)?,
            exam_id: r.get(5)?,
            score: r.get(6)?,
        })
    };

    if let Some(subject) = subject {
        let mut stmt = conn
            .prepare(
                "SELECT student_id, student_name, class_name, teacher_id, subject, exam_id, score
                 FROM assessment_records
                 WHERE exam_id = ? AND subject = ?
                 ORDER BY student_id",
            )
            .map_err(EngineError::db)?;
        stmt.query_map([exam_id, subject], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)
    } else {
        let mut stmt = conn
            .prepare(
                "SELECT student_id, student_name, class_name, teacher_id, subject, exam_id, score
                 FROM assessment_records
                 WHERE exam_id = ?
                 ORDER BY subject, student_id",
            )
            .map_err(EngineError::db)?;
        stmt.query_map([exam_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)
    }
}

/// Subjects present on either side of an activity, sorted.
pub fn subjects_for_exams(
    conn: &Connection,
    entry_exam_id: &str,
    exit_exam_id: &str,
) -> Result<Vec<String>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT subject FROM assessment_records
             WHERE exam_id IN (?, ?) ORDER BY subject",
        )
        .map_err(EngineError::db)?;
    stmt.query_map([entry_exam_id, exit_exam_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)
}

/// Bulk upsert of raw score rows for one exam. Re-loading a row replaces its
/// score and roster fields; record identity is (exam, student, subject).
pub fn upsert_records(
    conn: &mut Connection,
    exam_id: &str,
    records: &[AssessmentRecord],
) -> Result<usize, EngineError> {
    let tx = conn.transaction().map_err(EngineError::db)?;
    for rec in records {
        tx.execute(
            "INSERT INTO assessment_records(
                id, exam_id, student_id, student_name, class_name, teacher_id, subject, score)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(exam_id, student_id, subject) DO UPDATE SET
                student_name = excluded.student_name,
                class_name = excluded.class_name,
                teacher_id = excluded.teacher_id,
                score = excluded.score",
            params![
                Uuid::new_v4().to_string(),
                exam_id,
                rec.student_id,
                rec.student_name,
                rec.class_name,
                rec.teacher_id,
                rec.subject,
                rec.score,
            ],
        )
        .map_err(|e| EngineError::new("db_insert_failed", e.to_string()))?;
    }
    tx.commit().map_err(EngineError::db)?;
    Ok(records.len())
}

/// Supersede an activity's materialized results with a fresh run, in one
/// transaction. Past runs are never patched in place.
pub fn replace_activity_results(
    conn: &mut Connection,
    activity_id: &str,
    results: &ActivityResults,
) -> Result<(), EngineError> {
    let ins = |e: rusqlite::Error| EngineError::new("db_insert_failed", e.to_string());
    let tx = conn.transaction().map_err(EngineError::db)?;

    for table in [
        "student_value_added",
        "class_value_added",
        "teacher_value_added",
        "subject_balance",
        "activity_subjects",
    ] {
        tx.execute(
            &format!("DELETE FROM {} WHERE activity_id = ?", table),
            [activity_id],
        )
        .map_err(ins)?;
    }

    for st in &results.subject_status {
        tx.execute(
            "INSERT INTO activity_subjects(activity_id, subject, status, unpaired_entry, unpaired_exit)
             VALUES(?, ?, ?, ?, ?)",
            params![activity_id, st.subject, st.status, st.unpaired_entry, st.unpaired_exit],
        )
        .map_err(ins)?;
    }

    for s in &results.students {
        tx.execute(
            "INSERT INTO student_value_added(
                activity_id, student_id, subject, student_name, class_name, teacher_id,
                entry_score, exit_score, entry_rank_in_class, exit_rank_in_class,
                entry_z, exit_z, entry_standard_score, exit_standard_score,
                entry_level, exit_level, level_change,
                score_value_added, score_value_added_rate, is_consolidated, is_transformed)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                activity_id,
                s.student_id,
                s.subject,
                s.student_name,
                s.class_name,
                s.teacher_id,
                s.entry_score,
                s.exit_score,
                s.entry_rank_in_class,
                s.exit_rank_in_class,
                s.entry_z,
                s.exit_z,
                s.entry_standard_score,
                s.exit_standard_score,
                s.entry_level,
                s.exit_level,
                s.level_change,
                s.score_value_added,
                s.score_value_added_rate,
                s.is_consolidated,
                s.is_transformed,
            ],
        )
        .map_err(ins)?;
    }

    for c in &results.classes {
        tx.execute(
            "INSERT INTO class_value_added(
                activity_id, class_name, subject, total_students,
                avg_score_entry, avg_score_exit, avg_exit_z, avg_score_value_added_rate,
                consolidation_rate, transformation_rate, contribution_rate,
                progress_student_ratio, entry_excellent_count, exit_excellent_count)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                activity_id,
                c.class_name,
                c.subject,
                c.total_students as i64,
                c.avg_score_entry,
                c.avg_score_exit,
                c.avg_exit_z,
                c.avg_score_value_added_rate,
                c.consolidation_rate,
                c.transformation_rate,
                c.contribution_rate,
                c.progress_student_ratio,
                c.entry_excellent_count,
                c.exit_excellent_count,
            ],
        )
        .map_err(ins)?;
    }

    for t in &results.teachers {
        tx.execute(
            "INSERT INTO teacher_value_added(
                activity_id, teacher_id, class_name, subject, total_students,
                avg_score_entry, avg_score_exit, avg_exit_z, avg_score_value_added_rate,
                consolidation_rate, transformation_rate, contribution_rate,
                progress_student_ratio, entry_excellent_count, exit_excellent_count)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                activity_id,
                t.teacher_id,
                t.class_name,
                t.subject,
                t.total_students as i64,
                t.avg_score_entry,
                t.avg_score_exit,
                t.avg_exit_z,
                t.avg_score_value_added_rate,
                t.consolidation_rate,
                t.transformation_rate,
                t.contribution_rate,
                t.progress_student_ratio,
                t.entry_excellent_count,
                t.exit_excellent_count,
            ],
        )
        .map_err(ins)?;
    }

    for b in &results.balance {
        let subjects_json = serde_json::to_string(&b.subjects)
            .map_err(|e| EngineError::new("encode_failed", e.to_string()))?;
        tx.execute(
            "INSERT INTO subject_balance(
                activity_id, class_name, total_score_value_added_rate,
                subject_deviation, balance_score, subjects_json)
             VALUES(?, ?, ?, ?, ?, ?)",
            params![
                activity_id,
                b.class_name,
                b.total_score_value_added_rate,
                b.subject_deviation,
                b.balance_score,
                subjects_json,
            ],
        )
        .map_err(ins)?;
    }

    tx.execute(
        "UPDATE activities SET computed_at = ? WHERE id = ?",
        params![results.computed_at, activity_id],
    )
    .map_err(ins)?;

    tx.commit().map_err(EngineError::db)
}

pub fn load_activity_subjects(
    conn: &Connection,
    activity_id: &str,
) -> Result<Vec<ActivitySubjectStatus>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT subject, status, unpaired_entry, unpaired_exit
             FROM activity_subjects WHERE activity_id = ? ORDER BY subject",
        )
        .map_err(EngineError::db)?;
    stmt.query_map([activity_id], |r| {
        Ok(ActivitySubjectStatus {
            subject: r.get(0)?,
            status: r.get(1)?,
            unpaired_entry: r.get(2)?,
            unpaired_exit: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(EngineError::db)
}

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentValueAdded> {
    Ok(StudentValueAdded {
        student_id: r.get(0)?,
        subject: r.get(1)?,
        student_name: r.get(2)?,
        class_name: r.get(3)?,
        teacher_id: r.get(4)?,
        entry_score: r.get(5)?,
        exit_score: r.get(6)?,
        entry_rank_in_class: r.get(7)?,
        exit_rank_in_class: r.get(8)?,
        entry_z: r.get(9)?,
        exit_z: r.get(10)?,
        entry_standard_score: r.get(11)?,
        exit_standard_score: r.get(12)?,
        entry_level: r.get(13)?,
        exit_level: r.get(14)?,
        level_change: r.get(15)?,
        score_value_added: r.get(16)?,
        score_value_added_rate: r.get(17)?,
        is_consolidated: r.get(18)?,
        is_transformed: r.get(19)?,
    })
}

const STUDENT_COLS: &str = "student_id, subject, student_name, class_name, teacher_id,
    entry_score, exit_score, entry_rank_in_class, exit_rank_in_class,
    entry_z, exit_z, entry_standard_score, exit_standard_score,
    entry_level, exit_level, level_change,
    score_value_added, score_value_added_rate, is_consolidated, is_transformed";

pub fn load_student_rows(
    conn: &Connection,
    activity_id: &str,
    subject: Option<&str>,
) -> Result<Vec<StudentValueAdded>, EngineError> {
    if let Some(subject) = subject {
        let sql = format!(
            "SELECT {} FROM student_value_added
             WHERE activity_id = ? AND subject = ?
             ORDER BY subject, class_name, student_id",
            STUDENT_COLS
        );
        let mut stmt = conn.prepare(&sql).map_err(EngineError::db)?;
        stmt.query_map([activity_id, subject], student_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)
    } else {
        let sql = format!(
            "SELECT {} FROM student_value_added
             WHERE activity_id = ?
             ORDER BY subject, class_name, student_id",
            STUDENT_COLS
        );
        let mut stmt = conn.prepare(&sql).map_err(EngineError::db)?;
        stmt.query_map([activity_id], student_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)
    }
}

fn class_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassValueAdded> {
    Ok(ClassValueAdded {
        class_name: r.get(0)?,
        subject: r.get(1)?,
        total_students: r.get::<_, i64>(2)? as usize,
        avg_score_entry: r.get(3)?,
        avg_score_exit: r.get(4)?,
        avg_exit_z: r.get(5)?,
        avg_score_value_added_rate: r.get(6)?,
        consolidation_rate: r.get(7)?,
        transformation_rate: r.get(8)?,
        contribution_rate: r.get(9)?,
        progress_student_ratio: r.get(10)?,
        entry_excellent_count: r.get(11)?,
        exit_excellent_count: r.get(12)?,
    })
}

const CLASS_COLS: &str = "class_name, subject, total_students,
    avg_score_entry, avg_score_exit, avg_exit_z, avg_score_value_added_rate,
    consolidation_rate, transformation_rate, contribution_rate,
    progress_student_ratio, entry_excellent_count, exit_excellent_count";

pub fn load_class_rows(
    conn: &Connection,
    activity_id: &str,
    subject: Option<&str>,
) -> Result<Vec<ClassValueAdded>, EngineError> {
    if let Some(subject) = subject {
        let sql = format!(
            "SELECT {} FROM class_value_added
             WHERE activity_id = ? AND subject = ?
             ORDER BY subject, class_name",
            CLASS_COLS
        );
        let mut stmt = conn.prepare(&sql).map_err(EngineError::db)?;
        stmt.query_map([activity_id, subject], class_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)
    } else {
        let sql = format!(
            "SELECT {} FROM class_value_added
             WHERE activity_id = ?
             ORDER BY subject, class_name",
            CLASS_COLS
        );
        let mut stmt = conn.prepare(&sql).map_err(EngineError::db)?;
        stmt.query_map([activity_id], class_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)
    }
}

fn teacher_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TeacherValueAdded> {
    Ok(TeacherValueAdded {
        teacher_id: r.get(0)?,
        class_name: r.get(1)?,
        subject: r.get(2)?,
        total_students: r.get::<_, i64>(3)? as usize,
        avg_score_entry: r.get(4)?,
        avg_score_exit: r.get(5)?,
        avg_exit_z: r.get(6)?,
        avg_score_value_added_rate: r.get(7)?,
        consolidation_rate: r.get(8)?,
        transformation_rate: r.get(9)?,
        contribution_rate: r.get(10)?,
        progress_student_ratio: r.get(11)?,
        entry_excellent_count: r.get(12)?,
        exit_excellent_count: r.get(13)?,
    })
}

const TEACHER_COLS: &str = "teacher_id, class_name, subject, total_students,
    avg_score_entry, avg_score_exit, avg_exit_z, avg_score_value_added_rate,
    consolidation_rate, transformation_rate, contribution_rate,
    progress_student_ratio, entry_excellent_count, exit_excellent_count";

pub fn load_teacher_rows(
    conn: &Connection,
    activity_id: &str,
    subject: Option<&str>,
) -> Result<Vec<TeacherValueAdded>, EngineError> {
    if let Some(subject) = subject {
        let sql = format!(
            "SELECT {} FROM teacher_value_added
             WHERE activity_id = ? AND subject = ?
             ORDER BY subject, teacher_id, class_name",
            TEACHER_COLS
        );
        let mut stmt = conn.prepare(&sql).map_err(EngineError::db)?;
        stmt.query_map([activity_id, subject], teacher_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)
    } else {
        let sql = format!(
            "SELECT {} FROM teacher_value_added
             WHERE activity_id = ?
             ORDER BY subject, teacher_id, class_name",
            TEACHER_COLS
        );
        let mut stmt = conn.prepare(&sql).map_err(EngineError::db)?;
        stmt.query_map([activity_id], teacher_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)
    }
}

pub fn load_balance_rows(
    conn: &Connection,
    activity_id: &str,
) -> Result<Vec<SubjectBalance>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT class_name, total_score_value_added_rate, subject_deviation,
                    balance_score, subjects_json
             FROM subject_balance WHERE activity_id = ? ORDER BY class_name",
        )
        .map_err(EngineError::db)?;
    let raw = stmt
        .query_map([activity_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)?;

    let mut out = Vec::with_capacity(raw.len());
    for (class_name, total_rate, deviation, balance_score, subjects_json) in raw {
        let subjects: Vec<SubjectBalanceEntry> = serde_json::from_str(&subjects_json)
            .map_err(|e| EngineError::new("decode_failed", e.to_string()))?;
        out.push(SubjectBalance {
            class_name,
            total_score_value_added_rate: total_rate,
            subjects,
            subject_deviation: deviation,
            balance_score,
        });
    }
    Ok(out)
}

fn activity_ref(activity: &ActivityRow, exit_exam: &ExamRow) -> ActivityRef {
    ActivityRef {
        activity_id: activity.id.clone(),
        exam_id: exit_exam.id.clone(),
        exam_title: exit_exam.title.clone(),
        held_on: exit_exam.held_on.clone(),
    }
}

/// Trend samples for one class + subject: one per computed activity the
/// class has a row in, with all classes of that activity/subject as peers.
pub fn class_history_samples(
    conn: &Connection,
    class_name: &str,
    subject: &str,
) -> Result<Vec<TrendSample>, EngineError> {
    let mut samples = Vec::new();
    for (activity, exit_exam) in list_computed_activities(conn)? {
        let rows = load_class_rows(conn, &activity.id, Some(subject))?;
        let Some(own) = rows.iter().find(|r| r.class_name == class_name) else {
            continue;
        };
        samples.push(TrendSample {
            activity: activity_ref(&activity, &exit_exam),
            avg_score: own.avg_score_exit,
            z_score: own.avg_exit_z,
            value_added_rate: own.avg_score_value_added_rate,
            peer_rates: rows
                .iter()
                .map(|r| (r.class_name.clone(), r.avg_score_value_added_rate))
                .collect(),
            excellent_rate: if own.total_students == 0 {
                0.0
            } else {
                own.exit_excellent_count as f64 / own.total_students as f64
            },
            consolidation_rate: own.consolidation_rate,
            transformation_rate: own.transformation_rate,
            contribution_rate: own.contribution_rate,
        });
    }
    Ok(samples)
}

struct MergedTeacher {
    students: usize,
    exit_sum: f64,
    z_sum: f64,
    rate_sum: f64,
    consolidation_sum: f64,
    transformation_sum: f64,
    exit_excellent: i64,
    // Contribution shares are additive within one subject scope.
    contribution: f64,
}

fn merge_teacher_rows(rows: &[TeacherValueAdded]) -> BTreeMap<String, MergedTeacher> {
    let mut merged: BTreeMap<String, MergedTeacher> = BTreeMap::new();
    for row in rows {
        let w = row.total_students as f64;
        let entry = merged.entry(row.teacher_id.clone()).or_insert(MergedTeacher {
            students: 0,
            exit_sum: 0.0,
            z_sum: 0.0,
            rate_sum: 0.0,
            consolidation_sum: 0.0,
            transformation_sum: 0.0,
            exit_excellent: 0,
            contribution: 0.0,
        });
        entry.students += row.total_students;
        entry.exit_sum += row.avg_score_exit * w;
        entry.z_sum += row.avg_exit_z * w;
        entry.rate_sum += row.avg_score_value_added_rate * w;
        entry.consolidation_sum += row.consolidation_rate * w;
        entry.transformation_sum += row.transformation_rate * w;
        entry.exit_excellent += row.exit_excellent_count;
        entry.contribution += row.contribution_rate;
    }
    merged
}

/// Trend samples for one teacher + subject, their per-class rows merged
/// student-weighted per activity; peers are the other teachers of that
/// activity/subject merged the same way.
pub fn teacher_history_samples(
    conn: &Connection,
    teacher_id: &str,
    subject: &str,
) -> Result<Vec<TrendSample>, EngineError> {
    let mut samples = Vec::new();
    for (activity, exit_exam) in list_computed_activities(conn)? {
        let rows = load_teacher_rows(conn, &activity.id, Some(subject))?;
        let merged = merge_teacher_rows(&rows);
        let Some(own) = merged.get(teacher_id) else {
            continue;
        };
        let weighted = |sum: f64, students: usize| {
            if students == 0 {
                0.0
            } else {
                sum / students as f64
            }
        };
        samples.push(TrendSample {
            activity: activity_ref(&activity, &exit_exam),
            avg_score: weighted(own.exit_sum, own.students),
            z_score: weighted(own.z_sum, own.students),
            value_added_rate: weighted(own.rate_sum, own.students),
            peer_rates: merged
                .iter()
                .map(|(id, m)| (id.clone(), weighted(m.rate_sum, m.students)))
                .collect(),
            excellent_rate: if own.students == 0 {
                0.0
            } else {
                own.exit_excellent as f64 / own.students as f64
            },
            consolidation_rate: weighted(own.consolidation_sum, own.students),
            transformation_rate: weighted(own.transformation_sum, own.students),
            contribution_rate: own.contribution,
        });
    }
    Ok(samples)
}

/// Trend samples for one student + subject. The ability rates degenerate to
/// the student's own 0/1 flags; peers are their classmates in each activity.
pub fn student_history_samples(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    policy: &GradingPolicy,
) -> Result<Vec<TrendSample>, EngineError> {
    let mut samples = Vec::new();
    for (activity, exit_exam) in list_computed_activities(conn)? {
        let own: Option<StudentValueAdded> = {
            let sql = format!(
                "SELECT {} FROM student_value_added
                 WHERE activity_id = ? AND student_id = ? AND subject = ?",
                STUDENT_COLS
            );
            conn.query_row(&sql, [activity.id.as_str(), student_id, subject], student_row)
                .optional()
                .map_err(EngineError::db)?
        };
        let Some(own) = own else {
            continue;
        };
        let mut stmt = conn
            .prepare(
                "SELECT student_id, score_value_added_rate FROM student_value_added
                 WHERE activity_id = ? AND subject = ? AND class_name = ?",
            )
            .map_err(EngineError::db)?;
        let peers = stmt
            .query_map(
                [activity.id.as_str(), subject, own.class_name.as_str()],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)),
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(EngineError::db)?;

        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        samples.push(TrendSample {
            activity: activity_ref(&activity, &exit_exam),
            avg_score: own.exit_score,
            z_score: own.exit_z,
            value_added_rate: own.score_value_added_rate,
            peer_rates: peers,
            excellent_rate: flag(policy.is_excellent(own.exit_level)),
            consolidation_rate: flag(own.is_consolidated),
            transformation_rate: flag(own.is_transformed),
            contribution_rate: 0.0,
        });
    }
    Ok(samples)
}

/// Headline numbers per computed activity for the time comparison. Reads the
/// materialized student rows; no re-standardization happens here.
pub fn activity_summaries(
    conn: &Connection,
    policy: &GradingPolicy,
) -> Result<Vec<crate::compare::ActivitySummaryRow>, EngineError> {
    let mut out = Vec::new();
    for (activity, exit_exam) in list_computed_activities(conn)? {
        let students = load_student_rows(conn, &activity.id, None)?;
        let n = students.len();
        let denom = if n == 0 { 1.0 } else { n as f64 };
        let excellent = students
            .iter()
            .filter(|s| policy.is_excellent(s.exit_level))
            .count();
        let passed = students
            .iter()
            .filter(|s| s.exit_score >= policy.pass_score)
            .count();
        out.push(crate::compare::ActivitySummaryRow {
            activity_id: activity.id.clone(),
            title: activity.title.clone(),
            exam_id: exit_exam.id.clone(),
            exam_title: exit_exam.title.clone(),
            held_on: exit_exam.held_on.clone(),
            student_count: n,
            avg_exit_score: students.iter().map(|s| s.exit_score).sum::<f64>() / denom,
            avg_value_added_rate: students.iter().map(|s| s.score_value_added_rate).sum::<f64>()
                / denom,
            excellent_rate: excellent as f64 / denom,
            pass_rate: passed as f64 / denom,
        });
    }
    Ok(out)
}
