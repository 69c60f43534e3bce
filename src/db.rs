use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("valuebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            held_on TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_records(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            teacher_id TEXT,
            subject TEXT NOT NULL,
            score REAL,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            UNIQUE(exam_id, student_id, subject)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_records_exam_subject
         ON assessment_records(exam_id, subject)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_records_student
         ON assessment_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            entry_exam_id TEXT NOT NULL,
            exit_exam_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            computed_at TEXT,
            FOREIGN KEY(entry_exam_id) REFERENCES exams(id),
            FOREIGN KEY(exit_exam_id) REFERENCES exams(id)
        )",
        [],
    )?;

    // Per-subject computation status for an activity. Subjects that could not
    // be standardized stay visible here instead of silently vanishing.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_subjects(
            activity_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            status TEXT NOT NULL,
            unpaired_entry INTEGER NOT NULL DEFAULT 0,
            unpaired_exit INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(activity_id, subject),
            FOREIGN KEY(activity_id) REFERENCES activities(id)
        )",
        [],
    )?;

    // Materialized results. Rows are replaced wholesale when an activity is
    // recomputed, never updated in place.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_value_added(
            activity_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            student_name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            teacher_id TEXT,
            entry_score REAL NOT NULL,
            exit_score REAL NOT NULL,
            entry_rank_in_class INTEGER NOT NULL,
            exit_rank_in_class INTEGER NOT NULL,
            entry_z REAL NOT NULL,
            exit_z REAL NOT NULL,
            entry_standard_score REAL NOT NULL,
            exit_standard_score REAL NOT NULL,
            entry_level TEXT NOT NULL,
            exit_level TEXT NOT NULL,
            level_change INTEGER NOT NULL,
            score_value_added REAL NOT NULL,
            score_value_added_rate REAL NOT NULL,
            is_consolidated INTEGER NOT NULL,
            is_transformed INTEGER NOT NULL,
            PRIMARY KEY(activity_id, student_id, subject),
            FOREIGN KEY(activity_id) REFERENCES activities(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sva_activity_subject
         ON student_value_added(activity_id, subject)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sva_student ON student_value_added(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sva_class ON student_value_added(class_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_value_added(
            activity_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            subject TEXT NOT NULL,
            total_students INTEGER NOT NULL,
            avg_score_entry REAL NOT NULL,
            avg_score_exit REAL NOT NULL,
            avg_exit_z REAL NOT NULL,
            avg_score_value_added_rate REAL NOT NULL,
            consolidation_rate REAL NOT NULL,
            transformation_rate REAL NOT NULL,
            contribution_rate REAL NOT NULL,
            progress_student_ratio REAL NOT NULL,
            entry_excellent_count INTEGER NOT NULL,
            exit_excellent_count INTEGER NOT NULL,
            PRIMARY KEY(activity_id, class_name, subject),
            FOREIGN KEY(activity_id) REFERENCES activities(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cva_class ON class_value_added(class_name, subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_value_added(
            activity_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            subject TEXT NOT NULL,
            total_students INTEGER NOT NULL,
            avg_score_entry REAL NOT NULL,
            avg_score_exit REAL NOT NULL,
            avg_exit_z REAL NOT NULL,
            avg_score_value_added_rate REAL NOT NULL,
            consolidation_rate REAL NOT NULL,
            transformation_rate REAL NOT NULL,
            contribution_rate REAL NOT NULL,
            progress_student_ratio REAL NOT NULL,
            entry_excellent_count INTEGER NOT NULL,
            exit_excellent_count INTEGER NOT NULL,
            PRIMARY KEY(activity_id, teacher_id, class_name, subject),
            FOREIGN KEY(activity_id) REFERENCES activities(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tva_teacher ON teacher_value_added(teacher_id, subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_balance(
            activity_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            total_score_value_added_rate REAL NOT NULL,
            subject_deviation REAL NOT NULL,
            balance_score REAL NOT NULL,
            subjects_json TEXT NOT NULL,
            PRIMARY KEY(activity_id, class_name),
            FOREIGN KEY(activity_id) REFERENCES activities(id)
        )",
        [],
    )?;

    Ok(conn)
}
