use crate::aggregate::{ClassValueAdded, TeacherValueAdded};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One computed activity's headline numbers for the time comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummaryRow {
    pub activity_id: String,
    pub title: String,
    pub exam_id: String,
    pub exam_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_on: Option<String>,
    pub student_count: usize,
    pub avg_exit_score: f64,
    pub avg_value_added_rate: f64,
    pub excellent_rate: f64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedClass {
    pub rank: i64,
    #[serde(flatten)]
    pub row: ClassValueAdded,
}

/// Class rows of one activity rolled up to a single row per subject,
/// student-count weighted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectComparisonRow {
    pub subject: String,
    pub class_count: usize,
    pub total_students: usize,
    pub avg_score_entry: f64,
    pub avg_score_exit: f64,
    pub avg_score_value_added_rate: f64,
    pub consolidation_rate: f64,
    pub transformation_rate: f64,
    pub progress_student_ratio: f64,
}

/// Teacher rows merged per (teacher, subject) across the classes they teach,
/// student-count weighted, then ranked by value-added rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTeacher {
    pub rank: i64,
    pub teacher_id: String,
    pub subject: String,
    pub class_names: Vec<String>,
    pub total_students: usize,
    pub avg_score_entry: f64,
    pub avg_score_exit: f64,
    pub avg_score_value_added_rate: f64,
    pub consolidation_rate: f64,
    pub transformation_rate: f64,
    pub progress_student_ratio: f64,
}

/// Newest-first slice of the N most recent computed activities. Rows arrive
/// already summarized; this only orders and truncates.
pub fn time_comparison(mut rows: Vec<ActivitySummaryRow>, limit: usize) -> Vec<ActivitySummaryRow> {
    rows.sort_by(|a, b| {
        // Undated exams sort oldest.
        b.held_on
            .cmp(&a.held_on)
            .then_with(|| b.exam_id.cmp(&a.exam_id))
            .then_with(|| b.activity_id.cmp(&a.activity_id))
    });
    rows.truncate(limit);
    rows
}

/// All class rows of a scope ranked descending by value-added rate, class
/// name ascending on ties. Tied rates share a rank.
pub fn rank_classes(mut rows: Vec<ClassValueAdded>) -> Vec<RankedClass> {
    rows.sort_by(|a, b| {
        b.avg_score_value_added_rate
            .partial_cmp(&a.avg_score_value_added_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.class_name.cmp(&b.class_name))
    });
    let mut out = Vec::with_capacity(rows.len());
    let mut last_rate = f64::NAN;
    let mut rank = 0_i64;
    for (pos, row) in rows.into_iter().enumerate() {
        if pos == 0 || row.avg_score_value_added_rate != last_rate {
            rank = pos as i64 + 1;
        }
        last_rate = row.avg_score_value_added_rate;
        out.push(RankedClass { rank, row });
    }
    out
}

struct WeightedTotals {
    students: usize,
    classes: usize,
    class_names: Vec<String>,
    entry_sum: f64,
    exit_sum: f64,
    rate_sum: f64,
    consolidation_sum: f64,
    transformation_sum: f64,
    progress_sum: f64,
}

impl WeightedTotals {
    fn new() -> Self {
        Self {
            students: 0,
            classes: 0,
            class_names: Vec::new(),
            entry_sum: 0.0,
            exit_sum: 0.0,
            rate_sum: 0.0,
            consolidation_sum: 0.0,
            transformation_sum: 0.0,
            progress_sum: 0.0,
        }
    }

    fn add(
        &mut self,
        class_name: &str,
        students: usize,
        entry: f64,
        exit: f64,
        rate: f64,
        consolidation: f64,
        transformation: f64,
        progress: f64,
    ) {
        let w = students as f64;
        self.students += students;
        self.classes += 1;
        self.class_names.push(class_name.to_string());
        self.entry_sum += entry * w;
        self.exit_sum += exit * w;
        self.rate_sum += rate * w;
        self.consolidation_sum += consolidation * w;
        self.transformation_sum += transformation * w;
        self.progress_sum += progress * w;
    }

    fn weighted(&self, sum: f64) -> f64 {
        if self.students == 0 {
            0.0
        } else {
            sum / self.students as f64
        }
    }
}

/// One row per subject across all classes of an activity. An empty group of
/// classes (a subject nothing reported on) simply yields no row; within a
/// row, zero-student groups read as 0 rather than NaN.
pub fn subject_rollup(rows: &[ClassValueAdded]) -> Vec<SubjectComparisonRow> {
    let mut by_subject: BTreeMap<String, WeightedTotals> = BTreeMap::new();
    for row in rows {
        by_subject
            .entry(row.subject.clone())
            .or_insert_with(WeightedTotals::new)
            .add(
                &row.class_name,
                row.total_students,
                row.avg_score_entry,
                row.avg_score_exit,
                row.avg_score_value_added_rate,
                row.consolidation_rate,
                row.transformation_rate,
                row.progress_student_ratio,
            );
    }
    by_subject
        .into_iter()
        .map(|(subject, totals)| SubjectComparisonRow {
            subject,
            class_count: totals.classes,
            total_students: totals.students,
            avg_score_entry: totals.weighted(totals.entry_sum),
            avg_score_exit: totals.weighted(totals.exit_sum),
            avg_score_value_added_rate: totals.weighted(totals.rate_sum),
            consolidation_rate: totals.weighted(totals.consolidation_sum),
            transformation_rate: totals.weighted(totals.transformation_sum),
            progress_student_ratio: totals.weighted(totals.progress_sum),
        })
        .collect()
}

/// Merge per-class teacher rows into one row per (teacher, subject) and rank
/// descending by the merged value-added rate.
pub fn rank_teachers(rows: &[TeacherValueAdded]) -> Vec<RankedTeacher> {
    let mut by_teacher: BTreeMap<(String, String), WeightedTotals> = BTreeMap::new();
    for row in rows {
        by_teacher
            .entry((row.subject.clone(), row.teacher_id.clone()))
            .or_insert_with(WeightedTotals::new)
            .add(
                &row.class_name,
                row.total_students,
                row.avg_score_entry,
                row.avg_score_exit,
                row.avg_score_value_added_rate,
                row.consolidation_rate,
                row.transformation_rate,
                row.progress_student_ratio,
            );
    }

    let mut merged: Vec<RankedTeacher> = by_teacher
        .into_iter()
        .map(|((subject, teacher_id), totals)| RankedTeacher {
            rank: 0,
            teacher_id,
            subject,
            class_names: totals.class_names.clone(),
            total_students: totals.students,
            avg_score_entry: totals.weighted(totals.entry_sum),
            avg_score_exit: totals.weighted(totals.exit_sum),
            avg_score_value_added_rate: totals.weighted(totals.rate_sum),
            consolidation_rate: totals.weighted(totals.consolidation_sum),
            transformation_rate: totals.weighted(totals.transformation_sum),
            progress_student_ratio: totals.weighted(totals.progress_sum),
        })
        .collect();

    merged.sort_by(|a, b| {
        b.avg_score_value_added_rate
            .partial_cmp(&a.avg_score_value_added_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.teacher_id.cmp(&b.teacher_id))
    });
    let mut last_rate = f64::NAN;
    let mut rank = 0_i64;
    for (pos, row) in merged.iter_mut().enumerate() {
        if pos == 0 || row.avg_score_value_added_rate != last_rate {
            rank = pos as i64 + 1;
        }
        last_rate = row.avg_score_value_added_rate;
        row.rank = rank;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_row(class: &str, subject: &str, students: usize, rate: f64) -> ClassValueAdded {
        ClassValueAdded {
            class_name: class.to_string(),
            subject: subject.to_string(),
            total_students: students,
            avg_score_entry: 70.0,
            avg_score_exit: 75.0,
            avg_exit_z: 0.0,
            avg_score_value_added_rate: rate,
            consolidation_rate: 0.1,
            transformation_rate: 0.2,
            contribution_rate: 0.0,
            progress_student_ratio: 0.5,
            entry_excellent_count: 2,
            exit_excellent_count: 3,
        }
    }

    fn teacher_row(
        teacher: &str,
        class: &str,
        subject: &str,
        students: usize,
        rate: f64,
    ) -> TeacherValueAdded {
        TeacherValueAdded {
            teacher_id: teacher.to_string(),
            class_name: class.to_string(),
            subject: subject.to_string(),
            total_students: students,
            avg_score_entry: 70.0,
            avg_score_exit: 75.0,
            avg_exit_z: 0.0,
            avg_score_value_added_rate: rate,
            consolidation_rate: 0.1,
            transformation_rate: 0.2,
            contribution_rate: 0.0,
            progress_student_ratio: 0.5,
            entry_excellent_count: 2,
            exit_excellent_count: 3,
        }
    }

    fn summary(activity: &str, exam: &str, held_on: Option<&str>) -> ActivitySummaryRow {
        ActivitySummaryRow {
            activity_id: activity.to_string(),
            title: format!("Activity {}", activity),
            exam_id: exam.to_string(),
            exam_title: format!("Exam {}", exam),
            held_on: held_on.map(|d| d.to_string()),
            student_count: 100,
            avg_exit_score: 76.0,
            avg_value_added_rate: 0.01,
            excellent_rate: 0.2,
            pass_rate: 0.9,
        }
    }

    #[test]
    fn time_comparison_orders_newest_first_and_truncates() {
        let rows = vec![
            summary("a1", "e1", Some("2025-06-20")),
            summary("a3", "e3", Some("2026-06-18")),
            summary("a2", "e2", Some("2026-01-15")),
            summary("a0", "e0", None),
        ];
        let out = time_comparison(rows, 3);
        let ids: Vec<&str> = out.iter().map(|r| r.activity_id.as_str()).collect();
        assert_eq!(ids, vec!["a3", "a2", "a1"]);
    }

    #[test]
    fn class_ranking_is_descending_with_shared_ties() {
        let rows = vec![
            class_row("7C", "math", 30, 0.01),
            class_row("7A", "math", 30, 0.05),
            class_row("7B", "math", 30, 0.05),
        ];
        let ranked = rank_classes(rows);
        assert_eq!(ranked[0].row.class_name, "7A");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].row.class_name, "7B");
        assert_eq!(ranked[1].rank, 1);
        assert_eq!(ranked[2].row.class_name, "7C");
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn subject_rollup_weights_by_student_count() {
        let rows = vec![
            class_row("7A", "math", 10, 0.10),
            class_row("7B", "math", 30, 0.02),
            class_row("7A", "chinese", 10, 0.04),
        ];
        let out = subject_rollup(&rows);
        assert_eq!(out.len(), 2);
        let math = out.iter().find(|r| r.subject == "math").expect("math");
        assert_eq!(math.class_count, 2);
        assert_eq!(math.total_students, 40);
        // (0.10*10 + 0.02*30) / 40
        assert!((math.avg_score_value_added_rate - 0.04).abs() < 1e-12);
    }

    #[test]
    fn teacher_ranking_merges_taught_classes() {
        let rows = vec![
            teacher_row("t1", "7A", "math", 10, 0.08),
            teacher_row("t1", "7B", "math", 30, 0.00),
            teacher_row("t2", "7C", "math", 20, 0.03),
        ];
        let ranked = rank_teachers(&rows);
        assert_eq!(ranked.len(), 2);
        // t1 merged rate: (0.08*10 + 0*30)/40 = 0.02 < t2's 0.03.
        assert_eq!(ranked[0].teacher_id, "t2");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].teacher_id, "t1");
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[1].class_names, vec!["7A".to_string(), "7B".to_string()]);
        assert!((ranked[1].avg_score_value_added_rate - 0.02).abs() < 1e-12);
    }
}
