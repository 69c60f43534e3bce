use crate::error::EngineError;
use crate::level::{self, AbilityLevel};
use crate::policy::GradingPolicy;
use crate::stats::{class_ranks, cohort_statistics, percentile_ranks, CohortStatistics};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

/// One raw score row from the record store. `score` stays optional on input;
/// unscored rows never enter a cohort.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    pub subject: String,
    pub exam_id: String,
    #[serde(default)]
    pub score: Option<f64>,
}

/// The fully-populated per-student result of one value-added activity.
/// A student is either entirely present or entirely absent; no partial rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentValueAdded {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    pub subject: String,
    pub entry_score: f64,
    pub exit_score: f64,
    pub entry_rank_in_class: i64,
    pub exit_rank_in_class: i64,
    pub entry_z: f64,
    pub exit_z: f64,
    pub entry_standard_score: f64,
    pub exit_standard_score: f64,
    pub entry_level: AbilityLevel,
    pub exit_level: AbilityLevel,
    pub level_change: i64,
    pub score_value_added: f64,
    pub score_value_added_rate: f64,
    pub is_consolidated: bool,
    pub is_transformed: bool,
}

/// Everything computed for one subject of one activity.
#[derive(Debug, Clone)]
pub struct SubjectComputation {
    pub subject: String,
    pub entry_stats: CohortStatistics,
    pub exit_stats: CohortStatistics,
    pub students: Vec<StudentValueAdded>,
    /// Scored on entry only; excluded from the output.
    pub unpaired_entry: usize,
    /// Scored on exit only; excluded from the output.
    pub unpaired_exit: usize,
}

fn scored<'a>(records: &'a [AssessmentRecord]) -> Vec<&'a AssessmentRecord> {
    records
        .iter()
        .filter(|r| r.score.map(f64::is_finite).unwrap_or(false))
        .collect()
}

/// Compute one subject's `StudentValueAdded` set from the entry and exit
/// cohorts. Standardization and level percentiles use the full scored cohort
/// on each side; only students scored on both sides produce output rows.
///
/// Output order is (class, student id), so recomputing from the same records
/// yields an identical sequence.
pub fn compute_subject(
    subject: &str,
    entry_exam_id: &str,
    exit_exam_id: &str,
    entry_records: &[AssessmentRecord],
    exit_records: &[AssessmentRecord],
    policy: &GradingPolicy,
) -> Result<SubjectComputation, EngineError> {
    let entry_scored = scored(entry_records);
    let exit_scored = scored(exit_records);
    if entry_scored.is_empty() || exit_scored.is_empty() {
        return Err(EngineError::with_details(
            "insufficient_data",
            format!("no scored records for subject {}", subject),
            json!({
                "subject": subject,
                "entryCount": entry_scored.len(),
                "exitCount": exit_scored.len(),
            }),
        ));
    }

    let entry_scores: Vec<f64> = entry_scored.iter().map(|r| r.score.unwrap_or(0.0)).collect();
    let exit_scores: Vec<f64> = exit_scored.iter().map(|r| r.score.unwrap_or(0.0)).collect();
    let entry_stats = cohort_statistics(entry_exam_id, subject, &entry_scores);
    let exit_stats = cohort_statistics(exit_exam_id, subject, &exit_scores);

    let entry_members: Vec<(String, f64)> = entry_scored
        .iter()
        .map(|r| (r.student_id.clone(), r.score.unwrap_or(0.0)))
        .collect();
    let exit_members: Vec<(String, f64)> = exit_scored
        .iter()
        .map(|r| (r.student_id.clone(), r.score.unwrap_or(0.0)))
        .collect();
    let entry_pct = percentile_ranks(&entry_members);
    let exit_pct = percentile_ranks(&exit_members);

    let entry_by_student: HashMap<&str, &AssessmentRecord> = entry_scored
        .iter()
        .map(|r| (r.student_id.as_str(), *r))
        .collect();
    let exit_by_student: HashMap<&str, &AssessmentRecord> = exit_scored
        .iter()
        .map(|r| (r.student_id.as_str(), *r))
        .collect();

    // Pair by student id; one-sided students are counted and dropped.
    let mut paired: Vec<(&AssessmentRecord, &AssessmentRecord)> = entry_by_student
        .iter()
        .filter_map(|(id, entry)| exit_by_student.get(id).map(|exit| (*entry, *exit)))
        .collect();
    paired.sort_by(|a, b| {
        (a.1.class_name.as_str(), a.1.student_id.as_str())
            .cmp(&(b.1.class_name.as_str(), b.1.student_id.as_str()))
    });
    let unpaired_entry = entry_by_student.len() - paired.len();
    let unpaired_exit = exit_by_student.len() - paired.len();

    // Class ranks are taken within the paired population of each class, so
    // every rank shares the denominator the aggregates report.
    let mut entry_class_members: HashMap<&str, Vec<(String, f64)>> = HashMap::new();
    let mut exit_class_members: HashMap<&str, Vec<(String, f64)>> = HashMap::new();
    for (entry, exit) in &paired {
        entry_class_members
            .entry(exit.class_name.as_str())
            .or_default()
            .push((entry.student_id.clone(), entry.score.unwrap_or(0.0)));
        exit_class_members
            .entry(exit.class_name.as_str())
            .or_default()
            .push((exit.student_id.clone(), exit.score.unwrap_or(0.0)));
    }
    let entry_ranks: HashMap<&str, HashMap<String, i64>> = entry_class_members
        .iter()
        .map(|(class, members)| (*class, class_ranks(members)))
        .collect();
    let exit_ranks: HashMap<&str, HashMap<String, i64>> = exit_class_members
        .iter()
        .map(|(class, members)| (*class, class_ranks(members)))
        .collect();

    let mut students = Vec::with_capacity(paired.len());
    for (entry, exit) in paired {
        let entry_score = entry.score.unwrap_or(0.0);
        let exit_score = exit.score.unwrap_or(0.0);
        let entry_z = entry_stats.z_score(entry_score);
        let exit_z = exit_stats.z_score(exit_score);
        let entry_standard = policy.standard_score(entry_z);
        let exit_standard = policy.standard_score(exit_z);

        let entry_level = level::classify_percentile(
            entry_pct.get(&entry.student_id).copied().unwrap_or(1.0),
            &policy.level_shares,
        );
        let exit_level = level::classify_percentile(
            exit_pct.get(&exit.student_id).copied().unwrap_or(1.0),
            &policy.level_shares,
        );

        let rate = if entry_standard == 0.0 {
            0.0
        } else {
            (exit_standard - entry_standard) / entry_standard
        };

        let class = exit.class_name.as_str();
        students.push(StudentValueAdded {
            student_id: exit.student_id.clone(),
            student_name: exit.student_name.clone(),
            class_name: exit.class_name.clone(),
            teacher_id: exit.teacher_id.clone().or_else(|| entry.teacher_id.clone()),
            subject: subject.to_string(),
            entry_score,
            exit_score,
            entry_rank_in_class: entry_ranks
                .get(class)
                .and_then(|m| m.get(&entry.student_id))
                .copied()
                .unwrap_or(0),
            exit_rank_in_class: exit_ranks
                .get(class)
                .and_then(|m| m.get(&exit.student_id))
                .copied()
                .unwrap_or(0),
            entry_z,
            exit_z,
            entry_standard_score: entry_standard,
            exit_standard_score: exit_standard,
            entry_level,
            exit_level,
            level_change: exit_level.rank() - entry_level.rank(),
            score_value_added: exit_score - entry_score,
            score_value_added_rate: rate,
            is_consolidated: entry_level == AbilityLevel::APlus
                && exit_level == AbilityLevel::APlus,
            is_transformed: policy.is_transformed(entry_level, exit_level),
        });
    }

    Ok(SubjectComputation {
        subject: subject.to_string(),
        entry_stats,
        exit_stats,
        students,
        unpaired_entry,
        unpaired_exit,
    })
}
