use crate::policy::GradingPolicy;
use crate::valueadd::StudentValueAdded;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Roll-up of one (class, subject) group within an activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassValueAdded {
    pub class_name: String,
    pub subject: String,
    pub total_students: usize,
    pub avg_score_entry: f64,
    pub avg_score_exit: f64,
    pub avg_exit_z: f64,
    pub avg_score_value_added_rate: f64,
    pub consolidation_rate: f64,
    pub transformation_rate: f64,
    pub contribution_rate: f64,
    pub progress_student_ratio: f64,
    pub entry_excellent_count: i64,
    pub exit_excellent_count: i64,
}

/// Roll-up of one (teacher, class, subject) group. A teacher owns one row per
/// taught class; cross-class merging happens only in the comparison views.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherValueAdded {
    pub teacher_id: String,
    pub class_name: String,
    pub subject: String,
    pub total_students: usize,
    pub avg_score_entry: f64,
    pub avg_score_exit: f64,
    pub avg_exit_z: f64,
    pub avg_score_value_added_rate: f64,
    pub consolidation_rate: f64,
    pub transformation_rate: f64,
    pub contribution_rate: f64,
    pub progress_student_ratio: f64,
    pub entry_excellent_count: i64,
    pub exit_excellent_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectBalanceEntry {
    pub subject: String,
    pub value_added_rate: f64,
    pub deviation_from_avg: f64,
}

/// How evenly one class's subjects progress relative to the class's own
/// across-subject average.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectBalance {
    pub class_name: String,
    pub total_score_value_added_rate: f64,
    pub subjects: Vec<SubjectBalanceEntry>,
    pub subject_deviation: f64,
    pub balance_score: f64,
}

struct GroupTotals {
    students: usize,
    entry_score_sum: f64,
    exit_score_sum: f64,
    exit_z_sum: f64,
    rate_sum: f64,
    consolidated: usize,
    transformed: usize,
    progressed: usize,
    entry_excellent: i64,
    exit_excellent: i64,
}

impl GroupTotals {
    fn new() -> Self {
        Self {
            students: 0,
            entry_score_sum: 0.0,
            exit_score_sum: 0.0,
            exit_z_sum: 0.0,
            rate_sum: 0.0,
            consolidated: 0,
            transformed: 0,
            progressed: 0,
            entry_excellent: 0,
            exit_excellent: 0,
        }
    }

    fn add(&mut self, s: &StudentValueAdded, policy: &GradingPolicy) {
        self.students += 1;
        self.entry_score_sum += s.entry_score;
        self.exit_score_sum += s.exit_score;
        self.exit_z_sum += s.exit_z;
        self.rate_sum += s.score_value_added_rate;
        if s.is_consolidated {
            self.consolidated += 1;
        }
        if s.is_transformed {
            self.transformed += 1;
        }
        if s.score_value_added > 0.0 {
            self.progressed += 1;
        }
        if policy.is_excellent(s.entry_level) {
            self.entry_excellent += 1;
        }
        if policy.is_excellent(s.exit_level) {
            self.exit_excellent += 1;
        }
    }

    fn excellent_delta(&self) -> i64 {
        self.exit_excellent - self.entry_excellent
    }
}

fn mean(sum: f64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Group share of the scope-wide excellent-count gain. When nothing in the
/// scope gained (denominator <= 0), every group's share is defined as 0.
fn contribution_rates(deltas: &[i64]) -> Vec<f64> {
    let scope_delta: i64 = deltas.iter().sum();
    if scope_delta <= 0 {
        return vec![0.0; deltas.len()];
    }
    deltas
        .iter()
        .map(|d| *d as f64 / scope_delta as f64)
        .collect()
}

/// One `ClassValueAdded` per (class, subject). The contribution scope for a
/// class is all classes computed for the same subject of the activity.
pub fn aggregate_classes(
    students: &[StudentValueAdded],
    policy: &GradingPolicy,
) -> Vec<ClassValueAdded> {
    // BTreeMap keys give the deterministic (subject, class) output order.
    let mut groups: BTreeMap<(String, String), GroupTotals> = BTreeMap::new();
    for s in students {
        groups
            .entry((s.subject.clone(), s.class_name.clone()))
            .or_insert_with(GroupTotals::new)
            .add(s, policy);
    }

    let keys: Vec<(String, String)> = groups.keys().cloned().collect();
    let mut rows: Vec<ClassValueAdded> = keys
        .iter()
        .map(|(subject, class_name)| {
            let g = &groups[&(subject.clone(), class_name.clone())];
            ClassValueAdded {
                class_name: class_name.clone(),
                subject: subject.clone(),
                total_students: g.students,
                avg_score_entry: mean(g.entry_score_sum, g.students),
                avg_score_exit: mean(g.exit_score_sum, g.students),
                avg_exit_z: mean(g.exit_z_sum, g.students),
                avg_score_value_added_rate: mean(g.rate_sum, g.students),
                consolidation_rate: ratio(g.consolidated, g.students),
                transformation_rate: ratio(g.transformed, g.students),
                contribution_rate: 0.0,
                progress_student_ratio: ratio(g.progressed, g.students),
                entry_excellent_count: g.entry_excellent,
                exit_excellent_count: g.exit_excellent,
            }
        })
        .collect();

    // Contribution denominators per subject scope.
    let subjects: Vec<String> = {
        let mut s: Vec<String> = rows.iter().map(|r| r.subject.clone()).collect();
        s.dedup();
        s
    };
    for subject in subjects {
        let deltas: Vec<i64> = rows
            .iter()
            .filter(|r| r.subject == subject)
            .map(|r| r.exit_excellent_count - r.entry_excellent_count)
            .collect();
        let shares = contribution_rates(&deltas);
        let mut i = 0;
        for row in rows.iter_mut().filter(|r| r.subject == subject) {
            row.contribution_rate = shares[i];
            i += 1;
        }
    }
    rows
}

/// One `TeacherValueAdded` per (teacher, class, subject). Students with no
/// teacher on record contribute to no teacher row. The contribution scope is
/// all teacher rows of the same subject.
pub fn aggregate_teachers(
    students: &[StudentValueAdded],
    policy: &GradingPolicy,
) -> Vec<TeacherValueAdded> {
    let mut groups: BTreeMap<(String, String, String), GroupTotals> = BTreeMap::new();
    for s in students {
        let Some(teacher_id) = s.teacher_id.as_ref() else {
            continue;
        };
        groups
            .entry((s.subject.clone(), teacher_id.clone(), s.class_name.clone()))
            .or_insert_with(GroupTotals::new)
            .add(s, policy);
    }

    let keys: Vec<(String, String, String)> = groups.keys().cloned().collect();
    let mut rows: Vec<TeacherValueAdded> = keys
        .iter()
        .map(|key| {
            let (subject, teacher_id, class_name) = key;
            let g = &groups[key];
            TeacherValueAdded {
                teacher_id: teacher_id.clone(),
                class_name: class_name.clone(),
                subject: subject.clone(),
                total_students: g.students,
                avg_score_entry: mean(g.entry_score_sum, g.students),
                avg_score_exit: mean(g.exit_score_sum, g.students),
                avg_exit_z: mean(g.exit_z_sum, g.students),
                avg_score_value_added_rate: mean(g.rate_sum, g.students),
                consolidation_rate: ratio(g.consolidated, g.students),
                transformation_rate: ratio(g.transformed, g.students),
                contribution_rate: 0.0,
                progress_student_ratio: ratio(g.progressed, g.students),
                entry_excellent_count: g.entry_excellent,
                exit_excellent_count: g.exit_excellent,
            }
        })
        .collect();

    let subjects: Vec<String> = {
        let mut s: Vec<String> = rows.iter().map(|r| r.subject.clone()).collect();
        s.dedup();
        s
    };
    for subject in subjects {
        let deltas: Vec<i64> = rows
            .iter()
            .filter(|r| r.subject == subject)
            .map(|r| r.exit_excellent_count - r.entry_excellent_count)
            .collect();
        let shares = contribution_rates(&deltas);
        let mut i = 0;
        for row in rows.iter_mut().filter(|r| r.subject == subject) {
            row.contribution_rate = shares[i];
            i += 1;
        }
    }
    rows
}

/// One `SubjectBalance` per class, across every subject the class has a
/// computed row for. Deviation is each subject's rate minus the class's
/// across-subject mean rate; the balance score maps the mean absolute
/// deviation through the policy's bounded inverse curve.
pub fn subject_balance(classes: &[ClassValueAdded], policy: &GradingPolicy) -> Vec<SubjectBalance> {
    let mut by_class: BTreeMap<String, Vec<&ClassValueAdded>> = BTreeMap::new();
    for row in classes {
        by_class.entry(row.class_name.clone()).or_default().push(row);
    }

    by_class
        .into_iter()
        .map(|(class_name, mut rows)| {
            rows.sort_by(|a, b| a.subject.cmp(&b.subject));
            let total_rate = mean(
                rows.iter().map(|r| r.avg_score_value_added_rate).sum(),
                rows.len(),
            );
            let subjects: Vec<SubjectBalanceEntry> = rows
                .iter()
                .map(|r| SubjectBalanceEntry {
                    subject: r.subject.clone(),
                    value_added_rate: r.avg_score_value_added_rate,
                    deviation_from_avg: r.avg_score_value_added_rate - total_rate,
                })
                .collect();
            let subject_deviation = mean(
                subjects.iter().map(|s| s.deviation_from_avg.abs()).sum(),
                subjects.len(),
            );
            SubjectBalance {
                class_name,
                total_score_value_added_rate: total_rate,
                subject_deviation,
                balance_score: policy.balance_score(subject_deviation),
                subjects,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::AbilityLevel;

    fn student(
        id: &str,
        class: &str,
        teacher: Option<&str>,
        subject: &str,
        entry_level: AbilityLevel,
        exit_level: AbilityLevel,
        value_added: f64,
        rate: f64,
    ) -> StudentValueAdded {
        StudentValueAdded {
            student_id: id.to_string(),
            student_name: format!("Student {}", id),
            class_name: class.to_string(),
            teacher_id: teacher.map(|t| t.to_string()),
            subject: subject.to_string(),
            entry_score: 70.0,
            exit_score: 70.0 + value_added,
            entry_rank_in_class: 1,
            exit_rank_in_class: 1,
            entry_z: 0.0,
            exit_z: 0.0,
            entry_standard_score: 50.0,
            exit_standard_score: 50.0 * (1.0 + rate),
            entry_level,
            exit_level,
            level_change: exit_level.rank() - entry_level.rank(),
            score_value_added: value_added,
            score_value_added_rate: rate,
            is_consolidated: entry_level == AbilityLevel::APlus
                && exit_level == AbilityLevel::APlus,
            is_transformed: exit_level.rank() > entry_level.rank(),
        }
    }

    #[test]
    fn class_rates_stay_in_unit_interval() {
        let students = vec![
            student("s1", "7A", None, "math", AbilityLevel::APlus, AbilityLevel::APlus, 5.0, 0.02),
            student("s2", "7A", None, "math", AbilityLevel::B, AbilityLevel::BPlus, -2.0, -0.01),
            student("s3", "7A", None, "math", AbilityLevel::C, AbilityLevel::C, 1.0, 0.005),
        ];
        let rows = aggregate_classes(&students, &GradingPolicy::default());
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.total_students, 3);
        for rate in [r.consolidation_rate, r.transformation_rate, r.progress_student_ratio] {
            assert!((0.0..=1.0).contains(&rate), "rate out of range: {}", rate);
        }
        assert!((r.consolidation_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((r.transformation_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((r.progress_student_ratio - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn contribution_rates_sum_to_one_when_scope_gained() {
        let students = vec![
            // 7A gains two excellent students.
            student("a1", "7A", None, "math", AbilityLevel::B, AbilityLevel::A, 8.0, 0.04),
            student("a2", "7A", None, "math", AbilityLevel::BPlus, AbilityLevel::APlus, 9.0, 0.05),
            // 7B gains one.
            student("b1", "7B", None, "math", AbilityLevel::B, AbilityLevel::A, 6.0, 0.03),
            student("b2", "7B", None, "math", AbilityLevel::C, AbilityLevel::C, 0.0, 0.0),
            // 7C gains none.
            student("c1", "7C", None, "math", AbilityLevel::B, AbilityLevel::B, 1.0, 0.001),
        ];
        let rows = aggregate_classes(&students, &GradingPolicy::default());
        let total: f64 = rows.iter().map(|r| r.contribution_rate).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let a = rows.iter().find(|r| r.class_name == "7A").expect("7A");
        let b = rows.iter().find(|r| r.class_name == "7B").expect("7B");
        let c = rows.iter().find(|r| r.class_name == "7C").expect("7C");
        assert!((a.contribution_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((b.contribution_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(c.contribution_rate, 0.0);
    }

    #[test]
    fn non_positive_scope_delta_zeroes_every_contribution() {
        let students = vec![
            student("a1", "7A", None, "math", AbilityLevel::A, AbilityLevel::B, -5.0, -0.03),
            student("b1", "7B", None, "math", AbilityLevel::B, AbilityLevel::B, 0.0, 0.0),
        ];
        let rows = aggregate_classes(&students, &GradingPolicy::default());
        for r in rows {
            assert_eq!(r.contribution_rate, 0.0);
            assert!(r.contribution_rate.is_finite());
        }
    }

    #[test]
    fn contribution_scope_is_per_subject() {
        let students = vec![
            student("a1", "7A", None, "math", AbilityLevel::B, AbilityLevel::A, 5.0, 0.02),
            student("a2", "7A", None, "chinese", AbilityLevel::B, AbilityLevel::A, 5.0, 0.02),
            student("b1", "7B", None, "chinese", AbilityLevel::B, AbilityLevel::B, 0.0, 0.0),
        ];
        let rows = aggregate_classes(&students, &GradingPolicy::default());
        let math: f64 = rows
            .iter()
            .filter(|r| r.subject == "math")
            .map(|r| r.contribution_rate)
            .sum();
        let chinese: f64 = rows
            .iter()
            .filter(|r| r.subject == "chinese")
            .map(|r| r.contribution_rate)
            .sum();
        assert!((math - 1.0).abs() < 1e-9);
        assert!((chinese - 1.0).abs() < 1e-9);
    }

    #[test]
    fn teacher_rows_are_per_taught_class() {
        let students = vec![
            student("a1", "7A", Some("t1"), "math", AbilityLevel::B, AbilityLevel::B, 1.0, 0.01),
            student("b1", "7B", Some("t1"), "math", AbilityLevel::B, AbilityLevel::B, 1.0, 0.03),
            student("c1", "7C", Some("t2"), "math", AbilityLevel::B, AbilityLevel::B, 1.0, 0.02),
            student("d1", "7D", None, "math", AbilityLevel::B, AbilityLevel::B, 1.0, 0.02),
        ];
        let rows = aggregate_teachers(&students, &GradingPolicy::default());
        assert_eq!(rows.len(), 3);
        let t1_rows: Vec<_> = rows.iter().filter(|r| r.teacher_id == "t1").collect();
        assert_eq!(t1_rows.len(), 2);
        assert!(rows.iter().all(|r| !r.teacher_id.is_empty()));
    }

    #[test]
    fn balance_measures_spread_around_class_total() {
        let students = vec![
            student("a1", "7A", None, "math", AbilityLevel::B, AbilityLevel::B, 1.0, 0.10),
            student("a2", "7A", None, "chinese", AbilityLevel::B, AbilityLevel::B, 1.0, -0.10),
            student("b1", "7B", None, "math", AbilityLevel::B, AbilityLevel::B, 1.0, 0.05),
            student("b2", "7B", None, "chinese", AbilityLevel::B, AbilityLevel::B, 1.0, 0.05),
        ];
        let policy = GradingPolicy::default();
        let classes = aggregate_classes(&students, &policy);
        let balance = subject_balance(&classes, &policy);
        assert_eq!(balance.len(), 2);

        let uneven = balance.iter().find(|b| b.class_name == "7A").expect("7A");
        let even = balance.iter().find(|b| b.class_name == "7B").expect("7B");
        assert!((uneven.total_score_value_added_rate - 0.0).abs() < 1e-12);
        assert!((uneven.subject_deviation - 0.10).abs() < 1e-12);
        assert_eq!(even.subject_deviation, 0.0);
        assert_eq!(even.balance_score, 100.0);
        assert!(uneven.balance_score < even.balance_score);
        assert!(uneven.balance_score > 0.0);
        for entry in &uneven.subjects {
            assert!(
                (entry.deviation_from_avg.abs() - 0.10).abs() < 1e-12,
                "deviation should be vs the class total"
            );
        }
    }
}
