use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Reference-population statistics for one (exam, subject) cohort.
///
/// `count == 0` is the "no basis for comparison" sentinel: callers must skip
/// classification instead of standardizing against it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortStatistics {
    pub exam_id: String,
    pub subject: String,
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

impl CohortStatistics {
    /// z for a member score. Degenerate variance (single member or all-equal
    /// scores) defines z = 0 for everyone rather than dividing by zero.
    pub fn z_score(&self, score: f64) -> f64 {
        if self.stddev == 0.0 {
            0.0
        } else {
            (score - self.mean) / self.stddev
        }
    }
}

/// Population mean and stddev (the cohort is the full population of interest,
/// so no sample correction).
pub fn cohort_statistics(exam_id: &str, subject: &str, scores: &[f64]) -> CohortStatistics {
    let count = scores.len();
    if count == 0 {
        return CohortStatistics {
            exam_id: exam_id.to_string(),
            subject: subject.to_string(),
            mean: 0.0,
            stddev: 0.0,
            count: 0,
        };
    }
    let n = count as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
    CohortStatistics {
        exam_id: exam_id.to_string(),
        subject: subject.to_string(),
        mean,
        stddev: variance.sqrt(),
        count,
    }
}

fn total_order(a: &(String, f64), b: &(String, f64)) -> Ordering {
    a.1.partial_cmp(&b.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

/// Percentile rank per member: (members with score <= mine) / cohort size,
/// in (0, 1]. z is monotone in score, so this equals the z-percentile the
/// classifier wants. Ties share one percentile, and the result only depends
/// on the multiset of scores, never on input order.
pub fn percentile_ranks(members: &[(String, f64)]) -> HashMap<String, f64> {
    let mut out = HashMap::with_capacity(members.len());
    if members.is_empty() {
        return out;
    }
    let mut sorted: Vec<(String, f64)> = members.to_vec();
    sorted.sort_by(total_order);

    let n = sorted.len() as f64;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].1 == sorted[i].1 {
            j += 1;
        }
        // Everyone tied at this score counts every member at or below it.
        let percentile = (j + 1) as f64 / n;
        for member in &sorted[i..=j] {
            out.insert(member.0.clone(), percentile);
        }
        i = j + 1;
    }
    out
}

/// Competition-style ranks (1 = best, ties share the rank of their first
/// position). The secondary student-id key only stabilizes the sort; tied
/// scores still receive the same rank.
pub fn class_ranks(members: &[(String, f64)]) -> HashMap<String, i64> {
    let mut sorted: Vec<(String, f64)> = members.to_vec();
    sorted.sort_by(|a, b| total_order(a, b).reverse());

    let mut out = HashMap::with_capacity(sorted.len());
    let mut rank = 0_i64;
    for (pos, member) in sorted.iter().enumerate() {
        if pos == 0 || member.1 != sorted[pos - 1].1 {
            rank = pos as i64 + 1;
        }
        out.insert(member.0.clone(), rank);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    #[test]
    fn population_stats_match_hand_calc() {
        let stats = cohort_statistics("e1", "math", &[60.0, 70.0, 80.0, 90.0]);
        assert_eq!(stats.count, 4);
        assert!((stats.mean - 75.0).abs() < 1e-12);
        assert!((stats.stddev - 125.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn z_scores_center_at_zero() {
        let scores = [55.0, 61.5, 72.0, 84.0, 90.0, 66.0, 73.5];
        let stats = cohort_statistics("e1", "math", &scores);
        let sum: f64 = scores.iter().map(|s| stats.z_score(*s)).sum();
        assert!(sum.abs() < 1e-9, "z sum was {}", sum);
    }

    #[test]
    fn empty_cohort_is_sentinel() {
        let stats = cohort_statistics("e1", "math", &[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.stddev, 0.0);
    }

    #[test]
    fn degenerate_variance_zeroes_z() {
        let stats = cohort_statistics("e1", "math", &[70.0, 70.0, 70.0]);
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.z_score(70.0), 0.0);

        let single = cohort_statistics("e1", "math", &[88.0]);
        assert_eq!(single.z_score(88.0), 0.0);
    }

    #[test]
    fn percentiles_are_order_independent_and_tie_stable() {
        let a = percentile_ranks(&members(&[("s1", 60.0), ("s2", 70.0), ("s3", 70.0), ("s4", 90.0)]));
        let b = percentile_ranks(&members(&[("s4", 90.0), ("s3", 70.0), ("s1", 60.0), ("s2", 70.0)]));
        assert_eq!(a, b);
        assert_eq!(a["s1"], 0.25);
        // Both tied members count everyone at or below 70.
        assert_eq!(a["s2"], 0.75);
        assert_eq!(a["s3"], 0.75);
        assert_eq!(a["s4"], 1.0);
    }

    #[test]
    fn single_member_percentile_is_one() {
        let p = percentile_ranks(&members(&[("only", 42.0)]));
        assert_eq!(p["only"], 1.0);
    }

    #[test]
    fn class_ranks_share_on_ties() {
        let r = class_ranks(&members(&[
            ("s1", 90.0),
            ("s2", 80.0),
            ("s3", 80.0),
            ("s4", 60.0),
        ]));
        assert_eq!(r["s1"], 1);
        assert_eq!(r["s2"], 2);
        assert_eq!(r["s3"], 2);
        assert_eq!(r["s4"], 4);
    }
}
