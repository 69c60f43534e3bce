use serde::Serialize;
use std::collections::BTreeMap;

/// Identity of one computed activity for trend purposes: the exit exam is the
/// point the activity lands on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRef {
    pub activity_id: String,
    pub exam_id: String,
    pub exam_title: String,
    /// ISO date; missing dates sort before dated exams.
    pub held_on: Option<String>,
}

impl ActivityRef {
    /// Chronology key: exam date, then exam id, then activity id. Alignment
    /// itself is always by exam id — the ordering only decides emission order.
    fn chrono_key(&self) -> (Option<String>, String, String) {
        (
            self.held_on.clone(),
            self.exam_id.clone(),
            self.activity_id.clone(),
        )
    }
}

/// One entity's metrics for one computed activity, plus the peer rates that
/// decide its standing in that activity.
#[derive(Debug, Clone)]
pub struct TrendSample {
    pub activity: ActivityRef,
    pub avg_score: f64,
    pub z_score: f64,
    pub value_added_rate: f64,
    /// (entity id, rate) for every peer in the same activity + subject,
    /// including this entity.
    pub peer_rates: Vec<(String, f64)>,
    pub excellent_rate: f64,
    pub consolidation_rate: f64,
    pub transformation_rate: f64,
    pub contribution_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTrendPoint {
    pub exam_id: String,
    pub exam_title: String,
    pub avg_score: f64,
    pub z_score: f64,
    pub value_added_rate: f64,
    pub rank: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityTrendPoint {
    pub exam_id: String,
    pub exam_title: String,
    pub excellent_rate: f64,
    pub consolidation_rate: f64,
    pub transformation_rate: f64,
    pub contribution_rate: f64,
}

/// Longitudinal series for one entity (student / class / teacher) + subject.
/// Activities the entity did not participate in are simply absent — trend
/// gaps are never zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalTracking {
    pub entity_id: String,
    pub subject: String,
    pub score_trend: Vec<ScoreTrendPoint>,
    pub ability_trend: Vec<AbilityTrendPoint>,
}

// Total order on (rate desc, id asc) keeps equal-rate peers deterministic.
fn rank_among_peers(entity_id: &str, own_rate: f64, peers: &[(String, f64)]) -> i64 {
    let better = peers
        .iter()
        .filter(|(id, rate)| {
            *rate > own_rate || (*rate == own_rate && id.as_str() < entity_id)
        })
        .count();
    better as i64 + 1
}

/// Assemble trend series from whatever activities the entity has computed
/// rows for. Samples are keyed by exit exam id — never by position — so two
/// entities with different participation histories can never have points
/// cross-assigned. When two activities share an exit exam, the later one in
/// chronology wins the key.
pub fn build_tracking(
    entity_id: &str,
    subject: &str,
    samples: Vec<TrendSample>,
) -> HistoricalTracking {
    let mut ordered = samples;
    ordered.sort_by_key(|s| s.activity.chrono_key());

    let mut by_exam: BTreeMap<String, TrendSample> = BTreeMap::new();
    let mut exam_order: Vec<String> = Vec::new();
    for sample in ordered {
        let exam_id = sample.activity.exam_id.clone();
        if !by_exam.contains_key(&exam_id) {
            exam_order.push(exam_id.clone());
        }
        by_exam.insert(exam_id, sample);
    }

    let mut score_trend = Vec::with_capacity(exam_order.len());
    let mut ability_trend = Vec::with_capacity(exam_order.len());
    for exam_id in exam_order {
        let sample = &by_exam[&exam_id];
        let rank = rank_among_peers(entity_id, sample.value_added_rate, &sample.peer_rates);
        score_trend.push(ScoreTrendPoint {
            exam_id: sample.activity.exam_id.clone(),
            exam_title: sample.activity.exam_title.clone(),
            avg_score: sample.avg_score,
            z_score: sample.z_score,
            value_added_rate: sample.value_added_rate,
            rank,
        });
        ability_trend.push(AbilityTrendPoint {
            exam_id: sample.activity.exam_id.clone(),
            exam_title: sample.activity.exam_title.clone(),
            excellent_rate: sample.excellent_rate,
            consolidation_rate: sample.consolidation_rate,
            transformation_rate: sample.transformation_rate,
            contribution_rate: sample.contribution_rate,
        });
    }

    HistoricalTracking {
        entity_id: entity_id.to_string(),
        subject: subject.to_string(),
        score_trend,
        ability_trend,
    }
}
