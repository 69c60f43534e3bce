use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Six ordinal ability bands. Variants are declared low-to-high so the
/// derived `Ord` matches band quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AbilityLevel {
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

/// Bands walked highest-first when assigning by cumulative percentile share.
pub const LEVELS_TOP_DOWN: [AbilityLevel; 6] = [
    AbilityLevel::APlus,
    AbilityLevel::A,
    AbilityLevel::BPlus,
    AbilityLevel::B,
    AbilityLevel::CPlus,
    AbilityLevel::C,
];

impl AbilityLevel {
    /// Integer rank 6..1 (A+ = 6) used for `level_change` arithmetic.
    pub fn rank(self) -> i64 {
        match self {
            AbilityLevel::APlus => 6,
            AbilityLevel::A => 5,
            AbilityLevel::BPlus => 4,
            AbilityLevel::B => 3,
            AbilityLevel::CPlus => 2,
            AbilityLevel::C => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AbilityLevel::APlus => "A+",
            AbilityLevel::A => "A",
            AbilityLevel::BPlus => "B+",
            AbilityLevel::B => "B",
            AbilityLevel::CPlus => "C+",
            AbilityLevel::C => "C",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A+" => Some(AbilityLevel::APlus),
            "A" => Some(AbilityLevel::A),
            "B+" => Some(AbilityLevel::BPlus),
            "B" => Some(AbilityLevel::B),
            "C+" => Some(AbilityLevel::CPlus),
            "C" => Some(AbilityLevel::C),
            _ => None,
        }
    }
}

impl ToSql for AbilityLevel {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AbilityLevel {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_str()?;
        AbilityLevel::from_code(code).ok_or(FromSqlError::InvalidType)
    }
}

// Boundary comparisons tolerate the float error accumulated by summing shares.
const SHARE_EPS: f64 = 1e-9;

/// Assign a band from a cohort percentile (fraction of members with z <= this
/// student's z, in (0, 1]). `shares` are per-band fractions ordered top-down.
///
/// The walk accumulates shares from the top band: a student in the top
/// `shares[0]` of the cohort (percentile >= 1 - shares[0]) gets the top band,
/// and so on. The bottom band catches everything left, so a single-member
/// cohort (percentile 1.0) always lands in the top band. Equal percentiles
/// always produce equal bands regardless of input order.
pub fn classify_percentile(percentile: f64, shares: &[f64; 6]) -> AbilityLevel {
    let mut cumulative = 0.0;
    for (i, level) in LEVELS_TOP_DOWN.iter().enumerate() {
        cumulative += shares[i];
        if i == LEVELS_TOP_DOWN.len() - 1 {
            break;
        }
        if percentile >= 1.0 - cumulative - SHARE_EPS {
            return *level;
        }
    }
    AbilityLevel::C
}
