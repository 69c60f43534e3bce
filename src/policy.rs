use crate::error::EngineError;
use crate::level::AbilityLevel;

/// How `is_transformed` is decided. The general reading (any band gained) is
/// the default; the stricter reading requires reaching a specific band from
/// below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformRule {
    AnyImprovement,
    ReachLevel(AbilityLevel),
}

/// Grading-policy constants for one computation. Always passed explicitly so
/// one daemon can serve different policies (e.g. different grade levels)
/// without cross-contamination.
#[derive(Debug, Clone)]
pub struct GradingPolicy {
    /// Per-band cohort shares, top-down (A+ first). Must be positive and sum
    /// to ~1.
    pub level_shares: [f64; 6],
    /// Standard score = base + z * scale. Defaults to the T-score map.
    pub standard_base: f64,
    pub standard_scale: f64,
    /// Lowest band counted as "excellent" for excellent counts and rates.
    pub excellent_min_level: AbilityLevel,
    /// Raw-score pass line used by the time comparison's pass rate.
    pub pass_score: f64,
    pub transform_rule: TransformRule,
    /// Steepness of the subject-balance inverse curve.
    pub balance_sensitivity: f64,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            level_shares: [0.07, 0.17, 0.26, 0.26, 0.17, 0.07],
            standard_base: 50.0,
            standard_scale: 10.0,
            excellent_min_level: AbilityLevel::A,
            pass_score: 60.0,
            transform_rule: TransformRule::AnyImprovement,
            balance_sensitivity: 10.0,
        }
    }
}

impl GradingPolicy {
    pub fn standard_score(&self, z: f64) -> f64 {
        self.standard_base + z * self.standard_scale
    }

    pub fn is_excellent(&self, level: AbilityLevel) -> bool {
        level.rank() >= self.excellent_min_level.rank()
    }

    pub fn is_transformed(&self, entry: AbilityLevel, exit: AbilityLevel) -> bool {
        match self.transform_rule {
            TransformRule::AnyImprovement => exit.rank() > entry.rank(),
            TransformRule::ReachLevel(target) => {
                entry.rank() < target.rank() && exit.rank() >= target.rank()
            }
        }
    }

    /// Bounded (0, 100] score that shrinks as the mean absolute subject
    /// deviation grows.
    pub fn balance_score(&self, subject_deviation: f64) -> f64 {
        100.0 / (1.0 + self.balance_sensitivity * subject_deviation.max(0.0))
    }
}

/// Parse the optional `params.policy` object, filling unset fields from the
/// defaults. Unknown keys are ignored; present-but-invalid values are
/// `bad_params` errors.
pub fn parse_policy(raw: Option<&serde_json::Value>) -> Result<GradingPolicy, EngineError> {
    let mut policy = GradingPolicy::default();
    let Some(raw) = raw else {
        return Ok(policy);
    };
    if raw.is_null() {
        return Ok(policy);
    }
    let Some(obj) = raw.as_object() else {
        return Err(EngineError::new("bad_params", "policy must be an object"));
    };

    if let Some(v) = obj.get("levelShares") {
        let Some(arr) = v.as_array() else {
            return Err(EngineError::new(
                "bad_params",
                "policy.levelShares must be an array of 6 fractions",
            ));
        };
        if arr.len() != 6 {
            return Err(EngineError::new(
                "bad_params",
                "policy.levelShares must have exactly 6 entries (A+ first)",
            ));
        }
        let mut shares = [0.0_f64; 6];
        for (i, entry) in arr.iter().enumerate() {
            let Some(f) = entry.as_f64() else {
                return Err(EngineError::new(
                    "bad_params",
                    "policy.levelShares entries must be numbers",
                ));
            };
            if f <= 0.0 || f >= 1.0 {
                return Err(EngineError::new(
                    "bad_params",
                    "policy.levelShares entries must be in (0, 1)",
                ));
            }
            shares[i] = f;
        }
        let total: f64 = shares.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(EngineError::new(
                "bad_params",
                format!("policy.levelShares must sum to 1, got {}", total),
            ));
        }
        policy.level_shares = shares;
    }

    if let Some(v) = obj.get("standardBase") {
        let Some(f) = v.as_f64() else {
            return Err(EngineError::new("bad_params", "policy.standardBase must be a number"));
        };
        policy.standard_base = f;
    }

    if let Some(v) = obj.get("standardScale") {
        let Some(f) = v.as_f64() else {
            return Err(EngineError::new("bad_params", "policy.standardScale must be a number"));
        };
        if f <= 0.0 {
            return Err(EngineError::new("bad_params", "policy.standardScale must be positive"));
        }
        policy.standard_scale = f;
    }

    if let Some(v) = obj.get("excellentMinLevel") {
        let Some(code) = v.as_str() else {
            return Err(EngineError::new(
                "bad_params",
                "policy.excellentMinLevel must be a level code",
            ));
        };
        let Some(level) = AbilityLevel::from_code(code) else {
            return Err(EngineError::new(
                "bad_params",
                format!("unknown level code: {}", code),
            ));
        };
        policy.excellent_min_level = level;
    }

    if let Some(v) = obj.get("passScore") {
        let Some(f) = v.as_f64() else {
            return Err(EngineError::new("bad_params", "policy.passScore must be a number"));
        };
        policy.pass_score = f;
    }

    if let Some(v) = obj.get("transformRule") {
        let Some(s) = v.as_str() else {
            return Err(EngineError::new("bad_params", "policy.transformRule must be a string"));
        };
        if s.eq_ignore_ascii_case("any-improvement") {
            policy.transform_rule = TransformRule::AnyImprovement;
        } else if let Some(code) = s.strip_prefix("reach-level:") {
            let Some(level) = AbilityLevel::from_code(code) else {
                return Err(EngineError::new(
                    "bad_params",
                    format!("unknown level code in transformRule: {}", code),
                ));
            };
            policy.transform_rule = TransformRule::ReachLevel(level);
        } else {
            return Err(EngineError::new(
                "bad_params",
                "policy.transformRule must be 'any-improvement' or 'reach-level:<code>'",
            ));
        }
    }

    if let Some(v) = obj.get("balanceSensitivity") {
        let Some(f) = v.as_f64() else {
            return Err(EngineError::new(
                "bad_params",
                "policy.balanceSensitivity must be a number",
            ));
        };
        if f <= 0.0 {
            return Err(EngineError::new(
                "bad_params",
                "policy.balanceSensitivity must be positive",
            ));
        }
        policy.balance_sensitivity = f;
    }

    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_when_absent_or_null() {
        let p = parse_policy(None).expect("defaults");
        assert_eq!(p.standard_base, 50.0);
        assert_eq!(p.standard_scale, 10.0);
        assert_eq!(p.excellent_min_level, AbilityLevel::A);
        assert_eq!(p.transform_rule, TransformRule::AnyImprovement);

        let p = parse_policy(Some(&serde_json::Value::Null)).expect("null defaults");
        assert_eq!(p.pass_score, 60.0);
    }

    #[test]
    fn standard_score_is_linear_in_z() {
        let p = GradingPolicy::default();
        assert_eq!(p.standard_score(0.0), 50.0);
        assert_eq!(p.standard_score(1.5), 65.0);
        assert_eq!(p.standard_score(-2.0), 30.0);
    }

    #[test]
    fn parse_overrides() {
        let raw = json!({
            "standardBase": 500.0,
            "standardScale": 100.0,
            "excellentMinLevel": "A+",
            "passScore": 90.0,
            "transformRule": "reach-level:A",
            "balanceSensitivity": 4.0
        });
        let p = parse_policy(Some(&raw)).expect("parse");
        assert_eq!(p.standard_score(1.0), 600.0);
        assert_eq!(p.excellent_min_level, AbilityLevel::APlus);
        assert_eq!(p.transform_rule, TransformRule::ReachLevel(AbilityLevel::A));
        assert_eq!(p.pass_score, 90.0);
        assert_eq!(p.balance_sensitivity, 4.0);
    }

    #[test]
    fn parse_rejects_bad_shares() {
        let raw = json!({ "levelShares": [0.5, 0.5] });
        assert!(parse_policy(Some(&raw)).is_err());

        let raw = json!({ "levelShares": [0.5, 0.2, 0.1, 0.1, 0.05, 0.3] });
        assert!(parse_policy(Some(&raw)).is_err(), "shares must sum to 1");

        let raw = json!({ "levelShares": [0.07, 0.17, 0.26, 0.26, 0.17, 0.07] });
        assert!(parse_policy(Some(&raw)).is_ok());
    }

    #[test]
    fn transform_rules() {
        let any = GradingPolicy::default();
        assert!(any.is_transformed(AbilityLevel::C, AbilityLevel::CPlus));
        assert!(!any.is_transformed(AbilityLevel::A, AbilityLevel::A));
        assert!(!any.is_transformed(AbilityLevel::A, AbilityLevel::B));

        let reach = GradingPolicy {
            transform_rule: TransformRule::ReachLevel(AbilityLevel::APlus),
            ..GradingPolicy::default()
        };
        assert!(reach.is_transformed(AbilityLevel::A, AbilityLevel::APlus));
        assert!(!reach.is_transformed(AbilityLevel::C, AbilityLevel::B));
        assert!(!reach.is_transformed(AbilityLevel::APlus, AbilityLevel::APlus));
    }

    #[test]
    fn balance_score_is_bounded_and_decreasing() {
        let p = GradingPolicy::default();
        assert_eq!(p.balance_score(0.0), 100.0);
        let mid = p.balance_score(0.1);
        let far = p.balance_score(0.5);
        assert!(mid < 100.0 && mid > far && far > 0.0);
    }
}
