// 📐 Category Rule - learned (merchant identity → category) mapping
//
// Invariant: at most one rule per (user, merchant identity, category).
// Rules are created on first confirmation, strengthened on every repeat,
// and merged (never duplicated) when re-pointed at a category that already
// has a rule for the same identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::merchant::MerchantIdentity;

pub const MAX_CONFIDENCE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub id: i64,

    /// Owner of the rule (rules are per user)
    pub user_id: String,

    pub identity: MerchantIdentity,

    /// Set for pattern rules only
    pub normalized_pattern: Option<String>,

    pub category_id: i64,

    /// 0..=100
    pub confidence_score: u8,

    /// >= 1
    pub usage_count: u32,

    pub last_used: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
}

impl CategoryRule {
    /// Confidence as a 0.0..=1.0 fraction
    pub fn confidence(&self) -> f64 {
        f64::from(self.confidence_score) / 100.0
    }

    pub fn is_group_rule(&self) -> bool {
        self.identity.is_group()
    }

    /// Fields after one more confirmation
    pub fn strengthened(&self, step: u8, now: DateTime<Utc>) -> RuleFields {
        RuleFields {
            usage_count: self.usage_count.saturating_add(1),
            confidence_score: bump_confidence(self.confidence_score, step),
            last_used: now,
        }
    }

    /// Fields for `self` after absorbing `other` (same identity, re-pointed)
    pub fn merged_with(&self, other: &CategoryRule, step: u8, now: DateTime<Utc>) -> RuleFields {
        RuleFields {
            usage_count: self.usage_count.saturating_add(other.usage_count),
            confidence_score: bump_confidence(
                self.confidence_score.max(other.confidence_score),
                step,
            ),
            last_used: now,
        }
    }
}

/// The mutable part of a rule, written by upsert/merge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleFields {
    pub usage_count: u32,
    pub confidence_score: u8,
    pub last_used: DateTime<Utc>,
}

impl RuleFields {
    /// Fields for a brand-new rule
    pub fn initial(confidence_score: u8, now: DateTime<Utc>) -> Self {
        RuleFields {
            usage_count: 1,
            confidence_score: confidence_score.min(MAX_CONFIDENCE),
            last_used: now,
        }
    }
}

/// confidence + step, capped at 100
pub fn bump_confidence(confidence: u8, step: u8) -> u8 {
    confidence.saturating_add(step).min(MAX_CONFIDENCE)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(confidence_score: u8, usage_count: u32) -> CategoryRule {
        let now = Utc::now();
        CategoryRule {
            id: 1,
            user_id: "u1".to_string(),
            identity: MerchantIdentity::Pattern("kroger".to_string()),
            normalized_pattern: Some("kroger".to_string()),
            category_id: 3,
            confidence_score,
            usage_count,
            last_used: now,
            created_at: now,
        }
    }

    #[test]
    fn test_bump_confidence_caps_at_100() {
        assert_eq!(bump_confidence(30, 5), 35);
        assert_eq!(bump_confidence(98, 5), 100);
        assert_eq!(bump_confidence(100, 5), 100);
        assert_eq!(bump_confidence(255, 5), 100);
    }

    #[test]
    fn test_strengthened() {
        let now = Utc::now();
        let fields = rule(30, 1).strengthened(5, now);

        assert_eq!(fields.usage_count, 2);
        assert_eq!(fields.confidence_score, 35);
        assert_eq!(fields.last_used, now);
    }

    #[test]
    fn test_merged_with_sums_usage_and_bumps_max_confidence() {
        let now = Utc::now();
        let keep = rule(40, 3);
        let absorbed = rule(70, 4);

        let fields = keep.merged_with(&absorbed, 5, now);
        assert_eq!(fields.usage_count, 7);
        assert_eq!(fields.confidence_score, 75);

        let fields = rule(99, 1).merged_with(&rule(10, 1), 5, now);
        assert_eq!(fields.confidence_score, 100);
    }

    #[test]
    fn test_confidence_fraction() {
        assert!((rule(80, 1).confidence() - 0.8).abs() < 1e-12);
        assert!(!rule(80, 1).is_group_rule());
    }

    #[test]
    fn test_initial_fields() {
        let now = Utc::now();
        let fields = RuleFields::initial(50, now);
        assert_eq!(fields.usage_count, 1);
        assert_eq!(fields.confidence_score, 50);
    }
}
