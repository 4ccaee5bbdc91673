// 🏪 Merchant Identity - who is behind a raw description string
//
// "WALMART #4521", "Walmart Supercenter", "WAL-MART STORE 12" → one group
// When no group exists, the raw string itself is the identity (a pattern).
//
// Groups are created by deliberate user action, so rules learned against a
// group start out more trusted than rules learned against a bare pattern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matching::normalize;

// ============================================================================
// MERCHANT IDENTITY
// ============================================================================

/// Resolved identity of a merchant: exactly one of group / pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MerchantIdentity {
    /// Stable cluster id for one real-world merchant
    Group(String),

    /// Raw merchant string (no group known)
    Pattern(String),
}

impl MerchantIdentity {
    pub fn is_group(&self) -> bool {
        matches!(self, MerchantIdentity::Group(_))
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            MerchantIdentity::Group(id) => Some(id),
            MerchantIdentity::Pattern(_) => None,
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        match self {
            MerchantIdentity::Group(_) => None,
            MerchantIdentity::Pattern(raw) => Some(raw),
        }
    }

    /// Normalized pattern used for matching and uniqueness (patterns only)
    pub fn normalized_pattern(&self) -> Option<String> {
        self.pattern().map(normalize)
    }

    /// Two identities are the same merchant if the group ids match, or if the
    /// patterns normalize to the same string
    pub fn same_merchant(&self, other: &MerchantIdentity) -> bool {
        match (self, other) {
            (MerchantIdentity::Group(a), MerchantIdentity::Group(b)) => a == b,
            (MerchantIdentity::Pattern(a), MerchantIdentity::Pattern(b)) => {
                normalize(a) == normalize(b)
            }
            _ => false,
        }
    }
}

// ============================================================================
// MERCHANT GROUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantGroup {
    /// Stable identity (UUID) - never changes
    pub id: String,

    /// Display name ("Walmart")
    pub name: String,

    pub created_at: DateTime<Utc>,
}

impl MerchantGroup {
    pub fn new(name: &str) -> Self {
        MerchantGroup {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Key used by the merchant → group mapping table
pub fn merchant_key(raw: &str) -> String {
    normalize(raw)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_accessors() {
        let group = MerchantIdentity::Group("g-1".to_string());
        let pattern = MerchantIdentity::Pattern("JOE'S PIZZA".to_string());

        assert!(group.is_group());
        assert_eq!(group.group_id(), Some("g-1"));
        assert_eq!(group.pattern(), None);
        assert_eq!(group.normalized_pattern(), None);

        assert!(!pattern.is_group());
        assert_eq!(pattern.pattern(), Some("JOE'S PIZZA"));
        assert_eq!(pattern.normalized_pattern(), Some("joes pizza".to_string()));
    }

    #[test]
    fn test_same_merchant() {
        let a = MerchantIdentity::Pattern("Walmart Inc.".to_string());
        let b = MerchantIdentity::Pattern("WALMART".to_string());
        let g = MerchantIdentity::Group("walmart".to_string());

        assert!(a.same_merchant(&b));
        assert!(!a.same_merchant(&g));
        assert!(g.same_merchant(&MerchantIdentity::Group("walmart".to_string())));
    }

    #[test]
    fn test_group_creation() {
        let first = MerchantGroup::new("  Walmart ");
        let second = MerchantGroup::new("Walmart");

        assert_eq!(first.name, "Walmart");
        assert!(!first.id.is_empty());
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_merchant_key_is_normalized() {
        assert_eq!(merchant_key("WALMART #4521"), "walmart 4521");
        assert_eq!(merchant_key("walmart   4521"), merchant_key("Walmart #4521"));
    }

    #[test]
    fn test_identity_serialization_shape() {
        let json = serde_json::to_value(MerchantIdentity::Group("g-1".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "group", "value": "g-1"}));
    }
}
