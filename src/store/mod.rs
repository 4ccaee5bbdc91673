// 🗄️ Rule Store - the only shared mutable state of the classifier
//
// The classifier is written once against this trait; the in-memory and
// SQLite backends make reinforcement and reassignment atomic.
// Every call is scoped by the caller's user id.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRuleStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::allocator::FundingProgress;
use crate::entities::{Category, CategoryRule, MerchantGroup, MerchantIdentity, RuleFields};
use crate::error::Result;
use crate::month::BudgetMonth;

pub trait RuleStore {
    /// Exact single-key lookup in the merchant → group mapping table
    fn find_group_for_merchant(&self, user_id: &str, raw: &str) -> Result<Option<String>>;

    /// All rules learned for a merchant group
    fn find_group_rules(&self, user_id: &str, group_id: &str) -> Result<Vec<CategoryRule>>;

    /// All pattern (non-group) rules of the user
    fn find_pattern_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>>;

    fn find_rule_by_id(&self, user_id: &str, rule_id: i64) -> Result<Option<CategoryRule>>;

    /// Insert the (identity, category) rule, or overwrite its fields if it exists
    fn upsert_rule(
        &self,
        user_id: &str,
        identity: &MerchantIdentity,
        category_id: i64,
        fields: RuleFields,
    ) -> Result<CategoryRule>;

    /// One confirmation of (identity, category), atomically: create the rule
    /// at `initial_confidence`, or bump usage by 1 and confidence by `step`
    /// (capped at 100)
    fn reinforce_rule(
        &self,
        user_id: &str,
        identity: &MerchantIdentity,
        category_id: i64,
        initial_confidence: u8,
        step: u8,
        now: DateTime<Utc>,
    ) -> Result<CategoryRule>;

    /// Re-point a rule at another category, atomically. If the identity
    /// already has a rule for that category the two are merged into it
    /// (usage summed, max confidence + `step`) and the moved rule is deleted.
    /// Same category is a no-op.
    fn reassign_rule(
        &self,
        user_id: &str,
        rule_id: i64,
        category_id: i64,
        step: u8,
        now: DateTime<Utc>,
    ) -> Result<CategoryRule>;

    fn create_group(&self, user_id: &str, name: &str) -> Result<MerchantGroup>;

    /// Map a raw merchant string to an existing group
    fn link_merchant(&self, user_id: &str, raw: &str, group_id: &str) -> Result<()>;

    fn list_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>>;

    /// Returns false if the rule did not exist
    fn delete_rule(&self, user_id: &str, rule_id: i64) -> Result<bool>;

    fn category_exists(&self, category_id: i64) -> Result<bool>;
}

/// Snapshot source for the allocator
pub trait CategoryProvider {
    fn categories(&self) -> Result<Vec<Category>>;

    /// Per-category {funded, target} for one month
    fn funding_progress(&self, month: BudgetMonth) -> Result<HashMap<i64, FundingProgress>>;
}
