// In-memory rule store
//
// All state sits behind one RwLock; every write operation holds it from
// lookup to update. Used by tests and by embedders that persist
// rules elsewhere.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{CategoryProvider, RuleStore};
use crate::allocator::FundingProgress;
use crate::entities::{
    merchant_key, Category, CategoryRule, MerchantGroup, MerchantIdentity, RuleFields,
};
use crate::error::{BudgetError, Result};
use crate::month::BudgetMonth;

#[derive(Debug, Default)]
struct MemoryState {
    next_rule_id: i64,
    rules: Vec<CategoryRule>,
    /// (user, group id) → group
    groups: HashMap<(String, String), MerchantGroup>,
    /// (user, normalized merchant) → group id
    merchant_map: HashMap<(String, String), String>,
    /// None = no category registry, every id is accepted
    categories: Option<Vec<Category>>,
    /// (month, category id) → progress
    funding: HashMap<(BudgetMonth, i64), FundingProgress>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRuleStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that also validates category ids and serves category snapshots
    pub fn with_categories(categories: Vec<Category>) -> Self {
        let store = Self::new();
        store.write().categories = Some(categories);
        store
    }

    /// Record this month's funding progress for a category
    pub fn set_funding(&self, month: BudgetMonth, category_id: i64, progress: FundingProgress) {
        self.write().funding.insert((month, category_id), progress);
    }

    pub fn rule_count(&self) -> usize {
        self.read().rules.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn owned_by<'a>(rule: &'a CategoryRule, user_id: &str) -> Option<&'a CategoryRule> {
    (rule.user_id == user_id).then_some(rule)
}

impl MemoryState {
    fn position(&self, user_id: &str, rule_id: i64) -> Option<usize> {
        self.rules
            .iter()
            .position(|r| r.id == rule_id && r.user_id == user_id)
    }

    /// The (identity, category) rule, if any
    fn position_of(&self, user_id: &str, identity: &MerchantIdentity, category_id: i64) -> Option<usize> {
        self.rules.iter().position(|r| {
            r.user_id == user_id && r.category_id == category_id && r.identity.same_merchant(identity)
        })
    }

    fn check_category(&self, category_id: i64) -> Result<()> {
        match &self.categories {
            Some(categories) if !categories.iter().any(|c| c.id == category_id) => {
                Err(BudgetError::UnknownCategory(category_id))
            }
            _ => Ok(()),
        }
    }

    fn insert(
        &mut self,
        user_id: &str,
        identity: &MerchantIdentity,
        category_id: i64,
        fields: RuleFields,
    ) -> CategoryRule {
        self.next_rule_id += 1;
        let rule = CategoryRule {
            id: self.next_rule_id,
            user_id: user_id.to_string(),
            identity: identity.clone(),
            normalized_pattern: identity.normalized_pattern(),
            category_id,
            confidence_score: fields.confidence_score,
            usage_count: fields.usage_count,
            last_used: fields.last_used,
            created_at: Utc::now(),
        };
        self.rules.push(rule.clone());
        rule
    }
}

impl RuleStore for MemoryRuleStore {
    fn find_group_for_merchant(&self, user_id: &str, raw: &str) -> Result<Option<String>> {
        let key = (user_id.to_string(), merchant_key(raw));
        Ok(self.read().merchant_map.get(&key).cloned())
    }

    fn find_group_rules(&self, user_id: &str, group_id: &str) -> Result<Vec<CategoryRule>> {
        Ok(self
            .read()
            .rules
            .iter()
            .filter_map(|r| owned_by(r, user_id))
            .filter(|r| r.identity.group_id() == Some(group_id))
            .cloned()
            .collect())
    }

    fn find_pattern_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        Ok(self
            .read()
            .rules
            .iter()
            .filter_map(|r| owned_by(r, user_id))
            .filter(|r| !r.is_group_rule())
            .cloned()
            .collect())
    }

    fn find_rule_by_id(&self, user_id: &str, rule_id: i64) -> Result<Option<CategoryRule>> {
        let state = self.read();
        Ok(state.position(user_id, rule_id).map(|i| state.rules[i].clone()))
    }

    fn upsert_rule(
        &self,
        user_id: &str,
        identity: &MerchantIdentity,
        category_id: i64,
        fields: RuleFields,
    ) -> Result<CategoryRule> {
        let mut state = self.write();
        state.check_category(category_id)?;

        if let Some(index) = state.position_of(user_id, identity, category_id) {
            let existing = &mut state.rules[index];
            existing.usage_count = fields.usage_count;
            existing.confidence_score = fields.confidence_score;
            existing.last_used = fields.last_used;
            return Ok(existing.clone());
        }

        Ok(state.insert(user_id, identity, category_id, fields))
    }

    fn reinforce_rule(
        &self,
        user_id: &str,
        identity: &MerchantIdentity,
        category_id: i64,
        initial_confidence: u8,
        step: u8,
        now: DateTime<Utc>,
    ) -> Result<CategoryRule> {
        let mut state = self.write();
        state.check_category(category_id)?;

        if let Some(index) = state.position_of(user_id, identity, category_id) {
            let existing = &mut state.rules[index];
            let fields = existing.strengthened(step, now);
            existing.usage_count = fields.usage_count;
            existing.confidence_score = fields.confidence_score;
            existing.last_used = fields.last_used;
            return Ok(existing.clone());
        }

        let fields = RuleFields::initial(initial_confidence, now);
        Ok(state.insert(user_id, identity, category_id, fields))
    }

    fn reassign_rule(
        &self,
        user_id: &str,
        rule_id: i64,
        category_id: i64,
        step: u8,
        now: DateTime<Utc>,
    ) -> Result<CategoryRule> {
        let mut state = self.write();

        let index = state
            .position(user_id, rule_id)
            .ok_or(BudgetError::RuleNotFound(rule_id))?;
        let moving = state.rules[index].clone();
        if moving.category_id == category_id {
            return Ok(moving);
        }
        state.check_category(category_id)?;

        match state.position_of(user_id, &moving.identity, category_id) {
            Some(sibling) => {
                let merged = state.rules[sibling].merged_with(&moving, step, now);
                let kept = &mut state.rules[sibling];
                kept.usage_count = merged.usage_count;
                kept.confidence_score = merged.confidence_score;
                kept.last_used = merged.last_used;
                let kept = kept.clone();

                state.rules.remove(index);
                Ok(kept)
            }
            None => {
                state.rules[index].category_id = category_id;
                Ok(state.rules[index].clone())
            }
        }
    }

    fn create_group(&self, user_id: &str, name: &str) -> Result<MerchantGroup> {
        let group = MerchantGroup::new(name);
        self.write()
            .groups
            .insert((user_id.to_string(), group.id.clone()), group.clone());
        Ok(group)
    }

    fn link_merchant(&self, user_id: &str, raw: &str, group_id: &str) -> Result<()> {
        let mut state = self.write();

        if !state
            .groups
            .contains_key(&(user_id.to_string(), group_id.to_string()))
        {
            return Err(BudgetError::GroupNotFound(group_id.to_string()));
        }

        state.merchant_map.insert(
            (user_id.to_string(), merchant_key(raw)),
            group_id.to_string(),
        );
        Ok(())
    }

    fn list_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        Ok(self
            .read()
            .rules
            .iter()
            .filter_map(|r| owned_by(r, user_id))
            .cloned()
            .collect())
    }

    fn delete_rule(&self, user_id: &str, rule_id: i64) -> Result<bool> {
        let mut state = self.write();
        let before = state.rules.len();
        state
            .rules
            .retain(|r| !(r.id == rule_id && r.user_id == user_id));
        Ok(state.rules.len() < before)
    }

    fn category_exists(&self, category_id: i64) -> Result<bool> {
        Ok(match &self.read().categories {
            Some(categories) => categories.iter().any(|c| c.id == category_id),
            None => true,
        })
    }
}

impl CategoryProvider for MemoryRuleStore {
    fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.read().categories.clone().unwrap_or_default())
    }

    fn funding_progress(&self, month: BudgetMonth) -> Result<HashMap<i64, FundingProgress>> {
        Ok(self
            .read()
            .funding
            .iter()
            .filter(|((m, _), _)| *m == month)
            .map(|((_, id), progress)| (*id, *progress))
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
