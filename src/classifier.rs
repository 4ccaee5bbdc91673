// 🧠 Classifier - learned merchant → category suggestions
//
// Lookup order for a merchant string:
//   1. merchant group rules (exact group match, always wins)
//   2. pattern rules (fuzzy similarity on normalized strings)
//   3. static keyword table
//   4. weak learned match (below threshold) rather than nothing
//
// One algorithm for every backend: the classifier only talks to RuleStore.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::ClassifierConfig;
use crate::entities::{CategoryRef, CategoryRule, MerchantGroup, MerchantIdentity};
use crate::error::{BudgetError, Result};
use crate::keywords::KeywordTable;
use crate::matching::{normalize, similarity_score};
use crate::store::RuleStore;

// ============================================================================
// CALLER CONTEXT
// ============================================================================

/// Authenticated caller. Can only be built from a non-blank user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    user_id: String,
}

impl CallerContext {
    pub fn new(user_id: &str) -> Result<Self> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(BudgetError::MissingContext);
        }
        Ok(CallerContext {
            user_id: user_id.to_string(),
        })
    }

    /// From an optional source (header, session); None is a hard error
    pub fn from_optional(user_id: Option<&str>) -> Result<Self> {
        user_id
            .ok_or(BudgetError::MissingContext)
            .and_then(CallerContext::new)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Learned,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category_id: i64,

    /// 0.0..=1.0
    pub confidence: f64,

    pub source: MatchSource,

    /// Rule that produced a learned match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<i64>,
}

impl ClassificationResult {
    fn learned(rule: &CategoryRule, confidence: f64) -> Self {
        ClassificationResult {
            category_id: rule.category_id,
            confidence,
            source: MatchSource::Learned,
            rule_id: Some(rule.id),
        }
    }
}

/// Outcome of best-effort bulk learning
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchLearnReport {
    pub learned: usize,
    pub failed: usize,
    /// (input index, error message)
    pub errors: Vec<(usize, String)>,
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct Classifier<S: RuleStore> {
    store: S,
    keywords: KeywordTable,
    config: ClassifierConfig,
}

impl<S: RuleStore> Classifier<S> {
    /// Classifier with the built-in keyword table and default thresholds
    pub fn new(store: S) -> Self {
        Self::with_config(store, KeywordTable::with_defaults(), ClassifierConfig::default())
    }

    pub fn with_config(store: S, keywords: KeywordTable, config: ClassifierConfig) -> Self {
        Classifier {
            store,
            keywords,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keywords(&self) -> &KeywordTable {
        &self.keywords
    }

    /// Group identity if the merchant is mapped to one, else the raw pattern
    pub fn resolve_identity(&self, ctx: &CallerContext, merchant: &str) -> Result<MerchantIdentity> {
        Ok(match self.store.find_group_for_merchant(ctx.user_id(), merchant)? {
            Some(group_id) => MerchantIdentity::Group(group_id),
            None => MerchantIdentity::Pattern(merchant.trim().to_string()),
        })
    }

    /// Best-guess category for a merchant, restricted to `valid_categories`
    pub fn classify(
        &self,
        ctx: &CallerContext,
        merchant: &str,
        valid_categories: &[CategoryRef],
    ) -> Result<Option<ClassificationResult>> {
        let valid_ids: HashSet<i64> = valid_categories.iter().map(|c| c.id).collect();
        let identity = self.resolve_identity(ctx, merchant)?;

        // Group rules win outright
        if let MerchantIdentity::Group(group_id) = &identity {
            if let Some(rule) = self.best_group_rule(ctx, group_id, &valid_ids)? {
                debug!(rule_id = rule.id, group_id = %group_id, "group rule match");
                return Ok(Some(ClassificationResult::learned(&rule, rule.confidence())));
            }
        }

        let learned = self.best_pattern_rule(ctx, merchant, &valid_ids)?;

        if let Some((rule, confidence)) = &learned {
            if *confidence >= self.config.learned_threshold {
                debug!(rule_id = rule.id, confidence, "pattern rule match");
                return Ok(Some(ClassificationResult::learned(rule, *confidence)));
            }
        }

        if let Some(suggestion) = self.keywords.suggest(merchant, valid_categories) {
            debug!(keyword = %suggestion.keyword, category_id = suggestion.category_id, "keyword match");
            return Ok(Some(ClassificationResult {
                category_id: suggestion.category_id,
                confidence: self.config.keyword_confidence,
                source: MatchSource::Keyword,
                rule_id: None,
            }));
        }

        // A weak learned signal beats no suggestion at all
        Ok(learned.map(|(rule, confidence)| ClassificationResult::learned(&rule, confidence)))
    }

    /// Top group rule: most used first, then most confident
    fn best_group_rule(
        &self,
        ctx: &CallerContext,
        group_id: &str,
        valid_ids: &HashSet<i64>,
    ) -> Result<Option<CategoryRule>> {
        let mut rules: Vec<CategoryRule> = self
            .store
            .find_group_rules(ctx.user_id(), group_id)?
            .into_iter()
            .filter(|r| valid_ids.contains(&r.category_id))
            .collect();

        rules.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then(b.confidence_score.cmp(&a.confidence_score))
        });

        Ok(rules.into_iter().next())
    }

    /// Pattern rule with the highest similarity-weighted confidence
    fn best_pattern_rule(
        &self,
        ctx: &CallerContext,
        merchant: &str,
        valid_ids: &HashSet<i64>,
    ) -> Result<Option<(CategoryRule, f64)>> {
        let normalized = normalize(merchant);
        let mut best: Option<(CategoryRule, f64)> = None;

        for rule in self.store.find_pattern_rules(ctx.user_id())? {
            if !valid_ids.contains(&rule.category_id) {
                continue;
            }
            let Some(pattern) = rule.normalized_pattern.as_deref() else {
                continue;
            };

            let similarity = similarity_score(&normalized, pattern);
            if similarity < self.config.similarity_threshold {
                continue;
            }

            let adjusted = similarity * rule.confidence();
            if best.as_ref().map_or(true, |(_, score)| adjusted > *score) {
                best = Some((rule, adjusted));
            }
        }

        Ok(best)
    }

    /// Reinforce (or create) the rule for merchant → category
    pub fn learn(&self, ctx: &CallerContext, merchant: &str, category_id: i64) -> Result<CategoryRule> {
        if normalize(merchant).is_empty() {
            return Err(BudgetError::EmptyMerchant);
        }
        if !self.store.category_exists(category_id)? {
            return Err(BudgetError::UnknownCategory(category_id));
        }

        let identity = self.resolve_identity(ctx, merchant)?;
        let initial = if identity.is_group() {
            self.config.group_initial_confidence
        } else {
            self.config.pattern_initial_confidence
        };

        let rule = self.store.reinforce_rule(
            ctx.user_id(),
            &identity,
            category_id,
            initial,
            self.config.reinforcement_step,
            Utc::now(),
        )?;

        info!(
            rule_id = rule.id,
            category_id,
            usage_count = rule.usage_count,
            confidence = rule.confidence_score,
            group = identity.is_group(),
            "rule learned"
        );
        Ok(rule)
    }

    /// Learn many confirmations; one failure never stops the rest
    pub fn learn_batch<I, M>(&self, ctx: &CallerContext, items: I) -> BatchLearnReport
    where
        I: IntoIterator<Item = (M, i64)>,
        M: AsRef<str>,
    {
        let mut report = BatchLearnReport::default();

        for (index, (merchant, category_id)) in items.into_iter().enumerate() {
            match self.learn(ctx, merchant.as_ref(), category_id) {
                Ok(_) => report.learned += 1,
                Err(e) => {
                    warn!(index, merchant = merchant.as_ref(), category_id, error = %e, "skipping rule");
                    report.failed += 1;
                    report.errors.push((index, e.to_string()));
                }
            }
        }

        report
    }

    /// Point a rule at another category, merging into an existing sibling rule
    pub fn reassign_rule_category(
        &self,
        ctx: &CallerContext,
        rule_id: i64,
        new_category_id: i64,
    ) -> Result<CategoryRule> {
        let rule = self
            .store
            .find_rule_by_id(ctx.user_id(), rule_id)?
            .ok_or(BudgetError::RuleNotFound(rule_id))?;

        if rule.category_id == new_category_id {
            return Ok(rule);
        }
        if !self.store.category_exists(new_category_id)? {
            return Err(BudgetError::UnknownCategory(new_category_id));
        }

        let kept = self.store.reassign_rule(
            ctx.user_id(),
            rule.id,
            new_category_id,
            self.config.reinforcement_step,
            Utc::now(),
        )?;
        info!(rule_id, kept = kept.id, category_id = new_category_id, "rule reassigned");
        Ok(kept)
    }

    /// Create a merchant group (a deliberate user action)
    pub fn create_merchant_group(&self, ctx: &CallerContext, name: &str) -> Result<MerchantGroup> {
        if name.trim().is_empty() {
            return Err(BudgetError::EmptyMerchant);
        }
        self.store.create_group(ctx.user_id(), name)
    }

    /// Map a raw merchant string onto a group
    pub fn assign_merchant_to_group(&self, ctx: &CallerContext, merchant: &str, group_id: &str) -> Result<()> {
        if normalize(merchant).is_empty() {
            return Err(BudgetError::EmptyMerchant);
        }
        self.store.link_merchant(ctx.user_id(), merchant, group_id)
    }

    pub fn list_rules(&self, ctx: &CallerContext) -> Result<Vec<CategoryRule>> {
        self.store.list_rules(ctx.user_id())
    }

    pub fn delete_rule(&self, ctx: &CallerContext, rule_id: i64) -> Result<()> {
        if self.store.delete_rule(ctx.user_id(), rule_id)? {
            Ok(())
        } else {
            Err(BudgetError::RuleNotFound(rule_id))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
