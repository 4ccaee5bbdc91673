// SQLite store - rules, merchant groups, categories, funding progress
//
// The one-rule-per-(user, identity, category) invariant is enforced by a
// UNIQUE index on (user_id, identity_key, category_id). Reinforcement is a
// single INSERT ... ON CONFLICT DO UPDATE that increments in SQL; reassignment
// and allocation runs each happen inside one IMMEDIATE transaction.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use super::{CategoryProvider, RuleStore};
use crate::allocator::{compute_smart_allocation, AllocationResult, FundingProgress};
use crate::entities::{
    merchant_key, Category, CategoryRule, CategoryType, MerchantGroup, MerchantIdentity,
    PostingKind, RuleFields,
};
use crate::entities::rule::MAX_CONFIDENCE;
use crate::error::{BudgetError, Result};
use crate::month::BudgetMonth;

const RULE_COLUMNS: &str = "id, user_id, merchant_group_id, pattern, normalized_pattern,
     category_id, confidence_score, usage_count, last_used, created_at";

const CATEGORY_COLUMNS: &str = "id, name, category_type, priority, monthly_amount,
     monthly_target, annual_target, target_balance, current_balance,
     is_system, is_buffer, is_goal";

/// Create tables and indexes (idempotent)
pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases stay in "memory" mode
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            category_type TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 5,
            monthly_amount REAL NOT NULL DEFAULT 0,
            monthly_target REAL,
            annual_target REAL,
            target_balance REAL,
            current_balance REAL NOT NULL DEFAULT 0,
            is_system INTEGER NOT NULL DEFAULT 0,
            is_buffer INTEGER NOT NULL DEFAULT 0,
            is_goal INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS funding_progress (
            category_id INTEGER NOT NULL,
            month TEXT NOT NULL,
            funded REAL NOT NULL DEFAULT 0,
            target REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (category_id, month)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS merchant_groups (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS merchant_mappings (
            user_id TEXT NOT NULL,
            merchant_key TEXT NOT NULL,
            group_id TEXT NOT NULL,
            PRIMARY KEY (user_id, merchant_key)
        )",
        [],
    )?;

    // identity_key = "g:<group id>" or "p:<normalized pattern>"
    conn.execute(
        "CREATE TABLE IF NOT EXISTS category_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            identity_key TEXT NOT NULL,
            merchant_group_id TEXT,
            pattern TEXT,
            normalized_pattern TEXT,
            category_id INTEGER NOT NULL,
            confidence_score INTEGER NOT NULL CHECK (confidence_score BETWEEN 0 AND 100),
            usage_count INTEGER NOT NULL CHECK (usage_count >= 1),
            last_used TEXT NOT NULL,
            created_at TEXT NOT NULL,
            CHECK ((merchant_group_id IS NULL) <> (pattern IS NULL))
        )",
        [],
    )?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_rules_identity_category
         ON category_rules(user_id, identity_key, category_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rules_group ON category_rules(user_id, merchant_group_id)",
        [],
    )?;

    Ok(())
}

fn identity_key(identity: &MerchantIdentity) -> String {
    match identity {
        MerchantIdentity::Group(id) => format!("g:{}", id),
        MerchantIdentity::Pattern(_) => {
            format!("p:{}", identity.normalized_pattern().unwrap_or_default())
        }
    }
}

fn parse_time(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn rule_from_row(row: &Row) -> rusqlite::Result<CategoryRule> {
    let group_id: Option<String> = row.get(2)?;
    let pattern: Option<String> = row.get(3)?;

    let identity = match (group_id, pattern) {
        (Some(group_id), _) => MerchantIdentity::Group(group_id),
        (None, Some(pattern)) => MerchantIdentity::Pattern(pattern),
        (None, None) => {
            return Err(rusqlite::Error::InvalidColumnType(
                2,
                "merchant_group_id".to_string(),
                Type::Null,
            ))
        }
    };

    Ok(CategoryRule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        identity,
        normalized_pattern: row.get(4)?,
        category_id: row.get(5)?,
        confidence_score: row.get(6)?,
        usage_count: row.get(7)?,
        last_used: parse_time(8, row.get(8)?)?,
        created_at: parse_time(9, row.get(9)?)?,
    })
}

fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    let type_str: String = row.get(2)?;
    let category_type = CategoryType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown category type: {}", type_str).into(),
        )
    })?;

    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        category_type,
        priority: row.get(3)?,
        monthly_amount: row.get(4)?,
        monthly_target: row.get(5)?,
        annual_target: row.get(6)?,
        target_balance: row.get(7)?,
        current_balance: row.get(8)?,
        is_system: row.get(9)?,
        is_buffer: row.get(10)?,
        is_goal: row.get(11)?,
    })
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite-backed rule store + category provider
///
/// Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and set up the schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------------

    /// Insert or replace a category row
    pub fn save_category(&self, category: &Category) -> Result<()> {
        self.lock().execute(
            "INSERT INTO categories (
                id, name, category_type, priority, monthly_amount, monthly_target,
                annual_target, target_balance, current_balance, is_system, is_buffer, is_goal
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category_type = excluded.category_type,
                priority = excluded.priority,
                monthly_amount = excluded.monthly_amount,
                monthly_target = excluded.monthly_target,
                annual_target = excluded.annual_target,
                target_balance = excluded.target_balance,
                current_balance = excluded.current_balance,
                is_system = excluded.is_system,
                is_buffer = excluded.is_buffer,
                is_goal = excluded.is_goal",
            params![
                category.id,
                category.name,
                category.category_type.as_str(),
                category.priority,
                category.monthly_amount,
                category.monthly_target,
                category.annual_target,
                category.target_balance,
                category.current_balance,
                category.is_system,
                category.is_buffer,
                category.is_goal,
            ],
        )?;
        Ok(())
    }

    pub fn get_category(&self, category_id: i64) -> Result<Option<Category>> {
        let sql = format!("SELECT {} FROM categories WHERE id = ?1", CATEGORY_COLUMNS);
        Ok(self
            .lock()
            .query_row(&sql, params![category_id], category_from_row)
            .optional()?)
    }

    /// Apply a posted transaction to a category balance, returning the new balance
    pub fn post_transaction(&self, category_id: i64, amount: f64, kind: PostingKind) -> Result<f64> {
        self.lock()
            .query_row(
                "UPDATE categories SET current_balance = current_balance + ?1
                 WHERE id = ?2 RETURNING current_balance",
                params![kind.signed_amount(amount), category_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(BudgetError::UnknownCategory(category_id))
    }

    pub fn set_funding(&self, month: BudgetMonth, category_id: i64, progress: FundingProgress) -> Result<()> {
        self.lock().execute(
            "INSERT INTO funding_progress (category_id, month, funded, target)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(category_id, month) DO UPDATE SET
                funded = excluded.funded, target = excluded.target",
            params![category_id, month.to_string(), progress.funded, progress.target],
        )?;
        Ok(())
    }

    /// Plan a funding run and record it (funded += allocated, balance +=
    /// allocated) in one write transaction, so concurrent runs for the same
    /// month each see the other's funding
    pub fn allocate_and_record(&self, available_funds: f64, month: BudgetMonth) -> Result<AllocationResult> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let categories = load_categories(&tx)?;
        let progress = load_funding(&tx, month)?;
        let result = compute_smart_allocation(&categories, &progress, available_funds, month);

        for plan in result.allocations.iter().filter(|p| p.allocated_amount > 0.0) {
            tx.execute(
                "INSERT INTO funding_progress (category_id, month, funded, target)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(category_id, month) DO UPDATE SET
                    funded = funded + excluded.funded, target = excluded.target",
                params![
                    plan.category_id,
                    month.to_string(),
                    plan.allocated_amount,
                    plan.target_amount
                ],
            )?;
            tx.execute(
                "UPDATE categories SET current_balance = current_balance + ?1 WHERE id = ?2",
                params![plan.allocated_amount, plan.category_id],
            )?;
        }

        tx.commit()?;
        info!(month = %month, total = result.total_allocated, "allocation recorded");
        Ok(result)
    }

    /// Funding recorded for a category from January through `month`
    pub fn ytd_funded(&self, category_id: i64, month: BudgetMonth) -> Result<f64> {
        let first = format!("{:04}-01", month.year());
        let last = month.to_string();
        let total: Option<f64> = self.lock().query_row(
            "SELECT SUM(funded) FROM funding_progress
             WHERE category_id = ?1 AND month >= ?2 AND month <= ?3",
            params![category_id, first, last],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0.0))
    }

    fn rule_by_key(conn: &Connection, user_id: &str, key: &str, category_id: i64) -> Result<Option<CategoryRule>> {
        let sql = format!(
            "SELECT {} FROM category_rules WHERE user_id = ?1 AND identity_key = ?2 AND category_id = ?3",
            RULE_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![user_id, key, category_id], rule_from_row)
            .optional()?)
    }

    fn rule_by_id(conn: &Connection, user_id: &str, rule_id: i64) -> Result<Option<CategoryRule>> {
        let sql = format!(
            "SELECT {} FROM category_rules WHERE user_id = ?1 AND id = ?2",
            RULE_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![user_id, rule_id], rule_from_row)
            .optional()?)
    }

    fn query_rules(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<CategoryRule>> {
        let conn = self.lock();
        let sql = format!("SELECT {} FROM category_rules WHERE {} ORDER BY id", RULE_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let rules = stmt
            .query_map(args, rule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    fn category_exists_in(conn: &Connection, category_id: i64) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM categories WHERE id = ?1",
            params![category_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl RuleStore for SqliteStore {
    fn find_group_for_merchant(&self, user_id: &str, raw: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .query_row(
                "SELECT group_id FROM merchant_mappings WHERE user_id = ?1 AND merchant_key = ?2",
                params![user_id, merchant_key(raw)],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn find_group_rules(&self, user_id: &str, group_id: &str) -> Result<Vec<CategoryRule>> {
        self.query_rules("user_id = ?1 AND merchant_group_id = ?2", params![user_id, group_id])
    }

    fn find_pattern_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        self.query_rules("user_id = ?1 AND pattern IS NOT NULL", params![user_id])
    }

    fn find_rule_by_id(&self, user_id: &str, rule_id: i64) -> Result<Option<CategoryRule>> {
        SqliteStore::rule_by_id(&self.lock(), user_id, rule_id)
    }

    fn upsert_rule(
        &self,
        user_id: &str,
        identity: &MerchantIdentity,
        category_id: i64,
        fields: RuleFields,
    ) -> Result<CategoryRule> {
        let conn = self.lock();

        if !SqliteStore::category_exists_in(&conn, category_id)? {
            return Err(BudgetError::UnknownCategory(category_id));
        }

        let key = identity_key(identity);
        conn.execute(
            "INSERT INTO category_rules (
                user_id, identity_key, merchant_group_id, pattern, normalized_pattern,
                category_id, confidence_score, usage_count, last_used, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(user_id, identity_key, category_id) DO UPDATE SET
                confidence_score = excluded.confidence_score,
                usage_count = excluded.usage_count,
                last_used = excluded.last_used",
            params![
                user_id,
                key,
                identity.group_id(),
                identity.pattern(),
                identity.normalized_pattern(),
                category_id,
                fields.confidence_score,
                fields.usage_count,
                fields.last_used.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        SqliteStore::rule_by_key(&conn, user_id, &key, category_id)?
            .ok_or(BudgetError::Database(rusqlite::Error::QueryReturnedNoRows))
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
        let conn = self.lock();

        if !SqliteStore::category_exists_in(&conn, category_id)? {
            return Err(BudgetError::UnknownCategory(category_id));
        }

        // the increment happens in SQL, so the stored row is the only source of truth
        let key = identity_key(identity);
        conn.execute(
            "INSERT INTO category_rules (
                user_id, identity_key, merchant_group_id, pattern, normalized_pattern,
                category_id, confidence_score, usage_count, last_used, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
            ON CONFLICT(user_id, identity_key, category_id) DO UPDATE SET
                usage_count = usage_count + 1,
                confidence_score = MIN(confidence_score + ?9, 100),
                last_used = excluded.last_used",
            params![
                user_id,
                key,
                identity.group_id(),
                identity.pattern(),
                identity.normalized_pattern(),
                category_id,
                initial_confidence.min(MAX_CONFIDENCE),
                now.to_rfc3339(),
                step,
            ],
        )?;

        SqliteStore::rule_by_key(&conn, user_id, &key, category_id)?
            .ok_or(BudgetError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    fn reassign_rule(
        &self,
        user_id: &str,
        rule_id: i64,
        category_id: i64,
        step: u8,
        now: DateTime<Utc>,
    ) -> Result<CategoryRule> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let moving = SqliteStore::rule_by_id(&tx, user_id, rule_id)?
            .ok_or(BudgetError::RuleNotFound(rule_id))?;
        if moving.category_id == category_id {
            return Ok(moving);
        }
        if !SqliteStore::category_exists_in(&tx, category_id)? {
            return Err(BudgetError::UnknownCategory(category_id));
        }

        let key = identity_key(&moving.identity);
        let kept_id = match SqliteStore::rule_by_key(&tx, user_id, &key, category_id)? {
            Some(sibling) => {
                let merged = sibling.merged_with(&moving, step, now);
                tx.execute(
                    "UPDATE category_rules SET usage_count = ?1, confidence_score = ?2, last_used = ?3
                     WHERE id = ?4",
                    params![
                        merged.usage_count,
                        merged.confidence_score,
                        merged.last_used.to_rfc3339(),
                        sibling.id
                    ],
                )?;
                tx.execute("DELETE FROM category_rules WHERE id = ?1", params![moving.id])?;
                info!(kept = sibling.id, deleted = moving.id, "rules merged");
                sibling.id
            }
            None => {
                tx.execute(
                    "UPDATE category_rules SET category_id = ?1 WHERE id = ?2",
                    params![category_id, moving.id],
                )?;
                moving.id
            }
        };

        let kept = SqliteStore::rule_by_id(&tx, user_id, kept_id)?
            .ok_or(BudgetError::RuleNotFound(kept_id))?;
        tx.commit()?;
        Ok(kept)
    }

    fn create_group(&self, user_id: &str, name: &str) -> Result<MerchantGroup> {
        let group = MerchantGroup::new(name);
        self.lock().execute(
            "INSERT INTO merchant_groups (id, user_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![group.id, user_id, group.name, group.created_at.to_rfc3339()],
        )?;
        Ok(group)
    }

    fn link_merchant(&self, user_id: &str, raw: &str, group_id: &str) -> Result<()> {
        let conn = self.lock();

        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM merchant_groups WHERE id = ?1 AND user_id = ?2",
            params![group_id, user_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(BudgetError::GroupNotFound(group_id.to_string()));
        }

        conn.execute(
            "INSERT INTO merchant_mappings (user_id, merchant_key, group_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, merchant_key) DO UPDATE SET group_id = excluded.group_id",
            params![user_id, merchant_key(raw), group_id],
        )?;
        Ok(())
    }

    fn list_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        self.query_rules("user_id = ?1", params![user_id])
    }

    fn delete_rule(&self, user_id: &str, rule_id: i64) -> Result<bool> {
        let deleted = self.lock().execute(
            "DELETE FROM category_rules WHERE id = ?1 AND user_id = ?2",
            params![rule_id, user_id],
        )?;
        Ok(deleted > 0)
    }

    fn category_exists(&self, category_id: i64) -> Result<bool> {
        SqliteStore::category_exists_in(&self.lock(), category_id)
    }
}

fn load_categories(conn: &Connection) -> Result<Vec<Category>> {
    let sql = format!("SELECT {} FROM categories ORDER BY id", CATEGORY_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let categories = stmt
        .query_map([], category_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

fn load_funding(conn: &Connection, month: BudgetMonth) -> Result<HashMap<i64, FundingProgress>> {
    let mut stmt =
        conn.prepare("SELECT category_id, funded, target FROM funding_progress WHERE month = ?1")?;
    let rows = stmt
        .query_map(params![month.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                FundingProgress {
                    funded: row.get(1)?,
                    target: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(rows)
}

impl CategoryProvider for SqliteStore {
    fn categories(&self) -> Result<Vec<Category>> {
        load_categories(&self.lock())
    }

    fn funding_progress(&self, month: BudgetMonth) -> Result<HashMap<i64, FundingProgress>> {
        load_funding(&self.lock(), month)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::allocate_from;
    use crate::classifier::{CallerContext, Classifier, MatchSource};
    use crate::entities::CategoryRef;

    fn store_with_categories() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_category(&Category::new(1, "Rent", CategoryType::MonthlyExpense, 200.0).with_priority(1))
            .unwrap();
        store
            .save_category(&Category::new(2, "Groceries", CategoryType::MonthlyExpense, 100.0).with_priority(2))
            .unwrap();
        store
            .save_category(&Category::new(3, "Household", CategoryType::Accumulation, 60.0).with_priority(3))
            .unwrap();
        store
    }

    fn ctx() -> CallerContext {
        CallerContext::new("user-1").unwrap()
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_category_round_trip() {
        let store = store_with_categories();
        let mut insurance = Category::new(9, "Insurance", CategoryType::Accumulation, 0.0);
        insurance.annual_target = Some(1200.0);
        insurance.is_goal = true;
        store.save_category(&insurance).unwrap();

        let loaded = store.get_category(9).unwrap().unwrap();
        assert_eq!(loaded, insurance);
        assert_eq!(store.categories().unwrap().len(), 4);
        assert!(store.get_category(404).unwrap().is_none());
    }

    #[test]
    fn test_unique_index_blocks_duplicate_rules() {
        let store = store_with_categories();
        let conn = store.lock();
        let now = Utc::now().to_rfc3339();

        let insert = "INSERT INTO category_rules (
                user_id, identity_key, pattern, normalized_pattern, category_id,
                confidence_score, usage_count, last_used, created_at
            ) VALUES ('u', 'p:kroger', 'Kroger', 'kroger', 2, 30, 1, ?1, ?1)";

        conn.execute(insert, params![now]).unwrap();
        let second = conn.execute(insert, params![now]);
        assert!(second.is_err());
    }

    #[test]
    fn test_learn_through_sqlite() {
        let classifier = Classifier::new(store_with_categories());

        for _ in 0..3 {
            classifier.learn(&ctx(), "Kroger #881", 2).unwrap();
        }
        classifier.learn(&ctx(), "KROGER 881", 2).unwrap();

        let rules = classifier.list_rules(&ctx()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].usage_count, 4);
        assert_eq!(rules[0].confidence_score, 45);
        assert_eq!(rules[0].identity, MerchantIdentity::Pattern("Kroger #881".to_string()));
    }

    #[test]
    fn test_learn_unknown_category_writes_nothing() {
        let classifier = Classifier::new(store_with_categories());

        let result = classifier.learn(&ctx(), "Kroger", 77);
        assert!(matches!(result, Err(BudgetError::UnknownCategory(77))));
        assert!(classifier.list_rules(&ctx()).unwrap().is_empty());
    }

    #[test]
    fn test_group_classification_through_sqlite() {
        let classifier = Classifier::new(store_with_categories());
        let group = classifier.create_merchant_group(&ctx(), "Walmart").unwrap();
        classifier
            .assign_merchant_to_group(&ctx(), "WALMART #4521", &group.id)
            .unwrap();

        let identity = MerchantIdentity::Group(group.id.clone());
        let fields = RuleFields {
            usage_count: 3,
            confidence_score: 80,
            last_used: Utc::now(),
        };
        classifier
            .store()
            .upsert_rule(ctx().user_id(), &identity, 3, fields)
            .unwrap();

        let valid = vec![
            CategoryRef::new(1, "Rent"),
            CategoryRef::new(2, "Groceries"),
            CategoryRef::new(3, "Household"),
        ];
        let result = classifier.classify(&ctx(), "WALMART #4521", &valid).unwrap().unwrap();

        assert_eq!(result.category_id, 3);
        assert!((result.confidence - 0.8).abs() < 1e-12);
        assert_eq!(result.source, MatchSource::Learned);
    }

    #[test]
    fn test_reassign_merge_is_atomic_and_unique() {
        let classifier = Classifier::new(store_with_categories());
        let a = classifier.learn(&ctx(), "Corner Deli", 1).unwrap();
        let b = classifier.learn(&ctx(), "Corner Deli", 2).unwrap();
        classifier.learn(&ctx(), "Corner Deli", 2).unwrap();

        let kept = classifier.reassign_rule_category(&ctx(), a.id, 2).unwrap();

        assert_eq!(kept.id, b.id);
        assert_eq!(kept.usage_count, 3);
        // max(30, 35) + 5
        assert_eq!(kept.confidence_score, 40);
        assert_eq!(classifier.list_rules(&ctx()).unwrap().len(), 1);
    }

    #[test]
    fn test_reassign_plain_update() {
        let classifier = Classifier::new(store_with_categories());
        let rule = classifier.learn(&ctx(), "Corner Deli", 1).unwrap();

        let moved = classifier.reassign_rule_category(&ctx(), rule.id, 3).unwrap();
        assert_eq!(moved.category_id, 3);
        assert!(matches!(
            classifier.reassign_rule_category(&ctx(), rule.id, 99),
            Err(BudgetError::UnknownCategory(99))
        ));
    }

    #[test]
    fn test_allocation_recorded() {
        let store = store_with_categories();
        let month = BudgetMonth::parse("2024-03").unwrap();

        // planning alone writes nothing
        let planned = allocate_from(&store, 250.0, month).unwrap();
        assert!(store.funding_progress(month).unwrap().is_empty());

        let result = store.allocate_and_record(250.0, month).unwrap();
        assert_eq!(result, planned);
        assert_eq!(result.plan_for(1).unwrap().allocated_amount, 200.0);
        assert_eq!(result.plan_for(2).unwrap().allocated_amount, 50.0);
        assert_eq!(result.plan_for(3).unwrap().allocated_amount, 0.0);

        let progress = store.funding_progress(month).unwrap();
        assert_eq!(progress[&1].funded, 200.0);
        assert_eq!(progress[&2].funded, 50.0);
        assert!(!progress.contains_key(&3));
        assert_eq!(store.get_category(2).unwrap().unwrap().current_balance, 50.0);

        // a second run only tops up what is still missing
        let again = store.allocate_and_record(100.0, month).unwrap();
        assert_eq!(again.plan_for(1).unwrap().allocated_amount, 0.0);
        assert_eq!(again.plan_for(2).unwrap().allocated_amount, 50.0);
        assert_eq!(again.plan_for(3).unwrap().allocated_amount, 50.0);
    }

    #[test]
    fn test_concurrent_allocation_runs_never_overfund() {
        let store = store_with_categories();
        let month = BudgetMonth::parse("2024-03").unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| store.allocate_and_record(300.0, month).unwrap());
            }
        });

        // targets: 200 + 100 + 60
        let progress = store.funding_progress(month).unwrap();
        assert_eq!(progress[&1].funded, 200.0);
        assert_eq!(progress[&2].funded, 100.0);
        assert_eq!(progress[&3].funded, 60.0);
        assert_eq!(store.get_category(3).unwrap().unwrap().current_balance, 60.0);
    }

    #[test]
    fn test_concurrent_learn_counts_every_confirmation() {
        let classifier = Classifier::new(store_with_categories());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        classifier.learn(&ctx(), "Kroger", 2).unwrap();
                    }
                });
            }
        });

        let rules = classifier.list_rules(&ctx()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].usage_count, 400);
        assert_eq!(rules[0].confidence_score, 100);
    }

    #[test]
    fn test_concurrent_reassign_leaves_one_rule() {
        let classifier = Classifier::new(store_with_categories());
        let a = classifier.learn(&ctx(), "Corner Deli", 1).unwrap();
        let b = classifier.learn(&ctx(), "Corner Deli", 2).unwrap();
        classifier.learn(&ctx(), "Corner Deli", 3).unwrap();

        std::thread::scope(|scope| {
            for rule_id in [a.id, b.id] {
                let classifier = &classifier;
                scope.spawn(move || classifier.reassign_rule_category(&ctx(), rule_id, 3).unwrap());
            }
        });

        let rules = classifier.list_rules(&ctx()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category_id, 3);
        assert_eq!(rules[0].usage_count, 3);
        assert_eq!(rules[0].confidence_score, 40);
    }

    #[test]
    fn test_concurrent_postings_all_land() {
        let store = store_with_categories();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        store.post_transaction(2, 1.0, PostingKind::Income).unwrap();
                    }
                });
            }
        });

        assert_eq!(store.get_category(2).unwrap().unwrap().current_balance, 100.0);
    }

    #[test]
    fn test_ytd_funded_and_posting() {
        let store = store_with_categories();
        for (m, funded) in [("2023-12", 999.0), ("2024-01", 60.0), ("2024-02", 40.0), ("2024-05", 10.0)] {
            store
                .set_funding(BudgetMonth::parse(m).unwrap(), 3, FundingProgress { funded, target: 60.0 })
                .unwrap();
        }

        let march = BudgetMonth::parse("2024-03").unwrap();
        assert_eq!(store.ytd_funded(3, march).unwrap(), 100.0);

        let balance = store.post_transaction(2, 30.0, PostingKind::Income).unwrap();
        assert_eq!(balance, 30.0);
        let balance = store.post_transaction(2, -45.5, PostingKind::Expense).unwrap();
        assert_eq!(balance, -15.5);
        assert!(store.post_transaction(404, 1.0, PostingKind::Income).is_err());
    }
}
