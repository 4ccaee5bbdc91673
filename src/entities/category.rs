// 🏷️ Category Entity - Envelope budget buckets
//
// Each category is an envelope with its own running balance.
// The category type decides how its monthly funding target accrues:
// - MonthlyExpense: a flat amount every month (rent, groceries)
// - Accumulation: an annual amount spread over 12 months (insurance, gifts)
// - TargetBalance: fill up to a balance, then stop (emergency fund)

use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const HIGHEST_PRIORITY: u8 = 1;
pub const LOWEST_PRIORITY: u8 = 10;

// ============================================================================
// CATEGORY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    /// Fixed amount every month
    #[default]
    MonthlyExpense,

    /// Annual target accrued in twelfths
    Accumulation,

    /// Fill up to a target balance
    TargetBalance,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::MonthlyExpense => "monthly_expense",
            CategoryType::Accumulation => "accumulation",
            CategoryType::TargetBalance => "target_balance",
        }
    }

    pub fn parse(s: &str) -> Option<CategoryType> {
        match s {
            "monthly_expense" => Some(CategoryType::MonthlyExpense),
            "accumulation" => Some(CategoryType::Accumulation),
            "target_balance" => Some(CategoryType::TargetBalance),
            _ => None,
        }
    }
}

/// Direction of a posted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingKind {
    Expense,
    Income,
}

impl PostingKind {
    /// Balance delta of a posting: expenses subtract, income adds
    pub fn signed_amount(self, amount: f64) -> f64 {
        match self {
            PostingKind::Expense => -amount.abs(),
            PostingKind::Income => amount.abs(),
        }
    }
}

// ============================================================================
// CATEGORY ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,

    pub name: String,

    #[serde(default, deserialize_with = "blank_as_default")]
    pub category_type: CategoryType,

    /// 1 = highest, 10 = lowest
    #[serde(default = "default_priority", deserialize_with = "clamped_priority")]
    pub priority: u8,

    /// Plain monthly target (fallback for every type)
    #[serde(default, deserialize_with = "blank_as_default")]
    pub monthly_amount: f64,

    /// Explicit per-month target for monthly expenses
    #[serde(default)]
    pub monthly_target: Option<f64>,

    /// Accumulation only; defaults to monthly_amount * 12
    #[serde(default)]
    pub annual_target: Option<f64>,

    /// TargetBalance only
    #[serde(default)]
    pub target_balance: Option<f64>,

    /// Running envelope balance
    #[serde(default, deserialize_with = "blank_as_default")]
    pub current_balance: f64,

    // Flags that exclude a category from allocation
    #[serde(default, deserialize_with = "blank_as_default")]
    pub is_system: bool,
    #[serde(default, deserialize_with = "blank_as_default")]
    pub is_buffer: bool,
    #[serde(default, deserialize_with = "blank_as_default")]
    pub is_goal: bool,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

// Blank CSV cells / JSON nulls fall back to the default like absent fields do
fn blank_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn clamped_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u8>::deserialize(deserializer)?
        .unwrap_or(DEFAULT_PRIORITY)
        .clamp(HIGHEST_PRIORITY, LOWEST_PRIORITY))
}

impl Category {
    /// Create a category with default priority and zero balance
    pub fn new(id: i64, name: &str, category_type: CategoryType, monthly_amount: f64) -> Self {
        Category {
            id,
            name: name.to_string(),
            category_type,
            priority: DEFAULT_PRIORITY,
            monthly_amount,
            monthly_target: None,
            annual_target: None,
            target_balance: None,
            current_balance: 0.0,
            is_system: false,
            is_buffer: false,
            is_goal: false,
        }
    }

    /// Builder-style priority setter, clamped to 1..=10
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(HIGHEST_PRIORITY, LOWEST_PRIORITY);
        self
    }

    /// Annual target for accumulation categories
    pub fn annual_target_or_default(&self) -> f64 {
        self.annual_target.unwrap_or(self.monthly_amount * 12.0)
    }

    /// Whether the allocator should consider this category at all
    pub fn is_allocatable(&self) -> bool {
        !(self.is_system || self.is_goal || self.is_buffer)
    }

    /// Post a transaction against the envelope
    pub fn post_transaction(&mut self, amount: f64, kind: PostingKind) {
        self.current_balance += kind.signed_amount(amount);
    }

    /// Add allocated funds to the envelope
    pub fn apply_allocation(&mut self, allocated: f64) {
        if allocated.is_finite() && allocated > 0.0 {
            self.current_balance += allocated;
        }
    }

    pub fn to_ref(&self) -> CategoryRef {
        CategoryRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Minimal id + name view of a category, used by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: i64,
    pub name: String,
}

impl CategoryRef {
    pub fn new(id: i64, name: &str) -> Self {
        CategoryRef {
            id,
            name: name.to_string(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
