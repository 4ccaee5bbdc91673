// ⚠️ Error taxonomy for the budgeting core
//
// Caller precondition errors abort with nothing written.
// "No suggestion" is never an error - it is Option::None.
// Store errors pass through unmodified.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BudgetError {
    /// No authenticated caller (blank or absent user id)
    #[error("missing caller context: an authenticated user id is required")]
    MissingContext,

    /// Merchant string normalizes to nothing
    #[error("merchant string is empty after normalization")]
    EmptyMerchant,

    #[error("category not found: {0}")]
    UnknownCategory(i64),

    #[error("rule not found: {0}")]
    RuleNotFound(i64),

    #[error("merchant group not found: {0}")]
    GroupNotFound(String),

    #[error("invalid month '{0}' (expected YYYY-MM)")]
    InvalidMonth(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BudgetError {
    /// True for errors caused by the caller's input rather than the store
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            BudgetError::MissingContext
                | BudgetError::EmptyMerchant
                | BudgetError::UnknownCategory(_)
                | BudgetError::RuleNotFound(_)
                | BudgetError::GroupNotFound(_)
                | BudgetError::InvalidMonth(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BudgetError>;
