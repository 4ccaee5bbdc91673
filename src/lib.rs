// Envelope Budget - Core Library
// Merchant classifier + priority allocator, shared by the CLI and API server

pub mod allocator;
pub mod classifier;
pub mod config;
pub mod entities;
pub mod error;
pub mod import;
pub mod keywords;
pub mod matching;
pub mod month;
pub mod store;

// Re-export commonly used types
pub use allocator::{
    allocate_from, compute_catch_up_amount, compute_smart_allocation,
    AllocationPlan, AllocationResult, FundingProgress,
};
pub use classifier::{
    BatchLearnReport, CallerContext, ClassificationResult, Classifier, MatchSource,
};
pub use config::{AppConfig, ClassifierConfig};
pub use entities::{
    Category, CategoryRef, CategoryRule, CategoryType, MerchantGroup, MerchantIdentity,
    PostingKind,
};
pub use error::{BudgetError, Result};
pub use import::{load_categories_csv, load_training_csv, TrainingRow};
pub use keywords::{KeywordEntry, KeywordTable};
pub use matching::{normalize, similarity_score};
pub use month::BudgetMonth;
pub use store::{CategoryProvider, MemoryRuleStore, RuleStore, SqliteStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
