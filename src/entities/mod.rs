// Entity Models
// Categories (envelopes), merchant identities, and learned category rules

pub mod category;
pub mod merchant;
pub mod rule;

pub use category::{Category, CategoryRef, CategoryType, PostingKind};
pub use merchant::{merchant_key, MerchantGroup, MerchantIdentity};
pub use rule::{bump_confidence, CategoryRule, RuleFields};
