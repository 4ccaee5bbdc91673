// ⚙️ Configuration - JSON file + environment overrides
//
// Lookup order: $ENVELOPE_CONFIG, then ./envelope.json, then defaults.
// ENVELOPE_DB / ENVELOPE_ADDR / ENVELOPE_USER override single fields.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::keywords::{KeywordTable, KEYWORD_CONFIDENCE};

pub const CONFIG_ENV: &str = "ENVELOPE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "envelope.json";

/// Thresholds and starting values of the merchant classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Learned matches below this are only used when no keyword matches
    pub learned_threshold: f64,

    /// Minimum similarity for a pattern rule to qualify
    pub similarity_threshold: f64,

    pub keyword_confidence: f64,

    /// Starting confidence of a rule learned for a merchant group
    pub group_initial_confidence: u8,

    /// Starting confidence of a rule learned for a raw pattern
    pub pattern_initial_confidence: u8,

    /// Confidence gained per confirmation / merge
    pub reinforcement_step: u8,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            learned_threshold: 0.5,
            similarity_threshold: 0.7,
            keyword_confidence: KEYWORD_CONFIDENCE,
            group_initial_confidence: 50,
            pattern_initial_confidence: 30,
            reinforcement_step: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,

    /// JSON keyword table; built-in defaults when absent
    pub keyword_table_path: Option<PathBuf>,

    pub server_addr: String,

    /// User the CLI acts as
    pub user_id: String,

    pub classifier: ClassifierConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("envelope.db"),
            keyword_table_path: None,
            server_addr: "0.0.0.0:3000".to_string(),
            user_id: "local".to_string(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read a config file (missing fields fall back to defaults)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Resolve config from the environment
    pub fn load() -> Result<Self> {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) => AppConfig::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                AppConfig::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => AppConfig::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Apply single-field overrides from a key lookup (the process env in practice)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup("ENVELOPE_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(addr) = lookup("ENVELOPE_ADDR") {
            self.server_addr = addr;
        }
        if let Some(user) = lookup("ENVELOPE_USER") {
            self.user_id = user;
        }
    }

    pub fn keyword_table(&self) -> Result<KeywordTable> {
        match &self.keyword_table_path {
            Some(path) => KeywordTable::from_file(path),
            None => Ok(KeywordTable::with_defaults()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database_path, PathBuf::from("envelope.db"));
        assert_eq!(config.classifier.learned_threshold, 0.5);
        assert_eq!(config.classifier.similarity_threshold, 0.7);
        assert_eq!(config.classifier.group_initial_confidence, 50);
        assert_eq!(config.classifier.pattern_initial_confidence, 30);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"server_addr": "127.0.0.1:8080", "classifier": {"similarity_threshold": 0.8}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.server_addr, "127.0.0.1:8080");
        assert_eq!(config.classifier.similarity_threshold, 0.8);
        assert_eq!(config.classifier.reinforcement_step, 5);
        assert_eq!(config.user_id, "local");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("ENVELOPE_DB", "/tmp/budget.db"), ("ENVELOPE_USER", "alex")]
            .into_iter()
            .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_path, PathBuf::from("/tmp/budget.db"));
        assert_eq!(config.user_id, "alex");
        assert_eq!(config.server_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_from_file() {
        let path = env::temp_dir().join(format!("envelope-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{"database_path": "x.db"}"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.database_path, PathBuf::from("x.db"));
        assert!(config.keyword_table().unwrap().len() > 5);

        fs::remove_file(&path).unwrap();
    }
}
