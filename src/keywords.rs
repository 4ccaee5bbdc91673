// 🔑 Keyword Table - static fallback when no learned rule applies
//
// Maps category-name fragments ("groceries") to merchant keywords
// ("walmart", "kroger", ...). Injectable, so it can be localized or
// extended from a JSON file without touching the matching algorithm.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::entities::CategoryRef;
use crate::error::Result;
use crate::matching::normalize;

/// Confidence reported for every keyword suggestion
pub const KEYWORD_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordEntry {
    /// Substring of a category name (case-insensitive)
    pub category: String,

    /// Merchant words (or word prefixes) that point at that category
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSuggestion {
    pub category_id: i64,
    pub keyword: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeywordTable {
    entries: Vec<KeywordEntry>,
}

impl KeywordTable {
    pub fn new() -> Self {
        KeywordTable { entries: Vec::new() }
    }

    /// Build a table from entries; fragments are lowercased, keywords normalized
    pub fn from_entries(entries: Vec<KeywordEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| KeywordEntry {
                category: entry.category.trim().to_lowercase(),
                keywords: entry
                    .keywords
                    .into_iter()
                    .map(|k| normalize(&k))
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .filter(|entry| !entry.category.is_empty())
            .collect();

        KeywordTable { entries }
    }

    /// Load a table from a JSON file: `[{"category": "...", "keywords": [...]}]`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let entries: Vec<KeywordEntry> = serde_json::from_str(&content)?;
        Ok(KeywordTable::from_entries(entries))
    }

    /// Add (or extend) an entry
    pub fn add(&mut self, category: &str, keywords: &[&str]) {
        let fragment = category.trim().to_lowercase();
        let keywords = keywords
            .iter()
            .map(|k| normalize(k))
            .filter(|k| !k.is_empty());

        match self.entries.iter_mut().find(|e| e.category == fragment) {
            Some(entry) => entry.keywords.extend(keywords),
            None => self.entries.push(KeywordEntry {
                category: fragment,
                keywords: keywords.collect(),
            }),
        }
    }

    pub fn entries(&self) -> &[KeywordEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Suggest a category for a merchant
    ///
    /// Entries are tried in order. An entry applies only if one of the given
    /// categories has a name containing the entry's fragment; the first
    /// keyword that starts at a word boundary of the normalized merchant wins
    /// ("bp" matches "BP #4411" but not "SUBPAR", "mcdonald" matches "MCDONALDS").
    pub fn suggest(&self, merchant: &str, categories: &[CategoryRef]) -> Option<KeywordSuggestion> {
        let haystack = format!(" {}", normalize(merchant));

        for entry in &self.entries {
            let Some(category) = categories
                .iter()
                .find(|c| c.name.to_lowercase().contains(&entry.category))
            else {
                continue;
            };

            if let Some(keyword) = entry
                .keywords
                .iter()
                .find(|k| haystack.contains(&format!(" {}", k)))
            {
                return Some(KeywordSuggestion {
                    category_id: category.id,
                    keyword: keyword.clone(),
                });
            }
        }

        None
    }

    /// Built-in table for common US merchants
    pub fn with_defaults() -> Self {
        let mut table = KeywordTable::new();
        table.add(
            "groceries",
            &[
                "walmart", "kroger", "safeway", "whole foods", "trader joe", "aldi",
                "publix", "costco", "heb", "wegmans", "grocery", "market",
            ],
        );
        table.add(
            "restaurant",
            &[
                "restaurant", "pizza", "burger", "mcdonald", "starbucks", "chipotle",
                "subway", "taco", "cafe", "coffee", "grill", "diner", "doordash",
                "grubhub", "uber eats",
            ],
        );
        table.add(
            "gas",
            &["shell", "chevron", "exxon", "mobil", "bp", "texaco", "fuel", "gas station"],
        );
        table.add(
            "transportation",
            &["uber", "lyft", "transit", "parking", "toll", "metro"],
        );
        table.add(
            "utilities",
            &["electric", "water", "power", "energy", "comcast", "xfinity", "verizon", "at&t"],
        );
        table.add(
            "entertainment",
            &["netflix", "spotify", "hulu", "disney", "cinema", "theater", "steam"],
        );
        table.add(
            "shopping",
            &["amazon", "target", "best buy", "ebay", "etsy", "ikea"],
        );
        table.add(
            "health",
            &["pharmacy", "cvs", "walgreens", "doctor", "dental", "clinic", "hospital"],
        );
        table.add("housing", &["rent", "mortgage", "hoa", "property management"]);
        table.add("subscription", &["subscription", "membership", "patreon"]);
        table
    }
}

// ============================================================================
// TESTS
// ============================================================================
