// 📅 Budget Month - the unit of funding
//
// Stored as the first day of the month so it orders and hashes naturally.
// Text form is "YYYY-MM".

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{BudgetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BudgetMonth(NaiveDate);

impl BudgetMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(BudgetMonth)
    }

    /// Parse "YYYY-MM" (a trailing "-DD" is accepted and ignored)
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || BudgetError::InvalidMonth(s.to_string());
        let mut parts = s.trim().splitn(3, '-');

        let year: i32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let month: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;

        BudgetMonth::new(year, month).ok_or_else(invalid)
    }

    pub fn current() -> Self {
        BudgetMonth::containing(Utc::now().date_naive())
    }

    pub fn containing(date: NaiveDate) -> Self {
        BudgetMonth(date.with_day(1).unwrap_or(date))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// Calendar month number, 1..=12
    pub fn month_number(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for BudgetMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.0.year(), self.0.month())
    }
}

impl Serialize for BudgetMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BudgetMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BudgetMonth::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let month = BudgetMonth::parse("2024-03").unwrap();
        assert_eq!(month.year(), 2024);
        assert_eq!(month.month_number(), 3);
        assert_eq!(month.to_string(), "2024-03");

        let with_day = BudgetMonth::parse("2024-11-27").unwrap();
        assert_eq!(with_day.to_string(), "2024-11");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "2024", "2024-13", "2024-00", "march", "24-xx"] {
            assert!(
                matches!(BudgetMonth::parse(bad), Err(BudgetError::InvalidMonth(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_containing() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 19).unwrap();
        assert_eq!(BudgetMonth::containing(date), BudgetMonth::new(2024, 7).unwrap());
    }

    #[test]
    fn test_serde_as_string() {
        let month = BudgetMonth::new(2025, 1).unwrap();
        let json = serde_json::to_string(&month).unwrap();
        assert_eq!(json, "\"2025-01\"");

        let back: BudgetMonth = serde_json::from_str(&json).unwrap();
        assert_eq!(back, month);
    }
}
