//! Core data models for the audit pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Category =================
//

/// Query category assigned by the classify stage.
///
/// `General` doubles as the no-fetch sentinel: a record carrying it never
/// touches the data connectors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Database,
    Filesystem,
    General,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Database, Category::Filesystem, Category::General];

    /// Parse a raw model reply into a category.
    ///
    /// Trims whitespace and upper-cases before matching; anything outside
    /// the vocabulary is `None`.
    pub fn parse(raw: &str) -> Option<Category> {
        match raw.trim().to_uppercase().as_str() {
            "DATABASE" => Some(Category::Database),
            "FILESYSTEM" => Some(Category::Filesystem),
            "GENERAL" => Some(Category::General),
            _ => None,
        }
    }

    pub fn requires_fetch(&self) -> bool {
        !matches!(self, Category::General)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Database => "DATABASE",
            Category::Filesystem => "FILESYSTEM",
            Category::General => "GENERAL",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Audit Data =================
//

/// The two named fields merged by the data aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditData {
    pub transactions: String,
    pub rules: String,
}

impl AuditData {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.rules.is_empty()
    }
}

//
// ================= Audit Record =================
//

/// The single record threaded through the pipeline.
///
/// Created with all fields at their defaults, then written exactly once per
/// field by the owning stage. Discarded after the caller consumes
/// `final_output`; nothing is persisted across invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: Uuid,
    pub query: String,
    pub category: Category,
    pub raw_data: AuditData,
    pub report: String,
    pub form_prepared: bool,
    pub final_output: String,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query: query.into(),
            category: Category::General,
            raw_data: AuditData::default(),
            report: String::new(),
            form_prepared: false,
            final_output: String::new(),
            created_at: Utc::now(),
        }
    }
}

//
// ================= Stage Outcome =================
//

/// Result of a fail-open stage.
///
/// `Degraded` carries the substitute value together with the reason the
/// primary path was abandoned. Fatal failures use the `Err` arm of the
/// surrounding `Result` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Ok(T),
    Degraded { value: T, reason: String },
}

impl<T> StageOutcome<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        StageOutcome::Degraded {
            value,
            reason: reason.into(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StageOutcome::Degraded { .. })
    }

    pub fn into_value(self) -> T {
        match self {
            StageOutcome::Ok(value) => value,
            StageOutcome::Degraded { value, .. } => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_normalizes() {
        assert_eq!(Category::parse("DATABASE"), Some(Category::Database));
        assert_eq!(Category::parse("  database \n"), Some(Category::Database));
        assert_eq!(Category::parse("Filesystem"), Some(Category::Filesystem));
        assert_eq!(Category::parse("general"), Some(Category::General));
    }

    #[test]
    fn test_category_parse_rejects_unknown_words() {
        assert_eq!(Category::parse("HARDWARE"), None);
        assert_eq!(Category::parse(""), None);
        assert_eq!(Category::parse("DATABASE or FILESYSTEM"), None);
    }

    #[test]
    fn test_category_serializes_uppercase() {
        let json = serde_json::to_string(&Category::Database).unwrap();
        assert_eq!(json, "\"DATABASE\"");
    }

    #[test]
    fn test_only_general_skips_fetch() {
        assert!(Category::Database.requires_fetch());
        assert!(Category::Filesystem.requires_fetch());
        assert!(!Category::General.requires_fetch());
    }

    #[test]
    fn test_audit_data_empty_requires_both_fields_empty() {
        assert!(AuditData::default().is_empty());

        let partial = AuditData {
            transactions: "row".to_string(),
            rules: String::new(),
        };
        assert!(!partial.is_empty());
    }

    #[test]
    fn test_new_record_defaults() {
        let record = AuditRecord::new("Check my expenses");
        assert_eq!(record.query, "Check my expenses");
        assert_eq!(record.category, Category::General);
        assert!(record.raw_data.is_empty());
        assert!(record.report.is_empty());
        assert!(!record.form_prepared);
        assert!(record.final_output.is_empty());
    }

    #[test]
    fn test_stage_outcome_accessors() {
        let ok: StageOutcome<u32> = StageOutcome::Ok(7);
        assert!(!ok.is_degraded());
        assert_eq!(ok.into_value(), 7);

        let degraded = StageOutcome::degraded(0u32, "fell back");
        assert!(degraded.is_degraded());
        assert_eq!(degraded.into_value(), 0);
    }
}
