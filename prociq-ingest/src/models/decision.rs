//! Match decisions
//!
//! One decision per (staging record, entity type) pair. Decisions are
//! immutable once final, with a single sanctioned amendment: a
//! `CreatedNew` decision that loses the catalog insert race is rewritten
//! to `AutoMatched` against the winning entry by the commit engine.

use crate::models::EntryType;
use chrono::{DateTime, Utc};
use prociq_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a reference was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Score reached the auto-match threshold
    AutoMatched,
    /// A human selected the entry via the conflict queue
    ManuallyMatched,
    /// No plausible match; a new catalog entry is (to be) created
    CreatedNew,
    /// Placeholder while the reference sits in the conflict queue
    PendingReview,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoMatched => "auto_matched",
            Self::ManuallyMatched => "manually_matched",
            Self::CreatedNew => "created_new",
            Self::PendingReview => "pending_review",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "auto_matched" => Ok(Self::AutoMatched),
            "manually_matched" => Ok(Self::ManuallyMatched),
            "created_new" => Ok(Self::CreatedNew),
            "pending_review" => Ok(Self::PendingReview),
            other => Err(Error::Parse(format!("Unknown resolution: {}", other))),
        }
    }

    /// Final decisions admit the record to the commit engine
    pub fn is_final(self) -> bool {
        self != Self::PendingReview
    }
}

/// Resolution decision for one reference of one staging record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDecision {
    pub staging_record_id: Uuid,
    pub entity_type: EntryType,
    pub resolution: Resolution,
    /// Resolved catalog entry. None for `CreatedNew` until the commit
    /// engine inserts the entry, and always None for `PendingReview`.
    pub resolved_entity_id: Option<Uuid>,
    /// For `CreatedNew`: the display name and normalized key the commit
    /// engine will insert
    pub proposed_name: Option<String>,
    pub proposed_key: Option<String>,
    /// "pipeline" or the reviewing user's identifier
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
}

impl MatchDecision {
    pub fn auto_matched(record_id: Uuid, entity_type: EntryType, entry_id: Uuid) -> Self {
        Self {
            staging_record_id: record_id,
            entity_type,
            resolution: Resolution::AutoMatched,
            resolved_entity_id: Some(entry_id),
            proposed_name: None,
            proposed_key: None,
            resolved_by: "pipeline".to_string(),
            resolved_at: Utc::now(),
        }
    }

    pub fn created_new(
        record_id: Uuid,
        entity_type: EntryType,
        proposed_name: String,
        proposed_key: String,
    ) -> Self {
        Self {
            staging_record_id: record_id,
            entity_type,
            resolution: Resolution::CreatedNew,
            resolved_entity_id: None,
            proposed_name: Some(proposed_name),
            proposed_key: Some(proposed_key),
            resolved_by: "pipeline".to_string(),
            resolved_at: Utc::now(),
        }
    }

    pub fn pending_review(record_id: Uuid, entity_type: EntryType) -> Self {
        Self {
            staging_record_id: record_id,
            entity_type,
            resolution: Resolution::PendingReview,
            resolved_entity_id: None,
            proposed_name: None,
            proposed_key: None,
            resolved_by: "pipeline".to_string(),
            resolved_at: Utc::now(),
        }
    }

    pub fn manually_matched(
        record_id: Uuid,
        entity_type: EntryType,
        entry_id: Uuid,
        resolved_by: String,
    ) -> Self {
        Self {
            staging_record_id: record_id,
            entity_type,
            resolution: Resolution::ManuallyMatched,
            resolved_entity_id: Some(entry_id),
            proposed_name: None,
            proposed_key: None,
            resolved_by,
            resolved_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_review_is_not_final() {
        assert!(!Resolution::PendingReview.is_final());
        assert!(Resolution::AutoMatched.is_final());
        assert!(Resolution::ManuallyMatched.is_final());
        assert!(Resolution::CreatedNew.is_final());
    }

    #[test]
    fn test_resolution_round_trip() {
        for r in [
            Resolution::AutoMatched,
            Resolution::ManuallyMatched,
            Resolution::CreatedNew,
            Resolution::PendingReview,
        ] {
            assert_eq!(Resolution::parse(r.as_str()).unwrap(), r);
        }
    }
}
