//! Staging records
//!
//! One per input row, created once and mutated only by pipeline stages.
//! Records are never deleted; terminal rows are retained for audit.

use crate::pipeline::types::FieldError;
use prociq_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Record lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Awaiting processing (or re-processing after retry)
    Pending,
    /// Hard validation error; excluded from resolution and commit
    Invalid,
    /// All references resolved; ready for commit
    Resolved,
    /// At least one reference awaits human conflict resolution
    NeedsReview,
    /// Facts persisted; terminal
    Committed,
    /// Store failure or timeout during processing; retryable
    Errored,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Invalid => "invalid",
            Self::Resolved => "resolved",
            Self::NeedsReview => "needs_review",
            Self::Committed => "committed",
            Self::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "invalid" => Ok(Self::Invalid),
            "resolved" => Ok(Self::Resolved),
            "needs_review" => Ok(Self::NeedsReview),
            "committed" => Ok(Self::Committed),
            "errored" => Ok(Self::Errored),
            other => Err(Error::Parse(format!("Unknown record status: {}", other))),
        }
    }

    /// Terminal for progress reporting: the batch aggregate is only
    /// meaningful once every record is terminal or parked in review
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            Self::Invalid | Self::Committed | Self::Errored | Self::NeedsReview
        )
    }
}

/// One raw input row tracked through the pipeline state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// 1-based position within the upload
    pub line_number: i64,
    /// Ordered raw column name → raw value pairs, exactly as uploaded
    pub raw_fields: Vec<(String, String)>,
    /// Canonical field name → raw value, after schema mapping
    pub normalized_fields: BTreeMap<String, String>,
    pub validation_errors: Vec<FieldError>,
    pub status: RecordStatus,
    /// Failure reason when status is errored
    pub error_reason: Option<String>,
}

impl StagingRecord {
    pub fn new(batch_id: Uuid, line_number: i64, raw_fields: Vec<(String, String)>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            line_number,
            raw_fields,
            normalized_fields: BTreeMap::new(),
            validation_errors: Vec::new(),
            status: RecordStatus::Pending,
            error_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            RecordStatus::Pending,
            RecordStatus::Invalid,
            RecordStatus::Resolved,
            RecordStatus::NeedsReview,
            RecordStatus::Committed,
            RecordStatus::Errored,
        ] {
            assert_eq!(RecordStatus::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn test_settled_statuses() {
        assert!(RecordStatus::Committed.is_settled());
        assert!(RecordStatus::Invalid.is_settled());
        assert!(RecordStatus::Errored.is_settled());
        assert!(RecordStatus::NeedsReview.is_settled());
        assert!(!RecordStatus::Pending.is_settled());
        assert!(!RecordStatus::Resolved.is_settled());
    }
}
