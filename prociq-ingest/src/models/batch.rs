//! Staging batch state machine
//!
//! A batch progresses pending → mapping → resolving → committing →
//! completed, or fails at any point. Transitions are monotonic; the only
//! backward edge is explicit retry-from-failed, which re-enters at mapping.

use chrono::{DateTime, Utc};
use prociq_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, rows staged, not yet processed
    Pending,
    /// Schema mapping + validation in progress
    Mapping,
    /// Entity resolution + quality scoring in progress
    Resolving,
    /// Per-record commit in progress
    Committing,
    /// Pipeline pass finished (open conflicts may remain)
    Completed,
    /// Infrastructure failure or operator cancellation; retryable
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Mapping => "mapping",
            Self::Resolving => "resolving",
            Self::Committing => "committing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "mapping" => Ok(Self::Mapping),
            "resolving" => Ok(Self::Resolving),
            "committing" => Ok(Self::Committing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Parse(format!("Unknown batch status: {}", other))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the forward progression (Failed is reachable from
    /// anywhere and compares as terminal)
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Mapping => 1,
            Self::Resolving => 2,
            Self::Committing => 3,
            Self::Completed => 4,
            Self::Failed => 5,
        }
    }

    /// Whether a transition to `next` is permitted
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        if self == Self::Failed {
            // Only retry re-entry leaves Failed
            return next == Self::Mapping;
        }
        if next == Self::Failed {
            return !self.is_terminal();
        }
        next.rank() > self.rank()
    }
}

/// One staged upload, owned by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingBatch {
    pub id: Uuid,
    pub upload_ref: String,
    pub organization_id: Uuid,
    /// SHA-256 over the upload reference plus ordered raw rows; unique per
    /// organization, making batch creation idempotent for re-sent uploads
    pub upload_fingerprint: String,
    /// Declared source column headers, in order
    pub source_headers: Vec<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl StagingBatch {
    pub fn new(
        organization_id: Uuid,
        upload_ref: String,
        upload_fingerprint: String,
        source_headers: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            upload_ref,
            organization_id,
            upload_fingerprint,
            source_headers,
            status: BatchStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
        }
    }

    /// Transition to a new status, enforcing monotonicity
    pub fn transition_to(&mut self, next: BatchStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidInput(format!(
                "Illegal batch transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        tracing::info!(
            batch_id = %self.id,
            from = self.status.as_str(),
            to = next.as_str(),
            "Batch state transition"
        );
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        } else {
            self.completed_at = None;
        }
        Ok(())
    }
}

/// Per-batch report: counts by record status plus the quality aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub record_counts: BTreeMap<String, i64>,
    pub quality: Option<super::quality::BatchQualitySummary>,
    pub failure_reason: Option<String>,
}
