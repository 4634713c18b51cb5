//! Conflict queue entries
//!
//! One entry per (staging record, entity type) reference whose resolution
//! landed in the review band. Entries stay open until a human resolves
//! them; there is no timeout-driven auto-resolution, and an open entry
//! simply leaves its record uncommitted.

use crate::models::EntryType;
use crate::pipeline::types::MatchCandidate;
use chrono::{DateTime, Utc};
use prociq_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            other => Err(Error::Parse(format!("Unknown conflict status: {}", other))),
        }
    }
}

/// Durable queue entry awaiting a human decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub id: Uuid,
    pub staging_record_id: Uuid,
    pub entity_type: EntryType,
    /// The raw display name under review (shown alongside candidates)
    pub input_name: String,
    /// Candidates in the review band, ranked by score descending
    pub candidates: Vec<MatchCandidate>,
    pub status: ConflictStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictEntry {
    pub fn new(
        staging_record_id: Uuid,
        entity_type: EntryType,
        input_name: String,
        candidates: Vec<MatchCandidate>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            staging_record_id,
            entity_type,
            input_name,
            candidates,
            status: ConflictStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Human decision submitted for one conflict entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Match the reference to an existing catalog entry
    UseExisting { catalog_entry_id: Uuid },
    /// Create a new catalog entry from the input name
    CreateNew,
}
