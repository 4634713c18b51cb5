//! Catalog entries: deduplicated suppliers and materials
//!
//! `normalized_key` is unique per (organization, type) at the database
//! level; that constraint is the concurrency-safety anchor for the whole
//! pipeline.

use chrono::{DateTime, Utc};
use prociq_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Supplier,
    Material,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supplier => "supplier",
            Self::Material => "material",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "supplier" => Ok(Self::Supplier),
            "material" => Ok(Self::Material),
            other => Err(Error::Parse(format!("Unknown entry type: {}", other))),
        }
    }
}

/// Auxiliary identifying attributes carried on a catalog entry
///
/// An exact match on tax id, registration number, or material code
/// overrides name-based similarity during resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl EntryAttributes {
    pub fn is_empty(&self) -> bool {
        self.tax_id.is_none()
            && self.registration_number.is_none()
            && self.material_code.is_none()
            && self.unit.is_none()
    }

    /// Exact auxiliary-identifier equality against another attribute set
    pub fn identifier_matches(&self, other: &EntryAttributes) -> bool {
        fn eq(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if !x.trim().is_empty() && x.trim() == y.trim())
        }
        eq(&self.tax_id, &other.tax_id)
            || eq(&self.registration_number, &other.registration_number)
            || eq(&self.material_code, &other.material_code)
    }
}

/// A persisted, deduplicated supplier or material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub entry_type: EntryType,
    pub canonical_name: String,
    pub normalized_key: String,
    pub attributes: EntryAttributes,
    pub created_at: DateTime<Utc>,
    /// Touched on every successful match; backs the most-recently-used
    /// tie-break during resolution
    pub last_matched_at: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    pub fn new(
        organization_id: Uuid,
        entry_type: EntryType,
        canonical_name: String,
        normalized_key: String,
        attributes: EntryAttributes,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            entry_type,
            canonical_name,
            normalized_key,
            attributes,
            created_at: Utc::now(),
            last_matched_at: None,
        }
    }
}
