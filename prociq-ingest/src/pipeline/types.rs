// Shared types and data contracts between pipeline stages
//
// Each stage consumes and produces these explicit contracts: the schema
// mapper emits a MappedRow, the validator a ValidationOutcome, the resolver
// a ResolutionOutcome per reference. Keeping the contracts in one module
// keeps stage boundaries analyzable and independently testable.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Canonical Fields
// ============================================================================

/// Canonical business attribute that source columns are mapped onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    SupplierName,
    SupplierTaxId,
    MaterialName,
    MaterialCode,
    Quantity,
    UnitPrice,
    TotalPrice,
    Currency,
    OrderDate,
    DeliveryDate,
    Unit,
    PoNumber,
}

impl CanonicalField {
    /// All defined canonical fields, in declaration order (mapping
    /// tie-breaks and completeness scoring depend on this order being
    /// stable)
    pub const ALL: [CanonicalField; 12] = [
        CanonicalField::SupplierName,
        CanonicalField::SupplierTaxId,
        CanonicalField::MaterialName,
        CanonicalField::MaterialCode,
        CanonicalField::Quantity,
        CanonicalField::UnitPrice,
        CanonicalField::TotalPrice,
        CanonicalField::Currency,
        CanonicalField::OrderDate,
        CanonicalField::DeliveryDate,
        CanonicalField::Unit,
        CanonicalField::PoNumber,
    ];

    /// Snake-case field name used in templates, JSON columns, and the API
    pub fn name(self) -> &'static str {
        match self {
            Self::SupplierName => "supplier_name",
            Self::SupplierTaxId => "supplier_tax_id",
            Self::MaterialName => "material_name",
            Self::MaterialCode => "material_code",
            Self::Quantity => "quantity",
            Self::UnitPrice => "unit_price",
            Self::TotalPrice => "total_price",
            Self::Currency => "currency",
            Self::OrderDate => "order_date",
            Self::DeliveryDate => "delivery_date",
            Self::Unit => "unit",
            Self::PoNumber => "po_number",
        }
    }

    /// Parse a snake-case field name (template columns, stored JSON)
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Known header synonyms for pattern-library mapping
    pub fn synonyms(self) -> &'static [&'static str] {
        match self {
            Self::SupplierName => &["supplier", "vendor", "seller", "payee"],
            Self::SupplierTaxId => &["tax id", "tax number", "vat", "ein", "registration"],
            Self::MaterialName => &["material", "item", "product", "article", "description"],
            Self::MaterialCode => &["sku", "material code", "item code", "part number", "article number"],
            Self::Quantity => &["qty", "quantity", "units ordered", "count"],
            Self::UnitPrice => &["unit price", "price", "rate", "price per unit", "unit cost"],
            Self::TotalPrice => &["total", "total price", "amount", "line total", "extended price"],
            Self::Currency => &["currency", "ccy", "curr"],
            Self::OrderDate => &["order date", "date", "po date", "purchase date"],
            Self::DeliveryDate => &["delivery date", "delivery", "due date", "ship date"],
            Self::Unit => &["unit", "uom", "unit of measure"],
            Self::PoNumber => &["po number", "po", "order number", "purchase order"],
        }
    }

    /// Whether records missing this field are invalid
    pub fn is_required(self) -> bool {
        matches!(
            self,
            Self::SupplierName
                | Self::MaterialName
                | Self::Quantity
                | Self::UnitPrice
                | Self::OrderDate
        )
    }

    /// Expected value type, driving validation and the typed union below
    pub fn kind(self) -> FieldKind {
        match self {
            Self::Quantity | Self::UnitPrice | Self::TotalPrice => FieldKind::Number,
            Self::OrderDate | Self::DeliveryDate => FieldKind::Date,
            _ => FieldKind::Text,
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value type expected for a canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
}

/// Typed field value after validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }
}

// ============================================================================
// Stage Contracts
// ============================================================================

/// Schema mapper output: canonical field → raw source value
///
/// Values are still raw strings here; typing happens in the validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedRow {
    pub fields: BTreeMap<CanonicalField, String>,
}

impl MappedRow {
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(|s| s.as_str())
    }

    /// Non-blank value for a field
    pub fn get_non_blank(&self, field: CanonicalField) -> Option<&str> {
        self.get(field).map(str::trim).filter(|s| !s.is_empty())
    }

    /// String-keyed view for JSON persistence
    pub fn to_name_map(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|(f, v)| (f.name().to_string(), v.clone()))
            .collect()
    }

    /// Rebuild from a persisted string-keyed map (unknown keys dropped)
    pub fn from_name_map(map: &BTreeMap<String, String>) -> Self {
        let fields = map
            .iter()
            .filter_map(|(k, v)| CanonicalField::parse(k).map(|f| (f, v.clone())))
            .collect();
        Self { fields }
    }
}

/// One field-level validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub severity: ErrorSeverity,
}

/// Hard errors invalidate the record; warnings only feed quality scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Error,
    Warning,
}

/// One executed type/range check (validity dimension input)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCheck {
    pub field: CanonicalField,
    pub passed: bool,
}

/// Validator output for one record
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// Typed values for every field that parsed successfully
    pub typed: BTreeMap<CanonicalField, FieldValue>,
    /// Hard errors and soft warnings
    pub errors: Vec<FieldError>,
    /// Every executed check, passed or not
    pub checks: Vec<FieldCheck>,
}

impl ValidationOutcome {
    /// Record is invalid if any hard error was produced
    pub fn is_invalid(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.severity == ErrorSeverity::Error)
    }
}

/// Score breakdown for one match candidate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldBreakdown {
    pub token_overlap: f64,
    pub char_similarity: f64,
    pub auxiliary_match: bool,
}

/// Ephemeral candidate computed per resolution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub catalog_entry_id: uuid::Uuid,
    pub canonical_name: String,
    pub score: f64,
    pub breakdown: FieldBreakdown,
}

/// Resolution decision for one reference (supplier or material)
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// Confident match to an existing catalog entry
    AutoMatched { entry_id: uuid::Uuid, score: f64 },
    /// Ambiguous: candidates in the review band, ranked descending
    NeedsReview { candidates: Vec<MatchCandidate> },
    /// No plausible match: propose a new catalog entry
    CreatedNew {
        canonical_name: String,
        normalized_key: String,
    },
}

// ============================================================================
// Error Types
// ============================================================================

/// Pipeline error taxonomy
///
/// Record-level variants are contained at the record; only
/// `SnapshotLoad` propagates to batch status. Validation failures,
/// mapping ambiguity, and resolution ambiguity are not errors (they
/// become record status / unmapped field / conflict-queue routing
/// respectively), and catalog race conflicts are recovered inside the
/// commit engine without surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Catalog snapshot could not be built (fatal to the batch)
    #[error("Catalog snapshot load failed: {0}")]
    SnapshotLoad(String),

    /// Store failure while committing one record (retryable)
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Per-record processing exceeded the configured timeout (retryable)
    #[error("Record processing timed out after {0} s")]
    RecordTimeout(u64),

    /// Batch was cancelled between records
    #[error("Batch cancelled")]
    Cancelled,

    /// Database error outside the per-record commit path
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Underlying store returned malformed or unexpected data
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid pipeline state (missing decision, unknown batch, ...)
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<prociq_common::Error> for PipelineError {
    fn from(e: prociq_common::Error) -> Self {
        match e {
            prociq_common::Error::Database(db) => PipelineError::Database(db),
            other => PipelineError::Store(other.to_string()),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
