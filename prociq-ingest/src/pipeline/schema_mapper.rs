//! Schema Mapper
//!
//! Maps raw source column names onto canonical fields, either via a saved
//! mapping template or via the pattern library. Pure function of its
//! inputs: same headers and template always produce the same mapping.
//!
//! Pattern-library scoring per (field, column) pair:
//! - exact case-insensitive match of the canonical name: 1.0
//! - synonym substring containment (either direction): 0.8
//! - partial containment of a canonical-name token: 0.6
//! - else 0, with a 0.5 assignment floor
//!
//! Assignment is greedy by descending score; a column is never reused for
//! two canonical fields. Unmapped required fields are left absent and
//! caught by the validator.

use crate::pipeline::types::{CanonicalField, MappedRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum score for a column to be assigned at all
const ASSIGNMENT_FLOOR: f64 = 0.5;

/// Saved source-column → canonical-field map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingTemplate {
    pub name: String,
    /// Source column header → canonical field
    pub columns: BTreeMap<String, CanonicalField>,
}

/// Resolved per-batch column mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Source column header → canonical field
    assignments: BTreeMap<String, CanonicalField>,
}

impl ColumnMapping {
    pub fn assignments(&self) -> &BTreeMap<String, CanonicalField> {
        &self.assignments
    }

    /// Apply the mapping to one raw row, producing the canonical view.
    /// When a header appears more than once in a row the first occurrence
    /// wins.
    pub fn apply(&self, raw_row: &[(String, String)]) -> MappedRow {
        let mut row = MappedRow::default();
        for (header, value) in raw_row {
            if let Some(&field) = self.assignments.get(header) {
                row.fields.entry(field).or_insert_with(|| value.clone());
            }
        }
        row
    }
}

/// Build the column mapping for a batch from its declared headers
///
/// A saved template takes precedence; headers it does not cover fall
/// through to the pattern library.
pub fn build_mapping(headers: &[String], template: Option<&MappingTemplate>) -> ColumnMapping {
    let mut assignments: BTreeMap<String, CanonicalField> = BTreeMap::new();
    let mut used_fields: Vec<CanonicalField> = Vec::new();

    if let Some(template) = template {
        for header in headers {
            if let Some(&field) = template.columns.get(header) {
                if !used_fields.contains(&field) {
                    assignments.insert(header.clone(), field);
                    used_fields.push(field);
                }
            }
        }
    }

    // Score every unassigned (field, column) pair above the floor
    let mut scored: Vec<ScoredPair> = Vec::new();
    for (field_order, &field) in CanonicalField::ALL.iter().enumerate() {
        if used_fields.contains(&field) {
            continue;
        }
        for (column_order, header) in headers.iter().enumerate() {
            if assignments.contains_key(header) {
                continue;
            }
            let score = score_column(field, header);
            if score >= ASSIGNMENT_FLOOR {
                scored.push(ScoredPair {
                    score,
                    field,
                    field_order,
                    header: header.clone(),
                    column_order,
                });
            }
        }
    }

    // Greedy: highest score first; ties broken by field declaration order
    // then column order, for determinism
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.field_order.cmp(&b.field_order))
            .then(a.column_order.cmp(&b.column_order))
    });

    for pair in scored {
        if used_fields.contains(&pair.field) || assignments.contains_key(&pair.header) {
            continue;
        }
        tracing::debug!(
            column = %pair.header,
            field = %pair.field,
            score = pair.score,
            "Column mapped"
        );
        assignments.insert(pair.header, pair.field);
        used_fields.push(pair.field);
    }

    for field in CanonicalField::ALL {
        if field.is_required() && !used_fields.contains(&field) {
            tracing::debug!(field = %field, "No confident column match for required field");
        }
    }

    ColumnMapping { assignments }
}

struct ScoredPair {
    score: f64,
    field: CanonicalField,
    field_order: usize,
    header: String,
    column_order: usize,
}

/// Score one column header against one canonical field
fn score_column(field: CanonicalField, header: &str) -> f64 {
    let header_norm = normalize_header(header);
    if header_norm.is_empty() {
        return 0.0;
    }

    let field_name = field.name().replace('_', " ");
    if header_norm == field_name {
        return 1.0;
    }

    for synonym in field.synonyms() {
        if header_norm.contains(synonym) || synonym.contains(header_norm.as_str()) {
            return 0.8;
        }
    }

    // Partial: a token of the canonical name appears in the header, or the
    // whole header appears inside the canonical name
    for token in field_name.split(' ') {
        if header_norm.contains(token) {
            return 0.6;
        }
    }
    if field_name.contains(header_norm.as_str()) {
        return 0.6;
    }

    0.0
}

/// Lowercase and collapse separators so "Unit_Price", "unit-price" and
/// "Unit Price" compare equal
fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut last_was_space = true;
    for c in header.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim_end().to_string()
}
