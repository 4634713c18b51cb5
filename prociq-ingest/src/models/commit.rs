//! Commit results and derived facts
//!
//! A `CommitResult` row is written exactly once per staging record and is
//! the idempotency anchor: its existence makes any replay of the commit
//! engine a no-op for that record.

use chrono::{DateTime, Utc};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record-level commit receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResult {
    pub staging_record_id: Uuid,
    /// Catalog entries created by this commit (empty when every reference
    /// matched an existing entry)
    pub created_entity_ids: Vec<Uuid>,
    /// Derived fact rows (purchase-order line, price observation)
    pub created_fact_ids: Vec<Uuid>,
    pub committed_at: DateTime<Utc>,
}

/// Purchase-order line derived from a committed record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoLine {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub staging_record_id: Uuid,
    pub supplier_id: Uuid,
    pub material_id: Uuid,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: Option<f64>,
    pub currency: Option<String>,
    pub order_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub po_number: Option<String>,
}

/// Price observation backing trailing price statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub material_id: Uuid,
    pub supplier_id: Uuid,
    pub unit_price: f64,
    pub observed_date: NaiveDate,
    pub staging_record_id: Uuid,
}
