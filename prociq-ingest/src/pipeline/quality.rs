//! Data Quality Scorer
//!
//! Six dimensions per record, each in [0, 1], aggregated into a weighted
//! composite and a letter grade. Scores annotate every record regardless
//! of its resolution path and never block commit; the batch aggregate is
//! reporting-only.

use crate::models::{BatchQualitySummary, Grade, QualityDimensions, QualityScore};
use crate::pipeline::resolver::{duplicate_key, normalize_name, CatalogSnapshot};
use crate::pipeline::types::{CanonicalField, MappedRow, ValidationOutcome};
use chrono::NaiveDate;
use prociq_common::config::PipelineConfig;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Everything the scorer needs beyond the record itself
pub struct QualityContext<'a> {
    pub snapshot: &'a CatalogSnapshot,
    /// Duplicate-tuple key → occurrence count within this batch
    pub batch_duplicates: &'a HashMap<String, u32>,
    pub config: &'a PipelineConfig,
    /// Ingestion date, passed in so scoring is deterministic under test
    pub today: NaiveDate,
}

/// Duplicate-detection tuple for one record, when derivable
///
/// Requires supplier, material, order date, and an amount (total price,
/// falling back to quantity × unit price).
pub fn record_duplicate_key(outcome: &ValidationOutcome) -> Option<String> {
    let supplier = outcome
        .typed
        .get(&CanonicalField::SupplierName)?
        .as_text()?;
    let material = outcome
        .typed
        .get(&CanonicalField::MaterialName)?
        .as_text()?;
    let order_date = outcome.typed.get(&CanonicalField::OrderDate)?.as_date()?;
    let amount = line_amount(outcome)?;
    Some(duplicate_key(
        &normalize_name(supplier),
        &normalize_name(material),
        order_date,
        amount,
    ))
}

/// Line amount: explicit total, else quantity × unit price
fn line_amount(outcome: &ValidationOutcome) -> Option<f64> {
    if let Some(total) = outcome
        .typed
        .get(&CanonicalField::TotalPrice)
        .and_then(|v| v.as_number())
    {
        return Some(total);
    }
    let quantity = outcome
        .typed
        .get(&CanonicalField::Quantity)?
        .as_number()?;
    let unit_price = outcome
        .typed
        .get(&CanonicalField::UnitPrice)?
        .as_number()?;
    Some(quantity * unit_price)
}

/// Score one record
pub fn score_record(
    record_id: Uuid,
    row: &MappedRow,
    outcome: &ValidationOutcome,
    ctx: &QualityContext<'_>,
) -> QualityScore {
    let dimensions = QualityDimensions {
        completeness: completeness(row),
        consistency: consistency(outcome),
        validity: validity(outcome),
        timeliness: timeliness(outcome, ctx),
        uniqueness: uniqueness(outcome, ctx),
        accuracy: accuracy(outcome, ctx),
    };
    let score = QualityScore::new(record_id, dimensions, &ctx.config.quality_weights);
    tracing::debug!(
        record_id = %record_id,
        composite = score.composite,
        grade = score.grade.as_str(),
        "Record quality scored"
    );
    score
}

/// Fraction of all defined canonical fields that are non-empty
fn completeness(row: &MappedRow) -> f64 {
    let present = CanonicalField::ALL
        .iter()
        .filter(|f| row.get_non_blank(**f).is_some())
        .count();
    present as f64 / CanonicalField::ALL.len() as f64
}

/// Fraction of applicable cross-field checks that pass
fn consistency(outcome: &ValidationOutcome) -> f64 {
    let mut applicable = 0u32;
    let mut passed = 0u32;

    let quantity = outcome
        .typed
        .get(&CanonicalField::Quantity)
        .and_then(|v| v.as_number());
    let unit_price = outcome
        .typed
        .get(&CanonicalField::UnitPrice)
        .and_then(|v| v.as_number());
    let total = outcome
        .typed
        .get(&CanonicalField::TotalPrice)
        .and_then(|v| v.as_number());

    if let (Some(q), Some(u), Some(t)) = (quantity, unit_price, total) {
        applicable += 1;
        let consistent = if t > 0.0 {
            ((q * u - t).abs() / t) <= 0.01
        } else {
            q * u == 0.0
        };
        if consistent {
            passed += 1;
        }
    }

    let order = outcome
        .typed
        .get(&CanonicalField::OrderDate)
        .and_then(|v| v.as_date());
    let delivery = outcome
        .typed
        .get(&CanonicalField::DeliveryDate)
        .and_then(|v| v.as_date());
    if let (Some(o), Some(d)) = (order, delivery) {
        applicable += 1;
        if o <= d {
            passed += 1;
        }
    }

    if applicable == 0 {
        1.0
    } else {
        passed as f64 / applicable as f64
    }
}

/// Fraction of executed type/range checks that passed
fn validity(outcome: &ValidationOutcome) -> f64 {
    if outcome.checks.is_empty() {
        return 0.0;
    }
    let passed = outcome.checks.iter().filter(|c| c.passed).count();
    passed as f64 / outcome.checks.len() as f64
}

/// 1.0 inside the recency window, decaying linearly to 0 at the outer
/// bound. Future-dated documents score 1.0 (date-order problems surface
/// in consistency instead). Missing business date scores 0.
fn timeliness(outcome: &ValidationOutcome, ctx: &QualityContext<'_>) -> f64 {
    let Some(order_date) = outcome
        .typed
        .get(&CanonicalField::OrderDate)
        .and_then(|v| v.as_date())
    else {
        return 0.0;
    };

    let age_days = (ctx.today - order_date).num_days();
    let window = ctx.config.recency_window_days;
    let outer = ctx.config.recency_outer_bound_days;

    if age_days <= window {
        1.0
    } else if age_days >= outer {
        0.0
    } else {
        1.0 - (age_days - window) as f64 / (outer - window) as f64
    }
}

/// 1.0 unless the record duplicates others in the batch or already
/// committed; drops proportionally to the duplicate count
fn uniqueness(outcome: &ValidationOutcome, ctx: &QualityContext<'_>) -> f64 {
    let Some(key) = record_duplicate_key(outcome) else {
        return 1.0;
    };
    let in_batch = ctx.batch_duplicates.get(&key).copied().unwrap_or(1);
    let committed = ctx.snapshot.committed_duplicates(&key);
    let duplicates = in_batch.saturating_sub(1) + committed;
    1.0 / (1.0 + duplicates as f64)
}

/// 1.0 inside mean ± 3σ of the trailing price distribution for the same
/// material, decaying with distance beyond it. A statistical flag, never
/// a hard failure; materials without enough history score 1.0.
fn accuracy(outcome: &ValidationOutcome, ctx: &QualityContext<'_>) -> f64 {
    let Some(unit_price) = outcome
        .typed
        .get(&CanonicalField::UnitPrice)
        .and_then(|v| v.as_number())
    else {
        return 1.0;
    };
    let Some(material) = outcome
        .typed
        .get(&CanonicalField::MaterialName)
        .and_then(|v| v.as_text())
    else {
        return 1.0;
    };

    let Some(stats) = ctx.snapshot.price_stats(&normalize_name(material)) else {
        return 1.0;
    };
    if stats.count < 3 || stats.stddev <= f64::EPSILON {
        return 1.0;
    }

    let z = (unit_price - stats.mean).abs() / stats.stddev;
    if z <= 3.0 {
        1.0
    } else {
        // Linear decay: zero at six standard deviations
        (1.0 - (z - 3.0) / 3.0).max(0.0)
    }
}

/// Batch-level aggregate: mean composite plus the grade distribution
pub fn summarize(scores: &[QualityScore]) -> BatchQualitySummary {
    let mut grade_counts: BTreeMap<String, i64> = BTreeMap::new();
    for g in [Grade::A, Grade::B, Grade::C, Grade::D, Grade::F] {
        grade_counts.insert(g.as_str().to_string(), 0);
    }
    for score in scores {
        *grade_counts
            .entry(score.grade.as_str().to_string())
            .or_insert(0) += 1;
    }
    let mean_composite = if scores.is_empty() {
        0.0
    } else {
        scores.iter().map(|s| s.composite).sum::<f64>() / scores.len() as f64
    };
    BatchQualitySummary {
        mean_composite,
        grade_counts,
        scored_records: scores.len() as i64,
    }
}
