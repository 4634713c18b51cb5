//! Quality scores: six dimensions, composite, and letter grades

use prociq_common::config::QualityWeights;
use prociq_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Six-dimension score, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityDimensions {
    pub completeness: f64,
    pub consistency: f64,
    pub validity: f64,
    pub timeliness: f64,
    pub uniqueness: f64,
    pub accuracy: f64,
}

impl QualityDimensions {
    /// Weighted composite, weights normalized so disabling a dimension
    /// (weight 0) redistributes to the rest
    pub fn composite(&self, weights: &QualityWeights) -> f64 {
        let pairs = [
            (self.completeness, weights.completeness),
            (self.consistency, weights.consistency),
            (self.validity, weights.validity),
            (self.timeliness, weights.timeliness),
            (self.uniqueness, weights.uniqueness),
            (self.accuracy, weights.accuracy),
        ];
        let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight
    }
}

/// Letter grade bands over the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_composite(composite: f64) -> Self {
        if composite >= 0.90 {
            Self::A
        } else if composite >= 0.80 {
            Self::B
        } else if composite >= 0.70 {
            Self::C
        } else if composite >= 0.60 {
            Self::D
        } else {
            Self::F
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "F" => Ok(Self::F),
            other => Err(Error::Parse(format!("Unknown grade: {}", other))),
        }
    }
}

/// Persisted per-record quality score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub staging_record_id: Uuid,
    pub dimensions: QualityDimensions,
    pub composite: f64,
    pub grade: Grade,
}

impl QualityScore {
    pub fn new(record_id: Uuid, dimensions: QualityDimensions, weights: &QualityWeights) -> Self {
        let composite = dimensions.composite(weights);
        Self {
            staging_record_id: record_id,
            dimensions,
            composite,
            grade: Grade::from_composite(composite),
        }
    }
}

/// Batch-level aggregate, for reporting only — never blocks commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchQualitySummary {
    pub mean_composite: f64,
    pub grade_counts: BTreeMap<String, i64>,
    pub scored_records: i64,
}
