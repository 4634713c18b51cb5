//! Domain models for the ingestion service

pub mod batch;
pub mod catalog;
pub mod commit;
pub mod conflict;
pub mod decision;
pub mod quality;
pub mod record;

pub use batch::{BatchStatus, BatchSummary, StagingBatch};
pub use catalog::{CatalogEntry, EntryAttributes, EntryType};
pub use commit::{CommitResult, PoLine, PriceObservation};
pub use conflict::{ConflictEntry, ConflictResolution, ConflictStatus};
pub use decision::{MatchDecision, Resolution};
pub use quality::{BatchQualitySummary, Grade, QualityDimensions, QualityScore};
pub use record::{RecordStatus, StagingRecord};
