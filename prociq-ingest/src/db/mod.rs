//! Database access for the ingestion service
//!
//! One module per table, function-per-operation. Commit-path writers take
//! `&mut SqliteConnection` so they compose inside a per-record
//! transaction; everything else reads through the pool.

pub mod batches;
pub mod catalog;
pub mod commits;
pub mod conflicts;
pub mod decisions;
pub mod facts;
pub mod quality;
pub mod records;
pub mod schema;

pub use schema::init_ingest_schema;
