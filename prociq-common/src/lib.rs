//! Shared types and utilities for ProcIQ services
//!
//! Holds the pieces every service crate needs: the common error type,
//! configuration loading, and database pool initialization.

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
