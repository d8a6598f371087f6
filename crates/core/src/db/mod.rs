//! Findings database.
//!
//! A small SQLite store recording every build run (and whether its blob was
//! complete) and every analyzed run of a harness (verdict and clusters).
//!
//! - `FindingsDb`: connection wrapper applying schema migrations.
//! - `BuildRunRecord` / `FindingRecord`: rows of `build_runs` / `findings`.

mod findings_db;
mod models;

pub use findings_db::{DbError, DbResult, FindingsDb, CURRENT_SCHEMA_VERSION};
pub use models::{now_timestamp, BuildRunRecord, FindingRecord};
