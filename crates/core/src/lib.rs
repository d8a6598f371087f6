//! diffharness-core
//!
//! Core library for differential testing of competing implementations of the
//! same C function contract.
//!
//! This crate renames every library's symbols into a private namespace,
//! generates uniform call wrappers, links everything into one combined blob,
//! assembles engine-ready harnesses around it and clusters the per-library
//! results of a run into equivalence classes.
//!
//! The goal is to keep all substantive logic here so it is fully testable and
//! reusable from multiple frontends (CLI, scripts, etc.).

pub mod analysis;
pub mod build;
pub mod catalog;
pub mod config;
pub mod crafter;
pub mod db;
pub mod language;
pub mod model;
pub mod naming;
pub mod rename;
pub mod toolchain;
pub mod wrappers;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
