use std::path::Path;

use anyhow::{Context, Result};
use diffharness_core::catalog::{CatalogSignatures, ManPageSignatures, SignatureSource};
use diffharness_core::db::FindingsDb;
use serde::Serialize;

/// Prototype source for catalog entries without an inline signature.
pub fn signature_source(man_pages: bool) -> Box<dyn SignatureSource> {
    if man_pages {
        Box::new(ManPageSignatures)
    } else {
        Box::new(CatalogSignatures)
    }
}

/// Open (or create) the findings database, creating its parent directory.
pub fn open_findings_db(path: &Path) -> Result<FindingsDb> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    FindingsDb::open(path)
        .with_context(|| format!("Failed to open findings database at {}", path.display()))
}

/// Pretty-print `value` as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("Failed to serialize output to JSON")?;
    println!("{serialized}");
    Ok(())
}
