use std::path::Path;

use anyhow::{Context, Result};
use diffharness_core::config::BuilderConfig;
use diffharness_core::wrappers::write_call_wrappers;

use crate::commands::signature_source;

/// Default file names when the builder config leaves `wrappers`/`wrappers_header` unset.
pub const DEFAULT_CALL_WRAPPERS: &str = "call_wrappers.c";
pub const DEFAULT_CALL_WRAPPERS_HEADER: &str = "call_wrappers.h";

/// Generate the plain `lib_entry_*` call wrappers for every catalog function.
pub fn wrappers_command(config_path: &str, man_pages: bool) -> Result<()> {
    let loaded = BuilderConfig::load(Path::new(config_path))
        .with_context(|| format!("Failed to load builder config {config_path}"))?;
    let catalog = loaded.catalog().context("Failed to load function catalog")?;

    let source_path = loaded.wrappers_path().unwrap_or_else(|| loaded.base_dir.join(DEFAULT_CALL_WRAPPERS));
    let header_path =
        loaded.wrappers_header_path().unwrap_or_else(|| loaded.base_dir.join(DEFAULT_CALL_WRAPPERS_HEADER));

    let signatures = signature_source(man_pages);
    let wrappers = write_call_wrappers(&catalog, signatures.as_ref(), &source_path, &header_path)
        .context("Failed to write call wrappers")?;

    println!("Call wrappers:");
    println!("  Source: {}", source_path.display());
    println!("  Header: {}", header_path.display());
    println!("  Functions: {}", catalog.len() - wrappers.skipped.len());
    if !wrappers.skipped.is_empty() {
        println!("Skipped ({}):", wrappers.skipped.len());
        for (function, err) in &wrappers.skipped {
            println!("  - {function}: {err}");
        }
    }
    Ok(())
}
