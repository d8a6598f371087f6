use anyhow::{anyhow, Context, Result};
use diffharness_core::config::LibraryConfig;

use crate::canonicalize_or_current;

/// Write a template `config.json` into the library root at `path`.
pub fn introduce_command(path: &str, force: bool) -> Result<()> {
    let root = canonicalize_or_current(path)?;
    if !root.is_dir() {
        return Err(anyhow!("Library root does not exist: {}", root.display()));
    }

    let written = LibraryConfig::write_default(&root, force)
        .with_context(|| format!("Failed to introduce library at {}", root.display()))?;

    println!("Introduced library:");
    println!("  Root: {}", root.display());
    println!("  Config: {}", written.display());
    println!("Fill in name, directory, compiler_flags, traversals and target before building.");
    Ok(())
}
