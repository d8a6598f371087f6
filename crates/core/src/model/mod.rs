//! Records shared across the build pipeline.
//!
//! Descriptors are read-only inputs; everything else is produced by a single
//! build run and never shared with another.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::language::Signature;

/// One library under test, as resolved from its `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDescriptor {
    /// Namespace token; unique within a run.
    pub id: String,
    /// Directory the sources are compiled from.
    pub source_root: PathBuf,
    /// `<source_root>-build`.
    pub build_dir: PathBuf,
    /// Linked library artifact inside `build_dir`.
    pub target: PathBuf,
    pub compiler_flags: Vec<String>,
    /// Source files relative to `source_root`, in traversal order.
    pub source_files: Vec<PathBuf>,
}

impl LibraryDescriptor {
    /// `source_root` is made absolute, since tools run with it as their cwd.
    pub fn new(id: impl Into<String>, source_root: impl Into<PathBuf>) -> Self {
        let source_root = absolute_path(&source_root.into());
        let build_dir = build_dir_for(&source_root);
        let id = id.into();
        let target = build_dir.join(format!("{id}.bc"));
        Self { id, source_root, build_dir, target, compiler_flags: Vec::new(), source_files: Vec::new() }
    }

    pub fn with_flags(mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.compiler_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.source_files = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Target copy kept before renaming so both symbol tables can be diffed.
    pub fn unrenamed_target(&self) -> PathBuf {
        let mut name = self.target.as_os_str().to_os_string();
        name.push(".unrenamed");
        PathBuf::from(name)
    }

    pub fn rename_mapping_path(&self) -> PathBuf {
        self.build_dir.join(RENAME_MAPPING_FILE)
    }

    pub fn included_files_path(&self) -> PathBuf {
        self.build_dir.join(INCLUDED_FILES_FILE)
    }
}

pub const RENAME_MAPPING_FILE: &str = "rename_mapping.json";
pub const INCLUDED_FILES_FILE: &str = "included_files.json";

/// `path` resolved against the current directory; absolute paths pass through.
pub fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `<dir>-build`, next to the source directory.
pub fn build_dir_for(source_root: &Path) -> PathBuf {
    let mut name = source_root.as_os_str().to_os_string();
    name.push("-build");
    PathBuf::from(name)
}

/// Uniform entry point for one (function, library) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperSpec {
    pub function_name: String,
    pub library_id: String,
    pub wrapper_symbol: String,
    pub renamed_target_symbol: String,
    pub signature: Signature,
}

/// Per-library output of the compile and rename phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub library_id: String,
    pub object_path: PathBuf,
    pub unrenamed_object_path: PathBuf,
    /// Renamed symbols defined by the artifact.
    pub present_symbols: BTreeSet<String>,
    pub included_files: Vec<PathBuf>,
}

/// The linked combination of every renamed artifact and wrapper object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedBlob {
    pub path: PathBuf,
    pub wrapper_symbols: BTreeSet<String>,
    /// Library ids in descriptor order.
    pub libraries: Vec<String>,
    pub complete: bool,
}

impl CombinedBlob {
    pub fn has_wrapper(&self, symbol: &str) -> bool {
        self.wrapper_symbols.contains(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// The library's whole compile/rename phase failed.
    BuildFailed,
    /// The function is not defined by the renamed artifact.
    SymbolNotFound,
    /// No usable prototype, so no wrapper was generated.
    MissingSignature,
}

impl GapReason {
    pub fn as_str(self) -> &'static str {
        match self {
            GapReason::BuildFailed => "build_failed",
            GapReason::SymbolNotFound => "symbol_not_found",
            GapReason::MissingSignature => "missing_signature",
        }
    }
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub library: String,
    pub function: String,
    pub reason: GapReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Every (library, function) pair missing from the combined blob, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompletenessReport {
    pub gaps: Vec<Gap>,
}

impl IncompletenessReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        library: impl Into<String>,
        function: impl Into<String>,
        reason: GapReason,
        detail: Option<String>,
    ) {
        self.gaps.push(Gap { library: library.into(), function: function.into(), reason, detail });
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn contains(&self, library: &str, function: &str) -> bool {
        self.gaps.iter().any(|g| g.library == library && g.function == function)
    }

    /// Functions reported missing for `library`.
    pub fn functions_for(&self, library: &str) -> Vec<&str> {
        self.gaps.iter().filter(|g| g.library == library).map(|g| g.function.as_str()).collect()
    }
}

impl fmt::Display for IncompletenessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.gaps.is_empty() {
            return writeln!(f, "Integrity check: complete (no gaps)");
        }
        writeln!(f, "Integrity check: {} gap(s)", self.gaps.len())?;
        for gap in &self.gaps {
            match &gap.detail {
                Some(detail) => {
                    writeln!(f, "- {}:{} ({}: {})", gap.library, gap.function, gap.reason, detail)?
                }
                None => writeln!(f, "- {}:{} ({})", gap.library, gap.function, gap.reason)?,
            }
        }
        Ok(())
    }
}
