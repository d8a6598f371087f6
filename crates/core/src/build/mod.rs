//! Building the combined blob.
//!
//! - `library`: per-library compile, link and rename (`LibraryBuilder`).
//! - `blob`: runs every library in parallel, merges namespaces, checks
//!   integrity, generates wrappers and links the result (`BlobBuilder`).

use std::path::PathBuf;

use thiserror::Error;

use crate::rename::RenameError;
use crate::toolchain::ToolchainError;

mod blob;
mod library;

pub use blob::{BlobBuilder, BlobManifest, BuildOptions, BuildOutcome, WRAPPERS_HEADER_FILE, WRAPPERS_SOURCE_FILE};
pub use library::{CompileStats, LibraryBuild, LibraryBuilder, RENAME_SCRATCH_DIR};

#[derive(Debug, Error)]
pub enum BuildError {
    /// A tool failed while building one library.
    #[error("library '{library}': {source}")]
    Toolchain { library: String, source: ToolchainError },
    #[error("library '{library}': no source file compiled")]
    NothingCompiled { library: String },
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to encode {path}: {source}")]
    Encode { path: PathBuf, source: serde_json::Error },
    /// Namespace corruption; aborts the whole run before linking.
    #[error(transparent)]
    Rename(#[from] RenameError),
    /// Linking the combined blob failed.
    #[error("linking the combined blob failed: {0}")]
    Link(ToolchainError),
    #[error("nothing to link: every library failed to build")]
    NothingToLink,
    #[error("build of library '{library}' panicked")]
    Panicked { library: String },
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io { path: path.into(), source }
    }

    /// Whether this error aborts the whole run rather than one library.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BuildError::Rename(_) | BuildError::Link(_) | BuildError::NothingToLink)
    }
}
