use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::BuildError;
use crate::model::{absolute_path, BuildArtifact, LibraryDescriptor};
use crate::rename::{self, RenameMapping};
use crate::toolchain::{Toolchain, IR_FLAGS};

/// Scratch directory (inside the build dir) holding the IR before and after renaming.
pub const RENAME_SCRATCH_DIR: &str = "rename";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompileStats {
    pub compiled: usize,
    /// Already listed in the manifest of a previous run.
    pub skipped: usize,
    pub failed: usize,
    pub warnings: usize,
}

/// Everything one library contributes to a build run.
#[derive(Debug, Clone)]
pub struct LibraryBuild {
    pub artifact: BuildArtifact,
    pub mapping: RenameMapping,
    pub stats: CompileStats,
}

/// Compiles, links and renames one library.
pub struct LibraryBuilder<'a> {
    lib: &'a LibraryDescriptor,
    toolchain: &'a dyn Toolchain,
    /// Extra source compiled into the library before linking (the `lib_entry_*` wrappers).
    inject: Option<PathBuf>,
}

impl<'a> LibraryBuilder<'a> {
    pub fn new(lib: &'a LibraryDescriptor, toolchain: &'a dyn Toolchain) -> Self {
        Self { lib, toolchain, inject: None }
    }

    pub fn with_injected_source(mut self, source: Option<PathBuf>) -> Self {
        self.inject = source.map(|path| absolute_path(&path));
        self
    }

    fn flags(&self) -> Vec<String> {
        IR_FLAGS.iter().map(|f| f.to_string()).chain(self.lib.compiler_flags.iter().cloned()).collect()
    }

    fn toolchain_err(&self, source: crate::toolchain::ToolchainError) -> BuildError {
        BuildError::Toolchain { library: self.lib.id.clone(), source }
    }

    /// Build directory path of the IR compiled from `src`.
    pub fn compiled_path(&self, src: &Path) -> PathBuf {
        self.lib.build_dir.join(src).with_extension("ll")
    }

    fn reset_build_dir(&self) -> Result<(), BuildError> {
        let _ = std::fs::remove_dir_all(&self.lib.build_dir);
        std::fs::create_dir_all(&self.lib.build_dir).map_err(|e| BuildError::io(&self.lib.build_dir, e))
    }

    fn load_manifest(&self) -> Option<Vec<PathBuf>> {
        let body = std::fs::read_to_string(self.lib.included_files_path()).ok()?;
        serde_json::from_str(&body).ok()
    }

    /// Compile every source not yet listed in `included_files.json`.
    ///
    /// Returns every compiled IR file, previously built ones included. Single
    /// files that fail to compile are counted and left out.
    pub fn pre_compile(&self, rebuild: bool) -> Result<(Vec<PathBuf>, CompileStats), BuildError> {
        let previous = if rebuild {
            tracing::debug!("explicit rebuild");
            self.reset_build_dir()?;
            Vec::new()
        } else {
            match self.load_manifest() {
                Some(files) => files,
                None => {
                    tracing::debug!("no usable manifest, forcing rebuild");
                    return self.pre_compile(true);
                }
            }
        };

        let known: BTreeSet<&PathBuf> = previous.iter().collect();
        let mut stats = CompileStats::default();
        let flags = self.flags();
        let mut compiled = Vec::new();
        for src in &self.lib.source_files {
            let dest = self.compiled_path(src);
            if known.contains(&dest) {
                stats.skipped += 1;
                continue;
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
            }
            match self.toolchain.compile(src, &dest, &flags, Some(&self.lib.source_root)) {
                Ok(warnings) => {
                    if let Some(text) = warnings {
                        tracing::debug!(file = %src.display(), warning = %text, "compiler warning");
                        stats.warnings += 1;
                    }
                    stats.compiled += 1;
                    compiled.push(dest);
                }
                Err(err) => {
                    tracing::warn!(file = %src.display(), error = %err, "compile failed");
                    stats.failed += 1;
                }
            }
        }
        tracing::debug!(
            compiled = stats.compiled,
            skipped = stats.skipped,
            failed = stats.failed,
            warnings = stats.warnings,
            "compile statistics"
        );

        let mut all = previous;
        all.extend(compiled);
        let manifest = self.lib.included_files_path();
        let body = serde_json::to_string_pretty(&all)
            .map_err(|source| BuildError::Encode { path: manifest.clone(), source })?;
        std::fs::write(&manifest, body).map_err(|e| BuildError::io(&manifest, e))?;
        Ok((all, stats))
    }

    /// Link the compiled files into the library target.
    pub fn link(&self, files: &[PathBuf]) -> Result<(), BuildError> {
        if files.is_empty() {
            return Err(BuildError::NothingCompiled { library: self.lib.id.clone() });
        }
        tracing::debug!(target = %self.lib.target.display(), files = files.len(), "linking library");
        if let Some(warning) = self.toolchain.link(files, &self.lib.target).map_err(|e| self.toolchain_err(e))? {
            tracing::warn!(warning = %warning, "linker warning");
        }
        Ok(())
    }

    /// Keep an unrenamed copy of the target, then rename the target in place
    /// and write `rename_mapping.json`.
    pub fn rename(&self) -> Result<RenameMapping, BuildError> {
        let mapping_path = self.lib.rename_mapping_path();
        let _ = std::fs::remove_file(&mapping_path);

        let unrenamed = self.lib.unrenamed_target();
        std::fs::copy(&self.lib.target, &unrenamed).map_err(|e| BuildError::io(&unrenamed, e))?;

        let scratch = self.lib.build_dir.join(RENAME_SCRATCH_DIR);
        std::fs::create_dir_all(&scratch).map_err(|e| BuildError::io(&scratch, e))?;
        let before = scratch.join("unrenamed.ll");
        let after = scratch.join("renamed.ll");

        self.toolchain.disassemble(&unrenamed, &before).map_err(|e| self.toolchain_err(e))?;
        let ir = std::fs::read_to_string(&before).map_err(|e| BuildError::io(&before, e))?;
        let renamed = rename::rename_ir(&ir, &self.lib.id)?;
        std::fs::write(&after, &renamed.ir).map_err(|e| BuildError::io(&after, e))?;
        self.toolchain.assemble(&after, &self.lib.target).map_err(|e| self.toolchain_err(e))?;

        let body = serde_json::to_string_pretty(&renamed.mapping)
            .map_err(|source| BuildError::Encode { path: mapping_path.clone(), source })?;
        std::fs::write(&mapping_path, body).map_err(|e| BuildError::io(&mapping_path, e))?;
        tracing::debug!(symbols = renamed.mapping.len(), "renamed library symbols");
        Ok(renamed.mapping)
    }

    /// Full per-library pipeline: compile, inject, link, rename.
    pub fn run(&self, rebuild: bool) -> Result<LibraryBuild, BuildError> {
        let span = tracing::info_span!("library", id = %self.lib.id);
        let _guard = span.enter();
        tracing::info!("start build process");

        let (mut files, stats) = self.pre_compile(rebuild)?;
        if stats.compiled == 0 && stats.skipped == 0 {
            return Err(BuildError::NothingCompiled { library: self.lib.id.clone() });
        }
        if let Some(inject) = &self.inject {
            let dest = self.lib.build_dir.join("call_wrappers.ll");
            tracing::debug!(source = %inject.display(), "inject call wrappers");
            self.toolchain
                .compile(inject, &dest, &self.flags(), Some(&self.lib.source_root))
                .map_err(|e| self.toolchain_err(e))?;
            files.push(dest);
        }

        self.link(&files)?;
        let mapping = self.rename()?;

        let artifact = BuildArtifact {
            library_id: self.lib.id.clone(),
            object_path: self.lib.target.clone(),
            unrenamed_object_path: self.lib.unrenamed_target(),
            present_symbols: mapping.symbols.values().cloned().collect(),
            included_files: files,
        };
        tracing::info!("build finished");
        Ok(LibraryBuild { artifact, mapping, stats })
    }
}
