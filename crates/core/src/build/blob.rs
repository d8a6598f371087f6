use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{BuildError, LibraryBuild, LibraryBuilder};
use crate::catalog::{FunctionCatalog, SignatureSource};
use crate::model::{BuildArtifact, CombinedBlob, GapReason, IncompletenessReport, LibraryDescriptor};
use crate::rename::{NamespaceLedger, RenameMapping};
use crate::toolchain::{Toolchain, IR_FLAGS};
use crate::wrappers::{LibraryWrappers, WrapperGenerator};

/// Per-library wrapper translation unit, written into the library's build dir.
pub const WRAPPERS_SOURCE_FILE: &str = "diffharness_wrappers.c";
/// Shared header declaring every wrapper, written next to the blob.
pub const WRAPPERS_HEADER_FILE: &str = "diffharness_wrappers.h";

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Ignore `included_files.json` and recompile everything.
    pub rebuild: bool,
    /// Source compiled into every library before linking.
    pub inject: Option<PathBuf>,
    pub output: PathBuf,
}

/// Result of a build run. The report is always present, even when empty.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub blob: CombinedBlob,
    pub report: IncompletenessReport,
    /// Mappings of every library that built, in descriptor order.
    pub mappings: Vec<RenameMapping>,
    pub artifacts: Vec<BuildArtifact>,
    pub wrappers: Vec<LibraryWrappers>,
    pub header_path: PathBuf,
}

/// Sidecar written next to the blob so later stages know what it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobManifest {
    pub blob: CombinedBlob,
    pub report: IncompletenessReport,
}

impl BlobManifest {
    /// `<blob>.json`
    pub fn path_for(blob: &Path) -> PathBuf {
        let mut name = blob.as_os_str().to_os_string();
        name.push(".json");
        PathBuf::from(name)
    }

    pub fn load(blob: &Path) -> Result<Self, BuildError> {
        let path = Self::path_for(blob);
        let body = std::fs::read_to_string(&path).map_err(|e| BuildError::io(&path, e))?;
        serde_json::from_str(&body).map_err(|source| BuildError::Encode { path, source })
    }

    pub fn store(&self) -> Result<PathBuf, BuildError> {
        let path = Self::path_for(&self.blob.path);
        let body = serde_json::to_string_pretty(self)
            .map_err(|source| BuildError::Encode { path: path.clone(), source })?;
        std::fs::write(&path, body).map_err(|e| BuildError::io(&path, e))?;
        Ok(path)
    }
}

/// Drives a whole build run over every library.
pub struct BlobBuilder<'a> {
    catalog: &'a FunctionCatalog,
    libraries: &'a [LibraryDescriptor],
    toolchain: &'a dyn Toolchain,
    signatures: &'a dyn SignatureSource,
}

impl<'a> BlobBuilder<'a> {
    pub fn new(
        catalog: &'a FunctionCatalog,
        libraries: &'a [LibraryDescriptor],
        toolchain: &'a dyn Toolchain,
        signatures: &'a dyn SignatureSource,
    ) -> Self {
        Self { catalog, libraries, toolchain, signatures }
    }

    /// Build every library on its own thread; results come back in descriptor order.
    fn build_libraries(&self, options: &BuildOptions) -> Vec<Result<LibraryBuild, BuildError>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .libraries
                .iter()
                .map(|lib| {
                    let inject = options.inject.clone();
                    let toolchain = self.toolchain;
                    scope.spawn(move || {
                        LibraryBuilder::new(lib, toolchain).with_injected_source(inject).run(options.rebuild)
                    })
                })
                .collect();
            handles
                .into_iter()
                .zip(self.libraries)
                .map(|(handle, lib)| match handle.join() {
                    Ok(Ok(build)) => Ok(build),
                    Ok(Err(err)) => {
                        tracing::warn!(library = %lib.id, error = %err, "library build failed");
                        Err(err)
                    }
                    Err(_) => Err(BuildError::Panicked { library: lib.id.clone() }),
                })
                .collect()
        })
    }

    /// Write and compile one library's wrapper translation unit.
    fn compile_wrappers(&self, lib: &LibraryDescriptor, wrappers: &LibraryWrappers) -> Result<PathBuf, BuildError> {
        let source = lib.build_dir.join(WRAPPERS_SOURCE_FILE);
        std::fs::write(&source, &wrappers.source).map_err(|e| BuildError::io(&source, e))?;
        let object = source.with_extension("ll");
        let flags: Vec<String> =
            IR_FLAGS.iter().map(|f| f.to_string()).chain(lib.compiler_flags.iter().cloned()).collect();
        self.toolchain
            .compile(&source, &object, &flags, Some(&lib.source_root))
            .map_err(|source| BuildError::Toolchain { library: lib.id.clone(), source })?;
        Ok(object)
    }

    pub fn run(&self, options: &BuildOptions) -> Result<BuildOutcome, BuildError> {
        tracing::info!(libraries = self.libraries.len(), functions = self.catalog.len(), "start build run");
        let mut builds = self.build_libraries(options);
        // A namespace error in any single library aborts the run.
        let fatal = builds.iter().position(|b| matches!(b, Err(err) if err.is_fatal()));
        if let Some(Err(err)) = fatal.map(|index| builds.swap_remove(index)) {
            return Err(err);
        }

        // One deterministic reduction over the per-library results.
        NamespaceLedger::merge(builds.iter().filter_map(|b| b.as_ref().ok()).map(|b| &b.mapping))?;

        let generator = WrapperGenerator::new(self.catalog, self.signatures);
        let mut report = IncompletenessReport::new();
        let mut link_inputs = Vec::new();
        let mut outcome_wrappers = Vec::new();
        let mut mappings = Vec::new();
        let mut artifacts = Vec::new();

        for (lib, build) in self.libraries.iter().zip(builds) {
            let build = match build {
                Ok(build) => build,
                Err(err) => {
                    let detail = err.to_string();
                    for function in self.catalog.names() {
                        report.record(&lib.id, function, GapReason::BuildFailed, Some(detail.clone()));
                    }
                    continue;
                }
            };

            let mut wrappers = generator.generate(&build.mapping);
            for function in self.catalog.names() {
                if build.mapping.resolve(function).is_none() {
                    tracing::warn!(library = %lib.id, function, "missing function");
                    report.record(&lib.id, function, GapReason::SymbolNotFound, None);
                } else if let Some((_, err)) = wrappers.missing_signatures.iter().find(|(f, _)| f == function) {
                    report.record(&lib.id, function, GapReason::MissingSignature, Some(err.to_string()));
                }
            }

            link_inputs.push(build.artifact.object_path.clone());
            if !wrappers.specs.is_empty() {
                match self.compile_wrappers(lib, &wrappers) {
                    Ok(object) => link_inputs.push(object),
                    Err(err) => {
                        tracing::warn!(library = %lib.id, error = %err, "wrapper compilation failed");
                        for spec in &wrappers.specs {
                            report.record(&lib.id, &spec.function_name, GapReason::BuildFailed, Some(err.to_string()));
                        }
                        wrappers.specs.clear();
                    }
                }
            }

            mappings.push(build.mapping);
            artifacts.push(build.artifact);
            outcome_wrappers.push(wrappers);
        }

        if report.is_empty() {
            tracing::info!("integrity check passed");
        } else {
            tracing::error!(gaps = report.len(), "integrity check failed");
        }

        if link_inputs.is_empty() {
            return Err(BuildError::NothingToLink);
        }
        if let Some(parent) = options.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }

        let header_path = options
            .output
            .parent()
            .map(|p| p.join(WRAPPERS_HEADER_FILE))
            .unwrap_or_else(|| PathBuf::from(WRAPPERS_HEADER_FILE));
        std::fs::write(&header_path, generator.shared_header(&outcome_wrappers))
            .map_err(|e| BuildError::io(&header_path, e))?;

        tracing::info!(output = %options.output.display(), inputs = link_inputs.len(), "linking combined blob");
        if let Some(warning) = self.toolchain.link(&link_inputs, &options.output).map_err(BuildError::Link)? {
            tracing::warn!(warning = %warning, "linker warning");
        }

        let wrapper_symbols: BTreeSet<String> =
            outcome_wrappers.iter().flat_map(|w| w.wrapper_symbols().map(str::to_string)).collect();
        let blob = CombinedBlob {
            path: options.output.clone(),
            wrapper_symbols,
            libraries: self.libraries.iter().map(|l| l.id.clone()).collect(),
            complete: report.is_empty(),
        };
        BlobManifest { blob: blob.clone(), report: report.clone() }.store()?;

        Ok(BuildOutcome { blob, report, mappings, artifacts, wrappers: outcome_wrappers, header_path })
    }
}
