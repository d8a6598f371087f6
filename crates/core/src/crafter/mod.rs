//! Harness assembly ("crafting"): driver + combined blob -> engine input.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::config::Engine;
use crate::model::CombinedBlob;
use crate::naming;
use crate::toolchain::{Toolchain, ToolchainError};

mod driver;

pub use driver::{Driver, DriverError, DriverGenerator, ABORT_FUNCTION};

#[derive(Debug, Error)]
pub enum AssembleError {
    /// The driver needs a wrapper the blob does not provide.
    #[error("unresolved wrapper for library '{library}', function '{function}'")]
    UnresolvedWrapper { library: String, function: String },
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

fn io_err(path: &Path, source: std::io::Error) -> AssembleError {
    AssembleError::Io { path: path.to_path_buf(), source }
}

fn wrapper_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bentry__[A-Za-z0-9_]+").expect("valid wrapper regex"))
}

/// Every well-formed wrapper symbol referenced by `driver`, as `(library, function)`.
pub fn referenced_wrappers(driver: &str) -> BTreeSet<(String, String)> {
    wrapper_token_re().find_iter(driver).filter_map(|m| naming::parse_wrapper(m.as_str())).collect()
}

/// Check that `blob` provides everything the harness needs.
///
/// Expected wrappers are checked in `libs` order, then every other wrapper the
/// driver references; the first miss is returned.
pub fn verify_wrappers(
    blob: &CombinedBlob,
    driver: &str,
    libs: &[String],
    function: &str,
) -> Result<BTreeSet<(String, String)>, AssembleError> {
    for lib in libs {
        if !blob.has_wrapper(&naming::wrapper_symbol(lib, function)) {
            return Err(AssembleError::UnresolvedWrapper { library: lib.clone(), function: function.to_string() });
        }
    }
    let referenced = referenced_wrappers(driver);
    for (library, func) in &referenced {
        if !blob.has_wrapper(&naming::wrapper_symbol(library, func)) {
            return Err(AssembleError::UnresolvedWrapper { library: library.clone(), function: func.clone() });
        }
    }
    Ok(referenced)
}

/// What a successful assembly produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledHarness {
    pub engine: Engine,
    /// `<function>.bc` (symex) or `<function>.afl` (fuzzing).
    pub target: PathBuf,
    pub driver_path: PathBuf,
    pub wrappers: BTreeSet<(String, String)>,
}

pub struct HarnessAssembler<'a> {
    toolchain: &'a dyn Toolchain,
    engine: Engine,
    /// Engine support headers for symbolic execution.
    symex_headers: Option<PathBuf>,
}

impl<'a> HarnessAssembler<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, engine: Engine) -> Self {
        Self { toolchain, engine, symex_headers: None }
    }

    pub fn with_symex_headers(mut self, headers: Option<PathBuf>) -> Self {
        self.symex_headers = headers.filter(|p| !p.as_os_str().is_empty());
        self
    }

    /// Verify wrappers, then build the engine target for `function` into `target_folder`.
    pub fn assemble(
        &self,
        blob: &CombinedBlob,
        driver: &Driver,
        libs: &[String],
        function: &str,
        target_folder: &Path,
    ) -> Result<AssembledHarness, AssembleError> {
        let wrappers = verify_wrappers(blob, &driver.source, libs, function)?;
        if !blob.complete {
            tracing::warn!(blob = %blob.path.display(), "assembling against an incomplete blob");
        }

        std::fs::create_dir_all(target_folder).map_err(|e| io_err(target_folder, e))?;
        let driver_path = target_folder.join(format!("{function}_driver.c"));
        std::fs::write(&driver_path, &driver.source).map_err(|e| io_err(&driver_path, e))?;

        let target = match self.engine {
            Engine::Symex => self.build_symex(blob, &driver_path, function, target_folder)?,
            Engine::Fuzzing => self.build_fuzzing(blob, driver, &driver_path, function, target_folder)?,
        };
        tracing::info!(target = %target.display(), engine = self.engine.as_str(), "harness assembled");
        Ok(AssembledHarness { engine: self.engine, target, driver_path, wrappers })
    }

    fn build_symex(
        &self,
        blob: &CombinedBlob,
        driver_path: &Path,
        function: &str,
        target_folder: &Path,
    ) -> Result<PathBuf, AssembleError> {
        let driver_ir = driver_path.with_extension("ll");
        let mut flags: Vec<String> = ["-S", "-emit-llvm", "-g"].iter().map(|f| f.to_string()).collect();
        if let Some(headers) = &self.symex_headers {
            flags.push(format!("-I{}", headers.display()));
        }
        self.toolchain.compile(driver_path, &driver_ir, &flags, None)?;

        let target = target_folder.join(format!("{function}.bc"));
        self.toolchain.link(&[blob.path.clone(), driver_ir], &target)?;
        Ok(target)
    }

    fn build_fuzzing(
        &self,
        blob: &CombinedBlob,
        driver: &Driver,
        driver_path: &Path,
        function: &str,
        target_folder: &Path,
    ) -> Result<PathBuf, AssembleError> {
        let target = target_folder.join(format!("{function}.afl"));
        self.toolchain.compile_fuzz_executable(driver_path, &[blob.path.clone()], &target, target_folder)?;
        write_fuzzing_toolset(target_folder, &target, &driver.testcases)?;
        Ok(target)
    }
}

/// `run.sh`, `testcases/testcase_<name>` and an empty `findings/`.
pub fn write_fuzzing_toolset(
    target_folder: &Path,
    target: &Path,
    testcases: &BTreeMap<String, String>,
) -> Result<(), AssembleError> {
    let executable = target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let script = format!(
        "#!/bin/sh\nrm -rf findings/*\nafl-fuzz -i testcases -o findings -- ./{executable}\n"
    );
    let run_sh = target_folder.join("run.sh");
    std::fs::write(&run_sh, script).map_err(|e| io_err(&run_sh, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&run_sh, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| io_err(&run_sh, e))?;
    }

    for dir in ["findings", "testcases"] {
        let path = target_folder.join(dir);
        std::fs::create_dir_all(&path).map_err(|e| io_err(&path, e))?;
    }
    for (name, data) in testcases {
        let path = target_folder.join("testcases").join(format!("testcase_{name}"));
        std::fs::write(&path, data).map_err(|e| io_err(&path, e))?;
    }
    Ok(())
}
