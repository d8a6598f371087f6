//! In-process toolchain: "compiles" by copying text and "links" by
//! concatenating it, so the whole pipeline runs without LLVM.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use diffharness_core::model::LibraryDescriptor;
use diffharness_core::toolchain::{Toolchain, ToolchainError, Warnings};

#[derive(Debug, Default)]
pub struct FakeToolchain {
    pub calls: Mutex<Vec<String>>,
    /// Sources whose file name contains this marker fail to compile.
    pub fail_marker: Option<String>,
    pub fail_link: bool,
    /// Only links whose destination has this file name fail.
    pub fail_link_to: Option<String>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self { fail_marker: Some(marker.to_string()), ..Self::default() }
    }

    pub fn calls(&self, verb: &str) -> Vec<String> {
        self.calls.lock().expect("calls lock").iter().filter(|c| c.starts_with(verb)).cloned().collect()
    }

    fn record(&self, entry: String) {
        self.calls.lock().expect("calls lock").push(entry);
    }
}

fn copy(src: &Path, dest: &Path) -> Result<(), ToolchainError> {
    let text = fs::read_to_string(src).map_err(|e| ToolchainError::io(src, e))?;
    fs::write(dest, text).map_err(|e| ToolchainError::io(dest, e))
}

impl Toolchain for FakeToolchain {
    fn compile(&self, src: &Path, dest: &Path, _flags: &[String], cwd: Option<&Path>) -> Result<Warnings, ToolchainError> {
        // Relative paths resolve against `cwd`, as they would for a spawned compiler.
        let in_cwd = |path: &Path| -> PathBuf {
            match cwd {
                Some(dir) if path.is_relative() => dir.join(path),
                _ => path.to_path_buf(),
            }
        };
        let (src, dest) = (in_cwd(src), in_cwd(dest));
        self.record(format!("compile {}", src.display()));
        let name = src.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        if let Some(marker) = &self.fail_marker {
            if name.contains(marker.as_str()) {
                return Err(ToolchainError::Failed {
                    tool: "fake-cc".into(),
                    status: "exit status: 1".into(),
                    stderr: format!("{name}: error"),
                });
            }
        }
        copy(&src, &dest)?;
        Ok(None)
    }

    fn link(&self, inputs: &[PathBuf], dest: &Path) -> Result<Warnings, ToolchainError> {
        self.record(format!("link {}", dest.display()));
        let dest_name = dest.file_name().map(|n| n.to_string_lossy().to_string());
        if self.fail_link || (self.fail_link_to.is_some() && self.fail_link_to == dest_name) {
            return Err(ToolchainError::Failed {
                tool: "fake-link".into(),
                status: "exit status: 1".into(),
                stderr: "symbol multiply defined".into(),
            });
        }
        let mut out = String::new();
        for input in inputs {
            out.push_str(&fs::read_to_string(input).map_err(|e| ToolchainError::io(input, e))?);
            out.push('\n');
        }
        fs::write(dest, out).map_err(|e| ToolchainError::io(dest, e))?;
        Ok(None)
    }

    fn disassemble(&self, src: &Path, dest: &Path) -> Result<(), ToolchainError> {
        copy(src, dest)
    }

    fn assemble(&self, src: &Path, dest: &Path) -> Result<(), ToolchainError> {
        copy(src, dest)
    }

    fn compile_fuzz_executable(
        &self,
        driver: &Path,
        modules: &[PathBuf],
        dest: &Path,
        _scratch: &Path,
    ) -> Result<(), ToolchainError> {
        let mut inputs = modules.to_vec();
        inputs.push(driver.to_path_buf());
        self.link(&inputs, dest).map(|_| ())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// IR-like text defining `functions`, each returning its first argument.
pub fn module_defining(functions: &[&str]) -> String {
    let mut text = String::from("source_filename = \"lib.c\"\n\n");
    for f in functions {
        text.push_str(&format!("define dso_local ptr @{f}(ptr noundef %d, ptr noundef %s) {{\n  ret ptr %d\n}}\n\n"));
    }
    text
}

/// Lay out a library under `parent/<dir>` with one source file per entry.
pub fn write_library(parent: &Path, id: &str, dir: &str, files: &[(&str, String)]) -> LibraryDescriptor {
    let root = parent.join(dir);
    fs::create_dir_all(&root).expect("library root");
    for (name, body) in files {
        fs::write(root.join(name), body).expect("library source");
    }
    LibraryDescriptor::new(id, root).with_sources(files.iter().map(|(name, _)| PathBuf::from(name)))
}

pub const CATALOG: &str = r#"{
    "copy": {"headers": ["string.h"], "signature": "char *copy(char *dst, const char *src);"}
}"#;
