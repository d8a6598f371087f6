//! Configuration files: per-library `config.json`, builder and crafter configs.
//!
//! Files ending in `.json` are parsed as JSON, anything else as YAML. Relative
//! paths inside a config resolve against the directory holding that config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{CatalogEntryFile, CatalogError, FunctionCatalog};
use crate::model::{absolute_path, build_dir_for, LibraryDescriptor};
use crate::naming::{self, NamingError};
use crate::toolchain::ToolchainConfig;

/// File name of the per-library configuration.
pub const LIBRARY_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse JSON config {path}: {source}")]
    Json { path: PathBuf, source: serde_json::Error },
    #[error("failed to parse YAML config {path}: {source}")]
    Yaml { path: PathBuf, source: serde_yaml::Error },
    #[error("{0} already exists (use --force to overwrite)")]
    AlreadyExists(PathBuf),
    #[error("invalid config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Parse `path` as JSON or YAML depending on its extension.
pub fn load_structured<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let body = std::fs::read(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_slice(&body).map_err(|source| ConfigError::Json { path: path.to_path_buf(), source })
    } else {
        serde_yaml::from_slice(&body).map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })
    }
}

/// Absolute directory holding `path`.
fn base_dir(path: &Path) -> PathBuf {
    let path = absolute_path(path);
    path.parent().map(Path::to_path_buf).unwrap_or(path)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Per-library configuration, stored as `<library root>/config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    pub config_version: String,
    /// Library id; doubles as the renaming namespace.
    pub name: String,
    /// Source directory, relative to the library root.
    pub directory: String,
    /// Extra compiler flags, whitespace separated.
    #[serde(default)]
    pub compiler_flags: String,
    /// Source files (`*.c`) or directories scanned non-recursively for them.
    #[serde(default)]
    pub traversals: Vec<String>,
    /// Linked artifact name, relative to the build directory.
    pub target: String,
}

impl LibraryConfig {
    /// Template written by `introduce`.
    pub fn template() -> Self {
        Self {
            config_version: "0.1.0".to_string(),
            name: "<insert library id>".to_string(),
            directory: "<insert source directory>".to_string(),
            compiler_flags: "<insert compiler flags (like include flags)>".to_string(),
            traversals: Vec::new(),
            target: "./here_name_of_target.bc".to_string(),
        }
    }

    /// Write the template into `library_root`, refusing to clobber unless `force`.
    pub fn write_default(library_root: &Path, force: bool) -> Result<PathBuf, ConfigError> {
        let path = library_root.join(LIBRARY_CONFIG_FILE);
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path));
        }
        let body = serde_json::to_string_pretty(&Self::template())
            .map_err(|source| ConfigError::Json { path: path.clone(), source })?;
        std::fs::write(&path, body).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        Ok(path)
    }

    pub fn load(library_root: &Path) -> Result<Self, ConfigError> {
        load_structured(&library_root.join(LIBRARY_CONFIG_FILE))
    }

    /// Resolve paths and enumerate sources into a [`LibraryDescriptor`].
    pub fn descriptor(&self, library_root: &Path) -> Result<LibraryDescriptor, ConfigError> {
        naming::validate_library_id(&self.name)?;
        let source_root = absolute_path(&library_root.join(self.directory.trim_end_matches('/')));
        let build_dir = build_dir_for(&source_root);
        let target = build_dir.join(&self.target);
        let source_files = self.sources(&source_root)?;
        Ok(LibraryDescriptor {
            id: self.name.clone(),
            source_root,
            build_dir,
            target,
            compiler_flags: self.compiler_flags.split_whitespace().map(str::to_string).collect(),
            source_files,
        })
    }

    /// Source files relative to `source_root`, in traversal order.
    pub fn sources(&self, source_root: &Path) -> Result<Vec<PathBuf>, ConfigError> {
        let mut out = Vec::new();
        for traversal in &self.traversals {
            if traversal.ends_with(".c") {
                out.push(PathBuf::from(traversal));
                continue;
            }
            let dir = source_root.join(traversal);
            let entries = std::fs::read_dir(&dir).map_err(|source| ConfigError::Io { path: dir.clone(), source })?;
            let mut found = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| ConfigError::Io { path: dir.clone(), source })?;
                let path = entry.path();
                if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("c") {
                    let rel = path.strip_prefix(source_root).map(Path::to_path_buf).unwrap_or(path);
                    found.push(normalize_relative(&rel));
                }
            }
            found.sort();
            out.extend(found);
        }
        Ok(out)
    }
}

/// Drop `.` components so `./strcpy.c` and `strcpy.c` compare equal.
fn normalize_relative(path: &Path) -> PathBuf {
    path.components().filter(|c| !matches!(c, std::path::Component::CurDir)).collect()
}

/// Load the descriptor of the library rooted at `library_root`.
pub fn load_library(library_root: &Path) -> Result<LibraryDescriptor, ConfigError> {
    LibraryConfig::load(library_root)?.descriptor(library_root)
}

/// Configuration of `build` and `wrappers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuilderConfig {
    /// Library roots (each holding a `config.json`).
    pub libs: Vec<PathBuf>,
    /// Catalog file; optional when `functions` is given inline.
    #[serde(default)]
    pub function_list: Option<PathBuf>,
    /// Output path of the plain `lib_entry_*` call wrapper source.
    #[serde(default)]
    pub wrappers: Option<PathBuf>,
    #[serde(default)]
    pub wrappers_header: Option<PathBuf>,
    #[serde(default)]
    pub functions: Option<BTreeMap<String, CatalogEntryFile>>,
    /// Combined blob path; defaults to `blob.bc` next to the config.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

/// A builder config together with the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedBuilderConfig {
    pub config: BuilderConfig,
    pub base_dir: PathBuf,
    pub path: PathBuf,
}

impl BuilderConfig {
    pub fn load(path: &Path) -> Result<LoadedBuilderConfig, ConfigError> {
        let config: BuilderConfig = load_structured(path)?;
        Ok(LoadedBuilderConfig { config, base_dir: base_dir(path), path: path.to_path_buf() })
    }
}

impl LoadedBuilderConfig {
    /// Inline `functions` win over `function_list`.
    pub fn catalog(&self) -> Result<FunctionCatalog, ConfigError> {
        if let Some(functions) = &self.config.functions {
            return Ok(FunctionCatalog::from_file_entries(functions.clone()));
        }
        match &self.config.function_list {
            Some(list) => Ok(FunctionCatalog::load(&resolve(&self.base_dir, list))?),
            None => Err(ConfigError::Invalid {
                path: self.path.clone(),
                reason: "neither 'functions' nor 'function_list' is set".to_string(),
            }),
        }
    }

    /// Descriptors of every configured library, in config order.
    pub fn libraries(&self) -> Result<Vec<LibraryDescriptor>, ConfigError> {
        self.config.libs.iter().map(|lib| load_library(&resolve(&self.base_dir, lib))).collect()
    }

    pub fn output_path(&self) -> PathBuf {
        match &self.config.output {
            Some(out) => resolve(&self.base_dir, out),
            None => self.base_dir.join("blob.bc"),
        }
    }

    pub fn wrappers_path(&self) -> Option<PathBuf> {
        self.config.wrappers.as_deref().map(|p| resolve(&self.base_dir, p))
    }

    pub fn wrappers_header_path(&self) -> Option<PathBuf> {
        self.config.wrappers_header.as_deref().map(|p| resolve(&self.base_dir, p))
    }
}

/// Execution engine a harness is assembled for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Symex,
    Fuzzing,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Symex => "symex",
            Engine::Fuzzing => "fuzzing",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymexConfig {
    /// Directory holding the engine's support headers (`klee/klee.h`).
    pub headers: PathBuf,
}

/// Configuration of `craft` and `generate-driver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrafterConfig {
    /// Library ids included in a harness, in result-vector order.
    pub libs: Vec<String>,
    #[serde(default)]
    pub symex: SymexConfig,
    /// Buffer length for pointer arguments of generated drivers.
    #[serde(default = "default_array_width")]
    pub general_max_array_width: usize,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

fn default_array_width() -> usize {
    16
}

impl CrafterConfig {
    /// Load, validate ids and resolve the header directory against the config location.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: CrafterConfig = load_structured(path)?;
        for lib in &config.libs {
            naming::validate_library_id(lib)?;
        }
        if config.libs.is_empty() {
            return Err(ConfigError::Invalid { path: path.to_path_buf(), reason: "'libs' is empty".into() });
        }
        if config.general_max_array_width == 0 {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "'general_max_array_width' must be positive".into(),
            });
        }
        if !config.symex.headers.as_os_str().is_empty() {
            config.symex.headers = resolve(&base_dir(path), &config.symex.headers);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_library(root: &Path, name: &str, traversals: &[&str]) {
        let src = root.join("src");
        std::fs::create_dir_all(src.join("string")).unwrap();
        std::fs::write(src.join("string/strcpy.c"), "int x;").unwrap();
        std::fs::write(src.join("string/strlen.c"), "int y;").unwrap();
        std::fs::write(src.join("string/notes.txt"), "").unwrap();
        std::fs::create_dir_all(src.join("string/nested")).unwrap();
        std::fs::write(src.join("string/nested/deep.c"), "").unwrap();
        let config = LibraryConfig {
            config_version: "0.1.0".into(),
            name: name.into(),
            directory: "src/".into(),
            compiler_flags: "-Iinclude  -DFOO".into(),
            traversals: traversals.iter().map(|s| s.to_string()).collect(),
            target: "lib.bc".into(),
        };
        std::fs::write(root.join(LIBRARY_CONFIG_FILE), serde_json::to_string(&config).unwrap()).unwrap();
    }

    #[test]
    fn library_descriptor_resolves_sources_and_paths() {
        let dir = tempdir().unwrap();
        write_library(dir.path(), "musl", &["string", "extra/memcpy.c"]);
        let lib = load_library(dir.path()).unwrap();
        assert_eq!(lib.id, "musl");
        assert_eq!(lib.source_root, dir.path().join("src"));
        assert_eq!(lib.build_dir, dir.path().join("src-build"));
        assert_eq!(lib.target, dir.path().join("src-build/lib.bc"));
        assert_eq!(lib.compiler_flags, vec!["-Iinclude", "-DFOO"]);
        assert_eq!(
            lib.source_files,
            vec![
                PathBuf::from("string/strcpy.c"),
                PathBuf::from("string/strlen.c"),
                PathBuf::from("extra/memcpy.c")
            ]
        );
    }

    #[test]
    fn library_ids_are_validated() {
        let dir = tempdir().unwrap();
        write_library(dir.path(), "my_lib", &[]);
        assert!(matches!(load_library(dir.path()), Err(ConfigError::Naming(_))));
    }

    #[test]
    fn default_config_is_not_overwritten_without_force() {
        let dir = tempdir().unwrap();
        let path = LibraryConfig::write_default(dir.path(), false).unwrap();
        let written = LibraryConfig::load(dir.path()).unwrap();
        assert_eq!(written, LibraryConfig::template());
        assert!(matches!(
            LibraryConfig::write_default(dir.path(), false),
            Err(ConfigError::AlreadyExists(p)) if p == path
        ));
        assert!(LibraryConfig::write_default(dir.path(), true).is_ok());
    }

    #[test]
    fn builder_config_accepts_yaml_and_inline_functions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("builder.yaml");
        std::fs::write(
            &path,
            "libs: [libs/musl]\nfunctions:\n  strcpy: [string.h]\noutput: out/blob.bc\ntoolchain:\n  timeout_secs: 30\n",
        )
        .unwrap();
        let loaded = BuilderConfig::load(&path).unwrap();
        assert_eq!(loaded.catalog().unwrap().names().collect::<Vec<_>>(), vec!["strcpy"]);
        assert_eq!(loaded.output_path(), dir.path().join("out/blob.bc"));
        assert_eq!(loaded.config.toolchain.timeout_secs, Some(30));
        assert_eq!(loaded.wrappers_path(), None);
    }

    #[test]
    fn builder_config_rejects_unknown_fields_and_missing_catalog() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"libs": [], "function_lists": "x.json"}"#).unwrap();
        assert!(matches!(BuilderConfig::load(&bad), Err(ConfigError::Json { .. })));

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, r#"{"libs": []}"#).unwrap();
        let loaded = BuilderConfig::load(&empty).unwrap();
        assert!(matches!(loaded.catalog(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn crafter_config_defaults_and_validation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crafter.json");
        std::fs::write(&path, r#"{"libs": ["musl", "diet"], "symex": {"headers": "klee/include"}}"#).unwrap();
        let config = CrafterConfig::load(&path).unwrap();
        assert_eq!(config.engine, Engine::Symex);
        assert_eq!(config.general_max_array_width, 16);
        assert_eq!(config.symex.headers, dir.path().join("klee/include"));

        std::fs::write(&path, r#"{"libs": ["musl"], "engine": "fuzzing", "general_max_array_width": 0}"#).unwrap();
        assert!(matches!(CrafterConfig::load(&path), Err(ConfigError::Invalid { .. })));

        std::fs::write(&path, r#"{"libs": ["mu_sl"]}"#).unwrap();
        assert!(matches!(CrafterConfig::load(&path), Err(ConfigError::Naming(_))));
    }
}
