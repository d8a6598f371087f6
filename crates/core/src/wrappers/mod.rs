//! Uniform call wrappers around renamed library functions.
//!
//! Every (catalog function, library) pair the library implements gets a C
//! function named by [`naming::wrapper_symbol`] that forwards its arguments to
//! the renamed implementation. The wrapper's prototype is always the catalog
//! one, so a library whose own declaration disagrees fails to compile instead
//! of being called with the wrong ABI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::catalog::{FunctionCatalog, SignatureLookupError, SignatureSource};
use crate::language::Signature;
use crate::model::WrapperSpec;
use crate::naming;
use crate::rename::RenameMapping;

/// Include guard of the shared wrapper header.
pub const HEADER_GUARD: &str = "DIFFHARNESS_WRAPPERS_H";

/// Prefix of the plain call wrappers (`lib_entry_strcpy`).
pub const CALL_WRAPPER_PREFIX: &str = "lib_entry_";

#[derive(Debug, Error)]
pub enum WrapperError {
    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// Wrapper output for one library.
#[derive(Debug, Clone, Default)]
pub struct LibraryWrappers {
    pub library_id: String,
    pub specs: Vec<WrapperSpec>,
    /// Complete translation unit: includes, target prototypes, wrapper definitions.
    pub source: String,
    /// Functions present in the library for which no wrapper could be emitted.
    pub missing_signatures: Vec<(String, SignatureLookupError)>,
}

impl LibraryWrappers {
    pub fn wrapper_symbols(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.wrapper_symbol.as_str())
    }
}

/// Emits wrappers from catalog prototypes.
///
/// Prototypes are resolved once up front, since a signature source may be
/// expensive (the man page source spawns a process per function).
pub struct WrapperGenerator<'a> {
    catalog: &'a FunctionCatalog,
    signatures: BTreeMap<String, Result<Signature, SignatureLookupError>>,
}

impl<'a> WrapperGenerator<'a> {
    pub fn new(catalog: &'a FunctionCatalog, source: &dyn SignatureSource) -> Self {
        let signatures = catalog
            .names()
            .map(|name| (name.to_string(), catalog.signature_of(name, source, None)))
            .collect();
        Self { catalog, signatures }
    }

    pub fn signature(&self, function: &str) -> Result<&Signature, SignatureLookupError> {
        match self.signatures.get(function) {
            Some(Ok(signature)) => Ok(signature),
            Some(Err(err)) => Err(err.clone()),
            None => Err(SignatureLookupError::Missing),
        }
    }

    /// Wrappers for every catalog function found in `mapping`.
    pub fn generate(&self, mapping: &RenameMapping) -> LibraryWrappers {
        let library_id = mapping.library.as_str();
        let mut out = LibraryWrappers { library_id: library_id.to_string(), ..Default::default() };
        let mut prototypes = Vec::new();
        let mut definitions = Vec::new();

        for function in self.catalog.names() {
            let Some(renamed) = mapping.resolve(function) else { continue };
            let signature = match self.signature(function) {
                Ok(signature) => signature,
                Err(err) => {
                    tracing::warn!(library = library_id, function, error = %err, "skipping wrapper");
                    out.missing_signatures.push((function.to_string(), err));
                    continue;
                }
            };

            let wrapper_symbol = naming::wrapper_symbol(library_id, function);
            let target = signature.fork(renamed);
            let wrapper = signature.fork(wrapper_symbol.as_str());
            prototypes.push(target.declaration());
            definitions.push(wrapper.definition(&wrapper.forward_to(renamed)));

            out.specs.push(WrapperSpec {
                function_name: function.to_string(),
                library_id: library_id.to_string(),
                wrapper_symbol,
                renamed_target_symbol: renamed.to_string(),
                signature: signature.clone(),
            });
        }

        let mut lines = vec![format!("/* Call wrappers for library '{library_id}'. */")];
        lines.extend(self.include_lines());
        lines.push(String::new());
        lines.extend(prototypes);
        lines.push(String::new());
        for definition in definitions {
            lines.push(definition);
            lines.push(String::new());
        }
        out.source = lines.join("\n");
        out
    }

    /// Header declaring every wrapper of every library.
    pub fn shared_header(&self, libraries: &[LibraryWrappers]) -> String {
        let mut lines = vec![format!("#ifndef {HEADER_GUARD}"), format!("#define {HEADER_GUARD}"), String::new()];
        lines.extend(self.include_lines());
        for library in libraries {
            lines.push(String::new());
            lines.push(format!("/* {} */", library.library_id));
            for spec in &library.specs {
                lines.push(spec.signature.fork(spec.wrapper_symbol.as_str()).declaration());
            }
        }
        lines.push(String::new());
        lines.push("#endif".to_string());
        lines.push(String::new());
        lines.join("\n")
    }

    fn include_lines(&self) -> Vec<String> {
        self.catalog.headers().into_iter().map(|h| format!("#include <{h}>")).collect()
    }
}

/// Library-independent `lib_entry_<function>` wrappers calling the public names.
#[derive(Debug, Clone, Default)]
pub struct CallWrappers {
    pub source: String,
    pub header: String,
    pub skipped: Vec<(String, SignatureLookupError)>,
}

pub fn generate_call_wrappers(catalog: &FunctionCatalog, source: &dyn SignatureSource) -> CallWrappers {
    let mut out = CallWrappers::default();
    let includes: Vec<String> =
        catalog.headers().into_iter().map(|h| format!("#include <{h}>")).collect();

    let mut src = includes.clone();
    src.push(String::new());
    let mut header = vec!["#ifndef __CALL_WRAPPERS".to_string(), "#define __CALL_WRAPPERS".to_string(), String::new()];
    header.extend(includes);
    header.push(String::new());

    for function in catalog.names() {
        match catalog.signature_of(function, source, None) {
            Ok(signature) => {
                let entry = signature.fork(format!("{CALL_WRAPPER_PREFIX}{function}"));
                src.push(entry.definition(&entry.forward_to(function)));
                src.push(String::new());
                header.push(entry.declaration());
            }
            Err(err) => {
                tracing::warn!(function, error = %err, "no call wrapper");
                out.skipped.push((function.to_string(), err));
            }
        }
    }
    header.push(String::new());
    header.push("#endif".to_string());
    header.push(String::new());

    out.source = src.join("\n");
    out.header = header.join("\n");
    out
}

/// Generate call wrappers and write them to `source_path` / `header_path`.
pub fn write_call_wrappers(
    catalog: &FunctionCatalog,
    source: &dyn SignatureSource,
    source_path: &Path,
    header_path: &Path,
) -> Result<CallWrappers, WrapperError> {
    let wrappers = generate_call_wrappers(catalog, source);
    for (path, body) in [(source_path, &wrappers.source), (header_path, &wrappers.header)] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|source| WrapperError::Io { path: parent.to_path_buf(), source })?;
        }
        std::fs::write(path, body).map_err(|source| WrapperError::Io { path: path.to_path_buf(), source })?;
    }
    Ok(wrappers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSignatures;
    use crate::rename::rename_ir;

    fn catalog() -> FunctionCatalog {
        FunctionCatalog::from_json_str(
            r#"{
                "strcpy": {"headers": ["string.h"], "signature": "char *strcpy(char *dest, const char *src);"},
                "bzero": {"headers": ["strings.h"], "signature": "void bzero(void *s, size_t n);"},
                "isdigit": ["ctype.h"]
            }"#,
        )
        .unwrap()
    }

    fn mapping() -> RenameMapping {
        let ir = "define ptr @strcpy(ptr %d, ptr %s) {\n  ret ptr %d\n}\n\
                  define void @bzero(ptr %s, i64 %n) {\n  ret void\n}\n\
                  define i32 @isdigit(i32 %c) {\n  ret i32 0\n}\n";
        rename_ir(ir, "musl").unwrap().mapping
    }

    #[test]
    fn wrappers_forward_to_renamed_targets() {
        let catalog = catalog();
        let generator = WrapperGenerator::new(&catalog, &CatalogSignatures);
        let out = generator.generate(&mapping());

        assert_eq!(out.wrapper_symbols().collect::<Vec<_>>(), vec!["entry__musl__bzero", "entry__musl__strcpy"]);
        assert!(out.source.contains("#include <ctype.h>\n#include <string.h>\n#include <strings.h>"));
        assert!(out.source.contains("char *musl_strcpy(char *dest, const char *src);"));
        assert!(out.source.contains(
            "char *entry__musl__strcpy(char *dest, const char *src)\n{\n\treturn musl_strcpy(dest, src);\n}"
        ));
        assert!(out.source.contains("void entry__musl__bzero(void *s, size_t n)\n{\n\tmusl_bzero(s, n);\n}"));

        assert_eq!(out.missing_signatures.len(), 1);
        assert_eq!(out.missing_signatures[0].0, "isdigit");
        assert_eq!(out.missing_signatures[0].1, SignatureLookupError::Missing);
    }

    #[test]
    fn specs_round_trip_through_naming_and_mapping() {
        let catalog = catalog();
        let generator = WrapperGenerator::new(&catalog, &CatalogSignatures);
        let mapping = mapping();
        for spec in generator.generate(&mapping).specs {
            let (library, function) = naming::parse_wrapper(&spec.wrapper_symbol).unwrap();
            assert_eq!(library, spec.library_id);
            assert_eq!(function, spec.function_name);
            assert_eq!(mapping.original_of(&spec.renamed_target_symbol), Some(function.as_str()));
        }
    }

    #[test]
    fn functions_absent_from_mapping_get_no_wrapper() {
        let catalog = catalog();
        let generator = WrapperGenerator::new(&catalog, &CatalogSignatures);
        let partial = rename_ir("define void @bzero(ptr %s, i64 %n) {\n  ret void\n}\n", "diet").unwrap();
        let out = generator.generate(&partial.mapping);
        assert_eq!(out.wrapper_symbols().collect::<Vec<_>>(), vec!["entry__diet__bzero"]);
        assert!(out.missing_signatures.is_empty());
    }

    #[test]
    fn shared_header_declares_all_libraries() {
        let catalog = catalog();
        let generator = WrapperGenerator::new(&catalog, &CatalogSignatures);
        let a = generator.generate(&mapping());
        let b = generator.generate(&rename_ir("define ptr @strcpy(ptr %d, ptr %s) {\n  ret ptr %d\n}\n", "diet").unwrap().mapping);
        let header = generator.shared_header(&[a, b]);
        assert!(header.starts_with("#ifndef DIFFHARNESS_WRAPPERS_H\n#define DIFFHARNESS_WRAPPERS_H\n"));
        assert!(header.contains("char *entry__musl__strcpy(char *dest, const char *src);"));
        assert!(header.contains("char *entry__diet__strcpy(char *dest, const char *src);"));
        assert!(header.trim_end().ends_with("#endif"));
    }

    #[test]
    fn call_wrappers_are_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("wrappers/call_wrappers.c");
        let hdr = dir.path().join("wrappers/call_wrappers.h");
        let out = write_call_wrappers(&catalog(), &CatalogSignatures, &src, &hdr).unwrap();
        let body = std::fs::read_to_string(&src).unwrap();
        assert!(body.contains("char *lib_entry_strcpy(char *dest, const char *src)\n{\n\treturn strcpy(dest, src);\n}"));
        let header = std::fs::read_to_string(&hdr).unwrap();
        assert!(header.contains("void lib_entry_bzero(void *s, size_t n);"));
        assert!(header.starts_with("#ifndef __CALL_WRAPPERS"));
        assert_eq!(out.skipped.len(), 1);
    }
}
