//! Function catalog: the contract every library under test is measured against.
//!
//! A catalog maps a function name to the headers that declare it and, optionally,
//! the C prototype wrappers must use. Two file shapes are accepted per entry:
//!
//! ```json
//! { "strcpy": ["string.h"],
//!   "memcpy": { "headers": ["string.h"], "signature": "void *memcpy(void *dest, const void *src, size_t n);" } }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::language::{Signature, SignatureError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("function '{0}' is not in the catalog")]
    NotFound(String),
    #[error("failed to read catalog {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to parse catalog {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

/// One function of the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    pub headers: BTreeSet<String>,
    pub signature: Option<String>,
}

/// On-disk shape of a catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CatalogEntryFile {
    Headers(Vec<String>),
    Detailed(DetailedEntry),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetailedEntry {
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Read-only catalog keyed by function name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionCatalog {
    entries: BTreeMap<String, FunctionEntry>,
}

impl FunctionCatalog {
    pub fn from_entries(entries: impl IntoIterator<Item = FunctionEntry>) -> Self {
        Self { entries: entries.into_iter().map(|e| (e.name.clone(), e)).collect() }
    }

    /// Build a catalog from the parsed `functions` object of a configuration file.
    pub fn from_file_entries(raw: BTreeMap<String, CatalogEntryFile>) -> Self {
        Self::from_entries(raw.into_iter().map(|(name, entry)| {
            let (headers, signature) = match entry {
                CatalogEntryFile::Headers(headers) => (headers, None),
                CatalogEntryFile::Detailed(d) => (d.headers, d.signature),
            };
            FunctionEntry { name, headers: headers.into_iter().collect(), signature }
        }))
    }

    pub fn from_json_str(body: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, CatalogEntryFile> = serde_json::from_str(body)?;
        Ok(Self::from_file_entries(raw))
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let display = path.display().to_string();
        let body = std::fs::read_to_string(path)
            .map_err(|source| CatalogError::Io { path: display.clone(), source })?;
        Self::from_json_str(&body).map_err(|source| CatalogError::Parse { path: display, source })
    }

    pub fn lookup(&self, name: &str) -> Result<&FunctionEntry, CatalogError> {
        self.entries.get(name).ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Function names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &FunctionEntry> {
        self.entries.values()
    }

    /// Union of every entry's headers, sorted.
    pub fn headers(&self) -> BTreeSet<&str> {
        self.entries.values().flat_map(|e| e.headers.iter().map(String::as_str)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Supplies a prototype for a catalog function that does not carry one.
pub trait SignatureSource: Send + Sync {
    fn signature(&self, function: &str) -> Option<String>;
}

/// Uses nothing but the catalog's own `signature` fields.
pub struct CatalogSignatures;

impl SignatureSource for CatalogSignatures {
    fn signature(&self, _function: &str) -> Option<String> {
        None
    }
}

/// Pulls the prototype out of section 3 of the manual (`man -P cat 3 <name>`).
pub struct ManPageSignatures;

impl SignatureSource for ManPageSignatures {
    fn signature(&self, function: &str) -> Option<String> {
        let output = Command::new("man").args(["-P", "cat", "3", function]).output().ok()?;
        if !output.status.success() {
            return None;
        }
        extract_prototype(&String::from_utf8_lossy(&output.stdout), function)
    }
}

/// Find the first prototype of `function` in man page text, joined onto one line.
pub fn extract_prototype(page: &str, function: &str) -> Option<String> {
    // Man pages render with backspace overstrikes when not piped through col.
    let page: String = {
        let mut out = String::with_capacity(page.len());
        for c in page.chars() {
            if c == '\u{8}' {
                out.pop();
            } else {
                out.push(c);
            }
        }
        out
    };
    let flat = page.split_whitespace().collect::<Vec<_>>().join(" ");
    let needle = format!("{function}(");
    let mut search_from = 0;
    while let Some(found) = flat[search_from..].find(&needle) {
        let at = search_from + found;
        search_from = at + needle.len();
        // Must be a whole identifier, not the tail of a longer name.
        if flat[..at].ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        let Some(end) = flat[at..].find(");") else { continue };
        let start = flat[..at].rfind(|c: char| c == ';' || c == '>' || c == '"').map_or(0, |i| i + 1);
        let candidate = format!("{};", flat[start..at + end + 1].trim());
        if Signature::parse(&candidate, None).is_ok() {
            return Some(candidate);
        }
    }
    None
}

impl FunctionCatalog {
    /// Resolve and parse the prototype for `name`; the catalog's own field wins.
    pub fn signature_of(
        &self,
        name: &str,
        source: &dyn SignatureSource,
        default_array_size: Option<usize>,
    ) -> Result<Signature, SignatureLookupError> {
        let entry = self.lookup(name).map_err(|_| SignatureLookupError::Missing)?;
        let line = entry
            .signature
            .clone()
            .or_else(|| source.signature(name))
            .ok_or(SignatureLookupError::Missing)?;
        let signature =
            Signature::parse(&line, default_array_size).map_err(SignatureLookupError::Invalid)?;
        if signature.name != name {
            return Err(SignatureLookupError::NameMismatch { found: signature.name });
        }
        Ok(signature)
    }
}

/// Why no usable prototype exists for a catalog function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureLookupError {
    #[error("no signature available")]
    Missing,
    #[error(transparent)]
    Invalid(SignatureError),
    #[error("signature declares '{found}' instead")]
    NameMismatch { found: String },
}
