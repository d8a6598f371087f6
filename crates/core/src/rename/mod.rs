//! Symbol renaming on LLVM IR text.
//!
//! Every externally visible symbol a library defines is moved into the
//! library's namespace (see [`crate::naming`]); references inside the same
//! artifact are rewritten with it. Symbols the library only declares are left
//! alone so they still resolve against the execution environment.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::naming::{self, NamingError};

/// Linkage keywords that make a global invisible outside its module, or mark
/// it as a mere declaration.
const HIDDEN_GLOBAL_LINKAGE: &[&str] = &["internal", "private", "appending", "external", "extern_weak"];
const HIDDEN_FUNCTION_LINKAGE: &[&str] = &["internal", "private"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenameError {
    /// Two (library, symbol) pairs would share one name in the combined blob.
    #[error("rename collision on '{symbol}': claimed by {first} and {second}")]
    Collision { symbol: String, first: String, second: String },
    #[error(transparent)]
    Naming(#[from] NamingError),
}

/// Original-to-renamed symbol table of one library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameMapping {
    pub library: String,
    pub symbols: BTreeMap<String, String>,
    /// Symbols the artifact references without defining them.
    #[serde(default)]
    pub external_refs: BTreeSet<String>,
}

impl RenameMapping {
    pub fn new(library: impl Into<String>) -> Self {
        Self { library: library.into(), ..Default::default() }
    }

    pub fn resolve(&self, original: &str) -> Option<&str> {
        self.symbols.get(original).map(String::as_str)
    }

    pub fn original_of(&self, renamed: &str) -> Option<&str> {
        self.symbols.iter().find(|(_, r)| r.as_str() == renamed).map(|(o, _)| o.as_str())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Result of renaming one artifact.
#[derive(Debug, Clone)]
pub struct RenamedIr {
    pub mapping: RenameMapping,
    pub ir: String,
}

/// Defined and referenced global symbols of an IR module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    pub defined: BTreeSet<String>,
    pub declared: BTreeSet<String>,
}

fn global_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^@("[^"]*"|[-a-zA-Z$._][-a-zA-Z$._0-9]*)\s*=\s*(.*)$"#)
            .expect("valid global regex")
    })
}

fn function_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(define|declare)\b([^@]*)@("[^"]*"|[-a-zA-Z$._][-a-zA-Z$._0-9]*)\("#)
            .expect("valid function regex")
    })
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?P<string>[c!]?"[^"]*")|@(?P<quoted>"[^"]*")|@(?P<plain>[-a-zA-Z$._][-a-zA-Z$._0-9]*)"#)
            .expect("valid token regex")
    })
}

fn unquote(name: &str) -> &str {
    name.strip_prefix('"').and_then(|n| n.strip_suffix('"')).unwrap_or(name)
}

fn has_word(text: &str, words: &[&str]) -> bool {
    text.split_whitespace().any(|w| words.contains(&w))
}

/// Collect externally visible definitions and pure declarations of `ir`.
pub fn scan_symbols(ir: &str) -> SymbolTable {
    let mut table = SymbolTable::default();
    for line in ir.lines() {
        let line = line.trim_end();
        if let Some(caps) = global_def_re().captures(line) {
            let name = unquote(&caps[1]).to_string();
            let rest = &caps[2];
            let first_word = rest.split_whitespace().next().unwrap_or("");
            if matches!(first_word, "external" | "extern_weak") {
                table.declared.insert(name);
            } else if !has_word(first_word, HIDDEN_GLOBAL_LINKAGE) {
                table.defined.insert(name);
            }
        } else if let Some(caps) = function_def_re().captures(line) {
            let name = unquote(&caps[3]).to_string();
            if &caps[1] == "declare" {
                table.declared.insert(name);
            } else if !has_word(&caps[2], HIDDEN_FUNCTION_LINKAGE) {
                table.defined.insert(name);
            }
        }
    }
    // A module can declare and later define the same symbol.
    table.declared = table.declared.difference(&table.defined).cloned().collect();
    table
}

/// Rewrite every `@symbol` token found in `mapping`, leaving string literals intact.
pub fn substitute(ir: &str, mapping: &BTreeMap<String, String>) -> String {
    token_re()
        .replace_all(ir, |caps: &Captures<'_>| {
            if let Some(quoted) = caps.name("quoted") {
                let name = unquote(quoted.as_str());
                match mapping.get(name) {
                    Some(renamed) => format!("@\"{renamed}\""),
                    None => caps[0].to_string(),
                }
            } else if let Some(plain) = caps.name("plain") {
                match mapping.get(plain.as_str()) {
                    Some(renamed) => format!("@{renamed}"),
                    None => caps[0].to_string(),
                }
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Move every externally visible definition of `ir` into `library_id`'s namespace.
pub fn rename_ir(ir: &str, library_id: &str) -> Result<RenamedIr, RenameError> {
    naming::validate_library_id(library_id)?;
    let table = scan_symbols(ir);

    let mut mapping = RenameMapping::new(library_id);
    let mut owners: BTreeMap<String, String> = BTreeMap::new();
    for symbol in &table.defined {
        let renamed = naming::renamed_symbol(library_id, symbol);
        if let Some(previous) = owners.insert(renamed.clone(), symbol.clone()) {
            return Err(RenameError::Collision {
                symbol: renamed,
                first: format!("{library_id}:{previous}"),
                second: format!("{library_id}:{symbol}"),
            });
        }
        if table.declared.contains(&renamed) {
            return Err(RenameError::Collision {
                symbol: renamed,
                first: format!("{library_id}:{symbol}"),
                second: format!("{library_id}:<external reference>"),
            });
        }
        mapping.symbols.insert(symbol.clone(), renamed);
    }
    mapping.external_refs = table.declared;

    let ir = substitute(ir, &mapping.symbols);
    Ok(RenamedIr { mapping, ir })
}

/// Append-only record of every renamed symbol claimed in one build run.
///
/// Libraries are renamed independently and merged here afterwards in a fixed
/// order, which keeps the collision check independent of task completion order.
#[derive(Debug, Clone, Default)]
pub struct NamespaceLedger {
    claimed: BTreeMap<String, (String, String)>,
    referenced: BTreeMap<String, String>,
}

impl NamespaceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge mappings in the given order, stopping at the first collision.
    pub fn merge<'a>(
        mappings: impl IntoIterator<Item = &'a RenameMapping>,
    ) -> Result<Self, RenameError> {
        let mut ledger = Self::new();
        for mapping in mappings {
            ledger.claim(mapping)?;
        }
        Ok(ledger)
    }

    pub fn claim(&mut self, mapping: &RenameMapping) -> Result<(), RenameError> {
        for (original, renamed) in &mapping.symbols {
            if let Some((library, previous)) = self.claimed.get(renamed) {
                return Err(RenameError::Collision {
                    symbol: renamed.clone(),
                    first: format!("{library}:{previous}"),
                    second: format!("{}:{original}", mapping.library),
                });
            }
            if let Some(library) = self.referenced.get(renamed) {
                return Err(RenameError::Collision {
                    symbol: renamed.clone(),
                    first: format!("{library}:<external reference>"),
                    second: format!("{}:{original}", mapping.library),
                });
            }
        }
        for reference in &mapping.external_refs {
            if let Some((library, original)) = self.claimed.get(reference) {
                return Err(RenameError::Collision {
                    symbol: reference.clone(),
                    first: format!("{library}:{original}"),
                    second: format!("{}:<external reference>", mapping.library),
                });
            }
        }

        for (original, renamed) in &mapping.symbols {
            self.claimed.insert(renamed.clone(), (mapping.library.clone(), original.clone()));
        }
        for reference in &mapping.external_refs {
            self.referenced.entry(reference.clone()).or_insert_with(|| mapping.library.clone());
        }
        Ok(())
    }

    /// Which `(library, original)` pair owns `renamed`, if any.
    pub fn owner(&self, renamed: &str) -> Option<(&str, &str)> {
        self.claimed.get(renamed).map(|(l, o)| (l.as_str(), o.as_str()))
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}
