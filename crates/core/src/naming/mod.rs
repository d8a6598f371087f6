//! Library-qualified symbol naming.
//!
//! Two encodings live here:
//!
//! - **renamed symbols**: `<leading underscores><library id>_<rest>`, e.g.
//!   `__stpcpy` in library `musl` becomes `__musl_stpcpy`.
//! - **wrapper symbols**: `entry__<library id>__<function>`, e.g.
//!   `entry__musl__strcpy`.
//!
//! Library ids match `[A-Za-z][A-Za-z0-9]*`. Since an id never contains `_`
//! and the rest of a renamed symbol never starts with `_`, both encodings can
//! be decoded back to their inputs, and no wrapper symbol can ever be produced
//! by the renaming encoding (it would need `__` right after the id's prefix).

use thiserror::Error;

/// Prefix shared by every wrapper symbol.
pub const WRAPPER_PREFIX: &str = "entry__";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("invalid library id '{0}': ids must match [A-Za-z][A-Za-z0-9]*")]
    InvalidLibraryId(String),
}

/// Check that `id` can serve as a namespace token.
pub fn validate_library_id(id: &str) -> Result<(), NamingError> {
    let mut chars = id.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(NamingError::InvalidLibraryId(id.to_string()))
    }
}

/// Library-qualified name for `symbol` defined by library `library_id`.
pub fn renamed_symbol(library_id: &str, symbol: &str) -> String {
    let rest = symbol.trim_start_matches('_');
    let underscores = &symbol[..symbol.len() - rest.len()];
    format!("{underscores}{library_id}_{rest}")
}

/// Uniform entry point for `function` as implemented by `library_id`.
pub fn wrapper_symbol(library_id: &str, function: &str) -> String {
    format!("{WRAPPER_PREFIX}{library_id}__{function}")
}

/// Invert [`renamed_symbol`], returning `(library_id, original_symbol)`.
pub fn parse_renamed(renamed: &str) -> Option<(String, String)> {
    let body = renamed.trim_start_matches('_');
    let underscores = &renamed[..renamed.len() - body.len()];
    let (id, rest) = body.split_once('_')?;
    if validate_library_id(id).is_err() || rest.starts_with('_') {
        return None;
    }
    Some((id.to_string(), format!("{underscores}{rest}")))
}

/// Invert [`wrapper_symbol`], returning `(library_id, function)`.
pub fn parse_wrapper(symbol: &str) -> Option<(String, String)> {
    let body = symbol.strip_prefix(WRAPPER_PREFIX)?;
    let (id, function) = body.split_once("__")?;
    if validate_library_id(id).is_err() || function.is_empty() {
        return None;
    }
    Some((id.to_string(), function.to_string()))
}
