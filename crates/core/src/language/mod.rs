//! Minimal model of C function prototypes.
//!
//! Wrappers and drivers are emitted as C source text, so the pipeline needs a
//! small representation of a prototype it can parse from a catalog entry and
//! print back out as declarations, definitions and call sites.

use std::fmt;

use thiserror::Error;

/// Type names that may appear alone in an unnamed parameter (`int isdigit(int);`).
const BARE_TYPE_WORDS: &[&str] =
    &["void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "_Bool"];

const POINTER_QUALIFIERS: &[&str] = &["restrict", "__restrict", "__restrict__"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed C declaration '{0}'")]
    Malformed(String),
    #[error("unsupported C declaration '{line}': {reason}")]
    Unsupported { line: String, reason: &'static str },
}

/// A C variable: parameter, return slot or driver local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Base type including qualifiers, without pointer stars (e.g. `const char`).
    pub ty: String,
    pub name: String,
    pub ptr_depth: usize,
    /// Buffer length used when a driver materializes a pointer argument as an array.
    pub array_size: Option<usize>,
    /// Initial value used by drivers (`char *ptr = dest;`).
    pub value: Option<String>,
}

impl Variable {
    pub fn new(ty: impl Into<String>, name: impl Into<String>, ptr_depth: usize) -> Self {
        Self { ty: ty.into(), name: name.into(), ptr_depth, array_size: None, value: None }
    }

    /// Parse a single parameter declaration such as `const char *restrict src`.
    ///
    /// Unnamed parameters (`size_t`) get an empty name; callers assign one.
    pub fn parse(line: &str, array_size: Option<usize>) -> Result<Self, SignatureError> {
        let text = line.trim().trim_end_matches(';').trim();
        if text.is_empty() {
            return Err(SignatureError::Malformed(line.to_string()));
        }

        // Trailing `[]` / `[N]` turns into one more pointer level.
        let (text, array_levels) = strip_array_suffix(text);

        let (head, ident) = split_trailing_ident(text);
        let head = head.trim_end();
        let (name, mut head) = match ident {
            Some(ident)
                if !head.is_empty()
                    && !POINTER_QUALIFIERS.contains(&ident)
                    && !(BARE_TYPE_WORDS.contains(&ident) && !head.ends_with('*')) =>
            {
                (ident.to_string(), head)
            }
            _ => (String::new(), text),
        };

        // `char *restrict dst`: the qualifier belongs to the pointer, not the type.
        for qualifier in POINTER_QUALIFIERS.iter().copied() {
            if let Some(stripped) = head.strip_suffix(qualifier) {
                if stripped.ends_with(|c: char| c == '*' || c.is_whitespace()) {
                    head = stripped.trim_end();
                }
            }
        }

        let mut ptr_depth = array_levels;
        let mut ty = head;
        loop {
            let trimmed = ty.trim_end();
            match trimmed.strip_suffix('*') {
                Some(rest) => {
                    ptr_depth += 1;
                    ty = rest;
                }
                None => {
                    ty = trimmed;
                    break;
                }
            }
        }

        let ty = ty.split_whitespace().collect::<Vec<_>>().join(" ");
        if ty.is_empty() {
            return Err(SignatureError::Malformed(line.to_string()));
        }

        let array_size = if ptr_depth > 0 { array_size } else { None };
        Ok(Self { ty, name, ptr_depth, array_size, value: None })
    }

    pub fn is_ptr(&self) -> bool {
        self.ptr_depth > 0
    }

    pub fn is_void(&self) -> bool {
        self.ty == "void" && self.ptr_depth == 0
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Type as written in a declaration, e.g. `char *` or `unsigned int`.
    pub fn type_str(&self) -> String {
        if self.ptr_depth > 0 {
            format!("{} {}", self.ty, "*".repeat(self.ptr_depth))
        } else {
            self.ty.clone()
        }
    }

    /// Type with qualifiers dropped, used for writable driver locals.
    pub fn base_type(&self) -> String {
        self.ty
            .split_whitespace()
            .filter(|w| !matches!(*w, "const" | "volatile"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ptr_depth > 0 {
            write!(f, "{}{}", self.type_str(), self.name)
        } else {
            write!(f, "{} {}", self.ty, self.name)
        }
    }
}

/// Parsed prototype: name, return slot and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub args: Vec<Variable>,
    pub ret: Variable,
}

impl Signature {
    /// Parse a prototype like `char *strcpy(char *dest, const char *src);`.
    ///
    /// Pointer parameters receive `default_array_size` so drivers know how large a
    /// buffer to allocate for them.
    pub fn parse(line: &str, default_array_size: Option<usize>) -> Result<Self, SignatureError> {
        let text = line.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = text.trim().trim_end_matches(';').trim();
        let malformed = || SignatureError::Malformed(line.to_string());

        if !text.ends_with(')') {
            return Err(malformed());
        }
        let open = matching_open_paren(text).ok_or_else(malformed)?;
        let params = &text[open + 1..text.len() - 1];
        let head = text[..open].trim_end();

        if head.ends_with(')') || params.contains('(') {
            return Err(SignatureError::Unsupported {
                line: line.to_string(),
                reason: "function pointers are not supported",
            });
        }

        let ret_decl = Variable::parse(head, None)?;
        if ret_decl.name.is_empty() {
            return Err(malformed());
        }
        let name = ret_decl.name.clone();
        let ret = Variable { name: "unnamed".to_string(), ..ret_decl };

        let mut args = Vec::new();
        let params = params.trim();
        if !params.is_empty() && params != "void" {
            for (idx, raw) in params.split(',').enumerate() {
                let raw = raw.trim();
                if raw == "..." {
                    return Err(SignatureError::Unsupported {
                        line: line.to_string(),
                        reason: "variadic functions cannot be forwarded",
                    });
                }
                let mut var = Variable::parse(raw, default_array_size)?;
                if var.is_void() {
                    return Err(malformed());
                }
                if var.name.is_empty() {
                    var.name = format!("arg{idx}");
                }
                args.push(var);
            }
        }

        Ok(Self { name, args, ret })
    }

    /// Copy this prototype under a new name; the return slot becomes `ret_<name>`.
    pub fn fork(&self, name: impl Into<String>) -> Function {
        let name = name.into();
        let mut ret = self.ret.clone();
        ret.rename(format!("ret_{name}"));
        Function { signature: Signature { name, args: self.args.clone(), ret } }
    }
}

/// A named prototype that can be printed as C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub signature: Signature,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn ret(&self) -> &Variable {
        &self.signature.ret
    }

    pub fn ret_mut(&mut self) -> &mut Variable {
        &mut self.signature.ret
    }

    pub fn args(&self) -> &[Variable] {
        &self.signature.args
    }

    fn head(&self) -> String {
        let args = if self.signature.args.is_empty() {
            "void".to_string()
        } else {
            self.signature.args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
        };
        let ret = &self.signature.ret;
        if ret.is_ptr() {
            format!("{}{}({})", ret.type_str(), self.signature.name, args)
        } else {
            format!("{} {}({})", ret.type_str(), self.signature.name, args)
        }
    }

    /// `int isdigit(int c);`
    pub fn declaration(&self) -> String {
        format!("{};", self.head())
    }

    /// Full definition with `body` indented by one tab per line.
    pub fn definition(&self, body: &str) -> String {
        let mut lines = vec![self.head(), "{".to_string()];
        lines.extend(body.lines().map(|l| format!("\t{l}")));
        lines.push("}".to_string());
        lines.join("\n")
    }

    /// Driver call site storing the result in the return slot.
    ///
    /// Pointer arguments deeper than one level are declared one level shallower
    /// by drivers and therefore passed by address.
    pub fn call(&self) -> String {
        let args = self
            .signature
            .args
            .iter()
            .map(|a| {
                if a.ptr_depth > 1 || (a.ptr_depth == 1 && !is_buffer_type(a)) {
                    format!("&{}", a.name)
                } else {
                    a.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        if self.signature.ret.is_void() {
            format!("{}({});", self.signature.name, args)
        } else {
            format!("{} = {}({});", self.signature.ret.name, self.signature.name, args)
        }
    }

    /// Body forwarding every parameter unchanged to `target`.
    pub fn forward_to(&self, target: &str) -> String {
        let args =
            self.signature.args.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ");
        if self.signature.ret.is_void() {
            format!("{target}({args});")
        } else {
            format!("return {target}({args});")
        }
    }
}

/// Pointers to `char`/`void` are materialized as byte buffers by drivers.
pub fn is_buffer_type(var: &Variable) -> bool {
    var.ptr_depth == 1 && matches!(var.base_type().as_str(), "char" | "void" | "unsigned char")
}

fn strip_array_suffix(text: &str) -> (&str, usize) {
    let mut text = text.trim_end();
    let mut levels = 0;
    while text.ends_with(']') {
        match text.rfind('[') {
            Some(open) => {
                text = text[..open].trim_end();
                levels += 1;
            }
            None => break,
        }
    }
    (text, levels)
}

fn split_trailing_ident(text: &str) -> (&str, Option<&str>) {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i);
    match start {
        Some(i) if !text[i..].starts_with(|c: char| c.is_ascii_digit()) => {
            (&text[..i], Some(&text[i..]))
        }
        _ => (text, None),
    }
}

fn matching_open_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices().rev() {
        match c {
            ')' => depth += 1,
            '(' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
