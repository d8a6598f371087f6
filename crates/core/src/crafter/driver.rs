//! Test driver generation.
//!
//! A driver declares one input set, calls every library's wrapper on it and,
//! with more than one library, clusters the return values in C and aborts
//! with a `<lib>:<representative lib>` line per library when they diverge.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::Engine;
use crate::language::{is_buffer_type, Function, Signature, Variable};
use crate::naming;

/// Name of the generated abort function.
pub const ABORT_FUNCTION: &str = "diffharness_abort";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("no libraries to drive")]
    NoLibraries,
    #[error("argument '{name}' of type '{ty}' cannot be read from fuzzing input")]
    UnsupportedFuzzType { name: String, ty: String },
}

/// Generated driver source plus the seed inputs a fuzzer starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Driver {
    pub source: String,
    /// Seed file name suffix -> content. Empty for symbolic execution.
    pub testcases: BTreeMap<String, String>,
}

pub struct DriverGenerator<'a> {
    signature: &'a Signature,
    libs: &'a [String],
    headers: Vec<String>,
    engine: Engine,
    array_width: usize,
}

impl<'a> DriverGenerator<'a> {
    pub fn new(signature: &'a Signature, libs: &'a [String], engine: Engine, array_width: usize) -> Self {
        Self { signature, libs, headers: Vec::new(), engine, array_width }
    }

    /// Headers included before the wrapper declarations (usually the catalog's).
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Entry point of `lib`: the wrapper prototype with a per-library return slot.
    fn entry(&self, lib: &str) -> Function {
        let mut entry = self.signature.fork(naming::wrapper_symbol(lib, &self.signature.name));
        entry.ret_mut().rename(format!("ret_{lib}"));
        entry
    }

    fn width(&self, arg: &Variable) -> usize {
        arg.array_size.unwrap_or(self.array_width).max(1)
    }

    fn returns_value(&self) -> bool {
        !self.signature.ret.is_void()
    }

    pub fn generate(&self) -> Result<Driver, DriverError> {
        if self.libs.is_empty() {
            return Err(DriverError::NoLibraries);
        }
        let n = self.libs.len();
        let multi = n > 1;
        let entries: Vec<Function> = self.libs.iter().map(|l| self.entry(l)).collect();
        let mut testcases = BTreeMap::new();

        let mut code = vec![format!(
            "/* Differential test driver for '{}' ({} engine). */",
            self.signature.name,
            self.engine.as_str()
        )];
        match self.engine {
            Engine::Symex => code.push("#include <klee/klee.h>".to_string()),
            Engine::Fuzzing => {
                code.push("#include <stdio.h>".to_string());
                code.push("void abort(void);".to_string());
            }
        }
        code.push("#include <stddef.h>".to_string());
        code.extend(self.headers.iter().map(|h| format!("#include <{h}>")));
        code.push(String::new());

        let names = self.libs.iter().map(|l| format!("\"{l}\"")).collect::<Vec<_>>().join(", ");
        code.push(format!("const char *libs_identifier[{n}] = {{ {names} }};"));
        code.push(String::new());

        if multi {
            code.push("void verifier(void);".to_string());
            code.push("int lib_eval(int i, int j);".to_string());
            code.push(format!("void {ABORT_FUNCTION}(char *message);"));
            code.push(String::new());
            if self.returns_value() {
                let slot = Variable::new(
                    self.signature.ret.ty.clone(),
                    format!("eval_return_values[{n}]"),
                    self.signature.ret.ptr_depth,
                );
                code.push(format!("{slot};"));
                code.push(String::new());
            }
        }

        code.extend(entries.iter().map(Function::declaration));
        code.push(String::new());

        if self.returns_value() {
            code.extend(entries.iter().map(|e| format!("{};", e.ret())));
        }
        code.extend(self.signature.args.iter().map(|a| self.declare_argument(a)));
        code.push(String::new());

        code.push("int main(void)".to_string());
        code.push("{".to_string());
        let mut body = Vec::new();
        let mut seed = String::new();
        for arg in &self.signature.args {
            if arg.value.is_some() {
                continue;
            }
            match self.engine {
                Engine::Symex => body.push(self.symbolic_input(arg)),
                Engine::Fuzzing => {
                    let (line, sample) = self.fuzzing_input(arg)?;
                    body.push(line);
                    seed.push_str(&sample);
                }
            }
        }
        body.extend(self.assumptions());
        body.extend(entries.iter().map(Function::call));
        if multi {
            if self.returns_value() {
                for (i, entry) in entries.iter().enumerate() {
                    body.push(format!("eval_return_values[{i}] = {};", entry.ret().name));
                }
            }
            body.push("verifier();".to_string());
        }
        code.extend(body.into_iter().map(|line| format!("\t{line}")));
        code.push(String::new());
        code.push("\treturn 0;".to_string());
        code.push("}".to_string());
        code.push(String::new());

        if multi {
            code.push(self.evaluation_function());
            code.push(String::new());
            code.push(self.verifier_function());
            code.push(String::new());
            code.push(self.abort_function());
            code.push(String::new());
        }

        if self.engine == Engine::Fuzzing {
            testcases.insert("default".to_string(), seed);
        }
        Ok(Driver { source: code.join("\n"), testcases })
    }

    /// Declaration of an argument local. Buffers become arrays, other pointers
    /// are declared one level shallower and passed by address.
    fn declare_argument(&self, arg: &Variable) -> String {
        let base = arg.base_type();
        let init = arg.value.as_ref().map(|v| format!(" = {v}")).unwrap_or_default();
        if arg.value.is_some() {
            return format!("{}{init};", Variable::new(base, arg.name.clone(), arg.ptr_depth));
        }
        if is_buffer_type(arg) {
            format!("{} {}[{}];", buffer_element(&base), arg.name, self.width(arg))
        } else if arg.is_ptr() {
            format!("{};", Variable::new(base, arg.name.clone(), arg.ptr_depth - 1))
        } else {
            format!("{base} {};", arg.name)
        }
    }

    fn symbolic_input(&self, arg: &Variable) -> String {
        if is_buffer_type(arg) {
            let base = arg.base_type();
            let elem = buffer_element(&base);
            format!(
                "klee_make_symbolic({name}, {width} * sizeof({elem}), \"{name}\");",
                name = arg.name,
                width = self.width(arg)
            )
        } else {
            format!("klee_make_symbolic(&{name}, sizeof({name}), \"{name}\");", name = arg.name)
        }
    }

    /// `scanf` line for `arg` and the matching seed input.
    fn fuzzing_input(&self, arg: &Variable) -> Result<(String, String), DriverError> {
        let base = arg.base_type();
        if is_buffer_type(arg) {
            let width = self.width(arg);
            let target = if base == "char" { arg.name.clone() } else { format!("(char *) {}", arg.name) };
            let fmt = format!("%{}s", width.saturating_sub(1).max(1));
            return Ok((format!("scanf(\"{fmt}\", {target});"), format!("{}\n", "A".repeat(width))));
        }
        let target = format!("&{}", arg.name);
        let fmt = match (base.as_str(), arg.ptr_depth) {
            ("short" | "short int", 0..=1) => "%hd",
            ("int" | "signed int", 0..=1) => "%d",
            ("unsigned" | "unsigned int", 0..=1) => "%u",
            ("size_t", 0..=1) => "%zu",
            ("long" | "long int" | "signed long", 0..=1) => "%ld",
            ("unsigned long" | "unsigned long int", 0..=1) => "%lu",
            ("long long" | "long long int", 0..=1) => "%lld",
            ("unsigned long long" | "unsigned long long int", 0..=1) => "%llu",
            ("double", 0..=1) => "%lf",
            ("float", 0..=1) => "%f",
            ("char", 0) => "%c",
            _ => {
                return Err(DriverError::UnsupportedFuzzType { name: arg.name.clone(), ty: arg.type_str() })
            }
        };
        let sample = if fmt == "%c" { "A\n" } else { "1234\n" };
        Ok((format!("scanf(\"{fmt}\", {target});"), sample.to_string()))
    }

    /// Character buffers must be NUL terminated.
    fn assumptions(&self) -> Vec<String> {
        self.signature
            .args
            .iter()
            .filter(|a| a.value.is_none() && a.ptr_depth == 1 && a.base_type() == "char")
            .map(|a| format!("if (!({}[{}] == '\\0')) return 0;", a.name, self.width(a) - 1))
            .collect()
    }

    fn evaluation_function(&self) -> String {
        let ret = &self.signature.ret;
        let mut lines = vec!["int lib_eval(int i, int j)".to_string(), "{".to_string()];
        if !self.returns_value() {
            lines.push("\treturn 0;".to_string());
        } else if is_buffer_type(ret) {
            lines.push("\tconst char *a = (const char *) eval_return_values[i];".to_string());
            lines.push("\tconst char *b = (const char *) eval_return_values[j];".to_string());
            lines.push(String::new());
            lines.push("\tif (a == 0 || b == 0)".to_string());
            lines.push("\t\treturn a != b;".to_string());
            lines.push(format!("\tfor (size_t c = 0; c < {}; c++)", self.array_width));
            lines.push("\t\tif (a[c] != b[c])".to_string());
            lines.push("\t\t\treturn 1;".to_string());
            lines.push("\treturn 0;".to_string());
        } else {
            lines.push("\tif (eval_return_values[i] == eval_return_values[j])".to_string());
            lines.push("\t\treturn 0;".to_string());
            lines.push("\treturn 1;".to_string());
        }
        lines.push("}".to_string());
        lines.join("\n")
    }

    fn verifier_function(&self) -> String {
        let n = self.libs.len();
        let longest = self.libs.iter().map(String::len).max().unwrap_or(0);
        let message_len = n * (2 * longest + 2) + 1;
        format!(
            "void verifier(void)
{{
	int mapping[{n}];
	int clusters = 0;

	for (int i = 0; i < {n}; i++)
		mapping[i] = -1;

	for (int i = 0; i < {n}; i++) {{
		if (mapping[i] != -1)
			continue;

		for (int j = 0; j < {n}; j++) {{
			if (j == i || mapping[j] == -1)
				continue;
			if (lib_eval(i, j) == 0) {{
				mapping[i] = mapping[j];
				break;
			}}
		}}

		if (mapping[i] == -1) {{
			mapping[i] = i;
			clusters++;
		}}
	}}

	if (clusters > 1) {{
		char message[{message_len}];
		char *out = message;

		for (int i = 0; i < {n}; i++) {{
			for (const char *p = libs_identifier[i]; *p != '\\0'; p++)
				*out++ = *p;
			*out++ = ':';
			for (const char *p = libs_identifier[mapping[i]]; *p != '\\0'; p++)
				*out++ = *p;
			*out++ = '\\n';
		}}
		*out = '\\0';

		{ABORT_FUNCTION}(message);
	}}
}}"
        )
    }

    fn abort_function(&self) -> String {
        let body = match self.engine {
            Engine::Symex => "\tklee_report_error(\"\", 0, message, \"diffharness_error\");".to_string(),
            Engine::Fuzzing => "\tfputs(message, stderr);\n\tabort();".to_string(),
        };
        format!("void {ABORT_FUNCTION}(char *message)\n{{\n{body}\n}}")
    }
}

fn buffer_element(base: &str) -> &str {
    if base == "void" {
        "char"
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn libs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn symex_driver_for_string_function() {
        let sgn = Signature::parse("char *strcpy(char *dest, const char *src);", None).unwrap();
        let libs = libs(&["musl", "diet"]);
        let driver = DriverGenerator::new(&sgn, &libs, Engine::Symex, 8)
            .with_headers(["string.h"])
            .generate()
            .unwrap();
        let src = &driver.source;

        assert!(src.contains("#include <klee/klee.h>"));
        assert!(src.contains("#include <string.h>"));
        assert!(src.contains("const char *libs_identifier[2] = { \"musl\", \"diet\" };"));
        assert!(src.contains("char *eval_return_values[2];"));
        assert!(src.contains("char *entry__musl__strcpy(char *dest, const char *src);"));
        assert!(src.contains("char *ret_diet;"));
        assert!(src.contains("char dest[8];\nchar src[8];"));
        assert!(src.contains("\tklee_make_symbolic(dest, 8 * sizeof(char), \"dest\");"));
        assert!(src.contains("\tif (!(src[7] == '\\0')) return 0;"));
        assert!(src.contains("\tret_musl = entry__musl__strcpy(dest, src);"));
        assert!(src.contains("\teval_return_values[1] = ret_diet;"));
        assert!(src.contains("for (size_t c = 0; c < 8; c++)"));
        assert!(src.contains("void verifier(void)"));
        assert!(src.contains("klee_report_error(\"\", 0, message, \"diffharness_error\");"));
        assert!(driver.testcases.is_empty());
    }

    #[test]
    fn fuzzing_driver_reads_stdin_and_seeds() {
        let sgn = Signature::parse("int isdigit(int c);", None).unwrap();
        let libs = libs(&["a", "b", "c"]);
        let driver = DriverGenerator::new(&sgn, &libs, Engine::Fuzzing, 4).generate().unwrap();
        assert!(driver.source.contains("#include <stdio.h>"));
        assert!(driver.source.contains("\tscanf(\"%d\", &c);"));
        assert!(driver.source.contains("int eval_return_values[3];"));
        assert!(driver.source.contains("\tif (eval_return_values[i] == eval_return_values[j])"));
        assert!(driver.source.contains("\tfputs(message, stderr);\n\tabort();"));
        assert_eq!(driver.testcases.get("default").map(String::as_str), Some("1234\n"));
    }

    #[test]
    fn pointer_arguments_are_passed_by_address() {
        let sgn = Signature::parse("long strtol(const char *nptr, char **endptr, int base);", None).unwrap();
        let libs = libs(&["x", "y"]);
        let driver = DriverGenerator::new(&sgn, &libs, Engine::Symex, 4).generate().unwrap();
        assert!(driver.source.contains("char *endptr;"));
        assert!(driver.source.contains("klee_make_symbolic(&endptr, sizeof(endptr), \"endptr\");"));
        assert!(driver.source.contains("ret_x = entry__x__strtol(nptr, &endptr, base);"));
    }

    #[test]
    fn single_library_skips_verification() {
        let sgn = Signature::parse("void bzero(void *s, size_t n);", None).unwrap();
        let libs = libs(&["musl"]);
        let driver = DriverGenerator::new(&sgn, &libs, Engine::Symex, 4).generate().unwrap();
        assert!(!driver.source.contains("verifier"));
        assert!(!driver.source.contains("lib_eval"));
        assert!(driver.source.contains("char s[4];"));
        assert!(driver.source.contains("\tentry__musl__bzero(s, n);"));
    }

    #[test]
    fn unsupported_fuzz_inputs_and_empty_library_lists_fail() {
        let sgn = Signature::parse("int fputs(const char *s, FILE *stream);", None).unwrap();
        let libs = libs(&["a"]);
        let err = DriverGenerator::new(&sgn, &libs, Engine::Fuzzing, 4).generate().unwrap_err();
        assert_eq!(err, DriverError::UnsupportedFuzzType { name: "stream".into(), ty: "FILE *".into() });

        let none: Vec<String> = Vec::new();
        assert_eq!(DriverGenerator::new(&sgn, &none, Engine::Symex, 4).generate(), Err(DriverError::NoLibraries));
    }
}
