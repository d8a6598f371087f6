//! Access to the external compiler toolchain.
//!
//! The pipeline never compiles or links on its own; it asks a [`Toolchain`] to.
//! [`LlvmToolchain`] shells out to clang / llvm-link / llvm-as / llvm-dis, and
//! tests plug in an in-process implementation instead.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming a directory that holds the LLVM binaries.
pub const LLVM_BIN_ENV: &str = "DIFFHARNESS_LLVM_BIN";

/// Flags every library source and wrapper is compiled with.
pub const IR_FLAGS: &[&str] = &["-S", "-emit-llvm", "-g", "-fno-builtin"];

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn { tool: String, source: std::io::Error },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed { tool: String, status: String, stderr: String },
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

impl ToolchainError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ToolchainError::Io { path: path.into(), source }
    }
}

/// Diagnostics a successful tool run printed, if any.
pub type Warnings = Option<String>;

/// The compiler/linker service the pipeline drives.
pub trait Toolchain: Send + Sync {
    /// Compile one C source file into `dest` with `flags`, running in `cwd`.
    fn compile(
        &self,
        src: &Path,
        dest: &Path,
        flags: &[String],
        cwd: Option<&Path>,
    ) -> Result<Warnings, ToolchainError>;

    /// Link `inputs` into one module at `dest`.
    fn link(&self, inputs: &[PathBuf], dest: &Path) -> Result<Warnings, ToolchainError>;

    /// Bitcode to textual IR.
    fn disassemble(&self, src: &Path, dest: &Path) -> Result<(), ToolchainError>;

    /// Textual IR to bitcode.
    fn assemble(&self, src: &Path, dest: &Path) -> Result<(), ToolchainError>;

    /// Build a fuzzing executable from a driver source and linked modules.
    fn compile_fuzz_executable(
        &self,
        driver: &Path,
        modules: &[PathBuf],
        dest: &Path,
        scratch: &Path,
    ) -> Result<(), ToolchainError>;

    fn name(&self) -> &'static str;
}

/// Where to find the toolchain binaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Directory prefix for tools not given explicitly.
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,
    #[serde(default)]
    pub clang: Option<PathBuf>,
    #[serde(default)]
    pub llvm_link: Option<PathBuf>,
    #[serde(default)]
    pub llvm_as: Option<PathBuf>,
    #[serde(default)]
    pub llvm_dis: Option<PathBuf>,
    /// Compiler used for fuzzing executables (afl-gcc by default).
    #[serde(default)]
    pub fuzz_cc: Option<PathBuf>,
    /// Kill any single tool run after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Toolchain backed by the real LLVM binaries.
#[derive(Debug, Clone)]
pub struct LlvmToolchain {
    pub clang: PathBuf,
    pub llvm_link: PathBuf,
    pub llvm_as: PathBuf,
    pub llvm_dis: PathBuf,
    pub fuzz_cc: PathBuf,
    pub timeout: Option<Duration>,
}

impl LlvmToolchain {
    /// Resolve tool paths: explicit config entry, then `bin_dir`, then
    /// `$DIFFHARNESS_LLVM_BIN`, then plain names looked up on `PATH`.
    pub fn from_config(config: &ToolchainConfig) -> Self {
        let bin_dir =
            config.bin_dir.clone().or_else(|| std::env::var_os(LLVM_BIN_ENV).map(PathBuf::from));
        let resolve = |explicit: &Option<PathBuf>, default: &str| -> PathBuf {
            match (explicit, &bin_dir) {
                (Some(path), _) => path.clone(),
                (None, Some(dir)) => dir.join(default),
                (None, None) => PathBuf::from(default),
            }
        };
        Self {
            clang: resolve(&config.clang, "clang"),
            llvm_link: resolve(&config.llvm_link, "llvm-link"),
            llvm_as: resolve(&config.llvm_as, "llvm-as"),
            llvm_dis: resolve(&config.llvm_dis, "llvm-dis"),
            fuzz_cc: config.fuzz_cc.clone().unwrap_or_else(|| PathBuf::from("afl-gcc")),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    fn run(&self, command: Command) -> Result<Warnings, ToolchainError> {
        run_command(command, self.timeout)
    }
}

impl Toolchain for LlvmToolchain {
    fn compile(
        &self,
        src: &Path,
        dest: &Path,
        flags: &[String],
        cwd: Option<&Path>,
    ) -> Result<Warnings, ToolchainError> {
        let mut cmd = Command::new(&self.clang);
        cmd.args(flags).arg("-o").arg(dest).arg(src);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        self.run(cmd)
    }

    fn link(&self, inputs: &[PathBuf], dest: &Path) -> Result<Warnings, ToolchainError> {
        let mut cmd = Command::new(&self.llvm_link);
        cmd.arg("-o").arg(dest).args(inputs);
        self.run(cmd)
    }

    fn disassemble(&self, src: &Path, dest: &Path) -> Result<(), ToolchainError> {
        let mut cmd = Command::new(&self.llvm_dis);
        cmd.arg("-o").arg(dest).arg(src);
        self.run(cmd).map(|_| ())
    }

    fn assemble(&self, src: &Path, dest: &Path) -> Result<(), ToolchainError> {
        let mut cmd = Command::new(&self.llvm_as);
        cmd.arg("-o").arg(dest).arg(src);
        self.run(cmd).map(|_| ())
    }

    fn compile_fuzz_executable(
        &self,
        driver: &Path,
        modules: &[PathBuf],
        dest: &Path,
        scratch: &Path,
    ) -> Result<(), ToolchainError> {
        let mut objects = Vec::with_capacity(modules.len());
        for module in modules {
            let file_name = module.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            let mut object = scratch.join(file_name).into_os_string();
            object.push(".o");
            let object = PathBuf::from(object);
            let mut cmd = Command::new(&self.clang);
            cmd.args(["-fPIC", "-c", "-o"]).arg(&object).arg(module);
            self.run(cmd)?;
            objects.push(object);
        }
        let mut cmd = Command::new(&self.fuzz_cc);
        cmd.arg("-o").arg(dest).arg(driver).args(&objects);
        self.run(cmd).map(|_| ())
    }

    fn name(&self) -> &'static str {
        "llvm"
    }
}

fn tool_name(cmd: &Command) -> String {
    Path::new(cmd.get_program())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| cmd.get_program().to_string_lossy().to_string())
}

/// Run `cmd` to completion, capturing stderr as warnings.
///
/// With a timeout the child is polled and killed once the deadline passes.
pub fn run_command(mut cmd: Command, timeout: Option<Duration>) -> Result<Warnings, ToolchainError> {
    let tool = tool_name(&cmd);
    tracing::debug!(command = ?cmd, "running tool");
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolchainError::Spawn { tool: tool.clone(), source })?;

    // Drain stderr concurrently so a chatty tool cannot block on a full pipe.
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });

    let status = match timeout {
        None => child.wait().map_err(|source| ToolchainError::Spawn { tool: tool.clone(), source })?,
        Some(limit) => {
            let started = Instant::now();
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) if started.elapsed() >= limit => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ToolchainError::Timeout { tool, secs: limit.as_secs() });
                    }
                    Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                    Err(source) => return Err(ToolchainError::Spawn { tool, source }),
                }
            }
        }
    };

    let stderr = stderr_reader.and_then(|h| h.join().ok()).unwrap_or_default();
    if !status.success() {
        return Err(ToolchainError::Failed { tool, status: status.to_string(), stderr });
    }
    let stderr = stderr.trim();
    Ok(if stderr.is_empty() { None } else { Some(stderr.to_string()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_paths_win_over_bin_dir() {
        let config = ToolchainConfig {
            bin_dir: Some(PathBuf::from("/opt/llvm/bin")),
            clang: Some(PathBuf::from("/usr/bin/clang-15")),
            ..Default::default()
        };
        let tc = LlvmToolchain::from_config(&config);
        assert_eq!(tc.clang, PathBuf::from("/usr/bin/clang-15"));
        assert_eq!(tc.llvm_link, PathBuf::from("/opt/llvm/bin/llvm-link"));
        assert_eq!(tc.fuzz_cc, PathBuf::from("afl-gcc"));
        assert_eq!(tc.timeout, None);
    }

    #[test]
    fn rejects_unknown_toolchain_keys() {
        let parsed: Result<ToolchainConfig, _> = serde_json::from_str(r#"{"clangg": "x"}"#);
        assert!(parsed.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn reports_failures_and_warnings() {
        let mut ok = Command::new("sh");
        ok.args(["-c", "echo careful >&2"]);
        assert_eq!(run_command(ok, None).unwrap().as_deref(), Some("careful"));

        let mut bad = Command::new("sh");
        bad.args(["-c", "echo broken >&2; exit 3"]);
        match run_command(bad, None) {
            Err(ToolchainError::Failed { tool, stderr, .. }) => {
                assert_eq!(tool, "sh");
                assert!(stderr.contains("broken"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn kills_commands_past_the_timeout() {
        let mut slow = Command::new("sh");
        slow.args(["-c", "sleep 5"]);
        let err = run_command(slow, Some(Duration::from_millis(100))).unwrap_err();
        assert!(matches!(err, ToolchainError::Timeout { .. }));
    }

    #[test]
    fn missing_binaries_fail_to_spawn() {
        let cmd = Command::new("/definitely/not/a/tool");
        assert!(matches!(run_command(cmd, None), Err(ToolchainError::Spawn { .. })));
    }
}
