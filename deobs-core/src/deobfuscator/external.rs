//! External Tool Integration
//!
//! Both engines the pipeline delegates to are Node.js command line tools:
//! - **obfuscator-io-deobfuscator**: the primary semantic pass, `tool <in> -o <out>`
//! - **prettier**: the primary formatter, source on stdin, result on stdout
//!
//! Programs are resolved on `PATH` with `which`. Every invocation is bounded by
//! a timeout; a child that outlives it is killed and the run counts as failed.

use crate::config::DeobfuscatorSettings;
use crate::deobfuscator::error::DeobsError;
use crate::deobfuscator::processor::PrimaryPass;
use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of one finished tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Last non-empty stderr line, for error messages.
    pub fn stderr_summary(&self) -> String {
        self.stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or("no diagnostic output")
            .to_string()
    }
}

/// Resolve `program` to an executable path.
///
/// Explicit paths (containing a separator) are used as given when they exist.
pub fn locate(program: &str) -> Result<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        bail!("{} not found", program);
    }
    which::which(program).with_context(|| format!("{} not found on PATH", program))
}

/// Run a tool to completion with an optional stdin payload and a timeout.
///
/// # Algorithm
/// 1. Spawn with piped stdio
/// 2. Feed stdin and drain stdout/stderr on helper threads (no pipe deadlock)
/// 3. Poll for exit until the deadline, killing the child when it passes
///
/// # Arguments
/// * `program` - Resolved executable
/// * `args` - Command line arguments
/// * `stdin` - Text written to the child's stdin, if any
/// * `timeout` - Wall-clock limit for the whole run
///
/// # Returns
/// `Result<ToolOutput>` - Output of a finished run, whatever its exit status
pub fn run_tool(
    program: &Path,
    args: &[OsString],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ToolOutput> {
    let name = program.display().to_string();
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start {}", name))?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(text), Some(mut pipe)) => {
            let payload = text.to_string();
            // A child that exits early closes the pipe; its exit status reports the failure.
            Some(thread::spawn(move || {
                let _ = pipe.write_all(payload.as_bytes());
            }))
        }
        _ => None,
    };
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("Failed to wait for {}", name))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{} timed out after {}s", name, timeout.as_secs_f32());
        }
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let stdout = join_reader(stdout_reader);
    let stderr = join_reader(stderr_reader);
    Ok(ToolOutput {
        status,
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// The `obfuscator-io-deobfuscator` command line tool as the primary pass.
#[derive(Debug, Clone)]
pub struct ExternalDeobfuscator {
    program: String,
    timeout: Duration,
}

impl ExternalDeobfuscator {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &DeobfuscatorSettings) -> Self {
        Self::new(settings.program.clone(), Duration::from_secs(settings.timeout_secs))
    }

    fn invoke(&self, input: &Path, output: &Path) -> Result<()> {
        let program = locate(&self.program)?;
        let args = [
            input.as_os_str().to_owned(),
            OsString::from("-o"),
            output.as_os_str().to_owned(),
        ];
        log::debug!("Running {} {}", program.display(), input.display());
        let run = run_tool(&program, &args, None, self.timeout)?;
        if !run.status.success() {
            bail!("exited with {}: {}", run.status, run.stderr_summary());
        }
        let written = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            bail!("exited successfully but wrote no output to {}", output.display());
        }
        Ok(())
    }
}

impl PrimaryPass for ExternalDeobfuscator {
    fn name(&self) -> &str {
        &self.program
    }

    fn run(&self, input: &Path, output: &Path) -> std::result::Result<(), DeobsError> {
        self.invoke(input, output)
            .map_err(|e| DeobsError::external_tool(&self.program, format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_missing_program() {
        let err = locate("deobs-test-no-such-program-0x1a2b").unwrap_err();
        assert!(format!("{:#}", err).contains("not found"));
        assert!(locate("/definitely/not/here/prettier").is_err());
    }

    #[test]
    fn test_missing_tool_is_external_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.js");
        std::fs::write(&input, "x();").unwrap();
        let pass =
            ExternalDeobfuscator::new("deobs-test-no-such-program-0x1a2b", Duration::from_secs(1));
        match pass.run(&input, &dir.path().join("a.out.js")) {
            Err(DeobsError::ExternalToolFailed { suggestion, .. }) => {
                assert!(suggestion.contains("PATH"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_run_tool_pipes_stdin_to_stdout() {
        let cat = locate("cat").unwrap();
        let out = run_tool(&cat, &[], Some("var a = 1;\n"), Duration::from_secs(5)).unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout, "var a = 1;\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_tool_times_out() {
        let sleep = locate("sleep").unwrap();
        let err = run_tool(&sleep, &[OsString::from("5")], None, Duration::from_millis(100))
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
