//! Concrete provider back-ends.
//!
//! Each back-end implements [`crate::provider::ObjectSource`] over one data
//! source: the Slurm scheduler CLIs, an Lmod-style module tree, the home
//! directory, a directory of JSON object files, ssh-probed accounts, or a
//! NocoDB instance.

pub mod accounts;
pub mod catalog;
pub mod home;
pub mod modules;
pub mod noco;
pub mod slurm;

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

/// Default timeout for back-end subprocesses.
pub const CLI_TIMEOUT: Duration = Duration::from_secs(30);

/// The calling user, as the scheduler and module tools see them.
pub fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Run a CLI to completion and capture stdout.
///
/// The child is killed when the timeout elapses; a non-zero exit is an
/// error. Callers degrade errors to empty listings.
pub fn run_cli(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("cannot spawn {program}"))?;

    // Drain stdout on a separate thread so a chatty child cannot deadlock
    // against a full pipe while we wait.
    let mut stdout = child.stdout.take().context("child stdout unavailable")?;
    let reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout.read_to_string(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait().context("waiting for child")? {
            Some(status) => {
                let output = reader.join().unwrap_or_default();
                if status.success() {
                    return Ok(output);
                }
                bail!("{program} exited with {status}");
            }
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                bail!("{program} timed out after {timeout:?}");
            }
            None => std::thread::sleep(Duration::from_millis(25)),
        }
    }
}

/// Run a command line through a login shell, for tools that are shell
/// functions in HPC environments (`module`).
pub fn run_shell(command_line: &str, timeout: Duration) -> Result<String> {
    run_cli("/bin/bash", &["-lc", command_line], timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_cli_captures_stdout() {
        let out = run_cli("/bin/echo", &["hello"], CLI_TIMEOUT).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_run_cli_missing_program_is_an_error() {
        assert!(run_cli("/no/such/binary", &[], CLI_TIMEOUT).is_err());
    }

    #[test]
    fn test_run_cli_nonzero_exit_is_an_error() {
        assert!(run_cli("/bin/false", &[], CLI_TIMEOUT).is_err());
    }

    #[test]
    fn test_run_cli_kills_on_timeout() {
        let started = Instant::now();
        let result = run_cli("/bin/sleep", &["30"], Duration::from_millis(200));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
