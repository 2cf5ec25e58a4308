//! Exposes process::run_command, a wrapper around platform-native process execution.

#[cfg(unix)]
pub use crate::process_posix::run_command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    /// The command failed, with its exit code if it exited normally.
    Failure(Option<i32>),
}

/// Fallback for platforms without posix_spawn: std's process API, with
/// stderr appended after stdout.
#[cfg(not(unix))]
pub fn run_command(cmdline: &str) -> anyhow::Result<(Termination, Vec<u8>)> {
    let out = std::process::Command::new("cmd")
        .arg("/c")
        .arg(cmdline)
        .output()?;
    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    let termination = if out.status.success() {
        Termination::Success
    } else {
        Termination::Failure(out.status.code())
    };
    Ok((termination, output))
}
