//! Build progress tracking and reporting, for the purpose of display to the
//! user.

use crate::graph::{Build, BuildId};
use crate::process::Termination;
use crate::task::TaskResult;
use crate::work::StateCounts;
use std::io::Write;

/// Compute the message to display on the console for a given build.
pub fn build_message(build: &Build) -> &str {
    build
        .desc
        .as_deref()
        .filter(|desc| !desc.is_empty())
        .or(build.cmdline.as_deref())
        .unwrap_or("")
}

/// Trait for build progress notifications.
pub trait Progress {
    /// Called as individual build tasks progress through build states.
    fn update(&mut self, counts: &StateCounts);

    /// Called when a task starts.
    fn task_started(&mut self, id: BuildId, build: &Build);

    /// Called when a task completes.
    fn task_finished(&mut self, id: BuildId, build: &Build, result: &TaskResult);

    /// Log a line of output without corrupting the progress display.
    /// For example, used when a task fails; we want the final output to show
    /// that failed task's output even if we do more work after it fails.
    fn log(&mut self, msg: &str);
}

/// Progress implementation for "dumb" console, without any overprinting.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// The id of the last command printed, used to avoid printing it twice
    /// when we have two updates from the same command in a row.
    last_started: Option<BuildId>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn update(&mut self, _counts: &StateCounts) {
        // ignore
    }

    fn task_started(&mut self, id: BuildId, build: &Build) {
        let msg = match (&build.cmdline, self.verbose) {
            (Some(cmdline), true) => cmdline.as_str(),
            _ => build_message(build),
        };
        self.log(msg);
        self.last_started = Some(id);
    }

    fn task_finished(&mut self, id: BuildId, build: &Build, result: &TaskResult) {
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() || self.last_started == Some(id) {
                    // Output is empty, or we just printed the command, don't print it again.
                } else {
                    self.log(build_message(build))
                }
            }
            Termination::Interrupted => self.log(&format!("interrupted: {}", build_message(build))),
            Termination::Failure(Some(code)) => {
                self.log(&format!("failed (exit {}): {}", code, build_message(build)))
            }
            Termination::Failure(None) => self.log(&format!("failed: {}", build_message(build))),
        };
        if !result.output.is_empty() {
            let mut stdout = std::io::stdout().lock();
            // Write errors on stdout are ignored.
            let _ = stdout.write_all(&result.output).and_then(|_| stdout.flush());
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Progress implementation that discards everything, for library use where
/// the caller reports results itself.
#[derive(Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&mut self, _counts: &StateCounts) {}
    fn task_started(&mut self, _id: BuildId, _build: &Build) {}
    fn task_finished(&mut self, _id: BuildId, _build: &Build, _result: &TaskResult) {}
    fn log(&mut self, _msg: &str) {}
}
