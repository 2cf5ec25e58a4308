//! Errors surfaced by loading and running a build.

use std::path::PathBuf;
use thiserror::Error;

/// One build whose command did not succeed.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    /// First output of the failed build, used to name it.
    pub output: String,
    pub cmdline: String,
    /// Exit code of the command, None if it was killed by a signal or never
    /// managed to start.
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr of the command.
    pub output_text: Vec<u8>,
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{}: exit status {}", self.output, code),
            None => write!(f, "{}: terminated abnormally", self.output),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// A depfile could not be parsed; the message carries the location.
    #[error("{path}: {message}")]
    Parse { path: String, message: String },

    /// The build graph contains a dependency cycle, listed as file paths with
    /// the first path repeated at the end.
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// One or more build commands failed.
    #[error("{} build(s) failed: {}", .failures.len(), failure_list(.failures))]
    Execution { failures: Vec<ExecutionFailure> },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source file needed by a build neither exists nor is produced by any build.
    #[error("input {path} missing (needed by {needed_by})")]
    MissingInput { path: String, needed_by: String },

    /// A build was declared without any outputs.  The build is named by its
    /// description or command, as far as it has either.
    #[error("build {build:?} declares no outputs")]
    NoOutputs { build: String },

    #[error("multiple builds generate {path}")]
    DuplicateOutput { path: String },

    #[error("unknown path requested: {path:?}")]
    UnknownTarget { path: String },

    /// The worker threads that run commands could not be started.
    #[error("starting worker pool: {0}")]
    Pool(String),

    /// The build database exists but could not be understood.
    #[error("build database {path}: {message}")]
    Db { path: PathBuf, message: String },
}

fn failure_list(failures: &[ExecutionFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
