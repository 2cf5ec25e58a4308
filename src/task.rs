//! Runs build tasks, potentially in parallel.
//! Unaware of the build graph, pools, etc.; just command execution.
//!
//! Tasks run on a fixed-size rayon pool.  Each worker blocks on its child
//! process and reports back over a channel, so only the scheduler thread
//! ever touches build state.

use crate::depfile::{self, OwnedDeps};
use crate::error::Error;
use crate::graph::{BuildId, RspFile};
use crate::process::{self, Termination};
use crate::rspfile::{self, RspConfig};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

pub struct FinishedTask {
    /// A (faked) "thread id", used to put different finished builds in different
    /// tracks in a performance trace.
    pub tid: usize,
    pub buildid: BuildId,
    pub span: (Instant, Instant),
    /// Err if the task's response files couldn't be written or removed.
    pub result: Result<TaskResult, Error>,
}

/// The result of executing a build step.
pub struct TaskResult {
    pub termination: Termination,
    /// Console output.
    pub output: Vec<u8>,
    /// Records from the build's depfile, read only after the command
    /// succeeded and only if the build declares one.
    pub depfile: Option<Result<OwnedDeps, Error>>,
}

/// Reads dependency records from a .d file path.
fn read_depfile(path: &str) -> Result<OwnedDeps, Error> {
    let bytes = std::fs::read(path).map_err(|err| Error::io(path, err))?;
    depfile::parse_bytes(path, bytes)
}

/// Executes a build task as a subprocess.
/// Returns an Err() if the task's files couldn't be set up or cleaned up;
/// a command that fails to start counts as a failed command.
fn run_task(
    cmdline: &str,
    depfile: Option<&str>,
    rspfile: Option<&RspFile>,
    rsp_config: &RspConfig,
) -> Result<TaskResult, Error> {
    if let Some(rspfile) = rspfile {
        rspfile::write_declared(rspfile)?;
    }
    let prepared = rspfile::prepare(cmdline, rsp_config)?;

    let (termination, output) = match process::run_command(&prepared.cmdline) {
        Ok(result) => result,
        Err(err) => (Termination::Failure(None), format!("{:#}\n", err).into_bytes()),
    };
    let success = termination == Termination::Success;

    let depfile = match depfile {
        Some(path) if success => Some(read_depfile(path)),
        _ => None,
    };

    prepared.finish(success, rsp_config);
    if let Some(rspfile) = rspfile {
        if success {
            rspfile::remove_declared(rspfile)?;
        }
    }

    Ok(TaskResult {
        termination,
        output,
        depfile,
    })
}

/// Tracks faked "thread ids" -- integers assigned to build tasks to track
/// parallelism in perf trace output.
#[derive(Default)]
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

pub struct Runner {
    pool: rayon::ThreadPool,
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    pub running: usize,
    tids: ThreadIds,
    parallelism: usize,
    rsp_config: Arc<RspConfig>,
}

impl Runner {
    pub fn new(parallelism: usize, rsp_config: RspConfig) -> Result<Self, Error> {
        let parallelism = parallelism.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|i| format!("shuriken-task-{}", i))
            .build()
            .map_err(|err| Error::Pool(err.to_string()))?;
        let (tx, rx) = mpsc::channel();
        Ok(Runner {
            pool,
            finished_send: tx,
            finished_recv: rx,
            running: 0,
            tids: ThreadIds::default(),
            parallelism,
            rsp_config: Arc::new(rsp_config),
        })
    }

    pub fn can_start_more(&self) -> bool {
        self.running < self.parallelism
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn start(
        &mut self,
        id: BuildId,
        cmdline: String,
        depfile: Option<String>,
        rspfile: Option<RspFile>,
    ) {
        let tid = self.tids.claim();
        let tx = self.finished_send.clone();
        let rsp_config = self.rsp_config.clone();
        self.pool.spawn(move || {
            let start = Instant::now();
            let result = run_task(&cmdline, depfile.as_deref(), rspfile.as_ref(), &rsp_config);
            let finish = Instant::now();

            let task = FinishedTask {
                tid,
                buildid: id,
                span: (start, finish),
                result,
            };
            // The send will only fail if the receiver disappeared, e.g. due to shutting down.
            let _ = tx.send(task);
        });
        self.running += 1;
    }

    /// Block until a running task completes.  Returns None if nothing is running.
    pub fn wait(&mut self) -> Option<FinishedTask> {
        if !self.is_running() {
            return None;
        }
        // We hold a sender ourselves, so recv() can only fail if a worker
        // panicked; treat that like nothing left to wait for.
        let task = self.finished_recv.recv().ok()?;
        self.tids.release(task.tid);
        self.running -= 1;
        Some(task)
    }
}
