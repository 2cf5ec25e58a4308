//! Build runner, choosing and executing tasks as determined by out of date inputs.

use crate::densemap::DenseMap;
use crate::depfile::OwnedDeps;
use crate::error::{Error, ExecutionFailure};
use crate::fs::{FileSystem, MTime};
use crate::graph::{BuildId, FileId, FileState, Graph};
use crate::hash::{self, Signature};
use crate::load::State;
use crate::process::Termination;
use crate::progress::{build_message, Progress};
use crate::rspfile::RspConfig;
use crate::task::{FinishedTask, Runner};
use crate::{db, trace};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::time::SystemTime;

/// Build steps go through this sequence of states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    /// Default initial state, for Builds unneeded by the current build.
    Unknown,
    /// Builds we want to ensure are up to date, but which aren't ready yet.
    Want,
    /// Builds whose dependencies are up to date and are ready to be
    /// checked for dirtiness and potentially queued.
    Ready,
    /// Builds found to be dirty, waiting for a free worker.
    Queued,
    Running,
    /// Finished executing successfully, or found to be up to date.
    Done,
    Failed,
}

impl BuildState {
    fn index(self) -> usize {
        self as usize
    }
}

/// Counters that track builds in each state, excluding phony builds.
/// This is only for display to the user and should not be used as a source of
/// truth for tracking progress.
#[derive(Clone, Debug, Default)]
pub struct StateCounts([usize; 7]);

impl StateCounts {
    fn add(&mut self, state: BuildState, delta: isize) {
        self.0[state.index()] = (self.0[state.index()] as isize + delta) as usize;
    }

    pub fn get(&self, state: BuildState) -> usize {
        self.0[state.index()]
    }

    pub fn total(&self) -> usize {
        self.0[1..].iter().sum()
    }
}

/// Pending work for the scheduler: per-build state plus the queues builds
/// move through.  Only the scheduler thread touches this.
struct BuildStates {
    states: DenseMap<BuildId, BuildState>,

    /// Number of distinct not-yet-done builds producing inputs of each build.
    /// A build is ready when this reaches zero.
    pending: DenseMap<BuildId, usize>,

    // Counts of builds in each state.
    counts: StateCounts,

    /// Builds in the Ready state, awaiting a dirty check.
    ready: VecDeque<BuildId>,

    /// Builds in the Queued state, awaiting a worker.
    queued: VecDeque<BuildId>,
}

impl BuildStates {
    fn new(size: usize) -> Self {
        BuildStates {
            states: DenseMap::new_sized(size, BuildState::Unknown),
            pending: DenseMap::new_sized(size, 0),
            counts: StateCounts::default(),
            ready: VecDeque::new(),
            queued: VecDeque::new(),
        }
    }

    fn get(&self, id: BuildId) -> BuildState {
        self.states[id]
    }

    fn set(&mut self, id: BuildId, graph: &Graph, state: BuildState) {
        let prev = std::mem::replace(&mut self.states[id], state);
        if !graph.build(id).is_phony() {
            if prev != BuildState::Unknown {
                self.counts.add(prev, -1);
            }
            self.counts.add(state, 1);
        }
        match state {
            BuildState::Ready => self.ready.push_back(id),
            BuildState::Queued => self.queued.push_back(id),
            _ => {}
        }
    }
}

/// Options for a build.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of commands to run at once.
    pub parallelism: usize,
    /// Stop starting new commands after this many failures; 0 means never stop.
    pub keep_going: usize,
    /// Log why each out of date build needs to run.
    pub explain: bool,
    pub rsp: RspConfig,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            keep_going: 1,
            explain: false,
            rsp: RspConfig::default(),
        }
    }
}

pub struct Work<'a> {
    graph: Graph,
    signatures: hash::Signatures,
    db: Option<db::Writer>,
    fs: &'a dyn FileSystem,
    progress: &'a mut dyn Progress,
    options: Options,
    file_state: FileState,
    build_states: BuildStates,
    /// Signature computed for each running build when it was started, and
    /// the wall-clock time it started at.
    started: DenseMap<BuildId, Option<(Signature, SystemTime)>>,
    failures: Vec<ExecutionFailure>,
    /// Count of commands executed.
    tasks_run: usize,
}

impl<'a> Work<'a> {
    pub fn new(
        state: State,
        fs: &'a dyn FileSystem,
        options: Options,
        progress: &'a mut dyn Progress,
    ) -> Self {
        let file_state = FileState::new(&state.graph);
        let builds = state.graph.builds.len();
        Work {
            graph: state.graph,
            signatures: state.signatures,
            db: state.db,
            fs,
            progress,
            options,
            file_state,
            build_states: BuildStates::new(builds),
            started: DenseMap::new_sized(builds, None),
            failures: Vec::new(),
            tasks_run: 0,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Hand back the graph, signatures and database, e.g. to build again.
    pub fn into_state(self) -> State {
        State {
            graph: self.graph,
            signatures: self.signatures,
            db: self.db,
        }
    }

    /// Request a path be brought up to date.
    pub fn want_path(&mut self, path: &str) -> Result<(), Error> {
        match self.graph.lookup_file_id(path) {
            Some(id) => self.want_file(id),
            None => Err(Error::UnknownTarget {
                path: path.to_string(),
            }),
        }
    }

    /// Request every output of every build.
    pub fn want_every_file(&mut self) -> Result<(), Error> {
        for id in self.graph.builds.all_ids() {
            let via = match self.graph.build(id).outs().first() {
                Some(&via) => via,
                None => continue,
            };
            self.want_build(id, via, &mut Vec::new())?;
        }
        Ok(())
    }

    /// Request a file be brought up to date.  A source file (one no build
    /// produces) must exist.
    pub fn want_file(&mut self, id: FileId) -> Result<(), Error> {
        match self.graph.file(id).input {
            Some(bid) => self.want_build(bid, id, &mut Vec::new()),
            None => {
                let name = self.graph.file(id).name.clone();
                if self.file_state.stat(self.fs, id, &name)? == MTime::Missing {
                    return Err(Error::MissingInput {
                        needed_by: name.clone(),
                        path: name,
                    });
                }
                Ok(())
            }
        }
    }

    /// Mark a build and everything it depends on as wanted.  `via` is the
    /// output of the build we arrived through and `stack` the builds (and
    /// their `via`s) leading here, for reporting cycles.
    fn want_build(
        &mut self,
        id: BuildId,
        via: FileId,
        stack: &mut Vec<(BuildId, FileId)>,
    ) -> Result<(), Error> {
        match self.build_states.get(id) {
            BuildState::Unknown => {}
            BuildState::Want => {
                // Still on the stack means we've looped back to it.
                if let Some(pos) = stack.iter().position(|&(b, _)| b == id) {
                    let mut cycle = vec![via];
                    cycle.extend(stack[pos + 1..].iter().map(|&(_, f)| f));
                    cycle.push(via);
                    return Err(self.graph.cycle_error(&cycle));
                }
                return Ok(());
            }
            _ => return Ok(()),
        }
        self.build_states.set(id, &self.graph, BuildState::Want);

        stack.push((id, via));
        let mut producers: FxHashSet<BuildId> = FxHashSet::default();
        let ins: Vec<FileId> = self.graph.build(id).depend_ins().collect();
        for input in ins {
            match self.graph.file(input).input {
                Some(dep) => {
                    self.want_build(dep, input, stack)?;
                    if self.build_states.get(dep) != BuildState::Done {
                        producers.insert(dep);
                    }
                }
                None => self.check_source(id, input)?,
            }
        }
        stack.pop();

        self.build_states.pending[id] = producers.len();
        if producers.is_empty() {
            self.build_states.set(id, &self.graph, BuildState::Ready);
        }
        Ok(())
    }

    /// Stat an input no build produces, failing if it's a missing static
    /// input.  A missing discovered input only makes the build dirty.
    fn check_source(&mut self, id: BuildId, input: FileId) -> Result<(), Error> {
        let name = &self.graph.file(input).name;
        let mtime = self.file_state.stat(self.fs, input, name)?;
        let build = self.graph.build(id);
        if mtime == MTime::Missing && !build.discovered_ins().contains(&input) {
            return Err(Error::MissingInput {
                path: name.clone(),
                needed_by: self.graph.file(build.outs()[0]).name.clone(),
            });
        }
        Ok(())
    }

    /// Stat all the files a dirty check looks at.
    fn stat_build_files(&mut self, id: BuildId) -> Result<(), Error> {
        let build = self.graph.build(id);
        let ins: Vec<FileId> = build.depend_ins().collect();
        let outs: Vec<FileId> = build.outs().to_vec();
        for input in ins {
            match self.graph.file(input).input {
                Some(_) => {
                    let name = &self.graph.file(input).name;
                    self.file_state.stat(self.fs, input, name)?;
                }
                None => self.check_source(id, input)?,
            }
        }
        for out in outs {
            let name = &self.graph.file(out).name;
            self.file_state.stat(self.fs, out, name)?;
        }
        Ok(())
    }

    /// Decide whether a ready build needs to run, moving it to Queued or Done.
    fn check_ready(&mut self, id: BuildId) -> Result<(), Error> {
        if self.graph.build(id).is_phony() {
            self.finish_done(id);
            return Ok(());
        }
        self.stat_build_files(id)?;
        let build = self.graph.build(id);
        match hash::check_dirty(&self.graph, &self.file_state, build, self.signatures.get(id)) {
            None => self.finish_done(id),
            Some(reason) => {
                if self.options.explain {
                    let out = &self.graph.file(build.outs()[0]).name;
                    self.progress.log(&format!("explain: {}: {}", out, reason));
                }
                tracing::debug!(build = build_message(build), %reason, "dirty");
                self.build_states.set(id, &self.graph, BuildState::Queued);
            }
        }
        Ok(())
    }

    /// Mark a build Done and make ready any wanted builds waiting only on it.
    fn finish_done(&mut self, id: BuildId) {
        self.build_states.set(id, &self.graph, BuildState::Done);
        let mut dependents: FxHashSet<BuildId> = FxHashSet::default();
        for &out in self.graph.build(id).outs() {
            dependents.extend(self.graph.file(out).dependents.iter().copied());
        }
        for dep in dependents {
            if self.build_states.get(dep) != BuildState::Want {
                continue;
            }
            let pending = &mut self.build_states.pending[dep];
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                self.build_states.set(dep, &self.graph, BuildState::Ready);
            }
        }
    }

    fn start_build(&mut self, runner: &mut Runner, id: BuildId) {
        let sig = hash::signature(&self.file_state, self.graph.build(id));
        self.started[id] = Some((sig, SystemTime::now()));
        self.build_states.set(id, &self.graph, BuildState::Running);

        let build = self.graph.build(id);
        self.progress.task_started(id, build);
        // check_ready never queues phony builds, so there is always a command.
        let cmdline = build.cmdline.clone().unwrap_or_default();
        runner.start(id, cmdline, build.depfile.clone(), build.rspfile.clone());
    }

    /// Replace a build's discovered inputs with what its depfile named.
    /// Inputs not modified since the command started raise the watermark.
    fn record_discovered(
        &mut self,
        id: BuildId,
        deps: &OwnedDeps,
        started_at: SystemTime,
        sig: &mut Signature,
    ) -> Result<(), Error> {
        let build = self.graph.build(id);
        let depfile = build.depfile.clone().unwrap_or_default();
        let outs: Vec<FileId> = build.outs().to_vec();
        let first_out = self.graph.file(outs[0]).name.clone();

        let mut names: Vec<String> = Vec::new();
        let mut mentioned = false;
        for (target, ins) in deps.iter() {
            match self.graph.lookup_file_id(target) {
                Some(t) if outs.contains(&t) => {
                    mentioned = true;
                    names.extend(ins.iter().cloned());
                }
                _ => tracing::debug!(depfile = %depfile, target = %target, "ignoring record for another output"),
            }
        }
        // An empty depfile just means no discovered inputs.
        if !mentioned && !deps.is_empty() {
            return Err(Error::Parse {
                path: depfile,
                message: format!("depfile does not mention output {}", first_out),
            });
        }

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let fid = self.graph.file_id(name);
            let canon = self.graph.file(fid).name.clone();
            let mtime = self.file_state.stat(self.fs, fid, &canon)?;
            match mtime {
                MTime::Missing => {
                    return Err(Error::MissingInput {
                        path: canon,
                        needed_by: first_out,
                    })
                }
                MTime::Stamp(t) if t <= started_at && mtime > sig.watermark => sig.watermark = mtime,
                MTime::Stamp(_) => {}
            }
            ids.push(fid);
        }
        tracing::debug!(output = %first_out, count = ids.len(), "discovered inputs");
        self.graph.merge_discovered_ins(id, ids)?;
        Ok(())
    }

    /// Handle a finished task: record its results and unblock dependents.
    fn task_finished(&mut self, task: FinishedTask) -> Result<(), Error> {
        let id = task.buildid;
        self.tasks_run += 1;
        let build = self.graph.build(id);
        trace::write_complete(build_message(build), task.tid + 1, task.span.0, task.span.1);
        let started = self.started[id].take();
        let result = match task.result {
            Ok(result) => result,
            Err(err) => {
                self.progress.log(&format!("failed: {}", build_message(build)));
                self.build_states.set(id, &self.graph, BuildState::Failed);
                return Err(err);
            }
        };
        self.progress.task_finished(id, build, &result);

        let exit_code = match result.termination {
            Termination::Success => None,
            Termination::Interrupted => Some(None),
            Termination::Failure(code) => Some(code),
        };
        if let Some(exit_code) = exit_code {
            self.failures.push(ExecutionFailure {
                output: self.graph.file(build.outs()[0]).name.clone(),
                cmdline: build.cmdline.clone().unwrap_or_default(),
                exit_code,
                output_text: result.output,
            });
            self.build_states.set(id, &self.graph, BuildState::Failed);
            return Ok(());
        }

        let (mut sig, started_at) = match started {
            Some(started) => started,
            None => (hash::signature(&self.file_state, build), SystemTime::now()),
        };
        if let Some(deps) = result.depfile {
            self.record_discovered(id, &deps?, started_at, &mut sig)?;
        }
        let outs: Vec<FileId> = self.graph.build(id).outs().to_vec();
        for out in outs {
            let name = &self.graph.file(out).name;
            self.file_state.stat(self.fs, out, name)?;
        }

        if let Some(db) = &mut self.db {
            db.write_build(&self.graph, id, &sig)?;
        }
        self.signatures.set(id, sig);
        self.finish_done(id);
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.options.keep_going > 0 && self.failures.len() >= self.options.keep_going
    }

    fn run_loop(&mut self, runner: &mut Runner) -> Result<(), Error> {
        loop {
            if !self.stopped() {
                while let Some(id) = self.build_states.ready.pop_front() {
                    self.check_ready(id)?;
                }
                while runner.can_start_more() {
                    match self.build_states.queued.pop_front() {
                        Some(id) => self.start_build(runner, id),
                        None => break,
                    }
                }
            }
            self.progress.update(&self.build_states.counts);

            match runner.wait() {
                Some(task) => self.task_finished(task)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Build everything wanted.  Returns the number of commands run, or the
    /// failures if any command failed.
    pub fn run(&mut self) -> Result<usize, Error> {
        let mut runner = Runner::new(self.options.parallelism, self.options.rsp.clone())?;
        let result = trace::scope("work.run", || self.run_loop(&mut runner));
        if result.is_err() {
            // Let commands already started finish, recording those that
            // succeed, before reporting the first error.
            while let Some(task) = runner.wait() {
                if let Err(err) = self.task_finished(task) {
                    tracing::warn!(%err, "further error while finishing running commands");
                }
            }
        }
        result?;
        self.progress.update(&self.build_states.counts);

        if !self.failures.is_empty() {
            return Err(Error::Execution {
                failures: std::mem::take(&mut self.failures),
            });
        }
        Ok(self.tasks_run)
    }
}
