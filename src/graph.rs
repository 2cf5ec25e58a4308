//! The build graph, a graph between files and commands.

use crate::canon::canon_path;
use crate::densemap::{self, DenseMap};
use crate::error::Error;
use crate::fs::{FileSystem, MTime};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;

/// Id for File nodes in the Graph.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);
impl densemap::Index for FileId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for FileId {
    fn from(u: usize) -> FileId {
        FileId(u as u32)
    }
}

/// Id for Build nodes in the Graph.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BuildId(u32);
impl densemap::Index for BuildId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for BuildId {
    fn from(u: usize) -> BuildId {
        BuildId(u as u32)
    }
}

/// A single file referenced as part of a build.
#[derive(Debug)]
pub struct File {
    /// Canonical path to the file.
    pub name: String,
    /// The Build that generates this file, if any.
    pub input: Option<BuildId>,
    /// The Builds that depend on this file as an input, statically or
    /// through discovered dependencies.
    pub dependents: Vec<BuildId>,
}

/// A response file declared on a build: written before the command runs and
/// removed after it succeeds.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RspFile {
    pub path: PathBuf,
    pub content: String,
}

/// Input files to a Build.
#[derive(Debug, Default)]
pub struct BuildIns {
    /// Internally we stuff explicit/implicit/order-only ins all into one Vec.
    /// This is mostly to simplify some of the iteration and is a little more
    /// memory efficient than three separate Vecs.
    pub ids: Vec<FileId>,
    /// Count of section of ids that are explicit.
    pub explicit: usize,
    /// Count of section of ids that are implicit.
    pub implicit: usize,
    /// Count of section of ids that are order-only.
    pub order_only: usize,
}

/// Output files from a Build.
#[derive(Debug, Default)]
pub struct BuildOuts {
    /// Similar to ins, we keep both explicit and implicit outs in one Vec.
    pub ids: Vec<FileId>,
    /// Count of section of ids that are explicit.
    pub explicit: usize,
}

/// A build action: a command that produces some outputs from some inputs.
#[derive(Debug)]
pub struct Build {
    /// User-provided description of the build step.
    pub desc: Option<String>,
    /// Command line to run.  Absent for phony builds, which only group
    /// their inputs.
    pub cmdline: Option<String>,
    /// Path to the depfile this command writes, if any.
    pub depfile: Option<String>,
    pub rspfile: Option<RspFile>,
    ins: BuildIns,
    /// Inputs discovered from the last run's depfile; replaced wholesale on
    /// each successful run.
    discovered_ins: Vec<FileId>,
    outs: BuildOuts,
}

impl Build {
    pub fn new(ins: BuildIns, outs: BuildOuts) -> Self {
        Build {
            desc: None,
            cmdline: None,
            depfile: None,
            rspfile: None,
            ins,
            discovered_ins: Vec::new(),
            outs,
        }
    }

    /// Input paths that appear in `$in`.
    pub fn explicit_ins(&self) -> &[FileId] {
        &self.ins.ids[0..self.ins.explicit]
    }

    /// Input paths that, if changed, invalidate the output.
    /// Note this omits discovered_ins, which also invalidate the output.
    pub fn dirtying_ins(&self) -> &[FileId] {
        &self.ins.ids[0..(self.ins.explicit + self.ins.implicit)]
    }

    pub fn order_only_ins(&self) -> &[FileId] {
        &self.ins.ids[(self.ins.explicit + self.ins.implicit)..]
    }

    /// Inputs that are needed before building: all static ins plus the
    /// discovered ones.
    pub fn depend_ins(&self) -> impl Iterator<Item = FileId> + '_ {
        self.ins
            .ids
            .iter()
            .chain(self.discovered_ins.iter())
            .copied()
    }

    /// Input paths that were discovered after building, for use in the next build.
    pub fn discovered_ins(&self) -> &[FileId] {
        &self.discovered_ins
    }

    /// Output paths that appear in `$out`.
    pub fn explicit_outs(&self) -> &[FileId] {
        &self.outs.ids[0..self.outs.explicit]
    }

    /// Output paths that are updated when the build runs.
    pub fn outs(&self) -> &[FileId] {
        &self.outs.ids
    }

    /// The nth entry of depend_ins().
    fn depend_in(&self, n: usize) -> Option<FileId> {
        match self.ins.ids.get(n) {
            Some(&id) => Some(id),
            None => self.discovered_ins.get(n - self.ins.ids.len()).copied(),
        }
    }

    pub fn is_phony(&self) -> bool {
        self.cmdline.is_none()
    }

    /// Replace the discovered inputs, returning the set that was replaced.
    /// Static inputs and repeats are dropped from the new set.
    fn replace_discovered(&mut self, mut deps: Vec<FileId>) -> Vec<FileId> {
        let mut seen = FxHashSet::default();
        deps.retain(|id| !self.ins.ids.contains(id) && seen.insert(*id));
        std::mem::replace(&mut self.discovered_ins, deps)
    }
}

#[derive(Default)]
pub struct Graph {
    pub files: DenseMap<FileId, File>,
    pub builds: DenseMap<BuildId, Build>,
    file_to_id: FxHashMap<String, FileId>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Look up a file by canonical path, adding it if it's not yet known.
    pub fn file_id(&mut self, name: impl Into<String>) -> FileId {
        let name = canon_path(name);
        if let Some(&id) = self.file_to_id.get(&name) {
            return id;
        }
        let id = self.files.push(File {
            name: name.clone(),
            input: None,
            dependents: Vec::new(),
        });
        self.file_to_id.insert(name, id);
        id
    }

    pub fn lookup_file_id(&self, name: &str) -> Option<FileId> {
        self.file_to_id.get(&canon_path(name)).copied()
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id]
    }

    pub fn build(&self, id: BuildId) -> &Build {
        &self.builds[id]
    }

    pub fn build_mut(&mut self, id: BuildId) -> &mut Build {
        &mut self.builds[id]
    }

    /// Add a new Build, generating a BuildId for it.
    pub fn add_build(&mut self, build: Build) -> Result<BuildId, Error> {
        if build.outs().is_empty() {
            let name = build
                .desc
                .as_deref()
                .filter(|d| !d.is_empty())
                .or(build.cmdline.as_deref());
            return Err(Error::NoOutputs {
                build: name.unwrap_or("").to_string(),
            });
        }
        let new_id = self.builds.next_id();
        for &id in build.outs() {
            if self.files[id].input.is_some() {
                return Err(Error::DuplicateOutput {
                    path: self.files[id].name.clone(),
                });
            }
        }
        for &id in build.outs() {
            self.files[id].input = Some(new_id);
        }
        for id in build.depend_ins() {
            self.files[id].dependents.push(new_id);
        }
        Ok(self.builds.push(build))
    }

    /// Replace the discovered inputs of a build without checking for cycles.
    /// Returns true if the set changed.
    pub fn set_discovered_ins(&mut self, id: BuildId, deps: Vec<FileId>) -> bool {
        let old = self.builds[id].replace_discovered(deps);
        if old.as_slice() == self.builds[id].discovered_ins() {
            return false;
        }
        for dep in old {
            self.files[dep].dependents.retain(|&b| b != id);
        }
        for &dep in &self.builds[id].discovered_ins {
            self.files[dep].dependents.push(id);
        }
        true
    }

    /// Replace the discovered inputs of a build, failing with a cycle error
    /// (and leaving the graph untouched) if any new input is, transitively,
    /// produced by the build itself.
    pub fn merge_discovered_ins(&mut self, id: BuildId, deps: Vec<FileId>) -> Result<bool, Error> {
        for &dep in &deps {
            if let Some(cycle) = self.path_to_build(dep, id) {
                return Err(self.cycle_error(&cycle));
            }
        }
        Ok(self.set_discovered_ins(id, deps))
    }

    /// Find a chain of files leading from `from` back to an output of
    /// `target`, following producing builds' inputs.  The returned chain
    /// begins and ends with that output.
    fn path_to_build(&self, from: FileId, target: BuildId) -> Option<Vec<FileId>> {
        let mut visited: FxHashSet<BuildId> = FxHashSet::default();
        // `path` mirrors the files on `stack`, which holds (file, next input to visit).
        let mut path: Vec<FileId> = vec![from];
        let mut stack: Vec<(FileId, usize)> = vec![(from, 0)];
        while let Some((file, next)) = stack.pop() {
            let bid = match self.files[file].input {
                Some(bid) => bid,
                None => {
                    path.pop();
                    continue;
                }
            };
            if bid == target {
                let mut cycle = vec![file];
                cycle.extend(path);
                return Some(cycle);
            }
            if next == 0 && !visited.insert(bid) {
                path.pop();
                continue;
            }
            match self.builds[bid].depend_in(next) {
                Some(input) => {
                    stack.push((file, next + 1));
                    stack.push((input, 0));
                    path.push(input);
                }
                None => {
                    path.pop();
                }
            }
        }
        None
    }

    /// Check the whole graph, static and discovered edges, for cycles.
    pub fn check_cycles(&self) -> Result<(), Error> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Visiting,
            Done,
        }
        let mut marks: DenseMap<BuildId, Mark> = DenseMap::new_sized(self.builds.len(), Mark::New);
        for root in self.builds.all_ids() {
            if marks[root] != Mark::New {
                continue;
            }
            marks[root] = Mark::Visiting;
            // Entries are (build, the output of it we arrived through, next input to visit).
            let mut stack: Vec<(BuildId, Option<FileId>, usize)> = vec![(root, None, 0)];
            while let Some((bid, via, next)) = stack.pop() {
                let input = match self.builds[bid].depend_in(next) {
                    Some(input) => input,
                    None => {
                        marks[bid] = Mark::Done;
                        continue;
                    }
                };
                stack.push((bid, via, next + 1));
                let producer = match self.files[input].input {
                    Some(producer) => producer,
                    None => continue,
                };
                match marks[producer] {
                    Mark::Done => {}
                    Mark::New => {
                        marks[producer] = Mark::Visiting;
                        stack.push((producer, Some(input), 0));
                    }
                    Mark::Visiting => {
                        let start = stack
                            .iter()
                            .position(|&(b, _, _)| b == producer)
                            .unwrap_or(0);
                        let mut cycle = vec![input];
                        cycle.extend(stack[start + 1..].iter().filter_map(|&(_, via, _)| via));
                        cycle.push(input);
                        return Err(self.cycle_error(&cycle));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn cycle_error(&self, files: &[FileId]) -> Error {
        Error::Cycle {
            cycle: files.iter().map(|&id| self.files[id].name.clone()).collect(),
        }
    }
}

/// Gathered state of on-disk files.
/// Due to discovered deps this map may grow after graph initialization.
pub struct FileState(DenseMap<FileId, Option<MTime>>);

impl FileState {
    pub fn new(graph: &Graph) -> Self {
        FileState(DenseMap::new_sized(graph.files.len(), None))
    }

    pub fn get(&self, id: FileId) -> Option<MTime> {
        self.0.lookup(id).copied().flatten()
    }

    pub fn set(&mut self, id: FileId, mtime: MTime) {
        self.0.set_grow(id, Some(mtime), None);
    }

    /// Stat a file and remember the result.
    pub fn stat(&mut self, fs: &dyn FileSystem, id: FileId, path: &str) -> Result<MTime, Error> {
        let mtime = fs.stat(path).map_err(|err| Error::io(path, err))?;
        self.set(id, mtime);
        Ok(mtime)
    }
}
