//! Build signatures: what was recorded about a build when it last ran, used
//! to determine whether it is still up to date.
//!
//! A signature pairs the newest input mtime observed just before the command
//! ran (the "watermark") with a hash of the command itself.  Inputs touched
//! after the command started are newer than the watermark and so dirty the
//! build on the next run.

use crate::fs::MTime;
use crate::graph::{Build, BuildId, FileState, Graph, RspFile};
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{self, Hasher};

/// Hash of the parts of a build that aren't files: its command line and
/// response file.  Compared to verify a build's command hasn't changed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Hash(pub u64);

const UNIT_SEPARATOR: u8 = 0x1F;

fn write_rsp(hasher: &mut FxHasher, rspfile: &RspFile) {
    hash::Hash::hash(rspfile, hasher);
}

pub fn hash_command(build: &Build) -> Hash {
    let mut hasher = FxHasher::default();
    hasher.write(build.cmdline.as_deref().unwrap_or("").as_bytes());
    hasher.write_u8(UNIT_SEPARATOR);
    if let Some(rspfile) = &build.rspfile {
        write_rsp(&mut hasher, rspfile);
    }
    Hash(hasher.finish())
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Signature {
    pub watermark: MTime,
    pub command: Hash,
}

/// Newest mtime among a build's dirtying and discovered inputs.
/// Prerequisite: all of those files have been stat()ed.
pub fn watermark(file_state: &FileState, build: &Build) -> MTime {
    build
        .dirtying_ins()
        .iter()
        .chain(build.discovered_ins())
        .filter_map(|&id| file_state.get(id))
        .max()
        .unwrap_or(MTime::Missing)
}

pub fn signature(file_state: &FileState, build: &Build) -> Signature {
    Signature {
        watermark: watermark(file_state, build),
        command: hash_command(build),
    }
}

/// Signatures of builds as of their last successful run, keyed by build.
#[derive(Default)]
pub struct Signatures(FxHashMap<BuildId, Signature>);

impl Signatures {
    pub fn get(&self, id: BuildId) -> Option<&Signature> {
        self.0.get(&id)
    }

    pub fn set(&mut self, id: BuildId, sig: Signature) {
        self.0.insert(id, sig);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Why a build needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dirty {
    NeverBuilt,
    OutputMissing(String),
    CommandChanged,
    DiscoveredInputMissing(String),
    InputNewer(String),
}

impl std::fmt::Display for Dirty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dirty::NeverBuilt => write!(f, "no recorded build"),
            Dirty::OutputMissing(name) => write!(f, "output {} missing", name),
            Dirty::CommandChanged => write!(f, "command line changed"),
            Dirty::DiscoveredInputMissing(name) => {
                write!(f, "discovered input {} no longer exists", name)
            }
            Dirty::InputNewer(name) => write!(f, "input {} newer than last build", name),
        }
    }
}

/// Compare a build's current state against its recorded signature.
/// Returns the first reason found for the build to be dirty, if any.
/// Prerequisite: all of the build's inputs and outputs have been stat()ed.
pub fn check_dirty(
    graph: &Graph,
    file_state: &FileState,
    build: &Build,
    last: Option<&Signature>,
) -> Option<Dirty> {
    let last = match last {
        Some(last) => last,
        None => return Some(Dirty::NeverBuilt),
    };
    for &id in build.outs() {
        if file_state.get(id) != Some(MTime::Missing) {
            continue;
        }
        return Some(Dirty::OutputMissing(graph.file(id).name.clone()));
    }
    if last.command != hash_command(build) {
        return Some(Dirty::CommandChanged);
    }
    for &id in build.discovered_ins() {
        if file_state.get(id) == Some(MTime::Missing) {
            return Some(Dirty::DiscoveredInputMissing(graph.file(id).name.clone()));
        }
    }
    for &id in build.dirtying_ins().iter().chain(build.discovered_ins()) {
        match file_state.get(id) {
            Some(mtime) if mtime <= last.watermark => {}
            _ => return Some(Dirty::InputNewer(graph.file(id).name.clone())),
        }
    }
    None
}
