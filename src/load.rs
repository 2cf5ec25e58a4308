//! Graph loading: turns build declarations into the build graph, and merges
//! depfile records into it.

use crate::depfile::OwnedDeps;
use crate::error::Error;
use crate::eval::{Env, EvalString};
use crate::graph::{self, BuildId, FileId, Graph, RspFile};
use crate::hash::Signatures;
use crate::smallmap::SmallMap;
use crate::{db, trace};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Declaration of one build step: the programmatic equivalent of a `build`
/// statement.
///
/// ```
/// use shuriken::load::BuildDecl;
/// let decl = BuildDecl::new()
///     .out("main.o")
///     .input("main.c")
///     .command("cc -MD -MF $out.d -c $in -o $out")
///     .depfile("$out.d");
/// ```
#[derive(Debug, Clone, Default)]
pub struct BuildDecl {
    outs: Vec<String>,
    implicit_outs: Vec<String>,
    ins: Vec<String>,
    implicit_ins: Vec<String>,
    order_only_ins: Vec<String>,
    command: Option<String>,
    description: Option<String>,
    depfile: Option<String>,
    rspfile: Option<(String, String)>,
    vars: Vec<(String, String)>,
}

impl BuildDecl {
    pub fn new() -> Self {
        Self::default()
    }

    /// An explicit output, part of `$out`.
    pub fn out(mut self, path: impl Into<String>) -> Self {
        self.outs.push(path.into());
        self
    }

    pub fn outs<I: IntoIterator<Item = S>, S: Into<String>>(mut self, paths: I) -> Self {
        self.outs.extend(paths.into_iter().map(Into::into));
        self
    }

    /// An output that the command also writes but that isn't in `$out`.
    pub fn implicit_out(mut self, path: impl Into<String>) -> Self {
        self.implicit_outs.push(path.into());
        self
    }

    /// An explicit input, part of `$in`.
    pub fn input(mut self, path: impl Into<String>) -> Self {
        self.ins.push(path.into());
        self
    }

    pub fn inputs<I: IntoIterator<Item = S>, S: Into<String>>(mut self, paths: I) -> Self {
        self.ins.extend(paths.into_iter().map(Into::into));
        self
    }

    /// An input that dirties the build but isn't in `$in`.
    pub fn implicit(mut self, path: impl Into<String>) -> Self {
        self.implicit_ins.push(path.into());
        self
    }

    /// An input that must be built first but never dirties the build.
    pub fn order_only(mut self, path: impl Into<String>) -> Self {
        self.order_only_ins.push(path.into());
        self
    }

    /// Command template; a build without one is phony.
    pub fn command(mut self, template: impl Into<String>) -> Self {
        self.command = Some(template.into());
        self
    }

    pub fn description(mut self, template: impl Into<String>) -> Self {
        self.description = Some(template.into());
        self
    }

    /// Template for the path of the depfile the command writes.
    pub fn depfile(mut self, template: impl Into<String>) -> Self {
        self.depfile = Some(template.into());
        self
    }

    /// A response file to write before running the command, given path and
    /// content templates.
    pub fn rspfile(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.rspfile = Some((path.into(), content.into()));
        self
    }

    /// A variable visible to this build's templates.  Its value may itself
    /// refer to `$in` and `$out`.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((name.into(), value.into()));
        self
    }
}

/// A variable lookup environment for magic $in/$out variables.
struct BuildImplicitVars<'a> {
    graph: &'a Graph,
    build: &'a graph::Build,
}

impl<'a> BuildImplicitVars<'a> {
    fn file_list(&self, ids: &[FileId], sep: char) -> String {
        let mut out = String::new();
        for &id in ids {
            if !out.is_empty() {
                out.push(sep);
            }
            out.push_str(&self.graph.file(id).name);
        }
        out
    }
}

impl<'a> Env for BuildImplicitVars<'a> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        match var {
            "in" => Some(Cow::Owned(self.file_list(self.build.explicit_ins(), ' '))),
            "in_newline" => Some(Cow::Owned(self.file_list(self.build.explicit_ins(), '\n'))),
            "out" => Some(Cow::Owned(self.file_list(self.build.explicit_outs(), ' '))),
            "out_newline" => Some(Cow::Owned(self.file_list(self.build.explicit_outs(), '\n'))),
            _ => None,
        }
    }
}

/// Expand one template, naming the build and field in any error.
fn expand(out: &str, field: &str, template: &str, envs: &[&dyn Env]) -> Result<String, Error> {
    let parsed = EvalString::parse(template).map_err(|err| Error::Parse {
        path: out.to_string(),
        message: format!("{}: {}", field, err),
    })?;
    Ok(parsed.evaluate(envs))
}

/// State loaded by Loader::read_db().
pub struct State {
    pub graph: Graph,
    pub signatures: Signatures,
    pub db: Option<db::Writer>,
}

impl State {
    /// A state with no recorded builds that records nothing.
    pub fn without_db(graph: Graph) -> Self {
        State {
            graph,
            signatures: Signatures::default(),
            db: None,
        }
    }
}

/// Builds up a Graph from declarations and depfile records.
#[derive(Default)]
pub struct Loader {
    graph: Graph,
}

impl Loader {
    pub fn new() -> Self {
        Loader::default()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn file_ids(&mut self, paths: Vec<String>) -> Vec<FileId> {
        paths.into_iter().map(|p| self.graph.file_id(p)).collect()
    }

    pub fn add_build(&mut self, decl: BuildDecl) -> Result<BuildId, Error> {
        let explicit_outs = decl.outs.len();
        let mut out_ids = self.file_ids(decl.outs);
        out_ids.extend(self.file_ids(decl.implicit_outs));
        let first_out = match out_ids.first() {
            Some(&id) => self.graph.file(id).name.clone(),
            None => {
                let name = decl.description.as_ref().or(decl.command.as_ref());
                return Err(Error::NoOutputs {
                    build: name.cloned().unwrap_or_default(),
                });
            }
        };
        for (i, id) in out_ids.iter().enumerate() {
            if out_ids[..i].contains(id) {
                return Err(Error::DuplicateOutput {
                    path: self.graph.file(*id).name.clone(),
                });
            }
        }

        let ins = graph::BuildIns {
            explicit: decl.ins.len(),
            implicit: decl.implicit_ins.len(),
            order_only: decl.order_only_ins.len(),
            ids: {
                let mut ids = self.file_ids(decl.ins);
                ids.extend(self.file_ids(decl.implicit_ins));
                ids.extend(self.file_ids(decl.order_only_ins));
                ids
            },
        };
        let outs = graph::BuildOuts {
            ids: out_ids,
            explicit: explicit_outs,
        };
        let mut build = graph::Build::new(ins, outs);

        let implicit_vars = BuildImplicitVars {
            graph: &self.graph,
            build: &build,
        };
        let mut build_vars: SmallMap<String, String> = SmallMap::new();
        for (name, value) in &decl.vars {
            let value = expand(&first_out, name, value, &[&implicit_vars])?;
            build_vars.insert(name.clone(), value);
        }
        let envs: [&dyn Env; 2] = [&implicit_vars, &build_vars];

        let lookup = |field: &str, template: &Option<String>| -> Result<Option<String>, Error> {
            match template {
                Some(t) => Ok(Some(expand(&first_out, field, t, &envs)?)),
                None => Ok(None),
            }
        };
        let cmdline = lookup("command", &decl.command)?.filter(|c| !c.is_empty());
        let desc = lookup("description", &decl.description)?;
        let depfile = lookup("depfile", &decl.depfile)?.filter(|d| !d.is_empty());
        let rspfile = match &decl.rspfile {
            Some((path, content)) => Some(RspFile {
                path: PathBuf::from(expand(&first_out, "rspfile", path, &envs)?),
                content: expand(&first_out, "rspfile_content", content, &envs)?,
            }),
            None => None,
        };

        build.cmdline = cmdline;
        build.desc = desc;
        build.depfile = depfile;
        build.rspfile = rspfile;

        self.graph.add_build(build)
    }

    /// Merge depfile records into the graph: each record's inputs become the
    /// discovered inputs of the build producing its output, replacing any
    /// discovered earlier.  Records naming files no build produces are ignored.
    pub fn merge_depfile(&mut self, deps: &OwnedDeps) -> Result<(), Error> {
        let mut per_build: SmallMap<BuildId, Vec<FileId>> = SmallMap::new();
        for (target, ins) in deps.iter() {
            let bid = match self.graph.lookup_file_id(target).and_then(|id| self.graph.file(id).input) {
                Some(bid) => bid,
                None => {
                    tracing::debug!(target = %target, "ignoring depfile record for unknown output");
                    continue;
                }
            };
            let ids = self.file_ids(ins.clone());
            per_build.entry_or_insert_with(bid, Vec::new).extend(ids);
        }
        for (bid, ids) in per_build {
            self.graph.merge_discovered_ins(bid, ids)?;
        }
        Ok(())
    }

    /// Check the graph for cycles and hand it back.
    pub fn finish(self) -> Result<Graph, Error> {
        trace::scope("check_cycles", || self.graph.check_cycles())?;
        Ok(self.graph)
    }

    /// Finish the graph and load the build database at `path` into it,
    /// creating the database if it doesn't exist.
    pub fn read_db(self, path: &Path) -> Result<State, Error> {
        let mut graph = self.finish()?;
        let mut signatures = Signatures::default();
        let db = trace::scope("db::open", || db::open(path, &mut graph, &mut signatures))?;
        Ok(State {
            graph,
            signatures,
            db: Some(db),
        })
    }
}
