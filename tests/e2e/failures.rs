use crate::e2e::*;
use shuriken::load::BuildDecl;
use shuriken::work::Options;
use shuriken::Error;

fn options(parallelism: usize, keep_going: usize) -> Options {
    Options {
        parallelism,
        keep_going,
        ..Options::default()
    }
}

#[test]
fn independent_builds_survive_a_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls: Vec<BuildDecl> = (0..10)
        .map(|i| {
            let decl = BuildDecl::new().out(space.path(&format!("n{}", i)));
            if i == 4 {
                decl.command("echo broken; exit 3")
            } else {
                decl.command("touch $out")
            }
        })
        .collect();
    let targets: Vec<String> = (0..10).map(|i| format!("n{}", i)).collect();
    let targets: Vec<&str> = targets.iter().map(String::as_str).collect();

    let result = space.build_with(&decls, &targets, options(10, 0), &mut Recorder::default());
    match result {
        Err(Error::Execution { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].output, space.path("n4"));
            assert_eq!(failures[0].exit_code, Some(3));
            assert_eq!(failures[0].output_text, b"broken\n");
        }
        other => panic!("unexpected {:?}", other),
    }
    for i in (0..10).filter(|&i| i != 4) {
        assert!(space.exists(&format!("n{}", i)), "n{} missing", i);
    }
    Ok(())
}

#[test]
fn dependents_of_a_failure_never_run() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [
        BuildDecl::new().out(space.path("a")).command("exit 1"),
        touch(&space, "b", &["a"]),
        touch(&space, "c", &[]),
    ];
    let result = space.build_with(&decls, &["b", "c"], options(1, 0), &mut Recorder::default());
    assert!(matches!(result, Err(Error::Execution { .. })));
    assert!(!space.exists("b"));
    assert!(space.exists("c"));
    Ok(())
}

#[test]
fn failed_build_reruns() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .command("touch $out && exit 1")];
    assert!(space.build(&decls, &["out"]).is_err());
    assert!(space.exists("out"));
    // The output exists, but no successful run was ever recorded.
    assert!(space.build(&decls, &["out"]).is_err());
    Ok(())
}

#[test]
fn missing_source() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [touch(&space, "out", &["in"])];
    match space.build(&decls, &["out"]) {
        Err(Error::MissingInput { path, needed_by }) => {
            assert_eq!(path, space.path("in"));
            assert_eq!(needed_by, space.path("out"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn unknown_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [touch(&space, "out", &[])];
    assert!(matches!(
        space.build(&decls, &["other"]),
        Err(Error::UnknownTarget { .. })
    ));
    Ok(())
}

#[test]
fn declared_cycle() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [touch(&space, "a", &["b"]), touch(&space, "b", &["a"])];
    assert!(matches!(space.load(&decls), Err(Error::Cycle { .. })));
    Ok(())
}

/// A build whose depfile names `dep`.
fn discovers(space: &TestSpace, out: &str, dep: &str) -> BuildDecl {
    BuildDecl::new()
        .out(space.path(out))
        .var("dep", space.path(dep))
        .command("echo \"$out: $dep\" > $out.d && touch $out")
        .depfile("$out.d")
}

#[test]
fn recorded_cycle_stops_before_running() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("x.h", "")?;
    assert_eq!(space.build(&[discovers(&space, "tool.o", "x.h")], &["tool.o"])?, 1);

    // x.h is now generated from tool.o, which the database says reads x.h.
    let decls = [
        discovers(&space, "tool.o", "x.h"),
        BuildDecl::new()
            .out(space.path("x.h"))
            .input(space.path("tool.o"))
            .command("touch $out"),
    ];
    let mut progress = Recorder::default();
    match space.build_with(&decls, &["x.h"], Options::default(), &mut progress) {
        Err(Error::Cycle { cycle }) => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&space.path("tool.o")), "{:?}", cycle);
            assert!(cycle.contains(&space.path("x.h")), "{:?}", cycle);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(progress.events.is_empty());
    Ok(())
}

#[test]
fn discovered_cycle_fails_the_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("gen.h", "")?;
    let decls = [
        discovers(&space, "tool.o", "gen.h"),
        touch(&space, "gen.h", &["tool.o"]),
    ];
    let mut progress = Recorder::default();
    let result = space.build_with(&decls, &["gen.h"], Options::default(), &mut progress);
    assert!(matches!(result, Err(Error::Cycle { .. })), "{:?}", result);
    // Only tool.o ran; gen.h never became ready.
    let started = progress
        .events
        .iter()
        .filter(|e| matches!(e, Event::Started(_)))
        .count();
    assert_eq!(started, 1);
    Ok(())
}

#[test]
fn commands_finishing_after_a_fatal_error_are_recorded() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("slow.h", "")?;
    let decls = [
        discovers(&space, "fast", "missing.h"),
        BuildDecl::new()
            .out(space.path("slow"))
            .var("dep", space.path("slow.h"))
            .command("sleep 0.5 && echo \"$out: $dep\" > $out.d && touch $out")
            .depfile("$out.d"),
    ];
    let mut progress = Recorder::default();
    let result = space.build_with(&decls, &["fast", "slow"], options(2, 1), &mut progress);
    match result {
        Err(Error::MissingInput { path, .. }) => assert_eq!(path, space.path("missing.h")),
        other => panic!("unexpected {:?}", other),
    }
    assert!(space.exists("slow"));

    // slow's success and its depfile made it into the database.
    let state = space.load(&decls)?;
    let graph = &state.graph;
    let slow = graph
        .lookup_file_id(&space.path("slow"))
        .and_then(|id| graph.file(id).input)
        .ok_or_else(|| anyhow::anyhow!("no build for slow"))?;
    let discovered: Vec<&str> = graph
        .build(slow)
        .discovered_ins()
        .iter()
        .map(|&id| graph.file(id).name.as_str())
        .collect();
    assert_eq!(discovered, vec![space.path("slow.h")]);
    drop(state);
    assert_eq!(space.build(&decls, &["slow"])?, 0);
    Ok(())
}
