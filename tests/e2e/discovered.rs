use crate::e2e::*;
use shuriken::load::BuildDecl;

/// A build whose depfile names the headers listed in `headers`, a file the
/// build declares as an implicit input.
fn gendep(space: &TestSpace) -> BuildDecl {
    BuildDecl::new()
        .out(space.path("out"))
        .input(space.path("in.c"))
        .implicit(space.path("headers"))
        .var("list", space.path("headers"))
        .command("{ printf '%s: ' $out; cat $list; } > $out.d && touch $out")
        .depfile("$out.d")
}

fn discovered(space: &TestSpace, decls: &[BuildDecl]) -> anyhow::Result<Vec<String>> {
    let state = space.load(decls)?;
    let graph = &state.graph;
    let out = graph
        .lookup_file_id(&space.path("out"))
        .and_then(|id| graph.file(id).input)
        .ok_or_else(|| anyhow::anyhow!("no build for out"))?;
    Ok(graph
        .build(out)
        .discovered_ins()
        .iter()
        .map(|&id| graph.file(id).name.clone())
        .collect())
}

#[test]
fn header_change_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in.c", "")?;
    space.write("a.h", "")?;
    space.write("headers", &space.path("a.h"))?;
    for path in ["in.c", "a.h", "headers"] {
        space.age(path, 100)?;
    }
    let decls = [gendep(&space)];
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert_eq!(discovered(&space, &decls)?, vec![space.path("a.h")]);
    assert_eq!(space.build(&decls, &["out"])?, 0);

    // Newer than anything the build saw, but still in the past.
    space.age("a.h", 50)?;
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert_eq!(space.build(&decls, &["out"])?, 0);
    Ok(())
}

#[test]
fn shrinking_depfile_drops_inputs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in.c", "")?;
    space.write("a.h", "")?;
    space.write("b.h", "")?;
    space.write("headers", &format!("{} {}", space.path("a.h"), space.path("b.h")))?;
    for path in ["in.c", "a.h", "b.h", "headers"] {
        space.age(path, 100)?;
    }
    let decls = [gendep(&space)];
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert_eq!(
        discovered(&space, &decls)?,
        vec![space.path("a.h"), space.path("b.h")]
    );

    space.write("headers", &space.path("b.h"))?;
    space.age("headers", 50)?;
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert_eq!(discovered(&space, &decls)?, vec![space.path("b.h")]);

    // a.h is no longer an input, so neither touching nor deleting it matters.
    std::fs::remove_file(space.path("a.h"))?;
    assert_eq!(space.build(&decls, &["out"])?, 0);
    Ok(())
}

#[test]
fn deleted_header_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in.c", "")?;
    space.write("a.h", "")?;
    space.write("headers", &space.path("a.h"))?;
    let decls = [gendep(&space)];
    assert_eq!(space.build(&decls, &["out"])?, 1);

    std::fs::remove_file(space.path("a.h"))?;
    // The rerun writes a depfile still naming the header that's gone.
    match space.build(&decls, &["out"]) {
        Err(shuriken::Error::MissingInput { path, .. }) => assert_eq!(path, space.path("a.h")),
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn missing_depfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .command("touch $out")
        .depfile("$out.d")];
    match space.build(&decls, &["out"]) {
        Err(shuriken::Error::Io { path, .. }) => {
            assert_eq!(path, std::path::PathBuf::from(space.path("out.d")))
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn bad_depfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .command("printf 'out: a \\\\' > $out.d && touch $out")
        .depfile("$out.d")];
    assert!(matches!(
        space.build(&decls, &["out"]),
        Err(shuriken::Error::Parse { .. })
    ));
    Ok(())
}

#[test]
fn depfile_for_another_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .command("echo 'elsewhere: x' > $out.d && touch $out")
        .depfile("$out.d")];
    match space.build(&decls, &["out"]) {
        Err(shuriken::Error::Parse { message, .. }) => {
            assert!(message.contains("does not mention output"), "{}", message)
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn empty_depfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .command(": > $out.d && touch $out")
        .depfile("$out.d")];
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert_eq!(space.build(&decls, &["out"])?, 0);
    Ok(())
}
