use crate::e2e::*;
use shuriken::load::BuildDecl;
use shuriken::work::Options;

fn cat(space: &TestSpace, out: &str, input: &str) -> BuildDecl {
    BuildDecl::new()
        .out(space.path(out))
        .input(space.path(input))
        .command("cat $in > $out")
        .description("CAT $out")
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "hello\n")?;
    let decls = [cat(&space, "out", "in")];
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert_eq!(space.read("out")?, "hello\n");
    assert!(space.db_path().exists());
    Ok(())
}

#[test]
fn no_work_on_rerun() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "hello\n")?;
    space.age("in", 100)?;
    let decls = [cat(&space, "mid", "in"), cat(&space, "out", "mid")];
    assert_eq!(space.build(&decls, &["out"])?, 2);
    assert_eq!(space.build(&decls, &["out"])?, 0);

    space.write("in", "goodbye\n")?;
    assert_eq!(space.build(&decls, &["out"])?, 2);
    assert_eq!(space.read("out")?, "goodbye\n");
    assert_eq!(space.build(&decls, &["out"])?, 0);
    Ok(())
}

#[test]
fn deleted_output_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    let decls = [cat(&space, "out", "in")];
    assert_eq!(space.build(&decls, &["out"])?, 1);
    std::fs::remove_file(space.path("out"))?;
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert!(space.exists("out"));
    Ok(())
}

#[test]
fn changed_command_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x\n")?;
    assert_eq!(space.build(&[cat(&space, "out", "in")], &["out"])?, 1);

    let changed = BuildDecl::new()
        .out(space.path("out"))
        .input(space.path("in"))
        .command("cat $in $in > $out");
    assert_eq!(space.build(&[changed.clone()], &["out"])?, 1);
    assert_eq!(space.read("out")?, "x\nx\n");
    assert_eq!(space.build(&[changed], &["out"])?, 0);
    Ok(())
}

#[test]
fn phony_groups_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [
        touch(&space, "a", &[]),
        touch(&space, "b", &[]),
        BuildDecl::new()
            .out(space.path("all"))
            .inputs([space.path("a"), space.path("b")]),
    ];
    assert_eq!(space.build(&decls, &["all"])?, 2);
    assert!(space.exists("a"));
    assert!(space.exists("b"));
    assert!(!space.exists("all"));
    assert_eq!(space.build(&decls, &["all"])?, 0);
    Ok(())
}

#[test]
fn order_only_builds_first_but_never_dirties() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    space.age("in", 100)?;
    let decls = [
        touch(&space, "stamp", &[]),
        cat(&space, "out", "in").order_only(space.path("stamp")),
    ];
    assert_eq!(space.build(&decls, &["out"])?, 2);

    std::fs::remove_file(space.path("stamp"))?;
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert!(space.exists("stamp"));
    Ok(())
}

#[test]
fn want_every_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [touch(&space, "a", &[]), touch(&space, "b", &["a"])];
    let state = space.load(&decls)?;
    let fs = shuriken::fs::RealFileSystem::new();
    let mut progress = Recorder::default();
    let mut work = shuriken::work::Work::new(state, &fs, Options::default(), &mut progress);
    work.want_every_file()?;
    assert_eq!(work.run()?, 2);
    Ok(())
}

#[test]
fn explain() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    let decls = [cat(&space, "out", "in")];
    let options = Options {
        explain: true,
        ..Options::default()
    };
    let mut progress = Recorder::default();
    space.build_with(&decls, &["out"], options.clone(), &mut progress)?;
    let out = space.path("out");
    assert_eq!(progress.logs, vec![format!("explain: {}: no recorded build", out)]);

    std::fs::remove_file(&out)?;
    let mut progress = Recorder::default();
    space.build_with(&decls, &["out"], options, &mut progress)?;
    assert_eq!(
        progress.logs,
        vec![format!("explain: {}: output {} missing", out, out)]
    );
    Ok(())
}

#[test]
fn trace_is_valid_json_array() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let trace_path = space.path("trace.json");
    shuriken::trace::open(&trace_path)?;
    let result = space.build(&[touch(&space, "out", &[])], &["out"]);
    shuriken::trace::close()?;
    assert_eq!(result?, 1);

    let text = space.read("trace.json")?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.first(), Some(&"["));
    assert_eq!(lines.last(), Some(&"]"));
    let events = &lines[1..lines.len() - 1];
    assert!(events.iter().any(|l| l.contains("\"name\": \"touch")));
    assert!(events.iter().any(|l| l.contains("\"name\": \"work.run\"")));
    let (last, rest) = events.split_last().unwrap();
    assert!(last.starts_with('{') && last.ends_with('}'), "{}", last);
    assert!(last.contains("\"name\": \"main\""));
    for line in rest {
        assert!(line.starts_with('{') && line.ends_with("},"), "{}", line);
    }
    Ok(())
}
