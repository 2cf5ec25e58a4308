use crate::e2e::*;
use shuriken::load::BuildDecl;
use shuriken::rspfile::RspConfig;
use shuriken::work::Options;

#[test]
fn declared_rspfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("a", "")?;
    space.write("b", "")?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .inputs([space.path("a"), space.path("b")])
        .rspfile("$out.rsp", "$in_newline")
        .command("cp $out.rsp $out")];
    assert_eq!(space.build(&decls, &["out"])?, 1);
    assert_eq!(
        space.read("out")?,
        format!("{}\n{}", space.path("a"), space.path("b"))
    );
    assert!(!space.exists("out.rsp"));
    assert_eq!(space.build(&decls, &["out"])?, 0);
    Ok(())
}

#[test]
fn declared_rspfile_kept_on_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .rspfile("$out.rsp", "contents")
        .command("false")];
    assert!(matches!(
        space.build(&decls, &["out"]),
        Err(shuriken::Error::Execution { .. })
    ));
    assert_eq!(space.read("out.rsp")?, "contents");
    Ok(())
}

#[test]
fn rspfile_content_change_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decl = |content: &str| {
        BuildDecl::new()
            .out(space.path("out"))
            .rspfile("$out.rsp", content)
            .command("cp $out.rsp $out")
    };
    assert_eq!(space.build(&[decl("one")], &["out"])?, 1);
    assert_eq!(space.build(&[decl("one")], &["out"])?, 0);
    assert_eq!(space.build(&[decl("two")], &["out"])?, 1);
    assert_eq!(space.read("out")?, "two");
    Ok(())
}

/// Writes its arguments to the file named by the first one, noting whether
/// they arrived through a response file.
const ARGS_SCRIPT: &str = "#!/bin/sh
mode=direct
case \"$1\" in
@*) mode=rsp; set -- $(cat \"${1#@}\") ;;
esac
out=$1
shift
echo \"$mode $*\" > \"$out\"
";

fn args_script(space: &TestSpace) -> anyhow::Result<String> {
    use std::os::unix::fs::PermissionsExt;
    space.write("args.sh", ARGS_SCRIPT)?;
    let path = space.path("args.sh");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn long_args() -> Vec<String> {
    (0..200).map(|i| format!("argument{}", i)).collect()
}

/// Build with the response file threshold set relative to the command's
/// length, returning what the script saw.
fn build_at_threshold(slack: isize) -> anyhow::Result<String> {
    let space = TestSpace::new()?;
    let script = args_script(&space)?;
    std::fs::create_dir(space.path("rsp"))?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .var("args", long_args().join(" "))
        .command(format!("{} $out $args", script))];

    let state = space.load(&decls)?;
    let len = state
        .graph
        .builds
        .iter()
        .filter_map(|(_, b)| b.cmdline.as_ref())
        .map(|c| c.len())
        .next()
        .ok_or_else(|| anyhow::anyhow!("no command"))?;
    drop(state);

    let options = Options {
        rsp: RspConfig {
            threshold: (len as isize + slack) as usize,
            keep_on_failure: false,
            dir: Some(space.path("rsp").into()),
        },
        ..Options::default()
    };
    space.build_with(&decls, &["out"], options, &mut Recorder::default())?;
    assert_eq!(std::fs::read_dir(space.path("rsp"))?.count(), 0);
    Ok(space.read("out")?)
}

#[test]
fn long_command_at_threshold_runs_directly() -> anyhow::Result<()> {
    let seen = build_at_threshold(0)?;
    assert_eq!(seen, format!("direct {}\n", long_args().join(" ")));
    Ok(())
}

#[test]
fn long_command_past_threshold_uses_rspfile() -> anyhow::Result<()> {
    let seen = build_at_threshold(-1)?;
    assert_eq!(seen, format!("rsp {}\n", long_args().join(" ")));
    Ok(())
}

#[test]
fn generated_rspfile_kept_on_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    std::fs::create_dir(space.path("rsp"))?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .command(format!("false {}", long_args().join(" ")))];
    let options = Options {
        rsp: RspConfig {
            threshold: 16,
            keep_on_failure: true,
            dir: Some(space.path("rsp").into()),
        },
        ..Options::default()
    };
    let result = space.build_with(&decls, &["out"], options, &mut Recorder::default());
    assert!(matches!(result, Err(shuriken::Error::Execution { .. })));

    let kept: Vec<_> = std::fs::read_dir(space.path("rsp"))?.collect::<Result<_, _>>()?;
    assert_eq!(kept.len(), 1);
    let content = std::fs::read_to_string(kept[0].path())?;
    assert_eq!(content, long_args().join(" "));
    Ok(())
}

#[test]
fn unwritable_generated_rspfile_is_an_io_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let missing = space.path("no/such/dir");
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .command("touch $out extra args here")];
    let options = Options {
        rsp: RspConfig {
            threshold: 5,
            keep_on_failure: false,
            dir: Some(missing.clone().into()),
        },
        ..Options::default()
    };
    match space.build_with(&decls, &["out"], options, &mut Recorder::default()) {
        Err(shuriken::Error::Io { path, .. }) => {
            assert_eq!(path, std::path::PathBuf::from(missing))
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn unwritable_declared_rspfile_is_an_io_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("blocker", "")?;
    let decls = [BuildDecl::new()
        .out(space.path("out"))
        .var("rsp", space.path("blocker/out.rsp"))
        .rspfile("$rsp", "contents")
        .command("touch $out")];
    assert!(matches!(
        space.build(&decls, &["out"]),
        Err(shuriken::Error::Io { .. })
    ));
    assert!(!space.exists("out"));
    Ok(())
}
