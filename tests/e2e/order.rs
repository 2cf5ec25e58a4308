use crate::e2e::*;
use shuriken::graph::BuildId;
use shuriken::load::BuildDecl;
use shuriken::work::{Options, Work};

/// Deterministic xorshift, enough to shape a graph.
struct Rng(u64);

impl Rng {
    fn below(&mut self, n: usize) -> usize {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 % n as u64) as usize
    }
}

fn random_dag(space: &TestSpace, seed: u64, nodes: usize) -> Vec<BuildDecl> {
    let mut rng = Rng(seed);
    let mut decls = Vec::new();
    for i in 0..nodes {
        let mut ins: Vec<String> = Vec::new();
        if i > 0 {
            for _ in 0..rng.below(4) {
                let dep = space.path(&format!("n{}", rng.below(i)));
                if !ins.contains(&dep) {
                    ins.push(dep);
                }
            }
        }
        // Some jitter so finishing order differs from starting order.
        let command = if rng.below(3) == 0 {
            "sleep 0.01 && touch $out"
        } else {
            "touch $out"
        };
        decls.push(
            BuildDecl::new()
                .out(space.path(&format!("n{}", i)))
                .inputs(ins)
                .command(command),
        );
    }
    decls
}

/// Every build starts only after all the builds producing its inputs have
/// finished, and each runs exactly once.
fn check_order(seed: u64, parallelism: usize) -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = random_dag(&space, seed, 40);
    let state = space.load(&decls)?;
    let fs = shuriken::fs::RealFileSystem::new();
    let mut progress = Recorder::default();
    let options = Options {
        parallelism,
        ..Options::default()
    };
    let mut work = Work::new(state, &fs, options, &mut progress);
    work.want_every_file()?;
    assert_eq!(work.run()?, 40);
    let state = work.into_state();
    let graph = &state.graph;

    let position = |event: Event| {
        let mut found = progress.events.iter().enumerate().filter(|(_, e)| **e == event);
        let (pos, _) = found.next().expect("event recorded");
        assert!(found.next().is_none(), "{:?} recorded twice", event);
        pos
    };
    for (id, build) in graph.builds.iter() {
        let started = position(Event::Started(id));
        let producers: Vec<BuildId> = build
            .explicit_ins()
            .iter()
            .filter_map(|&input| graph.file(input).input)
            .collect();
        for producer in producers {
            assert!(
                position(Event::Finished(producer)) < started,
                "{:?} started before its input {:?} finished",
                id,
                producer
            );
        }
    }
    Ok(())
}

#[test]
fn random_graphs_run_in_dependency_order() -> anyhow::Result<()> {
    for seed in [1, 7, 42, 1234] {
        check_order(seed, 8)?;
    }
    Ok(())
}

#[test]
fn serial_run_in_dependency_order() -> anyhow::Result<()> {
    check_order(99, 1)
}

#[test]
fn shared_input_built_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let decls = [
        touch(&space, "base", &[]),
        touch(&space, "left", &["base"]),
        touch(&space, "right", &["base"]),
        touch(&space, "top", &["left", "right"]),
    ];
    let mut progress = Recorder::default();
    let ran = space.build_with(&decls, &["top"], Options::default(), &mut progress)?;
    assert_eq!(ran, 4);
    let started = progress
        .events
        .iter()
        .filter(|e| matches!(e, Event::Started(_)))
        .count();
    assert_eq!(started, 4);
    Ok(())
}
