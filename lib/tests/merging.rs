use super::*;

/// Stores 5 to `p` if `x == 1`, else 7, inside a merge region, and reads it
/// back after the region closes.
fn five_or_seven() -> Vec<Op> {
    vec![
        Op::Malloc("p", 1, ObjectFlags::NONE),
        Op::Symbolic("x", 8),
        Op::MergeOpen,
        Op::Const("one", 1, 8),
        Op::Eq("c", "x", "one"),
        Op::Branch("c", 9),
        Op::Const("val", 7, 8),
        Op::Store("p", "val"),
        Op::Jump(11),
        Op::Const("val", 5, 8),
        Op::Store("p", "val"),
        Op::MergeClose,
        Op::Load("v", "p", 8),
        Op::Exit,
    ]
}

#[test]
fn merge_region_joins_both_sides() {
    let config = Config {
        merge_enabled: true,
        ..config()
    };
    for search_strategy in [SearchStrategy::Dfs, SearchStrategy::Bfs] {
        let run = run(
            Config {
                search_strategy,
                ..config.clone()
            },
            five_or_seven(),
        );

        assert_eq!(run.summary.statistics.forks, 1);
        assert_eq!(run.summary.statistics.merges, 1);
        assert_eq!(run.test_cases.len(), 1);
        assert_eq!(run.toy.exits.len(), 1);

        let (id, locals) = &run.toy.exits[0];
        let v = &locals["v"];
        assert_eq!(evaluate_with(v, "x", 1, 8), 5);
        assert_eq!(evaluate_with(v, "x", 0, 8), 7);
        assert_eq!(evaluate_with(v, "x", 200, 8), 7);
        assert_eq!(evaluate_with(&locals["val"], "x", 1, 8), 5);

        let test_case = &run.test_cases[0];
        assert_eq!(test_case.path, *id);
        assert!(test_case.complete);
    }
}

#[test]
fn without_merging_both_sides_exit() {
    let run = run(config(), five_or_seven());

    assert_eq!(run.summary.statistics.merges, 0);
    assert_eq!(run.toy.exits.len(), 2);
    assert_eq!(run.exited_with("v", 5).inputs.scalar("x").unwrap().value(), 1);
    assert_ne!(run.exited_with("v", 7).inputs.scalar("x").unwrap().value(), 1);
}

#[test]
fn close_without_open_is_ignored() {
    let config = Config {
        merge_enabled: true,
        ..config()
    };
    let program = vec![Op::Const("r", 3, 8), Op::MergeClose, Op::Exit];
    let run = run(config, program);

    assert_eq!(run.summary.statistics.malformed_merges, 1);
    assert_eq!(run.toy.exits.len(), 1);
    assert_eq!(run.test_cases[0].reason, TerminationReason::Exit);
}

#[test]
fn terminated_members_release_the_region() {
    let config = Config {
        merge_enabled: true,
        ..config()
    };
    // One side fails inside the region; the other must not wait on it.
    let program = vec![
        Op::Symbolic("x", 8),
        Op::MergeOpen,
        Op::Const("one", 1, 8),
        Op::Eq("c", "x", "one"),
        Op::Branch("c", 6),
        Op::Jump(7),
        Op::Fail("x is one"),
        Op::MergeClose,
        Op::Exit,
    ];
    let run = run(config, program);

    assert_eq!(run.summary.statistics.merges, 0);
    assert_eq!(run.test_cases.len(), 2);
    assert_eq!(run.errors().len(), 1);
    assert_eq!(run.toy.exits.len(), 1);
    assert_eq!(run.executor.live_states(), 0);
}

#[test]
fn nested_regions_close_at_the_outermost() {
    let config = Config {
        merge_enabled: true,
        ..config()
    };
    let program = vec![
        Op::Symbolic("x", 8),
        Op::MergeOpen,
        Op::Const("one", 1, 8),
        Op::Eq("c", "x", "one"),
        Op::MergeOpen,
        Op::Branch("c", 8),
        Op::Const("r", 2, 8),
        Op::Jump(9),
        Op::Const("r", 4, 8),
        Op::MergeClose,
        Op::MergeClose,
        Op::Exit,
    ];
    let run = run(config, program);

    assert_eq!(run.summary.statistics.merges, 1);
    assert_eq!(run.summary.statistics.malformed_merges, 0);
    assert_eq!(run.toy.exits.len(), 1);
    let r = &run.toy.exits[0].1["r"];
    assert_eq!(evaluate_with(r, "x", 1, 8), 4);
    assert_eq!(evaluate_with(r, "x", 3, 8), 2);
}
