use super::*;
use crate::config::SolverBackendKind;
use crate::searcher::WeightType;

/// Exits with `r` = 1 if `x == 10`, else `r` = 0.
fn equals_ten() -> Vec<Op> {
    vec![
        Op::Symbolic("x", 32),
        Op::Const("ten", 10, 32),
        Op::Eq("c", "x", "ten"),
        Op::Branch("c", 6),
        Op::Const("r", 0, 8),
        Op::Exit,
        Op::Const("r", 1, 8),
        Op::Exit,
    ]
}

fn check_equals_ten(run: &Run) {
    assert_eq!(run.test_cases.len(), 2);
    assert!(run.test_cases.iter().all(|test_case| test_case.complete));
    assert!(run.errors().is_empty());

    assert_eq!(input(run.exited_with("r", 1), "x"), 10);
    assert_ne!(input(run.exited_with("r", 0), "x"), 10);

    assert_eq!(run.summary.statistics.forks, 1);
    assert_eq!(run.summary.statistics.paths_completed, 2);
    assert_eq!(run.summary.statistics.test_cases, 2);
    assert_eq!(run.summary.exhausted, None);
}

#[test]
fn branch_on_symbolic_input_explores_both_sides() {
    let run = run(config(), equals_ten());
    check_equals_ten(&run);
    assert_eq!(run.executor.instruction_count(3), 1);
    assert_eq!(run.executor.instruction_count(5), 1);
    assert_eq!(run.executor.instruction_count(7), 1);
    assert_eq!(run.executor.live_states(), 0);
}

#[test]
fn every_search_strategy_finds_both_paths() {
    let strategies = vec![
        SearchStrategy::Dfs,
        SearchStrategy::Bfs,
        SearchStrategy::RandomState,
        SearchStrategy::WeightedRandom(WeightType::Depth),
        SearchStrategy::WeightedRandom(WeightType::QueryCost),
        SearchStrategy::WeightedRandom(WeightType::CoveringNew),
        SearchStrategy::Interleaved(vec![SearchStrategy::Dfs, SearchStrategy::Bfs]),
        SearchStrategy::Mixed(vec![(SearchStrategy::Dfs, 1.0), (SearchStrategy::Bfs, 3.0)]),
        SearchStrategy::IterativeDeepening(Box::new(SearchStrategy::Dfs)),
    ];
    for search_strategy in strategies {
        let config = Config {
            search_strategy,
            ..config()
        };
        check_equals_ten(&run(config, equals_ten()));
    }
}

#[test]
fn solver_stack_options_do_not_change_results() {
    let configs = vec![
        Config {
            use_validity_cache: false,
            use_cex_cache: false,
            use_independence: false,
            ..config()
        },
        Config {
            crosscheck_backend: Some(SolverBackendKind::Bitblast),
            ..config()
        },
        Config {
            use_copy_on_write: false,
            ..config()
        },
    ];
    for config in configs {
        check_equals_ten(&run(config, equals_ten()));
    }
}

#[test]
fn infeasible_branch_sides_are_not_forked() {
    let program = vec![
        Op::Symbolic("x", 32),
        Op::Const("five", 5, 32),
        Op::Ult("small", "x", "five"),
        Op::Assume("small"),
        Op::Const("ten", 10, 32),
        Op::Eq("c", "x", "ten"),
        Op::Branch("c", 8),
        Op::Exit,
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.summary.statistics.forks, 0);
    assert_eq!(run.test_cases.len(), 1);
    assert!(input(&run.test_cases[0], "x") < 5);
    assert_eq!(run.executor.instruction_count(7), 1);
    assert_eq!(run.executor.instruction_count(8), 0);
}

#[test]
fn infeasible_assumption_ends_path() {
    let program = vec![
        Op::Symbolic("x", 8),
        Op::Const("zero", 0, 8),
        Op::Ult("never", "x", "zero"),
        Op::Assume("never"),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 1);
    assert_eq!(
        run.test_cases[0].reason,
        TerminationReason::Error(PathError::InvalidAssume)
    );
    assert!(run.toy.exits.is_empty());
}

#[test]
fn failing_assertion_becomes_error_test_case() {
    let program = vec![
        Op::Symbolic("d", 8),
        Op::Const("zero", 0, 8),
        Op::Ne("nonzero", "d", "zero"),
        Op::Assert("nonzero", PathError::DivideByZero),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 2);
    let errors = run.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].reason,
        TerminationReason::Error(PathError::DivideByZero)
    );
    assert_eq!(input(errors[0], "d"), 0);
    assert_eq!(run.summary.statistics.path_errors, 1);

    let exited = run.toy.exits[0].0;
    let passing = run
        .test_cases
        .iter()
        .find(|test_case| test_case.path == exited)
        .unwrap();
    assert_ne!(input(passing, "d"), 0);
}

#[test]
fn max_states_suppresses_forks() {
    let config = Config {
        max_states: Some(1),
        ..config()
    };
    let run = run(config, equals_ten());

    assert_eq!(run.summary.statistics.forks, 0);
    assert_eq!(run.summary.statistics.suppressed_forks, 1);
    assert_eq!(run.test_cases.len(), 1);
    assert_eq!(run.toy.exits.len(), 1);
}

#[test]
fn emit_on_error_only_skips_passing_paths() {
    let config = Config {
        emit_on_error_only: true,
        ..config()
    };
    let program = vec![
        Op::Symbolic("x", 8),
        Op::Const("one", 1, 8),
        Op::Eq("c", "x", "one"),
        Op::Branch("c", 5),
        Op::Exit,
        Op::Fail("x is one"),
    ];
    let run = run(config, program);

    assert_eq!(run.test_cases.len(), 1);
    assert_eq!(
        run.test_cases[0].reason,
        TerminationReason::Error(PathError::Assertion("x is one".to_string()))
    );
    assert_eq!(input(&run.test_cases[0], "x"), 1);
    assert_eq!(run.summary.statistics.paths_completed, 2);
}
