use super::*;

fn reason(test_case: &TestCase) -> &TerminationReason {
    &test_case.reason
}

#[test]
fn use_after_free_on_one_side_of_a_fork() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::NONE),
        Op::Symbolic("x", 8),
        Op::Const("one", 1, 8),
        Op::Eq("c", "x", "one"),
        Op::Branch("c", 7),
        Op::Load("v", "p", 8),
        Op::Exit,
        Op::Free("p"),
        Op::Load("v", "p", 8),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 2);
    let errors = run.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        reason(errors[0]),
        &TerminationReason::Error(PathError::UseAfterFree)
    );
    assert_eq!(input(errors[0], "x"), 1);

    // The sibling forked before the free still reads its object.
    assert_eq!(run.toy.exits.len(), 1);
    let exited = run.toy.exits[0].0;
    assert_eq!(
        run.toy.exit(exited)["v"].get_constant().unwrap().value(),
        0
    );
}

#[test]
fn use_after_free_on_both_sides_of_a_later_fork() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::NONE),
        Op::Free("p"),
        Op::Symbolic("x", 8),
        Op::Const("one", 1, 8),
        Op::Eq("c", "x", "one"),
        Op::Branch("c", 7),
        Op::Load("v", "p", 8),
        Op::Load("v", "p", 8),
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 2);
    assert!(run
        .test_cases
        .iter()
        .all(|test_case| test_case.reason == TerminationReason::Error(PathError::UseAfterFree)));
}

#[test]
fn double_free() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::NONE),
        Op::Free("p"),
        Op::Free("p"),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 1);
    assert_eq!(
        reason(&run.test_cases[0]),
        &TerminationReason::Error(PathError::DoubleFree)
    );
}

#[test]
fn free_of_an_interior_pointer() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::NONE),
        Op::Const("one", 1, 64),
        Op::Add("q", "p", "one"),
        Op::Free("q"),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 1);
    assert_eq!(
        reason(&run.test_cases[0]),
        &TerminationReason::Error(PathError::InvalidFree)
    );
}

#[test]
fn free_of_a_symbolic_pointer_forks_per_object() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::NONE),
        Op::Malloc("q", 4, ObjectFlags::NONE),
        Op::Symbolic("s", 1),
        Op::Ite("r", "s", "p", "q"),
        Op::Free("r"),
        Op::Load("v", "p", 8),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 2);
    let errors = run.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        reason(errors[0]),
        &TerminationReason::Error(PathError::UseAfterFree)
    );
    assert_eq!(input(errors[0], "s"), 1);
    assert_eq!(run.toy.exits.len(), 1);
}

fn copy_on_write_program() -> Vec<Op> {
    // The sibling takes the fall-through side and runs first depth-first.
    vec![
        Op::Malloc("p", 1, ObjectFlags::NONE),
        Op::Symbolic("x", 8),
        Op::Const("one", 1, 8),
        Op::Eq("c", "x", "one"),
        Op::Branch("c", 9),
        Op::Const("val", 9, 8),
        Op::Store("p", "val"),
        Op::Load("v", "p", 8),
        Op::Exit,
        Op::Load("v", "p", 8),
        Op::Exit,
    ]
}

#[test]
fn writes_after_a_fork_are_private() {
    for use_copy_on_write in [true, false] {
        let config = Config {
            use_copy_on_write,
            ..config()
        };
        let run = run(config, copy_on_write_program());

        assert_eq!(run.toy.exits.len(), 2);
        let (writer, _) = &run.toy.exits[0];
        let (reader, _) = &run.toy.exits[1];
        let value = |id| {
            run.toy.exit(id)["v"]
                .get_constant()
                .map(|constant| constant.value())
        };
        assert_eq!(value(*writer), Some(9));
        assert_eq!(value(*reader), Some(0));
    }
}

#[test]
fn symbolic_index_out_of_bounds() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::NONE),
        Op::Symbolic("i", 8),
        Op::Zext("j", "i", 64),
        Op::Add("q", "p", "j"),
        Op::Load("v", "q", 8),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 2);
    let errors = run.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        reason(errors[0]),
        &TerminationReason::Error(PathError::OutOfBounds)
    );
    assert!(input(errors[0], "i") >= 4);
    assert!(errors[0].complete);

    let exited = run.toy.exits[0].0;
    let in_bounds = run
        .test_cases
        .iter()
        .find(|test_case| test_case.path == exited)
        .unwrap();
    assert!(input(in_bounds, "i") < 4);
}

#[test]
fn writes_to_read_only_objects_fail() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::READ_ONLY),
        Op::Load("v", "p", 32),
        Op::Store("p", "v"),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 1);
    assert_eq!(
        reason(&run.test_cases[0]),
        &TerminationReason::Error(PathError::ReadOnly)
    );
}

#[test]
fn partial_byte_accesses_fail_only_their_path() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::NONE),
        Op::Symbolic("x", 8),
        Op::Const("one", 1, 8),
        Op::Eq("c", "x", "one"),
        Op::Branch("c", 7),
        Op::Load("v", "p", 16),
        Op::Exit,
        Op::Load("v", "p", 12),
        Op::Exit,
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 2);
    let errors = run.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        reason(errors[0]),
        &TerminationReason::Error(PathError::InvalidWidth(12))
    );
    assert_eq!(input(errors[0], "x"), 1);
    assert_eq!(run.toy.exits.len(), 1);
}

#[test]
fn symbolic_buffers_appear_in_test_cases() {
    let program = vec![
        Op::Malloc("p", 4, ObjectFlags::NONE),
        Op::MakeSymbolic("p", "buf"),
        Op::Load("v", "p", 8),
        Op::Const("a", 0x41, 8),
        Op::Eq("c", "v", "a"),
        Op::Branch("c", 7),
        Op::Exit,
        Op::Fail("found the magic byte"),
    ];
    let run = run(config(), program);

    assert_eq!(run.test_cases.len(), 2);
    let errors = run.errors();
    assert_eq!(errors.len(), 1);
    let buf = errors[0].inputs.array("buf").unwrap();
    assert_eq!(buf.len(), 4);
    assert_eq!(buf[0], 0x41);
}
