use crate::helper::*;

use canopy_prolog::*;
use maplit::btreemap;

#[test]
fn unification_binds_both_sides() {
    let mut machine = MachineBuilder::new().build().unwrap();

    assert_eq!(
        solutions(&mut machine, "foo(X, 2) = foo(1, Y)."),
        [LeafAnswer::from_bindings(btreemap! {
            "X" => Term::integer(1),
            "Y" => Term::integer(2),
        })]
    );
}

#[test]
fn member_gives_three_answers() {
    let mut machine = MachineBuilder::new().build().unwrap();
    let answers: Vec<_> = machine.run_query("member(X, [1, 2, 3]).").collect();

    assert_eq!(
        answers,
        [
            Ok(LeafAnswer::from_bindings([("X", Term::integer(1))])),
            Ok(LeafAnswer::from_bindings([("X", Term::integer(2))])),
            Ok(LeafAnswer::from_bindings([("X", Term::integer(3))])),
            Ok(LeafAnswer::False),
        ]
    );
}

#[test]
fn cut_commits_to_the_first_matching_clause() {
    let mut machine = machine_with(
        r#"
        classify(X, small) :- X < 10, !.
        classify(X, medium) :- X < 100, !.
        classify(_, large).
        "#,
    );

    assert_eq!(
        solutions(&mut machine, "classify(5, C)."),
        [LeafAnswer::from_bindings([("C", Term::atom("small"))])]
    );
    assert_eq!(
        solutions(&mut machine, "classify(50, C)."),
        [LeafAnswer::from_bindings([("C", Term::atom("medium"))])]
    );
    assert_eq!(
        solutions(&mut machine, "classify(500, C)."),
        [LeafAnswer::from_bindings([("C", Term::atom("large"))])]
    );
}

// the recursive call is not last, so every level keeps an environment.
const DEEP_APPEND: &str = r#"
    app([], Ys, Ys).
    app([X|Xs], Ys, [X|Zs]) :- app(Xs, Ys, Zs), true.
"#;

const LONG_APPEND: &str = "numlist(1, 10000, A), numlist(10001, 20000, B), app(A, B, C), length(C, N), last(C, L).";

#[test]
fn deep_recursion_fits_an_ample_stack() {
    let mut machine = builder_with(MachineBuilder::new().with_stack_size(8192), DEEP_APPEND);
    let answers = solutions(&mut machine, LONG_APPEND);

    match &answers[..] {
        [LeafAnswer::LeafAnswer { bindings, .. }] => {
            assert_eq!(bindings["N"], Term::integer(20000));
            assert_eq!(bindings["L"], Term::integer(20000));
        }
        answers => panic!("unexpected answers {:?}", answers),
    }
}

#[test]
fn deep_recursion_exhausts_a_small_stack() {
    let mut machine = builder_with(
        MachineBuilder::new().with_stack_size(128).with_max_stack_size(128),
        DEEP_APPEND,
    );

    assert_eq!(
        error_of(&mut machine, LONG_APPEND),
        Term::compound("resource_error", [Term::atom("stack")])
    );

    // the machine is usable after the overflow.
    assert_eq!(
        solutions(&mut machine, "app([1], [2], L)."),
        [LeafAnswer::from_bindings([("L", Term::list([Term::integer(1), Term::integer(2)]))])]
    );
}

#[test]
fn tabled_closure_of_a_cyclic_graph() {
    let mut machine = machine_with(
        r#"
        :- table path/2.
        edge(a, b). edge(b, c). edge(c, a). edge(c, d).
        path(X, Y) :- path(X, Z), edge(Z, Y).
        path(X, Y) :- edge(X, Y).
        "#,
    );

    let reached = solution_set(&mut machine, "path(a, Y).");
    let expected = ["a", "b", "c", "d"]
        .iter()
        .map(|node| format!("{:?}", LeafAnswer::from_bindings([("Y", Term::atom(*node))])))
        .collect();

    assert_eq!(reached, expected);
    assert_eq!(solutions(&mut machine, "path(d, _).").len(), 0);
}

#[test]
fn caught_errors_carry_their_context() {
    let mut machine = MachineBuilder::new().build().unwrap();

    assert_eq!(
        solutions(&mut machine, "catch(X is foo + 1, error(E, _), true)."),
        [LeafAnswer::from_bindings([(
            "E",
            Term::compound("type_error", [Term::atom("evaluable"), Term::compound("/", [Term::atom("foo"), Term::integer(0)])])
        )])]
    );
}
