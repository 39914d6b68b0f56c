use super::*;
use crate::MachineBuilder;

fn machine_with(program: &str) -> Machine {
    let mut machine = MachineBuilder::default().build().unwrap();
    machine.consult_module_string("facts", program).unwrap();
    machine
}

#[test]
fn programatic_query() {
    let mut machine = machine_with(
        r#"
        triple(a, p1, b).
        triple(a, p2, b).
        "#,
    );

    let complete_answer: Vec<_> = machine.run_query("triple(a,P,b).").collect::<Result<_, _>>().unwrap();

    assert_eq!(
        complete_answer,
        [
            LeafAnswer::from_bindings([("P", Term::atom("p1"))]),
            LeafAnswer::from_bindings([("P", Term::atom("p2"))]),
        ],
    );

    let complete_answer: Vec<_> = machine.run_query("triple(a,p1,b).").collect::<Result<_, _>>().unwrap();

    assert_eq!(complete_answer, [LeafAnswer::True]);

    let complete_answer: Vec<_> = machine.run_query("triple(x,y,z).").collect::<Result<_, _>>().unwrap();

    assert_eq!(complete_answer, [LeafAnswer::False]);
}

#[test]
fn ground_queries_are_answered_once() {
    let mut machine = MachineBuilder::default().build().unwrap();
    let answers: Vec<_> = machine.run_query("member(a, [a, b, a]).").collect::<Result<_, _>>().unwrap();

    assert_eq!(answers, [LeafAnswer::True]);
    assert_eq!(machine.machine_st.b(), 0);
}

#[test]
fn failing_query() {
    let mut machine = MachineBuilder::default().build().unwrap();
    let complete_answer: Result<Vec<_>, _> = machine.run_query("triple(a,P,b).").collect();

    assert_eq!(
        complete_answer,
        Err(Term::compound(
            "error",
            [
                Term::compound(
                    "existence_error",
                    [
                        Term::atom("procedure"),
                        Term::compound("/", [Term::atom("triple"), Term::integer(3)]),
                    ]
                ),
                Term::compound("/", [Term::atom("triple"), Term::integer(3)]),
            ],
        ))
    );
}

#[test]
fn unification_binds_both_sides() {
    let mut machine = MachineBuilder::default().build().unwrap();
    let answers: Vec<_> = machine.run_query("foo(X, 2) = foo(1, Y).").collect::<Result<_, _>>().unwrap();

    assert_eq!(
        answers,
        [LeafAnswer::from_bindings([("X", Term::integer(1)), ("Y", Term::integer(2))])]
    );
}

#[test]
fn member_enumerates_and_leaves_no_choice_points() {
    let mut machine = MachineBuilder::default().build().unwrap();
    let mut answers = machine.run_query("member(X, [1,2,3]).");

    for n in 1..=3 {
        assert_eq!(
            answers.next(),
            Some(Ok(LeafAnswer::from_bindings([("X", Term::integer(n))])))
        );
    }

    assert_eq!(answers.next(), Some(Ok(LeafAnswer::False)));
    assert_eq!(answers.next(), None);
    assert_eq!(answers.machine.machine_st.b(), 0);
}

#[test]
fn cut_commits_to_the_first_matching_clause() {
    let mut machine = machine_with(
        r#"
        max(X, Y, X) :- X >= Y, !.
        max(_, Y, Y).
        "#,
    );

    let answers: Vec<_> = machine.run_query("max(3, 1, M).").collect::<Result<_, _>>().unwrap();

    assert_eq!(answers, [LeafAnswer::from_bindings([("M", Term::integer(3))])]);
}

#[test]
fn aliased_and_fresh_variables_are_named() {
    let mut machine = MachineBuilder::default().build().unwrap();

    let answers: Vec<_> = machine.run_query("X = Y.").collect::<Result<_, _>>().unwrap();
    assert_eq!(answers, [LeafAnswer::from_bindings([("Y", Term::variable("X"))])]);

    let answers: Vec<_> = machine.run_query("X = f(_, Y, _Z).").collect::<Result<_, _>>().unwrap();
    assert_eq!(
        answers,
        [LeafAnswer::from_bindings([(
            "X",
            Term::compound("f", [Term::variable("_A"), Term::variable("Y"), Term::variable("_Z")])
        )])]
    );
}

#[test]
fn lists_and_numbers_read_back() {
    let mut machine = MachineBuilder::default().build().unwrap();

    let answers: Vec<_> = machine
        .run_query("L = [1, 2.5, a|T], E = [].")
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(
        answers,
        [LeafAnswer::from_bindings([
            (
                "L",
                Term::compound(
                    ".",
                    [
                        Term::integer(1),
                        Term::compound(
                            ".",
                            [Term::float(2.5), Term::compound(".", [Term::atom("a"), Term::variable("T")])]
                        ),
                    ]
                )
            ),
            ("E", Term::list([])),
        ])]
    );
}

#[test]
fn cyclic_answers_are_elided() {
    let mut machine = MachineBuilder::default().build().unwrap();
    let answers: Vec<_> = machine.run_query("X = f(X).").collect::<Result<_, _>>().unwrap();

    assert_eq!(
        answers,
        [LeafAnswer::from_bindings([("X", Term::compound("f", [Term::atom("...")]))])]
    );
}

#[test]
fn thrown_terms_are_exception_answers() {
    let mut machine = MachineBuilder::default().build().unwrap();
    let answers: Vec<_> = machine.run_query("throw(ball).").collect();

    assert_eq!(answers, [Ok(LeafAnswer::Exception(Term::atom("ball")))]);
}

#[test]
fn syntax_errors_are_reported() {
    let mut machine = MachineBuilder::default().build().unwrap();
    let answers: Vec<_> = machine.run_query("foo(.").collect();

    assert_eq!(answers.len(), 1);
    assert!(matches!(&answers[0], Err(Term::Compound(name, _)) if name == "error"));
}

#[test]
fn consulting_again_replaces_predicates() {
    let mut machine = machine_with("p(1).");
    machine.consult_module_string("facts", "p(2).").unwrap();

    let answers: Vec<_> = machine.run_query("p(X).").collect::<Result<_, _>>().unwrap();

    assert_eq!(answers, [LeafAnswer::from_bindings([("X", Term::integer(2))])]);
}

#[test]
fn directives_run_while_consulting() {
    let mut machine = machine_with(":- assertz(seen(yes)).");
    let answers: Vec<_> = machine.run_query("seen(X).").collect::<Result<_, _>>().unwrap();

    assert_eq!(answers, [LeafAnswer::from_bindings([("X", Term::atom("yes"))])]);
}

#[test]
fn halt_ends_the_answers() {
    let mut machine = MachineBuilder::default().build().unwrap();
    let answers: Vec<_> = machine.run_query("halt(3).").collect();

    assert!(answers.is_empty());
    assert_eq!(machine.halted(), Some(3));
}

#[test]
fn conjunctions_nest_to_the_right() {
    assert_eq!(
        Term::conjunction([Term::atom("a"), Term::atom("b"), Term::atom("c")]),
        Term::compound(",", [Term::atom("a"), Term::compound(",", [Term::atom("b"), Term::atom("c")])])
    );
    assert_eq!(Term::conjunction([]), Term::atom("true"));
}

#[test]
fn fresh_names_skip_query_names() {
    assert_eq!(count_to_letter_code(0), "_A");
    assert_eq!(count_to_letter_code(27), "_BB");

    let mut namer = VarNamer::new(&[("_A".to_string(), 0)]);
    assert_eq!(namer.name_of(7), "_B");
    assert_eq!(namer.name_of(7), "_B");
}
