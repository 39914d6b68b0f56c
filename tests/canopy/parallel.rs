use crate::helper::*;

use canopy_prolog::*;
use serial_test::serial;

const QUEENS: &str = r#"
queens(N, Qs) :-
    numlist(1, N, Ns),
    perm(Ns, Qs),
    safe(Qs).

perm([], []).
perm(Xs, [X|Ys]) :-
    select(X, Xs, Rest),
    perm(Rest, Ys).

select(X, [X|Xs], Xs).
select(X, [Y|Ys], [Y|Zs]) :- select(X, Ys, Zs).

safe([]).
safe([Q|Qs]) :- no_attack(Q, Qs, 1), safe(Qs).

no_attack(_, [], _).
no_attack(Q, [Q1|Qs], D) :-
    Q =\= Q1 + D,
    Q =\= Q1 - D,
    D1 is D + 1,
    no_attack(Q, Qs, D1).
"#;

const GRAPH: &str = r#"
:- table path/2.

path(X, Y) :- path(X, Z), edge(Z, Y).
path(X, Y) :- edge(X, Y).

edge(a, b).
edge(b, c).
edge(c, a).
edge(c, d).
"#;

fn queens_with(workers: usize) -> Machine {
    builder_with(MachineBuilder::new().with_workers(workers).with_scheduler_loop(1), QUEENS)
}

#[test]
#[serial]
fn worker_count_does_not_change_the_solutions() {
    let sequential = solution_set(&mut queens_with(1), "queens(6, Qs).");

    assert_eq!(sequential.len(), 4);

    for workers in [2, 4] {
        let parallel = solution_set(&mut queens_with(workers), "queens(6, Qs).");
        assert_eq!(parallel, sequential, "{} workers", workers);
    }
}

#[test]
#[serial]
fn parallel_queries_end_in_failure() {
    let mut machine = queens_with(2);
    let answers: Vec<_> = machine.run_query("queens(6, Qs).").collect();

    assert_eq!(answers.len(), 5);
    assert_eq!(answers.last(), Some(&Ok(LeafAnswer::False)));
}

#[test]
#[serial]
fn tabled_queries_under_several_workers() {
    let mut sequential = machine_with(GRAPH);
    let mut parallel = builder_with(MachineBuilder::new().with_workers(2), GRAPH);

    let expected = solution_set(&mut sequential, "path(a, Y).");

    assert_eq!(expected.len(), 4);
    assert_eq!(solution_set(&mut parallel, "path(a, Y)."), expected);
}

#[test]
#[serial]
fn first_answers_of_infinite_generators() {
    let mut machine = builder_with(
        MachineBuilder::new().with_workers(2).with_scheduler_loop(1),
        "nat(0).\nnat(N) :- nat(M), N is M + 1.\n",
    );

    let first = machine.run_query("nat(X).").next();
    assert!(matches!(first, Some(Ok(LeafAnswer::LeafAnswer { .. }))));

    let answers: Vec<_> = machine.run_query("nat(X), X >= 5.").take(2).collect();
    assert_eq!(answers.len(), 2);
}
