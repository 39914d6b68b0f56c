use canopy_prolog::*;
use criterion::{criterion_group, criterion_main, Criterion};

const NREV: &str = r#"
app([], L, L).
app([H|T], L, [H|R]) :- app(T, L, R).

nrev([], []).
nrev([H|T], R) :- nrev(T, RT), app(RT, [H], R).

bench_nrev :- numlist(1, 400, L), nrev(L, _).
"#;

const PATH: &str = r#"
:- table path/2.

path(X, Y) :- path(X, Z), edge(Z, Y).
path(X, Y) :- edge(X, Y).

edge(X, Y) :- between(1, 60, X), Y is X mod 60 + 1.
"#;

const QUEENS: &str = r#"
queens(N, Qs) :- numlist(1, N, Ns), perm(Ns, Qs), safe(Qs).

perm([], []).
perm(Xs, [X|Ys]) :- select(X, Xs, Rest), perm(Rest, Ys).

select(X, [X|Xs], Xs).
select(X, [Y|Ys], [Y|Zs]) :- select(X, Ys, Zs).

safe([]).
safe([Q|Qs]) :- no_attack(Q, Qs, 1), safe(Qs).

no_attack(_, [], _).
no_attack(Q, [Q1|Qs], D) :-
    Q =\= Q1 + D, Q =\= Q1 - D,
    D1 is D + 1,
    no_attack(Q, Qs, D1).
"#;

fn machine(builder: MachineBuilder, program: &str) -> Machine {
    let mut machine = builder.build().unwrap();
    machine.consult_module_string("bench", program).unwrap();
    machine
}

fn count(machine: &mut Machine, query: &str) -> usize {
    machine
        .run_query(query)
        .filter(|answer| matches!(answer, Ok(answer) if answer.maybe_succeeded()))
        .count()
}

fn bench_criterion(c: &mut Criterion) {
    let mut nrev = machine(MachineBuilder::new(), NREV);
    c.bench_function("nrev400", |b| b.iter(|| count(&mut nrev, "bench_nrev.")));

    let mut path = machine(MachineBuilder::new(), PATH);
    c.bench_function("tabled_path", |b| {
        b.iter(|| count(&mut path, "abolish_all_tables, path(1, Y)."))
    });

    for workers in [1, 4] {
        let mut queens = machine(MachineBuilder::new().with_workers(workers), QUEENS);
        c.bench_function(&format!("queens7_{}w", workers), |b| {
            b.iter(|| count(&mut queens, "queens(7, Qs)."))
        });
    }
}

criterion_group!(
    name = bench_group;
    config = Criterion::default().sample_size(10);
    targets = bench_criterion
);
criterion_main!(bench_group);
