use std::collections::{BTreeMap, VecDeque};

use crate::machine::dispatch::RunOutcome;
use crate::machine::heap::*;
use crate::machine::loader::LoadMode;
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::*;
use crate::machine::parallel::ParallelRun;
use crate::parser::ast::{self, Constant};
use crate::parser::read_single_term;

use fxhash::{FxBuildHasher, FxHashSet};
use indexmap::IndexMap;

use super::Machine;

#[cfg(test)]
mod tests;

/// Represents a leaf answer from a query.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafAnswer {
    /// A `true` leaf answer.
    True,
    /// A `false` leaf answer.
    ///
    /// This means that there are no more answers for the query.
    False,
    /// An exception leaf answer.
    Exception(Term),
    /// A leaf answer with bindings.
    #[non_exhaustive]
    LeafAnswer {
        /// The bindings of variables in the query.
        bindings: BTreeMap<String, Term>,
    },
}

impl LeafAnswer {
    /// Creates a leaf answer from its bindings.
    pub fn from_bindings<S: Into<String>>(bindings: impl IntoIterator<Item = (S, Term)>) -> Self {
        LeafAnswer::LeafAnswer {
            bindings: bindings.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// True if this is the final `false` answer.
    pub fn failed(&self) -> bool {
        matches!(self, LeafAnswer::False)
    }

    /// True if the query succeeded with this answer.
    pub fn maybe_succeeded(&self) -> bool {
        matches!(self, LeafAnswer::True | LeafAnswer::LeafAnswer { .. })
    }
}

/// Represents a Prolog term.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// An integer.
    Integer(i64),
    /// A float.
    Float(f64),
    /// A Prolog atom.
    Atom(String),
    /// A proper Prolog list. `[]` is the empty list.
    List(Vec<Term>),
    /// A Prolog compound term. Partial lists are `'.'/2` compounds.
    Compound(String, Vec<Term>),
    /// A Prolog variable.
    Var(String),
}

impl Term {
    /// Creates an integer term.
    pub fn integer(value: impl Into<i64>) -> Self {
        Term::Integer(value.into())
    }

    /// Creates a float term.
    pub fn float(value: impl Into<f64>) -> Self {
        Term::Float(value.into())
    }

    /// Creates an atom term.
    pub fn atom(value: impl Into<String>) -> Self {
        Term::Atom(value.into())
    }

    /// Creates a list term.
    pub fn list(value: impl IntoIterator<Item = Term>) -> Self {
        Term::List(value.into_iter().collect())
    }

    /// Creates a compound term.
    pub fn compound(functor: impl Into<String>, args: impl IntoIterator<Item = Term>) -> Self {
        Term::Compound(functor.into(), args.into_iter().collect())
    }

    /// Creates a variable.
    pub fn variable(value: impl Into<String>) -> Self {
        Term::Var(value.into())
    }

    /// Creates a conjunction, giving the atom `true` if empty.
    pub fn conjunction(value: impl IntoIterator<Item = Term>) -> Self {
        let mut goals: Vec<Term> = value.into_iter().collect();

        match goals.pop() {
            Some(last) => goals
                .into_iter()
                .rev()
                .fold(last, |rest, goal| Term::compound(",", [goal, rest])),
            None => Term::atom("true"),
        }
    }
}

/// Turns a count into the names of fresh variables: `_A`, `_B`, ..,
/// `_BA`, ..
fn count_to_letter_code(mut count: usize) -> String {
    let mut letters = vec![];

    loop {
        letters.push((b'A' + (count % 26) as u8) as char);
        count /= 26;

        if count == 0 {
            break;
        }
    }

    letters.into_iter().chain("_".chars()).rev().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CompoundLoc {
    Lis(usize),
    Str(usize),
}

enum BuildTask {
    Visit(Addr),
    Compound(String, usize, CompoundLoc),
    // elements, a tail to visit, and the spine cells to release.
    List(usize, bool, Vec<usize>),
}

/// Names unbound variables while answers are read off the heap. Query
/// variables keep their names; other variables get fresh names that
/// no query variable uses.
pub(crate) struct VarNamer {
    names: IndexMap<usize, String, FxBuildHasher>,
    taken: FxHashSet<String>,
    fresh: usize,
}

impl VarNamer {
    pub(crate) fn new(query_vars: &[(String, usize)]) -> Self {
        VarNamer {
            names: IndexMap::with_hasher(FxBuildHasher::default()),
            taken: query_vars.iter().map(|(name, _)| name.clone()).collect(),
            fresh: 0,
        }
    }

    fn name_of(&mut self, h: usize) -> String {
        if let Some(name) = self.names.get(&h) {
            return name.clone();
        }

        let name = loop {
            let candidate = count_to_letter_code(self.fresh);
            self.fresh += 1;

            if !self.taken.contains(&candidate) {
                break candidate;
            }
        };

        self.names.insert(h, name.clone());
        name
    }
}

impl Term {
    /// Reads the term at `addr` off `heap`. Cycles print as `...`.
    pub(crate) fn from_heap(heap: &[HeapCellValue], addr: Addr, namer: &mut VarNamer) -> Self {
        let mut tasks = vec![BuildTask::Visit(addr)];
        let mut on_path = FxHashSet::<CompoundLoc>::default();
        let mut terms: Vec<Term> = vec![];

        while let Some(task) = tasks.pop() {
            match task {
                BuildTask::Visit(addr) => match heap_bound_deref(heap, addr) {
                    Addr::HeapCell(h) => terms.push(Term::Var(namer.name_of(h))),
                    Addr::Con(c) => terms.push(Term::from_constant(c)),
                    Addr::Str(s) => {
                        let loc = CompoundLoc::Str(s);

                        let (arity, name) = match &heap[s] {
                            HeapCellValue::NamedStr(arity, name) => (*arity, name.as_str().to_string()),
                            HeapCellValue::Addr(_) => {
                                terms.push(Term::atom("..."));
                                continue;
                            }
                        };

                        if !on_path.insert(loc) {
                            terms.push(Term::atom("..."));
                            continue;
                        }

                        tasks.push(BuildTask::Compound(name, arity, loc));

                        for i in (1..=arity).rev() {
                            tasks.push(BuildTask::Visit(heap[s + i].as_addr(s + i)));
                        }
                    }
                    Addr::Lis(l) => {
                        let mut spine = vec![];
                        let mut elements = vec![];
                        let mut tail = Addr::Lis(l);

                        // walk the spine so long lists do not nest tasks.
                        while let Addr::Lis(l) = tail {
                            if on_path.contains(&CompoundLoc::Lis(l)) {
                                break;
                            }

                            on_path.insert(CompoundLoc::Lis(l));
                            spine.push(l);
                            elements.push(heap[l].as_addr(l));
                            tail = heap_bound_deref(heap, heap[l + 1].as_addr(l + 1));
                        }

                        let proper = tail == Addr::Con(Constant::EmptyList);

                        tasks.push(BuildTask::List(elements.len(), !proper, spine));

                        if !proper {
                            match tail {
                                Addr::Lis(_) => tasks.push(BuildTask::Visit(Addr::Con(Constant::Atom(atom!("..."))))),
                                tail => tasks.push(BuildTask::Visit(tail)),
                            }
                        }

                        for element in elements.into_iter().rev() {
                            tasks.push(BuildTask::Visit(element));
                        }
                    }
                },
                BuildTask::Compound(name, arity, loc) => {
                    on_path.remove(&loc);

                    let args = terms.split_off(terms.len() - arity);
                    terms.push(Term::Compound(name, args));
                }
                BuildTask::List(len, has_tail, spine) => {
                    for l in spine {
                        on_path.remove(&CompoundLoc::Lis(l));
                    }

                    let tail = if has_tail { terms.pop() } else { None };
                    let elements = terms.split_off(terms.len() - len);

                    terms.push(match tail {
                        None => Term::List(elements),
                        Some(tail) => elements
                            .into_iter()
                            .rev()
                            .fold(tail, |rest, head| Term::compound(".", [head, rest])),
                    });
                }
            }
        }

        terms.pop().unwrap_or_else(|| Term::atom("..."))
    }

    fn from_constant(c: Constant) -> Self {
        match c {
            Constant::Atom(atom) => Term::Atom(atom.as_str().to_string()),
            Constant::Fixnum(n) => Term::Integer(n),
            Constant::Float(f) => Term::Float(f.into_inner()),
            Constant::EmptyList => Term::List(vec![]),
            Constant::Usize(n) => Term::Integer(n as i64),
        }
    }

    fn is_error(&self) -> bool {
        matches!(self, Term::Compound(name, args) if name == "error" && args.len() == 2)
    }
}

impl Machine {
    /// The answer of the query whose variables live in `query_vars`,
    /// read while its bindings are in place.
    pub(crate) fn leaf_answer(&self, query_vars: &[(String, usize)]) -> LeafAnswer {
        let heap = self.machine_st.heap.as_slice();
        let mut namer = VarNamer::new(query_vars);
        let mut bindings = BTreeMap::new();

        // a variable bound to an older query variable takes its name.
        for (name, h) in query_vars {
            if let Addr::HeapCell(root) = heap_bound_deref(heap, Addr::HeapCell(*h)) {
                if !namer.names.contains_key(&root) {
                    namer.names.insert(root, name.clone());
                }
            }
        }

        for (name, h) in query_vars {
            if name.starts_with('_') {
                continue;
            }

            let term = Term::from_heap(heap, Addr::HeapCell(*h), &mut namer);

            if let Term::Var(ref var) = term {
                if var == name {
                    continue;
                }
            }

            bindings.insert(name.clone(), term);
        }

        if bindings.is_empty() {
            LeafAnswer::True
        } else {
            LeafAnswer::LeafAnswer { bindings }
        }
    }

    /// Reads an exception stub into an answer. `error(_, _)` terms are
    /// errors; other balls are exception answers.
    pub(crate) fn exception_answer(ball: &MachineStub) -> Result<LeafAnswer, Term> {
        let mut namer = VarNamer::new(&[]);
        let term = Term::from_heap(ball, Addr::HeapCell(0), &mut namer);

        if term.is_error() {
            Err(term)
        } else {
            Ok(LeafAnswer::Exception(term))
        }
    }
}

/// The answers of a query, computed lazily as the iterator is
/// advanced. Dropping it discards the query.
pub struct QueryState<'a> {
    machine: &'a mut Machine,
    query_vars: Vec<(String, usize)>,
    pending: VecDeque<Result<LeafAnswer, Term>>,
    parallel: Option<ParallelRun>,
    called: bool,
    done: bool,
}

impl Drop for QueryState<'_> {
    fn drop(&mut self) {
        if let Some(mut run) = self.parallel.take() {
            run.stop(self.machine);
        }

        self.machine.reset();
    }
}

impl Iterator for QueryState<'_> {
    type Item = Result<LeafAnswer, Term>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(answer) = self.pending.pop_front() {
            return Some(answer);
        }

        if let Some(run) = self.parallel.as_mut() {
            let answer = run.next_answer(self.machine);

            // a query without variables is answered once.
            if answer.is_none() || (self.query_vars.is_empty() && matches!(answer, Some(Ok(LeafAnswer::True)))) {
                if let Some(mut run) = self.parallel.take() {
                    run.stop(self.machine);
                }

                self.done = true;
            }

            return answer;
        }

        if self.done {
            return None;
        }

        let machine = &mut *self.machine;

        if self.called {
            // no choice point is left to give another answer.
            if machine.machine_st.b() == 0 {
                self.done = true;
                return None;
            }

            machine.machine_st.fail = true;
        }

        self.called = true;

        match machine.dispatch_loop() {
            RunOutcome::Success => {
                if machine.machine_st.b() == 0 || self.query_vars.is_empty() {
                    self.done = true;
                }

                Some(Ok(machine.leaf_answer(&self.query_vars)))
            }
            RunOutcome::Exhausted => {
                self.done = true;
                Some(Ok(LeafAnswer::False))
            }
            RunOutcome::Exception(ball) => {
                self.done = true;
                Some(Machine::exception_answer(&ball))
            }
            RunOutcome::Halt => {
                self.done = true;
                None
            }
        }
    }
}

fn syntax_error_term(message: &str) -> Term {
    Term::compound(
        "error",
        [
            Term::compound("syntax_error", [Term::atom(message)]),
            Term::variable("_"),
        ],
    )
}

impl Machine {
    /// Consults a program from a string. Its predicates replace those
    /// of the same name and arity; directives run as they are read.
    pub fn consult_module_string(
        &mut self,
        module_name: &str,
        program: impl Into<String>,
    ) -> Result<(), SessionError> {
        let program = program.into();
        self.consult_source(module_name, program.chars(), LoadMode::Consult)
    }

    /// Runs a query, giving an iterator over its answers. A query
    /// without variables gives `True` at most once; a query that
    /// leaves choice points after its last answer ends with `False`.
    pub fn run_query(&mut self, query: impl Into<String>) -> QueryState<'_> {
        let query = query.into();

        self.reset();

        let mut state = QueryState {
            machine: self,
            query_vars: vec![],
            pending: VecDeque::new(),
            parallel: None,
            called: false,
            done: true,
        };

        let goal = match read_single_term(&query, &state.machine.indices.op_dir) {
            Ok(Some(goal)) => goal,
            Ok(None) => ast::Term::atom("true"),
            Err(err) => {
                let message = err.as_atom();
                state.pending.push_back(Err(syntax_error_term(message.as_str())));
                return state;
            }
        };

        let vars = goal.vars();

        let entry = match state.machine.compile_local(goal, &vars) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(%err, "query cannot be compiled");
                state.pending.push_back(Err(Term::compound(
                    "error",
                    [
                        Term::compound("type_error", [Term::atom("callable"), Term::atom(query.trim())]),
                        Term::variable("_"),
                    ],
                )));
                return state;
            }
        };

        let machine_st = &mut state.machine.machine_st;
        let mut args = Vec::with_capacity(vars.len());

        for name in vars {
            match machine_st.heap.push_var() {
                Ok(Addr::HeapCell(h)) => {
                    args.push(Addr::HeapCell(h));
                    state.query_vars.push((name, h));
                }
                Ok(_) => {}
                Err(err) => {
                    let ball = MachineStub::from(err);
                    state.pending.push_back(Machine::exception_answer(&ball));
                    return state;
                }
            }
        }

        if state.machine.config.workers > 1 {
            state.parallel = Some(state.machine.start_parallel(entry, &args, &state.query_vars));
            return state;
        }

        state.machine.enter_query(entry, &args);
        state.done = false;
        state
    }
}
