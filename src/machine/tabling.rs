use crate::atom_table::*;
use crate::forms::*;
use crate::machine::copier::*;
use crate::machine::heap::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::*;
use crate::machine::raw_block::*;
use crate::machine::stack::*;
use crate::machine::Machine;
use crate::parser::ast::*;

use fxhash::FxBuildHasher;
use indexmap::{IndexMap, IndexSet};

/*
 * Tabled predicates are evaluated by local linear tabling. The first
 * call of a variant runs its clauses to exhaustion in a nested run and
 * stores each answer in the variant's entry. A call meeting a variant
 * still under evaluation consumes the answers found so far and marks
 * every entry above the producer on the completion stack as depending
 * on it. The leader of such a group re-runs its clauses until an
 * iteration adds no answer anywhere, then completes the whole group.
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableState {
    Fresh,
    Evaluating,
    /// Evaluated as part of a group whose leader has not completed.
    Incomplete,
    Complete,
}

#[derive(Debug, Clone)]
pub(crate) struct TableEntry {
    answers: IndexSet<MachineStub, FxBuildHasher>,
    pub(crate) state: TableState,
    /// The lowest completion stack position this entry depends on.
    leader: usize,
}

impl TableEntry {
    fn new() -> Self {
        TableEntry {
            answers: IndexSet::with_hasher(FxBuildHasher::default()),
            state: TableState::Fresh,
            leader: 0,
        }
    }
}

/// The answer tables of a machine, keyed by call variant.
#[derive(Debug, Clone)]
pub(crate) struct TableStore {
    entries: Vec<TableEntry>,
    index: IndexMap<MachineStub, usize, FxBuildHasher>,
    completion_stack: Vec<usize>,
    pending_members: IndexSet<usize, FxBuildHasher>,
    budget: Option<usize>,
    used: usize,
    /// Bumped by `abolish_all_tables/0`; answer replays from an older
    /// generation find nothing.
    pub(crate) generation: u64,
    answers_added: u64,
    consumers: u64,
}

impl TableStore {
    pub(crate) fn new(budget: Option<usize>) -> Self {
        TableStore {
            entries: vec![],
            index: IndexMap::with_hasher(FxBuildHasher::default()),
            completion_stack: vec![],
            pending_members: IndexSet::with_hasher(FxBuildHasher::default()),
            budget,
            used: 0,
            generation: 0,
            answers_added: 0,
            consumers: 0,
        }
    }

    fn entry_for(&mut self, variant: MachineStub) -> usize {
        if let Some(&idx) = self.index.get(&variant) {
            return idx;
        }

        let idx = self.entries.len();

        self.entries.push(TableEntry::new());
        self.index.insert(variant, idx);

        idx
    }

    #[inline]
    pub(crate) fn is_evaluating(&self) -> bool {
        !self.completion_stack.is_empty()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn answer_count(&self, idx: usize) -> usize {
        self.entries.get(idx).map(|entry| entry.answers.len()).unwrap_or(0)
    }

    fn add_answer(&mut self, idx: usize, answer: MachineStub) -> Result<(), ResourceError> {
        let entry = &mut self.entries[idx];

        if entry.answers.contains(&answer) {
            return Ok(());
        }

        if let Some(budget) = self.budget {
            if self.used + answer.len() > budget {
                return Err(ResourceError(Region::TableSpace));
            }
        }

        self.used += answer.len();
        entry.answers.insert(answer);
        self.answers_added += 1;

        Ok(())
    }

    // a recursive variant call of the entry being evaluated at `idx`.
    fn add_consumer(&mut self, idx: usize) {
        let pos = self
            .completion_stack
            .iter()
            .position(|&member| member == idx)
            .unwrap_or(0);

        for &member in &self.completion_stack[pos + 1..] {
            let entry = &mut self.entries[member];
            entry.leader = entry.leader.min(pos);
        }

        self.consumers += 1;
    }

    fn begin(&mut self, idx: usize) -> usize {
        let pos = self.completion_stack.len();
        let entry = &mut self.entries[idx];

        entry.state = TableState::Evaluating;
        entry.leader = pos;

        self.completion_stack.push(idx);
        pos
    }

    // the leader at `pos` reached its fixpoint.
    fn complete(&mut self, pos: usize) {
        for idx in self.completion_stack.drain(pos..) {
            self.entries[idx].state = TableState::Complete;
        }

        let entries = &mut self.entries;

        self.pending_members.retain(|&idx| {
            if entries[idx].leader >= pos {
                entries[idx].state = TableState::Complete;
                false
            } else {
                true
            }
        });
    }

    // a non-leader at `pos` ends its pass; its group stays open.
    fn suspend(&mut self, pos: usize) {
        let idx = self.completion_stack[pos];
        let leader = self.entries[idx].leader;

        self.completion_stack.truncate(pos);
        self.entries[idx].state = TableState::Incomplete;
        self.pending_members.insert(idx);

        for &member in &self.pending_members {
            let entry = &mut self.entries[member];

            if entry.leader >= pos {
                entry.leader = leader;
            }
        }

        if let Some(&top) = self.completion_stack.last() {
            let entry = &mut self.entries[top];
            entry.leader = entry.leader.min(leader);
        }
    }

    // an exception unwound the evaluation at `pos`.
    fn abandon(&mut self, pos: usize) {
        for idx in self.completion_stack.drain(pos..) {
            self.entries[idx].state = TableState::Incomplete;
        }

        let entries = &self.entries;
        self.pending_members.retain(|&idx| entries[idx].leader < pos);
    }

    fn abolish(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.pending_members.clear();
        self.used = 0;
        self.generation += 1;
    }
}

impl Machine {
    fn call_term(&mut self, name: &Atom, args: &[Addr]) -> Result<Addr, ResourceError> {
        if args.is_empty() {
            Ok(Addr::Con(Constant::Atom(name.clone())))
        } else {
            self.machine_st.heap.put_structure(name.clone(), args.to_vec())
        }
    }

    /// Calls a tabled predicate: evaluates its variant if needed and
    /// replays the answers of its entry through a choice point.
    pub(crate) fn call_tabled(&mut self, key: PredicateKey, entry: CodePtr, last: bool) -> Result<(), MachineStub> {
        let arity = key.1;
        let args: Vec<Addr> = self.machine_st.registers[1..=arity].to_vec();

        let call = self.call_term(&key.0, &args)?;
        let (variant, _) = copy_to_stub(self.machine_st.heap.as_slice(), call);
        let idx = self.tables.entry_for(variant);

        match self.tables.entries[idx].state {
            TableState::Complete => {}
            TableState::Evaluating => self.tables.add_consumer(idx),
            TableState::Fresh | TableState::Incomplete => self.evaluate_table(idx, &key, entry, &args)?,
        }

        for (i, arg) in args.into_iter().enumerate() {
            self.machine_st.registers[i + 1] = arg;
        }

        self.machine_st.num_of_args = arity;

        if !last {
            self.machine_st.cp = self.machine_st.p + 1;
        }

        let generation = self.tables.generation;

        self.machine_st.push_choice_point(Alternative::TableAnswers {
            entry: idx,
            generation,
            next: 0,
        })?;

        let b = self.machine_st.b() - 1;

        if !self.resume_table_answers(b)? {
            self.machine_st.fail = true;
        }

        Ok(())
    }

    fn evaluate_table(&mut self, idx: usize, key: &PredicateKey, entry: CodePtr, args: &[Addr]) -> CallResult {
        let pos = self.tables.begin(idx);

        tracing::trace!(name = %key.0, arity = key.1, idx, pos, "evaluating table");

        loop {
            let added = self.tables.answers_added;
            let consumers = self.tables.consumers;

            let result = self.run_nested(entry, args, |machine, _| {
                let answer = machine.call_term(&key.0, args)?;
                let (answer, _) = copy_to_stub(machine.machine_st.heap.as_slice(), answer);

                machine.tables.add_answer(idx, answer)?;
                Ok(true)
            });

            if let Err(ball) = result {
                self.tables.abandon(pos);
                return Err(ball);
            }

            if self.tables.entries[idx].leader < pos {
                self.tables.suspend(pos);
                return Ok(());
            }

            if self.tables.answers_added == added || self.tables.consumers == consumers {
                self.tables.complete(pos);

                tracing::debug!(
                    name = %key.0,
                    arity = key.1,
                    answers = self.tables.answer_count(idx),
                    "table complete"
                );

                return Ok(());
            }
        }
    }

    /// Unifies the call at choice point `b` with the next answer of its
    /// entry. Gives false, with the choice point removed, when no
    /// answer is left.
    pub(crate) fn resume_table_answers(&mut self, b: usize) -> Result<bool, MachineStub> {
        let (idx, generation, next) = match self.machine_st.stack.or_frame(b).alt {
            Alternative::TableAnswers { entry, generation, next } => (entry, generation, next),
            _ => return Ok(false),
        };

        let len = if generation == self.tables.generation {
            self.tables.answer_count(idx)
        } else {
            0
        };

        if next >= len {
            self.machine_st.pop_choice_point();
            return Ok(false);
        }

        self.machine_st.restore_choice_point(b);

        let complete = self.tables.entries[idx].state == TableState::Complete;

        if complete && next + 1 == len {
            self.machine_st.pop_choice_point();
        } else if let Alternative::TableAnswers { next, .. } = &mut self.machine_st.stack.or_frame_mut(b).alt {
            *next += 1;
        }

        let answer = match self.tables.entries[idx].answers.get_index(next) {
            Some(answer) => answer.clone(),
            None => return Ok(false),
        };

        let answer = self.machine_st.heap.write_stub(&answer)?;
        let values = self.machine_st.compound_args(&answer);

        for (i, value) in values.into_iter().enumerate() {
            let arg = self.machine_st.registers[i + 1].clone();
            self.machine_st.unify(arg, value);

            if self.machine_st.fail {
                break;
            }
        }

        self.machine_st.p = self.machine_st.cp;
        Ok(true)
    }

    pub(crate) fn abolish_all_tables(&mut self, context: &PredicateKey) -> CallResult {
        if self.tables.is_evaluating() {
            let err = self.machine_st.permission_error(
                Permission::Modify,
                atom!("table"),
                functor!(atom!("abolish_all_tables")),
            );

            return Err(self.machine_st.error_form(err, context));
        }

        tracing::debug!(entries = self.tables.len(), "abolishing tables");
        self.tables.abolish();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::machine::config::MachineBuilder;
    use crate::machine::lib_machine::{LeafAnswer, Term};
    use crate::machine::Machine;

    const GRAPH: &str = r#"
        :- table path/2.
        edge(a, b). edge(b, c). edge(c, a). edge(c, d).
        path(X, Y) :- path(X, Z), edge(Z, Y).
        path(X, Y) :- edge(X, Y).
    "#;

    fn machine_with(program: &str) -> Machine {
        let mut machine = MachineBuilder::new().build().unwrap();
        machine.consult_module_string("tables", program).unwrap();
        machine
    }

    fn binding(machine: &mut Machine, query: &str, var: &str) -> Term {
        match machine.run_query(query).next() {
            Some(Ok(LeafAnswer::LeafAnswer { bindings })) => bindings[var].clone(),
            answer => panic!("unexpected answer {:?}", answer),
        }
    }

    fn nodes(names: &[&str]) -> Term {
        Term::list(names.iter().map(|name| Term::atom(*name)))
    }

    #[test]
    fn left_recursion_terminates_on_cyclic_graphs() {
        let mut machine = machine_with(GRAPH);

        assert_eq!(
            binding(&mut machine, "findall(Y, path(a, Y), L), msort(L, S).", "S"),
            nodes(&["a", "b", "c", "d"])
        );
    }

    #[test]
    fn each_answer_is_returned_once() {
        let mut machine = machine_with(GRAPH);

        let answers: Vec<_> = machine
            .run_query("path(b, Y).")
            .filter(|answer| matches!(answer, Ok(answer) if answer.maybe_succeeded() && *answer != LeafAnswer::False))
            .collect();

        assert_eq!(answers.len(), 4);

        // a completed table replays the same answers.
        assert_eq!(
            binding(&mut machine, "findall(Y, path(b, Y), L), length(L, N).", "N"),
            Term::integer(4)
        );
    }

    #[test]
    fn mutually_dependent_variants_complete_together() {
        let mut machine = machine_with(
            r#"
            :- table reach/2.
            link(a, b). link(b, c). link(c, a). link(c, d).
            reach(X, Y) :- link(X, Z), reach(Z, Y).
            reach(X, Y) :- link(X, Y).
            "#,
        );

        assert_eq!(
            binding(&mut machine, "findall(Y, reach(a, Y), L), msort(L, S).", "S"),
            nodes(&["a", "b", "c", "d"])
        );
        assert_eq!(
            binding(&mut machine, "findall(Y, reach(c, Y), L), msort(L, S).", "S"),
            nodes(&["a", "b", "c", "d"])
        );
    }

    #[test]
    fn abolishing_during_evaluation_is_refused() {
        let mut machine = machine_with(
            r#"
            :- table t/1.
            t(X) :- abolish_all_tables, X = 1.
            "#,
        );

        match machine.run_query("t(X).").next() {
            Some(Err(Term::Compound(name, args))) => {
                assert_eq!(name, "error");
                assert!(matches!(&args[0], Term::Compound(kind, _) if kind == "permission_error"));
            }
            answer => panic!("unexpected answer {:?}", answer),
        }

        assert_eq!(binding(&mut machine, "abolish_all_tables, X = ok.", "X"), Term::atom("ok"));
    }

    #[test]
    fn abolished_tables_are_recomputed() {
        let mut machine = machine_with(
            r#"
            :- table f/1.
            :- dynamic(base/1).
            base(1).
            f(X) :- base(X).
            "#,
        );

        assert_eq!(binding(&mut machine, "findall(X, f(X), L).", "L"), Term::list([Term::integer(1)]));

        machine.run_query("assertz(base(2)).").for_each(drop);
        assert_eq!(binding(&mut machine, "findall(X, f(X), L).", "L"), Term::list([Term::integer(1)]));

        assert_eq!(
            binding(&mut machine, "abolish_all_tables, findall(X, f(X), L).", "L"),
            Term::list([Term::integer(1), Term::integer(2)])
        );
    }

    #[test]
    fn answer_tables_respect_their_budget() {
        let mut machine = MachineBuilder::new().with_table_space(1).build().unwrap();

        machine
            .consult_module_string("tables", ":- table n/1.\nn(X) :- between(1, 50000, X).\n")
            .unwrap();

        match machine.run_query("n(_).").next() {
            Some(Err(Term::Compound(name, args))) => {
                assert_eq!(name, "error");
                assert_eq!(args[0], Term::compound("resource_error", [Term::atom("table_space")]));
            }
            answer => panic!("unexpected answer {:?}", answer),
        };
    }
}
