use crate::atom_table::*;
use crate::instructions::*;
use crate::machine::machine_indices::*;
use crate::parser::ast::*;

use std::sync::Arc;

/// The first argument of a clause as seen by the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum OptArgIndexKey {
    Constant(Constant),
    List,
    Structure(Atom, usize),
    None,
}

impl OptArgIndexKey {
    pub(crate) fn of(first_arg: Option<&Term>) -> Self {
        match first_arg {
            Some(Term::Constant(c)) => OptArgIndexKey::Constant(c.clone()),
            Some(Term::Cons(..)) => OptArgIndexKey::List,
            Some(Term::Clause(name, terms)) if name.as_str() == "." && terms.len() == 2 => {
                OptArgIndexKey::List
            }
            Some(Term::Clause(name, terms)) => OptArgIndexKey::Structure(name.clone(), terms.len()),
            Some(Term::Var(_)) | Some(Term::AnonVar) | None => OptArgIndexKey::None,
        }
    }

    #[inline]
    fn is_var(&self) -> bool {
        matches!(self, OptArgIndexKey::None)
    }
}

/// Clause entry points of a predicate, keyed by first argument, in
/// source order.
#[derive(Debug, Default)]
pub(crate) struct CodeOffsets {
    entries: Vec<(OptArgIndexKey, CodePtr)>,
}

impl CodeOffsets {
    pub(crate) fn new() -> Self {
        CodeOffsets::default()
    }

    pub(crate) fn index_term(&mut self, first_arg: Option<&Term>, entry: CodePtr) {
        self.entries.push((OptArgIndexKey::of(first_arg), entry));
    }

    pub(crate) fn push(&mut self, key: OptArgIndexKey, entry: CodePtr) {
        self.entries.push((key, entry));
    }

    fn select(&self, matches: impl Fn(&OptArgIndexKey) -> bool) -> ClauseList {
        Arc::new(
            self.entries
                .iter()
                .filter(|(key, _)| key.is_var() || matches(key))
                .map(|(_, entry)| *entry)
                .collect(),
        )
    }

    /// Builds the index. A variable first argument places a clause in
    /// every candidate list.
    pub(crate) fn compute_indices(self, cuts: bool) -> IndexTable {
        let mut table = IndexTable::new();

        table.all = Arc::new(self.entries.iter().map(|(_, entry)| *entry).collect());
        table.var_clauses = self.select(|_| false);
        table.lists = self.select(|key| matches!(key, OptArgIndexKey::List));
        table.cuts = cuts;

        for (key, _) in &self.entries {
            match key {
                OptArgIndexKey::Constant(c) if !table.constants.contains_key(c) => {
                    let clauses = self.select(|k| k == key);
                    table.constants.insert(c.clone(), clauses);
                }
                OptArgIndexKey::Structure(name, arity)
                    if !table.structures.contains_key(&(name.clone(), *arity)) =>
                {
                    let clauses = self.select(|k| k == key);
                    table.structures.insert((name.clone(), *arity), clauses);
                }
                _ => {}
            }
        }

        table
    }
}

impl IndexTable {
    /// Adds a clause after the existing ones. Lists still shared with
    /// a choice point are copied first, so running calls keep the
    /// clauses they started with.
    pub(crate) fn push_clause(&mut self, key: &OptArgIndexKey, entry: CodePtr, cuts: bool) {
        Arc::make_mut(&mut self.all).push(entry);
        self.cuts |= cuts;

        match key {
            OptArgIndexKey::None => {
                Arc::make_mut(&mut self.var_clauses).push(entry);
                Arc::make_mut(&mut self.lists).push(entry);

                for clauses in self.constants.values_mut() {
                    Arc::make_mut(clauses).push(entry);
                }

                for clauses in self.structures.values_mut() {
                    Arc::make_mut(clauses).push(entry);
                }
            }
            OptArgIndexKey::Constant(c) => {
                let var_clauses = &self.var_clauses;
                let clauses = self
                    .constants
                    .entry(c.clone())
                    .or_insert_with(|| Arc::new(var_clauses.to_vec()));

                Arc::make_mut(clauses).push(entry);
            }
            OptArgIndexKey::List => Arc::make_mut(&mut self.lists).push(entry),
            OptArgIndexKey::Structure(name, arity) => {
                let var_clauses = &self.var_clauses;
                let clauses = self
                    .structures
                    .entry((name.clone(), *arity))
                    .or_insert_with(|| Arc::new(var_clauses.to_vec()));

                Arc::make_mut(clauses).push(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::heap::*;
    use crate::machine::raw_block::*;
    use crate::parser::read_terms;

    fn table(src: &str) -> IndexTable {
        let mut offsets = CodeOffsets::new();

        for (i, term) in read_terms(src, &default_op_dir()).unwrap().iter().enumerate() {
            offsets.index_term(term.first_arg(), CodePtr::Dir(i));
        }

        offsets.compute_indices(false)
    }

    fn dir(ptrs: &[usize]) -> Vec<CodePtr> {
        ptrs.iter().map(|&p| CodePtr::Dir(p)).collect()
    }

    #[test]
    fn selects_by_principal_functor() {
        let table = table("p(a). p(X). p(f(1)). p([1]). p(b). p(1.0).");
        let heap = Heap::new(Region::Heap, RegionLimits { init_cells: 4, max_cells: None }).unwrap();

        let a = Addr::Con(Constant::Atom(atom!("a")));
        let c = Addr::Con(Constant::Atom(atom!("c")));
        let one = Addr::Con(Constant::Fixnum(1));

        assert_eq!(table.select(&a, heap.as_slice()).to_vec(), dir(&[0, 1]));
        assert_eq!(table.select(&c, heap.as_slice()).to_vec(), dir(&[1]));
        assert_eq!(table.select(&one, heap.as_slice()).to_vec(), dir(&[1]));
        assert_eq!(table.select(&Addr::Lis(0), heap.as_slice()).to_vec(), dir(&[1, 3]));
        assert_eq!(table.select(&Addr::HeapCell(0), heap.as_slice()).len(), 6);
    }

    #[test]
    fn pushed_clauses_extend_the_index() {
        let src = "p(a). p(X). p(f(1)). p([1]). p(b). p(1.0).";
        let full = table(src);

        let mut incremental = IndexTable::new();

        for (i, term) in read_terms(src, &default_op_dir()).unwrap().iter().enumerate() {
            incremental.push_clause(&OptArgIndexKey::of(term.first_arg()), CodePtr::Dir(i), false);
        }

        assert_eq!(incremental.all, full.all);
        assert_eq!(incremental.var_clauses, full.var_clauses);
        assert_eq!(incremental.lists, full.lists);
        assert_eq!(incremental.constants, full.constants);
        assert_eq!(incremental.structures, full.structures);
    }

    #[test]
    fn shared_lists_are_copied_before_a_push() {
        let mut table = table("p(a). p(b).");
        let running = table.all.clone();

        table.push_clause(&OptArgIndexKey::Constant(Constant::Atom(atom!("c"))), CodePtr::Dir(2), false);

        assert_eq!(running.len(), 2);
        assert_eq!(table.all.to_vec(), dir(&[0, 1, 2]));
    }

    #[test]
    fn structures_are_keyed_by_name_and_arity() {
        let table = table("q(f(1)). q(f(1, 2)). q(g(1)). q(f(2)).");

        let mut heap = Heap::new(Region::Heap, RegionLimits { init_cells: 8, max_cells: None }).unwrap();
        let f = heap.put_structure(atom!("f"), vec![Addr::Con(Constant::Fixnum(3))]).unwrap();

        assert_eq!(table.select(&f, heap.as_slice()).to_vec(), dir(&[0, 3]));
        assert!(table.var_clauses.is_empty());
    }
}
