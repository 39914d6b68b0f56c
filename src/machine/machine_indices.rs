use crate::atom_table::*;
use crate::forms::*;
use crate::indexing::*;
use crate::instructions::IndexTable;
use crate::parser::ast::*;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use std::cmp::Ordering;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

// 7.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TermOrderCategory {
    Variable,
    FloatingPoint,
    Integer,
    Atom,
    Compound,
}

/// A tagged term value. Every variable lives in a heap cell; an
/// unbound variable is a cell referring to itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Addr {
    Con(Constant),
    HeapCell(usize),
    Lis(usize),
    Str(usize),
}

impl Addr {
    #[inline]
    pub(crate) fn is_ref(&self) -> bool {
        matches!(self, Addr::HeapCell(_))
    }

    #[inline]
    pub(crate) fn as_var(&self) -> Option<usize> {
        match self {
            &Addr::HeapCell(h) => Some(h),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn is_compound(&self) -> bool {
        matches!(self, Addr::Lis(_) | Addr::Str(_))
    }

    pub(crate) fn order_category(&self) -> TermOrderCategory {
        match self {
            Addr::HeapCell(_) => TermOrderCategory::Variable,
            Addr::Con(Constant::Float(_)) => TermOrderCategory::FloatingPoint,
            Addr::Con(Constant::Fixnum(_)) | Addr::Con(Constant::Usize(_)) => {
                TermOrderCategory::Integer
            }
            Addr::Con(Constant::Atom(_)) | Addr::Con(Constant::EmptyList) => TermOrderCategory::Atom,
            Addr::Lis(_) | Addr::Str(_) => TermOrderCategory::Compound,
        }
    }
}

impl From<Constant> for Addr {
    #[inline]
    fn from(c: Constant) -> Self {
        Addr::Con(c)
    }
}

impl Add<usize> for Addr {
    type Output = Addr;

    /// Relocates heap pointers by `rhs` cells.
    fn add(self, rhs: usize) -> Self::Output {
        match self {
            Addr::HeapCell(h) => Addr::HeapCell(h + rhs),
            Addr::Lis(l) => Addr::Lis(l + rhs),
            Addr::Str(s) => Addr::Str(s + rhs),
            Addr::Con(c) => Addr::Con(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HeapCellValue {
    Addr(Addr),
    NamedStr(usize, Atom),
}

impl HeapCellValue {
    /// The value of the cell located at `focus`.
    #[inline]
    pub(crate) fn as_addr(&self, focus: usize) -> Addr {
        match self {
            HeapCellValue::Addr(a) => a.clone(),
            HeapCellValue::NamedStr(..) => Addr::Str(focus),
        }
    }

    #[inline]
    pub(crate) fn relocate(self, offset: usize) -> Self {
        match self {
            HeapCellValue::Addr(a) => HeapCellValue::Addr(a + offset),
            cell => cell,
        }
    }
}

impl From<Addr> for HeapCellValue {
    #[inline]
    fn from(addr: Addr) -> Self {
        HeapCellValue::Addr(addr)
    }
}

/// A location in compiled code: the shared code directory or the
/// per-machine local area holding queries and meta-call clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum CodePtr {
    Dir(usize),
    Local(usize),
}

impl Default for CodePtr {
    fn default() -> Self {
        CodePtr::Dir(0)
    }
}

impl PartialOrd for CodePtr {
    fn partial_cmp(&self, other: &CodePtr) -> Option<Ordering> {
        match (self, other) {
            (CodePtr::Dir(p1), CodePtr::Dir(p2)) | (CodePtr::Local(p1), CodePtr::Local(p2)) => {
                Some(p1.cmp(p2))
            }
            _ => None,
        }
    }
}

impl Add<usize> for CodePtr {
    type Output = CodePtr;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        match self {
            CodePtr::Dir(p) => CodePtr::Dir(p + rhs),
            CodePtr::Local(p) => CodePtr::Local(p + rhs),
        }
    }
}

impl AddAssign<usize> for CodePtr {
    #[inline]
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

/// How a call reaches the clauses of a predicate.
#[derive(Debug, Clone)]
pub(crate) enum CodeEntry {
    /// Compiled as a whole, index included.
    Static(CodePtr),
    /// Compiled a clause at a time. The index lives here rather than in
    /// the code, so updating it leaves no code behind.
    Dynamic(Arc<IndexTable>),
}

#[derive(Debug, Clone)]
pub(crate) struct CodeIndex {
    pub(crate) entry: CodeEntry,
    pub(crate) tabled: bool,
}

impl CodeIndex {
    #[inline]
    pub(crate) fn at(entry: CodePtr, tabled: bool) -> Self {
        CodeIndex {
            entry: CodeEntry::Static(entry),
            tabled,
        }
    }
}

/// The code of one clause of a dynamic predicate.
#[derive(Debug, Clone)]
pub(crate) struct ClauseEntry {
    pub(crate) key: OptArgIndexKey,
    pub(crate) entry: CodePtr,
    pub(crate) cuts: bool,
}

/// Builds the index of a dynamic predicate from its clauses.
pub(crate) fn index_clauses(clauses: &[ClauseEntry]) -> IndexTable {
    let mut offsets = CodeOffsets::new();

    for clause in clauses {
        offsets.push(clause.key.clone(), clause.entry);
    }

    offsets.compute_indices(clauses.iter().any(|clause| clause.cuts))
}

/// Source clauses of a user predicate, kept for recompilation after
/// consults. Dynamic predicates also keep the code of each clause,
/// in the same order.
#[derive(Debug, Clone, Default)]
pub(crate) struct PredicateSkeleton {
    pub(crate) clauses: Vec<Term>,
    pub(crate) compiled: Vec<ClauseEntry>,
    pub(crate) is_dynamic: bool,
    pub(crate) is_tabled: bool,
}

impl PredicateSkeleton {
    /// Dynamic predicates that are not tabled are updated a clause at a
    /// time.
    #[inline]
    pub(crate) fn is_incremental(&self) -> bool {
        self.is_dynamic && !self.is_tabled
    }
}

pub(crate) type CodeDir = IndexMap<PredicateKey, CodeIndex, FxBuildHasher>;
pub(crate) type PredicateDir = IndexMap<PredicateKey, PredicateSkeleton, FxBuildHasher>;

#[derive(Debug, Clone)]
pub(crate) struct IndexStore {
    pub(crate) code_dir: CodeDir,
    pub(crate) predicates: PredicateDir,
    pub(crate) op_dir: OpDir,
}

impl Default for IndexStore {
    fn default() -> Self {
        IndexStore {
            code_dir: CodeDir::with_hasher(FxBuildHasher::default()),
            predicates: PredicateDir::with_hasher(FxBuildHasher::default()),
            op_dir: default_op_dir(),
        }
    }
}

impl IndexStore {
    #[inline]
    pub(crate) fn lookup(&self, key: &PredicateKey) -> Option<CodeIndex> {
        self.code_dir.get(key).cloned()
    }

    pub(crate) fn skeleton_mut(&mut self, key: &PredicateKey) -> &mut PredicateSkeleton {
        self.predicates.entry(key.clone()).or_default()
    }

    #[inline]
    pub(crate) fn is_dynamic(&self, key: &PredicateKey) -> bool {
        self.predicates
            .get(key)
            .map(|skeleton| skeleton.is_dynamic)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unknown {
    Error,
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MachineFlags {
    pub(crate) occurs_check: bool,
    pub(crate) unknown: Unknown,
}

impl Default for MachineFlags {
    fn default() -> Self {
        MachineFlags {
            occurs_check: false,
            unknown: Unknown::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocation_moves_pointers_only() {
        assert_eq!(Addr::HeapCell(3) + 10, Addr::HeapCell(13));
        assert_eq!(Addr::Str(0) + 4, Addr::Str(4));
        assert_eq!(
            Addr::Con(Constant::Fixnum(3)) + 10,
            Addr::Con(Constant::Fixnum(3))
        );
        assert_eq!(
            HeapCellValue::NamedStr(2, atom!("f")).relocate(7),
            HeapCellValue::NamedStr(2, atom!("f"))
        );
    }

    #[test]
    fn standard_order_categories() {
        assert!(Addr::HeapCell(0).order_category() < Addr::Con(Constant::from(1.0)).order_category());
        assert!(
            Addr::Con(Constant::Fixnum(1)).order_category()
                < Addr::Con(Constant::Atom(atom!("a"))).order_category()
        );
        assert!(Addr::Con(Constant::EmptyList).order_category() < Addr::Lis(0).order_category());
    }
}
