use crate::atom_table::*;
use crate::clause_types::*;
use crate::forms::*;
use crate::machine::machine_indices::*;
use crate::parser::ast::*;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use std::sync::Arc;

/// A clause term as it appears in compiled code. Variables are
/// environment slots; `first` marks the first occurrence.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CodeTerm {
    Void,
    Var(usize, bool),
    Con(Constant),
    Lis(Box<CodeTerm>, Box<CodeTerm>),
    Str(Atom, Vec<CodeTerm>),
}

/// Where the cut barrier of an activation comes from, recorded in
/// its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CutScope {
    None,
    Own,
    /// Passed in the given argument register by the enclosing clause.
    Param(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallTarget {
    Key(PredicateKey),
    Direct(CodePtr),
    /// An auxiliary predicate of the clause being compiled; resolved
    /// to `Direct` once the predicate is laid out.
    Aux(usize),
}

/// Candidate clauses in source order. Shared with the choice points
/// trying them; updated in place once none does.
pub(crate) type ClauseList = Arc<Vec<CodePtr>>;

pub(crate) type ConstantIndex = IndexMap<Constant, ClauseList, FxBuildHasher>;
pub(crate) type StructureIndex = IndexMap<(Atom, usize), ClauseList, FxBuildHasher>;

/// First argument index of a predicate. Every list holds candidate
/// clauses in source order.
#[derive(Debug, Clone)]
pub(crate) struct IndexTable {
    pub(crate) all: ClauseList,
    pub(crate) var_clauses: ClauseList,
    pub(crate) constants: ConstantIndex,
    pub(crate) lists: ClauseList,
    pub(crate) structures: StructureIndex,
    /// Some clause cuts away its own alternatives.
    pub(crate) cuts: bool,
}

impl IndexTable {
    pub(crate) fn new() -> Self {
        IndexTable {
            all: Arc::new(vec![]),
            var_clauses: Arc::new(vec![]),
            constants: ConstantIndex::with_hasher(FxBuildHasher::default()),
            lists: Arc::new(vec![]),
            structures: StructureIndex::with_hasher(FxBuildHasher::default()),
            cuts: false,
        }
    }

    /// Selects the clauses whose first argument may match `addr`.
    pub(crate) fn select(&self, addr: &Addr, heap: &[HeapCellValue]) -> &ClauseList {
        match addr {
            Addr::HeapCell(_) => &self.all,
            Addr::Con(c) => self.constants.get(c).unwrap_or(&self.var_clauses),
            Addr::Lis(_) => &self.lists,
            Addr::Str(s) => match &heap[*s] {
                HeapCellValue::NamedStr(arity, name) => self
                    .structures
                    .get(&(name.clone(), *arity))
                    .unwrap_or(&self.var_clauses),
                HeapCellValue::Addr(_) => &self.var_clauses,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Instruction {
    Allocate(usize, CutScope),
    Deallocate,
    GetLevel(usize),
    GetArg(usize, CodeTerm),
    PutArg(usize, CodeTerm),
    Call(CallTarget, usize),
    Execute(CallTarget, usize),
    CallN(usize),
    ExecuteN(usize),
    CallBuiltIn(BuiltInClauseType),
    Proceed,
    SwitchOnTerm(Box<IndexTable>),
    NeckCut,
    Cut(usize),
    Fail,
    InstallCatch(usize),
    ExitCatch(usize),
    QuerySuccess,
}

impl Instruction {
    /// Points calls to auxiliary predicates at their entries.
    pub(crate) fn resolve_aux(&mut self, aux_entries: &[CodePtr]) {
        match self {
            Instruction::Call(target, _) | Instruction::Execute(target, _) => {
                if let CallTarget::Aux(id) = target {
                    *target = CallTarget::Direct(aux_entries[*id]);
                }
            }
            _ => {}
        }
    }
}
