use crate::atom_table::*;
use crate::forms::*;
use crate::machine::copier::*;
use crate::machine::heap::*;
use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;
use crate::machine::raw_block::*;
use crate::parser::ast::*;

pub(crate) type CallResult = Result<(), MachineStub>;

#[derive(Debug, Clone)]
pub(crate) enum FunctorElement {
    Atom(Atom),
    Fixnum(i64),
    Constant(Constant),
    Stub(MachineStub),
    Var,
}

/// Lays out `name(elements...)` as a stub. Sub-stubs are appended
/// after the argument cells and referenced through their roots.
pub(crate) fn functor_stub(name: Atom, elements: Vec<FunctorElement>) -> MachineStub {
    if elements.is_empty() {
        return vec![HeapCellValue::Addr(Addr::Con(Constant::Atom(name)))];
    }

    let arity = elements.len();
    let mut stub = Vec::with_capacity(arity + 2);
    let mut pending = vec![];

    stub.push(HeapCellValue::Addr(Addr::Str(1)));
    stub.push(HeapCellValue::NamedStr(arity, name));

    for (i, element) in elements.into_iter().enumerate() {
        let cell = 2 + i;

        stub.push(HeapCellValue::Addr(match element {
            FunctorElement::Atom(atom) => Addr::Con(Constant::Atom(atom)),
            FunctorElement::Fixnum(n) => Addr::Con(Constant::Fixnum(n)),
            FunctorElement::Constant(c) => Addr::Con(c),
            FunctorElement::Var => Addr::HeapCell(cell),
            FunctorElement::Stub(sub) => {
                pending.push((cell, sub));
                Addr::HeapCell(cell)
            }
        }));
    }

    for (cell, sub) in pending {
        let offset = stub.len();

        stub[cell] = HeapCellValue::Addr(Addr::HeapCell(offset));
        stub.extend(sub.into_iter().map(|cell| cell.relocate(offset)));
    }

    stub
}

#[inline]
pub(crate) fn predicate_indicator(name: Atom, arity: usize) -> MachineStub {
    functor!(atom!("/"), [atom(name), fixnum(arity)])
}

/// The formal part of an ISO error term.
#[derive(Debug, Clone)]
pub(crate) struct MachineError {
    stub: MachineStub,
}

// from 7.12.2 b) of 13211-1:1995
#[derive(Debug, Clone, Copy)]
pub(crate) enum ValidType {
    Atom,
    Atomic,
    Callable,
    Compound,
    Evaluable,
    Float,
    Integer,
    List,
    Number,
    PredicateIndicator,
}

impl ValidType {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            ValidType::Atom => atom!("atom"),
            ValidType::Atomic => atom!("atomic"),
            ValidType::Callable => atom!("callable"),
            ValidType::Compound => atom!("compound"),
            ValidType::Evaluable => atom!("evaluable"),
            ValidType::Float => atom!("float"),
            ValidType::Integer => atom!("integer"),
            ValidType::List => atom!("list"),
            ValidType::Number => atom!("number"),
            ValidType::PredicateIndicator => atom!("predicate_indicator"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum DomainErrorType {
    FlagValue,
    NonEmptyList,
    NotLessThanZero,
    OperatorPriority,
    OperatorSpecifier,
    Order,
    PrologFlag,
}

impl DomainErrorType {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            DomainErrorType::FlagValue => atom!("flag_value"),
            DomainErrorType::NonEmptyList => atom!("non_empty_list"),
            DomainErrorType::NotLessThanZero => atom!("not_less_than_zero"),
            DomainErrorType::OperatorPriority => atom!("operator_priority"),
            DomainErrorType::OperatorSpecifier => atom!("operator_specifier"),
            DomainErrorType::Order => atom!("order"),
            DomainErrorType::PrologFlag => atom!("prolog_flag"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Permission {
    Access,
    Create,
    Modify,
}

impl Permission {
    #[inline]
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            Permission::Access => atom!("access"),
            Permission::Create => atom!("create"),
            Permission::Modify => atom!("modify"),
        }
    }
}

// from 7.12.2 f) of 13211-1:1995
#[derive(Debug, Clone, Copy)]
pub(crate) enum RepFlag {
    CharacterCode,
    MaxArity,
}

impl RepFlag {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            RepFlag::CharacterCode => atom!("character_code"),
            RepFlag::MaxArity => atom!("max_arity"),
        }
    }
}

// from 7.12.2 g) of 13211-1:1995
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalError {
    FloatOverflow,
    IntOverflow,
    Undefined,
    ZeroDivisor,
}

impl EvalError {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            EvalError::FloatOverflow => atom!("float_overflow"),
            EvalError::IntOverflow => atom!("int_overflow"),
            EvalError::Undefined => atom!("undefined"),
            EvalError::ZeroDivisor => atom!("zero_divisor"),
        }
    }
}

impl MachineState {
    /// Copies a heap term out so it can be embedded in an error.
    #[inline]
    pub(crate) fn culprit(&self, addr: Addr) -> MachineStub {
        copy_to_stub(self.heap.as_slice(), addr).0
    }

    pub(crate) fn instantiation_error(&self) -> MachineError {
        MachineError {
            stub: functor!(atom!("instantiation_error")),
        }
    }

    pub(crate) fn type_error(&self, valid_type: ValidType, culprit: Addr) -> MachineError {
        let culprit = self.culprit(culprit);

        MachineError {
            stub: functor!(atom!("type_error"), [atom(valid_type.as_atom()), stub(culprit)]),
        }
    }

    pub(crate) fn type_error_with_stub(&self, valid_type: ValidType, culprit: MachineStub) -> MachineError {
        MachineError {
            stub: functor!(atom!("type_error"), [atom(valid_type.as_atom()), stub(culprit)]),
        }
    }

    pub(crate) fn domain_error(&self, domain: DomainErrorType, culprit: Addr) -> MachineError {
        let culprit = self.culprit(culprit);

        MachineError {
            stub: functor!(atom!("domain_error"), [atom(domain.as_atom()), stub(culprit)]),
        }
    }

    pub(crate) fn representation_error(&self, flag: RepFlag) -> MachineError {
        MachineError {
            stub: functor!(atom!("representation_error"), [atom(flag.as_atom())]),
        }
    }

    pub(crate) fn evaluation_error(&self, err: EvalError) -> MachineError {
        MachineError {
            stub: functor!(atom!("evaluation_error"), [atom(err.as_atom())]),
        }
    }

    pub(crate) fn syntax_error(&self, kind: Atom) -> MachineError {
        MachineError {
            stub: functor!(atom!("syntax_error"), [atom(kind)]),
        }
    }

    pub(crate) fn existence_error(&self, key: &PredicateKey) -> MachineError {
        let culprit = predicate_indicator(key.0.clone(), key.1);

        MachineError {
            stub: functor!(atom!("existence_error"), [atom(atom!("procedure")), stub(culprit)]),
        }
    }

    pub(crate) fn source_sink_error(&self, culprit: Addr) -> MachineError {
        let culprit = self.culprit(culprit);

        MachineError {
            stub: functor!(atom!("existence_error"), [atom(atom!("source_sink")), stub(culprit)]),
        }
    }

    pub(crate) fn permission_error(&self, perm: Permission, kind: Atom, culprit: MachineStub) -> MachineError {
        MachineError {
            stub: functor!(
                atom!("permission_error"),
                [atom(perm.as_atom()), atom(kind), stub(culprit)]
            ),
        }
    }

    /// Wraps a formal error as `error(Formal, Name/Arity)`.
    pub(crate) fn error_form(&self, err: MachineError, context: &PredicateKey) -> MachineStub {
        let context = predicate_indicator(context.0.clone(), context.1);
        functor!(atom!("error"), [stub(err.stub), stub(context)])
    }
}

impl From<ResourceError> for MachineStub {
    fn from(err: ResourceError) -> MachineStub {
        let formal = functor!(atom!("resource_error"), [atom(err.0.as_atom())]);
        functor!(atom!("error"), [stub(formal), var()])
    }
}

/// Errors raised while compiling a clause.
#[derive(Debug, thiserror::Error)]
pub enum CompilationError {
    /// The clause head is a variable or a number.
    #[error("clause head is not callable")]
    InvalidRuleHead,
    /// A body goal is a number.
    #[error("clause body is not callable")]
    InvalidRuleBody,
    /// The clause would redefine a control construct or built-in.
    #[error("cannot modify the built-in procedure {0}/{1}")]
    CannotOverwriteBuiltIn(String, usize),
    /// A directive was malformed.
    #[error("invalid directive {0}")]
    InvalidDirective(String),
}

/// Errors raised while consulting source text or running its
/// directives.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The source text could not be read as Prolog terms.
    #[error("{file}:{line}: syntax error: {message}")]
    Syntax {
        /// The file being consulted.
        file: String,
        /// The line the error was detected on.
        line: usize,
        /// A description of the error.
        message: String,
    },
    /// A clause could not be compiled.
    #[error("{file}:{line}: {error}")]
    Compilation {
        /// The file being consulted.
        file: String,
        /// The line the clause ends on.
        line: usize,
        /// The underlying error.
        #[source]
        error: CompilationError,
    },
    /// A file could not be opened.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The path that was opened.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Fatal errors raised while starting a [`Machine`](crate::Machine).
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// One of the runtime regions could not be allocated.
    #[error("cannot allocate the initial {0} region")]
    Allocation(String),
    /// The saved state named at startup was not found.
    #[error("saved state {0} not found")]
    MissingSavedState(String),
    /// The boot file was not found.
    #[error("boot file {0} not found")]
    MissingBootFile(String),
    /// The boot file or the prelude failed to load.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<ResourceError> for StartupError {
    fn from(err: ResourceError) -> StartupError {
        StartupError::Allocation(err.0.as_atom().as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_stubs_are_relocated() {
        let formal = functor!(atom!("type_error"), [atom(atom!("integer")), atom(atom!("a"))]);
        let stub = functor!(atom!("error"), [stub(formal), var()]);

        let mut heap = Heap::new(Region::Heap, RegionLimits { init_cells: 16, max_cells: None }).unwrap();
        heap.push_var().unwrap();

        let root = heap.write_stub(&stub).unwrap();
        let s = match root {
            Addr::Str(s) => s,
            _ => panic!("expected a structure"),
        };

        assert_eq!(heap[s], HeapCellValue::NamedStr(2, atom!("error")));
        assert_eq!(heap_bound_deref(heap.as_slice(), Addr::HeapCell(s + 2)), Addr::HeapCell(s + 2));

        match heap_bound_deref(heap.as_slice(), Addr::HeapCell(s + 1)) {
            Addr::Str(t) => {
                assert_eq!(heap[t], HeapCellValue::NamedStr(2, atom!("type_error")));
                assert_eq!(heap[t + 2], HeapCellValue::Addr(Addr::Con(Constant::Atom(atom!("a")))));
            }
            addr => panic!("unexpected formal {:?}", addr),
        }
    }

    #[test]
    fn resource_errors_have_iso_shape() {
        let stub = MachineStub::from(ResourceError(Region::Trail));

        assert_eq!(stub[1], HeapCellValue::NamedStr(2, atom!("error")));
        assert!(stub.contains(&HeapCellValue::NamedStr(1, atom!("resource_error"))));
        assert!(stub.contains(&HeapCellValue::Addr(Addr::Con(Constant::Atom(atom!("trail"))))));
    }
}
