use crate::atom_table::*;

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum CompareNumberQT {
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    NotEqual,
    Equal,
}

impl CompareNumberQT {
    fn name(self) -> Atom {
        match self {
            CompareNumberQT::GreaterThan => atom!(">"),
            CompareNumberQT::LessThan => atom!("<"),
            CompareNumberQT::GreaterThanOrEqual => atom!(">="),
            CompareNumberQT::LessThanOrEqual => atom!("=<"),
            CompareNumberQT::NotEqual => atom!("=\\="),
            CompareNumberQT::Equal => atom!("=:="),
        }
    }

    pub(crate) fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareNumberQT::GreaterThan => ordering == Ordering::Greater,
            CompareNumberQT::LessThan => ordering == Ordering::Less,
            CompareNumberQT::GreaterThanOrEqual => ordering != Ordering::Less,
            CompareNumberQT::LessThanOrEqual => ordering != Ordering::Greater,
            CompareNumberQT::NotEqual => ordering != Ordering::Equal,
            CompareNumberQT::Equal => ordering == Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareTermQT {
    LessThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    GreaterThan,
}

impl CompareTermQT {
    fn name(self) -> Atom {
        match self {
            CompareTermQT::GreaterThan => atom!("@>"),
            CompareTermQT::LessThan => atom!("@<"),
            CompareTermQT::GreaterThanOrEqual => atom!("@>="),
            CompareTermQT::LessThanOrEqual => atom!("@=<"),
        }
    }

    pub(crate) fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareTermQT::GreaterThan => ordering == Ordering::Greater,
            CompareTermQT::LessThan => ordering == Ordering::Less,
            CompareTermQT::GreaterThanOrEqual => ordering != Ordering::Less,
            CompareTermQT::LessThanOrEqual => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeTest {
    Var,
    NonVar,
    Atom,
    Number,
    Integer,
    Float,
    Atomic,
    Compound,
    Callable,
    IsList,
    Ground,
}

impl TypeTest {
    fn name(self) -> Atom {
        match self {
            TypeTest::Var => atom!("var"),
            TypeTest::NonVar => atom!("nonvar"),
            TypeTest::Atom => atom!("atom"),
            TypeTest::Number => atom!("number"),
            TypeTest::Integer => atom!("integer"),
            TypeTest::Float => atom!("float"),
            TypeTest::Atomic => atom!("atomic"),
            TypeTest::Compound => atom!("compound"),
            TypeTest::Callable => atom!("callable"),
            TypeTest::IsList => atom!("is_list"),
            TypeTest::Ground => atom!("ground"),
        }
    }
}

/// Deterministic system predicates run in place by `CallBuiltIn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuiltInClauseType {
    AbolishAllTables,
    Arg,
    Asserta,
    Assertz,
    AtomChars,
    AtomCodes,
    AtomLength,
    Compare,
    CompareNumber(CompareNumberQT),
    CompareTerm(CompareTermQT),
    Consult,
    CopyTerm,
    CurrentPrologFlag,
    Dynamic,
    Eq,
    Fail,
    Findall,
    Functor,
    GetValue,
    Halt,
    HaltWithCode,
    Is,
    MSort,
    Nl,
    NotEq,
    NotUnifiable,
    NumberCodes,
    Op,
    Print,
    Repl,
    Retract,
    SetPrologFlag,
    SetValue,
    Sort,
    Table,
    Throw,
    True,
    Type(TypeTest),
    Unify,
    UnifyWithOccursCheck,
    Univ,
    Write,
    WriteCanonical,
    WriteQ,
}

impl BuiltInClauseType {
    pub(crate) fn from(name: &str, arity: usize) -> Option<Self> {
        Some(match (name, arity) {
            ("abolish_all_tables", 0) => BuiltInClauseType::AbolishAllTables,
            ("arg", 3) => BuiltInClauseType::Arg,
            ("asserta", 1) => BuiltInClauseType::Asserta,
            ("assertz", 1) | ("assert", 1) => BuiltInClauseType::Assertz,
            ("atom_chars", 2) => BuiltInClauseType::AtomChars,
            ("atom_codes", 2) => BuiltInClauseType::AtomCodes,
            ("atom_length", 2) => BuiltInClauseType::AtomLength,
            ("compare", 3) => BuiltInClauseType::Compare,
            (">", 2) => BuiltInClauseType::CompareNumber(CompareNumberQT::GreaterThan),
            ("<", 2) => BuiltInClauseType::CompareNumber(CompareNumberQT::LessThan),
            (">=", 2) => BuiltInClauseType::CompareNumber(CompareNumberQT::GreaterThanOrEqual),
            ("=<", 2) => BuiltInClauseType::CompareNumber(CompareNumberQT::LessThanOrEqual),
            ("=\\=", 2) => BuiltInClauseType::CompareNumber(CompareNumberQT::NotEqual),
            ("=:=", 2) => BuiltInClauseType::CompareNumber(CompareNumberQT::Equal),
            ("@>", 2) => BuiltInClauseType::CompareTerm(CompareTermQT::GreaterThan),
            ("@<", 2) => BuiltInClauseType::CompareTerm(CompareTermQT::LessThan),
            ("@>=", 2) => BuiltInClauseType::CompareTerm(CompareTermQT::GreaterThanOrEqual),
            ("@=<", 2) => BuiltInClauseType::CompareTerm(CompareTermQT::LessThanOrEqual),
            ("consult", 1) => BuiltInClauseType::Consult,
            ("copy_term", 2) => BuiltInClauseType::CopyTerm,
            ("$current_prolog_flag", 2) => BuiltInClauseType::CurrentPrologFlag,
            ("dynamic", 1) => BuiltInClauseType::Dynamic,
            ("==", 2) => BuiltInClauseType::Eq,
            ("fail", 0) | ("false", 0) => BuiltInClauseType::Fail,
            ("findall", 3) => BuiltInClauseType::Findall,
            ("functor", 3) => BuiltInClauseType::Functor,
            ("get_value", 2) => BuiltInClauseType::GetValue,
            ("halt", 0) => BuiltInClauseType::Halt,
            ("halt", 1) => BuiltInClauseType::HaltWithCode,
            ("is", 2) => BuiltInClauseType::Is,
            ("msort", 2) => BuiltInClauseType::MSort,
            ("nl", 0) => BuiltInClauseType::Nl,
            ("\\==", 2) => BuiltInClauseType::NotEq,
            ("\\=", 2) => BuiltInClauseType::NotUnifiable,
            ("number_codes", 2) => BuiltInClauseType::NumberCodes,
            ("op", 3) => BuiltInClauseType::Op,
            ("print", 1) => BuiltInClauseType::Print,
            ("$repl", 0) => BuiltInClauseType::Repl,
            ("retract", 1) => BuiltInClauseType::Retract,
            ("set_prolog_flag", 2) => BuiltInClauseType::SetPrologFlag,
            ("set_value", 2) => BuiltInClauseType::SetValue,
            ("sort", 2) => BuiltInClauseType::Sort,
            ("table", 1) => BuiltInClauseType::Table,
            ("throw", 1) => BuiltInClauseType::Throw,
            ("true", 0) => BuiltInClauseType::True,
            ("var", 1) => BuiltInClauseType::Type(TypeTest::Var),
            ("nonvar", 1) => BuiltInClauseType::Type(TypeTest::NonVar),
            ("atom", 1) => BuiltInClauseType::Type(TypeTest::Atom),
            ("number", 1) => BuiltInClauseType::Type(TypeTest::Number),
            ("integer", 1) => BuiltInClauseType::Type(TypeTest::Integer),
            ("float", 1) => BuiltInClauseType::Type(TypeTest::Float),
            ("atomic", 1) => BuiltInClauseType::Type(TypeTest::Atomic),
            ("compound", 1) => BuiltInClauseType::Type(TypeTest::Compound),
            ("callable", 1) => BuiltInClauseType::Type(TypeTest::Callable),
            ("is_list", 1) => BuiltInClauseType::Type(TypeTest::IsList),
            ("ground", 1) => BuiltInClauseType::Type(TypeTest::Ground),
            ("=", 2) => BuiltInClauseType::Unify,
            ("unify_with_occurs_check", 2) => BuiltInClauseType::UnifyWithOccursCheck,
            ("=..", 2) => BuiltInClauseType::Univ,
            ("write", 1) => BuiltInClauseType::Write,
            ("write_canonical", 1) => BuiltInClauseType::WriteCanonical,
            ("writeq", 1) => BuiltInClauseType::WriteQ,
            _ => return None,
        })
    }

    pub(crate) fn name(&self) -> Atom {
        match self {
            BuiltInClauseType::AbolishAllTables => atom!("abolish_all_tables"),
            BuiltInClauseType::Arg => atom!("arg"),
            BuiltInClauseType::Asserta => atom!("asserta"),
            BuiltInClauseType::Assertz => atom!("assertz"),
            BuiltInClauseType::AtomChars => atom!("atom_chars"),
            BuiltInClauseType::AtomCodes => atom!("atom_codes"),
            BuiltInClauseType::AtomLength => atom!("atom_length"),
            BuiltInClauseType::Compare => atom!("compare"),
            BuiltInClauseType::CompareNumber(qt) => qt.name(),
            BuiltInClauseType::CompareTerm(qt) => qt.name(),
            BuiltInClauseType::Consult => atom!("consult"),
            BuiltInClauseType::CopyTerm => atom!("copy_term"),
            BuiltInClauseType::CurrentPrologFlag => atom!("$current_prolog_flag"),
            BuiltInClauseType::Dynamic => atom!("dynamic"),
            BuiltInClauseType::Eq => atom!("=="),
            BuiltInClauseType::Fail => atom!("fail"),
            BuiltInClauseType::Findall => atom!("findall"),
            BuiltInClauseType::Functor => atom!("functor"),
            BuiltInClauseType::GetValue => atom!("get_value"),
            BuiltInClauseType::Halt | BuiltInClauseType::HaltWithCode => atom!("halt"),
            BuiltInClauseType::Is => atom!("is"),
            BuiltInClauseType::MSort => atom!("msort"),
            BuiltInClauseType::Nl => atom!("nl"),
            BuiltInClauseType::NotEq => atom!("\\=="),
            BuiltInClauseType::NotUnifiable => atom!("\\="),
            BuiltInClauseType::NumberCodes => atom!("number_codes"),
            BuiltInClauseType::Op => atom!("op"),
            BuiltInClauseType::Print => atom!("print"),
            BuiltInClauseType::Repl => atom!("$repl"),
            BuiltInClauseType::Retract => atom!("retract"),
            BuiltInClauseType::SetPrologFlag => atom!("set_prolog_flag"),
            BuiltInClauseType::SetValue => atom!("set_value"),
            BuiltInClauseType::Sort => atom!("sort"),
            BuiltInClauseType::Table => atom!("table"),
            BuiltInClauseType::Throw => atom!("throw"),
            BuiltInClauseType::True => atom!("true"),
            BuiltInClauseType::Type(test) => test.name(),
            BuiltInClauseType::Unify => atom!("="),
            BuiltInClauseType::UnifyWithOccursCheck => atom!("unify_with_occurs_check"),
            BuiltInClauseType::Univ => atom!("=.."),
            BuiltInClauseType::Write => atom!("write"),
            BuiltInClauseType::WriteCanonical => atom!("write_canonical"),
            BuiltInClauseType::WriteQ => atom!("writeq"),
        }
    }

    pub(crate) fn arity(&self) -> usize {
        match self {
            BuiltInClauseType::AbolishAllTables
            | BuiltInClauseType::Fail
            | BuiltInClauseType::Halt
            | BuiltInClauseType::Nl
            | BuiltInClauseType::Repl
            | BuiltInClauseType::True => 0,
            BuiltInClauseType::Asserta
            | BuiltInClauseType::Assertz
            | BuiltInClauseType::Consult
            | BuiltInClauseType::Dynamic
            | BuiltInClauseType::HaltWithCode
            | BuiltInClauseType::Print
            | BuiltInClauseType::Retract
            | BuiltInClauseType::Table
            | BuiltInClauseType::Throw
            | BuiltInClauseType::Type(_)
            | BuiltInClauseType::Write
            | BuiltInClauseType::WriteCanonical
            | BuiltInClauseType::WriteQ => 1,
            BuiltInClauseType::Arg
            | BuiltInClauseType::Compare
            | BuiltInClauseType::Findall
            | BuiltInClauseType::Functor
            | BuiltInClauseType::Op => 3,
            _ => 2,
        }
    }
}

/// Control constructs and predicates a program may not redefine.
pub(crate) fn is_protected(name: &str, arity: usize) -> bool {
    BuiltInClauseType::from(name, arity).is_some()
        || matches!(
            (name, arity),
            (",", 2) | (";", 2) | ("->", 2) | ("\\+", 1) | ("!", 0) | ("catch", 3)
        )
        || (name == "call" && arity >= 1)
}
