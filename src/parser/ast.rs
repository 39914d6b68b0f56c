use crate::atom_table::*;

use fxhash::FxBuildHasher;
use lazy_static::lazy_static;
use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use std::fmt;
use std::io::Error as IOError;

pub type Specifier = u32;

pub const MAX_ARITY: usize = 1023;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum OpDeclSpec {
    XFX = 0x0001,
    XFY = 0x0002,
    YFX = 0x0004,
    XF = 0x0010,
    YF = 0x0020,
    FX = 0x0040,
    FY = 0x0080,
}

pub use OpDeclSpec::*;

impl OpDeclSpec {
    pub fn get_spec(self) -> Atom {
        match self {
            XFX => atom!("xfx"),
            XFY => atom!("xfy"),
            YFX => atom!("yfx"),
            FX => atom!("fx"),
            FY => atom!("fy"),
            XF => atom!("xf"),
            YF => atom!("yf"),
        }
    }

    pub const fn is_prefix(self) -> bool {
        matches!(self, Self::FX | Self::FY)
    }

    pub const fn is_postfix(self) -> bool {
        matches!(self, Self::XF | Self::YF)
    }

    pub const fn is_infix(self) -> bool {
        matches!(self, Self::XFX | Self::XFY | Self::YFX)
    }

    #[inline]
    pub(crate) fn fixity(self) -> Fixity {
        match self {
            XFY | XFX | YFX => Fixity::In,
            XF | YF => Fixity::Post,
            FX | FY => Fixity::Pre,
        }
    }

    /// Maximum priorities of the (left, right) operands.
    pub fn arg_priorities(self, prec: u16) -> (u16, u16) {
        let less = prec.saturating_sub(1);

        match self {
            XFX => (less, less),
            XFY => (less, prec),
            YFX => (prec, less),
            FX | XF => (less, less),
            FY | YF => (prec, prec),
        }
    }
}

impl TryFrom<&str> for OpDeclSpec {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(match value {
            "xfx" => XFX,
            "xfy" => XFY,
            "yfx" => YFX,
            "fx" => FX,
            "fy" => FY,
            "xf" => XF,
            "yf" => YF,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fixity {
    In,
    Post,
    Pre,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpDesc {
    prec: u16,
    spec: OpDeclSpec,
}

impl OpDesc {
    #[inline]
    pub fn build_with(prec: u16, spec: OpDeclSpec) -> Self {
        OpDesc { prec, spec }
    }

    #[inline]
    pub fn get(self) -> (u16, OpDeclSpec) {
        (self.prec, self.spec)
    }

    #[inline]
    pub fn get_prec(self) -> u16 {
        self.prec
    }

    #[inline]
    pub fn get_spec(self) -> OpDeclSpec {
        self.spec
    }
}

pub type OpDir = IndexMap<(Atom, Fixity), OpDesc, FxBuildHasher>;

fn build_default_op_dir() -> OpDir {
    let mut op_dir = OpDir::with_hasher(FxBuildHasher::default());

    let table: &[(&str, u16, OpDeclSpec)] = &[
        (":-", 1200, XFX),
        ("-->", 1200, XFX),
        (":-", 1200, FX),
        ("?-", 1200, FX),
        ("dynamic", 1150, FX),
        ("table", 1150, FX),
        (";", 1100, XFY),
        ("|", 1100, XFY),
        ("->", 1050, XFY),
        ("*->", 1050, XFY),
        (",", 1000, XFY),
        ("\\+", 900, FY),
        ("=", 700, XFX),
        ("\\=", 700, XFX),
        ("==", 700, XFX),
        ("\\==", 700, XFX),
        ("@<", 700, XFX),
        ("@>", 700, XFX),
        ("@=<", 700, XFX),
        ("@>=", 700, XFX),
        ("=..", 700, XFX),
        ("is", 700, XFX),
        ("=:=", 700, XFX),
        ("=\\=", 700, XFX),
        ("<", 700, XFX),
        (">", 700, XFX),
        ("=<", 700, XFX),
        (">=", 700, XFX),
        (":", 200, XFY),
        ("+", 500, YFX),
        ("-", 500, YFX),
        ("/\\", 500, YFX),
        ("\\/", 500, YFX),
        ("xor", 500, YFX),
        ("*", 400, YFX),
        ("/", 400, YFX),
        ("//", 400, YFX),
        ("rem", 400, YFX),
        ("mod", 400, YFX),
        ("<<", 400, YFX),
        (">>", 400, YFX),
        ("**", 200, XFX),
        ("^", 200, XFY),
        ("-", 200, FY),
        ("+", 200, FY),
        ("\\", 200, FY),
    ];

    for &(name, prec, spec) in table {
        op_dir.insert((atom!(name), spec.fixity()), OpDesc::build_with(prec, spec));
    }

    op_dir
}

lazy_static! {
    static ref DEFAULT_OP_DIR: OpDir = build_default_op_dir();
}

/// The operators every machine starts with.
pub fn default_op_dir() -> OpDir {
    DEFAULT_OP_DIR.clone()
}

/// Atomic values. `Usize` holds cut barriers and never comes out of
/// the reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Atom(Atom),
    Fixnum(i64),
    Float(OrderedFloat<f64>),
    EmptyList,
    Usize(usize),
}

impl Constant {
    #[inline]
    pub fn to_atom(&self) -> Option<Atom> {
        match self {
            Constant::Atom(a) => Some(a.clone()),
            Constant::EmptyList => Some(atom!("[]")),
            _ => None,
        }
    }
}

impl From<Atom> for Constant {
    #[inline]
    fn from(atom: Atom) -> Self {
        Constant::Atom(atom)
    }
}

impl From<i64> for Constant {
    #[inline]
    fn from(n: i64) -> Self {
        Constant::Fixnum(n)
    }
}

impl From<f64> for Constant {
    #[inline]
    fn from(f: f64) -> Self {
        Constant::Float(OrderedFloat(f))
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Constant::Atom(atom) => write!(f, "{}", atom),
            Constant::Fixnum(n) => write!(f, "{}", n),
            Constant::Float(OrderedFloat(fl)) => write!(f, "{}", format_float(*fl)),
            Constant::EmptyList => write!(f, "[]"),
            Constant::Usize(u) => write!(f, "{}", u),
        }
    }
}

pub(crate) fn format_float(fl: f64) -> String {
    if fl.is_finite() && fl == fl.trunc() && fl.abs() < 1e15 {
        format!("{:.1}", fl)
    } else {
        format!("{}", fl)
    }
}

/// A term as read from source text.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    AnonVar,
    Clause(Atom, Vec<Term>),
    Cons(Box<Term>, Box<Term>),
    Constant(Constant),
    Var(String),
}

impl Term {
    #[inline]
    pub fn atom(name: &str) -> Term {
        Term::Constant(Constant::Atom(atom!(name)))
    }

    pub fn name(&self) -> Option<Atom> {
        match self {
            Term::Constant(Constant::Atom(atom)) | Term::Clause(atom, _) => Some(atom.clone()),
            Term::Constant(Constant::EmptyList) => Some(atom!("[]")),
            Term::Cons(..) => Some(atom!(".")),
            _ => None,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Term::Clause(_, terms) => terms.len(),
            Term::Cons(..) => 2,
            _ => 0,
        }
    }

    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Term::Clause(..) | Term::Constant(Constant::Atom(_)) | Term::Constant(Constant::EmptyList)
        )
    }

    pub fn first_arg(&self) -> Option<&Term> {
        match self {
            Term::Clause(_, terms) => terms.first(),
            Term::Cons(head, _) => Some(head),
            _ => None,
        }
    }

    /// Collects the named variables of the term in order of first
    /// occurrence.
    pub fn vars(&self) -> Vec<String> {
        let mut vars = vec![];
        let mut stack = vec![self];

        while let Some(term) = stack.pop() {
            match term {
                Term::Var(name) => {
                    if !vars.contains(name) {
                        vars.push(name.clone());
                    }
                }
                Term::Clause(_, terms) => stack.extend(terms.iter().rev()),
                Term::Cons(head, tail) => {
                    stack.push(tail);
                    stack.push(head);
                }
                _ => {}
            }
        }

        vars
    }

    /// Every occurrence of a named variable, in order.
    pub fn vars_with_multiplicity(&self) -> Vec<String> {
        let mut vars = vec![];
        let mut stack = vec![self];

        while let Some(term) = stack.pop() {
            match term {
                Term::Var(name) => vars.push(name.clone()),
                Term::Clause(_, terms) => stack.extend(terms.iter().rev()),
                Term::Cons(head, tail) => {
                    stack.push(tail);
                    stack.push(head);
                }
                _ => {}
            }
        }

        vars
    }
}

pub fn unfold_by_str(mut term: Term, s: &str) -> Vec<Term> {
    let mut terms = vec![];

    loop {
        match term {
            Term::Clause(ref name, ref mut subterms) if name.as_str() == s && subterms.len() == 2 => {
                let snd = subterms.pop();
                let fst = subterms.pop();

                match (fst, snd) {
                    (Some(fst), Some(snd)) => {
                        terms.push(fst);
                        term = snd;
                    }
                    _ => break,
                }
            }
            _ => break,
        }
    }

    terms.push(term);
    terms
}

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("incomplete reduction at line {0}, column {1}")]
    IncompleteReduction(usize, usize),
    #[error("invalid escape sequence at line {0}, column {1}")]
    InvalidEscape(usize, usize),
    #[error("I/O error: {0}")]
    IO(#[from] IOError),
    #[error("missing quote at line {0}, column {1}")]
    MissingQuote(usize, usize),
    #[error("cannot parse number at line {0}, column {1}")]
    ParseNumber(usize, usize),
    #[error("unexpected character {0:?} at line {1}, column {2}")]
    UnexpectedChar(char, usize, usize),
    #[error("unexpected end of file at line {0}")]
    UnexpectedEOF(usize),
    #[error("arity exceeds {MAX_ARITY} at line {0}")]
    ExceededMaxArity(usize),
}

impl ParserError {
    pub fn line_and_col_num(&self) -> Option<(usize, usize)> {
        match self {
            &ParserError::IncompleteReduction(line_num, col_num)
            | &ParserError::InvalidEscape(line_num, col_num)
            | &ParserError::MissingQuote(line_num, col_num)
            | &ParserError::ParseNumber(line_num, col_num)
            | &ParserError::UnexpectedChar(_, line_num, col_num) => Some((line_num, col_num)),
            &ParserError::UnexpectedEOF(line_num) | &ParserError::ExceededMaxArity(line_num) => {
                Some((line_num, 0))
            }
            ParserError::IO(_) => None,
        }
    }

    pub fn as_atom(&self) -> Atom {
        match self {
            ParserError::IncompleteReduction(..) => atom!("incomplete_reduction"),
            ParserError::InvalidEscape(..) => atom!("invalid_escape_sequence"),
            ParserError::IO(_) => atom!("input_output_error"),
            ParserError::MissingQuote(..) => atom!("missing_quote"),
            ParserError::ParseNumber(..) => atom!("cannot_parse_number"),
            ParserError::UnexpectedChar(..) => atom!("unexpected_char"),
            ParserError::UnexpectedEOF(..) => atom!("unexpected_end_of_file"),
            ParserError::ExceededMaxArity(..) => atom!("max_arity"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfold_conjunction() {
        let conj = Term::Clause(
            atom!(","),
            vec![
                Term::atom("a"),
                Term::Clause(atom!(","), vec![Term::atom("b"), Term::atom("c")]),
            ],
        );

        assert_eq!(
            unfold_by_str(conj, ","),
            vec![Term::atom("a"), Term::atom("b"), Term::atom("c")]
        );
    }

    #[test]
    fn vars_in_first_occurrence_order() {
        let term = Term::Clause(
            atom!("f"),
            vec![
                Term::Var("Y".into()),
                Term::Cons(Box::new(Term::Var("X".into())), Box::new(Term::Var("Y".into()))),
                Term::AnonVar,
            ],
        );

        assert_eq!(term.vars(), vec!["Y".to_string(), "X".to_string()]);
    }
}
