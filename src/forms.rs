use crate::atom_table::*;
use crate::machine::machine_errors::CompilationError;
use crate::parser::ast::*;

pub(crate) type PredicateKey = (Atom, usize); // name, arity.

/// The cut barrier of the clause itself, set on entry.
pub(crate) const LEVEL_VAR: &str = "$level";

/// The cut barrier of the enclosing clause, passed to the auxiliary
/// predicates of a disjunction or if-then-else as their last argument.
pub(crate) const PARENT_LEVEL_VAR: &str = "$parent_level";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Goal {
    /// A call to a predicate, a built-in or `call/N`.
    Call(Atom, Vec<Term>),
    /// A call to an auxiliary predicate of the clause.
    Aux(usize, Vec<Term>),
    /// Removes every choice point newer than the level held by the
    /// variable.
    Cut(String),
}

impl Goal {
    /// Is the goal a transfer of control to other clauses?
    pub(crate) fn is_call(&self) -> bool {
        match self {
            Goal::Call(name, args) => {
                name.as_str() == "call"
                    || crate::clause_types::BuiltInClauseType::from(name.as_str(), args.len()).is_none()
            }
            Goal::Aux(..) => true,
            Goal::Cut(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreClause {
    pub(crate) head: Vec<Term>,
    pub(crate) body: Vec<Goal>,
}

impl PreClause {
    #[inline]
    pub(crate) fn first_arg(&self) -> Option<&Term> {
        self.head.first()
    }
}

/// A control construct lifted out of a clause body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AuxPredicate {
    pub(crate) clauses: Vec<PreClause>,
    /// The argument position holding the parent's cut barrier.
    pub(crate) cut_param: Option<usize>,
}

/// Splits a clause term into its head and body.
pub(crate) fn clause_parts(term: Term) -> (Term, Option<Term>) {
    match term {
        Term::Clause(name, mut terms) if name.as_str() == ":-" && terms.len() == 2 => {
            let body = terms.pop();
            let head = terms.pop();

            match (head, body) {
                (Some(head), body) => (head, body),
                (None, _) => (Term::Clause(name, terms), None),
            }
        }
        term => (term, None),
    }
}

/// The predicate a clause term defines.
pub(crate) fn clause_key(term: &Term) -> Result<PredicateKey, CompilationError> {
    let head = match term {
        Term::Clause(name, terms) if name.as_str() == ":-" && terms.len() == 2 => &terms[0],
        term => term,
    };

    match head {
        Term::Clause(name, terms) => Ok((name.clone(), terms.len())),
        Term::Constant(Constant::Atom(name)) => Ok((name.clone(), 0)),
        Term::Constant(Constant::EmptyList) => Ok((atom!("[]"), 0)),
        Term::Cons(..) => Ok((atom!("."), 2)),
        _ => Err(CompilationError::InvalidRuleHead),
    }
}

fn head_args(head: Term) -> Result<Vec<Term>, CompilationError> {
    match head {
        Term::Clause(_, terms) => Ok(terms),
        Term::Constant(Constant::Atom(_)) | Term::Constant(Constant::EmptyList) => Ok(vec![]),
        Term::Cons(head, tail) => Ok(vec![*head, *tail]),
        _ => Err(CompilationError::InvalidRuleHead),
    }
}

fn is_control(term: &Term, name: &str, arity: usize) -> bool {
    matches!(term, Term::Clause(n, terms) if n.as_str() == name && terms.len() == arity)
}

/// Does a cut in `term` cut through to the enclosing clause? Cuts
/// under `\+` or `call/N` are local.
pub(crate) fn contains_cut(term: &Term) -> bool {
    match term {
        Term::Constant(Constant::Atom(name)) => name.as_str() == "!",
        Term::Clause(name, terms) if terms.len() == 2 => match name.as_str() {
            "," | ";" | "->" => terms.iter().any(contains_cut),
            _ => false,
        },
        _ => false,
    }
}

/// Normalizes the clauses of one predicate: bodies are flattened to
/// goal sequences and control constructs become auxiliary predicates
/// shared by all clauses.
#[derive(Debug, Default)]
pub(crate) struct Preprocessor {
    pub(crate) aux: Vec<AuxPredicate>,
}

impl Preprocessor {
    pub(crate) fn new() -> Self {
        Preprocessor::default()
    }

    pub(crate) fn clause(&mut self, term: Term) -> Result<PreClause, CompilationError> {
        let (head, body) = clause_parts(term);
        let head = head_args(head)?;

        let body = match body {
            Some(body) => self.body(body, LEVEL_VAR)?,
            None => vec![],
        };

        Ok(PreClause { head, body })
    }

    fn body(&mut self, term: Term, cut_var: &str) -> Result<Vec<Goal>, CompilationError> {
        let mut goals = vec![];

        for term in unfold_by_str(term, ",") {
            self.goal(term, cut_var, &mut goals)?;
        }

        Ok(goals)
    }

    fn goal(&mut self, term: Term, cut_var: &str, goals: &mut Vec<Goal>) -> Result<(), CompilationError> {
        match term {
            Term::Var(_) | Term::AnonVar => {
                goals.push(Goal::Call(atom!("call"), vec![term]));
            }
            Term::Constant(Constant::Atom(ref name)) if name.as_str() == "!" => {
                goals.push(Goal::Cut(cut_var.to_string()));
            }
            Term::Constant(Constant::Atom(name)) => {
                goals.push(Goal::Call(name, vec![]));
            }
            Term::Constant(Constant::EmptyList) => {
                goals.push(Goal::Call(atom!("[]"), vec![]));
            }
            Term::Constant(_) => return Err(CompilationError::InvalidRuleBody),
            Term::Cons(head, tail) => {
                goals.push(Goal::Call(atom!("."), vec![*head, *tail]));
            }
            Term::Clause(name, mut terms) => match (name.as_str(), terms.len()) {
                (",", 2) => {
                    let rhs = terms.pop();
                    let lhs = terms.pop();

                    for term in lhs.into_iter().chain(rhs) {
                        self.goal(term, cut_var, goals)?;
                    }
                }
                (";", 2) => {
                    let goal = self.disjunction(Term::Clause(name, terms), cut_var)?;
                    goals.push(goal);
                }
                ("->", 2) => {
                    let ite = Term::Clause(atom!(";"), vec![Term::Clause(name, terms), Term::atom("fail")]);
                    let goal = self.disjunction(ite, cut_var)?;
                    goals.push(goal);
                }
                ("\\+", 1) => {
                    let goal = self.negation(terms.pop().unwrap_or(Term::AnonVar))?;
                    goals.push(goal);
                }
                _ => goals.push(Goal::Call(name, terms)),
            },
        }

        Ok(())
    }

    fn aux_call(&mut self, construct: &Term, bodies: Vec<Vec<Goal>>, cut_var: &str) -> Goal {
        let vars = construct.vars();

        let transparent = bodies
            .iter()
            .any(|body| body.iter().any(|goal| goal_mentions(goal, PARENT_LEVEL_VAR)));

        let mut args: Vec<Term> = vars.iter().map(|var| Term::Var(var.clone())).collect();

        let mut head = args.clone();
        let mut cut_param = None;

        if transparent {
            args.push(Term::Var(cut_var.to_string()));
            head.push(Term::Var(PARENT_LEVEL_VAR.to_string()));
            cut_param = Some(head.len());
        }

        let clauses = bodies
            .into_iter()
            .map(|body| PreClause { head: head.clone(), body })
            .collect();

        self.aux.push(AuxPredicate { clauses, cut_param });
        Goal::Aux(self.aux.len() - 1, args)
    }

    // the condition of an if-then-else is opaque to cut.
    fn condition(&mut self, cond: Term) -> Result<Vec<Goal>, CompilationError> {
        if contains_cut(&cond) {
            Ok(vec![Goal::Call(atom!("call"), vec![cond])])
        } else {
            self.body(cond, PARENT_LEVEL_VAR)
        }
    }

    fn disjunction(&mut self, term: Term, cut_var: &str) -> Result<Goal, CompilationError> {
        let construct = term.clone();
        let mut bodies = vec![];
        let mut rest = term;

        loop {
            match rest {
                Term::Clause(name, mut terms) if name.as_str() == ";" && terms.len() == 2 => {
                    let rhs = terms.pop().unwrap_or(Term::AnonVar);
                    let lhs = terms.pop().unwrap_or(Term::AnonVar);

                    if is_control(&lhs, "->", 2) {
                        bodies.extend(self.if_then_else(lhs, rhs)?);
                        break;
                    }

                    bodies.push(self.body(lhs, PARENT_LEVEL_VAR)?);
                    rest = rhs;
                }
                term => {
                    bodies.push(self.body(term, PARENT_LEVEL_VAR)?);
                    break;
                }
            }
        }

        Ok(self.aux_call(&construct, bodies, cut_var))
    }

    fn if_then_else(&mut self, ite: Term, els: Term) -> Result<Vec<Vec<Goal>>, CompilationError> {
        let (cond, then) = match ite {
            Term::Clause(_, mut terms) => {
                let then = terms.pop().unwrap_or(Term::AnonVar);
                let cond = terms.pop().unwrap_or(Term::AnonVar);
                (cond, then)
            }
            term => (term, Term::atom("true")),
        };

        let mut first = self.condition(cond)?;

        first.push(Goal::Cut(LEVEL_VAR.to_string()));
        first.extend(self.body(then, PARENT_LEVEL_VAR)?);

        let second = self.body(els, PARENT_LEVEL_VAR)?;

        Ok(vec![first, second])
    }

    fn negation(&mut self, goal: Term) -> Result<Goal, CompilationError> {
        let construct = goal.clone();

        let mut first = if contains_cut(&goal) {
            vec![Goal::Call(atom!("call"), vec![goal])]
        } else {
            self.body(goal, PARENT_LEVEL_VAR)?
        };

        first.push(Goal::Cut(LEVEL_VAR.to_string()));
        first.push(Goal::Call(atom!("fail"), vec![]));

        Ok(self.aux_call(&construct, vec![first, vec![]], LEVEL_VAR))
    }
}

/// Does the goal refer to the named variable?
pub(crate) fn goal_mentions(goal: &Goal, var: &str) -> bool {
    match goal {
        Goal::Cut(v) => v == var,
        Goal::Call(_, args) | Goal::Aux(_, args) => args.iter().any(|arg| arg.vars().iter().any(|v| v == var)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_single_term;

    fn read(src: &str) -> Term {
        read_single_term(src, &default_op_dir()).unwrap().unwrap()
    }

    #[test]
    fn conjunctions_flatten() {
        let mut pp = Preprocessor::new();
        let clause = pp.clause(read("p(X) :- q(X), (r, s), !.")).unwrap();

        assert_eq!(clause.head, vec![Term::Var("X".into())]);
        assert_eq!(clause.body.len(), 4);
        assert_eq!(clause.body[3], Goal::Cut(LEVEL_VAR.to_string()));
        assert!(pp.aux.is_empty());
    }

    #[test]
    fn if_then_else_becomes_auxiliary_predicate() {
        let mut pp = Preprocessor::new();
        let clause = pp.clause(read("max(X, Y, Z) :- ( X >= Y -> Z = X ; Z = Y ).")).unwrap();

        assert_eq!(clause.body.len(), 1);
        assert!(matches!(&clause.body[0], Goal::Aux(0, args) if args.len() == 3));

        let aux = &pp.aux[0];

        assert_eq!(aux.clauses.len(), 2);
        assert_eq!(aux.cut_param, None);
        assert_eq!(aux.clauses[0].body[1], Goal::Cut(LEVEL_VAR.to_string()));
    }

    #[test]
    fn cut_in_disjunction_is_transparent() {
        let mut pp = Preprocessor::new();
        let clause = pp.clause(read("p(X) :- ( X = 1, ! ; X = 2 ).")).unwrap();

        match &clause.body[0] {
            Goal::Aux(0, args) => assert_eq!(args.last(), Some(&Term::Var(LEVEL_VAR.to_string()))),
            goal => panic!("unexpected goal {:?}", goal),
        }

        let aux = &pp.aux[0];

        assert_eq!(aux.cut_param, Some(2));
        assert_eq!(aux.clauses[0].body[1], Goal::Cut(PARENT_LEVEL_VAR.to_string()));
    }

    #[test]
    fn cut_in_condition_is_local() {
        let mut pp = Preprocessor::new();
        pp.clause(read("p :- ( (a, !) -> b ; c ).")).unwrap();

        match &pp.aux[0].clauses[0].body[0] {
            Goal::Call(name, args) => {
                assert_eq!(name.as_str(), "call");
                assert_eq!(args.len(), 1);
            }
            goal => panic!("unexpected goal {:?}", goal),
        }
    }

    #[test]
    fn invalid_clauses_are_rejected() {
        let mut pp = Preprocessor::new();

        assert!(matches!(pp.clause(read("X :- true.")), Err(CompilationError::InvalidRuleHead)));
        assert!(matches!(pp.clause(read("p :- 3.")), Err(CompilationError::InvalidRuleBody)));
    }
}
