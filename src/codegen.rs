use crate::clause_types::*;
use crate::forms::*;
use crate::indexing::*;
use crate::instructions::*;
use crate::machine::machine_errors::CompilationError;
use crate::machine::machine_indices::*;
use crate::parser::ast::*;

use fxhash::{FxBuildHasher, FxHashSet};
use indexmap::IndexMap;

type VarCounts = IndexMap<String, usize, FxBuildHasher>;

fn count_vars(term: &Term, counts: &mut VarCounts) {
    for var in term.vars_with_multiplicity() {
        *counts.entry(var).or_insert(0) += 1;
    }
}

/// Compiles one clause at a time. Every variable occurring more than
/// once gets an environment slot; the rest are void.
#[derive(Debug, Default)]
pub(crate) struct CodeGenerator {
    slots: IndexMap<String, usize, FxBuildHasher>,
    seen: FxHashSet<String>,
}

impl CodeGenerator {
    pub(crate) fn new() -> Self {
        CodeGenerator::default()
    }

    fn code_term(&mut self, term: &Term) -> CodeTerm {
        match term {
            Term::AnonVar => CodeTerm::Void,
            Term::Var(name) => match self.slots.get(name) {
                Some(&slot) => CodeTerm::Var(slot, self.seen.insert(name.clone())),
                None => CodeTerm::Void,
            },
            Term::Constant(c) => CodeTerm::Con(c.clone()),
            Term::Clause(name, terms) if name.as_str() == "." && terms.len() == 2 => {
                let head = self.code_term(&terms[0]);
                let tail = self.code_term(&terms[1]);

                CodeTerm::Lis(Box::new(head), Box::new(tail))
            }
            Term::Clause(name, terms) => {
                CodeTerm::Str(name.clone(), terms.iter().map(|term| self.code_term(term)).collect())
            }
            Term::Cons(..) => {
                let mut heads = vec![];
                let mut tail = term;

                // long list literals are walked along the spine.
                while let Term::Cons(head, rest) = tail {
                    heads.push(self.code_term(head));
                    tail = rest;
                }

                let tail = self.code_term(tail);

                heads
                    .into_iter()
                    .rev()
                    .fold(tail, |tail, head| CodeTerm::Lis(Box::new(head), Box::new(tail)))
            }
        }
    }

    fn put_args(&mut self, args: &[Term], code: &mut Vec<Instruction>) {
        for (i, arg) in args.iter().enumerate() {
            let term = self.code_term(arg);
            code.push(Instruction::PutArg(i + 1, term));
        }
    }

    pub(crate) fn compile_clause(&mut self, clause: &PreClause, cut_param: Option<usize>) -> Vec<Instruction> {
        self.slots.clear();
        self.seen.clear();

        let mut counts = VarCounts::with_hasher(FxBuildHasher::default());

        for arg in &clause.head {
            count_vars(arg, &mut counts);
        }

        // a cut before the first call cuts straight to B0.
        let mut neck_cuts = vec![false; clause.body.len()];
        let mut called = false;

        for (i, goal) in clause.body.iter().enumerate() {
            match goal {
                Goal::Cut(var) if var == LEVEL_VAR && !called => neck_cuts[i] = true,
                Goal::Cut(var) => *counts.entry(var.clone()).or_insert(0) += 1,
                Goal::Call(_, args) | Goal::Aux(_, args) => {
                    for arg in args {
                        count_vars(arg, &mut counts);
                    }
                }
            }

            called = called || goal.is_call();
        }

        for (var, count) in &counts {
            if *count > 1 || var == LEVEL_VAR {
                let slot = self.slots.len() + 1;
                self.slots.insert(var.clone(), slot);
            }
        }

        let last = clause.body.len().checked_sub(1);

        let needs_frame = !self.slots.is_empty()
            || clause
                .body
                .iter()
                .enumerate()
                .any(|(i, goal)| Some(i) != last && goal.is_call());

        let transparent = clause
            .body
            .iter()
            .any(|goal| goal_mentions(goal, PARENT_LEVEL_VAR));

        let scope = match cut_param {
            Some(arg) if transparent => CutScope::Param(arg),
            _ if self.slots.contains_key(LEVEL_VAR) => CutScope::Own,
            _ => CutScope::None,
        };

        let mut code = vec![];

        if needs_frame {
            code.push(Instruction::Allocate(self.slots.len(), scope));
        }

        if let Some(&slot) = self.slots.get(LEVEL_VAR) {
            self.seen.insert(LEVEL_VAR.to_string());
            code.push(Instruction::GetLevel(slot));
        }

        for (i, arg) in clause.head.iter().enumerate() {
            match self.code_term(arg) {
                CodeTerm::Void => {}
                term => code.push(Instruction::GetArg(i + 1, term)),
            }
        }

        let mut executed = false;

        for (i, goal) in clause.body.iter().enumerate() {
            let is_last = Some(i) == last;

            match goal {
                Goal::Cut(var) => match self.slots.get(var) {
                    Some(&slot) if !neck_cuts[i] => code.push(Instruction::Cut(slot)),
                    _ => code.push(Instruction::NeckCut),
                },
                Goal::Call(name, args) => {
                    self.put_args(args, &mut code);

                    let arity = args.len();

                    if name.as_str() == "call" && arity > 0 {
                        if is_last {
                            if needs_frame {
                                code.push(Instruction::Deallocate);
                            }

                            code.push(Instruction::ExecuteN(arity));
                            executed = true;
                        } else {
                            code.push(Instruction::CallN(arity));
                        }
                    } else if let Some(ct) = BuiltInClauseType::from(name.as_str(), arity) {
                        code.push(Instruction::CallBuiltIn(ct));
                    } else {
                        let target = CallTarget::Key((name.clone(), arity));
                        executed = self.add_call(target, arity, is_last, needs_frame, &mut code);
                    }
                }
                Goal::Aux(id, args) => {
                    self.put_args(args, &mut code);
                    executed = self.add_call(CallTarget::Aux(*id), args.len(), is_last, needs_frame, &mut code);
                }
            }
        }

        if !executed {
            if needs_frame {
                code.push(Instruction::Deallocate);
            }

            code.push(Instruction::Proceed);
        }

        code
    }

    fn add_call(
        &mut self,
        target: CallTarget,
        arity: usize,
        is_last: bool,
        needs_frame: bool,
        code: &mut Vec<Instruction>,
    ) -> bool {
        if is_last {
            if needs_frame {
                code.push(Instruction::Deallocate);
            }

            code.push(Instruction::Execute(target, arity));
            true
        } else {
            code.push(Instruction::Call(target, arity));
            false
        }
    }

    /// Lays out the clauses of one predicate starting at `origin +
    /// code.len()`, behind a first argument switch if there is more
    /// than one.
    fn compile_block(
        &mut self,
        clauses: &[PreClause],
        cut_param: Option<usize>,
        origin: CodePtr,
        code: &mut Vec<Instruction>,
    ) {
        match clauses {
            [] => code.push(Instruction::Fail),
            [clause] => {
                let clause_code = self.compile_clause(clause, cut_param);
                code.extend(clause_code);
            }
            _ => {
                let compiled: Vec<_> = clauses
                    .iter()
                    .map(|clause| self.compile_clause(clause, cut_param))
                    .collect();

                let mut offsets = CodeOffsets::new();
                let mut entry = origin + (code.len() + 1);

                for (clause, clause_code) in clauses.iter().zip(&compiled) {
                    offsets.index_term(clause.first_arg(), entry);
                    entry += clause_code.len();
                }

                let cuts = clauses.iter().any(clause_cuts);

                code.push(Instruction::SwitchOnTerm(Box::new(offsets.compute_indices(cuts))));

                for clause_code in compiled {
                    code.extend(clause_code);
                }
            }
        }
    }
}

#[inline]
fn clause_cuts(clause: &PreClause) -> bool {
    clause.body.iter().any(|goal| goal_mentions(goal, LEVEL_VAR))
}

// lays out `clauses` at `origin`, followed by the auxiliary predicates
// of their control constructs.
fn compile_with_aux(preprocessor: &Preprocessor, clauses: &[PreClause], origin: CodePtr) -> Vec<Instruction> {
    let mut cg = CodeGenerator::new();
    let mut code = vec![];

    cg.compile_block(clauses, None, origin, &mut code);

    let mut aux_entries = Vec::with_capacity(preprocessor.aux.len());

    for aux in &preprocessor.aux {
        aux_entries.push(origin + code.len());
        cg.compile_block(&aux.clauses, aux.cut_param, origin, &mut code);
    }

    for instr in &mut code {
        instr.resolve_aux(&aux_entries);
    }

    code
}

/// Compiles the clauses of a predicate, together with the auxiliary
/// predicates of their control constructs, into code placed at
/// `origin`.
pub(crate) fn compile_predicate(clauses: &[Term], origin: CodePtr) -> Result<Vec<Instruction>, CompilationError> {
    let mut preprocessor = Preprocessor::new();
    let mut preclauses = Vec::with_capacity(clauses.len());

    for clause in clauses {
        preclauses.push(preprocessor.clause(clause.clone())?);
    }

    Ok(compile_with_aux(&preprocessor, &preclauses, origin))
}

/// A clause of a dynamic predicate compiled on its own, with what the
/// first argument index needs to know of it.
#[derive(Debug)]
pub(crate) struct CompiledClause {
    pub(crate) code: Vec<Instruction>,
    pub(crate) key: OptArgIndexKey,
    pub(crate) cuts: bool,
}

pub(crate) fn compile_clause(clause: &Term, origin: CodePtr) -> Result<CompiledClause, CompilationError> {
    let mut preprocessor = Preprocessor::new();
    let preclause = preprocessor.clause(clause.clone())?;

    let key = OptArgIndexKey::of(preclause.first_arg());
    let cuts = clause_cuts(&preclause);
    let code = compile_with_aux(&preprocessor, std::slice::from_ref(&preclause), origin);

    Ok(CompiledClause { code, key, cuts })
}

/// Compiles `?- Goal` as the clause `'$query'(Vars) :- Goal`.
pub(crate) fn compile_query(goal: Term, vars: &[String], origin: CodePtr) -> Result<Vec<Instruction>, CompilationError> {
    let head = Term::Clause(
        atom!("$query"),
        vars.iter().map(|var| Term::Var(var.clone())).collect(),
    );

    let clause = if vars.is_empty() {
        Term::Clause(atom!(":-"), vec![Term::atom("$query"), goal])
    } else {
        Term::Clause(atom!(":-"), vec![head, goal])
    };

    compile_predicate(&[clause], origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_terms;

    fn compile(src: &str) -> Vec<Instruction> {
        let clauses = read_terms(src, &default_op_dir()).unwrap();
        compile_predicate(&clauses, CodePtr::Dir(100)).unwrap()
    }

    #[test]
    fn facts_without_shared_variables_need_no_frame() {
        let code = compile("p(a, _).");

        assert!(matches!(code[0], Instruction::GetArg(1, CodeTerm::Con(_))));
        assert!(matches!(code[1], Instruction::Proceed));
        assert_eq!(code.len(), 2);
    }

    #[test]
    fn last_call_deallocates_before_execute() {
        let code = compile("len([_|T], N) :- len(T, M), N is M + 1.");

        assert!(matches!(code[0], Instruction::Allocate(3, CutScope::None)));
        assert!(matches!(code.last(), Some(Instruction::Proceed)));

        let code = compile("app([H|T], L, [H|R]) :- app(T, L, R).");
        let n = code.len();

        assert!(matches!(code[n - 2], Instruction::Deallocate));
        assert!(matches!(code[n - 1], Instruction::Execute(CallTarget::Key(_), 3)));
    }

    #[test]
    fn several_clauses_are_switched_on() {
        let code = compile("m(X, [X|_]). m(X, [_|T]) :- m(X, T).");

        match &code[0] {
            Instruction::SwitchOnTerm(table) => {
                assert_eq!(table.all.len(), 2);
                assert_eq!(table.all[0], CodePtr::Dir(101));
                assert!(!table.cuts);
            }
            instr => panic!("unexpected {:?}", instr),
        }
    }

    #[test]
    fn cut_before_any_call_is_a_neck_cut() {
        let code = compile("f(X, Y) :- X > 0, !, Y = pos. f(_, neg).");

        assert!(code.iter().any(|instr| matches!(instr, Instruction::NeckCut)));
        assert!(!code.iter().any(|instr| matches!(instr, Instruction::GetLevel(_))));

        let code = compile("g(X) :- h(X), !.");

        assert!(matches!(code[0], Instruction::Allocate(2, CutScope::Own)));
        assert!(matches!(code[1], Instruction::GetLevel(_)));
        assert!(code.iter().any(|instr| matches!(instr, Instruction::Cut(_))));
    }

    #[test]
    fn auxiliary_calls_are_resolved() {
        let code = compile("p(X) :- ( X = 1 ; X = 2 ), q(X).");

        assert!(code.iter().any(|instr| matches!(instr, Instruction::Call(CallTarget::Direct(_), 1))));
        assert!(!code.iter().any(|instr| matches!(
            instr,
            Instruction::Call(CallTarget::Aux(_), _) | Instruction::Execute(CallTarget::Aux(_), _)
        )));
    }
}
