use crate::arithmetic;
use crate::atom_table::*;
use crate::clause_types::*;
use crate::forms::*;
use crate::heap_print::*;
use crate::machine::code_repo::*;
use crate::machine::copier::*;
use crate::machine::heap::*;
use crate::machine::loader::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;
use crate::machine::Machine;
use crate::parser::ast::*;
use crate::parser::parser::Parser;
use crate::parser::read_single_term;
use crate::read::*;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use std::cmp::Ordering;
use std::sync::Arc;

/// The shape of a list term.
pub(crate) enum ListItems {
    Proper(Vec<Addr>),
    /// The list ends in an unbound variable.
    Partial,
    Improper,
}

impl MachineState {
    /// The elements of a list term. Cyclic lists are improper.
    pub(crate) fn list_items(&self, addr: Addr) -> ListItems {
        let mut items = vec![];
        let mut addr = addr;

        loop {
            match self.deref(addr) {
                Addr::Con(Constant::EmptyList) => return ListItems::Proper(items),
                Addr::Lis(l) => {
                    if items.len() > self.heap.len() {
                        return ListItems::Improper;
                    }

                    items.push(self.heap[l].as_addr(l));
                    addr = self.heap[l + 1].as_addr(l + 1);
                }
                Addr::HeapCell(_) => return ListItems::Partial,
                _ => return ListItems::Improper,
            }
        }
    }

    fn proper_list(&self, addr: Addr, context: &PredicateKey) -> Result<Vec<Addr>, MachineStub> {
        match self.list_items(addr.clone()) {
            ListItems::Proper(items) => Ok(items),
            ListItems::Partial => Err(self.error_form(self.instantiation_error(), context)),
            ListItems::Improper => {
                let err = self.type_error(ValidType::List, self.deref(addr));
                Err(self.error_form(err, context))
            }
        }
    }

    /// Unifies `a` and `b` with every binding trailed, then undoes the
    /// bindings unless unification succeeded and `keep` is set.
    pub(crate) fn trial_unify(&mut self, a: Addr, b: Addr, keep: bool) -> bool {
        let saved_hb = self.hb;
        let tr = self.trail.len();

        self.hb = self.heap.len();
        self.unify(a, b);

        let unified = !self.fail;
        self.fail = false;

        if !unified || !keep {
            self.unwind_trail(tr);
        }

        self.hb = saved_hb;
        unified
    }

    fn atom_arg(&self, addr: Addr, context: &PredicateKey) -> Result<Atom, MachineStub> {
        match self.deref(addr) {
            Addr::HeapCell(_) => Err(self.error_form(self.instantiation_error(), context)),
            Addr::Con(Constant::Atom(name)) => Ok(name),
            addr => Err(self.error_form(self.type_error(ValidType::Atom, addr), context)),
        }
    }

    fn integer_arg(&self, addr: Addr, context: &PredicateKey) -> Result<i64, MachineStub> {
        match self.deref(addr) {
            Addr::HeapCell(_) => Err(self.error_form(self.instantiation_error(), context)),
            Addr::Con(Constant::Fixnum(n)) => Ok(n),
            addr => Err(self.error_form(self.type_error(ValidType::Integer, addr), context)),
        }
    }

    fn type_test(&self, test: TypeTest) -> bool {
        let addr = self.deref_register(1);

        match test {
            TypeTest::Var => addr.is_ref(),
            TypeTest::NonVar => !addr.is_ref(),
            TypeTest::Atom => matches!(addr, Addr::Con(Constant::Atom(_)) | Addr::Con(Constant::EmptyList)),
            TypeTest::Number => matches!(addr, Addr::Con(Constant::Fixnum(_)) | Addr::Con(Constant::Float(_))),
            TypeTest::Integer => matches!(addr, Addr::Con(Constant::Fixnum(_))),
            TypeTest::Float => matches!(addr, Addr::Con(Constant::Float(_))),
            TypeTest::Atomic => matches!(addr, Addr::Con(_)),
            TypeTest::Compound => addr.is_compound(),
            TypeTest::Callable => {
                addr.is_compound() || matches!(addr, Addr::Con(Constant::Atom(_)) | Addr::Con(Constant::EmptyList))
            }
            TypeTest::IsList => matches!(self.list_items(addr), ListItems::Proper(_)),
            TypeTest::Ground => self.is_ground(addr),
        }
    }

    fn arg(&mut self, context: &PredicateKey) -> CallResult {
        let n = self.integer_arg(self.registers[1].clone(), context)?;
        let term = self.deref_register(2);

        if !term.is_compound() {
            let err = match term {
                Addr::HeapCell(_) => self.instantiation_error(),
                term => self.type_error(ValidType::Compound, term),
            };

            return Err(self.error_form(err, context));
        }

        if n < 0 {
            let err = self.domain_error(DomainErrorType::NotLessThanZero, Addr::Con(Constant::Fixnum(n)));
            return Err(self.error_form(err, context));
        }

        let args = self.compound_args(&term);

        match (n as usize).checked_sub(1).and_then(|i| args.get(i)) {
            Some(arg) => {
                let value = self.registers[3].clone();
                self.unify(arg.clone(), value);
            }
            None => self.fail = true,
        }

        Ok(())
    }

    fn functor(&mut self, context: &PredicateKey) -> CallResult {
        let term = self.deref_register(1);

        match &term {
            Addr::HeapCell(_) => {
                let name = self.deref_register(2);
                let arity = self.deref_register(3);

                if name.is_ref() || arity.is_ref() {
                    return Err(self.error_form(self.instantiation_error(), context));
                }

                let arity = self.integer_arg(arity, context)?;

                if arity < 0 {
                    let err = self.domain_error(DomainErrorType::NotLessThanZero, Addr::Con(Constant::Fixnum(arity)));
                    return Err(self.error_form(err, context));
                }

                if arity as usize > MAX_ARITY {
                    return Err(self.error_form(self.representation_error(RepFlag::MaxArity), context));
                }

                if arity == 0 {
                    if name.is_compound() {
                        return Err(self.error_form(self.type_error(ValidType::Atomic, name), context));
                    }

                    self.unify(term.clone(), name);
                    return Ok(());
                }

                let name = match &name {
                    Addr::Con(c) => match c.to_atom() {
                        Some(name) => name,
                        None => return Err(self.error_form(self.type_error(ValidType::Atom, name.clone()), context)),
                    },
                    _ => return Err(self.error_form(self.type_error(ValidType::Atomic, name.clone()), context)),
                };

                let mut args = Vec::with_capacity(arity as usize);

                for _ in 0..arity {
                    args.push(self.heap.push_var()?);
                }

                let structure = self.heap.put_structure(name, args)?;
                self.unify(term.clone(), structure);
            }
            Addr::Con(_) => {
                let name = self.registers[2].clone();
                self.unify(name, term.clone());

                if !self.fail {
                    let arity = self.registers[3].clone();
                    self.unify(arity, Addr::Con(Constant::Fixnum(0)));
                }
            }
            _ => {
                let (name, arity) = self.name_and_arity(&term).unwrap_or((atom!("."), 2));

                let name_reg = self.registers[2].clone();
                self.unify(name_reg, Addr::Con(Constant::Atom(name)));

                if !self.fail {
                    let arity_reg = self.registers[3].clone();
                    self.unify(arity_reg, Addr::Con(Constant::Fixnum(arity as i64)));
                }
            }
        }

        Ok(())
    }

    fn univ(&mut self, context: &PredicateKey) -> CallResult {
        let term = self.deref_register(1);
        let list = self.registers[2].clone();

        match &term {
            Addr::HeapCell(_) => {
                let items = self.proper_list(list, context)?;

                let (head, args) = match items.split_first() {
                    Some((head, args)) => (self.deref(head.clone()), args.to_vec()),
                    None => {
                        let err = self.domain_error(DomainErrorType::NonEmptyList, Addr::Con(Constant::EmptyList));
                        return Err(self.error_form(err, context));
                    }
                };

                if head.is_ref() {
                    return Err(self.error_form(self.instantiation_error(), context));
                }

                if args.is_empty() {
                    if head.is_compound() {
                        return Err(self.error_form(self.type_error(ValidType::Atomic, head), context));
                    }

                    self.unify(term.clone(), head);
                    return Ok(());
                }

                let name = match &head {
                    Addr::Con(c) => c.to_atom(),
                    _ => None,
                };

                let name = match name {
                    Some(name) => name,
                    None => {
                        let valid = if head.is_compound() { ValidType::Atomic } else { ValidType::Atom };
                        return Err(self.error_form(self.type_error(valid, head), context));
                    }
                };

                if args.len() > MAX_ARITY {
                    return Err(self.error_form(self.representation_error(RepFlag::MaxArity), context));
                }

                let structure = self.heap.put_structure(name, args)?;
                self.unify(term.clone(), structure);
            }
            Addr::Con(_) => {
                let items = self.heap.iter_to_heap_list(vec![term.clone()].into_iter())?;
                self.unify(list, items);
            }
            _ => {
                let (name, _) = self.name_and_arity(&term).unwrap_or((atom!("."), 2));

                let mut items = vec![Addr::Con(Constant::Atom(name))];
                items.extend(self.compound_args(&term));

                let items = self.heap.iter_to_heap_list(items.into_iter())?;
                self.unify(list, items);
            }
        }

        Ok(())
    }

    fn copy_term(&mut self) -> CallResult {
        let (stub, _) = copy_to_stub(self.heap.as_slice(), self.registers[1].clone());
        let copy = self.heap.write_stub(&stub)?;
        let target = self.registers[2].clone();

        self.unify(target, copy);
        Ok(())
    }

    fn atom_length(&mut self, context: &PredicateKey) -> CallResult {
        let atom = self.deref_register(1);

        let text = match &atom {
            Addr::HeapCell(_) => return Err(self.error_form(self.instantiation_error(), context)),
            Addr::Con(c) => c.to_atom(),
            _ => None,
        };

        let text = match text {
            Some(text) => text,
            None => return Err(self.error_form(self.type_error(ValidType::Atom, atom), context)),
        };

        let len = self.deref_register(2);

        match &len {
            Addr::HeapCell(_) => {}
            &Addr::Con(Constant::Fixnum(n)) if n < 0 => {
                let err = self.domain_error(DomainErrorType::NotLessThanZero, len.clone());
                return Err(self.error_form(err, context));
            }
            Addr::Con(Constant::Fixnum(_)) => {}
            _ => return Err(self.error_form(self.type_error(ValidType::Integer, len.clone()), context)),
        }

        let count = text.as_str().chars().count() as i64;
        self.unify(len, Addr::Con(Constant::Fixnum(count)));

        Ok(())
    }

    /// `atom_chars/2` and `atom_codes/2`.
    fn atom_chars(&mut self, codes: bool, context: &PredicateKey) -> CallResult {
        let atom = self.deref_register(1);
        let list = self.registers[2].clone();

        match &atom {
            Addr::HeapCell(_) => {
                let items = self.proper_list(list, context)?;
                let mut text = String::with_capacity(items.len());

                for item in items {
                    let item = self.deref(item);

                    let c = match &item {
                        Addr::HeapCell(_) => return Err(self.error_form(self.instantiation_error(), context)),
                        &Addr::Con(Constant::Fixnum(code)) if codes => {
                            match u32::try_from(code).ok().and_then(char::from_u32) {
                                Some(c) => c,
                                None => {
                                    let err = self.representation_error(RepFlag::CharacterCode);
                                    return Err(self.error_form(err, context));
                                }
                            }
                        }
                        Addr::Con(Constant::Atom(name)) if !codes && name.as_str().chars().count() == 1 => {
                            name.as_str().chars().next().unwrap_or(' ')
                        }
                        _ => {
                            let valid = if codes { ValidType::Integer } else { ValidType::Atom };
                            return Err(self.error_form(self.type_error(valid, item.clone()), context));
                        }
                    };

                    text.push(c);
                }

                self.unify(atom.clone(), Addr::Con(Constant::Atom(Atom::new(&text))));
            }
            Addr::Con(c) => {
                let name = match c.to_atom() {
                    Some(name) => name,
                    None => return Err(self.error_form(self.type_error(ValidType::Atom, atom.clone()), context)),
                };

                let items: Vec<Addr> = name
                    .as_str()
                    .chars()
                    .map(|c| {
                        if codes {
                            Addr::Con(Constant::Fixnum(c as i64))
                        } else {
                            Addr::Con(Constant::Atom(Atom::new(&c.to_string())))
                        }
                    })
                    .collect();

                let items = self.heap.iter_to_heap_list(items.into_iter())?;
                self.unify(list, items);
            }
            _ => return Err(self.error_form(self.type_error(ValidType::Atom, atom.clone()), context)),
        }

        Ok(())
    }

    fn number_codes(&mut self, op_dir: &OpDir, context: &PredicateKey) -> CallResult {
        let number = self.deref_register(1);
        let list = self.registers[2].clone();

        match self.list_items(list.clone()) {
            ListItems::Proper(items) if !items.is_empty() || number.is_ref() => {
                let mut text = String::with_capacity(items.len());

                for item in items {
                    let code = self.integer_arg(item, context)?;

                    match u32::try_from(code).ok().and_then(char::from_u32) {
                        Some(c) => text.push(c),
                        None => {
                            let err = self.representation_error(RepFlag::CharacterCode);
                            return Err(self.error_form(err, context));
                        }
                    }
                }

                let value = match read_single_term(&text, op_dir) {
                    Ok(Some(Term::Constant(c @ Constant::Fixnum(_))))
                    | Ok(Some(Term::Constant(c @ Constant::Float(_)))) => Some(c),
                    Ok(Some(Term::Clause(name, mut args))) if name.as_str() == "-" && args.len() == 1 => {
                        match args.pop() {
                            Some(Term::Constant(Constant::Fixnum(n))) => n.checked_neg().map(Constant::Fixnum),
                            Some(Term::Constant(Constant::Float(f))) => Some(Constant::Float(-f)),
                            _ => None,
                        }
                    }
                    _ => None,
                };

                return match value {
                    Some(value) => {
                        self.unify(number, Addr::Con(value));
                        Ok(())
                    }
                    None => {
                        let err = self.syntax_error(atom!("illegal_number"));
                        Err(self.error_form(err, context))
                    }
                };
            }
            ListItems::Partial if number.is_ref() => {
                return Err(self.error_form(self.instantiation_error(), context));
            }
            ListItems::Improper => {
                let err = self.type_error(ValidType::List, self.deref(list));
                return Err(self.error_form(err, context));
            }
            _ => {}
        }

        let text = match &number {
            Addr::Con(c @ Constant::Fixnum(_)) | Addr::Con(c @ Constant::Float(_)) => c.to_string(),
            _ => return Err(self.error_form(self.type_error(ValidType::Number, number.clone()), context)),
        };

        let codes: Vec<Addr> = text.chars().map(|c| Addr::Con(Constant::Fixnum(c as i64))).collect();
        let codes = self.heap.iter_to_heap_list(codes.into_iter())?;

        self.unify(list, codes);
        Ok(())
    }

    fn compare(&mut self, context: &PredicateKey) -> CallResult {
        let order = self.deref_register(1);

        match &order {
            Addr::HeapCell(_) => {}
            Addr::Con(Constant::Atom(name)) => {
                if !matches!(name.as_str(), "<" | "=" | ">") {
                    let err = self.domain_error(DomainErrorType::Order, order.clone());
                    return Err(self.error_form(err, context));
                }
            }
            _ => return Err(self.error_form(self.type_error(ValidType::Atom, order.clone()), context)),
        }

        let ordering = self.compare_term_test(self.registers[2].clone(), self.registers[3].clone());

        let name = match ordering {
            Ordering::Less => atom!("<"),
            Ordering::Equal => atom!("="),
            Ordering::Greater => atom!(">"),
        };

        self.unify(order, Addr::Con(Constant::Atom(name)));
        Ok(())
    }

    /// `msort/2`, and `sort/2` when `dedup` is set.
    fn sort(&mut self, dedup: bool, context: &PredicateKey) -> CallResult {
        let mut items = self.proper_list(self.registers[1].clone(), context)?;

        if let ListItems::Improper = self.list_items(self.registers[2].clone()) {
            let err = self.type_error(ValidType::List, self.deref_register(2));
            return Err(self.error_form(err, context));
        }

        items.sort_by(|a, b| self.compare_term_test(a.clone(), b.clone()));

        if dedup {
            items.dedup_by(|a, b| self.eq_test(a.clone(), b.clone()));
        }

        let sorted = self.heap.iter_to_heap_list(items.into_iter())?;
        let target = self.registers[2].clone();

        self.unify(target, sorted);
        Ok(())
    }

    fn current_prolog_flag(&mut self, context: &PredicateKey) -> CallResult {
        let name = self.atom_arg(self.registers[1].clone(), context)?;

        let value = match name.as_str() {
            "bounded" => Constant::Atom(atom!("true")),
            "max_integer" => Constant::Fixnum(i64::MAX),
            "min_integer" => Constant::Fixnum(i64::MIN),
            "occurs_check" => Constant::Atom(atom!(if self.flags.occurs_check { "true" } else { "false" })),
            "unknown" => Constant::Atom(match self.flags.unknown {
                Unknown::Error => atom!("error"),
                Unknown::Fail => atom!("fail"),
            }),
            _ => {
                let err = self.domain_error(DomainErrorType::PrologFlag, self.deref_register(1));
                return Err(self.error_form(err, context));
            }
        };

        let target = self.registers[2].clone();
        self.unify(target, Addr::Con(value));

        Ok(())
    }

    fn set_prolog_flag(&mut self, context: &PredicateKey) -> CallResult {
        let flag = self.deref_register(1);
        let value = self.deref_register(2);

        if flag.is_ref() || value.is_ref() {
            return Err(self.error_form(self.instantiation_error(), context));
        }

        let name = self.atom_arg(flag.clone(), context)?;
        let value_name = match &value {
            Addr::Con(Constant::Atom(value)) => Some(value.as_str()),
            _ => None,
        };

        match (name.as_str(), value_name) {
            ("occurs_check", Some("true")) => self.flags.occurs_check = true,
            ("occurs_check", Some("false")) => self.flags.occurs_check = false,
            ("unknown", Some("error")) => self.flags.unknown = Unknown::Error,
            ("unknown", Some("fail")) => self.flags.unknown = Unknown::Fail,
            ("argv" | "bounded" | "max_integer" | "min_integer", _) => {
                let err = self.permission_error(Permission::Modify, atom!("flag"), functor!(name.clone()));
                return Err(self.error_form(err, context));
            }
            ("occurs_check" | "unknown", _) => {
                let culprit = self.heap.put_structure(atom!("+"), vec![flag.clone(), value.clone()])?;
                let err = self.domain_error(DomainErrorType::FlagValue, culprit);
                return Err(self.error_form(err, context));
            }
            _ => {
                let err = self.domain_error(DomainErrorType::PrologFlag, flag.clone());
                return Err(self.error_form(err, context));
            }
        }

        tracing::debug!(flag = %name, "prolog flag set");
        Ok(())
    }
}

// the head and body of a clause term.
fn split_clause(term: &Term) -> (&Term, Option<&Term>) {
    match term {
        Term::Clause(name, terms) if name.as_str() == ":-" && terms.len() == 2 => (&terms[0], Some(&terms[1])),
        term => (term, None),
    }
}

fn as_rule(term: Term) -> Term {
    match term {
        Term::Clause(name, terms) if name.as_str() == ":-" && terms.len() == 2 => Term::Clause(name, terms),
        head => Term::Clause(atom!(":-"), vec![head, Term::atom("true")]),
    }
}

impl Machine {
    /// Runs a deterministic system predicate with its arguments in
    /// A1..An. Failure is signalled through the fail flag.
    pub(crate) fn call_builtin(&mut self, ct: BuiltInClauseType) -> CallResult {
        let context = (ct.name(), ct.arity());

        match ct {
            BuiltInClauseType::AbolishAllTables => self.abolish_all_tables(&context)?,
            BuiltInClauseType::Arg => self.machine_st.arg(&context)?,
            BuiltInClauseType::Asserta => self.assert_clause(true, &context)?,
            BuiltInClauseType::Assertz => self.assert_clause(false, &context)?,
            BuiltInClauseType::AtomChars => self.machine_st.atom_chars(false, &context)?,
            BuiltInClauseType::AtomCodes => self.machine_st.atom_chars(true, &context)?,
            BuiltInClauseType::AtomLength => self.machine_st.atom_length(&context)?,
            BuiltInClauseType::Compare => self.machine_st.compare(&context)?,
            BuiltInClauseType::CompareNumber(qt) => {
                let n1 = self.machine_st.arith_eval(self.machine_st.registers[1].clone(), &context)?;
                let n2 = self.machine_st.arith_eval(self.machine_st.registers[2].clone(), &context)?;

                fail_unless!(self.machine_st, qt.holds(arithmetic::compare(n1, n2)));
            }
            BuiltInClauseType::CompareTerm(qt) => {
                let a1 = self.machine_st.registers[1].clone();
                let a2 = self.machine_st.registers[2].clone();

                fail_unless!(self.machine_st, qt.holds(self.machine_st.compare_term_test(a1, a2)));
            }
            BuiltInClauseType::Consult => self.consult(&context)?,
            BuiltInClauseType::CopyTerm => self.machine_st.copy_term()?,
            BuiltInClauseType::CurrentPrologFlag => self.current_prolog_flag(&context)?,
            BuiltInClauseType::Dynamic => self.declare(false, &context)?,
            BuiltInClauseType::Eq => {
                let a1 = self.machine_st.registers[1].clone();
                let a2 = self.machine_st.registers[2].clone();

                fail_unless!(self.machine_st, self.machine_st.eq_test(a1, a2));
            }
            BuiltInClauseType::Fail => self.machine_st.fail = true,
            BuiltInClauseType::Findall => self.findall()?,
            BuiltInClauseType::Functor => self.machine_st.functor(&context)?,
            BuiltInClauseType::GetValue => self.get_value(&context)?,
            BuiltInClauseType::Halt => self.halted = Some(0),
            BuiltInClauseType::HaltWithCode => {
                let code = self.machine_st.integer_arg(self.machine_st.registers[1].clone(), &context)?;
                self.halted = Some(code as i32);
            }
            BuiltInClauseType::Is => {
                let n = self.machine_st.arith_eval(self.machine_st.registers[2].clone(), &context)?;
                let target = self.machine_st.registers[1].clone();

                self.machine_st.unify(target, Addr::Con(n.to_constant()));
            }
            BuiltInClauseType::MSort => self.machine_st.sort(false, &context)?,
            BuiltInClauseType::Nl => self.streams.user_output.write_str("\n"),
            BuiltInClauseType::NotEq => {
                let a1 = self.machine_st.registers[1].clone();
                let a2 = self.machine_st.registers[2].clone();

                fail_unless!(self.machine_st, !self.machine_st.eq_test(a1, a2));
            }
            BuiltInClauseType::NotUnifiable => {
                let a1 = self.machine_st.registers[1].clone();
                let a2 = self.machine_st.registers[2].clone();

                let unified = self.machine_st.trial_unify(a1, a2, false);
                fail_unless!(self.machine_st, !unified);
            }
            BuiltInClauseType::NumberCodes => self.machine_st.number_codes(&self.indices.op_dir, &context)?,
            BuiltInClauseType::Op => self.op(&context)?,
            BuiltInClauseType::Print | BuiltInClauseType::WriteQ => self.write_term(true, false),
            BuiltInClauseType::Repl => self.repl_step()?,
            BuiltInClauseType::Retract => self.retract(&context)?,
            BuiltInClauseType::SetPrologFlag => self.machine_st.set_prolog_flag(&context)?,
            BuiltInClauseType::SetValue => self.set_value(&context)?,
            BuiltInClauseType::Sort => self.machine_st.sort(true, &context)?,
            BuiltInClauseType::Table => self.declare(true, &context)?,
            BuiltInClauseType::Throw => {
                let ball = self.machine_st.deref_register(1);

                if ball.is_ref() {
                    let err = self.machine_st.instantiation_error();
                    return Err(self.machine_st.error_form(err, &context));
                }

                let (stub, _) = copy_to_stub(self.machine_st.heap.as_slice(), ball);
                return Err(stub);
            }
            BuiltInClauseType::True => {}
            BuiltInClauseType::Type(test) => {
                fail_unless!(self.machine_st, self.machine_st.type_test(test));
            }
            BuiltInClauseType::Unify => {
                let a1 = self.machine_st.registers[1].clone();
                let a2 = self.machine_st.registers[2].clone();

                if self.machine_st.flags.occurs_check {
                    self.machine_st.unify_with_occurs_check(a1, a2);
                } else {
                    self.machine_st.unify(a1, a2);
                }
            }
            BuiltInClauseType::UnifyWithOccursCheck => {
                let a1 = self.machine_st.registers[1].clone();
                let a2 = self.machine_st.registers[2].clone();

                self.machine_st.unify_with_occurs_check(a1, a2);
            }
            BuiltInClauseType::Univ => self.machine_st.univ(&context)?,
            BuiltInClauseType::Write => self.write_term(false, false),
            BuiltInClauseType::WriteCanonical => self.write_term(true, true),
        }

        Ok(())
    }

    fn write_term(&mut self, quoted: bool, ignore_ops: bool) {
        let addr = self.machine_st.deref_register(1);

        let text = {
            let mut printer = HCPrinter::new(self.machine_st.heap.as_slice(), &self.indices.op_dir);

            printer.quoted = quoted;
            printer.ignore_ops = ignore_ops;
            printer.print(addr)
        };

        self.streams.user_output.write_str(&text);
    }

    fn findall(&mut self) -> CallResult {
        let template = self.machine_st.registers[1].clone();
        let goal = self.machine_st.registers[2].clone();
        let result = self.machine_st.registers[3].clone();

        let mut solutions: Vec<MachineStub> = vec![];

        self.run_nested(CodePtr::Dir(CALL_GOAL), &[goal], |machine, _| {
            let (stub, _) = copy_to_stub(machine.machine_st.heap.as_slice(), template.clone());
            solutions.push(stub);
            Ok(true)
        })?;

        let mut items = Vec::with_capacity(solutions.len());

        for stub in &solutions {
            items.push(self.machine_st.heap.write_stub(stub)?);
        }

        let list = self.machine_st.heap.iter_to_heap_list(items.into_iter())?;
        self.machine_st.unify(result, list);

        Ok(())
    }

    fn static_procedure_error(&self, key: &PredicateKey, context: &PredicateKey) -> MachineStub {
        let culprit = predicate_indicator(key.0.clone(), key.1);
        let err = self
            .machine_st
            .permission_error(Permission::Modify, atom!("static_procedure"), culprit);

        self.machine_st.error_form(err, context)
    }

    fn assert_clause(&mut self, front: bool, context: &PredicateKey) -> CallResult {
        let clause = self.machine_st.deref_register(1);

        if clause.is_ref() {
            let err = self.machine_st.instantiation_error();
            return Err(self.machine_st.error_form(err, context));
        }

        let mut names = IndexMap::with_hasher(FxBuildHasher::default());

        let term = match heap_to_term(self.machine_st.heap.as_slice(), clause.clone(), &mut names) {
            Some(term) => term,
            None => {
                let err = self.machine_st.type_error(ValidType::Callable, clause);
                return Err(self.machine_st.error_form(err, context));
            }
        };

        if let (Term::Var(_), _) = split_clause(&term) {
            let err = self.machine_st.instantiation_error();
            return Err(self.machine_st.error_form(err, context));
        }

        let key = match clause_key(&term) {
            Ok(key) => key,
            Err(_) => {
                let err = self.machine_st.type_error(ValidType::Callable, clause);
                return Err(self.machine_st.error_form(err, context));
            }
        };

        if let Err(err) = Preprocessor::new().clause(term.clone()) {
            tracing::debug!(%err, "assert of an invalid clause");

            let culprit = match err {
                CompilationError::InvalidRuleHead => self.machine_st.compound_args(&clause).into_iter().next(),
                _ => self.machine_st.compound_args(&clause).into_iter().nth(1),
            };

            let err = self
                .machine_st
                .type_error(ValidType::Callable, culprit.unwrap_or(clause));

            return Err(self.machine_st.error_form(err, context));
        }

        let is_static = self.indices.lookup(&key).is_some() && !self.indices.is_dynamic(&key);

        if is_protected(key.0.as_str(), key.1) || is_static {
            return Err(self.static_procedure_error(&key, context));
        }

        Arc::make_mut(&mut self.indices).skeleton_mut(&key).is_dynamic = true;

        if let Err(err) = self.add_dynamic_clause(&key, term, front) {
            tracing::error!(%err, name = %key.0, arity = key.1, "cannot compile an asserted clause");
            let err = self.machine_st.type_error(ValidType::Callable, clause);
            return Err(self.machine_st.error_form(err, context));
        }

        Ok(())
    }

    // deterministic: the first clause that unifies is removed.
    fn retract(&mut self, context: &PredicateKey) -> CallResult {
        let clause = self.machine_st.deref_register(1);

        let (head, body) = match self.machine_st.name_and_arity(&clause) {
            Some((name, 2)) if name.as_str() == ":-" => {
                let mut args = self.machine_st.compound_args(&clause).into_iter();

                match (args.next(), args.next()) {
                    (Some(head), Some(body)) => (self.machine_st.deref(head), body),
                    _ => (clause.clone(), Addr::Con(Constant::Atom(atom!("true")))),
                }
            }
            _ => (clause.clone(), Addr::Con(Constant::Atom(atom!("true")))),
        };

        if head.is_ref() {
            let err = self.machine_st.instantiation_error();
            return Err(self.machine_st.error_form(err, context));
        }

        let key = match self.machine_st.name_and_arity(&head) {
            Some(key) => key,
            None => {
                let err = self.machine_st.type_error(ValidType::Callable, head);
                return Err(self.machine_st.error_form(err, context));
            }
        };

        if !self.indices.is_dynamic(&key) {
            if is_protected(key.0.as_str(), key.1) || self.indices.lookup(&key).is_some() {
                return Err(self.static_procedure_error(&key, context));
            }

            self.machine_st.fail = true;
            return Ok(());
        }

        let clauses = match self.indices.predicates.get(&key) {
            Some(skeleton) => skeleton.clauses.clone(),
            None => vec![],
        };

        let pattern = self.machine_st.heap.put_structure(atom!(":-"), vec![head, body])?;

        for (i, stored) in clauses.into_iter().enumerate() {
            let h = self.machine_st.heap.len();
            let stored = write_term_to_heap(&as_rule(stored), &mut self.machine_st.heap)?;

            if self.machine_st.trial_unify(pattern.clone(), stored.root, true) {
                if let Err(err) = self.remove_dynamic_clause(&key, i) {
                    tracing::error!(%err, name = %key.0, arity = key.1, "cannot recompile after a retract");
                    let culprit = predicate_indicator(key.0.clone(), key.1);
                    let err = self.machine_st.permission_error(Permission::Modify, atom!("static_procedure"), culprit);
                    return Err(self.machine_st.error_form(err, context));
                }

                return Ok(());
            }

            self.machine_st.heap.truncate(h);
        }

        self.machine_st.fail = true;
        Ok(())
    }

    /// `dynamic/1` and `table/1` over predicate indicators, given
    /// alone, as a conjunction or as a list.
    fn declare(&mut self, tabled: bool, context: &PredicateKey) -> CallResult {
        let mut specs = vec![self.machine_st.registers[1].clone()];
        let mut keys = vec![];

        while let Some(spec) = specs.pop() {
            let spec = self.machine_st.deref(spec);

            match self.machine_st.name_and_arity(&spec) {
                _ if spec.is_ref() => {
                    let err = self.machine_st.instantiation_error();
                    return Err(self.machine_st.error_form(err, context));
                }
                Some((name, 2)) if name.as_str() == "," || name.as_str() == "." => {
                    let mut args = self.machine_st.compound_args(&spec);
                    args.reverse();
                    specs.extend(args);
                }
                Some((name, 0)) if name.as_str() == "[]" => {}
                Some((name, 2)) if name.as_str() == "/" => {
                    let args = self.machine_st.compound_args(&spec);
                    let name = self.machine_st.atom_arg(args[0].clone(), context)?;
                    let arity = self.machine_st.integer_arg(args[1].clone(), context)?;

                    if arity < 0 {
                        let err = self
                            .machine_st
                            .domain_error(DomainErrorType::NotLessThanZero, Addr::Con(Constant::Fixnum(arity)));
                        return Err(self.machine_st.error_form(err, context));
                    }

                    keys.push((name, arity as usize));
                }
                _ => {
                    let err = self.machine_st.type_error(ValidType::PredicateIndicator, spec);
                    return Err(self.machine_st.error_form(err, context));
                }
            }
        }

        for key in keys {
            if is_protected(key.0.as_str(), key.1) {
                return Err(self.static_procedure_error(&key, context));
            }

            let indices = Arc::make_mut(&mut self.indices);
            let skeleton = indices.skeleton_mut(&key);
            let was_incremental = skeleton.is_incremental();

            if tabled {
                skeleton.is_tabled = true;
            } else {
                skeleton.is_dynamic = true;
            }

            // clauses compiled under the other scheme are compiled again.
            let changed = was_incremental != skeleton.is_incremental();
            let clauses = skeleton.clauses.clone();

            if changed && clauses.is_empty() {
                indices.code_dir.shift_remove(&key);
            } else if changed {
                if let Err(err) = self.install_clauses(key.clone(), clauses, true) {
                    tracing::error!(%err, name = %key.0, arity = key.1, "cannot recompile a declared predicate");
                    let culprit = predicate_indicator(key.0.clone(), key.1);
                    let err = self.machine_st.permission_error(Permission::Modify, atom!("static_procedure"), culprit);
                    return Err(self.machine_st.error_form(err, context));
                }
            } else if let Some(index) = Arc::make_mut(&mut self.indices).code_dir.get_mut(&key) {
                index.tabled = tabled || index.tabled;
            }

            tracing::debug!(name = %key.0, arity = key.1, tabled, "declared");
        }

        Ok(())
    }

    // `argv` comes from the configuration; other flags live in the
    // machine state.
    fn current_prolog_flag(&mut self, context: &PredicateKey) -> CallResult {
        match self.machine_st.deref_register(1) {
            Addr::Con(Constant::Atom(name)) if name.as_str() == "argv" => {
                let args: Vec<Addr> = self
                    .config
                    .argv
                    .iter()
                    .map(|arg| Addr::Con(Constant::Atom(Atom::new(arg))))
                    .collect();

                let list = self.machine_st.heap.iter_to_heap_list(args.into_iter())?;
                let target = self.machine_st.registers[2].clone();

                self.machine_st.unify(target, list);
                Ok(())
            }
            _ => self.machine_st.current_prolog_flag(context),
        }
    }

    fn consult(&mut self, context: &PredicateKey) -> CallResult {
        let source = self.machine_st.deref_register(1);
        let name = self.machine_st.atom_arg(source.clone(), context)?;

        let result = self.consult_file(&resolve_source(name.as_str(), &self.config.library_paths), LoadMode::Consult);

        let err = match result {
            Ok(()) => return Ok(()),
            Err(SessionError::Io { .. }) => self.machine_st.source_sink_error(source),
            Err(SessionError::Syntax { message, .. }) => self.machine_st.syntax_error(Atom::new(&message)),
            Err(SessionError::Compilation {
                error: CompilationError::CannotOverwriteBuiltIn(name, arity),
                ..
            }) => {
                let culprit = predicate_indicator(Atom::new(&name), arity);
                self.machine_st
                    .permission_error(Permission::Modify, atom!("static_procedure"), culprit)
            }
            Err(SessionError::Compilation { .. }) => self.machine_st.type_error(ValidType::Callable, source),
        };

        Err(self.machine_st.error_form(err, context))
    }

    fn get_value(&mut self, context: &PredicateKey) -> CallResult {
        let key = self.machine_st.atom_arg(self.machine_st.registers[1].clone(), context)?;

        let value = match self.global_values.get(&key) {
            Some(stub) => self.machine_st.heap.write_stub(stub)?,
            None => Addr::Con(Constant::EmptyList),
        };

        let target = self.machine_st.registers[2].clone();
        self.machine_st.unify(target, value);

        Ok(())
    }

    fn set_value(&mut self, context: &PredicateKey) -> CallResult {
        let key = self.machine_st.atom_arg(self.machine_st.registers[1].clone(), context)?;

        match self.machine_st.deref_register(2) {
            Addr::Con(c) => {
                self.global_values.insert(key, vec![HeapCellValue::Addr(Addr::Con(c))]);
                Ok(())
            }
            Addr::HeapCell(_) => {
                let err = self.machine_st.instantiation_error();
                Err(self.machine_st.error_form(err, context))
            }
            value => {
                let err = self.machine_st.type_error(ValidType::Atomic, value);
                Err(self.machine_st.error_form(err, context))
            }
        }
    }

    fn op(&mut self, context: &PredicateKey) -> CallResult {
        let prec = self.machine_st.deref_register(1);
        let spec = self.machine_st.deref_register(2);
        let names = self.machine_st.deref_register(3);

        if prec.is_ref() || spec.is_ref() || names.is_ref() {
            let err = self.machine_st.instantiation_error();
            return Err(self.machine_st.error_form(err, context));
        }

        let prec = match self.machine_st.integer_arg(prec.clone(), context)? {
            p if (0..=1200).contains(&p) => p as u16,
            _ => {
                let err = self.machine_st.domain_error(DomainErrorType::OperatorPriority, prec);
                return Err(self.machine_st.error_form(err, context));
            }
        };

        let spec_name = self.machine_st.atom_arg(spec.clone(), context)?;

        let spec = match OpDeclSpec::try_from(spec_name.as_str()) {
            Ok(spec) => spec,
            Err(()) => {
                let err = self.machine_st.domain_error(DomainErrorType::OperatorSpecifier, spec);
                return Err(self.machine_st.error_form(err, context));
            }
        };

        let names = match &names {
            Addr::Con(Constant::Atom(name)) => vec![name.clone()],
            _ => {
                let items = self.machine_st.proper_list(names.clone(), context)?;
                let mut names = Vec::with_capacity(items.len());

                for item in items {
                    names.push(self.machine_st.atom_arg(item, context)?);
                }

                names
            }
        };

        if let Some(name) = names.iter().find(|name| name.as_str() == ",") {
            let err = self
                .machine_st
                .permission_error(Permission::Modify, atom!("operator"), functor!(name.clone()));
            return Err(self.machine_st.error_form(err, context));
        }

        let op_dir = &mut Arc::make_mut(&mut self.indices).op_dir;

        for name in names {
            let key = (name, spec.fixity());

            if prec == 0 {
                op_dir.shift_remove(&key);
            } else {
                op_dir.insert(key, OpDesc::build_with(prec, spec));
            }
        }

        Ok(())
    }

    /// Prints the bindings of the query variables, `true` when there
    /// are none.
    pub(crate) fn format_answer(&self, query_vars: &[(String, usize)]) -> String {
        let heap = self.machine_st.heap.as_slice();
        let mut var_names = IndexMap::new();

        for (name, h) in query_vars {
            if let Addr::HeapCell(root) = heap_bound_deref(heap, Addr::HeapCell(*h)) {
                var_names.entry(root).or_insert_with(|| name.clone());
            }
        }

        let mut bindings = vec![];

        for (name, h) in query_vars {
            if name.starts_with('_') {
                continue;
            }

            let value = heap_bound_deref(heap, Addr::HeapCell(*h));

            if let Addr::HeapCell(root) = value {
                if var_names.get(&root) == Some(name) {
                    continue;
                }
            }

            let mut printer = HCPrinter::new(heap, &self.indices.op_dir);

            printer.quoted = true;
            printer.var_names = var_names.clone();

            bindings.push(format!("{} = {}", name, printer.print(value)));
        }

        if bindings.is_empty() {
            "true".to_string()
        } else {
            bindings.join(",\n")
        }
    }

    /// Reads one query from the user input, runs it and prints its
    /// answers. End of input clears `$live`.
    fn repl_step(&mut self) -> CallResult {
        let input = self.streams.user_input.clone();
        let output = self.streams.user_output.clone();

        input.set_prompt("?- ");
        output.flush();

        #[cfg(feature = "repl")]
        {
            if input.is_interactive() {
                input.set_completions(self.predicate_names());
            }
        }

        let goal = {
            let mut parser = Parser::new(input.chars());

            match parser.read_term(&self.indices.op_dir) {
                Ok(Some(goal)) => goal,
                Ok(None) => {
                    self.global_values.insert(atom!("$live"), functor!(atom!("$false")));
                    return Ok(());
                }
                Err(err) => {
                    output.write_str(&format!("syntax error: {}\n", err));
                    input.discard_line();
                    return Ok(());
                }
            }
        };

        let interactive = input.is_interactive();

        if interactive {
            input.discard_line();
        }

        let vars = goal.vars();

        let entry = match self.compile_local(goal, &vars) {
            Ok(entry) => entry,
            Err(err) => {
                output.write_str(&format!("error: {}\n", err));
                return Ok(());
            }
        };

        let mut args = Vec::with_capacity(vars.len());
        let mut query_vars = Vec::with_capacity(vars.len());

        for name in vars {
            let addr = self.machine_st.heap.push_var()?;

            if let Addr::HeapCell(h) = addr {
                query_vars.push((name, h));
            }

            args.push(addr);
        }

        let mut answered = false;
        let mut awaiting = false;

        let result = self.run_nested(entry, &args, |machine, more| {
            answered = true;

            let answer = machine.format_answer(&query_vars);

            if !more {
                awaiting = false;
                output.write_str(&format!("{}.\n", answer));
                return Ok(false);
            }

            if interactive {
                output.write_str(&format!("{} ", answer));
                output.flush();
                input.set_prompt("");

                match input.read_line() {
                    Some(line) if line.trim() == ";" => {
                        output.write_str(";\n");
                        awaiting = true;
                        Ok(true)
                    }
                    _ => {
                        output.write_str(".\n");
                        awaiting = false;
                        Ok(false)
                    }
                }
            } else {
                output.write_str(&format!("{} ;\n", answer));
                awaiting = true;
                Ok(true)
            }
        });

        match result {
            Ok(()) if self.halted.is_some() => {}
            Ok(()) if !answered || awaiting => output.write_str("false.\n"),
            Ok(()) => {}
            Err(ball) if ball == functor!(atom!("$interrupt")) => {
                output.write_str("% Execution aborted\n");
            }
            Err(ball) => {
                let ball = print_stub(&ball, &self.indices.op_dir);
                output.write_str(&format!("   {}.\n", ball));
            }
        }

        output.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::machine::config::*;
    use crate::machine::lib_machine::{LeafAnswer, Term};
    use crate::machine::Machine;

    use std::io::Write;

    fn machine() -> Machine {
        MachineBuilder::new().build().unwrap()
    }

    fn first(machine: &mut Machine, query: &str) -> Result<LeafAnswer, Term> {
        machine
            .run_query(query)
            .next()
            .unwrap_or(Ok(LeafAnswer::False))
    }

    fn binding(machine: &mut Machine, query: &str, var: &str) -> Term {
        match first(machine, query) {
            Ok(LeafAnswer::LeafAnswer { bindings }) => bindings[var].clone(),
            answer => panic!("unexpected answer {:?}", answer),
        }
    }

    fn error_kind(machine: &mut Machine, query: &str) -> String {
        match first(machine, query) {
            Err(Term::Compound(name, args)) if name == "error" => match &args[0] {
                Term::Compound(kind, _) | Term::Atom(kind) => kind.clone(),
                term => format!("{:?}", term),
            },
            answer => panic!("expected an error, got {:?}", answer),
        }
    }

    #[test]
    fn findall_collects_every_solution() {
        let mut machine = machine();

        assert_eq!(
            binding(&mut machine, "findall(X-Y, member(X-Y, [1-a, 2-b]), L).", "L"),
            Term::list([
                Term::compound("-", [Term::integer(1), Term::atom("a")]),
                Term::compound("-", [Term::integer(2), Term::atom("b")]),
            ])
        );
        assert_eq!(binding(&mut machine, "findall(X, fail, L).", "L"), Term::list([]));
    }

    #[test]
    fn findall_copies_are_fresh() {
        let mut machine = machine();
        let answer = first(&mut machine, "findall(X, (X = f(_) ; X = g), [f(A), B]), var(A), B == g.");

        assert!(matches!(answer, Ok(ref answer) if answer.maybe_succeeded()));
    }

    #[test]
    fn assert_and_retract_update_dynamic_predicates() {
        let mut machine = machine();

        assert!(first(&mut machine, "assertz(c(1)), assertz(c(2)), asserta(c(0)).").is_ok());
        assert_eq!(
            binding(&mut machine, "findall(X, c(X), L).", "L"),
            Term::list([Term::integer(0), Term::integer(1), Term::integer(2)])
        );

        assert_eq!(binding(&mut machine, "retract(c(X)).", "X"), Term::integer(0));
        assert_eq!(
            binding(&mut machine, "findall(X, c(X), L).", "L"),
            Term::list([Term::integer(1), Term::integer(2)])
        );

        assert_eq!(first(&mut machine, "retract(c(7))."), Ok(LeafAnswer::False));
        assert_eq!(first(&mut machine, "retract(nothing(_))."), Ok(LeafAnswer::False));
    }

    #[test]
    fn updates_compile_only_the_changed_clause() {
        let mut machine = machine();

        assert!(first(&mut machine, "assertz(n(0)).").is_ok());
        let before = machine.code_repo.code.len();

        assert!(first(&mut machine, "forall(between(1, 400, I), (assertz(n(I)), once(n(_)))).").is_ok());
        let asserted = machine.code_repo.code.len() - before;

        assert!(asserted <= 400 * 4, "{} instructions for 400 facts", asserted);
        assert_eq!(binding(&mut machine, "findall(X, n(X), L), length(L, N).", "N"), Term::integer(401));
        assert_eq!(binding(&mut machine, "n(X), X > 399.", "X"), Term::integer(400));

        assert!(first(&mut machine, "forall(between(1, 200, I), retract(n(I))).").is_ok());
        assert!(first(&mut machine, "asserta(n(-1)).").is_ok());

        assert!(machine.code_repo.code.len() - before <= asserted + 4);
        assert_eq!(binding(&mut machine, "findall(X, n(X), L), length(L, N).", "N"), Term::integer(202));
        assert_eq!(binding(&mut machine, "n(X).", "X"), Term::integer(-1));
        assert_eq!(first(&mut machine, "n(150)."), Ok(LeafAnswer::False));
    }

    #[test]
    fn declaring_consulted_clauses_dynamic_keeps_them() {
        let mut machine = machine();
        machine.consult_module_string("m", "k(1). k(2).").unwrap();

        assert!(first(&mut machine, "dynamic(k/1), assertz(k(3)), retract(k(1)).").is_ok());
        assert_eq!(
            binding(&mut machine, "findall(X, k(X), L).", "L"),
            Term::list([Term::integer(2), Term::integer(3)])
        );
    }

    #[test]
    fn rules_can_be_asserted_and_retracted() {
        let mut machine = machine();

        assert!(first(&mut machine, "assertz((double(X, Y) :- Y is X * 2)).").is_ok());
        assert_eq!(binding(&mut machine, "double(4, Y).", "Y"), Term::integer(8));
        assert_eq!(
            binding(&mut machine, "retract((double(_, _) :- B)).", "B"),
            Term::compound("is", [Term::variable("_A"), Term::compound("*", [Term::variable("_B"), Term::integer(2)])])
        );
    }

    #[test]
    fn static_predicates_are_protected() {
        let mut machine = machine();
        machine.consult_module_string("m", "s(1).").unwrap();

        assert_eq!(error_kind(&mut machine, "assertz(s(2))."), "permission_error");
        assert_eq!(error_kind(&mut machine, "assertz(atom(2))."), "permission_error");
        assert_eq!(error_kind(&mut machine, "retract(s(1))."), "permission_error");
        assert_eq!(error_kind(&mut machine, "assertz(_)."), "instantiation_error");
        assert_eq!(error_kind(&mut machine, "assertz((foo :- 4))."), "type_error");
    }

    #[test]
    fn dynamic_predicates_without_clauses_fail() {
        let mut machine = machine();
        machine.consult_module_string("m", ":- dynamic(d/1).").unwrap();

        assert_eq!(first(&mut machine, "d(_)."), Ok(LeafAnswer::False));
        assert_eq!(error_kind(&mut machine, "e(_)."), "existence_error");
    }

    #[test]
    fn term_inspection() {
        let mut machine = machine();

        assert_eq!(binding(&mut machine, "functor(foo(a, b), N, A).", "N"), Term::atom("foo"));
        assert!(matches!(
            first(&mut machine, "functor(T, foo, 2), T = foo(X, Y), var(X), var(Y), X \\== Y."),
            Ok(ref answer) if answer.maybe_succeeded()
        ));
        assert_eq!(binding(&mut machine, "functor(T, 3, 0).", "T"), Term::integer(3));
        assert_eq!(binding(&mut machine, "arg(2, f(a, b), X).", "X"), Term::atom("b"));
        assert_eq!(first(&mut machine, "arg(3, f(a, b), _)."), Ok(LeafAnswer::False));
        assert_eq!(
            binding(&mut machine, "f(a, B) =.. L.", "L"),
            Term::list([Term::atom("f"), Term::atom("a"), Term::variable("B")])
        );
        assert_eq!(
            binding(&mut machine, "T =.. [g, 1].", "T"),
            Term::compound("g", [Term::integer(1)])
        );
        assert_eq!(error_kind(&mut machine, "functor(_, _, 1)."), "instantiation_error");
        assert_eq!(error_kind(&mut machine, "functor(_, foo, -1)."), "domain_error");
        assert_eq!(error_kind(&mut machine, "_ =.. []."), "domain_error");
        assert_eq!(error_kind(&mut machine, "arg(x, f(a), _)."), "type_error");
    }

    #[test]
    fn atoms_and_numbers_convert() {
        let mut machine = machine();

        assert_eq!(
            binding(&mut machine, "atom_chars(abc, L).", "L"),
            Term::list([Term::atom("a"), Term::atom("b"), Term::atom("c")])
        );
        assert_eq!(binding(&mut machine, "atom_codes(A, [0'h, 0'i]).", "A"), Term::atom("hi"));
        assert_eq!(binding(&mut machine, "atom_length(hello, N).", "N"), Term::integer(5));
        assert_eq!(binding(&mut machine, "number_codes(N, \"42\").", "N"), Term::integer(42));
        assert_eq!(binding(&mut machine, "number_codes(N, \"-7\").", "N"), Term::integer(-7));
        assert_eq!(
            binding(&mut machine, "number_codes(12, L).", "L"),
            Term::list([Term::integer(49), Term::integer(50)])
        );
        assert_eq!(error_kind(&mut machine, "number_codes(N, \"4a\")."), "syntax_error");
        assert_eq!(error_kind(&mut machine, "atom_length(X, 3)."), "instantiation_error");
    }

    #[test]
    fn sorting_and_comparison() {
        let mut machine = machine();

        assert_eq!(
            binding(&mut machine, "sort([c, a, b, a], L).", "L"),
            Term::list([Term::atom("a"), Term::atom("b"), Term::atom("c")])
        );
        assert_eq!(
            binding(&mut machine, "msort([b, 1, a, 1], L).", "L"),
            Term::list([Term::integer(1), Term::integer(1), Term::atom("a"), Term::atom("b")])
        );
        assert_eq!(binding(&mut machine, "compare(O, 1, a).", "O"), Term::atom("<"));
        assert_eq!(error_kind(&mut machine, "compare(foo, 1, 2)."), "domain_error");
        assert!(first(&mut machine, "f(X) @< f(a), 2 =:= 2.0, a \\== b, f(X) \\= g(_).").is_ok());
        assert_eq!(first(&mut machine, "X \\= 1."), Ok(LeafAnswer::False));
    }

    #[test]
    fn global_values_hold_atomic_terms() {
        let mut machine = machine();

        assert_eq!(binding(&mut machine, "get_value(counter, V).", "V"), Term::list([]));
        assert!(first(&mut machine, "set_value(counter, 3).").is_ok());
        assert_eq!(binding(&mut machine, "get_value(counter, V).", "V"), Term::integer(3));
        assert_eq!(error_kind(&mut machine, "set_value(counter, f(x))."), "type_error");
    }

    #[test]
    fn prolog_flags() {
        let mut machine = machine();

        assert_eq!(binding(&mut machine, "current_prolog_flag(bounded, V).", "V"), Term::atom("true"));
        assert_eq!(
            binding(&mut machine, "current_prolog_flag(max_integer, V).", "V"),
            Term::integer(i64::MAX)
        );
        assert_eq!(error_kind(&mut machine, "set_prolog_flag(bounded, false)."), "permission_error");
        assert_eq!(error_kind(&mut machine, "set_prolog_flag(unknown, maybe)."), "domain_error");
        assert_eq!(error_kind(&mut machine, "set_prolog_flag(colour, red)."), "domain_error");

        assert!(first(&mut machine, "set_prolog_flag(unknown, fail).").is_ok());
        assert_eq!(first(&mut machine, "no_such_predicate."), Ok(LeafAnswer::False));

        assert!(first(&mut machine, "set_prolog_flag(occurs_check, true).").is_ok());
        assert_eq!(first(&mut machine, "X = f(X)."), Ok(LeafAnswer::False));
    }

    #[test]
    fn operators_can_be_declared_and_removed() {
        let mut machine = machine();

        assert!(first(&mut machine, "op(200, xfy, ^^).").is_ok());
        assert!(first(&mut machine, "X = (a ^^ b), X =.. [^^, a, b].").is_ok());
        assert_eq!(error_kind(&mut machine, "op(1201, xfx, foo)."), "domain_error");
        assert_eq!(error_kind(&mut machine, "op(100, yfy, foo)."), "domain_error");
        assert_eq!(error_kind(&mut machine, "op(100, xfx, ',')."), "permission_error");
    }

    #[test]
    fn writing_terms() {
        let mut machine = machine();

        assert!(first(&mut machine, "write('a b'), nl, writeq('a b'), nl, write_canonical(f(1 + a)).").is_ok());
        assert_eq!(machine.take_output().unwrap(), "a b\n'a b'\nf(+(1,a))");
    }

    #[test]
    fn throw_requires_a_bound_ball() {
        let mut machine = machine();

        assert_eq!(error_kind(&mut machine, "throw(_)."), "instantiation_error");
        // the catcher sees a copy of the ball.
        assert!(matches!(
            first(&mut machine, "catch(throw(f(X)), f(Y), true), \\+ Y == X."),
            Ok(ref answer) if answer.maybe_succeeded()
        ));
    }

    #[test]
    fn consulting_a_missing_file_is_an_existence_error() {
        let mut machine = machine();

        assert_eq!(error_kind(&mut machine, "consult('/nonexistent/source')."), "existence_error");
    }

    #[test]
    fn the_repl_prints_answers() {
        let (mut input, stdin) = InputStreamConfig::channel();
        let streams = StreamConfig {
            stdin,
            stdout: OutputStreamConfig::memory(),
            stderr: OutputStreamConfig::null(),
        };

        let mut machine = MachineBuilder::new().with_streams(streams).build().unwrap();

        input.write_all(b"member(X, [1,2]).\nfail.\nY = f(Z).\n").unwrap();
        drop(input);

        for _ in 0..4 {
            assert!(first(&mut machine, "'$repl'.").is_ok());
        }

        assert_eq!(
            machine.take_output().unwrap(),
            "X = 1 ;\nX = 2 ;\nfalse.\nfalse.\nY = f(Z).\n"
        );
        assert_eq!(binding(&mut machine, "get_value('$live', V).", "V"), Term::atom("$false"));
    }
}
