use crate::atom_table::*;
use crate::clause_types::*;
use crate::forms::*;
use crate::instructions::*;
use crate::machine::code_repo::*;
use crate::machine::copier::*;
use crate::machine::heap::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::*;
use crate::machine::stack::*;
use crate::machine::Machine;
use crate::parser::ast::*;
use crate::read::heap_to_term;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use std::sync::atomic::Ordering;
use std::sync::Arc;

/// How a run of the dispatch loop ended.
#[derive(Debug)]
pub(crate) enum RunOutcome {
    /// The query continuation was reached. Further answers are
    /// requested by setting the fail flag and running again.
    Success,
    /// Backtracking reached the bottom of the run.
    Exhausted,
    /// An exception nothing in the run caught.
    Exception(MachineStub),
    /// `halt/0,1` was called.
    Halt,
}

// transfers of control that need more than the machine state.
enum Control {
    Call(CallTarget, usize, bool),
    CallN(usize, bool),
    BuiltIn(BuiltInClauseType),
}

macro_rules! try_or_throw {
    ($s:expr, $e:expr) => {{
        match $e {
            Ok(val) => val,
            Err(ball) => {
                if let Some(outcome) = $s.throw(ball) {
                    return outcome;
                }

                continue;
            }
        }
    }};
}

impl Machine {
    /// Runs from the current instruction until success, exhaustion,
    /// an uncaught exception or halt.
    pub(crate) fn dispatch_loop(&mut self) -> RunOutcome {
        loop {
            if let Some(err) = self.machine_st.overflow.take() {
                self.machine_st.fail = false;
                try_or_throw!(self, Err(MachineStub::from(err)));
            }

            if self.machine_st.fail {
                self.machine_st.fail = false;

                match try_or_throw!(self, self.backtrack()) {
                    Some(outcome) => return outcome,
                    None => continue,
                }
            }

            if self.halted.is_some() {
                return RunOutcome::Halt;
            }

            if self.interrupted() {
                return RunOutcome::Exception(functor!(atom!("$interrupt")));
            }

            if self.worker_stopped() {
                return RunOutcome::Exhausted;
            }

            if let Some(outcome) = try_or_throw!(self, self.step()) {
                return outcome;
            }
        }
    }

    #[inline]
    fn worker_stopped(&self) -> bool {
        self.worker
            .as_ref()
            .map(|link| link.tree.stop.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn step(&mut self) -> Result<Option<RunOutcome>, MachineStub> {
        let p = self.machine_st.p;

        let (code, idx): (&[Instruction], usize) = match p {
            CodePtr::Dir(idx) => (&self.code_repo.code, idx),
            CodePtr::Local(idx) => (&self.local_code[..], idx),
        };

        let machine_st = &mut self.machine_st;

        let instr = match code.get(idx) {
            Some(instr) => instr,
            None => {
                tracing::error!(?p, "code pointer out of range");
                return Err(functor!(atom!("system_error"), [atom(atom!("code_pointer"))]));
            }
        };

        let control = match instr {
            Instruction::Allocate(num_cells, scope) => {
                machine_st.allocate(*num_cells, *scope)?;
                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::Deallocate => {
                machine_st.deallocate();
                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::GetLevel(slot) => {
                let b0 = machine_st.b0;

                machine_st.set_slot(*slot, Addr::Con(Constant::Usize(b0)));
                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::GetArg(arg, term) => {
                machine_st.get_arg(*arg, term)?;
                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::PutArg(arg, term) => {
                machine_st.put_arg(*arg, term)?;
                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::NeckCut => {
                let b0 = machine_st.b0;

                machine_st.cut(b0);
                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::Cut(slot) => {
                if let Addr::Con(Constant::Usize(b)) = machine_st.deref(machine_st.slot(*slot)) {
                    machine_st.cut(b);
                }

                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::Fail => {
                machine_st.fail = true;
                return Ok(None);
            }
            Instruction::Proceed => {
                machine_st.p = machine_st.cp;
                return Ok(None);
            }
            Instruction::QuerySuccess => {
                return Ok(Some(RunOutcome::Success));
            }
            Instruction::SwitchOnTerm(table) => {
                machine_st.switch_on_term(table)?;
                return Ok(None);
            }
            Instruction::InstallCatch(slot) => {
                let b = machine_st.b();

                machine_st.push_choice_point(Alternative::Catch)?;
                machine_st.set_slot(*slot, Addr::Con(Constant::Usize(b)));
                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::ExitCatch(slot) => {
                // a deterministic goal leaves its catcher on top.
                if let Addr::Con(Constant::Usize(b)) = machine_st.deref(machine_st.slot(*slot)) {
                    if machine_st.b() == b + 1 {
                        machine_st.pop_choice_point();
                    }
                }

                machine_st.p += 1;
                return Ok(None);
            }
            Instruction::Call(target, arity) => Control::Call(target.clone(), *arity, false),
            Instruction::Execute(target, arity) => Control::Call(target.clone(), *arity, true),
            Instruction::CallN(arity) => Control::CallN(*arity, false),
            Instruction::ExecuteN(arity) => Control::CallN(*arity, true),
            Instruction::CallBuiltIn(ct) => Control::BuiltIn(*ct),
        };

        match control {
            Control::Call(CallTarget::Key(key), arity, last) => self.call_key(key, arity, last)?,
            Control::Call(CallTarget::Direct(entry), arity, last) => self.jump(entry, arity, last),
            Control::Call(CallTarget::Aux(id), ..) => {
                tracing::error!(id, "unresolved auxiliary call");
                self.machine_st.fail = true;
            }
            Control::CallN(arity, last) => self.call_goal(arity, last)?,
            Control::BuiltIn(ct) => {
                self.call_builtin(ct)?;
                self.machine_st.p += 1;
            }
        }

        Ok(None)
    }

    /// Transfers control to `entry` with `arity` arguments in place.
    /// A last call keeps the continuation of the caller.
    pub(crate) fn jump(&mut self, entry: CodePtr, arity: usize, last: bool) {
        self.enter_call(arity, last);
        self.machine_st.p = entry;
        self.scheduler_tick();
    }

    fn enter_call(&mut self, arity: usize, last: bool) {
        let machine_st = &mut self.machine_st;

        machine_st.num_of_args = arity;
        machine_st.b0 = machine_st.b();

        if !last {
            machine_st.cp = machine_st.p + 1;
        }
    }

    fn scheduler_tick(&mut self) {
        if self.worker.is_some() {
            self.cycles += 1;

            if self.cycles % self.config.scheduler_loop.max(1) == 0 {
                self.share_work();
            }
        }
    }

    pub(crate) fn call_key(&mut self, key: PredicateKey, arity: usize, last: bool) -> Result<(), MachineStub> {
        match self.indices.lookup(&key) {
            Some(CodeIndex { entry: CodeEntry::Static(entry), tabled: true }) => self.call_tabled(key, entry, last),
            Some(CodeIndex { entry: CodeEntry::Static(entry), .. }) => {
                self.jump(entry, arity, last);
                Ok(())
            }
            Some(CodeIndex { entry: CodeEntry::Dynamic(table), .. }) => {
                self.enter_call(arity, last);
                self.machine_st.switch_on_term(&table)?;
                self.scheduler_tick();
                Ok(())
            }
            None if self.indices.is_dynamic(&key) || self.machine_st.flags.unknown == Unknown::Fail => {
                self.machine_st.fail = true;
                Ok(())
            }
            None => {
                let err = self.machine_st.existence_error(&key);
                Err(self.machine_st.error_form(err, &key))
            }
        }
    }

    /// Calls the goal in A1 with the arguments A2..An appended to it.
    fn call_goal(&mut self, arity: usize, last: bool) -> Result<(), MachineStub> {
        let mut arity = arity;

        loop {
            let context = (atom!("call"), arity);
            let goal = self.machine_st.deref_register(1);

            let (name, mut args) = match &goal {
                Addr::HeapCell(_) => {
                    let err = self.machine_st.instantiation_error();
                    return Err(self.machine_st.error_form(err, &context));
                }
                addr => match self.machine_st.name_and_arity(addr) {
                    Some((name, _)) => (name, self.machine_st.compound_args(addr)),
                    None => {
                        let err = self.machine_st.type_error(ValidType::Callable, goal.clone());
                        return Err(self.machine_st.error_form(err, &context));
                    }
                },
            };

            args.extend(self.machine_st.registers[2..=arity].iter().cloned());

            if args.len() > MAX_ARITY {
                let err = self.machine_st.representation_error(RepFlag::MaxArity);
                return Err(self.machine_st.error_form(err, &context));
            }

            let n = args.len();

            match (name.as_str(), n) {
                ("call", n) if n >= 1 => {
                    self.set_args(&args);
                    arity = n;
                    continue;
                }
                ("!", 0) => {
                    self.proceed_after_builtin(last);
                    return Ok(());
                }
                (",", 2) | (";", 2) | ("->", 2) | ("\\+", 1) => {
                    let goal = if arity == 1 {
                        goal
                    } else {
                        self.machine_st.heap.put_structure(name, args)?
                    };

                    return self.meta_call(goal, last);
                }
                ("catch", 3) => {
                    self.set_args(&args);
                    self.jump(CodePtr::Dir(CATCH), 3, last);
                    return Ok(());
                }
                _ => {}
            }

            self.set_args(&args);

            if let Some(ct) = BuiltInClauseType::from(name.as_str(), n) {
                self.machine_st.num_of_args = n;
                self.call_builtin(ct)?;
                self.proceed_after_builtin(last);
                return Ok(());
            }

            return self.call_key((name, n), n, last);
        }
    }

    #[inline]
    fn set_args(&mut self, args: &[Addr]) {
        for (i, arg) in args.iter().enumerate() {
            self.machine_st.registers[i + 1] = arg.clone();
        }
    }

    #[inline]
    fn proceed_after_builtin(&mut self, last: bool) {
        if last {
            self.machine_st.p = self.machine_st.cp;
        } else {
            self.machine_st.p += 1;
        }
    }

    /// Compiles a control construct reached through `call/N` into the
    /// local code area, once per variant, and calls it.
    fn meta_call(&mut self, goal: Addr, last: bool) -> Result<(), MachineStub> {
        let (stub, vars) = copy_to_stub(self.machine_st.heap.as_slice(), goal.clone());

        let entry = match self.meta_cache.get(&stub) {
            Some(&entry) => entry,
            None => {
                let context = (atom!("call"), 1);
                let mut names = IndexMap::with_hasher(FxBuildHasher::default());

                let term = match heap_to_term(&stub, Addr::HeapCell(0), &mut names) {
                    Some(term) => term,
                    None => {
                        let err = self.machine_st.type_error(ValidType::Callable, goal);
                        return Err(self.machine_st.error_form(err, &context));
                    }
                };

                let var_names: Vec<String> = names.values().cloned().collect();

                let entry = match self.compile_local(term, &var_names) {
                    Ok(entry) => entry,
                    Err(_) => {
                        let err = self.machine_st.type_error(ValidType::Callable, goal);
                        return Err(self.machine_st.error_form(err, &context));
                    }
                };

                self.meta_cache.insert(stub, entry);
                entry
            }
        };

        let args: Vec<Addr> = vars.into_iter().map(Addr::HeapCell).collect();

        self.set_args(&args);
        self.jump(entry, args.len(), last);

        Ok(())
    }

    /// Tries the next alternative of the newest choice point. Gives
    /// an outcome once backtracking leaves the run.
    fn backtrack(&mut self) -> Result<Option<RunOutcome>, MachineStub> {
        loop {
            let b = self.machine_st.b();

            if b == 0 {
                return Ok(Some(RunOutcome::Exhausted));
            }

            let idx = b - 1;
            let frame = self.machine_st.stack.or_frame(idx);

            if frame.foreign {
                return Ok(Some(RunOutcome::Exhausted));
            }

            match &frame.alt {
                Alternative::Barrier => return Ok(Some(RunOutcome::Exhausted)),
                Alternative::Catch | Alternative::Shared => {
                    self.machine_st.pop_choice_point();
                }
                &Alternative::Clauses { ref clauses, next, end, .. } => {
                    let p = clauses[next];

                    self.machine_st.restore_choice_point(idx);

                    if next + 1 == end {
                        self.machine_st.pop_choice_point();
                    } else if let Alternative::Clauses { next, .. } =
                        &mut self.machine_st.stack.or_frame_mut(idx).alt
                    {
                        *next += 1;
                    }

                    self.machine_st.p = p;
                    return Ok(None);
                }
                Alternative::TableAnswers { .. } => {
                    if self.resume_table_answers(idx)? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Unwinds to the innermost active `catch/3` whose catcher unifies
    /// with `ball` and resumes in its recovery goal. Gives an outcome
    /// when nothing in the run catches the ball.
    pub(crate) fn throw(&mut self, mut ball: MachineStub) -> Option<RunOutcome> {
        if self.interrupted() {
            return Some(RunOutcome::Exception(ball));
        }

        loop {
            let b = self.machine_st.b();

            if b == 0 {
                return Some(RunOutcome::Exception(ball));
            }

            let idx = b - 1;
            let frame = self.machine_st.stack.or_frame(idx);

            if frame.foreign {
                return Some(RunOutcome::Exception(ball));
            }

            match frame.alt {
                Alternative::Barrier => return Some(RunOutcome::Exception(ball)),
                Alternative::Catch => {
                    let target = frame.e;
                    let mut e = self.machine_st.e;

                    // the catcher is active while its goal's frames are
                    // on the continuation.
                    while e > target {
                        e = self.machine_st.stack.and_frame(e).e;
                    }

                    if e != target {
                        self.machine_st.pop_choice_point();
                        continue;
                    }

                    self.machine_st.restore_choice_point(idx);

                    let ball_addr = match self.machine_st.heap.write_stub(&ball) {
                        Ok(addr) => addr,
                        Err(err) => {
                            self.machine_st.pop_choice_point();
                            ball = MachineStub::from(err);
                            continue;
                        }
                    };

                    let catcher = self.machine_st.registers[2].clone();
                    self.machine_st.unify(catcher, ball_addr);

                    if self.machine_st.fail || self.machine_st.overflow.is_some() {
                        self.machine_st.fail = false;
                        self.machine_st.overflow = None;
                        self.machine_st.restore_choice_point(idx);
                        self.machine_st.pop_choice_point();
                        continue;
                    }

                    self.machine_st.pop_choice_point();

                    self.machine_st.registers[1] = self.machine_st.registers[3].clone();
                    self.machine_st.num_of_args = 1;
                    self.machine_st.p = CodePtr::Dir(CATCH_RECOVERY);

                    return None;
                }
                _ => self.machine_st.pop_choice_point(),
            }
        }
    }

    /// Runs the code at `entry` with `args` behind a barrier, calling
    /// `on_success` with each answer while its bindings are in place.
    /// `on_success` is told whether alternatives remain and returns
    /// whether to look for another answer. Every binding the run made
    /// is undone on return.
    pub(crate) fn run_nested<F>(&mut self, entry: CodePtr, args: &[Addr], mut on_success: F) -> CallResult
    where
        F: FnMut(&mut Machine, bool) -> Result<bool, MachineStub>,
    {
        let saved_p = self.machine_st.p;
        let barrier = self.machine_st.b();

        self.machine_st.num_of_args = 0;
        self.machine_st.push_choice_point(Alternative::Barrier)?;

        self.set_args(args);

        self.machine_st.num_of_args = args.len();
        self.machine_st.cp = CodePtr::Dir(QUERY_SUCCESS);
        self.machine_st.b0 = self.machine_st.b();
        self.machine_st.p = entry;

        let result = loop {
            match self.dispatch_loop() {
                RunOutcome::Success => {
                    let more = self.machine_st.b() > barrier + 1;

                    match on_success(self, more) {
                        Ok(true) => self.machine_st.fail = true,
                        Ok(false) => break Ok(()),
                        Err(ball) => break Err(ball),
                    }
                }
                RunOutcome::Exhausted | RunOutcome::Halt => break Ok(()),
                RunOutcome::Exception(ball) => break Err(ball),
            }
        };

        let machine_st = &mut self.machine_st;

        machine_st.fail = false;
        machine_st.overflow = None;
        machine_st.cut(barrier + 1);
        machine_st.restore_choice_point(barrier);
        machine_st.pop_choice_point();
        machine_st.p = saved_p;

        result
    }

    /// Compiles `goal` and runs it behind a barrier, keeping the
    /// first answer only. Gives whether it succeeded.
    pub(crate) fn run_goal_once(&mut self, goal: Term) -> Result<bool, MachineStub> {
        let vars = goal.vars();

        let entry = match self.compile_local(goal, &vars) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(%err, "goal cannot be compiled");
                let err = self.machine_st.type_error_with_stub(
                    ValidType::Callable,
                    functor!(atom!("goal")),
                );
                return Err(self.machine_st.error_form(err, &(atom!("call"), 1)));
            }
        };

        let mut args = Vec::with_capacity(vars.len());

        for _ in &vars {
            args.push(self.machine_st.heap.push_var()?);
        }

        let mut succeeded = false;

        self.run_nested(entry, &args, |_, _| {
            succeeded = true;
            Ok(false)
        })?;

        Ok(succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::RunOutcome;
    use crate::machine::config::MachineBuilder;
    use crate::machine::lib_machine::LeafAnswer;
    use crate::machine::Machine;
    use crate::parser::ast::Term;

    // runs `name(key, X)` to its first answer, giving the choice point
    // height before and after.
    fn choice_points_around(machine: &mut Machine, name: &str, key: &str) -> (usize, usize) {
        machine.reset();

        let goal = Term::Clause(atom!(name), vec![Term::atom(key), Term::Var("X".to_string())]);
        let entry = machine.compile_local(goal, &["X".to_string()]).unwrap();
        let x = machine.machine_st.heap.push_var().unwrap();

        machine.enter_query(entry, &[x]);

        let before = machine.machine_st.b();
        assert!(matches!(machine.dispatch_loop(), RunOutcome::Success));

        (before, machine.machine_st.b())
    }

    #[test]
    fn indexed_single_candidates_push_no_choice_point() {
        let mut machine = MachineBuilder::new().build().unwrap();

        machine.consult_module_string("test", "f(a, 1). f(b, 2). f(c, 3).").unwrap();
        assert!(machine.run_query("assertz(g(a, 1)), assertz(g(b, 2)), assertz(g(c, 3)).").next().is_some());

        for name in ["f", "g"] {
            let (before, after) = choice_points_around(&mut machine, name, "b");
            assert_eq!(before, after, "{}/2", name);
        }

        machine.reset();
    }

    fn answers(program: &str, query: &str) -> Vec<LeafAnswer> {
        let mut machine = MachineBuilder::new().build().unwrap();

        machine.consult_module_string("test", program).unwrap();
        machine.run_query(query).map(|answer| answer.unwrap()).collect()
    }

    #[test]
    fn single_candidate_leaves_no_choice_point() {
        let answers = answers("f(a, 1). f(b, 2). f(c, 3).", "f(b, X).");

        assert_eq!(answers.len(), 1);
        assert!(answers[0].maybe_succeeded());
    }

    #[test]
    fn backtracking_enumerates_clauses_in_order() {
        let answers = answers("p(1). p(2). p(3).", "p(X), X > 1.");

        assert_eq!(answers.len(), 2);
        assert!(answers.iter().all(LeafAnswer::maybe_succeeded));
    }

    #[test]
    fn catch_recovers_with_catcher_bindings() {
        let answers = answers(
            "t(R) :- catch(foo(1), error(existence_error(_, PI), _), R = PI).",
            "t(R).",
        );

        assert_eq!(answers.len(), 1);
        assert_eq!(format!("{:?}", answers[0]).contains("foo"), true);
    }

    #[test]
    fn catch_is_transparent_after_exit() {
        let answers = answers(
            "g(1). g(2). t(X) :- catch(g(X), _, true), X > 1, throw(late).",
            "catch(t(_), B, true).",
        );

        assert_eq!(answers.len(), 1);
        assert!(format!("{:?}", answers[0]).contains("late"));
    }

    #[test]
    fn control_constructs_are_callable() {
        let answers = answers("", "G = (X = 1 ; X = 2), call(G).");

        assert_eq!(answers.len(), 2);
    }

    #[test]
    fn cut_in_call_is_local() {
        let answers = answers("p(1). p(2).", "call((p(X), !)) ; X = 3.");

        assert_eq!(answers.len(), 2);
    }
}
