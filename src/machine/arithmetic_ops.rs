use crate::arithmetic::*;
use crate::atom_table::*;
use crate::forms::*;
use crate::machine::heap::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;

enum ArithTask {
    Eval(Addr),
    Apply(Atom, usize),
}

impl MachineState {
    fn arith_error(&self, err: ArithmeticError, context: &PredicateKey) -> MachineStub {
        let err = match err {
            ArithmeticError::Eval(err) => self.evaluation_error(err),
            ArithmeticError::NotInteger(n) => self.type_error(ValidType::Integer, Addr::Con(n.to_constant())),
            ArithmeticError::NotFloat(n) => self.type_error(ValidType::Float, Addr::Con(n.to_constant())),
        };

        self.error_form(err, context)
    }

    /// Evaluates an arithmetic expression. Operands are evaluated
    /// left to right off an explicit stack, so deep expressions do
    /// not exhaust the native stack.
    pub(crate) fn arith_eval(&self, addr: Addr, context: &PredicateKey) -> Result<Number, MachineStub> {
        let mut tasks = vec![ArithTask::Eval(addr)];
        let mut values: Vec<Number> = vec![];

        while let Some(task) = tasks.pop() {
            match task {
                ArithTask::Eval(addr) => {
                    let addr = self.deref(addr);

                    match &addr {
                        Addr::HeapCell(_) => {
                            return Err(self.error_form(self.instantiation_error(), context));
                        }
                        Addr::Con(c) => {
                            if let Some(n) = Number::from_constant(c) {
                                values.push(n);
                                continue;
                            }

                            let name = c.to_atom().unwrap_or_else(|| atom!("[]"));

                            match constant_value(name.as_str()) {
                                Some(n) => values.push(n),
                                None => {
                                    let culprit = predicate_indicator(name, 0);
                                    let err = self.type_error_with_stub(ValidType::Evaluable, culprit);

                                    return Err(self.error_form(err, context));
                                }
                            }
                        }
                        Addr::Lis(_) | Addr::Str(_) => {
                            let (name, arity) = self.name_and_arity(&addr).unwrap_or((atom!("."), 2));

                            if !is_evaluable(name.as_str(), arity) {
                                let culprit = predicate_indicator(name, arity);
                                let err = self.type_error_with_stub(ValidType::Evaluable, culprit);

                                return Err(self.error_form(err, context));
                            }

                            tasks.push(ArithTask::Apply(name, arity));

                            for arg in self.compound_args(&addr).into_iter().rev() {
                                tasks.push(ArithTask::Eval(arg));
                            }
                        }
                    }
                }
                ArithTask::Apply(name, arity) => {
                    let result = if arity == 1 {
                        let n = values.pop();
                        n.and_then(|n| eval_unary(name.as_str(), n))
                    } else {
                        let n2 = values.pop();
                        let n1 = values.pop();

                        match (n1, n2) {
                            (Some(n1), Some(n2)) => eval_binary(name.as_str(), n1, n2),
                            _ => None,
                        }
                    };

                    match result {
                        Some(Ok(n)) => values.push(n),
                        Some(Err(err)) => return Err(self.arith_error(err, context)),
                        None => {
                            let culprit = predicate_indicator(name, arity);
                            let err = self.type_error_with_stub(ValidType::Evaluable, culprit);

                            return Err(self.error_form(err, context));
                        }
                    }
                }
            }
        }

        match values.pop() {
            Some(n) => Ok(n),
            None => Err(self.error_form(self.instantiation_error(), context)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::raw_block::*;
    use crate::parser::ast::*;

    use ordered_float::OrderedFloat;

    fn machine_st() -> MachineState {
        let limits = RegionLimits { init_cells: 256, max_cells: None };
        MachineState::new(MemoryLimits { heap: limits, stack: limits, trail: limits }).unwrap()
    }

    fn is_key() -> PredicateKey {
        (atom!("is"), 2)
    }

    #[test]
    fn nested_expressions() {
        let mut machine_st = machine_st();

        // (1 + 2) * 3 - 4 / 8
        let sum = machine_st
            .heap
            .put_structure(atom!("+"), vec![Addr::Con(Constant::Fixnum(1)), Addr::Con(Constant::Fixnum(2))])
            .unwrap();
        let prod = machine_st
            .heap
            .put_structure(atom!("*"), vec![sum, Addr::Con(Constant::Fixnum(3))])
            .unwrap();
        let quot = machine_st
            .heap
            .put_structure(atom!("/"), vec![Addr::Con(Constant::Fixnum(4)), Addr::Con(Constant::Fixnum(8))])
            .unwrap();
        let expr = machine_st.heap.put_structure(atom!("-"), vec![prod, quot]).unwrap();

        assert_eq!(machine_st.arith_eval(expr, &is_key()), Ok(Number::Float(OrderedFloat(8.5))));
    }

    #[test]
    fn deep_expressions_do_not_recurse() {
        let mut machine_st = machine_st();
        let mut expr = Addr::Con(Constant::Fixnum(0));

        for _ in 0..100_000 {
            expr = machine_st
                .heap
                .put_structure(atom!("+"), vec![expr, Addr::Con(Constant::Fixnum(1))])
                .unwrap();
        }

        assert_eq!(machine_st.arith_eval(expr, &is_key()), Ok(Number::Fixnum(100_000)));
    }

    #[test]
    fn errors_have_iso_shapes() {
        let mut machine_st = machine_st();

        let var = machine_st.heap.push_var().unwrap();
        let stub = machine_st.arith_eval(var, &is_key()).unwrap_err();
        assert!(stub.contains(&HeapCellValue::Addr(Addr::Con(Constant::Atom(atom!("instantiation_error"))))));

        let foo = machine_st
            .heap
            .put_structure(atom!("foo"), vec![Addr::Con(Constant::Fixnum(1))])
            .unwrap();
        let stub = machine_st.arith_eval(foo, &is_key()).unwrap_err();
        assert!(stub.contains(&HeapCellValue::Addr(Addr::Con(Constant::Atom(atom!("evaluable"))))));

        let div = machine_st
            .heap
            .put_structure(atom!("//"), vec![Addr::Con(Constant::Fixnum(1)), Addr::Con(Constant::Fixnum(0))])
            .unwrap();
        let stub = machine_st.arith_eval(div, &is_key()).unwrap_err();
        assert!(stub.contains(&HeapCellValue::Addr(Addr::Con(Constant::Atom(atom!("zero_divisor"))))));
    }
}
