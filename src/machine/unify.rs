use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;

use fxhash::FxHashSet;

impl MachineState {
    /// Unifies two terms, setting the fail flag on mismatch. Bindings
    /// made before a mismatch stay in place for backtracking to undo.
    pub(crate) fn unify(&mut self, a: Addr, b: Addr) {
        let occurs_check = self.flags.occurs_check;
        self.unify_with(a, b, occurs_check);
    }

    pub(crate) fn unify_with_occurs_check(&mut self, a: Addr, b: Addr) {
        self.unify_with(a, b, true);
    }

    fn unify_with(&mut self, a: Addr, b: Addr, occurs_check: bool) {
        let mut pdl = vec![(a, b)];

        // compound pairs already equated; unification of rational
        // trees terminates once a pair repeats.
        let mut visited = FxHashSet::<(Addr, Addr)>::default();

        while let Some((a, b)) = pdl.pop() {
            let a = self.deref(a);
            let b = self.deref(b);

            if a == b {
                continue;
            }

            match (a, b) {
                (Addr::HeapCell(h), other) | (other, Addr::HeapCell(h)) => {
                    if occurs_check && !other.is_ref() && self.occurs(h, other.clone()) {
                        self.fail = true;
                        return;
                    }

                    self.bind(h, other);
                }
                (Addr::Con(c1), Addr::Con(c2)) => {
                    if c1 != c2 {
                        self.fail = true;
                        return;
                    }
                }
                (Addr::Lis(l1), Addr::Lis(l2)) => {
                    if visited.insert((Addr::Lis(l1), Addr::Lis(l2))) {
                        pdl.push((self.heap[l1 + 1].as_addr(l1 + 1), self.heap[l2 + 1].as_addr(l2 + 1)));
                        pdl.push((self.heap[l1].as_addr(l1), self.heap[l2].as_addr(l2)));
                    }
                }
                (Addr::Str(s1), Addr::Str(s2)) => {
                    let arity = match (&self.heap[s1], &self.heap[s2]) {
                        (HeapCellValue::NamedStr(a1, n1), HeapCellValue::NamedStr(a2, n2))
                            if a1 == a2 && n1 == n2 =>
                        {
                            *a1
                        }
                        _ => {
                            self.fail = true;
                            return;
                        }
                    };

                    if visited.insert((Addr::Str(s1), Addr::Str(s2))) {
                        for i in (1..=arity).rev() {
                            pdl.push((self.heap[s1 + i].as_addr(s1 + i), self.heap[s2 + i].as_addr(s2 + i)));
                        }
                    }
                }
                _ => {
                    self.fail = true;
                    return;
                }
            }

            if self.fail {
                return;
            }
        }
    }

    /// Does the unbound cell `h` occur in `addr`?
    pub(crate) fn occurs(&self, h: usize, addr: Addr) -> bool {
        let mut stack = vec![addr];
        let mut visited = FxHashSet::<usize>::default();

        while let Some(addr) = stack.pop() {
            match self.deref(addr) {
                Addr::HeapCell(h1) => {
                    if h1 == h {
                        return true;
                    }
                }
                Addr::Con(_) => {}
                Addr::Lis(l) => {
                    if visited.insert(l) {
                        stack.push(self.heap[l].as_addr(l));
                        stack.push(self.heap[l + 1].as_addr(l + 1));
                    }
                }
                Addr::Str(s) => {
                    if visited.insert(s) {
                        if let HeapCellValue::NamedStr(arity, _) = &self.heap[s] {
                            for i in 1..=*arity {
                                stack.push(self.heap[s + i].as_addr(s + i));
                            }
                        }
                    }
                }
            }
        }

        false
    }

    /// Is the term free of unbound variables?
    pub(crate) fn is_ground(&self, addr: Addr) -> bool {
        let mut stack = vec![addr];
        let mut visited = FxHashSet::<usize>::default();

        while let Some(addr) = stack.pop() {
            match self.deref(addr) {
                Addr::HeapCell(_) => return false,
                Addr::Con(_) => {}
                Addr::Lis(l) => {
                    if visited.insert(l) {
                        stack.push(self.heap[l].as_addr(l));
                        stack.push(self.heap[l + 1].as_addr(l + 1));
                    }
                }
                Addr::Str(s) => {
                    if visited.insert(s) {
                        if let HeapCellValue::NamedStr(arity, _) = &self.heap[s] {
                            for i in 1..=*arity {
                                stack.push(self.heap[s + i].as_addr(s + i));
                            }
                        }
                    }
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom_table::*;
    use crate::machine::raw_block::*;
    use crate::parser::ast::*;

    fn machine_st() -> MachineState {
        let limits = RegionLimits { init_cells: 256, max_cells: None };
        MachineState::new(MemoryLimits { heap: limits, stack: limits, trail: limits }).unwrap()
    }

    #[test]
    fn structures_unify_argument_wise() {
        let mut machine_st = machine_st();

        // foo(X, 2) = foo(1, Y)
        let x = machine_st.heap.push_var().unwrap();
        let y = machine_st.heap.push_var().unwrap();
        let t1 = machine_st
            .heap
            .put_structure(atom!("foo"), vec![x.clone(), Addr::Con(Constant::Fixnum(2))])
            .unwrap();
        let t2 = machine_st
            .heap
            .put_structure(atom!("foo"), vec![Addr::Con(Constant::Fixnum(1)), y.clone()])
            .unwrap();

        machine_st.unify(t1, t2);

        assert!(!machine_st.fail);
        assert_eq!(machine_st.deref(x), Addr::Con(Constant::Fixnum(1)));
        assert_eq!(machine_st.deref(y), Addr::Con(Constant::Fixnum(2)));
    }

    #[test]
    fn mismatched_functors_fail() {
        let mut machine_st = machine_st();

        let t1 = machine_st.heap.put_structure(atom!("f"), vec![Addr::Con(Constant::Fixnum(1))]).unwrap();
        let t2 = machine_st.heap.put_structure(atom!("g"), vec![Addr::Con(Constant::Fixnum(1))]).unwrap();

        machine_st.unify(t1, t2);
        assert!(machine_st.fail);
    }

    #[test]
    fn occurs_check_rejects_cycles() {
        let mut machine_st = machine_st();

        let x = machine_st.heap.push_var().unwrap();
        let f = machine_st.heap.put_structure(atom!("f"), vec![x.clone()]).unwrap();

        machine_st.unify_with_occurs_check(x.clone(), f.clone());
        assert!(machine_st.fail);

        machine_st.fail = false;
        machine_st.unify(x, f);
        assert!(!machine_st.fail);
    }

    #[test]
    fn cyclic_terms_unify() {
        let mut machine_st = machine_st();

        let x = machine_st.heap.push_var().unwrap();
        let fx = machine_st.heap.put_structure(atom!("f"), vec![x.clone()]).unwrap();
        machine_st.unify(x.clone(), fx);

        let y = machine_st.heap.push_var().unwrap();
        let fy = machine_st.heap.put_structure(atom!("f"), vec![y.clone()]).unwrap();
        machine_st.unify(y.clone(), fy);

        machine_st.unify(x, y);
        assert!(!machine_st.fail);
    }
}
