use crate::atom_table::*;
use crate::instructions::*;
use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;
use crate::machine::raw_block::*;
use crate::machine::stack::*;
use crate::parser::ast::*;

use std::cmp::Ordering;

impl MachineState {
    /// Binds the unbound cell `h` to `addr`. Two variables are always
    /// bound younger to older so that no cell outlives its referent.
    pub(crate) fn bind(&mut self, h: usize, addr: Addr) {
        if let Addr::HeapCell(h1) = addr {
            if h1 == h {
                return;
            } else if h1 > h {
                self.bind_cell(h1, Addr::HeapCell(h));
                return;
            }
        }

        self.bind_cell(h, addr);
    }

    #[inline]
    fn bind_cell(&mut self, h: usize, addr: Addr) {
        debug_assert_eq!(self.heap[h], HeapCellValue::Addr(Addr::HeapCell(h)));

        if h < self.hb {
            if let Err(err) = self.trail.push(h) {
                self.overflow = Some(err);
                self.fail = true;
                return;
            }
        }

        self.heap[h] = HeapCellValue::Addr(addr);
    }

    /// Undoes the bindings recorded above trail mark `tr`, most
    /// recent first.
    pub(crate) fn unwind_trail(&mut self, tr: usize) {
        while self.trail.len() > tr {
            if let Some(h) = self.trail.pop() {
                if h < self.heap.len() {
                    self.heap[h] = HeapCellValue::Addr(Addr::HeapCell(h));
                }
            }
        }
    }

    #[inline]
    fn reset_hb(&mut self) {
        self.hb = self.stack.top_or_frame().map(|frame| frame.h).unwrap_or(0);
    }

    pub(crate) fn push_choice_point(&mut self, alt: Alternative) -> Result<(), ResourceError> {
        let args = self.registers[1..=self.num_of_args].to_vec();

        let frame = OrFrame {
            e: self.e,
            cp: self.cp,
            b0: self.b0,
            tr: self.trail.len(),
            h: self.heap.len(),
            and_len: self.stack.and_len(),
            args,
            alt,
            foreign: false,
        };

        self.stack.push_or_frame(frame)?;
        self.hb = self.heap.len();

        Ok(())
    }

    /// Selects the clauses of `table` that may match A1 and continues
    /// at the first, leaving a choice point only when more than one
    /// remains.
    pub(crate) fn switch_on_term(&mut self, table: &IndexTable) -> Result<(), ResourceError> {
        let clauses = if self.num_of_args == 0 {
            table.all.clone()
        } else {
            let a1 = self.deref_register(1);
            table.select(&a1, self.heap.as_slice()).clone()
        };

        match clauses.len() {
            0 => self.fail = true,
            1 => self.p = clauses[0],
            end => {
                let first = clauses[0];

                self.push_choice_point(Alternative::Clauses {
                    clauses,
                    next: 1,
                    end,
                    cuts: table.cuts,
                })?;

                self.p = first;
            }
        }

        Ok(())
    }

    /// Resets the stacks and registers to the marks of choice point
    /// `b`, which stays in place.
    pub(crate) fn restore_choice_point(&mut self, b: usize) {
        let (tr, h, and_len) = {
            let frame = self.stack.or_frame(b);
            (frame.tr, frame.h, frame.and_len)
        };

        self.unwind_trail(tr);
        self.heap.truncate(h);
        self.stack.truncate_and_frames(and_len);

        let frame = self.stack.or_frame(b);

        self.num_of_args = frame.args.len();

        for (i, arg) in frame.args.iter().enumerate() {
            self.registers[i + 1] = arg.clone();
        }

        self.e = frame.e;
        self.cp = frame.cp;
        self.b0 = frame.b0;
        self.hb = h;
    }

    pub(crate) fn pop_choice_point(&mut self) {
        let b = self.b();

        if b > 0 {
            self.stack.truncate_or_frames(b - 1);
        }

        self.reset_hb();
    }

    /// Removes every choice point at or above `b`.
    pub(crate) fn cut(&mut self, b: usize) {
        let b = if b < self.foreign_len {
            tracing::warn!(b, foreign_len = self.foreign_len, "cut reaches into a shared snapshot");
            self.foreign_len
        } else {
            b
        };

        if self.b() > b {
            self.stack.truncate_or_frames(b);
            self.reset_hb();
        }
    }

    /// Pushes an environment of `num_cells` slots above every frame
    /// still visible to the current continuation or a choice point.
    pub(crate) fn allocate(&mut self, num_cells: usize, scope: CutScope) -> Result<(), ResourceError> {
        let protected = self.stack.top_or_frame().map(|frame| frame.and_len).unwrap_or(0);
        let at = std::cmp::max(self.e + 1, protected);

        let cut_b0 = match scope {
            CutScope::None => None,
            CutScope::Own => Some(self.b0),
            CutScope::Param(arg) => match self.deref_register(arg) {
                Addr::Con(Constant::Usize(b)) => Some(b.min(self.b0)),
                _ => Some(self.b0),
            },
        };

        self.stack
            .allocate_and_frame(at, AndFrame::new(self.e, self.cp, cut_b0, num_cells))?;
        self.e = at;

        Ok(())
    }

    pub(crate) fn deallocate(&mut self) {
        let frame = self.stack.and_frame(self.e);

        self.cp = frame.cp;
        self.e = frame.e;
    }

    #[inline]
    pub(crate) fn slot(&self, slot: usize) -> Addr {
        self.stack.and_frame(self.e)[slot].clone()
    }

    #[inline]
    pub(crate) fn set_slot(&mut self, slot: usize, addr: Addr) {
        let e = self.e;
        self.stack.and_frame_mut(e)[slot] = addr;
    }

    /// Writes a clause term onto the heap.
    pub(crate) fn build_code_term(&mut self, term: &CodeTerm) -> Result<Addr, ResourceError> {
        match term {
            CodeTerm::Void => self.heap.push_var(),
            &CodeTerm::Var(slot, true) => {
                let var = self.heap.push_var()?;
                self.set_slot(slot, var.clone());
                Ok(var)
            }
            &CodeTerm::Var(slot, false) => Ok(self.slot(slot)),
            CodeTerm::Con(c) => Ok(Addr::Con(c.clone())),
            CodeTerm::Str(name, args) => {
                let mut addrs = Vec::with_capacity(args.len());

                for arg in args {
                    addrs.push(self.build_code_term(arg)?);
                }

                self.heap.put_structure(name.clone(), addrs)
            }
            CodeTerm::Lis(..) => {
                let root = self.heap.len();

                self.heap.push_var()?;
                self.heap.push_var()?;

                let mut cell = root;
                let mut term = term;

                // lists are built along their spine without recursing
                // on the tail.
                while let CodeTerm::Lis(head, tail) = term {
                    let head = self.build_code_term(head)?;
                    self.heap[cell] = HeapCellValue::Addr(head);

                    if let CodeTerm::Lis(..) = &**tail {
                        let next = self.heap.len();

                        self.heap.push_var()?;
                        self.heap.push_var()?;

                        self.heap[cell + 1] = HeapCellValue::Addr(Addr::Lis(next));
                        cell = next;
                    } else {
                        let tail = self.build_code_term(tail)?;
                        self.heap[cell + 1] = HeapCellValue::Addr(tail);
                    }

                    term = tail;
                }

                Ok(Addr::Lis(root))
            }
        }
    }

    /// Matches a clause term against `addr`, building the remainder of
    /// the term wherever an unbound variable is met.
    pub(crate) fn get_code_term(&mut self, term: &CodeTerm, addr: Addr) -> Result<(), ResourceError> {
        let mut term = term;
        let mut addr = addr;

        loop {
            match term {
                CodeTerm::Void => return Ok(()),
                &CodeTerm::Var(slot, true) => {
                    self.set_slot(slot, addr);
                    return Ok(());
                }
                &CodeTerm::Var(slot, false) => {
                    let value = self.slot(slot);
                    self.unify(value, addr);
                    return Ok(());
                }
                CodeTerm::Con(c) => {
                    match self.deref(addr) {
                        Addr::HeapCell(h) => self.bind(h, Addr::Con(c.clone())),
                        Addr::Con(c1) if c1 == *c => {}
                        _ => self.fail = true,
                    }

                    return Ok(());
                }
                CodeTerm::Lis(head, tail) => match self.deref(addr) {
                    Addr::HeapCell(h) => {
                        let value = self.build_code_term(term)?;
                        self.bind(h, value);
                        return Ok(());
                    }
                    Addr::Lis(l) => {
                        self.get_code_term(head, self.heap[l].as_addr(l))?;

                        if self.fail {
                            return Ok(());
                        }

                        term = tail;
                        addr = self.heap[l + 1].as_addr(l + 1);
                    }
                    _ => {
                        self.fail = true;
                        return Ok(());
                    }
                },
                CodeTerm::Str(name, args) => match self.deref(addr) {
                    Addr::HeapCell(h) => {
                        let value = self.build_code_term(term)?;
                        self.bind(h, value);
                        return Ok(());
                    }
                    Addr::Str(s) => {
                        match &self.heap[s] {
                            HeapCellValue::NamedStr(arity, f) if *arity == args.len() && f == name => {}
                            _ => {
                                self.fail = true;
                                return Ok(());
                            }
                        }

                        let (last, init) = match args.split_last() {
                            Some(split) => split,
                            None => return Ok(()),
                        };

                        for (i, arg) in init.iter().enumerate() {
                            self.get_code_term(arg, self.heap[s + 1 + i].as_addr(s + 1 + i))?;

                            if self.fail {
                                return Ok(());
                            }
                        }

                        let h = s + args.len();

                        term = last;
                        addr = self.heap[h].as_addr(h);
                    }
                    _ => {
                        self.fail = true;
                        return Ok(());
                    }
                },
            }
        }
    }

    pub(crate) fn get_arg(&mut self, arg: usize, term: &CodeTerm) -> Result<(), ResourceError> {
        let addr = self.registers[arg].clone();
        self.get_code_term(term, addr)
    }

    pub(crate) fn put_arg(&mut self, arg: usize, term: &CodeTerm) -> Result<(), ResourceError> {
        let value = self.build_code_term(term)?;
        self.registers[arg] = value;
        Ok(())
    }

    /// The name and arity of a callable term.
    pub(crate) fn name_and_arity(&self, addr: &Addr) -> Option<(Atom, usize)> {
        match addr {
            Addr::Con(Constant::Atom(name)) => Some((name.clone(), 0)),
            Addr::Con(Constant::EmptyList) => Some((atom!("[]"), 0)),
            Addr::Lis(_) => Some((atom!("."), 2)),
            &Addr::Str(s) => match &self.heap[s] {
                HeapCellValue::NamedStr(arity, name) => Some((name.clone(), *arity)),
                HeapCellValue::Addr(_) => None,
            },
            _ => None,
        }
    }

    /// The arguments of a compound term, in order.
    pub(crate) fn compound_args(&self, addr: &Addr) -> Vec<Addr> {
        match addr {
            &Addr::Lis(l) => vec![self.heap[l].as_addr(l), self.heap[l + 1].as_addr(l + 1)],
            &Addr::Str(s) => match &self.heap[s] {
                HeapCellValue::NamedStr(arity, _) => (s + 1..=s + arity)
                    .map(|h| self.heap[h].as_addr(h))
                    .collect(),
                HeapCellValue::Addr(_) => vec![],
            },
            _ => vec![],
        }
    }

    /// Compares two terms in the standard order.
    pub(crate) fn compare_term_test(&self, a: Addr, b: Addr) -> Ordering {
        let mut pdl = vec![(a, b)];

        while let Some((a, b)) = pdl.pop() {
            let a = self.deref(a);
            let b = self.deref(b);

            let ordering = match (&a, &b) {
                (Addr::HeapCell(h1), Addr::HeapCell(h2)) => h1.cmp(h2),
                (Addr::Con(c1), Addr::Con(c2)) => compare_constants(c1, c2),
                _ if a.is_compound() && b.is_compound() => {
                    let (n1, a1) = self.name_and_arity(&a).unwrap_or((atom!("."), 2));
                    let (n2, a2) = self.name_and_arity(&b).unwrap_or((atom!("."), 2));

                    match a1.cmp(&a2).then_with(|| n1.as_str().cmp(n2.as_str())) {
                        Ordering::Equal => {
                            let args1 = self.compound_args(&a);
                            let args2 = self.compound_args(&b);

                            pdl.extend(args1.into_iter().zip(args2).rev());
                            Ordering::Equal
                        }
                        ordering => ordering,
                    }
                }
                _ => category_of(&a).cmp(&category_of(&b)),
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    }

    #[inline]
    pub(crate) fn eq_test(&self, a: Addr, b: Addr) -> bool {
        self.compare_term_test(a, b) == Ordering::Equal
    }
}

// numbers form one category in the standard order.
fn category_of(addr: &Addr) -> u8 {
    match addr.order_category() {
        TermOrderCategory::Variable => 0,
        TermOrderCategory::FloatingPoint | TermOrderCategory::Integer => 1,
        TermOrderCategory::Atom => 2,
        TermOrderCategory::Compound => 3,
    }
}

fn constant_number(c: &Constant) -> Option<f64> {
    match c {
        &Constant::Fixnum(n) => Some(n as f64),
        &Constant::Usize(n) => Some(n as f64),
        Constant::Float(f) => Some(f.into_inner()),
        _ => None,
    }
}

pub(crate) fn compare_constants(c1: &Constant, c2: &Constant) -> Ordering {
    match (c1, c2) {
        (Constant::Fixnum(n1), Constant::Fixnum(n2)) => n1.cmp(n2),
        (Constant::Usize(n1), Constant::Usize(n2)) => n1.cmp(n2),
        _ => match (constant_number(c1), constant_number(c2)) {
            (Some(n1), Some(n2)) => n1.partial_cmp(&n2).unwrap_or(Ordering::Equal).then_with(|| {
                // a float precedes an equal integer.
                let f1 = matches!(c1, Constant::Float(_));
                let f2 = matches!(c2, Constant::Float(_));
                f2.cmp(&f1)
            }),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => {
                let a1 = c1.to_atom().unwrap_or_else(|| atom!("[]"));
                let a2 = c2.to_atom().unwrap_or_else(|| atom!("[]"));

                a1.as_str().cmp(a2.as_str())
            }
        },
    }
}
