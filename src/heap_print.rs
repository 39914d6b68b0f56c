use crate::atom_table::*;
use crate::machine::heap::*;
use crate::machine::machine_indices::*;
use crate::parser::ast::*;

use fxhash::FxHashSet;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CompoundLoc {
    Lis(usize),
    Str(usize),
}

#[derive(Debug, Clone)]
enum TokenOrRedirect {
    Atom(Atom),
    Text(String),
    Char(char),
    /// Print the term at the address, bracketed if its principal
    /// operator binds looser than the priority given. The flag is set
    /// on the operands of operators.
    Redirect(Addr, u16, usize, bool),
    /// The remainder of a list whose opening bracket was written.
    ListTail(Addr, usize, usize),
    Leave(CompoundLoc),
}

pub(crate) fn requires_space(last: char, next: char) -> bool {
    let alnum = |c: char| c.is_alphanumeric() || c == '_';

    (alnum(last) && alnum(next)) || (is_symbol_char(last) && is_symbol_char(next))
}

fn quote_atom(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);

    quoted.push('\'');

    for c in name.chars() {
        match c {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }

    quoted.push('\'');
    quoted
}

/// Writes heap terms as text, in the manner of `write/1`,
/// `writeq/1`, `print/1` and `write_canonical/1`. Printing is driven
/// by an explicit token stack; compound terms met again below
/// themselves print as `...`, so cyclic terms terminate.
#[derive(Debug)]
pub(crate) struct HCPrinter<'a> {
    heap: &'a [HeapCellValue],
    op_dir: &'a OpDir,
    outputter: String,
    state_stack: Vec<TokenOrRedirect>,
    on_path: FxHashSet<CompoundLoc>,
    pub(crate) var_names: IndexMap<usize, String>,
    pub(crate) quoted: bool,
    pub(crate) ignore_ops: bool,
    /// Nesting depth beyond which subterms print as `...`; zero for
    /// no limit.
    pub(crate) max_depth: usize,
}

impl<'a> HCPrinter<'a> {
    pub(crate) fn new(heap: &'a [HeapCellValue], op_dir: &'a OpDir) -> Self {
        HCPrinter {
            heap,
            op_dir,
            outputter: String::new(),
            state_stack: vec![],
            on_path: FxHashSet::default(),
            var_names: IndexMap::new(),
            quoted: false,
            ignore_ops: false,
            max_depth: 0,
        }
    }

    fn append(&mut self, text: &str) {
        if let (Some(last), Some(next)) = (self.outputter.chars().last(), text.chars().next()) {
            if requires_space(last, next) {
                self.outputter.push(' ');
            }
        }

        self.outputter.push_str(text);
    }

    fn print_atom(&mut self, atom: &Atom) {
        if self.quoted && !atom.is_unquoted() {
            let quoted = quote_atom(atom.as_str());
            self.append(&quoted);
        } else {
            self.append(atom.as_str());
        }
    }

    fn op_priority(&self, atom: &Atom) -> Option<u16> {
        [Fixity::In, Fixity::Pre, Fixity::Post]
            .iter()
            .filter_map(|fixity| self.op_dir.get(&(atom.clone(), *fixity)))
            .map(|desc| desc.get_prec())
            .max()
    }

    fn op_desc(&self, name: &Atom, arity: usize) -> Option<OpDesc> {
        if self.ignore_ops {
            return None;
        }

        match arity {
            2 => self.op_dir.get(&(name.clone(), Fixity::In)).cloned(),
            1 => self
                .op_dir
                .get(&(name.clone(), Fixity::Pre))
                .or_else(|| self.op_dir.get(&(name.clone(), Fixity::Post)))
                .cloned(),
            _ => None,
        }
    }

    fn var_name(&self, h: usize) -> String {
        match self.var_names.get(&h) {
            Some(name) => name.clone(),
            None => format!("_{}", h),
        }
    }

    fn depth_exhausted(&self, depth: usize) -> bool {
        self.max_depth > 0 && depth > self.max_depth
    }

    fn print_constant(&mut self, c: &Constant, max_prec: u16, operand: bool) {
        match c {
            Constant::Atom(atom) => {
                let bracketed = !self.ignore_ops
                    && self.op_priority(atom).map(|prec| prec > max_prec).unwrap_or(false);

                if bracketed {
                    self.append("(");
                    self.print_atom(atom);
                    self.append(")");
                } else {
                    self.print_atom(atom);
                }
            }
            Constant::EmptyList => self.append("[]"),
            &Constant::Fixnum(n) if n < 0 && operand => {
                self.append(&format!("({})", n));
            }
            Constant::Float(f) if f.into_inner() < 0.0 && operand => {
                self.append(&format!("({})", format_float(f.into_inner())));
            }
            c => {
                let text = format!("{}", c);
                self.append(&text);
            }
        }
    }

    fn push_args(&mut self, s: usize, arity: usize, depth: usize) {
        for i in (1..=arity).rev() {
            self.state_stack.push(TokenOrRedirect::Redirect(
                self.heap[s + i].as_addr(s + i),
                999,
                depth + 1,
                false,
            ));

            if i > 1 {
                self.state_stack.push(TokenOrRedirect::Char(','));
            }
        }
    }

    fn format_struct(&mut self, s: usize, name: Atom, arity: usize, max_prec: u16, depth: usize) {
        if !self.ignore_ops && name.as_str() == "{}" && arity == 1 {
            self.state_stack.push(TokenOrRedirect::Char('}'));
            self.state_stack.push(TokenOrRedirect::Redirect(
                self.heap[s + 1].as_addr(s + 1),
                1200,
                depth + 1,
                false,
            ));
            self.append("{");
            return;
        }

        let desc = match self.op_desc(&name, arity) {
            Some(desc) => desc,
            None => {
                self.state_stack.push(TokenOrRedirect::Char(')'));
                self.push_args(s, arity, depth);
                self.print_atom(&name);
                self.outputter.push('(');
                return;
            }
        };

        let (prec, spec) = desc.get();
        let (left_prec, right_prec) = spec.arg_priorities(prec);
        let bracketed = prec > max_prec;

        if bracketed {
            self.state_stack.push(TokenOrRedirect::Char(')'));
        }

        let heap = self.heap;
        let arg = |i: usize| heap[s + i].as_addr(s + i);

        if arity == 2 {
            self.state_stack
                .push(TokenOrRedirect::Redirect(arg(2), right_prec, depth + 1, true));

            match name.as_str() {
                "," => self.state_stack.push(TokenOrRedirect::Text(",".to_string())),
                "|" => self.state_stack.push(TokenOrRedirect::Text("|".to_string())),
                _ if name.chars_alphanumeric() => {
                    self.state_stack.push(TokenOrRedirect::Char(' '));
                    self.state_stack.push(TokenOrRedirect::Atom(name));
                    self.state_stack.push(TokenOrRedirect::Char(' '));
                }
                _ => self.state_stack.push(TokenOrRedirect::Atom(name)),
            }

            self.state_stack
                .push(TokenOrRedirect::Redirect(arg(1), left_prec, depth + 1, true));
        } else if spec.is_prefix() {
            let operand = heap_bound_deref(heap, arg(1));

            self.state_stack
                .push(TokenOrRedirect::Redirect(operand.clone(), right_prec, depth + 1, true));

            // keeps -(1) from reading back as the integer -1.
            let numeric_operand = matches!(
                operand,
                Addr::Con(Constant::Fixnum(_)) | Addr::Con(Constant::Float(_))
            );

            if numeric_operand || name.chars_alphanumeric() {
                self.state_stack.push(TokenOrRedirect::Char(' '));
            }

            self.state_stack.push(TokenOrRedirect::Atom(name));
        } else {
            self.state_stack.push(TokenOrRedirect::Atom(name));
            self.state_stack
                .push(TokenOrRedirect::Redirect(arg(1), left_prec, depth + 1, true));
        }

        if bracketed {
            self.append("(");
        }
    }

    fn print_list_tail(&mut self, addr: Addr, count: usize, depth: usize) {
        match heap_bound_deref(self.heap, addr) {
            Addr::Con(Constant::EmptyList) => self.outputter.push(']'),
            Addr::Lis(l) => {
                let loc = CompoundLoc::Lis(l);

                if self.on_path.contains(&loc) || self.depth_exhausted(count) {
                    self.outputter.push_str("|...]");
                    return;
                }

                self.on_path.insert(loc);

                self.state_stack.push(TokenOrRedirect::Leave(loc));
                self.state_stack.push(TokenOrRedirect::ListTail(
                    self.heap[l + 1].as_addr(l + 1),
                    count + 1,
                    depth,
                ));
                self.state_stack.push(TokenOrRedirect::Redirect(
                    self.heap[l].as_addr(l),
                    999,
                    depth + 1,
                    false,
                ));

                if count > 0 {
                    self.outputter.push(',');
                }
            }
            tail => {
                self.state_stack.push(TokenOrRedirect::Char(']'));
                self.state_stack.push(TokenOrRedirect::Redirect(tail, 999, depth + 1, false));
                self.outputter.push('|');
            }
        }
    }

    fn print_term(&mut self, addr: Addr, max_prec: u16, depth: usize, operand: bool) {
        if self.depth_exhausted(depth) {
            self.append("...");
            return;
        }

        match heap_bound_deref(self.heap, addr) {
            Addr::HeapCell(h) => {
                let name = self.var_name(h);
                self.append(&name);
            }
            Addr::Con(c) => self.print_constant(&c, max_prec, operand),
            Addr::Lis(l) => {
                let loc = CompoundLoc::Lis(l);

                if self.on_path.contains(&loc) {
                    self.append("...");
                    return;
                }

                self.append("[");
                self.print_list_tail(Addr::Lis(l), 0, depth);
            }
            Addr::Str(s) => {
                let loc = CompoundLoc::Str(s);

                if self.on_path.contains(&loc) {
                    self.append("...");
                    return;
                }

                let (arity, name) = match &self.heap[s] {
                    HeapCellValue::NamedStr(arity, name) => (*arity, name.clone()),
                    HeapCellValue::Addr(_) => return,
                };

                self.on_path.insert(loc);
                self.state_stack.push(TokenOrRedirect::Leave(loc));

                self.format_struct(s, name, arity, max_prec, depth);
            }
        }
    }

    /// Prints the term at `addr` and returns the text.
    pub(crate) fn print(mut self, addr: Addr) -> String {
        self.state_stack.push(TokenOrRedirect::Redirect(addr, 1200, 0, false));

        while let Some(token) = self.state_stack.pop() {
            match token {
                TokenOrRedirect::Atom(atom) => self.print_atom(&atom),
                TokenOrRedirect::Text(text) => self.outputter.push_str(&text),
                TokenOrRedirect::Char(c) => self.outputter.push(c),
                TokenOrRedirect::Redirect(addr, max_prec, depth, operand) => {
                    self.print_term(addr, max_prec, depth, operand)
                }
                TokenOrRedirect::ListTail(addr, count, depth) => self.print_list_tail(addr, count, depth),
                TokenOrRedirect::Leave(loc) => {
                    self.on_path.remove(&loc);
                }
            }
        }

        self.outputter
    }
}

trait AlphanumericName {
    fn chars_alphanumeric(&self) -> bool;
}

impl AlphanumericName for Atom {
    #[inline]
    fn chars_alphanumeric(&self) -> bool {
        self.as_str()
            .chars()
            .next()
            .map(|c| c.is_alphabetic())
            .unwrap_or(false)
    }
}

/// Prints a stub, such as an exception ball, quoted.
pub(crate) fn print_stub(stub: &[HeapCellValue], op_dir: &OpDir) -> String {
    let mut printer = HCPrinter::new(stub, op_dir);
    printer.quoted = true;
    printer.print(Addr::HeapCell(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::raw_block::*;

    fn heap() -> Heap {
        Heap::new(Region::Heap, RegionLimits { init_cells: 64, max_cells: None }).unwrap()
    }

    fn fixnum(n: i64) -> Addr {
        Addr::Con(Constant::Fixnum(n))
    }

    fn atom(name: &str) -> Addr {
        Addr::Con(Constant::Atom(atom!(name)))
    }

    fn print(heap: &Heap, addr: Addr, quoted: bool, ignore_ops: bool) -> String {
        let op_dir = default_op_dir();
        let mut printer = HCPrinter::new(heap.as_slice(), &op_dir);

        printer.quoted = quoted;
        printer.ignore_ops = ignore_ops;
        printer.print(addr)
    }

    #[test]
    fn operators_and_brackets() {
        let mut heap = heap();

        // (1 + 2) * 3
        let sum = heap.put_structure(atom!("+"), vec![fixnum(1), fixnum(2)]).unwrap();
        let prod = heap.put_structure(atom!("*"), vec![sum.clone(), fixnum(3)]).unwrap();

        assert_eq!(print(&heap, prod.clone(), false, false), "(1+2)*3");
        assert_eq!(print(&heap, prod, true, true), "*(+(1,2),3)");

        // 1 - (-1), a :- b, c
        let diff = heap.put_structure(atom!("-"), vec![fixnum(1), fixnum(-1)]).unwrap();
        assert_eq!(print(&heap, diff, false, false), "1-(-1)");

        let conj = heap.put_structure(atom!(","), vec![atom("b"), atom("c")]).unwrap();
        let clause = heap.put_structure(atom!(":-"), vec![atom("a"), conj]).unwrap();
        assert_eq!(print(&heap, clause, false, false), "a:-b,c");

        let is = heap.put_structure(atom!("is"), vec![atom("x"), sum]).unwrap();
        assert_eq!(print(&heap, is, false, false), "x is 1+2");

        let neg = heap.put_structure(atom!("-"), vec![fixnum(1)]).unwrap();
        assert_eq!(print(&heap, neg, false, false), "- 1");
    }

    #[test]
    fn lists_and_quoting() {
        let mut heap = heap();

        let list = heap
            .iter_to_heap_list(vec![atom("a"), atom("B c"), fixnum(3)].into_iter())
            .unwrap();

        assert_eq!(print(&heap, list.clone(), false, false), "[a,B c,3]");
        assert_eq!(print(&heap, list, true, false), "[a,'B c',3]");

        let var = heap.push_var().unwrap();
        let partial = heap.put_structure(atom!("."), vec![atom("x"), var]).unwrap();

        assert!(print(&heap, partial, false, false).starts_with("[x|_"));

        let curly = heap.put_structure(atom!("{}"), vec![atom("a")]).unwrap();
        assert_eq!(print(&heap, curly, false, false), "{a}");

        let quote = atom("it's");
        assert_eq!(print(&heap, quote, true, false), "'it\\'s'");
    }

    #[test]
    fn cyclic_terms_print_finitely() {
        let mut heap = heap();

        // X = f(X)
        let x = heap.push_var().unwrap();
        let f = heap.put_structure(atom!("f"), vec![x]).unwrap();
        heap[0] = HeapCellValue::Addr(f.clone());

        assert_eq!(print(&heap, f, false, false), "f(...)");

        // L = [a|L]
        let l = heap.len();
        heap.push_addr(atom("a")).unwrap();
        heap.push_addr(Addr::Lis(l)).unwrap();

        assert_eq!(print(&heap, Addr::Lis(l), false, false), "[a|...]");
    }
}
