use crate::atom_table::*;
use crate::machine::heap::*;
use crate::machine::machine_indices::*;
use crate::machine::raw_block::*;
use crate::parser::ast::*;

use fxhash::{FxBuildHasher, FxHashSet};
use indexmap::IndexMap;

/// Source variable names and the heap cells they were written to.
pub(crate) type HeapVarDict = IndexMap<String, Addr, FxBuildHasher>;

#[derive(Debug)]
pub(crate) struct TermWriteResult {
    pub(crate) root: Addr,
    pub(crate) var_dict: HeapVarDict,
}

/// Writes a source term to the heap. Every subterm gets a cell that
/// is filled once its own cells are laid out, so no term is walked
/// recursively.
pub(crate) fn write_term_to_heap(term: &Term, heap: &mut Heap) -> Result<TermWriteResult, ResourceError> {
    let root = heap.len();
    heap.push_var()?;

    let mut var_dict = HeapVarDict::with_hasher(FxBuildHasher::default());
    let mut pending = vec![(term, root)];

    while let Some((term, site)) = pending.pop() {
        let addr = match term {
            Term::AnonVar => continue,
            Term::Var(name) => match var_dict.get(name) {
                Some(&Addr::HeapCell(first)) if first > site => {
                    // keep every occurrence pointing at the oldest cell.
                    heap[first] = HeapCellValue::Addr(Addr::HeapCell(site));
                    var_dict.insert(name.clone(), Addr::HeapCell(site));
                    continue;
                }
                Some(addr) => addr.clone(),
                None => {
                    var_dict.insert(name.clone(), Addr::HeapCell(site));
                    continue;
                }
            },
            Term::Constant(c) => Addr::Con(c.clone()),
            Term::Clause(name, args) if args.is_empty() => Addr::Con(Constant::Atom(name.clone())),
            Term::Clause(name, args) if name.as_str() == "." && args.len() == 2 => {
                let l = heap.len();

                heap.push_var()?;
                heap.push_var()?;

                pending.push((&args[1], l + 1));
                pending.push((&args[0], l));

                Addr::Lis(l)
            }
            Term::Cons(head, tail) => {
                let l = heap.len();

                heap.push_var()?;
                heap.push_var()?;

                pending.push((tail, l + 1));
                pending.push((head, l));

                Addr::Lis(l)
            }
            Term::Clause(name, args) => {
                let s = heap.len();

                heap.reserve(args.len() + 1)?;
                heap.push(HeapCellValue::NamedStr(args.len(), name.clone()))?;

                for _ in args {
                    heap.push_var()?;
                }

                for (i, arg) in args.iter().enumerate().rev() {
                    pending.push((arg, s + 1 + i));
                }

                Addr::Str(s)
            }
        };

        heap[site] = HeapCellValue::Addr(addr);
    }

    Ok(TermWriteResult {
        root: heap_bound_deref(heap.as_slice(), Addr::HeapCell(root)),
        var_dict,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CompoundLoc {
    Lis(usize),
    Str(usize),
}

enum ReadTask {
    Visit(Addr),
    Cons,
    Clause(Atom, usize),
    Leave(CompoundLoc),
}

/// Reads a heap term back as a source term. Unbound cells are named
/// `_V<n>` in order of first occurrence and recorded in `var_names`.
/// Cyclic terms have no source form and give `None`.
pub(crate) fn heap_to_term(
    heap: &[HeapCellValue],
    addr: Addr,
    var_names: &mut IndexMap<usize, String, FxBuildHasher>,
) -> Option<Term> {
    let mut tasks = vec![ReadTask::Visit(addr)];
    let mut on_path = FxHashSet::<CompoundLoc>::default();
    let mut terms: Vec<Term> = vec![];

    while let Some(task) = tasks.pop() {
        match task {
            ReadTask::Visit(addr) => match heap_bound_deref(heap, addr) {
                Addr::HeapCell(h) => {
                    let n = var_names.len();
                    let name = var_names.entry(h).or_insert_with(|| format!("_V{}", n));

                    terms.push(Term::Var(name.clone()));
                }
                Addr::Con(c) => terms.push(Term::Constant(c)),
                Addr::Lis(l) => {
                    let loc = CompoundLoc::Lis(l);

                    if !on_path.insert(loc) {
                        return None;
                    }

                    tasks.push(ReadTask::Leave(loc));
                    tasks.push(ReadTask::Cons);
                    tasks.push(ReadTask::Visit(heap[l + 1].as_addr(l + 1)));
                    tasks.push(ReadTask::Visit(heap[l].as_addr(l)));
                }
                Addr::Str(s) => {
                    let loc = CompoundLoc::Str(s);

                    let (arity, name) = match &heap[s] {
                        HeapCellValue::NamedStr(arity, name) => (*arity, name.clone()),
                        HeapCellValue::Addr(_) => return None,
                    };

                    if !on_path.insert(loc) {
                        return None;
                    }

                    tasks.push(ReadTask::Leave(loc));
                    tasks.push(ReadTask::Clause(name, arity));

                    for i in (1..=arity).rev() {
                        tasks.push(ReadTask::Visit(heap[s + i].as_addr(s + i)));
                    }
                }
            },
            ReadTask::Cons => {
                let tail = terms.pop()?;
                let head = terms.pop()?;

                terms.push(Term::Cons(Box::new(head), Box::new(tail)));
            }
            ReadTask::Clause(name, arity) => {
                let args = terms.split_off(terms.len().checked_sub(arity)?);
                terms.push(Term::Clause(name, args));
            }
            ReadTask::Leave(loc) => {
                on_path.remove(&loc);
            }
        }
    }

    terms.pop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_single_term;

    fn heap() -> Heap {
        Heap::new(Region::Heap, RegionLimits { init_cells: 64, max_cells: None }).unwrap()
    }

    fn read(src: &str) -> Term {
        read_single_term(src, &default_op_dir()).unwrap().unwrap()
    }

    #[test]
    fn shared_variables_point_at_their_oldest_cell() {
        let mut heap = heap();
        let result = write_term_to_heap(&read("f(g(X), X, _, [X|T])"), &mut heap).unwrap();

        let x = result.var_dict["X"].clone();
        let s = match result.root {
            Addr::Str(s) => s,
            addr => panic!("unexpected root {:?}", addr),
        };

        assert_eq!(x, Addr::HeapCell(s + 2));
        assert_eq!(heap_bound_deref(heap.as_slice(), heap[s + 2].as_addr(s + 2)), x);
        assert!(result.var_dict.contains_key("T"));
        assert_eq!(result.var_dict.len(), 2);
    }

    #[test]
    fn terms_read_back_with_fresh_names() {
        let mut heap = heap();
        let term = read("p(X, [a, Y|X], \"hi\") :- q(Y)");
        let result = write_term_to_heap(&term, &mut heap).unwrap();

        let mut var_names = IndexMap::with_hasher(FxBuildHasher::default());
        let back = heap_to_term(heap.as_slice(), result.root, &mut var_names).unwrap();

        assert_eq!(back, read("p(_V0, [a, _V1|_V0], \"hi\") :- q(_V1)"));
        assert_eq!(var_names.len(), 2);
    }

    #[test]
    fn cyclic_terms_have_no_source_form() {
        let mut heap = heap();
        let x = heap.push_var().unwrap();
        let f = heap.put_structure(atom!("f"), vec![x]).unwrap();

        heap[0] = HeapCellValue::Addr(f.clone());

        let mut var_names = IndexMap::with_hasher(FxBuildHasher::default());
        assert_eq!(heap_to_term(heap.as_slice(), f, &mut var_names), None);
    }
}
