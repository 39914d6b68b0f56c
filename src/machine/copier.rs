use crate::machine::heap::*;
use crate::machine::machine_indices::*;

use fxhash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CompoundLoc {
    Lis(usize),
    Str(usize),
}

enum CopyTask {
    Copy(Addr, usize),
    Leave(CompoundLoc),
}

/// Copies the term at `addr` into a relocatable stub, laying it out
/// as a tree in a canonical order so that variant terms produce equal
/// stubs. Returns the heap variables of the term in order of first
/// occurrence alongside the stub.
///
/// Subterms are memoized only while they are being copied, which is
/// enough to terminate on cyclic terms.
pub(crate) fn copy_to_stub(heap: &[HeapCellValue], addr: Addr) -> (MachineStub, Vec<usize>) {
    let mut stub = vec![HeapCellValue::Addr(Addr::HeapCell(0))];
    let mut var_locs = FxHashMap::<usize, usize>::default();
    let mut vars = vec![];
    let mut on_path = FxHashMap::<CompoundLoc, usize>::default();
    let mut tasks = vec![CopyTask::Copy(addr, 0)];

    while let Some(task) = tasks.pop() {
        let (addr, dst) = match task {
            CopyTask::Copy(addr, dst) => (addr, dst),
            CopyTask::Leave(loc) => {
                on_path.remove(&loc);
                continue;
            }
        };

        match heap_bound_deref(heap, addr) {
            Addr::HeapCell(h) => match var_locs.get(&h) {
                Some(&loc) => stub[dst] = HeapCellValue::Addr(Addr::HeapCell(loc)),
                None => {
                    var_locs.insert(h, dst);
                    vars.push(h);
                    stub[dst] = HeapCellValue::Addr(Addr::HeapCell(dst));
                }
            },
            Addr::Con(c) => {
                stub[dst] = HeapCellValue::Addr(Addr::Con(c));
            }
            Addr::Lis(l) => {
                let loc = CompoundLoc::Lis(l);

                if let Some(&copy) = on_path.get(&loc) {
                    stub[dst] = HeapCellValue::Addr(Addr::Lis(copy));
                    continue;
                }

                let copy = stub.len();

                stub.push(HeapCellValue::Addr(Addr::HeapCell(copy)));
                stub.push(HeapCellValue::Addr(Addr::HeapCell(copy + 1)));
                stub[dst] = HeapCellValue::Addr(Addr::Lis(copy));

                on_path.insert(loc, copy);

                tasks.push(CopyTask::Leave(loc));
                tasks.push(CopyTask::Copy(heap[l + 1].as_addr(l + 1), copy + 1));
                tasks.push(CopyTask::Copy(heap[l].as_addr(l), copy));
            }
            Addr::Str(s) => {
                let loc = CompoundLoc::Str(s);

                if let Some(&copy) = on_path.get(&loc) {
                    stub[dst] = HeapCellValue::Addr(Addr::Str(copy));
                    continue;
                }

                let (arity, name) = match &heap[s] {
                    HeapCellValue::NamedStr(arity, name) => (*arity, name.clone()),
                    HeapCellValue::Addr(_) => unreachable!(),
                };

                let copy = stub.len();

                stub.push(HeapCellValue::NamedStr(arity, name));

                for i in 1..=arity {
                    stub.push(HeapCellValue::Addr(Addr::HeapCell(copy + i)));
                }

                stub[dst] = HeapCellValue::Addr(Addr::Str(copy));
                on_path.insert(loc, copy);

                tasks.push(CopyTask::Leave(loc));

                for i in (1..=arity).rev() {
                    tasks.push(CopyTask::Copy(heap[s + i].as_addr(s + i), copy + i));
                }
            }
        }
    }

    (stub, vars)
}

/// The number of distinct variables in a stub.
pub(crate) fn stub_var_count(stub: &[HeapCellValue]) -> usize {
    stub.iter()
        .enumerate()
        .filter(|(i, cell)| **cell == HeapCellValue::Addr(Addr::HeapCell(*i)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::raw_block::*;
    use crate::parser::ast::*;

    fn heap() -> Heap {
        Heap::new(Region::Heap, RegionLimits { init_cells: 64, max_cells: None }).unwrap()
    }

    #[test]
    fn variants_copy_to_equal_stubs() {
        let mut heap = heap();

        // f(X, g(Y), X) and f(A, g(B), A) built in different places.
        let x = heap.push_var().unwrap();
        let y = heap.push_var().unwrap();
        let g = heap.put_structure(atom!("g"), vec![y]).unwrap();
        let t1 = heap.put_structure(atom!("f"), vec![x.clone(), g, x]).unwrap();

        let _padding = heap.push_var().unwrap();
        let a = heap.push_var().unwrap();
        let b = heap.push_var().unwrap();
        let g = heap.put_structure(atom!("g"), vec![b]).unwrap();
        let t2 = heap.put_structure(atom!("f"), vec![a.clone(), g, a]).unwrap();

        let (s1, v1) = copy_to_stub(heap.as_slice(), t1);
        let (s2, v2) = copy_to_stub(heap.as_slice(), t2);

        assert_eq!(s1, s2);
        assert_eq!(v1.len(), 2);
        assert_eq!(v2.len(), 2);
        assert_eq!(stub_var_count(&s1), 2);
    }

    #[test]
    fn bound_variables_are_followed() {
        let mut heap = heap();
        let x = heap.push_var().unwrap();

        heap[0] = HeapCellValue::Addr(Addr::Con(Constant::Fixnum(7)));

        let (stub, vars) = copy_to_stub(heap.as_slice(), x);

        assert_eq!(stub, vec![HeapCellValue::Addr(Addr::Con(Constant::Fixnum(7)))]);
        assert!(vars.is_empty());
    }

    #[test]
    fn cyclic_terms_terminate() {
        let mut heap = heap();

        // X = f(X)
        let x = heap.push_var().unwrap();
        let f = heap.put_structure(atom!("f"), vec![x]).unwrap();
        heap[0] = HeapCellValue::Addr(f.clone());

        let (stub, _) = copy_to_stub(heap.as_slice(), f);

        assert_eq!(
            stub,
            vec![
                HeapCellValue::Addr(Addr::Str(1)),
                HeapCellValue::NamedStr(1, atom!("f")),
                HeapCellValue::Addr(Addr::Str(1)),
            ]
        );
    }
}
