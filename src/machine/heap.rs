use crate::atom_table::*;
use crate::machine::machine_indices::*;
use crate::machine::raw_block::*;
use crate::parser::ast::*;

pub(crate) type Heap = RawBlock<HeapCellValue>;

/// A term copied off the heap. Cell 0 holds the root; pointers are
/// relative to the start of the stub.
pub(crate) type MachineStub = Vec<HeapCellValue>;

// sometimes we need to dereference variables with only the heap at
// hand, e.g. while reading a stub or a copied snapshot.
pub(crate) fn heap_bound_deref(heap: &[HeapCellValue], mut addr: Addr) -> Addr {
    loop {
        match addr {
            Addr::HeapCell(h) => match &heap[h] {
                HeapCellValue::Addr(Addr::HeapCell(h1)) if *h1 == h => return addr,
                HeapCellValue::Addr(a) => addr = a.clone(),
                HeapCellValue::NamedStr(..) => return Addr::Str(h),
            },
            _ => return addr,
        }
    }
}

impl Heap {
    #[inline]
    pub(crate) fn push_var(&mut self) -> Result<Addr, ResourceError> {
        let h = self.len();
        self.push(HeapCellValue::Addr(Addr::HeapCell(h)))?;
        Ok(Addr::HeapCell(h))
    }

    #[inline]
    pub(crate) fn push_addr(&mut self, addr: Addr) -> Result<(), ResourceError> {
        self.push(HeapCellValue::Addr(addr))
    }

    /// Writes `name(args...)` and returns its address. A zero arity
    /// structure is just its atom.
    pub(crate) fn put_structure(&mut self, name: Atom, args: Vec<Addr>) -> Result<Addr, ResourceError> {
        if args.is_empty() {
            return Ok(Addr::Con(Constant::Atom(name)));
        }

        if name.as_str() == "." && args.len() == 2 {
            let l = self.len();
            self.extend(args.into_iter().map(HeapCellValue::Addr))?;
            return Ok(Addr::Lis(l));
        }

        let s = self.len();

        self.reserve(args.len() + 1)?;
        self.push(HeapCellValue::NamedStr(args.len(), name))?;
        self.extend(args.into_iter().map(HeapCellValue::Addr))?;

        Ok(Addr::Str(s))
    }

    pub(crate) fn iter_to_heap_list<I>(&mut self, values: I) -> Result<Addr, ResourceError>
    where
        I: ExactSizeIterator<Item = Addr>,
    {
        let len = values.len();

        if len == 0 {
            return Ok(Addr::Con(Constant::EmptyList));
        }

        let head_addr = self.len();
        self.reserve(2 * len)?;

        for (i, value) in values.enumerate() {
            self.push(HeapCellValue::Addr(value))?;

            if i + 1 < len {
                self.push(HeapCellValue::Addr(Addr::Lis(head_addr + 2 * (i + 1))))?;
            } else {
                self.push(HeapCellValue::Addr(Addr::Con(Constant::EmptyList)))?;
            }
        }

        Ok(Addr::Lis(head_addr))
    }

    /// Appends a stub at the top of the heap, relocating its pointers,
    /// and returns the address of its root.
    pub(crate) fn write_stub(&mut self, stub: &[HeapCellValue]) -> Result<Addr, ResourceError> {
        let h = self.len();

        self.extend(stub.iter().cloned().map(|cell| cell.relocate(h)))?;

        Ok(heap_bound_deref(self.as_slice(), Addr::HeapCell(h)))
    }
}
