use crate::machine::heap::*;
use crate::machine::machine_indices::*;
use crate::machine::raw_block::*;
use crate::machine::stack::*;
use crate::parser::ast::*;

/// Registers beyond the largest arity, for the extra arguments of
/// `call/N`.
pub(crate) const NUM_REGISTERS: usize = MAX_ARITY + 9;

/// Initial and maximum sizes of the three runtime regions.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemoryLimits {
    pub(crate) heap: RegionLimits,
    pub(crate) stack: RegionLimits,
    pub(crate) trail: RegionLimits,
}

/// The registers and stacks of one engine.
#[derive(Debug, Clone)]
pub(crate) struct MachineState {
    pub(crate) heap: Heap,
    pub(crate) trail: RawBlock<usize>,
    pub(crate) stack: Stack,
    pub(crate) registers: Vec<Addr>,
    pub(crate) p: CodePtr,
    pub(crate) cp: CodePtr,
    pub(crate) e: usize,
    pub(crate) b0: usize,
    pub(crate) num_of_args: usize,
    pub(crate) hb: usize,
    pub(crate) fail: bool,
    /// Set when a binding could not be trailed. The dispatcher turns
    /// it into a resource error before doing anything else.
    pub(crate) overflow: Option<ResourceError>,
    /// Choice points below this index belong to another worker and
    /// are out of reach of cut.
    pub(crate) foreign_len: usize,
    pub(crate) flags: MachineFlags,
    pub(crate) limits: MemoryLimits,
}

impl MachineState {
    pub(crate) fn new(limits: MemoryLimits) -> Result<Self, ResourceError> {
        Ok(MachineState {
            heap: Heap::new(Region::Heap, limits.heap)?,
            trail: RawBlock::new(Region::Trail, limits.trail)?,
            stack: Stack::new(limits.stack)?,
            registers: vec![Addr::Con(Constant::EmptyList); NUM_REGISTERS],
            p: CodePtr::default(),
            cp: CodePtr::default(),
            e: 0,
            b0: 0,
            num_of_args: 0,
            hb: 0,
            fail: false,
            overflow: None,
            foreign_len: 0,
            flags: MachineFlags::default(),
            limits,
        })
    }

    /// Discards every term, frame and binding.
    pub(crate) fn reset(&mut self) {
        self.heap.clear();
        self.trail.clear();
        self.stack.reset();

        self.p = CodePtr::default();
        self.cp = CodePtr::default();
        self.e = 0;
        self.b0 = 0;
        self.num_of_args = 0;
        self.hb = 0;
        self.fail = false;
        self.overflow = None;
        self.foreign_len = 0;
    }

    #[inline]
    pub(crate) fn b(&self) -> usize {
        self.stack.or_len()
    }

    #[inline]
    pub(crate) fn deref(&self, addr: Addr) -> Addr {
        heap_bound_deref(self.heap.as_slice(), addr)
    }

    /// The value held by a cell, dereferenced.
    #[inline]
    pub(crate) fn deref_cell(&self, h: usize) -> Addr {
        self.deref(self.heap[h].as_addr(h))
    }

    #[inline]
    pub(crate) fn deref_register(&self, i: usize) -> Addr {
        self.deref(self.registers[i].clone())
    }
}
