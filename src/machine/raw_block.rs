use std::mem;
use std::ops::{Index, IndexMut};

use crate::atom_table::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Region {
    Heap,
    Stack,
    Trail,
    TableSpace,
}

impl Region {
    pub(crate) fn as_atom(self) -> Atom {
        match self {
            Region::Heap => atom!("heap"),
            Region::Stack => atom!("stack"),
            Region::Trail => atom!("trail"),
            Region::TableSpace => atom!("table_space"),
        }
    }
}

/// A region could not grow: either its configured maximum was reached
/// or the allocator refused the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResourceError(pub(crate) Region);

/// Initial and maximum sizes of a region, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegionLimits {
    pub(crate) init_cells: usize,
    pub(crate) max_cells: Option<usize>,
}

impl RegionLimits {
    pub(crate) fn from_kbytes<T>(init_kb: usize, max_kb: Option<usize>) -> Self {
        let cell_size = mem::size_of::<T>().max(1);
        let cells = |kb: usize| kb.saturating_mul(1024) / cell_size;
        let init_cells = cells(init_kb).max(1);

        RegionLimits {
            init_cells,
            max_cells: max_kb.map(|kb| cells(kb).max(init_cells)),
        }
    }
}

/// The logical capacity of a region. Capacity doubles on overflow
/// until the maximum is reached.
#[derive(Debug, Clone)]
pub(crate) struct RegionBudget {
    pub(crate) region: Region,
    pub(crate) capacity: usize,
    pub(crate) max: Option<usize>,
}

impl RegionBudget {
    pub(crate) fn new(region: Region, limits: RegionLimits) -> Self {
        RegionBudget {
            region,
            capacity: limits.init_cells,
            max: limits.max_cells,
        }
    }

    /// Computes a capacity of at least `needed` cells, or fails if the
    /// maximum would be exceeded.
    pub(crate) fn next_capacity(&self, needed: usize) -> Result<usize, ResourceError> {
        if needed <= self.capacity {
            return Ok(self.capacity);
        }

        let mut capacity = self.capacity.max(1);

        while capacity < needed {
            capacity = capacity.saturating_mul(2);
        }

        if let Some(max) = self.max {
            capacity = capacity.min(max);
        }

        if capacity < needed {
            Err(ResourceError(self.region))
        } else {
            Ok(capacity)
        }
    }

    pub(crate) fn ensure(&mut self, needed: usize) -> Result<(), ResourceError> {
        if needed > self.capacity {
            let capacity = self.next_capacity(needed)?;

            tracing::debug!(
                region = ?self.region,
                from = self.capacity,
                to = capacity,
                "growing region"
            );

            self.capacity = capacity;
        }

        Ok(())
    }
}

/// A growable region of cells addressed by offset. Growth reallocates
/// the backing vector; offsets stay valid across a move.
#[derive(Debug, Clone)]
pub(crate) struct RawBlock<T> {
    cells: Vec<T>,
    budget: RegionBudget,
}

impl<T> RawBlock<T> {
    pub(crate) fn new(region: Region, limits: RegionLimits) -> Result<Self, ResourceError> {
        let mut cells = Vec::new();

        cells
            .try_reserve_exact(limits.init_cells)
            .map_err(|_| ResourceError(region))?;

        Ok(RawBlock {
            cells,
            budget: RegionBudget::new(region, limits),
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.budget.capacity
    }

    #[inline]
    pub(crate) fn region(&self) -> Region {
        self.budget.region
    }

    /// Makes room for `extra` more cells.
    pub(crate) fn reserve(&mut self, extra: usize) -> Result<(), ResourceError> {
        let needed = self.cells.len() + extra;

        if needed <= self.budget.capacity {
            return Ok(());
        }

        let capacity = self.budget.next_capacity(needed)?;

        self.cells
            .try_reserve_exact(capacity - self.cells.len())
            .map_err(|_| ResourceError(self.budget.region))?;

        self.budget.ensure(capacity)
    }

    #[inline]
    pub(crate) fn push(&mut self, value: T) -> Result<(), ResourceError> {
        if self.cells.len() >= self.budget.capacity {
            self.reserve(1)?;
        }

        self.cells.push(value);
        Ok(())
    }

    pub(crate) fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) -> Result<(), ResourceError>
    where
        I::IntoIter: ExactSizeIterator,
    {
        let iter = iter.into_iter();
        self.reserve(iter.len())?;
        self.cells.extend(iter);
        Ok(())
    }

    #[inline]
    pub(crate) fn truncate(&mut self, len: usize) {
        self.cells.truncate(len);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<T> {
        self.cells.pop()
    }

    #[inline]
    pub(crate) fn last(&self) -> Option<&T> {
        self.cells.last()
    }

    #[inline]
    pub(crate) fn get(&self, idx: usize) -> Option<&T> {
        self.cells.get(idx)
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[T] {
        &self.cells
    }

    #[inline]
    pub(crate) fn iter(&self) -> std::slice::Iter<T> {
        self.cells.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.cells.clear();
    }
}

impl<T> Index<usize> for RawBlock<T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &T {
        &self.cells[idx]
    }
}

impl<T> IndexMut<usize> for RawBlock<T> {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut T {
        &mut self.cells[idx]
    }
}
