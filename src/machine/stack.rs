use std::ops::{Index, IndexMut};

use smallvec::SmallVec;

use crate::instructions::ClauseList;
use crate::machine::machine_indices::*;
use crate::machine::raw_block::*;
use crate::parser::ast::*;

// bookkeeping cells charged to each frame kind against the stack budget.
const AND_FRAME_PRELUDE_CELLS: usize = 3;
const OR_FRAME_PRELUDE_CELLS: usize = 8;

/// An environment: the activation record of a clause that calls
/// other predicates or keeps variables across goals.
#[derive(Debug, Clone)]
pub(crate) struct AndFrame {
    pub(crate) e: usize,
    pub(crate) cp: CodePtr,
    /// The lowest choice point a pending cut of this activation may
    /// remove, if the clause cuts at all.
    pub(crate) cut_b0: Option<usize>,
    perms: SmallVec<[Addr; 6]>,
}

impl AndFrame {
    pub(crate) fn new(e: usize, cp: CodePtr, cut_b0: Option<usize>, num_cells: usize) -> Self {
        AndFrame {
            e,
            cp,
            cut_b0,
            perms: SmallVec::from_elem(Addr::Con(Constant::EmptyList), num_cells),
        }
    }

    #[inline]
    pub(crate) fn num_cells(&self) -> usize {
        self.perms.len()
    }

    #[inline]
    fn cells(&self) -> usize {
        AND_FRAME_PRELUDE_CELLS + self.perms.len()
    }
}

// permanent variables are numbered from 1.
impl Index<usize> for AndFrame {
    type Output = Addr;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.perms[index - 1]
    }
}

impl IndexMut<usize> for AndFrame {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.perms[index - 1]
    }
}

/// What a choice point does when backtracking reaches it.
#[derive(Debug, Clone)]
pub(crate) enum Alternative {
    /// Try `clauses[next]`; the last alternative pops the frame.
    Clauses {
        clauses: ClauseList,
        next: usize,
        end: usize,
        cuts: bool,
    },
    /// Installed by `catch/3`. Backtracking simply removes it.
    Catch,
    /// Boundary of a nested evaluation. Backtracking stops here.
    Barrier,
    /// Replays the answers of a table entry.
    TableAnswers {
        entry: usize,
        generation: u64,
        next: usize,
    },
    /// The remaining alternatives were handed to the shared tree.
    Shared,
}

#[derive(Debug, Clone)]
pub(crate) struct OrFrame {
    pub(crate) e: usize,
    pub(crate) cp: CodePtr,
    pub(crate) b0: usize,
    pub(crate) tr: usize,
    pub(crate) h: usize,
    pub(crate) and_len: usize,
    pub(crate) args: Vec<Addr>,
    pub(crate) alt: Alternative,
    /// Set on the choice points a worker inherited with a shared
    /// snapshot; backtracking into one ends the worker's task.
    pub(crate) foreign: bool,
}

impl OrFrame {
    #[inline]
    fn cells(&self) -> usize {
        OR_FRAME_PRELUDE_CELLS + self.args.len()
    }
}

/// The local stack: environments and choice points drawn from one
/// budget.
#[derive(Debug, Clone)]
pub(crate) struct Stack {
    and_frames: Vec<AndFrame>,
    or_frames: Vec<OrFrame>,
    budget: RegionBudget,
    cells: usize,
}

impl Stack {
    pub(crate) fn new(limits: RegionLimits) -> Result<Self, ResourceError> {
        let mut and_frames = Vec::new();

        and_frames
            .try_reserve(limits.init_cells / 8)
            .map_err(|_| ResourceError(Region::Stack))?;

        let mut stack = Stack {
            and_frames,
            or_frames: vec![],
            budget: RegionBudget::new(Region::Stack, limits),
            cells: 0,
        };

        stack.allocate_and_frame(0, Self::root_frame())?;
        Ok(stack)
    }

    // frame 0 is the environment of the query itself.
    fn root_frame() -> AndFrame {
        AndFrame::new(0, CodePtr::default(), None, 0)
    }

    /// Drops every frame but a fresh root frame. The budget only grows,
    /// and `new` already admitted the root frame, so no check is made.
    pub(crate) fn reset(&mut self) {
        let root = Self::root_frame();

        self.and_frames.clear();
        self.or_frames.clear();
        self.cells = root.cells();
        self.and_frames.push(root);
    }

    #[inline]
    pub(crate) fn cells(&self) -> usize {
        self.cells
    }

    #[inline]
    pub(crate) fn and_len(&self) -> usize {
        self.and_frames.len()
    }

    #[inline]
    pub(crate) fn or_len(&self) -> usize {
        self.or_frames.len()
    }

    /// Places `frame` at index `at`, discarding every frame above it.
    pub(crate) fn allocate_and_frame(&mut self, at: usize, frame: AndFrame) -> Result<(), ResourceError> {
        self.truncate_and_frames(at);
        self.budget.ensure(self.cells + frame.cells())?;

        self.cells += frame.cells();
        self.and_frames.push(frame);

        Ok(())
    }

    pub(crate) fn truncate_and_frames(&mut self, len: usize) {
        while self.and_frames.len() > len {
            if let Some(frame) = self.and_frames.pop() {
                self.cells -= frame.cells();
            }
        }
    }

    pub(crate) fn push_or_frame(&mut self, frame: OrFrame) -> Result<(), ResourceError> {
        self.budget.ensure(self.cells + frame.cells())?;

        self.cells += frame.cells();
        self.or_frames.push(frame);

        Ok(())
    }

    pub(crate) fn truncate_or_frames(&mut self, len: usize) {
        while self.or_frames.len() > len {
            if let Some(frame) = self.or_frames.pop() {
                self.cells -= frame.cells();
            }
        }
    }

    #[inline]
    pub(crate) fn and_frame(&self, e: usize) -> &AndFrame {
        &self.and_frames[e]
    }

    #[inline]
    pub(crate) fn and_frame_mut(&mut self, e: usize) -> &mut AndFrame {
        &mut self.and_frames[e]
    }

    #[inline]
    pub(crate) fn or_frame(&self, b: usize) -> &OrFrame {
        &self.or_frames[b]
    }

    #[inline]
    pub(crate) fn or_frame_mut(&mut self, b: usize) -> &mut OrFrame {
        &mut self.or_frames[b]
    }

    #[inline]
    pub(crate) fn top_or_frame(&self) -> Option<&OrFrame> {
        self.or_frames.last()
    }

    pub(crate) fn or_frames(&self) -> &[OrFrame] {
        &self.or_frames
    }

    /// Flags the first `len` choice points as inherited from another
    /// worker.
    pub(crate) fn mark_foreign(&mut self, len: usize) {
        for frame in self.or_frames.iter_mut().take(len) {
            frame.foreign = true;
        }
    }

    /// Copies the frames visible from choice point `b`: the
    /// environments below its mark and the choice points up to and
    /// including it.
    pub(crate) fn snapshot(&self, b: usize) -> Stack {
        let frame = &self.or_frames[b];
        let and_frames = self.and_frames[..frame.and_len].to_vec();
        let or_frames = self.or_frames[..=b].to_vec();

        let cells = and_frames.iter().map(AndFrame::cells).sum::<usize>()
            + or_frames.iter().map(OrFrame::cells).sum::<usize>();

        Stack {
            and_frames,
            or_frames,
            budget: self.budget.clone(),
            cells,
        }
    }
}
