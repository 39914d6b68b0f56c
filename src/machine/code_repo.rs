use crate::instructions::*;
use crate::machine::machine_indices::*;

/// Where `'$query'` clauses return to. Reaching it ends a run with
/// success.
pub(crate) const QUERY_SUCCESS: usize = 0;

/// Calls the goal in A1.
pub(crate) const CALL_GOAL: usize = 1;

/// The body of `catch/3`.
pub(crate) const CATCH: usize = 2;

/// Runs the recovery goal of `catch/3`, moved into A1 by the thrower.
pub(crate) const CATCH_RECOVERY: usize = 8;

/// The compiled code shared by every worker. Code is only ever
/// appended, so a pointer into it stays valid while the predicate it
/// belongs to is redefined.
#[derive(Debug, Clone)]
pub(crate) struct CodeRepo {
    pub(crate) code: Vec<Instruction>,
}

impl Default for CodeRepo {
    fn default() -> Self {
        CodeRepo::new()
    }
}

impl CodeRepo {
    pub(crate) fn new() -> Self {
        let code = vec![
            // QUERY_SUCCESS
            Instruction::QuerySuccess,
            // CALL_GOAL
            Instruction::ExecuteN(1),
            // CATCH
            Instruction::Allocate(1, CutScope::None),
            Instruction::InstallCatch(1),
            Instruction::CallN(1),
            Instruction::ExitCatch(1),
            Instruction::Deallocate,
            Instruction::Proceed,
            // CATCH_RECOVERY
            Instruction::Deallocate,
            Instruction::ExecuteN(1),
        ];

        CodeRepo { code }
    }

    /// The size the code will have once `code` is appended, i.e. the
    /// origin to compile it at.
    #[inline]
    pub(crate) fn next_origin(&self) -> CodePtr {
        CodePtr::Dir(self.code.len())
    }

    pub(crate) fn append(&mut self, code: Vec<Instruction>) -> CodePtr {
        let entry = self.next_origin();
        self.code.extend(code);
        entry
    }
}
