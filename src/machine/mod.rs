pub(crate) mod arithmetic_ops;
pub(crate) mod code_repo;
pub mod config;
pub(crate) mod copier;
pub(crate) mod dispatch;
pub(crate) mod heap;
pub mod lib_machine;
pub(crate) mod loader;
pub mod machine_errors;
pub(crate) mod machine_indices;
pub(crate) mod machine_state;
pub(crate) mod machine_state_impl;
pub(crate) mod parallel;
pub(crate) mod raw_block;
pub(crate) mod stack;
pub mod streams;
pub(crate) mod system_calls;
pub(crate) mod tabling;
pub(crate) mod unify;

use crate::atom_table::*;
use crate::codegen::*;
use crate::instructions::*;
use crate::machine::code_repo::*;
use crate::machine::config::MachineConfig;
use crate::machine::heap::*;
use crate::machine::loader::LoadMode;
use crate::forms::PredicateKey;
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::*;
use crate::machine::machine_state::*;
use crate::machine::parallel::WorkerLink;
use crate::machine::streams::*;
use crate::machine::tabling::TableStore;
use crate::parser::ast::*;

use derive_more::{Deref, DerefMut};
use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Compiled control constructs reached through `call/N`, keyed by the
/// variant stub of the goal.
#[derive(Debug, Clone, Default, Deref, DerefMut)]
pub(crate) struct MetaCallCache(IndexMap<MachineStub, CodePtr, FxBuildHasher>);

/// A Prolog engine: its stacks, compiled code, tables and streams.
///
/// Build one with [`MachineBuilder`](crate::MachineBuilder), then
/// [`consult_module_string`](Machine::consult_module_string) programs
/// and [`run_query`](Machine::run_query) goals.
#[derive(Debug, Clone)]
pub struct Machine {
    pub(crate) machine_st: MachineState,
    pub(crate) code_repo: Arc<CodeRepo>,
    pub(crate) indices: Arc<IndexStore>,
    pub(crate) local_code: Arc<Vec<Instruction>>,
    pub(crate) meta_cache: MetaCallCache,
    pub(crate) tables: TableStore,
    pub(crate) global_values: IndexMap<Atom, MachineStub, FxBuildHasher>,
    pub(crate) streams: Streams,
    pub(crate) config: MachineConfig,
    pub(crate) interrupt: Arc<AtomicBool>,
    pub(crate) halted: Option<i32>,
    pub(crate) worker: Option<WorkerLink>,
    pub(crate) cycles: usize,
}

assert_impl_all!(Machine: Send, Clone);

impl Machine {
    pub(crate) fn new(config: MachineConfig, streams: Streams) -> Result<Self, StartupError> {
        let machine_st = MachineState::new(config.memory_limits())?;

        let mut indices = IndexStore::default();

        indices.code_dir.insert(
            (atom!("catch"), 3),
            CodeIndex::at(CodePtr::Dir(CATCH), false),
        );

        let mut machine = Machine {
            machine_st,
            code_repo: Arc::new(CodeRepo::new()),
            indices: Arc::new(indices),
            local_code: Arc::new(vec![]),
            meta_cache: MetaCallCache::default(),
            tables: TableStore::new(config.table_space_cells()),
            global_values: IndexMap::with_hasher(FxBuildHasher::default()),
            streams,
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
            halted: None,
            worker: None,
            cycles: 0,
        };

        machine.load_prelude()?;
        machine.add_defines()?;

        if let Some(path) = machine.config.saved_state.clone() {
            if !path.is_file() {
                return Err(StartupError::MissingSavedState(path.display().to_string()));
            }

            tracing::debug!(path = %path.display(), "restoring saved state");
            machine.consult_file(&path, LoadMode::Boot)?;

            if machine.halted.is_some() {
                return Ok(machine);
            }
        }

        if let Some(path) = machine.config.boot_file.clone() {
            if !path.exists() {
                return Err(StartupError::MissingBootFile(path.display().to_string()));
            }

            tracing::debug!(path = %path.display(), "booting");
            machine.consult_file(&path, LoadMode::Boot)?;
        }

        Ok(machine)
    }

    // -D definitions become '$define'/2 facts.
    fn add_defines(&mut self) -> Result<(), SessionError> {
        if self.config.defines.is_empty() {
            return Ok(());
        }

        let key = (atom!("$define"), 2);
        let facts: Vec<Term> = self
            .config
            .defines
            .iter()
            .map(|(var, value)| {
                Term::Clause(
                    atom!("$define"),
                    vec![Term::atom(var), Term::atom(value)],
                )
            })
            .collect();

        Arc::make_mut(&mut self.indices).skeleton_mut(&key).is_dynamic = true;

        self.install_clauses(key, facts, true)
            .map_err(|error| SessionError::Compilation {
                file: "<defines>".to_string(),
                line: 0,
                error,
            })
    }

    /// A flag that stops every running query when set, as Ctrl-C does.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// The exit code requested by `halt/0,1`, if a goal halted.
    pub fn halted(&self) -> Option<i32> {
        self.halted
    }

    /// Drains the text written to a memory output stream.
    pub fn take_output(&self) -> Option<String> {
        self.streams.user_output.take_memory()
    }

    /// Discards every term, frame, binding and the code of past
    /// queries. Compiled predicates and tables survive.
    pub(crate) fn reset(&mut self) {
        self.machine_st.reset();
        self.local_code = Arc::new(vec![]);
        self.meta_cache.clear();
        self.interrupt.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Compiles the clauses of `key` and points its entry at the new
    /// code. `replace` drops the clauses it had before.
    pub(crate) fn install_clauses(
        &mut self,
        key: PredicateKey,
        clauses: Vec<Term>,
        replace: bool,
    ) -> Result<(), CompilationError> {
        let indices = Arc::make_mut(&mut self.indices);
        let skeleton = indices.skeleton_mut(&key);

        if replace {
            skeleton.clauses.clear();
            skeleton.compiled.clear();
        }

        if skeleton.is_incremental() {
            if replace {
                indices.code_dir.insert(
                    key.clone(),
                    CodeIndex {
                        entry: CodeEntry::Dynamic(Arc::new(IndexTable::new())),
                        tabled: false,
                    },
                );
            }

            for clause in clauses {
                self.add_dynamic_clause(&key, clause, false)?;
            }

            return Ok(());
        }

        skeleton.clauses.extend(clauses);
        skeleton.compiled.clear();

        let origin = self.code_repo.next_origin();
        let code = compile_predicate(&skeleton.clauses, origin)?;
        let tabled = skeleton.is_tabled;

        let entry = Arc::make_mut(&mut self.code_repo).append(code);
        indices.code_dir.insert(key, CodeIndex::at(entry, tabled));

        Ok(())
    }

    /// Compiles `clause` alone and adds it to the index of the dynamic
    /// predicate `key`, first or last. Only the new clause is compiled.
    pub(crate) fn add_dynamic_clause(
        &mut self,
        key: &PredicateKey,
        clause: Term,
        front: bool,
    ) -> Result<(), CompilationError> {
        if !self.indices.predicates.get(key).map(PredicateSkeleton::is_incremental).unwrap_or(true) {
            // tabled predicates are compiled whole.
            let skeleton = Arc::make_mut(&mut self.indices).skeleton_mut(key);

            if front {
                skeleton.clauses.insert(0, clause);
            } else {
                skeleton.clauses.push(clause);
            }

            return self.install_clauses(key.clone(), vec![], false);
        }

        let origin = self.code_repo.next_origin();
        let compiled = compile_clause(&clause, origin)?;
        let entry = Arc::make_mut(&mut self.code_repo).append(compiled.code);

        let clause_entry = ClauseEntry {
            key: compiled.key,
            entry,
            cuts: compiled.cuts,
        };

        let indices = Arc::make_mut(&mut self.indices);
        let skeleton = indices.skeleton_mut(key);

        skeleton.is_dynamic = true;

        if front {
            skeleton.clauses.insert(0, clause);
            skeleton.compiled.insert(0, clause_entry);

            let table = index_clauses(&skeleton.compiled);
            indices.code_dir.insert(key.clone(), CodeIndex {
                entry: CodeEntry::Dynamic(Arc::new(table)),
                tabled: false,
            });

            return Ok(());
        }

        skeleton.clauses.push(clause);
        skeleton.compiled.push(clause_entry.clone());

        let rebuilt = match indices.code_dir.get(key) {
            Some(CodeIndex { entry: CodeEntry::Dynamic(_), .. }) => None,
            _ => Some(index_clauses(&indices.skeleton_mut(key).compiled)),
        };

        match (rebuilt, indices.code_dir.get_mut(key)) {
            (None, Some(CodeIndex { entry: CodeEntry::Dynamic(table), .. })) => {
                Arc::make_mut(table).push_clause(&clause_entry.key, clause_entry.entry, clause_entry.cuts);
            }
            (rebuilt, _) => {
                let table = rebuilt.unwrap_or_else(|| index_clauses(std::slice::from_ref(&clause_entry)));

                indices.code_dir.insert(key.clone(), CodeIndex {
                    entry: CodeEntry::Dynamic(Arc::new(table)),
                    tabled: false,
                });
            }
        }

        Ok(())
    }

    /// Removes the `i`th clause of the dynamic predicate `key`. Its code
    /// stays where running calls may still reach it.
    pub(crate) fn remove_dynamic_clause(&mut self, key: &PredicateKey, i: usize) -> Result<(), CompilationError> {
        let indices = Arc::make_mut(&mut self.indices);
        let skeleton = indices.skeleton_mut(key);

        if i >= skeleton.clauses.len() {
            return Ok(());
        }

        skeleton.clauses.remove(i);

        if !skeleton.is_incremental() {
            return self.install_clauses(key.clone(), vec![], false);
        }

        if i < skeleton.compiled.len() {
            skeleton.compiled.remove(i);
        }

        let table = index_clauses(&skeleton.compiled);

        indices.code_dir.insert(key.clone(), CodeIndex {
            entry: CodeEntry::Dynamic(Arc::new(table)),
            tabled: false,
        });

        Ok(())
    }

    /// Compiles `goal` as a query clause in the local code area and
    /// returns its entry.
    pub(crate) fn compile_local(&mut self, goal: Term, vars: &[String]) -> Result<CodePtr, CompilationError> {
        let origin = CodePtr::Local(self.local_code.len());
        let code = compile_query(goal, vars, origin)?;

        Arc::make_mut(&mut self.local_code).extend(code);
        Ok(origin)
    }

    /// The names of the user visible predicates, for completion.
    #[cfg(feature = "repl")]
    pub(crate) fn predicate_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .indices
            .code_dir
            .keys()
            .map(|(name, _)| name.as_str().to_string())
            .filter(|name| !name.starts_with('$'))
            .collect();

        names.sort();
        names.dedup();
        names
    }
}
