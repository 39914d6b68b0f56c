//! A Prolog engine with growable WAM stacks, first-argument indexing,
//! tabling and an OR-parallel scheduler.
#![deny(missing_docs)]

#[macro_use]
extern crate static_assertions;

#[macro_use]
pub(crate) mod macros;
#[macro_use]
pub(crate) mod atom_table;
#[macro_use]
pub(crate) mod parser;
mod arithmetic;
pub(crate) mod clause_types;
pub(crate) mod codegen;
mod forms;
pub(crate) mod heap_print;
mod indexing;
pub(crate) mod instructions;
pub(crate) mod machine;
pub(crate) mod read;
#[cfg(feature = "repl")]
mod repl_helper;
mod toplevel;

// Re-exports
pub use machine::config::*;
pub use machine::lib_machine::*;
pub use machine::machine_errors::{CompilationError, SessionError, StartupError};
pub use machine::Machine;
