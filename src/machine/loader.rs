use crate::clause_types::is_protected;
use crate::forms::*;
use crate::heap_print::print_stub;
use crate::machine::machine_errors::*;
use crate::machine::Machine;
use crate::parser::ast::*;
use crate::parser::char_reader::CharReader;
use crate::parser::parser::Parser;

use fxhash::FxBuildHasher;
use indexmap::{IndexMap, IndexSet};

use std::fs::File;
use std::path::{Path, PathBuf};

/*
 * The loader pulls one term at a time from a character source and
 * acts on it before the next is read, so directives see the clauses
 * above them and operator declarations take effect immediately.
 *
 * Clauses are buffered per predicate and compiled when a directive
 * is reached or the source ends. The first batch of a predicate in a
 * load replaces its previous definition; later batches extend it.
 */

/// How a source is being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadMode {
    /// The boot file: `true` ends the session and lists of files are
    /// refused.
    Boot,
    /// An ordinary consult.
    Consult,
}

struct LoadState {
    file: String,
    mode: LoadMode,
    pending: IndexMap<PredicateKey, (usize, Vec<Term>), FxBuildHasher>,
    defined: IndexSet<PredicateKey, FxBuildHasher>,
}

impl LoadState {
    fn new(file: &str, mode: LoadMode) -> Self {
        LoadState {
            file: file.to_string(),
            mode,
            pending: IndexMap::with_hasher(FxBuildHasher::default()),
            defined: IndexSet::with_hasher(FxBuildHasher::default()),
        }
    }

    fn compilation_error(&self, line: usize, error: CompilationError) -> SessionError {
        SessionError::Compilation {
            file: self.file.clone(),
            line,
            error,
        }
    }
}

// the terms of a source, as the loader sees them.
enum SourceTerm {
    Skip,
    Halt,
    EndOfFile,
    Files(Vec<Term>),
    Directive(Term),
    Clause(Term),
}

fn classify(term: Term) -> SourceTerm {
    match term {
        Term::Var(_) | Term::AnonVar | Term::Constant(Constant::EmptyList) => SourceTerm::Skip,
        Term::Constant(Constant::Atom(ref name)) if name.as_str() == "true" => SourceTerm::Halt,
        Term::Constant(Constant::Atom(ref name)) if name.as_str() == "end_of_file" => SourceTerm::EndOfFile,
        Term::Cons(..) => SourceTerm::Files(unfold_list(term)),
        Term::Clause(name, mut terms) if terms.len() == 1 && matches!(name.as_str(), "?-" | ":-") => {
            match terms.pop() {
                Some(goal) => SourceTerm::Directive(goal),
                None => SourceTerm::Skip,
            }
        }
        term => SourceTerm::Clause(term),
    }
}

fn unfold_list(mut term: Term) -> Vec<Term> {
    let mut elements = vec![];

    while let Term::Cons(head, tail) = term {
        elements.push(*head);
        term = *tail;
    }

    elements
}

/// Finds the file a consult refers to, trying the `.pl` extension
/// when the name itself does not exist, then each of the `library`
/// directories for relative names.
pub(crate) fn resolve_source(name: &str, library: &[PathBuf]) -> PathBuf {
    let path = PathBuf::from(name);

    let candidates = |path: &Path| {
        if path.extension().is_some() {
            vec![path.to_path_buf()]
        } else {
            vec![path.to_path_buf(), path.with_extension("pl")]
        }
    };

    let found = candidates(path.as_path()).into_iter().find(|candidate| candidate.exists());

    if let Some(found) = found {
        return found;
    }

    if path.is_relative() {
        let in_library = library
            .iter()
            .flat_map(|dir| candidates(dir.join(&path).as_path()))
            .find(|candidate| candidate.exists());

        if let Some(found) = in_library {
            tracing::trace!(path = %found.display(), "found in the library path");
            return found;
        }
    }

    path
}

impl Machine {
    pub(crate) fn load_prelude(&mut self) -> Result<(), SessionError> {
        let prelude = include_str!("../lib/builtins.pl");
        self.consult_source("builtins.pl", prelude.chars(), LoadMode::Consult)
    }

    /// Loads the file at `path`.
    pub(crate) fn consult_file(&mut self, path: &Path, mode: LoadMode) -> Result<(), SessionError> {
        let file = File::open(path).map_err(|source| SessionError::Io {
            path: path.display().to_string(),
            source,
        })?;

        tracing::debug!(path = %path.display(), ?mode, "consulting");
        self.consult_source(&path.display().to_string(), CharReader::new(file), mode)
    }

    /// Loads the terms of `src` one at a time.
    pub(crate) fn consult_source<I>(&mut self, file: &str, src: I, mode: LoadMode) -> Result<(), SessionError>
    where
        I: Iterator<Item = char>,
    {
        let mut parser = Parser::new(src);
        let mut state = LoadState::new(file, mode);

        loop {
            let term = match parser.read_term(&self.indices.op_dir) {
                Ok(Some(term)) => term,
                Ok(None) => break,
                Err(err) => {
                    let line = err
                        .line_and_col_num()
                        .map(|(line, _)| line)
                        .unwrap_or_else(|| parser.line_num());

                    return Err(SessionError::Syntax {
                        file: file.to_string(),
                        line,
                        message: err.to_string(),
                    });
                }
            };

            let line = parser.term_line();

            match classify(term) {
                SourceTerm::Skip => {}
                SourceTerm::EndOfFile => break,
                SourceTerm::Halt if mode == LoadMode::Boot => {
                    self.flush_clauses(&mut state)?;
                    self.halted = Some(0);
                    return Ok(());
                }
                SourceTerm::Halt => {
                    let err = CompilationError::CannotOverwriteBuiltIn("true".to_string(), 0);
                    return Err(state.compilation_error(line, err));
                }
                SourceTerm::Files(_) if mode == LoadMode::Boot => {
                    tracing::error!(file, line, "consult not allowed in boot file");
                    self.streams
                        .user_error
                        .write_str("[ SYSTEM ERROR: consult not allowed in boot file ]\n");
                }
                SourceTerm::Files(files) => {
                    self.flush_clauses(&mut state)?;

                    for name in files {
                        match name {
                            Term::Constant(Constant::Atom(name)) => {
                                let path = resolve_source(name.as_str(), &self.config.library_paths);
                                self.consult_file(&path, LoadMode::Consult)?
                            }
                            _ => {
                                let err = CompilationError::InvalidDirective("[...]".to_string());
                                return Err(state.compilation_error(line, err));
                            }
                        }
                    }
                }
                SourceTerm::Directive(goal) => {
                    self.flush_clauses(&mut state)?;
                    self.run_directive(&state, goal, line);

                    if self.halted.is_some() {
                        return Ok(());
                    }
                }
                SourceTerm::Clause(term) => {
                    let key = clause_key(&term).map_err(|err| state.compilation_error(line, err))?;

                    if is_protected(key.0.as_str(), key.1) {
                        let err = CompilationError::CannotOverwriteBuiltIn(key.0.as_str().to_string(), key.1);
                        return Err(state.compilation_error(line, err));
                    }

                    state
                        .pending
                        .entry(key)
                        .or_insert_with(|| (line, vec![]))
                        .1
                        .push(term);
                }
            }
        }

        self.flush_clauses(&mut state)
    }

    fn flush_clauses(&mut self, state: &mut LoadState) -> Result<(), SessionError> {
        for (key, (line, clauses)) in state.pending.drain(..) {
            let replace = state.defined.insert(key.clone());

            tracing::trace!(name = %key.0, arity = key.1, clauses = clauses.len(), "compiling");

            self.install_clauses(key, clauses, replace)
                .map_err(|error| SessionError::Compilation {
                    file: state.file.clone(),
                    line,
                    error,
                })?;
        }

        Ok(())
    }

    // a directive that fails or throws is reported and loading goes on.
    fn run_directive(&mut self, state: &LoadState, goal: Term, line: usize) {
        match self.run_goal_once(goal) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(file = %state.file, line, "directive failed");
                self.streams.user_error.write_str(&format!(
                    "% Warning: {}:{}: directive failed\n",
                    state.file, line
                ));
            }
            Err(ball) => {
                let ball = print_stub(&ball, &self.indices.op_dir);

                tracing::warn!(file = %state.file, line, %ball, "directive raised an exception");
                self.streams.user_error.write_str(&format!(
                    "% Warning: {}:{}: uncaught exception in directive: {}\n",
                    state.file, line, ball
                ));
            }
        }

        if state.mode == LoadMode::Boot {
            self.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::config::MachineBuilder;

    fn machine() -> Machine {
        MachineBuilder::new().build().unwrap()
    }

    fn count(machine: &mut Machine, query: &str) -> usize {
        machine
            .run_query(query)
            .filter(|answer| matches!(answer, Ok(answer) if answer.maybe_succeeded()))
            .count()
    }

    #[test]
    fn boot_sources_stop_at_true() {
        let mut machine = machine();

        machine
            .consult_source("boot", "a(1).\n[].\ntrue.\na(2).\n".chars(), LoadMode::Boot)
            .unwrap();

        assert_eq!(machine.halted(), Some(0));
        machine.halted = None;
        assert_eq!(count(&mut machine, "a(X)."), 1);
    }

    #[test]
    fn boot_sources_refuse_file_lists() {
        let mut machine = machine();

        machine
            .consult_source("boot", "[foo].\nb(1).\nend_of_file.\nb(2).\n".chars(), LoadMode::Boot)
            .unwrap();

        assert_eq!(machine.halted(), None);
        assert_eq!(count(&mut machine, "b(X)."), 1);
    }

    #[test]
    fn relative_names_are_searched_in_the_library() {
        let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/canopy/fixtures");
        let library = [PathBuf::from("/nonexistent"), fixtures.clone()];

        assert_eq!(resolve_source("hello", &library), fixtures.join("hello.pl"));
        assert_eq!(resolve_source("boot.pl", &library), fixtures.join("boot.pl"));
        assert_eq!(resolve_source("missing", &library), PathBuf::from("missing"));
    }

    #[test]
    fn syntax_errors_name_the_line() {
        let mut machine = machine();

        match machine.consult_source("bad.pl", "p(1).\np(.\n".chars(), LoadMode::Boot) {
            Err(SessionError::Syntax { file, line, .. }) => {
                assert_eq!(file, "bad.pl");
                assert_eq!(line, 2);
            }
            result => panic!("unexpected result {:?}", result),
        }
    }

    #[test]
    fn built_ins_cannot_be_redefined() {
        let mut machine = machine();

        assert!(matches!(
            machine.consult_module_string("m", "write(_)."),
            Err(SessionError::Compilation {
                error: CompilationError::CannotOverwriteBuiltIn(..),
                ..
            })
        ));
    }

    #[test]
    fn clauses_split_by_directives_extend_their_predicate() {
        let mut machine = machine();

        machine
            .consult_module_string("m", "q(1).\n:- true.\nq(2).\n?- assertz(r(0)).\n")
            .unwrap();

        assert_eq!(count(&mut machine, "q(X)."), 2);
        assert_eq!(count(&mut machine, "r(0)."), 1);
    }

    #[test]
    fn operator_directives_affect_later_terms() {
        let mut machine = machine();

        machine
            .consult_module_string("m", ":- op(700, xfx, ===>).\nrule(a ===> b).\n")
            .unwrap();

        assert_eq!(count(&mut machine, "rule(X ===> Y)."), 1);
    }

    #[test]
    fn failing_directives_are_reported_and_skipped() {
        let mut machine = machine();

        machine
            .consult_module_string("m", ":- fail.\n:- throw(oops).\ns(1).\n")
            .unwrap();

        assert_eq!(count(&mut machine, "s(1)."), 1);
    }

    #[test]
    fn missing_files_are_io_errors() {
        let mut machine = machine();

        assert!(matches!(
            machine.consult_file(Path::new("/nonexistent/file.pl"), LoadMode::Consult),
            Err(SessionError::Io { .. })
        ));
    }
}
