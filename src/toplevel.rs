use crate::atom_table::*;
use crate::heap_print::print_stub;
use crate::machine::heap::*;
use crate::machine::loader::{resolve_source, LoadMode};
use crate::machine::machine_errors::*;
use crate::machine::machine_indices::{Addr, HeapCellValue};
use crate::machine::Machine;
use crate::parser::ast::*;
use crate::parser::read_single_term;

/// The goal the top level runs while `$live` holds.
const LIVE_GOAL: &str = "'$repl'";

impl Machine {
    fn is_live(&self) -> bool {
        match self.global_values.get(&atom!("$live")) {
            Some(value) => !matches!(
                value.first(),
                Some(HeapCellValue::Addr(Addr::Con(Constant::Atom(atom)))) if atom.as_str() == "$false"
            ),
            None => true,
        }
    }

    fn report_session_error(&self, err: &SessionError) {
        tracing::error!(%err, "consult failed");
        self.streams.user_error.write_str(&format!("% {}\n", err));
        self.streams.user_error.flush();
    }

    // parses and runs `goal` once, reporting failure and errors.
    fn run_goal_text(&mut self, goal: &str) -> bool {
        self.reset();

        let term = match read_single_term(goal, &self.indices.op_dir) {
            Ok(Some(term)) => term,
            Ok(None) => return true,
            Err(err) => {
                self.streams
                    .user_error
                    .write_str(&format!("% syntax error in goal {}: {}\n", goal, err));
                return false;
            }
        };

        let succeeded = match self.run_goal_once(term) {
            Ok(true) => true,
            Ok(false) if self.halted.is_some() => false,
            Ok(false) => {
                tracing::warn!(goal, "goal failed");
                self.streams.user_error.write_str(&format!("% Warning: goal {} failed\n", goal));
                false
            }
            Err(ball) => {
                let ball = print_stub(&ball, &self.indices.op_dir);

                tracing::warn!(goal, %ball, "goal raised an exception");
                self.streams
                    .user_error
                    .write_str(&format!("% Warning: goal {} raised an exception: {}\n", goal, ball));
                false
            }
        };

        self.streams.user_output.flush();
        self.streams.user_error.flush();

        succeeded
    }

    /// Runs the session the configuration describes: the consult file,
    /// the initial goal, then either the replacement top-level goal or
    /// the read-query-print loop until `$live` is cleared. Gives the
    /// exit status.
    pub fn run_toplevel(&mut self) -> i32 {
        if let Some(code) = self.halted {
            return code;
        }

        if let Some(path) = self.config.consult_file.clone() {
            let path = resolve_source(&path.to_string_lossy(), &self.config.library_paths);

            if let Err(err) = self.consult_file(&path, LoadMode::Consult) {
                self.report_session_error(&err);
                return 1;
            }

            if self.config.halt_after_consult {
                return self.halted.unwrap_or(0);
            }
        }

        self.global_values.insert(atom!("$live"), functor!(atom!("$true")));

        if let Some(goal) = self.config.goal.clone() {
            self.run_goal_text(&goal);
        }

        if let Some(goal) = self.config.toplevel.clone() {
            if self.halted.is_none() {
                let succeeded = self.run_goal_text(&goal);
                return self.halted.unwrap_or(if succeeded { 0 } else { 1 });
            }
        }

        while self.halted.is_none() && self.is_live() {
            self.run_goal_text(LIVE_GOAL);
        }

        self.streams.user_output.flush();
        self.halted.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use crate::machine::config::*;
    use std::io::Write;

    fn machine_reading(input: &str, config: impl FnOnce(MachineBuilder) -> MachineBuilder) -> crate::Machine {
        let (mut user_input, stdin) = InputStreamConfig::channel();

        user_input.write_all(input.as_bytes()).unwrap();
        drop(user_input);

        let streams = StreamConfig {
            stdin,
            stdout: OutputStreamConfig::memory(),
            stderr: OutputStreamConfig::memory(),
        };

        config(MachineBuilder::new().with_streams(streams)).build().unwrap()
    }

    #[test]
    fn the_loop_ends_with_its_input() {
        let mut machine = machine_reading("X = 1.\nfail.\n", |builder| builder);

        assert_eq!(machine.run_toplevel(), 0);
        assert_eq!(machine.take_output().unwrap(), "X = 1.\nfalse.\n");
    }

    #[test]
    fn halt_sets_the_exit_status() {
        let mut machine = machine_reading("halt(7).\nX = 1.\n", |builder| builder);

        assert_eq!(machine.run_toplevel(), 7);
        assert_eq!(machine.take_output().unwrap(), "");
    }

    #[test]
    fn a_replacement_goal_runs_once() {
        let mut machine = machine_reading("X = 1.\n", |builder| {
            builder.with_toplevel("write(hello), nl")
        });

        assert_eq!(machine.run_toplevel(), 0);
        assert_eq!(machine.take_output().unwrap(), "hello\n");
    }

    #[test]
    fn the_initial_goal_runs_before_the_loop() {
        let mut config = MachineConfig::default();
        config.goal = Some("write(start), nl".to_string());

        let mut machine = machine_reading("true.\n", |builder| builder.with_config(config));

        assert_eq!(machine.run_toplevel(), 0);
        assert_eq!(machine.take_output().unwrap(), "start\ntrue.\n");
    }

    #[test]
    fn missing_consult_files_are_fatal() {
        let mut config = MachineConfig::default();
        config.consult_file = Some("/nonexistent/canopy.pl".into());

        let mut machine = machine_reading("", |builder| builder.with_config(config));

        assert_eq!(machine.run_toplevel(), 1);
    }
}
