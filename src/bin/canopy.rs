use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use canopy_prolog::*;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

/// A Prolog engine with tabling and OR-parallel search.
#[derive(Debug, Parser)]
#[command(name = "canopy", version, disable_help_flag = true)]
struct Args {
    /// Shows this help.
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    help: Option<bool>,

    /// Boot file, consulted in boot mode before anything else.
    #[arg(short = 'b', value_name = "FILE")]
    boot: Option<PathBuf>,

    /// Goal run before the top level.
    #[arg(short = 'g', value_name = "GOAL")]
    goal: Option<String>,

    /// Goal run once in place of the top level.
    #[arg(short = 'z', value_name = "GOAL")]
    toplevel: Option<String>,

    /// Prolog file consulted before the top level.
    #[arg(short = 'l', value_name = "FILE", conflicts_with = "run")]
    load: Option<PathBuf>,

    /// Prolog file consulted before halting.
    #[arg(short = 'L', value_name = "FILE")]
    run: Option<PathBuf>,

    /// Heap area in Kbytes.
    #[arg(short = 'h', short_alias = 'H', value_name = "KB")]
    heap: Option<usize>,

    /// Stack area in Kbytes.
    #[arg(short = 's', short_alias = 'S', value_name = "KB")]
    stack: Option<usize>,

    /// Trail area in Kbytes.
    #[arg(short = 't', short_alias = 'T', value_name = "KB")]
    trail: Option<usize>,

    /// Largest heap area in Kbytes (unbounded by default).
    #[arg(long = "max-heap", value_name = "KB")]
    max_heap: Option<usize>,

    /// Largest stack area in Kbytes (unbounded by default).
    #[arg(long = "max-stack", value_name = "KB")]
    max_stack: Option<usize>,

    /// Largest trail area in Kbytes (unbounded by default).
    #[arg(long = "max-trail", value_name = "KB")]
    max_trail: Option<usize>,

    /// Maximum table space in Mbytes (`-ts`; unlimited by default).
    #[arg(long = "table-space", value_name = "MB")]
    table_space: Option<usize>,

    /// Number of workers.
    #[arg(short = 'w', value_name = "N")]
    workers: Option<usize>,

    /// Dispatch cycles between looks for idle workers (`-sl`).
    #[arg(long = "scheduler-loop", value_name = "N")]
    scheduler_loop: Option<usize>,

    /// Retired shared nodes kept before a release sweep.
    #[arg(short = 'd', value_name = "N")]
    delayed_release_load: Option<usize>,

    /// Persistent definition, asserted as `'$define'(Var, Value)`.
    #[arg(short = 'D', value_name = "VAR=VALUE", value_parser = parse_define)]
    defines: Vec<(String, String)>,

    /// Library directories searched by consults, separated as in `PATH`.
    #[arg(short = 'p', value_name = "PATHS")]
    library: Vec<OsString>,

    /// Saved state restored at startup.
    #[arg(value_name = "STATE")]
    saved_state: Option<PathBuf>,

    /// Arguments after `--`, given to Prolog as the `argv` flag.
    #[arg(last = true, value_name = "ARGS")]
    argv: Vec<String>,
}

fn parse_define(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((var, value)) if !var.is_empty() => Ok((var.to_string(), value.to_string())),
        _ => Err(format!("expected Var=Value, found {}", arg)),
    }
}

// the two-letter switches become long options clap understands.
fn normalize_switches(mut args: impl Iterator<Item = String>) -> Vec<String> {
    let mut normalized = vec![];

    while let Some(arg) = args.next() {
        if arg == "--" {
            normalized.push(arg);
            normalized.extend(args.by_ref());
            break;
        }

        let (long, rest) = if let Some(rest) = arg.strip_prefix("-ts") {
            ("--table-space", rest)
        } else if let Some(rest) = arg.strip_prefix("-sl") {
            ("--scheduler-loop", rest)
        } else {
            normalized.push(arg);
            continue;
        };

        normalized.push(long.to_string());

        if !rest.is_empty() {
            normalized.push(rest.to_string());
        }
    }

    normalized
}

impl Args {
    fn into_config(self) -> MachineConfig {
        let defaults = MachineConfig::default();
        let halt_after_consult = self.run.is_some();

        MachineConfig {
            heap_kb: self.heap.unwrap_or(defaults.heap_kb),
            stack_kb: self.stack.unwrap_or(defaults.stack_kb),
            trail_kb: self.trail.unwrap_or(defaults.trail_kb),
            max_heap_kb: self.max_heap,
            max_stack_kb: self.max_stack,
            max_trail_kb: self.max_trail,
            table_space_mb: self.table_space,
            workers: self.workers.unwrap_or(defaults.workers),
            scheduler_loop: self.scheduler_loop.unwrap_or(defaults.scheduler_loop),
            delayed_release_load: self.delayed_release_load.unwrap_or(defaults.delayed_release_load),
            saved_state: self.saved_state,
            boot_file: self.boot,
            library_paths: self.library.iter().flat_map(std::env::split_paths).collect(),
            argv: self.argv,
            goal: self.goal,
            toplevel: self.toplevel,
            consult_file: self.run.or(self.load),
            halt_after_consult,
            defines: self.defines,
            ..defaults
        }
    }
}

// a terminal gets the line editor.
fn stdio_streams() -> StreamConfig {
    #[cfg(feature = "repl")]
    {
        if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
            return StreamConfig {
                stdin: InputStreamConfig::readline(),
                ..StreamConfig::stdio()
            };
        }
    }

    StreamConfig::stdio()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("CANOPY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse_from(normalize_switches(std::env::args()));
    let config = args.into_config();

    let mut machine = match MachineBuilder::new()
        .with_streams(stdio_streams())
        .with_config(config)
        .build()
    {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("canopy: {}", err);
            return ExitCode::FAILURE;
        }
    };

    #[cfg(feature = "repl")]
    {
        let interrupt = machine.interrupt_handle();

        if let Err(err) = ctrlc::set_handler(move || {
            interrupt.store(true, std::sync::atomic::Ordering::Relaxed);
        }) {
            tracing::warn!(%err, "cannot install the interrupt handler");
        }
    }

    let status = machine.run_toplevel();
    ExitCode::from(status.clamp(0, 255) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> MachineConfig {
        let args = normalize_switches(args.iter().map(|arg| arg.to_string()));
        Args::try_parse_from(args).unwrap().into_config()
    }

    #[test]
    fn size_and_scheduler_switches_set_the_configuration() {
        let config = parse(&["canopy", "-h", "1024", "-s512", "-ts", "4", "-w", "3", "-sl5", "-d", "7"]);

        assert_eq!(config.heap_kb, 1024);
        assert_eq!(config.stack_kb, 512);
        assert_eq!(config.table_space_mb, Some(4));
        assert_eq!(config.workers, 3);
        assert_eq!(config.scheduler_loop, 5);
        assert_eq!(config.delayed_release_load, 7);
    }

    #[test]
    fn goals_files_and_defines() {
        let config = parse(&["canopy", "-g", "true", "-z", "halt", "-L", "prog.pl", "-DMODE=fast", "-D", "X=1"]);

        assert_eq!(config.goal.as_deref(), Some("true"));
        assert_eq!(config.toplevel.as_deref(), Some("halt"));
        assert_eq!(config.consult_file, Some(PathBuf::from("prog.pl")));
        assert!(config.halt_after_consult);
        assert_eq!(
            config.defines,
            [("MODE".to_string(), "fast".to_string()), ("X".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn uppercase_sizes_and_maximums() {
        let config = parse(&["canopy", "-H", "2048", "-S256", "-T", "128", "--max-heap", "4096", "--max-trail", "512"]);

        assert_eq!(config.heap_kb, 2048);
        assert_eq!(config.stack_kb, 256);
        assert_eq!(config.trail_kb, 128);
        assert_eq!(config.max_heap_kb, Some(4096));
        assert_eq!(config.max_stack_kb, None);
        assert_eq!(config.max_trail_kb, Some(512));
    }

    #[test]
    fn saved_state_library_path_and_arguments() {
        let config = parse(&["canopy", "-p", "lib", "-p", "/opt/pl", "state.pl", "--", "-ts", "x"]);

        assert_eq!(config.saved_state, Some(PathBuf::from("state.pl")));
        assert_eq!(config.library_paths, [PathBuf::from("lib"), PathBuf::from("/opt/pl")]);
        assert_eq!(config.argv, ["-ts", "x"]);
    }

    #[test]
    fn malformed_defines_are_refused() {
        let args = normalize_switches(["canopy", "-D", "novalue"].iter().map(|arg| arg.to_string()));
        assert!(Args::try_parse_from(args).is_err());
    }
}
