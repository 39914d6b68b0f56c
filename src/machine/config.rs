use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::machine::machine_errors::StartupError;
use crate::machine::machine_state::MemoryLimits;
use crate::machine::raw_block::RegionLimits;
use crate::machine::streams::*;
use crate::machine::Machine;

#[derive(Default)]
enum OutputStreamConfigInner {
    #[default]
    Null,
    Memory,
    Stdout,
    Stderr,
    Callback(Callback),
}

impl std::fmt::Debug for OutputStreamConfigInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Memory => write!(f, "Memory"),
            Self::Stdout => write!(f, "Stdout"),
            Self::Stderr => write!(f, "Stderr"),
            Self::Callback(_) => f.debug_tuple("Callback").field(&"<callback>").finish(),
        }
    }
}

/// Configuration for an output stream.
#[derive(Debug, Default)]
pub struct OutputStreamConfig {
    inner: OutputStreamConfigInner,
}

impl OutputStreamConfig {
    /// Ignores all output.
    pub fn null() -> Self {
        Self { inner: OutputStreamConfigInner::Null }
    }

    /// Sends output to stdout.
    pub fn stdout() -> Self {
        Self { inner: OutputStreamConfigInner::Stdout }
    }

    /// Sends output to stderr.
    pub fn stderr() -> Self {
        Self { inner: OutputStreamConfigInner::Stderr }
    }

    /// Keeps output in a memory buffer, drained by
    /// [`Machine::take_output`](crate::Machine::take_output).
    pub fn memory() -> Self {
        Self { inner: OutputStreamConfigInner::Memory }
    }

    /// Calls a callback with the text whenever the stream is written to.
    pub fn callback(callback: Callback) -> Self {
        Self { inner: OutputStreamConfigInner::Callback(callback) }
    }

    fn into_stream(self) -> OutputStream {
        match self.inner {
            OutputStreamConfigInner::Null => OutputStream::Null,
            OutputStreamConfigInner::Memory => OutputStream::Memory(Arc::new(Mutex::new(String::new()))),
            OutputStreamConfigInner::Stdout => OutputStream::Stdout,
            OutputStreamConfigInner::Stderr => OutputStream::Stderr,
            OutputStreamConfigInner::Callback(callback) => OutputStream::Callback(Arc::new(Mutex::new(callback))),
        }
    }
}

#[derive(Debug, Default)]
enum InputStreamConfigInner {
    #[default]
    Null,
    Stdin,
    Channel(crossbeam_channel::Receiver<Vec<u8>>),
    #[cfg(feature = "repl")]
    Readline,
}

/// Configuration for an input stream.
#[derive(Debug, Default)]
pub struct InputStreamConfig {
    inner: InputStreamConfigInner,
}

impl InputStreamConfig {
    /// Ignores all input.
    pub fn null() -> Self {
        Self { inner: InputStreamConfigInner::Null }
    }

    /// Gets input from stdin.
    pub fn stdin() -> Self {
        Self { inner: InputStreamConfigInner::Stdin }
    }

    /// Gets input from stdin through a line editor with history.
    #[cfg(feature = "repl")]
    pub fn readline() -> Self {
        Self { inner: InputStreamConfigInner::Readline }
    }

    /// Connects the input to the receiving end of a channel.
    pub fn channel() -> (UserInput, Self) {
        let (sender, receiver) = crossbeam_channel::unbounded();

        (
            UserInput { inner: sender },
            Self { inner: InputStreamConfigInner::Channel(receiver) },
        )
    }

    fn into_stream(self) -> Result<InputStream, StartupError> {
        let source = match self.inner {
            InputStreamConfigInner::Null => InputSource::Null,
            InputStreamConfigInner::Stdin => InputSource::Stdin,
            InputStreamConfigInner::Channel(receiver) => InputSource::Channel(receiver),
            #[cfg(feature = "repl")]
            InputStreamConfigInner::Readline => match crate::repl_helper::ReadlineHandle::spawn() {
                Ok(handle) => InputSource::Readline(handle),
                Err(err) => {
                    tracing::warn!(%err, "line editor unavailable, reading stdin directly");
                    InputSource::Stdin
                }
            },
        };

        Ok(InputStream::new(source))
    }
}

/// Describes how the streams of a [`Machine`](crate::Machine) will be handled.
#[derive(Debug)]
pub struct StreamConfig {
    /// The configuration for the stdin of the [`Machine`](crate::Machine).
    pub stdin: InputStreamConfig,
    /// The configuration for the stdout of the [`Machine`](crate::Machine).
    pub stdout: OutputStreamConfig,
    /// The configuration for the stderr of the [`Machine`](crate::Machine).
    pub stderr: OutputStreamConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StreamConfig {
    /// Binds the input, output and error streams to stdin, stdout and stderr.
    pub fn stdio() -> Self {
        StreamConfig {
            stdin: InputStreamConfig::stdin(),
            stdout: OutputStreamConfig::stdout(),
            stderr: OutputStreamConfig::stderr(),
        }
    }

    /// Binds the output stream to a memory buffer, and the error stream to stderr.
    ///
    /// The input stream is ignored.
    pub fn in_memory() -> Self {
        StreamConfig {
            stdin: InputStreamConfig::null(),
            stdout: OutputStreamConfig::memory(),
            stderr: OutputStreamConfig::stderr(),
        }
    }

    /// Calls the given callbacks when the respective streams are written to.
    ///
    /// This also returns a handle to the stdin of the [`Machine`](crate::Machine).
    pub fn with_callbacks(stdout: Option<Callback>, stderr: Option<Callback>) -> (UserInput, Self) {
        let (user_input, channel_stream) = InputStreamConfig::channel();

        (
            user_input,
            StreamConfig {
                stdin: channel_stream,
                stdout: stdout.map_or_else(OutputStreamConfig::null, OutputStreamConfig::callback),
                stderr: stderr.map_or_else(OutputStreamConfig::null, OutputStreamConfig::callback),
            },
        )
    }

    fn into_streams(self) -> Result<Streams, StartupError> {
        Ok(Streams {
            user_input: self.stdin.into_stream()?,
            user_output: self.stdout.into_stream(),
            user_error: self.stderr.into_stream(),
        })
    }
}

/// A handle to the stdin of the [`Machine`](crate::Machine).
#[derive(Debug, Clone)]
pub struct UserInput {
    inner: Sender<Vec<u8>>,
}

impl Write for UserInput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner
            .send(buf.into())
            .map(|_| buf.len())
            .map_err(|_| std::io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

const DEFAULT_HEAP_KB: usize = 8192;
const DEFAULT_STACK_KB: usize = 4096;
const DEFAULT_TRAIL_KB: usize = 1024;

const MIN_HEAP_KB: usize = 256;
const MIN_STACK_KB: usize = 128;
const MIN_TRAIL_KB: usize = 64;

/// Sizes, parallelism and startup actions of a [`Machine`](crate::Machine).
///
/// Region sizes are in Kbytes; the table space is in Mbytes. `None`
/// maxima are unbounded.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Initial heap size.
    pub heap_kb: usize,
    /// Initial size of the environment and choice point stack.
    pub stack_kb: usize,
    /// Initial trail size.
    pub trail_kb: usize,
    /// Largest heap size.
    pub max_heap_kb: Option<usize>,
    /// Largest stack size.
    pub max_stack_kb: Option<usize>,
    /// Largest trail size.
    pub max_trail_kb: Option<usize>,
    /// Space for tabled answers.
    pub table_space_mb: Option<usize>,
    /// Number of OR-parallel workers.
    pub workers: usize,
    /// Dispatch cycles between checks for idle workers.
    pub scheduler_loop: usize,
    /// Retired shared nodes kept before a release sweep.
    pub delayed_release_load: usize,
    /// A saved state, restored in boot mode before anything else. It
    /// must exist.
    pub saved_state: Option<PathBuf>,
    /// A Prolog file consulted in boot mode after the saved state.
    pub boot_file: Option<PathBuf>,
    /// Directories searched for consulted files not found as named.
    pub library_paths: Vec<PathBuf>,
    /// Arguments given after `--`, read back with
    /// `current_prolog_flag(argv, Args)`.
    pub argv: Vec<String>,
    /// A goal run once before the top level.
    pub goal: Option<String>,
    /// A goal run once in place of the interactive top level.
    pub toplevel: Option<String>,
    /// A file consulted before the top level starts.
    pub consult_file: Option<PathBuf>,
    /// Halt after consulting `consult_file`.
    pub halt_after_consult: bool,
    /// `Var=Value` definitions, asserted as `'$define'(Var, Value)`.
    pub defines: Vec<(String, String)>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            heap_kb: DEFAULT_HEAP_KB,
            stack_kb: DEFAULT_STACK_KB,
            trail_kb: DEFAULT_TRAIL_KB,
            max_heap_kb: None,
            max_stack_kb: None,
            max_trail_kb: None,
            table_space_mb: None,
            workers: 1,
            scheduler_loop: 10,
            delayed_release_load: 3,
            saved_state: None,
            boot_file: None,
            library_paths: vec![],
            argv: vec![],
            goal: None,
            toplevel: None,
            consult_file: None,
            halt_after_consult: false,
            defines: vec![],
        }
    }
}

fn clamp_up(region: &str, kb: usize, floor: usize) -> usize {
    if kb < floor {
        tracing::warn!(region, requested = kb, floor, "region size raised to its floor");
        floor
    } else {
        kb
    }
}

impl MachineConfig {
    /// Raises every size below its floor, and every maximum below its
    /// initial size.
    pub(crate) fn normalize(mut self) -> Self {
        self.heap_kb = clamp_up("heap", self.heap_kb, MIN_HEAP_KB);
        self.stack_kb = clamp_up("stack", self.stack_kb, MIN_STACK_KB);
        self.trail_kb = clamp_up("trail", self.trail_kb, MIN_TRAIL_KB);

        self.max_heap_kb = self.max_heap_kb.map(|max| clamp_up("heap maximum", max, self.heap_kb));
        self.max_stack_kb = self.max_stack_kb.map(|max| clamp_up("stack maximum", max, self.stack_kb));
        self.max_trail_kb = self.max_trail_kb.map(|max| clamp_up("trail maximum", max, self.trail_kb));

        if self.workers == 0 {
            tracing::warn!("at least one worker is needed");
            self.workers = 1;
        }

        self.scheduler_loop = self.scheduler_loop.max(1);
        self.delayed_release_load = self.delayed_release_load.max(1);

        self
    }

    pub(crate) fn memory_limits(&self) -> MemoryLimits {
        use crate::machine::heap::*;
        use crate::machine::machine_indices::*;

        MemoryLimits {
            heap: RegionLimits::from_kbytes::<HeapCellValue>(self.heap_kb, self.max_heap_kb),
            stack: RegionLimits::from_kbytes::<Addr>(self.stack_kb, self.max_stack_kb),
            trail: RegionLimits::from_kbytes::<usize>(self.trail_kb, self.max_trail_kb),
        }
    }

    /// The answer table budget in heap cells.
    pub(crate) fn table_space_cells(&self) -> Option<usize> {
        use crate::machine::machine_indices::HeapCellValue;

        self.table_space_mb
            .map(|mb| mb.saturating_mul(1024 * 1024) / std::mem::size_of::<HeapCellValue>())
    }
}

/// Describes how a [`Machine`](crate::Machine) will be configured.
#[derive(Debug, Default)]
pub struct MachineBuilder {
    pub(crate) streams: StreamConfig,
    pub(crate) config: MachineConfig,
}

impl MachineBuilder {
    /// Creates a default configuration.
    pub fn new() -> Self {
        Default::default()
    }

    /// Uses the given [`StreamConfig`] in this configuration.
    pub fn with_streams(mut self, streams: StreamConfig) -> Self {
        self.streams = streams;
        self
    }

    /// Replaces every setting with `config`.
    pub fn with_config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the initial heap size in Kbytes.
    pub fn with_heap_size(mut self, kb: usize) -> Self {
        self.config.heap_kb = kb;
        self
    }

    /// Sets the initial stack size in Kbytes.
    pub fn with_stack_size(mut self, kb: usize) -> Self {
        self.config.stack_kb = kb;
        self
    }

    /// Sets the initial trail size in Kbytes.
    pub fn with_trail_size(mut self, kb: usize) -> Self {
        self.config.trail_kb = kb;
        self
    }

    /// Bounds the heap, in Kbytes.
    pub fn with_max_heap_size(mut self, kb: usize) -> Self {
        self.config.max_heap_kb = Some(kb);
        self
    }

    /// Bounds the stack, in Kbytes.
    pub fn with_max_stack_size(mut self, kb: usize) -> Self {
        self.config.max_stack_kb = Some(kb);
        self
    }

    /// Bounds the trail, in Kbytes.
    pub fn with_max_trail_size(mut self, kb: usize) -> Self {
        self.config.max_trail_kb = Some(kb);
        self
    }

    /// Bounds the space of tabled answers, in Mbytes.
    pub fn with_table_space(mut self, mb: usize) -> Self {
        self.config.table_space_mb = Some(mb);
        self
    }

    /// Sets the number of OR-parallel workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Sets the dispatch cycles between checks for idle workers.
    pub fn with_scheduler_loop(mut self, cycles: usize) -> Self {
        self.config.scheduler_loop = cycles;
        self
    }

    /// Sets how many retired shared nodes are kept before a release
    /// sweep.
    pub fn with_delayed_release_load(mut self, load: usize) -> Self {
        self.config.delayed_release_load = load;
        self
    }

    /// Restores `path` in boot mode when the machine starts.
    pub fn with_saved_state(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.saved_state = Some(path.into());
        self
    }

    /// Adds a directory searched for consulted files.
    pub fn with_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.library_paths.push(dir.into());
        self
    }

    /// Sets the arguments `current_prolog_flag(argv, Args)` reports.
    pub fn with_argv<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.argv = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the interactive top level with a goal run once.
    pub fn with_toplevel(mut self, goal: impl Into<String>) -> Self {
        self.config.toplevel = Some(goal.into());
        self
    }

    /// Builds the [`Machine`](crate::Machine) from this configuration.
    pub fn build(self) -> Result<Machine, StartupError> {
        let streams = self.streams.into_streams()?;
        Machine::new(self.config.normalize(), streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_below_the_floor_are_raised() {
        let config = MachineConfig {
            heap_kb: 1,
            stack_kb: 1,
            trail_kb: 1,
            max_heap_kb: Some(2),
            workers: 0,
            ..MachineConfig::default()
        }
        .normalize();

        assert_eq!(config.heap_kb, MIN_HEAP_KB);
        assert_eq!(config.stack_kb, MIN_STACK_KB);
        assert_eq!(config.trail_kb, MIN_TRAIL_KB);
        assert_eq!(config.max_heap_kb, Some(MIN_HEAP_KB));
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn defaults_are_unbounded() {
        let config = MachineConfig::default().normalize();
        let limits = config.memory_limits();

        assert_eq!(limits.heap.max_cells, None);
        assert_eq!(config.table_space_cells(), None);
        assert_eq!(config.scheduler_loop, 10);
        assert_eq!(config.delayed_release_load, 3);
    }

    #[test]
    fn missing_saved_states_stop_the_build() {
        let result = MachineBuilder::new().with_saved_state("/nonexistent/state").build();
        assert!(matches!(result, Err(StartupError::MissingSavedState(_))));
    }

    #[test]
    fn huge_table_space_saturates() {
        let config = MachineConfig {
            table_space_mb: Some(usize::MAX),
            ..MachineConfig::default()
        };

        let cells = usize::MAX / std::mem::size_of::<crate::machine::machine_indices::HeapCellValue>();
        assert_eq!(config.table_space_cells(), Some(cells));
    }
}
