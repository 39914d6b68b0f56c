use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

/// Receives everything written to an output stream configured with
/// [`OutputStreamConfig::callback`](crate::OutputStreamConfig::callback).
pub type Callback = Box<dyn FnMut(&str) + Send>;

/// A text sink. Handles are shared, so clones of a machine write to
/// the same place.
#[derive(Clone)]
pub(crate) enum OutputStream {
    Null,
    Stdout,
    Stderr,
    Memory(Arc<Mutex<String>>),
    Callback(Arc<Mutex<Callback>>),
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Null => write!(f, "Null"),
            OutputStream::Stdout => write!(f, "Stdout"),
            OutputStream::Stderr => write!(f, "Stderr"),
            OutputStream::Memory(_) => write!(f, "Memory"),
            OutputStream::Callback(_) => f.debug_tuple("Callback").field(&"<callback>").finish(),
        }
    }
}

impl OutputStream {
    /// Writes `text`. A failed write to stdout or stderr is logged and
    /// the text dropped; a closed stdout does not stop the machine.
    pub(crate) fn write_str(&self, text: &str) {
        match self {
            OutputStream::Null => {}
            OutputStream::Stdout => {
                write_logged(io::stdout().lock(), text, "stdout");
            }
            OutputStream::Stderr => {
                write_logged(io::stderr().lock(), text, "stderr");
            }
            OutputStream::Memory(buf) => buf.lock().push_str(text),
            OutputStream::Callback(callback) => (callback.lock())(text),
        }
    }

    pub(crate) fn flush(&self) {
        let result = match self {
            OutputStream::Stdout => io::stdout().flush(),
            OutputStream::Stderr => io::stderr().flush(),
            _ => Ok(()),
        };

        if let Err(err) = result {
            tracing::warn!(%err, stream = ?self, "flush failed");
        }
    }

    /// Drains the buffer of a memory stream.
    pub(crate) fn take_memory(&self) -> Option<String> {
        match self {
            OutputStream::Memory(buf) => Some(std::mem::take(&mut *buf.lock())),
            _ => None,
        }
    }
}

// writes `text`, logging a failure. Gives whether it succeeded.
fn write_logged<W: Write>(mut sink: W, text: &str, stream: &str) -> bool {
    match sink.write_all(text.as_bytes()) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%err, stream, "write failed");
            false
        }
    }
}

pub(crate) enum InputSource {
    Null,
    Stdin,
    Channel(Receiver<Vec<u8>>),
    #[cfg(feature = "repl")]
    Readline(crate::repl_helper::ReadlineHandle),
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Null => write!(f, "Null"),
            InputSource::Stdin => write!(f, "Stdin"),
            InputSource::Channel(_) => write!(f, "Channel"),
            #[cfg(feature = "repl")]
            InputSource::Readline(_) => write!(f, "Readline"),
        }
    }
}

#[derive(Debug)]
struct InputState {
    source: InputSource,
    pending: VecDeque<char>,
    prompt: String,
    eof: bool,
}

impl InputState {
    // pulls one more line (or chunk) from the source. false at end of
    // input.
    fn fill(&mut self) -> bool {
        if self.eof {
            return false;
        }

        let text = match &self.source {
            InputSource::Null => None,
            InputSource::Stdin => {
                let mut line = String::new();

                match io::stdin().lock().read_line(&mut line) {
                    Ok(0) => None,
                    Ok(_) => Some(line),
                    Err(err) => {
                        tracing::warn!(%err, "cannot read standard input");
                        None
                    }
                }
            }
            InputSource::Channel(receiver) => receiver
                .recv()
                .ok()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            #[cfg(feature = "repl")]
            InputSource::Readline(handle) => handle.read_line(&self.prompt).map(|mut line| {
                line.push('\n');
                line
            }),
        };

        match text {
            Some(text) => {
                self.pending.extend(text.chars());
                true
            }
            None => {
                self.eof = true;
                false
            }
        }
    }

    fn next_char(&mut self) -> Option<char> {
        loop {
            if let Some(c) = self.pending.pop_front() {
                return Some(c);
            }

            if !self.fill() {
                return None;
            }
        }
    }
}

/// A line-oriented text source shared by the clones of a machine.
#[derive(Debug, Clone)]
pub(crate) struct InputStream {
    state: Arc<Mutex<InputState>>,
}

impl InputStream {
    pub(crate) fn new(source: InputSource) -> Self {
        InputStream {
            state: Arc::new(Mutex::new(InputState {
                source,
                pending: VecDeque::new(),
                prompt: String::new(),
                eof: false,
            })),
        }
    }

    pub(crate) fn null() -> Self {
        InputStream::new(InputSource::Null)
    }

    /// Sets the prompt shown the next time a line editor asks for a
    /// line.
    pub(crate) fn set_prompt(&self, prompt: &str) {
        let mut state = self.state.lock();
        state.prompt.clear();
        state.prompt.push_str(prompt);
    }

    /// Can a person answer prompts on this stream?
    pub(crate) fn is_interactive(&self) -> bool {
        match &self.state.lock().source {
            InputSource::Stdin => io::stdin().is_terminal(),
            #[cfg(feature = "repl")]
            InputSource::Readline(_) => true,
            _ => false,
        }
    }

    /// Offers `names` for completion when a line editor reads this
    /// stream.
    #[cfg(feature = "repl")]
    pub(crate) fn set_completions(&self, names: Vec<String>) {
        if let InputSource::Readline(handle) = &self.state.lock().source {
            *handle.names.lock() = names;
        }
    }

    #[inline]
    pub(crate) fn next_char(&self) -> Option<char> {
        self.state.lock().next_char()
    }

    /// Is the rest of the buffered input only layout, with the source
    /// exhausted behind it?
    pub(crate) fn at_eof(&self) -> bool {
        let mut state = self.state.lock();

        loop {
            while let Some(&c) = state.pending.front() {
                if c.is_whitespace() {
                    state.pending.pop_front();
                } else {
                    return false;
                }
            }

            if !state.fill() {
                return true;
            }
        }
    }

    /// Reads up to and including the next newline, which is dropped.
    pub(crate) fn read_line(&self) -> Option<String> {
        let mut state = self.state.lock();
        let mut line = String::new();

        loop {
            match state.next_char() {
                Some('\n') => return Some(line),
                Some(c) => line.push(c),
                None if line.is_empty() => return None,
                None => return Some(line),
            }
        }
    }

    /// Drops buffered input up to the end of the current line.
    pub(crate) fn discard_line(&self) {
        let mut state = self.state.lock();

        while let Some(c) = state.pending.pop_front() {
            if c == '\n' {
                break;
            }
        }
    }

    pub(crate) fn chars(&self) -> InputChars {
        InputChars { stream: self.clone() }
    }
}

/// Pulls characters from an input stream on demand, for the reader.
#[derive(Debug)]
pub(crate) struct InputChars {
    stream: InputStream,
}

impl Iterator for InputChars {
    type Item = char;

    #[inline]
    fn next(&mut self) -> Option<char> {
        self.stream.next_char()
    }
}

/// The standard streams of a machine.
#[derive(Debug, Clone)]
pub(crate) struct Streams {
    pub(crate) user_input: InputStream,
    pub(crate) user_output: OutputStream,
    pub(crate) user_error: OutputStream,
}

impl Default for Streams {
    fn default() -> Self {
        Streams {
            user_input: InputStream::null(),
            user_output: OutputStream::Memory(Arc::new(Mutex::new(String::new()))),
            user_error: OutputStream::Stderr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_input_is_pulled_line_by_line() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let input = InputStream::new(InputSource::Channel(receiver));

        sender.send(b"foo.\nbar".to_vec()).unwrap();
        sender.send(b"\n".to_vec()).unwrap();
        drop(sender);

        assert_eq!(input.read_line().as_deref(), Some("foo."));
        assert_eq!(input.chars().collect::<String>(), "bar\n");
        assert!(input.at_eof());
        assert_eq!(input.read_line(), None);
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_writes_are_reported_not_fatal() {
        assert!(!write_logged(Closed, "lost", "stdout"));

        let mut buf = vec![];
        assert!(write_logged(&mut buf, "kept", "stdout"));
        assert_eq!(buf, b"kept");
    }

    #[test]
    fn memory_output_is_drained() {
        let output = OutputStream::Memory(Arc::new(Mutex::new(String::new())));

        output.write_str("hello ");
        output.clone().write_str("world");

        assert_eq!(output.take_memory().as_deref(), Some("hello world"));
        assert_eq!(output.take_memory().as_deref(), Some(""));
    }

    #[test]
    fn callbacks_see_every_write() {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        let output = OutputStream::Callback(Arc::new(Mutex::new(Box::new(move |text: &str| {
            sink.lock().push(text.to_string())
        }))));

        output.write_str("a");
        output.write_str("b");

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }
}
