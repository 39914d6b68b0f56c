use std::borrow::Cow;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::{Highlighter, MatchingBracketHighlighter};
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper as RlHelper, Result};

/// Line editor support: bracket matching and completion of the
/// predicate names the machine knows about.
pub(crate) struct Helper {
    highlighter: MatchingBracketHighlighter,
    names: Arc<Mutex<Vec<String>>>,
}

impl Helper {
    pub(crate) fn new(names: Arc<Mutex<Vec<String>>>) -> Self {
        Helper {
            highlighter: MatchingBracketHighlighter::new(),
            names,
        }
    }
}

impl RlHelper for Helper {}

// the byte offset where the word ending at `pos` starts, if that word
// could be an atom.
fn word_start(line: &str, pos: usize) -> Option<usize> {
    let prefix = line.get(..pos)?;
    let start = prefix
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i)
        .unwrap_or(pos);

    match prefix[start..].chars().next() {
        Some(c) if c.is_lowercase() => Some(start),
        None => Some(start),
        _ => None,
    }
}

impl Completer for Helper {
    type Candidate = String;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<String>)> {
        let start = match word_start(line, pos) {
            Some(start) => start,
            None => return Ok((pos, vec![])),
        };

        let word = &line[start..pos];
        let names = self.names.lock();

        let candidates = names
            .iter()
            .filter(|name| name.starts_with(word))
            .cloned()
            .collect();

        Ok((start, candidates))
    }
}

impl Hinter for Helper {
    type Hint = String;
}

impl Validator for Helper {}

impl Highlighter for Helper {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        self.highlighter.highlight(line, pos)
    }

    fn highlight_char(&self, line: &str, pos: usize, forced: bool) -> bool {
        self.highlighter.highlight_char(line, pos, forced)
    }
}

/// Talks to a line editor running on its own thread, so the machine
/// holding the handle stays `Send`.
pub(crate) struct ReadlineHandle {
    prompts: Sender<String>,
    lines: Receiver<Option<String>>,
    pub(crate) names: Arc<Mutex<Vec<String>>>,
}

impl ReadlineHandle {
    pub(crate) fn spawn() -> std::result::Result<Self, ReadlineError> {
        let names = Arc::new(Mutex::new(vec![]));
        let mut editor = Editor::<Helper, DefaultHistory>::new()?;

        editor.set_helper(Some(Helper::new(names.clone())));

        let (prompts, prompt_rx) = crossbeam_channel::unbounded::<String>();
        let (line_tx, lines) = crossbeam_channel::unbounded();

        thread::Builder::new()
            .name("canopy-readline".to_string())
            .spawn(move || {
                for prompt in prompt_rx {
                    let line = match editor.readline(&prompt) {
                        Ok(line) => {
                            if !line.trim().is_empty() {
                                let _ = editor.add_history_entry(line.as_str());
                            }

                            Some(line)
                        }
                        // ^C on an empty line discards it.
                        Err(ReadlineError::Interrupted) => Some(String::new()),
                        Err(ReadlineError::Eof) => None,
                        Err(err) => {
                            tracing::error!(%err, "line editor failed");
                            None
                        }
                    };

                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(ReadlineError::Io)?;

        Ok(ReadlineHandle { prompts, lines, names })
    }

    pub(crate) fn read_line(&self, prompt: &str) -> Option<String> {
        self.prompts.send(prompt.to_string()).ok()?;
        self.lines.recv().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_start_after_punctuation() {
        assert_eq!(word_start("foo(ba", 6), Some(4));
        assert_eq!(word_start("mem", 3), Some(0));
        assert_eq!(word_start("X = Ab", 6), None);
        assert_eq!(word_start("f(", 2), Some(2));
    }
}
