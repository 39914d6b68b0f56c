/*
 * CharReader decodes UTF-8 code points lazily from any byte
 * reader. Input is consumed as the lexer pulls characters; it is
 * never read ahead by more than one buffer.
 */

use smallvec::*;

use std::io::{self, ErrorKind, Read};

const READ_CHUNK: usize = 4096;

pub struct CharReader<R> {
    inner: R,
    buf: SmallVec<[u8; 32]>,
    pos: usize,
    error: Option<io::Error>,
    exhausted: bool,
}

impl<R: Read> CharReader<R> {
    pub fn new(inner: R) -> CharReader<R> {
        Self {
            inner,
            buf: SmallVec::new(),
            pos: 0,
            error: None,
            exhausted: false,
        }
    }

    /// The I/O error that ended the character stream, if any.
    #[inline]
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn fill(&mut self, needed: usize) -> bool {
        while self.buf.len() - self.pos < needed {
            if self.exhausted {
                return false;
            }

            if self.pos > 0 {
                self.buf.drain(0..self.pos);
                self.pos = 0;
            }

            let mut chunk = [0u8; READ_CHUNK];

            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    self.exhausted = true;
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.error = Some(e);
                    self.exhausted = true;
                }
            }
        }

        true
    }
}

#[inline]
fn utf8_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

impl<R: Read> Iterator for CharReader<R> {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        if !self.fill(1) {
            return None;
        }

        let width = utf8_width(self.buf[self.pos]);

        if !self.fill(width) {
            // truncated sequence at end of input
            self.pos = self.buf.len();
            return Some(char::REPLACEMENT_CHARACTER);
        }

        let bytes = &self.buf[self.pos..self.pos + width];

        match std::str::from_utf8(bytes).ok().and_then(|s| s.chars().next()) {
            Some(c) => {
                self.pos += width;
                Some(c)
            }
            None => {
                self.pos += 1;
                Some(char::REPLACEMENT_CHARACTER)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_multibyte_chars() {
        let reader = CharReader::new("héllo ∀x.".as_bytes());
        assert_eq!(reader.collect::<String>(), "héllo ∀x.");
    }

    #[test]
    fn invalid_bytes_become_replacement_chars() {
        let reader = CharReader::new(&[b'a', 0xff, b'b'][..]);
        assert_eq!(reader.collect::<String>(), "a\u{fffd}b");
    }
}
