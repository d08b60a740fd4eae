//! Character-at-a-time reader with line tracking.

/// One-character-lookahead reader over an in-memory byte buffer.
///
/// The current line starts at 1 and increments on LF, CR, or CR+LF (counted
/// as a single ending). Directive handling in the object tokenizer can
/// override the line ([`set_line`](#method.set_line)) or suspend automatic
/// counting entirely ([`set_manual`](#method.set_manual), for
/// `#line manual` mode).
pub struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
    line: u32,
    manual: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a [u8]) -> Scanner<'a> {
        Scanner {
            input,
            pos: 0,
            line: 1,
            manual: false,
        }
    }

    /// The lookahead character, or `None` at end of input.
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Consumes and returns the lookahead character, updating the line
    /// counter when a line ending goes by.
    pub fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\r' || c == b'\n' {
            if c == b'\r' && self.peek() == Some(b'\n') {
                self.pos += 1;
            }
            if !self.manual {
                self.line += 1;
            }
        }
        Some(c)
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    /// In manual mode line endings no longer advance the counter; the
    /// caller increments explicitly.
    pub fn set_manual(&mut self, manual: bool) {
        self.manual = manual;
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn increment_line(&mut self) {
        self.line += 1;
    }
}

pub fn is_end_of_line(c: Option<u8>) -> bool {
    match c {
        None | Some(b'\n') | Some(b'\r') => true,
        _ => false,
    }
}

pub fn is_identifier_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

pub fn is_identifier_part(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}
