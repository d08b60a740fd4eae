//! Tokenizing of hex object files and archives.

use std::error::Error as StdError;
use std::fmt;

use crate::hex;
use crate::scanner::{is_end_of_line, is_identifier_part, is_identifier_start, Scanner};

/// The seven sigils of the object format: four invocation kinds and three
/// definition kinds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mark {
    /// `^name`, a 4-byte absolute address.
    Absolute,
    /// `<name`, the high 16 bits of an address.
    High,
    /// `>name`, the low 16 bits of an address.
    Low,
    /// `&name`, a signed 16-bit relative word offset.
    Relative,
    /// `:name`, a label definition.
    Label,
    /// `=name`, a global symbol definition.
    Global,
    /// `@name`, a file-local symbol definition.
    Static,
}

impl Mark {
    pub fn sigil(self) -> char {
        match self {
            Mark::Absolute => '^',
            Mark::High => '<',
            Mark::Low => '>',
            Mark::Relative => '&',
            Mark::Label => ':',
            Mark::Global => '=',
            Mark::Static => '@',
        }
    }

    pub fn is_invocation(self) -> bool {
        match self {
            Mark::Absolute | Mark::High | Mark::Low | Mark::Relative => true,
            _ => false,
        }
    }

    /// Bytes occupied by an invocation of this kind in the linked image.
    pub fn invocation_size(self) -> u32 {
        match self {
            Mark::Absolute => 4,
            Mark::High | Mark::Low | Mark::Relative => 2,
            _ => 0,
        }
    }
}

/// Flags on a symbol definition, in sigil order `? + { }`.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct SymbolFlags {
    pub weak: bool,
    pub zero: bool,
    pub constructor: bool,
    pub constructor_priority: Option<u32>,
    pub destructor: bool,
    pub destructor_priority: Option<u32>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Token {
    /// One byte of the current symbol's payload.
    Byte(u8),
    /// An invocation of a label or symbol; the kind is one of the four
    /// invocation marks.
    Invoke(Mark, String),
    /// A symbol definition.
    Symbol {
        global: bool,
        flags: SymbolFlags,
        name: String,
    },
    /// A label definition within the current symbol.
    Label(String),
    /// A `%filename` archive separator; subsequent tokens belong to the
    /// named member.
    Member(String),
}

/// A token plus the source location it was read at. `file` indexes
/// [`Tokenized::files`](struct.Tokenized.html#structfield.files); the line
/// reflects `#line` directives, not just physical position.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Spanned {
    pub token: Token,
    pub file: usize,
    pub line: u32,
}

#[derive(Debug)]
pub struct Tokenized {
    pub items: Vec<Spanned>,
    pub files: Vec<String>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TokenError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

impl StdError for TokenError {}

struct Tokenizer<'a> {
    scanner: Scanner<'a>,
    items: Vec<Spanned>,
    files: Vec<String>,
    current_file: usize,
}

type Result<T> = std::result::Result<T, TokenError>;

impl<'a> Tokenizer<'a> {
    fn error(&self, message: impl Into<String>) -> TokenError {
        TokenError {
            file: self.files[self.current_file].clone(),
            line: self.scanner.line(),
            message: message.into(),
        }
    }

    fn push(&mut self, token: Token, line: u32) {
        self.items.push(Spanned {
            token,
            file: self.current_file,
            line,
        });
    }

    fn set_file(&mut self, name: &str) {
        if self.files[self.current_file] != name {
            self.files.push(name.to_string());
            self.current_file = self.files.len() - 1;
        }
    }

    fn read_name(&mut self) -> Result<String> {
        match self.scanner.peek() {
            Some(c) if is_identifier_start(c) => {}
            _ => {
                return Err(self.error(
                    "Expected label, symbol or directive name to start with \
                     a letter, underscore or dollar sign.",
                ))
            }
        }
        let mut name = String::new();
        while let Some(c) = self.scanner.peek() {
            if !is_identifier_part(c) {
                break;
            }
            name.push(c as char);
            self.scanner.bump();
        }
        Ok(name)
    }

    fn consume_horizontal_whitespace(&mut self) {
        while let Some(c) = self.scanner.peek() {
            if c.is_ascii_whitespace() && !is_end_of_line(Some(c)) {
                self.scanner.bump();
            } else {
                break;
            }
        }
    }

    fn consume_comment(&mut self) {
        while !is_end_of_line(self.scanner.peek()) {
            self.scanner.bump();
        }
        // The line ending stays in the stream so line counting sees it.
    }

    fn parse_hex_byte(&mut self) -> Result<u8> {
        let high = self.scanner.bump().unwrap();
        let low = match self.scanner.bump() {
            Some(c) => c,
            None => return Err(self.error("Expected hexadecimal character")),
        };
        hex::decode(high, low).ok_or_else(|| self.error("Expected hexadecimal character"))
    }

    /// `#` directives: bare `#` increments the line in manual mode;
    /// `#line N "file"` resets the location; `#line manual` switches line
    /// tracking to explicit increments.
    fn parse_directive(&mut self) -> Result<()> {
        self.scanner.bump(); // '#'
        self.consume_horizontal_whitespace();

        if is_end_of_line(self.scanner.peek()) {
            if self.scanner.is_manual() {
                self.scanner.increment_line();
            }
            return Ok(());
        }

        let directive = self.read_name()?;
        if directive != "line" {
            return Err(self.error("Unrecognized debug directive"));
        }
        self.consume_horizontal_whitespace();

        if let Some(c) = self.scanner.peek() {
            if c.is_ascii_alphabetic() {
                let word = self.read_name()?;
                if word != "manual" {
                    return Err(self.error("Unsupported command in #line directive."));
                }
                self.scanner.set_manual(true);
                self.consume_horizontal_whitespace();
                if !is_end_of_line(self.scanner.peek()) {
                    return Err(self.error("Extra characters after `#line manual`."));
                }
                return Ok(());
            }
        }

        let mut line: u32 = 0;
        match self.scanner.peek() {
            Some(c) if c.is_ascii_digit() => {}
            _ => return Err(self.error("#line must be followed by a line number.")),
        }
        while let Some(c) = self.scanner.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            let new_line = line.wrapping_mul(10).wrapping_add((c - b'0') as u32);
            if new_line <= line {
                return Err(self.error("#line number is out of bounds."));
            }
            line = new_line;
            self.scanner.bump();
        }
        self.consume_horizontal_whitespace();

        // The directive's own line ending has not been consumed yet, so the
        // new line number takes effect one increment early.
        self.scanner.set_line(line - 1);

        if is_end_of_line(self.scanner.peek()) {
            return Ok(());
        }

        if self.scanner.peek() != Some(b'"') {
            return Err(self.error("Expected double-quote for optional filename in #line"));
        }
        self.scanner.bump();
        let mut filename = String::new();
        loop {
            match self.scanner.peek() {
                Some(b'"') => {
                    self.scanner.bump();
                    break;
                }
                Some(c) if !is_end_of_line(Some(c)) => {
                    filename.push(c as char);
                    self.scanner.bump();
                }
                _ => {
                    return Err(
                        self.error("#line filename must begin and end with a double-quote")
                    )
                }
            }
        }
        self.set_file(&filename);

        self.consume_horizontal_whitespace();
        if !is_end_of_line(self.scanner.peek()) {
            return Err(self.error("Unexpected trailing characters in #line directive"));
        }
        Ok(())
    }

    fn parse_priority(&mut self) -> Result<Option<u32>> {
        match self.scanner.peek() {
            Some(c) if c.is_ascii_digit() => {}
            _ => return Ok(None),
        }
        let mut priority: u32 = 0;
        while let Some(c) = self.scanner.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            priority = priority * 10 + (c - b'0') as u32;
            if priority > 65535 {
                return Err(self.error("The maximum constructor/destructor priority is 65535."));
            }
            self.scanner.bump();
        }
        Ok(Some(priority))
    }

    fn parse_symbol(&mut self, global: bool) -> Result<()> {
        let line = self.scanner.line();
        self.scanner.bump(); // '=' or '@'

        let mut flags = SymbolFlags::default();
        loop {
            match self.scanner.peek() {
                Some(b'?') => {
                    if flags.weak {
                        return Err(self.error("Duplicate `?` flag on symbol definition."));
                    }
                    flags.weak = true;
                    self.scanner.bump();
                }
                Some(b'+') => {
                    if flags.zero {
                        return Err(self.error("Duplicate `+` flag on symbol definition."));
                    }
                    flags.zero = true;
                    self.scanner.bump();
                }
                Some(b'{') => {
                    if flags.constructor {
                        return Err(self.error("Duplicate `{` flag on symbol definition."));
                    }
                    flags.constructor = true;
                    self.scanner.bump();
                    flags.constructor_priority = self.parse_priority()?;
                }
                Some(b'}') => {
                    if flags.destructor {
                        return Err(self.error("Duplicate `}` flag on symbol definition."));
                    }
                    flags.destructor = true;
                    self.scanner.bump();
                    flags.destructor_priority = self.parse_priority()?;
                }
                _ => break,
            }
        }

        let name = self.read_name()?;
        self.push(
            Token::Symbol {
                global,
                flags,
                name,
            },
            line,
        );
        Ok(())
    }

    fn parse_member(&mut self) -> Result<()> {
        let line = self.scanner.line();
        self.scanner.bump(); // '%'
        let mut name = String::new();
        while !is_end_of_line(self.scanner.peek()) {
            name.push(self.scanner.bump().unwrap() as char);
        }
        self.push(Token::Member(name.clone()), line);
        self.set_file(&name);
        // The separator's line ending has not been consumed; the member
        // starts counting from it.
        self.scanner.set_line(0);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        while let Some(c) = self.scanner.peek() {
            let line = self.scanner.line();
            match c {
                _ if c.is_ascii_whitespace() => {
                    self.scanner.bump();
                }
                _ if hex::is_digit(c) => {
                    let byte = self.parse_hex_byte()?;
                    self.push(Token::Byte(byte), line);
                }
                b';' => self.consume_comment(),
                b'#' => self.parse_directive()?,
                b'^' | b'<' | b'>' | b'&' => {
                    let mark = match c {
                        b'^' => Mark::Absolute,
                        b'<' => Mark::High,
                        b'>' => Mark::Low,
                        _ => Mark::Relative,
                    };
                    self.scanner.bump();
                    let name = self.read_name()?;
                    self.push(Token::Invoke(mark, name), line);
                }
                b'=' => self.parse_symbol(true)?,
                b'@' => self.parse_symbol(false)?,
                b':' => {
                    self.scanner.bump();
                    let name = self.read_name()?;
                    self.push(Token::Label(name), line);
                }
                b'%' => self.parse_member()?,
                _ => return Err(self.error("Invalid character.")),
            }
        }
        Ok(())
    }
}

/// Tokenizes one object file or archive. Every returned token carries the
/// source location that was in effect where it appeared.
pub fn tokenize(input: &[u8], filename: &str) -> std::result::Result<Tokenized, TokenError> {
    let mut tokenizer = Tokenizer {
        scanner: Scanner::new(input),
        items: Vec::new(),
        files: vec![filename.to_string()],
        current_file: 0,
    };
    tokenizer.run()?;
    Ok(Tokenized {
        items: tokenizer.items,
        files: tokenizer.files,
    })
}
