//! Linker for Onramp hex objects and static archives.
//!
//! [`link_objects`](fn.link_objects.html) resolves labels and symbols
//! across any number of object files and archives and produces a flat
//! bytecode image, optionally with a textual debug sidecar. Inputs are
//! tokenized once into memory and walked in multiple passes:
//!
//! 1. size every symbol;
//! 2. (with `optimize`) collect the symbol reference graph and mark what
//!    is reachable from the entry point, constructors and destructors;
//! 3. resolve label offsets per file;
//! 4. emit bytes, with invocations replaced by the resolved addresses.
//!
//! Addresses are assigned in declaration order among surviving symbols,
//! each padded to a word boundary; the first symbol is the entry point.
//! The linker also synthesizes `__constructors` and `__destructors`,
//! zero-terminated address tables ordered by priority.

mod emit;
mod label;
mod parse;
mod symbol;

#[cfg(test)]
mod test;

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::emit::Emitter;
use crate::parse::Member;
use crate::symbol::{SymbolTable, GLOBAL};

#[derive(Default, Clone)]
pub struct LinkOptions {
    /// Eliminate symbols not reachable from the entry point,
    /// constructors or destructors.
    pub optimize: bool,
    /// Produce the `.od` debug sidecar.
    pub debug: bool,
}

#[derive(Debug)]
pub struct LinkOutput {
    pub image: Vec<u8>,
    pub debug: Option<String>,
}

#[derive(Debug)]
pub enum Error {
    Token(ohex::TokenError),
    Io(io::Error, PathBuf),
    Link {
        file: String,
        line: u32,
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Token(err) => err.fmt(f),
            Error::Io(err, path) => write!(f, "Failed to read \"{}\": {}", path.display(), err),
            Error::Link {
                file,
                line,
                message,
            } => write!(f, "{}:{}: {}", file, line, message),
        }
    }
}

impl StdError for Error {}

impl From<ohex::TokenError> for Error {
    fn from(err: ohex::TokenError) -> Error {
        Error::Token(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Links in-memory objects. Each input is `(display name, object text)`;
/// `target` names the output in the debug header.
pub fn link_objects(
    inputs: &[(String, Vec<u8>)],
    options: &LinkOptions,
    target: &str,
) -> Result<LinkOutput> {
    let mut members: Vec<Member> = Vec::new();
    let mut file_index = 0i32;
    for (name, text) in inputs {
        let tokenized = ohex::tokenize(text, name)?;
        members.extend(parse::split_members(tokenized, &mut file_index));
    }

    let mut table = SymbolTable::new(options.optimize);
    parse::pass_measure(&mut table, &members)?;
    define_generated(&mut table)?;

    if options.optimize {
        parse::pass_collect_uses(&mut table, &members);
        table.mark_used();
    }
    table.assign_addresses();

    let mut emitter = Emitter::new(options.debug, target);
    for member in &members {
        let labels = parse::pass_labels(&table, member)?;
        parse::pass_emit(&table, member, &labels, &mut emitter)?;
    }
    parse::emit_generated(&table, &mut emitter);

    let (image, debug) = emitter.finish();
    Ok(LinkOutput { image, debug })
}

/// Links files from disk; archives are detected by their `%` member
/// separators, not by extension.
pub fn link_files(
    paths: &[PathBuf],
    options: &LinkOptions,
    target: &str,
) -> Result<LinkOutput> {
    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read(path).map_err(|err| Error::Io(err, path.clone()))?;
        inputs.push((path.display().to_string(), text));
    }
    link_objects(&inputs, options, target)
}

/// Defines the synthesized constructor/destructor table symbols: one word
/// per entry plus a zero terminator.
fn define_generated(table: &mut SymbolTable) -> Result<()> {
    let lists = [
        ("__constructors", table.constructor_count()),
        ("__destructors", table.destructor_count()),
    ];
    for (name, count) in lists.iter() {
        let id = table
            .define(name, GLOBAL, Default::default())
            .map_err(|message| Error::Link {
                file: "<builtin>".to_owned(),
                line: 0,
                message,
            })?;
        table.get_mut(id).size = 4 * (*count as u32 + 1);
    }
    Ok(())
}

/// Copies a wrap-header file into a fixed 128-byte prefix, zero padded.
pub fn read_wrap_header(path: &Path) -> io::Result<Vec<u8>> {
    let content = fs::read(path)?;
    let mut header = vec![0u8; 128];
    let length = content.len().min(128);
    header[..length].copy_from_slice(&content[..length]);
    Ok(header)
}
