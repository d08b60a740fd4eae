//! The Onramp hex object format.
//!
//! A hex object file (`.oo`) is the textual intermediate format between the
//! assembler and the linker. It is a whitespace-separated stream of:
//!
//! - **hex bytes**: two hex nibbles, one byte of the current symbol's
//!   payload;
//! - **invocations**: `^name` (absolute address), `<name` (high half),
//!   `>name` (low half), `&name` (relative word offset);
//! - **definitions**: `=name` (global symbol), `@name` (static symbol),
//!   `:name` (label), with optional flag characters `?` (weak), `+`
//!   (zero-fill), `{` (constructor) and `}` (destructor) between the sigil
//!   and the name; constructors and destructors may carry a decimal
//!   priority after the flag;
//! - **directives**: `#line N "file"`, `#line manual`, a bare `#` (line
//!   increment), and `;` comments to end of line;
//! - **archive separators**: a `%filename` line introduces the next member
//!   of a static archive.
//!
//! [`tokenize`](token/fn.tokenize.html) turns a file into a token vector
//! with a source location attached to every token; this is the linker's
//! input. [`ObjectWriter`](writer/struct.ObjectWriter.html) builds object
//! text and tracks instruction-word alignment; this is the assembler's
//! output.

pub mod hex;
pub mod scanner;
pub mod token;
pub mod writer;

pub use crate::token::{tokenize, Mark, Spanned, SymbolFlags, Token, TokenError, Tokenized};
pub use crate::writer::ObjectWriter;
