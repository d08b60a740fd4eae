//! Assembler for the Onramp virtual machine.
//!
//! [`assemble`](fn.assemble.html) translates assembly source into the hex
//! object format in a single pass: the source is parsed with [pest], then
//! each token is emitted in order. Mnemonics encode into one instruction
//! word or expand into a fixed multi-instruction sequence; label tokens,
//! quoted bytes, strings and numbers pass through as data; `#` debug lines
//! are copied to the output verbatim.
//!
//! The output mirrors the line structure of the input (one output line per
//! source line, opened by a `#line 1` directive) so that the linker's line
//! tracking points back at the assembly source.
//!
//! Instructions must start on a 4-byte boundary of the emitted payload;
//! the alignment is tracked across hex bytes and invocations exactly as
//! the linker will see them.
//!
//! The error type is `pest::error::Error`, so syntax and semantic errors
//! alike pretty-print with the offending source span.
//!
//! [pest]: https://docs.rs/pest/

mod opcodes;
mod operands;
mod parser;

#[cfg(test)]
mod test;

use pest::error::ErrorVariant;
use pest::{Parser, Span};

use ohex::ObjectWriter;
use parser::{OasmParser, Rule};

pub type Error = pest::error::Error<Rule>;

pub type Result<T> = std::result::Result<T, Error>;

fn new_parser_error(span: Span, message: String) -> Error {
    Error::new_from_span(ErrorVariant::CustomError { message }, span)
}

/// Assembles a source file into hex object text. `filename` only names
/// the source in the emitted `#line` directive.
pub fn assemble(input: &str, filename: &str) -> Result<Vec<u8>> {
    let program = OasmParser::parse(Rule::program, input)?.next().unwrap();

    let mut out = ObjectWriter::new();
    out.emit_line_directive(1, Some(filename));

    // The line of source the output is currently on; newlines are emitted
    // to keep the object text in step with the source.
    let mut current_line = 1usize;

    for item in program.into_inner() {
        if item.as_rule() == Rule::EOI {
            break;
        }
        let span = item.as_span();
        let (line, _) = span.start_pos().line_col();
        while current_line < line {
            out.emit_newline();
            current_line += 1;
        }

        let inner = item.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::debug_line => out.emit_verbatim(inner.as_str()),
            Rule::instruction => {
                if !out.is_aligned() {
                    return Err(new_parser_error(span, "Misaligned instruction".to_owned()));
                }
                opcodes::process_instruction(inner, &mut out)?;
            }
            Rule::label => {
                let label = operands::process_label(inner)?;
                out.emit_label(label.mark, &label.flags, &label.name);
            }
            Rule::quoted_byte => out.emit_hex_byte(operands::quoted_byte_value(inner)),
            Rule::string => {
                for byte in operands::process_string(inner)? {
                    out.emit_hex_byte(byte);
                }
            }
            Rule::number => {
                let value = operands::process_number(inner)?;
                out.emit_hex_word(value as u32);
            }
            _ => unreachable!(),
        }
    }

    // End with a newline by convention.
    if out.as_bytes().last() != Some(&b'\n') {
        out.emit_newline();
    }
    Ok(out.into_bytes())
}
