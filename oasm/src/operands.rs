//! Operand processing: registers, mix-type arguments, numbers, quoted
//! bytes, label references and syscall names.
//!
//! Most functions return the encoded argument byte directly; the
//! register-constraint variants (`non_scratch`, `numbered`) enforce the
//! operand rules of expansions that clobber the scratch registers.

use pest::iterators::Pair;

use ohex::{Mark, SymbolFlags};
use ovm::{RegisterId, Syscall};

use crate::parser::Rule;
use crate::{new_parser_error, Result};

pub const RA: u8 = 0x80 + RegisterId::RA as u8;
pub const RB: u8 = 0x80 + RegisterId::RB as u8;
pub const RSP: u8 = 0x80 + RegisterId::RSP as u8;
pub const RFP: u8 = 0x80 + RegisterId::RFP as u8;
pub const RPP: u8 = 0x80 + RegisterId::RPP as u8;
pub const RIP: u8 = 0x80 + RegisterId::RIP as u8;

/// A label reference or definition with its sigil and flags.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelRef {
    pub mark: Mark,
    pub flags: SymbolFlags,
    pub name: String,
}

/// The destination operand of a jump-family mnemonic.
#[derive(Debug, PartialEq)]
pub enum JumpTarget {
    Label(LabelRef),
    Offset(i16),
    Bytes(u8, u8),
}

const REGISTER_ERROR: &str = "Expected register name or quoted register byte";

/// Case-insensitive enum-name lookup, for register and syscall mnemonics.
fn parse_enum<T: std::str::FromStr<Err = util::ParseEnumError>>(text: &str) -> Option<T> {
    text.to_uppercase().parse().ok()
}

fn register_name_to_byte(name: &str) -> Option<u8> {
    parse_enum::<RegisterId>(name).map(RegisterId::encode)
}

pub fn quoted_byte_value(pair: Pair<Rule>) -> u8 {
    let digits = pair.into_inner().next().unwrap();
    u8::from_str_radix(digits.as_str(), 16).unwrap()
}

pub fn process_register(pair: Pair<Rule>) -> Result<u8> {
    let span = pair.as_span();
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::identifier => register_name_to_byte(inner.as_str())
            .ok_or_else(|| new_parser_error(span, REGISTER_ERROR.to_owned())),
        Rule::quoted_byte => {
            let byte = quoted_byte_value(inner);
            if byte & 0xF0 != 0x80 {
                return Err(new_parser_error(span, REGISTER_ERROR.to_owned()));
            }
            Ok(byte)
        }
        _ => unreachable!(),
    }
}

pub fn process_register_non_scratch(pair: Pair<Rule>) -> Result<u8> {
    let span = pair.as_span();
    let byte = process_register(pair)?;
    if byte == RA || byte == RB {
        return Err(new_parser_error(
            span,
            "Register argument cannot be ra or rb.".to_owned(),
        ));
    }
    Ok(byte)
}

pub fn process_register_numbered(pair: Pair<Rule>) -> Result<u8> {
    let span = pair.as_span();
    let byte = process_register(pair)?;
    if byte >= RA {
        return Err(new_parser_error(
            span,
            "Register argument must be a numbered register.".to_owned(),
        ));
    }
    Ok(byte)
}

/// Parses a number token: decimal, `0x` hex, optionally signed. Decimal
/// numbers cannot start with `0`; hex numbers are at most eight digits.
pub fn process_number(pair: Pair<Rule>) -> Result<i32> {
    let span = pair.as_span();
    let mut negative = false;
    let mut magnitude = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::sign => negative = inner.as_str() == "-",
            Rule::hex_number => {
                let digits = &inner.as_str()[2..];
                if digits.len() > 8 {
                    return Err(new_parser_error(
                        span,
                        "Hexadecimal number must be at most 8 hexadecimal digits.".to_owned(),
                    ));
                }
                magnitude = Some(u32::from_str_radix(digits, 16).unwrap());
            }
            Rule::dec_number => {
                let digits = inner.as_str();
                if digits.len() > 1 && digits.starts_with('0') {
                    return Err(new_parser_error(
                        span,
                        "Decimal numbers cannot start with '0'. Use 0x for hexadecimal; \
                         octal and binary are not supported."
                            .to_owned(),
                    ));
                }
                magnitude = Some(digits.parse::<u32>().map_err(|_| {
                    new_parser_error(span.clone(), "Decimal number is out of range.".to_owned())
                })?);
            }
            _ => unreachable!(),
        }
    }
    let magnitude = magnitude.unwrap();

    if negative {
        if magnitude > 0x8000_0000 {
            return Err(new_parser_error(
                span,
                "Negative number is out of range.".to_owned(),
            ));
        }
        Ok((magnitude as i64).wrapping_neg() as i32)
    } else {
        Ok(magnitude as i32)
    }
}

/// Range-checks a number for a 16-bit slot (jump offsets, `ims` halves).
pub fn process_short(pair: Pair<Rule>) -> Result<i16> {
    let span = pair.as_span();
    let value = process_number(pair)?;
    num::NumCast::from(value).ok_or_else(|| {
        new_parser_error(
            span,
            format!("Number is out of range of relative jump: {}", value),
        )
    })
}

fn string_bytes(pair: Pair<Rule>) -> Result<Vec<u8>> {
    let span = pair.as_span();
    let chars = pair.into_inner().next().unwrap();
    let bytes = chars.as_str().as_bytes().to_vec();
    for &byte in &bytes {
        // Only printable ASCII may appear; escapes do not exist.
        if byte < 0x20 || byte > 0x7E {
            return Err(new_parser_error(
                span,
                "Forbidden character in string".to_owned(),
            ));
        }
    }
    Ok(bytes)
}

/// A string item: every byte is emitted as data.
pub fn process_string(pair: Pair<Rule>) -> Result<Vec<u8>> {
    string_bytes(pair)
}

/// A single-character string used as a byte value.
fn process_character(pair: Pair<Rule>) -> Result<u8> {
    let span = pair.as_span();
    let bytes = string_bytes(pair)?;
    match bytes.len() {
        0 => Err(new_parser_error(
            span,
            "String argument cannot be empty.".to_owned(),
        )),
        1 => Ok(bytes[0]),
        _ => Err(new_parser_error(
            span,
            "String argument must consist of a single character.".to_owned(),
        )),
    }
}

/// `byte_or_char`: a quoted byte or a single-character string.
pub fn process_byte_or_char(pair: Pair<Rule>) -> Result<u8> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::quoted_byte => Ok(quoted_byte_value(inner)),
        Rule::string => process_character(inner),
        _ => unreachable!(),
    }
}

/// A mix-type argument: register name, small number, single-character
/// string or quoted byte.
pub fn process_mix(pair: Pair<Rule>) -> Result<u8> {
    let span = pair.as_span();
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::number => {
            let value = process_number(inner)?;
            ovm::instructions::encode_mix_immediate(value).ok_or_else(|| {
                new_parser_error(
                    span,
                    "Decimal number for mix-type argument is out of range (-112 to 127)."
                        .to_owned(),
                )
            })
        }
        Rule::identifier => register_name_to_byte(inner.as_str()).ok_or_else(|| {
            new_parser_error(
                span,
                "Mix-type argument identifier is not the name of a register.".to_owned(),
            )
        }),
        Rule::string => process_character(inner),
        Rule::quoted_byte => Ok(quoted_byte_value(inner)),
        _ => unreachable!(),
    }
}

pub fn process_mix_non_scratch(pair: Pair<Rule>) -> Result<u8> {
    let span = pair.as_span();
    let byte = process_mix(pair)?;
    if byte == RA || byte == RB {
        return Err(new_parser_error(
            span,
            "Mix-type argument cannot be ra or rb.".to_owned(),
        ));
    }
    Ok(byte)
}

pub fn process_label(pair: Pair<Rule>) -> Result<LabelRef> {
    let mut flags = SymbolFlags::default();
    let mut mark = Mark::Label;
    let mut name = String::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::label_sigil => {
                mark = match inner.as_str() {
                    "^" => Mark::Absolute,
                    "<" => Mark::High,
                    ">" => Mark::Low,
                    "&" => Mark::Relative,
                    ":" => Mark::Label,
                    "=" => Mark::Global,
                    "@" => Mark::Static,
                    _ => unreachable!(),
                }
            }
            Rule::label_flag => match inner.as_str() {
                "?" => flags.weak = true,
                "+" => flags.zero = true,
                "{" => flags.constructor = true,
                "}" => flags.destructor = true,
                _ => unreachable!(),
            },
            Rule::identifier => name = inner.as_str().to_owned(),
            _ => unreachable!(),
        }
    }
    Ok(LabelRef { mark, flags, name })
}

pub fn process_jump_target(pair: Pair<Rule>) -> Result<JumpTarget> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::label => Ok(JumpTarget::Label(process_label(inner)?)),
        Rule::number => Ok(JumpTarget::Offset(process_short(inner)?)),
        Rule::jump_pair => {
            let mut pairs = inner.into_inner();
            let low = quoted_byte_value(pairs.next().unwrap());
            let high = quoted_byte_value(pairs.next().unwrap());
            Ok(JumpTarget::Bytes(low, high))
        }
        _ => unreachable!(),
    }
}

/// The first operand of `sys`: a syscall mnemonic, number or quoted byte.
pub fn process_syscall_number(pair: Pair<Rule>) -> Result<u8> {
    let span = pair.as_span();
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::identifier => parse_enum::<Syscall>(inner.as_str())
            .map(|syscall| syscall as u8)
            .ok_or_else(|| {
                new_parser_error(
                    span,
                    "Argument to sys instruction is not a syscall.".to_owned(),
                )
            }),
        Rule::number => {
            let value = process_number(inner)?;
            if value < 0 || value > 0xFF {
                return Err(new_parser_error(
                    span,
                    "Syscall number out of bounds.".to_owned(),
                ));
            }
            Ok(value as u8)
        }
        Rule::quoted_byte => Ok(quoted_byte_value(inner)),
        _ => unreachable!(),
    }
}
