use std::{error::Error, fmt};

pub mod intern;
pub mod llong;

/// Byte order of everything in the toolchain: instruction words, symbol
/// addresses, the process image. Onramp is little-endian throughout.
pub type Endian = byteorder::LittleEndian;

/// Error returned when a name does not match any variant of an enum, for
/// example an unknown register or syscall mnemonic.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ParseEnumError {
    pub value: String,
    pub enum_name: &'static str,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Failed to parse \"{}\" as {}.",
            &self.value, &self.enum_name
        )
    }
}

impl Error for ParseEnumError {
    fn description(&self) -> &str {
        "Failed to parse enum."
    }
}

/// Name lookup for field-less enums. Implemented with
/// `#[derive(EnumFromStr)]` from the `util-derive` crate; the derive matches
/// variant names exactly, so callers normalize case first.
pub trait EnumFromStr: Sized {
    fn from_str(s: &str) -> Result<Self, ParseEnumError>;
}
