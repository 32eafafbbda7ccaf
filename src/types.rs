//! Closed enums describing a field: data type, byte order and overflow policy.
//!
//! Each enum parses from (and displays as) the upper-case token used in packet
//! definition files, e.g. `UINT`, `LITTLE_ENDIAN`, `ERROR_ALLOW_HEX`.

use crate::accessor::AccessorError;
use std::fmt;
use std::str::FromStr;

/// Data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    UInt,
    Float,
    String,
    Block,
    /// Computed elsewhere; never stored in the buffer.
    Derived,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Int => "INT",
            DataType::UInt => "UINT",
            DataType::Float => "FLOAT",
            DataType::String => "STRING",
            DataType::Block => "BLOCK",
            DataType::Derived => "DERIVED",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int | DataType::UInt)
    }

    /// STRING and BLOCK may have a zero or negative bit size ("rest of buffer").
    pub fn is_variable_capable(&self) -> bool {
        matches!(self, DataType::String | DataType::Block)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = AccessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INT" => Ok(DataType::Int),
            "UINT" => Ok(DataType::UInt),
            "FLOAT" => Ok(DataType::Float),
            "STRING" => Ok(DataType::String),
            "BLOCK" => Ok(DataType::Block),
            "DERIVED" => Ok(DataType::Derived),
            _ => Err(AccessorError::UnknownType(format!(
                "data_type {} is not recognized",
                s
            ))),
        }
    }
}

/// Byte order of a field. Host byte order never matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

impl Endianness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endianness::Big => "BIG_ENDIAN",
            Endianness::Little => "LITTLE_ENDIAN",
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endianness {
    type Err = AccessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BIG_ENDIAN" => Ok(Endianness::Big),
            "LITTLE_ENDIAN" => Ok(Endianness::Little),
            _ => Err(AccessorError::UnknownType(format!(
                "unknown endianness {} - must be BIG_ENDIAN or LITTLE_ENDIAN",
                s
            ))),
        }
    }
}

/// Write-time rule for integers outside the range of their field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverflowPolicy {
    /// Reduce modulo the field width; anything above the signed max becomes the min.
    Truncate,
    /// Clamp to the field range.
    Saturate,
    /// Reject anything outside the field range.
    #[default]
    Error,
    /// Like `Error`, but accept values up to the unsigned max of the width.
    ErrorAllowHex,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::Truncate => "TRUNCATE",
            OverflowPolicy::Saturate => "SATURATE",
            OverflowPolicy::Error => "ERROR",
            OverflowPolicy::ErrorAllowHex => "ERROR_ALLOW_HEX",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = AccessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRUNCATE" => Ok(OverflowPolicy::Truncate),
            "SATURATE" => Ok(OverflowPolicy::Saturate),
            "ERROR" => Ok(OverflowPolicy::Error),
            "ERROR_ALLOW_HEX" => Ok(OverflowPolicy::ErrorAllowHex),
            _ => Err(AccessorError::UnknownType(format!(
                "unknown overflow type {}",
                s
            ))),
        }
    }
}
