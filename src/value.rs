//! Runtime values read from or written to a buffer.

use crate::accessor::AccessorError;
use std::borrow::Cow;
use std::fmt;

/// A single field value (scalar, or a homogeneous array of scalars).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Block(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x),
            Value::UInt(x) => i64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(x) => Some(*x),
            Value::Int(x) => u64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(x) => Some(*x as f64),
            Value::UInt(x) => Some(*x as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Raw bytes of a STRING or BLOCK value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            Value::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::UInt(_) => "UInt",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Block(_) => "Block",
            Value::Array(_) => "Array",
        }
    }

    /// Integer coercion used when writing INT/UINT fields.
    ///
    /// Floats truncate toward zero; strings must hold a decimal or `0x` hex integer.
    pub fn to_integer(&self) -> Result<i128, AccessorError> {
        match self {
            Value::Int(x) => Ok(*x as i128),
            Value::UInt(x) => Ok(*x as i128),
            Value::Float(f) => {
                if f.is_finite() {
                    Ok(f.trunc() as i128)
                } else {
                    Err(AccessorError::InvalidValue(format!(
                        "cannot convert float {} to integer",
                        f
                    )))
                }
            }
            Value::String(s) => parse_integer(s).ok_or_else(|| {
                AccessorError::InvalidValue(format!(
                    "invalid literal for integer: '{}'",
                    s
                ))
            }),
            other => Err(AccessorError::InvalidValue(format!(
                "{} value cannot be converted to an integer",
                other.type_name()
            ))),
        }
    }

    /// Float coercion used when writing FLOAT fields.
    pub fn to_float(&self) -> Result<f64, AccessorError> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(x) => Ok(*x as f64),
            Value::UInt(x) => Ok(*x as f64),
            Value::String(s) => {
                let t = s.trim();
                t.parse::<f64>()
                    .ok()
                    .or_else(|| parse_integer(t).map(|i| i as f64))
                    .ok_or_else(|| {
                        AccessorError::InvalidValue(format!(
                            "could not convert string to float: '{}'",
                            s
                        ))
                    })
            }
            other => Err(AccessorError::InvalidValue(format!(
                "{} value cannot be converted to a float",
                other.type_name()
            ))),
        }
    }

    /// Byte coercion used when writing STRING/BLOCK fields.
    pub fn to_bytes(&self) -> Result<Cow<'_, [u8]>, AccessorError> {
        match self {
            Value::String(s) => Ok(Cow::Borrowed(s.as_bytes())),
            Value::Block(b) => Ok(Cow::Borrowed(b)),
            other => Err(AccessorError::InvalidValue(format!(
                "{} value cannot be written as bytes",
                other.type_name()
            ))),
        }
    }
}

/// Parse a signed decimal or `0x`/`0b`/`0o` prefixed integer.
pub fn parse_integer(s: &str) -> Option<i128> {
    let t = s.trim().replace('_', "");
    let (negative, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t.as_str())),
    };
    if body.is_empty() {
        return None;
    }
    let lower = body.to_ascii_lowercase();
    let magnitude = if let Some(hex) = lower.strip_prefix("0x") {
        i128::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i128::from_str_radix(bin, 2).ok()?
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i128::from_str_radix(oct, 8).ok()?
    } else if lower.bytes().all(|b| b.is_ascii_digit()) {
        lower.parse::<i128>().ok()?
    } else {
        return None;
    };
    Some(if negative { -magnitude } else { magnitude })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(x) => write!(f, "{}", x),
            Value::UInt(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Block(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Value::Int(x)
    }
}

impl From<i32> for Value {
    fn from(x: i32) -> Self {
        Value::Int(x as i64)
    }
}

impl From<u64> for Value {
    fn from(x: u64) -> Self {
        Value::UInt(x)
    }
}

impl From<u32> for Value {
    fn from(x: u32) -> Self {
        Value::UInt(x as u64)
    }
}

impl From<u8> for Value {
    fn from(x: u8) -> Self {
        Value::UInt(x as u64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(x as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Block(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Block(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
