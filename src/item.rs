//! Field descriptors: the validated layout of one item in a packet.

use crate::bits;
use crate::types::{DataType, Endianness, OverflowPolicy};
use crate::value::Value;

/// Invalid item definition. The message is prefixed with the item name.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ItemError(pub String);

/// Size of an item taken from another (length) item of the same structure.
///
/// Effective size in bits = `length * length_bits_per_count + length_value_bit_offset`.
/// Scalar INT/UINT items instead read a QUIC-style size code from the length
/// item (0 → 6 bits, 1 → 14, 2 → 30, 3 → 62).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableBitSize {
    pub length_item_name: String,
    pub length_bits_per_count: i64,
    pub length_value_bit_offset: i64,
}

impl VariableBitSize {
    pub fn new(length_item_name: &str) -> Self {
        VariableBitSize {
            length_item_name: length_item_name.to_ascii_uppercase(),
            length_bits_per_count: 8,
            length_value_bit_offset: 0,
        }
    }
}

/// Layout of a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub bit_offset: i64,
    pub bit_size: i64,
    pub data_type: DataType,
    pub endianness: Endianness,
    /// Total array size in bits; `None` for scalars.
    pub array_size: Option<i64>,
    pub overflow: OverflowPolicy,
    pub variable_bit_size: Option<VariableBitSize>,
    /// Overlapping another item is intentional.
    pub overlap: bool,
    pub description: Option<String>,
    /// Value identifying the packet when read from this item.
    pub id_value: Option<Value>,
    pub default: Option<Value>,
    pub minimum: Option<Value>,
    pub maximum: Option<Value>,
}

impl FieldDescriptor {
    /// Build and validate a descriptor. The name is stored upper-case.
    pub fn new(
        name: &str,
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        endianness: Endianness,
        array_size: Option<i64>,
    ) -> Result<Self, ItemError> {
        let item = FieldDescriptor {
            name: name.trim().to_ascii_uppercase(),
            bit_offset,
            bit_size,
            data_type,
            endianness,
            array_size,
            overflow: OverflowPolicy::Error,
            variable_bit_size: None,
            overlap: false,
            description: None,
            id_value: None,
            default: None,
            minimum: None,
            maximum: None,
        };
        item.validate()?;
        Ok(item)
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_id_value(mut self, id_value: Value) -> Self {
        self.id_value = Some(id_value);
        self
    }

    pub fn with_variable_bit_size(mut self, variable: VariableBitSize) -> Self {
        self.variable_bit_size = Some(variable);
        self
    }

    fn err(&self, message: String) -> ItemError {
        ItemError(format!("{}: {}", self.name, message))
    }

    /// Check every layout rule; called by `new` and after offsets change.
    pub fn validate(&self) -> Result<(), ItemError> {
        if self.name.is_empty() {
            return Err(ItemError("name must contain at least one character".to_string()));
        }

        // Offset
        match self.data_type {
            DataType::Float | DataType::String | DataType::Block if !bits::byte_aligned(self.bit_offset) => {
                return Err(self.err(
                    "bit_offset for 'FLOAT', 'STRING', and 'BLOCK' items must be byte aligned".to_string(),
                ));
            }
            DataType::Derived if self.bit_offset != 0 => {
                return Err(self.err("DERIVED items must have bit_offset of zero".to_string()));
            }
            _ => {}
        }

        // Size
        match self.data_type {
            DataType::Int | DataType::UInt | DataType::Float if self.bit_size <= 0 => {
                return Err(self.err(format!(
                    "bit_size cannot be negative or zero for 'INT', 'UINT', and 'FLOAT' items: {}",
                    self.bit_size
                )));
            }
            DataType::Int | DataType::UInt if self.bit_size > 64 => {
                return Err(self.err(format!(
                    "bit_size for INT and UINT items cannot exceed 64. Given: {}",
                    self.bit_size
                )));
            }
            DataType::String | DataType::Block if self.bit_size % 8 != 0 => {
                return Err(self.err("bit_size for STRING and BLOCK items must be byte multiples".to_string()));
            }
            DataType::Float if self.bit_size != 32 && self.bit_size != 64 => {
                return Err(self.err(format!(
                    "bit_size for FLOAT items must be 32 or 64. Given: {}",
                    self.bit_size
                )));
            }
            DataType::Derived if self.bit_size != 0 => {
                return Err(self.err("DERIVED items must have bit_size of zero".to_string()));
            }
            _ => {}
        }

        if let Some(array_size) = self.array_size {
            if self.bit_size <= 0 {
                return Err(self.err("bit_size cannot be negative or zero for array items".to_string()));
            }
            if array_size % self.bit_size != 0 {
                return Err(self.err("array_size must be a multiple of bit_size".to_string()));
            }
        }

        if self.bit_offset < 0 {
            if self.bit_size < 0 {
                return Err(self.err(format!(
                    "Can't define an item with negative bit_size {} and negative bit_offset {}",
                    self.bit_size, self.bit_offset
                )));
            }
            if let Some(array_size) = self.array_size {
                if array_size < 0 {
                    return Err(self.err(format!(
                        "Can't define an item with negative array_size {} and negative bit_offset {}",
                        array_size, self.bit_offset
                    )));
                }
                if array_size > self.bit_offset.abs() {
                    return Err(self.err(format!(
                        "Can't define an item with array_size {} greater than negative bit_offset {}",
                        array_size, self.bit_offset
                    )));
                }
            } else if self.bit_size > self.bit_offset.abs() {
                return Err(self.err(format!(
                    "Can't define an item with bit_size {} greater than negative bit_offset {}",
                    self.bit_size, self.bit_offset
                )));
            }
        } else if self.little_endian_bit_field() {
            let (offset, size) = (self.bit_offset as usize, self.bit_size as usize);
            if bits::bitfield_span(offset, size, Endianness::Little).is_none() {
                return Err(self.err(format!(
                    "LITTLE_ENDIAN bitfield with bit_offset {} and bit_size {} is invalid",
                    self.bit_offset, self.bit_size
                )));
            }
        }
        Ok(())
    }

    /// Little-endian INT/UINT that is not a byte-aligned native width.
    pub fn little_endian_bit_field(&self) -> bool {
        self.endianness == Endianness::Little
            && self.data_type.is_integer()
            && !(bits::byte_aligned(self.bit_offset) && bits::is_native_width(self.bit_size))
    }

    /// Size fixed by an external length item.
    pub fn is_length_driven(&self) -> bool {
        self.variable_bit_size.is_some()
    }

    /// Size that depends on the buffer (rest-of-buffer or length-driven).
    pub fn is_variable(&self) -> bool {
        self.is_length_driven() || self.is_open_ended()
    }

    /// Zero/negative size meaning "to the end of the buffer".
    pub fn is_open_ended(&self) -> bool {
        !self.is_length_driven()
            && ((self.data_type != DataType::Derived && self.bit_size <= 0)
                || matches!(self.array_size, Some(a) if a <= 0))
    }

    /// Bits occupied in the buffer as declared (array size for arrays).
    pub fn declared_bits(&self) -> i64 {
        self.array_size.unwrap_or(self.bit_size)
    }

    /// `[start, end)` bit range for items with a known non-negative position and size.
    pub fn bit_range(&self) -> Option<(i64, i64)> {
        if self.data_type == DataType::Derived || self.bit_offset < 0 || self.is_variable() {
            return None;
        }
        Some((self.bit_offset, self.bit_offset + self.declared_bits()))
    }
}
