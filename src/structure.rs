//! Ordered, named items over an owned buffer.
//!
//! A [`Structure`] keeps its items sorted by bit offset (positive offsets
//! first, then negative offsets), tracks the length its items require, and
//! reads/writes items through [`BinaryAccessor`].
//!
//! ## Length-driven items
//!
//! An item with a [`VariableBitSize`](crate::item::VariableBitSize) takes its
//! size from another item. Offsets are resolved per call: every later
//! non-derived item with a non-negative offset is shifted by the difference
//! between the resolved and the declared size. Writing such an item updates
//! the length item, resizes the buffer and writes the value as one step; on
//! error the buffer is left untouched.

use std::borrow::Cow;

use tracing::debug;

use crate::accessor::{AccessorError, BinaryAccessor};
use crate::dump;
use crate::item::{FieldDescriptor, ItemError, VariableBitSize};
use crate::types::{DataType, Endianness, OverflowPolicy};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructureError {
    #[error(transparent)]
    Accessor(#[from] AccessorError),
    #[error(transparent)]
    Item(#[from] ItemError),
    #[error("Unknown item: {0}")]
    UnknownItem(String),
    /// Buffer length does not match the defined length.
    #[error("{0}")]
    Buffer(String),
    #[error("Can't append an item after a variably sized item")]
    AppendAfterVariable,
    /// Length item missing, unreadable, or unable to express a size.
    #[error("{0}")]
    VariableSize(String),
}

/// Value bits of a QUIC-style variable integer for a size code.
fn quic_value_bits(code: i64) -> i64 {
    match code {
        0 => 6,
        1 => 14,
        2 => 30,
        _ => 62,
    }
}

/// Smallest QUIC size code able to hold `value`.
fn quic_code(value: i128, data_type: DataType) -> i64 {
    let limits: [(i128, i128); 3] = if data_type == DataType::UInt {
        [(0, 63), (0, 16_383), (0, 1_073_741_823)]
    } else {
        [(-32, 31), (-8_192, 8_191), (-536_870_912, 536_870_911)]
    };
    limits
        .iter()
        .position(|&(min, max)| value <= max && (data_type == DataType::UInt || value >= min))
        .map(|i| i as i64)
        .unwrap_or(3)
}

fn sort_key(item: &FieldDescriptor) -> (bool, i64, i64) {
    (item.bit_offset < 0, item.bit_offset, item.bit_size)
}

fn empty_value(item: &FieldDescriptor) -> Value {
    match (item.array_size, item.data_type) {
        (Some(_), _) => Value::Array(Vec::new()),
        (None, DataType::Block) => Value::Block(Vec::new()),
        _ => Value::String(String::new()),
    }
}

fn find<'a>(items: &'a [FieldDescriptor], name: &str) -> Result<&'a FieldDescriptor, StructureError> {
    let upper = name.to_ascii_uppercase();
    items
        .iter()
        .find(|i| i.name == upper)
        .ok_or_else(|| StructureError::UnknownItem(name.to_string()))
}

/// Named items over an owned byte buffer.
#[derive(Debug, Clone)]
pub struct Structure {
    name: String,
    default_endianness: Endianness,
    items: Vec<FieldDescriptor>,
    defined_length_bits: i64,
    pos_bit_size: i64,
    neg_bit_size: i64,
    /// No open-ended (rest-of-buffer) item has been defined.
    fixed_size: bool,
    short_buffer_allowed: bool,
    buffer: Vec<u8>,
}

impl Structure {
    pub fn new(name: &str, default_endianness: Endianness) -> Self {
        Structure {
            name: name.to_string(),
            default_endianness,
            items: Vec::new(),
            defined_length_bits: 0,
            pos_bit_size: 0,
            neg_bit_size: 0,
            fixed_size: true,
            short_buffer_allowed: false,
            buffer: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_endianness(&self) -> Endianness {
        self.default_endianness
    }

    /// Items in bit-offset order.
    pub fn items(&self) -> &[FieldDescriptor] {
        &self.items
    }

    pub fn is_defined(&self) -> bool {
        !self.items.is_empty()
    }

    /// Bytes required by the defined items.
    pub fn defined_length(&self) -> usize {
        ((self.defined_length_bits + 7) / 8) as usize
    }

    pub fn defined_length_bits(&self) -> i64 {
        self.defined_length_bits
    }

    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size && !self.has_length_driven()
    }

    pub fn short_buffer_allowed(&self) -> bool {
        self.short_buffer_allowed
    }

    pub fn set_short_buffer_allowed(&mut self, allowed: bool) {
        self.short_buffer_allowed = allowed;
    }

    /// Current buffer length in bytes.
    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// Replace the buffer with a copy of `bytes`.
    ///
    /// A short buffer is zero-extended to the defined length and, unless short
    /// buffers are allowed, reported as an error after being installed.
    pub fn set_buffer(&mut self, bytes: &[u8]) -> Result<(), StructureError> {
        self.buffer = bytes.to_vec();
        let defined = self.defined_length();
        if self.buffer.len() < defined {
            self.buffer.resize(defined, 0);
            if !self.short_buffer_allowed {
                return Err(StructureError::Buffer("Buffer length less than defined length".to_string()));
            }
        } else if self.buffer.len() > defined && self.is_fixed_size() && defined != 0 {
            return Err(StructureError::Buffer("Buffer length greater than defined length".to_string()));
        }
        Ok(())
    }

    fn has_length_driven(&self) -> bool {
        self.items.iter().any(|i| i.is_length_driven())
    }

    fn position(&self, name: &str) -> Option<usize> {
        let upper = name.to_ascii_uppercase();
        self.items.iter().position(|i| i.name == upper)
    }

    /// Add `item`, replacing any item of the same name.
    pub fn define(&mut self, item: FieldDescriptor) -> Result<&FieldDescriptor, StructureError> {
        item.validate()?;
        if let Some(pos) = self.position(&item.name) {
            debug!(structure = %self.name, item = %item.name, "replacing existing item");
            self.items.remove(pos);
        }
        if item.is_open_ended() {
            self.fixed_size = false;
        }

        if item.bit_offset >= 0 {
            let end = if item.bit_size > 0 {
                match item.array_size {
                    Some(a) if a >= 0 => item.bit_offset + a,
                    Some(_) => item.bit_offset,
                    None => item.bit_offset + item.bit_size,
                }
            } else {
                item.bit_offset
            };
            self.pos_bit_size = self.pos_bit_size.max(end);
        } else {
            self.neg_bit_size = self.neg_bit_size.max(item.bit_offset.abs());
        }
        self.defined_length_bits = self.pos_bit_size + self.neg_bit_size;

        let name = item.name.clone();
        self.items.push(item);
        self.items.sort_by_key(sort_key);

        let defined = self.defined_length();
        if self.buffer.len() < defined {
            self.buffer.resize(defined, 0);
        }
        find(&self.items, &name)
    }

    /// Build and define an item; `endianness` defaults to the structure's.
    #[allow(clippy::too_many_arguments)]
    pub fn define_item(
        &mut self,
        name: &str,
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        array_size: Option<i64>,
        endianness: Option<Endianness>,
        overflow: OverflowPolicy,
    ) -> Result<&FieldDescriptor, StructureError> {
        let endianness = endianness.unwrap_or(self.default_endianness);
        let item = FieldDescriptor::new(name, bit_offset, bit_size, data_type, endianness, array_size)?
            .with_overflow(overflow);
        self.define(item)
    }

    /// Define `item` right after the current defined length (DERIVED at 0).
    pub fn append(&mut self, mut item: FieldDescriptor) -> Result<&FieldDescriptor, StructureError> {
        if !self.fixed_size {
            return Err(StructureError::AppendAfterVariable);
        }
        item.bit_offset = if item.data_type == DataType::Derived {
            0
        } else {
            self.defined_length_bits
        };
        self.define(item)
    }

    pub fn append_item(
        &mut self,
        name: &str,
        bit_size: i64,
        data_type: DataType,
        array_size: Option<i64>,
        endianness: Option<Endianness>,
        overflow: OverflowPolicy,
    ) -> Result<&FieldDescriptor, StructureError> {
        if !self.fixed_size {
            return Err(StructureError::AppendAfterVariable);
        }
        let bit_offset = if data_type == DataType::Derived {
            0
        } else {
            self.defined_length_bits
        };
        self.define_item(name, bit_offset, bit_size, data_type, array_size, endianness, overflow)
    }

    /// Look up an item by name, ignoring case.
    pub fn get_item(&self, name: &str) -> Result<&FieldDescriptor, StructureError> {
        find(&self.items, name)
    }

    /// Remove an item. The defined length is left as is.
    pub fn delete_item(&mut self, name: &str) -> Result<FieldDescriptor, StructureError> {
        let pos = self
            .position(name)
            .ok_or_else(|| StructureError::UnknownItem(name.to_string()))?;
        Ok(self.items.remove(pos))
    }

    /// Rename an item; an existing item with the new name is replaced.
    pub fn rename_item(&mut self, name: &str, new_name: &str) -> Result<&FieldDescriptor, StructureError> {
        let pos = self
            .position(name)
            .ok_or_else(|| StructureError::UnknownItem(name.to_string()))?;
        let new_name = new_name.trim().to_ascii_uppercase();
        if new_name.is_empty() {
            return Err(ItemError("name must contain at least one character".to_string()).into());
        }
        self.items[pos].name = new_name.clone();
        if let Some(other) = self
            .items
            .iter()
            .enumerate()
            .position(|(i, item)| i != pos && item.name == new_name)
        {
            self.items.remove(other);
        }
        find(&self.items, &new_name)
    }

    /// Items with offsets and sizes resolved against the current buffer.
    fn layout(&self) -> Result<Cow<'_, [FieldDescriptor]>, StructureError> {
        if !self.has_length_driven() {
            return Ok(Cow::Borrowed(&self.items));
        }
        let mut shift = 0i64;
        let mut resolved: Vec<FieldDescriptor> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let mut r = item.clone();
            if r.data_type != DataType::Derived && r.bit_offset >= 0 {
                r.bit_offset += shift;
            }
            if let Some(var) = &item.variable_bit_size {
                let length = self.length_value(&resolved, var, &item.name)?;
                let bits = if item.array_size.is_none() && item.data_type.is_integer() {
                    quic_value_bits(length)
                } else {
                    length * var.length_bits_per_count + var.length_value_bit_offset
                };
                if bits < 0 {
                    return Err(StructureError::VariableSize(format!(
                        "{}: length {} from {} gives negative bit size {}",
                        item.name, length, var.length_item_name, bits
                    )));
                }
                shift += bits - item.declared_bits();
                match r.array_size {
                    Some(_) => r.array_size = Some(bits),
                    None => r.bit_size = bits,
                }
            }
            resolved.push(r);
        }
        Ok(Cow::Owned(resolved))
    }

    fn length_value(
        &self,
        resolved: &[FieldDescriptor],
        var: &VariableBitSize,
        name: &str,
    ) -> Result<i64, StructureError> {
        let length_item = resolved
            .iter()
            .find(|i| i.name == var.length_item_name)
            .ok_or_else(|| {
                StructureError::VariableSize(format!(
                    "{}: length item {} must be defined before the item it sizes",
                    name, var.length_item_name
                ))
            })?;
        BinaryAccessor::read_item(length_item, &self.buffer)?
            .as_ref()
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                StructureError::VariableSize(format!(
                    "{}: length item {} does not hold an integer",
                    name, var.length_item_name
                ))
            })
    }

    fn read_resolved(&self, item: &FieldDescriptor) -> Result<Option<Value>, StructureError> {
        if item.is_length_driven() && item.declared_bits() == 0 {
            return Ok(Some(empty_value(item)));
        }
        Ok(BinaryAccessor::read_item(item, &self.buffer)?)
    }

    /// Read an item by name. DERIVED items read as `None`.
    pub fn read(&self, name: &str) -> Result<Option<Value>, StructureError> {
        let layout = self.layout()?;
        let item = find(&layout, name)?;
        self.read_resolved(item)
    }

    /// Read `item`; items belonging to this structure use the resolved layout.
    pub fn read_item(&self, item: &FieldDescriptor) -> Result<Option<Value>, StructureError> {
        if self.position(&item.name).is_some() {
            return self.read(&item.name);
        }
        Ok(BinaryAccessor::read_item(item, &self.buffer)?)
    }

    /// Every item in order as `(name, value)`.
    pub fn read_all(&self) -> Result<Vec<(String, Option<Value>)>, StructureError> {
        let layout = self.layout()?;
        layout
            .iter()
            .map(|item| Ok((item.name.clone(), self.read_resolved(item)?)))
            .collect()
    }

    /// Write an item by name and return the value encoded.
    pub fn write(&mut self, name: &str, value: impl Into<Value>) -> Result<Option<Value>, StructureError> {
        let value = value.into();
        let (item, length_item) = {
            let layout = self.layout()?;
            let item = find(&layout, name)?.clone();
            let length_item = match &item.variable_bit_size {
                Some(var) => Some(find(&layout, &var.length_item_name)?.clone()),
                None => None,
            };
            (item, length_item)
        };
        match length_item {
            Some(length_item) => self.write_length_driven(&item, &length_item, &value),
            None => Ok(BinaryAccessor::write_item(&item, &value, &mut self.buffer)?),
        }
    }

    /// Write `item`; items belonging to this structure use the resolved layout.
    pub fn write_item(&mut self, item: &FieldDescriptor, value: impl Into<Value>) -> Result<Option<Value>, StructureError> {
        if self.position(&item.name).is_some() {
            return self.write(&item.name, value);
        }
        Ok(BinaryAccessor::write_item(item, &value.into(), &mut self.buffer)?)
    }

    fn write_length_driven(
        &mut self,
        item: &FieldDescriptor,
        length_item: &FieldDescriptor,
        value: &Value,
    ) -> Result<Option<Value>, StructureError> {
        let mut scratch = self.buffer.clone();
        let written = if item.array_size.is_none() && item.data_type.is_integer() {
            Self::write_quic(item, length_item, value, &mut scratch)?
        } else {
            Self::write_sized(item, length_item, value, &mut scratch)?
        };
        self.buffer = scratch;
        Ok(written)
    }

    /// QUIC-style integer: a size code in the length item, then 6/14/30/62 value bits.
    fn write_quic(
        item: &FieldDescriptor,
        length_item: &FieldDescriptor,
        value: &Value,
        buffer: &mut Vec<u8>,
    ) -> Result<Option<Value>, StructureError> {
        let current = BinaryAccessor::read_item(length_item, buffer)?
            .as_ref()
            .and_then(Value::as_i64)
            .filter(|code| (0..=3).contains(code))
            .ok_or_else(|| {
                StructureError::VariableSize(format!(
                    "Value {} has unknown QUIC bit size encoding",
                    length_item.name
                ))
            })?;
        let code = quic_code(value.to_integer()?, item.data_type);
        let new_bits = quic_value_bits(code);
        let adjust = (new_bits - quic_value_bits(current)) / 8;

        let at = (item.bit_offset / 8 + 1) as usize;
        if adjust > 0 {
            if at > buffer.len() {
                return Err(Self::bounds(buffer, item).into());
            }
            buffer.splice(at..at, std::iter::repeat(0u8).take(adjust as usize));
        } else if adjust < 0 {
            let end = at + (-adjust) as usize;
            if end > buffer.len() {
                return Err(Self::bounds(buffer, item).into());
            }
            buffer.drain(at..end);
        }

        BinaryAccessor::write_item(length_item, &Value::Int(code), buffer)?;
        let mut sized = item.clone();
        sized.bit_size = new_bits;
        Ok(BinaryAccessor::write_item(&sized, value, buffer)?)
    }

    /// STRING, BLOCK or array: length item = (bits - offset) / bits_per_count.
    fn write_sized(
        item: &FieldDescriptor,
        length_item: &FieldDescriptor,
        value: &Value,
        buffer: &mut Vec<u8>,
    ) -> Result<Option<Value>, StructureError> {
        let var = match &item.variable_bit_size {
            Some(var) => var,
            None => return Ok(BinaryAccessor::write_item(item, value, buffer)?),
        };
        if item.data_type == DataType::Float && item.array_size.is_none() {
            return Err(StructureError::VariableSize(
                "Variable bit size not currently supported for FLOAT data type".to_string(),
            ));
        }
        let new_bits = match item.array_size {
            Some(_) => {
                let values = value.as_array().ok_or_else(|| {
                    AccessorError::InvalidValue(format!("values must be an Array but is {}", value.type_name()))
                })?;
                values.len() as i64 * item.bit_size
            }
            None => value.to_bytes()?.len() as i64 * 8,
        };
        let old_bits = item.declared_bits();
        if item.bit_offset % 8 != 0 || old_bits % 8 != 0 || new_bits % 8 != 0 {
            return Err(StructureError::VariableSize(format!(
                "{}: variable sized items must start and end on byte boundaries",
                item.name
            )));
        }
        let counted = new_bits - var.length_value_bit_offset;
        if counted < 0 || counted % var.length_bits_per_count != 0 {
            return Err(StructureError::VariableSize(format!(
                "{}: {} bits cannot be expressed in {} with {} bits per count and bit offset {}",
                item.name, new_bits, length_item.name, var.length_bits_per_count, var.length_value_bit_offset
            )));
        }
        let length = counted / var.length_bits_per_count;

        let start = (item.bit_offset / 8) as usize;
        let end = start + (old_bits / 8) as usize;
        if end > buffer.len() {
            return Err(Self::bounds(buffer, item).into());
        }
        buffer.splice(start..end, std::iter::repeat(0u8).take((new_bits / 8) as usize));
        BinaryAccessor::write_item(length_item, &Value::Int(length), buffer)?;

        if new_bits == 0 {
            return Ok(Some(value.clone()));
        }
        let mut sized = item.clone();
        match sized.array_size {
            Some(_) => sized.array_size = Some(new_bits),
            None => sized.bit_size = new_bits,
        }
        Ok(BinaryAccessor::write_item(&sized, value, buffer)?)
    }

    fn bounds(buffer: &[u8], item: &FieldDescriptor) -> AccessorError {
        AccessorError::BufferBounds(format!(
            "{} byte buffer insufficient to write {} at bit_offset {} with bit_size {}",
            buffer.len(),
            item.data_type,
            item.bit_offset,
            item.bit_size
        ))
    }

    /// One `NAME: value` line per item; BLOCK values as an indented hex dump.
    pub fn formatted(&self, indent: usize, ignored: &[&str]) -> Result<String, StructureError> {
        let mut out = String::new();
        for (name, value) in self.read_all()? {
            if ignored.iter().any(|i| i.eq_ignore_ascii_case(&name)) {
                continue;
            }
            out.push_str(&dump::item_line(&name, value.as_ref(), indent));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quic_codes() {
        assert_eq!(quic_code(63, DataType::UInt), 0);
        assert_eq!(quic_code(64, DataType::UInt), 1);
        assert_eq!(quic_code(16_384, DataType::UInt), 2);
        assert_eq!(quic_code(1 << 30, DataType::UInt), 3);
        assert_eq!(quic_code(-32, DataType::Int), 0);
        assert_eq!(quic_code(-33, DataType::Int), 1);
        assert_eq!(quic_code(8_192, DataType::Int), 2);
    }

    #[test]
    fn negative_offsets_sort_last() {
        let mut s = Structure::new("S", Endianness::Big);
        s.define_item("TAIL", -16, 16, DataType::UInt, None, None, OverflowPolicy::Error)
            .expect("tail");
        s.define_item("HEAD", 0, 8, DataType::UInt, None, None, OverflowPolicy::Error)
            .expect("head");
        s.define_item("END", -8, 8, DataType::UInt, None, None, OverflowPolicy::Error)
            .expect("end");
        let names: Vec<_> = s.items().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["HEAD", "TAIL", "END"]);
        assert_eq!(s.defined_length(), 3);
    }
}
