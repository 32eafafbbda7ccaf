//! # binary-accessor — bit-exact packet field access
//!
//! Maps a flat byte buffer to and from typed fields described by a bit offset,
//! bit size, data type, endianness and overflow policy.
//!
//! ## Layers
//!
//! - [`BinaryAccessor`]: stateless read/write of INT, UINT, FLOAT, STRING and
//!   BLOCK fields and arrays of them, including big/little-endian bitfields,
//!   offsets relative to the end of the buffer and rest-of-buffer sizes.
//! - [`FieldDescriptor`]: one validated item layout.
//! - [`Structure`]: named items over an owned buffer, with defined length,
//!   length-driven items and formatted dumps.
//! - [`parser`]: packet definition files (`TELEMETRY`/`COMMAND` with items and
//!   parameters) loaded into [`PacketDefinitions`].
//! - [`lint`]: findings for definition files.
//! - [`capture`]: UDP payloads out of captured link-layer frames.
//!
//! ## Example
//!
//! ```
//! use binary_accessor::{BinaryAccessor, DataType, Endianness, OverflowPolicy, Value};
//!
//! let mut buffer = vec![0u8; 4];
//! BinaryAccessor::write(
//!     &Value::UInt(0x1C24),
//!     3,
//!     13,
//!     DataType::UInt,
//!     &mut buffer,
//!     Endianness::Big,
//!     OverflowPolicy::Error,
//! )
//! .unwrap();
//! let v = BinaryAccessor::read(3, 13, DataType::UInt, &buffer, Endianness::Big).unwrap();
//! assert_eq!(v, Value::UInt(0x1C24));
//! ```

pub mod accessor;
pub mod bits;
pub mod capture;
pub mod dump;
pub mod item;
pub mod lint;
pub mod parser;
pub mod structure;
pub mod types;
pub mod value;

pub use accessor::{AccessorError, BinaryAccessor};
pub use item::{FieldDescriptor, ItemError, VariableBitSize};
pub use parser::{load_file, parse, DefinitionError, PacketDefinition, PacketDefinitions, PacketKind};
pub use structure::{Structure, StructureError};
pub use types::{DataType, Endianness, OverflowPolicy};
pub use value::Value;
