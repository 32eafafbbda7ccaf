//! Parse packet definition files into [`PacketDefinitions`] using PEST.
//!
//! The grammar (`grammar.pest`) only splits lines into a keyword and its
//! parameters; keyword semantics live in [`Loader`].

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use pest::Parser;
use pest_derive::Parser as PestParser;
use tracing::{debug, warn};

use crate::accessor::BinaryAccessor;
use crate::item::{FieldDescriptor, VariableBitSize};
use crate::structure::{Structure, StructureError};
use crate::types::{DataType, Endianness, OverflowPolicy};
use crate::value::{parse_integer, Value};

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct DefinitionParser;

/// Arrays with at least this many elements are flagged; use a BLOCK instead.
pub const LARGE_ARRAY_ELEMENTS: i64 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("{line}:{column}: syntax error: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("line {line}: {message}")]
    Line { line: usize, message: String },
    #[error("line {line}: {source}")]
    Item {
        line: usize,
        #[source]
        source: StructureError,
    },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DefinitionError {
    /// 1-based line of the problem, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            DefinitionError::Syntax { line, .. }
            | DefinitionError::Line { line, .. }
            | DefinitionError::Item { line, .. } => Some(*line),
            DefinitionError::Io { .. } => None,
        }
    }
}

/// One keyword line: the keyword as written and its parameters (quotes removed).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub column: usize,
    pub keyword: String,
    pub params: Vec<String>,
}

/// Split `source` into statements. Blank and comment-only lines are skipped.
pub fn statements(source: &str) -> Result<Vec<Statement>, DefinitionError> {
    let pairs = DefinitionParser::parse(Rule::file, source).map_err(|e| {
        let (line, column) = match e.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        DefinitionError::Syntax {
            line,
            column,
            message: e.variant.message().to_string(),
        }
    })?;
    let mut out = Vec::new();
    let file = match pairs.into_iter().next() {
        Some(file) => file,
        None => return Ok(out),
    };
    for line in file.into_inner() {
        if line.as_rule() != Rule::line {
            continue;
        }
        for statement in line.into_inner() {
            let (line_no, column) = statement.as_span().start_pos().line_col();
            let mut keyword = String::new();
            let mut params = Vec::new();
            for part in statement.into_inner() {
                match part.as_rule() {
                    Rule::keyword => keyword = part.as_str().to_string(),
                    Rule::word => params.push(part.as_str().to_string()),
                    Rule::quoted => {
                        let inner = part.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                        params.push(inner.to_string());
                    }
                    _ => {}
                }
            }
            out.push(Statement {
                line: line_no,
                column,
                keyword,
                params,
            });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Telemetry,
    Command,
}

impl PacketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Telemetry => "TELEMETRY",
            PacketKind::Command => "COMMAND",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    ItemRedefined,
    LargeArray,
}

/// Non-fatal finding while loading.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionWarning {
    pub line: usize,
    pub kind: WarningKind,
    pub message: String,
}

/// One telemetry or command packet.
#[derive(Debug, Clone)]
pub struct PacketDefinition {
    pub target: String,
    pub name: String,
    pub kind: PacketKind,
    pub description: Option<String>,
    pub structure: Structure,
    /// Line on which each item was (last) defined.
    pub item_lines: BTreeMap<String, usize>,
}

fn values_match(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Int(_) | Value::UInt(_) => match (expected.to_integer(), actual.to_integer()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
        Value::Float(a) => actual.as_f64().map(|b| *a == b).unwrap_or(false),
        Value::String(_) | Value::Block(_) => match (expected.as_bytes(), actual.as_bytes()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        Value::Array(_) => expected == actual,
    }
}

impl PacketDefinition {
    /// Whether every ID item of this packet reads back its ID value from `buffer`.
    pub fn identify(&self, buffer: &[u8]) -> bool {
        self.structure
            .items()
            .iter()
            .filter_map(|item| item.id_value.as_ref().map(|id| (item, id)))
            .all(|(item, id)| match BinaryAccessor::read_item(item, buffer) {
                Ok(Some(actual)) => values_match(id, &actual),
                _ => false,
            })
    }

    pub fn id_items(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.structure.items().iter().filter(|i| i.id_value.is_some())
    }

    /// Copy of the structure holding `buffer`.
    pub fn decode(&self, buffer: &[u8]) -> Result<Structure, StructureError> {
        let mut structure = self.structure.clone();
        structure.set_buffer(buffer)?;
        Ok(structure)
    }

    /// Fresh command buffer with every parameter set to its default value.
    pub fn build_command(&self) -> Result<Structure, StructureError> {
        let mut structure = self.structure.clone();
        let zeros = vec![0u8; structure.defined_length()];
        structure.set_buffer(&zeros)?;
        let defaults: Vec<(String, Value)> = self
            .structure
            .items()
            .iter()
            .filter_map(|i| {
                i.default
                    .clone()
                    .or_else(|| i.id_value.clone())
                    .map(|v| (i.name.clone(), v))
            })
            .collect();
        for (name, value) in defaults {
            structure.write(&name, value)?;
        }
        Ok(structure)
    }
}

type PacketKey = (String, String);

/// Every packet loaded from one or more definition sources.
#[derive(Debug, Clone, Default)]
pub struct PacketDefinitions {
    pub telemetry: BTreeMap<PacketKey, PacketDefinition>,
    pub commands: BTreeMap<PacketKey, PacketDefinition>,
    pub warnings: Vec<DefinitionWarning>,
}

impl PacketDefinitions {
    pub fn get_telemetry(&self, target: &str, packet: &str) -> Option<&PacketDefinition> {
        self.telemetry
            .get(&(target.to_ascii_uppercase(), packet.to_ascii_uppercase()))
    }

    pub fn get_command(&self, target: &str, packet: &str) -> Option<&PacketDefinition> {
        self.commands
            .get(&(target.to_ascii_uppercase(), packet.to_ascii_uppercase()))
    }

    /// First telemetry packet of `target` whose ID items match `buffer`.
    ///
    /// Packets without ID items are only considered when nothing else matches.
    pub fn identify_telemetry(&self, target: &str, buffer: &[u8]) -> Option<&PacketDefinition> {
        let target = target.to_ascii_uppercase();
        let candidates = self.telemetry.values().filter(|p| p.target == target);
        let mut fallback = None;
        for packet in candidates {
            if packet.id_items().next().is_none() {
                fallback.get_or_insert(packet);
            } else if packet.identify(buffer) {
                return Some(packet);
            }
        }
        fallback
    }

    pub fn packets(&self) -> impl Iterator<Item = &PacketDefinition> {
        self.telemetry.values().chain(self.commands.values())
    }
}

/// Parse definition text.
pub fn parse(source: &str) -> Result<PacketDefinitions, DefinitionError> {
    let mut loader = Loader::default();
    for statement in statements(source)? {
        loader.statement(&statement)?;
    }
    loader.finish()
}

/// Read and parse a definition file.
pub fn load_file(path: impl AsRef<Path>) -> Result<PacketDefinitions, DefinitionError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&source)
}

struct PendingItem {
    item: FieldDescriptor,
    append: bool,
    line: usize,
}

#[derive(Default)]
struct Loader {
    defs: PacketDefinitions,
    current: Option<PacketDefinition>,
    pending: Option<PendingItem>,
}

fn line_error(line: usize, message: impl Into<String>) -> DefinitionError {
    DefinitionError::Line {
        line,
        message: message.into(),
    }
}

/// Positional parameter access with line-numbered errors.
struct Params<'a> {
    statement: &'a Statement,
    keyword: &'a str,
    next: usize,
}

impl<'a> Params<'a> {
    fn new(statement: &'a Statement, keyword: &'a str) -> Self {
        Params {
            statement,
            keyword,
            next: 0,
        }
    }

    fn required(&mut self, what: &str) -> Result<&'a str, DefinitionError> {
        let value = self.statement.params.get(self.next).ok_or_else(|| {
            line_error(
                self.statement.line,
                format!("{} is missing parameter {}", self.keyword, what),
            )
        })?;
        self.next += 1;
        Ok(value.as_str())
    }

    fn optional(&mut self) -> Option<&'a str> {
        let value = self.statement.params.get(self.next)?;
        self.next += 1;
        Some(value.as_str())
    }

    fn integer(&mut self, what: &str) -> Result<i64, DefinitionError> {
        let text = self.required(what)?;
        parse_integer(text)
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| line_error(self.statement.line, format!("invalid {} '{}'", what, text)))
    }

    fn parse<T: FromStr>(&mut self, what: &str) -> Result<T, DefinitionError>
    where
        T::Err: std::fmt::Display,
    {
        let text = self.required(what)?;
        text.parse::<T>()
            .map_err(|e| line_error(self.statement.line, e.to_string()))
    }

    fn done(&self) -> Result<(), DefinitionError> {
        if self.next < self.statement.params.len() {
            return Err(line_error(
                self.statement.line,
                format!(
                    "{} has too many parameters (unexpected '{}')",
                    self.keyword, self.statement.params[self.next]
                ),
            ));
        }
        Ok(())
    }
}

/// Value literal for an ID, default, minimum or maximum of `data_type`.
fn parse_value(text: &str, data_type: DataType, line: usize) -> Result<Value, DefinitionError> {
    let invalid = || line_error(line, format!("invalid {} value '{}'", data_type, text));
    match data_type {
        DataType::Int => parse_integer(text)
            .and_then(|v| i64::try_from(v).ok())
            .map(Value::Int)
            .ok_or_else(invalid),
        DataType::UInt => parse_integer(text)
            .and_then(|v| u64::try_from(v).ok())
            .map(Value::UInt)
            .ok_or_else(invalid),
        DataType::Float => text
            .trim()
            .parse::<f64>()
            .ok()
            .or_else(|| parse_integer(text).map(|v| v as f64))
            .map(Value::Float)
            .ok_or_else(invalid),
        DataType::Block => match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => parse_hex(hex).map(Value::Block).ok_or_else(invalid),
            None => Ok(Value::Block(text.as_bytes().to_vec())),
        },
        DataType::String | DataType::Derived => Ok(Value::String(text.to_string())),
    }
}

fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = hex.bytes().filter(|b| *b != b'_').collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).ok()?, 16).ok())
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct ItemShape {
    append: bool,
    id: bool,
    array: bool,
    parameter: bool,
}

fn item_shape(keyword: &str) -> Option<ItemShape> {
    let (parameter, rest) = if let Some(rest) = keyword.strip_suffix("PARAMETER") {
        (true, rest)
    } else if let Some(rest) = keyword.strip_suffix("ITEM") {
        (false, rest)
    } else {
        return None;
    };
    let (append, rest) = match rest.strip_prefix("APPEND_") {
        Some(r) => (true, r),
        None => (false, rest),
    };
    let (id, array) = match rest {
        "" => (false, false),
        "ID_" => (true, false),
        "ARRAY_" => (false, true),
        _ => return None,
    };
    Some(ItemShape {
        append,
        id,
        array,
        parameter,
    })
}

impl Loader {
    fn statement(&mut self, statement: &Statement) -> Result<(), DefinitionError> {
        let keyword = statement.keyword.to_ascii_uppercase();
        match keyword.as_str() {
            "TELEMETRY" | "COMMAND" => self.packet(statement, &keyword),
            "OVERFLOW" => {
                let mut params = Params::new(statement, &keyword);
                let overflow: OverflowPolicy = params.parse("OVERFLOW")?;
                params.done()?;
                self.pending_item(statement, &keyword)?.item.overflow = overflow;
                Ok(())
            }
            "OVERLAP" => {
                Params::new(statement, &keyword).done()?;
                self.pending_item(statement, &keyword)?.item.overlap = true;
                Ok(())
            }
            "VARIABLE_BIT_SIZE" => {
                let mut params = Params::new(statement, &keyword);
                let mut variable = VariableBitSize::new(params.required("LENGTH_ITEM_NAME")?);
                if params.statement.params.len() > 1 {
                    variable.length_bits_per_count = params.integer("LENGTH_BITS_PER_COUNT")?;
                }
                if params.statement.params.len() > 2 {
                    variable.length_value_bit_offset = params.integer("LENGTH_VALUE_BIT_OFFSET")?;
                }
                params.done()?;
                if variable.length_bits_per_count <= 0 {
                    return Err(line_error(statement.line, "LENGTH_BITS_PER_COUNT must be positive"));
                }
                let pending = self.pending_item(statement, &keyword)?;
                pending.item.variable_bit_size = Some(variable);
                pending
                    .item
                    .validate()
                    .map_err(|e| DefinitionError::Item {
                        line: statement.line,
                        source: e.into(),
                    })
            }
            "ALLOW_SHORT" => {
                Params::new(statement, &keyword).done()?;
                let current = self
                    .current
                    .as_mut()
                    .ok_or_else(|| line_error(statement.line, "ALLOW_SHORT must follow TELEMETRY or COMMAND"))?;
                current.structure.set_short_buffer_allowed(true);
                Ok(())
            }
            _ => match item_shape(&keyword) {
                Some(shape) => self.item(statement, &keyword, shape),
                None => Err(line_error(
                    statement.line,
                    format!("unknown keyword '{}'", statement.keyword),
                )),
            },
        }
    }

    fn pending_item(&mut self, statement: &Statement, keyword: &str) -> Result<&mut PendingItem, DefinitionError> {
        self.pending
            .as_mut()
            .ok_or_else(|| line_error(statement.line, format!("{} must follow an item definition", keyword)))
    }

    fn packet(&mut self, statement: &Statement, keyword: &str) -> Result<(), DefinitionError> {
        self.finish_packet()?;
        let mut params = Params::new(statement, keyword);
        let target = params.required("TARGET")?.to_ascii_uppercase();
        let name = params.required("PACKET")?.to_ascii_uppercase();
        let endianness: Endianness = params.parse("ENDIANNESS")?;
        let description = params.optional().map(str::to_string);
        params.done()?;
        let kind = if keyword == "TELEMETRY" {
            PacketKind::Telemetry
        } else {
            PacketKind::Command
        };
        self.current = Some(PacketDefinition {
            structure: Structure::new(&format!("{} {}", target, name), endianness),
            target,
            name,
            kind,
            description,
            item_lines: BTreeMap::new(),
        });
        Ok(())
    }

    fn item(&mut self, statement: &Statement, keyword: &str, shape: ItemShape) -> Result<(), DefinitionError> {
        self.commit_pending()?;
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| line_error(statement.line, format!("{} must follow TELEMETRY or COMMAND", keyword)))?;
        match (shape.parameter, current.kind) {
            (true, PacketKind::Telemetry) => {
                return Err(line_error(statement.line, format!("{} is only valid in a COMMAND", keyword)));
            }
            (false, PacketKind::Command) => {
                return Err(line_error(statement.line, format!("{} is only valid in a TELEMETRY packet", keyword)));
            }
            _ => {}
        }
        let default_endianness = current.structure.default_endianness();
        let line = statement.line;

        let mut params = Params::new(statement, keyword);
        let name = params.required("NAME")?.to_string();
        let bit_offset = if shape.append { 0 } else { params.integer("BIT_OFFSET")? };
        let bit_size = params.integer(if shape.array { "ITEM_BIT_SIZE" } else { "BIT_SIZE" })?;
        let data_type: DataType = params.parse("DATA_TYPE")?;
        let array_size = if shape.array {
            Some(params.integer("ARRAY_BIT_SIZE")?)
        } else {
            None
        };

        let mut minimum = None;
        let mut maximum = None;
        let mut default = None;
        let mut id_value = None;
        let numeric = matches!(data_type, DataType::Int | DataType::UInt | DataType::Float);
        if shape.parameter && !shape.array {
            if numeric {
                minimum = Some(parse_value(params.required("MINIMUM")?, data_type, line)?);
                maximum = Some(parse_value(params.required("MAXIMUM")?, data_type, line)?);
            }
            let what = if shape.id { "ID_VALUE" } else { "DEFAULT" };
            let value = parse_value(params.required(what)?, data_type, line)?;
            if shape.id {
                id_value = Some(value.clone());
            }
            default = Some(value);
        } else if shape.id {
            id_value = Some(parse_value(params.required("ID_VALUE")?, data_type, line)?);
        }
        let description = params.optional().map(str::to_string);
        let endianness = match params.optional() {
            Some(text) => text
                .parse::<Endianness>()
                .map_err(|e| line_error(line, e.to_string()))?,
            None => default_endianness,
        };
        params.done()?;

        let (bit_offset, bit_size) = if data_type == DataType::Derived {
            (0, 0)
        } else {
            (bit_offset, bit_size)
        };
        let mut item = FieldDescriptor::new(&name, bit_offset, bit_size, data_type, endianness, array_size)
            .map_err(|e| DefinitionError::Item {
                line,
                source: e.into(),
            })?;
        item.description = description;
        item.id_value = id_value;
        item.default = default;
        item.minimum = minimum;
        item.maximum = maximum;

        if let Some(array_size) = array_size {
            let elements = array_size / bit_size.max(1);
            if elements >= LARGE_ARRAY_ELEMENTS {
                let message = format!(
                    "{} has {} elements; consider a BLOCK instead of an array",
                    item.name, elements
                );
                warn!(line, item = %item.name, elements, "large array");
                self.defs.warnings.push(DefinitionWarning {
                    line,
                    kind: WarningKind::LargeArray,
                    message,
                });
            }
        }

        self.pending = Some(PendingItem {
            item,
            append: shape.append,
            line,
        });
        Ok(())
    }

    fn commit_pending(&mut self) -> Result<(), DefinitionError> {
        let pending = match self.pending.take() {
            Some(p) => p,
            None => return Ok(()),
        };
        let current = match self.current.as_mut() {
            Some(c) => c,
            None => return Ok(()),
        };
        let PendingItem { item, append, line } = pending;
        if let Some(previous) = current.item_lines.get(&item.name) {
            let message = format!(
                "{} {} item {} redefined (previously defined on line {})",
                current.target, current.name, item.name, previous
            );
            warn!(line, item = %item.name, previous = *previous, "item redefined");
            self.defs.warnings.push(DefinitionWarning {
                line,
                kind: WarningKind::ItemRedefined,
                message,
            });
        }
        let name = item.name.clone();
        let result = if append {
            current.structure.append(item)
        } else {
            current.structure.define(item)
        };
        result.map_err(|source| DefinitionError::Item { line, source })?;
        current.item_lines.insert(name, line);
        Ok(())
    }

    fn finish_packet(&mut self) -> Result<(), DefinitionError> {
        self.commit_pending()?;
        if let Some(packet) = self.current.take() {
            debug!(
                kind = packet.kind.as_str(),
                packet_target = %packet.target,
                packet = %packet.name,
                items = packet.structure.items().len(),
                defined_length = packet.structure.defined_length(),
                "packet defined"
            );
            let key = (packet.target.clone(), packet.name.clone());
            match packet.kind {
                PacketKind::Telemetry => self.defs.telemetry.insert(key, packet),
                PacketKind::Command => self.defs.commands.insert(key, packet),
            };
        }
        Ok(())
    }

    fn finish(mut self) -> Result<PacketDefinitions, DefinitionError> {
        self.finish_packet()?;
        Ok(self.defs)
    }
}
