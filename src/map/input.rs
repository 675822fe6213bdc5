//! Training-set input model.
//!
//! A training set is an ordered list of rows, each a byte-string key mapped
//! to one or more payload values. Rows are validated as they are added so a
//! malformed set is rejected before the solver ever runs.

use crate::core::error::InvalidRowError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Lookup key: an exact byte sequence, possibly carrying binary prefixes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<u8>);

impl Key {
    /// Assemble a key from text and binary parts.
    pub fn from_parts(parts: &[KeyPart]) -> Self {
        let mut bytes = Vec::new();
        for part in parts {
            match part {
                KeyPart::Byte(b) => bytes.push(*b),
                KeyPart::Bytes(bs) => bytes.extend_from_slice(bs),
                KeyPart::Text(s) => bytes.extend_from_slice(s.as_bytes()),
            }
        }
        Key(bytes)
    }

    /// Raw key bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the zero-length key
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into_bytes())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key(b)
    }
}

impl<const N: usize> From<[u8; N]> for Key {
    fn from(b: [u8; N]) -> Self {
        Key(b.to_vec())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", c_escape(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One piece of a key as written in a map spec file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// A single raw byte
    Byte(u8),
    /// A run of raw bytes
    Bytes(Vec<u8>),
    /// UTF-8 text
    Text(String),
}

/// A payload value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer literal
    Int(i64),
    /// String literal, emitted as a quoted C string
    Str(String),
    /// Byte string, emitted as a quoted C string with escapes
    Bytes {
        /// Raw bytes of the string
        bytes: Vec<u8>,
    },
    /// C expression emitted verbatim (macro names, `sizeof(..)`, ...)
    Raw {
        /// Expression text
        raw: String,
    },
}

/// Payload column kind used for consistency checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// Integers
    Integer,
    /// Strings and byte strings
    String,
    /// Verbatim expressions; compatible with every kind
    Raw,
}

impl ValueKind {
    /// Human readable kind name
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::String => "string",
            ValueKind::Raw => "raw expression",
        }
    }

    fn compatible(self, other: ValueKind) -> bool {
        self == other || self == ValueKind::Raw || other == ValueKind::Raw
    }
}

impl Value {
    /// Shorthand for a verbatim expression
    pub fn raw(expr: impl Into<String>) -> Self {
        Value::Raw { raw: expr.into() }
    }

    /// Kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Integer,
            Value::Str(_) | Value::Bytes { .. } => ValueKind::String,
            Value::Raw { .. } => ValueKind::Raw,
        }
    }

    /// C source rendering of the value
    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Str(s) => format!("\"{}\"", c_escape(s.as_bytes())),
            Value::Bytes { bytes } => format!("\"{}\"", c_escape(bytes)),
            Value::Raw { raw } => raw.trim().to_string(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// A training row: key plus payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    /// Lookup key
    pub key: Key,
    /// Payload values returned for the key
    pub payload: Vec<Value>,
}

impl Row {
    /// Create a row
    pub fn new(key: impl Into<Key>, payload: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }

    /// Payload rendered as C source, one entry per value
    pub fn rendered_payload(&self) -> Vec<String> {
        self.payload.iter().map(Value::render).collect()
    }
}

/// Ordered, validated set of rows with unique keys.
#[derive(Clone, Debug, Default)]
pub struct TrainingSet {
    rows: Vec<Row>,
    seen: HashSet<Key>,
}

impl TrainingSet {
    /// Create an empty training set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a training set from rows, failing on the first invalid one
    pub fn from_rows<I>(rows: I) -> Result<Self, InvalidRowError>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut set = Self::new();
        for row in rows {
            set.push(row)?;
        }
        Ok(set)
    }

    /// Add a row. The first row fixes payload arity and column kinds.
    pub fn push(&mut self, row: Row) -> Result<(), InvalidRowError> {
        if row.payload.is_empty() {
            return Err(InvalidRowError::MissingPayload {
                key: row.key.to_string(),
            });
        }

        if let Some(first) = self.rows.first() {
            if first.payload.len() != row.payload.len() {
                return Err(InvalidRowError::ArityMismatch {
                    key: row.key.to_string(),
                    expected: first.payload.len(),
                    actual: row.payload.len(),
                });
            }
            for (column, (want, got)) in first.payload.iter().zip(&row.payload).enumerate() {
                if !want.kind().compatible(got.kind()) {
                    return Err(InvalidRowError::KindMismatch {
                        key: row.key.to_string(),
                        column,
                        expected: want.kind().name(),
                        actual: got.kind().name(),
                    });
                }
            }
        }

        if !self.seen.insert(row.key.clone()) {
            return Err(InvalidRowError::DuplicateKey {
                key: row.key.to_string(),
            });
        }

        self.rows.push(row);
        Ok(())
    }

    /// Rows in insertion order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows were added
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Payload arity shared by every row (0 when empty)
    pub fn arity(&self) -> usize {
        self.rows.first().map_or(0, |r| r.payload.len())
    }

    /// Shortest key length
    pub fn min_key_len(&self) -> usize {
        self.rows.iter().map(|r| r.key.len()).min().unwrap_or(0)
    }

    /// Longest key length
    pub fn max_key_len(&self) -> usize {
        self.rows.iter().map(|r| r.key.len()).max().unwrap_or(0)
    }

    /// Kind of each payload column, taking the first non-raw value per column
    pub fn column_kinds(&self) -> Vec<ValueKind> {
        (0..self.arity())
            .map(|column| {
                self.rows
                    .iter()
                    .map(|r| r.payload[column].kind())
                    .find(|k| *k != ValueKind::Raw)
                    .unwrap_or(ValueKind::Raw)
            })
            .collect()
    }

    /// Find the row for an exact key
    pub fn get(&self, key: &[u8]) -> Option<&Row> {
        self.rows.iter().find(|r| r.key.as_bytes() == key)
    }

    /// Determine the generated function's return type from the first row.
    ///
    /// A single string payload returns `const char *`, a single integer
    /// returns `int` and wider payloads return a pointer to `struct NAME_result`.
    pub fn output_type(&self, name: &str) -> Result<OutputType, InvalidRowError> {
        let first = self.rows.first().ok_or(InvalidRowError::Empty)?;
        if first.payload.len() > 1 {
            return Ok(OutputType::composite(name));
        }
        match first.payload[0].kind() {
            ValueKind::String => Ok(OutputType::new("const char *")),
            ValueKind::Integer => Ok(OutputType::new("int")),
            kind @ ValueKind::Raw => Err(InvalidRowError::UnknownOutputType { kind: kind.name() }),
        }
    }
}

/// C return type of a generated lookup function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputType {
    ctype: String,
    composite: bool,
}

impl OutputType {
    /// Scalar or pointer return type, e.g. `int` or `const char *`
    pub fn new(ctype: impl Into<String>) -> Self {
        let ctype = ctype.into().trim().to_string();
        Self {
            ctype,
            composite: false,
        }
    }

    /// Pointer to the `struct NAME_result` row type
    pub fn composite(name: &str) -> Self {
        Self {
            ctype: format!("struct {}_result *", name.trim()),
            composite: true,
        }
    }

    /// Declared return type
    pub fn ctype(&self) -> &str {
        &self.ctype
    }

    /// True when rows have more than one payload value
    pub fn is_composite(&self) -> bool {
        self.composite
    }

    /// True when the return type is a pointer
    pub fn is_pointer(&self) -> bool {
        self.ctype.ends_with('*')
    }

    /// True when the function returns the address of a table slot rather
    /// than the slot's value
    pub fn returns_slot_address(&self) -> bool {
        let squashed: String = self
            .ctype
            .split_whitespace()
            .filter(|w| *w != "const")
            .collect();
        self.is_pointer() && squashed != "char*"
    }

    /// `ctype` followed by the separator used before a declarator
    pub fn declarator_prefix(&self) -> String {
        if self.is_pointer() {
            self.ctype.clone()
        } else {
            format!("{} ", self.ctype)
        }
    }

    /// Element type of the backing result table.
    ///
    /// Qualifiers are dropped, and pointers to anything but `char` become the
    /// pointee since the function returns the address of a table slot.
    pub fn element_type(&self) -> String {
        let cleaned = self
            .ctype
            .split_whitespace()
            .filter(|w| *w != "const" && *w != "static")
            .collect::<Vec<_>>()
            .join(" ");
        if self.returns_slot_address() {
            cleaned.trim_end_matches('*').trim().to_string()
        } else {
            cleaned
        }
    }

    /// Default "no match" value for the type.
    ///
    /// Pointers return a cast `NULL`, unsigned integers `0`, signed integers `-1`.
    pub fn default_sentinel(&self) -> String {
        if self.is_pointer() {
            let bare = self
                .ctype
                .split_whitespace()
                .filter(|w| *w != "const")
                .collect::<Vec<_>>()
                .join(" ");
            return format!("({})NULL", bare);
        }
        let words: Vec<&str> = self.ctype.split_whitespace().collect();
        let unsigned = words
            .iter()
            .any(|w| *w == "unsigned" || w.starts_with("uint") || *w == "size_t");
        let integral = words.iter().any(|w| {
            matches!(*w, "int" | "long" | "short" | "char" | "signed" | "ssize_t")
                || w.starts_with("int")
        });
        if unsigned {
            "0".to_string()
        } else if integral {
            "-1".to_string()
        } else {
            "NULL".to_string()
        }
    }
}

/// Escape bytes for a C (or solver keyword) string literal.
///
/// Printable ASCII passes through, `"` and `\` are backslash-escaped and every
/// other byte becomes a two-digit `\xHH` escape. Hex escapes are greedy, so a
/// hex digit directly after one is escaped too.
pub fn c_escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    let mut after_hex = false;
    for &b in bytes {
        let printable = (0x20..0x7f).contains(&b);
        if printable && !(after_hex && b.is_ascii_hexdigit()) {
            if b == b'"' || b == b'\\' {
                out.push('\\');
            }
            out.push(b as char);
            after_hex = false;
        } else {
            out.push_str("\\x");
            out.push_str(&hex::encode([b]));
            after_hex = true;
        }
    }
    out
}
