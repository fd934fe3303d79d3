//! Compact self-describing binary encoding.
//!
//! Every value starts with a one-byte tag. Small values fold their payload
//! into the tag itself (7-bit non-negative integers, 5-bit negative integers,
//! short strings, arrays and maps); larger values use the narrowest fixed
//! width that fits. All multi-byte lengths and numbers are big-endian.
//!
//! | tag            | meaning                         |
//! |----------------|---------------------------------|
//! | `0x00..=0x7f`  | non-negative int, inline        |
//! | `0x80..=0x8f`  | map, up to 15 entries           |
//! | `0x90..=0x9f`  | array, up to 15 elements        |
//! | `0xa0..=0xbf`  | string, up to 31 bytes          |
//! | `0xc0`         | nil                             |
//! | `0xc2`/`0xc3`  | false / true                    |
//! | `0xc4..=0xc6`  | binary, 8/16/32-bit length      |
//! | `0xca`/`0xcb`  | float32 (decode only) / float64 |
//! | `0xcc..=0xcf`  | uint 8/16/32/64                 |
//! | `0xd0..=0xd3`  | int 8/16/32/64                  |
//! | `0xd9..=0xdb`  | string, 8/16/32-bit length      |
//! | `0xdc`/`0xdd`  | array, 16/32-bit length         |
//! | `0xde`/`0xdf`  | map, 16/32-bit length           |
//! | `0xe0..=0xff`  | negative int -32..=-1, inline   |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Nesting limit applied while decoding untrusted input.
pub const MAX_DEPTH: usize = 128;

/// A decoded wire value. Maps keep their key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {offset} (needed {needed} more bytes)")]
    UnexpectedEof { offset: usize, needed: usize },
    #[error("unknown type tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("invalid utf-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("map key at offset {offset} is not a string")]
    NonStringKey { offset: usize },
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bin(_) => "binary",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Looks up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(n) => Some(*n),
            Value::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Numeric coercion: integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::UInt(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Required map field.
    pub fn field(&self, name: &'static str) -> Result<&Value, DecodeError> {
        match self {
            Value::Map(_) => self.get(name).ok_or(DecodeError::MissingField(name)),
            other => Err(DecodeError::UnexpectedType {
                expected: "map",
                found: other.kind(),
            }),
        }
    }

    fn mismatch(&self, expected: &'static str) -> DecodeError {
        DecodeError::UnexpectedType {
            expected,
            found: self.kind(),
        }
    }

    pub fn expect_f64(&self) -> Result<f64, DecodeError> {
        self.as_f64().ok_or_else(|| self.mismatch("number"))
    }

    pub fn expect_i64(&self) -> Result<i64, DecodeError> {
        self.as_i64().ok_or_else(|| self.mismatch("integer"))
    }

    pub fn expect_u32(&self) -> Result<u32, DecodeError> {
        self.as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| self.mismatch("u32"))
    }

    pub fn expect_bool(&self) -> Result<bool, DecodeError> {
        self.as_bool().ok_or_else(|| self.mismatch("bool"))
    }

    pub fn expect_str(&self) -> Result<&str, DecodeError> {
        self.as_str().ok_or_else(|| self.mismatch("string"))
    }

    pub fn expect_array(&self) -> Result<&[Value], DecodeError> {
        self.as_array().ok_or_else(|| self.mismatch("array"))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::UInt(n as u64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
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

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Encodes a value into a fresh buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    encode_into(value, &mut buf);
    buf
}

/// Appends the encoding of `value` to `buf`.
///
/// Lengths are limited to `u32::MAX`; nothing in the protocol comes close.
pub fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Nil => buf.push(0xc0),
        Value::Bool(false) => buf.push(0xc2),
        Value::Bool(true) => buf.push(0xc3),
        Value::UInt(n) => encode_uint(*n, buf),
        Value::Int(n) => encode_int(*n, buf),
        Value::Float(f) => {
            buf.push(0xcb);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        Value::Str(s) => {
            let len = s.len();
            if len < 32 {
                buf.push(0xa0 | len as u8);
            } else {
                write_len(len, [0xd9, 0xda, 0xdb], buf);
            }
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bin(bytes) => {
            write_len(bytes.len(), [0xc4, 0xc5, 0xc6], buf);
            buf.extend_from_slice(bytes);
        }
        Value::Array(items) => {
            let len = items.len();
            if len < 16 {
                buf.push(0x90 | len as u8);
            } else {
                write_container_len(len, [0xdc, 0xdd], buf);
            }
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Map(entries) => {
            let len = entries.len();
            if len < 16 {
                buf.push(0x80 | len as u8);
            } else {
                write_container_len(len, [0xde, 0xdf], buf);
            }
            for (key, item) in entries {
                encode_into(&Value::Str(key.clone()), buf);
                encode_into(item, buf);
            }
        }
    }
}

fn encode_uint(n: u64, buf: &mut Vec<u8>) {
    if n <= 0x7f {
        buf.push(n as u8);
    } else if n <= u8::MAX as u64 {
        buf.push(0xcc);
        buf.push(n as u8);
    } else if n <= u16::MAX as u64 {
        buf.push(0xcd);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= u32::MAX as u64 {
        buf.push(0xce);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(0xcf);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_int(n: i64, buf: &mut Vec<u8>) {
    if n >= 0 {
        encode_uint(n as u64, buf);
    } else if n >= -32 {
        buf.push(n as i8 as u8);
    } else if n >= i8::MIN as i64 {
        buf.push(0xd0);
        buf.push(n as i8 as u8);
    } else if n >= i16::MIN as i64 {
        buf.push(0xd1);
        buf.extend_from_slice(&(n as i16).to_be_bytes());
    } else if n >= i32::MIN as i64 {
        buf.push(0xd2);
        buf.extend_from_slice(&(n as i32).to_be_bytes());
    } else {
        buf.push(0xd3);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn write_len(len: usize, tags: [u8; 3], buf: &mut Vec<u8>) {
    if len <= u8::MAX as usize {
        buf.push(tags[0]);
        buf.push(len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(tags[1]);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        debug_assert!(len <= u32::MAX as usize);
        buf.push(tags[2]);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn write_container_len(len: usize, tags: [u8; 2], buf: &mut Vec<u8>) {
    if len <= u16::MAX as usize {
        buf.push(tags[0]);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        debug_assert!(len <= u32::MAX as usize);
        buf.push(tags[1]);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Decodes exactly one value; trailing bytes are an error.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let value = decoder.read_value()?;
    let remaining = decoder.remaining();
    if remaining > 0 {
        return Err(DecodeError::TrailingBytes(remaining));
    }
    Ok(value)
}

/// Cursor over an encoded buffer.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            depth: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    fn read_str(&mut self, len: usize) -> Result<Value, DecodeError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(|s| Value::Str(s.to_string()))
            .map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    fn read_bin(&mut self, len: usize) -> Result<Value, DecodeError> {
        Ok(Value::Bin(self.take(len)?.to_vec()))
    }

    fn read_items(&mut self, len: usize) -> Result<Value, DecodeError> {
        // Every element takes at least one byte, so cap the reservation.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        Ok(Value::Array(items))
    }

    fn read_entries(&mut self, len: usize) -> Result<Value, DecodeError> {
        let mut entries = Vec::with_capacity(len.min(self.remaining() / 2));
        for _ in 0..len {
            let offset = self.pos;
            let key = match self.read_value()? {
                Value::Str(key) => key,
                _ => return Err(DecodeError::NonStringKey { offset }),
            };
            entries.push((key, self.read_value()?));
        }
        Ok(Value::Map(entries))
    }

    pub fn read_value(&mut self) -> Result<Value, DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(DecodeError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = self.read_tagged();
        self.depth -= 1;
        result
    }

    fn read_tagged(&mut self) -> Result<Value, DecodeError> {
        let offset = self.pos;
        let tag = self.read_u8()?;
        match tag {
            0x00..=0x7f => Ok(Value::UInt(tag as u64)),
            0x80..=0x8f => self.read_entries((tag & 0x0f) as usize),
            0x90..=0x9f => self.read_items((tag & 0x0f) as usize),
            0xa0..=0xbf => self.read_str((tag & 0x1f) as usize),
            0xc0 => Ok(Value::Nil),
            0xc2 => Ok(Value::Bool(false)),
            0xc3 => Ok(Value::Bool(true)),
            0xc4 => {
                let len = self.read_u8()? as usize;
                self.read_bin(len)
            }
            0xc5 => {
                let len = self.read_u16()? as usize;
                self.read_bin(len)
            }
            0xc6 => {
                let len = self.read_u32()? as usize;
                self.read_bin(len)
            }
            0xca => Ok(Value::Float(f32::from_be_bytes(self.read_array()?) as f64)),
            0xcb => Ok(Value::Float(f64::from_be_bytes(self.read_array()?))),
            0xcc => Ok(Value::UInt(self.read_u8()? as u64)),
            0xcd => Ok(Value::UInt(self.read_u16()? as u64)),
            0xce => Ok(Value::UInt(self.read_u32()? as u64)),
            0xcf => Ok(Value::UInt(self.read_u64()?)),
            0xd0 => Ok(Value::Int(self.read_u8()? as i8 as i64)),
            0xd1 => Ok(Value::Int(self.read_u16()? as i16 as i64)),
            0xd2 => Ok(Value::Int(self.read_u32()? as i32 as i64)),
            0xd3 => Ok(Value::Int(self.read_u64()? as i64)),
            0xd9 => {
                let len = self.read_u8()? as usize;
                self.read_str(len)
            }
            0xda => {
                let len = self.read_u16()? as usize;
                self.read_str(len)
            }
            0xdb => {
                let len = self.read_u32()? as usize;
                self.read_str(len)
            }
            0xdc => {
                let len = self.read_u16()? as usize;
                self.read_items(len)
            }
            0xdd => {
                let len = self.read_u32()? as usize;
                self.read_items(len)
            }
            0xde => {
                let len = self.read_u16()? as usize;
                self.read_entries(len)
            }
            0xdf => {
                let len = self.read_u32()? as usize;
                self.read_entries(len)
            }
            0xe0..=0xff => Ok(Value::Int(tag as i8 as i64)),
            _ => Err(DecodeError::UnknownTag { tag, offset }),
        }
    }
}
