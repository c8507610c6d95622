//! Self-describing binary encoding for [`Value`]s.
//!
//! Each encoding is `[type tag:1][payload]`, big-endian:
//!
//! | tag | type               | payload                                            |
//! |-----|--------------------|----------------------------------------------------|
//! | 0   | null               | none                                               |
//! | 1   | integer            | i32                                                |
//! | 2   | float              | f64 bit pattern                                    |
//! | 3   | boolean            | one byte, 0 or 1                                   |
//! | 4   | string             | u32 byte length, UTF-8 bytes                       |
//! | 5   | array              | u32 count, each element encoded                    |
//! | 6   | hash               | u32 pair count, each key then value encoded        |
//! | 7   | compiled function  | u32 params, u32 locals, u32 code length, code      |
//!
//! Closures and builtins only exist while a program runs and have no encoding.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::code::Instructions;
use crate::value::{CompiledFunction, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unknown value type: {0:#04x}")]
    UnknownValueType(u8),
    #[error("can't decompile {expected}: {reason}")]
    CantDecompileValue { expected: TypeTag, reason: &'static str },
    #[error("value is not compilable: {0}")]
    ValueIsNotCompilable(&'static str),
    #[error("{what} of {len} does not fit in 32 bits")]
    LengthOverflow { what: &'static str, len: usize },
}

type CodecResult<T> = Result<T, CodecError>;

/// Deepest array/hash nesting a decoder accepts.
pub const MAX_NESTING: usize = 512;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Null = 0,
    Integer = 1,
    Float = 2,
    Boolean = 3,
    String = 4,
    Array = 5,
    Hash = 6,
    Function = 7,
}

impl TypeTag {
    pub const ALL: [TypeTag; 8] = [
        TypeTag::Null,
        TypeTag::Integer,
        TypeTag::Float,
        TypeTag::Boolean,
        TypeTag::String,
        TypeTag::Array,
        TypeTag::Hash,
        TypeTag::Function,
    ];

    /// Tag for `value`, or `None` for the runtime-only variants.
    pub fn of(value: &Value) -> Option<TypeTag> {
        Some(match value {
            Value::Null => TypeTag::Null,
            Value::Integer(_) => TypeTag::Integer,
            Value::Float(_) => TypeTag::Float,
            Value::Boolean(_) => TypeTag::Boolean,
            Value::String(_) => TypeTag::String,
            Value::Array(_) => TypeTag::Array,
            Value::Hash(_) => TypeTag::Hash,
            Value::CompiledFunction(_) => TypeTag::Function,
            Value::Closure(_) | Value::Builtin(_) => return None,
        })
    }

    /// Decode one value that must carry this tag.
    pub fn decompile(self, bytes: &[u8]) -> CodecResult<(Value, usize)> {
        self.decompile_at(bytes, 0)
    }

    fn decompile_at(self, bytes: &[u8], depth: usize) -> CodecResult<(Value, usize)> {
        let mut reader = Reader::new(bytes, self, depth);
        let tag = reader.u8()?;
        if tag != self as u8 {
            return Err(CodecError::UnknownValueType(tag));
        }
        let value = reader.payload(self)?;
        Ok((value, reader.pos))
    }
}

impl TryFrom<u8> for TypeTag {
    type Error = CodecError;

    fn try_from(byte: u8) -> CodecResult<Self> {
        TypeTag::ALL.get(byte as usize).copied().ok_or(CodecError::UnknownValueType(byte))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Null => "Null",
            TypeTag::Integer => "Integer",
            TypeTag::Float => "Float",
            TypeTag::Boolean => "Boolean",
            TypeTag::String => "String",
            TypeTag::Array => "Array",
            TypeTag::Hash => "Hash",
            TypeTag::Function => "CompiledFunction",
        };
        f.write_str(name)
    }
}

pub fn compile(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    compile_into(value, &mut out)?;
    Ok(out)
}

/// Append the encoding of `value` to `out`.
pub fn compile_into(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    let Some(tag) = TypeTag::of(value) else {
        return Err(CodecError::ValueIsNotCompilable(value.type_name()));
    };
    out.push(tag as u8);
    match value {
        Value::Null => {}
        Value::Integer(n) => out.extend_from_slice(&n.to_be_bytes()),
        Value::Float(n) => out.extend_from_slice(&n.to_bits().to_be_bytes()),
        Value::Boolean(b) => out.push(*b as u8),
        Value::String(s) => {
            put_len(out, "string length", s.len())?;
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            put_len(out, "array length", items.len())?;
            for item in items {
                compile_into(item, out)?;
            }
        }
        Value::Hash(pairs) => {
            put_len(out, "hash size", pairs.len())?;
            for (key, value) in pairs {
                compile_into(&Value::from(key.clone()), out)?;
                compile_into(value, out)?;
            }
        }
        Value::CompiledFunction(function) => {
            put_len(out, "parameter count", function.parameters)?;
            put_len(out, "local count", function.locals)?;
            put_len(out, "instruction length", function.instructions.len())?;
            out.extend_from_slice(function.instructions.as_bytes());
        }
        Value::Closure(_) | Value::Builtin(_) => {
            return Err(CodecError::ValueIsNotCompilable(value.type_name()));
        }
    }
    Ok(())
}

/// Decode one value of any type. Returns the value and the number of bytes
/// it occupied.
pub fn decompile(bytes: &[u8]) -> CodecResult<(Value, usize)> {
    decompile_at(bytes, 0)
}

fn decompile_at(bytes: &[u8], depth: usize) -> CodecResult<(Value, usize)> {
    let Some(&first) = bytes.first() else {
        return Err(CodecError::CantDecompileValue { expected: TypeTag::Null, reason: "empty input" });
    };
    TypeTag::try_from(first)?.decompile_at(bytes, depth)
}

/// Decode a back-to-back sequence of encodings, such as a constant pool.
pub fn decompile_all(mut bytes: &[u8]) -> CodecResult<Vec<Value>> {
    let mut values = Vec::new();
    while !bytes.is_empty() {
        let (value, read) = decompile(bytes)?;
        values.push(value);
        bytes = &bytes[read..];
    }
    Ok(values)
}

impl Value {
    /// Binary encoding of this value; see [`crate::codec`].
    pub fn compile(&self) -> CodecResult<Vec<u8>> {
        compile(self)
    }

    pub fn decompile(bytes: &[u8]) -> CodecResult<(Value, usize)> {
        decompile(bytes)
    }
}

fn put_len(out: &mut Vec<u8>, what: &'static str, len: usize) -> CodecResult<()> {
    let len = u32::try_from(len).map_err(|_| CodecError::LengthOverflow { what, len })?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Type being decoded, for error reports.
    expected: TypeTag,
    /// Containers enclosing this value.
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], expected: TypeTag, depth: usize) -> Self {
        Reader { bytes, pos: 0, expected, depth }
    }

    fn error(&self, reason: &'static str) -> CodecError {
        CodecError::CantDecompileValue { expected: self.expected, reason }
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(self.error("unexpected end of input"));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn len(&mut self) -> CodecResult<usize> {
        Ok(u32::from_be_bytes(self.array()?) as usize)
    }

    /// A nested value starting at the current position.
    fn nested(&mut self) -> CodecResult<Value> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        let (value, read) = decompile_at(&self.bytes[self.pos..], self.depth + 1)?;
        self.pos += read;
        Ok(value)
    }

    fn payload(&mut self, tag: TypeTag) -> CodecResult<Value> {
        Ok(match tag {
            TypeTag::Null => Value::Null,
            TypeTag::Integer => Value::Integer(i32::from_be_bytes(self.array()?)),
            TypeTag::Float => Value::Float(f64::from_bits(u64::from_be_bytes(self.array()?))),
            TypeTag::Boolean => match self.u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                _ => return Err(self.error("boolean byte is not 0 or 1")),
            },
            TypeTag::String => {
                let len = self.len()?;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| self.error("invalid UTF-8"))?;
                Value::String(s.to_string())
            }
            TypeTag::Array => {
                let count = self.len()?;
                // Every element takes at least one byte.
                let mut items = Vec::with_capacity(count.min(self.bytes.len() - self.pos));
                for _ in 0..count {
                    items.push(self.nested()?);
                }
                Value::Array(items)
            }
            TypeTag::Hash => {
                let count = self.len()?;
                let mut pairs = HashMap::with_capacity(count.min(self.bytes.len() - self.pos));
                for _ in 0..count {
                    let key = self.nested()?;
                    let key = key.hash_key().ok_or_else(|| self.error("hash key is not hashable"))?;
                    let value = self.nested()?;
                    pairs.insert(key, value);
                }
                Value::Hash(pairs)
            }
            TypeTag::Function => {
                let parameters = self.len()?;
                let locals = self.len()?;
                let code_len = self.len()?;
                let code = self.take(code_len)?;
                Value::CompiledFunction(Rc::new(CompiledFunction {
                    instructions: Instructions::from(code.to_vec()),
                    parameters,
                    locals,
                }))
            }
        })
    }
}
