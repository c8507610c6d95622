use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::code::Instructions;
use crate::vm::builtins::Builtin;

/// Runtime value shared by the compiler's constant pool, the codec and the VM.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i32),
    Float(f64),
    Boolean(bool),
    String(String),
    Array(Vec<Value>),
    Hash(HashMap<HashKey, Value>),
    CompiledFunction(Rc<CompiledFunction>),
    /// A function plus the values it captured. Only exists at run time.
    Closure(Rc<Closure>),
    Builtin(Builtin),
}

/// The subset of values usable as hash keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKey {
    Integer(i32),
    Boolean(bool),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub parameters: usize,
    pub locals: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Boolean(_) => "Boolean",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::CompiledFunction(_) => "CompiledFunction",
            Value::Closure(_) => "Closure",
            Value::Builtin(_) => "Builtin",
        }
    }

    /// `None` for values that cannot key a hash.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(n) => Some(HashKey::Integer(*n)),
            Value::Boolean(b) => Some(HashKey::Boolean(*b)),
            Value::String(s) => Some(HashKey::String(s.clone())),
            _ => None,
        }
    }

    pub fn function(instructions: Instructions, parameters: usize, locals: usize) -> Value {
        Value::CompiledFunction(Rc::new(CompiledFunction { instructions, parameters, locals }))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn hash<I>(pairs: I) -> Value
    where
        I: IntoIterator<Item = (HashKey, Value)>,
    {
        Value::Hash(pairs.into_iter().collect())
    }
}

impl From<HashKey> for Value {
    fn from(key: HashKey) -> Self {
        match key {
            HashKey::Integer(n) => Value::Integer(n),
            HashKey::Boolean(b) => Value::Boolean(b),
            HashKey::String(s) => Value::String(s),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Integer(n) => write!(f, "{}", n),
            HashKey::Boolean(b) => write!(f, "{}", b),
            HashKey::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.is_finite() && n.fract() == 0.0 {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Hash(pairs) => {
                // Sorted so the rendering is stable.
                let mut keys: Vec<&HashKey> = pairs.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, pairs[key])?;
                }
                write!(f, "}}")
            }
            Value::CompiledFunction(func) => write!(
                f,
                "CompiledFunction[params={}, locals={}, {} bytes]",
                func.parameters,
                func.locals,
                func.instructions.len()
            ),
            Value::Closure(closure) => write!(
                f,
                "Closure[params={}, free={}]",
                closure.function.parameters,
                closure.free.len()
            ),
            Value::Builtin(builtin) => write!(f, "builtin {}", builtin.name()),
        }
    }
}
