//! Language semantics plugged into the VM.
//!
//! The VM only knows how to move values around; what `+` means, which values
//! are truthy and what indexing returns is decided by a [`VmOperations`]
//! implementation. [`MonkeyOperations`] is the one this crate ships.

use super::VmError;
use super::builtins::Builtin;
use crate::code::OpCode;
use crate::value::{HashKey, Value};

/// Language signature written into program files produced for Monkey ("MKEY").
pub const MONKEY_SIGNATURE: u32 = 0x4D4B_4559;

pub trait VmOperations {
    /// `op` is one of the binary opcodes (`Add` .. `GreaterThanOrEqual`).
    fn binary_operation(&self, lhs: Value, rhs: Value, op: OpCode) -> Result<Value, VmError>;

    /// `op` is `Minus` or `Bang`.
    fn unary_operation(&self, operand: Value, op: OpCode) -> Result<Value, VmError>;

    fn lang_bool(&self, value: bool) -> Value {
        Value::Boolean(value)
    }

    fn null(&self) -> Value {
        Value::Null
    }

    fn is_truthy(&self, value: &Value) -> bool;

    fn index(&self, target: Value, index: Value) -> Result<Value, VmError>;

    fn hash_key(&self, value: &Value) -> Result<HashKey, VmError> {
        value.hash_key().ok_or_else(|| VmError::InvalidHashKey(value.to_string()))
    }

    fn builtin(&self, index: usize) -> Option<Builtin> {
        Builtin::from_index(index)
    }

    fn call_builtin(&self, builtin: Builtin, args: Vec<Value>) -> Result<Value, VmError> {
        builtin.call(args)
    }

    /// Identifies the front-end in program files.
    fn language_signature(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonkeyOperations;

fn symbol(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "+",
        OpCode::Sub | OpCode::Minus => "-",
        OpCode::Mul => "*",
        OpCode::Div => "/",
        OpCode::Equal => "==",
        OpCode::NotEqual => "!=",
        OpCode::GreaterThan => ">",
        OpCode::GreaterThanOrEqual => ">=",
        OpCode::Bang => "!",
        other => other.name(),
    }
}

fn unsupported(lhs: &Value, rhs: &Value, op: OpCode) -> VmError {
    VmError::UnsupportedOperation(format!("{} {} {}", lhs.type_name(), symbol(op), rhs.type_name()))
}

fn integer_op(a: i32, b: i32, op: OpCode) -> Result<Value, VmError> {
    Ok(match op {
        OpCode::Add => Value::Integer(a.wrapping_add(b)),
        OpCode::Sub => Value::Integer(a.wrapping_sub(b)),
        OpCode::Mul => Value::Integer(a.wrapping_mul(b)),
        OpCode::Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::Integer(a.wrapping_div(b))
        }
        OpCode::Equal => Value::Boolean(a == b),
        OpCode::NotEqual => Value::Boolean(a != b),
        OpCode::GreaterThan => Value::Boolean(a > b),
        OpCode::GreaterThanOrEqual => Value::Boolean(a >= b),
        _ => return Err(unsupported(&Value::Integer(a), &Value::Integer(b), op)),
    })
}

fn float_op(a: f64, b: f64, op: OpCode) -> Result<Value, VmError> {
    Ok(match op {
        OpCode::Add => Value::Float(a + b),
        OpCode::Sub => Value::Float(a - b),
        OpCode::Mul => Value::Float(a * b),
        OpCode::Div => Value::Float(a / b),
        OpCode::Equal => Value::Boolean(a == b),
        OpCode::NotEqual => Value::Boolean(a != b),
        OpCode::GreaterThan => Value::Boolean(a > b),
        OpCode::GreaterThanOrEqual => Value::Boolean(a >= b),
        _ => return Err(unsupported(&Value::Float(a), &Value::Float(b), op)),
    })
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

impl VmOperations for MonkeyOperations {
    fn binary_operation(&self, lhs: Value, rhs: Value, op: OpCode) -> Result<Value, VmError> {
        if let (Value::Integer(a), Value::Integer(b)) = (&lhs, &rhs) {
            return integer_op(*a, *b, op);
        }
        if let (Some(a), Some(b)) = (as_float(&lhs), as_float(&rhs)) {
            return float_op(a, b, op);
        }

        let strings = matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_));
        match op {
            OpCode::Add if strings => Ok(Value::String(format!("{}{}", lhs, rhs))),
            OpCode::Equal => Ok(Value::Boolean(lhs == rhs)),
            OpCode::NotEqual => Ok(Value::Boolean(lhs != rhs)),
            OpCode::GreaterThan | OpCode::GreaterThanOrEqual => match (&lhs, &rhs) {
                (Value::String(a), Value::String(b)) => Ok(Value::Boolean(if op == OpCode::GreaterThan {
                    a > b
                } else {
                    a >= b
                })),
                _ => Err(unsupported(&lhs, &rhs, op)),
            },
            _ => Err(unsupported(&lhs, &rhs, op)),
        }
    }

    fn unary_operation(&self, operand: Value, op: OpCode) -> Result<Value, VmError> {
        match (op, &operand) {
            (OpCode::Bang, _) => Ok(Value::Boolean(!self.is_truthy(&operand))),
            (OpCode::Minus, Value::Integer(n)) => Ok(Value::Integer(n.wrapping_neg())),
            (OpCode::Minus, Value::Float(n)) => Ok(Value::Float(-n)),
            _ => Err(VmError::UnsupportedOperation(format!("{}{}", symbol(op), operand.type_name()))),
        }
    }

    fn is_truthy(&self, value: &Value) -> bool {
        !matches!(value, Value::Null | Value::Boolean(false))
    }

    fn index(&self, target: Value, index: Value) -> Result<Value, VmError> {
        match (target, index) {
            (Value::Array(items), Value::Integer(i)) => Ok(usize::try_from(i)
                .ok()
                .and_then(|i| items.into_iter().nth(i))
                .unwrap_or(Value::Null)),
            (Value::Array(_), other) => Err(VmError::InvalidArrayIndex(other.to_string())),
            (Value::Hash(pairs), key) => {
                let key = self.hash_key(&key)?;
                Ok(pairs.get(&key).cloned().unwrap_or(Value::Null))
            }
            (other, _) => Err(VmError::IndexNotSupported(other.to_string())),
        }
    }

    fn language_signature(&self) -> u32 {
        MONKEY_SIGNATURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(lhs: impl Into<Value>, rhs: impl Into<Value>, op: OpCode) -> Result<Value, VmError> {
        MonkeyOperations.binary_operation(lhs.into(), rhs.into(), op)
    }

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(binary(i32::MAX, 1, OpCode::Add).unwrap(), Value::Integer(i32::MIN));
        assert_eq!(binary(7, 2, OpCode::Div).unwrap(), Value::Integer(3));
        assert_eq!(binary(i32::MIN, -1, OpCode::Div).unwrap(), Value::Integer(i32::MIN));
    }

    #[test]
    fn integer_division_by_zero() {
        assert!(matches!(binary(1, 0, OpCode::Div), Err(VmError::DivisionByZero)));
    }

    #[test]
    fn mixed_numbers_promote_to_float() {
        assert_eq!(binary(1, 0.5, OpCode::Add).unwrap(), Value::Float(1.5));
        assert_eq!(binary(2.0, 2, OpCode::Equal).unwrap(), Value::Boolean(true));
        assert_eq!(binary(1.0, 0, OpCode::Div).unwrap(), Value::Float(f64::INFINITY));
    }

    #[test]
    fn string_concatenation_uses_display() {
        let s = binary("mon", "key", OpCode::Add).unwrap();
        assert_eq!(binary(s, 2, OpCode::Add).unwrap(), Value::string("monkey2"));
        assert_eq!(binary(1, "a", OpCode::Add).unwrap(), Value::string("1a"));
    }

    #[test]
    fn string_comparison() {
        assert_eq!(binary("b", "a", OpCode::GreaterThan).unwrap(), Value::Boolean(true));
        assert_eq!(binary("a", "a", OpCode::GreaterThanOrEqual).unwrap(), Value::Boolean(true));
        assert_eq!(binary("a", "a", OpCode::Equal).unwrap(), Value::Boolean(true));
        assert!(binary("a", 1, OpCode::GreaterThan).is_err());
    }

    #[test]
    fn structural_equality_across_types() {
        assert_eq!(binary(true, true, OpCode::Equal).unwrap(), Value::Boolean(true));
        assert_eq!(binary(true, 1, OpCode::Equal).unwrap(), Value::Boolean(false));
        assert_eq!(binary(Value::Null, Value::Null, OpCode::NotEqual).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn unsupported_operation_names_types() {
        let err = binary(true, 1, OpCode::Sub).unwrap_err();
        assert_eq!(err.to_string(), "unsupported operation: Boolean - Integer");
    }

    #[test]
    fn unary_operations() {
        let ops = MonkeyOperations;
        assert_eq!(ops.unary_operation(Value::Integer(5), OpCode::Minus).unwrap(), Value::Integer(-5));
        assert_eq!(ops.unary_operation(Value::Float(1.5), OpCode::Minus).unwrap(), Value::Float(-1.5));
        assert_eq!(ops.unary_operation(Value::Integer(5), OpCode::Bang).unwrap(), Value::Boolean(false));
        assert_eq!(ops.unary_operation(Value::Null, OpCode::Bang).unwrap(), Value::Boolean(true));
        assert!(ops.unary_operation(Value::Boolean(true), OpCode::Minus).is_err());
    }

    #[test]
    fn truthiness() {
        let ops = MonkeyOperations;
        assert!(!ops.is_truthy(&Value::Null));
        assert!(!ops.is_truthy(&Value::Boolean(false)));
        assert!(ops.is_truthy(&Value::Integer(0)));
        assert!(ops.is_truthy(&Value::string("")));
    }

    #[test]
    fn array_indexing() {
        let ops = MonkeyOperations;
        let arr = || Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(ops.index(arr(), Value::Integer(1)).unwrap(), Value::Integer(2));
        assert_eq!(ops.index(arr(), Value::Integer(2)).unwrap(), Value::Null);
        assert_eq!(ops.index(arr(), Value::Integer(-1)).unwrap(), Value::Null);
        assert!(matches!(ops.index(arr(), Value::string("x")), Err(VmError::InvalidArrayIndex(_))));
    }

    #[test]
    fn hash_indexing() {
        let ops = MonkeyOperations;
        let hash = || Value::hash([(HashKey::String("foo".into()), Value::Integer(5))]);
        assert_eq!(ops.index(hash(), Value::string("foo")).unwrap(), Value::Integer(5));
        assert_eq!(ops.index(hash(), Value::string("bar")).unwrap(), Value::Null);
        assert!(matches!(ops.index(hash(), Value::Array(vec![])), Err(VmError::InvalidHashKey(_))));
    }

    #[test]
    fn indexing_scalars_is_not_supported() {
        let err = MonkeyOperations.index(Value::Integer(1), Value::Integer(0)).unwrap_err();
        assert!(matches!(err, VmError::IndexNotSupported(_)));
    }
}
