use std::fmt;

use super::VmError;
use crate::value::Value;

/// Native functions reachable through `getBuiltin`. The discriminant is the
/// builtin's operand index, so the order here is part of the bytecode format.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Len = 0,
    Puts = 1,
    First = 2,
    Last = 3,
    Rest = 4,
    Push = 5,
}

impl Builtin {
    pub const ALL: [Builtin; 6] = [
        Builtin::Len,
        Builtin::Puts,
        Builtin::First,
        Builtin::Last,
        Builtin::Rest,
        Builtin::Push,
    ];

    pub fn from_index(index: usize) -> Option<Builtin> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Puts => "puts",
            Builtin::First => "first",
            Builtin::Last => "last",
            Builtin::Rest => "rest",
            Builtin::Push => "push",
        }
    }

    /// `None` means variadic.
    pub fn arity(self) -> Option<usize> {
        match self {
            Builtin::Puts => None,
            Builtin::Push => Some(2),
            _ => Some(1),
        }
    }

    pub fn call(self, args: Vec<Value>) -> Result<Value, VmError> {
        match self.arity() {
            Some(expected) if args.len() != expected => {
                return Err(VmError::WrongArgumentCount { expected, got: args.len() });
            }
            _ => {}
        }

        let mut args = args.into_iter();
        match self {
            Builtin::Puts => {
                for arg in args {
                    println!("{}", arg);
                }
                Ok(Value::Null)
            }
            Builtin::Len => match args.next() {
                Some(Value::String(s)) => Ok(Value::Integer(s.chars().count() as i32)),
                Some(Value::Array(items)) => Ok(Value::Integer(items.len() as i32)),
                other => Err(self.unsupported(other)),
            },
            Builtin::First => match args.next() {
                Some(Value::Array(items)) => Ok(items.into_iter().next().unwrap_or(Value::Null)),
                other => Err(self.unsupported(other)),
            },
            Builtin::Last => match args.next() {
                Some(Value::Array(items)) => Ok(items.into_iter().last().unwrap_or(Value::Null)),
                other => Err(self.unsupported(other)),
            },
            Builtin::Rest => match args.next() {
                Some(Value::Array(items)) if items.is_empty() => Ok(Value::Null),
                Some(Value::Array(items)) => Ok(Value::Array(items[1..].to_vec())),
                other => Err(self.unsupported(other)),
            },
            Builtin::Push => match (args.next(), args.next()) {
                (Some(Value::Array(mut items)), Some(value)) => {
                    items.push(value);
                    Ok(Value::Array(items))
                }
                (other, _) => Err(self.unsupported(other)),
            },
        }
    }

    fn unsupported(self, got: Option<Value>) -> VmError {
        VmError::UnsupportedArgument {
            builtin: self.name(),
            got: got.map_or("nothing", |v| v.type_name()),
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(items: &[i32]) -> Value {
        Value::Array(items.iter().map(|&n| Value::Integer(n)).collect())
    }

    #[test]
    fn index_order_is_stable() {
        for (i, b) in Builtin::ALL.iter().enumerate() {
            assert_eq!(b.index(), i);
            assert_eq!(Builtin::from_index(i), Some(*b));
        }
        assert_eq!(Builtin::from_index(6), None);
        assert_eq!(Builtin::Len.name(), "len");
        assert_eq!(Builtin::Push.name(), "push");
    }

    #[test]
    fn len_counts_chars_and_elements() {
        assert_eq!(Builtin::Len.call(vec![Value::string("four")]).unwrap(), Value::Integer(4));
        assert_eq!(Builtin::Len.call(vec![Value::string("")]).unwrap(), Value::Integer(0));
        assert_eq!(Builtin::Len.call(vec![array(&[1, 2, 3])]).unwrap(), Value::Integer(3));
    }

    #[test]
    fn len_rejects_integers() {
        let err = Builtin::Len.call(vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, VmError::UnsupportedArgument { builtin: "len", got: "Integer" }));
    }

    #[test]
    fn arity_is_checked() {
        let err = Builtin::Len.call(vec![]).unwrap_err();
        assert!(matches!(err, VmError::WrongArgumentCount { expected: 1, got: 0 }));
        let err = Builtin::Push.call(vec![array(&[])]).unwrap_err();
        assert!(matches!(err, VmError::WrongArgumentCount { expected: 2, got: 1 }));
    }

    #[test]
    fn array_helpers() {
        assert_eq!(Builtin::First.call(vec![array(&[1, 2, 3])]).unwrap(), Value::Integer(1));
        assert_eq!(Builtin::Last.call(vec![array(&[1, 2, 3])]).unwrap(), Value::Integer(3));
        assert_eq!(Builtin::Rest.call(vec![array(&[1, 2, 3])]).unwrap(), array(&[2, 3]));
        assert_eq!(Builtin::First.call(vec![array(&[])]).unwrap(), Value::Null);
        assert_eq!(Builtin::Last.call(vec![array(&[])]).unwrap(), Value::Null);
        assert_eq!(Builtin::Rest.call(vec![array(&[])]).unwrap(), Value::Null);
        assert_eq!(
            Builtin::Push.call(vec![array(&[1]), Value::Integer(2)]).unwrap(),
            array(&[1, 2])
        );
    }

    #[test]
    fn puts_returns_null_for_any_arity() {
        assert_eq!(Builtin::Puts.call(vec![]).unwrap(), Value::Null);
        assert_eq!(
            Builtin::Puts.call(vec![Value::Integer(1), Value::string("x")]).unwrap(),
            Value::Null
        );
    }
}
