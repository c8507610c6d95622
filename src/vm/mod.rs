use std::ops::ControlFlow;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::code::{OpCode, read_operand};
use crate::compiler::Bytecode;
use crate::value::{Closure, CompiledFunction, Value};

pub mod builtins;
pub mod operations;

pub use operations::{MONKEY_SIGNATURE, MonkeyOperations, VmOperations};

/// Value stack capacity.
pub const STACK_SIZE: usize = 2048;
/// Addressable global slots (a 2-byte operand).
pub const GLOBALS_SIZE: usize = 65536;
/// Maximum call depth, main frame included.
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("unknown opcode: {op:#04x} at offset {ip}")]
    UnknownOpCode { op: u8, ip: usize },
    #[error("truncated {op} instruction at offset {ip}")]
    TruncatedInstruction { op: OpCode, ip: usize },
    #[error("{op} operand {operand} is out of range")]
    InvalidOperand { op: OpCode, operand: usize },
    #[error("value {0} cannot be used as hash key")]
    InvalidHashKey(String),
    #[error("index {0} can't be applied to type Array")]
    InvalidArrayIndex(String),
    #[error("can't apply index to: {0}")]
    IndexNotSupported(String),
    #[error("calling non-function: {0}")]
    CallingNonFunction(String),
    #[error("wrong number of arguments: expected {expected} but got {got}")]
    WrongArgumentCount { expected: usize, got: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("argument to `{builtin}` not supported, got {got}")]
    UnsupportedArgument { builtin: &'static str, got: &'static str },
}

type VmResult<T> = Result<T, VmError>;

#[derive(Debug)]
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame { closure, ip: 0, base_pointer }
    }
}

/// Stack machine executing one [`Bytecode`] artifact.
pub struct Vm<O: VmOperations = MonkeyOperations> {
    constants: Vec<Value>,
    stack: Vec<Value>,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    last_popped: Option<Value>,
    ops: O,
}

impl<O: VmOperations> Vm<O> {
    pub fn new(bytecode: Bytecode, ops: O) -> Self {
        Self::with_globals(bytecode, ops, Vec::new())
    }

    /// Start from an existing globals store, as left by [`Vm::into_globals`].
    pub fn with_globals(bytecode: Bytecode, ops: O, globals: Vec<Value>) -> Self {
        let main = Rc::new(Closure {
            function: Rc::new(CompiledFunction {
                instructions: bytecode.instructions,
                parameters: 0,
                locals: 0,
            }),
            free: Vec::new(),
        });
        Vm {
            constants: bytecode.constants,
            stack: Vec::with_capacity(STACK_SIZE),
            globals,
            frames: vec![Frame::new(main, 0)],
            last_popped: None,
            ops,
        }
    }

    /// The value most recently popped off the stack, i.e. the result of the
    /// last expression statement.
    pub fn last_popped(&self) -> Option<&Value> {
        self.last_popped.as_ref()
    }

    pub fn stack_top(&self) -> Option<&Value> {
        self.stack.last()
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    pub fn run(&mut self) -> VmResult<()> {
        debug!(constants = self.constants.len(), "vm run");
        loop {
            let depth = self.frames.len();
            let Some(frame) = self.frames.last_mut() else { break };
            let code = frame.closure.function.instructions.as_bytes();
            let ip = frame.ip;

            let Some(&byte) = code.get(ip) else {
                if depth == 1 {
                    break;
                }
                // Function bodies always end in a return; treat running off
                // the end the same way.
                let null = self.ops.null();
                if self.return_from_frame(null)?.is_break() {
                    break;
                }
                continue;
            };

            let op = OpCode::try_from(byte).map_err(|op| VmError::UnknownOpCode { op, ip })?;
            let mut operands = [0usize; 2];
            let mut offset = ip + 1;
            for (slot, &width) in operands.iter_mut().zip(op.operand_widths()) {
                *slot = read_operand(code, width, offset).ok_or(VmError::TruncatedInstruction { op, ip })?;
                offset += width;
            }
            frame.ip = offset;

            if self.execute(op, operands)?.is_break() {
                break;
            }
        }
        debug!(result = ?self.last_popped, "vm halt");
        Ok(())
    }

    fn execute(&mut self, op: OpCode, operands: [usize; 2]) -> VmResult<ControlFlow<()>> {
        let [a, b] = operands;
        match op {
            OpCode::Constant => {
                let value = self.constant(op, a)?.clone();
                self.push(value)?;
            }
            OpCode::Pop => {
                self.last_popped = self.stack.pop();
            }
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::GreaterThan
            | OpCode::GreaterThanOrEqual => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.ops.binary_operation(lhs, rhs, op)?;
                self.push(result)?;
            }
            OpCode::Minus | OpCode::Bang => {
                let operand = self.pop()?;
                let result = self.ops.unary_operation(operand, op)?;
                self.push(result)?;
            }
            OpCode::True => self.push(self.ops.lang_bool(true))?,
            OpCode::False => self.push(self.ops.lang_bool(false))?,
            OpCode::Null => self.push(self.ops.null())?,
            OpCode::Jump => self.jump(a),
            OpCode::JumpNotTruthy => {
                let condition = self.pop()?;
                if !self.ops.is_truthy(&condition) {
                    self.jump(a);
                }
            }
            OpCode::SetGlobal | OpCode::AssignGlobal => {
                let value = self.pop()?;
                if a >= GLOBALS_SIZE {
                    return Err(VmError::InvalidOperand { op, operand: a });
                }
                if a >= self.globals.len() {
                    self.globals.resize(a + 1, self.ops.null());
                }
                self.globals[a] = value;
            }
            OpCode::GetGlobal => {
                let value = self.globals.get(a).cloned().unwrap_or_else(|| self.ops.null());
                self.push(value)?;
            }
            OpCode::SetLocal | OpCode::AssignLocal => {
                let value = self.pop()?;
                let slot = self.local_slot(op, a)?;
                self.stack[slot] = value;
            }
            OpCode::GetLocal => {
                let slot = self.local_slot(op, a)?;
                self.push(self.stack[slot].clone())?;
            }
            OpCode::Array => {
                let items = self.pop_n(a)?;
                self.push(Value::Array(items))?;
            }
            OpCode::Hash => {
                let items = self.pop_n(a)?;
                let mut pairs = std::collections::HashMap::with_capacity(a / 2);
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    pairs.insert(self.ops.hash_key(&key)?, value);
                }
                self.push(Value::Hash(pairs))?;
            }
            OpCode::Index => {
                let index = self.pop()?;
                let target = self.pop()?;
                let result = self.ops.index(target, index)?;
                self.push(result)?;
            }
            OpCode::Call => self.call(a)?,
            OpCode::ReturnValue => {
                let value = self.pop()?;
                return self.return_from_frame(value);
            }
            OpCode::Return => {
                let null = self.ops.null();
                return self.return_from_frame(null);
            }
            OpCode::GetBuiltin => {
                let builtin = self.ops.builtin(a).ok_or(VmError::InvalidOperand { op, operand: a })?;
                self.push(Value::Builtin(builtin))?;
            }
            OpCode::Closure => {
                let function = match self.constant(op, a)? {
                    Value::CompiledFunction(function) => Rc::clone(function),
                    _ => return Err(VmError::InvalidOperand { op, operand: a }),
                };
                let free = self.pop_n(b)?;
                self.push(Value::Closure(Rc::new(Closure { function, free })))?;
            }
            OpCode::GetFree => {
                let value = self
                    .current_closure()
                    .free
                    .get(a)
                    .cloned()
                    .ok_or(VmError::InvalidOperand { op, operand: a })?;
                self.push(value)?;
            }
            OpCode::CurrentClosure => {
                let closure = Rc::clone(self.current_closure());
                self.push(Value::Closure(closure))?;
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn call(&mut self, argc: usize) -> VmResult<()> {
        let callee_slot = self.stack.len().checked_sub(argc + 1).ok_or(VmError::StackUnderflow)?;
        let closure = match &self.stack[callee_slot] {
            Value::Closure(closure) => Rc::clone(closure),
            Value::CompiledFunction(function) => {
                Rc::new(Closure { function: Rc::clone(function), free: Vec::new() })
            }
            Value::Builtin(builtin) => {
                let builtin = *builtin;
                let args = self.pop_n(argc)?;
                self.stack.pop();
                trace!(builtin = builtin.name(), argc, "call builtin");
                let result = self.ops.call_builtin(builtin, args)?;
                return self.push(result);
            }
            other => return Err(VmError::CallingNonFunction(other.to_string())),
        };

        let function = &closure.function;
        if argc != function.parameters {
            return Err(VmError::WrongArgumentCount { expected: function.parameters, got: argc });
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(VmError::StackOverflow);
        }

        let base_pointer = self.stack.len() - argc;
        let extra = function.locals.saturating_sub(function.parameters);
        if self.stack.len() + extra > STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack.resize(self.stack.len() + extra, self.ops.null());

        trace!(argc, locals = function.locals, depth = self.frames.len() + 1, "call");
        self.frames.push(Frame::new(closure, base_pointer));
        Ok(())
    }

    /// Pops the current frame and pushes `value` for the caller. Returning
    /// from the main frame ends the run with `value` as the result.
    fn return_from_frame(&mut self, value: Value) -> VmResult<ControlFlow<()>> {
        if self.frames.len() <= 1 {
            self.last_popped = Some(value);
            return Ok(ControlFlow::Break(()));
        }
        let Some(frame) = self.frames.pop() else {
            return Ok(ControlFlow::Break(()));
        };
        trace!(depth = self.frames.len(), "return");
        // Drops the arguments, the locals and the callee itself.
        self.stack.truncate(frame.base_pointer.saturating_sub(1));
        self.push(value)?;
        Ok(ControlFlow::Continue(()))
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Removes the top `n` values, keeping their stack order.
    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let start = self.stack.len().checked_sub(n).ok_or(VmError::StackUnderflow)?;
        Ok(self.stack.split_off(start))
    }

    fn constant(&self, op: OpCode, index: usize) -> VmResult<&Value> {
        self.constants.get(index).ok_or(VmError::InvalidOperand { op, operand: index })
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = target;
        }
    }

    fn local_slot(&self, op: OpCode, index: usize) -> VmResult<usize> {
        let base = self.frames.last().map_or(0, |f| f.base_pointer);
        let slot = base + index;
        if slot < self.stack.len() {
            Ok(slot)
        } else {
            Err(VmError::InvalidOperand { op, operand: index })
        }
    }

    fn current_closure(&self) -> &Rc<Closure> {
        // `run` only executes while a frame exists.
        &self.frames[self.frames.len() - 1].closure
    }
}
