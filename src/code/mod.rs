//! Instruction set and byte-level encoding.
//!
//! Every instruction is `[opcode:1][operand_0][operand_1]...`; operand widths
//! are fixed per opcode and listed in [`OpCode::operand_widths`]. Operands are
//! big-endian unsigned integers.

use std::fmt;

/// One-byte instruction tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Constant = 0,
    Pop = 1,
    Add = 2,
    Sub = 3,
    Mul = 4,
    Div = 5,
    True = 6,
    False = 7,
    Equal = 8,
    NotEqual = 9,
    GreaterThan = 10,
    GreaterThanOrEqual = 11,
    Minus = 12,
    Bang = 13,
    JumpNotTruthy = 14,
    Jump = 15,
    Null = 16,
    GetGlobal = 17,
    SetGlobal = 18,
    AssignGlobal = 19,
    Array = 20,
    Hash = 21,
    Index = 22,
    Call = 23,
    ReturnValue = 24,
    Return = 25,
    GetLocal = 26,
    SetLocal = 27,
    AssignLocal = 28,
    GetBuiltin = 29,
    Closure = 30,
    GetFree = 31,
    CurrentClosure = 32,
}

impl OpCode {
    pub const ALL: [OpCode; 33] = [
        OpCode::Constant,
        OpCode::Pop,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::True,
        OpCode::False,
        OpCode::Equal,
        OpCode::NotEqual,
        OpCode::GreaterThan,
        OpCode::GreaterThanOrEqual,
        OpCode::Minus,
        OpCode::Bang,
        OpCode::JumpNotTruthy,
        OpCode::Jump,
        OpCode::Null,
        OpCode::GetGlobal,
        OpCode::SetGlobal,
        OpCode::AssignGlobal,
        OpCode::Array,
        OpCode::Hash,
        OpCode::Index,
        OpCode::Call,
        OpCode::ReturnValue,
        OpCode::Return,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::AssignLocal,
        OpCode::GetBuiltin,
        OpCode::Closure,
        OpCode::GetFree,
        OpCode::CurrentClosure,
    ];

    /// Byte width of each operand, in order.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            OpCode::Constant
            | OpCode::JumpNotTruthy
            | OpCode::Jump
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::AssignGlobal
            | OpCode::Array
            | OpCode::Hash => &[2],
            OpCode::Call
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::AssignLocal
            | OpCode::GetBuiltin
            | OpCode::GetFree => &[1],
            OpCode::Closure => &[2, 1],
            OpCode::Pop
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::True
            | OpCode::False
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::GreaterThan
            | OpCode::GreaterThanOrEqual
            | OpCode::Minus
            | OpCode::Bang
            | OpCode::Null
            | OpCode::Index
            | OpCode::ReturnValue
            | OpCode::Return
            | OpCode::CurrentClosure => &[],
        }
    }

    /// Total encoded size of the instruction, opcode byte included.
    pub fn width(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "Constant",
            OpCode::Pop => "Pop",
            OpCode::Add => "Add",
            OpCode::Sub => "Sub",
            OpCode::Mul => "Mul",
            OpCode::Div => "Div",
            OpCode::True => "True",
            OpCode::False => "False",
            OpCode::Equal => "Equal",
            OpCode::NotEqual => "NotEqual",
            OpCode::GreaterThan => "GreaterThan",
            OpCode::GreaterThanOrEqual => "GreaterThanOrEqual",
            OpCode::Minus => "Minus",
            OpCode::Bang => "Bang",
            OpCode::JumpNotTruthy => "JumpNotTruthy",
            OpCode::Jump => "Jump",
            OpCode::Null => "Null",
            OpCode::GetGlobal => "GetGlobal",
            OpCode::SetGlobal => "SetGlobal",
            OpCode::AssignGlobal => "AssignGlobal",
            OpCode::Array => "Array",
            OpCode::Hash => "Hash",
            OpCode::Index => "Index",
            OpCode::Call => "Call",
            OpCode::ReturnValue => "ReturnValue",
            OpCode::Return => "Return",
            OpCode::GetLocal => "GetLocal",
            OpCode::SetLocal => "SetLocal",
            OpCode::AssignLocal => "AssignLocal",
            OpCode::GetBuiltin => "GetBuiltin",
            OpCode::Closure => "Closure",
            OpCode::GetFree => "GetFree",
            OpCode::CurrentClosure => "CurrentClosure",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        OpCode::ALL.get(byte as usize).copied().ok_or(byte)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode one instruction.
///
/// # Panics
///
/// Panics if `operands` does not match the opcode's operand count, or an
/// operand does not fit its declared width. Both mean the compiler emitted a
/// malformed instruction.
pub fn make(op: OpCode, operands: &[usize]) -> Vec<u8> {
    let widths = op.operand_widths();
    assert_eq!(
        widths.len(),
        operands.len(),
        "{} takes {} operand(s), got {}",
        op,
        widths.len(),
        operands.len()
    );

    let mut out = Vec::with_capacity(op.width());
    out.push(op as u8);
    for (&operand, &width) in operands.iter().zip(widths) {
        assert!(
            width >= std::mem::size_of::<usize>() || operand < 1usize << (8 * width),
            "operand {} does not fit in {} byte(s) of {}",
            operand,
            width,
            op
        );
        for shift in (0..width).rev() {
            out.push((operand >> (8 * shift)) as u8);
        }
    }
    out
}

/// Read a big-endian operand of `width` bytes at `offset`.
pub fn read_operand(bytes: &[u8], width: usize, offset: usize) -> Option<usize> {
    let end = offset.checked_add(width)?;
    let slice = bytes.get(offset..end)?;
    Some(slice.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
}

/// Decode all operands of `op` from `bytes` (which start right after the
/// opcode byte). Returns the operands and the number of bytes read.
pub fn read_operands(op: OpCode, bytes: &[u8]) -> Option<(Vec<usize>, usize)> {
    let mut operands = Vec::with_capacity(op.operand_widths().len());
    let mut offset = 0;
    for &width in op.operand_widths() {
        operands.push(read_operand(bytes, width, offset)?);
        offset += width;
    }
    Some((operands, offset))
}

/// A growable instruction buffer.
///
/// Bytes change in exactly two ways: [`append`](Self::append) at the end, and
/// [`overwrite`](Self::overwrite) of previously emitted bytes (backpatching).
/// [`truncate`](Self::truncate) only drops a trailing instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Instructions(Vec::new())
    }

    /// Append raw instruction bytes, returning the offset they start at.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let position = self.0.len();
        self.0.extend_from_slice(bytes);
        position
    }

    /// Replace bytes in place starting at `offset`. Never grows the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range falls outside the emitted bytes.
    pub fn overwrite(&mut self, offset: usize, bytes: &[u8]) {
        self.0[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl std::ops::Deref for Instructions {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(bytes: Vec<u8>) -> Self {
        Instructions(bytes)
    }
}

impl FromIterator<Vec<u8>> for Instructions {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Instructions(iter.into_iter().flatten().collect())
    }
}

/// Disassembly listing, one instruction per line: `0003 Constant 1`.
impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ip = 0;
        while ip < self.0.len() {
            let op = match OpCode::try_from(self.0[ip]) {
                Ok(op) => op,
                Err(byte) => {
                    writeln!(f, "{:04} ERROR: unknown opcode {:#04x}", ip, byte)?;
                    ip += 1;
                    continue;
                }
            };
            match read_operands(op, &self.0[ip + 1..]) {
                Some((operands, read)) => {
                    write!(f, "{:04} {}", ip, op)?;
                    for operand in operands {
                        write!(f, " {}", operand)?;
                    }
                    writeln!(f)?;
                    ip += 1 + read;
                }
                None => {
                    writeln!(f, "{:04} ERROR: truncated {}", ip, op)?;
                    break;
                }
            }
        }
        Ok(())
    }
}
