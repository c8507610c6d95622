use tracing::debug;

use crate::ast::*;
use crate::code::{Instructions, OpCode, make};
use crate::value::Value;
use crate::vm::builtins::Builtin;

pub mod symbol_table;

pub use symbol_table::{Symbol, SymbolError, SymbolScope, SymbolTable};

/// Operand emitted for forward jumps before their target is known. Every one
/// is backpatched before compilation finishes.
pub const JUMP_PLACEHOLDER: usize = 9999;

const MAX_WIDE_OPERAND: usize = u16::MAX as usize;
const MAX_NARROW_OPERAND: usize = u8::MAX as usize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("'{name}' is already declared in this scope")]
    Redeclaration { name: String, span: Span },
    #[error("undefined name: {name}")]
    UndefinedName { name: String, span: Span },
    #[error("cannot assign to constant '{name}'")]
    AssignConstant { name: String, span: Span },
    #[error("cannot assign to '{name}' inside its own body")]
    AssignSelfReference { name: String, span: Span },
    #[error("unknown operator: {operator}")]
    UnknownOperator { operator: String, span: Span },
    #[error("too many {what} (limit {limit})")]
    TooMany { what: &'static str, limit: usize, span: Span },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::Redeclaration { span, .. }
            | CompileError::UndefinedName { span, .. }
            | CompileError::AssignConstant { span, .. }
            | CompileError::AssignSelfReference { span, .. }
            | CompileError::UnknownOperator { span, .. }
            | CompileError::TooMany { span, .. } => *span,
        }
    }

    fn from_symbol(err: SymbolError, span: Span) -> Self {
        match err {
            SymbolError::Redeclaration(name) => CompileError::Redeclaration { name, span },
            SymbolError::UndefinedName(name) => CompileError::UndefinedName { name, span },
        }
    }
}

type CompileResult<T> = Result<T, CompileError>;

/// Output of a compilation unit: the main instruction stream and the
/// constant pool it indexes into.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmittedInstruction {
    opcode: OpCode,
    position: usize,
}

/// One function body being compiled.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for builtin in Builtin::ALL {
            symbol_table.define_builtin(builtin.index(), builtin.name());
        }
        Self::new_with_state(symbol_table, Vec::new())
    }

    /// Continue from the symbols and constants of an earlier compilation, so
    /// new input can refer to globals it defined.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler { constants, symbol_table, scopes: vec![CompilationScope::default()] }
    }

    pub fn compile(&mut self, program: &Program) -> CompileResult<()> {
        for stmt in &program.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scopes[0].instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    /// Finish compilation, handing back the symbols for reuse.
    pub fn into_parts(mut self) -> (Bytecode, SymbolTable) {
        let main = self.scopes.swap_remove(0);
        (Bytecode { instructions: main.instructions, constants: self.constants }, self.symbol_table)
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    // ---- Statements ----

    fn compile_statement(&mut self, stmt: &Statement) -> CompileResult<()> {
        let span = stmt.span;
        match &stmt.node {
            Stmt::Expr(expr) => {
                self.compile_expression(expr)?;
                self.emit(OpCode::Pop, &[]);
            }
            Stmt::Return(value) => {
                self.compile_expression(value)?;
                self.emit(OpCode::ReturnValue, &[]);
            }
            Stmt::Declare { mutability, name, value } => {
                let symbol = match &value.node {
                    // A global `var` function sees its own name as the global
                    // slot, so its body can reassign it.
                    Expr::Function { parameters, body, .. }
                        if *mutability == Mutability::Var && self.symbol_table.is_global() =>
                    {
                        let symbol = self.define(name, *mutability, span)?;
                        self.compile_function(None, parameters, body, value.span)?;
                        symbol
                    }
                    Expr::Function { parameters, body, .. } => {
                        self.compile_function(Some((name, *mutability)), parameters, body, value.span)?;
                        self.define(name, *mutability, span)?
                    }
                    _ => {
                        self.compile_expression(value)?;
                        self.define(name, *mutability, span)?
                    }
                };
                match symbol.scope {
                    SymbolScope::Global => {
                        check_limit(symbol.index, MAX_WIDE_OPERAND, "global bindings", span)?;
                        self.emit(OpCode::SetGlobal, &[symbol.index]);
                    }
                    _ => {
                        check_limit(symbol.index, MAX_NARROW_OPERAND, "local bindings", span)?;
                        self.emit(OpCode::SetLocal, &[symbol.index]);
                    }
                }
            }
            Stmt::Assign { name, value } => {
                self.compile_expression(value)?;
                let symbol = self.resolve(name, span)?;
                let op = match (symbol.mutability, symbol.scope) {
                    (Mutability::Var, SymbolScope::Global) => OpCode::AssignGlobal,
                    (Mutability::Var, SymbolScope::Local) => OpCode::AssignLocal,
                    (Mutability::Var, SymbolScope::Function) => {
                        return Err(CompileError::AssignSelfReference { name: name.clone(), span });
                    }
                    _ => return Err(CompileError::AssignConstant { name: name.clone(), span }),
                };
                self.emit(op, &[symbol.index]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        for stmt in &block.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    // ---- Expressions ----

    fn compile_expression(&mut self, expr: &Expression) -> CompileResult<()> {
        let span = expr.span;
        match &expr.node {
            Expr::Integer(n) => self.emit_constant(Value::Integer(*n), span)?,
            Expr::Float(n) => self.emit_constant(Value::Float(*n), span)?,
            Expr::String(s) => self.emit_constant(Value::String(s.clone()), span)?,
            Expr::Boolean(true) => {
                self.emit(OpCode::True, &[]);
            }
            Expr::Boolean(false) => {
                self.emit(OpCode::False, &[]);
            }
            Expr::Identifier(name) => {
                let symbol = self.resolve(name, span)?;
                self.load_symbol(&symbol);
            }
            Expr::Prefix { operator, right } => {
                let op = match operator.as_str() {
                    "-" => OpCode::Minus,
                    "!" => OpCode::Bang,
                    _ => return Err(CompileError::UnknownOperator { operator: operator.clone(), span }),
                };
                self.compile_expression(right)?;
                self.emit(op, &[]);
            }
            Expr::Infix { operator, left, right } => {
                let op = infix_opcode(operator)
                    .ok_or_else(|| CompileError::UnknownOperator { operator: operator.clone(), span })?;
                // There are no less-than opcodes: `a < b` is `b > a`.
                if operator == "<" || operator == "<=" {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                } else {
                    self.compile_expression(left)?;
                    self.compile_expression(right)?;
                }
                self.emit(op, &[]);
            }
            Expr::If { condition, consequence, alternative } => {
                self.compile_expression(condition)?;
                let jump_not_truthy = self.emit(OpCode::JumpNotTruthy, &[JUMP_PLACEHOLDER]);

                self.compile_branch(consequence)?;
                let jump = self.emit(OpCode::Jump, &[JUMP_PLACEHOLDER]);

                let after_consequence = self.scope().instructions.len();
                self.patch_jump(jump_not_truthy, after_consequence, span)?;

                match alternative {
                    Some(alternative) => self.compile_branch(alternative)?,
                    None => {
                        self.emit(OpCode::Null, &[]);
                    }
                }

                let after_alternative = self.scope().instructions.len();
                self.patch_jump(jump, after_alternative, span)?;
            }
            Expr::Array(elements) => {
                check_limit(elements.len(), MAX_WIDE_OPERAND, "array elements", span)?;
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(OpCode::Array, &[elements.len()]);
            }
            Expr::Hash(pairs) => {
                check_limit(pairs.len() * 2, MAX_WIDE_OPERAND, "hash entries", span)?;
                let mut sorted: Vec<&(Expression, Expression)> = pairs.iter().collect();
                sorted.sort_by_cached_key(|(key, _)| key.to_string());
                for (key, value) in sorted {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(OpCode::Hash, &[pairs.len() * 2]);
            }
            Expr::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(OpCode::Index, &[]);
            }
            Expr::Function { name, parameters, body } => {
                let name = name.as_deref().map(|name| (name, Mutability::Let));
                self.compile_function(name, parameters, body, span)?;
            }
            Expr::Call { function, arguments } => {
                check_limit(arguments.len(), MAX_NARROW_OPERAND, "call arguments", span)?;
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(OpCode::Call, &[arguments.len()]);
            }
        }
        Ok(())
    }

    /// An `if` branch leaves exactly one value on the stack: the value of its
    /// trailing expression statement, or null.
    fn compile_branch(&mut self, block: &Block) -> CompileResult<()> {
        let start = self.scope().instructions.len();
        self.compile_block(block)?;
        if self.last_instruction_is(OpCode::Pop, start) {
            self.remove_last_pop();
        } else {
            self.emit(OpCode::Null, &[]);
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: Option<(&str, Mutability)>,
        parameters: &[String],
        body: &Block,
        span: Span,
    ) -> CompileResult<()> {
        check_limit(parameters.len(), MAX_NARROW_OPERAND, "parameters", span)?;
        self.enter_scope();

        if let Some((name, mutability)) = name {
            self.symbol_table.define_function_name(name, mutability);
        }
        for parameter in parameters {
            self.symbol_table
                .define(parameter, Mutability::Let)
                .map_err(|e| CompileError::from_symbol(e, span))?;
        }

        self.compile_block(body)?;
        if self.last_instruction_is(OpCode::Pop, 0) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(OpCode::ReturnValue, 0) {
            self.emit(OpCode::Return, &[]);
        }

        let (instructions, free, locals) = self.leave_scope();
        check_limit(locals, MAX_NARROW_OPERAND, "local bindings", span)?;
        check_limit(free.len(), MAX_NARROW_OPERAND, "captured variables", span)?;

        for symbol in &free {
            self.load_symbol(symbol);
        }

        let function = Value::function(instructions, parameters.len(), locals);
        let index = self.add_constant(function, span)?;
        if free.is_empty() {
            self.emit(OpCode::Constant, &[index]);
        } else {
            self.emit(OpCode::Closure, &[index, free.len()]);
        }
        Ok(())
    }

    fn define(&mut self, name: &str, mutability: Mutability, span: Span) -> CompileResult<Symbol> {
        self.symbol_table.define(name, mutability).map_err(|e| CompileError::from_symbol(e, span))
    }

    fn resolve(&mut self, name: &str, span: Span) -> CompileResult<Symbol> {
        self.symbol_table.resolve(name).map_err(|e| CompileError::from_symbol(e, span))
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(OpCode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(OpCode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(OpCode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(OpCode::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(OpCode::CurrentClosure, &[]),
        };
    }

    // ---- Emission ----

    fn add_constant(&mut self, value: Value, span: Span) -> CompileResult<usize> {
        check_limit(self.constants.len(), MAX_WIDE_OPERAND, "constants", span)?;
        self.constants.push(value);
        Ok(self.constants.len() - 1)
    }

    fn emit_constant(&mut self, value: Value, span: Span) -> CompileResult<()> {
        let index = self.add_constant(value, span)?;
        self.emit(OpCode::Constant, &[index]);
        Ok(())
    }

    fn emit(&mut self, opcode: OpCode, operands: &[usize]) -> usize {
        let scope = self.scope();
        let position = scope.instructions.append(&make(opcode, operands));
        scope.previous = scope.last.replace(EmittedInstruction { opcode, position });
        position
    }

    /// True when the newest instruction is `opcode` and was emitted at or
    /// after `since`.
    fn last_instruction_is(&mut self, opcode: OpCode, since: usize) -> bool {
        self.scope()
            .last
            .is_some_and(|last| last.opcode == opcode && last.position >= since)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.scope();
        if let Some(last) = scope.last {
            scope.instructions.truncate(last.position);
            scope.last = scope.previous.take();
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.scope();
        if let Some(last) = scope.last.as_mut() {
            scope.instructions.overwrite(last.position, &make(OpCode::ReturnValue, &[]));
            last.opcode = OpCode::ReturnValue;
        }
    }

    /// Backpatch the jump emitted at `position` to land on `target`.
    ///
    /// # Panics
    ///
    /// Panics if no jump starts at `position`.
    fn patch_jump(&mut self, position: usize, target: usize, span: Span) -> CompileResult<()> {
        check_limit(target, MAX_WIDE_OPERAND, "bytes of code in a function", span)?;
        let scope = self.scope();
        let byte = scope.instructions[position];
        let opcode = match OpCode::try_from(byte) {
            Ok(op @ (OpCode::Jump | OpCode::JumpNotTruthy)) => op,
            _ => panic!("no jump to backpatch at offset {}: found byte {:#04x}", position, byte),
        };
        scope.instructions.overwrite(position, &make(opcode, &[target]));
        Ok(())
    }

    fn scope(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.symbol_table.enter();
        debug!(depth = self.symbol_table.depth(), "enter scope");
    }

    /// Returns the finished body, the symbols it captured and its local count.
    fn leave_scope(&mut self) -> (Instructions, Vec<Symbol>, usize) {
        let scope = self.scopes.pop().unwrap_or_default();
        let (free, locals) = self.symbol_table.leave().unwrap_or_default();
        debug!(
            depth = self.symbol_table.depth(),
            bytes = scope.instructions.len(),
            free = free.len(),
            locals,
            "leave scope"
        );
        (scope.instructions, free, locals)
    }
}

fn infix_opcode(operator: &str) -> Option<OpCode> {
    Some(match operator {
        "+" => OpCode::Add,
        "-" => OpCode::Sub,
        "*" => OpCode::Mul,
        "/" => OpCode::Div,
        ">" | "<" => OpCode::GreaterThan,
        ">=" | "<=" => OpCode::GreaterThanOrEqual,
        "==" => OpCode::Equal,
        "!=" => OpCode::NotEqual,
        _ => return None,
    })
}

fn check_limit(value: usize, limit: usize, what: &'static str, span: Span) -> CompileResult<()> {
    if value > limit {
        return Err(CompileError::TooMany { what, limit, span });
    }
    Ok(())
}
