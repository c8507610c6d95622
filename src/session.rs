use crate::compiler::symbol_table::SymbolTable;
use crate::compiler::Compiler;
use crate::value::Value;
use crate::vm::{MonkeyOperations, Vm, VmOperations};
use crate::Error;

/// Incremental evaluation for a REPL: names, constants and globals defined by
/// one input stay visible to the next.
///
/// An input that fails to parse or compile leaves the session untouched. An
/// input that fails at runtime keeps whatever globals it set before failing.
pub struct Session<O: VmOperations + Clone = MonkeyOperations> {
    symbol_table: SymbolTable,
    constants: Vec<Value>,
    globals: Vec<Value>,
    ops: O,
}

impl Session<MonkeyOperations> {
    pub fn new() -> Self {
        Self::with_ops(MonkeyOperations)
    }
}

impl Default for Session<MonkeyOperations> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: VmOperations + Clone> Session<O> {
    pub fn with_ops(ops: O) -> Self {
        let (_, symbol_table) = Compiler::new().into_parts();
        Session { symbol_table, constants: Vec::new(), globals: Vec::new(), ops }
    }

    /// Evaluate one input. Returns the value of its last expression
    /// statement, if it had one.
    pub fn eval(&mut self, source: &str) -> Result<Option<Value>, Error> {
        let program = crate::parse(source)?;

        let mut compiler = Compiler::new_with_state(self.symbol_table.clone(), self.constants.clone());
        compiler.compile(&program)?;
        let (bytecode, symbol_table) = compiler.into_parts();
        self.symbol_table = symbol_table;
        self.constants = bytecode.constants.clone();

        let globals = std::mem::take(&mut self.globals);
        let mut vm = Vm::with_globals(bytecode, self.ops.clone(), globals);
        let outcome = vm.run();
        let value = vm.last_popped().cloned();
        self.globals = vm.into_globals();
        outcome?;
        Ok(value)
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VmError;

    #[test]
    fn definitions_carry_across_inputs() {
        let mut session = Session::new();
        assert_eq!(session.eval("let a = 1;").unwrap(), None);
        assert_eq!(session.eval("a + 1").unwrap(), Some(Value::Integer(2)));
        assert_eq!(session.eval("var b = a * 10; b = b + 1; b").unwrap(), Some(Value::Integer(11)));
    }

    #[test]
    fn functions_and_closures_survive() {
        let mut session = Session::new();
        session.eval("let adder = fn(x) { fn(y) { x + y } };").unwrap();
        session.eval("let add2 = adder(2);").unwrap();
        assert_eq!(session.eval("add2(40)").unwrap(), Some(Value::Integer(42)));
    }

    #[test]
    fn compile_failure_leaves_state_alone() {
        let mut session = Session::new();
        session.eval("let a = 1;").unwrap();
        let constants = session.constants().len();

        let err = session.eval("let b = 99; nope").unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
        assert_eq!(session.constants().len(), constants);

        // `b` never made it into the symbol table, so it can be declared now.
        session.eval("let b = 2;").unwrap();
        assert_eq!(session.eval("a + b").unwrap(), Some(Value::Integer(3)));
    }

    #[test]
    fn parse_failure_is_reported() {
        let mut session = Session::new();
        assert!(matches!(session.eval("let = ;"), Err(Error::Parse(_))));
        assert_eq!(session.eval("1").unwrap(), Some(Value::Integer(1)));
    }

    #[test]
    fn runtime_failure_keeps_earlier_globals() {
        let mut session = Session::new();
        let err = session.eval("let a = 5; let b = a / 0;").unwrap_err();
        assert!(matches!(err, Error::Vm(VmError::DivisionByZero)));
        assert_eq!(session.eval("a").unwrap(), Some(Value::Integer(5)));
    }

    #[test]
    fn redeclaring_across_inputs_fails() {
        let mut session = Session::new();
        session.eval("let a = 1;").unwrap();
        assert!(matches!(session.eval("let a = 2;"), Err(Error::Compile(_))));
    }
}
