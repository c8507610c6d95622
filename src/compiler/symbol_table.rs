use std::collections::HashMap;

use crate::ast::Mutability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    /// Captured from an enclosing function.
    Free,
    /// The function currently being compiled, referring to itself.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub index: usize,
    pub mutability: Mutability,
    pub scope: SymbolScope,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    #[error("'{0}' is already declared in this scope")]
    Redeclaration(String),
    #[error("undefined name: {0}")]
    UndefinedName(String),
}

#[derive(Debug, Clone, Default)]
struct Table {
    store: HashMap<String, Symbol>,
    definitions: usize,
    free: Vec<Symbol>,
    outer: Option<usize>,
}

/// Scope chain for name resolution.
///
/// Tables live in a stack; index 0 is the global scope and the last entry is
/// the innermost function body. Each table refers to its enclosing table by
/// index.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    tables: Vec<Table>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable { tables: vec![Table::default()] }
    }

    /// Open a scope for a function body.
    pub fn enter(&mut self) {
        let outer = self.tables.len() - 1;
        self.tables.push(Table { outer: Some(outer), ..Table::default() });
    }

    /// Close the innermost function scope, returning the symbols it captured
    /// from enclosing scopes and the number of locals it defined. The global
    /// scope is never closed.
    pub fn leave(&mut self) -> Option<(Vec<Symbol>, usize)> {
        if self.tables.len() == 1 {
            return None;
        }
        let table = self.tables.pop()?;
        Some((table.free, table.definitions))
    }

    pub fn is_global(&self) -> bool {
        self.tables.len() == 1
    }

    /// Nesting depth; 0 at global scope.
    pub fn depth(&self) -> usize {
        self.tables.len() - 1
    }

    /// Number of slots defined in the innermost scope.
    pub fn definitions(&self) -> usize {
        self.current().definitions
    }

    fn current(&self) -> &Table {
        &self.tables[self.tables.len() - 1]
    }

    fn current_mut(&mut self) -> &mut Table {
        let last = self.tables.len() - 1;
        &mut self.tables[last]
    }

    /// Declare `name` in the innermost scope.
    ///
    /// Fails when the scope already declares it. Builtins, captured names and
    /// the enclosing function's own name can be shadowed.
    pub fn define(&mut self, name: &str, mutability: Mutability) -> Result<Symbol, SymbolError> {
        let scope = if self.is_global() { SymbolScope::Global } else { SymbolScope::Local };
        let table = self.current_mut();
        let declared = table
            .store
            .get(name)
            .is_some_and(|existing| matches!(existing.scope, SymbolScope::Global | SymbolScope::Local));
        if declared {
            return Err(SymbolError::Redeclaration(name.to_string()));
        }
        let symbol = Symbol { name: name.to_string(), index: table.definitions, mutability, scope };
        table.definitions += 1;
        table.store.insert(name.to_string(), symbol.clone());
        Ok(symbol)
    }

    /// Builtins live in the global table under their fixed index.
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            index,
            mutability: Mutability::Let,
            scope: SymbolScope::Builtin,
        };
        self.tables[0].store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Bind the name of the function whose body is the innermost scope,
    /// with the mutability of the declaration that names it.
    pub fn define_function_name(&mut self, name: &str, mutability: Mutability) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            index: 0,
            mutability,
            scope: SymbolScope::Function,
        };
        self.current_mut().store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Look `name` up from the innermost scope outward. Locals of enclosing
    /// functions are captured as free variables on the way back in.
    pub fn resolve(&mut self, name: &str) -> Result<Symbol, SymbolError> {
        let innermost = self.tables.len() - 1;
        self.resolve_in(innermost, name)
            .ok_or_else(|| SymbolError::UndefinedName(name.to_string()))
    }

    fn resolve_in(&mut self, table: usize, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.tables[table].store.get(name) {
            return Some(symbol.clone());
        }
        let outer = self.tables[table].outer?;
        let symbol = self.resolve_in(outer, name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            SymbolScope::Local | SymbolScope::Free | SymbolScope::Function => {
                Some(self.define_free(table, symbol))
            }
        }
    }

    fn define_free(&mut self, table: usize, original: Symbol) -> Symbol {
        let table = &mut self.tables[table];
        let symbol = Symbol {
            name: original.name.clone(),
            index: table.free.len(),
            mutability: original.mutability,
            scope: SymbolScope::Free,
        };
        table.store.insert(original.name.clone(), symbol.clone());
        table.free.push(original);
        symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sym(name: &str, index: usize, mutability: Mutability, scope: SymbolScope) -> Symbol {
        Symbol { name: name.to_string(), index, mutability, scope }
    }

    #[test]
    fn define_assigns_indices_per_table() {
        let mut table = SymbolTable::new();
        assert_eq!(
            table.define("a", Mutability::Let).unwrap(),
            sym("a", 0, Mutability::Let, SymbolScope::Global)
        );
        assert_eq!(
            table.define("b", Mutability::Var).unwrap(),
            sym("b", 1, Mutability::Var, SymbolScope::Global)
        );

        table.enter();
        assert_eq!(
            table.define("c", Mutability::Let).unwrap(),
            sym("c", 0, Mutability::Let, SymbolScope::Local)
        );
        table.enter();
        assert_eq!(
            table.define("e", Mutability::Let).unwrap(),
            sym("e", 0, Mutability::Let, SymbolScope::Local)
        );
        assert_eq!(table.depth(), 2);
    }

    #[test]
    fn redeclaration_in_same_scope_fails() {
        let mut table = SymbolTable::new();
        table.define("a", Mutability::Let).unwrap();
        assert_eq!(
            table.define("a", Mutability::Var),
            Err(SymbolError::Redeclaration("a".into()))
        );
    }

    #[test]
    fn inner_scope_may_shadow_outer() {
        let mut table = SymbolTable::new();
        table.define("a", Mutability::Let).unwrap();
        table.enter();
        assert_eq!(table.define("a", Mutability::Var).unwrap().scope, SymbolScope::Local);
        assert_eq!(table.resolve("a").unwrap(), sym("a", 0, Mutability::Var, SymbolScope::Local));
    }

    #[test]
    fn builtins_and_function_names_can_be_shadowed() {
        let mut table = SymbolTable::new();
        table.define_builtin(0, "len");
        assert_eq!(table.define("len", Mutability::Let).unwrap().scope, SymbolScope::Global);

        table.enter();
        table.define_function_name("f", Mutability::Let);
        assert_eq!(table.define("f", Mutability::Let).unwrap().scope, SymbolScope::Local);
    }

    #[test]
    fn resolve_walks_outward() {
        let mut table = SymbolTable::new();
        table.define("a", Mutability::Let).unwrap();
        table.enter();
        table.define("b", Mutability::Let).unwrap();
        assert_eq!(table.resolve("a").unwrap(), sym("a", 0, Mutability::Let, SymbolScope::Global));
        assert_eq!(table.resolve("b").unwrap(), sym("b", 0, Mutability::Let, SymbolScope::Local));
    }

    #[test]
    fn scope_isolation() {
        let mut table = SymbolTable::new();
        table.enter();
        table.define("x", Mutability::Let).unwrap();
        assert!(table.resolve("x").is_ok());
        table.leave();
        assert_eq!(table.resolve("x"), Err(SymbolError::UndefinedName("x".into())));
    }

    #[test]
    fn leave_reports_locals_and_never_pops_global() {
        let mut table = SymbolTable::new();
        assert_eq!(table.leave(), None);
        table.enter();
        table.define("a", Mutability::Let).unwrap();
        table.define("b", Mutability::Let).unwrap();
        assert_eq!(table.definitions(), 2);
        assert_eq!(table.leave(), Some((vec![], 2)));
        assert!(table.is_global());
    }

    #[test]
    fn builtins_resolve_from_any_depth() {
        let mut table = SymbolTable::new();
        table.define_builtin(0, "len");
        table.define_builtin(5, "push");
        table.enter();
        table.enter();
        assert_eq!(table.resolve("push").unwrap(), sym("push", 5, Mutability::Let, SymbolScope::Builtin));
        let (free, _) = table.leave().unwrap();
        assert!(free.is_empty());
    }

    #[test]
    fn enclosing_locals_become_free() {
        let mut table = SymbolTable::new();
        table.define("g", Mutability::Let).unwrap();
        table.enter();
        table.define("a", Mutability::Let).unwrap();
        table.define("b", Mutability::Var).unwrap();
        table.enter();
        table.define("c", Mutability::Let).unwrap();

        assert_eq!(table.resolve("g").unwrap().scope, SymbolScope::Global);
        assert_eq!(table.resolve("b").unwrap(), sym("b", 0, Mutability::Var, SymbolScope::Free));
        assert_eq!(table.resolve("a").unwrap(), sym("a", 1, Mutability::Let, SymbolScope::Free));
        // Resolving again reuses the captured slot.
        assert_eq!(table.resolve("b").unwrap().index, 0);
        assert_eq!(table.resolve("c").unwrap().scope, SymbolScope::Local);

        let (free, locals) = table.leave().unwrap();
        assert_eq!(locals, 1);
        assert_eq!(
            free,
            vec![
                sym("b", 1, Mutability::Var, SymbolScope::Local),
                sym("a", 0, Mutability::Let, SymbolScope::Local),
            ]
        );
    }

    #[test]
    fn nested_capture_threads_through_middle_scope() {
        let mut table = SymbolTable::new();
        table.enter();
        table.define("a", Mutability::Let).unwrap();
        table.enter();
        table.enter();
        assert_eq!(table.resolve("a").unwrap().scope, SymbolScope::Free);

        let (innermost, _) = table.leave().unwrap();
        assert_eq!(innermost, vec![sym("a", 0, Mutability::Let, SymbolScope::Free)]);
        let (middle, _) = table.leave().unwrap();
        assert_eq!(middle, vec![sym("a", 0, Mutability::Let, SymbolScope::Local)]);
    }

    #[test]
    fn function_name_resolves_to_itself_and_is_captured() {
        let mut table = SymbolTable::new();
        table.enter();
        table.define_function_name("f", Mutability::Let);
        assert_eq!(table.resolve("f").unwrap().scope, SymbolScope::Function);
        table.enter();
        assert_eq!(table.resolve("f").unwrap().scope, SymbolScope::Free);
        let (free, _) = table.leave().unwrap();
        assert_eq!(free[0].scope, SymbolScope::Function);
    }

    #[test]
    fn function_name_keeps_declared_mutability() {
        let mut table = SymbolTable::new();
        table.enter();
        table.define_function_name("g", Mutability::Var);
        assert_eq!(table.resolve("g").unwrap(), sym("g", 0, Mutability::Var, SymbolScope::Function));
    }

    #[test]
    fn undefined_name() {
        let mut table = SymbolTable::new();
        assert_eq!(table.resolve("nope"), Err(SymbolError::UndefinedName("nope".into())));
    }
}
