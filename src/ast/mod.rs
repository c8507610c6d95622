use std::fmt;

use serde::Serialize;

pub mod source_map;
pub use source_map::{Position, SourceMap};

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span { start: range.start, end: range.end }
    }
}

/// Wraps a node with its source span. Transparent to serde (serializes as inner node only).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }

    pub fn unknown(node: T) -> Self {
        Spanned { node, span: Span::UNKNOWN }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

impl<T: fmt::Display> fmt::Display for Spanned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.fmt(f)
    }
}

// ---- Core AST types ----

/// Binding keyword: `let` bindings are constant, `var` bindings can be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Mutability {
    Let,
    Var,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::Let => write!(f, "let"),
            Mutability::Var => write!(f, "var"),
        }
    }
}

pub type Expression = Spanned<Expr>;
pub type Statement = Spanned<Stmt>;

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    /// `let name = expr;` or `var name = expr;`
    Declare {
        mutability: Mutability,
        name: String,
        value: Expression,
    },

    /// `name = expr;`
    Assign { name: String, value: Expression },

    /// `return expr;`
    Return(Expression),

    /// Expression as statement
    Expr(Expression),
}

/// A `{ ... }` body. Blocks do not open a new binding scope.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Block {
    pub statements: Vec<Statement>,
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Identifier(String),
    Integer(i32),
    Float(f64),
    Boolean(bool),
    String(String),

    /// `-x`, `!x`
    Prefix {
        operator: String,
        right: Box<Expression>,
    },

    /// `a + b`, `a < b`, ...
    Infix {
        operator: String,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// `if (cond) { ... } else { ... }`
    If {
        condition: Box<Expression>,
        consequence: Block,
        alternative: Option<Block>,
    },

    /// `fn(a, b) { ... }`. `name` is filled in when the literal is bound by
    /// a declaration, so the body can refer to itself.
    Function {
        name: Option<String>,
        parameters: Vec<String>,
        body: Block,
    },

    /// `callee(args...)`
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },

    /// `[a, b, c]`
    Array(Vec<Expression>),

    /// `{k: v, ...}` in source order
    Hash(Vec<(Expression, Expression)>),

    /// `target[index]`
    Index {
        left: Box<Expression>,
        index: Box<Expression>,
    },
}

/// A complete program is a list of top-level statements
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Program {
    pub statements: Vec<Statement>,
    #[serde(skip)]
    pub source: Option<String>,
}

// ---- Source-like rendering ----
//
// The compiler sorts hash literal pairs by this rendering of the key, so it
// must stay stable.

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Identifier(name) => write!(f, "{}", name),
            Expr::Integer(n) => write!(f, "{}", n),
            Expr::Float(n) => write!(f, "{:?}", n),
            Expr::Boolean(b) => write!(f, "{}", b),
            Expr::String(s) => write!(f, "{}", s),
            Expr::Prefix { operator, right } => write!(f, "({}{})", operator, right),
            Expr::Infix { operator, left, right } => write!(f, "({} {} {})", left, operator, right),
            Expr::If { condition, consequence, alternative } => {
                write!(f, "if{} {}", condition, consequence)?;
                if let Some(alt) = alternative {
                    write!(f, "else {}", alt)?;
                }
                Ok(())
            }
            Expr::Function { name, parameters, body } => {
                write!(f, "fn")?;
                if let Some(name) = name {
                    write!(f, "<{}>", name)?;
                }
                write!(f, "(")?;
                join(f, parameters)?;
                write!(f, ") {}", body)
            }
            Expr::Call { function, arguments } => {
                write!(f, "{}(", function)?;
                join(f, arguments)?;
                write!(f, ")")
            }
            Expr::Array(elements) => {
                write!(f, "[")?;
                join(f, elements)?;
                write!(f, "]")
            }
            Expr::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "}}")
            }
            Expr::Index { left, index } => write!(f, "({}[{}])", left, index),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Declare { mutability, name, value } => write!(f, "{} {} = {};", mutability, name, value),
            Stmt::Assign { name, value } => write!(f, "{} = {};", name, value),
            Stmt::Return(value) => write!(f, "return {};", value),
            Stmt::Expr(expr) => write!(f, "{}", expr),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expression> {
        Box::new(Spanned::unknown(Expr::Identifier(name.to_string())))
    }

    #[test]
    fn span_unknown_is_zero() {
        assert_eq!(Span::UNKNOWN, Span { start: 0, end: 0 });
    }

    #[test]
    fn span_merge_takes_extremes() {
        let a = Span { start: 5, end: 10 };
        let b = Span { start: 2, end: 15 };
        assert_eq!(a.merge(b), Span { start: 2, end: 15 });
    }

    #[test]
    fn span_from_range() {
        assert_eq!(Span::from(3..7), Span::new(3, 7));
    }

    #[test]
    fn spanned_deref() {
        let s = Spanned::new(42, Span { start: 0, end: 2 });
        assert_eq!(*s, 42);
    }

    #[test]
    fn spanned_serialize_transparent() {
        let s = Spanned::new(42i32, Span { start: 5, end: 10 });
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn display_infix_is_parenthesised() {
        let expr = Expr::Infix {
            operator: "+".to_string(),
            left: ident("a"),
            right: Box::new(Spanned::unknown(Expr::Prefix {
                operator: "-".to_string(),
                right: ident("b"),
            })),
        };
        assert_eq!(expr.to_string(), "(a + (-b))");
    }

    #[test]
    fn display_declare_statement() {
        let stmt = Stmt::Declare {
            mutability: Mutability::Var,
            name: "x".to_string(),
            value: Spanned::unknown(Expr::Integer(5)),
        };
        assert_eq!(stmt.to_string(), "var x = 5;");
    }

    #[test]
    fn display_string_literal_has_no_quotes() {
        assert_eq!(Expr::String("foo".into()).to_string(), "foo");
    }

    #[test]
    fn program_source_not_serialized() {
        let prog = Program {
            statements: vec![Spanned::unknown(Stmt::Expr(Spanned::unknown(Expr::Integer(1))))],
            source: Some("1".to_string()),
        };
        let json = serde_json::to_string(&prog).unwrap();
        assert_eq!(json, r#"{"statements":[{"Expr":{"Integer":1}}]}"#);
    }
}
