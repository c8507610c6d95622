//! hermes: a bytecode compiler, stack virtual machine and program file format
//! for the Monkey language.
//!
//! ```text
//! source -> lexer -> parser -> compiler -> Bytecode -> Vm
//!                                             |
//!                                          .hbc file
//! ```

pub mod ast;
pub mod binary;
pub mod code;
pub mod codec;
pub mod compiler;
pub mod lexer;
pub mod parser;
pub mod session;
pub mod value;
pub mod vm;

use ast::{Program, SourceMap, Span};
use binary::LoadError;
use compiler::CompileError;
use lexer::LexError;
use parser::ParseError;
use vm::VmError;

pub use compiler::{Bytecode, Compiler};
pub use session::Session;
pub use value::Value;
pub use vm::{MonkeyOperations, Vm, VmOperations};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{}", first_message(.0))]
    Parse(Vec<ParseError>),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

fn first_message(errors: &[ParseError]) -> String {
    match errors {
        [] => "parse failed".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

impl From<Vec<ParseError>> for Error {
    fn from(errors: Vec<ParseError>) -> Self {
        Error::Parse(errors)
    }
}

impl Error {
    /// Source location of the error, when it has one. Runtime and file
    /// errors do not.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Lex(e) => Some(Span::new(e.position, e.position + e.snippet.len().max(1))),
            Error::Parse(errors) => errors.first().map(|e| e.span),
            Error::Compile(e) => Some(e.span()),
            Error::Vm(_) | Error::Load(_) => None,
        }
    }

    /// Human-readable report pointing into `source`:
    ///
    /// ```text
    /// error: undefined name: b
    ///  --> main.mk:2:1
    ///   |
    /// 2 | b
    ///   | ^
    /// ```
    pub fn render(&self, source: &str, file: Option<&str>) -> String {
        let mut out = format!("error: {}\n", self);
        let Some(span) = self.span() else {
            return out;
        };
        let map = SourceMap::new(source);
        let position = map.position(span, file);
        let line_text = map.line_text(position.line);

        let gutter = position.line.to_string().len();
        let pad = " ".repeat(gutter);
        let width = map.width(span);
        out.push_str(&format!("{pad}--> {}\n", position));
        out.push_str(&format!("{pad} |\n"));
        out.push_str(&format!("{} | {}\n", position.line, line_text));
        out.push_str(&format!(
            "{pad} | {}{}\n",
            " ".repeat(position.column.saturating_sub(1)),
            "^".repeat(width)
        ));
        out
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lex and parse `source`.
pub fn parse(source: &str) -> Result<Program> {
    let tokens = lexer::lex(source)?;
    let mut program = parser::parse_tokens(tokens)?;
    program.source = Some(source.to_string());
    Ok(program)
}

/// Compile `source` into a fresh [`Bytecode`] artifact.
pub fn compile(source: &str) -> Result<Bytecode> {
    let program = parse(source)?;
    let mut compiler = Compiler::new();
    compiler.compile(&program)?;
    Ok(compiler.into_parts().0)
}

/// Compile and run `source`, returning the value of the last expression
/// statement (null when there is none).
pub fn run(source: &str) -> Result<Value> {
    let bytecode = compile(source)?;
    let mut vm = Vm::new(bytecode, MonkeyOperations);
    vm.run()?;
    Ok(vm.last_popped().cloned().unwrap_or(Value::Null))
}
