use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn precedence_of(token: &Token) -> Precedence {
    match token {
        Token::Eq | Token::NotEq => Precedence::Equals,
        Token::Lt | Token::LtEq | Token::Gt | Token::GtEq => Precedence::LessGreater,
        Token::Plus | Token::Minus => Precedence::Sum,
        Token::Asterisk | Token::Slash => Precedence::Product,
        Token::LParen => Precedence::Call,
        Token::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .or_else(|| self.tokens.last().map(|(_, s)| Span::new(s.end, s.end)))
            .unwrap_or(Span::UNKNOWN)
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            return Span::UNKNOWN;
        }
        self.tokens
            .get(self.pos - 1)
            .map(|(_, s)| *s)
            .unwrap_or(Span::UNKNOWN)
    }

    fn token_at(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error(format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error(format!("expected {:?}, got EOF", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error(format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("expected identifier, got EOF".into())),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Top-level parsing ----

    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut statements = Vec::new();
        let mut errors: Vec<ParseError> = Vec::new();
        const MAX_ERRORS: usize = 20;

        while !self.at_end() {
            if errors.len() >= MAX_ERRORS {
                break;
            }
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    errors.push(e);
                    self.sync_to_statement_boundary();
                }
            }
        }

        (Program { statements, source: None }, errors)
    }

    /// Skip past the next `;` at brace depth zero (or to EOF).
    fn sync_to_statement_boundary(&mut self) {
        let mut depth: usize = 0;
        while let Some(tok) = self.peek() {
            match tok {
                Token::LBrace => depth += 1,
                Token::RBrace => depth = depth.saturating_sub(1),
                Token::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.peek_span();
        let stmt = match self.peek() {
            Some(Token::Let) => self.parse_declare(Mutability::Let)?,
            Some(Token::Var) => self.parse_declare(Mutability::Var)?,
            Some(Token::Return) => {
                self.advance();
                Stmt::Return(self.parse_expression(Precedence::Lowest)?)
            }
            Some(Token::Ident(_)) if self.token_at(self.pos + 1) == Some(&Token::Assign) => {
                let name = self.expect_ident()?;
                self.expect(&Token::Assign)?;
                let value = self.parse_expression(Precedence::Lowest)?;
                Stmt::Assign { name, value }
            }
            _ => Stmt::Expr(self.parse_expression(Precedence::Lowest)?),
        };
        let span = start.merge(self.prev_span());
        self.eat(&Token::Semicolon);
        Ok(Spanned::new(stmt, span))
    }

    /// `let name = expr` / `var name = expr`
    fn parse_declare(&mut self, mutability: Mutability) -> Result<Stmt> {
        self.advance();
        let name = self.expect_ident()?;
        self.expect(&Token::Assign)?;
        let mut value = self.parse_expression(Precedence::Lowest)?;
        if let Expr::Function { name: fn_name, .. } = &mut value.node {
            *fn_name = Some(name.clone());
        }
        Ok(Stmt::Declare { mutability, name, value })
    }

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(&Token::LBrace)?;
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    return Ok(Block { statements });
                }
                None => return Err(self.error("expected '}' to close block, got EOF".into())),
                _ => statements.push(self.parse_statement()?),
            }
        }
    }

    // ---- Expressions ----

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression> {
        let mut left = self.parse_prefix()?;

        while let Some(tok) = self.peek() {
            if *tok == Token::Semicolon || precedence >= precedence_of(tok) {
                break;
            }
            left = match tok {
                Token::LParen => self.parse_call(left)?,
                Token::LBracket => self.parse_index(left)?,
                _ => self.parse_infix(left)?,
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression> {
        let start = self.peek_span();
        let tok = match self.peek().cloned() {
            Some(tok) => tok,
            None => return Err(self.error("expected expression, got EOF".into())),
        };

        let expr = match tok {
            Token::Ident(name) => {
                self.advance();
                Expr::Identifier(name)
            }
            Token::Int(n) => {
                self.advance();
                Expr::Integer(n)
            }
            Token::Float(n) => {
                self.advance();
                Expr::Float(n)
            }
            Token::Str(s) => {
                self.advance();
                Expr::String(s)
            }
            Token::True | Token::False => {
                self.advance();
                Expr::Boolean(tok == Token::True)
            }
            Token::Bang | Token::Minus => {
                self.advance();
                let right = self.parse_expression(Precedence::Prefix)?;
                Expr::Prefix {
                    operator: tok.operator().unwrap_or_default().to_string(),
                    right: Box::new(right),
                }
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression(Precedence::Lowest)?;
                self.expect(&Token::RParen)?;
                return Ok(Spanned::new(inner.node, start.merge(self.prev_span())));
            }
            Token::If => self.parse_if()?,
            Token::Function => self.parse_function()?,
            Token::LBracket => {
                self.advance();
                Expr::Array(self.parse_expression_list(&Token::RBracket)?)
            }
            Token::LBrace => self.parse_hash()?,
            other => return Err(self.error(format!("expected expression, got {:?}", other))),
        };

        Ok(Spanned::new(expr, start.merge(self.prev_span())))
    }

    fn parse_infix(&mut self, left: Expression) -> Result<Expression> {
        let tok = self.advance().cloned();
        let operator = match tok.as_ref().and_then(Token::operator) {
            Some(op) => op.to_string(),
            None => return Err(self.error(format!("expected infix operator, got {:?}", tok))),
        };
        let precedence = tok.as_ref().map(precedence_of).unwrap_or(Precedence::Lowest);
        let right = self.parse_expression(precedence)?;
        let span = left.span.merge(right.span);
        Ok(Spanned::new(
            Expr::Infix { operator, left: Box::new(left), right: Box::new(right) },
            span,
        ))
    }

    fn parse_call(&mut self, function: Expression) -> Result<Expression> {
        self.expect(&Token::LParen)?;
        let arguments = self.parse_expression_list(&Token::RParen)?;
        let span = function.span.merge(self.prev_span());
        Ok(Spanned::new(Expr::Call { function: Box::new(function), arguments }, span))
    }

    fn parse_index(&mut self, left: Expression) -> Result<Expression> {
        self.expect(&Token::LBracket)?;
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect(&Token::RBracket)?;
        let span = left.span.merge(self.prev_span());
        Ok(Spanned::new(Expr::Index { left: Box::new(left), index: Box::new(index) }, span))
    }

    /// Comma-separated expressions up to `end`; the opening delimiter is already consumed.
    fn parse_expression_list(&mut self, end: &Token) -> Result<Vec<Expression>> {
        let mut items = Vec::new();
        if self.eat(end) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression(Precedence::Lowest)?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(end)?;
        Ok(items)
    }

    /// `if (cond) { ... } else { ... }`
    fn parse_if(&mut self) -> Result<Expr> {
        self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(&Token::RParen)?;
        let consequence = self.parse_block()?;
        let alternative = if self.eat(&Token::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expr::If { condition: Box::new(condition), consequence, alternative })
    }

    /// `fn(a, b) { ... }`
    fn parse_function(&mut self) -> Result<Expr> {
        self.expect(&Token::Function)?;
        self.expect(&Token::LParen)?;
        let mut parameters = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                parameters.push(self.expect_ident()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }
        let body = self.parse_block()?;
        Ok(Expr::Function { name: None, parameters, body })
    }

    /// `{k: v, ...}`
    fn parse_hash(&mut self) -> Result<Expr> {
        self.expect(&Token::LBrace)?;
        let mut pairs = Vec::new();
        while !self.eat(&Token::RBrace) {
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect(&Token::Colon)?;
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace)?;
                break;
            }
        }
        Ok(Expr::Hash(pairs))
    }
}

/// Parse a token stream; all recoverable errors are collected.
pub fn parse(tokens: Vec<(Token, std::ops::Range<usize>)>) -> (Program, Vec<ParseError>) {
    let tokens = tokens.into_iter().map(|(t, r)| (t, Span::from(r))).collect();
    Parser::new(tokens).parse_program()
}

/// Parse a token stream, failing if any error was found.
pub fn parse_tokens(tokens: Vec<(Token, std::ops::Range<usize>)>) -> std::result::Result<Program, Vec<ParseError>> {
    let (program, errors) = parse(tokens);
    if errors.is_empty() {
        Ok(program)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_str(source: &str) -> Program {
        let tokens = lex(source).unwrap();
        match parse_tokens(tokens) {
            Ok(p) => p,
            Err(errors) => panic!("parse errors: {:?}", errors),
        }
    }

    fn parse_str_errors(source: &str) -> (Program, Vec<ParseError>) {
        parse(lex(source).unwrap())
    }

    fn single_expr(source: &str) -> Expr {
        let program = parse_str(source);
        assert_eq!(program.statements.len(), 1, "program: {}", program);
        match &program.statements[0].node {
            Stmt::Expr(e) => e.node.clone(),
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn parse_let_and_var() {
        let program = parse_str("let x = 5; var y = x;");
        assert_eq!(program.statements.len(), 2);
        match &program.statements[0].node {
            Stmt::Declare { mutability, name, value } => {
                assert_eq!(*mutability, Mutability::Let);
                assert_eq!(name, "x");
                assert_eq!(value.node, Expr::Integer(5));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.statements[1].node {
            Stmt::Declare { mutability, .. } => assert_eq!(*mutability, Mutability::Var),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_assignment() {
        let program = parse_str("a = 10;");
        match &program.statements[0].node {
            Stmt::Assign { name, value } => {
                assert_eq!(name, "a");
                assert_eq!(value.node, Expr::Integer(10));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_return() {
        let program = parse_str("return 1 + 2;");
        assert_eq!(program.to_string(), "return (1 + 2);");
    }

    #[test]
    fn operator_precedence() {
        let cases = [
            ("-a * b", "((-a) * b)"),
            ("!-a", "(!(-a))"),
            ("a + b * c + d / e - f", "(((a + (b * c)) + (d / e)) - f)"),
            ("5 > 4 == 3 < 4", "((5 > 4) == (3 < 4))"),
            ("1 + (2 + 3) + 4", "((1 + (2 + 3)) + 4)"),
            ("a * [1, 2, 3, 4][b * c] * d", "((a * ([1, 2, 3, 4][(b * c)])) * d)"),
            ("add(a, b, 1, 2 * 3, add(6, 7 * 8))", "add(a, b, 1, (2 * 3), add(6, (7 * 8)))"),
            ("a <= b != c >= d", "((a <= b) != (c >= d))"),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_str(input).to_string(), expected, "input: {}", input);
        }
    }

    #[test]
    fn parse_if_else() {
        match single_expr("if (x < y) { x } else { y }") {
            Expr::If { condition, consequence, alternative } => {
                assert_eq!(condition.to_string(), "(x < y)");
                assert_eq!(consequence.statements.len(), 1);
                assert!(alternative.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_function_literal_named_by_let() {
        let program = parse_str("let add = fn(a, b) { a + b };");
        match &program.statements[0].node {
            Stmt::Declare { value, .. } => match &value.node {
                Expr::Function { name, parameters, body } => {
                    assert_eq!(name.as_deref(), Some("add"));
                    assert_eq!(parameters, &["a".to_string(), "b".to_string()]);
                    assert_eq!(body.statements.len(), 1);
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_empty_function() {
        match single_expr("fn() {}") {
            Expr::Function { parameters, body, .. } => {
                assert!(parameters.is_empty());
                assert!(body.statements.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_hash_literal() {
        match single_expr(r#"{"one": 1, "two": 2}"#) {
            Expr::Hash(pairs) => {
                assert_eq!(pairs.len(), 2);
                assert_eq!(pairs[0].0.node, Expr::String("one".into()));
                assert_eq!(pairs[1].1.node, Expr::Integer(2));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(single_expr("{}"), Expr::Hash(vec![]));
    }

    #[test]
    fn parse_empty_array_and_index() {
        assert_eq!(single_expr("[]"), Expr::Array(vec![]));
        assert!(matches!(single_expr("xs[0]"), Expr::Index { .. }));
    }

    #[test]
    fn expression_spans_cover_source() {
        let program = parse_str("  1 + 22");
        match &program.statements[0].node {
            Stmt::Expr(e) => assert_eq!(e.span, Span::new(2, 8)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn error_recovery_continues_after_semicolon() {
        let (program, errors) = parse_str_errors("let = 1; let b = 2;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("expected identifier"));
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn unclosed_block_is_error() {
        let (_, errors) = parse_str_errors("if (true) { 1");
        assert!(!errors.is_empty());
    }
}
