//! Rho: human-writable statement syntax
//!
//! Statements are separated by newlines or `;`. Newlines inside `()` and
//! `[]` do not end a statement.

use super::Builder;
use super::lexer::{Spanned, Sym, Token};
use super::pi::describe;
use crate::continuation::{Continuation, Op, Path};
use crate::error::{PyroError, Result};
use crate::exec::{RED_ZONE, STACK_SEGMENT};
use crate::value::{Closure, Value};

/// Binary operators by precedence, loosest first
const LEVELS: &[&[(Sym, Op)]] = &[
    &[(Sym::Or, Op::Or)],
    &[(Sym::And, Op::And)],
    &[(Sym::Eq, Op::Eq), (Sym::Ne, Op::Ne)],
    &[
        (Sym::Lt, Op::Lt),
        (Sym::Le, Op::Le),
        (Sym::Gt, Op::Gt),
        (Sym::Ge, Op::Ge),
    ],
    &[(Sym::Plus, Op::Add), (Sym::Minus, Op::Sub)],
    &[(Sym::Star, Op::Mul), (Sym::Slash, Op::Div), (Sym::Percent, Op::Rem)],
];

const FUN: &str = "fun";

pub(crate) fn parse(tokens: Vec<Spanned>, builder: Builder<'_>) -> Result<Continuation> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
        builder,
    };
    let statements = parser.statements(Token::Eof)?;
    Ok(Continuation::sequence(statements))
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Open `(` / `[` count; newlines are skipped while above zero
    nesting: usize,
    builder: Builder<'a>,
}

impl Parser<'_> {
    fn skip_newlines(&mut self) {
        while self.tokens[self.pos].token == Token::Newline {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Token {
        if self.nesting > 0 {
            self.skip_newlines();
        }
        self.tokens[self.pos].token.clone()
    }

    fn peek_raw_at(&self, offset: usize) -> &Token {
        let at = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[at].token
    }

    fn advance(&mut self) -> Spanned {
        if self.nesting > 0 {
            self.skip_newlines();
        }
        let spanned = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        spanned
    }

    fn check(&mut self, sym: Sym) -> bool {
        self.peek() == Token::Sym(sym)
    }

    fn position(&self) -> (usize, usize) {
        let here = &self.tokens[self.pos];
        (here.line, here.column)
    }

    fn error(&mut self, message: impl Into<String>) -> PyroError {
        if self.nesting > 0 {
            self.skip_newlines();
        }
        let (line, column) = self.position();
        PyroError::syntax(line, column, message)
    }

    fn expect(&mut self, sym: Sym, what: &str) -> Result<()> {
        if self.check(sym) {
            self.advance();
            Ok(())
        } else {
            let found = describe(&self.peek());
            Err(self.error(format!("expected {}, found {}", what, found)))
        }
    }

    fn statements(&mut self, terminator: Token) -> Result<Vec<Continuation>> {
        let mut statements = Vec::new();
        loop {
            while matches!(self.peek(), Token::Newline | Token::Sym(Sym::Semi)) {
                self.advance();
            }
            if self.peek() == terminator || self.peek() == Token::Eof {
                return Ok(statements);
            }
            statements.push(self.statement()?);
            match self.peek() {
                Token::Newline | Token::Sym(Sym::Semi) => {}
                token if token == terminator => {}
                other => {
                    return Err(self.error(format!("expected end of statement, found {}", describe(&other))));
                }
            }
        }
    }

    fn statement(&mut self) -> Result<Continuation> {
        match (self.peek(), self.peek_raw_at(1).clone()) {
            (Token::Ident(keyword), Token::Ident(name)) if keyword == FUN => {
                self.advance();
                self.advance();
                self.builder.define(&name);
                let function = self.function_rest()?;
                Ok(Continuation::bind(name, function))
            }
            (Token::Ident(name), Token::Sym(Sym::Assign)) => {
                self.advance();
                self.advance();
                self.builder.define(&name);
                let value = self.expr()?;
                Ok(Continuation::bind(name, value))
            }
            _ => self.expr(),
        }
    }

    fn expr(&mut self) -> Result<Continuation> {
        self.nested(|parser| parser.binary(0))
    }

    /// Run `parse` one nesting level deeper
    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<Continuation>) -> Result<Continuation> {
        let (line, column) = self.position();
        self.builder.descend(line, column)?;
        let result = stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, || parse(self));
        self.builder.ascend();
        result
    }

    fn binary(&mut self, level: usize) -> Result<Continuation> {
        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };
        let mut lhs = self.binary(level + 1)?;
        loop {
            let op = match self.peek() {
                Token::Sym(sym) => ops.iter().find(|(s, _)| *s == sym).map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else {
                return Ok(lhs);
            };
            self.advance();
            let rhs = self.binary(level + 1)?;
            lhs = Continuation::op(op, vec![lhs, rhs]);
        }
    }

    fn unary(&mut self) -> Result<Continuation> {
        match self.peek() {
            Token::Sym(Sym::Bang) => {
                self.advance();
                let operand = self.nested(Self::unary)?;
                Ok(Continuation::op(Op::Not, vec![operand]))
            }
            Token::Sym(Sym::Minus) => {
                self.advance();
                match self.nested(Self::unary)? {
                    Continuation::Literal(Value::Int(i)) => Ok(Continuation::Literal(Value::Int(-i))),
                    Continuation::Literal(Value::Float(x)) => {
                        Ok(Continuation::Literal(Value::Float(-x)))
                    }
                    operand => Ok(Continuation::op(Op::Neg, vec![operand])),
                }
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Continuation> {
        let Spanned {
            token,
            line,
            column,
        } = self.advance();

        match token {
            Token::Int(i) => Ok(Continuation::Literal(Value::Int(i))),
            Token::Float(x) => Ok(Continuation::Literal(Value::Float(x))),
            Token::Str(s) => Ok(Continuation::Literal(Value::Str(s))),
            Token::Ident(name) if name == "true" => Ok(Continuation::Literal(Value::Bool(true))),
            Token::Ident(name) if name == "false" => Ok(Continuation::Literal(Value::Bool(false))),
            Token::Ident(name) if name == FUN => self.function_rest(),
            Token::Ident(name) => self.path(name, line, column),
            Token::Sym(Sym::LParen) => {
                self.nesting += 1;
                let inner = self.expr()?;
                self.expect(Sym::RParen, "')'")?;
                self.nesting -= 1;
                Ok(inner)
            }
            Token::Sym(Sym::LBracket) => {
                self.nesting += 1;
                let items = self.comma_separated(Sym::RBracket)?;
                self.nesting -= 1;
                Ok(self.builder.list(items))
            }
            Token::Sym(Sym::LBrace) => {
                self.builder.open_body();
                let body = self.block_rest()?;
                self.builder.close_body();
                Ok(Continuation::Literal(Value::Closure(Closure::new(vec![], body))))
            }
            other => Err(PyroError::syntax(
                line,
                column,
                format!("expected expression, found {}", describe(&other)),
            )),
        }
    }

    fn path(&mut self, first: String, line: usize, column: usize) -> Result<Continuation> {
        let mut segments = vec![first];
        while self.check(Sym::Dot) {
            self.advance();
            match self.advance().token {
                Token::Ident(name) => segments.push(name),
                other => {
                    return Err(PyroError::syntax(
                        line,
                        column,
                        format!("expected member name after '.', found {}", describe(&other)),
                    ));
                }
            }
        }
        let path = Path::new(segments);

        if self.check(Sym::LParen) {
            self.advance();
            self.nesting += 1;
            let args = self.comma_separated(Sym::RParen)?;
            self.nesting -= 1;
            self.builder.call(path, args, line, column)
        } else {
            self.builder.reference(path, line, column)
        }
    }

    /// Expressions up to and including `close`; a trailing comma is allowed
    fn comma_separated(&mut self, close: Sym) -> Result<Vec<Continuation>> {
        let mut items = Vec::new();
        loop {
            if self.check(close) {
                self.advance();
                return Ok(items);
            }
            if self.peek() == Token::Eof {
                return Err(self.error("unexpected end of input, unclosed delimiter"));
            }
            items.push(self.expr()?);
            if self.check(Sym::Comma) {
                self.advance();
            } else if !self.check(close) {
                let found = describe(&self.peek());
                return Err(self.error(format!("expected ',' or closing delimiter, found {}", found)));
            }
        }
    }

    /// `(params) { body }` after the `fun` keyword and optional name
    fn function_rest(&mut self) -> Result<Continuation> {
        self.expect(Sym::LParen, "'(' after fun")?;
        self.builder.open_body();
        self.nesting += 1;
        let mut params = Vec::new();
        loop {
            match self.advance().token {
                Token::Sym(Sym::RParen) => break,
                Token::Ident(name) => {
                    self.builder.define(&name);
                    params.push(name);
                    if self.check(Sym::Comma) {
                        self.advance();
                    }
                }
                other => {
                    return Err(self.error(format!("expected parameter name, found {}", describe(&other))));
                }
            }
        }
        self.nesting -= 1;
        self.expect(Sym::LBrace, "'{'")?;
        let body = self.block_rest()?;
        self.builder.close_body();
        Ok(Continuation::Literal(Value::Closure(Closure::new(params, body))))
    }

    /// Statements up to the closing `}`; the `{` is already consumed
    fn block_rest(&mut self) -> Result<Continuation> {
        let saved = self.nesting;
        self.nesting = 0;
        let statements = self.statements(Token::Sym(Sym::RBrace))?;
        if !self.check(Sym::RBrace) {
            return Err(self.error("unclosed '{'"));
        }
        self.advance();
        self.nesting = saved;
        Ok(Continuation::sequence(statements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::Head;
    use crate::language::lexer::tokenize;
    use crate::registry::Registry;
    use crate::scope::Scope;

    fn parse_rho(source: &str, scope: &Scope) -> Result<Continuation> {
        let registry = Registry::new();
        parse(tokenize(source)?, Builder::new(scope, &registry))
    }

    #[test]
    fn test_precedence() {
        let scope = Scope::new();
        let cont = parse_rho("1 + 2 * 3 == 7 && true", &scope).unwrap().unwrap_single();
        match cont {
            Continuation::Call {
                head: Head::Op(Op::And),
                args,
            } => assert!(matches!(
                &args[0],
                Continuation::Call {
                    head: Head::Op(Op::Eq),
                    ..
                }
            )),
            other => panic!("Expected && at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_separators() {
        let scope = Scope::new();
        let cont = parse_rho("a = 1; b = 2\n\n a + b\n", &scope).unwrap();
        assert_eq!(cont.statement_count(), 3);
    }

    #[test]
    fn test_newlines_inside_parens_are_ignored() {
        let scope = Scope::new();
        scope.set("f", 0i64);
        let cont = parse_rho("f(1,\n  2,\n)\n[3,\n4]", &scope).unwrap();
        assert_eq!(cont.statement_count(), 2);
    }

    #[test]
    fn test_named_function_can_recurse() {
        let scope = Scope::new();
        let source = "fun count(n) {\n  n > 0 && count(n - 1)\n}\ncount(3)";
        let cont = parse_rho(source, &scope).unwrap();
        assert_eq!(cont.statement_count(), 2);
    }

    #[test]
    fn test_errors() {
        let scope = Scope::new();
        scope.set("f", 0i64);
        assert!(parse_rho("f(1, 2", &scope).is_err());
        assert!(parse_rho("(1 + 2", &scope).is_err());
        assert!(parse_rho("1 +", &scope).is_err());
        assert!(parse_rho("fun (a) { a", &scope).is_err());
        assert!(parse_rho("1 2", &scope).is_err());
        match parse_rho("x = 1\ny + x", &scope) {
            Err(PyroError::UnknownIdentifier { name, line, column }) => {
                assert_eq!(name, "y");
                assert_eq!((line, column), (2, 1));
            }
            other => panic!("Expected unknown identifier, got {:?}", other),
        }
    }
}
