//! Pi: compact term syntax
//!
//! ```text
//! script  := term*
//! term    := literal | '-' number | path | path '=' term
//!          | path '(' args ')' | op '(' args ')'
//!          | '[' term* ']' | '{' ('|' ident* '|')? term* '}'
//! args    := (term (',' term)*)?
//! ```
//!
//! Everything the registry encodes is a Pi term, and every continuation
//! renders back to Pi through [`render`].

use super::Builder;
use super::lexer::{Spanned, Sym, Token};
use crate::continuation::{Continuation, Head, Op, Path};
use crate::error::{PyroError, Result};
use crate::exec::{RED_ZONE, STACK_SEGMENT};
use crate::registry::Registry;
use crate::value::{Closure, Value};

pub(crate) fn parse(tokens: Vec<Spanned>, builder: Builder<'_>) -> Result<Continuation> {
    let tokens = tokens
        .into_iter()
        .filter(|t| t.token != Token::Newline)
        .collect();
    let mut parser = Parser {
        tokens,
        pos: 0,
        builder,
    };
    let mut terms = Vec::new();
    while parser.peek() != &Token::Eof {
        terms.push(parser.term()?);
    }
    Ok(Continuation::sequence(terms))
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    builder: Builder<'a>,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn advance(&mut self) -> Spanned {
        let spanned = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        spanned
    }

    fn error(&self, message: impl Into<String>) -> PyroError {
        let here = &self.tokens[self.pos];
        PyroError::syntax(here.line, here.column, message)
    }

    fn expect(&mut self, sym: Sym, what: &str) -> Result<()> {
        if self.peek() == &Token::Sym(sym) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", what, describe(self.peek()))))
        }
    }

    /// One term, nested inside whatever term is being parsed
    fn term(&mut self) -> Result<Continuation> {
        let here = &self.tokens[self.pos];
        let (line, column) = (here.line, here.column);
        self.builder.descend(line, column)?;
        let term = stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, || self.term_at_depth());
        self.builder.ascend();
        term
    }

    fn term_at_depth(&mut self) -> Result<Continuation> {
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
            Token::Ident(name) => self.path_term(name, line, column),

            Token::Sym(Sym::Minus) => match self.peek().clone() {
                Token::Int(i) => {
                    self.advance();
                    Ok(Continuation::Literal(Value::Int(-i)))
                }
                Token::Float(x) => {
                    self.advance();
                    Ok(Continuation::Literal(Value::Float(-x)))
                }
                _ => self.op_call(Sym::Minus, line, column),
            },
            Token::Sym(Sym::LBracket) => {
                let mut items = Vec::new();
                while self.peek() != &Token::Sym(Sym::RBracket) {
                    if self.peek() == &Token::Eof {
                        return Err(PyroError::syntax(line, column, "unclosed '['"));
                    }
                    items.push(self.term()?);
                }
                self.advance();
                Ok(self.builder.list(items))
            }
            Token::Sym(Sym::LBrace) => self.closure(line, column),
            Token::Sym(sym) if op_symbol(sym) => self.op_call(sym, line, column),
            other => Err(PyroError::syntax(
                line,
                column,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn path_term(&mut self, first: String, line: usize, column: usize) -> Result<Continuation> {
        let mut segments = vec![first];
        while self.peek() == &Token::Sym(Sym::Dot) {
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

        match self.peek() {
            Token::Sym(Sym::Assign) if path.is_single() => {
                self.advance();
                let name = path.root().to_string();
                self.builder.define(&name);
                let value = self.term()?;
                Ok(Continuation::bind(name, value))
            }
            Token::Sym(Sym::LParen) => {
                let args = self.args()?;
                self.builder.call(path, args, line, column)
            }
            _ => self.builder.reference(path, line, column),
        }
    }

    fn args(&mut self) -> Result<Vec<Continuation>> {
        self.expect(Sym::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek() == &Token::Sym(Sym::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.term()?);
            match self.peek() {
                Token::Sym(Sym::Comma) => {
                    self.advance();
                }
                Token::Sym(Sym::RParen) => {
                    self.advance();
                    return Ok(args);
                }
                other => {
                    return Err(self.error(format!("expected ',' or ')', found {}", describe(other))));
                }
            }
        }
    }

    fn op_call(&mut self, sym: Sym, line: usize, column: usize) -> Result<Continuation> {
        if self.peek() != &Token::Sym(Sym::LParen) {
            return Err(PyroError::syntax(
                line,
                column,
                "operator must be applied as op(args)",
            ));
        }
        let args = self.args()?;
        let op = match (sym, args.len()) {
            (Sym::Minus, 1) => Op::Neg,
            (Sym::Bang, 1) => Op::Not,
            (Sym::Bang, n) => return Err(arity_error(line, column, "!", 1, n)),
            (sym, 2) => binary_op(sym).ok_or_else(|| PyroError::syntax(line, column, "not an operator"))?,
            (sym, n) => {
                let symbol = binary_op(sym).map(Op::symbol).unwrap_or("?");
                return Err(arity_error(line, column, symbol, 2, n));
            }
        };
        Ok(Continuation::op(op, args))
    }

    fn closure(&mut self, line: usize, column: usize) -> Result<Continuation> {
        self.builder.open_body();
        let mut params = Vec::new();
        if self.peek() == &Token::Sym(Sym::Pipe) {
            self.advance();
            loop {
                match self.advance().token {
                    Token::Sym(Sym::Pipe) => break,
                    Token::Ident(name) => {
                        self.builder.define(&name);
                        params.push(name);
                    }
                    other => {
                        return Err(PyroError::syntax(
                            line,
                            column,
                            format!("expected parameter name, found {}", describe(&other)),
                        ));
                    }
                }
            }
        }
        let mut body = Vec::new();
        while self.peek() != &Token::Sym(Sym::RBrace) {
            if self.peek() == &Token::Eof {
                return Err(PyroError::syntax(line, column, "unclosed '{'"));
            }
            body.push(self.term()?);
        }
        self.advance();
        self.builder.close_body();
        Ok(Continuation::Literal(Value::Closure(Closure::new(
            params,
            Continuation::sequence(body),
        ))))
    }
}

fn op_symbol(sym: Sym) -> bool {
    sym == Sym::Bang || binary_op(sym).is_some()
}

pub(crate) fn binary_op(sym: Sym) -> Option<Op> {
    let op = match sym {
        Sym::Plus => Op::Add,
        Sym::Minus => Op::Sub,
        Sym::Star => Op::Mul,
        Sym::Slash => Op::Div,
        Sym::Percent => Op::Rem,
        Sym::Eq => Op::Eq,
        Sym::Ne => Op::Ne,
        Sym::Lt => Op::Lt,
        Sym::Le => Op::Le,
        Sym::Gt => Op::Gt,
        Sym::Ge => Op::Ge,
        Sym::And => Op::And,
        Sym::Or => Op::Or,
        _ => return None,
    };
    Some(op)
}

fn arity_error(line: usize, column: usize, symbol: &str, expected: usize, got: usize) -> PyroError {
    PyroError::syntax(
        line,
        column,
        format!("operator {} takes {} operands, got {}", symbol, expected, got),
    )
}

pub(crate) fn describe(token: &Token) -> String {
    match token {
        Token::Int(i) => format!("number {}", i),
        Token::Float(x) => format!("number {}", x),
        Token::Str(_) => "string".to_string(),
        Token::Ident(name) => format!("'{}'", name),
        Token::Sym(sym) => format!("{:?}", sym),
        Token::Newline => "end of line".to_string(),
        Token::Eof => "end of input".to_string(),
    }
}

/// Render a continuation as Pi text
pub fn render(registry: &Registry, continuation: &Continuation) -> String {
    let mut out = String::new();
    write_continuation(registry, &mut out, continuation);
    out
}

pub(crate) fn write_continuation(registry: &Registry, out: &mut String, continuation: &Continuation) {
    match continuation {
        Continuation::Literal(value) => registry.write_value(out, value),
        Continuation::Reference(path) => out.push_str(&path.to_string()),
        Continuation::Call { head, args } => match head {
            Head::Sequence => write_terms(registry, out, args, " "),
            Head::Bind(name) => {
                out.push_str(name);
                out.push_str(" = ");
                write_terms(registry, out, args, " ");
            }
            Head::Op(op) => write_applied(registry, out, op.symbol(), args),
            Head::Invoke(path) => write_applied(registry, out, &path.to_string(), args),
            Head::Construct(name) => write_applied(registry, out, name, args),
            Head::List => {
                out.push('[');
                write_terms(registry, out, args, " ");
                out.push(']');
            }
        },
    }
}

pub(crate) fn write_closure(
    registry: &Registry,
    out: &mut String,
    params: &[String],
    body: &Continuation,
) {
    out.push('{');
    if !params.is_empty() {
        out.push('|');
        out.push_str(&params.join(" "));
        out.push_str("| ");
    }
    write_continuation(registry, out, body);
    out.push('}');
}

fn write_applied(registry: &Registry, out: &mut String, head: &str, args: &[Continuation]) {
    out.push_str(head);
    out.push('(');
    write_terms(registry, out, args, ", ");
    out.push(')');
}

fn write_terms(registry: &Registry, out: &mut String, terms: &[Continuation], separator: &str) {
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        write_continuation(registry, out, term);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::lexer::tokenize;
    use crate::scope::Scope;

    fn parse_pi(source: &str, scope: &Scope) -> Result<Continuation> {
        let registry = Registry::new();
        parse(tokenize(source)?, Builder::new(scope, &registry))
    }

    #[test]
    fn test_wire_response_parses_as_literals() {
        let scope = Scope::new();
        let cont = parse_pi("1 2 \"three\" [4 [5]]", &scope).unwrap();
        assert_eq!(cont.statement_count(), 4);
    }

    #[test]
    fn test_closure_params_are_visible_in_body() {
        let scope = Scope::new();
        let cont = parse_pi("{|a b| +(a, b)}", &scope).unwrap().unwrap_single();
        match cont {
            Continuation::Literal(Value::Closure(closure)) => {
                assert_eq!(closure.params, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("Expected closure literal, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_delimiters() {
        let scope = Scope::new();
        scope.set("f", 0i64);
        assert!(parse_pi("f(1, 2", &scope).is_err());
        assert!(parse_pi("[1 2", &scope).is_err());
        assert!(parse_pi("{1", &scope).is_err());
        assert!(parse_pi(")", &scope).is_err());
        assert!(parse_pi("+(1)", &scope).is_err());
        assert!(parse_pi("+ 1", &scope).is_err());
    }

    #[test]
    fn test_render_operators_and_binds() {
        let scope = Scope::new();
        let registry = Registry::new();
        let source = "x = -(+(1, 2)) !(==(x, -3))";
        let cont = parse(tokenize(source).unwrap(), Builder::new(&scope, &registry)).unwrap();
        assert_eq!(render(&registry, &cont), source);
    }
}
