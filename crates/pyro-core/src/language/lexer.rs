//! Tokenizer shared by both surface syntaxes

use crate::error::{PyroError, Result};

/// Punctuation and operator tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sym {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Dot,
    Assign,
    Pipe,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Bang,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Sym(Sym),
    Newline,
    Eof,
}

/// Token with the position of its first character (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn number(&mut self, line: usize, column: usize) -> Result<Token> {
        let start = self.pos;
        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let digit_at = if matches!(self.peek_at(1), Some('+' | '-')) { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..digit_at {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return Err(PyroError::syntax(line, column, "malformed number literal"));
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| PyroError::syntax(line, column, format!("malformed float '{}'", text)))
        } else {
            text.parse::<i64>().map(Token::Int).map_err(|_| {
                PyroError::syntax(line, column, format!("integer '{}' out of range", text))
            })
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<Token> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(PyroError::syntax(line, column, "unterminated string")),
                Some('"') => return Ok(Token::Str(value)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some(other) => {
                            return Err(PyroError::syntax(
                                self.line,
                                self.column.saturating_sub(1),
                                format!("unknown escape '\\{}'", other),
                            ));
                        }
                        None => return Err(PyroError::syntax(line, column, "unterminated string")),
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn symbol(&mut self, c: char, line: usize, column: usize) -> Result<Sym> {
        let sym = match c {
            '(' => Sym::LParen,
            ')' => Sym::RParen,
            '[' => Sym::LBracket,
            ']' => Sym::RBracket,
            '{' => Sym::LBrace,
            '}' => Sym::RBrace,
            ',' => Sym::Comma,
            ';' => Sym::Semi,
            '.' => Sym::Dot,
            '+' => Sym::Plus,
            '-' => Sym::Minus,
            '*' => Sym::Star,
            '/' => Sym::Slash,
            '%' => Sym::Percent,
            '=' if self.eat('=') => Sym::Eq,
            '=' => Sym::Assign,
            '!' if self.eat('=') => Sym::Ne,
            '!' => Sym::Bang,
            '<' if self.eat('=') => Sym::Le,
            '<' => Sym::Lt,
            '>' if self.eat('=') => Sym::Ge,
            '>' => Sym::Gt,
            '&' if self.eat('&') => Sym::And,
            '|' if self.eat('|') => Sym::Or,
            '|' => Sym::Pipe,
            other => {
                return Err(PyroError::syntax(
                    line,
                    column,
                    format!("unexpected character '{}'", other),
                ));
            }
        };
        Ok(sym)
    }
}

/// Split source text into tokens, ending with `Token::Eof`
pub fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();

    while let Some(c) = lexer.peek() {
        let (line, column) = (lexer.line, lexer.column);

        if c == '\n' {
            lexer.bump();
            tokens.push(Spanned {
                token: Token::Newline,
                line,
                column,
            });
            continue;
        }
        if c.is_whitespace() {
            lexer.bump();
            continue;
        }
        if c == '/' && lexer.peek_at(1) == Some('/') {
            while lexer.peek().is_some_and(|c| c != '\n') {
                lexer.bump();
            }
            continue;
        }

        let token = if c.is_ascii_digit() {
            lexer.number(line, column)?
        } else if c == '"' {
            lexer.bump();
            lexer.string(line, column)?
        } else if c.is_alphabetic() || c == '_' {
            let start = lexer.pos;
            while lexer.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                lexer.bump();
            }
            Token::Ident(lexer.chars[start..lexer.pos].iter().collect())
        } else {
            lexer.bump();
            Token::Sym(lexer.symbol(c, line, column)?)
        };
        tokens.push(Spanned {
            token,
            line,
            column,
        });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line: lexer.line,
        column: lexer.column,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_call_tokens() {
        assert_eq!(
            kinds("peer.Connect(\"host\", 9999)"),
            vec![
                Token::Ident("peer".into()),
                Token::Sym(Sym::Dot),
                Token::Ident("Connect".into()),
                Token::Sym(Sym::LParen),
                Token::Str("host".into()),
                Token::Sym(Sym::Comma),
                Token::Int(9999),
                Token::Sym(Sym::RParen),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 3e2 4.0e-1"),
            vec![
                Token::Int(1),
                Token::Float(2.5),
                Token::Float(300.0),
                Token::Float(0.4),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_operators_and_comments() {
        assert_eq!(
            kinds("a == b && !c // trailing\n|x|"),
            vec![
                Token::Ident("a".into()),
                Token::Sym(Sym::Eq),
                Token::Ident("b".into()),
                Token::Sym(Sym::And),
                Token::Sym(Sym::Bang),
                Token::Ident("c".into()),
                Token::Newline,
                Token::Sym(Sym::Pipe),
                Token::Ident("x".into()),
                Token::Sym(Sym::Pipe),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n""#),
            vec![Token::Str("a\"b\n".into()), Token::Eof]
        );
    }

    #[test]
    fn test_lex_errors_carry_position() {
        match tokenize("ok\n  \"open") {
            Err(PyroError::Syntax { line, column, .. }) => {
                assert_eq!((line, column), (2, 3));
            }
            other => panic!("Expected syntax error, got {:?}", other),
        }
        assert!(tokenize("99999999999999999999").is_err());
        assert!(tokenize("12abc").is_err());
        assert!(tokenize("a & b").is_err());
    }
}
