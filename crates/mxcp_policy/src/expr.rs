//! Condition expression language.
//!
//! Grammar (precedence low to high):
//!
//! ```text
//! or        := and ("||" and)*
//! and       := unary ("&&" unary)*
//! unary     := "!" unary | comparison
//! comparison:= postfix (("==" | "!=" | "in") postfix)?
//! postfix   := primary ("." ident | "[" or "]")*
//! primary   := literal | ident | "(" or ")"
//! ```
//!
//! Evaluation is total: undefined identifiers and missing fields resolve
//! to a null sentinel, comparisons involving null yield false, and only
//! boolean `true` is truthy. `x in y` is membership for arrays and key
//! lookup for objects; `x in null` is false.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Expression parse failure with byte offset into the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Named root values visible to a condition (`user`, `input`, `response`).
pub type Bindings<'a> = HashMap<&'static str, &'a Value>;

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parse an expression from source text.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(ParseError::new(
                tok.offset,
                format!("unexpected trailing token '{}'", tok.kind.describe()),
            ));
        }
        Ok(expr)
    }

    /// Evaluate to a JSON value. Never fails; missing data is null.
    pub fn eval(&self, bindings: &Bindings<'_>) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Ident(name) => bindings
                .get(name.as_str())
                .map(|v| (*v).clone())
                .unwrap_or(Value::Null),
            Expr::Field(base, name) => match base.eval(bindings) {
                Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            },
            Expr::Index(base, index) => {
                let base = base.eval(bindings);
                let index = index.eval(bindings);
                match (&base, &index) {
                    (Value::Object(map), Value::String(key)) => {
                        map.get(key).cloned().unwrap_or(Value::Null)
                    }
                    (Value::Array(items), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| items.get(i as usize))
                        .cloned()
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                }
            }
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(bindings))),
            Expr::And(lhs, rhs) => {
                if !truthy(&lhs.eval(bindings)) {
                    Value::Bool(false)
                } else {
                    Value::Bool(truthy(&rhs.eval(bindings)))
                }
            }
            Expr::Or(lhs, rhs) => {
                if truthy(&lhs.eval(bindings)) {
                    Value::Bool(true)
                } else {
                    Value::Bool(truthy(&rhs.eval(bindings)))
                }
            }
            Expr::Eq(lhs, rhs) => Value::Bool(strict_eq(
                &lhs.eval(bindings),
                &rhs.eval(bindings),
            )),
            Expr::Ne(lhs, rhs) => {
                let (l, r) = (lhs.eval(bindings), rhs.eval(bindings));
                // Comparisons with null are false for both == and !=.
                if l.is_null() || r.is_null() {
                    Value::Bool(false)
                } else {
                    Value::Bool(!strict_eq(&l, &r))
                }
            }
            Expr::In(needle, haystack) => Value::Bool(contains(
                &haystack.eval(bindings),
                &needle.eval(bindings),
            )),
        }
    }

    /// Evaluate as a condition: only boolean `true` passes.
    pub fn matches(&self, bindings: &Bindings<'_>) -> bool {
        truthy(&self.eval(bindings))
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Strict equality between scalars of the same type; anything involving
/// null or a non-scalar compares unequal.
fn strict_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        },
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| strict_eq(item, needle)),
        Value::Object(map) => match needle {
            Value::String(key) => map.contains_key(key),
            _ => false,
        },
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    In,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) => s.clone(),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Num(_) => "number".to_string(),
            TokenKind::True => "true".to_string(),
            TokenKind::False => "false".to_string(),
            TokenKind::Null => "null".to_string(),
            TokenKind::In => "in".to_string(),
            TokenKind::EqEq => "==".to_string(),
            TokenKind::NotEq => "!=".to_string(),
            TokenKind::AndAnd => "&&".to_string(),
            TokenKind::OrOr => "||".to_string(),
            TokenKind::Bang => "!".to_string(),
            TokenKind::Dot => ".".to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
            TokenKind::LBracket => "[".to_string(),
            TokenKind::RBracket => "]".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn lex(source: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let char_at = |i: usize| chars.get(i).map(|&(_, c)| c);

    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset });
                i += 1;
            }
            '[' => {
                tokens.push(Token { kind: TokenKind::LBracket, offset });
                i += 1;
            }
            ']' => {
                tokens.push(Token { kind: TokenKind::RBracket, offset });
                i += 1;
            }
            '.' => {
                tokens.push(Token { kind: TokenKind::Dot, offset });
                i += 1;
            }
            '=' => {
                if char_at(i + 1) == Some('=') {
                    tokens.push(Token { kind: TokenKind::EqEq, offset });
                    i += 2;
                } else {
                    return Err(ParseError::new(offset, "expected '=='"));
                }
            }
            '!' => {
                if char_at(i + 1) == Some('=') {
                    tokens.push(Token { kind: TokenKind::NotEq, offset });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Bang, offset });
                    i += 1;
                }
            }
            '&' => {
                if char_at(i + 1) == Some('&') {
                    tokens.push(Token { kind: TokenKind::AndAnd, offset });
                    i += 2;
                } else {
                    return Err(ParseError::new(offset, "expected '&&'"));
                }
            }
            '|' => {
                if char_at(i + 1) == Some('|') {
                    tokens.push(Token { kind: TokenKind::OrOr, offset });
                    i += 2;
                } else {
                    return Err(ParseError::new(offset, "expected '||'"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut out = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while let Some(ch) = char_at(j) {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    if ch == '\\' {
                        match char_at(j + 1) {
                            Some('n') => out.push('\n'),
                            Some('t') => out.push('\t'),
                            Some(other) => out.push(other),
                            None => break,
                        }
                        j += 2;
                    } else {
                        out.push(ch);
                        j += 1;
                    }
                }
                if !closed {
                    return Err(ParseError::new(offset, "unterminated string literal"));
                }
                tokens.push(Token { kind: TokenKind::Str(out), offset });
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut j = i + 1;
                while matches!(char_at(j), Some(ch) if ch.is_ascii_digit() || ch == '.') {
                    j += 1;
                }
                let end = chars.get(j).map(|&(o, _)| o).unwrap_or(source.len());
                let text = &source[offset..end];
                let num: f64 = text
                    .parse()
                    .map_err(|_| ParseError::new(offset, format!("invalid number '{}'", text)))?;
                tokens.push(Token { kind: TokenKind::Num(num), offset });
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while matches!(char_at(j), Some(ch) if ch.is_ascii_alphanumeric() || ch == '_') {
                    j += 1;
                }
                let end = chars.get(j).map(|&(o, _)| o).unwrap_or(source.len());
                let word = &source[offset..end];
                let kind = match word {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    "in" => TokenKind::In,
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token { kind, offset });
                i = j;
            }
            other => {
                return Err(ParseError::new(
                    offset,
                    format!("unexpected character '{}'", other),
                ));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        match self.advance() {
            Some(tok) if tok.kind == kind => Ok(()),
            Some(tok) => Err(ParseError::new(
                tok.offset,
                format!("expected '{}', found '{}'", kind.describe(), tok.kind.describe()),
            )),
            None => Err(ParseError::new(
                usize::MAX,
                format!("expected '{}', found end of input", kind.describe()),
            )),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while self.eat(&TokenKind::AndAnd) {
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Bang) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_postfix()?;
        let op = match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::EqEq) => TokenKind::EqEq,
            Some(TokenKind::NotEq) => TokenKind::NotEq,
            Some(TokenKind::In) => TokenKind::In,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_postfix()?;
        Ok(match op {
            TokenKind::EqEq => Expr::Eq(Box::new(lhs), Box::new(rhs)),
            TokenKind::NotEq => Expr::Ne(Box::new(lhs), Box::new(rhs)),
            _ => Expr::In(Box::new(lhs), Box::new(rhs)),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::Ident(name),
                        ..
                    }) => {
                        expr = Expr::Field(Box::new(expr), name);
                    }
                    Some(tok) => {
                        return Err(ParseError::new(
                            tok.offset,
                            "expected field name after '.'",
                        ));
                    }
                    None => {
                        return Err(ParseError::new(usize::MAX, "expected field name after '.'"));
                    }
                }
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_or()?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token { kind, offset }) => match kind {
                TokenKind::Ident(name) => Ok(Expr::Ident(name)),
                TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
                TokenKind::Num(n) => {
                    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                        Ok(Expr::Literal(Value::from(n as i64)))
                    } else {
                        Ok(Expr::Literal(Value::from(n)))
                    }
                }
                TokenKind::True => Ok(Expr::Literal(Value::Bool(true))),
                TokenKind::False => Ok(Expr::Literal(Value::Bool(false))),
                TokenKind::Null => Ok(Expr::Literal(Value::Null)),
                TokenKind::LParen => {
                    let inner = self.parse_or()?;
                    self.expect(TokenKind::RParen)?;
                    Ok(inner)
                }
                other => Err(ParseError::new(
                    offset,
                    format!("unexpected token '{}'", other.describe()),
                )),
            },
            None => Err(ParseError::new(usize::MAX, "unexpected end of input")),
        }
    }
}
