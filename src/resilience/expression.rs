//! Retry expressions.
//!
//! A retry rule decides retryability with a small boolean expression over
//! the attempt outcome, e.g.
//! `IsRetryableStatusCode() || IsConnectionError() || statusCode == 429`.
//!
//! # Grammar
//! ```text
//! expr       := or
//! or         := and ("||" and)*
//! and        := unary ("&&" unary)*
//! unary      := "!" unary | comparison
//! comparison := primary (("==" | "!=" | "<" | "<=" | ">" | ">=" | "contains") primary)?
//! primary    := "(" expr ")" | INT | STRING | "true" | "false"
//!             | "statusCode" | "error" | HELPER "(" ")"
//! ```
//!
//! # Design Decisions
//! - Compiled and type-checked once per configuration generation
//! - Evaluation is infallible: every compiled expression yields a bool

use thiserror::Error;

use crate::config::schema::DEFAULT_RETRY_EXPRESSION;
use crate::resilience::classify::RetryContext;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to compile retry expression: {0}")]
pub struct ExpressionError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Helper {
    IsTimeout,
    IsHttpReadTimeout,
    Is5xxError,
    IsConnectionError,
    IsConnectionRefused,
    IsConnectionReset,
    IsRetryableStatusCode,
}

impl Helper {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "IsTimeout" => Helper::IsTimeout,
            "IsHttpReadTimeout" => Helper::IsHttpReadTimeout,
            "Is5xxError" => Helper::Is5xxError,
            "IsConnectionError" => Helper::IsConnectionError,
            "IsConnectionRefused" => Helper::IsConnectionRefused,
            "IsConnectionReset" => Helper::IsConnectionReset,
            "IsRetryableStatusCode" => Helper::IsRetryableStatusCode,
            _ => return None,
        })
    }

    fn call(self, ctx: &RetryContext) -> bool {
        match self {
            Helper::IsTimeout => ctx.is_timeout(),
            Helper::IsHttpReadTimeout => ctx.is_http_read_timeout(),
            Helper::Is5xxError => ctx.is_5xx_error(),
            Helper::IsConnectionError => ctx.is_connection_error(),
            Helper::IsConnectionRefused => ctx.is_connection_refused(),
            Helper::IsConnectionReset => ctx.is_connection_reset(),
            Helper::IsRetryableStatusCode => ctx.is_retryable_status_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Type {
    Bool,
    Int,
    Str,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Bool(bool),
    Int(i64),
    Str(String),
    StatusCode,
    Error,
    Call(Helper),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare(CmpOp, Box<Node>, Box<Node>),
}

enum Value<'a> {
    Bool(bool),
    Int(i64),
    Str(&'a str),
}

impl Node {
    fn type_of(&self) -> Result<Type, ExpressionError> {
        match self {
            Node::Bool(_) | Node::Call(_) => Ok(Type::Bool),
            Node::Int(_) | Node::StatusCode => Ok(Type::Int),
            Node::Str(_) | Node::Error => Ok(Type::Str),
            Node::Not(inner) => {
                expect_type(inner, Type::Bool, "!")?;
                Ok(Type::Bool)
            }
            Node::And(l, r) | Node::Or(l, r) => {
                let op = if matches!(self, Node::And(..)) { "&&" } else { "||" };
                expect_type(l, Type::Bool, op)?;
                expect_type(r, Type::Bool, op)?;
                Ok(Type::Bool)
            }
            Node::Compare(op, l, r) => {
                let (lt, rt) = (l.type_of()?, r.type_of()?);
                let ok = match op {
                    CmpOp::Eq | CmpOp::Ne => lt == rt,
                    CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => lt == Type::Int && rt == Type::Int,
                    CmpOp::Contains => lt == Type::Str && rt == Type::Str,
                };
                if !ok {
                    return Err(ExpressionError(format!(
                        "invalid operand types {lt:?} and {rt:?} for {op:?}"
                    )));
                }
                Ok(Type::Bool)
            }
        }
    }

    fn eval<'a>(&'a self, ctx: &'a RetryContext) -> Value<'a> {
        match self {
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(i) => Value::Int(*i),
            Node::Str(s) => Value::Str(s),
            Node::StatusCode => Value::Int(i64::from(ctx.status_code)),
            Node::Error => Value::Str(&ctx.error),
            Node::Call(helper) => Value::Bool(helper.call(ctx)),
            Node::Not(inner) => Value::Bool(!inner.eval_bool(ctx)),
            Node::And(l, r) => Value::Bool(l.eval_bool(ctx) && r.eval_bool(ctx)),
            Node::Or(l, r) => Value::Bool(l.eval_bool(ctx) || r.eval_bool(ctx)),
            Node::Compare(op, l, r) => Value::Bool(compare(*op, l.eval(ctx), r.eval(ctx))),
        }
    }

    fn eval_bool(&self, ctx: &RetryContext) -> bool {
        matches!(self.eval(ctx), Value::Bool(true))
    }
}

fn expect_type(node: &Node, expected: Type, op: &str) -> Result<(), ExpressionError> {
    let actual = node.type_of()?;
    if actual != expected {
        return Err(ExpressionError(format!(
            "operator {op} expects {expected:?}, got {actual:?}"
        )));
    }
    Ok(())
}

fn compare(op: CmpOp, l: Value<'_>, r: Value<'_>) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Contains => false,
        },
        (Value::Str(a), Value::Str(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Contains => a.contains(b),
            _ => false,
        },
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => false,
        },
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Cmp(CmpOp),
    Int(i64),
    Str(String),
    Ident(String),
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Cmp(CmpOp::Ne));
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err(ExpressionError("expected '=='".into()));
                }
                tokens.push(Token::Cmp(CmpOp::Eq));
            }
            '<' | '>' => {
                chars.next();
                let eq = chars.next_if_eq(&'=').is_some();
                tokens.push(Token::Cmp(match (c, eq) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    (_, false) => CmpOp::Gt,
                    (_, true) => CmpOp::Ge,
                }));
            }
            '&' | '|' => {
                chars.next();
                if chars.next_if_eq(&c).is_none() {
                    return Err(ExpressionError(format!("expected '{c}{c}'")));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            '"' | '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => s.push(escaped),
                            None => return Err(ExpressionError("unterminated string".into())),
                        },
                        Some(ch) if ch == c => break,
                        Some(ch) => s.push(ch),
                        None => return Err(ExpressionError("unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.next_if(|d| d.is_ascii_digit()) {
                    digits.push(d);
                }
                let value = digits
                    .parse()
                    .map_err(|_| ExpressionError(format!("integer out of range: {digits}")))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                    ident.push(ch);
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ExpressionError(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.and()?;
        while self.eat(&Token::Or) {
            node = Node::Or(Box::new(node), Box::new(self.and()?));
        }
        Ok(node)
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.unary()?;
        while self.eat(&Token::And) {
            node = Node::And(Box::new(node), Box::new(self.unary()?));
        }
        Ok(node)
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if self.eat(&Token::Not) {
            return Ok(Node::Not(Box::new(self.unary()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let left = self.primary()?;
        let op = match self.peek() {
            Some(Token::Cmp(op)) => *op,
            Some(Token::Ident(name)) if name == "contains" => CmpOp::Contains,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.primary()?;
        Ok(Node::Compare(op, Box::new(left), Box::new(right)))
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some(Token::LParen) => {
                let node = self.or()?;
                if !self.eat(&Token::RParen) {
                    return Err(ExpressionError("expected ')'".into()));
                }
                Ok(node)
            }
            Some(Token::Int(i)) => Ok(Node::Int(i)),
            Some(Token::Str(s)) => Ok(Node::Str(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Node::Bool(true)),
                "false" => Ok(Node::Bool(false)),
                "statusCode" => Ok(Node::StatusCode),
                "error" => Ok(Node::Error),
                _ => {
                    let helper = Helper::lookup(&name)
                        .ok_or_else(|| ExpressionError(format!("unknown identifier '{name}'")))?;
                    if !(self.eat(&Token::LParen) && self.eat(&Token::RParen)) {
                        return Err(ExpressionError(format!("expected '()' after {name}")));
                    }
                    Ok(Node::Call(helper))
                }
            },
            Some(token) => Err(ExpressionError(format!("unexpected token {token:?}"))),
            None => Err(ExpressionError("unexpected end of expression".into())),
        }
    }
}

/// A compiled, type-checked retry predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExpression {
    source: String,
    root: Node,
}

impl RetryExpression {
    /// Compile an expression. Empty input selects the default expression.
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let source = match source.trim() {
            "" => DEFAULT_RETRY_EXPRESSION,
            trimmed => trimmed,
        };

        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        let root = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError(format!("unexpected token {token:?}")));
        }
        if root.type_of()? != Type::Bool {
            return Err(ExpressionError("expression must evaluate to a boolean".into()));
        }

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Expression that matches nothing.
    pub fn never() -> Self {
        Self {
            source: "false".to_string(),
            root: Node::Bool(false),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ctx: &RetryContext) -> bool {
        self.root.eval_bool(ctx)
    }
}
