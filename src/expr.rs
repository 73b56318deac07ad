//! Expression language carried by directive arguments.
//!
//! Conditions (`@if`), interpolation fallbacks (`{{ $x ?? expr }}`) and loop
//! heads (`@foreach`) share this grammar. The compiler only checks that an
//! argument parses, so a bad argument can be passed through as text; the
//! runtime parses it again from the artifact and evaluates it against the
//! render scope.
//!
//! # Grammar
//!
//! ```text
//! expr      := or ('??' expr)?
//! or        := and (('||' | 'or') and)*
//! and       := cmp (('&&' | 'and') cmp)*
//! cmp       := additive (('==' | '!=' | '===' | '!==' | '<' | '<=' | '>' | '>=') additive)?
//! additive  := term (('+' | '-') term)*
//! term      := unary (('*' | '/' | '%') unary)*
//! unary     := ('!' | '-') unary | primary
//! primary   := path | string | number | 'true' | 'false' | 'null'
//!            | ident '(' (expr (',' expr)*)? ')' | '(' expr ')'
//! path      := '$' ident ('.' ident | '.' digits | '[' (string | digits) ']')*
//! ```

use crate::value::{display, is_truthy, parse_numeric, to_number};
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

/// Error produced when an expression does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExprError(pub String);

impl ExprError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type Result<T> = std::result::Result<T, ExprError>;

/// Name resolution for variables referenced by expressions.
pub trait Lookup {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Lookup for Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

// ============================================================================
// Variable Paths
// ============================================================================

/// One accessor step after the root variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A variable reference such as `$user.name` or `$rows[0]['id']`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarPath {
    pub root: String,
    pub segments: Vec<Segment>,
}

impl VarPath {
    /// Parse a complete path; trailing input is an error.
    pub fn parse(src: &str) -> Result<Self> {
        let src = src.trim();
        let (path, len) = Self::scan(src).ok_or_else(|| ExprError::new("expected `$name`"))?;
        if len != src.len() {
            return Err(ExprError::new(format!(
                "unexpected `{}` after variable",
                &src[len..]
            )));
        }
        Ok(path)
    }

    /// Scan a path at the start of `src`, returning it with its byte length.
    pub fn scan(src: &str) -> Option<(Self, usize)> {
        let bytes = src.as_bytes();
        if bytes.first() != Some(&b'$') {
            return None;
        }
        let root_len = ident_len(&src[1..]);
        if root_len == 0 {
            return None;
        }
        let root = src[1..=root_len].to_string();
        let mut pos = 1 + root_len;
        let mut segments = Vec::new();

        loop {
            match bytes.get(pos) {
                Some(b'.') => {
                    let rest = &src[pos + 1..];
                    let n = ident_len(rest);
                    if n > 0 {
                        segments.push(Segment::Key(rest[..n].to_string()));
                        pos += 1 + n;
                        continue;
                    }
                    let d = digit_len(rest);
                    match rest[..d].parse::<usize>() {
                        Ok(index) if d > 0 => {
                            segments.push(Segment::Index(index));
                            pos += 1 + d;
                        }
                        _ => break,
                    }
                }
                Some(b'[') => match scan_bracket(&src[pos..]) {
                    Some((segment, len)) => {
                        segments.push(segment);
                        pos += len;
                    }
                    None => break,
                },
                _ => break,
            }
        }

        Some((Self { root, segments }, pos))
    }

    /// Resolve the path against a scope.
    ///
    /// Keys index objects (and arrays when numeric); indices index arrays
    /// (and objects by their decimal key).
    pub fn resolve<'a>(&self, scope: &'a dyn Lookup) -> Option<&'a Value> {
        let mut current = scope.lookup(&self.root)?;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
                (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
                (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string())?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// A path with no accessors, e.g. the `$item` of a loop head.
    pub fn is_plain(&self) -> bool {
        self.segments.is_empty()
    }
}

/// `['key']`, `["key"]` or `[3]`, including the brackets.
fn scan_bracket(src: &str) -> Option<(Segment, usize)> {
    let inner = &src[1..];
    let lead = inner.len() - inner.trim_start().len();
    let body = &inner[lead..];

    let (segment, used) = match body.as_bytes().first()? {
        b'\'' | b'"' => {
            let (text, len) = read_string(body)?;
            (Segment::Key(text), len)
        }
        b'0'..=b'9' => {
            let d = digit_len(body);
            (Segment::Index(body[..d].parse().ok()?), d)
        }
        _ => return None,
    };

    let after = &body[used..];
    let trail = after.len() - after.trim_start().len();
    if after[trail..].starts_with(']') {
        Some((segment, 1 + lead + used + trail + 1))
    } else {
        None
    }
}

fn ident_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => bytes
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count(),
        _ => 0,
    }
}

fn digit_len(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

/// Read a quoted string literal at the start of `src`.
///
/// Returns the unescaped text and the byte length including both quotes.
/// `\\`, `\'`, `\"`, `\n` and `\t` are unescaped; any other backslash is kept.
pub fn read_string(src: &str) -> Option<(String, usize)> {
    let mut chars = src.char_indices();
    let (_, quote) = chars.next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }

    let mut text = String::new();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, c @ ('\\' | '\'' | '"'))) => text.push(c),
                Some((_, 'n')) => text.push('\n'),
                Some((_, 't')) => text.push('\t'),
                Some((_, other)) => {
                    text.push('\\');
                    text.push(other);
                }
                None => return None,
            },
            c if c == quote => return Some((text, i + 1)),
            c => text.push(c),
        }
    }
    None
}

/// Render `text` as a single-quoted literal that `read_string` reads back.
pub fn quote_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        if ch == '\\' || ch == '\'' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Parse a comma separated list of string literals: `'a', "b"`.
pub fn parse_string_list(src: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut rest = src.trim_start();
    if rest.is_empty() {
        return Some(items);
    }
    loop {
        let (text, len) = read_string(rest)?;
        items.push(text);
        rest = rest[len..].trim_start();
        match rest.strip_prefix(',') {
            Some(next) => rest = next.trim_start(),
            None if rest.is_empty() => return Some(items),
            None => return None,
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Functions callable from templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Date,
    Count,
    Isset,
    Empty,
    Upper,
    Lower,
    Ucfirst,
    Trim,
    Implode,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "date" => Self::Date,
            "count" => Self::Count,
            "isset" => Self::Isset,
            "empty" => Self::Empty,
            "strtoupper" => Self::Upper,
            "strtolower" => Self::Lower,
            "ucfirst" => Self::Ucfirst,
            "trim" => Self::Trim,
            "implode" => Self::Implode,
            _ => return None,
        })
    }

    /// Accepted argument counts (inclusive).
    const fn arity(self) -> (usize, usize) {
        match self {
            Self::Isset => (1, usize::MAX),
            Self::Implode => (2, 2),
            _ => (1, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(VarPath),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Coalesce(Box<Expr>, Box<Expr>),
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn parse(src: &str) -> Result<Self> {
        let tokens = lex(src)?;
        if tokens.is_empty() {
            return Err(ExprError::new("empty expression"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(ExprError::new(format!("unexpected {}", tok.describe()))),
        }
    }

    pub fn eval(&self, scope: &dyn Lookup) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Path(path) => path.resolve(scope).cloned().unwrap_or(Value::Null),
            Self::Not(inner) => Value::Bool(!is_truthy(&inner.eval(scope))),
            Self::Neg(inner) => arithmetic(BinaryOp::Sub, &Value::from(0), &inner.eval(scope)),
            Self::Coalesce(lhs, rhs) => match lhs.eval(scope) {
                Value::Null => rhs.eval(scope),
                value => value,
            },
            Self::Binary { op: BinaryOp::Or, lhs, rhs } => {
                Value::Bool(is_truthy(&lhs.eval(scope)) || is_truthy(&rhs.eval(scope)))
            }
            Self::Binary { op: BinaryOp::And, lhs, rhs } => {
                Value::Bool(is_truthy(&lhs.eval(scope)) && is_truthy(&rhs.eval(scope)))
            }
            Self::Binary { op, lhs, rhs } => binary(*op, &lhs.eval(scope), &rhs.eval(scope)),
            Self::Call { func, args } => call(*func, args, scope),
        }
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    let ordering = || compare(lhs, rhs);
    match op {
        BinaryOp::Eq => Value::Bool(loose_eq(lhs, rhs)),
        BinaryOp::Ne => Value::Bool(!loose_eq(lhs, rhs)),
        BinaryOp::StrictEq => Value::Bool(lhs == rhs),
        BinaryOp::StrictNe => Value::Bool(lhs != rhs),
        BinaryOp::Lt => Value::Bool(ordering() == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(ordering(), Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => Value::Bool(ordering() == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))),
        BinaryOp::Or => Value::Bool(is_truthy(lhs) || is_truthy(rhs)),
        BinaryOp::And => Value::Bool(is_truthy(lhs) && is_truthy(rhs)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, lhs, rhs)
        }
    }
}

/// Loose equality: numeric strings compare as numbers, booleans by truthiness.
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(b), other) | (other, Value::Bool(b)) => *b == is_truthy(other),
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Null, other) | (other, Value::Null) => !is_truthy(other),
        (Value::String(a), Value::String(b)) => match (parse_numeric(a), parse_numeric(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            match parse_numeric(s) {
                Some(x) => n.as_f64() == Some(x),
                None => display(lhs) == display(rhs),
            }
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs)
        && (parse_numeric(a).is_none() || parse_numeric(b).is_none())
    {
        return Some(a.cmp(b));
    }
    to_number(lhs)?.partial_cmp(&to_number(rhs)?)
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Null => Some(0),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    if let (Some(a), Some(b)) = (as_integer(lhs), as_integer(rhs)) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if b != 0 && a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Rem if b == 0 => return Value::Null,
            BinaryOp::Rem => a.checked_rem(b),
            _ => None,
        };
        if let Some(result) = exact {
            return Value::from(result);
        }
    }

    let a = to_number(lhs).unwrap_or(0.0);
    let b = to_number(rhs).unwrap_or(0.0);
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Value::Null,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Value::Null,
    };
    Value::from(result)
}

fn call(func: Builtin, args: &[Expr], scope: &dyn Lookup) -> Value {
    let arg = |i: usize| args.get(i).map(|e| e.eval(scope)).unwrap_or(Value::Null);
    let text = |i: usize| display(&arg(i)).into_owned();

    match func {
        Builtin::Date => Value::String(format_date(&text(0), &chrono::Local::now().naive_local())),
        Builtin::Count => Value::from(match arg(0) {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::Null => 0,
            _ => 1,
        }),
        Builtin::Isset => Value::Bool(args.iter().all(|e| match e {
            Expr::Path(path) => path.resolve(scope).is_some_and(|v| !v.is_null()),
            _ => false,
        })),
        Builtin::Empty => Value::Bool(!is_truthy(&arg(0))),
        Builtin::Upper => Value::String(text(0).to_uppercase()),
        Builtin::Lower => Value::String(text(0).to_lowercase()),
        Builtin::Ucfirst => {
            let s = text(0);
            let mut chars = s.chars();
            Value::String(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => s,
            })
        }
        Builtin::Trim => Value::String(text(0).trim().to_string()),
        Builtin::Implode => {
            let separator = text(0);
            let joined = match arg(1) {
                Value::Array(items) => items.iter().map(|v| display(v).into_owned()).collect::<Vec<_>>(),
                Value::Object(map) => map.values().map(|v| display(v).into_owned()).collect(),
                other => vec![display(&other).into_owned()],
            };
            Value::String(joined.join(&separator))
        }
    }
}

/// Format a timestamp with single-letter `date()` format characters.
///
/// Supported: `Y y m n d j H G i s D l M F`; `\` escapes the next character;
/// anything else is copied literally.
pub fn format_date(format: &str, at: &NaiveDateTime) -> String {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(ch) = chars.next() {
        let spec = match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
                continue;
            }
            'Y' => "%Y",
            'y' => "%y",
            'm' => "%m",
            'n' => "%-m",
            'd' => "%d",
            'j' => "%-d",
            'H' => "%H",
            'G' => "%-H",
            'i' => "%M",
            's' => "%S",
            'D' => "%a",
            'l' => "%A",
            'M' => "%b",
            'F' => "%B",
            other => {
                out.push(other);
                continue;
            }
        };
        out.push_str(&at.format(spec).to_string());
    }
    out
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(VarPath),
    Ident(String),
    Str(String),
    Num(Value),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Path(path) => format!("variable `${}`", path.root),
            Self::Ident(name) => format!("`{name}`"),
            Self::Str(_) => "string".to_string(),
            Self::Num(n) => format!("number `{n}`"),
            Self::Op(op) => format!("`{op}`"),
            Self::LParen => "`(`".to_string(),
            Self::RParen => "`)`".to_string(),
            Self::Comma => "`,`".to_string(),
        }
    }
}

/// Operators, longest first so prefixes never shadow longer forms.
const OPERATORS: &[&str] = &[
    "===", "!==", "??", "||", "&&", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%",
];

fn lex(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < src.len() {
        let rest = &src[pos..];
        let Some(ch) = rest.chars().next() else { break };

        if ch.is_whitespace() {
            pos += ch.len_utf8();
            continue;
        }

        let (token, len) = match ch {
            '$' => {
                let (path, len) = VarPath::scan(rest)
                    .ok_or_else(|| ExprError::new(format!("invalid variable at offset {pos}")))?;
                (Token::Path(path), len)
            }
            '\'' | '"' => {
                let (text, len) = read_string(rest)
                    .ok_or_else(|| ExprError::new(format!("unterminated string at offset {pos}")))?;
                (Token::Str(text), len)
            }
            '0'..='9' => lex_number(rest),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let len = ident_len(rest);
                (Token::Ident(rest[..len].to_string()), len)
            }
            _ => match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                Some(op) => (Token::Op(op), op.len()),
                None => {
                    return Err(ExprError::new(format!(
                        "unexpected character `{ch}` at offset {pos}"
                    )));
                }
            },
        };

        tokens.push(token);
        pos += len;
    }

    Ok(tokens)
}

fn lex_number(src: &str) -> (Token, usize) {
    let int_len = digit_len(src);
    let frac_len = match src[int_len..].strip_prefix('.') {
        Some(frac) if digit_len(frac) > 0 => 1 + digit_len(frac),
        _ => 0,
    };
    let text = &src[..int_len + frac_len];

    let value = if frac_len == 0 {
        text.parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(text.parse::<f64>().unwrap_or(f64::MAX)))
    } else {
        Value::from(text.parse::<f64>().unwrap_or(0.0))
    };
    (Token::Num(value), text.len())
}

// ============================================================================
// Parser
// ============================================================================

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

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case(keyword)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expr(&mut self) -> Result<Expr> {
        let lhs = self.or()?;
        if self.eat_op("??") {
            let rhs = self.expr()?;
            return Ok(Expr::Coalesce(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and()?;
        while self.eat_op("||") || self.eat_keyword("or") {
            let rhs = self.and()?;
            lhs = binary_node(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut lhs = self.comparison()?;
        while self.eat_op("&&") || self.eat_keyword("and") {
            let rhs = self.comparison()?;
            lhs = binary_node(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => BinaryOp::Eq,
            Some(Token::Op("!=")) => BinaryOp::Ne,
            Some(Token::Op("===")) => BinaryOp::StrictEq,
            Some(Token::Op("!==")) => BinaryOp::StrictNe,
            Some(Token::Op("<")) => BinaryOp::Lt,
            Some(Token::Op("<=")) => BinaryOp::Le,
            Some(Token::Op(">")) => BinaryOp::Gt,
            Some(Token::Op(">=")) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(binary_node(op, lhs, rhs))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOp::Add
            } else if self.eat_op("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.term()?;
            lhs = binary_node(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOp::Mul
            } else if self.eat_op("/") {
                BinaryOp::Div
            } else if self.eat_op("%") {
                BinaryOp::Rem
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = binary_node(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_op("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Path(path)) => Ok(Expr::Path(path)),
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::Num(n)) => Ok(Expr::Literal(n)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprError::new("expected `)`")),
                }
            }
            Some(Token::Ident(name)) => match name.to_ascii_lowercase().as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => self.call(&name),
            },
            Some(other) => Err(ExprError::new(format!("unexpected {}", other.describe()))),
            None => Err(ExprError::new("unexpected end of expression")),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr> {
        let func = Builtin::from_name(name)
            .ok_or_else(|| ExprError::new(format!("unknown function `{name}`")))?;
        if self.next() != Some(Token::LParen) {
            return Err(ExprError::new(format!("expected `(` after `{name}`")));
        }

        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expr()?);
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(ExprError::new(format!("expected `,` or `)` in `{name}`"))),
                }
            }
        }

        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(ExprError::new(format!(
                "`{name}` takes {min} argument(s), got {}",
                args.len()
            )));
        }
        if func == Builtin::Isset && !args.iter().all(|a| matches!(a, Expr::Path(_))) {
            return Err(ExprError::new("`isset` only accepts variables"));
        }

        Ok(Expr::Call { func, args })
    }
}

fn binary_node(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

// ============================================================================
// Directive argument forms
// ============================================================================

/// The argument of `{{ ... }}`: a variable with an optional `??` fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub path: VarPath,
    pub fallback: Option<Expr>,
}

impl Interpolation {
    pub fn parse(src: &str) -> Result<Self> {
        let src = src.trim();
        let (path, len) = VarPath::scan(src).ok_or_else(|| ExprError::new("expected `$name`"))?;
        let rest = src[len..].trim_start();

        if rest.is_empty() {
            return Ok(Self { path, fallback: None });
        }
        let Some(fallback) = rest.strip_prefix("??") else {
            return Err(ExprError::new(format!("unexpected `{rest}` after variable")));
        };
        Ok(Self {
            path,
            fallback: Some(Expr::parse(fallback)?),
        })
    }

    /// Value of the variable when bound (and not null), else the fallback.
    pub fn eval(&self, scope: &dyn Lookup) -> Value {
        match self.path.resolve(scope) {
            Some(value) if !value.is_null() => value.clone(),
            _ => self
                .fallback
                .as_ref()
                .map_or(Value::Null, |fallback| fallback.eval(scope)),
        }
    }
}

/// The argument of `@foreach`: `$source as $item` or `$source as $key => $item`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopHead {
    pub source: VarPath,
    pub key: Option<String>,
    pub item: String,
}

impl LoopHead {
    pub fn parse(src: &str) -> Result<Self> {
        let src = src.trim();
        let (source, len) =
            VarPath::scan(src).ok_or_else(|| ExprError::new("expected `$name` to iterate"))?;

        let rest = src[len..].trim_start();
        let rest = rest
            .strip_prefix("as")
            .filter(|r| r.starts_with(char::is_whitespace))
            .ok_or_else(|| ExprError::new("expected `as`"))?
            .trim_start();

        let (first, rest) = scan_binding(rest)?;
        let rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(Self { source, key: None, item: first });
        }

        let rest = rest
            .strip_prefix("=>")
            .ok_or_else(|| ExprError::new(format!("unexpected `{rest}` in loop head")))?;
        let (second, rest) = scan_binding(rest.trim_start())?;
        if !rest.trim().is_empty() {
            return Err(ExprError::new(format!("unexpected `{}` in loop head", rest.trim())));
        }
        Ok(Self {
            source,
            key: Some(first),
            item: second,
        })
    }
}

/// A bare `$name` used as a loop binding.
fn scan_binding(src: &str) -> Result<(String, &str)> {
    match VarPath::scan(src) {
        Some((path, len)) if path.is_plain() => Ok((path.root, &src[len..])),
        _ => Err(ExprError::new("expected a plain `$name` binding")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn scope(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn eval(src: &str, data: Value) -> Value {
        Expr::parse(src).unwrap().eval(&scope(data))
    }

    #[test]
    fn test_path_scan_accessors() {
        let (path, len) = VarPath::scan("$rows[0]['id'].name rest").unwrap();
        assert_eq!(len, "$rows[0]['id'].name".len());
        assert_eq!(path.root, "rows");
        assert_eq!(
            path.segments,
            vec![
                Segment::Index(0),
                Segment::Key("id".into()),
                Segment::Key("name".into())
            ]
        );
    }

    #[test]
    fn test_path_scan_stops_at_dangling_dot() {
        let (path, len) = VarPath::scan("$name.").unwrap();
        assert_eq!(len, 5);
        assert!(path.is_plain());
    }

    #[test]
    fn test_path_requires_dollar() {
        assert!(VarPath::scan("name").is_none());
        assert!(VarPath::scan("$1abc").is_none());
        assert!(VarPath::parse("$a b").is_err());
    }

    #[test]
    fn test_path_resolve() {
        let data = scope(json!({"user": {"tags": ["a", "b"], "0": "zero"}}));
        let tag = VarPath::parse("$user.tags.1").unwrap();
        assert_eq!(tag.resolve(&data), Some(&json!("b")));
        let by_index = VarPath::parse("$user[0]").unwrap();
        assert_eq!(by_index.resolve(&data), Some(&json!("zero")));
        let missing = VarPath::parse("$user.name.first").unwrap();
        assert_eq!(missing.resolve(&data), None);
    }

    #[test]
    fn test_read_string_escapes() {
        assert_eq!(read_string(r"'it\'s' tail"), Some(("it's".to_string(), 7)));
        assert_eq!(read_string(r#""a\nb""#), Some(("a\nb".to_string(), 6)));
        assert_eq!(read_string(r"'C:\dir'"), Some((r"C:\dir".to_string(), 8)));
        assert_eq!(read_string("'open"), None);
    }

    #[test]
    fn test_quote_literal_reads_back() {
        let text = r"it's a \ test";
        let quoted = quote_literal(text);
        assert_eq!(read_string(&quoted).map(|(t, _)| t), Some(text.to_string()));
    }

    #[test]
    fn test_parse_string_list() {
        assert_eq!(
            parse_string_list(r#" 'title' , "Home" "#),
            Some(vec!["title".to_string(), "Home".to_string()])
        );
        assert_eq!(parse_string_list("'one'"), Some(vec!["one".to_string()]));
        assert_eq!(parse_string_list(""), Some(vec![]));
        assert_eq!(parse_string_list("name"), None);
        assert_eq!(parse_string_list("'a' 'b'"), None);
    }

    #[test]
    fn test_literals_and_arithmetic() {
        assert_eq!(eval("1 + 2 * 3", json!({})), json!(7));
        assert_eq!(eval("(1 + 2) * 3", json!({})), json!(9));
        assert_eq!(eval("7 / 2", json!({})), json!(3.5));
        assert_eq!(eval("8 / 2", json!({})), json!(4));
        assert_eq!(eval("7 % 3", json!({})), json!(1));
        assert_eq!(eval("1 / 0", json!({})), json!(null));
        assert_eq!(eval("-$n", json!({"n": 4})), json!(-4));
        assert_eq!(eval("'abc'", json!({})), json!("abc"));
    }

    #[test]
    fn test_comparisons() {
        let data = json!({"n": 5, "s": "5", "name": "bob"});
        assert_eq!(eval("$n == $s", data.clone()), json!(true));
        assert_eq!(eval("$n === $s", data.clone()), json!(false));
        assert_eq!(eval("$n !== 5", data.clone()), json!(false));
        assert_eq!(eval("$n > 3", data.clone()), json!(true));
        assert_eq!(eval("$n <= 4", data.clone()), json!(false));
        assert_eq!(eval("$name == 'bob'", data.clone()), json!(true));
        assert_eq!(eval("$name < 'carl'", data.clone()), json!(true));
        assert_eq!(eval("$missing == null", data), json!(true));
    }

    #[test]
    fn test_logical_operators() {
        let data = json!({"a": true, "b": 0, "list": []});
        assert_eq!(eval("$a && $b", data.clone()), json!(false));
        assert_eq!(eval("$a || $b", data.clone()), json!(true));
        assert_eq!(eval("$a and !$b", data.clone()), json!(true));
        assert_eq!(eval("!$list or $b", data.clone()), json!(true));
        assert_eq!(eval("!$a == false", data), json!(true));
    }

    #[test]
    fn test_coalesce() {
        assert_eq!(eval("$x ?? 'D'", json!({})), json!("D"));
        assert_eq!(eval("$x ?? 'D'", json!({"x": "v"})), json!("v"));
        assert_eq!(eval("$x ?? $y ?? 3", json!({})), json!(3));
        assert_eq!(eval("$x ?? 'D'", json!({"x": null})), json!("D"));
    }

    #[test]
    fn test_builtins() {
        let data = json!({"items": [1, 2, 3], "name": "  ada  ", "tags": ["a", "b"]});
        assert_eq!(eval("count($items)", data.clone()), json!(3));
        assert_eq!(eval("count($nothing)", data.clone()), json!(0));
        assert_eq!(eval("isset($name)", data.clone()), json!(true));
        assert_eq!(eval("isset($name, $nope)", data.clone()), json!(false));
        assert_eq!(eval("empty($nope)", data.clone()), json!(true));
        assert_eq!(eval("strtoupper(trim($name))", data.clone()), json!("ADA"));
        assert_eq!(eval("ucfirst('élan')", data.clone()), json!("Élan"));
        assert_eq!(eval("implode(', ', $tags)", data), json!("a, b"));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "$x +", "1 +* 2", "foo($x)", "count()", "isset('a')", "(1", "'open", "$x $y", "#"] {
            assert!(Expr::parse(bad).is_err(), "`{bad}` should not parse");
        }
    }

    #[test]
    fn test_format_date() {
        let at = NaiveDate::from_ymd_opt(2025, 5, 4)
            .unwrap()
            .and_hms_opt(9, 7, 3)
            .unwrap();
        assert_eq!(format_date("Y", &at), "2025");
        assert_eq!(format_date("d/m/y H:i:s", &at), "04/05/25 09:07:03");
        assert_eq!(format_date("j n G", &at), "4 5 9");
        assert_eq!(format_date("D, M", &at), "Sun, May");
        assert_eq!(format_date(r"\Y Y", &at), "Y 2025");
    }

    #[test]
    fn test_date_builtin_returns_current_year() {
        let year = chrono::Local::now().format("%Y").to_string();
        assert_eq!(eval("date('Y')", json!({})), json!(year));
    }

    #[test]
    fn test_interpolation_parse() {
        let plain = Interpolation::parse(" $name ").unwrap();
        assert_eq!(plain.path.root, "name");
        assert!(plain.fallback.is_none());

        let with_default = Interpolation::parse("$year ?? date('Y')").unwrap();
        assert!(with_default.fallback.is_some());

        assert!(Interpolation::parse("$x ??").is_err());
        assert!(Interpolation::parse("$x + 1").is_err());
        assert!(Interpolation::parse("name").is_err());
    }

    #[test]
    fn test_interpolation_eval_prefers_bound_value() {
        let interp = Interpolation::parse("$x ?? 'D'").unwrap();
        assert_eq!(interp.eval(&scope(json!({}))), json!("D"));
        assert_eq!(interp.eval(&scope(json!({"x": 0}))), json!(0));
    }

    #[test]
    fn test_loop_head_parse() {
        let head = LoopHead::parse("$features as $feature").unwrap();
        assert_eq!(head.source.root, "features");
        assert_eq!(head.key, None);
        assert_eq!(head.item, "feature");

        let keyed = LoopHead::parse(" $user.roles as $i => $role ").unwrap();
        assert_eq!(keyed.source.segments, vec![Segment::Key("roles".into())]);
        assert_eq!(keyed.key.as_deref(), Some("i"));
        assert_eq!(keyed.item, "role");
    }

    #[test]
    fn test_loop_head_errors() {
        for bad in ["$a", "$a as", "$a in $b", "$a as $b.c", "$a as $k => ", "$a as $k => $v extra", "a as $b", "$a ask $b"] {
            assert!(LoopHead::parse(bad).is_err(), "`{bad}` should not parse");
        }
    }
}
