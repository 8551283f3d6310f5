// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Safe Expression Evaluator.
//!
//! A hand-written recursive-descent parser and tree-walking evaluator for the
//! small expression language used in workflow `condition`/`set`/`items`
//! fields and in `${...}` template substitution. The allowed surface is a
//! strict whitelist: literals, identifier lookups into a caller-supplied
//! context, arithmetic, chained comparisons, short-circuiting logical
//! operators, membership tests, and a fixed function set. Nothing here ever
//! calls a host `eval`; every construct not recognised by the grammar below
//! is a parse error, and every construct recognised but not on the
//! whitelist is an [`ExpressionError::Unsafe`].

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// A runtime value flowing through the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    fn as_number(&self) -> Result<f64, ExpressionError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(ExpressionError::Type(format!(
                "expected number, found {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::List(_) | Value::Map(_) => {
                let json = self.clone().into_json();
                write!(f, "{json}")
            }
        }
    }
}

impl Value {
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(l) => serde_json::Value::Array(l.into_iter().map(Value::into_json).collect()),
            Value::Map(m) => {
                serde_json::Value::Object(m.into_iter().map(|(k, v)| (k, v.into_json())).collect())
            }
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("unsafe expression construct: {0}")]
    Unsafe(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("undefined identifier: {0}")]
    UndefinedIdentifier(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("wrong argument count for {function}: expected {expected}, got {got}")]
    ArgCount {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },
}

/// The explicit AST produced by the parser. Every variant here corresponds
/// to exactly one allowed construct; there is no fallthrough "anything
/// else" node.
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    /// Chained comparison: a OP b OP c ... evaluated short-circuit left to right.
    Compare(Vec<(CompareOp, Expr)>, Box<Expr>),
    Membership { negate: bool, item: Box<Expr>, container: Box<Expr> },
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

const SAFE_FUNCTIONS: &[&str] = &["len", "str", "int", "float", "bool", "abs", "min", "max"];

/// Parse and evaluate `source` against `context` in one step.
pub fn evaluate(source: &str, context: &HashMap<String, Value>) -> Result<Value, ExpressionError> {
    let ast = Parser::parse(source)?;
    eval_expr(&ast, context)
}

/// Evaluate and coerce to a boolean, the shape the Workflow Engine needs for
/// `if`/`stop_on_error` style conditions.
pub fn evaluate_bool(source: &str, context: &HashMap<String, Value>) -> Result<bool, ExpressionError> {
    Ok(evaluate(source, context)?.truthy())
}

// ---------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Keyword(&'static str),
    Symbol(char),
    CompareOp(CompareOp),
    Pow,
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { chars: src.char_indices().peekable(), src }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            if c.is_ascii_digit() {
                tokens.push(self.lex_number());
                continue;
            }
            if c == '"' || c == '\'' {
                tokens.push(Token::Str(self.lex_string(c)?));
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                let ident = self.lex_ident();
                tokens.push(match ident.as_str() {
                    "and" => Token::Keyword("and"),
                    "or" => Token::Keyword("or"),
                    "not" => Token::Keyword("not"),
                    "in" => Token::Keyword("in"),
                    "true" => Token::Keyword("true"),
                    "false" => Token::Keyword("false"),
                    "null" | "none" => Token::Keyword("null"),
                    _ => Token::Ident(ident),
                });
                continue;
            }
            match c {
                '*' => {
                    self.chars.next();
                    if let Some(&(_, '*')) = self.chars.peek() {
                        self.chars.next();
                        tokens.push(Token::Pow);
                    } else {
                        tokens.push(Token::Symbol('*'));
                    }
                }
                '=' => {
                    self.chars.next();
                    if let Some(&(_, '=')) = self.chars.peek() {
                        self.chars.next();
                        tokens.push(Token::CompareOp(CompareOp::Eq));
                    } else {
                        return Err(ExpressionError::Syntax(format!("unexpected '=' at {i}")));
                    }
                }
                '!' => {
                    self.chars.next();
                    if let Some(&(_, '=')) = self.chars.peek() {
                        self.chars.next();
                        tokens.push(Token::CompareOp(CompareOp::Ne));
                    } else {
                        return Err(ExpressionError::Syntax(format!("unexpected '!' at {i}")));
                    }
                }
                '<' => {
                    self.chars.next();
                    if let Some(&(_, '=')) = self.chars.peek() {
                        self.chars.next();
                        tokens.push(Token::CompareOp(CompareOp::Le));
                    } else {
                        tokens.push(Token::CompareOp(CompareOp::Lt));
                    }
                }
                '>' => {
                    self.chars.next();
                    if let Some(&(_, '=')) = self.chars.peek() {
                        self.chars.next();
                        tokens.push(Token::CompareOp(CompareOp::Ge));
                    } else {
                        tokens.push(Token::CompareOp(CompareOp::Gt));
                    }
                }
                '+' | '-' | '/' | '%' | '(' | ')' | ',' | '.' => {
                    self.chars.next();
                    tokens.push(Token::Symbol(c));
                }
                other => {
                    return Err(ExpressionError::Unsafe(format!("disallowed character '{other}'")));
                }
            }
        }
        tokens.push(Token::Eof);
        Ok(tokens)
    }

    fn lex_number(&mut self) -> Token {
        let start = self.chars.peek().unwrap().0;
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Number(self.src[start..end].parse().unwrap_or(f64::NAN))
    }

    fn lex_ident(&mut self) -> String {
        let start = self.chars.peek().unwrap().0;
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        self.src[start..end].to_string()
    }

    fn lex_string(&mut self, quote: char) -> Result<String, ExpressionError> {
        self.chars.next(); // consume opening quote
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(s),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => s.push('\n'),
                    Some((_, 't')) => s.push('\t'),
                    Some((_, c)) => s.push(c),
                    None => return Err(ExpressionError::Syntax("unterminated string".into())),
                },
                Some((_, c)) => s.push(c),
                None => return Err(ExpressionError::Syntax("unterminated string".into())),
            }
        }
    }
}

// ---------------------------------------------------------------------
// Parser (recursive descent, precedence climbing)
// ---------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(src: &str) -> Result<Expr, ExpressionError> {
        let tokens = Lexer::new(src).tokenize()?;
        let mut p = Parser { tokens, pos: 0 };
        let expr = p.parse_or()?;
        p.expect_eof()?;
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_eof(&self) -> Result<(), ExpressionError> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(ExpressionError::Syntax(format!("unexpected trailing token {other:?}"))),
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<(), ExpressionError> {
        match self.advance() {
            Token::Symbol(s) if s == c => Ok(()),
            other => Err(ExpressionError::Syntax(format!("expected '{c}', found {other:?}"))),
        }
    }

    // or -> and (KW_OR and)*
    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::Keyword("or")) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Logical(LogicalOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // and -> not_expr (KW_AND not_expr)*
    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Token::Keyword("and")) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Logical(LogicalOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // not_expr -> KW_NOT not_expr | membership
    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if matches!(self.peek(), Token::Keyword("not")) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_membership()
    }

    // membership -> compare ( (KW_NOT)? KW_IN compare )?
    fn parse_membership(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.parse_compare()?;
        let negate = if matches!(self.peek(), Token::Keyword("not")) {
            // Only consume as "not in"; otherwise it's a syntax error path for
            // standalone `not` which is handled by parse_not above.
            let save = self.pos;
            self.advance();
            if matches!(self.peek(), Token::Keyword("in")) {
                true
            } else {
                self.pos = save;
                return Ok(lhs);
            }
        } else {
            false
        };
        if matches!(self.peek(), Token::Keyword("in")) {
            self.advance();
            let rhs = self.parse_compare()?;
            return Ok(Expr::Membership { negate, item: Box::new(lhs), container: Box::new(rhs) });
        }
        if negate {
            return Err(ExpressionError::Syntax("expected 'in' after 'not'".into()));
        }
        Ok(lhs)
    }

    // compare -> additive (CMP_OP additive)*  -- chained, all must hold
    fn parse_compare(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.parse_additive()?;
        let mut chain = Vec::new();
        while let Token::CompareOp(op) = self.peek().clone() {
            self.advance();
            let rhs = self.parse_additive()?;
            chain.push((op, rhs));
        }
        if chain.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(chain, Box::new(first)))
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Token::Symbol('+') => {
                    self.advance();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Expr::Binary(BinOp::Add, Box::new(lhs), Box::new(rhs));
                }
                Token::Symbol('-') => {
                    self.advance();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Expr::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Token::Symbol('*') => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
                }
                Token::Symbol('/') => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Div, Box::new(lhs), Box::new(rhs));
                }
                Token::Symbol('%') => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Mod, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Token::Symbol('-') => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::Symbol('+') => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_power(),
        }
    }

    // power -> postfix (POW unary)?  -- right-associative
    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Token::Pow) {
            self.advance();
            let exp = self.parse_unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Keyword("true") => Ok(Expr::Bool(true)),
            Token::Keyword("false") => Ok(Expr::Bool(false)),
            Token::Keyword("null") => Ok(Expr::Null),
            Token::Ident(name) => {
                if matches!(self.peek(), Token::Symbol('(')) {
                    self.advance();
                    let args = self.parse_args()?;
                    if !SAFE_FUNCTIONS.contains(&name.as_str()) {
                        return Err(ExpressionError::UnknownFunction(name));
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    self.parse_attr_chain(Expr::Ident(name))
                }
            }
            Token::Symbol('(') => {
                let inner = self.parse_or()?;
                self.expect_symbol(')')?;
                Ok(inner)
            }
            other => Err(ExpressionError::Syntax(format!("unexpected token {other:?}"))),
        }
    }

    /// `a.b` dot-attribute access beyond a bare identifier is disallowed by
    /// the whitelist; the only case this grammar admits is none — attribute
    /// access happens only in template substitution (`domain::template`),
    /// not in the expression evaluator itself.
    fn parse_attr_chain(&mut self, base: Expr) -> Result<Expr, ExpressionError> {
        if matches!(self.peek(), Token::Symbol('.')) {
            return Err(ExpressionError::Unsafe("attribute access is not permitted".into()));
        }
        Ok(base)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Token::Symbol(')')) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.advance() {
                Token::Symbol(',') => continue,
                Token::Symbol(')') => break,
                other => return Err(ExpressionError::Syntax(format!("expected ',' or ')', found {other:?}"))),
            }
        }
        Ok(args)
    }
}

// ---------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------

fn eval_expr(expr: &Expr, ctx: &HashMap<String, Value>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => ctx
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UndefinedIdentifier(name.clone())),
        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                UnaryOp::Neg => Ok(Value::Number(-v.as_number()?)),
                UnaryOp::Pos => Ok(Value::Number(v.as_number()?)),
            }
        }
        Expr::Logical(op, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            match op {
                LogicalOp::And => {
                    if !l.truthy() {
                        Ok(l)
                    } else {
                        eval_expr(rhs, ctx)
                    }
                }
                LogicalOp::Or => {
                    if l.truthy() {
                        Ok(l)
                    } else {
                        eval_expr(rhs, ctx)
                    }
                }
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            eval_binary(*op, l, r)
        }
        Expr::Compare(chain, first) => {
            let mut prev = eval_expr(first, ctx)?;
            for (op, next_expr) in chain {
                let next = eval_expr(next_expr, ctx)?;
                if !compare(*op, &prev, &next)? {
                    return Ok(Value::Bool(false));
                }
                prev = next;
            }
            Ok(Value::Bool(true))
        }
        Expr::Membership { negate, item, container } => {
            let item_v = eval_expr(item, ctx)?;
            let container_v = eval_expr(container, ctx)?;
            let found = membership(&item_v, &container_v)?;
            Ok(Value::Bool(found != *negate))
        }
        Expr::Call(name, args) => {
            let values: Result<Vec<Value>, ExpressionError> =
                args.iter().map(|a| eval_expr(a, ctx)).collect();
            call_function(name, values?)
        }
    }
}

fn eval_binary(op: BinOp, l: Value, r: Value) -> Result<Value, ExpressionError> {
    if op == BinOp::Add {
        if let (Value::String(a), Value::String(b)) = (&l, &r) {
            return Ok(Value::String(format!("{a}{b}")));
        }
    }
    let a = l.as_number()?;
    let b = r.as_number()?;
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(ExpressionError::Type("division by zero".into()));
            }
            a / b
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ExpressionError::Type("modulo by zero".into()));
            }
            a % b
        }
        BinOp::Pow => a.powf(b),
    };
    Ok(Value::Number(result))
}

fn compare(op: CompareOp, l: &Value, r: &Value) -> Result<bool, ExpressionError> {
    let ord = match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => {
            return match op {
                CompareOp::Eq => Ok(l == r),
                CompareOp::Ne => Ok(l != r),
                _ => Err(ExpressionError::Type(format!(
                    "cannot order {} and {}",
                    l.type_name(),
                    r.type_name()
                ))),
            }
        }
    };
    let ord = ord.ok_or_else(|| ExpressionError::Type("NaN comparison".into()))?;
    Ok(match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Le => ord.is_le(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Ge => ord.is_ge(),
    })
}

fn membership(item: &Value, container: &Value) -> Result<bool, ExpressionError> {
    match container {
        Value::List(items) => Ok(items.contains(item)),
        Value::Map(map) => match item {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(ExpressionError::Type(format!(
                "map membership requires a string key, found {}",
                other.type_name()
            ))),
        },
        Value::String(haystack) => match item {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(ExpressionError::Type(format!(
                "string membership requires a string, found {}",
                other.type_name()
            ))),
        },
        other => Err(ExpressionError::Type(format!(
            "'in' requires a list, map or string container, found {}",
            other.type_name()
        ))),
    }
}

fn call_function(name: &str, args: Vec<Value>) -> Result<Value, ExpressionError> {
    match name {
        "len" => {
            let v = one_arg(name, &args)?;
            let n = match v {
                Value::String(s) => s.chars().count(),
                Value::List(l) => l.len(),
                Value::Map(m) => m.len(),
                other => {
                    return Err(ExpressionError::Type(format!(
                        "len() requires a string, list or map, found {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Number(n as f64))
        }
        "str" => Ok(Value::String(one_arg(name, &args)?.to_string())),
        "int" => Ok(Value::Number(one_arg(name, &args)?.as_number()?.trunc())),
        "float" => Ok(Value::Number(one_arg(name, &args)?.as_number()?)),
        "bool" => Ok(Value::Bool(one_arg(name, &args)?.truthy())),
        "abs" => Ok(Value::Number(one_arg(name, &args)?.as_number()?.abs())),
        "min" | "max" => {
            if args.len() != 2 {
                return Err(ExpressionError::ArgCount { function: if name == "min" { "min" } else { "max" }, expected: "2", got: args.len() });
            }
            let a = args[0].as_number()?;
            let b = args[1].as_number()?;
            Ok(Value::Number(if name == "min" { a.min(b) } else { a.max(b) }))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

fn one_arg(name: &'static str, args: &[Value]) -> Result<Value, ExpressionError> {
    if args.len() != 1 {
        return Err(ExpressionError::ArgCount { function: name, expected: "1", got: args.len() });
    }
    Ok(args[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn arithmetic_and_precedence() {
        let c = HashMap::new();
        assert_eq!(evaluate("2 + 3 * 4", &c).unwrap(), Value::Number(14.0));
        assert_eq!(evaluate("(2 + 3) * 4", &c).unwrap(), Value::Number(20.0));
        assert_eq!(evaluate("2 ** 3 ** 2", &c).unwrap(), Value::Number(512.0));
    }

    #[test]
    fn chained_comparison_is_lazy_and_correct() {
        let c = ctx(&[("x", Value::Number(10.0))]);
        assert_eq!(evaluate_bool("1 < x < 20", &c).unwrap(), true);
        assert_eq!(evaluate_bool("1 < x < 5", &c).unwrap(), false);
    }

    #[test]
    fn logical_short_circuit() {
        let c = ctx(&[("a", Value::Bool(false))]);
        // `undefined` would error if evaluated; short circuit must avoid it.
        assert_eq!(evaluate_bool("a and undefined", &c).unwrap(), false);
        let c2 = ctx(&[("a", Value::Bool(true))]);
        assert_eq!(evaluate_bool("a or undefined", &c2).unwrap(), true);
    }

    #[test]
    fn membership_checks() {
        let c = ctx(&[("xs", Value::List(vec![Value::Number(1.0), Value::Number(2.0)]))]);
        assert_eq!(evaluate_bool("1 in xs", &c).unwrap(), true);
        assert_eq!(evaluate_bool("3 not in xs", &c).unwrap(), true);
    }

    #[test]
    fn whitelisted_functions() {
        let c = ctx(&[("xs", Value::List(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]))]);
        assert_eq!(evaluate("len(xs)", &c).unwrap(), Value::Number(3.0));
        assert_eq!(evaluate("max(1, 5)", &c).unwrap(), Value::Number(5.0));
    }

    #[test]
    fn rejects_attribute_access() {
        let c = ctx(&[("x", Value::Map(HashMap::new()))]);
        assert!(matches!(evaluate("x.y", &c), Err(ExpressionError::Unsafe(_))));
    }

    #[test]
    fn rejects_unknown_function() {
        let c = HashMap::new();
        assert!(matches!(evaluate("eval(1)", &c), Err(ExpressionError::UnknownFunction(_))));
    }

    #[test]
    fn rejects_undefined_identifier() {
        let c = HashMap::new();
        assert!(matches!(evaluate("missing", &c), Err(ExpressionError::UndefinedIdentifier(_))));
    }
}
