//! Sandboxed expression language for configurable safety rules.
//!
//! A deliberately small language: literals, the fixed rule bindings,
//! field/index access into the `metadata` map, comparison, boolean and
//! arithmetic operators. The grammar has no call syntax, no statics and no
//! constructors, so a rule expression cannot reach outside its bindings.
//! Evaluation is bounded by a wall-clock deadline and a step budget.

use std::collections::HashMap;
use std::time::Instant;

use hearth_domain::{DeviceValue, SafetyContext};

use crate::error::ExprError;

/// Upper bound on AST nodes visited in one evaluation.
const MAX_STEPS: u32 = 10_000;

// ── Values ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            ),
        }
    }

    pub fn from_device(v: &DeviceValue) -> Value {
        match v {
            DeviceValue::Relay(on) => Value::Bool(*on),
            DeviceValue::Fan(speed) => Value::Int(speed.get() as i64),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "object",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Equality with int/float coercion; differing non-numeric types are unequal.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ── Bindings ──────────────────────────────────────────────────────────────────

/// The fixed variable set a rule expression may reference.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    vars: HashMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.vars.insert(name.into(), value);
        self
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// The standard binding set derived from a safety context:
    /// `deviceId`, `deviceType`, `proposedValue`, `currentValue`,
    /// `reportedValue`, `systemType`, `metadata`.
    pub fn for_context(ctx: &SafetyContext) -> Self {
        let mut bindings = Bindings::new();
        bindings.set("deviceId", Value::Str(ctx.device_id.to_string()));
        bindings.set("deviceType", Value::Str(ctx.device_type.as_str().to_string()));
        bindings.set("proposedValue", Value::from_device(&ctx.proposed));
        bindings.set(
            "currentValue",
            ctx.current_desired().map(Value::from_device).unwrap_or(Value::Null),
        );
        bindings.set(
            "reportedValue",
            ctx.reported_value().map(Value::from_device).unwrap_or(Value::Null),
        );
        bindings.set(
            "systemType",
            ctx.system
                .as_ref()
                .map(|s| Value::Str(s.system_type.to_string()))
                .unwrap_or(Value::Null),
        );
        bindings.set(
            "metadata",
            Value::Map(
                ctx.metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        );
        bindings
    }
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    OrOr,
    AndAnd,
    Not,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
}

fn lex(src: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => { tokens.push((Token::LParen, i)); i += 1 }
            ')' => { tokens.push((Token::RParen, i)); i += 1 }
            '[' => { tokens.push((Token::LBracket, i)); i += 1 }
            ']' => { tokens.push((Token::RBracket, i)); i += 1 }
            '.' => { tokens.push((Token::Dot, i)); i += 1 }
            '+' => { tokens.push((Token::Plus, i)); i += 1 }
            '-' => { tokens.push((Token::Minus, i)); i += 1 }
            '*' => { tokens.push((Token::Star, i)); i += 1 }
            '/' => { tokens.push((Token::Slash, i)); i += 1 }
            '%' => { tokens.push((Token::Percent, i)); i += 1 }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push((Token::OrOr, i));
                    i += 2;
                } else {
                    return Err(ExprError::Parse { offset: i, message: "expected '||'".into() });
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((Token::AndAnd, i));
                    i += 2;
                } else {
                    return Err(ExprError::Parse { offset: i, message: "expected '&&'".into() });
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Eq, i));
                    i += 2;
                } else {
                    return Err(ExprError::Parse {
                        offset: i,
                        message: "assignment is not supported; use '=='".into(),
                    });
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Ne, i));
                    i += 2;
                } else {
                    tokens.push((Token::Not, i));
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Le, i));
                    i += 2;
                } else {
                    tokens.push((Token::Lt, i));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Ge, i));
                    i += 2;
                } else {
                    tokens.push((Token::Gt, i));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut s = String::new();
                loop {
                    match bytes.get(i) {
                        Some(&b) if b as char == quote => {
                            i += 1;
                            break;
                        }
                        Some(&b) => {
                            s.push(b as char);
                            i += 1;
                        }
                        None => {
                            return Err(ExprError::Parse {
                                offset: start,
                                message: "unterminated string literal".into(),
                            })
                        }
                    }
                }
                tokens.push((Token::Str(s), start));
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i < bytes.len()
                    && bytes[i] == b'.'
                    && bytes.get(i + 1).map_or(false, |b| (*b as char).is_ascii_digit())
                {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                        i += 1;
                    }
                }
                let text = &src[start..i];
                if is_float {
                    let value = text.parse::<f64>().map_err(|e| ExprError::Parse {
                        offset: start,
                        message: e.to_string(),
                    })?;
                    tokens.push((Token::Float(value), start));
                } else {
                    let value = text.parse::<i64>().map_err(|e| ExprError::Parse {
                        offset: start,
                        message: e.to_string(),
                    })?;
                    tokens.push((Token::Int(value), start));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &src[start..i];
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((token, start));
            }
            other => {
                return Err(ExprError::Parse {
                    offset: i,
                    message: format!("unexpected character '{other}'"),
                })
            }
        }
    }
    Ok(tokens)
}

// ── AST & parser ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
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

#[derive(Debug, Clone)]
enum Node {
    Literal(Value),
    Ident(String),
    Field(Box<Node>, String),
    Not(Box<Node>),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
}

/// A parsed, reusable expression.
#[derive(Debug, Clone)]
pub struct Expression {
    root: Node,
    source: String,
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    src_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.src_len)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), ExprError> {
        let offset = self.offset();
        match self.bump() {
            Some(found) if found == token => Ok(()),
            found => Err(ExprError::Parse {
                offset,
                message: format!("expected {token:?}, found {found:?}"),
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.bump();
            let right = self.parse_and()?;
            left = Node::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.bump();
            let right = self.parse_comparison()?;
            left = Node::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Node, ExprError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.bump();
        let right = self.parse_additive()?;
        Ok(Node::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        match self.peek() {
            Some(Token::Not) => {
                self.bump();
                Ok(Node::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Minus) => {
                self.bump();
                Ok(Node::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    let offset = self.offset();
                    match self.bump() {
                        Some(Token::Ident(name)) => {
                            node = Node::Field(Box::new(node), name);
                        }
                        found => {
                            return Err(ExprError::Parse {
                                offset,
                                message: format!("expected field name, found {found:?}"),
                            })
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let offset = self.offset();
                    let key = match self.bump() {
                        Some(Token::Str(key)) => key,
                        found => {
                            return Err(ExprError::Parse {
                                offset,
                                message: format!("expected string index, found {found:?}"),
                            })
                        }
                    };
                    self.expect(Token::RBracket)?;
                    node = Node::Field(Box::new(node), key);
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::True) => Ok(Node::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Node::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Node::Literal(Value::Null)),
            Some(Token::Int(i)) => Ok(Node::Literal(Value::Int(i))),
            Some(Token::Float(f)) => Ok(Node::Literal(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Node::Literal(Value::Str(s))),
            Some(Token::Ident(name)) => Ok(Node::Ident(name)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            found => Err(ExprError::Parse {
                offset,
                message: format!("expected expression, found {found:?}"),
            }),
        }
    }
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0, src_len: source.len() };
        let root = parser.parse_or()?;
        if parser.peek().is_some() {
            return Err(ExprError::Parse {
                offset: parser.offset(),
                message: "trailing input after expression".into(),
            });
        }
        Ok(Expression { root, source: source.to_string() })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against the bindings, aborting past `deadline` or after the
    /// step budget. The deadline is re-checked on every AST node, so a long
    /// expression cannot overshoot by more than one node's work.
    pub fn eval(&self, bindings: &Bindings, deadline: Instant) -> Result<Value, ExprError> {
        let mut budget = Budget { deadline, steps: 0 };
        eval_node(&self.root, bindings, &mut budget)
    }
}

// ── Evaluation ────────────────────────────────────────────────────────────────

struct Budget {
    deadline: Instant,
    steps: u32,
}

impl Budget {
    fn tick(&mut self) -> Result<(), ExprError> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(ExprError::StepBudgetExceeded);
        }
        if Instant::now() >= self.deadline {
            return Err(ExprError::Timeout);
        }
        Ok(())
    }
}

fn expect_bool(v: Value, role: &str) -> Result<bool, ExprError> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::TypeMismatch(format!(
            "{role} requires a bool, got {}",
            other.type_name()
        ))),
    }
}

fn eval_node(node: &Node, bindings: &Bindings, budget: &mut Budget) -> Result<Value, ExprError> {
    budget.tick()?;
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Ident(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        Node::Field(base, key) => match eval_node(base, bindings, budget)? {
            Value::Map(map) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
            _ => Err(ExprError::FieldAccessOnNonObject(key.clone())),
        },
        Node::Not(inner) => {
            let v = eval_node(inner, bindings, budget)?;
            Ok(Value::Bool(!expect_bool(v, "'!'")?))
        }
        Node::Neg(inner) => match eval_node(inner, bindings, budget)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(ExprError::TypeMismatch(format!(
                "unary '-' requires a number, got {}",
                other.type_name()
            ))),
        },
        Node::Binary(op, left, right) => match op {
            BinOp::Or => {
                if expect_bool(eval_node(left, bindings, budget)?, "'||'")? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(expect_bool(eval_node(right, bindings, budget)?, "'||'")?))
                }
            }
            BinOp::And => {
                if !expect_bool(eval_node(left, bindings, budget)?, "'&&'")? {
                    Ok(Value::Bool(false))
                } else {
                    Ok(Value::Bool(expect_bool(eval_node(right, bindings, budget)?, "'&&'")?))
                }
            }
            BinOp::Eq => {
                let l = eval_node(left, bindings, budget)?;
                let r = eval_node(right, bindings, budget)?;
                Ok(Value::Bool(value_eq(&l, &r)))
            }
            BinOp::Ne => {
                let l = eval_node(left, bindings, budget)?;
                let r = eval_node(right, bindings, budget)?;
                Ok(Value::Bool(!value_eq(&l, &r)))
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let l = eval_node(left, bindings, budget)?;
                let r = eval_node(right, bindings, budget)?;
                let (Some(x), Some(y)) = (l.as_number(), r.as_number()) else {
                    return Err(ExprError::TypeMismatch(format!(
                        "ordering requires numbers, got {} and {}",
                        l.type_name(),
                        r.type_name()
                    )));
                };
                Ok(Value::Bool(match op {
                    BinOp::Lt => x < y,
                    BinOp::Le => x <= y,
                    BinOp::Gt => x > y,
                    _ => x >= y,
                }))
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                let l = eval_node(left, bindings, budget)?;
                let r = eval_node(right, bindings, budget)?;
                arithmetic(*op, l, r)
            }
        },
    }
}

fn arithmetic(op: BinOp, l: Value, r: Value) -> Result<Value, ExprError> {
    // Integer arithmetic stays integral; any float operand promotes.
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinOp::Add => Ok(Value::Int(a.wrapping_add(b))),
                BinOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
                BinOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
                BinOp::Div => {
                    if b == 0 {
                        Err(ExprError::DivisionByZero)
                    } else {
                        Ok(Value::Int(a / b))
                    }
                }
                BinOp::Rem => {
                    if b == 0 {
                        Err(ExprError::DivisionByZero)
                    } else {
                        Ok(Value::Int(a % b))
                    }
                }
                _ => unreachable!("non-arithmetic op"),
            }
        }
        _ => {
            let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
                return Err(ExprError::TypeMismatch(format!(
                    "arithmetic requires numbers, got {} and {}",
                    l.type_name(),
                    r.type_name()
                )));
            };
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div => {
                    if b == 0.0 {
                        Err(ExprError::DivisionByZero)
                    } else {
                        Ok(Value::Float(a / b))
                    }
                }
                BinOp::Rem => {
                    if b == 0.0 {
                        Err(ExprError::DivisionByZero)
                    } else {
                        Ok(Value::Float(a % b))
                    }
                }
                _ => unreachable!("non-arithmetic op"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn eval(src: &str, bindings: &Bindings) -> Result<Value, ExprError> {
        Expression::parse(src)?.eval(bindings, Instant::now() + Duration::from_millis(100))
    }

    fn simple_bindings() -> Bindings {
        let mut b = Bindings::new();
        b.set("proposedValue", Value::Int(4));
        b.set("deviceType", Value::Str("FAN".into()));
        b.set("currentValue", Value::Null);
        let mut meta = HashMap::new();
        meta.insert("waterTemp".to_string(), Value::Float(82.5));
        b.set("metadata", Value::Map(meta));
        b
    }

    #[test]
    fn literals_and_arithmetic() {
        let b = Bindings::new();
        assert_eq!(eval("1 + 2 * 3", &b).unwrap(), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3", &b).unwrap(), Value::Int(9));
        assert_eq!(eval("10 / 4", &b).unwrap(), Value::Int(2));
        assert_eq!(eval("10.0 / 4", &b).unwrap(), Value::Float(2.5));
        assert_eq!(eval("-3 + 1", &b).unwrap(), Value::Int(-2));
        assert_eq!(eval("7 % 3", &b).unwrap(), Value::Int(1));
    }

    #[test]
    fn comparisons_and_boolean_logic() {
        let b = simple_bindings();
        assert_eq!(eval("proposedValue > 3", &b).unwrap(), Value::Bool(true));
        assert_eq!(
            eval("deviceType == 'FAN' && proposedValue >= 4", &b).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(eval("!(proposedValue == 4)", &b).unwrap(), Value::Bool(false));
        assert_eq!(eval("1 == 1.0", &b).unwrap(), Value::Bool(true));
        assert_eq!(eval("currentValue == null", &b).unwrap(), Value::Bool(true));
    }

    #[test]
    fn short_circuit_skips_right_side() {
        let b = Bindings::new();
        // The right operand references an unknown identifier but is never reached.
        assert_eq!(eval("false && missing > 1", &b).unwrap(), Value::Bool(false));
        assert_eq!(eval("true || missing > 1", &b).unwrap(), Value::Bool(true));
    }

    #[test]
    fn metadata_access_by_field_and_index() {
        let b = simple_bindings();
        assert_eq!(eval("metadata.waterTemp > 80", &b).unwrap(), Value::Bool(true));
        assert_eq!(eval("metadata['waterTemp'] > 80", &b).unwrap(), Value::Bool(true));
        // Missing keys read as null rather than erroring.
        assert_eq!(eval("metadata.absent == null", &b).unwrap(), Value::Bool(true));
    }

    #[test]
    fn field_access_on_scalars_is_rejected() {
        let b = simple_bindings();
        assert!(matches!(
            eval("proposedValue.speed", &b),
            Err(ExprError::FieldAccessOnNonObject(_))
        ));
    }

    #[test]
    fn unknown_identifiers_and_type_errors() {
        let b = Bindings::new();
        assert!(matches!(eval("nope", &b), Err(ExprError::UnknownIdentifier(_))));
        assert!(matches!(eval("1 && true", &b), Err(ExprError::TypeMismatch(_))));
        assert!(matches!(eval("'a' < 'b'", &b), Err(ExprError::TypeMismatch(_))));
        assert!(matches!(eval("1 / 0", &b), Err(ExprError::DivisionByZero)));
    }

    #[test]
    fn call_syntax_does_not_parse() {
        assert!(Expression::parse("metadata.get('x')").is_err());
        assert!(Expression::parse("System.exit(1)").is_err());
        assert!(Expression::parse("new Thing()").is_err());
    }

    #[test]
    fn assignment_does_not_parse() {
        assert!(Expression::parse("proposedValue = 3").is_err());
    }

    #[test]
    fn deadline_aborts_evaluation() {
        let b = Bindings::new();
        let expr = Expression::parse("1 + 1").unwrap();
        let already_passed = Instant::now() - Duration::from_millis(1);
        assert!(matches!(expr.eval(&b, already_passed), Err(ExprError::Timeout)));
    }
}
