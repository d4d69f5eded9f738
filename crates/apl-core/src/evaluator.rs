#![forbid(unsafe_code)]

//! Data-binding evaluation.
//!
//! The engine only depends on the [`Evaluator`] contract: a JSON value plus a
//! [`DataContext`] in, a JSON value out. [`DefaultEvaluator`] implements the
//! `${...}` binding syntax with a small expression language that covers what
//! command documents typically bind (paths, literals, arithmetic, comparisons,
//! boolean logic and the conditional operator).
//!
//! # Failure Modes
//!
//! Evaluation never fails. Unknown names, malformed expressions and type
//! mismatches all evaluate to `null`, so a document mistake degrades into a
//! falsy or empty value instead of aborting the command that referenced it.

use serde_json::{Map, Number, Value};

use crate::context::DataContext;

/// Contract between the engine and an expression evaluator.
pub trait Evaluator {
    /// Evaluate a single value. Strings containing `${...}` bindings are
    /// resolved; every other value is returned unchanged.
    fn evaluate(&self, value: &Value, ctx: &DataContext) -> Value;

    /// Evaluate a value and, for arrays and objects, every nested string.
    fn evaluate_recursive(&self, value: &Value, ctx: &DataContext) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.evaluate_recursive(item, ctx))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.evaluate_recursive(v, ctx)))
                    .collect::<Map<String, Value>>(),
            ),
            other => self.evaluate(other, ctx),
        }
    }
}

/// The built-in `${...}` evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
    fn evaluate(&self, value: &Value, ctx: &DataContext) -> Value {
        match value {
            Value::String(s) => interpolate(s, ctx),
            other => other.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Truthiness of a bound value: `null`, `false`, `0` and `""` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric view of a value. Numeric strings are accepted.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Integer view of a value, truncating toward zero.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        other => as_f64(other).map(|f| f as i64),
    }
}

/// Render a value the way string interpolation does.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Convert an `f64` into a JSON number, preferring an integer representation.
pub fn number_value(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

fn interpolate(text: &str, ctx: &DataContext) -> Value {
    let segments = split_bindings(text);
    match segments.as_slice() {
        [] => Value::String(String::new()),
        [Segment::Literal(lit)] => Value::String((*lit).to_owned()),
        [Segment::Binding(expr)] => eval_expression(expr, ctx),
        _ => {
            let mut out = String::new();
            for segment in &segments {
                match segment {
                    Segment::Literal(lit) => out.push_str(lit),
                    Segment::Binding(expr) => out.push_str(&display_string(&eval_expression(expr, ctx))),
                }
            }
            Value::String(out)
        }
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Binding(&'a str),
}

fn split_bindings(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let bytes = text.as_bytes();
    let mut literal_start = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            if let Some(end) = find_binding_end(bytes, i + 2) {
                if literal_start < i {
                    segments.push(Segment::Literal(&text[literal_start..i]));
                }
                segments.push(Segment::Binding(&text[i + 2..end]));
                i = end + 1;
                literal_start = i;
                continue;
            }
        }
        i += 1;
    }
    if literal_start < text.len() {
        segments.push(Segment::Literal(&text[literal_start..]));
    }
    segments
}

fn find_binding_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'{' => depth += 1,
                b'}' if depth == 0 => return Some(start + offset),
                b'}' => depth -= 1,
                _ => {}
            },
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Expression language
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: [&str; 23] = [
    "&&", "||", "==", "!=", "<=", ">=", "(", ")", "[", "]", ".", "?", ":", "!", "-", "+", "*",
    "/", "%", "<", ">", ",", "=",
];

fn tokenize(expr: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let lexeme: String = chars[start..i].iter().collect();
            tokens.push(Token::Num(lexeme.parse().ok()?));
        } else if c == '\'' || c == '"' {
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i] != c {
                i += 1;
            }
            if i >= chars.len() {
                return None;
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS.iter().find(|op| rest.starts_with(**op))?;
            tokens.push(Token::Op(op));
            i += op.len();
        }
    }
    Some(tokens)
}

fn eval_expression(expr: &str, ctx: &DataContext) -> Value {
    let Some(tokens) = tokenize(expr) else {
        return Value::Null;
    };
    if tokens.is_empty() {
        return Value::Null;
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        ctx,
    };
    match parser.ternary() {
        Some(value) if parser.pos == parser.tokens.len() => value,
        _ => Value::Null,
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    ctx: &'a DataContext,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ternary(&mut self) -> Option<Value> {
        let cond = self.or()?;
        if self.eat("?") {
            let then = self.ternary()?;
            if !self.eat(":") {
                return None;
            }
            let otherwise = self.ternary()?;
            return Some(if truthy(&cond) { then } else { otherwise });
        }
        Some(cond)
    }

    fn or(&mut self) -> Option<Value> {
        let mut left = self.and()?;
        while self.eat("||") {
            let right = self.and()?;
            left = if truthy(&left) { left } else { right };
        }
        Some(left)
    }

    fn and(&mut self) -> Option<Value> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            let right = self.equality()?;
            left = if truthy(&left) { right } else { left };
        }
        Some(left)
    }

    fn equality(&mut self) -> Option<Value> {
        let mut left = self.comparison()?;
        loop {
            if self.eat("==") {
                let right = self.comparison()?;
                left = Value::Bool(values_equal(&left, &right));
            } else if self.eat("!=") {
                let right = self.comparison()?;
                left = Value::Bool(!values_equal(&left, &right));
            } else {
                return Some(left);
            }
        }
    }

    fn comparison(&mut self) -> Option<Value> {
        let mut left = self.additive()?;
        while let Some(op @ ("<" | ">" | "<=" | ">=")) = self.peek_op() {
            self.pos += 1;
            let right = self.additive()?;
            let ordering = match (&left, &right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => as_f64(&left).zip(as_f64(&right)).and_then(|(a, b)| a.partial_cmp(&b)),
            };
            left = Value::Bool(ordering.is_some_and(|o| match op {
                "<" => o.is_lt(),
                ">" => o.is_gt(),
                "<=" => o.is_le(),
                _ => o.is_ge(),
            }));
        }
        Some(left)
    }

    fn additive(&mut self) -> Option<Value> {
        let mut left = self.multiplicative()?;
        while let Some(op @ ("+" | "-")) = self.peek_op() {
            self.pos += 1;
            let right = self.multiplicative()?;
            left = if op == "+" && (left.is_string() || right.is_string()) {
                Value::String(display_string(&left) + &display_string(&right))
            } else {
                match (as_f64(&left), as_f64(&right)) {
                    (Some(a), Some(b)) if op == "+" => number_value(a + b),
                    (Some(a), Some(b)) => number_value(a - b),
                    _ => Value::Null,
                }
            };
        }
        Some(left)
    }

    fn multiplicative(&mut self) -> Option<Value> {
        let mut left = self.unary()?;
        while let Some(op @ ("*" | "/" | "%")) = self.peek_op() {
            self.pos += 1;
            let right = self.unary()?;
            left = match (as_f64(&left), as_f64(&right)) {
                (Some(a), Some(b)) => match op {
                    "*" => number_value(a * b),
                    "/" => number_value(a / b),
                    _ => number_value(a % b),
                },
                _ => Value::Null,
            };
        }
        Some(left)
    }

    fn unary(&mut self) -> Option<Value> {
        if self.eat("!") {
            let value = self.unary()?;
            return Some(Value::Bool(!truthy(&value)));
        }
        if self.eat("-") {
            let value = self.unary()?;
            return Some(as_f64(&value).map_or(Value::Null, |f| number_value(-f)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Option<Value> {
        let mut value = self.primary()?;
        loop {
            if self.eat(".") {
                let Some(Token::Ident(name)) = self.tokens.get(self.pos).cloned() else {
                    return None;
                };
                self.pos += 1;
                value = member(&value, &Value::String(name));
            } else if self.eat("[") {
                let index = self.ternary()?;
                if !self.eat("]") {
                    return None;
                }
                value = member(&value, &index);
            } else {
                return Some(value);
            }
        }
    }

    fn primary(&mut self) -> Option<Value> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        match token {
            Token::Num(n) => Some(number_value(n)),
            Token::Str(s) => Some(Value::String(s)),
            Token::Ident(name) => Some(match name.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                _ => self.ctx.lookup(&name).cloned().unwrap_or(Value::Null),
            }),
            Token::Op("(") => {
                let value = self.ternary()?;
                self.eat(")").then_some(value)
            }
            Token::Op(_) => None,
        }
    }
}

fn member(container: &Value, key: &Value) -> Value {
    match (container, key) {
        (Value::Object(map), Value::String(name)) => map.get(name).cloned().unwrap_or(Value::Null),
        (Value::Object(map), other) => map.get(&display_string(other)).cloned().unwrap_or(Value::Null),
        (Value::Array(items), Value::String(name)) if name == "length" => Value::from(items.len()),
        (Value::String(s), Value::String(name)) if name == "length" => Value::from(s.chars().count()),
        (Value::Array(items), index) => {
            let Some(mut i) = as_i64(index) else {
                return Value::Null;
            };
            if i < 0 {
                i += items.len() as i64;
            }
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}
