//! Guard expressions.
//!
//! A guard is either a typed closure over the [`AttributeContext`] or a small
//! interpreted expression. The expression language supports:
//!
//! - `name` - predicate `name` if registered, otherwise attribute presence
//! - `name == value` - equality (strings, null, booleans, numbers)
//! - `name != value` - inequality
//! - `name > value`, `>=`, `<`, `<=` - numeric comparison of the attribute
//! - `!expr` - logical NOT
//! - `expr && expr` - logical AND (higher precedence than OR)
//! - `expr || expr` - logical OR
//! - `(expr)` - grouping
//!
//! Examples:
//! - `!rejected` - no rejection recorded
//! - `!issuance_in_institution && !rejected`
//! - `issue_method == "mfc"`
//! - `attempts <= 10`

use crate::context::AttributeContext;
use crate::error::CoreError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Typed guard closure.
pub type GuardFn = Arc<dyn Fn(&AttributeContext) -> Result<bool, CoreError> + Send + Sync>;

/// Edge guard.
#[derive(Clone)]
pub enum Guard {
    Expr(GuardExpr),
    Fn(GuardFn),
}

impl Guard {
    /// Parses an expression guard.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        GuardExpr::parse(s).map(Guard::Expr)
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&AttributeContext) -> Result<bool, CoreError> + Send + Sync + 'static,
    {
        Guard::Fn(Arc::new(f))
    }

    pub fn evaluate(&self, ctx: &AttributeContext) -> Result<bool, CoreError> {
        match self {
            Guard::Expr(expr) => expr.evaluate(ctx),
            Guard::Fn(f) => f(ctx),
        }
    }

    /// Evaluates an optional guard (None = always true).
    pub fn evaluate_opt(guard: Option<&Guard>, ctx: &AttributeContext) -> Result<bool, CoreError> {
        guard.map(|g| g.evaluate(ctx)).unwrap_or(Ok(true))
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            Guard::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    /// Predicate result or attribute presence.
    Truthy(String),
    /// Equality comparison.
    Eq(String, Value),
    /// Inequality comparison.
    Ne(String, Value),
    /// Greater than.
    Gt(String, f64),
    /// Greater or equal.
    Ge(String, f64),
    /// Less than.
    Lt(String, f64),
    /// Less or equal.
    Le(String, f64),
    /// Logical AND.
    And(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical OR.
    Or(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical NOT.
    Not(Box<GuardExpr>),
}

/// What a name resolves to inside an expression.
enum Operand<'a> {
    Bool(bool),
    Text(&'a str),
    Null,
}

impl GuardExpr {
    /// Parses a guard expression from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::InvalidGuard {
                reason: "empty guard expression".to_string(),
            });
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos != s.len() {
            return Err(CoreError::InvalidGuard {
                reason: format!("unexpected input at offset {}", parser.pos),
            });
        }
        Ok(expr)
    }

    /// Evaluates the guard against a context.
    pub fn evaluate(&self, ctx: &AttributeContext) -> Result<bool, CoreError> {
        Ok(match self {
            GuardExpr::Truthy(name) => ctx.truthy(name)?,
            GuardExpr::Eq(name, expected) => operand_equals(&resolve(ctx, name)?, expected),
            GuardExpr::Ne(name, expected) => !operand_equals(&resolve(ctx, name)?, expected),
            GuardExpr::Gt(name, expected) => as_f64(ctx, name).is_some_and(|v| v > *expected),
            GuardExpr::Ge(name, expected) => as_f64(ctx, name).is_some_and(|v| v >= *expected),
            GuardExpr::Lt(name, expected) => as_f64(ctx, name).is_some_and(|v| v < *expected),
            GuardExpr::Le(name, expected) => as_f64(ctx, name).is_some_and(|v| v <= *expected),
            GuardExpr::And(left, right) => left.evaluate(ctx)? && right.evaluate(ctx)?,
            GuardExpr::Or(left, right) => left.evaluate(ctx)? || right.evaluate(ctx)?,
            GuardExpr::Not(inner) => !inner.evaluate(ctx)?,
        })
    }

    /// Names referenced by the expression, in order of appearance.
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            GuardExpr::Truthy(n)
            | GuardExpr::Eq(n, _)
            | GuardExpr::Ne(n, _)
            | GuardExpr::Gt(n, _)
            | GuardExpr::Ge(n, _)
            | GuardExpr::Lt(n, _)
            | GuardExpr::Le(n, _) => out.push(n),
            GuardExpr::And(l, r) | GuardExpr::Or(l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
            GuardExpr::Not(inner) => inner.collect_names(out),
        }
    }
}

fn resolve<'a>(ctx: &'a AttributeContext, name: &str) -> Result<Operand<'a>, CoreError> {
    if let Some(result) = ctx.predicate(name) {
        return result.map(Operand::Bool);
    }
    Ok(match ctx.get(name) {
        Some(v) => Operand::Text(v),
        None => Operand::Null,
    })
}

fn operand_equals(operand: &Operand<'_>, expected: &Value) -> bool {
    match (operand, expected) {
        (Operand::Null, Value::Null) => true,
        (Operand::Bool(a), Value::Bool(b)) => a == b,
        (Operand::Text(a), Value::String(b)) => a == b,
        (Operand::Text(a), Value::Bool(b)) => a
            .trim()
            .to_ascii_lowercase()
            .parse::<bool>()
            .map(|v| v == *b)
            .unwrap_or(false),
        (Operand::Text(a), Value::Number(b)) => a
            .trim()
            .parse::<f64>()
            .ok()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        _ => false,
    }
}

fn as_f64(ctx: &AttributeContext, name: &str) -> Option<f64> {
    ctx.get(name).and_then(|v| v.trim().parse::<f64>().ok())
}

/// Simple recursive descent parser for guard expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<GuardExpr, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            self.skip_whitespace();
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            self.skip_whitespace();
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            self.skip_whitespace();
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('(') {
            self.pos += 1;
            let expr = self.parse_expr()?;
            self.skip_whitespace();
            if self.peek_char() != Some(')') {
                return Err(CoreError::InvalidGuard {
                    reason: "expected ')'".to_string(),
                });
            }
            self.pos += 1;
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();
        let name = self.parse_name()?;
        self.skip_whitespace();

        if self.peek_str("==") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(GuardExpr::Eq(name, value));
        }

        if self.peek_str("!=") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(GuardExpr::Ne(name, value));
        }

        if self.peek_str(">=") {
            self.pos += 2;
            return Ok(GuardExpr::Ge(name, self.parse_number()?));
        }

        if self.peek_str("<=") {
            self.pos += 2;
            return Ok(GuardExpr::Le(name, self.parse_number()?));
        }

        if self.peek_char() == Some('>') {
            self.pos += 1;
            return Ok(GuardExpr::Gt(name, self.parse_number()?));
        }

        if self.peek_char() == Some('<') {
            self.pos += 1;
            return Ok(GuardExpr::Lt(name, self.parse_number()?));
        }

        Ok(GuardExpr::Truthy(name))
    }

    fn parse_name(&mut self) -> Result<String, CoreError> {
        let start = self.pos;

        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let name = &self.input[start..self.pos];
        if name.is_empty() {
            return Err(CoreError::InvalidGuard {
                reason: format!("expected a name at offset {}", start),
            });
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(CoreError::InvalidGuard {
                reason: format!("name cannot start with a digit: '{}'", name),
            });
        }

        Ok(name.to_string())
    }

    fn parse_value(&mut self) -> Result<Value, CoreError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];

        if rest.starts_with("true") {
            self.pos += 4;
            return Ok(Value::Bool(true));
        }
        if rest.starts_with("false") {
            self.pos += 5;
            return Ok(Value::Bool(false));
        }
        if rest.starts_with("null") {
            self.pos += 4;
            return Ok(Value::Null);
        }

        if rest.starts_with('"') {
            return self.parse_string_value();
        }

        let num = self.parse_number()?;
        serde_json::Number::from_f64(num)
            .map(Value::Number)
            .ok_or_else(|| CoreError::InvalidGuard {
                reason: format!("number out of range: {}", num),
            })
    }

    fn parse_string_value(&mut self) -> Result<Value, CoreError> {
        // opening quote checked by caller
        self.pos += 1;

        let mut out = String::new();
        let mut chars = self.input[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(Value::String(out));
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c => out.push(c),
            }
        }

        Err(CoreError::InvalidGuard {
            reason: "unterminated string".to_string(),
        })
    }

    fn parse_number(&mut self) -> Result<f64, CoreError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.peek_char() == Some('.') {
            self.pos += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| CoreError::InvalidGuard {
            reason: format!("invalid number: '{}'", num_str),
        })
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}
