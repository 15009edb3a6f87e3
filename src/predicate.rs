//! Boolean row predicates for `DeleteRow` and `Retain` rules.
//!
//! A predicate is a SQL boolean expression (`ZIPCODE IS NULL`,
//! `AGE < 18 AND COUNTRY IN ('NL', 'BE')`) parsed once with `sqlparser` and
//! evaluated against each row in memory. Evaluation follows SQL three-valued
//! logic: a comparison involving NULL is unknown, and only a definite TRUE
//! matches.

use crate::error::StrategyError;
use crate::value::{Row, Value};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value as SqlValue};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A parsed row predicate
#[derive(Debug)]
pub struct Predicate {
    source: String,
    expr: Expr,
    like_cache: RefCell<HashMap<(String, bool, Option<char>), Regex>>,
}

impl Predicate {
    /// Parse `source` as a boolean expression
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::InvalidPredicate` if the text is not a single
    /// well-formed expression.
    pub fn parse(source: &str) -> Result<Self, StrategyError> {
        let invalid = |reason: String| StrategyError::InvalidPredicate {
            predicate: source.to_string(),
            reason,
        };
        if source.trim().is_empty() {
            return Err(invalid("predicate is empty".to_string()));
        }
        let dialect = GenericDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(source)
            .map_err(|e| invalid(e.to_string()))?;
        let expr = parser.parse_expr().map_err(|e| invalid(e.to_string()))?;
        let trailing = parser.peek_token();
        if trailing.token != Token::EOF {
            return Err(invalid(format!("unexpected `{}` after expression", trailing.token)));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
            like_cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the predicate is definitely true for `row`
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::InvalidPredicate` when the expression references
    /// an unknown column or uses an unsupported construct.
    pub fn matches(&self, row: &Row) -> Result<bool, StrategyError> {
        let result = self.eval(&self.expr, row).map_err(|reason| StrategyError::InvalidPredicate {
            predicate: self.source.clone(),
            reason,
        })?;
        match result {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(StrategyError::InvalidPredicate {
                predicate: self.source.clone(),
                reason: format!("expression yields {} instead of a boolean", other.type_name()),
            }),
        }
    }

    /// Column names the expression refers to, upper-cased and deduplicated
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        collect_columns(&self.expr, &mut columns);
        columns.sort();
        columns.dedup();
        columns
    }

    fn eval(&self, expr: &Expr, row: &Row) -> Result<Value, String> {
        match expr {
            Expr::Identifier(ident) => column(row, &ident.value),
            Expr::CompoundIdentifier(parts) => match parts.last() {
                Some(ident) => column(row, &ident.value),
                None => Err("empty identifier".to_string()),
            },
            Expr::Value(v) => literal(v),
            Expr::Nested(inner) => self.eval(inner, row),
            Expr::IsNull(inner) => Ok(Value::Bool(self.eval(inner, row)?.is_null())),
            Expr::IsNotNull(inner) => Ok(Value::Bool(!self.eval(inner, row)?.is_null())),
            Expr::IsTrue(inner) => Ok(Value::Bool(truth(&self.eval(inner, row)?)? == Some(true))),
            Expr::IsNotTrue(inner) => Ok(Value::Bool(truth(&self.eval(inner, row)?)? != Some(true))),
            Expr::IsFalse(inner) => Ok(Value::Bool(truth(&self.eval(inner, row)?)? == Some(false))),
            Expr::IsNotFalse(inner) => Ok(Value::Bool(truth(&self.eval(inner, row)?)? != Some(false))),
            Expr::IsDistinctFrom(a, b) => Ok(Value::Bool(!same(&self.eval(a, row)?, &self.eval(b, row)?))),
            Expr::IsNotDistinctFrom(a, b) => Ok(Value::Bool(same(&self.eval(a, row)?, &self.eval(b, row)?))),
            Expr::UnaryOp { op, expr } => {
                let v = self.eval(expr, row)?;
                match op {
                    UnaryOperator::Not => Ok(truth(&v)?.map_or(Value::Null, |b| Value::Bool(!b))),
                    UnaryOperator::Minus => negate(v),
                    UnaryOperator::Plus => Ok(v),
                    other => Err(format!("unsupported operator {other}")),
                }
            }
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => {
                    let l = truth(&self.eval(left, row)?)?;
                    if l == Some(false) {
                        return Ok(Value::Bool(false));
                    }
                    let r = truth(&self.eval(right, row)?)?;
                    Ok(match (l, r) {
                        (_, Some(false)) => Value::Bool(false),
                        (Some(true), Some(true)) => Value::Bool(true),
                        _ => Value::Null,
                    })
                }
                BinaryOperator::Or => {
                    let l = truth(&self.eval(left, row)?)?;
                    if l == Some(true) {
                        return Ok(Value::Bool(true));
                    }
                    let r = truth(&self.eval(right, row)?)?;
                    Ok(match (l, r) {
                        (_, Some(true)) => Value::Bool(true),
                        (Some(false), Some(false)) => Value::Bool(false),
                        _ => Value::Null,
                    })
                }
                _ => {
                    let l = self.eval(left, row)?;
                    let r = self.eval(right, row)?;
                    binary(&l, op, &r)
                }
            },
            Expr::InList { expr, list, negated } => {
                let needle = self.eval(expr, row)?;
                if needle.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let candidate = self.eval(item, row)?;
                    match compare(&needle, &candidate) {
                        Some(Ordering::Equal) => return Ok(Value::Bool(!negated)),
                        None if candidate.is_null() => saw_null = true,
                        _ => {}
                    }
                }
                Ok(if saw_null { Value::Null } else { Value::Bool(*negated) })
            }
            Expr::Between { expr, negated, low, high } => {
                let v = self.eval(expr, row)?;
                let lo = compare(&v, &self.eval(low, row)?);
                let hi = compare(&v, &self.eval(high, row)?);
                Ok(match (lo, hi) {
                    (Some(lo), Some(hi)) => Value::Bool((lo != Ordering::Less && hi != Ordering::Greater) != *negated),
                    _ => Value::Null,
                })
            }
            Expr::Like { negated, expr, pattern, escape_char } => {
                self.like(row, expr, pattern, *negated, false, *escape_char)
            }
            Expr::ILike { negated, expr, pattern, escape_char } => {
                self.like(row, expr, pattern, *negated, true, *escape_char)
            }
            other => Err(format!("unsupported expression `{other}`")),
        }
    }

    fn like(
        &self,
        row: &Row,
        expr: &Expr,
        pattern: &Expr,
        negated: bool,
        case_insensitive: bool,
        escape: Option<char>,
    ) -> Result<Value, String> {
        let subject = self.eval(expr, row)?;
        let pattern = self.eval(pattern, row)?;
        if subject.is_null() || pattern.is_null() {
            return Ok(Value::Null);
        }
        let subject = text_of(&subject);
        let pattern = text_of(&pattern);
        let key = (pattern, case_insensitive, escape);
        let mut cache = self.like_cache.borrow_mut();
        if !cache.contains_key(&key) {
            let regex = like_to_regex(&key.0, case_insensitive, escape)?;
            cache.insert(key.clone(), regex);
        }
        let matched = cache.get(&key).is_some_and(|re| re.is_match(&subject));
        Ok(Value::Bool(matched != negated))
    }
}

fn collect_columns(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Identifier(ident) => out.push(ident.value.to_uppercase()),
        Expr::CompoundIdentifier(parts) => {
            if let Some(ident) = parts.last() {
                out.push(ident.value.to_uppercase());
            }
        }
        Expr::Nested(e)
        | Expr::IsNull(e)
        | Expr::IsNotNull(e)
        | Expr::IsTrue(e)
        | Expr::IsNotTrue(e)
        | Expr::IsFalse(e)
        | Expr::IsNotFalse(e)
        | Expr::UnaryOp { expr: e, .. } => collect_columns(e, out),
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => {
            collect_columns(a, out);
            collect_columns(b, out);
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_columns(left, out);
            collect_columns(right, out);
        }
        Expr::InList { expr, list, .. } => {
            collect_columns(expr, out);
            list.iter().for_each(|e| collect_columns(e, out));
        }
        Expr::Between { expr, low, high, .. } => {
            collect_columns(expr, out);
            collect_columns(low, out);
            collect_columns(high, out);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            collect_columns(expr, out);
            collect_columns(pattern, out);
        }
        _ => {}
    }
}

fn column(row: &Row, name: &str) -> Result<Value, String> {
    row.get(name)
        .cloned()
        .ok_or_else(|| format!("unknown column {name}"))
}

fn literal(v: &SqlValue) -> Result<Value, String> {
    match v {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Int(i))
            } else if let Ok(d) = n.parse::<Decimal>() {
                Ok(Value::Decimal(d))
            } else {
                n.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|e| format!("bad number {n}: {e}"))
            }
        }
        SqlValue::SingleQuotedString(s)
        | SqlValue::DoubleQuotedString(s)
        | SqlValue::NationalStringLiteral(s)
        | SqlValue::EscapedStringLiteral(s) => Ok(Value::Text(s.clone())),
        SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(format!("unsupported literal {other}")),
    }
}

/// SQL truth value of a boolean-ish value
fn truth(v: &Value) -> Result<Option<bool>, String> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(format!("{} value `{other}` used as a boolean", other.type_name())),
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

enum Num {
    Int(i64),
    Dec(Decimal),
    Float(f64),
}

fn numeric(v: &Value) -> Option<Num> {
    match v {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Decimal(d) => Some(Num::Dec(*d)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn parse_numeric(s: &str) -> Option<Num> {
    let s = s.trim();
    s.parse::<i64>()
        .map(Num::Int)
        .ok()
        .or_else(|| s.parse::<Decimal>().ok().map(Num::Dec))
        .or_else(|| s.parse::<f64>().ok().map(Num::Float))
}

fn as_f64(n: &Num) -> f64 {
    match n {
        Num::Int(i) => *i as f64,
        Num::Dec(d) => d.to_f64().unwrap_or(f64::NAN),
        Num::Float(f) => *f,
    }
}

fn compare_numbers(a: &Num, b: &Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(y)),
        (Num::Int(x), Num::Dec(y)) => Some(Decimal::from(*x).cmp(y)),
        (Num::Dec(x), Num::Int(y)) => Some(x.cmp(&Decimal::from(*y))),
        (Num::Dec(x), Num::Dec(y)) => Some(x.cmp(y)),
        _ => as_f64(a).partial_cmp(&as_f64(b)),
    }
}

/// Compare two values the way SQL would after implicit casts. `None` when
/// either side is NULL or the values are incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => return compare_numbers(&x, &y),
        (Some(x), None) => return b.as_str().and_then(parse_numeric).and_then(|y| compare_numbers(&x, &y)),
        (None, Some(y)) => return a.as_str().and_then(parse_numeric).and_then(|x| compare_numbers(&x, &y)),
        (None, None) => {}
    }
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::TimestampTz(x), Value::TimestampTz(y)) => Some(x.cmp(y)),
        (Value::Uuid(x), Value::Uuid(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Text(s)) => parse_bool(s).map(|y| x.cmp(&y)),
        (Value::Text(s), Value::Bool(y)) => parse_bool(s).map(|x| x.cmp(y)),
        // dates, timestamps and uuids against literals compare by rendering
        (other, Value::Text(s)) => Some(other.to_string().as_str().cmp(s.as_str())),
        (Value::Text(s), other) => Some(s.as_str().cmp(other.to_string().as_str())),
        _ => None,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" => Some(true),
        "f" | "false" => Some(false),
        _ => None,
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (false, false) => compare(a, b) == Some(Ordering::Equal),
        _ => false,
    }
}

fn negate(v: Value) -> Result<Value, String> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| "integer overflow".to_string()),
        Value::Decimal(d) => Ok(Value::Decimal(-d)),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(format!("cannot negate {}", other.type_name())),
    }
}

fn arithmetic(l: &Value, op: &BinaryOperator, r: &Value) -> Result<Value, String> {
    let (Some(a), Some(b)) = (
        numeric(l).or_else(|| l.as_str().and_then(parse_numeric)),
        numeric(r).or_else(|| r.as_str().and_then(parse_numeric)),
    ) else {
        return Err(format!("`{l} {op} {r}` needs numeric operands"));
    };
    let overflow = || format!("arithmetic overflow in `{l} {op} {r}`");
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => {
            let result = match op {
                BinaryOperator::Plus => x.checked_add(y),
                BinaryOperator::Minus => x.checked_sub(y),
                BinaryOperator::Multiply => x.checked_mul(y),
                BinaryOperator::Divide if y == 0 => return Err("division by zero".to_string()),
                BinaryOperator::Divide => x.checked_div(y),
                BinaryOperator::Modulo if y == 0 => return Err("division by zero".to_string()),
                BinaryOperator::Modulo => x.checked_rem(y),
                _ => None,
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        (x @ (Num::Int(_) | Num::Dec(_)), y @ (Num::Int(_) | Num::Dec(_))) => {
            let to_dec = |n: Num| match n {
                Num::Int(i) => Decimal::from(i),
                Num::Dec(d) => d,
                Num::Float(_) => Decimal::ZERO,
            };
            let (x, y) = (to_dec(x), to_dec(y));
            let result = match op {
                BinaryOperator::Plus => x.checked_add(y),
                BinaryOperator::Minus => x.checked_sub(y),
                BinaryOperator::Multiply => x.checked_mul(y),
                BinaryOperator::Divide => x.checked_div(y),
                BinaryOperator::Modulo => x.checked_rem(y),
                _ => None,
            };
            result.map(Value::Decimal).ok_or_else(overflow)
        }
        (x, y) => {
            let (x, y) = (as_f64(&x), as_f64(&y));
            let result = match op {
                BinaryOperator::Plus => x + y,
                BinaryOperator::Minus => x - y,
                BinaryOperator::Multiply => x * y,
                BinaryOperator::Divide => x / y,
                BinaryOperator::Modulo => x % y,
                _ => return Err(overflow()),
            };
            Ok(Value::Float(result))
        }
    }
}

fn binary(l: &Value, op: &BinaryOperator, r: &Value) -> Result<Value, String> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let cmp = || compare(l, r);
    let result = match op {
        BinaryOperator::Eq => cmp().map(|o| o == Ordering::Equal),
        BinaryOperator::NotEq => cmp().map(|o| o != Ordering::Equal),
        BinaryOperator::Lt => cmp().map(|o| o == Ordering::Less),
        BinaryOperator::LtEq => cmp().map(|o| o != Ordering::Greater),
        BinaryOperator::Gt => cmp().map(|o| o == Ordering::Greater),
        BinaryOperator::GtEq => cmp().map(|o| o != Ordering::Less),
        BinaryOperator::StringConcat => return Ok(Value::Text(text_of(l) + &text_of(r))),
        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => return arithmetic(l, op, r),
        other => return Err(format!("unsupported operator {other}")),
    };
    Ok(result.map_or(Value::Null, Value::Bool))
}

/// Translate a LIKE pattern into an anchored regex
fn like_to_regex(pattern: &str, case_insensitive: bool, escape: Option<char>) -> Result<Regex, String> {
    let mut re = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            if let Some(next) = chars.next() {
                re.push_str(&regex::escape(&next.to_string()));
            }
            continue;
        }
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| format!("bad LIKE pattern {pattern}: {e}"))
}
