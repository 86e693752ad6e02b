//! Structured predicates and aggregate expressions.
//!
//! Filters are data, not SQL strings: user-supplied values only ever travel as
//! bound parameters. The same tree renders to a parameterized `WHERE` clause
//! and evaluates in memory against a record, which is how tests check that a
//! push-down agrees with a scan.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::fmt::Write as _;

use serde::Serialize;

use super::Column;

/// A bound scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Real(f64),
    Text(String),
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// SQL-style comparison: numbers compare numerically, text lexically,
    /// and mixed kinds are incomparable.
    fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Read access to a record's columns for in-memory predicate evaluation.
///
/// `None` is SQL `NULL`.
pub trait FieldLookup {
    fn field(&self, column: Column) -> Option<Value>;
}

/// Boolean filter tree over one relation.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    Eq(Column, Value),
    In(Column, Vec<Value>),
    Gt(Column, Value),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Conjoin, flattening nested `And` and dropping `True`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, p) | (p, Self::True) => p,
            (Self::And(mut a), Self::And(b)) => {
                a.extend(b);
                Self::And(a)
            }
            (Self::And(mut a), p) => {
                a.push(p);
                Self::And(a)
            }
            (p, Self::And(mut b)) => {
                b.insert(0, p);
                Self::And(b)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Or(mut a), p) => {
                a.push(p);
                Self::Or(a)
            }
            (a, b) => Self::Or(vec![a, b]),
        }
    }

    /// Render as a `WHERE` body with `?` placeholders, appending bound values
    /// to `params` in placeholder order.
    pub fn to_sql(&self, params: &mut Vec<Value>) -> String {
        let mut out = String::new();
        self.write_sql(&mut out, params);
        out
    }

    fn write_sql(&self, out: &mut String, params: &mut Vec<Value>) {
        match self {
            Self::True => out.push_str("1 = 1"),
            Self::Eq(col, v) => {
                let _ = write!(out, "\"{}\" = ?", col.sql_name());
                params.push(v.clone());
            }
            Self::Gt(col, v) => {
                let _ = write!(out, "\"{}\" > ?", col.sql_name());
                params.push(v.clone());
            }
            Self::In(_, values) if values.is_empty() => out.push_str("0 = 1"),
            Self::In(col, values) => {
                let _ = write!(out, "\"{}\" IN (", col.sql_name());
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('?');
                    params.push(v.clone());
                }
                out.push(')');
            }
            Self::And(parts) => write_joined(out, params, parts, " AND ", "1 = 1"),
            Self::Or(parts) => write_joined(out, params, parts, " OR ", "0 = 1"),
        }
    }

    /// Evaluate against one record with SQL `WHERE` semantics: any
    /// comparison against `NULL` rejects the row.
    pub fn matches(&self, record: &dyn FieldLookup) -> bool {
        match self {
            Self::True => true,
            Self::Eq(col, v) => record
                .field(*col)
                .is_some_and(|f| f.compare(v) == Some(Ordering::Equal)),
            Self::Gt(col, v) => record
                .field(*col)
                .is_some_and(|f| f.compare(v) == Some(Ordering::Greater)),
            Self::In(col, values) => record.field(*col).is_some_and(|f| {
                values
                    .iter()
                    .any(|v| f.compare(v) == Some(Ordering::Equal))
            }),
            Self::And(parts) => parts.iter().all(|p| p.matches(record)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(record)),
        }
    }
}

fn write_joined(
    out: &mut String,
    params: &mut Vec<Value>,
    parts: &[Predicate],
    sep: &str,
    empty: &str,
) {
    if parts.is_empty() {
        out.push_str(empty);
        return;
    }
    out.push('(');
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        p.write_sql(out, params);
    }
    out.push(')');
}

/// Aggregate function applied by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

/// Aggregate input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expr {
    /// Every row (`COUNT(*)`).
    Star,
    Col(Column),
    /// Row-wise sum of several columns; `NULL` if any term is `NULL`.
    Add(&'static [Column]),
}

/// A named aggregate. Names become metric keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub name: &'static str,
    pub func: AggFunc,
    pub expr: Expr,
}

impl Aggregate {
    pub const fn new(name: &'static str, func: AggFunc, expr: Expr) -> Self {
        Self { name, func, expr }
    }

    pub fn to_sql(&self) -> String {
        let inner = match self.expr {
            Expr::Star => "*".to_string(),
            Expr::Col(c) => format!("\"{}\"", c.sql_name()),
            Expr::Add(cols) => cols
                .iter()
                .map(|c| format!("\"{}\"", c.sql_name()))
                .collect::<Vec<_>>()
                .join(" + "),
        };
        match self.func {
            AggFunc::Count => format!("COUNT({inner})"),
            AggFunc::CountDistinct => format!("COUNT(DISTINCT {inner})"),
            AggFunc::Sum => format!("SUM({inner})"),
            AggFunc::Avg => format!("AVG({inner})"),
            AggFunc::Min => format!("MIN({inner})"),
            AggFunc::Max => format!("MAX({inner})"),
        }
    }
}
