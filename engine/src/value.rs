//! Field values stored on records.
//!
//! A [`Value`] may hold other records directly or inside arrays and objects.
//! Those references are the edges of the object graph that the save planner
//! walks.

use crate::Record;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A numeric operand for increments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    /// Add two numbers.
    ///
    /// Integers stay integers; a float on either side promotes the result to
    /// a float. Integer overflow yields `None`.
    pub fn checked_add(self, other: Number) -> Option<Number> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a.checked_add(b).map(Number::Integer),
            (a, b) => Some(Number::Float(a.as_f64() + b.as_f64())),
        }
    }

    /// Value as a float, possibly losing precision.
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(n) => n as f64,
            Number::Float(n) => n,
        }
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Number::Integer(n)
    }
}

impl From<i32> for Number {
    fn from(n: i32) -> Self {
        Number::Integer(n.into())
    }
}

impl From<f64> for Number {
    fn from(n: f64) -> Self {
        Number::Float(n)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Integer(n) => Value::Integer(n),
            Number::Float(n) => Value::Float(n),
        }
    }
}

/// Marker for a relation field. Relation members live on the server; locally
/// only the target class is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relation {
    /// Class of the records in the relation, once known
    pub target_class: Option<String>,
}

/// A field value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Record(Record),
    Relation(Relation),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Record(_) => "record",
            Value::Relation(_) => "relation",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of this value, if it is a number.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Integer(n) => Some(Number::Integer(*n)),
            Value::Float(n) => Some(Number::Float(*n)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(Number::as_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            Value::Relation(relation) => Some(relation),
            _ => None,
        }
    }
}

/// Structural equality. Records compare equal when they are the same handle
/// or denote the same saved entity (same class and object ID).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a.same_entity(b),
            (Value::Relation(a), Value::Relation(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<&Record> for Value {
    fn from(r: &Record) -> Self {
        Value::Record(r.clone())
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(map: BTreeMap<String, V>) -> Self {
        Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(v: Option<V>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_addition_stays_integer() {
        let sum = Number::Integer(2).checked_add(Number::Integer(3));
        assert_eq!(sum, Some(Number::Integer(5)));
    }

    #[test]
    fn float_operand_promotes() {
        let sum = Number::Integer(2).checked_add(Number::Float(0.5));
        assert_eq!(sum, Some(Number::Float(2.5)));

        let sum = Number::Float(1.5).checked_add(Number::Integer(1));
        assert_eq!(sum, Some(Number::Float(2.5)));
    }

    #[test]
    fn integer_overflow_is_rejected() {
        assert_eq!(Number::Integer(i64::MAX).checked_add(Number::Integer(1)), None);
    }

    #[test]
    fn records_compare_by_entity() {
        let a = Record::without_data("Post", "p1");
        let b = Record::without_data("Post", "p1");
        let c = Record::without_data("Post", "p2");

        assert_eq!(Value::from(&a), Value::from(&b));
        assert_ne!(Value::from(&a), Value::from(&c));

        // Unsaved records are only equal to themselves
        let x = Record::new("Post");
        let y = Record::new("Post");
        assert_eq!(Value::from(&x), Value::from(&x));
        assert_ne!(Value::from(&x), Value::from(&y));
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from(vec![1, 2]), Value::Array(vec![Value::Integer(1), Value::Integer(2)]));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(3.5).as_f64(), Some(3.5));
        assert_eq!(Value::from(true).type_name(), "bool");
    }
}
