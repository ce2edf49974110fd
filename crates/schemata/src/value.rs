//! Runtime values for statement bindings and result rows.

use indexmap::IndexMap;

/// A runtime SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL
    Null,

    /// Boolean
    Bool(bool),

    /// Any integer, widened to 64 bits
    Int(i64),

    /// Floating point
    Float(f64),

    /// Text, and anything else that round-trips through a string
    Text(String),
}

/// How a value is bound to a prepared statement.
///
/// Only four bind types exist: floats travel as strings, which every
/// supported backend coerces on its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindType {
    Null,
    Bool,
    Int,
    Str,
}

impl Value {
    /// Returns true if this is a NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Infer the bind type: null, bool and integer map to themselves,
    /// everything else binds as a string.
    pub fn bind_type(&self) -> BindType {
        match self {
            Value::Null => BindType::Null,
            Value::Bool(_) => BindType::Bool,
            Value::Int(_) => BindType::Int,
            Value::Float(_) | Value::Text(_) => BindType::Str,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value. Numeric strings are accepted, since some
    /// catalogs report counts and lengths as text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            Value::Text(s) => match s.to_ascii_uppercase().as_str() {
                "YES" | "Y" | "TRUE" | "T" | "1" => Some(true),
                "NO" | "N" | "FALSE" | "F" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// The value as it would be bound with [`BindType::Str`].
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Values bound to a statement.
///
/// Positional values match `?` markers in order (the first value is
/// parameter 1). Named values match `:name` markers.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Bindings {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(IndexMap<String, Value>),
}

impl Bindings {
    pub fn positional(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Bindings::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Bindings::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Bindings::None => true,
            Bindings::Positional(values) => values.is_empty(),
            Bindings::Named(values) => values.is_empty(),
        }
    }
}
