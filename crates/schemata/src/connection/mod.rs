//! Live database sessions.
//!
//! A [`Connection`] is the only thing the engine needs from a database
//! client: run a statement with already-positional parameters and hand back
//! rows. Placeholder rewriting, error context and tracing live one level up,
//! in [`crate::driver::Session`].

use thiserror::Error;

use crate::Value;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "mysql")]
pub use mysql::MySqlConnection;
#[cfg(feature = "postgres")]
pub use postgres::PgConnection;

/// Failure reported by a [`Connection`], split by the stage that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Could not open the session.
    #[error("{0}")]
    Connect(String),

    /// The statement was rejected before running.
    #[error("{0}")]
    Prepare(String),

    /// The statement was accepted but failed while running.
    #[error("{0}")]
    Execute(String),
}

/// A blocking session with one database.
///
/// Parameters are bound in order to the backend's native placeholders
/// (`?`, `?N`, `$N` or `@PN`); a statement without parameters should be sent
/// as-is so that DDL and transaction control work on every backend.
pub trait Connection {
    /// Execute a statement, returning all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ConnectionError>;

    /// Execute a statement, returning the number of rows affected.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError>;

    /// The server's self-reported version string.
    fn server_version(&mut self) -> Result<String, ConnectionError>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ConnectionError> {
        (**self).query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError> {
        (**self).execute(sql, params)
    }

    fn server_version(&mut self) -> Result<String, ConnectionError> {
        (**self).server_version()
    }
}

/// A result row as ordered column name → value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Look a field up by name. Catalog column names come back in whatever
    /// case the server prefers, so the match ignores ASCII case.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// A field rendered as text (integers and floats included).
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(Value::to_text)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
