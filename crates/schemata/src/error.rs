use thiserror::Error;

use crate::driver::BackendKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no driver available for {0:?}")]
    Configuration(String),

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("failed to prepare statement: {message}\n  sql: {sql}")]
    StatementPrepare { sql: String, message: String },

    #[error("failed to execute statement: {message}\n  sql: {sql}")]
    StatementExecute { sql: String, message: String },

    #[error("{backend} does not support {capability}")]
    UnsupportedCapability {
        backend: BackendKind,
        capability: &'static str,
    },

    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("introspection failed: {0}")]
    Introspection(String),
}

impl Error {
    /// The SQL text attached to a statement error, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::StatementPrepare { sql, .. } | Error::StatementExecute { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// A violated invariant of the declarative schema model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("table {0} is declared twice")]
    DuplicateTable(String),

    #[error("column {table}.{column} is declared twice")]
    DuplicateColumn { table: String, column: String },

    #[error("column {table}.{column} of type {ty} requires a length")]
    MissingLength {
        table: String,
        column: String,
        ty: &'static str,
    },

    #[error("{kind} on {table} references unknown column {column}")]
    UnknownColumn {
        table: String,
        column: String,
        kind: &'static str,
    },

    #[error("table {0} has no primary key")]
    MissingPrimaryKey(String),

    #[error("foreign key {name} has {local} local columns but {foreign} foreign columns")]
    ForeignKeyArity {
        name: String,
        local: usize,
        foreign: usize,
    },

    #[error("foreign key {name} references undeclared table {table}")]
    UnknownForeignTable { name: String, table: String },
}
