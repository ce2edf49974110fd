//! Backend drivers and the database context.
//!
//! A [`Driver`] knows one SQL dialect: how to quote, which collations to use,
//! how to spell each schema operation as DDL and how to read the live schema
//! back out of the catalogs. A [`Database`] pairs a driver with an open
//! [`Connection`] and the table prefix that scopes everything the engine
//! manages.

use std::fmt;
use std::str::FromStr;

use crate::connection::{Connection, ConnectionError, Row};
use crate::diff::Operation;
use crate::schema::{Column, ForeignKey, Index, PrimaryKey, Schema};
use crate::value::{Bindings, Value};
use crate::{Error, Result};

mod catalog;
pub(crate) mod ddl;
mod mysql;
mod postgres;
mod sqlite;
mod sqlserver;
mod version;

pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
pub use sqlserver::SqlServerDriver;
pub use version::ServerVersion;

/// The database engines the engine can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    MySql,
    Postgres,
    Sqlite,
    SqlServer,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::MySql => "mysql",
            BackendKind::Postgres => "postgres",
            BackendKind::Sqlite => "sqlite",
            BackendKind::SqlServer => "sqlserver",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(BackendKind::MySql),
            "postgres" | "postgresql" | "pgsql" => Ok(BackendKind::Postgres),
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            "sqlserver" | "sqlsrv" | "mssql" => Ok(BackendKind::SqlServer),
            _ => Err(Error::Configuration(s.to_string())),
        }
    }
}

/// Everything the engine needs to know about one SQL dialect.
pub trait Driver: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Opening and closing identifier quote characters.
    fn identifier_quotes(&self) -> (char, char) {
        ('"', '"')
    }

    /// Wrap an identifier in quotes, doubling any embedded closing quote.
    fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.identifier_quotes();
        let mut out = String::with_capacity(name.len() + 2);
        out.push(open);
        for c in name.chars() {
            if c == close {
                out.push(close);
            }
            out.push(c);
        }
        out.push(close);
        out
    }

    /// Inverse of [`Driver::quote_identifier`]. Unquoted input comes back
    /// unchanged.
    fn unquote_identifier(&self, quoted: &str) -> String {
        let (open, close) = self.identifier_quotes();
        match quoted
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            Some(inner) => {
                let doubled: String = [close, close].iter().collect();
                inner.replace(&doubled, &close.to_string())
            }
            None => quoted.to_string(),
        }
    }

    /// A string literal, safe to splice into SQL.
    fn quote_value(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Binary, case-sensitive collation for ASCII identifiers and codes.
    fn collation_ascii(&self) -> Result<&str>;

    /// Case-insensitive collation for human-readable text.
    fn collation_utf8(&self) -> Result<&str>;

    /// Whether DDL can be rolled back.
    fn supports_transactional_ddl(&self) -> bool;

    /// The native placeholder for the `index`th parameter, counting from 1.
    fn placeholder(&self, index: usize) -> String;

    /// Whether a placeholder can be referenced more than once. Dialects with
    /// bare `?` markers need one value per occurrence.
    fn reuses_placeholders(&self) -> bool {
        true
    }

    /// Statements that open a migration transaction.
    fn begin_transaction(&self) -> Vec<String> {
        vec!["START TRANSACTION".to_string()]
    }

    fn commit(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback(&self) -> &'static str {
        "ROLLBACK"
    }

    /// Statement toggling foreign-key enforcement for the session, on
    /// backends that need it off while a migration runs.
    fn foreign_key_checks(&self, _enabled: bool) -> Option<String> {
        None
    }

    /// Operator for a case-insensitive `LIKE`.
    fn case_insensitive_like(&self) -> &'static str {
        "LIKE"
    }

    /// Aggregate concatenating `expr` across a group with commas.
    fn group_concat(&self, expr: &str) -> String {
        format!("GROUP_CONCAT({expr})")
    }

    /// Trailing row-limiting clause for a SELECT.
    fn limit_clause(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(limit) = limit {
            out.push_str(&format!("\nLIMIT {limit}"));
        }
        if let Some(offset) = offset {
            out.push_str(&format!("\nOFFSET {offset}"));
        }
        out
    }

    /// Default expression for "now" on a column of the given precision.
    fn current_timestamp(&self, _precision: u32) -> String {
        "CURRENT_TIMESTAMP".to_string()
    }

    /// Native type name for a column, including length or precision.
    fn column_type(&self, column: &Column) -> String;

    /// The column as this backend would report it after creating it. Used
    /// to compare a declared schema against a live one.
    fn canonical_column(&self, column: &Column) -> Column {
        column.clone()
    }

    /// Rewrite differ output into operations this backend can execute.
    fn lower(&self, operations: Vec<Operation>, _live: &Schema, _target: &Schema) -> Vec<Operation> {
        operations
    }

    /// DDL statements for one operation, in execution order. Operations
    /// the backend cannot express fail with
    /// [`Error::UnsupportedCapability`].
    fn render(&self, operation: &Operation) -> Result<Vec<String>>;

    /// Query returning one row whose first column tells whether foreign-key
    /// enforcement is currently on.
    fn foreign_key_checks_enabled(&self) -> Option<&'static str> {
        None
    }

    /// Query returning one row per dangling foreign-key reference.
    fn foreign_key_violations(&self) -> Option<&'static str> {
        None
    }

    /// Names of all base tables in the current database or schema.
    fn live_tables(&self, session: &mut Session<'_>) -> Result<Vec<String>>;

    /// Columns of a live table in ordinal order.
    fn live_columns(&self, session: &mut Session<'_>, table: &str) -> Result<Vec<Column>>;

    /// Primary key and secondary indexes of a live table.
    fn live_keys(
        &self,
        session: &mut Session<'_>,
        table: &str,
    ) -> Result<(Option<PrimaryKey>, Vec<Index>)>;

    /// Foreign keys of a live table.
    fn live_foreign_keys(
        &self,
        session: &mut Session<'_>,
        table: &str,
        prefix: &str,
    ) -> Result<Vec<ForeignKey>>;
}

/// A driver borrowed together with a connection.
///
/// Statements go through here so that markers are rewritten, failures carry
/// their SQL, and every call is traced.
pub struct Session<'a> {
    driver: &'a dyn Driver,
    conn: &'a mut dyn Connection,
}

impl<'a> Session<'a> {
    pub fn new(driver: &'a dyn Driver, conn: &'a mut dyn Connection) -> Self {
        Self { driver, conn }
    }

    pub fn driver(&self) -> &'a dyn Driver {
        self.driver
    }

    /// Execute a query with `?` or `:name` markers, returning all rows.
    pub fn query(&mut self, sql: &str, bindings: &Bindings) -> Result<Vec<Row>> {
        let (sql, values) = bind_markers(self.driver, sql, bindings)?;
        self.query_values(&sql, &values)
    }

    /// Execute a statement with `?` or `:name` markers, returning the number
    /// of rows affected.
    pub fn execute(&mut self, sql: &str, bindings: &Bindings) -> Result<u64> {
        let (sql, values) = bind_markers(self.driver, sql, bindings)?;
        self.execute_values(&sql, &values)
    }

    /// Execute a query already written with native placeholders.
    pub(crate) fn query_values(&mut self, sql: &str, values: &[Value]) -> Result<Vec<Row>> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = values.len(),
            rows = tracing::field::Empty,
        );
        let _guard = span.enter();
        let rows = self
            .conn
            .query(sql, values)
            .map_err(|e| statement_error(sql, e))?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    pub(crate) fn execute_values(&mut self, sql: &str, values: &[Value]) -> Result<u64> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = values.len(),
            affected = tracing::field::Empty,
        );
        let _guard = span.enter();
        let affected = self
            .conn
            .execute(sql, values)
            .map_err(|e| statement_error(sql, e))?;
        span.record("affected", affected);
        Ok(affected)
    }
}

fn statement_error(sql: &str, e: ConnectionError) -> Error {
    match e {
        ConnectionError::Connect(message) | ConnectionError::Prepare(message) => {
            Error::StatementPrepare {
                sql: sql.to_string(),
                message,
            }
        }
        ConnectionError::Execute(message) => Error::StatementExecute {
            sql: sql.to_string(),
            message,
        },
    }
}

/// Rewrite `?` and `:name` markers to the driver's placeholders, returning
/// the values in placeholder order.
///
/// Markers inside quoted strings and identifiers are left alone, as are
/// Postgres `::` casts and MySQL `:=` assignments. A marker with nothing
/// bound to it is an error, including when no bindings are given at all.
pub(crate) fn bind_markers(
    driver: &dyn Driver,
    sql: &str,
    bindings: &Bindings,
) -> Result<(String, Vec<Value>)> {
    let prepare_error = |message: String| Error::StatementPrepare {
        sql: sql.to_string(),
        message,
    };

    let mut out = String::with_capacity(sql.len() + 8);
    let mut values = Vec::new();
    let mut next_positional = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '?' => {
                let list = match bindings {
                    Bindings::Positional(list) => list,
                    Bindings::Named(_) => {
                        return Err(prepare_error(
                            "positional marker `?` used with named bindings".into(),
                        ));
                    }
                    Bindings::None => {
                        return Err(prepare_error("marker `?` has no bound value".into()));
                    }
                };
                let value = list.get(next_positional).ok_or_else(|| {
                    prepare_error(format!(
                        "marker {} has no bound value ({} given)",
                        next_positional + 1,
                        list.len()
                    ))
                })?;
                next_positional += 1;
                values.push(value.clone());
                out.push_str(&driver.placeholder(values.len()));
            }
            ':' => match chars.peek() {
                Some((_, ':')) => {
                    out.push_str("::");
                    chars.next();
                }
                Some((_, n)) if n.is_ascii_alphabetic() || *n == '_' => {
                    let start = i + 1;
                    let mut end = start;
                    while let Some((j, n)) = chars.peek() {
                        if n.is_ascii_alphanumeric() || *n == '_' {
                            end = j + n.len_utf8();
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let name = &sql[start..end];
                    let map = match bindings {
                        Bindings::Named(map) => map,
                        Bindings::Positional(_) => {
                            return Err(prepare_error(format!(
                                "named marker :{name} used with positional bindings"
                            )));
                        }
                        Bindings::None => {
                            return Err(prepare_error(format!("no value bound for :{name}")));
                        }
                    };
                    let value = map
                        .get(name)
                        .ok_or_else(|| prepare_error(format!("no value bound for :{name}")))?;
                    values.push(value.clone());
                    out.push_str(&driver.placeholder(values.len()));
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }

    if let Bindings::Positional(list) = bindings {
        if next_positional != list.len() {
            return Err(prepare_error(format!(
                "{} values bound but {} markers found",
                list.len(),
                next_positional
            )));
        }
    }

    Ok((out, values))
}

/// The driver for `kind`. MySQL needs the server version to pick its
/// text collation.
pub fn driver_for(kind: BackendKind, server_version: &str) -> Box<dyn Driver> {
    match kind {
        BackendKind::MySql => Box::new(MySqlDriver::from_version_string(server_version)),
        BackendKind::Postgres => Box::new(PostgresDriver),
        BackendKind::Sqlite => Box::new(SqliteDriver),
        BackendKind::SqlServer => Box::new(SqlServerDriver),
    }
}

/// An open database: driver, connection and table prefix.
pub struct Database {
    driver: Box<dyn Driver>,
    conn: Box<dyn Connection>,
    prefix: String,
}

impl Database {
    /// Select the driver for `kind` and wrap the connection.
    ///
    /// Unknown backend names fail with [`Error::Configuration`].
    pub fn connect(
        kind: &str,
        conn: impl Connection + 'static,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let kind: BackendKind = kind.parse()?;
        let mut conn: Box<dyn Connection> = Box::new(conn);

        let version = match kind {
            BackendKind::MySql => conn
                .server_version()
                .map_err(|e| statement_error("SELECT VERSION()", e))?,
            _ => String::new(),
        };

        let db = Self {
            driver: driver_for(kind, &version),
            conn,
            prefix: prefix.into(),
        };
        tracing::debug!(backend = %kind, prefix = %db.prefix, "database ready");
        Ok(db)
    }

    /// Wrap a connection with an explicit driver.
    pub fn with_driver(
        driver: Box<dyn Driver>,
        conn: Box<dyn Connection>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            conn,
            prefix: prefix.into(),
        }
    }

    pub fn driver(&self) -> &dyn Driver {
        &*self.driver
    }

    pub fn kind(&self) -> BackendKind {
        self.driver.kind()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// A table name with the prefix applied.
    pub fn prefixed(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn session(&mut self) -> Session<'_> {
        Session::new(&*self.driver, &mut *self.conn)
    }

    /// Execute a query with `?` or `:name` markers, returning all rows.
    pub fn query(&mut self, sql: &str, bindings: &Bindings) -> Result<Vec<Row>> {
        self.session().query(sql, bindings)
    }

    /// Execute a statement with `?` or `:name` markers, returning the number
    /// of rows affected.
    pub fn execute(&mut self, sql: &str, bindings: &Bindings) -> Result<u64> {
        self.session().execute(sql, bindings)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.driver.kind())
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_aliases() {
        for (name, kind) in [
            ("mysql", BackendKind::MySql),
            ("MariaDB", BackendKind::MySql),
            ("pgsql", BackendKind::Postgres),
            ("postgresql", BackendKind::Postgres),
            ("sqlite3", BackendKind::Sqlite),
            ("sqlsrv", BackendKind::SqlServer),
            ("mssql", BackendKind::SqlServer),
        ] {
            assert_eq!(name.parse::<BackendKind>().unwrap(), kind, "{name}");
        }

        let err = "oracle".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref s) if s == "oracle"));
    }

    #[test]
    fn quoting_doubles_the_closing_quote() {
        let pg = PostgresDriver;
        assert_eq!(pg.quote_identifier(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(pg.unquote_identifier(r#""we""ird""#), r#"we"ird"#);
        assert_eq!(pg.quote_value("it's"), "'it''s'");

        let ss = SqlServerDriver;
        assert_eq!(ss.quote_identifier("a]b"), "[a]]b]");
        assert_eq!(ss.unquote_identifier("[a]]b]"), "a]b");
        assert_eq!(ss.unquote_identifier("plain"), "plain");
    }

    #[test]
    fn positional_markers_are_numbered() {
        let (sql, values) = bind_markers(
            &PostgresDriver,
            "SELECT * FROM t WHERE a = ? AND b = '?' AND c = ?",
            &Bindings::positional([1i64, 2]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = '?' AND c = $2");
        assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn named_markers_repeat_values() {
        let (sql, values) = bind_markers(
            &SqlServerDriver,
            "SELECT :a, :b, :a, '12:30', x::text",
            &Bindings::named([("a", 1i64), ("b", 2)]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT @P1, @P2, @P3, '12:30', x::text");
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn marker_mismatches_are_prepare_errors() {
        let err = bind_markers(&SqliteDriver, "SELECT ?, ?", &Bindings::positional([1i64]))
            .unwrap_err();
        assert!(matches!(err, Error::StatementPrepare { .. }));

        let err = bind_markers(&SqliteDriver, "SELECT ?", &Bindings::positional([1i64, 2]))
            .unwrap_err();
        assert!(matches!(err, Error::StatementPrepare { .. }));

        let err = bind_markers(&SqliteDriver, "SELECT :a, ?", &Bindings::named([("a", 1i64)]))
            .unwrap_err();
        assert_eq!(err.sql(), Some("SELECT :a, ?"));

        let err = bind_markers(&SqliteDriver, "SELECT :missing", &Bindings::named([("a", 1i64)]))
            .unwrap_err();
        assert!(matches!(err, Error::StatementPrepare { .. }));
    }

    #[test]
    fn unbound_sql_passes_through() {
        let sql = "SET FOREIGN_KEY_CHECKS := 0";
        let (out, values) = bind_markers(&SqliteDriver, sql, &Bindings::None).unwrap();
        assert_eq!(out, sql);
        assert!(values.is_empty());
    }

    #[test]
    fn markers_without_bindings_are_rejected() {
        for sql in ["SELECT ?", "SELECT * FROM t WHERE id = :id"] {
            let err = bind_markers(&SqliteDriver, sql, &Bindings::None).unwrap_err();
            assert!(matches!(err, Error::StatementPrepare { .. }), "{sql}: {err}");
        }
        let quoted = "SELECT '?', ':id'";
        let (out, _) = bind_markers(&SqliteDriver, quoted, &Bindings::None).unwrap();
        assert_eq!(out, quoted);
    }
}
