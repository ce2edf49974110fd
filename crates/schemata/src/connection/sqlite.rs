//! [`Connection`] for `rusqlite`.

use rusqlite::types::{ToSqlOutput, ValueRef};

use super::{Connection, ConnectionError, Row};
use crate::value::{BindType, Value};

/// Wrapper to make our Value usable as a rusqlite parameter.
struct SqliteParam<'a>(&'a Value);

impl rusqlite::ToSql for SqliteParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;

        let value = match (self.0.bind_type(), self.0) {
            (BindType::Null, _) => Sql::Null,
            (BindType::Bool, Value::Bool(b)) => Sql::Integer(i64::from(*b)),
            (BindType::Int, Value::Int(n)) => Sql::Integer(*n),
            (_, other) => other.to_text().map(Sql::Text).unwrap_or(Sql::Null),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

fn prepare_error(e: rusqlite::Error) -> ConnectionError {
    ConnectionError::Prepare(e.to_string())
}

fn execute_error(e: rusqlite::Error) -> ConnectionError {
    ConnectionError::Execute(e.to_string())
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

impl Connection for rusqlite::Connection {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ConnectionError> {
        let mut stmt = self.prepare(sql).map_err(prepare_error)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(SqliteParam)))
            .map_err(execute_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(execute_error)? {
            let mut fields = Row::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(execute_error)?;
                fields.push(name.clone(), read_value(value));
            }
            out.push(fields);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError> {
        let mut stmt = self.prepare(sql).map_err(prepare_error)?;
        let params = rusqlite::params_from_iter(params.iter().map(SqliteParam));

        // PRAGMAs and friends report through rows rather than a change count.
        if stmt.column_count() > 0 {
            let mut rows = stmt.query(params).map_err(execute_error)?;
            let mut count = 0u64;
            while rows.next().map_err(execute_error)?.is_some() {
                count += 1;
            }
            return Ok(count);
        }

        stmt.execute(params)
            .map(|n| n as u64)
            .map_err(execute_error)
    }

    fn server_version(&mut self) -> Result<String, ConnectionError> {
        self.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
            .map_err(execute_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_by_inferred_type() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        let rows = Connection::query(
            &mut conn,
            "SELECT typeof(?1) AS a, typeof(?2) AS b, typeof(?3) AS c, typeof(?4) AS d, typeof(?5) AS e",
            &[
                Value::Null,
                Value::Bool(true),
                Value::Int(7),
                Value::Float(1.5),
                Value::from("x"),
            ],
        )
        .unwrap();

        let row = &rows[0];
        assert_eq!(row.get_str("a"), Some("null"));
        assert_eq!(row.get_str("b"), Some("integer"));
        assert_eq!(row.get_str("c"), Some("integer"));
        assert_eq!(row.get_str("d"), Some("text"));
        assert_eq!(row.get_str("e"), Some("text"));
    }

    #[test]
    fn prepare_and_execute_failures_are_distinguished() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();

        let err = Connection::execute(&mut conn, "CREATE TABLLE nope (id INTEGER)", &[]).unwrap_err();
        assert!(matches!(err, ConnectionError::Prepare(_)));

        Connection::execute(&mut conn, "CREATE TABLE t (id INTEGER PRIMARY KEY)", &[]).unwrap();
        Connection::execute(&mut conn, "INSERT INTO t (id) VALUES (?)", &[Value::Int(1)]).unwrap();
        let err = Connection::execute(&mut conn, "INSERT INTO t (id) VALUES (?)", &[Value::Int(1)])
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Execute(_)));
    }

    #[test]
    fn reports_version() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        let version = conn.server_version().unwrap();
        assert!(version.starts_with('3'));
    }
}
