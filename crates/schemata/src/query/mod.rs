//! SQL AST for ordinary data access.
//!
//! Build SQL as a typed AST, then render it for one driver with the table
//! prefix applied and named parameters mapped to the backend's placeholders.

use indexmap::IndexMap;

use crate::connection::Row;
use crate::driver::Database;
use crate::{Error, Result, Value};

mod expr;
pub use expr::*;

mod render;
pub use render::*;

mod stmt;
pub use stmt::*;

/// Result of rendering SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSql {
    /// The SQL string with native placeholders.
    pub sql: String,

    /// Parameter name for each placeholder, in bind order. A name repeats
    /// when the dialect cannot reference one placeholder twice.
    pub params: Vec<String>,
}

impl RenderedSql {
    /// Look up each parameter in `values`, in bind order.
    pub fn bind(&self, values: &IndexMap<String, Value>) -> Result<Vec<Value>> {
        self.params
            .iter()
            .map(|name| {
                values
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::StatementPrepare {
                        sql: self.sql.clone(),
                        message: format!("no value for parameter :{name}"),
                    })
            })
            .collect()
    }
}

impl Database {
    /// Render `stmt` for this database.
    pub fn render(&self, stmt: &impl Render) -> RenderedSql {
        render(self.driver(), self.prefix(), stmt)
    }

    /// Run a query built with the AST, returning all rows.
    pub fn fetch(&mut self, stmt: &impl Render, values: &IndexMap<String, Value>) -> Result<Vec<Row>> {
        let rendered = self.render(stmt);
        let values = rendered.bind(values)?;
        self.session().query_values(&rendered.sql, &values)
    }

    /// Run a statement built with the AST, returning the number of rows
    /// affected.
    pub fn run(&mut self, stmt: &impl Render, values: &IndexMap<String, Value>) -> Result<u64> {
        let rendered = self.render(stmt);
        let values = rendered.bind(values)?;
        self.session().execute_values(&rendered.sql, &values)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::Bindings;

    fn db() -> Database {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut db = Database::connect("sqlite", conn, "wt_").unwrap();
        db.execute(
            r#"CREATE TABLE "wt_user" ("user_id" INTEGER NOT NULL, "user_name" VARCHAR(32) NOT NULL, PRIMARY KEY ("user_id"))"#,
            &Bindings::None,
        )
        .unwrap();
        db
    }

    fn values(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_then_fetch() {
        let mut db = db();
        for (id, name) in [(1, "Alice"), (2, "bob")] {
            let insert = InsertStmt::new("user")
                .column("user_id", Expr::param("id"))
                .column("user_name", Expr::param("name"));
            let affected = db
                .run(&insert, &values(&[("id", Value::Int(id)), ("name", name.into())]))
                .unwrap();
            assert_eq!(affected, 1);
        }

        let select = SelectStmt::new()
            .column(SelectColumn::expr(Expr::qualified_column("user", "user_id")))
            .from(FromClause::table("user"))
            .where_(Expr::column("user_name").ilike(Expr::param("q")))
            .order_by(OrderBy::asc(Expr::column("user_id")));
        let rows = db.fetch(&select, &values(&[("q", "B%".into())])).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64("user_id"), Some(2));
    }

    #[test]
    fn missing_parameters_are_prepare_errors() {
        let mut db = db();
        let delete = DeleteStmt::new("user").where_(Expr::column("user_id").eq(Expr::param("id")));
        let err = db.run(&delete, &IndexMap::new()).unwrap_err();
        assert!(matches!(err, Error::StatementPrepare { ref message, .. } if message == "no value for parameter :id"));
    }
}
