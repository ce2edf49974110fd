//! DDL fragments shared by the dialects.
//!
//! Each driver assembles its statements from these pieces and only spells
//! out what is genuinely dialect-specific.

use super::Driver;
use crate::Result;
use crate::diff::diff_tables;
use crate::schema::{Column, ColumnType, ForeignKey, Index, OnDelete, OnUpdate, PrimaryKey, Table};

/// `"a", "b"`
pub(crate) fn column_list(driver: &dyn Driver, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| driver.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The column's default as a SQL literal.
///
/// Numbers are spliced as-is into numeric columns and `CURRENT_TIMESTAMP`
/// into timestamps; everything else is quoted as a string.
pub(crate) fn default_literal(driver: &dyn Driver, column: &Column) -> Option<String> {
    let default = column.default.as_deref()?;
    if column.ty == ColumnType::Timestamp && default.eq_ignore_ascii_case("CURRENT_TIMESTAMP") {
        return Some(driver.current_timestamp(column.precision));
    }
    let numeric = match column.ty {
        ColumnType::Integer => default.parse::<i64>().is_ok(),
        ColumnType::Float => default.parse::<f64>().is_ok(),
        _ => false,
    };
    Some(if numeric {
        default.to_string()
    } else {
        driver.quote_value(default)
    })
}

/// `"name" TYPE NOT NULL DEFAULT x`, as used in CREATE TABLE and ADD COLUMN.
pub(crate) fn column_definition(driver: &dyn Driver, column: &Column) -> String {
    let mut out = format!(
        "{} {}",
        driver.quote_identifier(&column.name),
        driver.column_type(column)
    );
    out.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if let Some(default) = default_literal(driver, column) {
        out.push_str(" DEFAULT ");
        out.push_str(&default);
    }
    out
}

/// `[CONSTRAINT "name" ]PRIMARY KEY ("a", "b")`
pub(crate) fn primary_key_clause(
    driver: &dyn Driver,
    primary_key: &PrimaryKey,
    constraint: Option<&str>,
) -> String {
    let columns = column_list(driver, &primary_key.columns);
    match constraint {
        Some(name) => format!(
            "CONSTRAINT {} PRIMARY KEY ({columns})",
            driver.quote_identifier(name)
        ),
        None => format!("PRIMARY KEY ({columns})"),
    }
}

/// `CONSTRAINT "fk" FOREIGN KEY ("a") REFERENCES "t" ("b") ON DELETE ...`
///
/// `NO ACTION` is every backend's default and is left implicit.
pub(crate) fn foreign_key_clause(driver: &dyn Driver, foreign_key: &ForeignKey) -> String {
    let mut out = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        driver.quote_identifier(foreign_key.name()),
        column_list(driver, foreign_key.columns()),
        driver.quote_identifier(foreign_key.foreign_table()),
        column_list(driver, foreign_key.foreign_columns()),
    );
    if foreign_key.on_delete() != OnDelete::NoAction {
        out.push_str(" ON DELETE ");
        out.push_str(foreign_key.on_delete().as_sql());
    }
    if foreign_key.on_update() != OnUpdate::NoAction {
        out.push_str(" ON UPDATE ");
        out.push_str(foreign_key.on_update().as_sql());
    }
    out
}

/// A multi-line CREATE TABLE from already rendered definitions.
pub(crate) fn create_table(
    driver: &dyn Driver,
    table: &str,
    definitions: &[String],
    suffix: &str,
) -> String {
    let mut sql = format!("CREATE TABLE {} (\n", driver.quote_identifier(table));
    let body: Vec<String> = definitions.iter().map(|d| format!("    {d}")).collect();
    sql.push_str(&body.join(",\n"));
    sql.push_str("\n)");
    sql.push_str(suffix);
    sql
}

/// CREATE TABLE with plain column definitions, the primary key and,
/// optionally, inline foreign keys.
pub(crate) fn create_table_with(
    driver: &dyn Driver,
    table: &Table,
    name: &str,
    pk_constraint: Option<&str>,
    inline_foreign_keys: bool,
    suffix: &str,
) -> String {
    let mut definitions: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_definition(driver, c))
        .collect();
    if let Some(primary_key) = &table.primary_key {
        definitions.push(primary_key_clause(driver, primary_key, pk_constraint));
    }
    if inline_foreign_keys {
        for fk in &table.foreign_keys {
            definitions.push(foreign_key_clause(driver, fk));
        }
    }
    create_table(driver, name, &definitions, suffix)
}

/// `CREATE [UNIQUE ]INDEX "name" ON "table" ("a", "b")`
pub(crate) fn create_index(driver: &dyn Driver, table: &str, index: &Index) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    format!(
        "CREATE {unique}INDEX {} ON {} ({})",
        driver.quote_identifier(&index.name),
        driver.quote_identifier(table),
        column_list(driver, &index.columns)
    )
}

/// `ALTER TABLE "t" ADD CONSTRAINT "fk" FOREIGN KEY ...`
pub(crate) fn add_foreign_key(driver: &dyn Driver, table: &str, foreign_key: &ForeignKey) -> String {
    format!(
        "ALTER TABLE {} ADD {}",
        driver.quote_identifier(table),
        foreign_key_clause(driver, foreign_key)
    )
}

/// `DROP TABLE "t"`
pub(crate) fn drop_table(driver: &dyn Driver, table: &str) -> String {
    format!("DROP TABLE {}", driver.quote_identifier(table))
}

/// Indexes of a freshly created table.
pub(crate) fn create_indexes(driver: &dyn Driver, table: &Table) -> Vec<String> {
    table
        .indexes
        .iter()
        .map(|index| create_index(driver, &table.name, index))
        .collect()
}

/// A table rebuild on a backend that can alter tables in place: the
/// equivalent sequence of in-place alterations.
pub(crate) fn rebuild_in_place(driver: &dyn Driver, from: &Table, to: &Table) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for op in diff_tables(to, from) {
        statements.extend(driver.render(&op)?);
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::PostgresDriver;

    #[test]
    fn defaults_quote_only_text() {
        let pg = PostgresDriver;
        let n = Column::new("n", ColumnType::Integer).default_value("0");
        assert_eq!(default_literal(&pg, &n).as_deref(), Some("0"));

        let odd = Column::new("n", ColumnType::Integer).default_value("zero");
        assert_eq!(default_literal(&pg, &odd).as_deref(), Some("'zero'"));

        let ts = Column::new("t", ColumnType::Timestamp).default_value("CURRENT_TIMESTAMP");
        assert_eq!(default_literal(&pg, &ts).as_deref(), Some("CURRENT_TIMESTAMP"));

        let s = Column::new("s", ColumnType::VarChar)
            .length(4)
            .default_value("it's");
        assert_eq!(default_literal(&pg, &s).as_deref(), Some("'it''s'"));

        assert_eq!(default_literal(&pg, &Column::new("x", ColumnType::Text)), None);
    }

    #[test]
    fn foreign_key_clause_omits_no_action() {
        let pg = PostgresDriver;
        let fk = ForeignKey::new("fk_a", vec!["a".into()], "t", vec!["id".into()]);
        assert_eq!(
            foreign_key_clause(&pg, &fk),
            r#"CONSTRAINT "fk_a" FOREIGN KEY ("a") REFERENCES "t" ("id")"#
        );
        assert_eq!(
            foreign_key_clause(&pg, &fk.on_delete_cascade().on_update_cascade()),
            r#"CONSTRAINT "fk_a" FOREIGN KEY ("a") REFERENCES "t" ("id") ON DELETE CASCADE ON UPDATE CASCADE"#
        );
    }
}
