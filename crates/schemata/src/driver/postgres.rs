//! PostgreSQL.
//!
//! Text is UTF-8 database-wide, so the ASCII/Unicode split collapses: the
//! `n`-prefixed types are stored as their plain counterparts and columns
//! carry no collation.

use super::catalog::{self, ForeignKeyColumn, KeyColumn};
use super::{BackendKind, Driver, Session, ddl};
use crate::diff::Operation;
use crate::schema::{Column, ColumnType, ForeignKey, Index, PrimaryKey};
use crate::{Bindings, Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    fn table(&self, name: &str) -> String {
        format!("ALTER TABLE {}", self.quote_identifier(name))
    }

    /// Postgres names a table's primary key constraint `{table}_pkey`.
    fn pkey(table: &str) -> String {
        format!("{table}_pkey")
    }

    fn modify_column(&self, table: &str, from: &Column, to: &Column) -> Vec<String> {
        let alter = format!(
            "{} ALTER COLUMN {}",
            self.table(table),
            self.quote_identifier(&to.name)
        );
        let retyped = from.ty != to.ty
            || from.length != to.length
            || (to.ty == ColumnType::Timestamp && from.precision != to.precision);
        let redefault = retyped || from.default != to.default;

        let mut statements = Vec::new();
        if redefault && from.default.is_some() {
            statements.push(format!("{alter} DROP DEFAULT"));
        }
        if retyped {
            let ty = self.column_type(to);
            statements.push(format!(
                "{alter} TYPE {ty} USING {}::{ty}",
                self.quote_identifier(&to.name)
            ));
        }
        if from.nullable != to.nullable {
            let action = if to.nullable { "DROP" } else { "SET" };
            statements.push(format!("{alter} {action} NOT NULL"));
        }
        if redefault {
            if let Some(default) = ddl::default_literal(self, to) {
                statements.push(format!("{alter} SET DEFAULT {default}"));
            }
        }
        statements
    }

    fn column_from_row(&self, table: &str, row: &crate::connection::Row) -> Result<Column> {
        let name = catalog::text(row, "name")?;
        let native = catalog::text(row, "data_type")?;

        let (ty, size) = match native.as_str() {
            "character" => (ColumnType::Char, catalog::number(row, "max_length")),
            "character varying" => (ColumnType::VarChar, catalog::number(row, "max_length")),
            "integer" => (ColumnType::Integer, None),
            "double precision" => (ColumnType::Float, None),
            "text" => (ColumnType::Text, None),
            "timestamp without time zone" | "timestamp with time zone" => {
                (ColumnType::Timestamp, catalog::number(row, "dt_precision"))
            }
            other => return Err(catalog::unknown_type(table, &name, other)),
        };

        let mut column = catalog::sized(Column::new(name, ty), size);
        column.nullable = row.get_bool("nullable").unwrap_or(false);
        column.default = catalog::normalize_default(row.get_text("default_value").as_deref());
        Ok(column)
    }
}

/// `pg_constraint` action codes.
fn action(code: &str) -> &'static str {
    match code {
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        "r" => "RESTRICT",
        _ => "NO ACTION",
    }
}

impl Driver for PostgresDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn collation_ascii(&self) -> Result<&str> {
        Err(Error::UnsupportedCapability {
            backend: BackendKind::Postgres,
            capability: "collation_ascii",
        })
    }

    fn collation_utf8(&self) -> Result<&str> {
        Err(Error::UnsupportedCapability {
            backend: BackendKind::Postgres,
            capability: "collation_utf8",
        })
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn case_insensitive_like(&self) -> &'static str {
        "ILIKE"
    }

    fn group_concat(&self, expr: &str) -> String {
        format!("STRING_AGG({expr}, ',')")
    }

    fn column_type(&self, column: &Column) -> String {
        let length = column.length.unwrap_or(1);
        match column.ty {
            ColumnType::Char | ColumnType::NChar => format!("CHAR({length})"),
            ColumnType::VarChar | ColumnType::NVarChar => format!("VARCHAR({length})"),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Float => "DOUBLE PRECISION".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Timestamp => format!("TIMESTAMP({})", column.precision),
        }
    }

    fn canonical_column(&self, column: &Column) -> Column {
        let ty = match column.ty {
            ColumnType::NChar => ColumnType::Char,
            ColumnType::NVarChar => ColumnType::VarChar,
            ty => ty,
        };
        Column {
            ty,
            collation: None,
            ..column.clone()
        }
    }

    fn render(&self, operation: &Operation) -> Result<Vec<String>> {
        Ok(match operation {
            Operation::CreateTable(table) => {
                let pkey = Self::pkey(&table.name);
                let mut statements = vec![ddl::create_table_with(
                    self,
                    table,
                    &table.name,
                    Some(&pkey),
                    false,
                    "",
                )];
                statements.extend(ddl::create_indexes(self, table));
                statements
            }
            Operation::DropTable { table } => vec![ddl::drop_table(self, table)],
            Operation::AddColumn { table, column } => vec![format!(
                "{} ADD COLUMN {}",
                self.table(table),
                ddl::column_definition(self, column)
            )],
            Operation::DropColumn { table, column } => vec![format!(
                "{} DROP COLUMN {}",
                self.table(table),
                self.quote_identifier(column)
            )],
            Operation::ModifyColumn { table, from, to } => self.modify_column(table, from, to),
            Operation::DropPrimaryKey { table, .. } => vec![format!(
                "{} DROP CONSTRAINT {}",
                self.table(table),
                self.quote_identifier(&Self::pkey(table))
            )],
            Operation::AddPrimaryKey { table, primary_key } => vec![format!(
                "{} ADD {}",
                self.table(table),
                ddl::primary_key_clause(self, primary_key, Some(&Self::pkey(table)))
            )],
            Operation::AddIndex { table, index } => vec![ddl::create_index(self, table, index)],
            Operation::DropIndex { index, .. } => {
                vec![format!("DROP INDEX {}", self.quote_identifier(&index.name))]
            }
            Operation::AddForeignKey { table, foreign_key } => {
                vec![ddl::add_foreign_key(self, table, foreign_key)]
            }
            Operation::DropForeignKey { table, foreign_key } => vec![format!(
                "{} DROP CONSTRAINT {}",
                self.table(table),
                self.quote_identifier(foreign_key.name())
            )],
            Operation::RebuildTable { from, to } => ddl::rebuild_in_place(self, from, to)?,
        })
    }

    fn live_tables(&self, session: &mut Session<'_>) -> Result<Vec<String>> {
        let rows = session.query(
            "SELECT table_name::text AS name \
             FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &Bindings::None,
        )?;
        rows.iter().map(|row| catalog::text(row, "name")).collect()
    }

    fn live_columns(&self, session: &mut Session<'_>, table: &str) -> Result<Vec<Column>> {
        let rows = session.query(
            "SELECT column_name::text AS name, data_type::text AS data_type, \
                    character_maximum_length::int4 AS max_length, \
                    datetime_precision::int4 AS dt_precision, \
                    is_nullable::text AS nullable, column_default::text AS default_value \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name::text = ? \
             ORDER BY ordinal_position",
            &Bindings::positional([table]),
        )?;
        rows.iter().map(|row| self.column_from_row(table, row)).collect()
    }

    fn live_keys(
        &self,
        session: &mut Session<'_>,
        table: &str,
    ) -> Result<(Option<PrimaryKey>, Vec<Index>)> {
        let rows = session.query(
            "SELECT i.relname::text AS index_name, a.attname::text AS column_name, \
                    ix.indisprimary AS is_primary, ix.indisunique AS is_unique \
             FROM pg_index ix \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
             WHERE n.nspname = current_schema() AND t.relname::text = ? \
             ORDER BY i.relname, k.ord",
            &Bindings::positional([table]),
        )?;

        let keys = rows
            .iter()
            .map(|row| {
                Ok(KeyColumn {
                    index: catalog::text(row, "index_name")?,
                    column: catalog::text(row, "column_name")?,
                    primary: row.get_bool("is_primary").unwrap_or(false),
                    unique: row.get_bool("is_unique").unwrap_or(false),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(catalog::collect_keys(keys))
    }

    fn live_foreign_keys(
        &self,
        session: &mut Session<'_>,
        table: &str,
        _prefix: &str,
    ) -> Result<Vec<ForeignKey>> {
        let rows = session.query(
            "SELECT c.conname::text AS name, a.attname::text AS column_name, \
                    ft.relname::text AS foreign_table, fa.attname::text AS foreign_column, \
                    c.confdeltype::text AS on_delete, c.confupdtype::text AS on_update \
             FROM pg_constraint c \
             JOIN pg_class t ON t.oid = c.conrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_class ft ON ft.oid = c.confrelid \
             CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, fattnum, ord) \
             JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum \
             JOIN pg_attribute fa ON fa.attrelid = c.confrelid AND fa.attnum = k.fattnum \
             WHERE c.contype = 'f' AND n.nspname = current_schema() AND t.relname::text = ? \
             ORDER BY c.conname, k.ord",
            &Bindings::positional([table]),
        )?;

        let columns = rows
            .iter()
            .map(|row| {
                Ok(ForeignKeyColumn {
                    name: catalog::text(row, "name")?,
                    column: catalog::text(row, "column_name")?,
                    foreign_table: catalog::text(row, "foreign_table")?,
                    foreign_column: catalog::text(row, "foreign_column")?,
                    on_delete: catalog::on_delete(action(&catalog::text(row, "on_delete")?)),
                    on_update: catalog::on_update(action(&catalog::text(row, "on_update")?)),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(catalog::collect_foreign_keys(columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Table;

    #[test]
    fn collations_are_unsupported() {
        let err = PostgresDriver.collation_utf8().unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedCapability {
                backend: BackendKind::Postgres,
                ..
            }
        ));
    }

    #[test]
    fn canonical_columns_drop_the_unicode_split() {
        let column = Column::new("name", ColumnType::NVarChar)
            .length(64)
            .collation("x");
        let canonical = PostgresDriver.canonical_column(&column);
        assert_eq!(canonical.ty, ColumnType::VarChar);
        assert_eq!(canonical.collation, None);
    }

    #[test]
    fn renders_create_table_with_named_primary_key() {
        let mut table = Table::new("wt_setting");
        table.columns = vec![
            Column::new("user_id", ColumnType::Integer),
            Column::new("name", ColumnType::VarChar).length(32),
            Column::new("value", ColumnType::Text).nullable(),
        ];
        table.primary_key = Some(PrimaryKey::new(["user_id", "name"]));

        let sql = PostgresDriver.render(&Operation::CreateTable(table)).unwrap().join(";\n");
        insta::assert_snapshot!(sql, @r#"
        CREATE TABLE "wt_setting" (
            "user_id" INTEGER NOT NULL,
            "name" VARCHAR(32) NOT NULL,
            "value" TEXT NULL,
            CONSTRAINT "wt_setting_pkey" PRIMARY KEY ("user_id", "name")
        )
        "#);
    }

    #[test]
    fn modify_column_splits_into_actions() {
        let from = Column::new("n", ColumnType::Integer).default_value("0");
        let to = Column::new("n", ColumnType::Float).nullable().default_value("1.5");
        let sql = PostgresDriver.render(&Operation::ModifyColumn {
            table: "wt_t".into(),
            from,
            to,
        })
        .unwrap();
        insta::assert_snapshot!(sql.join("\n"), @r#"
        ALTER TABLE "wt_t" ALTER COLUMN "n" DROP DEFAULT
        ALTER TABLE "wt_t" ALTER COLUMN "n" TYPE DOUBLE PRECISION USING "n"::DOUBLE PRECISION
        ALTER TABLE "wt_t" ALTER COLUMN "n" DROP NOT NULL
        ALTER TABLE "wt_t" ALTER COLUMN "n" SET DEFAULT 1.5
        "#);

        let only_null = PostgresDriver.render(&Operation::ModifyColumn {
            table: "wt_t".into(),
            from: Column::new("n", ColumnType::Integer),
            to: Column::new("n", ColumnType::Integer).nullable(),
        })
        .unwrap();
        assert_eq!(only_null, [r#"ALTER TABLE "wt_t" ALTER COLUMN "n" DROP NOT NULL"#]);
    }

    #[test]
    fn rebuild_renders_in_place() {
        let mut from = Table::new("wt_t");
        from.columns = vec![Column::new("id", ColumnType::Integer)];
        from.primary_key = Some(PrimaryKey::new(["id"]));
        let mut to = from.clone();
        to.columns.push(Column::new("n", ColumnType::Integer).nullable());

        let sql = PostgresDriver.render(&Operation::RebuildTable { from, to }).unwrap();
        assert_eq!(sql, [r#"ALTER TABLE "wt_t" ADD COLUMN "n" INTEGER NULL"#]);
    }
}
