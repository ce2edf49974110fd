//! Microsoft SQL Server.
//!
//! Defaults are constraints here, and a column cannot be dropped or
//! altered while one is attached. Every default therefore gets a
//! predictable name, `{table}_{column}_default`, so that it can be dropped
//! again without a catalog lookup.

use super::catalog::{self, ForeignKeyColumn, KeyColumn};
use super::{BackendKind, Driver, Session, ddl};
use crate::diff::Operation;
use crate::schema::{Column, ColumnType, ForeignKey, Index, PrimaryKey};
use crate::{Bindings, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDriver;

impl SqlServerDriver {
    fn table(&self, name: &str) -> String {
        format!("ALTER TABLE {}", self.quote_identifier(name))
    }

    fn pkey(table: &str) -> String {
        format!("{table}_pkey")
    }

    fn default_name(table: &str, column: &str) -> String {
        format!("{table}_{column}_default")
    }

    /// A column definition with its default as a named constraint.
    fn definition(&self, table: &str, column: &Column) -> String {
        let mut out = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.column_type(column)
        );
        out.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
        if let Some(default) = ddl::default_literal(self, column) {
            out.push_str(&format!(
                " CONSTRAINT {} DEFAULT {default}",
                self.quote_identifier(&Self::default_name(table, &column.name))
            ));
        }
        out
    }

    fn drop_default(&self, table: &str, column: &str) -> String {
        format!(
            "{} DROP CONSTRAINT IF EXISTS {}",
            self.table(table),
            self.quote_identifier(&Self::default_name(table, column))
        )
    }

    fn modify_column(&self, table: &str, from: &Column, to: &Column) -> Vec<String> {
        let retyped = from.ty != to.ty
            || from.length != to.length
            || (to.ty == ColumnType::Timestamp && from.precision != to.precision)
            || from.nullable != to.nullable;
        let redefault = retyped || from.default != to.default;

        let mut statements = Vec::new();
        if redefault && from.default.is_some() {
            statements.push(self.drop_default(table, &to.name));
        }
        if retyped {
            statements.push(format!(
                "{} ALTER COLUMN {} {}{}",
                self.table(table),
                self.quote_identifier(&to.name),
                self.column_type(to),
                if to.nullable { " NULL" } else { " NOT NULL" }
            ));
        }
        if redefault {
            if let Some(default) = ddl::default_literal(self, to) {
                statements.push(format!(
                    "{} ADD CONSTRAINT {} DEFAULT {default} FOR {}",
                    self.table(table),
                    self.quote_identifier(&Self::default_name(table, &to.name)),
                    self.quote_identifier(&to.name)
                ));
            }
        }
        statements
    }

    fn column_from_row(&self, table: &str, row: &crate::connection::Row) -> Result<Column> {
        let name = catalog::text(row, "name")?;
        let native = catalog::text(row, "data_type")?.to_ascii_lowercase();
        // -1 marks a MAX length
        let max = row.get_i64("max_length") == Some(-1);

        let ty = match native.as_str() {
            "nvarchar" | "varchar" if max => ColumnType::Text,
            "ntext" | "text" => ColumnType::Text,
            "char" => ColumnType::Char,
            "nchar" => ColumnType::NChar,
            "varchar" => ColumnType::VarChar,
            "nvarchar" => ColumnType::NVarChar,
            "int" => ColumnType::Integer,
            "float" | "real" => ColumnType::Float,
            "datetime2" | "datetime" => ColumnType::Timestamp,
            other => return Err(catalog::unknown_type(table, &name, other)),
        };
        let size = if ty == ColumnType::Timestamp {
            catalog::number(row, "dt_precision")
        } else {
            catalog::number(row, "max_length")
        };

        let mut column = catalog::sized(Column::new(name, ty), size);
        column.collation = row.get_text("collation");
        column.nullable = row.get_bool("nullable").unwrap_or(false);
        column.default = catalog::normalize_default(row.get_text("default_value").as_deref());
        Ok(column)
    }
}

impl Driver for SqlServerDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::SqlServer
    }

    fn identifier_quotes(&self) -> (char, char) {
        ('[', ']')
    }

    fn quote_value(&self, value: &str) -> String {
        format!("N'{}'", value.replace('\'', "''"))
    }

    fn collation_ascii(&self) -> Result<&str> {
        Ok("Latin1_General_BIN")
    }

    fn collation_utf8(&self) -> Result<&str> {
        Ok("Latin1_General_100_CI_AI_SC_UTF8")
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{index}")
    }

    fn begin_transaction(&self) -> Vec<String> {
        vec!["BEGIN TRANSACTION".to_string()]
    }

    fn commit(&self) -> &'static str {
        "COMMIT TRANSACTION"
    }

    fn rollback(&self) -> &'static str {
        "ROLLBACK TRANSACTION"
    }

    fn case_insensitive_like(&self) -> &'static str {
        "COLLATE SQL_UTF8_General_CI_AI LIKE"
    }

    fn group_concat(&self, expr: &str) -> String {
        format!("STRING_AGG({expr}, ',')")
    }

    /// SQL Server has no LIMIT; OFFSET/FETCH needs an ORDER BY in the query.
    fn limit_clause(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        if limit.is_none() && offset.is_none() {
            return String::new();
        }
        let mut out = format!("\nOFFSET {} ROWS", offset.unwrap_or("0"));
        if let Some(limit) = limit {
            out.push_str(&format!("\nFETCH NEXT {limit} ROWS ONLY"));
        }
        out
    }

    fn column_type(&self, column: &Column) -> String {
        let length = column.length.unwrap_or(1);
        let ty = match column.ty {
            ColumnType::Char => format!("CHAR({length})"),
            ColumnType::NChar => format!("NCHAR({length})"),
            ColumnType::VarChar => format!("VARCHAR({length})"),
            ColumnType::NVarChar => format!("NVARCHAR({length})"),
            ColumnType::Integer => "INT".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Text => "NVARCHAR(MAX)".to_string(),
            ColumnType::Timestamp => format!("DATETIME2({})", column.precision),
        };
        match &column.collation {
            Some(collation) if column.ty.requires_length() || column.ty == ColumnType::Text => {
                format!("{ty} COLLATE {collation}")
            }
            _ => ty,
        }
    }

    fn render(&self, operation: &Operation) -> Result<Vec<String>> {
        Ok(match operation {
            Operation::CreateTable(table) => {
                let mut definitions: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| self.definition(&table.name, c))
                    .collect();
                if let Some(primary_key) = &table.primary_key {
                    definitions.push(ddl::primary_key_clause(
                        self,
                        primary_key,
                        Some(&Self::pkey(&table.name)),
                    ));
                }
                let mut statements = vec![ddl::create_table(self, &table.name, &definitions, "")];
                statements.extend(ddl::create_indexes(self, table));
                statements
            }
            Operation::DropTable { table } => vec![ddl::drop_table(self, table)],
            Operation::AddColumn { table, column } => vec![format!(
                "{} ADD {}",
                self.table(table),
                self.definition(table, column)
            )],
            Operation::DropColumn { table, column } => vec![
                self.drop_default(table, column),
                format!(
                    "{} DROP COLUMN {}",
                    self.table(table),
                    self.quote_identifier(column)
                ),
            ],
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
            Operation::DropIndex { table, index } => vec![format!(
                "DROP INDEX {} ON {}",
                self.quote_identifier(&index.name),
                self.quote_identifier(table)
            )],
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
            "SELECT TABLE_NAME AS name \
             FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_SCHEMA = SCHEMA_NAME() \
             ORDER BY TABLE_NAME",
            &Bindings::None,
        )?;
        rows.iter().map(|row| catalog::text(row, "name")).collect()
    }

    fn live_columns(&self, session: &mut Session<'_>, table: &str) -> Result<Vec<Column>> {
        let rows = session.query(
            "SELECT COLUMN_NAME AS name, DATA_TYPE AS data_type, \
                    CHARACTER_MAXIMUM_LENGTH AS max_length, \
                    DATETIME_PRECISION AS dt_precision, COLLATION_NAME AS collation, \
                    IS_NULLABLE AS nullable, COLUMN_DEFAULT AS default_value \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = SCHEMA_NAME() AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
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
            "SELECT i.name AS index_name, c.name AS column_name, \
                    i.is_primary_key AS is_primary, i.is_unique AS is_unique \
             FROM sys.indexes i \
             JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
             JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
             WHERE i.object_id = OBJECT_ID(?) AND i.type > 0 AND ic.is_included_column = 0 \
             ORDER BY i.name, ic.key_ordinal",
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
            "SELECT fk.name AS name, pc.name AS column_name, rt.name AS foreign_table, \
                    rc.name AS foreign_column, \
                    fk.delete_referential_action_desc AS on_delete, \
                    fk.update_referential_action_desc AS on_update \
             FROM sys.foreign_keys fk \
             JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id \
             JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id \
             JOIN sys.tables rt ON rt.object_id = fkc.referenced_object_id \
             JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id \
             WHERE fk.parent_object_id = OBJECT_ID(?) \
             ORDER BY fk.name, fkc.constraint_column_id",
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
                    on_delete: catalog::on_delete(&catalog::text(row, "on_delete")?),
                    on_update: catalog::on_update(&catalog::text(row, "on_update")?),
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
    fn defaults_are_named_constraints() {
        let mut table = Table::new("wt_t");
        table.columns = vec![
            Column::new("id", ColumnType::Integer),
            Column::new("code", ColumnType::VarChar)
                .length(8)
                .collation("Latin1_General_BIN")
                .default_value("x"),
            Column::new("body", ColumnType::Text).nullable(),
        ];
        table.primary_key = Some(PrimaryKey::new(["id"]));

        let sql = SqlServerDriver.render(&Operation::CreateTable(table)).unwrap().join(";\n");
        insta::assert_snapshot!(sql, @r"
        CREATE TABLE [wt_t] (
            [id] INT NOT NULL,
            [code] VARCHAR(8) COLLATE Latin1_General_BIN NOT NULL CONSTRAINT [wt_t_code_default] DEFAULT N'x',
            [body] NVARCHAR(MAX) NULL,
            CONSTRAINT [wt_t_pkey] PRIMARY KEY ([id])
        )
        ");
    }

    #[test]
    fn columns_shed_their_default_before_changing() {
        let from = Column::new("n", ColumnType::Integer).default_value("0");
        let to = Column::new("n", ColumnType::Integer).nullable().default_value("0");
        let sql = SqlServerDriver.render(&Operation::ModifyColumn {
            table: "wt_t".into(),
            from,
            to,
        })
        .unwrap();
        insta::assert_snapshot!(sql.join("\n"), @r"
        ALTER TABLE [wt_t] DROP CONSTRAINT IF EXISTS [wt_t_n_default]
        ALTER TABLE [wt_t] ALTER COLUMN [n] INT NULL
        ALTER TABLE [wt_t] ADD CONSTRAINT [wt_t_n_default] DEFAULT 0 FOR [n]
        ");

        let sql = SqlServerDriver.render(&Operation::DropColumn {
            table: "wt_t".into(),
            column: "n".into(),
        })
        .unwrap();
        assert_eq!(sql.len(), 2);
    }

    #[test]
    fn limit_uses_offset_fetch() {
        assert_eq!(
            SqlServerDriver.limit_clause(Some("10"), None),
            "\nOFFSET 0 ROWS\nFETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(SqlServerDriver.limit_clause(None, None), "");
    }
}
