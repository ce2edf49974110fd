//! SQLite.
//!
//! `ALTER TABLE` here can add, rename and drop columns but cannot change a
//! column, a primary key or a foreign key. Tables that need any of those
//! are rebuilt: a new table is created under a scratch name, the shared
//! columns are copied across, the old table is dropped and the new one
//! renamed into place.

use std::collections::HashSet;

use super::catalog::{self, ForeignKeyColumn, KeyColumn};
use super::{BackendKind, Driver, Session, ddl};
use crate::diff::Operation;
use crate::schema::{Column, ColumnType, ForeignKey, Index, PrimaryKey, Schema, Table, foreign_key_name};
use crate::{Bindings, Error, Result};

/// Suffix of the scratch table a rebuild copies into.
const REBUILD_SUFFIX: &str = "__rebuild";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    fn table(&self, name: &str) -> String {
        format!("ALTER TABLE {}", self.quote_identifier(name))
    }

    fn rebuild(&self, from: &Table, to: &Table) -> Vec<String> {
        let scratch = format!("{}{REBUILD_SUFFIX}", to.name);
        let mut statements = vec![ddl::create_table_with(self, to, &scratch, None, true, "")];

        let shared: Vec<String> = to
            .columns
            .iter()
            .filter(|c| from.column(&c.name).is_some())
            .map(|c| c.name.clone())
            .collect();
        if !shared.is_empty() {
            let columns = ddl::column_list(self, &shared);
            statements.push(format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                self.quote_identifier(&scratch),
                self.quote_identifier(&from.name)
            ));
        }

        statements.push(ddl::drop_table(self, &from.name));
        statements.push(format!(
            "{} RENAME TO {}",
            self.table(&scratch),
            self.quote_identifier(&to.name)
        ));
        statements.extend(ddl::create_indexes(self, to));
        statements
    }

    fn column_from_row(&self, table: &str, row: &crate::connection::Row) -> Result<Column> {
        let name = catalog::text(row, "name")?;
        let declared = row.get_text("type").unwrap_or_default();
        let (native, size) = catalog::split_type(&declared);

        let ty = match native.as_str() {
            "char" | "character" => ColumnType::Char,
            "nchar" => ColumnType::NChar,
            "varchar" => ColumnType::VarChar,
            "nvarchar" => ColumnType::NVarChar,
            "int" | "integer" => ColumnType::Integer,
            "float" | "real" | "double" => ColumnType::Float,
            "text" => ColumnType::Text,
            "timestamp" | "datetime" => ColumnType::Timestamp,
            _ => return Err(catalog::unknown_type(table, &name, &declared)),
        };

        let mut column = catalog::sized(Column::new(name, ty), size);
        column.nullable = !row.get_bool("not_null").unwrap_or(false);
        column.default = catalog::normalize_default(row.get_text("default_value").as_deref());
        Ok(column)
    }
}

/// Whether SQLite's `ALTER TABLE` cannot express the operation.
fn needs_rebuild(operation: &Operation) -> bool {
    match operation {
        Operation::ModifyColumn { .. }
        | Operation::DropColumn { .. }
        | Operation::DropPrimaryKey { .. }
        | Operation::AddPrimaryKey { .. }
        | Operation::AddForeignKey { .. }
        | Operation::DropForeignKey { .. } => true,
        // Added columns need a constant default when they are NOT NULL.
        Operation::AddColumn { column, .. } => {
            (!column.nullable && column.default.is_none())
                || (column.ty == ColumnType::Timestamp
                    && column
                        .default
                        .as_deref()
                        .is_some_and(|d| d.eq_ignore_ascii_case("CURRENT_TIMESTAMP")))
        }
        _ => false,
    }
}

impl Driver for SqliteDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn collation_ascii(&self) -> Result<&str> {
        Ok("BINARY")
    }

    fn collation_utf8(&self) -> Result<&str> {
        Ok("NOCASE")
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn begin_transaction(&self) -> Vec<String> {
        vec!["BEGIN".to_string()]
    }

    /// Dropping a rebuilt parent would fire its ON DELETE actions, so
    /// enforcement is switched off around the transaction. The pragma is a
    /// no-op inside one.
    fn foreign_key_checks(&self, enabled: bool) -> Option<String> {
        Some(format!(
            "PRAGMA foreign_keys = {}",
            if enabled { "ON" } else { "OFF" }
        ))
    }

    fn foreign_key_checks_enabled(&self) -> Option<&'static str> {
        Some("PRAGMA foreign_keys")
    }

    fn foreign_key_violations(&self) -> Option<&'static str> {
        Some("PRAGMA foreign_key_check")
    }

    fn column_type(&self, column: &Column) -> String {
        let length = column.length.unwrap_or(1);
        let ty = match column.ty {
            ColumnType::Char => format!("CHAR({length})"),
            ColumnType::NChar => format!("NCHAR({length})"),
            ColumnType::VarChar => format!("VARCHAR({length})"),
            ColumnType::NVarChar => format!("NVARCHAR({length})"),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Timestamp if column.precision > 0 => {
                format!("TIMESTAMP({})", column.precision)
            }
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
        };
        match &column.collation {
            Some(collation) => format!("{ty} COLLATE {collation}"),
            None => ty,
        }
    }

    fn canonical_column(&self, column: &Column) -> Column {
        Column {
            collation: None,
            ..column.clone()
        }
    }

    /// Folds new tables' foreign keys into their CREATE TABLE, drops the
    /// foreign keys of dropped tables along with them, and collapses every
    /// change to a table that needs a rebuild into one [`Operation::RebuildTable`].
    fn lower(&self, operations: Vec<Operation>, live: &Schema, target: &Schema) -> Vec<Operation> {
        let created: HashSet<String> = operations
            .iter()
            .filter_map(|op| match op {
                Operation::CreateTable(t) => Some(t.name.clone()),
                _ => None,
            })
            .collect();
        let dropped: HashSet<String> = operations
            .iter()
            .filter_map(|op| match op {
                Operation::DropTable { table } => Some(table.clone()),
                _ => None,
            })
            .collect();
        let rebuilt: HashSet<String> = operations
            .iter()
            .filter(|op| needs_rebuild(op))
            .map(|op| op.table().to_string())
            .filter(|t| !created.contains(t) && !dropped.contains(t))
            .collect();

        let mut lowered = Vec::with_capacity(operations.len());
        let mut emitted: HashSet<String> = HashSet::new();

        for op in operations {
            let table = op.table().to_string();
            match &op {
                Operation::DropForeignKey { .. } if dropped.contains(&table) => {}
                Operation::AddForeignKey { .. } if created.contains(&table) => {}
                _ if rebuilt.contains(&table) => {
                    let (Some(from), Some(to)) = (live.table(&table), target.table(&table)) else {
                        lowered.push(op);
                        continue;
                    };
                    if emitted.insert(table) {
                        lowered.push(Operation::RebuildTable {
                            from: from.clone(),
                            to: to.clone(),
                        });
                    }
                }
                _ => lowered.push(op),
            }
        }
        lowered
    }

    fn render(&self, operation: &Operation) -> Result<Vec<String>> {
        Ok(match operation {
            Operation::CreateTable(table) => {
                let mut statements =
                    vec![ddl::create_table_with(self, table, &table.name, None, true, "")];
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
            Operation::AddIndex { table, index } => vec![ddl::create_index(self, table, index)],
            Operation::DropIndex { index, .. } => {
                vec![format!("DROP INDEX {}", self.quote_identifier(&index.name))]
            }
            Operation::RebuildTable { from, to } => self.rebuild(from, to),
            // Lowering turns these into rebuilds when both versions of the
            // table are known.
            Operation::ModifyColumn { .. }
            | Operation::DropPrimaryKey { .. }
            | Operation::AddPrimaryKey { .. }
            | Operation::AddForeignKey { .. }
            | Operation::DropForeignKey { .. } => {
                return Err(Error::UnsupportedCapability {
                    backend: BackendKind::Sqlite,
                    capability: "altering columns, keys or foreign keys in place",
                });
            }
        })
    }

    fn live_tables(&self, session: &mut Session<'_>) -> Result<Vec<String>> {
        let rows = session.query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND substr(name, 1, 7) <> 'sqlite_' \
             ORDER BY name",
            &Bindings::None,
        )?;
        rows.iter().map(|row| catalog::text(row, "name")).collect()
    }

    fn live_columns(&self, session: &mut Session<'_>, table: &str) -> Result<Vec<Column>> {
        let rows = session.query(
            "SELECT name, type, \"notnull\" AS not_null, dflt_value AS default_value \
             FROM pragma_table_info(?) ORDER BY cid",
            &Bindings::positional([table]),
        )?;
        rows.iter().map(|row| self.column_from_row(table, row)).collect()
    }

    fn live_keys(
        &self,
        session: &mut Session<'_>,
        table: &str,
    ) -> Result<(Option<PrimaryKey>, Vec<Index>)> {
        let primary = session.query(
            "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
            &Bindings::positional([table]),
        )?;
        // Only explicitly created indexes: origin 'u' and 'pk' belong to
        // constraints.
        let indexes = session.query(
            "SELECT il.name AS index_name, il.\"unique\" AS is_unique, ii.name AS column_name \
             FROM pragma_index_list(?) il \
             JOIN pragma_index_info(il.name) ii \
             WHERE il.origin = 'c' \
             ORDER BY il.name, ii.seqno",
            &Bindings::positional([table]),
        )?;

        let mut keys = Vec::with_capacity(primary.len() + indexes.len());
        for row in &primary {
            keys.push(KeyColumn {
                index: "primary".to_string(),
                column: catalog::text(row, "name")?,
                primary: true,
                unique: true,
            });
        }
        for row in &indexes {
            keys.push(KeyColumn {
                index: catalog::text(row, "index_name")?,
                column: catalog::text(row, "column_name")?,
                primary: false,
                unique: row.get_bool("is_unique").unwrap_or(false),
            });
        }
        Ok(catalog::collect_keys(keys))
    }

    /// SQLite does not keep constraint names, so they are derived again
    /// with the same rule the builder uses.
    fn live_foreign_keys(
        &self,
        session: &mut Session<'_>,
        table: &str,
        prefix: &str,
    ) -> Result<Vec<ForeignKey>> {
        let rows = session.query(
            "SELECT id, \"from\" AS column_name, \"table\" AS foreign_table, \
                    \"to\" AS foreign_column, on_delete, on_update \
             FROM pragma_foreign_key_list(?) ORDER BY id, seq",
            &Bindings::positional([table]),
        )?;

        let columns = rows
            .iter()
            .map(|row| {
                let column = catalog::text(row, "column_name")?;
                Ok(ForeignKeyColumn {
                    name: catalog::text(row, "id")?,
                    foreign_column: row
                        .get_text("foreign_column")
                        .unwrap_or_else(|| column.clone()),
                    column,
                    foreign_table: catalog::text(row, "foreign_table")?,
                    on_delete: catalog::on_delete(&catalog::text(row, "on_delete")?),
                    on_update: catalog::on_update(&catalog::text(row, "on_update")?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let unprefixed = table.strip_prefix(prefix).unwrap_or(table);
        Ok(catalog::collect_foreign_keys(columns)
            .into_iter()
            .map(|fk| {
                ForeignKey::new(
                    foreign_key_name(prefix, unprefixed, fk.columns()),
                    fk.columns().to_vec(),
                    fk.foreign_table(),
                    fk.foreign_columns().to_vec(),
                )
                .with_on_delete(fk.on_delete())
                .with_on_update(fk.on_update())
            })
            .collect())
    }
}
