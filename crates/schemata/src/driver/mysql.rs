//! MySQL and MariaDB.
//!
//! DDL commits implicitly on this family, so migrations run without a
//! transaction and with foreign-key checks switched off for the session.

use super::catalog::{self, ForeignKeyColumn, KeyColumn};
use super::{BackendKind, Driver, ServerVersion, Session, ddl};
use crate::diff::Operation;
use crate::schema::{Column, ColumnType, ForeignKey, Index, PrimaryKey};
use crate::{Bindings, Result};

/// First MySQL release with `utf8mb4_unicode_ci` as a safe default.
const MYSQL_UTF8MB4: ServerVersion = ServerVersion::new(5, 7, 7);
/// MariaDB versions start at 10; anything from here up is MariaDB.
const MARIADB_FIRST: ServerVersion = ServerVersion::new(10, 0, 0);
const MARIADB_UTF8MB4: ServerVersion = ServerVersion::new(10, 2, 4);

#[derive(Debug, Clone)]
pub struct MySqlDriver {
    version: ServerVersion,
    mariadb: bool,
    utf8: &'static str,
}

impl MySqlDriver {
    pub fn new(version: ServerVersion, mariadb: bool) -> Self {
        let utf8mb4 = (version >= MYSQL_UTF8MB4 && version < MARIADB_FIRST)
            || version >= MARIADB_UTF8MB4;
        Self {
            version,
            mariadb,
            utf8: if utf8mb4 {
                "utf8mb4_unicode_ci"
            } else {
                "utf8mb3_unicode_ci"
            },
        }
    }

    /// Build from a `SELECT VERSION()` banner. An unparseable banner is
    /// treated as a very old server.
    pub fn from_version_string(banner: &str) -> Self {
        let version = ServerVersion::parse(banner).unwrap_or_default();
        Self::new(version, banner.to_ascii_lowercase().contains("mariadb"))
    }

    pub fn version(&self) -> ServerVersion {
        self.version
    }

    pub fn is_mariadb(&self) -> bool {
        self.mariadb
    }

    fn table(&self, name: &str) -> String {
        format!("ALTER TABLE {}", self.quote_identifier(name))
    }

    fn charset_clause(&self, column: &Column) -> String {
        let collation = match &column.collation {
            Some(collation) => collation.as_str(),
            None if column.ty.is_unicode() => self.utf8,
            None => "ascii_bin",
        };
        let charset = collation.split('_').next().unwrap_or(collation);
        format!(" CHARACTER SET {charset} COLLATE {collation}")
    }

    fn column_from_row(&self, table: &str, row: &crate::connection::Row) -> Result<Column> {
        let name = catalog::text(row, "name")?;
        let native = catalog::text(row, "data_type")?.to_ascii_lowercase();
        let charset = row.get_text("charset").unwrap_or_default();
        let ascii = charset.eq_ignore_ascii_case("ascii") || charset.eq_ignore_ascii_case("latin1");

        let ty = match native.as_str() {
            "char" if ascii => ColumnType::Char,
            "char" => ColumnType::NChar,
            "varchar" if ascii => ColumnType::VarChar,
            "varchar" => ColumnType::NVarChar,
            "int" | "integer" => ColumnType::Integer,
            "double" | "float" | "real" => ColumnType::Float,
            "text" | "mediumtext" | "longtext" => ColumnType::Text,
            "datetime" | "timestamp" => ColumnType::Timestamp,
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

        let text = column.ty.requires_length() || column.ty == ColumnType::Text;
        column.default = match row.get_text("default_value").as_deref() {
            // MariaDB reports a missing default as the bare word NULL.
            Some("NULL") if self.mariadb => None,
            // MySQL reports text defaults verbatim; MariaDB quotes them.
            Some(raw) if text && !self.mariadb => Some(raw.to_string()),
            other => catalog::normalize_default(other),
        };
        Ok(column)
    }
}

impl Driver for MySqlDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn identifier_quotes(&self) -> (char, char) {
        ('`', '`')
    }

    fn quote_value(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn collation_ascii(&self) -> Result<&str> {
        Ok("ascii_bin")
    }

    fn collation_utf8(&self) -> Result<&str> {
        Ok(self.utf8)
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn reuses_placeholders(&self) -> bool {
        false
    }

    fn foreign_key_checks(&self, enabled: bool) -> Option<String> {
        Some(format!("SET FOREIGN_KEY_CHECKS = {}", u8::from(enabled)))
    }

    fn current_timestamp(&self, precision: u32) -> String {
        if precision > 0 {
            format!("CURRENT_TIMESTAMP({precision})")
        } else {
            "CURRENT_TIMESTAMP".to_string()
        }
    }

    fn column_type(&self, column: &Column) -> String {
        let length = column.length.unwrap_or(1);
        match column.ty {
            ColumnType::Char | ColumnType::NChar => {
                format!("CHAR({length}){}", self.charset_clause(column))
            }
            ColumnType::VarChar | ColumnType::NVarChar => {
                format!("VARCHAR({length}){}", self.charset_clause(column))
            }
            ColumnType::Integer => "INT".to_string(),
            ColumnType::Float => "DOUBLE".to_string(),
            ColumnType::Text => format!("LONGTEXT{}", self.charset_clause(column)),
            ColumnType::Timestamp if column.precision > 0 => {
                format!("DATETIME({})", column.precision)
            }
            ColumnType::Timestamp => "DATETIME".to_string(),
        }
    }

    fn render(&self, operation: &Operation) -> Result<Vec<String>> {
        Ok(match operation {
            Operation::CreateTable(table) => {
                let mut statements = vec![ddl::create_table_with(
                    self,
                    table,
                    &table.name,
                    None,
                    false,
                    " ENGINE=InnoDB",
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
            Operation::ModifyColumn { table, to, .. } => vec![format!(
                "{} MODIFY COLUMN {}",
                self.table(table),
                ddl::column_definition(self, to)
            )],
            Operation::DropPrimaryKey { table, .. } => {
                vec![format!("{} DROP PRIMARY KEY", self.table(table))]
            }
            Operation::AddPrimaryKey { table, primary_key } => vec![format!(
                "{} ADD {}",
                self.table(table),
                ddl::primary_key_clause(self, primary_key, None)
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
                "{} DROP FOREIGN KEY {}",
                self.table(table),
                self.quote_identifier(foreign_key.name())
            )],
            Operation::RebuildTable { from, to } => ddl::rebuild_in_place(self, from, to)?,
        })
    }

    fn live_tables(&self, session: &mut Session<'_>) -> Result<Vec<String>> {
        let rows = session.query(
            "SELECT table_name AS name \
             FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &Bindings::None,
        )?;
        rows.iter().map(|row| catalog::text(row, "name")).collect()
    }

    fn live_columns(&self, session: &mut Session<'_>, table: &str) -> Result<Vec<Column>> {
        let rows = session.query(
            "SELECT column_name AS name, data_type AS data_type, \
                    character_maximum_length AS max_length, \
                    datetime_precision AS dt_precision, \
                    character_set_name AS charset, collation_name AS collation, \
                    is_nullable AS nullable, column_default AS default_value \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? \
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
            "SELECT index_name AS index_name, column_name AS column_name, \
                    non_unique AS non_unique \
             FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = ? \
             ORDER BY index_name, seq_in_index",
            &Bindings::positional([table]),
        )?;

        let keys = rows
            .iter()
            .map(|row| {
                let index = catalog::text(row, "index_name")?;
                Ok(KeyColumn {
                    primary: index == "PRIMARY",
                    unique: !row.get_bool("non_unique").unwrap_or(true),
                    column: catalog::text(row, "column_name")?,
                    index,
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
            "SELECT k.constraint_name AS name, k.column_name AS column_name, \
                    k.referenced_table_name AS foreign_table, \
                    k.referenced_column_name AS foreign_column, \
                    r.delete_rule AS on_delete, r.update_rule AS on_update \
             FROM information_schema.key_column_usage k \
             JOIN information_schema.referential_constraints r \
               ON r.constraint_schema = k.constraint_schema \
              AND r.constraint_name = k.constraint_name \
              AND r.table_name = k.table_name \
             WHERE k.table_schema = DATABASE() AND k.table_name = ? \
               AND k.referenced_table_name IS NOT NULL \
             ORDER BY k.constraint_name, k.ordinal_position",
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
