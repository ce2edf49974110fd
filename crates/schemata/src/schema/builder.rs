//! Declarative construction of a target [`Schema`].
//!
//! ```ignore
//! let b = SchemaBuilder::new(db.driver(), "wt_");
//! let schema = b
//!     .clone()
//!     .table(
//!         "user",
//!         TableDef::new()
//!             .column(b.integer("user_id"))
//!             .column(b.varchar("user_name", 32))
//!             .column(b.nvarchar("real_name", 64))
//!             .primary_key(b.primary_key(&["user_id"]))
//!             .unique_index(b.unique_index(&["user_name"])),
//!     )
//!     .build()?;
//! ```

use super::{
    Column, ColumnType, ForeignKey, Index, OnDelete, OnUpdate, PrimaryKey, Schema, Table,
    foreign_key_name, index_name, unique_index_name,
};
use crate::Result;
use crate::driver::Driver;

/// Columns of an index, before the name is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDecl {
    pub columns: Vec<String>,
}

/// A foreign key as declared, before the name is derived and the
/// referenced table is prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDecl {
    pub columns: Vec<String>,
    pub foreign_table: String,
    pub foreign_columns: Vec<String>,
    pub on_delete: OnDelete,
    pub on_update: OnUpdate,
}

impl ForeignKeyDecl {
    pub fn on_delete_cascade(self) -> Self {
        Self {
            on_delete: OnDelete::Cascade,
            ..self
        }
    }

    pub fn on_delete_set_null(self) -> Self {
        Self {
            on_delete: OnDelete::SetNull,
            ..self
        }
    }

    pub fn on_update_cascade(self) -> Self {
        Self {
            on_update: OnUpdate::Cascade,
            ..self
        }
    }
}

/// The parts of one table, as separately typed lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDef {
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKey>,
    pub indexes: Vec<IndexDecl>,
    pub unique_indexes: Vec<IndexDecl>,
    pub foreign_keys: Vec<ForeignKeyDecl>,
}

impl TableDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn primary_key(mut self, primary_key: PrimaryKey) -> Self {
        self.primary_key = Some(primary_key);
        self
    }

    pub fn index(mut self, index: IndexDecl) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn unique_index(mut self, index: IndexDecl) -> Self {
        self.unique_indexes.push(index);
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKeyDecl) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }
}

/// Builds a validated [`Schema`] for one driver and prefix.
///
/// Text columns pick up the driver's collations; on backends without
/// per-column collations they are left unset.
#[derive(Clone)]
pub struct SchemaBuilder<'d> {
    driver: &'d dyn Driver,
    prefix: String,
    tables: Vec<(String, TableDef)>,
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

impl<'d> SchemaBuilder<'d> {
    pub fn new(driver: &'d dyn Driver, prefix: impl Into<String>) -> Self {
        Self {
            driver,
            prefix: prefix.into(),
            tables: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn ascii(&self, column: Column) -> Column {
        match self.driver.collation_ascii() {
            Ok(collation) => column.collation(collation),
            Err(_) => column,
        }
    }

    fn utf8(&self, column: Column) -> Column {
        match self.driver.collation_utf8() {
            Ok(collation) => column.collation(collation),
            Err(_) => column,
        }
    }

    /// Fixed-length ASCII text with a binary collation.
    pub fn char(&self, name: &str, length: u32) -> Column {
        self.ascii(Column::new(name, ColumnType::Char).length(length))
    }

    /// Variable-length ASCII text with a binary collation.
    pub fn varchar(&self, name: &str, length: u32) -> Column {
        self.ascii(Column::new(name, ColumnType::VarChar).length(length))
    }

    /// Fixed-length Unicode text.
    pub fn nchar(&self, name: &str, length: u32) -> Column {
        self.utf8(Column::new(name, ColumnType::NChar).length(length))
    }

    /// Variable-length Unicode text.
    pub fn nvarchar(&self, name: &str, length: u32) -> Column {
        self.utf8(Column::new(name, ColumnType::NVarChar).length(length))
    }

    pub fn integer(&self, name: &str) -> Column {
        Column::new(name, ColumnType::Integer)
    }

    pub fn float(&self, name: &str) -> Column {
        Column::new(name, ColumnType::Float)
    }

    pub fn text(&self, name: &str) -> Column {
        self.utf8(Column::new(name, ColumnType::Text))
    }

    pub fn timestamp(&self, name: &str, precision: u32) -> Column {
        Column::new(name, ColumnType::Timestamp).precision(precision)
    }

    pub fn primary_key(&self, columns: &[&str]) -> PrimaryKey {
        PrimaryKey::new(columns.iter().copied())
    }

    pub fn index(&self, columns: &[&str]) -> IndexDecl {
        IndexDecl {
            columns: names(columns),
        }
    }

    pub fn unique_index(&self, columns: &[&str]) -> IndexDecl {
        IndexDecl {
            columns: names(columns),
        }
    }

    /// A foreign key from `local` columns to `table` (unprefixed). The
    /// referenced columns default to the local ones.
    pub fn foreign_key(
        &self,
        local: &[&str],
        table: &str,
        foreign: Option<&[&str]>,
    ) -> ForeignKeyDecl {
        ForeignKeyDecl {
            columns: names(local),
            foreign_table: table.to_string(),
            foreign_columns: names(foreign.unwrap_or(local)),
            on_delete: OnDelete::NoAction,
            on_update: OnUpdate::NoAction,
        }
    }

    /// Add a table under its unprefixed name.
    pub fn table(mut self, name: &str, def: TableDef) -> Self {
        self.tables.push((name.to_string(), def));
        self
    }

    /// Assemble the tables, derive every name, and validate the result.
    pub fn build(self) -> Result<Schema> {
        let prefix = self.prefix;
        let mut schema = Schema::new(prefix.clone());

        for (name, def) in self.tables {
            let mut table = Table::new(format!("{prefix}{name}"));
            table.columns = def.columns;
            table.primary_key = def.primary_key;

            for decl in def.indexes {
                table.indexes.push(Index {
                    name: index_name(&prefix, &name, &decl.columns),
                    columns: decl.columns,
                    unique: false,
                });
            }
            for decl in def.unique_indexes {
                table.indexes.push(Index {
                    name: unique_index_name(&prefix, &name, &decl.columns),
                    columns: decl.columns,
                    unique: true,
                });
            }
            for decl in def.foreign_keys {
                let fk = ForeignKey::new(
                    foreign_key_name(&prefix, &name, &decl.columns),
                    decl.columns,
                    format!("{prefix}{}", decl.foreign_table),
                    decl.foreign_columns,
                );
                table
                    .foreign_keys
                    .push(fk.with_on_delete(decl.on_delete).with_on_update(decl.on_update));
            }

            schema.insert(table)?;
        }

        schema.validate()?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MySqlDriver, PostgresDriver, ServerVersion, SqliteDriver};
    use crate::{Error, SchemaError};

    #[test]
    fn text_columns_take_driver_collations() {
        let mysql = MySqlDriver::new(ServerVersion::new(8, 0, 36), false);
        let b = SchemaBuilder::new(&mysql, "wt_");
        assert_eq!(b.varchar("a", 8).collation.as_deref(), Some("ascii_bin"));
        assert_eq!(
            b.nvarchar("a", 8).collation.as_deref(),
            Some("utf8mb4_unicode_ci")
        );
        assert_eq!(b.integer("a").collation, None);

        let pg = PostgresDriver;
        let b = SchemaBuilder::new(&pg, "wt_");
        assert_eq!(b.nvarchar("a", 8).collation, None);
    }

    #[test]
    fn build_derives_prefixed_names() {
        let driver = SqliteDriver;
        let b = SchemaBuilder::new(&driver, "wt_");
        let schema = b
            .clone()
            .table(
                "user",
                TableDef::new()
                    .column(b.integer("user_id"))
                    .column(b.varchar("user_name", 32))
                    .primary_key(b.primary_key(&["user_id"]))
                    .unique_index(b.unique_index(&["user_name"])),
            )
            .table(
                "user_setting",
                TableDef::new()
                    .column(b.integer("user_id"))
                    .column(b.varchar("setting_name", 32))
                    .column(b.nvarchar("setting_value", 255).nullable())
                    .primary_key(b.primary_key(&["user_id", "setting_name"]))
                    .index(b.index(&["setting_name"]))
                    .foreign_key(b.foreign_key(&["user_id"], "user", None).on_delete_cascade()),
            )
            .build()
            .unwrap();

        let user = schema.table("wt_user").unwrap();
        assert_eq!(user.indexes[0].name, "wt_ux_user_user_name");
        assert!(user.indexes[0].unique);

        let setting = schema.table("wt_user_setting").unwrap();
        assert_eq!(setting.indexes[0].name, "wt_ix_user_setting_setting_name");
        let fk = &setting.foreign_keys[0];
        assert_eq!(fk.name(), "wt_fk_user_setting_user_id");
        assert_eq!(fk.foreign_table(), "wt_user");
        assert_eq!(fk.foreign_columns(), ["user_id".to_string()]);
        assert_eq!(fk.on_delete(), OnDelete::Cascade);
    }

    #[test]
    fn build_rejects_broken_declarations() {
        let driver = SqliteDriver;
        let b = SchemaBuilder::new(&driver, "wt_");

        let err = b
            .clone()
            .table(
                "a",
                TableDef::new()
                    .column(b.integer("id"))
                    .column(b.integer("b_id"))
                    .primary_key(b.primary_key(&["id"]))
                    .foreign_key(b.foreign_key(&["b_id"], "b", Some(&["id"][..]))),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::UnknownForeignTable { ref table, .. }) if table == "wt_b"
        ));

        let err = b
            .clone()
            .table(
                "a",
                TableDef::new()
                    .column(b.integer("id"))
                    .primary_key(b.primary_key(&["id"])),
            )
            .table(
                "a",
                TableDef::new()
                    .column(b.integer("id"))
                    .primary_key(b.primary_key(&["id"])),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::DuplicateTable(_))));

        let err = b
            .clone()
            .table(
                "a",
                TableDef::new()
                    .column(b.integer("id"))
                    .column(b.integer("x"))
                    .primary_key(b.primary_key(&["id"]))
                    .foreign_key(b.foreign_key(&["x"], "a", Some(&["id", "x"][..]))),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::ForeignKeyArity {
                local: 1,
                foreign: 2,
                ..
            })
        ));
    }
}
