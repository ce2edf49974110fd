//! The declarative schema model.
//!
//! The same types describe both the schema an application wants (built with
//! [`SchemaBuilder`]) and the schema a database actually has (read back by
//! [`crate::introspect`]). Table names are stored with the prefix applied;
//! constraint and index names are derived from the unprefixed table name and
//! then prefixed, so every object the engine owns starts with the prefix.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::SchemaError;

mod builder;

pub use builder::{ForeignKeyDecl, IndexDecl, SchemaBuilder, TableDef};

/// Portable column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Fixed-length ASCII text
    Char,
    /// Fixed-length Unicode text
    NChar,
    /// Variable-length ASCII text
    VarChar,
    /// Variable-length Unicode text
    NVarChar,
    /// 32-bit integer
    Integer,
    /// Double precision float
    Float,
    /// Unbounded Unicode text
    Text,
    /// Date and time with fractional-second precision
    Timestamp,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Char => "char",
            ColumnType::NChar => "nchar",
            ColumnType::VarChar => "varchar",
            ColumnType::NVarChar => "nvarchar",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Whether a length must be given.
    pub fn requires_length(self) -> bool {
        matches!(
            self,
            ColumnType::Char | ColumnType::NChar | ColumnType::VarChar | ColumnType::NVarChar
        )
    }

    /// Whether values are padded to the declared length.
    pub fn is_fixed(self) -> bool {
        matches!(self, ColumnType::Char | ColumnType::NChar)
    }

    /// Unicode text types, which take the UTF-8 collation.
    pub fn is_unicode(self) -> bool {
        matches!(
            self,
            ColumnType::NChar | ColumnType::NVarChar | ColumnType::Text
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Portable type
    pub ty: ColumnType,
    /// Length, for the four character types
    pub length: Option<u32>,
    /// Fractional-second digits, for timestamps
    pub precision: u32,
    /// Collation name, when the backend supports one
    pub collation: Option<String>,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Default value as a plain literal (not SQL-quoted)
    pub default: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            length: None,
            precision: 0,
            collation: None,
            nullable: false,
            default: None,
        }
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Whether two definitions describe the same physical column.
    ///
    /// Collation is not compared: not every backend reports it, and a
    /// difference in collation alone never triggers a change.
    pub fn same_definition(&self, other: &Column) -> bool {
        self.name == other.name
            && self.ty == other.ty
            && self.length == other.length
            && (self.ty != ColumnType::Timestamp || self.precision == other.precision)
            && self.nullable == other.nullable
            && self.default == other.default
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)?;
        if let Some(length) = self.length {
            write!(f, "({length})")?;
        } else if self.ty == ColumnType::Timestamp && self.precision > 0 {
            write!(f, "({})", self.precision)?;
        }
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {default:?}")?;
        }
        Ok(())
    }
}

/// A table's primary key. Every declared table has exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub columns: Vec<String>,
}

impl PrimaryKey {
    /// Primary keys are always called this in the model; each backend
    /// spells the constraint its own way.
    pub const NAME: &'static str = "primary";

    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// A secondary index, unique or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name, prefixed
    pub name: String,
    /// Indexed columns in order
    pub columns: Vec<String>,
    /// Whether duplicate keys are rejected
    pub unique: bool,
}

/// Referential action on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnDelete {
    #[default]
    NoAction,
    Cascade,
    SetNull,
}

impl OnDelete {
    pub fn as_sql(self) -> &'static str {
        match self {
            OnDelete::NoAction => "NO ACTION",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        }
    }
}

/// Referential action on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnUpdate {
    #[default]
    NoAction,
    Cascade,
}

impl OnUpdate {
    pub fn as_sql(self) -> &'static str {
        match self {
            OnUpdate::NoAction => "NO ACTION",
            OnUpdate::Cascade => "CASCADE",
        }
    }
}

/// A foreign key constraint.
///
/// Values are immutable; the `on_*` methods return a refined copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    name: String,
    columns: Vec<String>,
    foreign_table: String,
    foreign_columns: Vec<String>,
    on_delete: OnDelete,
    on_update: OnUpdate,
}

impl ForeignKey {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        foreign_table: impl Into<String>,
        foreign_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            foreign_table: foreign_table.into(),
            foreign_columns,
            on_delete: OnDelete::NoAction,
            on_update: OnUpdate::NoAction,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Referenced table, prefixed.
    pub fn foreign_table(&self) -> &str {
        &self.foreign_table
    }

    pub fn foreign_columns(&self) -> &[String] {
        &self.foreign_columns
    }

    pub fn on_delete(&self) -> OnDelete {
        self.on_delete
    }

    pub fn on_update(&self) -> OnUpdate {
        self.on_update
    }

    pub fn with_on_delete(&self, action: OnDelete) -> Self {
        Self {
            on_delete: action,
            ..self.clone()
        }
    }

    pub fn with_on_update(&self, action: OnUpdate) -> Self {
        Self {
            on_update: action,
            ..self.clone()
        }
    }

    pub fn on_delete_cascade(&self) -> Self {
        self.with_on_delete(OnDelete::Cascade)
    }

    pub fn on_delete_set_null(&self) -> Self {
        self.with_on_delete(OnDelete::SetNull)
    }

    pub fn on_update_cascade(&self) -> Self {
        self.with_on_update(OnUpdate::Cascade)
    }

    /// Whether this key mentions `column` of `table`, on either side.
    pub fn involves(&self, own_table: &str, table: &str, column: &str) -> bool {
        (own_table == table && self.columns.iter().any(|c| c == column))
            || (self.foreign_table == table && self.foreign_columns.iter().any(|c| c == column))
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Table name, prefixed
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<Column>,
    /// Primary key; only a live table can lack one
    pub primary_key: Option<PrimaryKey>,
    /// Secondary indexes, unique ones included
    pub indexes: Vec<Index>,
    /// Foreign keys
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    /// Check the table on its own: unique column names, lengths where
    /// required, a primary key, and keys that only name existing columns.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
            if column.ty.requires_length() && column.length.is_none() {
                return Err(SchemaError::MissingLength {
                    table: self.name.clone(),
                    column: column.name.clone(),
                    ty: column.ty.as_str(),
                });
            }
        }

        let Some(primary_key) = &self.primary_key else {
            return Err(SchemaError::MissingPrimaryKey(self.name.clone()));
        };
        self.check_columns(&primary_key.columns, "primary key")?;

        for index in &self.indexes {
            self.check_columns(&index.columns, "index")?;
        }

        for fk in &self.foreign_keys {
            self.check_columns(&fk.columns, "foreign key")?;
            if fk.columns.len() != fk.foreign_columns.len() {
                return Err(SchemaError::ForeignKeyArity {
                    name: fk.name.clone(),
                    local: fk.columns.len(),
                    foreign: fk.foreign_columns.len(),
                });
            }
        }

        Ok(())
    }

    fn check_columns(&self, columns: &[String], kind: &'static str) -> Result<(), SchemaError> {
        match columns.iter().find(|c| self.column(c).is_none()) {
            Some(missing) => Err(SchemaError::UnknownColumn {
                table: self.name.clone(),
                column: missing.clone(),
                kind,
            }),
            None => Ok(()),
        }
    }
}

/// A set of tables sharing one prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// Prefix every managed table starts with
    pub prefix: String,
    /// Tables indexed by prefixed name, in declaration order
    pub tables: IndexMap<String, Table>,
}

impl Schema {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tables: IndexMap::new(),
        }
    }

    /// Add a table, rejecting a second table with the same name.
    pub fn insert(&mut self, table: Table) -> Result<(), SchemaError> {
        if self.tables.contains_key(&table.name) {
            return Err(SchemaError::DuplicateTable(table.name));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn iter_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Validate every table, then check that each foreign key points at a
    /// table and columns of this schema.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for table in self.tables.values() {
            table.validate()?;
        }

        for table in self.tables.values() {
            for fk in &table.foreign_keys {
                let Some(foreign) = self.tables.get(&fk.foreign_table) else {
                    return Err(SchemaError::UnknownForeignTable {
                        name: fk.name.clone(),
                        table: fk.foreign_table.clone(),
                    });
                };
                foreign.check_columns(&fk.foreign_columns, "foreign key target")?;
            }
        }

        Ok(())
    }
}

/// `{prefix}ix_{table}_{col1}_{col2}` for a plain index.
pub fn index_name(prefix: &str, table: &str, columns: &[String]) -> String {
    derived_name(prefix, "ix", table, columns)
}

/// `{prefix}ux_{table}_{col1}_{col2}` for a unique index.
pub fn unique_index_name(prefix: &str, table: &str, columns: &[String]) -> String {
    derived_name(prefix, "ux", table, columns)
}

/// `{prefix}fk_{table}_{col1}_{col2}` for a foreign key.
pub fn foreign_key_name(prefix: &str, table: &str, columns: &[String]) -> String {
    derived_name(prefix, "fk", table, columns)
}

fn derived_name(prefix: &str, kind: &str, table: &str, columns: &[String]) -> String {
    format!("{prefix}{kind}_{table}_{}", columns.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn derived_names_carry_the_prefix() {
        assert_eq!(
            index_name("wt_", "individuals", &cols(&["i_file", "i_sex"])),
            "wt_ix_individuals_i_file_i_sex"
        );
        assert_eq!(
            unique_index_name("wt_", "user", &cols(&["email"])),
            "wt_ux_user_email"
        );
        assert_eq!(
            foreign_key_name("", "user_setting", &cols(&["user_id"])),
            "fk_user_setting_user_id"
        );
    }

    #[test]
    fn foreign_key_refinement_returns_a_copy() {
        let fk = ForeignKey::new("fk", cols(&["a"]), "t", cols(&["b"]));
        let cascading = fk.on_delete_cascade().on_update_cascade();

        assert_eq!(fk.on_delete(), OnDelete::NoAction);
        assert_eq!(fk.on_update(), OnUpdate::NoAction);
        assert_eq!(cascading.on_delete(), OnDelete::Cascade);
        assert_eq!(cascading.on_update(), OnUpdate::Cascade);
        assert_eq!(fk.on_delete_set_null().on_delete(), OnDelete::SetNull);
    }

    #[test]
    fn same_definition_ignores_collation() {
        let a = Column::new("name", ColumnType::VarChar)
            .length(32)
            .collation("utf8mb4_unicode_ci");
        let b = Column::new("name", ColumnType::VarChar).length(32);
        assert!(a.same_definition(&b));
        assert!(!a.same_definition(&b.clone().nullable()));
        assert!(!a.same_definition(&b.clone().length(64)));
        assert!(!a.same_definition(&b.default_value("x")));
    }

    #[test]
    fn validation_reports_the_first_problem() {
        let mut table = Table::new("wt_user");
        table.columns.push(Column::new("user_id", ColumnType::Integer));
        assert_eq!(
            table.validate(),
            Err(SchemaError::MissingPrimaryKey("wt_user".into()))
        );

        table.primary_key = Some(PrimaryKey::new(["id"]));
        assert_eq!(
            table.validate(),
            Err(SchemaError::UnknownColumn {
                table: "wt_user".into(),
                column: "id".into(),
                kind: "primary key",
            })
        );

        table.primary_key = Some(PrimaryKey::new(["user_id"]));
        table.columns.push(Column::new("email", ColumnType::VarChar));
        assert!(matches!(
            table.validate(),
            Err(SchemaError::MissingLength { .. })
        ));
    }
}
