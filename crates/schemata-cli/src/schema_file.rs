//! Declarative schema files.
//!
//! A schema file is TOML with one `[[table]]` entry per table, in creation
//! order:
//!
//! ```toml
//! [[table]]
//! name = "user"
//! primary_key = ["user_id"]
//! unique_index = [["user_name"]]
//!
//! [[table.column]]
//! name = "user_id"
//! type = "integer"
//!
//! [[table.column]]
//! name = "user_name"
//! type = "varchar"
//! length = 32
//!
//! [[table.foreign_key]]
//! columns = ["gedcom_id"]
//! table = "gedcom"
//! on_delete = "cascade"
//! ```

use std::path::Path;

use config::{Config, File, FileFormat};
use schemata::{Column, Driver, Schema, SchemaBuilder, TableDef};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum SchemaFileError {
    #[error("failed to read schema file: {0}")]
    Read(#[from] config::ConfigError),

    #[error("column {table}.{column}: {message}")]
    Column {
        table: String,
        column: String,
        message: String,
    },

    #[error("foreign key on {table}: unknown action {action:?}")]
    Action { table: String, action: String },

    #[error(transparent)]
    Schema(#[from] schemata::Error),
}

#[derive(Debug, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub table: Vec<TableSpec>,
}

#[derive(Debug, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub column: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub index: Vec<Vec<String>>,
    #[serde(default)]
    pub unique_index: Vec<Vec<String>>,
    #[serde(default)]
    pub foreign_key: Vec<ForeignKeySpec>,
}

#[derive(Debug, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    #[serde(default)]
    pub nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForeignKeySpec {
    pub columns: Vec<String>,
    pub table: String,
    pub references: Option<Vec<String>>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

impl SchemaFile {
    pub fn load(path: &Path) -> Result<Self, SchemaFileError> {
        Self::parse(File::from(path).format(FileFormat::Toml))
    }

    pub fn from_toml(source: &str) -> Result<Self, SchemaFileError> {
        Self::parse(File::from_str(source, FileFormat::Toml))
    }

    fn parse<S>(source: S) -> Result<Self, SchemaFileError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Ok(Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?)
    }

    /// Turn the file into builder calls for `driver`.
    pub fn build(&self, driver: &dyn Driver, prefix: &str) -> Result<Schema, SchemaFileError> {
        let b = SchemaBuilder::new(driver, prefix);
        let mut builder = b.clone();

        for spec in &self.table {
            let mut def = TableDef::new();
            for column in &spec.column {
                def = def.column(column_from_spec(&b, &spec.name, column)?);
            }

            def = def.primary_key(b.primary_key(&refs(&spec.primary_key)));
            for cols in &spec.index {
                def = def.index(b.index(&refs(cols)));
            }
            for cols in &spec.unique_index {
                def = def.unique_index(b.unique_index(&refs(cols)));
            }
            for fk in &spec.foreign_key {
                let references = fk.references.as_deref().map(refs);
                let mut decl = b.foreign_key(&refs(&fk.columns), &fk.table, references.as_deref());
                decl = match fk.on_delete.as_deref() {
                    None | Some("no-action") => decl,
                    Some("cascade") => decl.on_delete_cascade(),
                    Some("set-null") => decl.on_delete_set_null(),
                    Some(other) => return Err(action_error(&spec.name, other)),
                };
                decl = match fk.on_update.as_deref() {
                    None | Some("no-action") => decl,
                    Some("cascade") => decl.on_update_cascade(),
                    Some(other) => return Err(action_error(&spec.name, other)),
                };
                def = def.foreign_key(decl);
            }

            builder = builder.table(&spec.name, def);
        }

        Ok(builder.build()?)
    }
}

fn refs(cols: &[String]) -> Vec<&str> {
    cols.iter().map(String::as_str).collect()
}

fn action_error(table: &str, action: &str) -> SchemaFileError {
    SchemaFileError::Action {
        table: table.to_string(),
        action: action.to_string(),
    }
}

fn column_from_spec(
    b: &SchemaBuilder<'_>,
    table: &str,
    spec: &ColumnSpec,
) -> Result<Column, SchemaFileError> {
    let error = |message: &str| SchemaFileError::Column {
        table: table.to_string(),
        column: spec.name.clone(),
        message: message.to_string(),
    };
    let length = || spec.length.ok_or_else(|| error("a length is required"));

    let name = spec.name.as_str();
    let mut column = match spec.ty.to_ascii_lowercase().as_str() {
        "char" => b.char(name, length()?),
        "varchar" => b.varchar(name, length()?),
        "nchar" => b.nchar(name, length()?),
        "nvarchar" => b.nvarchar(name, length()?),
        "integer" | "int" => b.integer(name),
        "float" => b.float(name),
        "text" => b.text(name),
        "timestamp" => b.timestamp(name, spec.precision.unwrap_or(0)),
        other => return Err(error(&format!("unknown type {other:?}"))),
    };
    if spec.nullable {
        column = column.nullable();
    }
    if let Some(default) = &spec.default {
        column = column.default_value(default.as_str());
    }
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata::driver::SqliteDriver;
    use schemata::{ColumnType, OnDelete};

    const GEDCOM: &str = r#"
[[table]]
name = "gedcom"
primary_key = ["gedcom_id"]
unique_index = [["gedcom_name"]]

[[table.column]]
name = "gedcom_id"
type = "integer"

[[table.column]]
name = "gedcom_name"
type = "varchar"
length = 255

[[table]]
name = "gedcom_setting"
primary_key = ["gedcom_id", "setting_name"]

[[table.column]]
name = "gedcom_id"
type = "integer"

[[table.column]]
name = "setting_name"
type = "varchar"
length = 32

[[table.column]]
name = "setting_value"
type = "nvarchar"
length = 255
default = ""

[[table.foreign_key]]
columns = ["gedcom_id"]
table = "gedcom"
on_delete = "cascade"
"#;

    #[test]
    fn builds_tables_in_file_order() {
        let file = SchemaFile::from_toml(GEDCOM).unwrap();
        let schema = file.build(&SqliteDriver, "wt_").unwrap();

        let names: Vec<&str> = schema.tables.keys().map(String::as_str).collect();
        assert_eq!(names, ["wt_gedcom", "wt_gedcom_setting"]);

        let setting = schema.table("wt_gedcom_setting").unwrap();
        let value = setting.column("setting_value").unwrap();
        assert_eq!(value.ty, ColumnType::NVarChar);
        assert_eq!(value.collation.as_deref(), Some("NOCASE"));
        assert_eq!(value.default.as_deref(), Some(""));

        let fk = &setting.foreign_keys[0];
        assert_eq!(fk.name(), "wt_fk_gedcom_setting_gedcom_id");
        assert_eq!(fk.on_delete(), OnDelete::Cascade);

        let gedcom = schema.table("wt_gedcom").unwrap();
        assert_eq!(gedcom.indexes[0].name, "wt_ux_gedcom_gedcom_name");
    }

    #[test]
    fn lengths_are_required_for_character_types() {
        let file = SchemaFile::from_toml(
            r#"
[[table]]
name = "t"
primary_key = ["c"]

[[table.column]]
name = "c"
type = "char"
"#,
        )
        .unwrap();
        let err = file.build(&SqliteDriver, "wt_").unwrap_err();
        assert_eq!(err.to_string(), "column t.c: a length is required");
    }
}
