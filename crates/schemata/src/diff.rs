//! Schema diffing: compare a target schema against a live one.
//!
//! [`diff`] produces the operations that turn the live schema into the
//! target. Their order only matters within a phase; [`crate::order`] sorts
//! them into phases afterwards.
//!
//! Tables, indexes and foreign keys are matched by name. Names are derived
//! from table and column names, so a changed column list shows up as a drop
//! of the old name and an add of the new one. Renames are not detected: a
//! renamed column is a drop followed by an add.
//!
//! A foreign key that references a column being dropped or redefined, or a
//! table being dropped, is dropped and re-added even if its own definition
//! is unchanged. Indexes over a redefined column and primary keys over one
//! get the same treatment, since some backends refuse to alter a column
//! that an index depends on.

use std::collections::HashSet;
use std::fmt;

use crate::schema::{Column, ForeignKey, Index, PrimaryKey, Schema, Table};

/// A single schema change.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Create a table with its columns, primary key and indexes.
    CreateTable(Table),
    /// Drop a table.
    DropTable { table: String },
    /// Add a column.
    AddColumn { table: String, column: Column },
    /// Drop a column.
    DropColumn { table: String, column: String },
    /// Change a column's type, length, nullability or default.
    ModifyColumn {
        table: String,
        from: Column,
        to: Column,
    },
    /// Drop the primary key.
    DropPrimaryKey {
        table: String,
        primary_key: PrimaryKey,
    },
    /// Add a primary key.
    AddPrimaryKey {
        table: String,
        primary_key: PrimaryKey,
    },
    /// Add an index.
    AddIndex { table: String, index: Index },
    /// Drop an index.
    DropIndex { table: String, index: Index },
    /// Add a foreign key.
    AddForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    /// Drop a foreign key.
    DropForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    /// Recreate a table under its new definition, copying the columns both
    /// definitions share. Only produced by drivers that cannot alter tables
    /// in place.
    RebuildTable { from: Table, to: Table },
}

impl Operation {
    /// The table this operation changes.
    pub fn table(&self) -> &str {
        match self {
            Operation::CreateTable(t) => &t.name,
            Operation::RebuildTable { to, .. } => &to.name,
            Operation::DropTable { table }
            | Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::ModifyColumn { table, .. }
            | Operation::DropPrimaryKey { table, .. }
            | Operation::AddPrimaryKey { table, .. }
            | Operation::AddIndex { table, .. }
            | Operation::DropIndex { table, .. }
            | Operation::AddForeignKey { table, .. }
            | Operation::DropForeignKey { table, .. } => table,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable(t) => write!(f, "+ table {}", t.name),
            Operation::DropTable { table } => write!(f, "- table {table}"),
            Operation::AddColumn { table, column } => {
                write!(f, "+ {table}.{}: {column}", column.name)
            }
            Operation::DropColumn { table, column } => write!(f, "- {table}.{column}"),
            Operation::ModifyColumn { table, from, to } => {
                write!(f, "~ {table}.{}: {from} -> {to}", to.name)
            }
            Operation::DropPrimaryKey { table, primary_key } => {
                write!(f, "- {table} PRIMARY KEY ({})", primary_key.columns.join(", "))
            }
            Operation::AddPrimaryKey { table, primary_key } => {
                write!(f, "+ {table} PRIMARY KEY ({})", primary_key.columns.join(", "))
            }
            Operation::AddIndex { table, index } => {
                let unique = if index.unique { "UNIQUE " } else { "" };
                write!(
                    f,
                    "+ {table} {unique}INDEX {} ({})",
                    index.name,
                    index.columns.join(", ")
                )
            }
            Operation::DropIndex { table, index } => write!(f, "- {table} INDEX {}", index.name),
            Operation::AddForeignKey { table, foreign_key } => write!(
                f,
                "+ {table} FOREIGN KEY {} ({}) -> {} ({})",
                foreign_key.name(),
                foreign_key.columns().join(", "),
                foreign_key.foreign_table(),
                foreign_key.foreign_columns().join(", ")
            ),
            Operation::DropForeignKey { table, foreign_key } => {
                write!(f, "- {table} FOREIGN KEY {}", foreign_key.name())
            }
            Operation::RebuildTable { to, .. } => write!(f, "~ rebuild {}", to.name),
        }
    }
}

/// The operations that reconcile a live schema with a target schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub operations: Vec<Operation>,
}

impl SchemaDiff {
    /// Returns true if there are no differences.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No changes detected.");
        }
        for op in &self.operations {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}

/// Objects of the live schema that disappear or change shape, and
/// therefore cannot stay referenced while the change happens.
struct Disturbed<'a> {
    dropped_tables: HashSet<&'a str>,
    changed_columns: HashSet<(&'a str, &'a str)>,
    rekeyed_tables: HashSet<&'a str>,
}

impl<'a> Disturbed<'a> {
    fn new(target: &'a Schema, live: &'a Schema) -> Self {
        let mut dropped_tables = HashSet::new();
        let mut changed_columns = HashSet::new();
        let mut rekeyed_tables = HashSet::new();

        for live_table in live.iter_tables() {
            let Some(target_table) = target.table(&live_table.name) else {
                dropped_tables.insert(live_table.name.as_str());
                continue;
            };

            for column in &live_table.columns {
                let unchanged = target_table
                    .column(&column.name)
                    .is_some_and(|c| c.same_definition(column));
                if !unchanged {
                    changed_columns.insert((live_table.name.as_str(), column.name.as_str()));
                }
            }
        }

        for live_table in live.iter_tables() {
            let Some(target_table) = target.table(&live_table.name) else {
                continue;
            };
            let key_column_changed = live_table.primary_key.as_ref().is_some_and(|pk| {
                pk.columns
                    .iter()
                    .any(|c| changed_columns.contains(&(live_table.name.as_str(), c.as_str())))
            });
            if live_table.primary_key != target_table.primary_key || key_column_changed {
                rekeyed_tables.insert(live_table.name.as_str());
            }
        }

        Self {
            dropped_tables,
            changed_columns,
            rekeyed_tables,
        }
    }

    fn column(&self, table: &str, column: &str) -> bool {
        self.changed_columns.contains(&(table, column))
    }

    fn index(&self, table: &str, index: &Index) -> bool {
        index.columns.iter().any(|c| self.column(table, c))
    }

    fn primary_key(&self, table: &str) -> bool {
        self.rekeyed_tables.contains(table)
    }

    fn foreign_key(&self, table: &str, fk: &ForeignKey) -> bool {
        let foreign = fk.foreign_table();
        self.dropped_tables.contains(foreign)
            || self.rekeyed_tables.contains(foreign)
            || fk.columns().iter().any(|c| self.column(table, c))
            || fk.foreign_columns().iter().any(|c| self.column(foreign, c))
    }
}

/// Compute the operations that turn `live` into `target`.
///
/// Both schemas are expected to be filtered to the same prefix.
pub fn diff(target: &Schema, live: &Schema) -> SchemaDiff {
    let disturbed = Disturbed::new(target, live);
    let mut ops = Vec::new();

    for live_table in live.iter_tables() {
        if target.table(&live_table.name).is_some() {
            continue;
        }
        for fk in &live_table.foreign_keys {
            ops.push(Operation::DropForeignKey {
                table: live_table.name.clone(),
                foreign_key: fk.clone(),
            });
        }
        ops.push(Operation::DropTable {
            table: live_table.name.clone(),
        });
    }

    for target_table in target.iter_tables() {
        match live.table(&target_table.name) {
            None => {
                ops.push(Operation::CreateTable(target_table.clone()));
                for fk in &target_table.foreign_keys {
                    ops.push(Operation::AddForeignKey {
                        table: target_table.name.clone(),
                        foreign_key: fk.clone(),
                    });
                }
            }
            Some(live_table) => diff_table(&mut ops, target_table, live_table, &disturbed),
        }
    }

    SchemaDiff { operations: ops }
}

/// The ordered operations that turn one live table into its target
/// definition in place.
pub fn diff_tables(target: &Table, live: &Table) -> Vec<Operation> {
    let single = |table: &Table| {
        let mut schema = Schema::default();
        schema.tables.insert(table.name.clone(), table.clone());
        schema
    };
    crate::order::order(diff(&single(target), &single(live)).into_operations())
}

/// Diff two tables with the same name.
fn diff_table(ops: &mut Vec<Operation>, target: &Table, live: &Table, disturbed: &Disturbed<'_>) {
    let table = &target.name;

    // A live object survives if the target has an identical one and nothing
    // it depends on is changing.
    let keep_fk = |fk: &ForeignKey| {
        target.foreign_key(fk.name()) == Some(fk) && !disturbed.foreign_key(table, fk)
    };
    let keep_index =
        |idx: &Index| target.index(&idx.name) == Some(idx) && !disturbed.index(table, idx);

    for fk in live.foreign_keys.iter().filter(|fk| !keep_fk(fk)) {
        ops.push(Operation::DropForeignKey {
            table: table.clone(),
            foreign_key: fk.clone(),
        });
    }

    for idx in live.indexes.iter().filter(|idx| !keep_index(idx)) {
        ops.push(Operation::DropIndex {
            table: table.clone(),
            index: idx.clone(),
        });
    }

    let rekeyed = disturbed.primary_key(table);
    if rekeyed {
        if let Some(primary_key) = &live.primary_key {
            ops.push(Operation::DropPrimaryKey {
                table: table.clone(),
                primary_key: primary_key.clone(),
            });
        }
    }

    for column in &live.columns {
        if target.column(&column.name).is_none() {
            ops.push(Operation::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            });
        }
    }

    for column in &target.columns {
        match live.column(&column.name) {
            None => ops.push(Operation::AddColumn {
                table: table.clone(),
                column: column.clone(),
            }),
            Some(current) if !column.same_definition(current) => {
                ops.push(Operation::ModifyColumn {
                    table: table.clone(),
                    from: current.clone(),
                    to: column.clone(),
                })
            }
            Some(_) => {}
        }
    }

    if rekeyed {
        if let Some(primary_key) = &target.primary_key {
            ops.push(Operation::AddPrimaryKey {
                table: table.clone(),
                primary_key: primary_key.clone(),
            });
        }
    }

    for idx in &target.indexes {
        if !live.index(&idx.name).is_some_and(|l| keep_index(l)) {
            ops.push(Operation::AddIndex {
                table: table.clone(),
                index: idx.clone(),
            });
        }
    }

    for fk in &target.foreign_keys {
        if !live.foreign_key(fk.name()).is_some_and(|l| keep_fk(l)) {
            ops.push(Operation::AddForeignKey {
                table: table.clone(),
                foreign_key: fk.clone(),
            });
        }
    }
}
