//! Helpers for reading catalog rows back into the schema model.

use indexmap::IndexMap;

use crate::connection::Row;
use crate::schema::{Column, ColumnType, ForeignKey, Index, OnDelete, OnUpdate, PrimaryKey};
use crate::{Error, Result};

/// A required text field of a catalog row.
pub(crate) fn text(row: &Row, field: &str) -> Result<String> {
    row.get_text(field)
        .ok_or_else(|| Error::Introspection(format!("catalog row has no {field}: {row:?}")))
}

/// An optional numeric field, as a `u32`.
pub(crate) fn number(row: &Row, field: &str) -> Option<u32> {
    row.get_i64(field).and_then(|n| u32::try_from(n).ok())
}

/// A column whose native type has no logical counterpart.
pub(crate) fn unknown_type(table: &str, column: &str, native: &str) -> Error {
    Error::Introspection(format!(
        "{table}.{column} has unsupported type {native}"
    ))
}

/// Split a declared type such as `VARCHAR(32)` or `timestamp(3)` into its
/// lowercased name and the first numeric argument.
pub(crate) fn split_type(declared: &str) -> (String, Option<u32>) {
    let declared = declared.trim();
    match declared.split_once('(') {
        Some((name, args)) => {
            let first = args
                .trim_end_matches(')')
                .split(',')
                .next()
                .and_then(|n| n.trim().parse().ok());
            (name.trim().to_ascii_lowercase(), first)
        }
        None => (declared.to_ascii_lowercase(), None),
    }
}

/// Fill the length or precision of a column from a catalog number.
pub(crate) fn sized(mut column: Column, size: Option<u32>) -> Column {
    if column.ty.requires_length() {
        column.length = size;
    } else if column.ty == ColumnType::Timestamp {
        column.precision = size.unwrap_or(0);
    }
    column
}

/// Reduce a default as the catalog reports it to the plain literal the
/// model stores.
///
/// Handles SQL Server's `((0))` and `(N'x')`, PostgreSQL's
/// `'x'::character varying`, quoted MariaDB literals and the various
/// spellings of the current time.
pub(crate) fn normalize_default(raw: Option<&str>) -> Option<String> {
    let mut s = raw?.trim();
    while let Some(inner) = strip_outer_parens(s) {
        s = inner.trim();
    }

    if s.eq_ignore_ascii_case("NULL") || s.to_ascii_uppercase().starts_with("NULL::") {
        return None;
    }

    let lower = s.to_ascii_lowercase();
    if lower.starts_with("current_timestamp")
        || lower == "now()"
        || lower == "getdate()"
        || lower == "sysdatetime()"
        || lower.starts_with("datetime('now'")
    {
        return Some("CURRENT_TIMESTAMP".to_string());
    }

    let unprefixed = match s.strip_prefix(['N', 'n']) {
        Some(rest) if rest.starts_with('\'') => rest,
        _ => s,
    };

    if let Some(literal) = quoted_literal(unprefixed) {
        return Some(literal);
    }

    // An unquoted value may still carry a cast, as in `0::integer`.
    let bare = match s.split_once("::") {
        Some((value, _)) => value.trim(),
        None => s,
    };
    let bare = strip_outer_parens(bare).unwrap_or(bare);
    Some(bare.to_string())
}

/// `(x)` → `x`, but only when the opening parenthesis closes at the end.
fn strip_outer_parens(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

/// The contents of a leading `'...'` literal with `''` unescaped, ignoring
/// whatever follows the closing quote (a cast, usually).
fn quoted_literal(s: &str) -> Option<String> {
    let mut chars = s.strip_prefix('\'')?.chars().peekable();
    let mut out = String::new();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
            } else {
                return Some(out);
            }
        } else {
            out.push(c);
        }
    }
    None
}

pub(crate) fn on_delete(rule: &str) -> OnDelete {
    match rule.trim().to_ascii_uppercase().as_str() {
        "CASCADE" => OnDelete::Cascade,
        "SET NULL" | "SET_NULL" => OnDelete::SetNull,
        _ => OnDelete::NoAction,
    }
}

pub(crate) fn on_update(rule: &str) -> OnUpdate {
    match rule.trim().to_ascii_uppercase().as_str() {
        "CASCADE" => OnUpdate::Cascade,
        _ => OnUpdate::NoAction,
    }
}

/// One column of one index, as the catalogs list them.
pub(crate) struct KeyColumn {
    pub index: String,
    pub column: String,
    pub primary: bool,
    pub unique: bool,
}

/// Group index columns into the primary key and secondary indexes. Rows
/// must arrive ordered by position within each index.
pub(crate) fn collect_keys(
    rows: impl IntoIterator<Item = KeyColumn>,
) -> (Option<PrimaryKey>, Vec<Index>) {
    let mut primary: Option<PrimaryKey> = None;
    let mut indexes: IndexMap<String, Index> = IndexMap::new();

    for row in rows {
        if row.primary {
            primary
                .get_or_insert_with(|| PrimaryKey::new(Vec::<String>::new()))
                .columns
                .push(row.column);
            continue;
        }
        indexes
            .entry(row.index.clone())
            .or_insert_with(|| Index {
                name: row.index,
                columns: Vec::new(),
                unique: row.unique,
            })
            .columns
            .push(row.column);
    }

    (primary, indexes.into_values().collect())
}

/// One column pair of one foreign key.
pub(crate) struct ForeignKeyColumn {
    pub name: String,
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
    pub on_delete: OnDelete,
    pub on_update: OnUpdate,
}

/// Group foreign key columns by constraint. Rows must arrive ordered by
/// position within each constraint.
pub(crate) fn collect_foreign_keys(
    rows: impl IntoIterator<Item = ForeignKeyColumn>,
) -> Vec<ForeignKey> {
    struct Pending {
        columns: Vec<String>,
        foreign_table: String,
        foreign_columns: Vec<String>,
        on_delete: OnDelete,
        on_update: OnUpdate,
    }

    let mut keys: IndexMap<String, Pending> = IndexMap::new();
    for row in rows {
        let pending = keys.entry(row.name).or_insert_with(|| Pending {
            columns: Vec::new(),
            foreign_table: row.foreign_table,
            foreign_columns: Vec::new(),
            on_delete: row.on_delete,
            on_update: row.on_update,
        });
        pending.columns.push(row.column);
        pending.foreign_columns.push(row.foreign_column);
    }

    keys.into_iter()
        .map(|(name, p)| {
            ForeignKey::new(name, p.columns, p.foreign_table, p.foreign_columns)
                .with_on_delete(p.on_delete)
                .with_on_update(p.on_update)
        })
        .collect()
}
