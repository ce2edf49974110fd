//! Reading the live schema back from the database.

use tracing::debug;

use crate::driver::{Database, Session};
use crate::schema::{Schema, Table};
use crate::Result;

/// Read every managed table of the database into a [`Schema`].
///
/// Only tables, indexes and foreign keys whose names start with the
/// database prefix are kept. The comparison is a plain string prefix
/// match: `_` is a wildcard in SQL `LIKE`, so the filtering is not left to
/// the server.
pub fn introspect(db: &mut Database) -> Result<Schema> {
    let prefix = db.prefix().to_string();
    introspect_session(&mut db.session(), &prefix)
}

/// [`introspect`] over an existing session.
pub fn introspect_session(session: &mut Session<'_>, prefix: &str) -> Result<Schema> {
    let driver = session.driver();
    let mut schema = Schema::new(prefix);

    for name in driver.live_tables(session)? {
        if !name.starts_with(prefix) {
            continue;
        }

        let mut table = Table::new(name.as_str());
        table.columns = driver.live_columns(session, &name)?;

        let (primary_key, indexes) = driver.live_keys(session, &name)?;
        table.primary_key = primary_key;
        table.foreign_keys = driver
            .live_foreign_keys(session, &name, prefix)?
            .into_iter()
            .filter(|fk| fk.name().starts_with(prefix))
            .collect();
        // MySQL backs every foreign key with an index of the same name.
        table.indexes = indexes
            .into_iter()
            .filter(|index| index.name.starts_with(prefix))
            .filter(|index| table.foreign_key(&index.name).is_none())
            .collect();

        debug!(
            table = %table.name,
            columns = table.columns.len(),
            indexes = table.indexes.len(),
            foreign_keys = table.foreign_keys.len(),
            "introspected table"
        );
        schema.insert(table)?;
    }

    Ok(schema)
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::Bindings;
    use crate::schema::{ColumnType, OnDelete, PrimaryKey};

    fn db() -> Database {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        Database::connect("sqlite", conn, "wt_").unwrap()
    }

    #[test]
    fn reads_tables_keys_and_defaults() {
        let mut db = db();
        for sql in [
            r#"CREATE TABLE "wt_family" ("f_id" VARCHAR(20) NOT NULL, PRIMARY KEY ("f_id"))"#,
            r#"CREATE TABLE "wt_link" (
                "l_file" INTEGER NOT NULL,
                "l_from" VARCHAR(20) NOT NULL,
                "l_type" VARCHAR(15) NOT NULL DEFAULT 'FAMS',
                "l_to" VARCHAR(20) NULL,
                "l_when" TIMESTAMP(3) NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY ("l_file", "l_from"),
                CONSTRAINT "whatever" FOREIGN KEY ("l_to") REFERENCES "wt_family" ("f_id") ON DELETE SET NULL
            )"#,
            r#"CREATE UNIQUE INDEX "wt_ux_link_l_to_l_type" ON "wt_link" ("l_to", "l_type")"#,
            r#"CREATE INDEX "other_index" ON "wt_link" ("l_type")"#,
            r#"CREATE TABLE "other_users" ("id" INTEGER)"#,
        ] {
            db.execute(sql, &Bindings::None).unwrap();
        }

        let schema = introspect(&mut db).unwrap();
        let names: Vec<&str> = schema.tables.keys().map(String::as_str).collect();
        assert_eq!(names, ["wt_family", "wt_link"]);

        let link = schema.table("wt_link").unwrap();
        assert_eq!(link.primary_key, Some(PrimaryKey::new(["l_file", "l_from"])));

        let l_type = link.column("l_type").unwrap();
        assert_eq!(l_type.ty, ColumnType::VarChar);
        assert_eq!(l_type.length, Some(15));
        assert!(!l_type.nullable);
        assert_eq!(l_type.default.as_deref(), Some("FAMS"));

        let l_when = link.column("l_when").unwrap();
        assert_eq!(l_when.precision, 3);
        assert_eq!(l_when.default.as_deref(), Some("CURRENT_TIMESTAMP"));

        assert_eq!(link.indexes.len(), 1);
        assert_eq!(link.indexes[0].name, "wt_ux_link_l_to_l_type");
        assert!(link.indexes[0].unique);

        let fk = &link.foreign_keys[0];
        assert_eq!(fk.name(), "wt_fk_link_l_to");
        assert_eq!(fk.foreign_table(), "wt_family");
        assert_eq!(fk.on_delete(), OnDelete::SetNull);
    }
}
