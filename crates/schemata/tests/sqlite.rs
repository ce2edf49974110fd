//! End-to-end migrations against in-memory SQLite.

#![cfg(feature = "sqlite")]

use schemata::{
    Bindings, Database, FailurePolicy, MigrationPlan, Migrator, Outcome, Schema, SchemaBuilder,
    TableDef, TransactionOutcome, introspect, migrate,
};

fn open() -> Database {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let mut db = Database::connect("sqlite", conn, "wt_").unwrap();
    db.execute("PRAGMA foreign_keys = ON", &Bindings::None).unwrap();
    db
}

/// A small genealogy schema. `v2` adds a column and changes a foreign key
/// policy.
fn genealogy(db: &Database, v2: bool) -> Schema {
    let b = SchemaBuilder::new(db.driver(), db.prefix());

    let mut individual = TableDef::new()
        .column(b.varchar("i_id", 20))
        .column(b.integer("i_file"))
        .column(b.char("i_sex", 1).default_value("U"))
        .column(b.text("i_gedcom"))
        .primary_key(b.primary_key(&["i_id", "i_file"]))
        .index(b.index(&["i_file", "i_sex"]));
    if v2 {
        individual = individual.column(b.timestamp("i_changed", 0).nullable());
    }

    let link_fk = b.foreign_key(&["l_file"], "tree", Some(&["tree_id"][..]));
    let link = TableDef::new()
        .column(b.integer("l_file"))
        .column(b.varchar("l_from", 20))
        .column(b.varchar("l_type", 15).default_value("FAMS"))
        .column(b.varchar("l_to", 20))
        .column(b.timestamp("l_when", 3).nullable().default_value("CURRENT_TIMESTAMP"))
        .primary_key(b.primary_key(&["l_from", "l_file", "l_type", "l_to"]))
        .unique_index(b.unique_index(&["l_to", "l_file", "l_type", "l_from"]))
        .foreign_key(if v2 { link_fk.on_delete_cascade() } else { link_fk });

    let tree = TableDef::new()
        .column(b.integer("tree_id"))
        .column(b.nvarchar("tree_title", 255))
        .column(b.float("tree_score").nullable())
        .column(b.integer("tree_private").default_value("0"))
        .primary_key(b.primary_key(&["tree_id"]))
        .unique_index(b.unique_index(&["tree_title"]));

    // Referencing tables first, so creation order alone cannot satisfy the
    // foreign keys.
    b.clone()
        .table("link", link)
        .table("individual", individual)
        .table("tree", tree)
        .build()
        .unwrap()
}

fn master(db: &mut Database) -> Vec<(String, String, String)> {
    db.query(
        "SELECT type, name, COALESCE(sql, '') AS sql FROM sqlite_master ORDER BY type, name",
        &Bindings::None,
    )
    .unwrap()
    .iter()
    .map(|row| {
        (
            row.get_text("type").unwrap(),
            row.get_text("name").unwrap(),
            row.get_text("sql").unwrap(),
        )
    })
    .collect()
}

fn plan(db: &mut Database, target: &Schema) -> MigrationPlan {
    let live = introspect(db).unwrap();
    MigrationPlan::new(db.driver(), target, &live).unwrap()
}

fn foreign_keys_enabled(db: &mut Database) -> bool {
    let rows = db.query("PRAGMA foreign_keys", &Bindings::None).unwrap();
    rows[0].get_bool("foreign_keys").unwrap()
}

/// Asserts that `live` holds exactly the target tables, compared the way
/// the backend stores them.
fn assert_same_tables(db: &Database, live: &Schema, target: &Schema) {
    let mut live_names: Vec<&String> = live.tables.keys().collect();
    let mut target_names: Vec<&String> = target.tables.keys().collect();
    live_names.sort();
    target_names.sort();
    assert_eq!(live_names, target_names);

    for wanted in target.iter_tables() {
        let table = live.table(&wanted.name).unwrap();
        let columns: Vec<_> = wanted
            .columns
            .iter()
            .map(|c| db.driver().canonical_column(c))
            .collect();
        assert_eq!(table.columns.len(), columns.len(), "{}", wanted.name);
        for (got, want) in table.columns.iter().zip(&columns) {
            assert!(got.same_definition(want), "{}: {got:?} != {want:?}", wanted.name);
        }
        assert_eq!(table.primary_key, wanted.primary_key, "{}", wanted.name);

        let mut got = table.indexes.clone();
        let mut want = wanted.indexes.clone();
        got.sort_by(|a, b| a.name.cmp(&b.name));
        want.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(got, want, "{}", wanted.name);

        let mut got = table.foreign_keys.clone();
        let mut want = wanted.foreign_keys.clone();
        got.sort_by(|a, b| a.name().cmp(b.name()));
        want.sort_by(|a, b| a.name().cmp(b.name()));
        assert_eq!(got, want, "{}", wanted.name);
    }
}

/// A tree with a cascading link, the tree's name sized `name_length`.
fn cascading(db: &Database, name_length: u32) -> Schema {
    let b = SchemaBuilder::new(db.driver(), db.prefix());
    let tree = TableDef::new()
        .column(b.integer("tree_id"))
        .column(b.varchar("tree_name", name_length))
        .primary_key(b.primary_key(&["tree_id"]));
    let link = TableDef::new()
        .column(b.integer("l_file"))
        .column(b.varchar("l_from", 20))
        .primary_key(b.primary_key(&["l_file", "l_from"]))
        .foreign_key(
            b.foreign_key(&["l_file"], "tree", Some(&["tree_id"][..]))
                .on_delete_cascade(),
        );
    b.clone()
        .table("tree", tree)
        .table("link", link)
        .build()
        .unwrap()
}

#[test]
fn second_run_is_a_no_op() {
    let mut db = open();
    let target = genealogy(&db, false);

    let report = migrate(&mut db, &target, FailurePolicy::AbortOnFirstError).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.transaction, TransactionOutcome::Committed);

    let again = plan(&mut db, &target);
    assert!(again.is_empty(), "unexpected plan:\n{again}");

    let report = migrate(&mut db, &target, FailurePolicy::AbortOnFirstError).unwrap();
    assert!(report.outcomes.is_empty());
}

#[test]
fn foreign_keys_land_after_their_tables() {
    let mut db = open();
    let target = genealogy(&db, false);
    migrate(&mut db, &target, FailurePolicy::AbortOnFirstError).unwrap();

    let live = introspect(&mut db).unwrap();
    let link = live.table("wt_link").unwrap();
    assert_eq!(link.foreign_keys.len(), 1);
    assert_eq!(link.foreign_keys[0].name(), "wt_fk_link_l_file");
    assert_eq!(link.foreign_keys[0].foreign_table(), "wt_tree");

    db.execute(
        "INSERT INTO wt_tree (tree_id, tree_title) VALUES (1, 'Main')",
        &Bindings::None,
    )
    .unwrap();
    db.execute(
        "INSERT INTO wt_link (l_file, l_from, l_to) VALUES (1, 'I1', 'F1')",
        &Bindings::None,
    )
    .unwrap();
    let err = db
        .execute(
            "INSERT INTO wt_link (l_file, l_from, l_to) VALUES (2, 'I1', 'F1')",
            &Bindings::None,
        )
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"), "{err}");
}

#[test]
fn unprefixed_objects_are_left_alone() {
    let mut db = open();
    for sql in [
        "CREATE TABLE other_users (id INTEGER PRIMARY KEY, name TEXT)",
        "CREATE INDEX other_users_name ON other_users (name)",
        // `_` is a LIKE wildcard; this must not pass for a `wt_` table.
        "CREATE TABLE wtxusers (id INTEGER PRIMARY KEY)",
    ] {
        db.execute(sql, &Bindings::None).unwrap();
    }

    let target = genealogy(&db, false);
    migrate(&mut db, &target, FailurePolicy::AbortOnFirstError).unwrap();

    let live = introspect(&mut db).unwrap();
    let names: Vec<&str> = live.tables.keys().map(String::as_str).collect();
    assert_eq!(names, ["wt_individual", "wt_link", "wt_tree"]);

    let tables: Vec<String> = master(&mut db)
        .into_iter()
        .filter(|(ty, _, _)| ty == "table")
        .map(|(_, name, _)| name)
        .collect();
    assert!(tables.contains(&"other_users".to_string()));
    assert!(tables.contains(&"wtxusers".to_string()));
}

#[test]
fn changes_round_trip_and_keep_data() {
    let mut db = open();
    let initial = genealogy(&db, false);
    migrate(&mut db, &initial, FailurePolicy::AbortOnFirstError).unwrap();
    db.execute(
        "INSERT INTO wt_tree (tree_id, tree_title) VALUES (1, 'Main')",
        &Bindings::None,
    )
    .unwrap();
    db.execute(
        "INSERT INTO wt_link (l_file, l_from, l_to) VALUES (1, 'I1', 'F1')",
        &Bindings::None,
    )
    .unwrap();
    db.execute(
        "INSERT INTO wt_individual (i_id, i_file, i_gedcom) VALUES ('I1', 1, '0 @I1@ INDI')",
        &Bindings::None,
    )
    .unwrap();

    let target = genealogy(&db, true);
    let step = plan(&mut db, &target);
    let sql: Vec<&str> = step.statements().iter().map(|s| s.sql.as_str()).collect();
    assert!(
        sql.contains(&r#"ALTER TABLE "wt_individual" ADD COLUMN "i_changed" TIMESTAMP NULL"#),
        "{step}"
    );
    assert!(sql.iter().any(|s| s.starts_with(r#"CREATE TABLE "wt_link__rebuild""#)));

    let report = Migrator::new(&mut db).run(&step);
    assert!(report.is_success(), "{report:?}");

    let live = introspect(&mut db).unwrap();
    let changed = live.table("wt_individual").unwrap().column("i_changed").unwrap();
    assert!(changed.nullable);
    assert_same_tables(&db, &live, &target);
    assert!(plan(&mut db, &target).is_empty());

    let rows = db
        .query("SELECT l_type, l_when IS NOT NULL AS stamped FROM wt_link", &Bindings::None)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("l_type"), Some("FAMS"));
    assert_eq!(rows[0].get_bool("stamped"), Some(true));

    // The cascade now reaches the link.
    db.execute("DELETE FROM wt_tree WHERE tree_id = 1", &Bindings::None)
        .unwrap();
    let rows = db.query("SELECT COUNT(*) AS n FROM wt_link", &Bindings::None).unwrap();
    assert_eq!(rows[0].get_i64("n"), Some(0));
}

#[test]
fn failed_migration_leaves_no_trace() {
    let mut db = open();
    let b = SchemaBuilder::new(db.driver(), db.prefix());
    let mut builder = b.clone();
    for name in ["a", "b", "c", "d", "e"] {
        let key = format!("{name}_id");
        builder = builder.table(
            name,
            TableDef::new()
                .column(b.integer(&key))
                .primary_key(b.primary_key(&[key.as_str()])),
        );
    }
    let target = builder.build().unwrap();

    // An index already owns the name of the third table. It hangs off an
    // unmanaged table, so introspection does not see it.
    db.execute("CREATE TABLE other (x INTEGER)", &Bindings::None)
        .unwrap();
    db.execute("CREATE INDEX wt_c ON other (x)", &Bindings::None)
        .unwrap();
    let before = master(&mut db);

    let step = plan(&mut db, &target);
    assert_eq!(step.len(), 5);

    let report = Migrator::new(&mut db).run(&step);
    assert_eq!(report.transaction, TransactionOutcome::RolledBack);
    let outcomes: Vec<&Outcome> = report.outcomes.iter().map(|o| &o.outcome).collect();
    assert_eq!(outcomes[0], &Outcome::Applied);
    assert_eq!(outcomes[1], &Outcome::Applied);
    assert!(matches!(outcomes[2], Outcome::Failed { message } if message.contains("wt_c")));
    assert_eq!(outcomes[3], &Outcome::Skipped);
    assert_eq!(outcomes[4], &Outcome::Skipped);

    assert_eq!(master(&mut db), before);
}

#[test]
fn rebuilding_a_parent_keeps_its_children() {
    let mut db = open();
    let initial = cascading(&db, 32);
    migrate(&mut db, &initial, FailurePolicy::AbortOnFirstError).unwrap();
    db.execute(
        "INSERT INTO wt_tree (tree_id, tree_name) VALUES (1, 'Main')",
        &Bindings::None,
    )
    .unwrap();
    db.execute(
        "INSERT INTO wt_link (l_file, l_from) VALUES (1, 'I1')",
        &Bindings::None,
    )
    .unwrap();

    let target = cascading(&db, 64);
    let step = plan(&mut db, &target);
    assert!(
        step.statements()
            .iter()
            .any(|s| s.sql.starts_with(r#"DROP TABLE "wt_tree""#)),
        "{step}"
    );

    let report = Migrator::new(&mut db).run(&step);
    assert!(report.is_success(), "{report:?}");

    let rows = db.query("SELECT COUNT(*) AS n FROM wt_link", &Bindings::None).unwrap();
    assert_eq!(rows[0].get_i64("n"), Some(1));
    assert!(foreign_keys_enabled(&mut db));
    let live = introspect(&mut db).unwrap();
    assert_same_tables(&db, &live, &target);
}

#[test]
fn dangling_references_abort_the_rebuild() {
    let mut db = open();
    let initial = cascading(&db, 32);
    migrate(&mut db, &initial, FailurePolicy::AbortOnFirstError).unwrap();
    db.execute("PRAGMA foreign_keys = OFF", &Bindings::None).unwrap();
    db.execute(
        "INSERT INTO wt_link (l_file, l_from) VALUES (7, 'I1')",
        &Bindings::None,
    )
    .unwrap();
    db.execute("PRAGMA foreign_keys = ON", &Bindings::None).unwrap();
    let before = master(&mut db);

    let target = cascading(&db, 64);
    let step = plan(&mut db, &target);
    let report = Migrator::new(&mut db).run(&step);

    assert!(!report.is_success());
    assert!(report.failures().next().is_none());
    assert!(matches!(
        &report.transaction,
        TransactionOutcome::ControlFailed { sql, message }
            if sql == "PRAGMA foreign_key_check" && message.contains("wt_link")
    ));
    assert!(report.cleanup.is_empty());
    assert_eq!(master(&mut db), before);
    assert!(foreign_keys_enabled(&mut db));
}
