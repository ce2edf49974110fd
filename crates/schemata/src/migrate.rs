//! Migration planning and execution.
//!
//! A [`MigrationPlan`] is computed from a target and a live schema without
//! touching the database. A [`Migrator`] then runs it:
//!
//! - On backends with transactional DDL the whole plan runs in one
//!   transaction. The first failure rolls everything back and the
//!   remaining statements are reported as skipped.
//!   Where enforcement would fire referential actions during a rebuild
//!   (SQLite), foreign-key checks are suspended around the transaction and
//!   every reference is verified before committing.
//! - On the MySQL family DDL commits as it goes. Foreign-key checks are
//!   switched off for the run and switched back on afterwards, even after
//!   a failure. What happens after a failed statement is decided by the
//!   [`FailurePolicy`]; either way the statements that did run stay
//!   applied.
//!
//! Every planned statement shows up exactly once in the [`MigrationReport`].
//! Control statements that fail after the outcome is settled, such as a
//! rollback or restoring foreign-key checks, are listed in its `cleanup`.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::diff::{Operation, diff};
use crate::driver::{Database, Driver, Session};
use crate::introspect::introspect;
use crate::order::{Phase, order};
use crate::schema::Schema;
use crate::{Error, Result};

/// One DDL statement of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub phase: Phase,
}

/// The ordered DDL that turns a live schema into a target schema.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    operations: Vec<Operation>,
    statements: Vec<Statement>,
}

impl MigrationPlan {
    /// Diff, lower for the backend, order, and render.
    ///
    /// Both schemas are first reduced to what the backend can represent, so
    /// that declared details the backend drops do not show up as changes.
    ///
    /// Fails if an operation is left that the backend cannot express.
    pub fn new(driver: &dyn Driver, target: &Schema, live: &Schema) -> Result<Self> {
        let target = canonicalize(driver, target);
        let live = canonicalize(driver, live);

        let operations = diff(&target, &live).into_operations();
        let operations = order(driver.lower(operations, &live, &target));

        let mut statements = Vec::new();
        for op in &operations {
            let phase = op.phase();
            for sql in driver.render(op)? {
                statements.push(Statement { sql, phase });
            }
        }

        Ok(Self {
            operations,
            statements,
        })
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Returns true if the live schema already matches.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            writeln!(f, "{};", statement.sql)?;
        }
        Ok(())
    }
}

fn canonicalize(driver: &dyn Driver, schema: &Schema) -> Schema {
    let mut schema = schema.clone();
    for table in schema.tables.values_mut() {
        for column in &mut table.columns {
            *column = driver.canonical_column(column);
        }
    }
    schema
}

/// What to do after a statement fails on a backend without transactional
/// DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop and report the rest as skipped.
    #[default]
    AbortOnFirstError,
    /// Run every remaining statement anyway.
    Continue,
}

/// Result of one planned statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Failed { message: String },
    /// Not attempted because of an earlier failure.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementOutcome {
    pub sql: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// How the run as a whole ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
    /// The backend cannot roll DDL back; whatever ran is applied.
    NotTransactional,
    /// A transaction or session control statement failed.
    ControlFailed { sql: String, message: String },
}

/// A control statement that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFailure {
    pub sql: String,
    pub message: String,
}

impl From<ControlFailure> for TransactionOutcome {
    fn from(failure: ControlFailure) -> Self {
        TransactionOutcome::ControlFailed {
            sql: failure.sql,
            message: failure.message,
        }
    }
}

/// Per-statement outcomes of a migration run, in plan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub outcomes: Vec<StatementOutcome>,
    pub transaction: TransactionOutcome,
    /// Rollbacks and session restores that failed after `transaction` was
    /// decided. The session may be left in an unexpected state.
    pub cleanup: Vec<ControlFailure>,
}

impl MigrationReport {
    /// True if every statement applied and the run ended cleanly.
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.outcome == Outcome::Applied)
            && self.cleanup.is_empty()
            && matches!(
                self.transaction,
                TransactionOutcome::Committed | TransactionOutcome::NotTransactional
            )
    }

    pub fn failures(&self) -> impl Iterator<Item = &StatementOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed { .. }))
    }

    fn count(&self, wanted: fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| wanted(&o.outcome)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| *o == Outcome::Applied)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| *o == Outcome::Skipped)
    }
}

/// The message of a statement error without the SQL it already carries.
fn failure_message(e: &Error) -> String {
    match e {
        Error::StatementPrepare { message, .. } | Error::StatementExecute { message, .. } => {
            message.clone()
        }
        other => other.to_string(),
    }
}

fn skipped(statement: &Statement) -> StatementOutcome {
    StatementOutcome {
        sql: statement.sql.clone(),
        outcome: Outcome::Skipped,
        elapsed: Duration::ZERO,
    }
}

fn control(session: &mut Session<'_>, sql: &str) -> std::result::Result<(), ControlFailure> {
    session
        .execute_values(sql, &[])
        .map(|_| ())
        .map_err(|e| ControlFailure {
            sql: sql.to_string(),
            message: failure_message(&e),
        })
}

/// Run a control statement whose failure no longer changes the outcome.
fn cleanup_step(session: &mut Session<'_>, sql: &str, cleanup: &mut Vec<ControlFailure>) {
    if let Err(failure) = control(session, sql) {
        warn!(sql = %failure.sql, error = %failure.message, "cleanup statement failed");
        cleanup.push(failure);
    }
}

/// Switch foreign-key enforcement off if the backend wants it off and it is
/// currently on. Returns whether it has to be switched back on.
fn suspend_foreign_keys(session: &mut Session<'_>) -> std::result::Result<bool, ControlFailure> {
    let driver = session.driver();
    let Some(disable) = driver.foreign_key_checks(false) else {
        return Ok(false);
    };
    if let Some(query) = driver.foreign_key_checks_enabled() {
        let rows = session.query_values(query, &[]).map_err(|e| ControlFailure {
            sql: query.to_string(),
            message: failure_message(&e),
        })?;
        let enabled = rows
            .first()
            .and_then(|row| row.iter().next())
            .and_then(|(_, value)| value.as_bool())
            .unwrap_or(true);
        if !enabled {
            return Ok(false);
        }
    }
    control(session, &disable)?;
    Ok(true)
}

/// Fails if any foreign key points at a missing row.
fn check_foreign_keys(session: &mut Session<'_>) -> std::result::Result<(), ControlFailure> {
    let Some(sql) = session.driver().foreign_key_violations() else {
        return Ok(());
    };
    let rows = session.query_values(sql, &[]).map_err(|e| ControlFailure {
        sql: sql.to_string(),
        message: failure_message(&e),
    })?;
    match rows.first() {
        None => Ok(()),
        Some(row) => Err(ControlFailure {
            sql: sql.to_string(),
            message: format!(
                "{} row(s) violate foreign keys, first in {}",
                rows.len(),
                row.get_text("table").unwrap_or_else(|| "?".to_string())
            ),
        }),
    }
}

/// Runs a [`MigrationPlan`] against a database.
pub struct Migrator<'db> {
    db: &'db mut Database,
    policy: FailurePolicy,
}

impl<'db> Migrator<'db> {
    pub fn new(db: &'db mut Database) -> Self {
        Self {
            db,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn run(&mut self, plan: &MigrationPlan) -> MigrationReport {
        let policy = self.policy;
        let mut session = self.db.session();
        let driver = session.driver();
        let transactional = driver.supports_transactional_ddl();

        info!(
            backend = %driver.kind(),
            statements = plan.len(),
            transactional,
            "running migration"
        );

        let report = if transactional {
            run_transactional(&mut session, plan)
        } else {
            run_sequential(&mut session, plan, policy)
        };

        info!(
            applied = report.applied(),
            failed = report.failures().count(),
            skipped = report.skipped(),
            transaction = ?report.transaction,
            "migration finished"
        );
        report
    }
}

/// Run `statement`, stopping at nothing; the caller decides what a failure
/// means.
fn apply(session: &mut Session<'_>, statement: &Statement) -> StatementOutcome {
    let start = Instant::now();
    let outcome = match session.execute_values(&statement.sql, &[]) {
        Ok(_) => Outcome::Applied,
        Err(e) => {
            let message = failure_message(&e);
            warn!(sql = %statement.sql, error = %message, "migration statement failed");
            Outcome::Failed { message }
        }
    };
    StatementOutcome {
        sql: statement.sql.clone(),
        outcome,
        elapsed: start.elapsed(),
    }
}

fn run_transactional(session: &mut Session<'_>, plan: &MigrationPlan) -> MigrationReport {
    let driver = session.driver();
    let mut cleanup = Vec::new();

    let suspended = match suspend_foreign_keys(session) {
        Ok(suspended) => suspended,
        Err(failure) => {
            return MigrationReport {
                outcomes: plan.statements().iter().map(skipped).collect(),
                transaction: failure.into(),
                cleanup,
            };
        }
    };

    let (outcomes, transaction) = transact(session, plan, suspended, &mut cleanup);

    if suspended {
        if let Some(sql) = driver.foreign_key_checks(true) {
            cleanup_step(session, &sql, &mut cleanup);
        }
    }

    MigrationReport {
        outcomes,
        transaction,
        cleanup,
    }
}

fn transact(
    session: &mut Session<'_>,
    plan: &MigrationPlan,
    verify_foreign_keys: bool,
    cleanup: &mut Vec<ControlFailure>,
) -> (Vec<StatementOutcome>, TransactionOutcome) {
    let driver = session.driver();

    let mut began = false;
    for sql in driver.begin_transaction() {
        if let Err(failure) = control(session, &sql) {
            if began {
                cleanup_step(session, driver.rollback(), cleanup);
            }
            let outcomes = plan.statements().iter().map(skipped).collect();
            return (outcomes, failure.into());
        }
        began = true;
    }

    let mut failed = false;
    let mut outcomes = Vec::with_capacity(plan.len());
    for statement in plan.statements() {
        if failed {
            outcomes.push(skipped(statement));
            continue;
        }
        let outcome = apply(session, statement);
        failed = outcome.outcome != Outcome::Applied;
        outcomes.push(outcome);
    }

    if failed {
        let transaction = match control(session, driver.rollback()) {
            Ok(()) => TransactionOutcome::RolledBack,
            Err(failure) => failure.into(),
        };
        return (outcomes, transaction);
    }

    let finished = if verify_foreign_keys {
        check_foreign_keys(session)
    } else {
        Ok(())
    };
    let transaction = match finished.and_then(|()| control(session, driver.commit())) {
        Ok(()) => TransactionOutcome::Committed,
        Err(failure) => {
            warn!(sql = %failure.sql, error = %failure.message, "could not commit migration");
            cleanup_step(session, driver.rollback(), cleanup);
            failure.into()
        }
    };
    (outcomes, transaction)
}

fn run_sequential(
    session: &mut Session<'_>,
    plan: &MigrationPlan,
    policy: FailurePolicy,
) -> MigrationReport {
    let driver = session.driver();
    let mut cleanup = Vec::new();

    if let Some(sql) = driver.foreign_key_checks(false) {
        if let Err(failure) = control(session, &sql) {
            return MigrationReport {
                outcomes: plan.statements().iter().map(skipped).collect(),
                transaction: failure.into(),
                cleanup,
            };
        }
    }

    let mut stopped = false;
    let mut outcomes = Vec::with_capacity(plan.len());
    for statement in plan.statements() {
        if stopped {
            outcomes.push(skipped(statement));
            continue;
        }
        let outcome = apply(session, statement);
        if outcome.outcome != Outcome::Applied && policy == FailurePolicy::AbortOnFirstError {
            stopped = true;
        }
        outcomes.push(outcome);
    }

    if let Some(sql) = driver.foreign_key_checks(true) {
        cleanup_step(session, &sql, &mut cleanup);
    }

    MigrationReport {
        outcomes,
        transaction: TransactionOutcome::NotTransactional,
        cleanup,
    }
}

/// Introspect, plan and run in one go.
pub fn migrate(db: &mut Database, target: &Schema, policy: FailurePolicy) -> Result<MigrationReport> {
    let live = introspect(db)?;
    let plan = MigrationPlan::new(db.driver(), target, &live)?;
    if plan.is_empty() {
        info!(prefix = %db.prefix(), "schema is up to date");
    }
    Ok(Migrator::new(db).with_policy(policy).run(&plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionError, Row};
    use crate::driver::{MySqlDriver, PostgresDriver, ServerVersion, SqliteDriver};
    use crate::schema::{SchemaBuilder, TableDef};
    use crate::Value;
    use std::sync::{Arc, Mutex};

    /// Records every statement and fails the ones containing any of
    /// `fail_on`. Queries return no rows.
    #[derive(Clone, Default)]
    struct Scripted {
        log: Arc<Mutex<Vec<String>>>,
        fail_on: &'static [&'static str],
    }

    impl Connection for Scripted {
        fn query(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Vec<Row>, ConnectionError> {
            self.execute(sql, params).map(|_| Vec::new())
        }

        fn execute(&mut self, sql: &str, _params: &[Value]) -> std::result::Result<u64, ConnectionError> {
            self.log.lock().unwrap().push(sql.to_string());
            match self.fail_on.iter().find(|needle| sql.contains(**needle)) {
                Some(needle) => Err(ConnectionError::Execute(format!("boom: {needle}"))),
                None => Ok(0),
            }
        }

        fn server_version(&mut self) -> std::result::Result<String, ConnectionError> {
            Ok("8.0.36".to_string())
        }
    }

    fn target(driver: &dyn Driver) -> Schema {
        let b = SchemaBuilder::new(driver, "wt_");
        let table = |key: &str| {
            TableDef::new()
                .column(b.integer(key))
                .primary_key(b.primary_key(&[key]))
        };
        b.clone()
            .table("a", table("a_id"))
            .table("b", table("b_id"))
            .table("c", table("c_id"))
            .build()
            .unwrap()
    }

    #[test]
    fn plans_are_empty_for_matching_schemas() {
        let schema = target(&PostgresDriver);
        assert!(MigrationPlan::new(&PostgresDriver, &schema, &schema).unwrap().is_empty());
    }

    #[test]
    fn transactional_failure_skips_the_rest_and_rolls_back() {
        let conn = Scripted {
            fail_on: &["\"wt_b\""],
            ..Default::default()
        };
        let log = conn.log.clone();
        let mut db = Database::with_driver(Box::new(PostgresDriver), Box::new(conn), "wt_");

        let plan = MigrationPlan::new(&PostgresDriver, &target(&PostgresDriver), &Schema::new("wt_")).unwrap();
        assert_eq!(plan.len(), 3);

        let report = Migrator::new(&mut db).run(&plan);
        assert!(!report.is_success());
        assert_eq!(report.transaction, TransactionOutcome::RolledBack);
        assert_eq!(report.applied(), 1);
        assert!(matches!(
            report.outcomes[1].outcome,
            Outcome::Failed { ref message } if message == "boom: \"wt_b\""
        ));
        assert_eq!(report.outcomes[2].outcome, Outcome::Skipped);

        let log = log.lock().unwrap();
        assert_eq!(log.first().map(String::as_str), Some("START TRANSACTION"));
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn mysql_abort_keeps_what_ran_and_restores_checks() {
        let driver = MySqlDriver::new(ServerVersion::new(8, 0, 36), false);
        let conn = Scripted {
            fail_on: &["`wt_b`"],
            ..Default::default()
        };
        let log = conn.log.clone();
        let mut db = Database::with_driver(Box::new(driver.clone()), Box::new(conn), "wt_");

        let plan = MigrationPlan::new(&driver, &target(&driver), &Schema::new("wt_")).unwrap();
        let report = Migrator::new(&mut db).run(&plan);

        assert_eq!(report.transaction, TransactionOutcome::NotTransactional);
        assert_eq!(report.applied(), 1);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.skipped(), 1);

        let log = log.lock().unwrap();
        assert_eq!(log[0], "SET FOREIGN_KEY_CHECKS = 0");
        assert_eq!(log[log.len() - 1], "SET FOREIGN_KEY_CHECKS = 1");
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn mysql_continue_runs_everything() {
        let driver = MySqlDriver::new(ServerVersion::new(8, 0, 36), false);
        let conn = Scripted {
            fail_on: &["`wt_b`"],
            ..Default::default()
        };
        let mut db = Database::with_driver(Box::new(driver.clone()), Box::new(conn), "wt_");

        let plan = MigrationPlan::new(&driver, &target(&driver), &Schema::new("wt_")).unwrap();
        let report = Migrator::new(&mut db)
            .with_policy(FailurePolicy::Continue)
            .run(&plan);

        assert_eq!(report.applied(), 2);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.skipped(), 0);
    }

    #[test]
    fn failed_begin_skips_everything() {
        let conn = Scripted {
            fail_on: &["START TRANSACTION"],
            ..Default::default()
        };
        let mut db = Database::with_driver(Box::new(PostgresDriver), Box::new(conn), "wt_");
        let plan = MigrationPlan::new(&PostgresDriver, &target(&PostgresDriver), &Schema::new("wt_")).unwrap();

        let report = Migrator::new(&mut db).run(&plan);
        assert_eq!(report.skipped(), 3);
        assert!(matches!(
            report.transaction,
            TransactionOutcome::ControlFailed { ref sql, .. } if sql == "START TRANSACTION"
        ));
    }

    #[test]
    fn failed_rollback_after_failed_commit_is_reported() {
        let conn = Scripted {
            fail_on: &["COMMIT", "ROLLBACK"],
            ..Default::default()
        };
        let log = conn.log.clone();
        let mut db = Database::with_driver(Box::new(PostgresDriver), Box::new(conn), "wt_");
        let plan = MigrationPlan::new(&PostgresDriver, &target(&PostgresDriver), &Schema::new("wt_")).unwrap();

        let report = Migrator::new(&mut db).run(&plan);
        assert!(!report.is_success());
        assert_eq!(report.applied(), 3);
        assert_eq!(
            report.transaction,
            TransactionOutcome::ControlFailed {
                sql: "COMMIT".to_string(),
                message: "boom: COMMIT".to_string(),
            }
        );
        assert_eq!(
            report.cleanup,
            vec![ControlFailure {
                sql: "ROLLBACK".to_string(),
                message: "boom: ROLLBACK".to_string(),
            }]
        );
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn sqlite_suspends_foreign_keys_around_the_transaction() {
        let conn = Scripted::default();
        let log = conn.log.clone();
        let mut db = Database::with_driver(Box::new(SqliteDriver), Box::new(conn), "wt_");
        let plan = MigrationPlan::new(&SqliteDriver, &target(&SqliteDriver), &Schema::new("wt_")).unwrap();

        let report = Migrator::new(&mut db).run(&plan);
        assert!(report.is_success());
        assert_eq!(report.transaction, TransactionOutcome::Committed);

        let log = log.lock().unwrap();
        assert_eq!(
            log[..3],
            ["PRAGMA foreign_keys", "PRAGMA foreign_keys = OFF", "BEGIN"]
        );
        assert_eq!(
            log[log.len() - 3..],
            ["PRAGMA foreign_key_check", "COMMIT", "PRAGMA foreign_keys = ON"]
        );
    }

    #[test]
    fn sqlite_restores_foreign_keys_after_a_rollback() {
        let conn = Scripted {
            fail_on: &["\"wt_b\""],
            ..Default::default()
        };
        let log = conn.log.clone();
        let mut db = Database::with_driver(Box::new(SqliteDriver), Box::new(conn), "wt_");
        let plan = MigrationPlan::new(&SqliteDriver, &target(&SqliteDriver), &Schema::new("wt_")).unwrap();

        let report = Migrator::new(&mut db).run(&plan);
        assert_eq!(report.transaction, TransactionOutcome::RolledBack);
        assert!(report.cleanup.is_empty());

        let log = log.lock().unwrap();
        assert!(!log.iter().any(|sql| sql == "PRAGMA foreign_key_check"));
        assert_eq!(
            log[log.len() - 2..],
            ["ROLLBACK", "PRAGMA foreign_keys = ON"]
        );
    }
}
