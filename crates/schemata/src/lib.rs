//! Declarative schema definitions and migrations for MySQL, MariaDB,
//! PostgreSQL, SQLite and SQL Server.
//!
//! Describe the tables an application needs once with [`SchemaBuilder`],
//! then let the engine bring any supported database in line with it:
//!
//! ```ignore
//! let mut db = Database::connect("sqlite", rusqlite::Connection::open("wt.db")?, "wt_")?;
//!
//! let b = SchemaBuilder::new(db.driver(), db.prefix());
//! let schema = b
//!     .clone()
//!     .table(
//!         "user",
//!         TableDef::new()
//!             .column(b.integer("user_id"))
//!             .column(b.varchar("user_name", 32))
//!             .primary_key(b.primary_key(&["user_id"]))
//!             .unique_index(b.unique_index(&["user_name"])),
//!     )
//!     .build()?;
//!
//! let report = migrate(&mut db, &schema, FailurePolicy::AbortOnFirstError)?;
//! assert!(report.is_success());
//! ```
//!
//! # Naming
//!
//! Everything the engine manages starts with one prefix (`wt_` by default).
//! Tables are `{prefix}{name}`; indexes, unique indexes and foreign keys are
//! `{prefix}ix_…`, `{prefix}ux_…` and `{prefix}fk_…` followed by the
//! unprefixed table name and the column names. Introspection ignores
//! anything without the prefix, so other applications can share the
//! database.
//!
//! # Migration order
//!
//! A plan runs in three phases: foreign keys are dropped first, then tables,
//! columns and indexes change, and foreign keys are added last. No statement
//! ever sees a reference to something that does not exist yet.

pub mod config;
pub mod connection;
pub mod diff;
pub mod driver;
mod error;
pub mod introspect;
pub mod migrate;
pub mod order;
pub mod query;
pub mod schema;
mod value;

pub use config::MigrateConfig;
pub use connection::{Connection, ConnectionError, Row};
pub use diff::{Operation, SchemaDiff, diff};
pub use driver::{BackendKind, Database, Driver, ServerVersion, Session};
pub use error::{Error, SchemaError};
pub use introspect::introspect;
pub use migrate::{
    ControlFailure, FailurePolicy, MigrationPlan, MigrationReport, Migrator, Outcome, StatementOutcome,
    TransactionOutcome, migrate,
};
pub use order::{Phase, order};
pub use schema::{
    Column, ColumnType, ForeignKey, Index, OnDelete, OnUpdate, PrimaryKey, Schema, SchemaBuilder,
    Table, TableDef,
};
pub use value::{BindType, Bindings, Value};

pub type Result<T, E = Error> = std::result::Result<T, E>;
