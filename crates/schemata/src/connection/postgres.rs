//! [`Connection`] for Postgres, over `tokio-postgres`.
//!
//! The engine is synchronous, so the client is driven by a private
//! current-thread runtime. The connection task is spawned onto that runtime
//! and makes progress whenever a statement is being awaited.

use std::error::Error as StdError;

use bytes::BytesMut;
use tokio::runtime::Runtime;
use tokio_postgres::types::{IsNull, ToSql, Type as PgTypeInfo, to_sql_checked};

use super::{Connection, ConnectionError, Row};
use crate::Value;

pub struct PgConnection {
    runtime: Runtime,
    client: tokio_postgres::Client,
}

impl PgConnection {
    /// Connect with a libpq-style connection string or `postgres://` URL.
    pub fn connect(url: &str) -> Result<Self, ConnectionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(url, tokio_postgres::NoTls))
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("postgres connection error: {e}");
            }
        });

        Ok(Self { runtime, client })
    }

    fn bound<'a>(params: &'a [PgParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
        params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }
}

impl Connection for PgConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ConnectionError> {
        let stmt = self
            .runtime
            .block_on(self.client.prepare(sql))
            .map_err(|e| ConnectionError::Prepare(describe(&e)))?;

        let params: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let rows = self
            .runtime
            .block_on(self.client.query(&stmt, &Self::bound(&params)))
            .map_err(|e| ConnectionError::Execute(describe(&e)))?;

        rows.iter().map(read_row).collect()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError> {
        if params.is_empty() {
            // The simple protocol takes DDL and transaction control verbatim.
            return self
                .runtime
                .block_on(self.client.batch_execute(sql))
                .map(|()| 0)
                .map_err(|e| ConnectionError::Execute(describe(&e)));
        }

        let stmt = self
            .runtime
            .block_on(self.client.prepare(sql))
            .map_err(|e| ConnectionError::Prepare(describe(&e)))?;

        let params: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        self.runtime
            .block_on(self.client.execute(&stmt, &Self::bound(&params)))
            .map_err(|e| ConnectionError::Execute(describe(&e)))
    }

    fn server_version(&mut self) -> Result<String, ConnectionError> {
        let row = self
            .runtime
            .block_on(self.client.query_one("SHOW server_version", &[]))
            .map_err(|e| ConnectionError::Execute(describe(&e)))?;
        row.try_get::<_, String>(0)
            .map_err(|e| ConnectionError::Execute(e.to_string()))
    }
}

/// Server errors carry the useful text in their source.
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{}: {}", db.code().code(), db.message()),
        None => match e.source() {
            Some(source) => format!("{e}: {source}"),
            None => e.to_string(),
        },
    }
}

fn read_row(row: &tokio_postgres::Row) -> Result<Row, ConnectionError> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = read_value(row, idx, column.type_())
            .map_err(|e| ConnectionError::Execute(format!("column {}: {e}", column.name())))?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn read_value(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &PgTypeInfo,
) -> Result<Value, tokio_postgres::Error> {
    let value = match *ty {
        PgTypeInfo::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        PgTypeInfo::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        PgTypeInfo::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        PgTypeInfo::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        PgTypeInfo::OID => row.try_get::<_, Option<u32>>(idx)?.map(Value::from),
        PgTypeInfo::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(Value::from),
        PgTypeInfo::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        // The single-byte "char" type used by the catalogs.
        PgTypeInfo::CHAR => row
            .try_get::<_, Option<i8>>(idx)?
            .map(|c| Value::Text(char::from(c as u8).to_string())),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Wrapper to make our Value usable as a ToSql parameter.
///
/// Postgres infers a type for every placeholder; the value is converted to
/// whatever was inferred rather than insisting on an exact match.
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(
        &self,
        ty: &PgTypeInfo,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => match *ty {
                PgTypeInfo::BOOL => v.to_sql(ty, out),
                _ => integer_to_sql(i64::from(*v), ty, out),
            },
            Value::Int(v) => integer_to_sql(*v, ty, out),
            Value::Float(v) => match *ty {
                PgTypeInfo::FLOAT8 => v.to_sql(ty, out),
                PgTypeInfo::FLOAT4 => (*v as f32).to_sql(ty, out),
                _ => v.to_string().as_str().to_sql(ty, out),
            },
            Value::Text(v) => match *ty {
                PgTypeInfo::BOOL => Value::Text(v.clone())
                    .as_bool()
                    .ok_or_else(|| format!("{v:?} is not a boolean"))?
                    .to_sql(ty, out),
                PgTypeInfo::INT2 | PgTypeInfo::INT4 | PgTypeInfo::INT8 => {
                    integer_to_sql(v.trim().parse()?, ty, out)
                }
                PgTypeInfo::FLOAT4 | PgTypeInfo::FLOAT8 => {
                    let parsed: f64 = v.trim().parse()?;
                    PgParam(&Value::Float(parsed)).to_sql(ty, out)
                }
                _ => v.as_str().to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &PgTypeInfo) -> bool {
        true
    }

    to_sql_checked!();
}

fn integer_to_sql(
    v: i64,
    ty: &PgTypeInfo,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
    match *ty {
        PgTypeInfo::INT2 => i16::try_from(v)?.to_sql(ty, out),
        PgTypeInfo::INT4 => i32::try_from(v)?.to_sql(ty, out),
        PgTypeInfo::INT8 => v.to_sql(ty, out),
        PgTypeInfo::BOOL => (v != 0).to_sql(ty, out),
        PgTypeInfo::FLOAT8 => (v as f64).to_sql(ty, out),
        PgTypeInfo::FLOAT4 => (v as f32).to_sql(ty, out),
        _ => v.to_string().as_str().to_sql(ty, out),
    }
}
