//! Transactional row store over two SQL back-ends.
//!
//! Both engines are driven through blocking clients, so every public entry
//! point hops onto the blocking thread pool before touching a connection.
//! Queries are written twice, once per dialect; [`EngineQuery`] picks the
//! right string at the call site and no SQL translation is ever attempted.
//! The semantic differences between the dialects (`ON CONFLICT … DO UPDATE`
//! vs `INSERT OR REPLACE`) are owned by each query author.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Result;
use bytes::BytesMut;
use log::debug;
use postgres::NoTls;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use thiserror::Error;

pub mod consolidations;
pub mod deposits;
pub mod epochs;
pub mod forks;
pub mod orphaned_blocks;
pub mod rows;
pub mod schema;
pub mod slashings;
pub mod slots;
pub mod state;
pub mod unfinalized_blocks;
pub mod voluntary_exits;

#[derive(Debug, Error)]
pub enum Error {
    #[error("value does not fit the requested column type (column {column})")]
    ColumnOutOfRange { column: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbEngine {
    Pgsql,
    Sqlite,
}

/// A query written in both supported dialects.
#[derive(Clone, Copy)]
pub struct EngineQuery {
    pub pgsql: &'static str,
    pub sqlite: &'static str,
}

impl DbEngine {
    #[must_use]
    pub const fn select(self, query: EngineQuery) -> &'static str {
        match self {
            Self::Pgsql => query.pgsql,
            Self::Sqlite => query.sqlite,
        }
    }

    /// Positional placeholder in this engine's syntax, 1-based.
    #[must_use]
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Pgsql => format!("${index}"),
            Self::Sqlite => format!("?{index}"),
        }
    }
}

/// A single bind parameter, convertible to both engines' native types.
#[derive(Clone, Debug)]
pub enum DbValue {
    Null,
    Bool(bool),
    I64(i64),
    Bytes(Vec<u8>),
    Text(String),
}

impl From<bool> for DbValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<u64> for DbValue {
    fn from(value: u64) -> Self {
        Self::I64(value as i64)
    }
}

impl From<u8> for DbValue {
    fn from(value: u8) -> Self {
        Self::I64(value.into())
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for DbValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<String> for DbValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl<T: Into<Self>> From<Option<T>> for DbValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl rusqlite::ToSql for DbValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(value) => ToSqlOutput::Owned(Value::Integer((*value).into())),
            Self::I64(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Bytes(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

impl postgres::types::ToSql for DbValue {
    fn to_sql(
        &self,
        ty: &postgres::types::Type,
        out: &mut BytesMut,
    ) -> Result<postgres::types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Self::Null => Ok(postgres::types::IsNull::Yes),
            Self::Bool(value) => value.to_sql(ty, out),
            Self::I64(value) => value.to_sql(ty, out),
            Self::Bytes(value) => value.to_sql(ty, out),
            Self::Text(value) => value.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &postgres::types::Type) -> bool {
        // Acceptance is checked per variant when binding.
        true
    }

    fn to_sql_checked(
        &self,
        ty: &postgres::types::Type,
        out: &mut BytesMut,
    ) -> Result<postgres::types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        self.to_sql(ty, out)
    }
}

fn pgsql_params(values: &[DbValue]) -> Vec<&(dyn postgres::types::ToSql + Sync)> {
    values
        .iter()
        .map(|value| value as &(dyn postgres::types::ToSql + Sync))
        .collect()
}

/// One row of a query result, independent of the engine that produced it.
pub enum StoreRow<'r> {
    Pgsql(&'r postgres::Row),
    Sqlite(&'r rusqlite::Row<'r>),
}

impl StoreRow<'_> {
    pub fn get_i64(&self, column: usize) -> Result<i64> {
        match self {
            Self::Pgsql(row) => Ok(row.try_get::<_, i64>(column)?),
            Self::Sqlite(row) => Ok(row.get::<_, i64>(column)?),
        }
    }

    pub fn get_u64(&self, column: usize) -> Result<u64> {
        Ok(self.get_i64(column)? as u64)
    }

    pub fn get_u8(&self, column: usize) -> Result<u8> {
        u8::try_from(self.get_i64(column)?).map_err(|_| Error::ColumnOutOfRange { column }.into())
    }

    pub fn get_bool(&self, column: usize) -> Result<bool> {
        match self {
            Self::Pgsql(row) => Ok(row.try_get::<_, bool>(column)?),
            Self::Sqlite(row) => Ok(row.get::<_, bool>(column)?),
        }
    }

    pub fn get_bytes(&self, column: usize) -> Result<Vec<u8>> {
        match self {
            Self::Pgsql(row) => Ok(row.try_get::<_, Vec<u8>>(column)?),
            Self::Sqlite(row) => Ok(row.get::<_, Vec<u8>>(column)?),
        }
    }

    pub fn get_opt_bytes(&self, column: usize) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Pgsql(row) => Ok(row.try_get::<_, Option<Vec<u8>>>(column)?),
            Self::Sqlite(row) => Ok(row.get::<_, Option<Vec<u8>>>(column)?),
        }
    }

    pub fn get_opt_i64(&self, column: usize) -> Result<Option<i64>> {
        match self {
            Self::Pgsql(row) => Ok(row.try_get::<_, Option<i64>>(column)?),
            Self::Sqlite(row) => Ok(row.get::<_, Option<i64>>(column)?),
        }
    }

    pub fn get_opt_u64(&self, column: usize) -> Result<Option<u64>> {
        Ok(self.get_opt_i64(column)?.map(|value| value as u64))
    }

    pub fn get_opt_u8(&self, column: usize) -> Result<Option<u8>> {
        self.get_opt_i64(column)?
            .map(|value| {
                u8::try_from(value).map_err(|_| Error::ColumnOutOfRange { column }.into())
            })
            .transpose()
    }

    pub fn get_text(&self, column: usize) -> Result<String> {
        match self {
            Self::Pgsql(row) => Ok(row.try_get::<_, String>(column)?),
            Self::Sqlite(row) => Ok(row.get::<_, String>(column)?),
        }
    }
}

/// An open write transaction. Dropping it without [`commit`] rolls back.
///
/// [`commit`]: StoreTransaction::commit
pub enum StoreTransaction<'t> {
    Pgsql(postgres::Transaction<'t>),
    Sqlite(rusqlite::Transaction<'t>),
}

impl StoreTransaction<'_> {
    #[must_use]
    pub const fn engine(&self) -> DbEngine {
        match self {
            Self::Pgsql(_) => DbEngine::Pgsql,
            Self::Sqlite(_) => DbEngine::Sqlite,
        }
    }

    pub fn execute(&mut self, query: EngineQuery, params: &[DbValue]) -> Result<u64> {
        let sql = self.engine().select(query);
        self.execute_sql(sql, params)
    }

    /// Runs SQL the caller has already rendered for [`Self::engine`].
    /// Needed for statements with a dynamic number of placeholders.
    pub fn execute_sql(&mut self, sql: &str, params: &[DbValue]) -> Result<u64> {
        match self {
            Self::Pgsql(transaction) => {
                let params = pgsql_params(params);
                Ok(transaction.execute(sql, &params)?)
            }
            Self::Sqlite(transaction) => {
                let changed = transaction.execute(sql, rusqlite::params_from_iter(params.iter()))?;
                Ok(changed as u64)
            }
        }
    }

    fn commit(self) -> Result<()> {
        match self {
            Self::Pgsql(transaction) => transaction.commit()?,
            Self::Sqlite(transaction) => transaction.commit()?,
        }

        Ok(())
    }
}

enum Backend {
    Pgsql {
        reader: Mutex<postgres::Client>,
        writer: Mutex<postgres::Client>,
    },
    Sqlite {
        connection: Mutex<rusqlite::Connection>,
    },
}

struct StoreInner {
    engine: DbEngine,
    backend: Backend,
}

#[derive(Clone, Debug)]
pub enum StoreConfig {
    Pgsql { url: String },
    Sqlite { path: Option<PathBuf> },
}

/// Handle to the row store. Cheap to clone; all clones share connections.
#[derive(Clone)]
pub struct Store(Arc<StoreInner>);

impl Store {
    /// Opens connections. Blocking; call from a blocking context.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let inner = match config {
            StoreConfig::Pgsql { url } => {
                let reader = postgres::Client::connect(url, NoTls)?;
                let writer = postgres::Client::connect(url, NoTls)?;

                debug!("connected to pgsql store");

                StoreInner {
                    engine: DbEngine::Pgsql,
                    backend: Backend::Pgsql {
                        reader: Mutex::new(reader),
                        writer: Mutex::new(writer),
                    },
                }
            }
            StoreConfig::Sqlite { path } => {
                let connection = match path {
                    Some(path) => open_sqlite(path)?,
                    None => rusqlite::Connection::open_in_memory()?,
                };

                StoreInner {
                    engine: DbEngine::Sqlite,
                    backend: Backend::Sqlite {
                        connection: Mutex::new(connection),
                    },
                }
            }
        };

        Ok(Self(Arc::new(inner)))
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(&StoreConfig::Sqlite { path: None })
    }

    #[must_use]
    pub fn engine(&self) -> DbEngine {
        self.0.engine
    }

    /// Runs `operations` inside a single write transaction on the blocking
    /// pool. Any error rolls the whole transaction back.
    pub async fn run_transaction<T, F>(&self, operations: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreTransaction) -> Result<T> + Send + 'static,
    {
        let inner = self.0.clone();

        tokio::task::spawn_blocking(move || match &inner.backend {
            Backend::Pgsql { writer, .. } => {
                let mut client = writer.lock().expect("store writer mutex is poisoned");
                let mut transaction = StoreTransaction::Pgsql(client.transaction()?);
                let value = operations(&mut transaction)?;
                transaction.commit()?;
                Ok(value)
            }
            Backend::Sqlite { connection } => {
                let mut connection = connection
                    .lock()
                    .expect("store connection mutex is poisoned");
                let mut transaction = StoreTransaction::Sqlite(connection.transaction()?);
                let value = operations(&mut transaction)?;
                transaction.commit()?;
                Ok(value)
            }
        })
        .await?
    }

    pub async fn select<T, F>(
        &self,
        query: EngineQuery,
        params: Vec<DbValue>,
        mut map_row: F,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: FnMut(StoreRow) -> Result<T> + Send + 'static,
    {
        let inner = self.0.clone();

        tokio::task::spawn_blocking(move || {
            let sql = inner.engine.select(query);

            match &inner.backend {
                Backend::Pgsql { reader, .. } => {
                    let mut client = reader.lock().expect("store reader mutex is poisoned");
                    let rows = client.query(sql, &pgsql_params(&params))?;

                    rows.iter().map(|row| map_row(StoreRow::Pgsql(row))).collect()
                }
                Backend::Sqlite { connection } => {
                    let connection = connection
                        .lock()
                        .expect("store connection mutex is poisoned");
                    let mut statement = connection.prepare(sql)?;
                    let mut rows = statement.query(rusqlite::params_from_iter(params.iter()))?;
                    let mut values = vec![];

                    while let Some(row) = rows.next()? {
                        values.push(map_row(StoreRow::Sqlite(row))?);
                    }

                    Ok(values)
                }
            }
        })
        .await?
    }

    pub async fn select_optional<T, F>(
        &self,
        query: EngineQuery,
        params: Vec<DbValue>,
        map_row: F,
    ) -> Result<Option<T>>
    where
        T: Send + 'static,
        F: FnMut(StoreRow) -> Result<T> + Send + 'static,
    {
        Ok(self.select(query, params, map_row).await?.into_iter().next())
    }
}

fn open_sqlite(path: &Path) -> Result<rusqlite::Connection> {
    if let Some(directory) = path.parent() {
        if !directory.as_os_str().is_empty() {
            std::fs::create_dir_all(directory)?;
        }
    }

    let connection = rusqlite::Connection::open(path)?;

    // Foreign key constraints are not enforced by default.
    // See <https://sqlite.org/pragma.html#pragma_foreign_keys>.
    connection.pragma_update(None, "foreign_keys", true)?;
    connection.pragma_update(None, "journal_mode", "WAL")?;

    Ok(connection)
}

/// Renders `row_count` tuples of `field_count` placeholders for a multi-row
/// `VALUES` clause, numbered sequentially across rows.
pub(crate) fn values_tuples(engine: DbEngine, row_count: usize, field_count: usize) -> String {
    let mut sql = String::new();

    for row in 0..row_count {
        if row > 0 {
            sql.push_str(", ");
        }

        sql.push('(');

        for field in 0..field_count {
            if field > 0 {
                sql.push_str(", ");
            }

            sql.push_str(&engine.placeholder(row * field_count + field + 1));
        }

        sql.push(')');
    }

    sql
}
