//! Executes compiled queries over one backend connection.
//!
//! A [`Session`] owns a connection between `connect()` and `close()` and a
//! handle to the cache provider. It is not meant to be shared between tasks;
//! open one per worker instead.

pub mod cache;
pub mod growth;
pub mod result;

pub use cache::{CacheProvider, DummyProvider, MemoryProvider};
pub use result::{CacheInfo, CacheStatus, DataFrame, Dicts, Page, QueryResult, Records};

use crate::data_store::{Connector, DataStoreClient, DataStoreError, PostgresType, QueryOutput, Value};
use crate::query::{AnyQuery, DataQuery};
use crate::semantic_model::Schema;
use crate::sql_builder::{CompileError, CompiledQuery, QueryCompiler};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

const COLUMNS_SQL: &str = "SELECT column_name, udt_name FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Schema doesn't match the backend: {0}")]
    SchemaInconsistency(String),

    #[error("Session used before connect()")]
    UpstreamNotPrepared,

    #[error("Backend error: {0}")]
    UpstreamInternal(#[from] DataStoreError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

pub struct Session<C: Connector> {
    connector: C,
    cache: Arc<dyn CacheProvider>,
    compiler: QueryCompiler<C::Mapping>,
    client: Option<Box<dyn DataStoreClient>>,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C, cache: Arc<dyn CacheProvider>) -> Self {
        Session {
            connector,
            cache,
            compiler: QueryCompiler::new(C::get_mapping()),
            client: None,
        }
    }

    pub async fn connect(&mut self) -> Result<(), BackendError> {
        if self.client.is_none() {
            self.client = Some(self.connector.connect().await?);
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), BackendError> {
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }

    fn client(&self) -> Result<&dyn DataStoreClient, BackendError> {
        self.client
            .as_deref()
            .ok_or(BackendError::UpstreamNotPrepared)
    }

    pub fn compile<'a>(&self, query: impl Into<AnyQuery<'a>>) -> Result<CompiledQuery, BackendError> {
        Ok(self.compiler.compile(query)?)
    }

    /// Runs a compiled statement, loading its inline tables first
    pub async fn execute(&self, compiled: &CompiledQuery) -> Result<QueryOutput, BackendError> {
        let client = self.client()?;
        for table in compiled.params.tables() {
            client.create_inline_table(table).await?;
        }
        let output = client.query(&compiled.sql(), &compiled.params.values()).await?;
        debug!("Query returned {} rows", output.rows.len());
        Ok(output)
    }

    async fn fetch<'a>(&self, query: AnyQuery<'a>) -> Result<QueryOutput, BackendError> {
        let compiled = self.compile(query)?;
        self.execute(&compiled).await
    }

    pub async fn fetch_records<'a>(
        &self,
        query: impl Into<AnyQuery<'a>>,
    ) -> Result<QueryResult<Records>, BackendError> {
        let query = query.into();
        let output = self.fetch(query).await?;
        Ok(QueryResult {
            page: Page::new(query.pagination(), output.rows.len()),
            cache: CacheInfo {
                key: query.key(),
                status: CacheStatus::Miss,
            },
            columns: output.columns,
            data: output.rows,
        })
    }

    pub async fn fetch_dicts<'a>(
        &self,
        query: impl Into<AnyQuery<'a>>,
    ) -> Result<QueryResult<Dicts>, BackendError> {
        let query = query.into();
        let output = self.fetch(query).await?;
        Ok(QueryResult {
            page: Page::new(query.pagination(), output.rows.len()),
            cache: CacheInfo {
                key: query.key(),
                status: CacheStatus::Miss,
            },
            data: result::to_dicts(&output),
            columns: output.columns,
        })
    }

    /// Fetches the whole result of `query` through the cache, then slices
    /// the requested page out of it.
    ///
    /// Growth columns are computed after the cache step on every call.
    pub async fn fetch_dataframe(
        &self,
        query: &DataQuery,
    ) -> Result<QueryResult<DataFrame>, BackendError> {
        if let Some(growth) = &query.growth {
            growth::validate_growth(query, growth)?;
        }

        let unpaged = query.unpaged();
        let key = unpaged.key();

        let (frame, status) = match self.cache.retrieve(&unpaged).await {
            Some(frame) => {
                debug!("Cache HIT for {}", key);
                (frame, CacheStatus::Hit)
            }
            None => {
                debug!("Cache MISS for {}", key);
                let frame = DataFrame::from(self.fetch(AnyQuery::Data(&unpaged)).await?);
                self.cache.store(&unpaged, &frame).await;
                (frame, CacheStatus::Miss)
            }
        };

        let frame = match &query.growth {
            Some(growth) => growth::apply_growth(query, growth, frame)?,
            None => frame,
        };

        let total = frame.height();
        let frame = frame.slice(query.pagination);
        Ok(QueryResult {
            columns: frame.columns.clone(),
            data: frame,
            cache: CacheInfo { key, status },
            page: Page::new(query.pagination, total),
        })
    }

    /// Compares the tables and columns the schema declares with the ones in
    /// the backend catalog.
    ///
    /// Empty tables are only reported in the log.
    pub async fn validate_schema(&self, schema: &Schema) -> Result<(), BackendError> {
        let client = self.client()?;
        let tables = schema.unique_tables();

        let checks = tables
            .iter()
            .map(|(table, columns)| check_table(client, table, columns));
        let problems: Vec<String> = join_all(checks)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        if problems.is_empty() {
            info!("Schema {} matches the backend ({} tables)", schema.name, tables.len());
            Ok(())
        } else {
            Err(BackendError::SchemaInconsistency(problems.join("; ")))
        }
    }
}

async fn check_table(
    client: &dyn DataStoreClient,
    table: &str,
    declared: &BTreeSet<String>,
) -> Result<Vec<String>, DataStoreError> {
    let (table_schema, table_name) = table.split_once('.').unwrap_or(("public", table));
    let output = client
        .query(
            COLUMNS_SQL,
            &[
                Value::String(table_schema.to_string()),
                Value::String(table_name.to_string()),
            ],
        )
        .await?;

    if output.rows.is_empty() {
        return Ok(vec![format!("missing table {}", table)]);
    }

    let mut existing = BTreeSet::new();
    for row in &output.rows {
        if let [Value::String(column), Value::String(udt_name)] = row.as_slice() {
            if udt_name.parse::<PostgresType>().is_err() {
                warn!("Column {}.{} has unsupported type {}", table, column, udt_name);
            }
            existing.insert(column.clone());
        }
    }

    let count_sql = format!(
        "SELECT COUNT(*) FROM \"{}\".\"{}\"",
        table_schema.replace('"', "\"\""),
        table_name.replace('"', "\"\"")
    );
    let count = client.query(&count_sql, &[]).await?;
    if matches!(count.rows.first().and_then(|row| row.first()), Some(Value::Int(0))) {
        warn!("Table {} is empty", table);
    }

    Ok(declared
        .difference(&existing)
        .map(|column| format!("missing column {}.{}", table, column))
        .collect())
}
