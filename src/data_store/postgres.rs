use crate::config::PostgresConfig;
use crate::data_store::encoding::{
    columns_from_stmt, decode_rows, encode_param, inline_column_type, inline_placeholder, SqlParam,
};
use crate::data_store::{
    Connector, DataStoreClient, DataStoreError, DataStoreMapping, QueryOutput, Value,
};
use crate::semantic_model::InlineTable;
use async_trait::async_trait;
use log::{debug, error, info};
use sqlparser::dialect::PostgreSqlDialect;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};

pub struct PostgresMapping;

impl DataStoreMapping for PostgresMapping {
    fn get_dialect(&self) -> &dyn sqlparser::dialect::Dialect {
        &PostgreSqlDialect {}
    }
}

/// Opens one [`PostgresDataStore`] per session
#[derive(Clone)]
pub struct PostgresConnector {
    config: PostgresConfig,
}

impl PostgresConnector {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    type Mapping = PostgresMapping;

    fn get_mapping() -> Self::Mapping {
        PostgresMapping {}
    }

    async fn connect(&self) -> Result<Box<dyn DataStoreClient>, DataStoreError> {
        let store = PostgresDataStore::new(&self.config).await?;
        Ok(Box::new(store))
    }
}

pub struct PostgresDataStore {
    client: Client,
    connection: JoinHandle<()>,
}

impl PostgresDataStore {
    pub async fn new(config: &PostgresConfig) -> Result<Self, DataStoreError> {
        let connection_string = format!(
            "postgres://{}:{}@{}/{}",
            config.user, config.password, config.host, config.dbname
        );

        let (client, connection) = tokio_postgres::connect(&connection_string, NoTls)
            .await
            .map_err(|e| DataStoreError::ConnectionError(e.to_string()))?;

        // Spawn a task to manage the connection
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Connection error: {}", e);
            }
        });

        info!("Connected to {}/{}", config.host, config.dbname);
        Ok(PostgresDataStore { client, connection })
    }

    async fn run(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DataStoreError> {
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|param| param.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let stmt = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| DataStoreError::QueryError(e.to_string()))?;

        let rows = self
            .client
            .query(&stmt, &refs)
            .await
            .map_err(|e| DataStoreError::QueryError(e.to_string()))?;

        Ok(QueryOutput {
            columns: columns_from_stmt(&stmt),
            rows: decode_rows(rows)?,
        })
    }
}

#[async_trait]
impl DataStoreClient for PostgresDataStore {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput, DataStoreError> {
        let params: Vec<SqlParam> = params.iter().map(|value| encode_param(value, None)).collect();
        self.run(sql, &params).await
    }

    async fn create_inline_table(&self, table: &InlineTable) -> Result<(), DataStoreError> {
        let columns = table
            .headers
            .iter()
            .zip(&table.types)
            .map(|(header, member_type)| {
                format!("\"{}\" {}", header.replace('"', "\"\""), inline_column_type(*member_type))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let quoted_name = format!("\"{}\"", table.name.replace('"', "\"\""));

        self.client
            .batch_execute(&format!(
                "CREATE TEMPORARY TABLE IF NOT EXISTS {quoted_name} ({columns}); TRUNCATE {quoted_name}"
            ))
            .await
            .map_err(|e| DataStoreError::QueryError(e.to_string()))?;

        let placeholders = table
            .types
            .iter()
            .enumerate()
            .map(|(idx, member_type)| inline_placeholder(idx + 1, *member_type))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!("INSERT INTO {quoted_name} VALUES ({placeholders})");

        for row in &table.rows {
            let params: Vec<SqlParam> = row
                .iter()
                .zip(&table.types)
                .map(|(value, member_type)| encode_param(value, Some(*member_type)))
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|param| param.as_ref() as &(dyn ToSql + Sync))
                .collect();
            self.client
                .execute(insert.as_str(), &refs)
                .await
                .map_err(|e| DataStoreError::QueryError(e.to_string()))?;
        }

        debug!("Inline table {} loaded with {} rows", table.name, table.rows.len());
        Ok(())
    }

    async fn close(&self) -> Result<(), DataStoreError> {
        self.connection.abort();
        info!("Connection closed");
        Ok(())
    }
}
