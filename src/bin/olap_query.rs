use log::{error, info};
use std::sync::Arc;

use olap_sql::{
    config::{Config, PostgresConfig},
    data_store::PostgresConnector,
    query::DataQuery,
    semantic_model::{LocalSchemaStore, SchemaStore},
    session::{CacheProvider, DummyProvider, MemoryProvider, Session},
    sql_builder::QueryCompiler,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::new().map_err(|e| {
        error!("Failed to initialize config: {}", e);
        e
    })?;

    let store = LocalSchemaStore::from_file(&config.schema_path).map_err(|e| {
        error!("Failed to load schema: {}", e);
        e
    })?;

    let query_json = std::fs::read_to_string(&config.query_path).map_err(|e| {
        error!("Failed to read query file {}: {}", config.query_path, e);
        e
    })?;
    let query: DataQuery = serde_json::from_str(&query_json).map_err(|e| {
        error!("Failed to parse query file {}: {}", config.query_path, e);
        e
    })?;
    store.get_cube(&query.cube.name)?;

    let compiled = QueryCompiler::default().compile(&query)?;
    println!("{}", compiled.debug_sql());

    if !config.execute {
        return Ok(());
    }

    let postgres_config = PostgresConfig::new().map_err(|e| {
        error!("Failed to initialize Postgres config: {}", e);
        e
    })?;

    let cache: Arc<dyn CacheProvider> = match config.cache_capacity {
        0 => Arc::new(DummyProvider),
        capacity => Arc::new(MemoryProvider::new(capacity)),
    };

    let mut session = Session::new(PostgresConnector::new(postgres_config), cache);
    session.connect().await?;

    let outcome = async {
        session.validate_schema(store.get_schema()).await?;
        session.fetch_dataframe(&query).await
    }
    .await;
    session.close().await?;

    let result = outcome.map_err(|e| {
        error!("Query failed: {}", e);
        e
    })?;
    info!(
        "Fetched {} of {} rows (cache {:?})",
        result.data.height(),
        result.page.total,
        result.cache.status
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
