use envconfig::Envconfig;
use log::debug;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "SCHEMA_PATH", default = "schema.json")]
    pub schema_path: String,

    #[envconfig(from = "QUERY_PATH", default = "query.json")]
    pub query_path: String,

    #[envconfig(from = "OLAP_EXECUTE", default = "false")]
    pub execute: bool,

    #[envconfig(from = "OLAP_CACHE_CAPACITY", default = "0")]
    pub cache_capacity: usize,
}

impl Config {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "Config loaded: schema_path={}, query_path={}, execute={}, cache_capacity={}",
            config.schema_path, config.query_path, config.execute, config.cache_capacity
        );
        Ok(config)
    }
}

#[derive(Envconfig, Clone)]
pub struct PostgresConfig {
    #[envconfig(from = "POSTGRES_USER", default = "postgres")]
    pub user: String,
    #[envconfig(from = "POSTGRES_PASSWORD", default = "postgres")]
    pub password: String,
    #[envconfig(from = "POSTGRES_HOST", default = "localhost:5432")]
    pub host: String,
    #[envconfig(from = "POSTGRES_DB", default = "main")]
    pub dbname: String,
}

impl PostgresConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "PostgresConfig loaded: user={}, host={}, dbname={}",
            config.user, config.host, config.dbname
        );
        Ok(config)
    }
}
