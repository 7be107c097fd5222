pub mod config;
pub mod data_store;
pub mod query;
pub mod semantic_model;
pub mod session;
pub mod sql_builder;
