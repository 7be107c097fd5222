//! Translates validated queries into SQL statements.
//!
//! A data query compiles to a group query over a core query; a members query
//! compiles to a single distinct listing. Each compilation builds a plan
//! value, renders it once and parses the text back with the dialect of the
//! target backend, so a malformed render fails here and not on the server.

pub mod aggregate;
pub mod core;
pub mod criterion;
pub mod formula;
pub mod group;
pub mod members;
pub mod params;
pub mod plan;

pub use params::ParamManager;

use crate::data_store::encoding::inline_column_type;
use crate::data_store::{DataStoreMapping, PostgresMapping};
use crate::query::{AnyQuery, DataQuery};
use crate::semantic_model::{AnyMeasure, TableSource};
use log::debug;
use plan::Relation;
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Unsupported aggregator: {0}")]
    UnsupportedAggregator(String),

    #[error("Invalid parameters for aggregator {aggregator}: {reason}")]
    InvalidAggregatorParams { aggregator: String, reason: String },

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Can't parse formula '{formula}' near: {near}")]
    FormulaParse { formula: String, near: String },

    #[error("Member '{member}' doesn't match the type of level {level}")]
    InvalidMember { level: String, member: String },

    #[error("Field not found in query: {0}")]
    UnknownField(String),

    #[error("Calculated measure '{0}' depends on itself")]
    CircularMeasure(String),

    #[error("SQL generation error: {0}")]
    SqlGeneration(String),
}

/// A statement ready to run, with the values bound to its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub statement: Statement,
    pub params: ParamManager,
}

impl CompiledQuery {
    pub fn sql(&self) -> String {
        self.statement.to_string()
    }

    /// SQL followed by the bound parameters and inline tables, for logs only
    pub fn debug_sql(&self) -> String {
        let mut text = self.sql();

        if !self.params.params().is_empty() {
            let params = self
                .params
                .params()
                .iter()
                .map(|(name, value)| {
                    let value = serde_json::to_string(value).unwrap_or_else(|_| value.to_string());
                    format!("\"{}\": {}", name, value)
                })
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(&format!("\nWITH PARAMS {{{}}}", params));
        }

        for table in self.params.tables() {
            let columns = table
                .headers
                .iter()
                .zip(&table.types)
                .map(|(header, member_type)| format!("{} {}", header, inline_column_type(*member_type)))
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(&format!("\nWITH INLINE TABLE {}({})", table.name, columns));
        }

        text
    }
}

pub struct QueryCompiler<M: DataStoreMapping> {
    mapping: M,
}

impl<M: DataStoreMapping> QueryCompiler<M> {
    pub fn new(mapping: M) -> Self {
        QueryCompiler { mapping }
    }

    pub fn compile<'a>(&self, query: impl Into<AnyQuery<'a>>) -> Result<CompiledQuery, CompileError> {
        let mut params = ParamManager::new();
        let select = match query.into() {
            AnyQuery::Data(query) => {
                let core = core::core_select(query, &mut params)?;
                group::group_select(query, core)?
            }
            AnyQuery::Members(query) => members::members_select(query, &mut params)?,
        };

        let sql = select.to_string();
        debug!("Compiled SQL: {}", sql);

        let statement = self.parse_statement(&sql)?;
        Ok(CompiledQuery { statement, params })
    }

    fn parse_statement(&self, sql: &str) -> Result<Statement, CompileError> {
        let mut statements = Parser::parse_sql(self.mapping.get_dialect(), sql)
            .map_err(|e| CompileError::SqlGeneration(format!("{}: {}", e, sql)))?;

        match (statements.pop(), statements.is_empty()) {
            (Some(statement @ Statement::Query(_)), true) => Ok(statement),
            _ => Err(CompileError::SqlGeneration(format!(
                "expected a single SELECT statement: {}",
                sql
            ))),
        }
    }
}

impl Default for QueryCompiler<PostgresMapping> {
    fn default() -> Self {
        QueryCompiler::new(PostgresMapping)
    }
}

/// Measures computed by a data query: each requested measure followed by its
/// submeasures, without repetitions
pub(crate) fn expand_measures(query: &DataQuery) -> Vec<&AnyMeasure> {
    fn visit<'a>(measure: &'a AnyMeasure, measures: &mut Vec<&'a AnyMeasure>) {
        if !measures.iter().any(|item| item.name() == measure.name()) {
            measures.push(measure);
        }
        for submeasure in measure.submeasures() {
            visit(submeasure, measures);
        }
    }

    let mut measures = Vec::new();
    for msrfi in &query.fields_quantitative {
        visit(&msrfi.measure, &mut measures);
    }
    measures
}

/// Finds a measure among the query fields first, then in the cube catalog
pub(crate) fn lookup_measure<'a>(query: &'a DataQuery, name: &str) -> Option<&'a AnyMeasure> {
    query
        .fields_quantitative
        .iter()
        .find_map(|msrfi| msrfi.measure.find(name))
        .or_else(|| query.cube.measures.iter().find_map(|measure| measure.find(name)))
}

/// Measures the statement has to read: the expanded query measures followed
/// by every measure their formulas reach. Names that are no measure are left
/// for the group query to resolve as levels.
pub(crate) fn required_measures(query: &DataQuery) -> Vec<&AnyMeasure> {
    let mut measures = expand_measures(query);
    let mut idx = 0;
    while idx < measures.len() {
        let current = measures[idx];
        if let AnyMeasure::Calculated(item) = current {
            for name in item.formula.references() {
                let Some(found) = lookup_measure(query, name) else {
                    continue;
                };
                if !measures.iter().any(|item| item.name() == found.name()) {
                    measures.push(found);
                }
            }
        }
        idx += 1;
    }
    measures
}

/// Relation for a table source; inline tables are registered with `params`
pub(crate) fn table_relation(
    source: &TableSource,
    alias: Option<&str>,
    params: &mut ParamManager,
) -> Relation {
    let alias = alias.map(str::to_string);
    match source {
        TableSource::Inline(table) => {
            params.set_table(table);
            Relation::Table {
                name: table.name.clone(),
                schema: None,
                alias,
            }
        }
        TableSource::Table(table) => Relation::Table {
            name: table.name.clone(),
            schema: table.schema.clone(),
            alias,
        },
    }
}
