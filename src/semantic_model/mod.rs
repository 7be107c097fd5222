pub mod dimension;
pub mod formula;
pub mod local_store;
pub mod measure;

pub use dimension::{
    Hierarchy, Level, LocaleColumn, MemberType, Property, TimeScale, DEFAULT_LOCALE,
};
pub use formula::{Formula, FormulaLiteral, FormulaOp, UnaryFn};
pub use local_store::LocalSchemaStore;
pub use measure::{Aggregator, AnyMeasure, CalculatedMeasure, Measure};

use crate::data_store::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A table living in the backend database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Table {
            name: name.to_string(),
            schema: None,
        }
    }

    /// Schema qualified name, as it is listed by the backend catalog
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }
}

/// A small table declared in the schema file itself.
///
/// It doesn't exist in the backend; the session materializes it as a
/// temporary table before running a statement that references it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InlineTable {
    pub name: String,
    pub headers: Vec<String>,
    pub types: Vec<MemberType>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TableSource {
    Inline(InlineTable),
    Table(Table),
}

impl TableSource {
    pub fn name(&self) -> &str {
        match self {
            TableSource::Inline(table) => &table.name,
            TableSource::Table(table) => &table.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Cube {
    pub name: String,
    pub table: TableSource,
    /// The fact table is shared with other cubes and holds rows without a
    /// counterpart in the dimension tables
    #[serde(default)]
    pub subset_table: bool,
    pub hierarchies: Vec<Hierarchy>,
    pub measures: Vec<AnyMeasure>,
}

impl Cube {
    pub fn get_hierarchy(&self, name: &str) -> Option<&Hierarchy> {
        self.hierarchies
            .iter()
            .find(|hierarchy| hierarchy.name == name)
    }

    /// Finds a measure by name, submeasures included
    pub fn get_measure(&self, name: &str) -> Option<&AnyMeasure> {
        self.measures.iter().find_map(|measure| measure.find(name))
    }

    /// Finds a level by name across all hierarchies, with its hierarchy
    pub fn get_level(&self, name: &str) -> Option<(&Hierarchy, &Level)> {
        self.hierarchies.iter().find_map(|hierarchy| {
            hierarchy
                .get_level(name)
                .map(|level| (hierarchy, level))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Schema {
    pub name: String,
    pub cubes: Vec<Cube>,
}

impl Schema {
    pub fn get_cube(&self, name: &str) -> Result<&Cube, SchemaError> {
        self.cubes
            .iter()
            .find(|cube| cube.name == name)
            .ok_or_else(|| SchemaError::CubeNotFound(name.to_string()))
    }

    /// Columns each backend table must have for the declared cubes to work,
    /// keyed by schema qualified table name.
    ///
    /// Inline tables are left out since they never exist in the backend.
    pub fn unique_tables(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut tables: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for cube in &self.cubes {
            let mut fact_columns = BTreeSet::new();
            for measure in &cube.measures {
                collect_measure_columns(measure, &mut fact_columns);
            }

            for hierarchy in &cube.hierarchies {
                let mut level_columns = BTreeSet::new();
                for level in &hierarchy.levels {
                    level_columns.insert(level.key_column.clone());
                    if let Some(name_column) = &level.name_column {
                        level_columns.extend(name_column.all_columns().into_iter().map(String::from));
                    }
                    for property in &level.properties {
                        level_columns
                            .extend(property.key_column.all_columns().into_iter().map(String::from));
                    }
                }

                match &hierarchy.table {
                    None => fact_columns.extend(level_columns),
                    Some(TableSource::Inline(_)) => {
                        fact_columns.insert(hierarchy.foreign_key().to_string());
                    }
                    Some(TableSource::Table(table)) => {
                        fact_columns.insert(hierarchy.foreign_key().to_string());
                        level_columns.insert(hierarchy.primary_key().to_string());
                        tables
                            .entry(table.full_name())
                            .or_default()
                            .extend(level_columns);
                    }
                }
            }

            if let TableSource::Table(table) = &cube.table {
                tables
                    .entry(table.full_name())
                    .or_default()
                    .extend(fact_columns);
            }
        }

        tables
    }
}

fn collect_measure_columns(measure: &AnyMeasure, columns: &mut BTreeSet<String>) {
    if let AnyMeasure::Measure(measure) = measure {
        columns.insert(measure.key_column.clone());
        if let Aggregator::WeightedAverage { weight_column } = &measure.aggregator {
            columns.insert(weight_column.clone());
        }
    }
    for submeasure in measure.submeasures() {
        collect_measure_columns(submeasure, columns);
    }
}

/// Read-only access to the loaded [`Schema`]
pub trait SchemaStore {
    fn get_schema(&self) -> &Schema;

    fn get_cube(&self, name: &str) -> Result<&Cube, SchemaError> {
        self.get_schema().get_cube(name)
    }
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),

    #[error("Cube not found: {0}")]
    CubeNotFound(String),

    #[error("Schema doesn't match the backend: {0}")]
    Inconsistency(String),
}
