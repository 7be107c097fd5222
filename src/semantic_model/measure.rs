use super::formula::Formula;
use crate::sql_builder::CompileError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregation applied to a measure's fact column, with its typed parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", try_from = "AggregatorConfig")]
pub enum Aggregator {
    Sum,
    Count,
    Average,
    Max,
    Min,
    Mode,
    WeightedAverage { weight_column: String },
    CalculatedMoe { critical_value: f64 },
    Median,
    Quantile { quantile_level: f64 },
    DistinctCount,
}

/// Loose shape of an aggregator as written in a schema file
#[derive(Debug, Deserialize)]
struct AggregatorConfig {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    params: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<AggregatorConfig> for Aggregator {
    type Error = CompileError;

    fn try_from(config: AggregatorConfig) -> Result<Self, Self::Error> {
        Aggregator::from_parts(&config.kind, &config.params)
    }
}

impl Aggregator {
    /// Builds an aggregator from its kind name and raw parameters.
    ///
    /// Kind names are matched ignoring case and underscores, so `Sum`, `sum`
    /// and `weighted_average` are all accepted.
    pub fn from_parts(
        kind: &str,
        params: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, CompileError> {
        let normalized: String = kind
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_lowercase();

        let aggregator = match normalized.as_str() {
            "sum" => Aggregator::Sum,
            "count" => Aggregator::Count,
            "avg" | "average" => Aggregator::Average,
            "max" => Aggregator::Max,
            "min" => Aggregator::Min,
            "mode" => Aggregator::Mode,
            "weightedaverage" => Aggregator::WeightedAverage {
                weight_column: string_param(kind, params, "weight_column")?,
            },
            "calculatedmoe" => Aggregator::CalculatedMoe {
                critical_value: number_param(kind, params, "critical_value")?,
            },
            "median" => Aggregator::Median,
            "quantile" => Aggregator::Quantile {
                quantile_level: number_param(kind, params, "quantile_level")?,
            },
            "distinctcount" | "countdistinct" => Aggregator::DistinctCount,
            _ => return Err(CompileError::UnsupportedAggregator(kind.to_string())),
        };
        Ok(aggregator)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Aggregator::Sum => "Sum",
            Aggregator::Count => "Count",
            Aggregator::Average => "Average",
            Aggregator::Max => "Max",
            Aggregator::Min => "Min",
            Aggregator::Mode => "Mode",
            Aggregator::WeightedAverage { .. } => "WeightedAverage",
            Aggregator::CalculatedMoe { .. } => "CalculatedMoe",
            Aggregator::Median => "Median",
            Aggregator::Quantile { .. } => "Quantile",
            Aggregator::DistinctCount => "DistinctCount",
        }
    }
}

fn string_param(
    kind: &str,
    params: &BTreeMap<String, serde_json::Value>,
    key: &str,
) -> Result<String, CompileError> {
    params
        .get(key)
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or_else(|| CompileError::InvalidAggregatorParams {
            aggregator: kind.to_string(),
            reason: format!("missing string parameter '{}'", key),
        })
}

fn number_param(
    kind: &str,
    params: &BTreeMap<String, serde_json::Value>,
    key: &str,
) -> Result<f64, CompileError> {
    let value = params.get(key).and_then(|value| match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.parse().ok(),
        _ => None,
    });
    value.ok_or_else(|| CompileError::InvalidAggregatorParams {
        aggregator: kind.to_string(),
        reason: format!("missing numeric parameter '{}'", key),
    })
}

/// A measure aggregated straight from a fact table column
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Measure {
    pub name: String,
    pub key_column: String,
    pub aggregator: Aggregator,
    #[serde(default)]
    pub submeasures: Vec<AnyMeasure>,
}

/// A measure computed from a formula over other measures and level columns
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CalculatedMeasure {
    pub name: String,
    pub formula: Formula,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnyMeasure {
    Measure(Measure),
    Calculated(CalculatedMeasure),
}

impl AnyMeasure {
    pub fn name(&self) -> &str {
        match self {
            AnyMeasure::Measure(measure) => &measure.name,
            AnyMeasure::Calculated(calculated) => &calculated.name,
        }
    }

    pub fn submeasures(&self) -> &[AnyMeasure] {
        match self {
            AnyMeasure::Measure(measure) => &measure.submeasures,
            AnyMeasure::Calculated(_) => &[],
        }
    }

    /// Names of this measure followed by all its nested submeasures
    pub fn and_submeasures(&self) -> Vec<&str> {
        let mut names = vec![self.name()];
        for submeasure in self.submeasures() {
            names.extend(submeasure.and_submeasures());
        }
        names
    }

    /// Finds this measure or one of its submeasures by name
    pub fn find(&self, name: &str) -> Option<&AnyMeasure> {
        if self.name() == name {
            return Some(self);
        }
        self.submeasures().iter().find_map(|item| item.find(name))
    }
}
