//! Constraints over aggregated values, written as `gt.100`, `gte.5.and.lt.10`
//! or `isnull`.

use crate::sql_builder::CompileError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Gt => "gt",
            Comparison::Gte => "gte",
            Comparison::Lt => "lt",
            Comparison::Lte => "lte",
            Comparison::Eq => "eq",
            Comparison::Neq => "neq",
        }
    }
}

impl FromStr for Comparison {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gt" | ">" => Ok(Comparison::Gt),
            "gte" | ">=" => Ok(Comparison::Gte),
            "lt" | "<" => Ok(Comparison::Lt),
            "lte" | "<=" => Ok(Comparison::Lte),
            "eq" | "=" | "==" => Ok(Comparison::Eq),
            "neq" | "!=" | "<>" => Ok(Comparison::Neq),
            _ => Err(CompileError::UnsupportedOperator(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOperator {
    And,
    Or,
}

impl FromStr for LogicOperator {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "and" => Ok(LogicOperator::And),
            "or" => Ok(LogicOperator::Or),
            _ => Err(CompileError::UnsupportedOperator(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericConstraint {
    pub comparison: Comparison,
    pub scalar: f64,
}

impl fmt::Display for NumericConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.comparison.as_str(), self.scalar)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterCondition {
    IsNull,
    IsNotNull,
    Single(NumericConstraint),
    Compound(NumericConstraint, LogicOperator, NumericConstraint),
}

impl fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterCondition::IsNull => write!(f, "isnull"),
            FilterCondition::IsNotNull => write!(f, "isnotnull"),
            FilterCondition::Single(constraint) => write!(f, "{}", constraint),
            FilterCondition::Compound(first, op, second) => {
                let op = match op {
                    LogicOperator::And => "and",
                    LogicOperator::Or => "or",
                };
                write!(f, "{}.{}.{}", first, op, second)
            }
        }
    }
}

impl TryFrom<String> for FilterCondition {
    type Error = CompileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_filter_condition(&value)
    }
}

impl From<FilterCondition> for String {
    fn from(value: FilterCondition) -> Self {
        value.to_string()
    }
}

/// Parses the dotted condition syntax into a [`FilterCondition`].
///
/// Scalars may carry decimals and a sign, so tokens are consumed left to
/// right: an operator, then every following token up to the next operator
/// or logic word is part of the number.
pub fn parse_filter_condition(text: &str) -> Result<FilterCondition, CompileError> {
    let trimmed = text.trim();
    match trimmed.to_lowercase().as_str() {
        "isnull" => return Ok(FilterCondition::IsNull),
        "isnotnull" => return Ok(FilterCondition::IsNotNull),
        _ => {}
    }

    let tokens: Vec<&str> = trimmed.split('.').collect();
    let (first, rest) = parse_constraint(&tokens)?;
    if rest.is_empty() {
        return Ok(FilterCondition::Single(first));
    }

    let op: LogicOperator = rest[0].parse()?;
    let (second, rest) = parse_constraint(&rest[1..])?;
    if !rest.is_empty() {
        return Err(CompileError::UnsupportedOperator(rest.join(".")));
    }
    Ok(FilterCondition::Compound(first, op, second))
}

fn parse_constraint<'a, 'b>(
    tokens: &'b [&'a str],
) -> Result<(NumericConstraint, &'b [&'a str]), CompileError> {
    let (op, tail) = tokens
        .split_first()
        .ok_or_else(|| CompileError::UnsupportedOperator(String::new()))?;
    let comparison: Comparison = op.parse()?;

    let end = tail
        .iter()
        .position(|token| token.parse::<LogicOperator>().is_ok())
        .unwrap_or(tail.len());
    let number = tail[..end].join(".");
    let scalar = number
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| CompileError::UnsupportedOperator(format!("{}.{}", op, number)))?;

    Ok((NumericConstraint { comparison, scalar }, &tail[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn constraint(comparison: Comparison, scalar: f64) -> NumericConstraint {
        NumericConstraint { comparison, scalar }
    }

    #[rstest]
    #[case::isnull("isnull", FilterCondition::IsNull)]
    #[case::isnotnull("IsNotNull", FilterCondition::IsNotNull)]
    #[case::single("gt.100", FilterCondition::Single(constraint(Comparison::Gt, 100.0)))]
    #[case::decimal("lte.2.5", FilterCondition::Single(constraint(Comparison::Lte, 2.5)))]
    #[case::negative("gte.-3", FilterCondition::Single(constraint(Comparison::Gte, -3.0)))]
    #[case::compound(
        "gt.1.5.and.lt.200",
        FilterCondition::Compound(
            constraint(Comparison::Gt, 1.5),
            LogicOperator::And,
            constraint(Comparison::Lt, 200.0)
        )
    )]
    #[case::or(
        "eq.0.or.neq.10",
        FilterCondition::Compound(
            constraint(Comparison::Eq, 0.0),
            LogicOperator::Or,
            constraint(Comparison::Neq, 10.0)
        )
    )]
    fn test_parse(#[case] text: &str, #[case] expected: FilterCondition) {
        assert_eq!(parse_filter_condition(text).unwrap(), expected);
    }

    #[rstest]
    #[case::unknown_operator("between.1")]
    #[case::missing_number("gt")]
    #[case::bad_logic("gt.1.xor.lt.2")]
    #[case::trailing("gt.1.and.lt.2.and.eq.3")]
    fn test_parse_errors(#[case] text: &str) {
        assert!(matches!(
            parse_filter_condition(text),
            Err(CompileError::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn test_serde_through_text() {
        let mixed: Result<FilterCondition, _> = serde_json::from_str(r#""gt.10.or.isnull""#);
        assert!(mixed.is_err());

        let condition: FilterCondition = serde_json::from_str(r#""lt.-0.5""#).unwrap();
        assert_eq!(serde_json::to_string(&condition).unwrap(), r#""lt.-0.5""#);
    }
}
