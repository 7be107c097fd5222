use crate::data_store::{QueryOutput, Value};
use crate::query::Pagination;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub key: String,
    pub status: CacheStatus,
}

/// Pagination echo; `total` counts the rows before slicing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
    pub total: u64,
}

impl Page {
    pub fn new(pagination: Pagination, total: usize) -> Self {
        Page {
            limit: pagination.limit,
            offset: pagination.offset,
            total: total as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult<T> {
    pub data: T,
    pub columns: Vec<String>,
    pub cache: CacheInfo,
    pub page: Page,
}

pub type Records = Vec<Vec<Value>>;

pub type Dicts = Vec<BTreeMap<String, Value>>;

pub(crate) fn to_dicts(output: &QueryOutput) -> Dicts {
    output
        .rows
        .iter()
        .map(|row| output.columns.iter().cloned().zip(row.iter().cloned()).collect())
        .collect()
}

/// Tabular result kept whole in the cache and sliced per request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DataFrame {
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Rows in `offset..offset + limit`; a limit of 0 keeps everything after
    /// the offset
    pub fn slice(&self, pagination: Pagination) -> DataFrame {
        let offset = (pagination.offset as usize).min(self.rows.len());
        let end = match pagination.limit {
            0 => self.rows.len(),
            limit => offset.saturating_add(limit as usize).min(self.rows.len()),
        };
        DataFrame {
            columns: self.columns.clone(),
            rows: self.rows[offset..end].to_vec(),
        }
    }
}

impl From<QueryOutput> for DataFrame {
    fn from(output: QueryOutput) -> Self {
        DataFrame {
            columns: output.columns,
            rows: output.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn numbers(count: i64) -> DataFrame {
        DataFrame {
            columns: vec!["n".into()],
            rows: (0..count).map(|n| vec![Value::Int(n)]).collect(),
        }
    }

    #[rstest]
    #[case::first_page(10, 0, 0..10)]
    #[case::middle(10, 20, 20..30)]
    #[case::tail(10, 45, 45..50)]
    #[case::past_end(10, 80, 0..0)]
    #[case::unlimited(0, 40, 40..50)]
    fn test_slice(#[case] limit: u64, #[case] offset: u64, #[case] expected: std::ops::Range<i64>) {
        let frame = numbers(50).slice(Pagination::new(limit, offset));
        let values: Vec<i64> = frame
            .rows
            .iter()
            .map(|row| match row[0] {
                Value::Int(n) => n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, expected.collect::<Vec<_>>());
    }

    #[test]
    fn test_dicts_and_status() {
        let output = QueryOutput {
            columns: vec!["Year".into(), "Trade Value".into()],
            rows: vec![vec![Value::Int(2020), Value::Float(1.5)]],
        };
        let dicts = to_dicts(&output);
        assert_eq!(dicts[0]["Year"], Value::Int(2020));
        assert_eq!(serde_json::to_string(&CacheStatus::Hit).unwrap(), "\"HIT\"");
    }
}
