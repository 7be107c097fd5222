use crate::data_store::{DataStoreError, Value};
use crate::semantic_model::MemberType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::error;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Row, Statement};

pub type SqlParam = Box<dyn ToSql + Sync + Send>;

pub fn columns_from_stmt(stmt: &Statement) -> Vec<String> {
    stmt.columns()
        .iter()
        .map(|col| col.name().to_owned())
        .collect()
}

pub fn decode_rows(rows: Vec<Row>) -> Result<Vec<Vec<Value>>, DataStoreError> {
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &Row) -> Result<Vec<Value>, DataStoreError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let value = match col.type_() {
                &Type::BOOL => get::<bool>(row, idx)?.map(Value::Boolean),
                &Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
                &Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
                &Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
                &Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
                &Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
                &Type::NUMERIC => get::<Decimal>(row, idx)?
                    .map(|v| v.to_f64().map(Value::Float).unwrap_or(Value::Null)),
                &Type::TEXT | &Type::VARCHAR | &Type::BPCHAR | &Type::NAME => {
                    get::<String>(row, idx)?.map(Value::String)
                }
                &Type::DATE => get::<NaiveDate>(row, idx)?.map(|v| Value::String(v.to_string())),
                &Type::TIME => get::<NaiveTime>(row, idx)?.map(|v| Value::String(v.to_string())),
                &Type::TIMESTAMP => {
                    get::<NaiveDateTime>(row, idx)?.map(|v| Value::String(v.to_string()))
                }
                &Type::TIMESTAMPTZ => {
                    get::<DateTime<Utc>>(row, idx)?.map(|v| Value::String(v.to_rfc3339()))
                }
                other => {
                    error!("Unexpected type {} in column {}", other, col.name());
                    return Err(DataStoreError::ColumnDecode {
                        column: col.name().to_owned(),
                        type_name: other.to_string(),
                    });
                }
            };
            Ok(value.unwrap_or(Value::Null))
        })
        .collect()
}

fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, DataStoreError>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        let column = &row.columns()[idx];
        DataStoreError::ColumnDecode {
            column: column.name().to_owned(),
            type_name: format!("{} ({})", column.type_(), e),
        }
    })
}

/// Converts a bound value into a driver parameter.
///
/// `hint` is the declared type of the target column, used so that nulls are
/// typed and dates travel as text.
pub fn encode_param(value: &Value, hint: Option<MemberType>) -> SqlParam {
    match (value, hint) {
        (Value::Null, Some(MemberType::Boolean)) => Box::new(None::<bool>),
        (Value::Null, Some(MemberType::Int32 | MemberType::Int64)) => Box::new(None::<i64>),
        (Value::Null, Some(MemberType::Float32 | MemberType::Float64)) => Box::new(None::<f64>),
        (Value::Null, _) => Box::new(None::<String>),
        (Value::Boolean(v), _) => Box::new(*v),
        (Value::Int(v), Some(MemberType::Float32 | MemberType::Float64)) => Box::new(*v as f64),
        (Value::Int(v), Some(MemberType::String | MemberType::Date | MemberType::Timestamp)) => {
            Box::new(v.to_string())
        }
        (Value::Int(v), _) => Box::new(*v),
        (Value::Float(v), _) => Box::new(*v),
        (Value::String(v), _) => Box::new(v.clone()),
    }
}

/// SQL type used to materialize an inline table column
pub fn inline_column_type(member_type: MemberType) -> &'static str {
    match member_type {
        MemberType::Boolean => "BOOLEAN",
        MemberType::Int32 | MemberType::Int64 => "BIGINT",
        MemberType::Float32 | MemberType::Float64 => "DOUBLE PRECISION",
        MemberType::Date => "DATE",
        MemberType::Timestamp => "TIMESTAMP",
        MemberType::String => "TEXT",
    }
}

/// Placeholder expression for an inline table insert; dates are sent as text
pub fn inline_placeholder(position: usize, member_type: MemberType) -> String {
    match member_type {
        MemberType::Date | MemberType::Timestamp => format!(
            "CAST(CAST(${} AS TEXT) AS {})",
            position,
            inline_column_type(member_type)
        ),
        _ => format!("${}", position),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_placeholder() {
        assert_eq!(inline_placeholder(3, MemberType::Int32), "$3");
        assert_eq!(
            inline_placeholder(1, MemberType::Date),
            "CAST(CAST($1 AS TEXT) AS DATE)"
        );
    }

    #[test]
    fn test_inline_column_type() {
        assert_eq!(inline_column_type(MemberType::Int32), "BIGINT");
        assert_eq!(inline_column_type(MemberType::String), "TEXT");
    }
}
