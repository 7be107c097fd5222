use std::str::FromStr;

/// Column types the row decoder can turn into a [`Value`](super::Value),
/// named as `information_schema.columns.udt_name` reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostgresType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Numeric,
    Text,
    Varchar,
    Char,
    Name,
    Date,
    Time,
    Timestamp,
    TimestampTz,
}

impl FromStr for PostgresType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pg_type = match s {
            "bool" => PostgresType::Boolean,
            "int2" => PostgresType::SmallInt,
            "int4" => PostgresType::Integer,
            "int8" => PostgresType::BigInt,
            "float4" => PostgresType::Real,
            "float8" => PostgresType::DoublePrecision,
            "numeric" => PostgresType::Numeric,
            "text" => PostgresType::Text,
            "varchar" => PostgresType::Varchar,
            "bpchar" => PostgresType::Char,
            "name" => PostgresType::Name,
            "date" => PostgresType::Date,
            "time" => PostgresType::Time,
            "timestamp" => PostgresType::Timestamp,
            "timestamptz" => PostgresType::TimestampTz,
            _ => return Err(format!("Unsupported PostgreSQL type: {}", s)),
        };
        Ok(pg_type)
    }
}
