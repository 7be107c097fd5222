use super::TableSource;
use crate::data_store::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_LOCALE: &str = "xx";

/// Declared type of a level's key column; cut members are cast through it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Date,
    Timestamp,
    #[default]
    String,
}

impl MemberType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            MemberType::Int32 | MemberType::Int64 | MemberType::Float32 | MemberType::Float64
        )
    }

    /// Casts a raw member key to a typed value, `None` if it doesn't fit the type
    pub fn cast(&self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match self {
            MemberType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(Value::Boolean(true)),
                "false" | "f" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            MemberType::Int32 => raw
                .parse::<i32>()
                .ok()
                .map(|value| Value::Int(value.into())),
            MemberType::Int64 => raw.parse::<i64>().ok().map(Value::Int),
            MemberType::Float32 | MemberType::Float64 => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Value::Float),
            MemberType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|_| Value::String(raw.to_string())),
            MemberType::Timestamp => is_timestamp(raw).then(|| Value::String(raw.to_string())),
            MemberType::String => Some(Value::String(raw.to_string())),
        }
    }
}

fn is_timestamp(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw).is_ok()
        || ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(raw, format).is_ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeScale {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
}

/// A column name which may change depending on the requested locale
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LocaleColumn {
    Single(String),
    Localized(BTreeMap<String, String>),
}

impl LocaleColumn {
    pub fn resolve(&self, locale: &str) -> &str {
        match self {
            LocaleColumn::Single(column) => column,
            LocaleColumn::Localized(columns) => columns
                .get(locale)
                .or_else(|| columns.get(DEFAULT_LOCALE))
                .or_else(|| columns.values().next())
                .map(String::as_str)
                .unwrap_or_default(),
        }
    }

    pub fn all_columns(&self) -> Vec<&str> {
        match self {
            LocaleColumn::Single(column) => vec![column.as_str()],
            LocaleColumn::Localized(columns) => columns.values().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Property {
    pub name: String,
    pub key_column: LocaleColumn,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Level {
    pub name: String,
    pub key_column: String,
    #[serde(default)]
    pub key_type: MemberType,
    #[serde(default)]
    pub name_column: Option<LocaleColumn>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub time_scale: Option<TimeScale>,
}

impl Level {
    pub fn get_name_column(&self, locale: &str) -> Option<&str> {
        self.name_column.as_ref().map(|column| column.resolve(locale))
    }

    pub fn get_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|property| property.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Hierarchy {
    pub name: String,
    /// Table holding the levels; `None` means the levels live in the fact table
    #[serde(default)]
    pub table: Option<TableSource>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub foreign_key: Option<String>,
    pub levels: Vec<Level>,
}

impl Hierarchy {
    /// Primary key of the dimension table, the deepest level key by default
    pub fn primary_key(&self) -> &str {
        self.primary_key
            .as_deref()
            .or_else(|| self.levels.last().map(|level| level.key_column.as_str()))
            .unwrap_or_default()
    }

    /// Column of the fact table pointing to the dimension table
    pub fn foreign_key(&self) -> &str {
        self.foreign_key.as_deref().unwrap_or_else(|| self.primary_key())
    }

    pub fn get_level(&self, name: &str) -> Option<&Level> {
        self.levels.iter().find(|level| level.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::int(MemberType::Int32, "42", Some(Value::Int(42)))]
    #[case::int_overflow(MemberType::Int32, "99999999999", None)]
    #[case::int_garbage(MemberType::Int64, "4x", None)]
    #[case::float(MemberType::Float64, " 1.5 ", Some(Value::Float(1.5)))]
    #[case::float_nan(MemberType::Float64, "NaN", None)]
    #[case::boolean(MemberType::Boolean, "TRUE", Some(Value::Boolean(true)))]
    #[case::string(MemberType::String, "MX", Some(Value::String("MX".into())))]
    #[case::date(MemberType::Date, "2023-02-28", Some(Value::String("2023-02-28".into())))]
    #[case::date_out_of_range(MemberType::Date, "2023-02-30", None)]
    #[case::date_garbage(MemberType::Date, "'; DROP", None)]
    #[case::date_with_time(MemberType::Date, "2023-02-28 10:00:00", None)]
    #[case::timestamp(MemberType::Timestamp, "2023-02-28 10:15:00", Some(Value::String("2023-02-28 10:15:00".into())))]
    #[case::timestamp_iso(MemberType::Timestamp, "2023-02-28T10:15:00.250", Some(Value::String("2023-02-28T10:15:00.250".into())))]
    #[case::timestamp_rfc3339(MemberType::Timestamp, "2023-02-28T10:15:00+02:00", Some(Value::String("2023-02-28T10:15:00+02:00".into())))]
    #[case::timestamp_bad_hour(MemberType::Timestamp, "2023-02-28 25:00:00", None)]
    #[case::timestamp_date_only(MemberType::Timestamp, "2023-02-28", None)]
    fn test_cast(#[case] member_type: MemberType, #[case] raw: &str, #[case] expected: Option<Value>) {
        assert_eq!(member_type.cast(raw), expected);
    }

    #[test]
    fn test_locale_fallback() {
        let column: LocaleColumn =
            serde_json::from_str(r#"{"xx": "name_en", "es": "name_es"}"#).unwrap();
        assert_eq!(column.resolve("es"), "name_es");
        assert_eq!(column.resolve("fr"), "name_en");

        let single = LocaleColumn::Single("caption".into());
        assert_eq!(single.resolve("es"), "caption");
    }

    #[test]
    fn test_hierarchy_keys_default_to_deepest_level() {
        let hierarchy: Hierarchy = serde_json::from_str(
            r#"{"name": "Time", "levels": [
                {"name": "Year", "key_column": "year", "key_type": "int32"},
                {"name": "Month", "key_column": "month_id", "key_type": "int32"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(hierarchy.primary_key(), "month_id");
        assert_eq!(hierarchy.foreign_key(), "month_id");
        assert!(hierarchy.table.is_none());
    }
}
