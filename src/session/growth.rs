use crate::data_store::Value;
use crate::query::{DataQuery, Growth, GrowthMethod, HierarchyField, LevelField};
use crate::session::result::DataFrame;
use crate::sql_builder::CompileError;
use std::collections::HashMap;

pub fn growth_value_name(measure: &str) -> String {
    format!("{} Growth Value", measure)
}

pub fn growth_name(measure: &str) -> String {
    format!("{} Growth", measure)
}

/// Checks that a growth calculation can run on the query output: the time
/// level has to be a drilldown and the measure one of the returned columns.
pub fn validate_growth<'a>(
    query: &'a DataQuery,
    growth: &Growth,
) -> Result<(&'a HierarchyField, &'a LevelField), CompileError> {
    let time_hierarchy = query
        .fields_qualitative
        .iter()
        .find(|field| field.get_level(&growth.time_level).is_some())
        .ok_or_else(|| CompileError::UnknownField(growth.time_level.clone()))?;
    let time_field = time_hierarchy
        .get_level(&growth.time_level)
        .filter(|field| field.is_drilldown)
        .ok_or_else(|| CompileError::UnknownField(growth.time_level.clone()))?;

    // pass-through measures only return their submeasures
    let returned = query.fields_quantitative.iter().any(|msrfi| {
        msrfi.measure.find(&growth.measure).is_some()
            && (msrfi.is_measure || msrfi.name() != growth.measure)
    });
    if !returned {
        return Err(CompileError::UnknownField(growth.measure.clone()));
    }

    Ok((time_hierarchy, time_field))
}

/// Appends the absolute and relative change of `growth.measure` along the
/// time level to every row.
///
/// Rows are compared within the same combination of the drilldowns outside
/// the time hierarchy. A row without a base member gets nulls, and so does
/// the relative change when the base is zero or null.
pub fn apply_growth(
    query: &DataQuery,
    growth: &Growth,
    mut frame: DataFrame,
) -> Result<DataFrame, CompileError> {
    let (time_hierarchy, time_field) = validate_growth(query, growth)?;

    let time_idx = frame
        .column_index(&time_field.key_name())
        .ok_or_else(|| CompileError::UnknownField(time_field.key_name()))?;
    let measure_idx = frame
        .column_index(&growth.measure)
        .ok_or_else(|| CompileError::UnknownField(growth.measure.clone()))?;

    let group_idx: Vec<usize> = query
        .fields_qualitative
        .iter()
        .filter(|field| field.name() != time_hierarchy.name())
        .flat_map(|field| field.drilldown_levels())
        .filter_map(|field| frame.column_index(&field.key_name()))
        .collect();

    let mut groups: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for (idx, row) in frame.rows.iter().enumerate() {
        let key = group_idx.iter().map(|&i| row[i].to_string()).collect();
        groups.entry(key).or_default().push(idx);
    }

    let mut bases: Vec<Option<f64>> = vec![None; frame.rows.len()];
    for members in groups.values_mut() {
        match &growth.method {
            GrowthMethod::Period => {
                members.sort_by(|&a, &b| frame.rows[a][time_idx].sort_cmp(&frame.rows[b][time_idx]));
                for pair in members.windows(2) {
                    bases[pair[1]] = frame.rows[pair[0]][measure_idx].as_f64();
                }
            }
            GrowthMethod::Fixed(member) => {
                let base = members
                    .iter()
                    .find(|&&idx| frame.rows[idx][time_idx].to_string() == *member)
                    .and_then(|&idx| frame.rows[idx][measure_idx].as_f64());
                for &idx in members.iter() {
                    bases[idx] = base;
                }
            }
        }
    }

    for (row, base) in frame.rows.iter_mut().zip(bases) {
        let current = row[measure_idx].as_f64();
        let (value, ratio) = match (current, base) {
            (Some(current), Some(base)) => {
                let delta = current - base;
                let ratio = if base == 0.0 {
                    Value::Null
                } else {
                    Value::Float(delta / base)
                };
                (Value::Float(delta), ratio)
            }
            _ => (Value::Null, Value::Null),
        };
        row.push(value);
        row.push(ratio);
    }

    frame.columns.push(growth_value_name(&growth.measure));
    frame.columns.push(growth_name(&growth.measure));
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::{schema, trade_query};
    use crate::semantic_model::Schema;
    use rstest::*;

    fn frame() -> DataFrame {
        let row = |flow: i64, year: i64, value: f64| {
            vec![Value::Int(flow), Value::Int(year), Value::Float(value)]
        };
        DataFrame {
            columns: vec!["Flow ID".into(), "Year".into(), "Trade Value".into()],
            rows: vec![
                row(1, 2021, 150.0),
                row(1, 2020, 100.0),
                row(2, 2020, 0.0),
                row(2, 2021, 30.0),
            ],
        }
    }

    fn growth(method: GrowthMethod) -> Growth {
        Growth {
            time_level: "Year".into(),
            measure: "Trade Value".into(),
            method,
        }
    }

    fn column(frame: &DataFrame, name: &str) -> Vec<Value> {
        let idx = frame.column_index(name).unwrap();
        frame.rows.iter().map(|row| row[idx].clone()).collect()
    }

    #[rstest]
    fn test_period_growth(schema: Schema) {
        let query = trade_query(&schema, &["Flow", "Year"], &["Trade Value"]);
        let result = apply_growth(&query, &growth(GrowthMethod::Period), frame()).unwrap();

        assert_eq!(
            column(&result, "Trade Value Growth Value"),
            vec![Value::Float(50.0), Value::Null, Value::Null, Value::Float(30.0)]
        );
        assert_eq!(
            column(&result, "Trade Value Growth"),
            vec![Value::Float(0.5), Value::Null, Value::Null, Value::Null]
        );
    }

    #[rstest]
    fn test_fixed_growth(schema: Schema) {
        let query = trade_query(&schema, &["Flow", "Year"], &["Trade Value"]);
        let method = GrowthMethod::Fixed("2021".into());
        let result = apply_growth(&query, &growth(method), frame()).unwrap();

        assert_eq!(
            column(&result, "Trade Value Growth Value"),
            vec![
                Value::Float(0.0),
                Value::Float(-50.0),
                Value::Float(-30.0),
                Value::Float(0.0)
            ]
        );
        assert_eq!(column(&result, "Trade Value Growth")[1], Value::Float(-50.0 / 150.0));
    }

    #[rstest]
    fn test_growth_needs_time_drilldown(schema: Schema) {
        let query = trade_query(&schema, &["Flow"], &["Trade Value"]);
        assert!(matches!(
            apply_growth(&query, &growth(GrowthMethod::Period), frame()),
            Err(CompileError::UnknownField(_))
        ));
    }

    #[rstest]
    #[case::selected("Trade Value", true, true)]
    #[case::not_in_query("Quantity", true, false)]
    #[case::dropped_pass_through("Trade Value", false, false)]
    #[case::submeasure_of_pass_through("Trade Value MOE", false, true)]
    fn test_validate_growth_measure(
        schema: Schema,
        #[case] measure: &str,
        #[case] is_measure: bool,
        #[case] valid: bool,
    ) {
        let mut query = trade_query(&schema, &["Year"], &["Trade Value"]);
        query.fields_quantitative[0].is_measure = is_measure;
        let growth = Growth {
            measure: measure.into(),
            ..growth(GrowthMethod::Period)
        };
        assert_eq!(validate_growth(&query, &growth).is_ok(), valid);
    }
}
