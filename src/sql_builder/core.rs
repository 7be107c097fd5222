//! The core query: one row per fact row, with the raw values to aggregate and
//! the level columns to group by. Cuts and the time restriction are applied
//! here, before any aggregation happens.

use crate::data_store::Value;
use crate::query::{sanitize, DataQuery, HierarchyField, LevelField, Order, TimeRestriction};
use crate::semantic_model::{Aggregator, AnyMeasure};
use crate::sql_builder::aggregate::weight_alias;
use crate::sql_builder::criterion::filter_criterion;
use crate::sql_builder::plan::{BinaryOp, Expr, Join, JoinKind, OrderBy, Relation, Select, SelectItem};
use crate::sql_builder::{required_measures, table_relation, CompileError, ParamManager};
use std::collections::BTreeSet;

pub const FACT_ALIAS: &str = "tfact";
pub const CORE_ALIAS: &str = "tcore";
const TIME_COLUMN: &str = "time_restr";

pub fn dim_alias(hiefi: &HierarchyField) -> String {
    format!("ft_{}", hiefi.alias())
}

/// Alias of the core column holding a measure's raw values
pub fn measure_alias(key_column: &str) -> String {
    format!("ms_{}", sanitize(key_column))
}

/// Alias of the core column holding a level column
pub fn level_alias(column_alias: &str) -> String {
    format!("lv_{}", column_alias)
}

pub fn core_select(query: &DataQuery, params: &mut ParamManager) -> Result<Select, CompileError> {
    let mut select = Select::new(table_relation(&query.cube.table, Some(FACT_ALIAS), params));

    // measures sharing a fact column read it once
    let mut seen = BTreeSet::new();
    for measure in required_measures(query) {
        if let AnyMeasure::Measure(measure) = measure {
            let alias = measure_alias(&measure.key_column);
            if seen.insert(alias.clone()) {
                select.projection.push(SelectItem::aliased(
                    Expr::column(FACT_ALIAS, &measure.key_column),
                    &alias,
                ));
            }
            if let Aggregator::WeightedAverage { weight_column } = &measure.aggregator {
                let alias = weight_alias(weight_column);
                if seen.insert(alias.clone()) {
                    select.projection.push(SelectItem::aliased(
                        Expr::column(FACT_ALIAS, weight_column),
                        &alias,
                    ));
                }
            }
        }
    }

    for hiefi in &query.fields_qualitative {
        apply_hierarchy(query, hiefi, &mut select, params)?;
    }

    if let Some((hiefi, lvlfi, restriction)) = find_time_restriction(query) {
        apply_time_restriction(hiefi, lvlfi, restriction, &mut select);
    }

    Ok(select)
}

fn apply_hierarchy(
    query: &DataQuery,
    hiefi: &HierarchyField,
    select: &mut Select,
    params: &mut ParamManager,
) -> Result<(), CompileError> {
    let dim_alias = dim_alias(hiefi);
    let table_alias = if hiefi.table().is_none() {
        FACT_ALIAS
    } else {
        dim_alias.as_str()
    };
    let fkey = Expr::column(FACT_ALIAS, hiefi.foreign_key());
    let mut columns: Vec<(String, Expr)> = Vec::new();

    for lvlfi in &hiefi.levels {
        let include = cast_members(lvlfi, &lvlfi.members_include)?;
        let exclude = cast_members(lvlfi, &lvlfi.members_exclude)?;

        let mut lvl_columns: Vec<(String, Expr)> = lvlfi
            .iter_columns(&query.locale)
            .into_iter()
            .map(|column| {
                (
                    level_alias(&column.alias),
                    Expr::column(table_alias, &column.column),
                )
            })
            .collect();

        match hiefi.table() {
            None => {
                let key = Expr::column(FACT_ALIAS, &lvlfi.level.key_column);
                push_member_filters(&mut select.selection, key, include, exclude);
            }
            Some(_) if lvlfi.level.key_column == hiefi.primary_key() => {
                // the fact table already holds the key, read it from there
                if let Some(first) = lvl_columns.first_mut() {
                    first.1 = fkey.clone();
                }
                push_member_filters(&mut select.selection, fkey.clone(), include, exclude);
            }
            Some(table) if lvlfi.is_cut() => {
                let mut subquery = Select::new(table_relation(table, None, params));
                subquery.projection.push(SelectItem::Expr {
                    expr: Expr::bare(hiefi.primary_key()),
                    alias: None,
                });
                let key = Expr::bare(&lvlfi.level.key_column);
                push_member_filters(&mut subquery.selection, key, include, exclude);
                select
                    .selection
                    .push(fkey.clone().in_subquery(subquery, false));
            }
            Some(_) => {}
        }

        if lvlfi.is_drilldown {
            columns.extend(lvl_columns);
        }
    }

    columns.sort_by(|a, b| a.0.cmp(&b.0));
    columns.dedup_by(|a, b| a.0 == b.0);

    if let Some(table) = hiefi.table() {
        let reads_dim = columns.iter().any(
            |(_, expr)| matches!(expr, Expr::Column { table: Some(name), .. } if *name == dim_alias),
        );
        let restricts_dim = hiefi.levels.iter().any(|lvlfi| {
            lvlfi.time_restriction.is_some() && lvlfi.level.key_column != hiefi.primary_key()
        });

        if reads_dim || restricts_dim {
            select.joins.push(Join {
                kind: JoinKind::Left,
                relation: table_relation(table, Some(&dim_alias), params),
                on: Expr::binary(
                    Expr::column(&dim_alias, hiefi.primary_key()),
                    BinaryOp::Eq,
                    fkey.clone(),
                ),
            });
        }

        // a shared fact table has rows for members of other levels too
        if query.cube.subset_table {
            let mut subquery = Select::new(table_relation(table, None, params));
            subquery.distinct = true;
            subquery.projection.push(SelectItem::Expr {
                expr: Expr::bare(hiefi.primary_key()),
                alias: None,
            });
            select.selection.push(fkey.in_subquery(subquery, false));
        }
    }

    select
        .projection
        .extend(columns.into_iter().map(|(alias, expr)| SelectItem::aliased(expr, &alias)));

    Ok(())
}

/// Casts member keys through the level type, sorted so the output is stable
fn cast_members(lvlfi: &LevelField, members: &[String]) -> Result<Vec<Value>, CompileError> {
    let mut values = members
        .iter()
        .map(|member| {
            lvlfi
                .level
                .key_type
                .cast(member)
                .ok_or_else(|| CompileError::InvalidMember {
                    level: lvlfi.level.name.clone(),
                    member: member.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    values.sort_by(|a, b| a.sort_cmp(b));
    values.dedup();
    Ok(values)
}

fn push_member_filters(selection: &mut Vec<Expr>, field: Expr, include: Vec<Value>, exclude: Vec<Value>) {
    if !include.is_empty() {
        selection.push(field.clone().in_list(include, false));
    }
    if !exclude.is_empty() {
        selection.push(field.in_list(exclude, true));
    }
}

/// Only the first time restriction in the query is applied
fn find_time_restriction(
    query: &DataQuery,
) -> Option<(&HierarchyField, &LevelField, &TimeRestriction)> {
    query.fields_qualitative.iter().find_map(|hiefi| {
        hiefi.levels.iter().find_map(|lvlfi| {
            lvlfi
                .time_restriction
                .as_ref()
                .map(|restriction| (hiefi, lvlfi, restriction))
        })
    })
}

fn apply_time_restriction(
    hiefi: &HierarchyField,
    lvlfi: &LevelField,
    restriction: &TimeRestriction,
    select: &mut Select,
) {
    let field_time = match hiefi.table() {
        None => Expr::column(FACT_ALIAS, &lvlfi.level.key_column),
        Some(_) if lvlfi.level.key_column == hiefi.primary_key() => {
            Expr::column(FACT_ALIAS, hiefi.foreign_key())
        }
        Some(_) => Expr::column(&dim_alias(hiefi), &lvlfi.level.key_column),
    };

    let (order, amount) = match restriction {
        TimeRestriction::Expr(condition) => {
            select.selection.push(filter_criterion(field_time, condition));
            return;
        }
        TimeRestriction::Oldest(amount) => (Order::Asc, *amount),
        TimeRestriction::Newest(amount) => (Order::Desc, *amount),
    };

    // the distinct members available after the cuts, in time order
    let mut available = select.clone();
    available.projection = vec![SelectItem::aliased(field_time.clone(), TIME_COLUMN)];

    let mut members = Select::new(Relation::derived(available, "ttime"));
    members.distinct = true;
    members.projection.push(SelectItem::Expr {
        expr: Expr::bare(TIME_COLUMN),
        alias: None,
    });
    members.order_by.push(OrderBy::new(Expr::bare(TIME_COLUMN), order));
    members.limit = Some(amount);

    select.selection.push(field_time.in_subquery(members, false));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_filter_condition;
    use crate::query::tests::{schema, trade_query};
    use crate::semantic_model::Schema;
    use rstest::*;

    fn compile_core(query: &DataQuery) -> (String, ParamManager) {
        let mut params = ParamManager::new();
        let select = core_select(query, &mut params).unwrap();
        (select.to_string(), params)
    }

    #[rstest]
    fn test_measure_columns_deduplicated(schema: Schema) {
        let query = trade_query(&schema, &[], &["Trade Value", "Records", "Avg Price", "Median Price"]);
        let (sql, _) = compile_core(&query);
        assert_eq!(sql.matches(r#"AS "ms_trade_value""#).count(), 1);
        assert_eq!(sql.matches(r#"AS "ms_price""#).count(), 1);
        assert!(sql.contains(r#""tfact"."quantity" AS "mw_quantity""#));
        // submeasure of Trade Value
        assert!(sql.contains(r#""tfact"."trade_value_moe" AS "ms_trade_value_moe""#));
    }

    #[rstest]
    fn test_fact_hierarchy_cuts(schema: Schema) {
        let cube = schema.get_cube("trade").unwrap();
        let mut query = trade_query(&schema, &["Year"], &["Trade Value"]);
        let (hierarchy, level) = cube.get_level("Year").unwrap();
        query.add_cut(hierarchy, level, &["2021", "2020"], &["2019"]);

        let (sql, _) = compile_core(&query);
        assert!(sql.contains(r#""tfact"."year" IN (2020, 2021)"#));
        assert!(sql.contains(r#""tfact"."year" NOT IN (2019)"#));
        assert!(sql.contains(r#""tfact"."year" AS "lv_year""#));
        assert!(!sql.contains("JOIN"));
    }

    #[rstest]
    fn test_primary_key_cut_uses_foreign_key(schema: Schema) {
        let cube = schema.get_cube("trade").unwrap();
        let mut query = trade_query(&schema, &[], &["Trade Value"]);
        let (hierarchy, level) = cube.get_level("Country").unwrap();
        query.add_cut(hierarchy, level, &["mex"], &[]);

        let (sql, _) = compile_core(&query);
        assert!(sql.contains(r#""tfact"."country_id" IN ('mex')"#));
        assert!(!sql.contains("JOIN"));
    }

    #[rstest]
    fn test_parent_level_cut_uses_subquery(schema: Schema) {
        let cube = schema.get_cube("trade").unwrap();
        let mut query = trade_query(&schema, &["Country"], &["Trade Value"]);
        let (hierarchy, level) = cube.get_level("Continent").unwrap();
        query.add_cut(hierarchy, level, &[], &["na"]);

        let (sql, _) = compile_core(&query);
        assert!(sql.contains(
            r#""tfact"."country_id" IN (SELECT "country_id" FROM "dim_geo" WHERE "continent_id" NOT IN ('na'))"#
        ));
        assert!(sql.contains(
            r#"LEFT JOIN "dim_geo" AS "ft_geography" ON "ft_geography"."country_id" = "tfact"."country_id""#
        ));
        // the deepest key comes from the fact table, the caption from the dimension
        assert!(sql.contains(r#""tfact"."country_id" AS "lv_country""#));
        assert!(sql.contains(r#""ft_geography"."country_name" AS "lv_country_caption""#));
    }

    #[rstest]
    fn test_empty_cut_sets_add_no_predicate(schema: Schema) {
        let cube = schema.get_cube("trade").unwrap();
        let plain = trade_query(&schema, &["Year"], &["Trade Value"]);
        let mut cut = plain.clone();
        let (hierarchy, level) = cube.get_level("Continent").unwrap();
        cut.add_cut(hierarchy, level, &[], &[]);

        let (plain_sql, _) = compile_core(&plain);
        let (cut_sql, _) = compile_core(&cut);
        assert_eq!(plain_sql, cut_sql);
        assert!(!cut_sql.contains("WHERE"));
    }

    #[rstest]
    fn test_invalid_member(schema: Schema) {
        let cube = schema.get_cube("trade").unwrap();
        let mut query = trade_query(&schema, &["Year"], &["Trade Value"]);
        let (hierarchy, level) = cube.get_level("Year").unwrap();
        query.add_cut(hierarchy, level, &["last year"], &[]);

        let mut params = ParamManager::new();
        assert!(matches!(
            core_select(&query, &mut params),
            Err(CompileError::InvalidMember { level, member }) if level == "Year" && member == "last year"
        ));
    }

    #[rstest]
    fn test_subset_table(schema: Schema) {
        let mut query = trade_query(&schema, &["Section"], &["Trade Value"]);
        query.cube.subset_table = true;

        let (sql, _) = compile_core(&query);
        assert!(sql.contains(
            r#""tfact"."product_id" IN (SELECT DISTINCT "product_id" FROM "dim_product")"#
        ));
    }

    #[rstest]
    #[case::oldest(TimeRestriction::Oldest(1), "ASC LIMIT 1")]
    #[case::newest(TimeRestriction::Newest(3), "DESC LIMIT 3")]
    fn test_time_restriction_amount(
        schema: Schema,
        #[case] restriction: TimeRestriction,
        #[case] tail: &str,
    ) {
        let mut query = trade_query(&schema, &["Year"], &["Trade Value"]);
        query.fields_qualitative[0].levels[0].time_restriction = Some(restriction);

        let (sql, _) = compile_core(&query);
        let expected = format!(
            r#"WHERE "tfact"."year" IN (SELECT DISTINCT "time_restr" FROM (SELECT "tfact"."year" AS "time_restr" FROM "fact_trade" AS "tfact") AS "ttime" ORDER BY "time_restr" {})"#,
            tail
        );
        assert!(sql.contains(&expected), "{}", sql);
    }

    #[rstest]
    fn test_time_restriction_expression(schema: Schema) {
        let mut query = trade_query(&schema, &["Year"], &["Trade Value"]);
        query.fields_qualitative[0].levels[0].time_restriction = Some(TimeRestriction::Expr(
            parse_filter_condition("gte.2020").unwrap(),
        ));

        let (sql, _) = compile_core(&query);
        assert!(sql.ends_with(r#"WHERE "tfact"."year" >= 2020"#), "{}", sql);
    }

    #[rstest]
    fn test_inline_table_registered(schema: Schema) {
        let query = trade_query(&schema, &["Flow"], &["Trade Value"]);
        let (sql, params) = compile_core(&query);
        assert!(sql.contains(r#"LEFT JOIN "flows" AS "ft_flow" ON "ft_flow"."flow_id" = "tfact"."flow""#));
        assert_eq!(params.tables().len(), 1);
        assert_eq!(params.tables()[0].name, "flows");
    }
}
