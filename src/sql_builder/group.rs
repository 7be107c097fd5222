//! The group query: aggregates the core query by the drilldown levels, then
//! applies measure filters, ranking, sorting, top-K and pagination.

use crate::data_store::Value;
use crate::query::{DataQuery, LevelField, Order, Sorting};
use crate::semantic_model::AnyMeasure;
use crate::sql_builder::aggregate::aggregate;
use crate::sql_builder::core::{level_alias, measure_alias, CORE_ALIAS};
use crate::sql_builder::criterion::filter_criterion;
use crate::sql_builder::formula::transform_formula;
use crate::sql_builder::plan::{BinaryOp, Expr, OrderBy, Relation, Select, SelectItem};
use crate::sql_builder::{expand_measures, lookup_measure, CompileError};
use log::warn;
use std::collections::HashMap;

const GROUP_ALIAS: &str = "tgroup";
const WINDOW_ALIAS: &str = "twindow";
const TOPK_ALIAS: &str = "ttopk";
const MEASURES_CTE: &str = "mq";

pub fn group_select(query: &DataQuery, core: Select) -> Result<Select, CompileError> {
    let mut select = Select::new(Relation::derived(core, CORE_ALIAS));
    let drilldowns: Vec<&LevelField> = query.drilldowns().collect();

    // level columns: only the deepest key of each hierarchy is grouped, the
    // rest depend on it
    let mut level_exprs: HashMap<String, Expr> = HashMap::new();
    for hiefi in &query.fields_qualitative {
        let deepest = hiefi.deepest_level().map(|lvlfi| lvlfi.name().to_string());
        for lvlfi in hiefi.drilldown_levels() {
            for (idx, column) in lvlfi.iter_columns(&query.locale).into_iter().enumerate() {
                let field = Expr::column(CORE_ALIAS, &level_alias(&column.alias));
                let expr = if idx == 0 && deepest.as_deref() == Some(lvlfi.name()) {
                    select.group_by.push(field.clone());
                    field
                } else {
                    Expr::func("ANY_VALUE", vec![field])
                };
                level_exprs.insert(column.column.clone(), expr.clone());
                level_exprs.insert(column.name.clone(), expr.clone());
                select
                    .projection
                    .push(SelectItem::aliased(expr, &column.name));
            }
        }
    }

    let measures = expand_measures(query);
    let mut resolver = MeasureResolver::new(query, &level_exprs);
    let mut aggregates: HashMap<&str, Expr> = HashMap::new();
    for measure in &measures {
        let expr = resolver.resolve(measure.name())?;
        select
            .projection
            .push(SelectItem::aliased(expr.clone(), measure.name()));
        aggregates.insert(measure.name(), expr);
    }

    // window functions can't nest nor appear in HAVING: when a ranked or
    // filtered measure holds one, ranks move to an outer query over the
    // output columns, after every filter
    let outer_pass = query.fields_quantitative.iter().any(|msrfi| {
        (msrfi.with_ranking.is_some() || msrfi.constraint.is_some())
            && aggregates
                .get(msrfi.name())
                .map_or(false, Expr::contains_window)
    });
    let mut outer_ranks = Vec::new();
    let mut outer_filters = Vec::new();

    for msrfi in &query.fields_quantitative {
        let Some(expr) = aggregates.get(msrfi.name()) else {
            continue;
        };
        let windowed = expr.contains_window();
        let output = Expr::bare(msrfi.name());

        if let Some(order) = msrfi.with_ranking {
            let target = if outer_pass { output.clone() } else { expr.clone() };
            let rank = SelectItem::aliased(
                Expr::Window {
                    func: Box::new(Expr::func("RANK", vec![])),
                    partition_by: vec![],
                    order_by: vec![OrderBy::new(target, order)],
                },
                &msrfi.ranking_name(),
            );
            if outer_pass {
                outer_ranks.push(rank);
            } else {
                select.projection.push(rank);
            }
        }
        if let Some(constraint) = &msrfi.constraint {
            if windowed {
                outer_filters.push(filter_criterion(output, constraint));
            } else {
                select.having.push(filter_criterion(expr.clone(), constraint));
            }
        }
    }

    if outer_pass {
        select = select.wrap(WINDOW_ALIAS);
        select.projection.extend(outer_ranks);
        select.selection.extend(outer_filters);
    }

    let user_sort = query.sorting.as_ref().and_then(|sorting| {
        let resolved = resolve_sorting(sorting, &drilldowns, &measures, &query.locale);
        if resolved.is_none() {
            warn!("Sort field '{}' is not part of the query, ignored", sorting.field);
        }
        resolved
    });

    // default ordering by the deepest key of each hierarchy; with top-K only
    // the partition levels, or the rank order would be broken
    let tie_break = query
        .fields_qualitative
        .iter()
        .filter_map(|hiefi| hiefi.deepest_level())
        .filter(|lvlfi| {
            query
                .topk
                .as_ref()
                .map_or(true, |topk| topk.levels.iter().any(|name| name == lvlfi.name()))
        })
        .map(|lvlfi| OrderBy::new(Expr::bare(&lvlfi.key_name()), Order::Asc));

    let mut order_by: Vec<OrderBy> = user_sort.into_iter().chain(tie_break).collect();
    let limit = query.pagination.limit;
    let offset = query.pagination.offset;

    let mut output = if let Some(topk) = &query.topk {
        if !aggregates.contains_key(topk.measure.as_str()) {
            return Err(CompileError::UnknownField(topk.measure.clone()));
        }
        let partition_by = topk
            .levels
            .iter()
            .map(|name| {
                drilldowns
                    .iter()
                    .find(|lvlfi| lvlfi.name() == name)
                    .map(|lvlfi| Expr::bare(&lvlfi.key_name()))
                    .ok_or_else(|| CompileError::UnknownField(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let top_name = topk_name(&topk.measure);

        let mut ranked = select.wrap(GROUP_ALIAS);
        ranked.projection.push(SelectItem::aliased(
            Expr::Window {
                func: Box::new(Expr::func("ROW_NUMBER", vec![])),
                partition_by,
                order_by: vec![OrderBy::new(Expr::bare(&topk.measure), topk.order)],
            },
            &top_name,
        ));

        let mut outer = ranked.wrap(TOPK_ALIAS);
        outer.selection.push(Expr::binary(
            Expr::bare(&top_name),
            BinaryOp::LtEq,
            Expr::Value(Value::Int(topk.amount as i64)),
        ));
        order_by.push(OrderBy::new(Expr::bare(&top_name), Order::Asc));
        outer.order_by = order_by;
        outer.paginate(limit, offset);
        outer
    } else {
        select.order_by = order_by;
        select.paginate(limit, offset);
        select
    };

    if query.fields_quantitative.iter().any(|msrfi| !msrfi.is_measure) {
        output = select_requested(query, output);
    }

    Ok(output)
}

pub fn topk_name(measure: &str) -> String {
    format!("Top {}", measure)
}

/// Inlines measures into expressions over the core columns. Calculated
/// measures expand their references recursively, to measures anywhere in the
/// cube and then to the drilldown level columns.
struct MeasureResolver<'a> {
    query: &'a DataQuery,
    level_exprs: &'a HashMap<String, Expr>,
    resolved: HashMap<String, Expr>,
    pending: Vec<String>,
}

impl<'a> MeasureResolver<'a> {
    fn new(query: &'a DataQuery, level_exprs: &'a HashMap<String, Expr>) -> Self {
        MeasureResolver {
            query,
            level_exprs,
            resolved: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn resolve(&mut self, name: &str) -> Result<Expr, CompileError> {
        if let Some(expr) = self.resolved.get(name) {
            return Ok(expr.clone());
        }

        let expr = match lookup_measure(self.query, name) {
            Some(AnyMeasure::Measure(item)) => {
                let field = Expr::column(CORE_ALIAS, &measure_alias(&item.key_column));
                aggregate(&item.aggregator, field, CORE_ALIAS)?
            }
            Some(AnyMeasure::Calculated(item)) => {
                if self.pending.iter().any(|pending| pending == name) {
                    return Err(CompileError::CircularMeasure(name.to_string()));
                }
                self.pending.push(name.to_string());
                let expr = transform_formula(&item.formula, &mut |reference: &str| {
                    self.resolve(reference)
                });
                self.pending.pop();
                expr?
            }
            None => {
                return self
                    .level_exprs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CompileError::UnknownField(name.to_string()));
            }
        };

        self.resolved.insert(name.to_string(), expr.clone());
        Ok(expr)
    }
}

/// Resolves the user sort field against the drilldown columns, then against
/// the measures; the first strategy that knows the field wins
fn resolve_sorting(
    sorting: &Sorting,
    drilldowns: &[&LevelField],
    measures: &[&AnyMeasure],
    locale: &str,
) -> Option<OrderBy> {
    let by_level = |field: &str| {
        drilldowns
            .iter()
            .flat_map(|lvlfi| lvlfi.iter_columns(locale))
            .find(|column| column.name == field)
            .map(|column| Expr::bare(&column.name))
    };
    let by_measure = |field: &str| {
        measures
            .iter()
            .find(|measure| measure.name() == field)
            .map(|measure| Expr::bare(measure.name()))
    };
    let strategies: [&dyn Fn(&str) -> Option<Expr>; 2] = [&by_level, &by_measure];

    strategies
        .iter()
        .find_map(|strategy| strategy(&sorting.field))
        .map(|expr| OrderBy::new(expr, sorting.order))
}

/// Wraps the query to return only the requested measures, dropping the ones
/// used just as inputs for others
fn select_requested(query: &DataQuery, inner: Select) -> Select {
    let mut columns: Vec<String> = query
        .drilldowns()
        .flat_map(|lvlfi| lvlfi.iter_columns(&query.locale))
        .map(|column| column.name)
        .collect();

    for msrfi in &query.fields_quantitative {
        if msrfi.is_measure {
            columns.extend(msrfi.measure.and_submeasures().into_iter().map(String::from));
            if msrfi.with_ranking.is_some() {
                columns.push(msrfi.ranking_name());
            }
        } else {
            columns.extend(
                msrfi
                    .measure
                    .submeasures()
                    .iter()
                    .flat_map(|item| item.and_submeasures())
                    .map(String::from),
            );
        }
    }
    if let Some(topk) = &query.topk {
        columns.push(topk_name(&topk.measure));
    }

    let mut unique = Vec::with_capacity(columns.len());
    for column in columns {
        if !unique.contains(&column) {
            unique.push(column);
        }
    }

    let mut inner = inner;
    // ordering moves out when every sort column survives the wrap
    let movable = inner.order_by.iter().all(|item| {
        matches!(&item.expr, Expr::Column { table: None, name } if unique.contains(name))
    });

    let mut outer = Select::new(Relation::Table {
        name: MEASURES_CTE.to_string(),
        schema: None,
        alias: None,
    });
    outer.projection = unique
        .iter()
        .map(|name| SelectItem::Expr {
            expr: Expr::bare(name),
            alias: None,
        })
        .collect();

    if movable {
        outer.order_by = std::mem::take(&mut inner.order_by);
        outer.limit = inner.limit.take();
        outer.offset = inner.offset.take();
    }
    outer.ctes.push((MEASURES_CTE.to_string(), inner));
    outer
}
