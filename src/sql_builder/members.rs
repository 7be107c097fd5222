use crate::data_store::Value;
use crate::query::{MembersQuery, Order};
use crate::semantic_model::{Level, MemberType};
use crate::sql_builder::plan::{BinaryOp, Expr, Join, JoinKind, OrderBy, Relation, Select, SelectItem};
use crate::sql_builder::{table_relation, CompileError, ParamManager};

const DIM_ALIAS: &str = "tdim";
const FACT_ALIAS: &str = "tfact";
const DISTINCT_ALIAS: &str = "tfact_distinct";

/// Lists the members of a level, with their ancestors, that appear in the
/// fact table
pub fn members_select(query: &MembersQuery, params: &mut ParamManager) -> Result<Select, CompileError> {
    let hiefi = &query.hiefield;
    let target = hiefi
        .levels
        .last()
        .ok_or_else(|| CompileError::UnknownField(format!("level of {}", hiefi.name())))?;

    let position = hiefi
        .hierarchy
        .levels
        .iter()
        .position(|level| level.name == target.level.name)
        .unwrap_or(0);
    let ancestors = &hiefi.hierarchy.levels[..position];

    let dim_source = hiefi.table().unwrap_or(&query.cube.table);
    let mut select = Select::new(table_relation(dim_source, Some(DIM_ALIAS), params));
    select.distinct = true;

    let mut columns: Vec<(String, String)> = Vec::new();
    for (depth, level) in ancestors.iter().enumerate() {
        columns.push((format!("ancestor.{}.key", depth), level.key_column.clone()));
        if let Some(caption) = level.get_name_column(&query.locale) {
            columns.push((format!("ancestor.{}.caption", depth), caption.to_string()));
        }
    }
    columns.push(("key".to_string(), target.level.key_column.clone()));
    if let Some(caption) = target.level.get_name_column(&query.locale) {
        columns.push(("caption".to_string(), caption.to_string()));
    }

    for (alias, column) in &columns {
        select
            .projection
            .push(SelectItem::aliased(Expr::column(DIM_ALIAS, column), alias));
        select
            .order_by
            .push(OrderBy::new(Expr::bare(alias), Order::Asc));
    }

    // only members with at least one fact row
    let mut observed = Select::new(table_relation(&query.cube.table, Some(FACT_ALIAS), params));
    observed.distinct = true;
    observed.projection.push(SelectItem::Expr {
        expr: Expr::column(FACT_ALIAS, hiefi.foreign_key()),
        alias: None,
    });
    select.joins.push(Join {
        kind: JoinKind::Right,
        relation: Relation::derived(observed, DISTINCT_ALIAS),
        on: Expr::binary(
            Expr::column(DISTINCT_ALIAS, hiefi.foreign_key()),
            BinaryOp::Eq,
            Expr::column(DIM_ALIAS, hiefi.primary_key()),
        ),
    });

    if let Some(search) = &query.search {
        let pattern = params.set_param(Value::String(format!("%{}%", escape_like(search))));
        let criteria: Vec<Expr> = ancestors
            .iter()
            .chain(std::iter::once(&target.level))
            .flat_map(|level| searchable_columns(level, &query.locale))
            .map(|column| Expr::ILike {
                expr: Box::new(Expr::column(DIM_ALIAS, &column)),
                pattern: Box::new(pattern.clone()),
                escape: Some(LIKE_ESCAPE),
            })
            .collect();
        if !criteria.is_empty() {
            select.selection.push(Expr::Or(criteria));
        }
    }

    select.paginate(query.pagination.limit, query.pagination.offset);
    Ok(select)
}

const LIKE_ESCAPE: char = '\\';

/// Makes the wildcards in a search term match themselves
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Key columns holding text, and caption columns
fn searchable_columns(level: &Level, locale: &str) -> Vec<String> {
    let mut columns = Vec::new();
    if level.key_type == MemberType::String {
        columns.push(level.key_column.clone());
    }
    if let Some(caption) = level.get_name_column(locale) {
        columns.push(caption.to_string());
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::schema;
    use crate::query::Pagination;
    use crate::semantic_model::Schema;
    use rstest::*;

    fn members_query(schema: &Schema, level: &str) -> MembersQuery {
        let cube = schema.get_cube("trade").unwrap();
        let (hierarchy, level) = cube.get_level(level).unwrap();
        MembersQuery::new(cube, hierarchy, level)
    }

    #[rstest]
    fn test_members_with_ancestors(schema: Schema) {
        let query = members_query(&schema, "Country");
        let mut params = ParamManager::new();
        let sql = members_select(&query, &mut params).unwrap().to_string();

        assert_eq!(
            sql,
            concat!(
                r#"SELECT DISTINCT "tdim"."continent_id" AS "ancestor.0.key", "tdim"."continent_name" AS "ancestor.0.caption", "#,
                r#""tdim"."country_id" AS "key", "tdim"."country_name" AS "caption" "#,
                r#"FROM "dim_geo" AS "tdim" "#,
                r#"RIGHT JOIN (SELECT DISTINCT "tfact"."country_id" FROM "fact_trade" AS "tfact") AS "tfact_distinct" "#,
                r#"ON "tfact_distinct"."country_id" = "tdim"."country_id" "#,
                r#"ORDER BY "ancestor.0.key" ASC, "ancestor.0.caption" ASC, "key" ASC, "caption" ASC"#
            )
        );
        assert!(params.params().is_empty());
    }

    #[rstest]
    fn test_members_search_is_bound(schema: Schema) {
        let mut query = members_query(&schema, "Product");
        query.search = Some("o'clock".into());
        query.pagination = Pagination::new(10, 0);
        let mut params = ParamManager::new();
        let sql = members_select(&query, &mut params).unwrap().to_string();

        assert!(sql.contains(
            r#"WHERE ("tdim"."section_name" ILIKE $1 ESCAPE '\' OR "tdim"."product_name" ILIKE $1 ESCAPE '\')"#
        ), "{}", sql);
        assert!(sql.ends_with("LIMIT 10"));
        assert!(!sql.contains("o'clock"));
        assert_eq!(params.values(), vec![Value::String("%o'clock%".into())]);
    }

    #[rstest]
    #[case::percent("100%", "%100\\%%")]
    #[case::underscore("a_b", "%a\\_b%")]
    #[case::backslash(r"C:\tmp", r"%C:\\tmp%")]
    #[case::plain("port", "%port%")]
    fn test_search_wildcards_are_literal(schema: Schema, #[case] term: &str, #[case] bound: &str) {
        let mut query = members_query(&schema, "Country");
        query.search = Some(term.into());
        let mut params = ParamManager::new();
        members_select(&query, &mut params).unwrap();
        assert_eq!(params.values(), vec![Value::String(bound.into())]);
    }

    #[rstest]
    fn test_members_of_fact_level(schema: Schema) {
        let query = members_query(&schema, "Year");
        let mut params = ParamManager::new();
        let sql = members_select(&query, &mut params).unwrap().to_string();
        assert!(sql.starts_with(r#"SELECT DISTINCT "tdim"."year" AS "key" FROM "fact_trade" AS "tdim""#));
    }
}
