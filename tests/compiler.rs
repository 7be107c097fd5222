use olap_sql::data_store::Value;
use olap_sql::query::{DataQuery, MembersQuery, Order, Pagination, TimeRestriction, TopK};
use olap_sql::semantic_model::{Aggregator, AnyMeasure, LocalSchemaStore, Schema, SchemaStore};
use olap_sql::sql_builder::{CompileError, QueryCompiler};
use rstest::*;

#[fixture]
fn schema() -> Schema {
    LocalSchemaStore::from_json(include_str!("fixtures/schema.json"))
        .unwrap()
        .get_schema()
        .clone()
}

fn query(schema: &Schema, drilldowns: &[&str], measures: &[&str]) -> DataQuery {
    let cube = schema.get_cube("trade").unwrap();
    let mut query = DataQuery::new(cube);
    for name in drilldowns {
        let (hierarchy, level) = cube.get_level(name).unwrap();
        query.add_drilldown(hierarchy, level);
    }
    for name in measures {
        query.add_measure(cube.get_measure(name).unwrap());
    }
    query
}

#[rstest]
#[case::zero(0.0, false)]
#[case::one(1.0, false)]
#[case::above(1.5, false)]
#[case::negative(-0.1, false)]
#[case::half(0.5, true)]
#[case::high(0.99, true)]
fn test_quantile_range(schema: Schema, #[case] level: f64, #[case] valid: bool) {
    let mut query = query(&schema, &["Year"], &["Price P90"]);
    if let AnyMeasure::Measure(measure) = &mut query.fields_quantitative[0].measure {
        measure.aggregator = Aggregator::Quantile {
            quantile_level: level,
        };
    }

    let result = QueryCompiler::default().compile(&query);
    if valid {
        let sql = result.unwrap().sql();
        assert!(sql.contains(&format!("PERCENTILE_CONT({})", level)), "{}", sql);
    } else {
        assert!(matches!(
            result,
            Err(CompileError::InvalidAggregatorParams { .. })
        ));
    }
}

#[rstest]
fn test_compilation_is_deterministic(schema: Schema) {
    let cube = schema.get_cube("trade").unwrap();
    let mut query = query(&schema, &["Continent", "Country", "Flow"], &["Trade Value", "Unit Value"]);
    let (hierarchy, level) = cube.get_level("Section").unwrap();
    query.add_cut(hierarchy, level, &["2", "1", "2"], &[]);
    query.fields_quantitative[0].with_ranking = Some(Order::Desc);
    let before = query.clone();

    let compiler = QueryCompiler::default();
    let first = compiler.compile(&query).unwrap();
    let second = compiler.compile(&query).unwrap();

    assert_eq!(first.sql(), second.sql());
    assert_eq!(first.params, second.params);
    assert_eq!(first.debug_sql(), second.debug_sql());
    assert_eq!(query, before);
}

#[rstest]
fn test_empty_cuts_add_no_predicate(schema: Schema) {
    let cube = schema.get_cube("trade").unwrap();
    let plain = query(&schema, &["Year"], &["Trade Value"]);
    let mut cut = plain.clone();
    for name in ["Continent", "Product", "Year"] {
        let (hierarchy, level) = cube.get_level(name).unwrap();
        cut.add_cut(hierarchy, level, &[], &[]);
    }

    let compiler = QueryCompiler::default();
    let sql = compiler.compile(&cut).unwrap().sql();
    assert_eq!(sql, compiler.compile(&plain).unwrap().sql());
    assert!(!sql.contains("WHERE"));
}

#[rstest]
fn test_topk(schema: Schema) {
    let mut query = query(&schema, &["Year", "Country"], &["Trade Value"]);
    query.topk = Some(TopK {
        levels: vec!["Year".into()],
        measure: "Trade Value".into(),
        order: Order::Desc,
        amount: 3,
    });
    query.pagination = Pagination::new(10, 0);

    let sql = QueryCompiler::default().compile(&query).unwrap().sql();
    assert!(sql.contains(
        r#"ROW_NUMBER() OVER (PARTITION BY "Year" ORDER BY "Trade Value" DESC) AS "Top Trade Value""#
    ), "{}", sql);
    assert!(sql.contains(r#"WHERE "Top Trade Value" <= 3"#), "{}", sql);
    assert!(sql.ends_with("LIMIT 10"), "{}", sql);
}

#[rstest]
#[case::oldest(TimeRestriction::Oldest(1), "ASC")]
#[case::newest(TimeRestriction::Newest(2), "DESC")]
fn test_time_restriction(schema: Schema, #[case] restriction: TimeRestriction, #[case] order: &str) {
    let mut query = query(&schema, &["Year", "Country"], &["Trade Value"]);
    let amount = match restriction {
        TimeRestriction::Oldest(n) | TimeRestriction::Newest(n) => n,
        TimeRestriction::Expr(_) => unreachable!(),
    };
    query.fields_qualitative[0].levels[0].time_restriction = Some(restriction);

    let sql = QueryCompiler::default().compile(&query).unwrap().sql();
    assert!(sql.contains(&format!("{} LIMIT {}", order, amount)), "{}", sql);
    assert!(sql.contains("SELECT DISTINCT"), "{}", sql);
}

#[rstest]
fn test_members_search_is_bound(schema: Schema) {
    let cube = schema.get_cube("trade").unwrap();
    let (hierarchy, level) = cube.get_level("Country").unwrap();
    let mut query = MembersQuery::new(cube, hierarchy, level);
    query.search = Some("'; DROP TABLE fact_trade; --".into());

    let compiled = QueryCompiler::default().compile(&query).unwrap();
    let sql = compiled.sql();
    assert!(sql.contains(r#""tdim"."country_name" ILIKE $1 ESCAPE '\'"#), "{}", sql);
    assert!(sql.contains("RIGHT JOIN"), "{}", sql);
    assert!(!sql.contains("DROP"));
    assert_eq!(
        compiled.params.values(),
        vec![Value::String("%'; DROP TABLE fact_trade; --%".into())]
    );
}

#[rstest]
fn test_invalid_member(schema: Schema) {
    let cube = schema.get_cube("trade").unwrap();
    let mut query = query(&schema, &["Year"], &["Trade Value"]);
    let (hierarchy, level) = cube.get_level("Year").unwrap();
    query.add_cut(hierarchy, level, &["two thousand"], &[]);

    assert!(matches!(
        QueryCompiler::default().compile(&query),
        Err(CompileError::InvalidMember { .. })
    ));
}
