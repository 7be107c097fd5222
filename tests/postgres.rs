//! Runs compiled statements against a scratch PostgreSQL database.
//!
//! Ignored by default; with a server reachable through the `POSTGRES_*`
//! variables (localhost:5432 by default) run `cargo test -- --ignored`.
//! Every test owns its fact table and drops it before loading fixture rows.

use olap_sql::config::PostgresConfig;
use olap_sql::data_store::{PostgresConnector, Value};
use olap_sql::query::{DataQuery, Order, TimeRestriction, TopK};
use olap_sql::semantic_model::Schema;
use olap_sql::session::{DataFrame, DummyProvider, Session};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_postgres::NoTls;

const YEARS: [i32; 3] = [2019, 2020, 2021];
const COUNTRIES: [&str; 4] = ["arg", "bra", "chl", "per"];

fn schema(table: &str) -> Schema {
    serde_json::from_value(json!({
        "name": "scratch",
        "cubes": [{
            "name": "trade",
            "table": {"name": table},
            "hierarchies": [
                {
                    "name": "Year",
                    "levels": [{"name": "Year", "key_column": "year", "key_type": "int32", "time_scale": "year"}]
                },
                {
                    "name": "Country",
                    "levels": [{"name": "Country", "key_column": "country", "key_type": "string"}]
                }
            ],
            "measures": [
                {"name": "Trade Value", "key_column": "trade_value", "aggregator": {"type": "sum"}},
                {"name": "Balance", "key_column": "balance", "aggregator": {"type": "sum"}},
                {"name": "Positive Balance", "formula": "CASE WHEN [Balance] > 0 THEN [Balance] ELSE 0 END"}
            ]
        }]
    }))
    .unwrap()
}

/// Recreates `table` with one row per year and country
async fn load_fixture(table: &str) {
    let config = PostgresConfig::new().unwrap();
    let (client, connection) = tokio_postgres::connect(
        &format!(
            "postgres://{}:{}@{}/{}",
            config.user, config.password, config.host, config.dbname
        ),
        NoTls,
    )
    .await
    .unwrap();
    tokio::spawn(connection);

    let mut rows = Vec::new();
    for (y, year) in YEARS.iter().enumerate() {
        for (c, country) in COUNTRIES.iter().enumerate() {
            let trade_value = ((c + 1) * 100 + y * 7) as f64;
            let balance = if c % 2 == 0 { -5.0 } else { 5.0 };
            rows.push(format!("({}, '{}', {}, {})", year, country, trade_value, balance));
        }
    }

    client
        .batch_execute(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (year INT4, country TEXT, trade_value FLOAT8, balance FLOAT8);
             INSERT INTO {table} VALUES {};",
            rows.join(", ")
        ))
        .await
        .unwrap();
}

async fn session() -> Session<PostgresConnector> {
    let config = PostgresConfig::new().unwrap();
    let mut session = Session::new(PostgresConnector::new(config), Arc::new(DummyProvider));
    session.connect().await.unwrap();
    session
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

fn column(frame: &DataFrame, name: &str) -> Vec<Value> {
    let idx = frame.column_index(name).unwrap();
    frame.rows.iter().map(|row| row[idx].clone()).collect()
}

#[test_log::test(tokio::test)]
#[ignore]
async fn test_topk_per_partition() {
    let table = "olap_scratch_topk";
    load_fixture(table).await;
    let schema = schema(table);
    let mut query = query(&schema, &["Year", "Country"], &["Trade Value"]);
    query.topk = Some(TopK {
        levels: vec!["Year".into()],
        measure: "Trade Value".into(),
        order: Order::Desc,
        amount: 2,
    });

    let mut session = session().await;
    let frame = session.fetch_dataframe(&query).await.unwrap().data;
    session.close().await.unwrap();

    let mut partitions: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (year, value) in column(&frame, "Year").iter().zip(column(&frame, "Trade Value")) {
        partitions
            .entry(year.to_string())
            .or_default()
            .push(value.as_f64().unwrap());
    }

    assert_eq!(partitions.len(), YEARS.len());
    for (year, values) in &partitions {
        assert!(values.len() <= 2, "{}: {:?}", year, values);
        assert!(values.windows(2).all(|pair| pair[0] >= pair[1]), "{}: {:?}", year, values);
    }
    // the two largest countries of 2019
    assert_eq!(partitions["2019"], vec![400.0, 300.0]);
}

#[test_log::test(tokio::test)]
#[ignore]
async fn test_oldest_and_newest_are_disjoint() {
    let table = "olap_scratch_time";
    load_fixture(table).await;
    let schema = schema(table);
    let mut session = session().await;

    let mut years = Vec::new();
    for restriction in [TimeRestriction::Oldest(1), TimeRestriction::Newest(1)] {
        let mut query = query(&schema, &["Year"], &["Trade Value"]);
        query.fields_qualitative[0].levels[0].time_restriction = Some(restriction);
        let frame = session.fetch_dataframe(&query).await.unwrap().data;
        let found: BTreeSet<String> = column(&frame, "Year").iter().map(Value::to_string).collect();
        years.push(found);
    }
    session.close().await.unwrap();

    assert_eq!(years[0], BTreeSet::from(["2019".to_string()]));
    assert_eq!(years[1], BTreeSet::from(["2021".to_string()]));
    assert!(years[0].is_disjoint(&years[1]));
}

#[test_log::test(tokio::test)]
#[ignore]
async fn test_case_formula_on_signed_values() {
    let table = "olap_scratch_case";
    load_fixture(table).await;
    let schema = schema(table);
    let mut query = query(&schema, &["Country"], &["Positive Balance"]);
    let (hierarchy, level) = schema.get_cube("trade").unwrap().get_level("Year").unwrap();
    query.add_cut(hierarchy, level, &["2020"], &[]);

    let mut session = session().await;
    let frame = session.fetch_dataframe(&query).await.unwrap().data;
    session.close().await.unwrap();

    let balances: BTreeMap<String, f64> = column(&frame, "Country")
        .iter()
        .map(Value::to_string)
        .zip(column(&frame, "Positive Balance").iter().map(|value| value.as_f64().unwrap()))
        .collect();
    // arg and chl hold -5, bra and per hold 5
    assert_eq!(balances["arg"], 0.0);
    assert_eq!(balances["bra"], 5.0);
    assert_eq!(balances["chl"], 0.0);
    assert_eq!(balances["per"], 5.0);
}
