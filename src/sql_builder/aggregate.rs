use crate::query::sanitize;
use crate::semantic_model::Aggregator;
use crate::sql_builder::plan::{BinaryOp, Expr};
use crate::sql_builder::CompileError;

/// Alias of the core column carrying the weight of a weighted average
pub fn weight_alias(weight_column: &str) -> String {
    format!("mw_{}", sanitize(weight_column))
}

/// Aggregate expression for a measure whose raw values are in `field`.
///
/// Parameters are checked here, so an out of range value fails the
/// compilation instead of the execution.
pub fn aggregate(aggregator: &Aggregator, field: Expr, core_alias: &str) -> Result<Expr, CompileError> {
    let expr = match aggregator {
        Aggregator::Sum => Expr::func("SUM", vec![field]),
        Aggregator::Count => Expr::func("COUNT", vec![field]),
        Aggregator::Average => Expr::func("AVG", vec![field]),
        Aggregator::Max => Expr::func("MAX", vec![field]),
        Aggregator::Min => Expr::func("MIN", vec![field]),

        Aggregator::Mode => Expr::WithinGroup {
            name: "MODE".to_string(),
            args: vec![],
            order_by: Box::new(field),
        },

        Aggregator::WeightedAverage { weight_column } => {
            let weight = Expr::column(core_alias, &weight_alias(weight_column));
            Expr::binary(
                Expr::func(
                    "SUM",
                    vec![Expr::binary(field, BinaryOp::Multiply, weight.clone())],
                ),
                BinaryOp::Divide,
                Expr::func(
                    "NULLIF",
                    vec![Expr::func("SUM", vec![weight]), Expr::number(0.0)],
                ),
            )
        }

        Aggregator::CalculatedMoe { critical_value } => {
            if !(critical_value.is_finite() && *critical_value > 0.0) {
                return Err(CompileError::InvalidAggregatorParams {
                    aggregator: aggregator.name().to_string(),
                    reason: format!("critical_value must be positive, got {}", critical_value),
                });
            }
            let scaled = Expr::binary(field, BinaryOp::Divide, Expr::number(*critical_value));
            Expr::binary(
                Expr::func(
                    "SQRT",
                    vec![Expr::func(
                        "SUM",
                        vec![Expr::func("POWER", vec![scaled, Expr::number(2.0)])],
                    )],
                ),
                BinaryOp::Multiply,
                Expr::number(*critical_value),
            )
        }

        Aggregator::Median => percentile(0.5, field),

        Aggregator::Quantile { quantile_level } => {
            if !(*quantile_level > 0.0 && *quantile_level < 1.0) {
                return Err(CompileError::InvalidAggregatorParams {
                    aggregator: aggregator.name().to_string(),
                    reason: format!(
                        "quantile_level must be between 0 and 1 exclusive, got {}",
                        quantile_level
                    ),
                });
            }
            percentile(*quantile_level, field)
        }

        Aggregator::DistinctCount => Expr::Function {
            name: "COUNT".to_string(),
            args: vec![field],
            distinct: true,
        },
    };
    Ok(expr)
}

fn percentile(level: f64, field: Expr) -> Expr {
    Expr::WithinGroup {
        name: "PERCENTILE_CONT".to_string(),
        args: vec![Expr::number(level)],
        order_by: Box::new(field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn field() -> Expr {
        Expr::column("tcore", "ms_price")
    }

    #[rstest]
    #[case::sum(Aggregator::Sum, r#"SUM("tcore"."ms_price")"#)]
    #[case::average(Aggregator::Average, r#"AVG("tcore"."ms_price")"#)]
    #[case::mode(Aggregator::Mode, r#"MODE() WITHIN GROUP (ORDER BY "tcore"."ms_price")"#)]
    #[case::median(
        Aggregator::Median,
        r#"PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY "tcore"."ms_price")"#
    )]
    #[case::distinct(Aggregator::DistinctCount, r#"COUNT(DISTINCT "tcore"."ms_price")"#)]
    #[case::weighted(
        Aggregator::WeightedAverage { weight_column: "Quantity".into() },
        r#"SUM("tcore"."ms_price" * "tcore"."mw_quantity") / NULLIF(SUM("tcore"."mw_quantity"), 0)"#
    )]
    #[case::moe(
        Aggregator::CalculatedMoe { critical_value: 1.645 },
        r#"SQRT(SUM(POWER("tcore"."ms_price" / 1.645, 2))) * 1.645"#
    )]
    fn test_aggregate(#[case] aggregator: Aggregator, #[case] expected: &str) {
        let expr = aggregate(&aggregator, field(), "tcore").unwrap();
        assert_eq!(expr.to_string(), expected);
    }

    #[rstest]
    #[case::zero(0.0, false)]
    #[case::one(1.0, false)]
    #[case::above(1.5, false)]
    #[case::negative(-0.1, false)]
    #[case::half(0.5, true)]
    #[case::high(0.99, true)]
    fn test_quantile_range(#[case] level: f64, #[case] valid: bool) {
        let aggregator = Aggregator::Quantile { quantile_level: level };
        let result = aggregate(&aggregator, field(), "tcore");
        assert_eq!(result.is_ok(), valid);
        if !valid {
            assert!(matches!(result, Err(CompileError::InvalidAggregatorParams { .. })));
        }
    }

    #[test]
    fn test_moe_needs_positive_critical_value() {
        let aggregator = Aggregator::CalculatedMoe { critical_value: 0.0 };
        assert!(aggregate(&aggregator, field(), "tcore").is_err());
    }
}
