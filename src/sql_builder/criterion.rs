use crate::query::{Comparison, FilterCondition, LogicOperator, NumericConstraint};
use crate::sql_builder::plan::{BinaryOp, Expr};

/// Boolean predicate applying `condition` to `field`
pub fn filter_criterion(field: Expr, condition: &FilterCondition) -> Expr {
    match condition {
        FilterCondition::IsNull => field.is_null(false),
        FilterCondition::IsNotNull => field.is_null(true),
        FilterCondition::Single(constraint) => comparison_criterion(field, constraint),
        FilterCondition::Compound(first, op, second) => {
            let first = comparison_criterion(field.clone(), first);
            let second = comparison_criterion(field, second);
            match op {
                LogicOperator::And => Expr::And(vec![first, second]),
                LogicOperator::Or => Expr::Or(vec![first, second]),
            }
        }
    }
}

fn comparison_criterion(field: Expr, constraint: &NumericConstraint) -> Expr {
    let op = match constraint.comparison {
        Comparison::Gt => BinaryOp::Gt,
        Comparison::Gte => BinaryOp::GtEq,
        Comparison::Lt => BinaryOp::Lt,
        Comparison::Lte => BinaryOp::LtEq,
        Comparison::Eq => BinaryOp::Eq,
        Comparison::Neq => BinaryOp::NotEq,
    };
    Expr::binary(field, op, Expr::number(constraint.scalar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_filter_condition;
    use rstest::*;

    #[rstest]
    #[case::isnull("isnull", r#""m" IS NULL"#)]
    #[case::isnotnull("isnotnull", r#""m" IS NOT NULL"#)]
    #[case::single("gte.10", r#""m" >= 10"#)]
    #[case::and("gt.1.and.lte.2.5", r#"("m" > 1) AND ("m" <= 2.5)"#)]
    #[case::or("lt.-1.or.neq.0", r#"(("m" < -1) OR ("m" <> 0))"#)]
    fn test_filter_criterion(#[case] condition: &str, #[case] expected: &str) {
        let condition = parse_filter_condition(condition).unwrap();
        assert_eq!(filter_criterion(Expr::bare("m"), &condition).to_string(), expected);
    }
}
