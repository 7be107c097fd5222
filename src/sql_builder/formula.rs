use crate::data_store::Value;
use crate::semantic_model::{Formula, FormulaLiteral, FormulaOp, UnaryFn};
use crate::sql_builder::plan::{BinaryOp, Expr};
use crate::sql_builder::CompileError;

/// Folds a formula into a SQL expression.
///
/// `resolve` maps each referenced name to the expression behind it, which
/// lets the caller decide between level columns and measure aggregates; its
/// first error stops the fold.
/// Division always happens in floating point and a zero divisor yields NULL.
pub fn transform_formula(
    formula: &Formula,
    resolve: &mut dyn FnMut(&str) -> Result<Expr, CompileError>,
) -> Result<Expr, CompileError> {
    let expr = match formula {
        Formula::Literal(FormulaLiteral::Number(value)) => Expr::number(*value),
        Formula::Literal(FormulaLiteral::Text(value)) => Expr::Value(Value::String(value.clone())),
        Formula::Literal(FormulaLiteral::Null) => Expr::Value(Value::Null),

        Formula::Reference(name) => resolve(name)?,

        Formula::Unary { func, arg } => {
            let arg = transform_formula(arg, resolve)?;
            match func {
                UnaryFn::Negate => Expr::Negate(Box::new(arg)),
                UnaryFn::Sqrt => Expr::func("SQRT", vec![arg]),
                UnaryFn::IsNull => arg.is_null(false),
                UnaryFn::IsNotNull => arg.is_null(true),
                UnaryFn::Total => Expr::Window {
                    func: Box::new(Expr::func("SUM", vec![arg])),
                    partition_by: vec![],
                    order_by: vec![],
                },
            }
        }

        Formula::Binary { op, left, right } => {
            let left = transform_formula(left, resolve)?;
            let right = transform_formula(right, resolve)?;
            let op = match op {
                FormulaOp::Pow => return Ok(Expr::func("POWER", vec![left, right])),
                FormulaOp::Div => {
                    let left = Expr::Cast {
                        expr: Box::new(left),
                        data_type: "DOUBLE PRECISION",
                    };
                    let right = Expr::func("NULLIF", vec![right, Expr::number(0.0)]);
                    return Ok(Expr::binary(left, BinaryOp::Divide, right));
                }
                FormulaOp::Add => BinaryOp::Plus,
                FormulaOp::Sub => BinaryOp::Minus,
                FormulaOp::Mul => BinaryOp::Multiply,
                FormulaOp::Mod => BinaryOp::Modulo,
                FormulaOp::Gt => BinaryOp::Gt,
                FormulaOp::Lt => BinaryOp::Lt,
                FormulaOp::Gte => BinaryOp::GtEq,
                FormulaOp::Lte => BinaryOp::LtEq,
                FormulaOp::Eq => BinaryOp::Eq,
                FormulaOp::Neq => BinaryOp::NotEq,
            };
            Expr::binary(left, op, right)
        }

        Formula::Case {
            branches,
            otherwise,
        } => {
            let mut pairs = Vec::with_capacity(branches.len());
            for (condition, result) in branches {
                pairs.push((
                    transform_formula(condition, resolve)?,
                    transform_formula(result, resolve)?,
                ));
            }
            let otherwise = match otherwise {
                Some(otherwise) => Some(Box::new(transform_formula(otherwise, resolve)?)),
                None => None,
            };
            Expr::Case {
                branches: pairs,
                otherwise,
            }
        }
    };
    Ok(expr)
}
