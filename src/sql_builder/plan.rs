//! Query plan values.
//!
//! Builders accumulate clauses into a [`Select`]; the plan is rendered to
//! SQL text once, when the compiler hands it to the dialect parser.

use crate::data_store::Value;
use crate::query::Order;
use std::fmt;

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Gt,
    Lt,
    GtEq,
    LtEq,
    Eq,
    NotEq,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::GtEq => ">=",
            BinaryOp::LtEq => "<=",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column {
        table: Option<String>,
        name: String,
    },
    Value(Value),
    /// Positional parameter, 1-based
    Placeholder(usize),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Negate(Box<Expr>),
    Cast {
        expr: Box<Expr>,
        data_type: &'static str,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Value>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<Select>,
        negated: bool,
    },
    ILike {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<char>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// Ordered-set aggregate, `NAME(args) WITHIN GROUP (ORDER BY order_by)`
    WithinGroup {
        name: String,
        args: Vec<Expr>,
        order_by: Box<Expr>,
    },
    Window {
        func: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderBy>,
    },
    Case {
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn column(table: &str, name: &str) -> Expr {
        Expr::Column {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    pub fn bare(name: &str) -> Expr {
        Expr::Column {
            table: None,
            name: name.to_string(),
        }
    }

    pub fn number(value: f64) -> Expr {
        Expr::Value(Value::Float(value))
    }

    pub fn func(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.to_string(),
            args,
            distinct: false,
        }
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn is_null(self, negated: bool) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated,
        }
    }

    pub fn in_list(self, list: Vec<Value>, negated: bool) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated,
        }
    }

    pub fn in_subquery(self, subquery: Select, negated: bool) -> Expr {
        Expr::InSubquery {
            expr: Box::new(self),
            subquery: Box::new(subquery),
            negated,
        }
    }

    /// Whether a window function is evaluated at this query level; windows
    /// inside subqueries don't count
    pub fn contains_window(&self) -> bool {
        match self {
            Expr::Window { .. } => true,
            Expr::Column { .. } | Expr::Value(_) | Expr::Placeholder(_) => false,
            Expr::Binary { left, right, .. } => left.contains_window() || right.contains_window(),
            Expr::Negate(expr)
            | Expr::Cast { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::InList { expr, .. }
            | Expr::InSubquery { expr, .. } => expr.contains_window(),
            Expr::ILike { expr, pattern, .. } => expr.contains_window() || pattern.contains_window(),
            Expr::Function { args, .. } => args.iter().any(Expr::contains_window),
            Expr::WithinGroup { args, order_by, .. } => {
                args.iter().any(Expr::contains_window) || order_by.contains_window()
            }
            Expr::Case {
                branches,
                otherwise,
            } => {
                branches
                    .iter()
                    .any(|(condition, result)| condition.contains_window() || result.contains_window())
                    || otherwise.as_ref().map_or(false, |expr| expr.contains_window())
            }
            Expr::And(items) | Expr::Or(items) => items.iter().any(Expr::contains_window),
        }
    }

    fn needs_parens(&self) -> bool {
        matches!(self, Expr::Binary { .. } | Expr::IsNull { .. } | Expr::And(_))
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.needs_parens() {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(true) => "TRUE".to_string(),
        Value::Boolean(false) => "FALSE".to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) if value.is_finite() => value.to_string(),
        Value::Float(_) => "NULL".to_string(),
        Value::String(value) => quote_string(value),
    }
}

fn join<T: fmt::Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { table, name } => match table {
                Some(table) => write!(f, "{}.{}", quote_ident(table), quote_ident(name)),
                None => write!(f, "{}", quote_ident(name)),
            },
            Expr::Value(value) => f.write_str(&render_value(value)),
            Expr::Placeholder(position) => write!(f, "${}", position),
            Expr::Binary { left, op, right } => {
                left.fmt_operand(f)?;
                write!(f, " {} ", op)?;
                right.fmt_operand(f)
            }
            Expr::Negate(expr) => write!(f, "-({})", expr),
            Expr::Cast { expr, data_type } => write!(f, "CAST({} AS {})", expr, data_type),
            Expr::IsNull { expr, negated } => {
                expr.fmt_operand(f)?;
                f.write_str(if *negated { " IS NOT NULL" } else { " IS NULL" })
            }
            Expr::InList {
                list, negated: false, ..
            } if list.is_empty() => f.write_str("FALSE"),
            Expr::InList {
                list, negated: true, ..
            } if list.is_empty() => f.write_str("TRUE"),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let values = list.iter().map(render_value).collect::<Vec<_>>();
                expr.fmt_operand(f)?;
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, " {} ({})", keyword, values.join(", "))
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                expr.fmt_operand(f)?;
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, " {} ({})", keyword, subquery)
            }
            Expr::ILike {
                expr,
                pattern,
                escape,
            } => {
                expr.fmt_operand(f)?;
                write!(f, " ILIKE {}", pattern)?;
                match escape {
                    Some(escape) => write!(f, " ESCAPE {}", quote_string(&escape.to_string())),
                    None => Ok(()),
                }
            }
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                write!(f, "{}({}{})", name, distinct, join(args, ", "))
            }
            Expr::WithinGroup {
                name,
                args,
                order_by,
            } => write!(
                f,
                "{}({}) WITHIN GROUP (ORDER BY {})",
                name,
                join(args, ", "),
                order_by
            ),
            Expr::Window {
                func,
                partition_by,
                order_by,
            } => {
                let mut spec = Vec::new();
                if !partition_by.is_empty() {
                    spec.push(format!("PARTITION BY {}", join(partition_by, ", ")));
                }
                if !order_by.is_empty() {
                    spec.push(format!("ORDER BY {}", join(order_by, ", ")));
                }
                write!(f, "{} OVER ({})", func, spec.join(" "))
            }
            Expr::Case {
                branches,
                otherwise,
            } => {
                f.write_str("CASE")?;
                for (condition, result) in branches {
                    write!(f, " WHEN {} THEN {}", condition, result)?;
                }
                if let Some(otherwise) = otherwise {
                    write!(f, " ELSE {}", otherwise)?;
                }
                f.write_str(" END")
            }
            Expr::And(items) if items.is_empty() => f.write_str("TRUE"),
            Expr::And(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" AND ")?;
                    }
                    item.fmt_operand(f)?;
                }
                Ok(())
            }
            Expr::Or(items) if items.is_empty() => f.write_str("FALSE"),
            Expr::Or(items) => {
                f.write_str("(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" OR ")?;
                    }
                    item.fmt_operand(f)?;
                }
                f.write_str(")")
            }
        }
    }
}

fn conjunction(items: &[Expr]) -> String {
    match items {
        [single] => single.to_string(),
        _ => Expr::And(items.to_vec()).to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub order: Order,
}

impl OrderBy {
    pub fn new(expr: Expr, order: Order) -> Self {
        OrderBy { expr, order }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, self.order.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    Table {
        name: String,
        schema: Option<String>,
        alias: Option<String>,
    },
    Derived {
        subquery: Box<Select>,
        alias: String,
    },
}

impl Relation {
    pub fn derived(subquery: Select, alias: &str) -> Relation {
        Relation::Derived {
            subquery: Box::new(subquery),
            alias: alias.to_string(),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Table {
                name,
                schema,
                alias,
            } => {
                if let Some(schema) = schema {
                    write!(f, "{}.", quote_ident(schema))?;
                }
                f.write_str(&quote_ident(name))?;
                if let Some(alias) = alias {
                    write!(f, " AS {}", quote_ident(alias))?;
                }
                Ok(())
            }
            Relation::Derived { subquery, alias } => {
                write!(f, "({}) AS {}", subquery, quote_ident(alias))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub relation: Relation,
    pub on: Expr,
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        };
        write!(f, "{} {} ON {}", kind, self.relation, self.on)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Expr { expr: Expr, alias: Option<String> },
    /// `*`, or `"table".*` when qualified
    Wildcard(Option<String>),
}

impl SelectItem {
    pub fn aliased(expr: Expr, alias: &str) -> SelectItem {
        SelectItem::Expr {
            expr,
            alias: Some(alias.to_string()),
        }
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::Expr { expr, alias } => match alias {
                Some(alias) => write!(f, "{} AS {}", expr, quote_ident(alias)),
                None => write!(f, "{}", expr),
            },
            SelectItem::Wildcard(Some(table)) => write!(f, "{}.*", quote_ident(table)),
            SelectItem::Wildcard(None) => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub ctes: Vec<(String, Select)>,
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: Relation,
    pub joins: Vec<Join>,
    /// Predicates joined with AND
    pub selection: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn new(from: Relation) -> Self {
        Select {
            ctes: Vec::new(),
            distinct: false,
            projection: Vec::new(),
            from,
            joins: Vec::new(),
            selection: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// `SELECT * FROM (self) AS alias`
    pub fn wrap(self, alias: &str) -> Select {
        let mut outer = Select::new(Relation::derived(self, alias));
        outer.projection.push(SelectItem::Wildcard(None));
        outer
    }

    /// Applies LIMIT and OFFSET, each only when positive
    pub fn paginate(&mut self, limit: u64, offset: u64) {
        self.limit = (limit > 0).then_some(limit);
        self.offset = (offset > 0).then_some(offset);
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.ctes.is_empty() {
            let ctes = self
                .ctes
                .iter()
                .map(|(name, select)| format!("{} AS ({})", quote_ident(name), select))
                .collect::<Vec<_>>();
            write!(f, "WITH {} ", ctes.join(", "))?;
        }

        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        if self.projection.is_empty() {
            f.write_str("*")?;
        } else {
            f.write_str(&join(&self.projection, ", "))?;
        }
        write!(f, " FROM {}", self.from)?;

        for join in &self.joins {
            write!(f, " {}", join)?;
        }
        if !self.selection.is_empty() {
            write!(f, " WHERE {}", conjunction(&self.selection))?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", join(&self.group_by, ", "))?;
        }
        if !self.having.is_empty() {
            write!(f, " HAVING {}", conjunction(&self.having))?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY {}", join(&self.order_by, ", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}
