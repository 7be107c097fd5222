use crate::data_store::Value;
use crate::semantic_model::InlineTable;
use crate::sql_builder::plan::Expr;

/// Bound parameters and inline tables collected while building one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamManager {
    params: Vec<(String, Value)>,
    tables: Vec<InlineTable>,
}

impl ParamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a value and returns the placeholder that references it.
    ///
    /// Parameter `pN` is always bound at position `N + 1`.
    pub fn set_param(&mut self, value: Value) -> Expr {
        let idx = self.params.len();
        self.params.push((format!("p{}", idx), value));
        Expr::Placeholder(idx + 1)
    }

    /// Registers an inline table; tables are unique by name
    pub fn set_table(&mut self, table: &InlineTable) {
        if !self.tables.iter().any(|item| item.name == table.name) {
            self.tables.push(table.clone());
        }
    }

    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    /// Values in binding order
    pub fn values(&self) -> Vec<Value> {
        self.params.iter().map(|(_, value)| value.clone()).collect()
    }

    pub fn tables(&self) -> &[InlineTable] {
        &self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic_model::MemberType;

    #[test]
    fn test_positions_follow_names() {
        let mut params = ParamManager::new();
        assert_eq!(params.set_param(Value::String("%a%".into())), Expr::Placeholder(1));
        assert_eq!(params.set_param(Value::Int(3)), Expr::Placeholder(2));

        let names: Vec<_> = params.params().iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["p0", "p1"]);
        assert_eq!(params.values(), vec![Value::String("%a%".into()), Value::Int(3)]);
    }

    #[test]
    fn test_tables_unique_by_name() {
        let table = InlineTable {
            name: "flows".into(),
            headers: vec!["id".into()],
            types: vec![MemberType::Int32],
            rows: vec![vec![Value::Int(1)]],
        };
        let mut params = ParamManager::new();
        params.set_table(&table);
        params.set_table(&table);
        assert_eq!(params.tables().len(), 1);
    }
}
