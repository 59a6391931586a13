use serde_json::Value;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{Condition, FilterOrderInfo, FindOptions, SqlResult};
use crate::types::is_valid_class_name;

/// Builds SQL statements against a per-class table of `(object_id, data jsonb)` rows
pub struct Filter {
    table_name: String,
    condition: Condition,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        Self::validate_table_name(&table_name)?;
        Ok(Self {
            table_name,
            condition: Condition::all(),
            order_data: vec![],
            limit: None,
            offset: None,
        })
    }

    pub fn assign(&mut self, where_data: &Value, options: &FindOptions) -> Result<&mut Self, FilterError> {
        self.where_clause(where_data)?;
        if let Some(order) = &options.order { self.order(order)?; }
        self.limit = options.limit;
        self.offset = options.skip;
        Ok(self)
    }

    pub fn where_clause(&mut self, conditions: &Value) -> Result<&mut Self, FilterError> {
        self.condition = FilterWhere::parse(conditions)?;
        Ok(self)
    }

    pub fn order(&mut self, order_spec: &str) -> Result<&mut Self, FilterError> {
        self.order_data = FilterOrder::validate_and_parse(order_spec)?;
        Ok(self)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn to_sql(&self) -> SqlResult {
        let (where_clause, params) = FilterWhere::generate(&self.condition, 0);
        let order_clause = FilterOrder::generate(&self.order_data);
        let limit_clause = self.build_limit_clause();

        let query = [
            "SELECT data".to_string(),
            format!("FROM \"{}\"", self.table_name),
            format!("WHERE {}", where_clause),
            order_clause,
            limit_clause,
        ].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");

        SqlResult { query, params }
    }

    /// Predicate only, with parameters numbered from `starting_param_index + 1`
    pub fn to_where_sql(&self, starting_param_index: usize) -> SqlResult {
        let (query, params) = FilterWhere::generate(&self.condition, starting_param_index);
        SqlResult { query, params }
    }

    fn validate_table_name(name: &str) -> Result<(), FilterError> {
        if !is_valid_class_name(name) {
            return Err(FilterError::InvalidClassName(name.to_string()));
        }
        Ok(())
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}
