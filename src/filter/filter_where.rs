use serde_json::Value;

use super::error::FilterError;
use super::types::{Condition, FilterOp};
use crate::types::is_valid_field_name;

/// Parses Mongo-style where clauses and compiles them to SQL over a JSONB `data` column
pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    /// Parse a where clause; `null` matches everything
    pub fn parse(where_data: &Value) -> Result<Condition, FilterError> {
        match where_data {
            Value::Null => Ok(Condition::all()),
            Value::Object(obj) => {
                let mut conditions = Vec::with_capacity(obj.len());
                for (key, value) in obj {
                    if key.starts_with('$') {
                        conditions.push(Self::parse_logical_operator(key, value)?);
                    } else {
                        conditions.extend(Self::parse_field_condition(key, value)?);
                    }
                }
                Ok(match conditions.len() {
                    1 => conditions.remove(0),
                    _ => Condition::And(conditions),
                })
            }
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    /// Compile a condition into a SQL predicate plus positional JSON parameters
    pub fn generate(condition: &Condition, starting_param_index: usize) -> (String, Vec<Value>) {
        let mut filter_where = Self::new(starting_param_index);
        let sql = filter_where.build_sql_condition(condition);
        (sql, filter_where.param_values)
    }

    fn parse_logical_operator(op: &str, value: &Value) -> Result<Condition, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let parts = arr.iter().map(Self::parse).collect::<Result<Vec<_>, _>>()?;
                Ok(if op == "$and" { Condition::And(parts) } else { Condition::Or(parts) })
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<Condition>, FilterError> {
        let path = Self::parse_path(field)?;
        match value {
            Value::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => obj
                .iter()
                .map(|(op_key, op_val)| {
                    let operator = Self::map_operator(op_key)?;
                    Self::validate_operator_data(operator, op_val)?;
                    Ok(Condition::Field {
                        path: path.clone(),
                        operator,
                        data: op_val.clone(),
                    })
                })
                .collect(),
            // Implicit equality: { field: value }, including encoded dates and pointers
            _ => Ok(vec![Condition::Field {
                path,
                operator: FilterOp::Eq,
                data: value.clone(),
            }]),
        }
    }

    pub(crate) fn parse_path(field: &str) -> Result<Vec<String>, FilterError> {
        let path: Vec<String> = field.split('.').map(str::to_string).collect();
        if path.iter().all(|segment| is_valid_field_name(segment)) {
            Ok(path)
        } else {
            Err(FilterError::InvalidKeyName(field.to_string()))
        }
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" => FilterOp::Ne,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$in" => FilterOp::In,
            "$nin" => FilterOp::NIn,
            "$exists" => FilterOp::Exists,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    fn validate_operator_data(operator: FilterOp, data: &Value) -> Result<(), FilterError> {
        match operator {
            FilterOp::In | FilterOp::NIn if !data.is_array() => Err(FilterError::InvalidOperatorData(
                "$in and $nin require an array".to_string(),
            )),
            FilterOp::Exists if !data.is_boolean() => Err(FilterError::InvalidOperatorData(
                "$exists requires a boolean".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn build_sql_condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::And(parts) | Condition::Or(parts) if parts.is_empty() => {
                if matches!(condition, Condition::And(_)) { "1=1".to_string() } else { "1=0".to_string() }
            }
            Condition::And(parts) => self.join_parts(parts, " AND "),
            Condition::Or(parts) => self.join_parts(parts, " OR "),
            Condition::Field { path, operator, data } => {
                let column = json_path_sql(path);
                match operator {
                    FilterOp::Eq => {
                        if data.is_null() {
                            format!("({column} IS NULL OR {column} = 'null'::jsonb)")
                        } else {
                            format!("{} = {}", column, self.param(data.clone()))
                        }
                    }
                    FilterOp::Ne => {
                        if data.is_null() {
                            format!("({column} IS NOT NULL AND {column} <> 'null'::jsonb)")
                        } else {
                            let p = self.param(data.clone());
                            format!("({column} IS NULL OR {column} <> {p})")
                        }
                    }
                    FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                        let sql_op = match operator {
                            FilterOp::Gt => ">",
                            FilterOp::Gte => ">=",
                            FilterOp::Lt => "<",
                            _ => "<=",
                        };
                        let p = self.param(data.clone());
                        // jsonb orders across types, so require matching types first
                        format!("(jsonb_typeof({column}) = jsonb_typeof({p}) AND {column} {sql_op} {p})")
                    }
                    FilterOp::In | FilterOp::NIn => {
                        let values = data.as_array().cloned().unwrap_or_default();
                        let negate = matches!(operator, FilterOp::NIn);
                        if values.is_empty() {
                            return if negate { "1=1".to_string() } else { "1=0".to_string() };
                        }
                        let params: Vec<String> = values.into_iter().map(|v| self.param(v)).collect();
                        // Array fields match when any element is listed
                        let any_element = format!(
                            "EXISTS (SELECT 1 FROM jsonb_array_elements(CASE WHEN jsonb_typeof({column}) = 'array' THEN {column} ELSE jsonb_build_array({column}) END) AS e(value) WHERE e.value IN ({}))",
                            params.join(", ")
                        );
                        if negate {
                            format!("({column} IS NULL OR NOT {any_element})")
                        } else {
                            format!("({column} IS NOT NULL AND {any_element})")
                        }
                    }
                    FilterOp::Exists => {
                        if data.as_bool().unwrap_or(true) {
                            format!("{column} IS NOT NULL")
                        } else {
                            format!("{column} IS NULL")
                        }
                    }
                }
            }
        }
    }

    fn join_parts(&mut self, parts: &[Condition], joiner: &str) -> String {
        let sql: Vec<String> = parts
            .iter()
            .map(|part| format!("({})", self.build_sql_condition(part)))
            .collect();
        sql.join(joiner)
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}::jsonb", self.param_index)
    }
}

/// `data #> '{a,b}'`; segments are validated identifiers so inlining is safe
pub(crate) fn json_path_sql(path: &[String]) -> String {
    format!("data #> '{{{}}}'", path.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_implicit_equality() {
        let condition = FilterWhere::parse(&json!({ "username": "alice" })).unwrap();
        assert_eq!(condition, Condition::field("username", FilterOp::Eq, json!("alice")));
    }

    #[test]
    fn test_parse_operators_and_or() {
        let condition = FilterWhere::parse(&json!({
            "$or": [{ "username": "bob" }, { "email": "bob" }]
        }))
        .unwrap();
        match condition {
            Condition::Or(parts) => assert_eq!(parts.len(), 2),
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_date_object_is_equality_not_operator() {
        let date = json!({ "__type": "Date", "iso": "2024-01-01T00:00:00.000Z" });
        let condition = FilterWhere::parse(&json!({ "expiresAt": date.clone() })).unwrap();
        assert_eq!(condition, Condition::field("expiresAt", FilterOp::Eq, date));
    }

    #[test]
    fn test_rejects_bad_field_and_operator() {
        assert!(matches!(
            FilterWhere::parse(&json!({ "bad-field": 1 })),
            Err(FilterError::InvalidKeyName(_))
        ));
        assert!(matches!(
            FilterWhere::parse(&json!({ "a": { "$regex": "x" } })),
            Err(FilterError::UnsupportedOperator(_))
        ));
        assert!(FilterWhere::parse(&json!({ "a": { "$in": 3 } })).is_err());
    }

    #[test]
    fn test_generate_sql() {
        let condition = FilterWhere::parse(&json!({
            "username": "alice",
            "_failed_login_count": { "$gte": 3 }
        }))
        .unwrap();
        let (sql, params) = FilterWhere::generate(&condition, 0);
        // object keys come back sorted, so the `_` field is compiled first
        assert_eq!(
            sql,
            "((jsonb_typeof(data #> '{_failed_login_count}') = jsonb_typeof($1::jsonb) AND data #> '{_failed_login_count}' >= $1::jsonb)) AND (data #> '{username}' = $2::jsonb)"
        );
        assert_eq!(params, vec![json!(3), json!("alice")]);
    }

    #[test]
    fn test_generate_exists_and_empty_in() {
        let (sql, params) = FilterWhere::generate(
            &Condition::field("_failed_login_count", FilterOp::Exists, json!(true)),
            0,
        );
        assert_eq!(sql, "data #> '{_failed_login_count}' IS NOT NULL");
        assert!(params.is_empty());

        let (sql, _) = FilterWhere::generate(&Condition::field("a", FilterOp::In, json!([])), 0);
        assert_eq!(sql, "1=0");

        let (sql, params) = FilterWhere::generate(&Condition::field("channels", FilterOp::In, json!(["news", "sports"])), 0);
        assert!(sql.starts_with("(data #> '{channels}' IS NOT NULL AND EXISTS (SELECT 1 FROM jsonb_array_elements("));
        assert!(sql.ends_with("WHERE e.value IN ($1::jsonb, $2::jsonb)))"));
        assert_eq!(params.len(), 2);
    }
}
