use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators accepted inside a field condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "$eq")] Eq,
    #[serde(rename = "$ne")] Ne,
    #[serde(rename = "$gt")] Gt,
    #[serde(rename = "$gte")] Gte,
    #[serde(rename = "$lt")] Lt,
    #[serde(rename = "$lte")] Lte,
    #[serde(rename = "$in")] In,
    #[serde(rename = "$nin")] NIn,
    #[serde(rename = "$exists")] Exists,
}

/// Parsed where-clause. Field paths are dotted (`params.color`) and already validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Field {
        path: Vec<String>,
        operator: FilterOp,
        data: Value,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    /// Matches every record
    pub fn all() -> Self {
        Condition::And(vec![])
    }

    pub fn field(path: &str, operator: FilterOp, data: Value) -> Self {
        Condition::Field {
            path: path.split('.').map(str::to_string).collect(),
            operator,
            data,
        }
    }
}

/// Options accepted by `find`, mirroring the REST query parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindOptions {
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOrderInfo {
    pub path: Vec<String>,
    pub sort: SortDirection,
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}
