// handlers/mod.rs - REST routers mounted under the configured mount path
//
// Each submodule builds a `PromiseRouter`; `api_router` merges them in a fixed
// order, which decides precedence when two patterns match the same path.

pub mod aggregate;
pub mod features;
pub mod global_config;
pub mod purge;
pub mod push;
pub mod users;

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::database::Record;
use crate::router::PromiseRouter;
use crate::types::is_public_field_name;

/// Every REST route, in precedence order
pub fn api_router() -> PromiseRouter {
    let mut router = PromiseRouter::new();
    router
        .merge(users::router())
        .merge(push::router())
        .merge(features::router())
        .merge(global_config::router())
        .merge(purge::router())
        .merge(aggregate::router());
    router
}

/// Drop internal fields (anything not starting with a letter) except `__type`
pub fn remove_hidden_properties(record: &mut Record) {
    record.retain(|key, _| key == "__type" || is_public_field_name(key));
}

/// Query-string values parsed as JSON where possible, raw strings otherwise
pub fn json_from_query(query: &HashMap<String, String>) -> Map<String, Value> {
    query
        .iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            (key.clone(), value)
        })
        .collect()
}
