// handlers/aggregate.rs - GET /aggregate/:className

use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{json_from_query, remove_hidden_properties};
use crate::error::{ApiError, ErrorCode};
use crate::middleware::master_key_required;
use crate::router::{handler, PromiseRouter, RouteRequest, RouteResponse};
use crate::types::HttpMethod;

/// Keys handled outside the pipeline
const BASE_KEYS: [&str; 2] = ["where", "distinct"];

const PIPELINE_KEYS: [&str; 25] = [
    "addFields",
    "bucket",
    "bucketAuto",
    "collStats",
    "count",
    "currentOp",
    "facet",
    "geoNear",
    "graphLookup",
    "group",
    "indexStats",
    "limit",
    "listLocalSessions",
    "listSessions",
    "lookup",
    "match",
    "out",
    "project",
    "redact",
    "replaceRoot",
    "sample",
    "skip",
    "sort",
    "sortByCount",
    "unwind",
];

pub fn router() -> PromiseRouter {
    let mut router = PromiseRouter::new();
    router.route(
        HttpMethod::Get,
        "/aggregate/:className",
        vec![master_key_required(), handler(handle_find)],
    );
    router
}

fn invalid_parameter(detail: impl std::fmt::Display) -> ApiError {
    ApiError::new(ErrorCode::InvalidQuery, format!("Invalid parameter for query: {}", detail))
}

/// Turn `{ name: spec }` into a `$name` pipeline stage
fn transform_stage(name: &str, spec: &Value) -> Result<Value, ApiError> {
    if !PIPELINE_KEYS.contains(&name) {
        return Err(invalid_parameter(name));
    }

    let mut spec = spec.clone();
    if name == "group" {
        let group = spec.as_object_mut().ok_or_else(|| invalid_parameter("group"))?;
        if group.contains_key("_id") {
            return Err(invalid_parameter("group. Please use objectId instead of _id"));
        }
        let id = group
            .remove("objectId")
            .ok_or_else(|| invalid_parameter("group. objectId is required"))?;
        group.insert("_id".to_string(), id);
    }
    Ok(json!({ format!("${}", name): spec }))
}

/// Build the pipeline from an ordered stage list or from the keys of an object body
fn build_pipeline(body: &Value) -> Result<Vec<Value>, ApiError> {
    match body {
        Value::Array(stages) => stages
            .iter()
            .map(|stage| {
                let (name, spec) = stage
                    .as_object()
                    .and_then(|s| s.iter().next())
                    .ok_or_else(|| invalid_parameter("empty stage"))?;
                transform_stage(name, spec)
            })
            .collect(),
        Value::Object(stages) => stages
            .iter()
            .filter(|(name, _)| !BASE_KEYS.contains(&name.as_str()))
            .map(|(name, spec)| transform_stage(name, spec))
            .collect(),
        _ => Ok(vec![]),
    }
}

async fn handle_find(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let class_name = req
        .param("className")
        .ok_or_else(|| ApiError::new(ErrorCode::InvalidClassName, "invalid className"))?;

    let query = json_from_query(&req.query);
    let body = match &req.body {
        Value::Array(stages) => Value::Array(stages.clone()),
        Value::Object(body) => {
            let mut merged: Map<String, Value> = body.clone();
            merged.extend(query);
            Value::Object(merged)
        }
        _ => Value::Object(query),
    };

    let pipeline = build_pipeline(&body)?;
    let distinct = body.get("distinct").map(|d| match d {
        Value::String(field) => field.clone(),
        other => other.to_string(),
    });
    let where_clause = match body.get("where") {
        Some(Value::String(raw)) => serde_json::from_str(raw)
            .map_err(|e| ApiError::invalid_json(format!("invalid where clause: {}", e)))?,
        Some(clause) => clause.clone(),
        None => json!({}),
    };

    let results: Vec<Value> = req
        .ctx
        .store
        .aggregate(class_name, &where_clause, &pipeline, distinct.as_deref())
        .await?
        .into_iter()
        .map(|mut result| {
            if let Value::Object(object) = &mut result {
                remove_hidden_properties(object);
            }
            result
        })
        .collect();

    Ok(RouteResponse::json(json!({ "results": results })))
}
