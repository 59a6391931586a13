use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::error::FilterError;
use super::filter_where::{json_path_sql, FilterWhere};
use super::matcher::{compare_values, lookup};
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    /// Parse `"score,-createdAt"`: comma separated keys, `-` prefix for descending
    pub fn validate_and_parse(order: &str) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let mut out = Vec::new();
        for part in order.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() { continue; }
            let (key, sort) = match trimmed.strip_prefix('-') {
                Some(key) => (key, SortDirection::Desc),
                None => (trimmed, SortDirection::Asc),
            };
            out.push(FilterOrderInfo { path: FilterWhere::parse_path(key)?, sort });
        }
        Ok(out)
    }

    pub fn generate(infos: &[FilterOrderInfo]) -> String {
        if infos.is_empty() { return String::new(); }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("{} {}", json_path_sql(&i.path), i.sort.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }

    /// Sort records in place; incomparable values keep their relative order
    pub fn sort(records: &mut [Map<String, Value>], infos: &[FilterOrderInfo]) {
        if infos.is_empty() { return; }
        records.sort_by(|a, b| {
            for info in infos {
                let ordering = match (lookup(a, &info.path), lookup(b, &info.path)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                let ordering = match info.sort {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }
}
