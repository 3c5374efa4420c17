//! 查询过滤：实体序列化后按键路径比较。

use crate::error::StorageError;
use contract::QueryFilter;
use domain::{Labels, compare, get_by_key_path};
use serde::Serialize;
use serde_json::Value;

/// 实体是否满足全部过滤条件；无条件时恒为真。
pub fn matches_filters<T: Serialize>(entity: &T, filters: &[QueryFilter]) -> Result<bool, StorageError> {
    if filters.is_empty() {
        return Ok(true);
    }
    let value = serde_json::to_value(entity)?;
    Ok(matches_value(&value, filters))
}

pub fn matches_value(value: &Value, filters: &[QueryFilter]) -> bool {
    filters.iter().all(|filter| {
        compare(
            get_by_key_path(value, &filter.key),
            filter.operator,
            &filter.value,
        )
    })
}

/// 标签等值过滤转为查询条件（`labels.<key> == value`）。
pub fn label_filters(labels: &Labels) -> Vec<QueryFilter> {
    labels
        .iter()
        .map(|(key, value)| QueryFilter::eq(format!("labels.{key}"), value.as_str()))
        .collect()
}
