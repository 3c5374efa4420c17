//! 点分键路径访问。
//!
//! 实体先序列化为 `serde_json::Value`，再按 `a.b.0.c` 逐段下钻；
//! 数组段使用十进制下标。

use serde::Serialize;
use serde_json::Value;

/// 按键路径取值；空路径或 `.` 返回整个值。
pub fn get_by_key_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() || path == "." {
        return Some(value);
    }
    path.trim_matches('.')
        .split('.')
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// 对任意可序列化实体按键路径取值（返回拥有所有权的副本）。
pub fn attribute<T: Serialize>(entity: &T, path: &str) -> Option<Value> {
    let value = serde_json::to_value(entity).ok()?;
    get_by_key_path(&value, path).cloned()
}

/// 把 JSON 值渲染为比较/模板使用的字符串（字符串不加引号）。
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walks_objects_and_arrays() {
        let value = json!({"current": {"value": 23.5}, "list": [{"a": 1}, {"a": 2}]});
        assert_eq!(get_by_key_path(&value, "current.value"), Some(&json!(23.5)));
        assert_eq!(get_by_key_path(&value, "list.1.a"), Some(&json!(2)));
        assert_eq!(get_by_key_path(&value, "."), Some(&value));
        assert_eq!(get_by_key_path(&value, "current.missing"), None);
    }
}
