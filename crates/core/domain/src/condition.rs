//! 条件比较运算符（规则评估与存储过滤共用）。

use crate::key_path::value_to_string;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Nin,
    RangeIn,
    RangeOut,
    Regex,
    Exists,
}

/// 比较实际值与期望值。
///
/// 期望值通常来自模板渲染后的字符串；数值比较时两侧都会尝试按 f64 解析。
pub fn compare(actual: Option<&Value>, operator: Operator, expected: &Value) -> bool {
    let actual = actual.filter(|v| !v.is_null());
    match operator {
        Operator::Exists => {
            let want = match expected {
                Value::Bool(b) => *b,
                Value::String(s) if !s.trim().is_empty() => {
                    crate::labels::parse_bool(s)
                }
                _ => true,
            };
            actual.is_some() == want
        }
        Operator::Ne => match actual {
            Some(actual) => !equals(actual, expected),
            None => true,
        },
        _ => {
            let Some(actual) = actual else {
                return false;
            };
            match operator {
                Operator::Eq => equals(actual, expected),
                Operator::Gt => order(actual, expected).is_some_and(|o| o.is_gt()),
                Operator::Ge => order(actual, expected).is_some_and(|o| o.is_ge()),
                Operator::Lt => order(actual, expected).is_some_and(|o| o.is_lt()),
                Operator::Le => order(actual, expected).is_some_and(|o| o.is_le()),
                Operator::In => list_of(expected).iter().any(|item| equals(actual, item)),
                Operator::Nin => !list_of(expected).iter().any(|item| equals(actual, item)),
                Operator::RangeIn => in_range(actual, expected).unwrap_or(false),
                Operator::RangeOut => in_range(actual, expected).map(|r| !r).unwrap_or(false),
                Operator::Regex => regex::Regex::new(&value_to_string(expected))
                    .map(|re| re.is_match(&value_to_string(actual)))
                    .unwrap_or(false),
                Operator::Ne | Operator::Exists => false,
            }
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn equals(actual: &Value, expected: &Value) -> bool {
    if let (Value::Bool(a), Value::String(e)) = (actual, expected) {
        let e = e.trim().to_ascii_lowercase();
        if matches!(e.as_str(), "true" | "false" | "1" | "0" | "on" | "off") {
            return *a == crate::labels::parse_bool(&e);
        }
    }
    if !matches!(actual, Value::Bool(_)) {
        if let (Some(a), Some(e)) = (as_number(actual), as_number(expected)) {
            return a == e;
        }
    }
    value_to_string(actual) == value_to_string(expected)
}

fn order(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(e)) => a.partial_cmp(&e),
        _ => Some(value_to_string(actual).cmp(&value_to_string(expected))),
    }
}

/// 期望值列表：JSON 数组、JSON 数组字符串或逗号分隔字符串。
fn list_of(expected: &Value) -> Vec<Value> {
    match expected {
        Value::Array(items) => items.clone(),
        Value::String(text) => {
            let text = text.trim();
            if text.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
                    return items;
                }
            }
            text.split(',')
                .map(|s| Value::String(s.trim().to_string()))
                .collect()
        }
        other => vec![other.clone()],
    }
}

/// 区间判断（闭区间）；期望值为 `min:max`、`min,max` 或 `[min,max]`。
fn in_range(actual: &Value, expected: &Value) -> Option<bool> {
    let bounds: Vec<Value> = match expected {
        Value::String(text) if text.contains(':') && !text.trim().starts_with('[') => text
            .split(':')
            .map(|s| Value::String(s.trim().to_string()))
            .collect(),
        other => list_of(other),
    };
    if bounds.len() != 2 {
        return None;
    }
    let value = as_number(actual)?;
    let min = as_number(&bounds[0])?;
    let max = as_number(&bounds[1])?;
    Some(value >= min && value <= max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_comparisons_parse_strings() {
        let actual = json!("31");
        assert!(compare(Some(&actual), Operator::Gt, &json!("30")));
        assert!(!compare(Some(&actual), Operator::Lt, &json!("30")));
        assert!(compare(Some(&json!(30.0)), Operator::Eq, &json!("30")));
        assert!(compare(Some(&json!(30)), Operator::Le, &json!(30)));
    }

    #[test]
    fn membership_and_ranges() {
        let actual = json!("b");
        assert!(compare(Some(&actual), Operator::In, &json!("a, b, c")));
        assert!(compare(Some(&actual), Operator::Nin, &json!("[\"x\",\"y\"]")));
        assert!(compare(Some(&json!(5)), Operator::RangeIn, &json!("1:10")));
        assert!(compare(Some(&json!(11)), Operator::RangeOut, &json!("1,10")));
        assert!(!compare(Some(&json!(10)), Operator::RangeOut, &json!([1, 10])));
    }

    #[test]
    fn exists_regex_and_booleans() {
        assert!(compare(Some(&json!(1)), Operator::Exists, &json!("")));
        assert!(compare(None, Operator::Exists, &json!("false")));
        assert!(!compare(Some(&Value::Null), Operator::Exists, &json!(true)));
        assert!(compare(Some(&json!("temp-hall")), Operator::Regex, &json!("^temp-")));
        assert!(compare(Some(&json!(true)), Operator::Eq, &json!("on")));
        assert!(compare(None, Operator::Ne, &json!("x")));
        assert!(!compare(None, Operator::Eq, &json!("x")));
    }
}
