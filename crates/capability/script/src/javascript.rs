//! 内嵌 JavaScript 执行（boa）。
//!
//! 每次调用使用独立的 Context，在阻塞线程池中执行，外层套超时；
//! 循环次数上限防止脚本占满 CPU。

use crate::ScriptError;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsString, JsValue, Source};
use domain::Labels;
use domain::labels::LABEL_SCRIPT_TIMEOUT;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// 默认脚本超时。
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const LOOP_ITERATION_LIMIT: u64 = 100_000_000;

/// 从标签读取脚本超时（`script_timeout`），缺失时用默认值。
pub fn script_timeout(labels: &Labels) -> Duration {
    domain::duration::parse_duration_or(
        labels.get(LABEL_SCRIPT_TIMEOUT).unwrap_or_default(),
        DEFAULT_SCRIPT_TIMEOUT,
    )
}

/// 执行脚本。
///
/// `globals` 中每个键注入为全局变量；`output` 指定时读取该全局变量作为结果
/// （如 `dataOut`），否则返回脚本最后一个表达式的值。`undefined` 映射为 `null`。
pub async fn execute_script(
    script: &str,
    globals: &serde_json::Map<String, Value>,
    output: Option<&str>,
    timeout: Duration,
) -> Result<Value, ScriptError> {
    let script = script.to_string();
    let globals = globals.clone();
    let output = output.map(str::to_string);
    let task = tokio::task::spawn_blocking(move || run(&script, &globals, output.as_deref()));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(ScriptError::Script(err.to_string())),
        Err(_) => Err(ScriptError::Timeout(timeout)),
    }
}

fn run(
    script: &str,
    globals: &serde_json::Map<String, Value>,
    output: Option<&str>,
) -> Result<Value, ScriptError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
    for (name, value) in globals {
        let js_value = JsValue::from_json(value, &mut context)
            .map_err(|err| ScriptError::Script(err.to_string()))?;
        context
            .register_global_property(JsString::from(name.as_str()), js_value, Attribute::all())
            .map_err(|err| ScriptError::Script(err.to_string()))?;
    }
    let result = context
        .eval(Source::from_bytes(script.as_bytes()))
        .map_err(|err| ScriptError::Script(err.to_string()))?;
    let value = match output {
        Some(name) => context
            .global_object()
            .get(JsString::from(name), &mut context)
            .map_err(|err| ScriptError::Script(err.to_string()))?,
        None => result,
    };
    debug!(target: "mc.script", output = ?output, "script_executed");
    to_json(&value, &mut context)
}

fn to_json(value: &JsValue, context: &mut Context) -> Result<Value, ScriptError> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    value
        .to_json(context)
        .map_err(|err| ScriptError::Decode(err.to_string()))
}

/// 按 JavaScript 真值规则把结果转为布尔。
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn globals(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn last_expression_is_the_result() {
        let vars = globals(json!({"variables": {"temp": 31}}));
        let out = execute_script(
            "({ isTriggered: variables.temp > 30, level: 'high' })",
            &vars,
            None,
            Duration::from_secs(5),
        )
        .await
        .expect("execute");
        assert_eq!(out, json!({"isTriggered": true, "level": "high"}));
    }

    #[tokio::test]
    async fn output_variable_is_read_from_globals() {
        let vars = globals(json!({"dataIn": {"payload": "21.5"}}));
        let out = execute_script(
            "var dataOut = [{ key: 'temp', value: dataIn.payload }];",
            &vars,
            Some("dataOut"),
            Duration::from_secs(5),
        )
        .await
        .expect("execute");
        assert_eq!(out, json!([{"key": "temp", "value": "21.5"}]));
    }

    #[tokio::test]
    async fn syntax_errors_and_runaway_loops_fail() {
        let vars = serde_json::Map::new();
        let err = execute_script("function (", &vars, None, Duration::from_secs(5))
            .await
            .expect_err("syntax");
        assert!(matches!(err, ScriptError::Script(_)));

        let err = execute_script("while (true) {}", &vars, None, Duration::from_millis(200))
            .await
            .expect_err("runaway");
        assert!(matches!(err, ScriptError::Timeout(_) | ScriptError::Script(_)));
    }

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("false")));
        assert!(truthy(&json!({})));
    }

    #[test]
    fn timeout_label_overrides_default() {
        let labels: Labels = [("script_timeout", "5s")].into_iter().collect();
        assert_eq!(script_timeout(&labels), Duration::from_secs(5));
        assert_eq!(script_timeout(&Labels::new()), DEFAULT_SCRIPT_TIMEOUT);
    }
}
