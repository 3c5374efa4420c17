//! 评估器：rule / javascript / webhook。
//!
//! 三种方式都以已解析的变量映射为输入；javascript 与 webhook 返回的映射
//! 会合并回变量，供后续处理器参数渲染使用。

use crate::error::TaskError;
use domain::{EvaluationType, Rule, Spec, TaskConfig, compare, get_by_key_path};
use mc_script::{RequestBody, TemplateEngine, WebhookClient, execute_script, script_timeout, truthy};
use serde_json::Value;
use tracing::debug;

/// 脚本 / webhook 结果中表示是否触发的键。
pub const IS_TRIGGERED: &str = "isTriggered";

/// 评估任务，返回是否触发；`variables` 可能被结果合并改写。
pub async fn evaluate(
    task: &TaskConfig,
    variables: &mut Spec,
    templates: &TemplateEngine,
    webhook: &WebhookClient,
) -> Result<bool, TaskError> {
    match task.evaluation_type {
        EvaluationType::Rule => evaluate_rule(&task.evaluation_config.rule, variables, templates),
        EvaluationType::Javascript => {
            let script = task.evaluation_config.javascript.trim();
            if script.is_empty() {
                return Err(TaskError::Config("javascript evaluation without script".to_string()));
            }
            let mut globals = serde_json::Map::new();
            globals.insert("variables".to_string(), Value::Object(variables.clone()));
            let result = execute_script(script, &globals, None, script_timeout(&task.labels)).await?;
            Ok(merge_result(variables, result))
        }
        EvaluationType::Webhook => {
            let response = webhook
                .call(
                    &task.evaluation_config.webhook,
                    "POST",
                    Some(RequestBody::Json(Value::Object(variables.clone()))),
                )
                .await?;
            let result = response.json_map()?;
            let triggered = result.get(IS_TRIGGERED).is_some_and(truthy);
            variables.extend(result);
            Ok(triggered)
        }
    }
}

/// 逐条比较条件；没有条件时视为触发。
pub fn evaluate_rule(rule: &Rule, variables: &Spec, templates: &TemplateEngine) -> Result<bool, TaskError> {
    if rule.conditions.is_empty() {
        return Ok(true);
    }
    let scope = Value::Object(variables.clone());
    let mut matched = 0;
    for condition in &rule.conditions {
        let expected = match &condition.value {
            Value::String(text) => Value::String(templates.render(text, variables)?),
            other => other.clone(),
        };
        let actual = get_by_key_path(&scope, &condition.variable);
        let result = compare(actual, condition.operator, &expected);
        debug!(
            target: "mc.task",
            variable = %condition.variable,
            operator = ?condition.operator,
            result,
            "condition_evaluated"
        );
        if result {
            matched += 1;
            if !rule.match_all {
                return Ok(true);
            }
        } else if rule.match_all {
            return Ok(false);
        }
    }
    Ok(matched > 0)
}

/// 脚本结果为映射时合并回变量并读取 `isTriggered`，否则按真值判断整个结果。
fn merge_result(variables: &mut Spec, result: Value) -> bool {
    match result {
        Value::Object(map) => {
            let triggered = map.get(IS_TRIGGERED).map(truthy);
            variables.extend(map);
            triggered.unwrap_or(true)
        }
        other => truthy(&other),
    }
}
