//! 模板引擎（minijinja）。
//!
//! 默认宽松模式：缺失键渲染为空；严格模式下缺失键报错（计划自定义变量脚本使用）。
//! 内置函数：`now(fmt?)`、`version()`、`sunrise(fmt?)`、`sunset(fmt?)`，另可注册自定义函数。

use crate::ScriptError;
use chrono::{Local, Utc};
use domain::sun::{Location, sun_times};
use minijinja::value::Rest;
use minijinja::{Environment, UndefinedBehavior, Value as JinjaValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 自定义模板函数。
pub type TemplateFn = Arc<dyn Fn(Vec<serde_json::Value>) -> serde_json::Value + Send + Sync>;

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// 模板引擎。
#[derive(Clone, Default)]
pub struct TemplateEngine {
    version: String,
    location: Option<Location>,
    functions: BTreeMap<String, TemplateFn>,
}

impl TemplateEngine {
    pub fn new(version: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            version: version.into(),
            location,
            functions: BTreeMap::new(),
        }
    }

    /// 注册自定义函数（同名覆盖内置函数）。
    pub fn with_function(mut self, name: impl Into<String>, function: TemplateFn) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    fn environment(&self, strict: bool) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(if strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Chainable
        });
        env.add_function("now", |format: Option<String>| {
            Local::now()
                .format(format.as_deref().unwrap_or(DEFAULT_TIME_FORMAT))
                .to_string()
        });
        let version = self.version.clone();
        env.add_function("version", move || version.clone());
        let location = self.location;
        env.add_function("sunrise", move |format: Option<String>| {
            format_sun_time(location, true, format.as_deref())
        });
        env.add_function("sunset", move |format: Option<String>| {
            format_sun_time(location, false, format.as_deref())
        });
        for (name, function) in &self.functions {
            let function = function.clone();
            env.add_function(
                name.clone(),
                move |args: Rest<JinjaValue>| -> Result<JinjaValue, minijinja::Error> {
                    let args = args
                        .iter()
                        .map(|arg| serde_json::to_value(arg).unwrap_or(serde_json::Value::Null))
                        .collect();
                    Ok(JinjaValue::from_serialize(function(args)))
                },
            );
        }
        env
    }

    /// 宽松渲染；不含模板标记时直接返回原文。
    pub fn render<S: Serialize>(&self, template: &str, data: &S) -> Result<String, ScriptError> {
        self.render_with(template, data, false)
    }

    /// 严格渲染：缺失键报错。
    pub fn render_strict<S: Serialize>(
        &self,
        template: &str,
        data: &S,
    ) -> Result<String, ScriptError> {
        self.render_with(template, data, true)
    }

    fn render_with<S: Serialize>(
        &self,
        template: &str,
        data: &S,
        strict: bool,
    ) -> Result<String, ScriptError> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }
        self.environment(strict)
            .render_str(template, data)
            .map_err(|err| ScriptError::Template(err.to_string()))
    }
}

fn format_sun_time(location: Option<Location>, sunrise: bool, format: Option<&str>) -> String {
    let Some(location) = location else {
        return String::new();
    };
    let today = Local::now().date_naive();
    let Some((rise, set)) = sun_times(today, location) else {
        return String::new();
    };
    let at: chrono::DateTime<Utc> = if sunrise { rise } else { set };
    at.with_timezone(&Local)
        .format(format.unwrap_or(DEFAULT_TIME_FORMAT))
        .to_string()
}

/// 对参数映射做模板渲染：序列化为 YAML，整体渲染后再解析回映射。
pub fn render_yaml_map<S: Serialize>(
    engine: &TemplateEngine,
    params: &domain::Spec,
    data: &S,
) -> Result<domain::Spec, ScriptError> {
    let yaml = serde_yaml::to_string(params).map_err(|err| ScriptError::Decode(err.to_string()))?;
    let rendered = engine.render(&yaml, data)?;
    serde_yaml::from_str(&rendered).map_err(|err| ScriptError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_keys_render_empty_in_lenient_mode() {
        let engine = TemplateEngine::new("2.0.0", None);
        let data = json!({"temp": {"current": {"value": 23.5}}});
        let out = engine
            .render("t={{ temp.current.value }} x={{ missing.deep }}", &data)
            .expect("render");
        assert_eq!(out, "t=23.5 x=");
    }

    #[test]
    fn strict_mode_surfaces_missing_keys() {
        let engine = TemplateEngine::new("2.0.0", None);
        assert!(engine.render_strict("{{ missing }}", &json!({})).is_err());
    }

    #[test]
    fn builtin_and_custom_functions() {
        let engine = TemplateEngine::new("2.0.0", None).with_function(
            "double",
            Arc::new(|args: Vec<serde_json::Value>| {
                json!(args.first().and_then(|v| v.as_f64()).unwrap_or(0.0) * 2.0)
            }),
        );
        let out = engine
            .render("{{ version() }} {{ double(2) }} {{ now('%Y') | length }}", &json!({}))
            .expect("render");
        assert_eq!(out, "2.0.0 4.0 4");
    }

    #[test]
    fn yaml_map_rendering_keeps_structure() {
        let engine = TemplateEngine::new("", None);
        let params: domain::Spec = serde_json::from_value(json!({
            "message": "temperature {{ temp }}",
            "mqtt": {"type": "mqtt", "topic": "home/{{ room }}", "data": "{{ temp }}"}
        }))
        .expect("params");
        let rendered = render_yaml_map(&engine, &params, &json!({"temp": 31, "room": "hall"}))
            .expect("render");
        assert_eq!(rendered["message"], "temperature 31");
        assert_eq!(rendered["mqtt"]["topic"], "home/hall");
    }
}
