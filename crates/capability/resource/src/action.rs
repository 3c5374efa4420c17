//! 资源动作的目标解析。
//!
//! 目标来自 Quick-ID，或 `resourceType + labels` 查询到的实体列表。

use crate::error::ResourceError;
use domain::{QuickId, ResourceType, Spec};
use serde_json::Value;

/// 动作目标。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Gateway(String),
    Node {
        gateway_id: String,
        node_id: String,
    },
    Field {
        gateway_id: String,
        node_id: String,
        source_id: String,
        field_id: String,
    },
    Task(String),
    Schedule(String),
    Handler(String),
    DataRepository {
        id: String,
        key_path: String,
    },
}

impl Target {
    pub fn from_quick_id(quick_id: &QuickId) -> Result<Self, ResourceError> {
        let key = |index: usize| quick_id.keys.get(index).cloned().unwrap_or_default();
        let target = match quick_id.resource_type {
            ResourceType::Gateway => Target::Gateway(key(0)),
            ResourceType::Node => Target::Node {
                gateway_id: key(0),
                node_id: key(1),
            },
            ResourceType::Field => Target::Field {
                gateway_id: key(0),
                node_id: key(1),
                source_id: key(2),
                field_id: key(3),
            },
            ResourceType::Task => Target::Task(key(0)),
            ResourceType::Schedule => Target::Schedule(key(0)),
            ResourceType::Handler => Target::Handler(key(0)),
            ResourceType::DataRepository => Target::DataRepository {
                id: key(0),
                key_path: quick_id.key_path.clone(),
            },
            ResourceType::Source | ResourceType::Firmware => {
                return Err(ResourceError::Unsupported(format!(
                    "resource action on `{}`",
                    quick_id.resource_type.prefix()
                )));
            }
        };
        Ok(target)
    }

    /// 从实体 JSON 取组合键。
    pub fn from_entity(resource_type: ResourceType, entity: &Value) -> Result<Self, ResourceError> {
        let keys = resource_type
            .key_names()
            .iter()
            .map(|name| {
                entity
                    .get(*name)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ResourceError::Decode(format!("entity without `{name}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_quick_id(&QuickId {
            resource_type,
            keys,
            key_path: String::new(),
        })
    }
}

/// 启用 / 停用 / 重载指令。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Enable,
    Disable,
    Reload,
}

impl Toggle {
    pub fn parse(payload: &str) -> Result<Self, ResourceError> {
        match payload.trim().to_ascii_lowercase().as_str() {
            "enable" | "true" | "on" => Ok(Toggle::Enable),
            "disable" | "false" | "off" => Ok(Toggle::Disable),
            "reload" => Ok(Toggle::Reload),
            other => Err(ResourceError::Config(format!("unknown action `{other}`"))),
        }
    }
}

/// 按点分路径写入数据仓库；中间层不存在或不是对象时新建。
pub fn set_by_path(data: &mut Spec, key_path: &str, value: Value) -> Result<(), ResourceError> {
    let mut segments: Vec<&str> = key_path.split('.').filter(|s| !s.is_empty()).collect();
    let Some(last) = segments.pop() else {
        return Err(ResourceError::Config("data repository action without key path".to_string()));
    };
    let mut current = data;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Spec::new()));
        if !slot.is_object() {
            *slot = Value::Object(Spec::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return Err(ResourceError::Config(format!("`{segment}` is not an object"))),
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// 载荷按 JSON 解析，失败时按字符串保存。
pub fn payload_value(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quick_id_targets() {
        let field = QuickId::parse("sf:g1.11.1.V_STATUS").expect("quick id");
        assert_eq!(
            Target::from_quick_id(&field).expect("field"),
            Target::Field {
                gateway_id: "g1".to_string(),
                node_id: "11".to_string(),
                source_id: "1".to_string(),
                field_id: "V_STATUS".to_string(),
            }
        );
        let repo = QuickId::parse("dr:house.mode.night").expect("quick id");
        assert_eq!(
            Target::from_quick_id(&repo).expect("repo"),
            Target::DataRepository {
                id: "house".to_string(),
                key_path: "mode.night".to_string(),
            }
        );
        let source = QuickId::parse("sn:g1.11.1").expect("quick id");
        assert!(Target::from_quick_id(&source).is_err());
    }

    #[test]
    fn entity_targets_use_key_names() {
        let node = json!({"id": "x", "gatewayId": "g1", "nodeId": "7"});
        assert_eq!(
            Target::from_entity(ResourceType::Node, &node).expect("node"),
            Target::Node {
                gateway_id: "g1".to_string(),
                node_id: "7".to_string(),
            }
        );
        assert!(Target::from_entity(ResourceType::Node, &json!({"id": "x"})).is_err());
    }

    #[test]
    fn nested_paths_are_created() {
        let mut data = Spec::new();
        data.insert("mode".to_string(), json!("flat"));
        set_by_path(&mut data, "mode.night", payload_value("22.5")).expect("set");
        set_by_path(&mut data, "owner", payload_value("alice")).expect("set");
        assert_eq!(data["mode"]["night"], json!(22.5));
        assert_eq!(data["owner"], json!("alice"));
        assert!(set_by_path(&mut data, "", json!(1)).is_err());
        assert_eq!(Toggle::parse(" Disable ").expect("toggle"), Toggle::Disable);
    }
}
