//! Quick-ID：`<type>:<segments>[.keyPath]` 形式的紧凑实体标识。

use std::collections::BTreeMap;
use std::fmt;

/// Quick-ID 解析错误。
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuickIdError {
    #[error("quick id missing type separator: {0}")]
    MissingSeparator(String),
    #[error("unknown quick id type: {0}")]
    UnknownType(String),
    #[error("quick id {0} requires {1} segments")]
    NotEnoughSegments(String, usize),
}

/// Quick-ID 可寻址的资源类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Gateway,
    Node,
    Source,
    Field,
    Task,
    Schedule,
    Handler,
    DataRepository,
    Firmware,
}

impl ResourceType {
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceType::Gateway => "gw",
            ResourceType::Node => "nd",
            ResourceType::Source => "sn",
            ResourceType::Field => "sf",
            ResourceType::Task => "tk",
            ResourceType::Schedule => "sk",
            ResourceType::Handler => "hd",
            ResourceType::DataRepository => "dr",
            ResourceType::Firmware => "fm",
        }
    }

    /// 接受短前缀或完整名称。
    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value.trim() {
            "gw" | "gateway" => ResourceType::Gateway,
            "nd" | "node" => ResourceType::Node,
            "sn" | "source" => ResourceType::Source,
            "sf" | "fd" | "field" => ResourceType::Field,
            "tk" | "task" => ResourceType::Task,
            "sk" | "schedule" => ResourceType::Schedule,
            "hd" | "handler" => ResourceType::Handler,
            "dr" | "data_repository" => ResourceType::DataRepository,
            "fm" | "firmware" => ResourceType::Firmware,
            _ => return None,
        };
        Some(kind)
    }

    /// 组合键字段名（与实体 JSON 字段一致）。
    pub fn key_names(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Gateway => &["id"],
            ResourceType::Node => &["gatewayId", "nodeId"],
            ResourceType::Source => &["gatewayId", "nodeId", "sourceId"],
            ResourceType::Field => &["gatewayId", "nodeId", "sourceId", "fieldId"],
            _ => &["id"],
        }
    }
}

/// 解析后的 Quick-ID。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickId {
    pub resource_type: ResourceType,
    pub keys: Vec<String>,
    /// 组合键之后剩余的点分路径（可能为空）。
    pub key_path: String,
}

impl QuickId {
    pub fn parse(value: &str) -> Result<Self, QuickIdError> {
        let (kind, rest) = value
            .split_once(':')
            .ok_or_else(|| QuickIdError::MissingSeparator(value.to_string()))?;
        let resource_type =
            ResourceType::parse(kind).ok_or_else(|| QuickIdError::UnknownType(kind.to_string()))?;
        let need = resource_type.key_names().len();
        let segments: Vec<&str> = rest.trim().splitn(need + 1, '.').collect();
        if segments.len() < need || segments[..need].iter().any(|s| s.is_empty()) {
            return Err(QuickIdError::NotEnoughSegments(value.to_string(), need));
        }
        let keys = segments[..need].iter().map(|s| s.to_string()).collect();
        let key_path = segments.get(need).map(|s| s.to_string()).unwrap_or_default();
        Ok(Self {
            resource_type,
            keys,
            key_path,
        })
    }

    pub fn format(resource_type: ResourceType, keys: &[&str]) -> String {
        format!("{}:{}", resource_type.prefix(), keys.join("."))
    }

    /// 组合键映射：字段名 → 值。
    pub fn key_map(&self) -> BTreeMap<&'static str, String> {
        self.resource_type
            .key_names()
            .iter()
            .copied()
            .zip(self.keys.iter().cloned())
            .collect()
    }
}

impl fmt::Display for QuickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type.prefix(), self.keys.join("."))?;
        if !self.key_path.is_empty() {
            write!(f, ".{}", self.key_path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_field_with_key_path() {
        let qid = QuickId::parse("sf:g1.n1.s1.f1.current.value").expect("parse");
        assert_eq!(qid.resource_type, ResourceType::Field);
        assert_eq!(qid.keys, vec!["g1", "n1", "s1", "f1"]);
        assert_eq!(qid.key_path, "current.value");
        assert_eq!(qid.key_map().get("sourceId").map(String::as_str), Some("s1"));
    }

    #[test]
    fn format_then_parse_restores_keys() {
        let text = QuickId::format(ResourceType::Node, &["gw-1", "12"]);
        let qid = QuickId::parse(&text).expect("parse");
        assert_eq!(qid.resource_type, ResourceType::Node);
        assert_eq!(qid.keys, vec!["gw-1", "12"]);
        assert!(qid.key_path.is_empty());
        assert_eq!(qid.to_string(), text);
    }

    #[test]
    fn rejects_short_or_unknown() {
        assert!(matches!(
            QuickId::parse("sn:g1.n1"),
            Err(QuickIdError::NotEnoughSegments(_, 3))
        ));
        assert!(matches!(
            QuickId::parse("xx:1"),
            Err(QuickIdError::UnknownType(_))
        ));
        assert!(QuickId::parse("no-separator").is_err());
    }

    #[test]
    fn single_id_types_keep_path() {
        let qid = QuickId::parse("dr:weather.data.city").expect("parse");
        assert_eq!(qid.resource_type, ResourceType::DataRepository);
        assert_eq!(qid.keys, vec!["weather"]);
        assert_eq!(qid.key_path, "data.city");
    }
}
