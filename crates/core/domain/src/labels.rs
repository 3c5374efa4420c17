//! 实体标签。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 常用标签键。
pub const LABEL_READ_ONLY: &str = "read_only";
pub const LABEL_SCRIPT_TIMEOUT: &str = "script_timeout";
pub const LABEL_TIMEZONE: &str = "timezone";
pub const LABEL_SMART_SLEEP_NODE: &str = "smart_sleep_node";
pub const LABEL_NODE_ID: &str = "ms_node_id";
pub const LABEL_SOURCE_ID: &str = "ms_source_id";
pub const LABEL_TYPE_STRING: &str = "ms_type_string";
pub const LABEL_ASSIGNED_FIRMWARE: &str = "ms_assigned_firmware";
pub const LABEL_ERASE_EEPROM: &str = "ms_erase_eeprom";
pub const LABEL_OTA_BLOCK_ORDER: &str = "ms_ota_block_order";
pub const LABEL_IMPERIAL_SYSTEM: &str = "ms_imperial_system";
pub const LABEL_FIRMWARE_TYPE_ID: &str = "ms_type_id";
pub const LABEL_FIRMWARE_VERSION_ID: &str = "ms_version_id";
pub const LABEL_SUNRISE_SCHEDULE: &str = "sunrise_schedule";

/// 字符串标签集合（有序，便于稳定序列化）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// 按布尔解析标签值，缺失或无法识别时为 false。
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|value| parse_bool(value))
            .unwrap_or(false)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).filter(|v| !v.is_empty()).unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// 判断 `filter` 中每个键值都在本集合中相等出现。
    pub fn matches(&self, filter: &Labels) -> bool {
        filter
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    /// 合并其他标签（覆盖同名键）。
    pub fn merge(&mut self, other: &Labels) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// 宽松布尔解析：`true/1/on/yes`。
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes" | "y"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_requires_every_filter_pair() {
        let labels: Labels = [("location", "hall"), ("floor", "1")].into_iter().collect();
        let filter: Labels = [("location", "hall")].into_iter().collect();
        assert!(labels.matches(&filter));

        let miss: Labels = [("location", "kitchen")].into_iter().collect();
        assert!(!labels.matches(&miss));
        assert!(labels.matches(&Labels::new()));
    }

    #[test]
    fn get_bool_is_lenient() {
        let labels: Labels = [("a", "TRUE"), ("b", "on"), ("c", "no")].into_iter().collect();
        assert!(labels.get_bool("a"));
        assert!(labels.get_bool("b"));
        assert!(!labels.get_bool("c"));
        assert!(!labels.get_bool("missing"));
    }
}
