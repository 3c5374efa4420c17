//! 变量引擎：把 `名称 → 变量定义` 解析为 `名称 → 值`。
//!
//! - `string`：模板渲染字面值
//! - `webhook`：HTTP 调用，响应体按 JSON 解析
//! - `resource_by_quick_id`：按 Quick-ID 取实体，再按键路径下钻
//! - `resource_by_labels`：按标签列出实体，取第一个再按键路径下钻
//!
//! 解析结果深拷贝后原地解密敏感字段。

use contract::ErrorKind;
use domain::quick_id::QuickIdError;
use domain::{QuickId, ResourceType, Spec, VariableSpec, get_by_key_path};
use mc_crypto::{CryptoError, SecretCipher};
use mc_script::{ScriptError, TemplateEngine, WebhookClient};
use mc_storage::{EntityApi, StorageError};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// 变量解析错误。
#[derive(Debug, thiserror::Error)]
pub enum VariableError {
    #[error("variable `{name}`: {source}")]
    Script {
        name: String,
        #[source]
        source: ScriptError,
    },
    #[error("variable `{name}`: {source}")]
    Storage {
        name: String,
        #[source]
        source: StorageError,
    },
    #[error("variable `{name}`: {source}")]
    QuickId {
        name: String,
        #[source]
        source: QuickIdError,
    },
    #[error("variable `{0}`: unknown resource type `{1}`")]
    ResourceType(String, String),
    #[error("decrypt failed: {0}")]
    Crypto(#[from] CryptoError),
}

impl VariableError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VariableError::Script { source, .. } => source.kind(),
            VariableError::Storage { source, .. } => source.kind(),
            VariableError::QuickId { .. } | VariableError::ResourceType(..) => ErrorKind::Config,
            VariableError::Crypto(_) => ErrorKind::Internal,
        }
    }
}

/// 变量引擎。
#[derive(Clone)]
pub struct VariableEngine {
    api: EntityApi,
    templates: TemplateEngine,
    webhook: WebhookClient,
    cipher: Option<SecretCipher>,
}

impl VariableEngine {
    pub fn new(
        api: EntityApi,
        templates: TemplateEngine,
        webhook: WebhookClient,
        cipher: Option<SecretCipher>,
    ) -> Self {
        Self {
            api,
            templates,
            webhook,
            cipher,
        }
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    /// 解析全部变量；任一变量失败即返回错误。
    ///
    /// `scope` 为字面值模板渲染时可见的数据。
    pub async fn load(
        &self,
        variables: &BTreeMap<String, VariableSpec>,
        scope: &Spec,
    ) -> Result<Spec, VariableError> {
        let mut resolved = Spec::new();
        for (name, spec) in variables {
            let value = self.load_one(name, spec, scope).await?;
            resolved.insert(name.clone(), value);
        }
        debug!(target: "mc.task", count = resolved.len(), "variables_loaded");

        let mut cloned = Value::Object(resolved);
        if let Some(cipher) = &self.cipher {
            cipher.decrypt_value(&mut cloned)?;
        }
        Ok(match cloned {
            Value::Object(map) => map,
            _ => Spec::new(),
        })
    }

    async fn load_one(
        &self,
        name: &str,
        spec: &VariableSpec,
        scope: &Spec,
    ) -> Result<Value, VariableError> {
        match spec {
            VariableSpec::String { value } => self
                .templates
                .render(value, scope)
                .map(Value::String)
                .map_err(|source| VariableError::Script {
                    name: name.to_string(),
                    source,
                }),
            VariableSpec::Webhook(config) => {
                let script_err = |source| VariableError::Script {
                    name: name.to_string(),
                    source,
                };
                let response = self
                    .webhook
                    .call(config, "GET", None)
                    .await
                    .map_err(script_err)?;
                response.json_map().map(Value::Object).map_err(script_err)
            }
            VariableSpec::ResourceByQuickId { quick_id, key_path } => {
                let parsed = QuickId::parse(quick_id).map_err(|source| VariableError::QuickId {
                    name: name.to_string(),
                    source,
                })?;
                let entity = self
                    .api
                    .get_by_quick_id(&parsed)
                    .await
                    .map_err(|source| VariableError::Storage {
                        name: name.to_string(),
                        source,
                    })?;
                let path = if key_path.is_empty() {
                    parsed.key_path.as_str()
                } else {
                    key_path.as_str()
                };
                Ok(walk(&entity, path))
            }
            VariableSpec::ResourceByLabels {
                resource_type,
                labels,
                key_path,
            } => {
                let kind = ResourceType::parse(resource_type).ok_or_else(|| {
                    VariableError::ResourceType(name.to_string(), resource_type.clone())
                })?;
                let items = self
                    .api
                    .list_by_labels(kind, labels)
                    .await
                    .map_err(|source| VariableError::Storage {
                        name: name.to_string(),
                        source,
                    })?;
                Ok(items
                    .first()
                    .map(|entity| walk(entity, key_path))
                    .unwrap_or(Value::Null))
            }
        }
    }
}

fn walk(entity: &Value, key_path: &str) -> Value {
    get_by_key_path(entity, key_path)
        .cloned()
        .unwrap_or(Value::Null)
}
