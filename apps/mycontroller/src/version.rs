//! `version` 子命令输出。

use serde::Serialize;
use uuid::Uuid;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 构建时通过 `MC_GIT_COMMIT` / `MC_BUILD_DATE` 注入，缺省为 `unknown`。
const GIT_COMMIT: Option<&str> = option_env!("MC_GIT_COMMIT");
const BUILD_DATE: Option<&str> = option_env!("MC_BUILD_DATE");

const MACHINE_ID_FILES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub git_commit: String,
    pub build_date: String,
    pub platform: String,
    pub arch: String,
    pub host_id: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION.to_string(),
            git_commit: GIT_COMMIT.unwrap_or("unknown").to_string(),
            build_date: BUILD_DATE.unwrap_or("unknown").to_string(),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            host_id: host_id(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 主机标识：machine-id 的 UUIDv5；读不到时退回主机名。
fn host_id() -> String {
    let seed = MACHINE_ID_FILES
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "mycontroller".to_string());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}
