use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 运行状态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Up,
    Down,
    Error,
    Ok,
    #[default]
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "up",
            Status::Down => "down",
            Status::Error => "error",
            Status::Ok => "ok",
            Status::Unknown => "unknown",
        }
    }
}

/// 实体状态 `{status, since, message}`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub status: Status,
    pub since: Option<DateTime<Utc>>,
    pub message: String,
}

impl State {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            since: Some(Utc::now()),
            message: message.into(),
        }
    }

    pub fn up(message: impl Into<String>) -> Self {
        Self::new(Status::Up, message)
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self::new(Status::Down, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, message)
    }

    /// 用新状态覆盖；状态值不变时保留原 `since`。
    pub fn transition(&mut self, next: State) {
        if self.status == next.status && self.since.is_some() {
            self.message = next.message;
            return;
        }
        *self = next;
    }
}
