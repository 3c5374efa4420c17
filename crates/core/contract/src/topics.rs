//! 总线 topic 约定。
//!
//! 段之间以 `.` 分隔，末尾 `>` 表示前缀通配。

use domain::EntityType;

pub const INTERNAL_SHUTDOWN: &str = "internal.shutdown";
pub const INTERNAL_SYSTEM_JOBS: &str = "internal.system_jobs";

pub const MESSAGE_TO_PROCESSOR: &str = "message.to_message_processor";
pub const MESSAGE_TO_PROVIDER: &str = "message.to_provider";
pub const MESSAGE_RAW_ACK: &str = "message.raw_message_acknowledgement";
pub const MESSAGE_NOTIFY_HANDLER: &str = "message.notify_handler";

pub const SERVICE_RESOURCE_SERVER: &str = "service.resource_server";
pub const SERVICE_GATEWAY: &str = "service.gateway";
pub const SERVICE_HANDLER: &str = "service.handler";
pub const SERVICE_TASK: &str = "service.task";
pub const SERVICE_SCHEDULER: &str = "service.scheduler";
pub const SERVICE_VIRTUAL_ASSISTANT: &str = "service.virtual_assistant";

pub const EVENT_PREFIX: &str = "event";
pub const EVENT_ALL: &str = "event.>";

pub const FIRMWARE_BLOCKS: &str = "firmware.blocks";

/// 请求/应答临时 topic 前缀。
pub const REPLY_TOPIC_PREFIX: &str = "internal_query_response_";

pub const WILDCARD: &str = ">";

/// 发往指定网关 provider 的 topic。
pub fn message_to_provider(gateway_id: &str) -> String {
    format!("{}.{}", MESSAGE_TO_PROVIDER, gateway_id)
}

/// 原始报文确认 topic（按关联 ID）。
pub fn raw_message_ack(correlation_id: &str) -> String {
    format!("{}.{}", MESSAGE_RAW_ACK, correlation_id)
}

/// 实体事件 topic。
pub fn entity_event(entity_type: EntityType) -> String {
    format!("{}.{}", EVENT_PREFIX, entity_type.as_str())
}

/// 固件分块推送 topic（按请求 ID）。
pub fn firmware_blocks(request_id: &str) -> String {
    format!("{}.{}", FIRMWARE_BLOCKS, request_id)
}

/// 生成请求/应答临时 topic。
pub fn reply_topic(correlation_id: &str) -> String {
    format!("{}{}", REPLY_TOPIC_PREFIX, correlation_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_topics_from_ids() {
        assert_eq!(message_to_provider("gw1"), "message.to_provider.gw1");
        assert_eq!(raw_message_ack("11-1-1-1-2"), "message.raw_message_acknowledgement.11-1-1-1-2");
        assert_eq!(entity_event(EntityType::DataRepository), "event.data_repository");
        assert_eq!(firmware_blocks("f1"), "firmware.blocks.f1");
    }
}
