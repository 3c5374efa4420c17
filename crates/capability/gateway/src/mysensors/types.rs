//! MySensors 2.x 类型表。

use domain::MetricType;

pub const BROADCAST_ID: u8 = 255;
/// 节点自身（非子设备）的源 ID。
pub const NODE_SOURCE_ID: u8 = 255;

/// 报文命令。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Presentation = 0,
    Set = 1,
    Request = 2,
    Internal = 3,
    Stream = 4,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        let command = match value {
            0 => Command::Presentation,
            1 => Command::Set,
            2 => Command::Request,
            3 => Command::Internal,
            4 => Command::Stream,
            _ => return None,
        };
        Some(command)
    }
}

pub const PRESENTATION_TYPES: [&str; 40] = [
    "S_DOOR",
    "S_MOTION",
    "S_SMOKE",
    "S_BINARY",
    "S_DIMMER",
    "S_COVER",
    "S_TEMP",
    "S_HUM",
    "S_BARO",
    "S_WIND",
    "S_RAIN",
    "S_UV",
    "S_WEIGHT",
    "S_POWER",
    "S_HEATER",
    "S_DISTANCE",
    "S_LIGHT_LEVEL",
    "S_ARDUINO_NODE",
    "S_ARDUINO_REPEATER_NODE",
    "S_LOCK",
    "S_IR",
    "S_WATER",
    "S_AIR_QUALITY",
    "S_CUSTOM",
    "S_DUST",
    "S_SCENE_CONTROLLER",
    "S_RGB_LIGHT",
    "S_RGBW_LIGHT",
    "S_COLOR_SENSOR",
    "S_HVAC",
    "S_MULTIMETER",
    "S_SPRINKLER",
    "S_WATER_LEAK",
    "S_SOUND",
    "S_VIBRATION",
    "S_MOISTURE",
    "S_INFO",
    "S_GAS",
    "S_GPS",
    "S_WATER_QUALITY",
];

pub const SET_TYPES: [&str; 57] = [
    "V_TEMP",
    "V_HUM",
    "V_STATUS",
    "V_PERCENTAGE",
    "V_PRESSURE",
    "V_FORECAST",
    "V_RAIN",
    "V_RAINRATE",
    "V_WIND",
    "V_GUST",
    "V_DIRECTION",
    "V_UV",
    "V_WEIGHT",
    "V_DISTANCE",
    "V_IMPEDANCE",
    "V_ARMED",
    "V_TRIPPED",
    "V_WATT",
    "V_KWH",
    "V_SCENE_ON",
    "V_SCENE_OFF",
    "V_HVAC_FLOW_STATE",
    "V_HVAC_SPEED",
    "V_LIGHT_LEVEL",
    "V_VAR1",
    "V_VAR2",
    "V_VAR3",
    "V_VAR4",
    "V_VAR5",
    "V_UP",
    "V_DOWN",
    "V_STOP",
    "V_IR_SEND",
    "V_IR_RECEIVE",
    "V_FLOW",
    "V_VOLUME",
    "V_LOCK_STATUS",
    "V_LEVEL",
    "V_VOLTAGE",
    "V_CURRENT",
    "V_RGB",
    "V_RGBW",
    "V_ID",
    "V_UNIT_PREFIX",
    "V_HVAC_SETPOINT_COOL",
    "V_HVAC_SETPOINT_HEAT",
    "V_HVAC_FLOW_MODE",
    "V_TEXT",
    "V_CUSTOM",
    "V_POSITION",
    "V_IR_RECORD",
    "V_PH",
    "V_ORP",
    "V_EC",
    "V_VAR",
    "V_VA",
    "V_POWER_FACTOR",
];

pub const INTERNAL_TYPES: [&str; 34] = [
    "I_BATTERY_LEVEL",
    "I_TIME",
    "I_VERSION",
    "I_ID_REQUEST",
    "I_ID_RESPONSE",
    "I_INCLUSION_MODE",
    "I_CONFIG",
    "I_FIND_PARENT",
    "I_FIND_PARENT_RESPONSE",
    "I_LOG_MESSAGE",
    "I_CHILDREN",
    "I_SKETCH_NAME",
    "I_SKETCH_VERSION",
    "I_REBOOT",
    "I_GATEWAY_READY",
    "I_SIGNING_PRESENTATION",
    "I_NONCE_REQUEST",
    "I_NONCE_RESPONSE",
    "I_HEARTBEAT_REQUEST",
    "I_PRESENTATION",
    "I_DISCOVER_REQUEST",
    "I_DISCOVER_RESPONSE",
    "I_HEARTBEAT_RESPONSE",
    "I_LOCKED",
    "I_PING",
    "I_PONG",
    "I_REGISTRATION_REQUEST",
    "I_REGISTRATION_RESPONSE",
    "I_DEBUG",
    "I_SIGNAL_REPORT_REQUEST",
    "I_SIGNAL_REPORT_REVERSE",
    "I_SIGNAL_REPORT_RESPONSE",
    "I_PRE_SLEEP_NOTIFICATION",
    "I_POST_SLEEP_NOTIFICATION",
];

pub const STREAM_TYPES: [&str; 8] = [
    "ST_FIRMWARE_CONFIG_REQUEST",
    "ST_FIRMWARE_CONFIG_RESPONSE",
    "ST_FIRMWARE_REQUEST",
    "ST_FIRMWARE_RESPONSE",
    "ST_SOUND",
    "ST_IMAGE",
    "ST_FIRMWARE_CONFIRM",
    "ST_FIRMWARE_RESPONSE_RLE",
];

pub mod internal {
    pub const BATTERY_LEVEL: u8 = 0;
    pub const TIME: u8 = 1;
    pub const VERSION: u8 = 2;
    pub const ID_REQUEST: u8 = 3;
    pub const ID_RESPONSE: u8 = 4;
    pub const CONFIG: u8 = 6;
    pub const LOG_MESSAGE: u8 = 9;
    pub const SKETCH_NAME: u8 = 11;
    pub const SKETCH_VERSION: u8 = 12;
    pub const REBOOT: u8 = 13;
    pub const GATEWAY_READY: u8 = 14;
    pub const HEARTBEAT_REQUEST: u8 = 18;
    pub const PRESENTATION: u8 = 19;
    pub const DISCOVER_REQUEST: u8 = 20;
    pub const DISCOVER_RESPONSE: u8 = 21;
    pub const HEARTBEAT_RESPONSE: u8 = 22;
    pub const LOCKED: u8 = 23;
    pub const SIGNAL_REPORT_RESPONSE: u8 = 31;
    pub const PRE_SLEEP_NOTIFICATION: u8 = 32;
    pub const POST_SLEEP_NOTIFICATION: u8 = 33;
}

pub mod stream {
    pub const FIRMWARE_CONFIG_REQUEST: u8 = 0;
    pub const FIRMWARE_CONFIG_RESPONSE: u8 = 1;
    pub const FIRMWARE_REQUEST: u8 = 2;
    pub const FIRMWARE_RESPONSE: u8 = 3;
}

/// 按命令取类型名；未知编号返回编号本身。
pub fn type_name(command: Command, type_id: u8) -> String {
    let table: &[&str] = match command {
        Command::Presentation => &PRESENTATION_TYPES,
        Command::Set | Command::Request => &SET_TYPES,
        Command::Internal => &INTERNAL_TYPES,
        Command::Stream => &STREAM_TYPES,
    };
    table
        .get(type_id as usize)
        .map(|name| name.to_string())
        .unwrap_or_else(|| type_id.to_string())
}

/// 按命令由类型名（或数字）取编号。
pub fn type_id(command: Command, name: &str) -> Option<u8> {
    if let Ok(id) = name.trim().parse::<u8>() {
        return Some(id);
    }
    let table: &[&str] = match command {
        Command::Presentation => &PRESENTATION_TYPES,
        Command::Set | Command::Request => &SET_TYPES,
        Command::Internal => &INTERNAL_TYPES,
        Command::Stream => &STREAM_TYPES,
    };
    let name = name.trim().to_ascii_uppercase();
    table
        .iter()
        .position(|candidate| *candidate == name)
        .map(|index| index as u8)
}

/// 字段的度量类型与单位。
pub fn metric_and_unit(field: &str) -> (MetricType, &'static str) {
    match field {
        "V_TEMP" | "V_HVAC_SETPOINT_COOL" | "V_HVAC_SETPOINT_HEAT" => (MetricType::GaugeFloat, "°C"),
        "V_HUM" | "V_PERCENTAGE" | "V_LIGHT_LEVEL" => (MetricType::GaugeFloat, "%"),
        "V_STATUS" | "V_ARMED" | "V_TRIPPED" | "V_LOCK_STATUS" => (MetricType::Binary, ""),
        "V_PRESSURE" => (MetricType::GaugeFloat, "hPa"),
        "V_RAIN" => (MetricType::GaugeFloat, "mm"),
        "V_RAINRATE" => (MetricType::GaugeFloat, "mm/h"),
        "V_WIND" | "V_GUST" => (MetricType::GaugeFloat, "m/s"),
        "V_DIRECTION" => (MetricType::GaugeFloat, "°"),
        "V_UV" => (MetricType::GaugeFloat, "UVI"),
        "V_WEIGHT" => (MetricType::GaugeFloat, "kg"),
        "V_DISTANCE" => (MetricType::GaugeFloat, "cm"),
        "V_IMPEDANCE" => (MetricType::GaugeFloat, "Ω"),
        "V_WATT" => (MetricType::GaugeFloat, "W"),
        "V_KWH" => (MetricType::GaugeFloat, "kWh"),
        "V_FLOW" => (MetricType::GaugeFloat, "m"),
        "V_VOLUME" => (MetricType::GaugeFloat, "l"),
        "V_LEVEL" => (MetricType::GaugeFloat, ""),
        "V_VOLTAGE" => (MetricType::GaugeFloat, "V"),
        "V_CURRENT" => (MetricType::GaugeFloat, "A"),
        "V_PH" => (MetricType::GaugeFloat, "pH"),
        "V_ORP" => (MetricType::GaugeFloat, "mV"),
        "V_EC" => (MetricType::GaugeFloat, "μS/cm"),
        "V_VAR" => (MetricType::GaugeFloat, "var"),
        "V_VA" => (MetricType::GaugeFloat, "VA"),
        "V_POWER_FACTOR" => (MetricType::GaugeFloat, ""),
        "V_POSITION" => (MetricType::Geo, ""),
        "V_FORECAST" | "V_SCENE_ON" | "V_SCENE_OFF" | "V_HVAC_FLOW_STATE" | "V_HVAC_SPEED"
        | "V_IR_SEND" | "V_IR_RECEIVE" | "V_RGB" | "V_RGBW" | "V_ID" | "V_UNIT_PREFIX"
        | "V_HVAC_FLOW_MODE" | "V_TEXT" | "V_IR_RECORD" => (MetricType::String, ""),
        _ => (MetricType::None, ""),
    }
}
