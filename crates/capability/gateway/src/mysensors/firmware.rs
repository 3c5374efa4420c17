//! MySensors OTA 固件：Intel HEX 解析、CRC、请求/响应结构与固件缓存。
//!
//! 固件元数据通过资源服务 `firmware/get` 获取，内容按 `firmware.blocks.<reqId>` 分块流回，
//! 拼装后校验 SHA-256，再转换为 128 字节对齐的二进制。

use crate::error::GatewayError;
use contract::service::{command, kind};
use contract::{FirmwareBlock, ServiceEvent, topics};
use domain::Firmware;
use domain::labels::{LABEL_FIRMWARE_TYPE_ID, LABEL_FIRMWARE_VERSION_ID};
use mc_bus::{Bus, BusData, BusExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 每个固件块的字节数。
pub const FIRMWARE_BLOCK_SIZE: usize = 16;
const PAGE_SIZE: usize = 128;

/// 擦除 EEPROM 时回复的 CRC 魔数。
pub const ERASE_EEPROM_CRC: u16 = 0xDA7A;

/// 缓存条目最长空闲时间。
pub const CACHE_IDLE_LIMIT: Duration = Duration::from_secs(15 * 60);
pub const CACHE_PURGE_SPEC: &str = "@every 5m";

const BLOCKS_TIMEOUT: Duration = Duration::from_secs(60);

/// 解析 Intel HEX 文本为按地址排列的字节数组（空洞填 0xFF），并补齐到 128 字节页。
pub fn hex_to_bin(text: &str) -> Result<Vec<u8>, GatewayError> {
    let mut data: Vec<u8> = Vec::new();
    let mut base: usize = 0;
    let mut start: Option<usize> = None;
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let invalid = |reason: &str| GatewayError::Firmware(format!("hex line {}: {reason}", number + 1));
        let record = line.strip_prefix(':').ok_or_else(|| invalid("missing ':'"))?;
        let bytes = hex::decode(record).map_err(|_| invalid("not hex"))?;
        if bytes.len() < 5 {
            return Err(invalid("record too short"));
        }
        let checksum = bytes.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        if checksum != 0 {
            return Err(invalid("checksum mismatch"));
        }
        let length = bytes[0] as usize;
        if bytes.len() != length + 5 {
            return Err(invalid("length mismatch"));
        }
        let address = ((bytes[1] as usize) << 8) | bytes[2] as usize;
        let payload = &bytes[4..4 + length];
        match bytes[3] {
            0x00 => {
                let offset = base + address;
                let begin = *start.get_or_insert(offset);
                if offset < begin {
                    return Err(invalid("address before start"));
                }
                let end = offset - begin + length;
                if data.len() < end {
                    data.resize(end, 0xFF);
                }
                data[offset - begin..end].copy_from_slice(payload);
            }
            0x01 => break,
            0x02 if length == 2 => base = (((payload[0] as usize) << 8) | payload[1] as usize) << 4,
            0x04 if length == 2 => base = (((payload[0] as usize) << 8) | payload[1] as usize) << 16,
            0x03 | 0x05 => {}
            other => return Err(invalid(&format!("unsupported record type {other:02X}"))),
        }
    }
    if data.is_empty() {
        return Err(GatewayError::Firmware("hex file has no data".to_string()));
    }
    let padded = data.len().div_ceil(PAGE_SIZE) * PAGE_SIZE;
    data.resize(padded, 0xFF);
    Ok(data)
}

/// MySensors 引导程序使用的 CRC16（多项式 0xA001，初值 0xFFFF）。
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= *byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

fn read_u16(bytes: &[u8], index: usize) -> u16 {
    u16::from_le_bytes([bytes[index * 2], bytes[index * 2 + 1]])
}

fn decode_payload(payload: &str, words: usize) -> Result<Vec<u8>, GatewayError> {
    let bytes = hex::decode(payload.trim())
        .map_err(|err| GatewayError::Decode(format!("firmware payload: {err}")))?;
    if bytes.len() < words * 2 {
        return Err(GatewayError::Decode(format!(
            "firmware payload too short: {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// 节点发来的固件配置请求。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareConfigRequest {
    pub type_id: u16,
    pub version: u16,
    pub blocks: u16,
    pub crc: u16,
    pub bootloader_version: u16,
}

impl FirmwareConfigRequest {
    pub fn decode(payload: &str) -> Result<Self, GatewayError> {
        let bytes = decode_payload(payload, 4)?;
        Ok(Self {
            type_id: read_u16(&bytes, 0),
            version: read_u16(&bytes, 1),
            blocks: read_u16(&bytes, 2),
            crc: read_u16(&bytes, 3),
            bootloader_version: if bytes.len() >= 10 { read_u16(&bytes, 4) } else { 0 },
        })
    }
}

/// 固件配置响应。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareConfigResponse {
    pub type_id: u16,
    pub version: u16,
    pub blocks: u16,
    pub crc: u16,
}

impl FirmwareConfigResponse {
    /// 让节点擦除 EEPROM 的特殊响应。
    pub fn erase_eeprom() -> Self {
        Self {
            type_id: 1,
            version: 0,
            blocks: 0,
            crc: ERASE_EEPROM_CRC,
        }
    }

    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(8);
        for word in [self.type_id, self.version, self.blocks, self.crc] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        hex::encode_upper(bytes)
    }

    pub fn decode(payload: &str) -> Result<Self, GatewayError> {
        let bytes = decode_payload(payload, 4)?;
        Ok(Self {
            type_id: read_u16(&bytes, 0),
            version: read_u16(&bytes, 1),
            blocks: read_u16(&bytes, 2),
            crc: read_u16(&bytes, 3),
        })
    }
}

/// 节点请求的固件块。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareRequest {
    pub type_id: u16,
    pub version: u16,
    pub block: u16,
}

impl FirmwareRequest {
    pub fn decode(payload: &str) -> Result<Self, GatewayError> {
        let bytes = decode_payload(payload, 3)?;
        Ok(Self {
            type_id: read_u16(&bytes, 0),
            version: read_u16(&bytes, 1),
            block: read_u16(&bytes, 2),
        })
    }

    /// 响应：请求头加 16 字节数据。
    pub fn encode_response(&self, data: &[u8]) -> String {
        let mut bytes = Vec::with_capacity(6 + data.len());
        for word in [self.type_id, self.version, self.block] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.extend_from_slice(data);
        hex::encode_upper(bytes)
    }
}

/// 已转换的固件。
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub firmware_id: String,
    pub checksum: String,
    pub type_id: u16,
    pub version: u16,
    pub data: Arc<Vec<u8>>,
    pub blocks: u16,
    pub crc: u16,
}

impl FirmwareImage {
    pub fn from_hex(firmware: &Firmware, text: &str) -> Result<Self, GatewayError> {
        let label = |key: &str| {
            firmware
                .labels
                .get(key)
                .unwrap_or_default()
                .trim()
                .parse::<u16>()
                .map_err(|_| {
                    GatewayError::Firmware(format!("firmware {} has no numeric `{key}` label", firmware.id))
                })
        };
        let data = hex_to_bin(text)?;
        let blocks = u16::try_from(data.len() / FIRMWARE_BLOCK_SIZE)
            .map_err(|_| GatewayError::Firmware(format!("firmware {} is too large", firmware.id)))?;
        Ok(Self {
            firmware_id: firmware.id.clone(),
            checksum: firmware.file.checksum.clone(),
            type_id: label(LABEL_FIRMWARE_TYPE_ID)?,
            version: label(LABEL_FIRMWARE_VERSION_ID)?,
            crc: crc16(&data),
            blocks,
            data: Arc::new(data),
        })
    }

    pub fn config_response(&self) -> FirmwareConfigResponse {
        FirmwareConfigResponse {
            type_id: self.type_id,
            version: self.version,
            blocks: self.blocks,
            crc: self.crc,
        }
    }

    pub fn block(&self, block: u16) -> Option<&[u8]> {
        let start = block as usize * FIRMWARE_BLOCK_SIZE;
        self.data.get(start..start + FIRMWARE_BLOCK_SIZE)
    }
}

struct CacheEntry {
    image: FirmwareImage,
    last_access: Instant,
}

/// 固件缓存；清理作业是唯一的淘汰者。
#[derive(Default)]
pub struct FirmwareCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl FirmwareCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按固件 ID 取缓存；元数据校验和变化时视为未命中。
    pub fn get(&self, firmware_id: &str, checksum: &str) -> Option<FirmwareImage> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries.get_mut(firmware_id)?;
        if entry.image.checksum != checksum {
            return None;
        }
        entry.last_access = Instant::now();
        Some(entry.image.clone())
    }

    /// 按节点请求中的类型/版本查找。
    pub fn find(&self, type_id: u16, version: u16) -> Option<FirmwareImage> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries
            .values_mut()
            .find(|entry| entry.image.type_id == type_id && entry.image.version == version)?;
        entry.last_access = Instant::now();
        Some(entry.image.clone())
    }

    pub fn insert(&self, image: FirmwareImage) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                image.firmware_id.clone(),
                CacheEntry {
                    image,
                    last_access: Instant::now(),
                },
            );
    }

    /// 淘汰空闲超过 `idle_limit` 的条目，返回淘汰数量。
    pub fn purge(&self, idle_limit: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.last_access.elapsed() < idle_limit);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(target: "mc.gateway", removed, "firmware_cache_purged");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 通过资源服务拉取固件内容并校验 SHA-256。
pub async fn fetch_firmware_bytes(
    bus: &Arc<dyn Bus>,
    firmware: &Firmware,
) -> Result<Vec<u8>, GatewayError> {
    let request_id = mc_telemetry::new_correlation_id();
    let topic = topics::firmware_blocks(&request_id);
    let (tx, mut rx) = mpsc::unbounded_channel::<BusData>();
    let sub_id = bus.subscribe(
        &topic,
        Arc::new(move |data| {
            let _ = tx.send(data);
        }),
    )?;
    let mut event = ServiceEvent::new(kind::FIRMWARE, command::BLOCKS).with_id(firmware.id.clone());
    event.reply_topic = topic.clone();
    let collected = async {
        bus.publish(topics::SERVICE_RESOURCE_SERVER, &event)?;
        let mut blocks: Vec<FirmwareBlock> = Vec::new();
        loop {
            let data = rx
                .recv()
                .await
                .ok_or_else(|| GatewayError::Firmware("block stream closed".to_string()))?;
            let block: FirmwareBlock = data.decode()?;
            let is_final = block.is_final;
            blocks.push(block);
            if is_final {
                break;
            }
        }
        Ok::<_, GatewayError>(blocks)
    };
    let outcome = tokio::time::timeout(BLOCKS_TIMEOUT, collected).await;
    let _ = bus.unsubscribe(&topic, sub_id);
    let mut blocks = outcome.map_err(|_| {
        GatewayError::Firmware(format!("timed out fetching firmware {}", firmware.id))
    })??;
    blocks.sort_by_key(|block| block.block_number);
    let mut bytes = Vec::new();
    for block in &blocks {
        let chunk = hex::decode(&block.data)
            .map_err(|err| GatewayError::Decode(format!("firmware block: {err}")))?;
        bytes.extend_from_slice(&chunk);
    }
    verify_checksum(&firmware.file.checksum, &bytes)?;
    info!(
        target: "mc.gateway",
        firmware_id = %firmware.id,
        size = bytes.len(),
        blocks = blocks.len(),
        "firmware_fetched"
    );
    Ok(bytes)
}

/// 校验 SHA-256，接受 `sha256:<hex>` 或裸 hex 摘要；未设置校验和时告警后放行。
pub fn verify_checksum(expected: &str, bytes: &[u8]) -> Result<(), GatewayError> {
    let expected = expected.trim();
    if expected.is_empty() {
        warn!(target: "mc.gateway", size = bytes.len(), "firmware_checksum_missing");
        return Ok(());
    }
    let digest = match expected.split_once(':') {
        Some((algorithm, digest)) if algorithm.eq_ignore_ascii_case("sha256") => digest.trim(),
        Some((algorithm, _)) => {
            return Err(GatewayError::Firmware(format!(
                "unsupported checksum algorithm `{algorithm}`"
            )));
        }
        None => expected,
    };
    let actual = hex::encode(Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(digest) {
        return Err(GatewayError::Firmware(format!(
            "checksum mismatch: expected {digest}, got {actual}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLINK: &str = ":100000000C9434000C943E000C943E000C943E0082\n\
                         :00000001FF\n";

    #[test]
    fn hex_is_page_aligned_and_checked() {
        let data = hex_to_bin(BLINK).expect("hex");
        assert_eq!(data.len(), 128);
        assert_eq!(&data[..4], &[0x0C, 0x94, 0x34, 0x00]);
        assert!(data[16..].iter().all(|byte| *byte == 0xFF));

        let corrupted = BLINK.replace("82\n", "83\n");
        assert!(hex_to_bin(&corrupted).is_err());
    }

    #[test]
    fn crc_matches_reference_vector() {
        // CRC-16/MODBUS("123456789") = 0x4B37
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&hex_to_bin(BLINK).expect("hex")), crc16(&hex_to_bin(BLINK).expect("hex")));
    }

    #[test]
    fn structs_are_little_endian_hex() {
        let response = FirmwareConfigResponse::erase_eeprom();
        assert_eq!(response.encode(), "0100000000007ADA");
        assert_eq!(FirmwareConfigResponse::decode(&response.encode()).expect("decode"), response);

        let request = FirmwareRequest::decode("010002000A00").expect("decode");
        assert_eq!((request.type_id, request.version, request.block), (1, 2, 10));
        assert!(request.encode_response(&[0xAB; 16]).starts_with("010002000A00ABAB"));
    }

    #[test]
    fn cache_purges_idle_entries() {
        let mut firmware = Firmware {
            id: "fw1".to_string(),
            ..Default::default()
        };
        firmware.labels.set(LABEL_FIRMWARE_TYPE_ID, "3");
        firmware.labels.set(LABEL_FIRMWARE_VERSION_ID, "7");
        let image = FirmwareImage::from_hex(&firmware, BLINK).expect("image");
        assert_eq!(image.blocks, 8);
        let cache = FirmwareCache::new();
        cache.insert(image);
        assert!(cache.find(3, 7).is_some());
        assert!(cache.get("fw1", "sha256:other").is_none());
        assert_eq!(cache.purge(Duration::from_secs(60)), 0);
        assert_eq!(cache.purge(Duration::ZERO), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn checksum_verification() {
        let digest = hex::encode(Sha256::digest(b"abc"));
        assert!(verify_checksum(&format!("sha256:{digest}"), b"abc").is_ok());
        assert!(verify_checksum(&format!("sha256:{digest}"), b"abd").is_err());
        assert!(verify_checksum(&digest, b"abc").is_ok());
        assert!(verify_checksum(&digest.to_uppercase(), b"abc").is_ok());
        assert!(verify_checksum(&digest, b"abd").is_err());
        assert!(verify_checksum(&format!("md5:{digest}"), b"abc").is_err());
        assert!(verify_checksum("", b"abd").is_ok());
    }
}
