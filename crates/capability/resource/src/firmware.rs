//! 固件内容按固定大小切块推送。

use contract::{FIRMWARE_BLOCK_SIZE, FirmwareBlock};

/// 切分为 `FIRMWARE_BLOCK_SIZE` 字节的块，块号从 0 开始，最后一块 `isFinal`。
/// 空文件也产生一个空的结束块。
pub fn split_blocks(firmware_id: &str, bytes: &[u8]) -> Vec<FirmwareBlock> {
    let total_bytes = bytes.len() as u64;
    if bytes.is_empty() {
        return vec![FirmwareBlock {
            id: firmware_id.to_string(),
            block_number: 0,
            total_bytes,
            is_final: true,
            data: String::new(),
        }];
    }
    let count = bytes.len().div_ceil(FIRMWARE_BLOCK_SIZE);
    bytes
        .chunks(FIRMWARE_BLOCK_SIZE)
        .enumerate()
        .map(|(index, chunk)| FirmwareBlock {
            id: firmware_id.to_string(),
            block_number: index as u64,
            total_bytes,
            is_final: index + 1 == count,
            data: hex::encode(chunk),
        })
        .collect()
}
