//! 行分隔的读循环（TCP 与串口共用）。

use crate::types::RxHandler;
use domain::RawMessage;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

/// 读取以 `\n` 结尾的帧直到 EOF 或读错误；空行忽略。
pub(crate) async fn read_lines<R: AsyncRead + Unpin>(name: &str, reader: R, rx: &RxHandler) {
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => {
                debug!(target: "mc.gateway", transport = %name, "line_reader_eof");
                return;
            }
            Ok(_) => {
                let line = trim_line(&buffer);
                if line.is_empty() {
                    continue;
                }
                rx(RawMessage::new(true, line.to_vec()));
            }
            Err(err) => {
                warn!(target: "mc.gateway", transport = %name, error = %err, "line_reader_error");
                return;
            }
        }
    }
}

fn trim_line(buffer: &[u8]) -> &[u8] {
    let mut end = buffer.len();
    while end > 0 && matches!(buffer[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &buffer[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn splits_frames_and_skips_blank_lines() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let rx: RxHandler = Arc::new(move |message: RawMessage| {
            sink.lock().expect("lock").push(message.data_as_string());
        });
        let input: &[u8] = b"0;255;3;0;14;Gateway startup complete.\r\n\n11;1;1;0;0;21.5\n";
        read_lines("test", input, &rx).await;
        assert_eq!(
            *frames.lock().expect("lock"),
            vec!["0;255;3;0;14;Gateway startup complete.", "11;1;1;0;0;21.5"]
        );
    }
}
