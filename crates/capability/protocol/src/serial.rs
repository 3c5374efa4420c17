//! 串口传输（USB/串口网关）
//!
//! ```json
//! { "portname": "/dev/ttyUSB0", "baudRate": 115200 }
//! ```

use crate::error::ProtocolError;
use crate::line::read_lines;
use crate::types::{RxHandler, Transport};
use async_trait::async_trait;
use domain::RawMessage;
use serde::{Deserialize, Serialize};
use std::sync::Mutex as StdMutex;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SerialConfig {
    pub portname: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            portname: String::new(),
            baud_rate: 115_200,
        }
    }
}

/// 串口传输；读循环结束（设备拔出）后写入返回 NotConnected。
pub struct SerialTransport {
    name: String,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    pub fn open(name: &str, config: &SerialConfig, rx: RxHandler) -> Result<Self, ProtocolError> {
        if config.portname.is_empty() {
            return Err(ProtocolError::ConfigParse("serial portname is empty".to_string()));
        }
        let port = tokio_serial::new(&config.portname, config.baud_rate)
            .open_native_async()
            .map_err(|err| ProtocolError::Serial(format!("{}: {err}", config.portname)))?;
        info!(
            target: "mc.gateway",
            transport = %name,
            port = %config.portname,
            baud_rate = config.baud_rate,
            "serial_opened"
        );
        let (reader, writer) = tokio::io::split(port);
        let loop_name = name.to_string();
        let handle = tokio::spawn(async move {
            read_lines(&loop_name, reader, &rx).await;
            warn!(target: "mc.gateway", transport = %loop_name, "serial_reader_stopped");
        });
        Ok(Self {
            name: name.to_string(),
            writer: Mutex::new(Some(writer)),
            handle: StdMutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&self, message: &RawMessage) -> Result<(), ProtocolError> {
        let finished = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_none_or(|handle| handle.is_finished());
        if finished {
            return Err(ProtocolError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        writer.write_all(&message.data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.writer.lock().await.take();
        info!(target: "mc.gateway", transport = %self.name, "serial_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn config_defaults_baud_rate() {
        let config: SerialConfig =
            serde_json::from_value(serde_json::json!({"portname": "/dev/ttyUSB0"})).expect("config");
        assert_eq!(config.baud_rate, 115_200);
    }

    #[tokio::test]
    async fn empty_portname_is_rejected() {
        let rx: RxHandler = Arc::new(|_| {});
        let result = SerialTransport::open("usb", &SerialConfig::default(), rx);
        assert!(matches!(result, Err(ProtocolError::ConfigParse(_))));
    }
}
