//! TCP 客户端传输（以太网网关）
//!
//! 主动连接设备，按行读取；连接断开后按重连间隔自动重连。
//!
//! ```json
//! { "host": "192.168.1.100", "port": 5003, "connectTimeout": "5s", "reconnectInterval": "5s" }
//! ```

use crate::error::ProtocolError;
use crate::line::read_lines;
use crate::types::{RxHandler, Transport};
use async_trait::async_trait;
use domain::RawMessage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// TCP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TcpClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: String,
    pub reconnect_interval: String,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5003,
            connect_timeout: "5s".to_string(),
            reconnect_interval: "5s".to_string(),
        }
    }
}

impl TcpClientConfig {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TCP 客户端传输
pub struct TcpClientTransport {
    name: String,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl TcpClientTransport {
    /// 首次连接失败直接返回错误；之后的断线在后台重连。
    pub async fn connect(
        name: &str,
        config: &TcpClientConfig,
        rx: RxHandler,
    ) -> Result<Self, ProtocolError> {
        let connect_timeout =
            domain::duration::parse_duration_or(&config.connect_timeout, Duration::from_secs(5));
        let reconnect_interval =
            domain::duration::parse_duration_or(&config.reconnect_interval, Duration::from_secs(5));
        let addr = config.addr();
        let stream = dial(&addr, connect_timeout).await?;
        info!(target: "mc.gateway", transport = %name, addr = %addr, "tcp_connected");

        let (reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(Some(writer)));
        let loop_writer = writer.clone();
        let loop_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut reader = reader;
            loop {
                read_lines(&loop_name, &mut reader, &rx).await;
                loop_writer.lock().await.take();
                warn!(
                    target: "mc.gateway",
                    transport = %loop_name,
                    retry_in = ?reconnect_interval,
                    "tcp_disconnected"
                );
                loop {
                    tokio::time::sleep(reconnect_interval).await;
                    match dial(&addr, connect_timeout).await {
                        Ok(stream) => {
                            let (next_reader, next_writer) = stream.into_split();
                            reader = next_reader;
                            *loop_writer.lock().await = Some(next_writer);
                            info!(target: "mc.gateway", transport = %loop_name, addr = %addr, "tcp_reconnected");
                            break;
                        }
                        Err(err) => {
                            error!(target: "mc.gateway", transport = %loop_name, error = %err, "tcp_reconnect_failed");
                        }
                    }
                }
            }
        });
        Ok(Self {
            name: name.to_string(),
            writer,
            handle: StdMutex::new(Some(handle)),
        })
    }
}

async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream, ProtocolError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(ProtocolError::Connection(format!("{addr}: {err}"))),
        Err(_) => Err(ProtocolError::Timeout(format!("connect {addr}"))),
    }
}

#[async_trait]
impl Transport for TcpClientTransport {
    async fn write(&self, message: &RawMessage) -> Result<(), ProtocolError> {
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
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        info!(target: "mc.gateway", transport = %self.name, "tcp_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reads_lines_and_writes_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            socket.write_all(b"0;255;3;0;2;2.3.2\n").await.expect("write");
            let mut line = String::new();
            BufReader::new(&mut socket).read_line(&mut line).await.expect("read");
            line
        });

        let (tx, mut rx_frames) = tokio::sync::mpsc::unbounded_channel();
        let rx: RxHandler = Arc::new(move |message: RawMessage| {
            let _ = tx.send(message.data_as_string());
        });
        let config = TcpClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let transport = TcpClientTransport::connect("eth", &config, rx)
            .await
            .expect("connect");
        assert_eq!(rx_frames.recv().await.expect("frame"), "0;255;3;0;2;2.3.2");

        transport
            .write(&RawMessage::new(false, b"11;1;1;0;2;1\n".to_vec()))
            .await
            .expect("write");
        assert_eq!(server.await.expect("server"), "11;1;1;0;2;1\n");
        transport.close().await;
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let config = TcpClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let rx: RxHandler = Arc::new(|_| {});
        assert!(TcpClientTransport::connect("eth", &config, rx).await.is_err());
    }
}
