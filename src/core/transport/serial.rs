//! Serial port transport implementation

use super::{Channel, Transport, TransportError, TransportStats};
use crate::core::protocol::BAUD_RATE;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyACM0)
    pub port: String,
    /// How long a read waits for the first byte
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            read_timeout_ms: 10,
        }
    }

    /// Set the read timeout
    #[must_use]
    pub fn read_timeout(mut self, ms: u64) -> Self {
        self.read_timeout_ms = ms;
        self
    }
}

/// Opens 8N1 serial channels without flow control
pub struct SerialTransport {
    config: SerialConfig,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    fn map_open_error(&self, e: tokio_serial::Error) -> TransportError {
        match e.kind() {
            tokio_serial::ErrorKind::NoDevice => TransportError::PortNotFound(self.config.port.clone()),
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(self.config.port.clone())
            }
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                TransportError::PortNotFound(self.config.port.clone())
            }
            _ => TransportError::ConnectionFailed(e.to_string()),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self, baud_rate: u32) -> Result<Box<dyn Channel>, TransportError> {
        let stream = tokio_serial::new(&self.config.port, baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| self.map_open_error(e))?;

        if baud_rate != BAUD_RATE {
            tracing::warn!(baud_rate, "Opening at a rate other than the board default");
        }
        tracing::info!(port = %self.config.port, baud_rate, "Serial port opened");

        Ok(Box::new(SerialChannel {
            stream: Some(stream),
            port: self.config.port.clone(),
            baud_rate,
            read_timeout: Duration::from_millis(self.config.read_timeout_ms.max(1)),
            stats: TransportStats::default(),
            connected_at: Instant::now(),
            buffer: vec![0u8; 64 * 1024],
        }))
    }

    fn describe(&self) -> String {
        self.config.port.clone()
    }
}

struct SerialChannel {
    stream: Option<SerialStream>,
    port: String,
    baud_rate: u32,
    read_timeout: Duration,
    stats: TransportStats,
    connected_at: Instant,
    buffer: Vec<u8>,
}

#[async_trait]
impl Channel for SerialChannel {
    async fn read(&mut self, max: usize) -> Result<Bytes, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;
        let len = max.min(self.buffer.len());

        match tokio::time::timeout(self.read_timeout, stream.read(&mut self.buffer[..len])).await {
            // No data available, return empty
            Err(_) => Ok(Bytes::new()),
            Ok(Ok(0)) => Err(TransportError::Disconnected),
            Ok(Ok(n)) => {
                self.stats.bytes_received += n as u64;
                self.stats.reads += 1;
                Ok(Bytes::copy_from_slice(&self.buffer[..n]))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Bytes::new()),
            Ok(Err(e)) => Err(TransportError::IoError(e)),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;
        stream.write_all(data).await?;
        stream.flush().await?;

        self.stats.bytes_sent += data.len() as u64;
        self.stats.writes += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.stream.take().is_some() {
            tracing::info!(port = %self.port, "Serial port closed");
        }
        Ok(())
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud (8N1 No FC)", self.port, self.baud_rate)
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        stats.uptime_secs = self.connected_at.elapsed().as_secs();
        stats
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<tokio_serial::SerialPortInfo>, TransportError> {
    tokio_serial::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
