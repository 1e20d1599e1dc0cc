//! Transport boundary
//!
//! The session worker only sees a [`Transport`] that opens a [`Channel`] at a
//! bit rate. Supported backends:
//! - Serial ports through `tokio-serial`
//! - An in-memory simulated board for tests and offline runs

mod serial;
mod simulated;

pub use serial::{list_ports, SerialConfig, SerialTransport};
pub use simulated::{encode_ascii_sample, encode_binary_sample, DeviceReply, SimulatedDevice};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,
}

/// Transport statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Writes performed
    pub writes: u64,
    /// Non-empty reads
    pub reads: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// An open byte channel to the board
#[async_trait]
pub trait Channel: Send {
    /// Read up to `max` bytes; returns empty bytes when nothing arrived in time
    async fn read(&mut self, max: usize) -> Result<Bytes, TransportError>;

    /// Write all of `data`
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the channel; further reads and writes fail
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Human readable endpoint description
    fn connection_info(&self) -> String;

    /// Traffic counters
    fn stats(&self) -> TransportStats;
}

/// Factory for channels
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Open a channel at `baud_rate`
    async fn open(&mut self, baud_rate: u32) -> Result<Box<dyn Channel>, TransportError>;

    /// Endpoint description used in logs and device info
    fn describe(&self) -> String;
}
