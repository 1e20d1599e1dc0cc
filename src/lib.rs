//! # PowerShield Core Library
//!
//! Host-side protocol engine for the X-NUCLEO-LPM01A (PowerShield) current
//! measurement board, driven over its USB virtual COM port:
//! - Command encoding with local parameter validation
//! - Session state machine (idle, ready, acquiring, error)
//! - ASCII and binary sample stream decoding with metadata frames
//! - Bounded sample store and running statistics
//! - Serial and simulated transports
//!
//! ## Example
//!
//! ```rust,no_run
//! use powershield_core::{AcquisitionConfig, EngineSettings, SerialConfig, SerialTransport, Session};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = SerialTransport::new(SerialConfig::new("/dev/ttyACM0"));
//!     let session = Session::spawn(transport, EngineSettings::default());
//!
//!     session.connect().await?;
//!     session.configure(&AcquisitionConfig::default()).await?;
//!     session.start().await?;
//!
//!     let mut events = session.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if let powershield_core::SessionEvent::StateChanged { to, .. } = event {
//!             if to == powershield_core::SessionState::Ready {
//!                 break;
//!             }
//!         }
//!     }
//!     println!("{:?}", session.snapshot());
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::AppConfig;
pub use crate::core::error::EngineError;
pub use crate::core::protocol::{AcquisitionConfig, Command, DataFormat, Sample, SignMode};
pub use crate::core::session::{Ack, DeviceInfo, EngineSettings, Session, SessionEvent};
pub use crate::core::state_machine::SessionState;
pub use crate::core::stats::StatsSnapshot;
pub use crate::core::transport::{SerialConfig, SerialTransport, SimulatedDevice, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
