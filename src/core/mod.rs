//! Core module containing the PowerShield protocol engine
//!
//! This module provides:
//! - Command encoding and reply classification
//! - ASCII and binary stream decoders with metadata frames
//! - Session handle with a single worker task and explicit state machine
//! - Bounded sample store and running statistics
//! - Transport boundary (serial ports, simulated board)

pub mod error;
pub mod export;
pub mod protocol;
pub mod session;
pub mod state_machine;
pub mod stats;
pub mod store;
pub mod transport;

mod worker;
