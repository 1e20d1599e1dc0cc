//! PowerShield wire protocol
//!
//! - Command encoding and the reference parser for the command grammar
//! - Acquisition configuration batches
//! - Reply classification (`ack` / `err` / `error`)
//! - ASCII and binary stream decoders with a versioned metadata table

pub mod acquisition;
pub mod ascii;
pub mod binary;
pub mod command;
pub mod metadata;
pub mod response;

pub use acquisition::AcquisitionConfig;
pub use ascii::AsciiDecoder;
pub use binary::BinaryDecoder;
pub use command::{
    AcqMode, AcqTime, AutotestAction, Command, DataFormat, FuncMode, OutputKind, PowerEnd,
    PowerState, ResponseClass, TempUnit, TriggerSource, BAUD_RATE, FREQUENCIES_HZ,
};
pub use metadata::{DeviceTimestamp, MetadataEvent, MetadataKind, MetadataTable};
pub use response::{LineAssembler, Reply, PROMPT};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// One decoded measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Position in the acquisition, starting at 0
    pub index: u64,
    /// Amperes or joules, depending on the configured output
    pub value: f64,
}

/// Item produced by a stream decoder
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// Measurement
    Sample(Sample),
    /// Metadata interleaved with samples
    Metadata(MetadataEvent),
    /// Command reply or free text seen inside an ASCII stream
    Reply(Reply),
}

/// The stream could not be realigned
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Framing error in {format} stream after {skipped} skipped bytes: {reason}")]
pub struct FramingError {
    /// Stream format
    pub format: DataFormat,
    /// Consecutive bytes skipped
    pub skipped: usize,
    /// Last thing that failed to decode
    pub reason: String,
}

/// How decoded mantissas are signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignMode {
    /// Mantissas are unsigned, values are never negative
    #[default]
    Unsigned,
    /// ASCII tokens may carry a leading `-`, binary mantissas are 12-bit two's complement
    Signed,
}

/// Decoder tuning shared by both formats
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Mantissa sign handling
    pub sign: SignMode,
    /// Consecutive skipped bytes tolerated before a [`FramingError`]
    pub resync_window: usize,
    /// Longest variable-length metadata payload
    pub max_payload: usize,
    /// Frame-type table for binary metadata
    pub metadata: Arc<MetadataTable>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            sign: SignMode::Unsigned,
            resync_window: 64,
            max_payload: 256,
            metadata: Arc::new(MetadataTable::firmware_v1()),
        }
    }
}

/// Stream decoder for the configured format
#[derive(Debug)]
pub enum StreamParser {
    /// `ascii_dec`
    Ascii(AsciiDecoder),
    /// `bin_hexa`
    Binary(BinaryDecoder),
}

impl StreamParser {
    /// Decoder for `format`
    pub fn new(format: DataFormat, options: DecodeOptions) -> Self {
        match format {
            DataFormat::Ascii => Self::Ascii(AsciiDecoder::new(options)),
            DataFormat::Binary => Self::Binary(BinaryDecoder::new(options)),
        }
    }

    /// Format being decoded
    pub fn format(&self) -> DataFormat {
        match self {
            Self::Ascii(_) => DataFormat::Ascii,
            Self::Binary(_) => DataFormat::Binary,
        }
    }

    /// Append raw bytes
    pub fn feed(&mut self, data: &[u8]) {
        match self {
            Self::Ascii(d) => d.feed(data),
            Self::Binary(d) => d.feed(data),
        }
    }

    /// Next decoded item; `None` when more bytes are needed
    pub fn next_item(&mut self) -> Option<Result<StreamItem, FramingError>> {
        match self {
            Self::Ascii(d) => d.next_item(),
            Self::Binary(d) => d.next_item(),
        }
    }

    /// Lazily decode everything currently buffered
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { parser: self }
    }

    /// Drop partial state
    pub fn reset(&mut self) {
        match self {
            Self::Ascii(d) => d.reset(),
            Self::Binary(d) => d.reset(),
        }
    }

    /// Unconsumed bytes
    pub fn take_rest(&mut self) -> BytesMut {
        match self {
            Self::Ascii(d) => d.take_rest(),
            Self::Binary(d) => d.take_rest(),
        }
    }

    /// Samples decoded since the last reset
    pub fn decoded(&self) -> u64 {
        match self {
            Self::Ascii(d) => d.decoded(),
            Self::Binary(d) => d.decoded(),
        }
    }
}

/// Iterator returned by [`StreamParser::drain`]
pub struct Drain<'a> {
    parser: &'a mut StreamParser,
}

impl Iterator for Drain<'_> {
    type Item = Result<StreamItem, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_item()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_dispatches_on_format() {
        let mut ascii = StreamParser::new(DataFormat::Ascii, DecodeOptions::default());
        ascii.feed(b"1500-01\r\n");
        let items: Vec<_> = ascii.drain().collect();
        assert!(matches!(items[..], [Ok(StreamItem::Sample(Sample { value, .. }))] if value == 150.0));

        let mut binary = StreamParser::new(DataFormat::Binary, DecodeOptions::default());
        binary.feed(&[0x15, 0xDC, 0x15]);
        assert_eq!(binary.drain().count(), 1);
        assert_eq!(binary.format(), DataFormat::Binary);
        assert_eq!(&binary.take_rest()[..], &[0x15]);
        binary.reset();
        assert_eq!(binary.decoded(), 0);
    }
}
