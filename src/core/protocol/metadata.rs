//! Acquisition metadata
//!
//! Binary streams carry metadata in `0xF0 <type> <payload> 0xFF 0xFF`
//! frames. Payload layouts are looked up in a [`MetadataTable`], so a new
//! firmware revision only needs a new table. ASCII streams report the same
//! kinds as text lines.

use super::command::DataFormat;
use bytes::Bytes;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Metadata frame start byte
pub const FRAME_START: u8 = 0xF0;

/// Metadata frame trailer
pub const FRAME_END: [u8; 2] = [0xFF, 0xFF];

/// Kind of metadata event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    /// Device time and buffer load
    Timestamp,
    /// Device-side error text
    ErrorCode,
    /// Acquisition finished
    EndOfAcquisition,
    /// Target current exceeded the measurable range
    OvercurrentEvent,
    /// Informational text
    Info,
    /// Target power was cut
    TargetPowerDown,
    /// Target supply voltage report
    Voltage,
}

/// A metadata item from the stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataEvent {
    /// Event kind
    pub kind: MetadataKind,
    /// Raw payload (binary frames) or line text (ASCII)
    #[serde(with = "hex_bytes")]
    pub payload: Bytes,
    /// Stream format it was decoded from
    pub source: DataFormat,
}

mod hex_bytes {
    use bytes::Bytes;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(payload))
    }
}

impl MetadataEvent {
    /// Build an event
    pub fn new(kind: MetadataKind, payload: impl Into<Bytes>, source: DataFormat) -> Self {
        Self {
            kind,
            payload: payload.into(),
            source,
        }
    }

    /// Payload as text, for ErrorCode and Info events
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).trim().to_string()
    }

    /// Interpret a Timestamp payload
    pub fn timestamp(&self) -> Option<DeviceTimestamp> {
        if self.kind != MetadataKind::Timestamp {
            return None;
        }
        match self.source {
            DataFormat::Binary => DeviceTimestamp::from_frame(&self.payload),
            DataFormat::Ascii => DeviceTimestamp::from_line(&self.text()),
        }
    }

    /// Interpret a Voltage payload in millivolts
    pub fn voltage_mv(&self) -> Option<u16> {
        match (self.kind, &self.payload[..]) {
            (MetadataKind::Voltage, [hi, lo]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

/// Device time reported by Timestamp metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceTimestamp {
    /// Milliseconds since acquisition start
    pub time_ms: u64,
    /// The 31-bit counter wrapped
    pub overflowed: bool,
    /// Device buffer load in percent
    pub buffer_load: u8,
}

impl DeviceTimestamp {
    /// Binary layout: u32 big-endian ms (bit 31 overflow), u8 load
    pub fn from_frame(payload: &[u8]) -> Option<Self> {
        match payload {
            [a, b, c, d, load] => {
                let raw = u32::from_be_bytes([*a, *b, *c, *d]);
                Some(Self {
                    time_ms: u64::from(raw & 0x7FFF_FFFF),
                    overflowed: raw & 0x8000_0000 != 0,
                    buffer_load: *load,
                })
            }
            _ => None,
        }
    }

    /// Text layout, e.g. `Timestamp: 12s 345ms, buffer: 3%`
    pub fn from_line(line: &str) -> Option<Self> {
        static PATTERNS: OnceLock<Option<(Regex, Regex, Regex)>> = OnceLock::new();
        let (secs, millis, load) = PATTERNS
            .get_or_init(|| {
                Some((
                    Regex::new(r"(\d+)\s*s\b").ok()?,
                    Regex::new(r"(\d+)\s*ms").ok()?,
                    Regex::new(r"(\d+)\s*%").ok()?,
                ))
            })
            .as_ref()?;

        let capture = |re: &Regex| -> Option<u64> {
            re.captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        };

        let s = capture(secs);
        let ms = capture(millis);
        if s.is_none() && ms.is_none() {
            return None;
        }
        Some(Self {
            time_ms: s.unwrap_or(0) * 1000 + ms.unwrap_or(0),
            overflowed: false,
            buffer_load: capture(load).map_or(0, |v| v.min(100) as u8),
        })
    }
}

/// Payload layout of a frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLayout {
    /// No payload, trailer follows the type byte
    Empty,
    /// Exactly `n` bytes
    Fixed(usize),
    /// Bytes up to the `FF FF` trailer
    Terminated,
}

/// Table entry for one frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    /// Resulting event kind
    pub kind: MetadataKind,
    /// How to find the end of the payload
    pub layout: PayloadLayout,
}

/// Versioned frame-type table
#[derive(Debug, Clone)]
pub struct MetadataTable {
    version: u16,
    frames: HashMap<u8, FrameSpec>,
}

impl MetadataTable {
    /// Empty table
    pub fn new(version: u16) -> Self {
        Self {
            version,
            frames: HashMap::new(),
        }
    }

    /// Layout used by current board firmware
    pub fn firmware_v1() -> Self {
        use MetadataKind::*;
        use PayloadLayout::*;

        Self::new(1)
            .with_frame(0xF1, ErrorCode, Terminated)
            .with_frame(0xF2, Info, Terminated)
            .with_frame(0xF3, Timestamp, Fixed(5))
            .with_frame(0xF4, EndOfAcquisition, Empty)
            .with_frame(0xF5, OvercurrentEvent, Empty)
            .with_frame(0xF6, TargetPowerDown, Empty)
            .with_frame(0xF7, Voltage, Fixed(2))
    }

    /// Add or replace a frame type
    pub fn with_frame(mut self, type_byte: u8, kind: MetadataKind, layout: PayloadLayout) -> Self {
        self.frames.insert(type_byte, FrameSpec { kind, layout });
        self
    }

    /// Look up a frame type
    pub fn lookup(&self, type_byte: u8) -> Option<FrameSpec> {
        self.frames.get(&type_byte).copied()
    }

    /// Table revision
    pub fn version(&self) -> u16 {
        self.version
    }
}

impl Default for MetadataTable {
    fn default() -> Self {
        Self::firmware_v1()
    }
}

/// Recognize metadata in an ASCII stream line
pub fn classify_ascii_line(line: &str) -> Option<MetadataKind> {
    let lower = line.trim().to_ascii_lowercase();
    if lower == "end" || lower.starts_with("end ") {
        Some(MetadataKind::EndOfAcquisition)
    } else if lower.starts_with("error") {
        Some(MetadataKind::ErrorCode)
    } else if line.contains("Timestamp") {
        Some(MetadataKind::Timestamp)
    } else if lower.contains("overcurrent") {
        Some(MetadataKind::OvercurrentEvent)
    } else if lower.contains("power down") || lower.contains("power-down") {
        Some(MetadataKind::TargetPowerDown)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_v1_table() {
        let table = MetadataTable::firmware_v1();
        assert_eq!(table.version(), 1);
        assert_eq!(
            table.lookup(0xF3),
            Some(FrameSpec { kind: MetadataKind::Timestamp, layout: PayloadLayout::Fixed(5) })
        );
        assert_eq!(table.lookup(0xF4).map(|s| s.kind), Some(MetadataKind::EndOfAcquisition));
        assert!(table.lookup(0xF8).is_none());
    }

    #[test]
    fn test_binary_timestamp_payload() {
        let ts = DeviceTimestamp::from_frame(&[0x80, 0x00, 0x30, 0x39, 42]).unwrap();
        assert_eq!(ts.time_ms, 12345);
        assert!(ts.overflowed);
        assert_eq!(ts.buffer_load, 42);
        assert!(DeviceTimestamp::from_frame(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_ascii_timestamp_line() {
        let ts = DeviceTimestamp::from_line("Timestamp: 12s 345ms, buff: 7%").unwrap();
        assert_eq!(ts.time_ms, 12_345);
        assert_eq!(ts.buffer_load, 7);
        assert!(DeviceTimestamp::from_line("Timestamp: none").is_none());
    }

    #[test]
    fn test_ascii_line_kinds() {
        assert_eq!(classify_ascii_line("end"), Some(MetadataKind::EndOfAcquisition));
        assert_eq!(classify_ascii_line("error overflow"), Some(MetadataKind::ErrorCode));
        assert_eq!(classify_ascii_line("Timestamp: 1s"), Some(MetadataKind::Timestamp));
        assert_eq!(classify_ascii_line("Overcurrent detected"), Some(MetadataKind::OvercurrentEvent));
        assert_eq!(classify_ascii_line("summary"), None);
    }

    #[test]
    fn test_voltage_payload() {
        let event = MetadataEvent::new(MetadataKind::Voltage, vec![0x0C, 0xE4], DataFormat::Binary);
        assert_eq!(event.voltage_mv(), Some(3300));
    }
}
