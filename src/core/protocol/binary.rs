//! Binary hexadecimal stream decoder
//!
//! Each sample is two bytes: the upper nibble of the first byte is a
//! negative power of 16 and the remaining 12 bits are the mantissa, so
//! `0x15 0xDC` decodes to 0x5DC / 16 = 93.75. First bytes with an upper
//! nibble of `0xF` never start a sample; `0xF0` opens a metadata frame.

use super::command::DataFormat;
use super::metadata::{MetadataEvent, PayloadLayout, FRAME_END, FRAME_START};
use super::{DecodeOptions, FramingError, Sample, SignMode, StreamItem};
use bytes::{Buf, BytesMut};

/// Bytes per sample
pub const SAMPLE_LEN: usize = 2;

/// Decode one sample pair
pub fn decode_sample(hi: u8, lo: u8, sign: SignMode) -> f64 {
    let exponent = i32::from(hi >> 4);
    let raw = (u16::from(hi & 0x0F) << 8) | u16::from(lo);
    let mantissa = match sign {
        SignMode::Signed if raw & 0x800 != 0 => i32::from(raw) - 0x1000,
        _ => i32::from(raw),
    };
    f64::from(mantissa) / 16f64.powi(exponent)
}

enum Step {
    /// More bytes needed
    Wait,
    /// One byte cannot start anything valid
    Skip,
    /// Consumed `n` bytes producing an item
    Item(usize, StreamItem),
}

/// Incremental decoder for the `bin_hexa` format
#[derive(Debug)]
pub struct BinaryDecoder {
    buffer: BytesMut,
    options: DecodeOptions,
    next_index: u64,
    skipped: usize,
}

impl BinaryDecoder {
    /// Create a decoder
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            options,
            next_index: 0,
            skipped: 0,
        }
    }

    /// Append raw bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode the next complete item, if any
    pub fn next_item(&mut self) -> Option<Result<StreamItem, FramingError>> {
        loop {
            match self.step() {
                Step::Wait => return None,
                Step::Skip => {
                    self.buffer.advance(1);
                    self.skipped += 1;
                    if self.skipped > self.options.resync_window {
                        let skipped = std::mem::take(&mut self.skipped);
                        tracing::warn!(skipped, "Binary stream lost alignment");
                        return Some(Err(FramingError {
                            format: DataFormat::Binary,
                            skipped,
                            reason: "no valid sample or metadata frame".to_string(),
                        }));
                    }
                }
                Step::Item(len, item) => {
                    if self.skipped > 0 {
                        tracing::debug!(skipped = self.skipped, "Binary stream resynchronized");
                    }
                    self.buffer.advance(len);
                    self.skipped = 0;
                    return Some(Ok(item));
                }
            }
        }
    }

    fn step(&mut self) -> Step {
        let buf = &self.buffer[..];
        let Some(&first) = buf.first() else {
            return Step::Wait;
        };

        if first == FRAME_START {
            return self.frame();
        }
        if first >> 4 == 0x0F {
            return Step::Skip;
        }
        if buf.len() < SAMPLE_LEN {
            return Step::Wait;
        }

        let value = decode_sample(buf[0], buf[1], self.options.sign);
        let index = self.next_index;
        self.next_index += 1;
        Step::Item(SAMPLE_LEN, StreamItem::Sample(Sample { index, value }))
    }

    fn frame(&self) -> Step {
        let buf = &self.buffer[..];
        let Some(&type_byte) = buf.get(1) else {
            return Step::Wait;
        };
        let Some(spec) = self.options.metadata.lookup(type_byte) else {
            return Step::Skip;
        };

        let body = &buf[2..];
        let payload_len = match spec.layout {
            PayloadLayout::Empty => 0,
            PayloadLayout::Fixed(n) => n,
            PayloadLayout::Terminated => {
                let limit = self.options.max_payload + FRAME_END.len();
                match body
                    .windows(2)
                    .take(limit)
                    .position(|w| w == FRAME_END)
                {
                    Some(pos) => pos,
                    None if body.len() >= limit => return Step::Skip,
                    None => return Step::Wait,
                }
            }
        };

        let total = 2 + payload_len + FRAME_END.len();
        if buf.len() < total {
            return Step::Wait;
        }
        if buf[2 + payload_len..total] != FRAME_END {
            return Step::Skip;
        }

        let payload = buf[2..2 + payload_len].to_vec();
        Step::Item(
            total,
            StreamItem::Metadata(MetadataEvent::new(spec.kind, payload, DataFormat::Binary)),
        )
    }

    /// Drop partial input and restart indices
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_index = 0;
        self.skipped = 0;
    }

    /// Unconsumed bytes
    pub fn take_rest(&mut self) -> BytesMut {
        self.buffer.split()
    }

    /// Samples decoded so far
    pub fn decoded(&self) -> u64 {
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::metadata::{MetadataKind, MetadataTable};
    use std::sync::Arc;

    fn drain(dec: &mut BinaryDecoder) -> Vec<Result<StreamItem, FramingError>> {
        std::iter::from_fn(|| dec.next_item()).collect()
    }

    fn values(items: &[Result<StreamItem, FramingError>]) -> Vec<f64> {
        items
            .iter()
            .filter_map(|i| match i {
                Ok(StreamItem::Sample(s)) => Some(s.value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_sample_decoding() {
        assert_eq!(decode_sample(0x15, 0xDC, SignMode::Unsigned), 93.75);
        assert_eq!(decode_sample(0x0F, 0xFF, SignMode::Unsigned), 4095.0);
        assert_eq!(decode_sample(0x0F, 0xFF, SignMode::Signed), -1.0);
        assert_eq!(decode_sample(0x20, 0x10, SignMode::Unsigned), 16.0 / 256.0);
    }

    #[test]
    fn test_split_sample_and_frames() {
        let mut dec = BinaryDecoder::new(DecodeOptions::default());
        dec.feed(&[0x15]);
        assert!(dec.next_item().is_none());
        dec.feed(&[0xDC, 0xF0, 0xF3, 0x00, 0x00, 0x03]);
        let first = drain(&mut dec);
        assert_eq!(values(&first), vec![93.75]);

        dec.feed(&[0xE8, 0x0A, 0xFF, 0xFF, 0xF0, 0xF1, b'o', b'v', 0xFF, 0xFF, 0xF0, 0xF4, 0xFF, 0xFF]);
        let items: Vec<_> = drain(&mut dec).into_iter().map(Result::unwrap).collect();
        assert_eq!(items.len(), 3);
        match &items[0] {
            StreamItem::Metadata(event) => {
                let ts = event.timestamp().unwrap();
                assert_eq!(ts.time_ms, 1000);
                assert_eq!(ts.buffer_load, 10);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&items[1], StreamItem::Metadata(e) if e.kind == MetadataKind::ErrorCode && e.text() == "ov"));
        assert!(matches!(&items[2], StreamItem::Metadata(e) if e.kind == MetadataKind::EndOfAcquisition));
    }

    #[test]
    fn test_stray_byte_is_skipped() {
        let mut dec = BinaryDecoder::new(DecodeOptions::default());
        dec.feed(&[0x15, 0xDC, 0xFA, 0x15, 0xDC, 0x00, 0x02]);
        let items = drain(&mut dec);
        assert!(items.iter().all(Result::is_ok));
        assert_eq!(values(&items), vec![93.75, 93.75, 2.0]);
        assert_eq!(dec.decoded(), 3);
    }

    #[test]
    fn test_resync_window_exceeded() {
        let mut dec = BinaryDecoder::new(DecodeOptions {
            resync_window: 8,
            ..DecodeOptions::default()
        });
        dec.feed(&[0xFE; 9]);
        dec.feed(&[0x15, 0xDC]);
        let items = drain(&mut dec);
        assert!(matches!(&items[0], Err(e) if e.skipped == 9 && e.format == DataFormat::Binary));
        assert_eq!(values(&items), vec![93.75]);
    }

    #[test]
    fn test_bad_trailer_and_custom_table() {
        let table = MetadataTable::firmware_v1().with_frame(0xF8, MetadataKind::Info, PayloadLayout::Fixed(1));
        let mut dec = BinaryDecoder::new(DecodeOptions {
            metadata: Arc::new(table),
            ..DecodeOptions::default()
        });
        dec.feed(&[0xF0, 0xF8, 0x41, 0xFF, 0xFF, 0xF0, 0xF5, 0x00, 0x00, 0x01, 0x00]);
        let items = drain(&mut dec);
        assert!(matches!(&items[0], Ok(StreamItem::Metadata(e)) if e.kind == MetadataKind::Info && e.text() == "A"));
        // F0 F5 00 00 has a broken trailer, so F0 and F5 are skipped and 00 00 / 01 00 decode
        assert_eq!(values(&items), vec![0.0, 256.0]);
    }

    #[test]
    fn test_unterminated_text_frame_is_bounded() {
        let mut dec = BinaryDecoder::new(DecodeOptions {
            max_payload: 4,
            ..DecodeOptions::default()
        });
        dec.feed(&[0xF0, 0xF2, b'a', b'b', b'c']);
        assert!(dec.next_item().is_none());
        dec.feed(&[b'd', b'e', b'f', 0x00, 0x01]);
        let items = drain(&mut dec);
        assert!(items.iter().all(Result::is_ok));
        assert!(!values(&items).is_empty());
    }
}
