//! ASCII decimal stream decoder
//!
//! Samples arrive as `DDDDSee\r\n`: a 4-digit mantissa, the exponent sign
//! and a 2-digit exponent, so `6409-07` is 6409 × 10⁻⁷. Lines that do not
//! start with a digit carry metadata or command replies.

use super::command::DataFormat;
use super::metadata::{classify_ascii_line, MetadataEvent};
use super::response::Reply;
use super::{DecodeOptions, FramingError, Sample, SignMode, StreamItem};
use bytes::BytesMut;

/// Width of a sample token
pub const TOKEN_LEN: usize = 7;

/// Longest line kept while waiting for its terminator
const MAX_LINE: usize = 512;

/// Decode one `DDDDSee` token
pub fn parse_token(token: &str, sign: SignMode) -> Option<f64> {
    let (negative, digits) = match (sign, token.strip_prefix('-')) {
        (SignMode::Signed, Some(rest)) => (true, rest),
        _ => (false, token),
    };

    let bytes = digits.as_bytes();
    if bytes.len() != TOKEN_LEN {
        return None;
    }
    if !bytes[..4].iter().all(u8::is_ascii_digit) || !bytes[5..].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let negative_exponent = match bytes[4] {
        b'-' => true,
        b'+' => false,
        _ => return None,
    };

    let mantissa = f64::from(digits[..4].parse::<u32>().ok()?);
    let scale = 10f64.powi(digits[5..].parse::<i32>().ok()?);
    let value = if negative_exponent {
        mantissa / scale
    } else {
        mantissa * scale
    };
    Some(if negative { -value } else { value })
}

/// Incremental decoder for the `ascii_dec` format
#[derive(Debug)]
pub struct AsciiDecoder {
    buffer: BytesMut,
    options: DecodeOptions,
    next_index: u64,
    skipped: usize,
}

impl AsciiDecoder {
    /// Create a decoder
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
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
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_LINE {
                    let dropped = self.buffer.len();
                    self.buffer.clear();
                    return self.skip(dropped, "unterminated line").map(Err);
                }
                return None;
            };

            let raw = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }

            if looks_like_sample(line) {
                match parse_token(line, self.options.sign) {
                    Some(value) => {
                        self.skipped = 0;
                        let index = self.next_index;
                        self.next_index += 1;
                        return Some(Ok(StreamItem::Sample(Sample { index, value })));
                    }
                    None => {
                        tracing::warn!(line = %line, "Malformed ASCII sample token");
                        if let Some(err) = self.skip(raw.len(), "malformed sample token") {
                            return Some(Err(err));
                        }
                        continue;
                    }
                }
            }

            self.skipped = 0;
            if let Some(kind) = classify_ascii_line(line) {
                return Some(Ok(StreamItem::Metadata(MetadataEvent::new(
                    kind,
                    line.as_bytes().to_vec(),
                    DataFormat::Ascii,
                ))));
            }
            return Some(Ok(StreamItem::Reply(Reply::classify(line))));
        }
    }

    fn skip(&mut self, count: usize, reason: &str) -> Option<FramingError> {
        self.skipped += count;
        if self.skipped > self.options.resync_window {
            let skipped = std::mem::take(&mut self.skipped);
            Some(FramingError {
                format: DataFormat::Ascii,
                skipped,
                reason: reason.to_string(),
            })
        } else {
            None
        }
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

fn looks_like_sample(line: &str) -> bool {
    let mut chars = line.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('-') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::metadata::MetadataKind;

    fn decoder() -> AsciiDecoder {
        AsciiDecoder::new(DecodeOptions::default())
    }

    fn drain(dec: &mut AsciiDecoder) -> Vec<Result<StreamItem, FramingError>> {
        std::iter::from_fn(|| dec.next_item()).collect()
    }

    #[test]
    fn test_token_values() {
        let v = parse_token("6409-07", SignMode::Unsigned).unwrap();
        assert!((v - 6.409e-4).abs() < 1e-15);
        assert_eq!(parse_token("1000+02", SignMode::Unsigned), Some(100_000.0));
        assert_eq!(parse_token("0000-05", SignMode::Unsigned), Some(0.0));
        assert!(parse_token("640-07", SignMode::Unsigned).is_none());
        assert!(parse_token("6409x07", SignMode::Unsigned).is_none());
        assert!(parse_token("-6409-07", SignMode::Unsigned).is_none());
        let neg = parse_token("-6409-07", SignMode::Signed).unwrap();
        assert!((neg + 6.409e-4).abs() < 1e-15);
    }

    #[test]
    fn test_split_input_and_metadata() {
        let mut dec = decoder();
        dec.feed(b"6409-0");
        assert!(dec.next_item().is_none());
        dec.feed(b"7\r\n1000+02\r\nTimestamp: 1s 5ms, buff: 2%\r\nack stop\r\nend\r\n");

        let items: Vec<_> = drain(&mut dec).into_iter().map(Result::unwrap).collect();
        assert_eq!(items.len(), 5);
        assert!(matches!(items[0], StreamItem::Sample(Sample { index: 0, .. })));
        assert!(matches!(items[1], StreamItem::Sample(Sample { index: 1, value }) if value == 100_000.0));
        match &items[2] {
            StreamItem::Metadata(event) => {
                assert_eq!(event.kind, MetadataKind::Timestamp);
                assert_eq!(event.timestamp().map(|t| t.time_ms), Some(1005));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&items[3], StreamItem::Reply(Reply::Ack { command, .. }) if command == "stop"));
        assert!(matches!(&items[4], StreamItem::Metadata(e) if e.kind == MetadataKind::EndOfAcquisition));
        assert_eq!(dec.decoded(), 2);
    }

    #[test]
    fn test_bad_tokens_resync_then_fail() {
        let mut dec = AsciiDecoder::new(DecodeOptions {
            resync_window: 20,
            ..DecodeOptions::default()
        });
        dec.feed(b"64x9-07\r\n1000+01\r\n");
        let items = drain(&mut dec);
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Ok(StreamItem::Sample(Sample { index: 0, value })) if value == 10_000.0));

        dec.feed(b"12345678\r\n99\r\n98-7\r\n1234-\r\n");
        let items = drain(&mut dec);
        assert!(items.iter().any(|i| matches!(i, Err(e) if e.format == DataFormat::Ascii)));
    }
}
