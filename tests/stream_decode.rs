//! Stream decoding through the public parser API

use powershield_core::core::protocol::{
    DataFormat, DecodeOptions, MetadataKind, SignMode, StreamItem, StreamParser,
};
use powershield_core::core::store::SampleStore;
use powershield_core::core::transport::{encode_ascii_sample, encode_binary_sample};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn decode_in_chunks(format: DataFormat, stream: &[u8], rng: &mut StdRng) -> Vec<StreamItem> {
    let mut parser = StreamParser::new(format, DecodeOptions::default());
    let mut items = Vec::new();
    let mut rest = stream;
    while !rest.is_empty() {
        let n = rng.gen_range(1..=rest.len().min(37));
        parser.feed(&rest[..n]);
        rest = &rest[n..];
        for item in parser.drain() {
            items.push(item.expect("stream should decode"));
        }
    }
    items
}

fn values(items: &[StreamItem]) -> Vec<f64> {
    items
        .iter()
        .filter_map(|item| match item {
            StreamItem::Sample(s) => Some(s.value),
            _ => None,
        })
        .collect()
}

#[test]
fn test_binary_chunking_does_not_change_output() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut stream = Vec::new();
    let mut expected = Vec::new();
    for i in 0..500u32 {
        let pair = encode_binary_sample(f64::from(i % 97) * 1e-4 + 1e-6);
        stream.extend_from_slice(&pair);
        expected.push(pair);
        if i == 250 {
            // timestamp: 1234 ms, 42 % buffer load
            stream.extend_from_slice(&[0xF0, 0xF3, 0x00, 0x00, 0x04, 0xD2, 42, 0xFF, 0xFF]);
        }
    }
    stream.extend_from_slice(&[0xF0, 0xF4, 0xFF, 0xFF]);

    let items = decode_in_chunks(DataFormat::Binary, &stream, &mut rng);
    let decoded = values(&items);
    assert_eq!(decoded.len(), 500);
    for (value, [hi, lo]) in decoded.iter().zip(&expected) {
        let exponent = i32::from(hi >> 4);
        let mantissa = (u16::from(hi & 0x0F) << 8) | u16::from(*lo);
        assert_eq!(*value, f64::from(mantissa) / 16f64.powi(exponent));
    }

    let metadata: Vec<_> = items
        .iter()
        .filter_map(|item| match item {
            StreamItem::Metadata(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(metadata.len(), 2);
    let stamp = metadata[0].timestamp().unwrap();
    assert_eq!(stamp.time_ms, 1234);
    assert_eq!(stamp.buffer_load, 42);
    assert_eq!(metadata[1].kind, MetadataKind::EndOfAcquisition);
    assert!(matches!(items.last(), Some(StreamItem::Metadata(_))));
}

#[test]
fn test_ascii_chunking_and_embedded_replies() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut stream = Vec::new();
    for i in 1..=200u32 {
        stream.extend_from_slice(encode_ascii_sample(f64::from(i) * 1e-5).as_bytes());
        stream.extend_from_slice(b"\r\n");
    }
    stream.extend_from_slice(b"ack stop\r\nend\r\n");

    let items = decode_in_chunks(DataFormat::Ascii, &stream, &mut rng);
    let decoded = values(&items);
    assert_eq!(decoded.len(), 200);
    for (i, value) in decoded.iter().enumerate() {
        let expected = (i + 1) as f64 * 1e-5;
        assert!((value - expected).abs() <= expected * 1e-3);
    }
    assert!(matches!(&items[200], StreamItem::Reply(reply) if reply.answers("stop")));
    assert!(matches!(&items[201], StreamItem::Metadata(m) if m.kind == MetadataKind::EndOfAcquisition));
}

#[test]
fn test_signed_mode_decodes_negative_values() {
    let options = DecodeOptions {
        sign: SignMode::Signed,
        ..DecodeOptions::default()
    };
    let mut ascii = StreamParser::new(DataFormat::Ascii, options.clone());
    ascii.feed(b"-1500-01\r\n");
    let items: Vec<_> = ascii.drain().collect::<Result<_, _>>().unwrap();
    assert_eq!(values(&items), vec![-150.0]);

    let mut binary = StreamParser::new(DataFormat::Binary, options);
    // 0xFFF as 12-bit two's complement is -1, over 16^1
    binary.feed(&[0x1F, 0xFF]);
    let items: Vec<_> = binary.drain().collect::<Result<_, _>>().unwrap();
    assert_eq!(values(&items), vec![-1.0 / 16.0]);
}

#[test]
fn test_decoded_stream_feeds_bounded_store() {
    let mut parser = StreamParser::new(DataFormat::Binary, DecodeOptions::default());
    let store = SampleStore::new(64);
    for _ in 0..100 {
        parser.feed(&encode_binary_sample(93.75));
    }
    for item in parser.drain() {
        if let Ok(StreamItem::Sample(sample)) = item {
            store.append(sample);
        }
    }

    assert_eq!(store.len(), 64);
    assert_eq!(store.evicted(), 36);
    let window = store.window(64);
    assert_eq!(window.first().map(|s| s.index), Some(36));
    assert_eq!(window.last().map(|s| s.index), Some(99));
}
