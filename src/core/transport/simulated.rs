//! Simulated PowerShield board
//!
//! An in-memory [`Transport`] that answers shell commands with scripted
//! replies. Stream bytes can be injected directly, or the device can
//! synthesize a sample stream after `start` at the acknowledged frequency.

use super::{Channel, Transport, TransportError, TransportStats};
use crate::core::protocol::{AcqTime, Command, DataFormat, PROMPT};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Binary end-of-acquisition frame
const END_FRAME: [u8; 4] = [0xF0, 0xF4, 0xFF, 0xFF];

/// Scripted answer to one command
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReply {
    /// `ack <name> [payload]`
    Ack(Option<String>),
    /// `error <name> <text>`
    Error(String),
    /// Nothing at all
    Silent,
    /// Raw bytes instead of a reply line
    Raw(Bytes),
    /// `ack <name>` followed by raw bytes
    AckThen(Bytes),
}

/// Encode a value as a `DDDDSee` token
pub fn encode_ascii_sample(value: f64) -> String {
    if !(value.is_finite() && value > 0.0) {
        return "0000+00".to_string();
    }
    let mut exponent = value.log10().floor() as i32 - 3;
    let mut mantissa = (value / 10f64.powi(exponent)).round();
    if mantissa >= 10_000.0 {
        exponent += 1;
        mantissa = (value / 10f64.powi(exponent)).round();
    }
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{:04}{}{:02}", mantissa as u32, sign, exponent.unsigned_abs().min(99))
}

/// Encode a non-negative value as a binary sample pair
pub fn encode_binary_sample(value: f64) -> [u8; 2] {
    let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
    let mut exponent = 0u8;
    while exponent < 14 && (value * 16f64.powi(i32::from(exponent) + 1)).round() <= 4095.0 {
        exponent += 1;
    }
    let mantissa = ((value * 16f64.powi(i32::from(exponent))).round() as u16).min(0x0FFF);
    [(exponent << 4) | (mantissa >> 8) as u8, (mantissa & 0xFF) as u8]
}

#[derive(Debug)]
struct Generator {
    started: Instant,
    emitted: u64,
    limit: Option<u64>,
}

#[derive(Debug)]
struct DeviceInner {
    rules: HashMap<String, DeviceReply>,
    once: HashMap<String, VecDeque<DeviceReply>>,
    firmware: String,
    prompt: bool,
    open: bool,
    fail_open: Option<String>,
    last_baud: Option<u32>,
    to_host: BytesMut,
    from_host: BytesMut,
    written: Vec<String>,
    read_chunk: usize,
    synthesize: bool,
    generator: Option<Generator>,
    format: DataFormat,
    frequency_hz: u32,
    acq_time: AcqTime,
    stats: TransportStats,
}

/// Scriptable stand-in for the board
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<DeviceInner>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Device that acknowledges everything
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeviceInner {
                rules: HashMap::new(),
                once: HashMap::new(),
                firmware: "PowerShield FW 1.0.4".to_string(),
                prompt: false,
                open: false,
                fail_open: None,
                last_baud: None,
                to_host: BytesMut::new(),
                from_host: BytesMut::new(),
                written: Vec::new(),
                read_chunk: 4096,
                synthesize: false,
                generator: None,
                format: DataFormat::Ascii,
                frequency_hz: 100,
                acq_time: AcqTime::Millis(10_000),
                stats: TransportStats::default(),
            })),
        }
    }

    /// Always answer `name` with `reply`
    #[must_use]
    pub fn on(self, name: &str, reply: DeviceReply) -> Self {
        self.inner.lock().rules.insert(name.to_string(), reply);
        self
    }

    /// Answer the next `name` with `reply`, then fall back to the usual answer
    pub fn once(&self, name: &str, reply: DeviceReply) {
        self.inner
            .lock()
            .once
            .entry(name.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Firmware string returned by `version`
    #[must_use]
    pub fn with_firmware(self, firmware: &str) -> Self {
        self.inner.lock().firmware = firmware.to_string();
        self
    }

    /// Prefix replies with the shell prompt
    #[must_use]
    pub fn with_prompt(self) -> Self {
        self.inner.lock().prompt = true;
        self
    }

    /// Produce a sample stream after `start`
    #[must_use]
    pub fn synthesize(self) -> Self {
        self.inner.lock().synthesize = true;
        self
    }

    /// Largest chunk returned by a single read
    #[must_use]
    pub fn read_chunk(self, bytes: usize) -> Self {
        self.inner.lock().read_chunk = bytes.max(1);
        self
    }

    /// Make `open` fail with `reason`
    #[must_use]
    pub fn fail_open(self, reason: &str) -> Self {
        self.inner.lock().fail_open = Some(reason.to_string());
        self
    }

    /// Queue bytes for the host
    pub fn inject(&self, data: &[u8]) {
        self.inner.lock().to_host.extend_from_slice(data);
    }

    /// Command lines received so far
    pub fn written_lines(&self) -> Vec<String> {
        self.inner.lock().written.clone()
    }

    /// Simulate unplugging the board
    pub fn disconnect_now(&self) {
        let mut inner = self.inner.lock();
        inner.open = false;
        inner.generator = None;
    }

    /// Channel currently open
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Rate passed to the last `open`
    pub fn last_baud(&self) -> Option<u32> {
        self.inner.lock().last_baud
    }
}

impl DeviceInner {
    fn push_line(&mut self, line: &str) {
        if self.prompt {
            self.to_host.extend_from_slice(PROMPT.as_bytes());
        }
        self.to_host.extend_from_slice(line.as_bytes());
        self.to_host.extend_from_slice(b"\r\n");
    }

    fn handle_line(&mut self, line: &str) {
        self.written.push(line.to_string());
        let name = line.split_whitespace().next().unwrap_or_default().to_string();
        let parsed = line.parse::<Command>();

        let reply = match self.once.get_mut(&name).and_then(VecDeque::pop_front) {
            Some(reply) => reply,
            None => match self.rules.get(&name) {
                Some(reply) => reply.clone(),
                None => match &parsed {
                    Err(_) => DeviceReply::Error(line.to_string()),
                    Ok(Command::Psrst) => DeviceReply::Silent,
                    // A binary stream is closed by the end frame alone
                    Ok(Command::Stop) if self.format == DataFormat::Binary && self.generator.is_some() => {
                        self.generator = None;
                        DeviceReply::Raw(Bytes::from_static(&END_FRAME))
                    }
                    Ok(Command::Version) => DeviceReply::Ack(Some(self.firmware.clone())),
                    Ok(_) => DeviceReply::Ack(None),
                },
            },
        };

        let acknowledged = matches!(reply, DeviceReply::Ack(_) | DeviceReply::AckThen(_));
        match reply {
            DeviceReply::Ack(payload) => match payload {
                Some(payload) => self.push_line(&format!("ack {name} {payload}")),
                None => self.push_line(&format!("ack {name}")),
            },
            DeviceReply::Error(text) => self.push_line(&format!("error {text}")),
            DeviceReply::Silent => {}
            DeviceReply::Raw(bytes) => self.to_host.extend_from_slice(&bytes),
            DeviceReply::AckThen(bytes) => {
                self.push_line(&format!("ack {name}"));
                self.to_host.extend_from_slice(&bytes);
            }
        }

        if acknowledged {
            if let Ok(command) = parsed {
                self.apply(&command);
            }
        }
    }

    fn apply(&mut self, command: &Command) {
        match *command {
            Command::Format(format) => self.format = format,
            Command::Freq(hz) => self.frequency_hz = hz,
            Command::AcqTime(time) => self.acq_time = time,
            Command::Start if self.synthesize => {
                let limit = match self.acq_time {
                    AcqTime::Infinite => None,
                    AcqTime::PowerDown => Some(0),
                    AcqTime::Millis(ms) => Some(u64::from(ms) * u64::from(self.frequency_hz) / 1000),
                };
                self.generator = Some(Generator {
                    started: Instant::now(),
                    emitted: 0,
                    limit,
                });
            }
            Command::Stop => self.generator = None,
            _ => {}
        }
    }

    fn generate(&mut self) {
        let Some(generator) = self.generator.as_mut() else {
            return;
        };
        let due = (generator.started.elapsed().as_secs_f64() * f64::from(self.frequency_hz)) as u64;
        let due = generator.limit.map_or(due, |limit| due.min(limit));
        let count = due.saturating_sub(generator.emitted).min(16_384);

        for i in generator.emitted..generator.emitted + count {
            // 1 mA baseline with a slow ripple
            let value = 1e-3 * (1.0 + 0.25 * (i as f64 * 0.01).sin());
            match self.format {
                DataFormat::Ascii => {
                    self.to_host.extend_from_slice(encode_ascii_sample(value).as_bytes());
                    self.to_host.extend_from_slice(b"\r\n");
                }
                DataFormat::Binary => self.to_host.extend_from_slice(&encode_binary_sample(value)),
            }
        }
        generator.emitted += count;

        if generator.limit.is_some_and(|limit| generator.emitted >= limit) {
            self.generator = None;
            match self.format {
                DataFormat::Ascii => self.push_line("end"),
                DataFormat::Binary => self.to_host.extend_from_slice(&END_FRAME),
            }
        }
    }
}

#[async_trait]
impl Transport for SimulatedDevice {
    async fn open(&mut self, baud_rate: u32) -> Result<Box<dyn Channel>, TransportError> {
        let mut inner = self.inner.lock();
        inner.last_baud = Some(baud_rate);
        if let Some(reason) = &inner.fail_open {
            return Err(TransportError::ConnectionFailed(reason.clone()));
        }
        inner.open = true;
        inner.from_host.clear();
        inner.to_host.clear();
        inner.generator = None;
        inner.stats = TransportStats::default();
        drop(inner);

        Ok(Box::new(SimulatedChannel {
            device: self.clone(),
            opened_at: Instant::now(),
        }))
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

struct SimulatedChannel {
    device: SimulatedDevice,
    opened_at: Instant,
}

#[async_trait]
impl Channel for SimulatedChannel {
    async fn read(&mut self, max: usize) -> Result<Bytes, TransportError> {
        let mut inner = self.device.inner.lock();
        if !inner.open {
            return Err(TransportError::Disconnected);
        }
        inner.generate();
        let n = inner.to_host.len().min(max).min(inner.read_chunk);
        if n > 0 {
            inner.stats.bytes_received += n as u64;
            inner.stats.reads += 1;
        }
        Ok(inner.to_host.split_to(n).freeze())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.device.inner.lock();
        if !inner.open {
            return Err(TransportError::Disconnected);
        }
        inner.stats.bytes_sent += data.len() as u64;
        inner.stats.writes += 1;
        inner.from_host.extend_from_slice(data);

        while let Some(pos) = inner.from_host.iter().position(|&b| b == b'\n') {
            let raw = inner.from_host.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw[..pos]).trim().to_string();
            if !line.is_empty() {
                inner.handle_line(&line);
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut inner = self.device.inner.lock();
        inner.open = false;
        inner.generator = None;
        Ok(())
    }

    fn connection_info(&self) -> String {
        "simulated PowerShield".to_string()
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.device.inner.lock().stats.clone();
        stats.uptime_secs = self.opened_at.elapsed().as_secs();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::ascii::parse_token;
    use crate::core::protocol::binary::decode_sample;
    use crate::core::protocol::SignMode;

    #[test]
    fn test_sample_encoders_invert_decoders() {
        for value in [6.409e-4, 1e-3, 0.0123, 93.75, 2.5e-8] {
            let token = encode_ascii_sample(value);
            let back = parse_token(&token, SignMode::Unsigned).unwrap();
            assert!((back - value).abs() <= value * 1e-3, "{token} -> {back}");

            let [hi, lo] = encode_binary_sample(value);
            assert_ne!(hi >> 4, 0x0F);
            let back = decode_sample(hi, lo, SignMode::Unsigned);
            assert!((back - value).abs() <= value * 1e-2 + 1e-12, "{hi:02X}{lo:02X} -> {back}");
        }
        assert_eq!(encode_binary_sample(93.75), [0x15, 0xDC]);
    }

    #[tokio::test]
    async fn test_scripted_replies() {
        let mut device = SimulatedDevice::new()
            .with_prompt()
            .on("volt", DeviceReply::Error("volt 9999m".into()));
        let mut channel = device.open(115_200).await.unwrap();
        assert_eq!(device.last_baud(), Some(115_200));

        channel.write(b"version\nvolt 9999m\npsrst\n").await.unwrap();
        let reply = channel.read(1024).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&reply).unwrap(),
            "PowerShield > ack version PowerShield FW 1.0.4\r\nPowerShield > error volt 9999m\r\n"
        );
        assert_eq!(device.written_lines(), vec!["version", "volt 9999m", "psrst"]);

        device.disconnect_now();
        assert!(matches!(channel.read(16).await, Err(TransportError::Disconnected)));
    }

    #[tokio::test]
    async fn test_synthesized_binary_stream_ends_with_frame() {
        let mut device = SimulatedDevice::new().synthesize();
        let mut channel = device.open(3_686_400).await.unwrap();
        channel.write(b"format bin_hexa\nfreq 1k\nacqtime 20m\nstart\n").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        let mut received = Vec::new();
        loop {
            let chunk = channel.read(1 << 16).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            received.extend_from_slice(&chunk);
        }
        assert!(received.ends_with(&END_FRAME));
        let acks = b"ack format\r\nack freq\r\nack acqtime\r\nack start\r\n";
        assert!(received.starts_with(acks));
        assert_eq!(received.len(), acks.len() + 20 * 2 + END_FRAME.len());
    }

    #[tokio::test]
    async fn test_binary_stop_sends_only_end_frame() {
        let mut device = SimulatedDevice::new().synthesize();
        let mut channel = device.open(3_686_400).await.unwrap();
        channel.write(b"format bin_hexa\nacqtime inf\nstart\n").await.unwrap();
        channel.read(1 << 16).await.unwrap();

        channel.write(b"stop\n").await.unwrap();
        let rest = channel.read(1 << 16).await.unwrap();
        assert!(rest.ends_with(&END_FRAME));
        assert!(!rest.windows(3).any(|w| w == b"ack"));
    }

    #[tokio::test]
    async fn test_open_failure() {
        let mut device = SimulatedDevice::new().fail_open("busy");
        assert!(matches!(
            device.open(9600).await,
            Err(TransportError::ConnectionFailed(reason)) if reason == "busy"
        ));
        assert!(!device.is_open());
    }
}
