//! Acquisition configuration
//!
//! The full set of setters sent before `start`, in the order the board
//! expects them.

use super::command::{
    AcqMode, AcqTime, Command, DataFormat, FuncMode, OutputKind, PowerEnd, PowerState,
    TriggerSource,
};
use crate::core::error::EngineError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Acquisition parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Target supply in millivolts
    pub voltage_mv: u16,
    /// Sampling frequency in hertz
    pub frequency_hz: u32,
    /// Acquisition duration
    pub acq_time: AcqTime,
    /// Acquisition mode
    pub acq_mode: AcqMode,
    /// Analog front-end mode
    pub func_mode: FuncMode,
    /// Current or energy
    pub output: OutputKind,
    /// Stream encoding
    pub format: DataFormat,
    /// Trigger source
    pub trigger_source: TriggerSource,
    /// Trigger delay in milliseconds
    pub trigger_delay_ms: u32,
    /// Optional current threshold in microamperes
    pub current_threshold_ua: Option<u32>,
    /// Target power during acquisition
    pub power: PowerState,
    /// Target power after acquisition
    pub power_end: PowerEnd,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            voltage_mv: 3300,
            frequency_hz: 100,
            acq_time: AcqTime::Millis(10_000),
            acq_mode: AcqMode::Dynamic,
            func_mode: FuncMode::Optim,
            output: OutputKind::Current,
            format: DataFormat::Ascii,
            trigger_source: TriggerSource::Software,
            trigger_delay_ms: 1,
            current_threshold_ua: None,
            power: PowerState::Auto,
            power_end: PowerEnd::On,
        }
    }
}

impl AcquisitionConfig {
    /// Setter commands in device order
    pub fn commands(&self) -> Vec<Command> {
        let mut commands = vec![
            Command::Volt(self.voltage_mv),
            Command::Freq(self.frequency_hz),
            Command::AcqTime(self.acq_time),
            Command::AcqMode(self.acq_mode),
            Command::FuncMode(self.func_mode),
            Command::Output(self.output),
            Command::Format(self.format),
            Command::TrigSrc(self.trigger_source),
            Command::TrigDelay(self.trigger_delay_ms),
        ];
        if let Some(ua) = self.current_threshold_ua {
            commands.push(Command::CurrThre(ua));
        }
        commands.push(Command::Pwr(self.power));
        commands.push(Command::PwrEnd(self.power_end));
        commands
    }

    /// Validate every field plus the format/frequency coupling
    pub fn validate(&self) -> Result<(), EngineError> {
        for command in self.commands() {
            command.validate()?;
        }
        if self.frequency_hz > self.format.max_frequency_hz() {
            return Err(EngineError::invalid(
                "format",
                format!(
                    "{} supports at most {} Hz, got {} Hz",
                    self.format,
                    self.format.max_frequency_hz(),
                    self.frequency_hz
                ),
            ));
        }
        Ok(())
    }

    /// Whole batch as one byte sequence
    pub fn encode_batch(&self) -> Result<Bytes, EngineError> {
        self.validate()?;
        let mut out = BytesMut::new();
        for command in self.commands() {
            out.put(command.encode()?);
        }
        Ok(out.freeze())
    }

    /// Expected stream length, or `None` when the board decides when to stop
    pub fn window(&self) -> Option<Duration> {
        match (self.acq_time, self.trigger_source) {
            (AcqTime::Millis(ms), TriggerSource::Software) => Some(Duration::from_millis(
                u64::from(ms) + u64::from(self.trigger_delay_ms),
            )),
            _ => None,
        }
    }

    /// Apply an acknowledged setter
    pub fn apply(&mut self, command: &Command) {
        match *command {
            Command::Volt(mv) => self.voltage_mv = mv,
            Command::Freq(hz) => self.frequency_hz = hz,
            Command::AcqTime(t) => self.acq_time = t,
            Command::AcqMode(m) => self.acq_mode = m,
            Command::FuncMode(m) => self.func_mode = m,
            Command::Output(o) => self.output = o,
            Command::Format(f) => self.format = f,
            Command::TrigSrc(t) => self.trigger_source = t,
            Command::TrigDelay(ms) => self.trigger_delay_ms = ms,
            Command::CurrThre(ua) => self.current_threshold_ua = Some(ua),
            Command::Pwr(p) => self.power = p,
            Command::PwrEnd(p) => self.power_end = p,
            _ => {}
        }
    }
}
