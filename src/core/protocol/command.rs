//! Command builders for the PowerShield shell protocol
//!
//! Every command is one ASCII line terminated by `\n`. Parameters are checked
//! before a single byte is produced, and [`Command`] also implements
//! [`FromStr`] for the wire form so encoded commands can be parsed back.

use crate::core::error::EngineError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Default UART bit rate of the board (not a standard POSIX rate)
pub const BAUD_RATE: u32 = 3_686_400;

/// Sampling frequencies accepted by `freq`, fastest first
pub const FREQUENCIES_HZ: &[u32] = &[
    100_000, 50_000, 20_000, 10_000, 5_000, 2_000, 1_000, 500, 200, 100, 50, 20, 10, 5, 2, 1,
];

/// Highest sampling frequency usable with the ASCII decimal format
pub const ASCII_MAX_FREQUENCY_HZ: u32 = 20_000;

/// Target supply voltage range
pub const VOLTAGE_RANGE_MV: RangeInclusive<u16> = 1800..=3300;

/// Longest trigger delay
pub const TRIGGER_DELAY_MAX_MS: u32 = 30_000;

/// Longest target power cut for `targrst`
pub const TARGET_RESET_MAX_MS: u32 = 30_000;

/// Current threshold upper bound (10 mA)
pub const CURRENT_THRESHOLD_MAX_UA: u32 = 10_000;

/// Longest finite acquisition
pub const ACQ_TIME_MAX_MS: u32 = 10_000_000;

/// LCD line width
pub const LCD_MAX_CHARS: usize = 16;

macro_rules! keyword_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($field:literal) {
            $($(#[$vmeta:meta])* $variant:ident => $kw:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $kw)] $variant),+
        }

        impl $name {
            /// Every accepted value
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire keyword
            pub fn keyword(self) -> &'static str {
                match self {
                    $($name::$variant => $kw),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.keyword())
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($kw => Ok($name::$variant),)+
                    other => Err(EngineError::invalid($field, format!("unknown value `{other}`"))),
                }
            }
        }
    };
}

keyword_enum! {
    /// Acquisition mode
    AcqMode("acqmode") {
        /// Current may vary freely (100 nA to 10 mA)
        Dynamic => "dyn",
        /// Current must be constant (2 nA to 200 mA)
        Static => "stat",
    }
}

keyword_enum! {
    /// Analog front-end mode
    FuncMode("funcmode") {
        /// Best amplitude range
        Optim => "optim",
        /// Better for large, fast currents
        High => "high",
    }
}

keyword_enum! {
    /// What each sample measures
    OutputKind("output") {
        /// Instantaneous current in amperes
        Current => "current",
        /// Energy integrated over the sample period, in joules
        Energy => "energy",
    }
}

keyword_enum! {
    /// Stream encoding used during acquisition
    DataFormat("format") {
        /// `DDDDSee` decimal tokens, one per line
        Ascii => "ascii_dec",
        /// Two bytes per sample plus `0xF0` metadata frames
        Binary => "bin_hexa",
    }
}

keyword_enum! {
    /// Trigger source
    TriggerSource("trigsrc") {
        /// Start immediately
        Software => "sw",
        /// External trigger on pin D7
        D7 => "d7",
    }
}

keyword_enum! {
    /// Target power during acquisition
    PowerState("pwr") {
        /// On at start, follows `pwrend`
        Auto => "auto",
        /// Forced on
        On => "on",
        /// Forced off
        Off => "off",
    }
}

keyword_enum! {
    /// Target power once acquisition ends
    PowerEnd("pwrend") {
        /// Keep the target powered
        On => "on",
        /// Cut target power
        Off => "off",
    }
}

keyword_enum! {
    /// Board temperature unit
    TempUnit("temp") {
        /// Degrees Celsius
        Celsius => "degc",
        /// Degrees Fahrenheit
        Fahrenheit => "degf",
    }
}

keyword_enum! {
    /// Self-test action
    AutotestAction("autotest") {
        /// Run the self-test
        Start => "start",
        /// Query the last result
        Status => "status",
    }
}

impl OutputKind {
    /// Base physical unit of decoded values
    pub fn unit(self) -> &'static str {
        match self {
            Self::Current => "A",
            Self::Energy => "J",
        }
    }
}

impl DataFormat {
    /// Highest sampling frequency the format can sustain
    pub fn max_frequency_hz(self) -> u32 {
        match self {
            Self::Ascii => ASCII_MAX_FREQUENCY_HZ,
            Self::Binary => FREQUENCIES_HZ[0],
        }
    }
}

/// Acquisition duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcqTime {
    /// Run until `stop`
    Infinite,
    /// `acqtime 0`: power down the target instead of acquiring
    PowerDown,
    /// Finite duration in milliseconds
    Millis(u32),
}

impl fmt::Display for AcqTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => f.write_str("inf"),
            Self::PowerDown => f.write_str("0"),
            Self::Millis(ms) if ms % 1000 == 0 => write!(f, "{}", ms / 1000),
            Self::Millis(ms) => write!(f, "{ms}m"),
        }
    }
}

impl FromStr for AcqTime {
    type Err = EngineError;

    /// `inf`, `0`, or a duration such as `10`, `1500m`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "inf" => Ok(Self::Infinite),
            "0" => Ok(Self::PowerDown),
            arg => Ok(Self::Millis(parse_millis("acqtime", arg)?)),
        }
    }
}

/// What a command expects back from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// `ack <name>` on success, `err`/`error` on failure
    Acknowledged,
    /// Nothing; the board does not answer
    Silent,
}

/// A device command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the shell commands
    Help,
    /// Echo text back
    Echo(String),
    /// Identification probe
    PowerShield,
    /// Firmware version query
    Version,
    /// Board status query
    Status,
    /// Host takes control
    Htc,
    /// Host releases control
    Hrc,
    /// Write a line on the board LCD
    Lcd {
        /// Line number, 1 or 2
        line: u8,
        /// Text, at most 16 characters
        text: String,
    },
    /// Hardware reset of the board
    Psrst,
    /// Set target supply voltage in millivolts
    Volt(u16),
    /// Query target supply voltage
    VoltGet,
    /// Set sampling frequency in hertz
    Freq(u32),
    /// Set acquisition duration
    AcqTime(AcqTime),
    /// Set acquisition mode
    AcqMode(AcqMode),
    /// Set analog front-end mode
    FuncMode(FuncMode),
    /// Select current or energy output
    Output(OutputKind),
    /// Select the stream encoding
    Format(DataFormat),
    /// Select the trigger source
    TrigSrc(TriggerSource),
    /// Trigger delay in milliseconds
    TrigDelay(u32),
    /// Current threshold in microamperes
    CurrThre(u32),
    /// Target power during acquisition
    Pwr(PowerState),
    /// Query target power
    PwrGet,
    /// Target power after acquisition
    PwrEnd(PowerEnd),
    /// Start acquisition
    Start,
    /// Stop acquisition
    Stop,
    /// Cut target power for the given milliseconds
    TargetReset(u32),
    /// Board temperature query
    Temp(TempUnit),
    /// Board self-test
    Autotest(AutotestAction),
    /// Board self-calibration
    Calib,
}

impl Command {
    /// Command word as it appears on the wire and in `ack` replies
    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Echo(_) => "echo",
            Self::PowerShield => "powershield",
            Self::Version => "version",
            Self::Status => "status",
            Self::Htc => "htc",
            Self::Hrc => "hrc",
            Self::Lcd { .. } => "lcd",
            Self::Psrst => "psrst",
            Self::Volt(_) | Self::VoltGet => "volt",
            Self::Freq(_) => "freq",
            Self::AcqTime(_) => "acqtime",
            Self::AcqMode(_) => "acqmode",
            Self::FuncMode(_) => "funcmode",
            Self::Output(_) => "output",
            Self::Format(_) => "format",
            Self::TrigSrc(_) => "trigsrc",
            Self::TrigDelay(_) => "trigdelay",
            Self::CurrThre(_) => "currthre",
            Self::Pwr(_) | Self::PwrGet => "pwr",
            Self::PwrEnd(_) => "pwrend",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::TargetReset(_) => "targrst",
            Self::Temp(_) => "temp",
            Self::Autotest(_) => "autotest",
            Self::Calib => "calib",
        }
    }

    /// Expected reply
    pub fn response_class(&self) -> ResponseClass {
        match self {
            Self::Psrst => ResponseClass::Silent,
            _ => ResponseClass::Acknowledged,
        }
    }

    /// Configuration setters sent as a batch before `start`
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Volt(_)
                | Self::Freq(_)
                | Self::AcqTime(_)
                | Self::AcqMode(_)
                | Self::FuncMode(_)
                | Self::Output(_)
                | Self::Format(_)
                | Self::TrigSrc(_)
                | Self::TrigDelay(_)
                | Self::CurrThre(_)
                | Self::Pwr(_)
                | Self::PwrEnd(_)
        )
    }

    /// Commands the device accepts in the middle of an acquisition
    pub fn allowed_while_acquiring(&self) -> bool {
        matches!(self, Self::Stop | Self::TargetReset(_))
    }

    /// Check every parameter against its documented range
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Self::Echo(text) => check_text("echo", text),
            Self::Lcd { line, text } => {
                if !matches!(line, 1 | 2) {
                    return Err(EngineError::invalid("lcd", format!("line {line} is not 1 or 2")));
                }
                if text.chars().count() > LCD_MAX_CHARS {
                    return Err(EngineError::invalid(
                        "lcd",
                        format!("text longer than {LCD_MAX_CHARS} characters"),
                    ));
                }
                if text.contains('"') {
                    return Err(EngineError::invalid("lcd", "text must not contain quotes"));
                }
                check_text("lcd", text)
            }
            Self::Volt(mv) => {
                if VOLTAGE_RANGE_MV.contains(mv) {
                    Ok(())
                } else {
                    Err(EngineError::invalid(
                        "volt",
                        format!(
                            "{mv} mV outside {}..={} mV",
                            VOLTAGE_RANGE_MV.start(),
                            VOLTAGE_RANGE_MV.end()
                        ),
                    ))
                }
            }
            Self::Freq(hz) => {
                if FREQUENCIES_HZ.contains(hz) {
                    Ok(())
                } else {
                    Err(EngineError::invalid(
                        "freq",
                        format!("{hz} Hz is not a supported sampling frequency"),
                    ))
                }
            }
            Self::AcqTime(AcqTime::Millis(ms)) => {
                if (1..=ACQ_TIME_MAX_MS).contains(ms) {
                    Ok(())
                } else {
                    Err(EngineError::invalid(
                        "acqtime",
                        format!("{ms} ms outside 1..={ACQ_TIME_MAX_MS} ms"),
                    ))
                }
            }
            Self::TrigDelay(ms) => check_max("trigdelay", *ms, TRIGGER_DELAY_MAX_MS, "ms"),
            Self::TargetReset(ms) => check_max("targrst", *ms, TARGET_RESET_MAX_MS, "ms"),
            Self::CurrThre(ua) => check_max("currthre", *ua, CURRENT_THRESHOLD_MAX_UA, "uA"),
            _ => Ok(()),
        }
    }

    /// Validate and produce the newline-terminated wire bytes
    pub fn encode(&self) -> Result<Bytes, EngineError> {
        self.validate()?;
        Ok(Bytes::from(format!("{self}\n")))
    }
}

fn check_text(field: &'static str, text: &str) -> Result<(), EngineError> {
    if text.is_ascii() && !text.chars().any(|c| c.is_ascii_control()) {
        Ok(())
    } else {
        Err(EngineError::invalid(field, "text must be printable ASCII"))
    }
}

fn check_max(field: &'static str, value: u32, max: u32, unit: &str) -> Result<(), EngineError> {
    if value <= max {
        Ok(())
    } else {
        Err(EngineError::invalid(
            field,
            format!("{value} {unit} outside 0..={max} {unit}"),
        ))
    }
}

/// `0` or `<ms>m`
fn millis_arg(ms: u32) -> String {
    if ms == 0 {
        "0".to_string()
    } else {
        format!("{ms}m")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Self::Echo(text) => write!(f, "{name} {text}"),
            Self::Lcd { line, text } => write!(f, "{name} {line} \"{text}\""),
            Self::Volt(mv) => write!(f, "{name} {mv}m"),
            Self::VoltGet | Self::PwrGet => write!(f, "{name} get"),
            Self::Freq(hz) if *hz >= 1000 => write!(f, "{name} {}k", hz / 1000),
            Self::Freq(hz) => write!(f, "{name} {hz}"),
            Self::AcqTime(time) => write!(f, "{name} {time}"),
            Self::AcqMode(v) => write!(f, "{name} {v}"),
            Self::FuncMode(v) => write!(f, "{name} {v}"),
            Self::Output(v) => write!(f, "{name} {v}"),
            Self::Format(v) => write!(f, "{name} {v}"),
            Self::TrigSrc(v) => write!(f, "{name} {v}"),
            Self::TrigDelay(ms) | Self::TargetReset(ms) => write!(f, "{name} {}", millis_arg(*ms)),
            Self::CurrThre(ua) => write!(f, "{name} {ua}u"),
            Self::Pwr(v) => write!(f, "{name} {v}"),
            Self::PwrEnd(v) => write!(f, "{name} {v}"),
            Self::Temp(v) => write!(f, "{name} {v}"),
            Self::Autotest(v) => write!(f, "{name} {v}"),
            Self::Help
            | Self::PowerShield
            | Self::Version
            | Self::Status
            | Self::Htc
            | Self::Hrc
            | Self::Psrst
            | Self::Start
            | Self::Stop
            | Self::Calib => f.write_str(name),
        }
    }
}

/// Split `<digits><suffix>` into the number and its unit suffix
fn split_number<'a>(field: &'static str, arg: &'a str) -> Result<(u64, &'a str), EngineError> {
    let end = arg
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(arg.len());
    if end == 0 {
        return Err(EngineError::invalid(field, format!("`{arg}` is not a number")));
    }
    let value = arg[..end]
        .parse::<u64>()
        .map_err(|e| EngineError::invalid(field, e.to_string()))?;
    Ok((value, &arg[end..]))
}

fn narrow<T: TryFrom<u64>>(field: &'static str, value: u64) -> Result<T, EngineError> {
    T::try_from(value).map_err(|_| EngineError::invalid(field, format!("{value} out of range")))
}

/// Millisecond argument: `0`, `<n>m`, or whole seconds
fn parse_millis(field: &'static str, arg: &str) -> Result<u32, EngineError> {
    match split_number(field, arg)? {
        (n, "m") => narrow(field, n),
        (n, "") => narrow(field, n.saturating_mul(1000)),
        (_, suffix) => Err(EngineError::invalid(field, format!("unknown unit `{suffix}`"))),
    }
}

impl FromStr for Command {
    type Err = EngineError;

    /// Parse the wire form produced by [`Command::encode`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(['\r', '\n']).trim();
        let (word, rest) = match line.split_once(' ') {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let arg = rest;

        let command = match (word, arg) {
            ("help", "") => Self::Help,
            ("echo", text) => Self::Echo(text.to_string()),
            ("powershield", "") => Self::PowerShield,
            ("version", "") => Self::Version,
            ("status", "") => Self::Status,
            ("htc", "") => Self::Htc,
            ("hrc", "") => Self::Hrc,
            ("psrst", "") => Self::Psrst,
            ("start", "") => Self::Start,
            ("stop", "") => Self::Stop,
            ("calib", "") => Self::Calib,
            ("lcd", args) => {
                let (line_no, text) = args
                    .split_once(' ')
                    .ok_or_else(|| EngineError::invalid("lcd", "expected `<line> \"<text>\"`"))?;
                let text = text
                    .trim()
                    .strip_prefix('"')
                    .and_then(|t| t.strip_suffix('"'))
                    .ok_or_else(|| EngineError::invalid("lcd", "text must be quoted"))?;
                let line = line_no
                    .parse::<u8>()
                    .map_err(|e| EngineError::invalid("lcd", e.to_string()))?;
                Self::Lcd {
                    line,
                    text: text.to_string(),
                }
            }
            ("volt", "get") => Self::VoltGet,
            ("volt", arg) => match split_number("volt", arg)? {
                (mv, "m") => Self::Volt(narrow("volt", mv)?),
                (_, suffix) => {
                    return Err(EngineError::invalid("volt", format!("unknown unit `{suffix}`")))
                }
            },
            ("freq", arg) => match split_number("freq", arg)? {
                (khz, "k") => Self::Freq(narrow("freq", khz.saturating_mul(1000))?),
                (hz, "") => Self::Freq(narrow("freq", hz)?),
                (_, suffix) => {
                    return Err(EngineError::invalid("freq", format!("unknown unit `{suffix}`")))
                }
            },
            ("acqtime", arg) => Self::AcqTime(arg.parse()?),
            ("acqmode", arg) => Self::AcqMode(arg.parse()?),
            ("funcmode", arg) => Self::FuncMode(arg.parse()?),
            ("output", arg) => Self::Output(arg.parse()?),
            ("format", arg) => Self::Format(arg.parse()?),
            ("trigsrc", arg) => Self::TrigSrc(arg.parse()?),
            ("trigdelay", arg) => Self::TrigDelay(parse_millis("trigdelay", arg)?),
            ("targrst", arg) => Self::TargetReset(parse_millis("targrst", arg)?),
            ("currthre", arg) => match split_number("currthre", arg)? {
                (ua, "u") => Self::CurrThre(narrow("currthre", ua)?),
                (ma, "m") => Self::CurrThre(narrow("currthre", ma.saturating_mul(1000))?),
                (_, suffix) => {
                    return Err(EngineError::invalid(
                        "currthre",
                        format!("unknown unit `{suffix}`"),
                    ))
                }
            },
            ("pwr", "get") => Self::PwrGet,
            ("pwr", arg) => Self::Pwr(arg.parse()?),
            ("pwrend", arg) => Self::PwrEnd(arg.parse()?),
            ("temp", arg) => Self::Temp(arg.parse()?),
            ("autotest", arg) => Self::Autotest(arg.parse()?),
            (word, _) => {
                return Err(EngineError::invalid(
                    "command",
                    format!("unknown command `{word}` or bad arguments"),
                ))
            }
        };

        command.validate()?;
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(cmd: &Command) -> String {
        String::from_utf8(cmd.encode().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_encodings_match_device_grammar() {
        assert_eq!(wire(&Command::Volt(3300)), "volt 3300m\n");
        assert_eq!(wire(&Command::Freq(100)), "freq 100\n");
        assert_eq!(wire(&Command::Freq(50_000)), "freq 50k\n");
        assert_eq!(wire(&Command::AcqTime(AcqTime::Infinite)), "acqtime inf\n");
        assert_eq!(wire(&Command::AcqTime(AcqTime::PowerDown)), "acqtime 0\n");
        assert_eq!(wire(&Command::AcqTime(AcqTime::Millis(250))), "acqtime 250m\n");
        assert_eq!(wire(&Command::AcqTime(AcqTime::Millis(10_000))), "acqtime 10\n");
        assert_eq!(wire(&Command::AcqTime(AcqTime::Millis(1500))), "acqtime 1500m\n");
        assert_eq!(wire(&Command::TrigDelay(0)), "trigdelay 0\n");
        assert_eq!(wire(&Command::TrigDelay(15)), "trigdelay 15m\n");
        assert_eq!(wire(&Command::CurrThre(1500)), "currthre 1500u\n");
        assert_eq!(wire(&Command::Format(DataFormat::Binary)), "format bin_hexa\n");
        assert_eq!(wire(&Command::Temp(TempUnit::Celsius)), "temp degc\n");
        assert_eq!(
            wire(&Command::Lcd { line: 2, text: "hello".into() }),
            "lcd 2 \"hello\"\n"
        );
    }

    #[test]
    fn test_validation_rejects_before_encoding() {
        let err = Command::Volt(1799).encode().unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { field: "volt", .. }));

        assert!(Command::Volt(1800).encode().is_ok());
        assert!(Command::Freq(30_000).encode().is_err());
        assert!(Command::TrigDelay(30_001).encode().is_err());
        assert!(Command::TrigDelay(30_000).encode().is_ok());
        assert!(Command::CurrThre(10_001).encode().is_err());
        assert!(Command::AcqTime(AcqTime::Millis(0)).encode().is_err());
        assert!(Command::Lcd { line: 3, text: "x".into() }.encode().is_err());
        assert!(Command::Lcd { line: 1, text: "x".repeat(17) }.encode().is_err());
        assert!(Command::Echo("a\nb".into()).encode().is_err());
    }

    #[test]
    fn test_every_command_parses_back() {
        let mut commands = vec![
            Command::Help,
            Command::Echo("ping 1".into()),
            Command::PowerShield,
            Command::Version,
            Command::Status,
            Command::Htc,
            Command::Hrc,
            Command::Lcd { line: 1, text: "Idd meter".into() },
            Command::Psrst,
            Command::Volt(1800),
            Command::VoltGet,
            Command::AcqTime(AcqTime::Infinite),
            Command::AcqTime(AcqTime::PowerDown),
            Command::AcqTime(AcqTime::Millis(1)),
            Command::AcqTime(AcqTime::Millis(2000)),
            Command::AcqTime(AcqTime::Millis(2001)),
            Command::TrigDelay(0),
            Command::TrigDelay(30_000),
            Command::CurrThre(0),
            Command::CurrThre(10_000),
            Command::PwrGet,
            Command::Start,
            Command::Stop,
            Command::TargetReset(0),
            Command::TargetReset(500),
            Command::Calib,
        ];
        commands.extend(FREQUENCIES_HZ.iter().map(|&hz| Command::Freq(hz)));
        commands.extend(AcqMode::ALL.iter().map(|&m| Command::AcqMode(m)));
        commands.extend(FuncMode::ALL.iter().map(|&m| Command::FuncMode(m)));
        commands.extend(OutputKind::ALL.iter().map(|&o| Command::Output(o)));
        commands.extend(DataFormat::ALL.iter().map(|&d| Command::Format(d)));
        commands.extend(TriggerSource::ALL.iter().map(|&t| Command::TrigSrc(t)));
        commands.extend(PowerState::ALL.iter().map(|&p| Command::Pwr(p)));
        commands.extend(PowerEnd::ALL.iter().map(|&p| Command::PwrEnd(p)));
        commands.extend(TempUnit::ALL.iter().map(|&t| Command::Temp(t)));
        commands.extend(AutotestAction::ALL.iter().map(|&a| Command::Autotest(a)));

        for command in commands {
            let line = wire(&command);
            let parsed: Command = line.parse().unwrap();
            assert_eq!(parsed, command, "wire form {line:?}");
            assert_eq!(parsed.name(), command.name());
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("frobnicate".parse::<Command>().is_err());
        assert!("volt 12".parse::<Command>().is_err());
        assert!("format utf8".parse::<Command>().is_err());
        assert!("freq 7".parse::<Command>().is_err());
    }

    #[test]
    fn test_acquisition_allow_list() {
        assert!(Command::Stop.allowed_while_acquiring());
        assert!(Command::TargetReset(10).allowed_while_acquiring());
        assert!(!Command::Volt(3300).allowed_while_acquiring());
        assert!(Command::Volt(3300).is_configuration());
        assert!(!Command::Temp(TempUnit::Celsius).is_configuration());
        assert_eq!(Command::Psrst.response_class(), ResponseClass::Silent);
    }
}
