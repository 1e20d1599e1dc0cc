//! Device response grammar
//!
//! Replies are text lines. The interactive prompt `PowerShield > ` may
//! precede them and is stripped before classification.

use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use std::fmt;

/// Interactive shell prompt
pub const PROMPT: &str = "PowerShield > ";

/// A classified reply line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// `ack <command> [payload]`
    Ack {
        /// Command being acknowledged
        command: String,
        /// Remaining words, if any
        payload: Option<String>,
    },
    /// `err <text>` or `error <command> [args]`
    Error {
        /// Command named in the error, when present
        command: Option<String>,
        /// Error text
        text: String,
    },
    /// Anything else (banners, help output, free text)
    Text(String),
}

impl Reply {
    /// Classify one line, without its terminator
    pub fn classify(line: &str) -> Self {
        let line = strip_prompt(line).trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word {
            "ack" if !rest.is_empty() => {
                let (command, payload) = match rest.split_once(char::is_whitespace) {
                    Some((command, payload)) => (command, Some(payload.trim().to_string())),
                    None => (rest, None),
                };
                Reply::Ack {
                    command: command.to_string(),
                    payload,
                }
            }
            "err" => Reply::Error {
                command: None,
                text: rest.to_string(),
            },
            "error" => {
                let command = rest
                    .split_whitespace()
                    .next()
                    .map(String::from);
                Reply::Error {
                    command,
                    text: rest.to_string(),
                }
            }
            _ => Reply::Text(line.to_string()),
        }
    }

    /// Whether this reply answers `name`
    pub fn answers(&self, name: &str) -> bool {
        match self {
            Reply::Ack { command, .. } => command == name,
            Reply::Error { command, .. } => command.as_deref().map_or(true, |c| c == name),
            Reply::Text(_) => false,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ack { command, payload: Some(payload) } => write!(f, "ack {command} {payload}"),
            Reply::Ack { command, payload: None } => write!(f, "ack {command}"),
            Reply::Error { command: Some(_), text } => write!(f, "error {text}"),
            Reply::Error { command: None, text } => write!(f, "err {text}"),
            Reply::Text(text) => f.write_str(text),
        }
    }
}

/// Remove every leading prompt occurrence
pub fn strip_prompt(mut line: &str) -> &str {
    loop {
        let trimmed = line.trim_start();
        match trimmed.strip_prefix(PROMPT.trim_end()) {
            Some(rest) => line = rest,
            None => return trimmed,
        }
    }
}

/// Splits a byte stream into `\n`-terminated lines
#[derive(Debug)]
pub struct LineAssembler {
    buffer: BytesMut,
    max_line: usize,
}

impl LineAssembler {
    /// Create an assembler that drops lines longer than `max_line`
    pub fn new(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            max_line,
        }
    }

    /// Append raw bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete line with its `\r\n` removed
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let raw = self.buffer.split_to(pos + 1);
                    let text = String::from_utf8_lossy(&raw[..pos]);
                    let text = text.trim_end_matches('\r');
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Some(text.to_string());
                }
                None => {
                    if self.buffer.len() > self.max_line {
                        let overflow = self.buffer.len() - self.max_line;
                        self.buffer.advance(overflow);
                    }
                    return None;
                }
            }
        }
    }

    /// Hand back unconsumed bytes
    pub fn take_rest(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Drop buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_ack_and_errors() {
        assert_eq!(
            Reply::classify("ack htc"),
            Reply::Ack { command: "htc".into(), payload: None }
        );
        assert_eq!(
            Reply::classify("PowerShield > ack version 1.0.4"),
            Reply::Ack { command: "version".into(), payload: Some("1.0.4".into()) }
        );
        assert_eq!(
            Reply::classify("err unknown command"),
            Reply::Error { command: None, text: "unknown command".into() }
        );
        assert_eq!(
            Reply::classify("error volt 5000m"),
            Reply::Error { command: Some("volt".into()), text: "volt 5000m".into() }
        );
        assert_eq!(
            Reply::classify("PowerShield > PowerShield > banner"),
            Reply::Text("banner".into())
        );
    }

    #[test]
    fn test_answers_matches_command_name() {
        let ack = Reply::classify("ack freq 100");
        assert!(ack.answers("freq"));
        assert!(!ack.answers("volt"));
        assert!(Reply::classify("err busy").answers("volt"));
        assert!(!Reply::classify("error freq 7").answers("volt"));
    }

    #[test]
    fn test_line_assembler_handles_split_input() {
        let mut lines = LineAssembler::default();
        lines.push(b"ack po");
        assert_eq!(lines.next_line(), None);
        lines.push(b"wershield\r\n\r\nack ver");
        assert_eq!(lines.next_line().as_deref(), Some("ack powershield"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.pending(), 7);
        assert_eq!(&lines.take_rest()[..], b"ack ver");
    }

    #[test]
    fn test_line_assembler_bounds_unterminated_input() {
        let mut lines = LineAssembler::new(8);
        lines.push(&[b'x'; 32]);
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.pending(), 8);
    }
}
