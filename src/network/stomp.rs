//! STOMP 1.2 text framing as spoken by the broker over WebSocket.
//!
//! A frame is `COMMAND\n(header:value\n)*\nbody\0`. Bare end-of-line
//! sequences between frames are heart-beats and carry no frame.

use std::fmt;

use crate::common::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl StompCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Send => "SEND",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
            StompCommand::Disconnect => "DISCONNECT",
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let command = match line {
            "CONNECT" | "STOMP" => StompCommand::Connect,
            "CONNECTED" => StompCommand::Connected,
            "SUBSCRIBE" => StompCommand::Subscribe,
            "UNSUBSCRIBE" => StompCommand::Unsubscribe,
            "SEND" => StompCommand::Send,
            "MESSAGE" => StompCommand::Message,
            "RECEIPT" => StompCommand::Receipt,
            "ERROR" => StompCommand::Error,
            "DISCONNECT" => StompCommand::Disconnect,
            _ => return None,
        };
        Some(command)
    }

    /// CONNECT and CONNECTED headers are sent verbatim, all others are escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, StompCommand::Connect | StompCommand::Connected)
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; repeated headers keep the earliest one.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(host: &str, credential: &str, heartbeat_ms: u64) -> Self {
        Self::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{heartbeat_ms},{heartbeat_ms}"))
            .header("Authorization", format!("Bearer {credential}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(StompCommand::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send(destination: &str, json: impl Into<String>) -> Self {
        let json = json.into();
        Self::new(StompCommand::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", json.len().to_string())
            .body(json)
    }

    pub fn disconnect() -> Self {
        Self::new(StompCommand::Disconnect)
    }

    /// Human-readable reason carried by an ERROR frame.
    pub fn error_reason(&self) -> String {
        match (self.get("message"), self.body.trim()) {
            (Some(message), "") => message.to_string(),
            (Some(message), body) => format!("{message}: {body}"),
            (None, body) => body.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        let escape_headers = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape_headers {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Splits one WebSocket text payload into frames, skipping heart-beats.
///
/// Parsing stops at the first malformed frame; frames decoded before it are kept.
pub fn parse_frames(payload: &str) -> Result<Vec<StompFrame>, ChatError> {
    let mut frames = Vec::new();
    let mut rest = payload;
    loop {
        rest = rest.trim_start_matches(['\n', '\r']);
        if rest.is_empty() {
            return Ok(frames);
        }
        match parse_frame(rest) {
            Ok((frame, remaining)) => {
                frames.push(frame);
                rest = remaining;
            }
            Err(err) if frames.is_empty() => return Err(err),
            Err(err) => {
                log::warn!("Dropping trailing STOMP data after {} frame(s): {err}", frames.len());
                return Ok(frames);
            }
        }
    }
}

fn parse_frame(input: &str) -> Result<(StompFrame, &str), ChatError> {
    let (head, after_head) = split_head(input)
        .ok_or_else(|| ChatError::Parse("frame has no header terminator".into()))?;

    let mut lines = head.lines();
    let command_line = lines.next().unwrap_or_default().trim_end_matches('\r');
    let command = StompCommand::parse(command_line)
        .ok_or_else(|| ChatError::Parse(format!("unknown command `{command_line}`")))?;

    let mut frame = StompFrame::new(command);
    for line in lines {
        let line = line.trim_end_matches('\r');
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ChatError::Parse(format!("header without colon: `{line}`")))?;
        if command.escapes_headers() {
            frame.headers.push((unescape(name)?, unescape(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }

    let body_len = match frame.get("content-length") {
        Some(raw) => Some(
            raw.trim()
                .parse::<usize>()
                .map_err(|_| ChatError::Parse(format!("bad content-length `{raw}`")))?,
        ),
        None => None,
    };

    let (body, remaining) = match body_len {
        Some(len) => {
            let body = after_head
                .get(..len)
                .ok_or_else(|| ChatError::Parse("body shorter than content-length".into()))?;
            let tail = &after_head[len..];
            let remaining = tail
                .strip_prefix('\0')
                .ok_or_else(|| ChatError::Parse("frame is not NUL-terminated".into()))?;
            (body, remaining)
        }
        None => after_head
            .split_once('\0')
            .ok_or_else(|| ChatError::Parse("frame is not NUL-terminated".into()))?,
    };

    frame.body = body.to_string();
    Ok((frame, remaining))
}

/// Splits at the first empty line. Lines may end in `\n` or `\r\n`.
fn split_head(input: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    while let Some(pos) = input[offset..].find('\n') {
        let line_end = offset + pos + 1;
        let rest = &input[line_end..];
        if let Some(body) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) {
            return Some((&input[..line_end], body));
        }
        offset = line_end;
    }
    None
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String, ChatError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ChatError::Parse(format!(
                    "invalid header escape `\\{}`",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
