//! STOMP 1.2 frames carried in WebSocket text messages
//!
//! The broker multiplexes topics over a single socket. A WebSocket message
//! may hold zero or more frames; a message consisting only of EOLs is a
//! heart-beat.

use std::time::Duration;

use thiserror::Error;

pub const STOMP_VERSION: &str = "1.2";

/// Frame command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // Client
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,

    // Server
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Option<Self> {
        Some(match line {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    // STOMP 1.2 leaves CONNECT and CONNECTED headers unescaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

/// Errors produced while decoding frames
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("frame is missing its terminator")]
    Unterminated,

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Header lookup. Repeated headers resolve to the first occurrence.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Frame::new(Command::Connect)
            .with_header("accept-version", STOMP_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.header_value())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).with_header("id", id)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).with_header("receipt", receipt)
    }

    /// Serialize to the text form sent over the socket
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (key, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(key));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(key);
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

/// One item decoded from a WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    HeartBeat,
    Frame(Frame),
}

/// Decode every frame in a WebSocket text message.
pub fn decode(input: &str) -> Result<Vec<Inbound>, FrameError> {
    let mut items = Vec::new();
    let mut rest = skip_eols(input);

    if rest.is_empty() {
        if !input.is_empty() {
            items.push(Inbound::HeartBeat);
        }
        return Ok(items);
    }

    while !rest.is_empty() {
        let (frame, remainder) = decode_frame(rest)?;
        items.push(Inbound::Frame(frame));
        rest = skip_eols(remainder);
    }

    Ok(items)
}

fn skip_eols(input: &str) -> &str {
    input.trim_start_matches(['\n', '\r'])
}

fn decode_frame(input: &str) -> Result<(Frame, &str), FrameError> {
    let (command_line, mut rest) = split_line(input)?;
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, remainder) = split_line(rest)?;
        rest = remainder;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if escape {
            headers.push((unescape_header(key)?, unescape_header(value)?));
        } else {
            headers.push((key.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let (body, remainder) = match content_length {
        Some(len) => {
            let body = rest
                .get(..len)
                .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
            let after = &rest[len..];
            let remainder = after.strip_prefix('\0').ok_or(FrameError::Unterminated)?;
            (body, remainder)
        }
        None => {
            let nul = rest.find('\0').ok_or(FrameError::Unterminated)?;
            (&rest[..nul], &rest[nul + 1..])
        }
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        remainder,
    ))
}

fn split_line(input: &str) -> Result<(&str, &str), FrameError> {
    let idx = input.find('\n').ok_or(FrameError::Unterminated)?;
    let line = &input[..idx];
    Ok((line.strip_suffix('\r').unwrap_or(line), &input[idx + 1..]))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

/// `heart-beat` header: (can send every `outgoing_ms`, wants to receive every
/// `incoming_ms`). Zero disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self {
            outgoing_ms: outgoing.as_millis() as u64,
            incoming_ms: incoming.as_millis() as u64,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (outgoing, incoming) = value.split_once(',')?;
        Some(Self {
            outgoing_ms: outgoing.trim().parse().ok()?,
            incoming_ms: incoming.trim().parse().ok()?,
        })
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }

    /// Resolve (send interval, expected receive interval) against the
    /// server's `heart-beat` from CONNECTED.
    pub fn negotiate(&self, server: HeartBeat) -> (Option<Duration>, Option<Duration>) {
        let send = (self.outgoing_ms != 0 && server.incoming_ms != 0)
            .then(|| Duration::from_millis(self.outgoing_ms.max(server.incoming_ms)));
        let receive = (self.incoming_ms != 0 && server.outgoing_ms != 0)
            .then(|| Duration::from_millis(self.incoming_ms.max(server.outgoing_ms)));
        (send, receive)
    }
}
