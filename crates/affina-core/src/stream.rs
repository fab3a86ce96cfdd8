//! Text-frame codec for the backend's real-time endpoint.
//!
//! The backend speaks Socket.IO (protocol 5) on top of Engine.IO (protocol 4)
//! over a websocket. Every websocket text message is one Engine.IO packet whose
//! first character is the packet type; `message` packets carry a Socket.IO
//! packet with its own leading type digit.

use crate::emotion::DetectionEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const ENGINE_IO_VERSION: &str = "4";
pub const DEFAULT_NAMESPACE: &str = "/";

pub const EVENT_JOIN_SESSION: &str = "join_session";
pub const EVENT_LOG_UPDATE: &str = "log_update";
pub const EVENT_EMOTION_DETECTED: &str = "emotion_detected";
pub const EVENT_AFFINA_ADVICE: &str = "affina_advice";
pub const EVENT_ERROR: &str = "error";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("empty frame")]
    EmptyFrame,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownPacket(char),
    #[error("unsupported socket.io packet type {0:?}")]
    UnsupportedPacket(char),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Handshake data carried by the Engine.IO `open` packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(OpenPayload),
    Close,
    Ping(String),
    Pong(String),
    Connected { sid: Option<String> },
    Disconnected,
    Event { name: String, args: Vec<Value> },
    ConnectError { message: String },
    Noop,
}

pub fn decode_frame(text: &str) -> Result<Frame, StreamError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(StreamError::EmptyFrame)?;
    let rest = chars.as_str();
    match kind {
        '0' => serde_json::from_str(rest)
            .map(Frame::Open)
            .map_err(|err| StreamError::InvalidPayload(format!("open: {err}"))),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping(rest.to_string())),
        '3' => Ok(Frame::Pong(rest.to_string())),
        '4' => decode_socket_packet(rest),
        '5' | '6' => Ok(Frame::Noop),
        other => Err(StreamError::UnknownPacket(other)),
    }
}

/// Skips a `/namespace,` prefix and a numeric ack id, returning the JSON body.
fn strip_packet_prefix(body: &str) -> &str {
    let mut rest = body;
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }
    rest.trim_start_matches(|ch: char| ch.is_ascii_digit())
}

fn decode_socket_packet(packet: &str) -> Result<Frame, StreamError> {
    let mut chars = packet.chars();
    let kind = chars.next().ok_or(StreamError::EmptyFrame)?;
    let body = strip_packet_prefix(chars.as_str());
    match kind {
        '0' => {
            let sid = if body.is_empty() {
                None
            } else {
                serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|value| value.get("sid").and_then(Value::as_str).map(str::to_string))
            };
            Ok(Frame::Connected { sid })
        }
        '1' => Ok(Frame::Disconnected),
        '2' => {
            let values: Vec<Value> = serde_json::from_str(body)
                .map_err(|err| StreamError::InvalidPayload(format!("event: {err}")))?;
            let mut values = values.into_iter();
            let name = match values.next() {
                Some(Value::String(name)) => name,
                _ => {
                    return Err(StreamError::InvalidPayload(
                        "event without a name".to_string(),
                    ))
                }
            };
            Ok(Frame::Event {
                name,
                args: values.collect(),
            })
        }
        '3' => Ok(Frame::Noop),
        '4' => {
            let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| value.as_str().map(str::to_string))
                .unwrap_or_else(|| "connection refused".to_string());
            Ok(Frame::ConnectError { message })
        }
        other => Err(StreamError::UnsupportedPacket(other)),
    }
}

pub fn encode_connect() -> String {
    "40".to_string()
}

pub fn encode_pong(data: &str) -> String {
    format!("3{data}")
}

pub fn encode_event<T: Serialize>(name: &str, payload: &T) -> Result<String, StreamError> {
    let payload = serde_json::to_value(payload)
        .map_err(|err| StreamError::InvalidPayload(err.to_string()))?;
    let body = serde_json::to_string(&Value::Array(vec![
        Value::String(name.to_string()),
        payload,
    ]))
    .map_err(|err| StreamError::InvalidPayload(err.to_string()))?;
    Ok(format!("42{body}"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinSessionPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    JoinSession(JoinSessionPayload),
}

impl ClientEvent {
    pub fn join(session_id: &str) -> Self {
        Self::JoinSession(JoinSessionPayload {
            session_id: session_id.to_string(),
        })
    }

    pub fn encode(&self) -> Result<String, StreamError> {
        match self {
            ClientEvent::JoinSession(payload) => encode_event(EVENT_JOIN_SESSION, payload),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LogUpdatePayload {
    #[serde(default)]
    pub logs: Vec<Value>,
}

impl LogUpdatePayload {
    /// String entries only; anything else in the list is noise.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.logs.iter().filter_map(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    LogUpdate(LogUpdatePayload),
    EmotionDetected(DetectionEvent),
    AffinaAdvice(Value),
    Error(Value),
    Other { name: String },
}

impl ServerEvent {
    pub fn from_event(name: &str, mut args: Vec<Value>) -> Result<Self, StreamError> {
        let first = if args.is_empty() {
            Value::Null
        } else {
            args.swap_remove(0)
        };
        match name {
            EVENT_LOG_UPDATE => serde_json::from_value(first)
                .map(ServerEvent::LogUpdate)
                .map_err(|err| StreamError::InvalidPayload(format!("{name}: {err}"))),
            EVENT_EMOTION_DETECTED => serde_json::from_value(first)
                .map(ServerEvent::EmotionDetected)
                .map_err(|err| StreamError::InvalidPayload(format!("{name}: {err}"))),
            EVENT_AFFINA_ADVICE => Ok(ServerEvent::AffinaAdvice(first)),
            EVENT_ERROR => Ok(ServerEvent::Error(first)),
            other => Ok(ServerEvent::Other {
                name: other.to_string(),
            }),
        }
    }

    /// Human-readable text of an `error` payload.
    pub fn error_message(payload: &Value) -> String {
        payload
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .or_else(|| payload.as_str().map(str::to_string))
            .unwrap_or_else(|| payload.to_string())
    }
}
