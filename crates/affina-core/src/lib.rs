pub mod advice;
pub mod api;
pub mod emotion;
pub mod log_buffer;
pub mod sanitize;
pub mod stream;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use advice::normalize_advice;
pub use emotion::{reduce, DetectionEvent, DisplaySignal, EmotionScore, Modality};
pub use log_buffer::{LogBuffer, LogEntry, LOG_CAPACITY};
pub use sanitize::{derive_status, sanitize};

/// Labels a user can pick to monitor before a session starts.
pub const EMOTION_CATALOG: [&str; 28] = [
    "Confusion",
    "Boredom",
    "Concentration",
    "Doubt",
    "Authenticity",
    "Joy",
    "Excitement",
    "Sadness",
    "Anger",
    "Fear",
    "Surprise",
    "Disgust",
    "Contempt",
    "Pride",
    "Shame",
    "Guilt",
    "Embarrassment",
    "Gratitude",
    "Love",
    "Interest",
    "Amusement",
    "Awe",
    "Admiration",
    "Relief",
    "Satisfaction",
    "Triumph",
    "Anxiety",
    "Distress",
];

pub const DEFAULT_MONITORED_EMOTIONS: [&str; 5] =
    ["Confusion", "Boredom", "Concentration", "Doubt", "Authenticity"];

pub fn default_monitored_emotions() -> Vec<String> {
    DEFAULT_MONITORED_EMOTIONS
        .iter()
        .map(|label| label.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycle {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
}

impl SessionLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionLifecycle::Idle => "idle",
            SessionLifecycle::Starting => "starting",
            SessionLifecycle::Active => "active",
            SessionLifecycle::Stopping => "stopping",
        }
    }

    /// Lifecycle states in which the backend-issued identifier must be held.
    pub fn holds_session_id(&self) -> bool {
        matches!(self, SessionLifecycle::Active | SessionLifecycle::Stopping)
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self, SessionLifecycle::Idle)
    }
}

impl fmt::Display for SessionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionLifecycle {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" => Ok(SessionLifecycle::Idle),
            "starting" => Ok(SessionLifecycle::Starting),
            "active" => Ok(SessionLifecycle::Active),
            "stopping" => Ok(SessionLifecycle::Stopping),
            other => Err(format!("Unknown lifecycle: {other}")),
        }
    }
}

/// Returns the catalog spelling of `label` when it is a known emotion.
pub fn canonical_emotion(label: &str) -> Option<&'static str> {
    let needle = label.trim();
    EMOTION_CATALOG
        .iter()
        .copied()
        .find(|known| known.eq_ignore_ascii_case(needle))
}
