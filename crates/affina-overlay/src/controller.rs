//! Session state machine and display state.
//!
//! The controller never performs IO. Every method applies one input and returns
//! the [`Effect`]s the engine must carry out.

use crate::connection::ConnectionUpdate;
use affina_core::api::StartSessionRequest;
use affina_core::stream::ServerEvent;
use affina_core::{
    canonical_emotion, default_monitored_emotions, derive_status, normalize_advice, reduce,
    ConnectionState, DisplaySignal, LogBuffer, SessionLifecycle,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

pub const STATUS_WELCOME: &str = "Welcome!";
pub const STATUS_INITIALIZING: &str = "Initializing…";
pub const STATUS_ANALYSIS_STARTED: &str = "Analysis Active…";
pub const STATUS_CONNECTED: &str = "Analysis active";
pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const STATUS_CONNECTION_ERROR: &str = "Connection error";
pub const STATUS_SESSION_ENDED: &str = "Session ended";
pub const STATUS_START_CANCELLED: &str = "Start cancelled";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a session is already {0}")]
    Busy(SessionLifecycle),
    #[error("monitored emotions cannot change while a session is running")]
    EmotionsFrozen,
    #[error("meeting URL is required")]
    MissingMeetingUrl,
    #[error("meeting objective is required")]
    MissingObjective,
    #[error("select at least one emotion to monitor")]
    NoEmotionsSelected,
    #[error("unknown emotion: {0}")]
    UnknownEmotion(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    Welcome,
    MeetingConfig,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIndicator {
    Live,
    Error,
    Connecting,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    pub phase: SetupPhase,
    pub lifecycle: SessionLifecycle,
    pub connection: ConnectionState,
    pub indicator: StatusIndicator,
    pub status: String,
    pub user_name: String,
    pub first_run: bool,
    pub selected_emotions: Vec<String>,
    pub signal: Option<DisplaySignal>,
    pub advice: Option<String>,
    pub logs: Vec<String>,
}

/// Input to [`SessionController::start`]. Absent fields keep the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub meeting_url: String,
    #[serde(default)]
    pub meeting_objective: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_emotions: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RequestStart {
        ticket: u64,
        request: StartSessionRequest,
    },
    RequestStop {
        session_id: String,
    },
    Join {
        session_id: String,
    },
    PersistDisplayName(String),
    Exit,
}

#[derive(Debug)]
pub struct SessionController {
    lifecycle: SessionLifecycle,
    session_id: Option<String>,
    connection: ConnectionState,
    has_connected: bool,
    status: String,
    user_name: String,
    first_run: bool,
    selected_emotions: Vec<String>,
    logs: LogBuffer,
    signal: Option<DisplaySignal>,
    advice: Option<String>,
    start_ticket: u64,
    exit_pending: bool,
}

impl SessionController {
    /// `user_name` is the name loaded from the profile, if any.
    pub fn new(user_name: Option<String>) -> Self {
        let user_name = user_name
            .map(|name| name.trim().to_string())
            .unwrap_or_default();
        Self {
            lifecycle: SessionLifecycle::Idle,
            session_id: None,
            connection: ConnectionState::Disconnected,
            has_connected: false,
            status: STATUS_WELCOME.to_string(),
            first_run: user_name.is_empty(),
            user_name,
            selected_emotions: default_monitored_emotions(),
            logs: LogBuffer::new(),
            signal: None,
            advice: None,
            start_ticket: 0,
            exit_pending: false,
        }
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        self.lifecycle
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn selected_emotions(&self) -> &[String] {
        &self.selected_emotions
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn signal(&self) -> Option<&DisplaySignal> {
        self.signal.as_ref()
    }

    pub fn advice(&self) -> Option<&str> {
        self.advice.as_deref()
    }

    pub fn exit_pending(&self) -> bool {
        self.exit_pending
    }

    pub fn phase(&self) -> SetupPhase {
        if self.lifecycle != SessionLifecycle::Idle {
            SetupPhase::Recording
        } else if self.user_name.is_empty() {
            SetupPhase::Welcome
        } else {
            SetupPhase::MeetingConfig
        }
    }

    pub fn indicator(&self) -> StatusIndicator {
        if self.phase() != SetupPhase::Recording {
            return StatusIndicator::Ready;
        }
        match self.connection {
            ConnectionState::Connected => StatusIndicator::Live,
            ConnectionState::Error => StatusIndicator::Error,
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                StatusIndicator::Connecting
            }
        }
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            phase: self.phase(),
            lifecycle: self.lifecycle,
            connection: self.connection,
            indicator: self.indicator(),
            status: self.status.clone(),
            user_name: self.user_name.clone(),
            first_run: self.first_run,
            selected_emotions: self.selected_emotions.clone(),
            signal: self.signal.clone(),
            advice: self.advice.clone(),
            logs: self.logs.rendered(),
        }
    }

    pub fn set_user_name(&mut self, user_name: &str) -> Vec<Effect> {
        let user_name = user_name.trim();
        if user_name.is_empty() || user_name == self.user_name {
            return Vec::new();
        }
        self.user_name = user_name.to_string();
        vec![Effect::PersistDisplayName(self.user_name.clone())]
    }

    pub fn toggle_emotion(&mut self, emotion: &str) -> Result<(), SessionError> {
        self.ensure_emotions_editable()?;
        let label = canonical_emotion(emotion)
            .ok_or_else(|| SessionError::UnknownEmotion(emotion.trim().to_string()))?;
        if let Some(pos) = self.selected_emotions.iter().position(|item| item == label) {
            self.selected_emotions.remove(pos);
        } else {
            self.selected_emotions.push(label.to_string());
        }
        Ok(())
    }

    pub fn set_emotions<S: AsRef<str>>(&mut self, emotions: &[S]) -> Result<(), SessionError> {
        self.ensure_emotions_editable()?;
        self.selected_emotions = canonical_selection(emotions)?;
        Ok(())
    }

    fn ensure_emotions_editable(&self) -> Result<(), SessionError> {
        if self.lifecycle != SessionLifecycle::Idle {
            return Err(SessionError::EmotionsFrozen);
        }
        Ok(())
    }

    /// Validates `config` and moves to `starting`. Nothing is logged on rejection.
    pub fn start(&mut self, config: SessionConfig) -> Result<Vec<Effect>, SessionError> {
        if self.lifecycle != SessionLifecycle::Idle {
            return Err(SessionError::Busy(self.lifecycle));
        }
        let meeting_url = config.meeting_url.trim();
        if meeting_url.is_empty() {
            return Err(SessionError::MissingMeetingUrl);
        }
        let meeting_objective = config.meeting_objective.trim();
        if meeting_objective.is_empty() {
            return Err(SessionError::MissingObjective);
        }
        let selected = match &config.selected_emotions {
            Some(emotions) => canonical_selection(emotions)?,
            None => self.selected_emotions.clone(),
        };
        if selected.is_empty() {
            return Err(SessionError::NoEmotionsSelected);
        }

        let mut effects = Vec::new();
        if let Some(name) = config.user_name.as_deref() {
            self.set_user_name(name);
        }
        if !self.user_name.is_empty() {
            effects.push(Effect::PersistDisplayName(self.user_name.clone()));
        }
        self.selected_emotions = selected;
        self.start_ticket += 1;
        self.lifecycle = SessionLifecycle::Starting;
        self.session_id = None;
        self.status = STATUS_INITIALIZING.to_string();
        self.log("Creating session…");
        info!("session_starting: ticket={}", self.start_ticket);
        effects.push(Effect::RequestStart {
            ticket: self.start_ticket,
            request: StartSessionRequest {
                user_name: self.user_name.clone(),
                meeting_url: meeting_url.to_string(),
                meeting_objective: meeting_objective.to_string(),
                selected_emotions: self.selected_emotions.clone(),
            },
        });
        Ok(effects)
    }

    /// Applies the outcome of a start request. `outcome` is the session id or
    /// the failure reason.
    pub fn complete_start(&mut self, ticket: u64, outcome: Result<String, String>) -> Vec<Effect> {
        if ticket != self.start_ticket || self.lifecycle != SessionLifecycle::Starting {
            debug!("session_start_stale: ticket={ticket} current={}", self.start_ticket);
            return match outcome {
                Ok(session_id) => {
                    info!("session_orphan_stop: session_id={session_id}");
                    vec![Effect::RequestStop { session_id }]
                }
                Err(_) => Vec::new(),
            };
        }

        match outcome {
            Ok(session_id) => {
                info!("session_active: session_id={session_id}");
                self.lifecycle = SessionLifecycle::Active;
                self.session_id = Some(session_id.clone());
                self.status = STATUS_ANALYSIS_STARTED.to_string();
                self.log("Session created");
                self.log("Bot joining meeting");
                self.log("Please admit the bot");
                if self.exit_pending {
                    return self.stop();
                }
                if self.connection.is_connected() {
                    self.log("Joining session…");
                    vec![Effect::Join { session_id }]
                } else {
                    self.log("Waiting for connection…");
                    Vec::new()
                }
            }
            Err(reason) => {
                info!("session_start_failed: {reason}");
                self.lifecycle = SessionLifecycle::Idle;
                self.session_id = None;
                self.status = format!("Failed: {reason}");
                self.log(&format!("ERROR: {reason}"));
                if self.exit_pending {
                    vec![Effect::Exit]
                } else {
                    Vec::new()
                }
            }
        }
    }

    pub fn stop(&mut self) -> Vec<Effect> {
        match self.lifecycle {
            SessionLifecycle::Idle | SessionLifecycle::Stopping => Vec::new(),
            SessionLifecycle::Starting => {
                // Invalidates the in-flight start; its completion becomes stale.
                self.start_ticket += 1;
                self.lifecycle = SessionLifecycle::Idle;
                self.session_id = None;
                self.status = STATUS_START_CANCELLED.to_string();
                Vec::new()
            }
            SessionLifecycle::Active => match self.session_id.clone() {
                Some(session_id) => {
                    info!("session_stopping: session_id={session_id}");
                    self.lifecycle = SessionLifecycle::Stopping;
                    self.log("Stopping session…");
                    vec![Effect::RequestStop { session_id }]
                }
                None => {
                    self.lifecycle = SessionLifecycle::Idle;
                    Vec::new()
                }
            },
        }
    }

    /// Applies a settled stop request. `outcome` is the backend's message or
    /// the failure reason. Completions for another session are ignored.
    pub fn complete_stop(
        &mut self,
        session_id: &str,
        outcome: Result<Option<String>, String>,
    ) -> Vec<Effect> {
        if self.session_id.as_deref() != Some(session_id) {
            debug!("session_stop_ignored: session_id={session_id}");
            return Vec::new();
        }
        self.session_id = None;
        self.lifecycle = SessionLifecycle::Idle;
        self.signal = None;
        self.advice = None;
        self.logs.clear();
        match outcome {
            Ok(message) => {
                let line = message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| "Session stopped".to_string());
                self.log(&line);
            }
            Err(reason) => self.log(&format!("Stop error: {reason}")),
        }
        self.status = STATUS_SESSION_ENDED.to_string();
        info!("session_ended: session_id={session_id}");
        if self.exit_pending {
            vec![Effect::Exit]
        } else {
            Vec::new()
        }
    }

    /// Stops any running session and exits once it settles.
    pub fn close_app(&mut self) -> Vec<Effect> {
        self.exit_pending = true;
        match self.lifecycle {
            SessionLifecycle::Idle => vec![Effect::Exit],
            // The start completion decides: stop the new session or exit.
            SessionLifecycle::Starting | SessionLifecycle::Stopping => Vec::new(),
            SessionLifecycle::Active => {
                let effects = self.stop();
                if effects.is_empty() {
                    vec![Effect::Exit]
                } else {
                    effects
                }
            }
        }
    }

    pub fn apply_connection(&mut self, update: ConnectionUpdate) -> Vec<Effect> {
        match update {
            ConnectionUpdate::Connecting { .. } => {
                if self.connection != ConnectionState::Error {
                    self.connection = ConnectionState::Connecting;
                }
                Vec::new()
            }
            ConnectionUpdate::Connected => {
                let reconnect = self.has_connected;
                self.has_connected = true;
                self.connection = ConnectionState::Connected;
                self.status = STATUS_CONNECTED.to_string();
                self.log("Connected to backend");
                match (self.lifecycle, self.session_id.clone()) {
                    (SessionLifecycle::Active, Some(session_id)) => {
                        if reconnect {
                            self.log("Reconnected - rejoining session…");
                        } else {
                            self.log("Joining session…");
                        }
                        vec![Effect::Join { session_id }]
                    }
                    _ => Vec::new(),
                }
            }
            ConnectionUpdate::Disconnected => {
                self.connection = ConnectionState::Disconnected;
                self.status = STATUS_DISCONNECTED.to_string();
                self.log("Disconnected from backend");
                Vec::new()
            }
            ConnectionUpdate::Error(message) => {
                self.connection = ConnectionState::Error;
                self.status = STATUS_CONNECTION_ERROR.to_string();
                self.log(&format!("Connection error: {message}"));
                Vec::new()
            }
            ConnectionUpdate::Event(event) => {
                self.apply_server_event(event);
                Vec::new()
            }
        }
    }

    pub fn apply_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Error(payload) => {
                let message = ServerEvent::error_message(&payload);
                self.log(&format!("Error: {message}"));
                return;
            }
            ServerEvent::Other { name } => {
                debug!("stream_event_unhandled: name={name}");
                return;
            }
            _ => {}
        }
        if self.lifecycle != SessionLifecycle::Active {
            debug!("stream_event_ignored: lifecycle={}", self.lifecycle);
            return;
        }
        match event {
            ServerEvent::LogUpdate(payload) => {
                let kept = self.logs.replace_with(payload.lines(), Local::now());
                for line in &kept {
                    if let Some(status) = derive_status(line) {
                        self.status = status.to_string();
                    }
                }
            }
            ServerEvent::EmotionDetected(detection) => {
                if let Some(signal) = reduce(&detection) {
                    self.log(&signal.log_line());
                    self.signal = Some(signal);
                }
            }
            ServerEvent::AffinaAdvice(payload) => {
                self.advice = Some(normalize_advice(&payload));
            }
            ServerEvent::Error(_) | ServerEvent::Other { .. } => {}
        }
    }

    fn log(&mut self, line: &str) {
        self.logs.push(line, Local::now());
    }
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SetupPhase::Welcome => "welcome",
            SetupPhase::MeetingConfig => "meeting_config",
            SetupPhase::Recording => "recording",
        };
        f.write_str(text)
    }
}

fn canonical_selection<S: AsRef<str>>(emotions: &[S]) -> Result<Vec<String>, SessionError> {
    let mut selected: Vec<String> = Vec::with_capacity(emotions.len());
    for emotion in emotions {
        let raw = emotion.as_ref();
        let label = canonical_emotion(raw)
            .ok_or_else(|| SessionError::UnknownEmotion(raw.trim().to_string()))?;
        if !selected.iter().any(|item| item == label) {
            selected.push(label.to_string());
        }
    }
    Ok(selected)
}
