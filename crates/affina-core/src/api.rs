//! Request and response bodies for the backend's HTTP endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const START_SESSION_PATH: &str = "/api/start-session";
pub const STOP_SESSION_PATH: &str = "/api/stop-session";
pub const HEALTH_PATH: &str = "/api/health";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StartSessionRequest {
    pub user_name: String,
    pub meeting_url: String,
    pub meeting_objective: String,
    #[serde(default)]
    pub selected_emotions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StartSessionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartSessionResponse {
    /// The issued identifier, or the reason the session was not created.
    pub fn into_session_id(self) -> Result<String, String> {
        if !self.success {
            return Err(self
                .error
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| "Failed to start session".to_string()));
        }
        self.session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "Backend returned no session id".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StopSessionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy {
        #[serde(default)]
        details: Value,
    },
    Unhealthy {
        status: u16,
    },
    Unreachable {
        reason: String,
    },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy { .. })
    }
}
