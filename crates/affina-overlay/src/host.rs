//! NDJSON bridge between the engine and the window shell.
//!
//! Commands arrive one JSON object per line on stdin; outputs leave the same way
//! on stdout. Both are tagged by `"type"`.

use crate::controller::{DisplaySnapshot, SessionConfig};
use affina_core::api::HealthStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_MAX_LINE_BYTES: usize = 256 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostFrameError {
    #[error("line too large: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("invalid command: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    SetUserName {
        user_name: String,
    },
    ToggleEmotion {
        emotion: String,
    },
    SetEmotions {
        emotions: Vec<String>,
    },
    Start(SessionConfig),
    Stop,
    Health,
    #[serde(rename = "close-app")]
    CloseApp,
    #[serde(rename = "minimize-app")]
    MinimizeApp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostOutput {
    Snapshot(DisplaySnapshot),
    Health { status: HealthStatus },
    Rejected { reason: String },
    Minimize,
    Exit,
}

/// Parses one command line. Blank lines yield `None`.
pub fn decode_command(line: &str, max_line_bytes: usize) -> Result<Option<HostCommand>, HostFrameError> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.len() > max_line_bytes {
        return Err(HostFrameError::Oversized {
            size: line.len(),
            max: max_line_bytes,
        });
    }
    if line.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|err| HostFrameError::Decode(err.to_string()))
}

pub fn encode_output(output: &HostOutput) -> Result<String, HostFrameError> {
    let mut line =
        serde_json::to_string(output).map_err(|err| HostFrameError::Encode(err.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Forwards parsed commands until EOF. Malformed lines are skipped.
pub async fn read_commands<R>(reader: R, commands: mpsc::Sender<HostCommand>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match decode_command(&line, DEFAULT_MAX_LINE_BYTES) {
                Ok(Some(command)) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("host_command_skipped: {err}"),
            },
            Ok(None) => {
                debug!("host_input_eof");
                break;
            }
            Err(err) => {
                warn!("host_input_error: {err}");
                break;
            }
        }
    }
}

/// Writes outputs as they arrive until the channel closes.
pub async fn write_outputs<W>(mut writer: W, mut outputs: mpsc::Receiver<HostOutput>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(output) = outputs.recv().await {
        let line = match encode_output(&output) {
            Ok(line) => line,
            Err(err) => {
                warn!("host_output_encode_error: {err}");
                continue;
            }
        };
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            warn!("host_output_error: {err}");
            break;
        }
        if let Err(err) = writer.flush().await {
            warn!("host_output_error: {err}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_start_with_optional_fields() {
        let command = decode_command(
            r#"{"type":"start","meeting_url":"https://meet.example.com/x","meeting_objective":"Demo"}"#,
            DEFAULT_MAX_LINE_BYTES,
        )
        .expect("decode")
        .expect("command");
        assert_eq!(
            command,
            HostCommand::Start(SessionConfig {
                user_name: None,
                meeting_url: "https://meet.example.com/x".to_string(),
                meeting_objective: "Demo".to_string(),
                selected_emotions: None,
            })
        );
    }

    #[test]
    fn decodes_hyphenated_window_commands() {
        assert_eq!(
            decode_command(r#"{"type":"close-app"}"#, DEFAULT_MAX_LINE_BYTES),
            Ok(Some(HostCommand::CloseApp))
        );
        assert_eq!(
            decode_command("{\"type\":\"minimize-app\"}\r\n", DEFAULT_MAX_LINE_BYTES),
            Ok(Some(HostCommand::MinimizeApp))
        );
        assert_eq!(
            decode_command(r#"{"type":"toggle_emotion","emotion":"Joy"}"#, DEFAULT_MAX_LINE_BYTES),
            Ok(Some(HostCommand::ToggleEmotion {
                emotion: "Joy".to_string()
            }))
        );
    }

    #[test]
    fn blank_and_malformed_lines() {
        assert_eq!(decode_command("   ", DEFAULT_MAX_LINE_BYTES), Ok(None));
        assert!(matches!(
            decode_command(r#"{"type":"launch"}"#, DEFAULT_MAX_LINE_BYTES),
            Err(HostFrameError::Decode(_))
        ));
        assert_eq!(
            decode_command(r#"{"type":"stop"}"#, 4),
            Err(HostFrameError::Oversized { size: 15, max: 4 })
        );
    }

    #[test]
    fn encodes_tagged_outputs() {
        let line = encode_output(&HostOutput::Rejected {
            reason: "meeting URL is required".to_string(),
        })
        .expect("encode");
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
        assert_eq!(value, json!({"type": "rejected", "reason": "meeting URL is required"}));

        let health = encode_output(&HostOutput::Health {
            status: HealthStatus::Unhealthy { status: 503 },
        })
        .expect("encode");
        let value: serde_json::Value = serde_json::from_str(health.trim()).expect("json");
        assert_eq!(value["status"]["state"], "unhealthy");
        assert_eq!(encode_output(&HostOutput::Exit).expect("encode"), "{\"type\":\"exit\"}\n");
    }

    #[tokio::test]
    async fn reader_skips_garbage_and_stops_at_eof() {
        let input = b"{\"type\":\"stop\"}\nnot json\n\n{\"type\":\"health\"}\n".to_vec();
        let (tx, mut rx) = mpsc::channel(8);
        read_commands(std::io::Cursor::new(input), tx).await;
        assert_eq!(rx.recv().await, Some(HostCommand::Stop));
        assert_eq!(rx.recv().await, Some(HostCommand::Health));
        assert_eq!(rx.recv().await, None);
    }
}
