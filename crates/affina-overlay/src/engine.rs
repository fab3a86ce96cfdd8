//! The single loop that owns the controller.
//!
//! Host commands, stream updates and HTTP completions are all serialized
//! through one `tokio::select!`, so the controller is never touched
//! concurrently. HTTP calls run on spawned tasks and post back here.

use crate::api::BackendApi;
use crate::connection::{ConnectionHandle, ConnectionUpdate};
use crate::controller::{Effect, SessionController};
use crate::host::{HostCommand, HostOutput};
use crate::profile::ProfileStore;
use affina_core::api::{HealthStatus, StartSessionRequest, StopSessionRequest};
use affina_core::stream::ClientEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything the engine needs from the outside world.
pub struct EngineContext {
    pub backend: Arc<dyn BackendApi>,
    pub stream: ConnectionHandle,
    pub profile: ProfileStore,
    pub shutdown_grace: Duration,
}

#[derive(Debug)]
enum Completion {
    Start {
        ticket: u64,
        outcome: Result<String, String>,
    },
    Stop {
        session_id: String,
        outcome: Result<Option<String>, String>,
    },
    Health(HealthStatus),
}

pub struct Engine {
    ctx: EngineContext,
    controller: SessionController,
    outputs: mpsc::Sender<HostOutput>,
    completions: mpsc::Sender<Completion>,
}

impl Engine {
    /// Runs until the controller asks to exit or the grace period after
    /// `close-app` runs out. Returns the controller in its final state.
    pub async fn run(
        ctx: EngineContext,
        controller: SessionController,
        mut commands: mpsc::Receiver<HostCommand>,
        mut updates: mpsc::Receiver<ConnectionUpdate>,
        outputs: mpsc::Sender<HostOutput>,
    ) -> SessionController {
        let (completions, mut completions_rx) = mpsc::channel(32);
        let mut engine = Engine {
            ctx,
            controller,
            outputs,
            completions,
        };
        let mut commands_open = true;
        let mut updates_open = true;
        let mut exit_deadline: Option<Instant> = None;

        engine.publish_snapshot().await;
        loop {
            let effects = tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => engine.handle_command(command).await,
                    None => {
                        info!("host_closed: treating as close-app");
                        commands_open = false;
                        engine.controller.close_app()
                    }
                },
                update = updates.recv(), if updates_open => match update {
                    Some(update) => engine.controller.apply_connection(update),
                    None => {
                        debug!("stream_updates_closed");
                        updates_open = false;
                        continue;
                    }
                },
                Some(completion) = completions_rx.recv() => engine.apply_completion(completion).await,
                _ = tokio::time::sleep_until(exit_deadline.unwrap_or_else(Instant::now)), if exit_deadline.is_some() => {
                    warn!("shutdown_grace_elapsed: exiting without stop confirmation");
                    vec![Effect::Exit]
                }
            };

            let exit = engine.execute(effects);
            engine.publish_snapshot().await;
            if exit {
                let _ = engine.outputs.send(HostOutput::Exit).await;
                break;
            }
            if engine.controller.exit_pending() && exit_deadline.is_none() {
                exit_deadline = Some(Instant::now() + engine.ctx.shutdown_grace);
            }
        }

        let Engine {
            ctx, controller, ..
        } = engine;
        ctx.stream.shutdown().await;
        info!("engine_exit");
        controller
    }

    async fn handle_command(&mut self, command: HostCommand) -> Vec<Effect> {
        debug!("host_command: {command:?}");
        match command {
            HostCommand::SetUserName { user_name } => self.controller.set_user_name(&user_name),
            HostCommand::ToggleEmotion { emotion } => {
                if let Err(err) = self.controller.toggle_emotion(&emotion) {
                    self.reject(err.to_string()).await;
                }
                Vec::new()
            }
            HostCommand::SetEmotions { emotions } => {
                if let Err(err) = self.controller.set_emotions(emotions.as_slice()) {
                    self.reject(err.to_string()).await;
                }
                Vec::new()
            }
            HostCommand::Start(config) => match self.controller.start(config) {
                Ok(effects) => effects,
                Err(err) => {
                    self.reject(err.to_string()).await;
                    Vec::new()
                }
            },
            HostCommand::Stop => self.controller.stop(),
            HostCommand::Health => {
                let backend = Arc::clone(&self.ctx.backend);
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let status = backend.health().await;
                    let _ = completions.send(Completion::Health(status)).await;
                });
                Vec::new()
            }
            HostCommand::CloseApp => self.controller.close_app(),
            HostCommand::MinimizeApp => {
                let _ = self.outputs.send(HostOutput::Minimize).await;
                Vec::new()
            }
        }
    }

    async fn apply_completion(&mut self, completion: Completion) -> Vec<Effect> {
        match completion {
            Completion::Start { ticket, outcome } => self.controller.complete_start(ticket, outcome),
            Completion::Stop {
                session_id,
                outcome,
            } => self.controller.complete_stop(&session_id, outcome),
            Completion::Health(status) => {
                let _ = self.outputs.send(HostOutput::Health { status }).await;
                Vec::new()
            }
        }
    }

    /// Carries out `effects`; returns true when the engine should exit.
    fn execute(&mut self, effects: Vec<Effect>) -> bool {
        let mut exit = false;
        for effect in effects {
            match effect {
                Effect::RequestStart { ticket, request } => self.spawn_start(ticket, request),
                Effect::RequestStop { session_id } => self.spawn_stop(session_id),
                Effect::Join { session_id } => {
                    info!("stream_join: session_id={session_id}");
                    self.ctx.stream.send(ClientEvent::join(&session_id));
                }
                Effect::PersistDisplayName(user_name) => {
                    if let Err(err) = self.ctx.profile.save_user_name(&user_name) {
                        warn!("profile_save_error: {err}");
                    }
                }
                Effect::Exit => exit = true,
            }
        }
        exit
    }

    fn spawn_start(&self, ticket: u64, request: StartSessionRequest) {
        let backend = Arc::clone(&self.ctx.backend);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let outcome = match backend.start_session(&request).await {
                Ok(response) => response.into_session_id(),
                Err(err) => {
                    warn!("start_session_error: {err}");
                    Err(err.to_string())
                }
            };
            let _ = completions
                .send(Completion::Start { ticket, outcome })
                .await;
        });
    }

    fn spawn_stop(&self, session_id: String) {
        let backend = Arc::clone(&self.ctx.backend);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let request = StopSessionRequest {
                session_id: session_id.clone(),
            };
            let outcome = match backend.stop_session(&request).await {
                Ok(response) => Ok(response.message),
                Err(err) => {
                    warn!("stop_session_error: {err}");
                    Err(err.to_string())
                }
            };
            let _ = completions
                .send(Completion::Stop {
                    session_id,
                    outcome,
                })
                .await;
        });
    }

    async fn reject(&self, reason: String) {
        warn!("host_command_rejected: {reason}");
        let _ = self.outputs.send(HostOutput::Rejected { reason }).await;
    }

    async fn publish_snapshot(&self) {
        let _ = self
            .outputs
            .send(HostOutput::Snapshot(self.controller.snapshot()))
            .await;
    }
}
