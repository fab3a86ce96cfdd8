//! Websocket transport to the backend's real-time endpoint.
//!
//! One task owns the socket for the lifetime of the process. It performs the
//! Engine.IO/Socket.IO handshake, answers pings, decodes inbound events and
//! reconnects with a bounded number of attempts. Everything it observes is
//! reported on a single update channel.

use crate::config::ReconnectPolicy;
use affina_core::stream::{decode_frame, encode_connect, encode_pong, ClientEvent, Frame, ServerEvent, StreamError};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const UPDATE_CHANNEL: usize = 256;
const OUTBOUND_CHANNEL: usize = 32;
/// Used when the open packet advertises no ping timing.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(25_000 + 20_000);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Rejected(String),
    #[error("stream closed during handshake")]
    Closed,
    #[error(transparent)]
    Codec(#[from] StreamError),
}

/// Transitions and events observed by the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    Connecting { attempt: u32 },
    Connected,
    Disconnected,
    Error(String),
    Event(ServerEvent),
}

pub struct ConnectionHandle {
    outbound: mpsc::Sender<ClientEvent>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Handle without a transport. Outbound events land on the returned receiver.
    pub fn loopback() -> (Self, mpsc::Receiver<ClientEvent>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL);
        let (shutdown, _) = watch::channel(false);
        (
            Self {
                outbound,
                shutdown,
                task: None,
            },
            outbound_rx,
        )
    }

    /// Queues an event for the socket. Dropped when the channel is full or closed.
    pub fn send(&self, event: ClientEvent) {
        if let Err(err) = self.outbound.try_send(event) {
            debug!("stream_outbound_dropped: {err}");
        }
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub fn spawn_connection(
    stream_url: Url,
    policy: ReconnectPolicy,
) -> (ConnectionHandle, mpsc::Receiver<ConnectionUpdate>) {
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL);
    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(connection_loop(
        stream_url,
        policy,
        outbound_rx,
        shutdown_rx,
        updates_tx,
    ));
    (
        ConnectionHandle {
            outbound,
            shutdown,
            task: Some(task),
        },
        updates_rx,
    )
}

enum PumpExit {
    Shutdown,
    Dropped(String),
}

async fn connection_loop(
    stream_url: Url,
    policy: ReconnectPolicy,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    updates: mpsc::Sender<ConnectionUpdate>,
) {
    let mut failures: u32 = 0;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let attempt = failures + 1;
        if updates
            .send(ConnectionUpdate::Connecting { attempt })
            .await
            .is_err()
        {
            break;
        }

        let connect = tokio::select! {
            result = tokio::time::timeout(policy.connect_timeout, open_stream(&stream_url)) => {
                result.unwrap_or(Err(ConnectionError::Timeout(policy.connect_timeout)))
            }
            _ = shutdown_rx.changed() => break,
        };

        match connect {
            Ok((mut ws, idle_timeout)) => {
                failures = 0;
                // Joins queued while offline are stale; rejoin-on-connect replaces them.
                while outbound_rx.try_recv().is_ok() {}
                info!("stream_connected: url={stream_url}");
                if updates.send(ConnectionUpdate::Connected).await.is_err() {
                    let _ = ws.close(None).await;
                    break;
                }
                match pump(
                    &mut ws,
                    idle_timeout,
                    &mut outbound_rx,
                    &mut shutdown_rx,
                    &updates,
                )
                .await
                {
                    PumpExit::Shutdown => {
                        let _ = ws.close(None).await;
                        break;
                    }
                    PumpExit::Dropped(reason) => {
                        warn!("stream_disconnected: {reason}");
                        let _ = ws.close(None).await;
                        if updates.send(ConnectionUpdate::Disconnected).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                failures += 1;
                warn!(
                    "stream_connect_error: attempt={attempt} max={} err={err}",
                    policy.max_attempts
                );
                if updates
                    .send(ConnectionUpdate::Error(err.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
                if failures >= policy.max_attempts {
                    warn!("stream_gave_up: attempts={failures}");
                    let _ = updates
                        .send(ConnectionUpdate::Error(format!(
                            "gave up after {failures} attempts"
                        )))
                        .await;
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
    debug!("stream_task_exit");
}

/// Connects and completes the Socket.IO namespace handshake.
///
/// Also returns how long the connected socket may stay silent: the server's
/// ping interval plus its ping timeout.
async fn open_stream(stream_url: &Url) -> Result<(Socket, Duration), ConnectionError> {
    let (mut ws, _) = connect_async(stream_url.clone()).await?;
    let mut idle_timeout = DEFAULT_IDLE_TIMEOUT;
    while let Some(message) = ws.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(ConnectionError::Closed),
            _ => continue,
        };
        match decode_frame(&text)? {
            Frame::Open(open) => {
                debug!(
                    "stream_open: sid={} ping_interval={} ping_timeout={}",
                    open.sid, open.ping_interval, open.ping_timeout
                );
                let advertised = open.ping_interval.saturating_add(open.ping_timeout);
                if advertised > 0 {
                    idle_timeout = Duration::from_millis(advertised);
                }
                ws.send(Message::Text(encode_connect())).await?;
            }
            Frame::Ping(data) => ws.send(Message::Text(encode_pong(&data))).await?,
            Frame::Connected { .. } => return Ok((ws, idle_timeout)),
            Frame::ConnectError { message } => return Err(ConnectionError::Rejected(message)),
            Frame::Close | Frame::Disconnected => return Err(ConnectionError::Closed),
            _ => {}
        }
    }
    Err(ConnectionError::Closed)
}

async fn pump(
    ws: &mut Socket,
    idle_timeout: Duration,
    outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
    updates: &mpsc::Sender<ConnectionUpdate>,
) -> PumpExit {
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);
    loop {
        tokio::select! {
            message = ws.next() => {
                idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        return PumpExit::Dropped("socket closed".to_string())
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return PumpExit::Dropped(err.to_string()),
                };
                match decode_frame(&text) {
                    Ok(Frame::Ping(data)) => {
                        if let Err(err) = ws.send(Message::Text(encode_pong(&data))).await {
                            return PumpExit::Dropped(err.to_string());
                        }
                    }
                    Ok(Frame::Event { name, args }) => match ServerEvent::from_event(&name, args) {
                        Ok(event) => {
                            if updates.send(ConnectionUpdate::Event(event)).await.is_err() {
                                return PumpExit::Shutdown;
                            }
                        }
                        Err(err) => warn!("stream_event_decode_error: {err}"),
                    },
                    Ok(Frame::Close) | Ok(Frame::Disconnected) => {
                        return PumpExit::Dropped("server closed the session".to_string())
                    }
                    Ok(Frame::ConnectError { message }) => return PumpExit::Dropped(message),
                    Ok(_) => {}
                    Err(err) => warn!("stream_frame_error: {err}"),
                }
            }
            outbound = outbound_rx.recv() => {
                let Some(event) = outbound else {
                    return PumpExit::Shutdown;
                };
                match event.encode() {
                    Ok(frame) => {
                        if let Err(err) = ws.send(Message::Text(frame)).await {
                            return PumpExit::Dropped(err.to_string());
                        }
                    }
                    Err(err) => warn!("stream_encode_error: {err}"),
                }
            }
            _ = &mut idle => {
                return PumpExit::Dropped(format!("ping timeout after {idle_timeout:?}"))
            }
            _ = shutdown_rx.changed() => return PumpExit::Shutdown,
        }
    }
}
