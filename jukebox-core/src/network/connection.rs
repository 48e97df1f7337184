//! Coordinator connection
//!
//! One logical WebSocket connection to the coordinator, run in a background
//! task. The task reconnects with bounded, backed-off attempts. Intents are
//! never buffered across a disconnect: while disconnected, `emit` fails
//! immediately.

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::subscriptions::{Handler, Subscriptions};
use crate::sync::Intent;

/// Default coordinator endpoint
const DEFAULT_COORDINATOR_URL: &str = "ws://127.0.0.1:3001/ws";

/// Reconnect attempts before giving up
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the first reconnect attempt
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for the backed-off delay
const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Relative jitter applied to every reconnect delay
const JITTER: f64 = 0.1;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Coordinator WebSocket URL
    pub url: String,
    /// Failed attempts tolerated before giving up
    pub reconnect_attempts: u32,
    /// Base reconnect delay, doubled per attempt
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_COORDINATOR_URL.to_string(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Not connected to the coordinator")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Connection task closed")]
    Closed,

    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Connectivity as seen by the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Lost or failed; retrying after `delay`
    Reconnecting {
        attempt: u32,
        delay: Duration,
        message: String,
    },
    /// Out of attempts
    Failed { message: String },
    /// Closed on request
    Closed,
}

/// One message on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug)]
enum ConnectionCommand {
    Emit(String),
    Close,
}

enum PumpExit {
    Closed,
    Lost(String),
}

/// Handle to communicate with the running connection
#[derive(Clone)]
pub struct ConnectionHandle {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    connected: Arc<AtomicBool>,
    status_rx: watch::Receiver<ConnectionStatus>,
    subscriptions: Arc<RwLock<Subscriptions>>,
}

impl ConnectionHandle {
    /// Send an event. Fails synchronously while disconnected.
    pub fn emit(&self, event: &str, data: Value) -> Result<(), NetworkError> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }

        let text = serde_json::to_string(&Frame {
            event: event.to_string(),
            data,
        })?;
        debug!("Emitting {}", event);
        self.command_tx
            .send(ConnectionCommand::Emit(text))
            .map_err(|_| NetworkError::Closed)
    }

    pub fn send_intent(&self, intent: &Intent) -> Result<(), NetworkError> {
        self.emit(intent.name(), intent.payload()?)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Subscribers are dropped first: frames still buffered in the socket are
    /// never dispatched.
    pub fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.subscriptions.write().clear();
        let _ = self.command_tx.send(ConnectionCommand::Close);
    }
}

/// Owns the connection; consumed by [`start`](Self::start)
pub struct ConnectionManager {
    config: ConnectionConfig,
    subscriptions: Subscriptions,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            subscriptions: Subscriptions::new(),
        }
    }

    /// Subscribe before connecting so no early event is missed
    pub fn on(&mut self, event: impl Into<String>, handler: Handler) -> &mut Self {
        self.subscriptions.on(event, handler);
        self
    }

    /// Spawn the connection task. Must be called within a tokio runtime.
    pub fn start(self) -> ConnectionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let connected = Arc::new(AtomicBool::new(false));
        let subscriptions = Arc::new(RwLock::new(self.subscriptions));

        let handle = ConnectionHandle {
            command_tx,
            connected: Arc::clone(&connected),
            status_rx,
            subscriptions: Arc::clone(&subscriptions),
        };

        let task = ConnectionTask {
            config: self.config,
            connected,
            status_tx,
            subscriptions,
        };
        tokio::spawn(task.run(command_rx));

        handle
    }
}

struct ConnectionTask {
    config: ConnectionConfig,
    connected: Arc<AtomicBool>,
    status_tx: watch::Sender<ConnectionStatus>,
    subscriptions: Arc<RwLock<Subscriptions>>,
}

impl ConnectionTask {
    async fn run(self, mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>) {
        let mut failures: u32 = 0;

        loop {
            self.status_tx.send_replace(ConnectionStatus::Connecting);

            let reason = match self.connect().await {
                Ok(ws) => {
                    failures = 0;
                    info!("Connected to coordinator at {}", self.config.url);
                    self.connected.store(true, Ordering::Release);
                    self.status_tx.send_replace(ConnectionStatus::Connected);

                    let exit = self.pump(ws, &mut command_rx).await;
                    self.connected.store(false, Ordering::Release);

                    match exit {
                        PumpExit::Closed => break,
                        PumpExit::Lost(reason) => {
                            warn!("Disconnected from coordinator: {}", reason);
                            reason
                        }
                    }
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.config.url, e);
                    e.to_string()
                }
            };

            failures += 1;
            if failures > self.config.reconnect_attempts {
                let error = NetworkError::ReconnectExhausted {
                    attempts: self.config.reconnect_attempts,
                };
                warn!("{}", error);
                self.status_tx.send_replace(ConnectionStatus::Failed {
                    message: describe_connect_error(&reason),
                });
                return;
            }

            let delay = with_jitter(backoff_delay(
                self.config.reconnect_delay,
                self.config.max_reconnect_delay,
                failures,
            ));
            info!(
                "Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                failures,
                self.config.reconnect_attempts
            );
            self.status_tx.send_replace(ConnectionStatus::Reconnecting {
                attempt: failures,
                delay,
                message: describe_connect_error(&reason),
            });

            if !wait_before_retry(delay, &mut command_rx).await {
                break;
            }
        }

        info!("Coordinator connection closed");
        self.status_tx.send_replace(ConnectionStatus::Closed);
    }

    async fn connect(&self) -> Result<WsStream, NetworkError> {
        debug!("Connecting to {}", self.config.url);
        let connecting = tokio_tungstenite::connect_async(self.config.url.as_str());
        match tokio::time::timeout(self.config.connect_timeout, connecting).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(NetworkError::Transport(e.to_string())),
            Err(_) => Err(NetworkError::Transport("connection timed out".to_string())),
        }
    }

    /// Shuttle frames until the connection drops or a close is requested
    async fn pump(
        &self,
        ws: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> PumpExit {
        let (mut ws_tx, mut ws_rx) = ws.split();

        loop {
            tokio::select! {
                message = ws_rx.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => self.dispatch(&text),
                    Some(Ok(WsMessage::Close(frame))) => {
                        return PumpExit::Lost(format!("closed by coordinator ({frame:?})"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                    None => return PumpExit::Lost("connection ended".to_string()),
                },
                command = command_rx.recv() => match command {
                    Some(ConnectionCommand::Emit(text)) => {
                        if let Err(e) = ws_tx.send(WsMessage::text(text)).await {
                            return PumpExit::Lost(e.to_string());
                        }
                    }
                    Some(ConnectionCommand::Close) | None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        return PumpExit::Closed;
                    }
                },
            }
        }
    }

    /// Route an incoming frame to its subscriber
    fn dispatch(&self, text: &str) {
        let frame = match serde_json::from_str::<Frame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed frame: {}", e);
                return;
            }
        };

        let handler = self.subscriptions.read().handler(&frame.event);
        match handler {
            Some(handler) => handler(frame.data),
            None => debug!("No subscriber for {}", frame.event),
        }
    }
}

/// Sleep before the next attempt. Returns false if a close was requested.
async fn wait_before_retry(
    delay: Duration,
    command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return true,
            command = command_rx.recv() => match command {
                Some(ConnectionCommand::Emit(_)) => {
                    warn!("Dropping intent sent while disconnected");
                }
                Some(ConnectionCommand::Close) | None => return false,
            },
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

fn with_jitter(delay: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-JITTER..=JITTER);
    delay.mul_f64(factor)
}

/// User-facing text for a connection failure
pub fn describe_connect_error(reason: &str) -> String {
    let lower = reason.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "Timed out connecting to the coordinator".to_string()
    } else if lower.contains("refused") {
        "Coordinator refused the connection".to_string()
    } else {
        format!("Failed to connect: {reason}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn manager(url: String, attempts: u32, delay_ms: u64) -> ConnectionManager {
        ConnectionManager::new(ConnectionConfig {
            url,
            reconnect_attempts: attempts,
            reconnect_delay: Duration::from_millis(delay_ms),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, max, 4), Duration::from_millis(8000));
        assert_eq!(backoff_delay(base, max, 6), max);
        assert_eq!(backoff_delay(base, max, 40), max);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..50 {
            let delay = with_jitter(Duration::from_millis(1000));
            assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_describe_connect_error() {
        assert_eq!(
            describe_connect_error("connection timed out"),
            "Timed out connecting to the coordinator"
        );
        assert_eq!(
            describe_connect_error("IO error: Connection refused (os error 111)"),
            "Coordinator refused the connection"
        );
        assert_eq!(describe_connect_error("bad handshake"), "Failed to connect: bad handshake");
    }

    #[tokio::test]
    async fn test_emit_rejected_while_disconnected() {
        let config = ConnectionConfig {
            url: "ws://127.0.0.1:1/ws".to_string(),
            reconnect_attempts: 0,
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let handle = ConnectionManager::new(config).start();

        let result = handle.emit("create_lobby", json!("Ana"));
        assert!(matches!(result, Err(NetworkError::NotConnected)));

        let mut status = handle.watch_status();
        let failed = status
            .wait_for(|s| matches!(s, ConnectionStatus::Failed { .. }))
            .await
            .map(|s| s.clone())
            .unwrap();
        assert!(matches!(failed, ConnectionStatus::Failed { .. }));
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_round_trip_with_coordinator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            // Echo the first frame back under a different event name
            let message = ws.next().await.unwrap().unwrap();
            let frame: Frame = serde_json::from_str(message.to_text().unwrap()).unwrap();
            let reply = Frame {
                event: "lobby_error".to_string(),
                data: json!(format!("got {}", frame.event)),
            };
            ws.send(WsMessage::text(serde_json::to_string(&reply).unwrap()))
                .await
                .unwrap();
            frame
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = ConnectionManager::new(ConnectionConfig {
            url: format!("ws://{addr}/ws"),
            ..Default::default()
        });
        manager.on(
            "lobby_error",
            Arc::new(move |data| {
                let _ = tx.send(data);
            }),
        );
        let handle = manager.start();

        let mut status = handle.watch_status();
        status
            .wait_for(|s| *s == ConnectionStatus::Connected)
            .await
            .unwrap();

        handle
            .send_intent(&Intent::CreateLobby {
                name: "Ana".to_string(),
            })
            .unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.event, "create_lobby");
        assert_eq!(received.data, json!("Ana"));
        assert_eq!(rx.recv().await.unwrap(), json!("got create_lobby"));

        handle.close();
        status
            .wait_for(|s| *s == ConnectionStatus::Closed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_drop_and_resets_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();

        // Drop the first two connections right away, keep the third
        let server = tokio::spawn(async move {
            for attempt in 1..=3 {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                accepted_tx.send(attempt).unwrap();
                if attempt < 3 {
                    ws.close(None).await.unwrap();
                    continue;
                }
                let message = ws.next().await.unwrap().unwrap();
                return serde_json::from_str::<Frame>(message.to_text().unwrap()).unwrap();
            }
            unreachable!()
        });

        // One tolerated failure: surviving two drops needs the counter to reset
        let handle = manager(format!("ws://{addr}/ws"), 1, 20).start();
        let mut status = handle.watch_status();

        for expected in 1..=3 {
            assert_eq!(accepted_rx.recv().await, Some(expected));
        }
        status
            .wait_for(|s| *s == ConnectionStatus::Connected)
            .await
            .unwrap();
        assert!(handle.is_connected());

        handle
            .send_intent(&Intent::JoinLobby {
                lobby_id: "ABC123".to_string(),
                name: "Ana".to_string(),
            })
            .unwrap();
        let frame = server.await.unwrap();
        assert_eq!(frame.event, "join_lobby");

        handle.close();
    }

    #[tokio::test]
    async fn test_reports_reconnecting_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
            // Keep the listener alive but never accept again
            listener
        });

        let handle = manager(format!("ws://{addr}/ws"), 3, 500).start();
        let mut status = handle.watch_status();
        let reconnecting = status
            .wait_for(|s| matches!(s, ConnectionStatus::Reconnecting { .. }))
            .await
            .map(|s| s.clone())
            .unwrap();

        match reconnecting {
            ConnectionStatus::Reconnecting { attempt, message, .. } => {
                assert_eq!(attempt, 1);
                assert!(message.starts_with("Failed to connect"));
            }
            other => panic!("expected Reconnecting, got {other:?}"),
        }
        assert!(matches!(
            handle.emit("create_lobby", json!("Ana")),
            Err(NetworkError::NotConnected)
        ));

        handle.close();
        let _listener = server.await.unwrap();
    }
}
