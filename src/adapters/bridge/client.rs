use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::messages::{BridgeCommand, BridgeMessage, VersionResponse};
use crate::domain::{AccountInfo, AuthState};
use crate::error::HandshakeError;
use crate::traits::{
    ConnectionUpdate, DisconnectReason, HandshakeConfig, HandshakeConnection, HandshakeConnector,
    HandshakeEvent, OpenedConnection, ProtocolVersion,
};

/// Buffer for events and outgoing commands.
const CHANNEL_CAPACITY: usize = 100;

/// Timeout for the version lookup.
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;
type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, HandshakeError>>>>>;

/// Opens handshake connections through an external bridge process.
///
/// Each connection is its own WebSocket. The first frame is a `start`
/// command carrying the handshake options and the stored authentication
/// state; afterwards the bridge pushes connection and credential updates
/// and answers requests by id.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    url: String,
    http: reqwest::Client,
}

impl BridgeConnector {
    /// Create a connector for a bridge WebSocket URL such as
    /// `ws://127.0.0.1:8787/link`.
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(VERSION_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            http,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// HTTP location of the version endpoint on the same host.
    fn version_url(&self) -> Result<Url, HandshakeError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| HandshakeError::ConnectionFailed(format!("invalid bridge URL: {}", e)))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "http",
            "wss" | "https" => "https",
            other => {
                return Err(HandshakeError::ConnectionFailed(format!(
                    "unsupported bridge scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            HandshakeError::ConnectionFailed(format!("cannot derive HTTP URL from {}", self.url))
        })?;
        url.set_path("/version");
        url.set_query(None);
        Ok(url)
    }
}

#[async_trait]
impl HandshakeConnector for BridgeConnector {
    async fn negotiate_version(&self) -> Result<ProtocolVersion, HandshakeError> {
        let url = self.version_url()?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HandshakeError::Timeout(format!("version lookup at {}", url))
                } else {
                    HandshakeError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandshakeError::RequestFailed {
                status: Some(status.as_u16()),
                message: format!("version lookup returned {}", status),
            });
        }

        let body: VersionResponse = response
            .json()
            .await
            .map_err(|e| HandshakeError::Protocol(e.to_string()))?;
        debug!("Bridge reports protocol version {:?}", body.version);
        Ok(body.version)
    }

    async fn connect(
        &self,
        config: HandshakeConfig,
        auth: AuthState,
    ) -> Result<OpenedConnection, HandshakeError> {
        let (ws, _) = tokio::time::timeout(config.connect_timeout(), connect_async(&self.url))
            .await
            .map_err(|_| HandshakeError::Timeout(format!("connecting to {}", self.url)))?
            .map_err(|e| HandshakeError::ConnectionFailed(e.to_string()))?;

        info!("Connected to handshake bridge at {}", self.url);

        let (mut ws_sink, ws_stream) = ws.split();

        let query_timeout = config.default_query_timeout_ms.map(Duration::from_millis);
        let start = BridgeCommand::Start {
            config,
            auth: auth.clone(),
        };
        send_command(&mut ws_sink, &start)
            .await
            .map_err(|e| HandshakeError::ConnectionFailed(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::channel::<HandshakeEvent>(CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel::<BridgeCommand>(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let auth = Arc::new(RwLock::new(auth));

        tokio::spawn(run_bridge_loop(
            ws_sink,
            ws_stream,
            events_tx,
            command_rx,
            pending.clone(),
            auth.clone(),
            shutdown_rx,
        ));

        let connection = BridgeConnection {
            command_tx,
            pending,
            next_request_id: AtomicU64::new(1),
            auth,
            shutdown_tx,
            query_timeout,
        };

        Ok(OpenedConnection {
            connection: Arc::new(connection),
            events: events_rx,
        })
    }
}

/// A live bridge connection.
pub struct BridgeConnection {
    command_tx: mpsc::Sender<BridgeCommand>,
    pending: PendingRequests,
    next_request_id: AtomicU64,
    /// Local copy of the authentication state, kept current from
    /// `creds_update` frames.
    auth: Arc<RwLock<AuthState>>,
    shutdown_tx: watch::Sender<bool>,
    query_timeout: Option<Duration>,
}

impl BridgeConnection {
    async fn request(
        &self,
        build: impl FnOnce(u64) -> BridgeCommand,
    ) -> Result<Value, HandshakeError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        register_pending(&self.pending, request_id, tx)?;

        if self.command_tx.send(build(request_id)).await.is_err() {
            self.forget(request_id);
            return Err(HandshakeError::Disconnected);
        }

        let reply = match self.query_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.forget(request_id);
                    return Err(HandshakeError::Timeout(format!("request {}", request_id)));
                }
            },
            None => rx.await,
        };

        reply.map_err(|_| HandshakeError::Disconnected)?
    }

    fn forget(&self, request_id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&request_id);
        }
    }
}

/// Track a request awaiting its reply. A poisoned map can never deliver
/// the reply, so the request fails up front.
fn register_pending(
    pending: &PendingRequests,
    request_id: u64,
    reply: oneshot::Sender<Result<Value, HandshakeError>>,
) -> Result<(), HandshakeError> {
    let mut pending = pending.lock().map_err(|_| HandshakeError::Disconnected)?;
    pending.insert(request_id, reply);
    Ok(())
}

#[async_trait]
impl HandshakeConnection for BridgeConnection {
    fn is_registered(&self) -> bool {
        self.auth
            .read()
            .map(|auth| auth.is_registered())
            .unwrap_or(false)
    }

    fn account(&self) -> Option<AccountInfo> {
        self.auth.read().ok().and_then(|auth| auth.account())
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, HandshakeError> {
        let phone_number = phone_number.to_string();
        let result = self
            .request(|request_id| BridgeCommand::RequestPairingCode {
                request_id,
                phone_number,
            })
            .await?;

        Ok(match result {
            Value::String(code) => code,
            other => other.to_string(),
        })
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), HandshakeError> {
        let (to, text) = (to.to_string(), text.to_string());
        self.request(|request_id| BridgeCommand::SendText {
            request_id,
            to,
            text,
        })
        .await?;
        Ok(())
    }

    fn shutdown(&self) {
        debug!("Shutting down bridge connection");
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for BridgeConnection {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn send_command(sink: &mut WsSink, command: &BridgeCommand) -> Result<(), String> {
    let json = serde_json::to_string(command).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

/// Pump frames between the socket and the connection handle until either
/// side goes away.
async fn run_bridge_loop(
    mut ws_sink: WsSink,
    mut ws_stream: WsStream,
    events_tx: mpsc::Sender<HandshakeEvent>,
    mut command_rx: mpsc::Receiver<BridgeCommand>,
    pending: PendingRequests,
    auth: Arc<RwLock<AuthState>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            let _ = send_command(&mut ws_sink, &BridgeCommand::End).await;
            let _ = ws_sink.close().await;
            break;
        }

        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                // Loop around to the shutdown check; a dropped handle also
                // counts as shutdown.
                if shutdown_rx.has_changed().is_err() {
                    let _ = ws_sink.close().await;
                    break;
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let parsed = match serde_json::from_str::<BridgeMessage>(&text) {
                            Ok(parsed) => parsed,
                            Err(e) => {
                                warn!("Failed to parse bridge message: {} - {}", e, text);
                                continue;
                            }
                        };

                        match parsed {
                            BridgeMessage::Response { request_id, ok, result, error, status_code } => {
                                let waiter = pending.lock().ok().and_then(|mut p| p.remove(&request_id));
                                let Some(waiter) = waiter else {
                                    debug!("Response for unknown request {}", request_id);
                                    continue;
                                };
                                let reply = if ok {
                                    Ok(result.unwrap_or(Value::Null))
                                } else {
                                    Err(HandshakeError::from_rejection(
                                        status_code,
                                        error.unwrap_or_else(|| "request rejected".to_string()),
                                    ))
                                };
                                let _ = waiter.send(reply);
                            }
                            other => {
                                let Some(event) = other.into_event() else { continue };
                                if let HandshakeEvent::Credentials(update) = &event {
                                    if let Ok(mut auth) = auth.write() {
                                        auth.apply(update);
                                    }
                                }
                                let closing = matches!(
                                    &event,
                                    HandshakeEvent::Connection(update) if update.disconnect.is_some()
                                );
                                if *shutdown_rx.borrow() {
                                    continue;
                                }
                                if events_tx.send(event).await.is_err() {
                                    debug!("Event receiver dropped, closing bridge connection");
                                    let _ = ws_sink.close().await;
                                    break;
                                }
                                if closing {
                                    let _ = ws_sink.close().await;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Bridge closed the connection");
                        report_lost(&events_tx, &shutdown_rx).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Bridge WebSocket error: {}", e);
                        report_lost(&events_tx, &shutdown_rx).await;
                        break;
                    }
                }
            }
            command = command_rx.recv() => {
                match command {
                    Some(command) => {
                        if let Err(e) = send_command(&mut ws_sink, &command).await {
                            error!("Failed to send bridge command: {}", e);
                        }
                    }
                    None => {
                        let _ = ws_sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    // Waiters see a closed channel and report `Disconnected`.
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    debug!("Bridge connection loop ended");
}

/// Surface an unexpected socket drop as a close event.
async fn report_lost(events_tx: &mpsc::Sender<HandshakeEvent>, shutdown_rx: &watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    let _ = events_tx
        .send(HandshakeEvent::Connection(ConnectionUpdate::closed(
            DisconnectReason::ConnectionLost,
        )))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_url_from_ws() {
        let connector = BridgeConnector::new("ws://127.0.0.1:8787/link?x=1");
        assert_eq!(
            connector.version_url().unwrap().as_str(),
            "http://127.0.0.1:8787/version"
        );
    }

    #[test]
    fn test_version_url_from_wss() {
        let connector = BridgeConnector::new("wss://bridge.example.com/link");
        assert_eq!(
            connector.version_url().unwrap().as_str(),
            "https://bridge.example.com/version"
        );
    }

    #[test]
    fn test_register_pending_tracks_reply() {
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (tx, _rx) = oneshot::channel();
        register_pending(&pending, 7, tx).unwrap();
        assert!(pending.lock().unwrap().contains_key(&7));
    }

    #[test]
    fn test_register_pending_on_poisoned_map_disconnects() {
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let poisoner = pending.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the pending map");
        })
        .join();
        assert!(pending.is_poisoned());

        let (tx, _rx) = oneshot::channel();
        assert!(matches!(
            register_pending(&pending, 1, tx),
            Err(HandshakeError::Disconnected)
        ));
    }

    #[test]
    fn test_version_url_rejects_other_schemes() {
        assert!(BridgeConnector::new("ftp://example.com").version_url().is_err());
        assert!(BridgeConnector::new("not a url").version_url().is_err());
    }
}
