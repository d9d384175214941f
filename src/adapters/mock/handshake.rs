//! Mock handshake connector for testing.
//!
//! Every `connect` call produces a [`MockConnection`] whose events are
//! injected by the test. Connections, configs and the authentication state
//! each connect received are all recorded.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::domain::{AccountInfo, AuthState, CredentialUpdate};
use crate::error::HandshakeError;
use crate::traits::{
    ConnectionPhase, ConnectionUpdate, DisconnectReason, HandshakeConfig, HandshakeConnection,
    HandshakeConnector, HandshakeEvent, OpenedConnection, ProtocolVersion, FALLBACK_VERSION,
};

/// Event buffer per connection.
const EVENT_CAPACITY: usize = 64;

/// Mock live connection.
pub struct MockConnection {
    events_tx: Mutex<Option<mpsc::Sender<HandshakeEvent>>>,
    auth: Mutex<AuthState>,
    pairing_response: Mutex<Result<String, HandshakeError>>,
    send_should_fail: Mutex<bool>,
    pairing_requests: Mutex<Vec<String>>,
    sent_texts: Mutex<Vec<(String, String)>>,
    shut_down: Mutex<bool>,
}

impl MockConnection {
    fn new(
        auth: AuthState,
        pairing_response: Result<String, HandshakeError>,
    ) -> (Arc<Self>, mpsc::Receiver<HandshakeEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let conn = Arc::new(Self {
            events_tx: Mutex::new(Some(tx)),
            auth: Mutex::new(auth),
            pairing_response: Mutex::new(pairing_response),
            send_should_fail: Mutex::new(false),
            pairing_requests: Mutex::new(Vec::new()),
            sent_texts: Mutex::new(Vec::new()),
            shut_down: Mutex::new(false),
        });
        (conn, rx)
    }

    /// Inject an event. Returns false once the connection is shut down or
    /// nobody listens any more.
    pub async fn emit(&self, event: HandshakeEvent) -> bool {
        if let HandshakeEvent::Credentials(update) = &event {
            self.auth.lock().unwrap().apply(update);
        }
        let tx = self.events_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn emit_qr(&self, payload: &str) -> bool {
        self.emit(HandshakeEvent::Connection(ConnectionUpdate::qr(payload)))
            .await
    }

    pub async fn emit_phase(&self, phase: ConnectionPhase) -> bool {
        self.emit(HandshakeEvent::Connection(ConnectionUpdate::phase(phase)))
            .await
    }

    pub async fn emit_close(&self, reason: DisconnectReason) -> bool {
        self.emit(HandshakeEvent::Connection(ConnectionUpdate::closed(reason)))
            .await
    }

    pub async fn emit_creds(&self, update: CredentialUpdate) -> bool {
        self.emit(HandshakeEvent::Credentials(update)).await
    }

    pub fn set_pairing_response(&self, response: Result<String, HandshakeError>) {
        *self.pairing_response.lock().unwrap() = response;
    }

    pub fn set_send_should_fail(&self, should_fail: bool) {
        *self.send_should_fail.lock().unwrap() = should_fail;
    }

    /// Phone numbers pairing codes were requested for.
    pub fn pairing_requests(&self) -> Vec<String> {
        self.pairing_requests.lock().unwrap().clone()
    }

    /// `(to, text)` pairs sent so far.
    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.sent_texts.lock().unwrap().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.lock().unwrap()
    }
}

#[async_trait]
impl HandshakeConnection for MockConnection {
    fn is_registered(&self) -> bool {
        self.auth.lock().unwrap().is_registered()
    }

    fn account(&self) -> Option<AccountInfo> {
        self.auth.lock().unwrap().account()
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, HandshakeError> {
        self.pairing_requests
            .lock()
            .unwrap()
            .push(phone_number.to_string());
        self.pairing_response.lock().unwrap().clone()
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), HandshakeError> {
        if *self.send_should_fail.lock().unwrap() {
            return Err(HandshakeError::Disconnected);
        }
        self.sent_texts
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        Ok(())
    }

    fn shutdown(&self) {
        *self.shut_down.lock().unwrap() = true;
        self.events_tx.lock().unwrap().take();
    }
}

/// Mock connector.
///
/// # Example
///
/// ```ignore
/// use matdev_linker::adapters::mock::MockConnector;
///
/// let connector = MockConnector::new();
/// // ... start a session that uses `connector` ...
/// let conn = connector.wait_for_connection(1, Duration::from_secs(1)).await.unwrap();
/// conn.emit_qr("2@payload").await;
/// ```
#[derive(Clone)]
pub struct MockConnector {
    connections: Arc<Mutex<Vec<Arc<MockConnection>>>>,
    connect_calls: Arc<Mutex<Vec<(HandshakeConfig, AuthState)>>>,
    count_tx: Arc<watch::Sender<usize>>,
    version: Arc<Mutex<Result<ProtocolVersion, HandshakeError>>>,
    connect_failures: Arc<Mutex<u32>>,
    pairing_response: Arc<Mutex<Result<String, HandshakeError>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            connections: Arc::new(Mutex::new(Vec::new())),
            connect_calls: Arc::new(Mutex::new(Vec::new())),
            count_tx: Arc::new(count_tx),
            version: Arc::new(Mutex::new(Ok(FALLBACK_VERSION))),
            connect_failures: Arc::new(Mutex::new(0)),
            pairing_response: Arc::new(Mutex::new(Ok("ABCD1234".to_string()))),
        }
    }

    /// Make the next `count` connects fail.
    pub fn fail_next_connects(&self, count: u32) {
        *self.connect_failures.lock().unwrap() = count;
    }

    pub fn set_version(&self, version: Result<ProtocolVersion, HandshakeError>) {
        *self.version.lock().unwrap() = version;
    }

    /// Pairing response for connections opened from now on.
    pub fn set_pairing_response(&self, response: Result<String, HandshakeError>) {
        *self.pairing_response.lock().unwrap() = response;
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Every `connect` call, including failed ones.
    pub fn connect_calls(&self) -> Vec<(HandshakeConfig, AuthState)> {
        self.connect_calls.lock().unwrap().clone()
    }

    /// Wait until at least `count` connections were opened and return the
    /// `count`-th one.
    pub async fn wait_for_connection(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Option<Arc<MockConnection>> {
        let mut rx = self.count_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|n| *n >= count))
            .await
            .ok()?
            .ok()?;
        self.connections.lock().unwrap().get(count - 1).cloned()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HandshakeConnector for MockConnector {
    async fn negotiate_version(&self) -> Result<ProtocolVersion, HandshakeError> {
        self.version.lock().unwrap().clone()
    }

    async fn connect(
        &self,
        config: HandshakeConfig,
        auth: AuthState,
    ) -> Result<OpenedConnection, HandshakeError> {
        self.connect_calls
            .lock()
            .unwrap()
            .push((config, auth.clone()));

        {
            let mut failures = self.connect_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(HandshakeError::ConnectionFailed(
                    "Mock connect failure".to_string(),
                ));
            }
        }

        let pairing_response = self.pairing_response.lock().unwrap().clone();
        let (conn, events) = MockConnection::new(auth, pairing_response);

        let count = {
            let mut connections = self.connections.lock().unwrap();
            connections.push(conn.clone());
            connections.len()
        };
        self.count_tx.send_replace(count);

        Ok(OpenedConnection {
            connection: conn,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_records_call() {
        let connector = MockConnector::new();
        let opened = connector
            .connect(HandshakeConfig::new(FALLBACK_VERSION), AuthState::fresh())
            .await
            .unwrap();
        assert!(!opened.connection.is_registered());
        assert_eq!(connector.connection_count(), 1);
        assert_eq!(connector.connect_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failures() {
        let connector = MockConnector::new();
        connector.fail_next_connects(1);
        let config = HandshakeConfig::new(FALLBACK_VERSION);

        assert!(connector
            .connect(config.clone(), AuthState::fresh())
            .await
            .is_err());
        assert!(connector.connect(config, AuthState::fresh()).await.is_ok());
        assert_eq!(connector.connect_calls().len(), 2);
        assert_eq!(connector.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_and_shutdown() {
        let connector = MockConnector::new();
        let mut opened = connector
            .connect(HandshakeConfig::new(FALLBACK_VERSION), AuthState::fresh())
            .await
            .unwrap();
        let conn = connector
            .wait_for_connection(1, Duration::from_millis(100))
            .await
            .unwrap();

        assert!(conn.emit_qr("2@abc").await);
        assert_eq!(
            opened.events.recv().await,
            Some(HandshakeEvent::Connection(ConnectionUpdate::qr("2@abc")))
        );

        conn.emit_creds(CredentialUpdate::creds(json!({ "registered": true })))
            .await;
        assert!(opened.connection.is_registered());

        opened.connection.shutdown();
        assert!(conn.is_shut_down());
        assert!(!conn.emit_phase(ConnectionPhase::Open).await);
    }

    #[tokio::test]
    async fn test_wait_for_connection_times_out() {
        let connector = MockConnector::new();
        assert!(connector
            .wait_for_connection(1, Duration::from_millis(20))
            .await
            .is_none());
    }
}
