use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AuthState, CredentialUpdate};
use crate::traits::{
    ConnectionPhase, ConnectionUpdate, DisconnectReason, HandshakeConfig, HandshakeEvent,
    ProtocolVersion,
};

/// Commands sent to the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Open the handshake with the given options and authentication state.
    /// Always the first frame on a connection.
    Start {
        config: HandshakeConfig,
        auth: AuthState,
    },
    RequestPairingCode {
        request_id: u64,
        phone_number: String,
    },
    SendText {
        request_id: u64,
        to: String,
        text: String,
    },
    /// Close the handshake. The bridge sends nothing afterwards.
    End,
}

/// Messages received from the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    ConnectionUpdate {
        #[serde(default)]
        connection: Option<ConnectionPhase>,
        #[serde(default)]
        qr: Option<String>,
        /// Disconnect status code, present on `close`
        #[serde(default)]
        status_code: Option<u16>,
    },
    CredsUpdate(CredentialUpdate),
    /// Reply to a command carrying a `request_id`
    Response {
        request_id: u64,
        ok: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        status_code: Option<u16>,
    },
}

impl BridgeMessage {
    /// Convert a pushed update into a handshake event. Responses are not
    /// events and yield `None`.
    pub fn into_event(self) -> Option<HandshakeEvent> {
        match self {
            BridgeMessage::ConnectionUpdate {
                connection,
                qr,
                status_code,
            } => {
                let disconnect = match connection {
                    Some(ConnectionPhase::Close) => {
                        Some(DisconnectReason::from_status_code(status_code))
                    }
                    _ => None,
                };
                Some(HandshakeEvent::Connection(ConnectionUpdate {
                    connection,
                    qr,
                    disconnect,
                }))
            }
            BridgeMessage::CredsUpdate(update) => Some(HandshakeEvent::Credentials(update)),
            BridgeMessage::Response { .. } => None,
        }
    }
}

/// Body of `GET /version`
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
    pub version: ProtocolVersion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FALLBACK_VERSION;
    use serde_json::json;

    #[test]
    fn test_start_command_shape() {
        let cmd = BridgeCommand::Start {
            config: HandshakeConfig::new(FALLBACK_VERSION),
            auth: AuthState::fresh(),
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "start");
        assert_eq!(value["config"]["version"], json!([2, 3000, 1015901307]));
        assert_eq!(value["config"]["browser"]["platform"], "Mac OS");
        assert_eq!(value["auth"]["creds"]["registered"], false);
    }

    #[test]
    fn test_request_command_shapes() {
        let value = serde_json::to_value(BridgeCommand::RequestPairingCode {
            request_id: 3,
            phone_number: "15551234567".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "type": "request_pairing_code", "request_id": 3, "phone_number": "15551234567" })
        );

        let value = serde_json::to_value(BridgeCommand::End).unwrap();
        assert_eq!(value, json!({ "type": "end" }));
    }

    #[test]
    fn test_parse_close_update() {
        let msg: BridgeMessage = serde_json::from_str(
            r#"{"type":"connection_update","connection":"close","status_code":401}"#,
        )
        .unwrap();
        let event = msg.into_event().unwrap();
        assert_eq!(
            event,
            HandshakeEvent::Connection(ConnectionUpdate::closed(DisconnectReason::LoggedOut))
        );
    }

    #[test]
    fn test_parse_qr_update_without_phase() {
        let msg: BridgeMessage =
            serde_json::from_str(r#"{"type":"connection_update","qr":"2@abc"}"#).unwrap();
        assert_eq!(
            msg.into_event(),
            Some(HandshakeEvent::Connection(ConnectionUpdate::qr("2@abc")))
        );
    }

    #[test]
    fn test_parse_creds_update() {
        let msg: BridgeMessage = serde_json::from_str(
            r#"{"type":"creds_update","creds":{"registered":true},"keys":{"pre-key-1":null}}"#,
        )
        .unwrap();
        let Some(HandshakeEvent::Credentials(update)) = msg.into_event() else {
            panic!("expected credentials event");
        };
        assert_eq!(update.creds, Some(json!({ "registered": true })));
        assert_eq!(update.keys.get("pre-key-1"), Some(&None));
    }

    #[test]
    fn test_parse_response() {
        let msg: BridgeMessage = serde_json::from_str(
            r#"{"type":"response","request_id":7,"ok":false,"error":"rate-overlimit","status_code":429}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            BridgeMessage::Response {
                request_id: 7,
                ok: false,
                result: None,
                error: Some("rate-overlimit".to_string()),
                status_code: Some(429),
            }
        );
        assert!(msg.into_event().is_none());
    }
}
