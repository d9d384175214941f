//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::LinkMethod;

/// Body of `POST /api/session`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    /// Accepted as a string or a bare number.
    #[serde(default)]
    pub phone_number: Option<Value>,
}

impl CreateSessionBody {
    /// Missing or empty method means QR.
    pub fn link_method(&self) -> Result<LinkMethod, String> {
        match self.method.as_deref().map(str::trim) {
            None | Some("") => Ok(LinkMethod::Qr),
            Some(method) => method.parse(),
        }
    }

    pub fn phone_number(&self) -> Option<String> {
        match self.phone_number.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSessionBody {
    pub session_id: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrBody {
    pub qr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueIdBody {
    pub unique_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistsBody {
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCodeBody {
    pub pairing_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSessionBody {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub linked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_body_defaults() {
        let body: CreateSessionBody = serde_json::from_value(json!({})).unwrap();
        assert_eq!(body.link_method(), Ok(LinkMethod::Qr));
        assert_eq!(body.phone_number(), None);
        assert_eq!(body.unique_id, None);
    }

    #[test]
    fn test_create_body_pairing() {
        let body: CreateSessionBody = serde_json::from_value(json!({
            "uniqueId": "matdev-abc12345",
            "method": "pairing",
            "phoneNumber": 15551234567u64
        }))
        .unwrap();
        assert_eq!(body.link_method(), Ok(LinkMethod::Pairing));
        assert_eq!(body.phone_number().as_deref(), Some("15551234567"));
        assert_eq!(body.unique_id.as_deref(), Some("matdev-abc12345"));
    }

    #[test]
    fn test_unknown_method() {
        let body = CreateSessionBody {
            method: Some("sms".to_string()),
            ..Default::default()
        };
        assert!(body.link_method().is_err());
    }

    #[test]
    fn test_response_field_names() {
        let json = serde_json::to_value(CreatedSessionBody {
            session_id: "s".to_string(),
            unique_id: "u".to_string(),
        })
        .unwrap();
        assert_eq!(json, json!({ "sessionId": "s", "uniqueId": "u" }));

        let json = serde_json::to_value(UniqueIdBody { unique_id: None }).unwrap();
        assert_eq!(json, json!({ "uniqueId": null }));

        let json = serde_json::to_value(BotSessionBody {
            exists: false,
            path: None,
            linked: false,
        })
        .unwrap();
        assert_eq!(json, json!({ "exists": false, "linked": false }));
    }
}
