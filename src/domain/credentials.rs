//! Authentication material and the linked marker.
//!
//! The handshake capability owns the meaning of the authentication material;
//! this crate only needs to keep it durable and to read two facts out of it:
//! whether the device is registered, and which account it belongs to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Server suffix for personal chat addresses.
const USER_SERVER: &str = "s.whatsapp.net";

/// The account a credential slot is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Full account id, e.g. `15551234567:12@s.whatsapp.net`.
    pub id: String,
    /// Display name, when the account has one.
    pub name: Option<String>,
}

impl AccountInfo {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// The bare account number, without device or server suffix.
    pub fn number(&self) -> &str {
        let end = self
            .id
            .find(|c| c == ':' || c == '@')
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Address used to message the account itself.
    pub fn chat_address(&self) -> String {
        format!("{}@{}", self.number(), USER_SERVER)
    }
}

/// Authentication state for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    /// Credential document (`registered`, `me`, key material, ...).
    pub creds: Value,
    /// Signal keys by name.
    #[serde(default)]
    pub keys: BTreeMap<String, Value>,
}

impl AuthState {
    /// State for a slot that has never been used.
    pub fn fresh() -> Self {
        Self {
            creds: json!({ "registered": false }),
            keys: BTreeMap::new(),
        }
    }

    /// Whether the device has completed registration.
    pub fn is_registered(&self) -> bool {
        self.creds
            .get("registered")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The account recorded in the credentials, if any.
    pub fn account(&self) -> Option<AccountInfo> {
        let me = self.creds.get("me")?;
        let id = me.get("id")?.as_str()?;
        let name = me.get("name").and_then(Value::as_str).map(str::to_string);
        Some(AccountInfo::new(id, name))
    }

    /// Merge an update into this state.
    ///
    /// Credential fields are merged shallowly; a key set to `None` is removed.
    pub fn apply(&mut self, update: &CredentialUpdate) {
        if let Some(Value::Object(patch)) = &update.creds {
            match &mut self.creds {
                Value::Object(existing) => {
                    for (field, value) in patch {
                        existing.insert(field.clone(), value.clone());
                    }
                }
                other => *other = Value::Object(patch.clone()),
            }
        }

        for (name, value) in &update.keys {
            match value {
                Some(value) => {
                    self.keys.insert(name.clone(), value.clone());
                }
                None => {
                    self.keys.remove(name);
                }
            }
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::fresh()
    }
}

/// An incremental credential change emitted by the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    /// Credential fields to merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds: Option<Value>,
    /// Keys to write (`Some`) or delete (`None`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Option<Value>>,
}

impl CredentialUpdate {
    /// Update that only touches credential fields.
    pub fn creds(patch: Value) -> Self {
        Self {
            creds: Some(patch),
            keys: BTreeMap::new(),
        }
    }

    /// Add a key write or deletion to this update.
    pub fn with_key(mut self, name: impl Into<String>, value: Option<Value>) -> Self {
        self.keys.insert(name.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.creds.is_none() && self.keys.is_empty()
    }
}

/// Contents of `linked.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedMarker {
    pub linked: bool,
    /// Link time in epoch milliseconds.
    pub at: i64,
    #[serde(rename = "waNumber")]
    pub wa_number: Option<String>,
    #[serde(rename = "waName")]
    pub wa_name: Option<String>,
}

impl LinkedMarker {
    pub fn new(account: Option<&AccountInfo>, at_millis: i64) -> Self {
        Self {
            linked: true,
            at: at_millis,
            wa_number: account.map(|a| a.number().to_string()),
            wa_name: account.and_then(|a| a.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_number_strips_device_and_server() {
        let account = AccountInfo::new("15551234567:12@s.whatsapp.net", None);
        assert_eq!(account.number(), "15551234567");
        assert_eq!(account.chat_address(), "15551234567@s.whatsapp.net");

        let bare = AccountInfo::new("447123456789@s.whatsapp.net", None);
        assert_eq!(bare.number(), "447123456789");

        let plain = AccountInfo::new("15550000000", None);
        assert_eq!(plain.chat_address(), "15550000000@s.whatsapp.net");
    }

    #[test]
    fn test_fresh_state_is_unregistered() {
        let state = AuthState::fresh();
        assert!(!state.is_registered());
        assert!(state.account().is_none());
    }

    #[test]
    fn test_apply_merges_creds_and_keys() {
        let mut state = AuthState::fresh();
        state.apply(
            &CredentialUpdate::creds(json!({
                "registered": true,
                "me": { "id": "15551234567:3@s.whatsapp.net", "name": "Ada" }
            }))
            .with_key("pre-key-1", Some(json!({ "k": 1 })))
            .with_key("pre-key-2", Some(json!({ "k": 2 }))),
        );

        assert!(state.is_registered());
        let account = state.account().unwrap();
        assert_eq!(account.number(), "15551234567");
        assert_eq!(account.name.as_deref(), Some("Ada"));
        assert_eq!(state.keys.len(), 2);

        state.apply(&CredentialUpdate::default().with_key("pre-key-1", None));
        assert_eq!(state.keys.len(), 1);
        assert!(state.keys.contains_key("pre-key-2"));
        // creds untouched by a key-only update
        assert!(state.is_registered());
    }

    #[test]
    fn test_marker_json_field_names() {
        let account = AccountInfo::new("15551234567:1@s.whatsapp.net", Some("Ada".to_string()));
        let marker = LinkedMarker::new(Some(&account), 1_700_000_000_000);
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["linked"], true);
        assert_eq!(json["at"], 1_700_000_000_000i64);
        assert_eq!(json["waNumber"], "15551234567");
        assert_eq!(json["waName"], "Ada");
    }

    #[test]
    fn test_marker_without_account() {
        let marker = LinkedMarker::new(None, 1);
        assert!(marker.linked);
        assert!(marker.wa_number.is_none());
        assert!(marker.wa_name.is_none());
    }
}
