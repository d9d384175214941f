//! File-based credential store.
//!
//! One directory per identifier under the configured root:
//!
//! ```text
//! sessions/
//!   matdev-abc12345/
//!     creds.json          credential document
//!     pre-key-1.json      one file per signal key
//!     linked.json         {linked, at, waNumber, waName}
//! ```
//!
//! Every write goes to a temporary file that is renamed into place, so a
//! crash never leaves a half-written credential file behind. Disk work runs
//! on the blocking pool.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::{validate_identifier, AuthState, CredentialUpdate, LinkedMarker};
use crate::error::StoreError;
use crate::traits::CredentialStore;

/// Credential document file name.
const CREDS_FILE: &str = "creds.json";

/// Linked marker file name.
const LINKED_FILE: &str = "linked.json";

const JSON_EXT: &str = ".json";

/// Credential slots stored as JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    ///
    /// The root is canonicalized, so slot paths handed out are absolute.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io("create", &root, e))?;
        let root = fs::canonicalize(&root).map_err(|e| StoreError::io("resolve", &root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_dir(&self, unique_id: &str) -> Result<PathBuf, StoreError> {
        validate_identifier(unique_id)?;
        Ok(self.root.join(unique_id))
    }

    fn read_creds(dir: &Path) -> Result<Option<Value>, StoreError> {
        read_json(&dir.join(CREDS_FILE))
    }

    fn read_keys(dir: &Path) -> Result<std::collections::BTreeMap<String, Value>, StoreError> {
        let mut keys = std::collections::BTreeMap::new();
        let entries = fs::read_dir(dir).map_err(|e| StoreError::io("list", dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io("list", dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name == CREDS_FILE || file_name == LINKED_FILE {
                continue;
            }
            let Some(stem) = file_name.strip_suffix(JSON_EXT) else {
                continue;
            };
            let Some(name) = decode_key_name(stem) else {
                debug!("Skipping unrecognized file in credential slot: {}", file_name);
                continue;
            };
            if let Some(value) = read_json(&entry.path())? {
                keys.insert(name, value);
            }
        }

        Ok(keys)
    }

    /// Run `op` against a clone of this store on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    fn load_slot(&self, unique_id: &str) -> Result<AuthState, StoreError> {
        let dir = self.slot_dir(unique_id)?;

        match Self::read_creds(&dir)? {
            Some(creds) => {
                let keys = Self::read_keys(&dir)?;
                Ok(AuthState { creds, keys })
            }
            None => {
                let state = AuthState::fresh();
                fs::create_dir_all(&dir).map_err(|e| StoreError::io("create", &dir, e))?;
                write_json_atomic(&dir.join(CREDS_FILE), &state.creds)?;
                debug!("Initialized credential slot at {}", dir.display());
                Ok(state)
            }
        }
    }

    fn persist_update(&self, unique_id: &str, update: &CredentialUpdate) -> Result<(), StoreError> {
        let dir = self.slot_dir(unique_id)?;
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("create", &dir, e))?;

        if update.creds.is_some() {
            let mut state = AuthState {
                creds: Self::read_creds(&dir)?.unwrap_or_else(|| AuthState::fresh().creds),
                keys: Default::default(),
            };
            state.apply(&CredentialUpdate {
                creds: update.creds.clone(),
                keys: Default::default(),
            });
            write_json_atomic(&dir.join(CREDS_FILE), &state.creds)?;
        }

        for (name, value) in &update.keys {
            let path = dir.join(format!("{}{}", encode_key_name(name), JSON_EXT));
            match value {
                Some(value) => write_json_atomic(&path, value)?,
                None => match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::io("remove", &path, e)),
                },
            }
        }

        Ok(())
    }

    fn write_marker(&self, unique_id: &str, marker: &LinkedMarker) -> Result<(), StoreError> {
        let dir = self.slot_dir(unique_id)?;
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("create", &dir, e))?;
        write_json_atomic(&dir.join(LINKED_FILE), marker)
    }

    fn erase_slot(&self, unique_id: &str) -> Result<(), StoreError> {
        let dir = self.slot_dir(unique_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove", &dir, e)),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, unique_id: &str) -> Result<AuthState, StoreError> {
        let unique_id = unique_id.to_string();
        self.blocking(move |store| store.load_slot(&unique_id)).await
    }

    async fn persist(&self, unique_id: &str, update: &CredentialUpdate) -> Result<(), StoreError> {
        let unique_id = unique_id.to_string();
        let update = update.clone();
        self.blocking(move |store| store.persist_update(&unique_id, &update))
            .await
    }

    async fn is_linked(&self, unique_id: &str) -> bool {
        let Ok(dir) = self.slot_dir(unique_id) else {
            return false;
        };
        tokio::fs::metadata(dir.join(LINKED_FILE))
            .await
            .is_ok_and(|m| m.is_file())
    }

    async fn write_linked_marker(
        &self,
        unique_id: &str,
        marker: &LinkedMarker,
    ) -> Result<(), StoreError> {
        let unique_id = unique_id.to_string();
        let marker = marker.clone();
        self.blocking(move |store| store.write_marker(&unique_id, &marker))
            .await
    }

    async fn erase(&self, unique_id: &str) -> Result<(), StoreError> {
        let unique_id = unique_id.to_string();
        self.blocking(move |store| store.erase_slot(&unique_id)).await
    }

    fn slot_path(&self, unique_id: &str) -> Option<PathBuf> {
        self.slot_dir(unique_id).ok()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io("read", path, e)),
    };
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(value))
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp).map_err(|e| StoreError::io("write", &tmp, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|e| StoreError::io("write", &tmp, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| StoreError::io("sync", &tmp, e))?;

    fs::rename(&tmp, path).map_err(|e| StoreError::io("rename", path, e))
}

fn is_plain_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')
}

/// Map a key name to a file stem, percent-encoding anything unsafe.
///
/// Names that would shadow the credential or marker file get their first
/// byte encoded too.
fn encode_key_name(name: &str) -> String {
    let reserved = [CREDS_FILE, LINKED_FILE]
        .iter()
        .any(|f| f.strip_suffix(JSON_EXT) == Some(name));

    let mut out = String::with_capacity(name.len());
    for (i, b) in name.bytes().enumerate() {
        if is_plain_key_byte(b) && !(reserved && i == 0) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key_name(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store(temp_dir: &TempDir) -> FileCredentialStore {
        FileCredentialStore::new(temp_dir.path().join("sessions")).unwrap()
    }

    #[test]
    fn test_key_name_encoding() {
        assert_eq!(encode_key_name("pre-key-1"), "pre-key-1");
        assert_eq!(encode_key_name("session-1555:2"), "session-1555%3A2");
        assert_eq!(encode_key_name("a/b"), "a%2Fb");
        assert_eq!(encode_key_name("creds"), "%63reds");
        assert_eq!(encode_key_name("linked"), "%6Cinked");

        for name in ["pre-key-1", "session-1555:2", "a/b", "creds", "linked", "ünï"] {
            assert_eq!(decode_key_name(&encode_key_name(name)).as_deref(), Some(name));
        }
    }

    #[test]
    fn test_decode_rejects_truncated_escape() {
        assert_eq!(decode_key_name("abc%4"), None);
        assert_eq!(decode_key_name("abc%zz"), None);
    }

    #[test]
    fn test_root_is_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("..").join("sessions");
        let store = FileCredentialStore::new(&nested).unwrap();

        assert!(store.root().is_absolute());
        assert!(!store.root().components().any(|c| c == std::path::Component::ParentDir));
        assert_eq!(store.root(), fs::canonicalize(&nested).unwrap());

        let slot = store.slot_path("matdev-abcd0000").unwrap();
        assert!(slot.is_absolute());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_persists_on_single_thread_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.spawn(async move {
                let id = format!("matdev-conc000{}", i);
                store
                    .persist(&id, &CredentialUpdate::default().with_key("pre-key-1", Some(json!(i))))
                    .await
                    .map(|()| id)
            });
        }

        let mut written = Vec::new();
        while let Some(result) = tasks.join_next().await {
            written.push(result.unwrap().unwrap());
        }
        assert_eq!(written.len(), 8);
        for id in written {
            let state = store.load(&id).await.unwrap();
            assert_eq!(state.keys.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_load_initializes_slot() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        let state = store.load("matdev-aaaa1111").await.unwrap();
        assert_eq!(state, AuthState::fresh());

        let creds_path = store.root().join("matdev-aaaa1111").join(CREDS_FILE);
        assert!(creds_path.exists());
        assert!(!store.is_linked("matdev-aaaa1111").await);
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let id = "matdev-bbbb2222";

        store.load(id).await.unwrap();
        store
            .persist(
                id,
                &CredentialUpdate::creds(json!({ "registered": true, "me": { "id": "1555:1@s.whatsapp.net" } }))
                    .with_key("pre-key-1", Some(json!({ "public": "abc" })))
                    .with_key("session-1555:1", Some(json!({ "chain": 7 }))),
            )
            .await
            .unwrap();
        store
            .persist(id, &CredentialUpdate::creds(json!({ "platform": "web" })))
            .await
            .unwrap();

        let state = store.load(id).await.unwrap();
        assert!(state.is_registered());
        assert_eq!(state.creds["platform"], "web");
        assert_eq!(state.account().unwrap().number(), "1555");
        assert_eq!(state.keys.len(), 2);
        assert_eq!(state.keys["session-1555:1"], json!({ "chain": 7 }));
    }

    #[tokio::test]
    async fn test_persist_key_deletion() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let id = "matdev-cccc3333";

        store
            .persist(id, &CredentialUpdate::default().with_key("pre-key-9", Some(json!(1))))
            .await
            .unwrap();
        store
            .persist(id, &CredentialUpdate::default().with_key("pre-key-9", None))
            .await
            .unwrap();
        // deleting a key that was never written is fine
        store
            .persist(id, &CredentialUpdate::default().with_key("pre-key-10", None))
            .await
            .unwrap();

        let state = store.load(id).await.unwrap();
        assert!(state.keys.is_empty());
    }

    #[tokio::test]
    async fn test_linked_marker_and_erase() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let id = "matdev-dddd4444";

        store.load(id).await.unwrap();
        let marker = LinkedMarker {
            linked: true,
            at: 1_700_000_000_000,
            wa_number: Some("15551234567".to_string()),
            wa_name: None,
        };
        store.write_linked_marker(id, &marker).await.unwrap();
        assert!(store.is_linked(id).await);

        let raw = fs::read_to_string(store.root().join(id).join(LINKED_FILE)).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["linked"], true);
        assert_eq!(parsed["waNumber"], "15551234567");
        assert_eq!(parsed["waName"], Value::Null);

        store.erase(id).await.unwrap();
        assert!(!store.is_linked(id).await);
        assert!(!store.root().join(id).exists());

        // erasing twice is a no-op
        store.erase(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_identifier_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        assert!(matches!(
            store.load("../escape").await,
            Err(StoreError::InvalidIdentifier(_))
        ));
        assert!(!store.is_linked("../escape").await);
        assert!(store.slot_path("../escape").is_none());
        assert_eq!(
            store.slot_path("matdev-eeee5555"),
            Some(store.root().join("matdev-eeee5555"))
        );
    }

    #[tokio::test]
    async fn test_corrupt_creds_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let dir = store.root().join("matdev-ffff6666");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CREDS_FILE), "{not json").unwrap();

        assert!(matches!(
            store.load("matdev-ffff6666").await,
            Err(StoreError::Serialization(_))
        ));
    }
}
