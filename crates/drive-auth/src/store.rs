//! Credential storage
//!
//! Persists the single credential record as a JSON file. All writes use
//! atomic temp-file + rename so a concurrent reader (or a crash mid-write)
//! never observes a torn record. A tokio Mutex serializes access; reads
//! clone the in-memory state, the file is the durable copy.
//!
//! A missing or unparseable file means "no credential" — the gateway
//! degrades to requiring re-authorization instead of refusing to start.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::{Error, Result};

/// Thread-safe single-record credential file manager.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<Option<Credential>>,
}

impl CredentialStore {
    /// Open the store at the given file path.
    ///
    /// A missing file is a cold start (unauthenticated). Malformed contents
    /// are logged and treated the same way — the next successful
    /// authorization overwrites the file.
    pub async fn load(path: PathBuf) -> Self {
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<Credential>(&contents) {
                Ok(credential) => {
                    info!(path = %path.display(), "loaded stored credential");
                    Some(credential)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "credential file unparseable, treating as absent");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no credential file, starting unauthenticated");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "credential file unreadable, treating as absent");
                None
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Clone of the current record, if any. No file I/O.
    pub async fn read(&self) -> Option<Credential> {
        self.state.lock().await.clone()
    }

    /// Whether a record is present (used by the health endpoint; never
    /// exposes the tokens themselves).
    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Replace the record, persisting to disk first.
    ///
    /// The in-memory state only changes once the file write has succeeded,
    /// so a failed write leaves the previous record intact and surfaces a
    /// hard `Storage` error to the operation that produced the credential.
    pub async fn write(&self, credential: Credential) -> Result<()> {
        let mut state = self.state.lock().await;
        write_atomic(&self.path, &credential).await?;
        *state = Some(credential);
        Ok(())
    }
}

/// Write the record to the file atomically.
///
/// Serializes to a temp file in the same directory, sets 0600 permissions
/// (the file holds OAuth tokens), then renames over the target.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::Storage(format!("serializing credential: {e}")))?;

    // A bare filename has an empty parent; the temp file goes in the cwd then
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => return Err(Error::Storage("credential path has no parent directory".into())),
    };

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credential(access: &str) -> Credential {
        Credential {
            access_token: access.into(),
            refresh_token: "rt_1".into(),
            expires_in: 3600,
            saved_time: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn roundtrip_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await;
        store.write(test_credential("at_1")).await.unwrap();

        // Same instance
        assert_eq!(store.read().await.unwrap(), test_credential("at_1"));

        // Fresh instance reading the file back
        let store2 = CredentialStore::load(path).await;
        let cred = store2.read().await.unwrap();
        assert_eq!(cred, test_credential("at_1"));
    }

    #[tokio::test]
    async fn missing_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json")).await;
        assert!(store.read().await.is_none());
        assert!(!store.is_authenticated().await);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "{\"access_token\": trunca")
            .await
            .unwrap();

        let store = CredentialStore::load(path).await;
        assert!(store.read().await.is_none());
    }

    #[tokio::test]
    async fn write_replaces_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await;
        store.write(test_credential("at_1")).await.unwrap();
        store.write(test_credential("at_2")).await.unwrap();

        assert_eq!(store.read().await.unwrap().access_token, "at_2");
        let on_disk: Credential =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk.access_token, "at_2");
    }

    #[tokio::test]
    async fn write_into_missing_directory_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("credentials.json");

        let store = CredentialStore::load(path).await;
        let result = store.write(test_credential("at_1")).await;
        assert!(matches!(result, Err(Error::Storage(_))));
        // The failed write must not become visible in memory either
        assert!(store.read().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await;
        store.write(test_credential("at_1")).await.unwrap();

        let mode = tokio::fs::metadata(&path)
            .await
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_leave_a_parseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = std::sync::Arc::new(CredentialStore::load(path.clone()).await);

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.write(test_credential(&format!("at_{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whichever write landed last, the file must be whole
        let on_disk: Credential =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk, store.read().await.unwrap());
    }
}
