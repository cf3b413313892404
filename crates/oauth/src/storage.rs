//! Durable session state: the issued credential plus the pending PKCE verifier.
//!
//! Every provider gets its own namespace holding four slots (access token,
//! refresh token, expiry, pending verifier). Backends persist a namespace as a
//! single record so a credential is never observed half written.

use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    config_dir,
    error::{Error, Result},
    types::{Credential, serialize_option_secret},
};

const TOKENS_FILE: &str = "oauth_tokens.json";

/// Source of "now" for expiry computations.
pub trait Clock: Send + Sync {
    /// Current time as Unix epoch milliseconds.
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// The four persisted slots of one provider namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<Secret<String>>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    /// Unix epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiration: Option<u64>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub code_verifier: Option<Secret<String>>,
}

impl StoredSession {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.token_expiration.is_none()
            && self.code_verifier.is_none()
    }
}

/// Persistence capability behind a [`TokenStore`].
///
/// `store` replaces the whole namespace record at once; storing an empty
/// session removes the namespace.
pub trait StorageBackend: Send + Sync {
    fn load(&self, namespace: &str) -> Result<StoredSession>;
    fn store(&self, namespace: &str, session: &StoredSession) -> Result<()>;
    fn namespaces(&self) -> Result<Vec<String>>;
}

/// Process-local backend, used in tests and for throwaway sessions.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self, namespace: &str) -> Result<StoredSession> {
        Ok(lock(&self.sessions)
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    fn store(&self, namespace: &str, session: &StoredSession) -> Result<()> {
        let mut sessions = lock(&self.sessions);
        if session.is_empty() {
            sessions.remove(namespace);
        } else {
            sessions.insert(namespace.to_string(), session.clone());
        }
        Ok(())
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = lock(&self.sessions).keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// JSON file backend. All namespaces share one file, replaced atomically on
/// every write (temp file + rename) and created with owner-only permissions.
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `oauth_tokens.json` inside the jcard config directory.
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(TOKENS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, StoredSession>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::storage(&self.path, e)),
        }
    }

    fn write_all(&self, sessions: &BTreeMap<String, StoredSession>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;
        }
        let data = serde_json::to_vec_pretty(sessions)?;
        let tmp = self.path.with_extension("json.tmp");

        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&tmp).map_err(|e| Error::storage(&tmp, e))?;
        file.write_all(&data)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::storage(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| Error::storage(&self.path, e))
    }
}

impl StorageBackend for FileBackend {
    fn load(&self, namespace: &str) -> Result<StoredSession> {
        Ok(self.read_all()?.remove(namespace).unwrap_or_default())
    }

    fn store(&self, namespace: &str, session: &StoredSession) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut sessions = self.read_all()?;
        if session.is_empty() {
            if sessions.remove(namespace).is_none() && !self.path.exists() {
                return Ok(());
            }
        } else {
            sessions.insert(namespace.to_string(), session.clone());
        }
        self.write_all(&sessions)
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        Ok(self.read_all()?.into_keys().collect())
    }
}

/// Scoped, atomic access to one provider's session slots.
pub struct TokenStore {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
    clock: Arc<dyn Clock>,
    // Serializes read-modify-write cycles issued through this store.
    guard: Mutex<()>,
}

impl TokenStore {
    pub fn with_backend(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            clock: Arc::new(SystemClock),
            guard: Mutex::new(()),
        }
    }

    /// Store backed by the default token file.
    pub fn for_provider(provider: &str) -> Result<Self> {
        let backend = FileBackend::new(FileBackend::default_path()?);
        Ok(Self::with_backend(Arc::new(backend), provider))
    }

    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()), namespace)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Persist a freshly issued credential; `expires_at = now + lifetime_secs`.
    ///
    /// Replaces the access token, refresh token, and expiry in one write. The
    /// pending verifier slot is left as is.
    pub fn save(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        lifetime_secs: u64,
    ) -> Result<Credential> {
        let expires_at = self
            .clock
            .now_millis()
            .saturating_add(lifetime_secs.saturating_mul(1000));
        let credential = Credential {
            access_token: Secret::new(access_token.to_string()),
            refresh_token: refresh_token.map(|t| Secret::new(t.to_string())),
            expires_at,
        };

        self.update(|session| {
            session.access_token = Some(credential.access_token.clone());
            session.refresh_token = credential.refresh_token.clone();
            session.token_expiration = Some(expires_at);
        })?;

        debug!(
            provider = %self.namespace,
            expires_at,
            has_refresh_token = credential.refresh_token.is_some(),
            "saved credential"
        );
        Ok(credential)
    }

    /// The stored credential, or `None` when no access token is stored.
    pub fn read(&self) -> Result<Option<Credential>> {
        let session = self.backend.load(&self.namespace)?;
        Ok(session.access_token.map(|access_token| Credential {
            access_token,
            refresh_token: session.refresh_token,
            // A token without a recorded expiry is treated as already expired.
            expires_at: session.token_expiration.unwrap_or(0),
        }))
    }

    /// True when no expiry is stored or it has been reached. Storage faults fail closed.
    pub fn is_expired(&self) -> bool {
        match self.backend.load(&self.namespace) {
            Ok(session) => session
                .token_expiration
                .is_none_or(|expires_at| self.clock.now_millis() >= expires_at),
            Err(e) => {
                warn!(provider = %self.namespace, error = %e, "could not read token expiry");
                true
            },
        }
    }

    /// Remove all four slots. Idempotent.
    pub fn clear(&self) -> Result<()> {
        let _guard = lock(&self.guard);
        self.backend
            .store(&self.namespace, &StoredSession::default())?;
        debug!(provider = %self.namespace, "cleared session");
        Ok(())
    }

    /// Record the verifier for the authorization attempt now starting,
    /// replacing any unconsumed one.
    pub fn set_pending_verifier(&self, verifier: &str) -> Result<()> {
        self.update(|session| {
            session.code_verifier = Some(Secret::new(verifier.to_string()));
        })
    }

    /// Read and clear the pending verifier. A verifier is handed out at most once.
    pub fn take_pending_verifier(&self) -> Result<Option<String>> {
        let _guard = lock(&self.guard);
        let mut session = self.backend.load(&self.namespace)?;
        let Some(verifier) = session.code_verifier.take() else {
            return Ok(None);
        };
        self.backend.store(&self.namespace, &session)?;
        Ok(Some(verifier.expose_secret().clone()))
    }

    /// Whether a pending verifier is stored, without consuming it.
    pub fn has_pending_verifier(&self) -> Result<bool> {
        Ok(self.backend.load(&self.namespace)?.code_verifier.is_some())
    }

    /// Namespaces in the backing store that currently hold an access token.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for name in self.backend.namespaces()? {
            if self.backend.load(&name)?.access_token.is_some() {
                out.push(name);
            }
        }
        Ok(out)
    }

    fn update(&self, apply: impl FnOnce(&mut StoredSession)) -> Result<()> {
        let _guard = lock(&self.guard);
        let mut session = self.backend.load(&self.namespace)?;
        apply(&mut session);
        self.backend.store(&self.namespace, &session)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn at(millis: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(millis)))
        }

        fn advance(&self, millis: u64) {
            self.0.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_save_then_read() {
        let store = TokenStore::in_memory("spotify");
        store.save("tok1", None, 3600).unwrap();

        let cred = store.read().unwrap().unwrap();
        assert_eq!(cred.access_token.expose_secret(), "tok1");
        assert!(cred.refresh_token.is_none());
        assert!(!store.is_expired());
    }

    #[test]
    fn test_zero_lifetime_is_expired_immediately() {
        let store = TokenStore::in_memory("spotify");
        store.save("tok1", Some("r1"), 0).unwrap();
        assert!(store.is_expired());
        assert!(store.read().unwrap().is_some());
    }

    #[test]
    fn test_expiry_boundary_with_manual_clock() {
        let clock = ManualClock::at(1_000_000);
        let store = TokenStore::in_memory("spotify").with_clock(clock.clone());
        let cred = store.save("tok", None, 10).unwrap();
        assert_eq!(cred.expires_at, 1_010_000);

        clock.advance(9_999);
        assert!(!store.is_expired());
        clock.advance(1);
        assert!(store.is_expired());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = TokenStore::in_memory("spotify");
        store.save("tok1", Some("refresh"), 3600).unwrap();
        store.set_pending_verifier("V").unwrap();

        store.clear().unwrap();
        assert!(store.read().unwrap().is_none());
        assert!(store.is_expired());
        assert!(!store.has_pending_verifier().unwrap());

        store.clear().unwrap();
        assert!(store.read().unwrap().is_none());
        assert!(store.is_expired());
    }

    #[test]
    fn test_empty_store_is_expired() {
        let store = TokenStore::in_memory("spotify");
        assert!(store.read().unwrap().is_none());
        assert!(store.is_expired());
    }

    #[test]
    fn test_take_pending_verifier_is_destructive() {
        let store = TokenStore::in_memory("spotify");
        store.set_pending_verifier("first").unwrap();
        store.set_pending_verifier("second").unwrap();

        assert_eq!(store.take_pending_verifier().unwrap().as_deref(), Some("second"));
        assert_eq!(store.take_pending_verifier().unwrap(), None);
    }

    #[test]
    fn test_save_keeps_pending_verifier() {
        let store = TokenStore::in_memory("spotify");
        store.set_pending_verifier("V").unwrap();
        store.save("tok", None, 60).unwrap();
        assert!(store.has_pending_verifier().unwrap());
    }

    #[test]
    fn test_save_replaces_refresh_token() {
        let store = TokenStore::in_memory("spotify");
        store.save("a", Some("r1"), 60).unwrap();
        store.save("b", None, 60).unwrap();
        let cred = store.read().unwrap().unwrap();
        assert_eq!(cred.access_token.expose_secret(), "b");
        assert!(cred.refresh_token.is_none());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let spotify = TokenStore::with_backend(backend.clone(), "spotify");
        let other = TokenStore::with_backend(backend, "other");

        spotify.save("s", None, 60).unwrap();
        other.set_pending_verifier("V").unwrap();

        assert!(other.read().unwrap().is_none());
        assert!(!spotify.has_pending_verifier().unwrap());
        assert_eq!(spotify.list().unwrap(), vec!["spotify".to_string()]);
    }

    #[test]
    fn test_file_backend_persists_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/oauth_tokens.json");

        let store = TokenStore::with_backend(Arc::new(FileBackend::new(&path)), "spotify");
        store.save("tok1", Some("ref1"), 3600).unwrap();
        store.set_pending_verifier("V").unwrap();

        let reopened = TokenStore::with_backend(Arc::new(FileBackend::new(&path)), "spotify");
        let cred = reopened.read().unwrap().unwrap();
        assert_eq!(cred.access_token.expose_secret(), "tok1");
        assert_eq!(
            cred.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("ref1")
        );
        assert!(!reopened.is_expired());
        assert_eq!(reopened.take_pending_verifier().unwrap().as_deref(), Some("V"));
        assert!(!store.has_pending_verifier().unwrap());
    }

    #[test]
    fn test_file_layout_uses_namespaced_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("oauth_tokens.json");
        let store = TokenStore::with_backend(Arc::new(FileBackend::new(&path)), "spotify")
            .with_clock(ManualClock::at(5_000));
        store.save("tok1", None, 1).unwrap();
        store.set_pending_verifier("V").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "spotify": {
                    "access_token": "tok1",
                    "token_expiration": 6_000,
                    "code_verifier": "V",
                }
            })
        );
    }

    #[test]
    fn test_file_backend_clear_on_missing_file_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("oauth_tokens.json");
        let store = TokenStore::with_backend(Arc::new(FileBackend::new(&path)), "spotify");
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_backend_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("oauth_tokens.json");
        let store = TokenStore::with_backend(Arc::new(FileBackend::new(&path)), "spotify");
        store.save("tok", None, 60).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_file_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("oauth_tokens.json");
        fs::write(&path, "not json").unwrap();

        let store = TokenStore::with_backend(Arc::new(FileBackend::new(&path)), "spotify");
        assert!(store.is_expired());
        assert!(matches!(store.read(), Err(Error::Serialization(_))));
    }
}
