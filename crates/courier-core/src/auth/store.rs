use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Credential;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name for stored tokens
const SERVICE_NAME: &str = "courier-session";

/// Persistence for the one credential the client holds.
///
/// Only the session manager writes through this trait; everything else reads
/// session state from the manager.
pub trait CredentialStore: Send + Sync {
    fn save(&self, credential: &Credential) -> Result<()>;

    /// Returns `None` when nothing has been saved.
    fn load(&self) -> Result<Option<Credential>>;

    /// Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// File store
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    token: String,
    subject: String,
    saved_at: DateTime<Utc>,
}

/// Token persisted as JSON in the cache directory.
pub struct FileCredentialStore {
    cache_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create session directory")?;
        }
        let stored = StoredSession {
            token: credential.token().to_string(),
            subject: credential.claims().subject.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&stored)?;
        std::fs::write(&path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Credential>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .context("Failed to read session file")?;
        let stored: StoredSession = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;
        debug!(saved_at = %stored.saved_at, "Session file loaded");

        let credential = Credential::decode(stored.token)
            .context("Stored session token could not be decoded")?;
        Ok(Some(credential))
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

// ============================================================================
// Keyring store
// ============================================================================

/// Token kept in the OS keychain, one entry per profile.
pub struct KeyringCredentialStore {
    account: String,
}

impl KeyringCredentialStore {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        self.entry()?
            .set_password(credential.token())
            .context("Failed to store token in keychain")?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Credential>> {
        match self.entry()?.get_password() {
            Ok(token) => {
                let credential = Credential::decode(token)
                    .context("Keychain token could not be decoded")?;
                Ok(Some(credential))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
