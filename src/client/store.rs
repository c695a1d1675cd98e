use std::{fs, io, path::PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::auth::PublicUser;

use super::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub token: String,
    pub user: PublicUser,
}

/// Where a client keeps its login between runs.
pub trait CredentialStore {
    fn load(&self) -> Result<Option<StoredCredential>, ClientError>;
    fn save(&self, credential: &StoredCredential) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCredentialStore { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    /// An unreadable file counts as no login.
    fn load(&self) -> Result<Option<StoredCredential>, ClientError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&json) {
            Ok(credential) => Ok(Some(credential)),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "ignoring corrupt credential file");
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &StoredCredential) -> Result<(), ClientError> {
        fs::write(&self.path, serde_json::to_string_pretty(credential)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<StoredCredential>>,
}

impl MemoryCredentialStore {
    pub fn with(credential: StoredCredential) -> Self {
        MemoryCredentialStore {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<StoredCredential>, ClientError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, credential: &StoredCredential) -> Result<(), ClientError> {
        *self.slot.lock() = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.slot.lock() = None;
        Ok(())
    }
}
