//! Flat-file account store.
//!
//! Accounts live in a single JSON document of the form
//! `{"users": {"alice": "secret"}}`. Every call reads the whole file, and a
//! successful registration rewrites it in full. There is no locking, so two
//! registrations racing on the same name may both read it as free; the last
//! write wins.

use std::{collections::BTreeMap, io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Registered,
    NameTaken,
    Authenticated,
    Rejected,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read account file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("account file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write account file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountFile {
    #[serde(default)]
    users: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates an account unless the name already exists.
    pub async fn register(&self, name: &str, secret: &str) -> Result<AuthOutcome, StoreError> {
        let mut accounts = self.load().await?;
        if accounts.users.contains_key(name) {
            return Ok(AuthOutcome::NameTaken);
        }
        accounts.users.insert(name.to_string(), secret.to_string());
        self.save(&accounts).await?;
        info!(%name, "account created");
        Ok(AuthOutcome::Registered)
    }

    /// Checks `secret` against the stored one. Unknown names are rejected.
    pub async fn authenticate(
        &self,
        name: &str,
        secret: &str,
    ) -> Result<AuthOutcome, StoreError> {
        let accounts = self.load().await?;
        match accounts.users.get(name) {
            Some(stored) if stored == secret => Ok(AuthOutcome::Authenticated),
            Some(_) => {
                debug!(%name, "secret mismatch");
                Ok(AuthOutcome::Rejected)
            }
            None => {
                debug!(%name, "unknown account");
                Ok(AuthOutcome::Rejected)
            }
        }
    }

    async fn load(&self) -> Result<AccountFile, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(AccountFile::default()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(AccountFile::default());
        }
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, accounts: &AccountFile) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(accounts).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })
    }
}
