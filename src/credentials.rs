//! Credential set model and on-disk persistence
//!
//! The store writes a single `tokens.json` file with owner-only permissions.
//! It performs no network calls and never interprets token values.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// File name of the persisted credential set
pub const TOKEN_FILE_NAME: &str = "tokens.json";

/// OAuth2 credential set
///
/// Replaced wholesale on every successful exchange; never partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSet {
    /// Bearer access token
    pub access_token: String,
    /// Refresh token used to obtain new access tokens
    pub refresh_token: String,
    /// Absolute expiry of `access_token` in epoch milliseconds
    #[serde(rename = "expiresAt")]
    pub expires_at_epoch_millis: i64,
    /// Token type reported by the provider (usually `Bearer`)
    pub token_type: String,
}

impl CredentialSet {
    /// Expiry as a UTC timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at_epoch_millis)
    }

    /// Whether the access token expires within `margin` of `now` (inclusive)
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let threshold = now + margin;
        self.expires_at_epoch_millis <= threshold.timestamp_millis()
    }
}

/// Short non-reversible preview of a token for diagnostics
///
/// Shows only the first and last four characters; short tokens are fully
/// masked.
pub fn token_preview(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "****".to_owned();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// JSON file store for a single [`CredentialSet`]
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `dir`; nothing is touched until first use
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of the credential file
    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE_NAME)
    }

    /// Load the persisted credential set
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// - `NoCredentials` if the file exists but cannot be decoded
    /// - `Internal` on other I/O failures
    pub async fn load(&self) -> AppResult<Option<CredentialSet>> {
        let path = self.path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored credentials");
                return Ok(None);
            }
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let set = serde_json::from_slice::<CredentialSet>(&bytes).map_err(|e| {
            warn!(path = %path.display(), error = %e, "stored credentials are unreadable");
            AppError::NoCredentials(format!("stored credentials are unreadable: {e}"))
        })?;
        Ok(Some(set))
    }

    /// Persist the credential set, replacing any previous file
    ///
    /// Output is deterministic for identical input. The directory is created
    /// if necessary and restricted to the owner.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the directory or file cannot be written.
    pub async fn save(&self, set: &CredentialSet) -> AppResult<()> {
        let bytes = encode(set)?;
        ensure_private_dir(&self.dir).await?;

        let path = self.path();
        let staging = self.dir.join(format!("{TOKEN_FILE_NAME}.tmp"));
        write_private_file(&staging, &bytes).await?;
        fs::rename(&staging, &path).await.map_err(|e| {
            AppError::Internal(format!("failed to replace {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "credentials persisted");
        Ok(())
    }

    /// Delete the credential file; absent files are not an error
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the file exists but cannot be removed.
    pub async fn delete(&self) -> AppResult<()> {
        let path = self.path();
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!(
                "failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}

fn encode(set: &CredentialSet) -> AppResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(set)
        .map_err(|e| AppError::Internal(format!("failed to encode credentials: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(unix)]
async fn ensure_private_dir(dir: &Path) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create {}: {e}", dir.display())))?;
    fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .await
        .map_err(|e| AppError::Internal(format!("failed to restrict {}: {e}", dir.display())))
}

#[cfg(not(unix))]
async fn ensure_private_dir(dir: &Path) -> AppResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create {}: {e}", dir.display())))
}

#[cfg(unix)]
async fn write_private_file(path: &Path, bytes: &[u8]) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;
    use tokio::io::AsyncWriteExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await
        .map_err(|e| AppError::Internal(format!("failed to open {}: {e}", path.display())))?;
    // mode() only applies on creation; tighten a leftover staging file too
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| AppError::Internal(format!("failed to restrict {}: {e}", path.display())))?;
    file.write_all(bytes)
        .await
        .map_err(|e| AppError::Internal(format!("failed to write {}: {e}", path.display())))?;
    file.sync_all()
        .await
        .map_err(|e| AppError::Internal(format!("failed to flush {}: {e}", path.display())))
}

#[cfg(not(unix))]
async fn write_private_file(path: &Path, bytes: &[u8]) -> AppResult<()> {
    fs::write(path, bytes)
        .await
        .map_err(|e| AppError::Internal(format!("failed to write {}: {e}", path.display())))
}
