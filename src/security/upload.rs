//! File upload validation, storage and cleanup.
//!
//! # Responsibilities
//! - Enforce the MIME whitelist and per-file/per-request limits
//! - Re-derive the allowed extensions from the declared MIME type
//! - Store files under random names in date partitions
//! - Delete a request's files when its response is not a success
//!
//! # Design Decisions
//! - The client file name never reaches the filesystem; only its final
//!   extension is kept after validation
//! - The ledger is per request and shared with the response stage

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Utc};
use rand::RngCore;
use serde::Serialize;

use crate::config::UploadConfig;
use crate::error::AppError;
use crate::security::sanitize::sanitize_filename;

/// Upload rejection reasons.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Too many files (max {max})")]
    TooManyFiles { max: usize },

    #[error("File too large (max {max_bytes} bytes)")]
    FileTooLarge { max_bytes: usize },

    #[error("File type not allowed. Allowed: {allowed}")]
    TypeNotAllowed { mime: String, allowed: String },

    #[error("Extension not allowed: {0}")]
    ExtensionNotAllowed(String),

    #[error("File name carries more than one extension: {0}")]
    DoubleExtension(String),

    #[error("File content does not match its type")]
    ContentMismatch,

    #[error("Missing file name")]
    MissingFileName,

    #[error("Malformed multipart body: {0}")]
    Multipart(String),

    #[error("Storage error: {0}")]
    Io(#[from] io::Error),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::FileTooLarge { max_bytes } => AppError::PayloadTooLarge { max_bytes },
            UploadError::Io(e) => AppError::Internal(format!("upload storage: {}", e)),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

/// A stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_type: String,
    pub stored_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: usize,
}

/// Files written during one request.
#[derive(Debug, Clone, Default)]
pub struct UploadLedger {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: PathBuf) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.push(path);
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths
            .lock()
            .map(|paths| paths.clone())
            .unwrap_or_default()
    }

    /// Delete every recorded file; returns how many were removed. Failures
    /// are logged and skipped.
    pub async fn cleanup(&self) -> usize {
        let paths = match self.paths.lock() {
            Ok(mut paths) => std::mem::take(&mut *paths),
            Err(_) => return 0,
        };

        let mut removed = 0;
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::error!(file = %path.display(), error = %e, "Failed to delete upload");
                }
            }
        }
        removed
    }
}

/// Leading bytes of the types we know how to recognize.
const SIGNATURES: &[(&str, &[u8])] = &[
    ("image/jpeg", &[0xFF, 0xD8, 0xFF]),
    ("image/png", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
    ("image/gif", b"GIF8"),
    ("application/pdf", b"%PDF"),
];

/// Upload policy built from configuration.
#[derive(Debug, Clone)]
pub struct UploadGuard {
    dir: PathBuf,
    allowed_types: Vec<String>,
    max_file_bytes: usize,
    max_files: usize,
}

impl UploadGuard {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.dir),
            allowed_types: config
                .allowed_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect(),
            max_file_bytes: config.max_file_bytes,
            max_files: config.max_files,
        }
    }

    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Upper bound for a whole multipart body.
    pub fn max_request_bytes(&self) -> usize {
        self.max_files * self.max_file_bytes + 64 * 1024
    }

    pub fn check_count(&self, seen: usize) -> Result<(), UploadError> {
        if seen > self.max_files {
            return Err(UploadError::TooManyFiles {
                max: self.max_files,
            });
        }
        Ok(())
    }

    pub fn check_size(&self, size: usize) -> Result<(), UploadError> {
        if size > self.max_file_bytes {
            return Err(UploadError::FileTooLarge {
                max_bytes: self.max_file_bytes,
            });
        }
        Ok(())
    }

    /// Validate name and declared type; returns the extension to store with.
    pub fn check_file(&self, original_name: &str, mime: &str) -> Result<String, UploadError> {
        let mime = mime.trim().to_ascii_lowercase();
        if !self.allowed_types.contains(&mime) {
            return Err(UploadError::TypeNotAllowed {
                mime,
                allowed: self.allowed_types.join(", "),
            });
        }

        let base = Path::new(original_name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(UploadError::MissingFileName)?;
        let (stem, ext) = match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                (stem, ext.to_ascii_lowercase())
            }
            _ => return Err(UploadError::ExtensionNotAllowed(String::new())),
        };
        if stem.trim_start_matches('.').contains('.') {
            return Err(UploadError::DoubleExtension(sanitize_filename(base)));
        }

        let allowed = mime_guess::get_mime_extensions_str(&mime).unwrap_or(&[]);
        if !allowed.contains(&ext.as_str()) {
            return Err(UploadError::ExtensionNotAllowed(format!(".{}", ext)));
        }
        Ok(ext)
    }

    /// Reject content whose leading bytes contradict a recognizable type.
    pub fn check_content(&self, mime: &str, data: &[u8]) -> Result<(), UploadError> {
        match SIGNATURES.iter().find(|(m, _)| mime.eq_ignore_ascii_case(m)) {
            Some((_, magic)) if !data.starts_with(magic) => Err(UploadError::ContentMismatch),
            _ => Ok(()),
        }
    }

    /// `<dir>/<YYYY>/<MM>` for `now`.
    pub fn partition(&self, now: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{:04}", now.year()))
            .join(format!("{:02}", now.month()))
    }

    /// Validate and write one file, recording it in `ledger`.
    pub async fn store(
        &self,
        original_name: &str,
        mime: &str,
        data: &[u8],
        now: DateTime<Utc>,
        ledger: &UploadLedger,
    ) -> Result<UploadedFile, UploadError> {
        let ext = self.check_file(original_name, mime)?;
        self.check_size(data.len())?;
        self.check_content(mime, data)?;

        let dir = self.partition(now);
        tokio::fs::create_dir_all(&dir).await?;

        let stored_name = format!("{}.{}", random_name(), ext);
        let path = dir.join(&stored_name);
        tokio::fs::write(&path, data).await?;
        ledger.record(path.clone());

        Ok(UploadedFile {
            original_name: sanitize_filename(original_name),
            mime_type: mime.to_ascii_lowercase(),
            stored_name,
            path,
            size: data.len(),
        })
    }
}

/// 16 random bytes as 32 hex characters.
fn random_name() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
