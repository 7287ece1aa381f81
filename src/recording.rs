//! Best-effort access to call recordings.
//!
//! A recording that cannot be read never fails the webhook: the caller logs
//! the [`RecordingError`] and attaches an empty file instead.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::config::Config;

const DEFAULT_EXTENSION: &str = "mp3";

/// Why a recording could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// Remote storage answered with a non-success status or could not be reached.
    Unavailable(String),
    /// Local file could not be read.
    Io(String),
    /// Reference points somewhere recordings may not be read from.
    Rejected(String),
    /// Recording is larger than the configured cap.
    TooLarge { limit: usize },
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::Unavailable(msg) => write!(f, "Recording unavailable: {}", msg),
            RecordingError::Io(msg) => write!(f, "Recording read failed: {}", msg),
            RecordingError::Rejected(msg) => write!(f, "Recording reference rejected: {}", msg),
            RecordingError::TooLarge { limit } => {
                write!(f, "Recording exceeds {} bytes", limit)
            }
        }
    }
}

impl std::error::Error for RecordingError {}

#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, RecordingError>;
}

/// Reads `http(s)://` references over HTTP. Local paths are only read when a
/// recordings directory is configured and the resolved path lies inside it.
#[derive(Clone)]
pub struct DefaultRecordingStore {
    client: reqwest::Client,
    local_root: Option<PathBuf>,
    max_bytes: usize,
}

impl DefaultRecordingStore {
    pub fn new(
        timeout: Duration,
        local_root: Option<PathBuf>,
        max_bytes: usize,
    ) -> Result<Self, RecordingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecordingError::Unavailable(format!("client setup failed: {}", e)))?;
        Ok(Self {
            client,
            local_root,
            max_bytes,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, RecordingError> {
        Self::new(
            Duration::from_secs(config.crm_timeout_secs),
            config.recordings_dir.clone(),
            config.max_recording_bytes,
        )
    }

    async fn fetch_remote(&self, url: Url) -> Result<Vec<u8>, RecordingError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RecordingError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RecordingError::Unavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let limit = self.max_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(RecordingError::TooLarge { limit });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| RecordingError::Unavailable(e.to_string()))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(RecordingError::TooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    async fn fetch_local(&self, path: &Path) -> Result<Vec<u8>, RecordingError> {
        let Some(root) = &self.local_root else {
            return Err(RecordingError::Rejected(
                "local recordings are not enabled".to_string(),
            ));
        };

        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| RecordingError::Io(format!("{}: {}", root.display(), e)))?;
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|e| RecordingError::Io(format!("{}: {}", candidate.display(), e)))?;

        if !resolved.starts_with(&root) {
            return Err(RecordingError::Rejected(format!(
                "{} is outside the recordings directory",
                path.display()
            )));
        }

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| RecordingError::Io(format!("{}: {}", resolved.display(), e)))?;
        if metadata.len() > self.max_bytes as u64 {
            return Err(RecordingError::TooLarge {
                limit: self.max_bytes,
            });
        }

        tokio::fs::read(&resolved)
            .await
            .map_err(|e| RecordingError::Io(format!("{}: {}", resolved.display(), e)))
    }
}

#[async_trait]
impl RecordingStore for DefaultRecordingStore {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, RecordingError> {
        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.fetch_remote(url).await,
            Ok(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|_| {
                    RecordingError::Rejected(format!("{} is not a local path", reference))
                })?;
                self.fetch_local(&path).await
            }
            Ok(url) => Err(RecordingError::Rejected(format!(
                "unsupported scheme '{}'",
                url.scheme()
            ))),
            Err(_) => self.fetch_local(Path::new(reference)).await,
        }
    }
}

/// File extension for the uploaded recording, taken from the reference.
pub fn recording_extension(reference: &str) -> String {
    let file_name = match Url::parse(reference) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string),
        Err(_) => Path::new(reference)
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string),
    };

    file_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(DEFAULT_EXTENSION)
        .to_string()
}
