//! Input resolution: normalise a user-supplied path or URL to a local file
//! and classify it as a PDF or an image.
//!
//! pdfium needs a file-system path, so URLs are downloaded into a `TempDir`
//! that lives as long as the [`ResolvedInput`]. The file type is decided from
//! its leading bytes, never from the extension.

use crate::error::StudyError;
use image::ImageFormat;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// What kind of document a resolved input holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image(ImageFormat),
}

/// The resolved input: a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    Local { path: PathBuf, kind: InputKind },
    /// The `TempDir` keeps the download alive until the input is dropped.
    Downloaded {
        path: PathBuf,
        kind: InputKind,
        _temp_dir: TempDir,
    },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } | ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    pub fn kind(&self) -> InputKind {
        match self {
            ResolvedInput::Local { kind, .. } | ResolvedInput::Downloaded { kind, .. } => *kind,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Classify a file from its first bytes.
pub fn sniff_kind(head: &[u8]) -> Option<InputKind> {
    if head.starts_with(b"%PDF") {
        return Some(InputKind::Pdf);
    }
    image::guess_format(head).ok().map(InputKind::Image)
}

/// Resolve `input` to a local PDF or image file, downloading URLs.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, StudyError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.trim().is_empty() {
        Err(StudyError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, StudyError> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(StudyError::FileNotFound { path });
    }

    let mut head = [0u8; 16];
    let n = match std::fs::File::open(&path) {
        Ok(mut f) => f.read(&mut head).unwrap_or(0),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(StudyError::PermissionDenied { path });
        }
        Err(_) => return Err(StudyError::FileNotFound { path }),
    };

    let kind = classify(&path, &head[..n])?;
    debug!("Resolved local input: {} ({kind:?})", path.display());
    Ok(ResolvedInput::Local { path, kind })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, StudyError> {
    info!("Downloading from: {}", url);
    let failed = |reason: String| StudyError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            StudyError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::new().map_err(|e| StudyError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));
    let kind = classify(&file_path, &bytes[..bytes.len().min(16)])?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| StudyError::Internal(format!("Failed to write temp file: {e}")))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        kind,
        _temp_dir: temp_dir,
    })
}

fn classify(path: &Path, head: &[u8]) -> Result<InputKind, StudyError> {
    sniff_kind(head).ok_or_else(|| {
        let mut magic = [0u8; 4];
        let n = head.len().min(4);
        magic[..n].copy_from_slice(&head[..n]);
        StudyError::UnsupportedFile {
            path: path.to_path_buf(),
            magic,
        }
    })
}

fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "download.bin".to_string())
}
