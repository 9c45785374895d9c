//! Error types for the studydesk library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IntakeError`]: a single intake (camera capture, image pick, PDF pick)
//!   could not produce a raster. Terminal for that intake only: the session
//!   stays usable and the user simply picks again. The `Display` text is the
//!   message shown to the user.
//!
//! * [`StudyError`]: an operation as a whole failed (file not found,
//!   provider not configured, generation call failed, database error).
//!   Intake errors are wrapped into it via `From` when they cross that
//!   boundary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

/// Why an intake failed.
///
/// Every variant is terminal for the current intake: nothing is retried and
/// no partial raster is ever exposed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeError {
    /// The document has more pages than the budget allows. Raised before any
    /// page is rasterised.
    #[error("PDF is too large! Maximum {max} pages allowed. Your PDF has {pages} pages.")]
    TooManyPages { pages: usize, max: usize },

    /// The running height (scaled page heights plus spacing) went over the
    /// ceiling while pages were being rasterised.
    #[error(
        "PDF is too large! The combined height exceeds the limit. \
         Try a PDF with fewer or smaller pages."
    )]
    HeightExceeded {
        /// Running height at the moment the check failed.
        height: u64,
        max: u32,
        /// Pages counted so far, including the one that overflowed.
        pages: usize,
    },

    /// Every page fit, but the composite buffer would be too large.
    #[error(
        "PDF is too large! The combined size ({}MB) exceeds the {}MB limit.",
        .bytes / MIB,
        .max / MIB
    )]
    SizeExceeded { bytes: u64, max: u64, pages: usize },

    /// A pixel buffer could not be allocated.
    #[error("Out of memory! PDF is too large. Please try a smaller PDF.")]
    OutOfMemory {
        requested_bytes: u64,
        pages: Option<usize>,
    },

    /// The source could not be decoded (bad image bytes, unreadable PDF,
    /// render failure).
    #[error("Error processing file: {detail}")]
    DecodeFailure { detail: String },

    /// A newer selection or a clear superseded this intake.
    #[error("Intake was cancelled by a newer selection")]
    Cancelled,
}

/// Discriminant of [`IntakeError`], handy for matching and serialising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntakeErrorKind {
    TooManyPages,
    HeightExceeded,
    SizeExceeded,
    OutOfMemory,
    DecodeFailure,
    Cancelled,
}

impl IntakeError {
    pub fn kind(&self) -> IntakeErrorKind {
        match self {
            IntakeError::TooManyPages { .. } => IntakeErrorKind::TooManyPages,
            IntakeError::HeightExceeded { .. } => IntakeErrorKind::HeightExceeded,
            IntakeError::SizeExceeded { .. } => IntakeErrorKind::SizeExceeded,
            IntakeError::OutOfMemory { .. } => IntakeErrorKind::OutOfMemory,
            IntakeError::DecodeFailure { .. } => IntakeErrorKind::DecodeFailure,
            IntakeError::Cancelled => IntakeErrorKind::Cancelled,
        }
    }

    /// Number of pages the intake had seen when it failed, if known.
    pub fn page_count_observed(&self) -> Option<usize> {
        match self {
            IntakeError::TooManyPages { pages, .. }
            | IntakeError::HeightExceeded { pages, .. }
            | IntakeError::SizeExceeded { pages, .. } => Some(*pages),
            IntakeError::OutOfMemory { pages, .. } => *pages,
            IntakeError::DecodeFailure { .. } | IntakeError::Cancelled => None,
        }
    }

    pub(crate) fn decode(detail: impl Into<String>) -> Self {
        IntakeError::DecodeFailure {
            detail: detail.into(),
        }
    }
}

/// All operation-level errors returned by the studydesk library.
#[derive(Debug, Error)]
pub enum StudyError {
    // ── Intake ────────────────────────────────────────────────────────────
    #[error(transparent)]
    Intake(#[from] IntakeError),

    /// `explain` was called while the session held no raster.
    #[error("Nothing selected: capture, pick an image, or pick a PDF first")]
    NoSelection,

    #[error("Follow-up question is empty")]
    EmptyQuestion,

    // ── Input errors ──────────────────────────────────────────────────────
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file is neither a PDF nor an image format we can decode.
    #[error("Unsupported file '{path}': expected a PDF or an image (first bytes: {magic:?})")]
    UnsupportedFile { path: PathBuf, magic: [u8; 4] },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── External services ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Generation or version-check call failed. Not retried.
    #[error("{service} failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("No internet connection. Connect to a network and try again.")]
    NotConnected,

    // ── Notes ─────────────────────────────────────────────────────────────
    #[error("Note store error: {0}")]
    Database(String),

    #[error("Note {id} not found")]
    NoteNotFound { id: i64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StudyError {
    pub(crate) fn external(service: &str, message: impl Into<String>) -> Self {
        StudyError::ExternalService {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for StudyError {
    fn from(e: rusqlite::Error) -> Self {
        StudyError::Database(e.to_string())
    }
}
