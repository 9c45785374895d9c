//! # studydesk
//!
//! Turn a photo, an image file or a PDF of study material into one bounded
//! raster, ask a vision LLM to explain it, and keep the answers as notes.
//!
//! ## Why a single raster?
//!
//! Vision models take images, not documents. Stacking every page of a PDF
//! into one tall image lets the model read the material as a whole in a
//! single request. The cost is memory: a naïve stack of a long PDF at full
//! resolution can take gigabytes. Intake therefore runs under an
//! [`IntakeBudget`]:
//!
//! | Ceiling | Default | Checked |
//! |---------|---------|---------|
//! | pages   | 50      | before any page is rendered |
//! | page width | 1536 px | wider pages are scaled down |
//! | running height | 30 000 px | before each page buffer is allocated |
//! | composite size | 100 MiB (4 B/px) | before the composite is allocated |
//!
//! ## Pipeline Overview
//!
//! ```text
//! camera / image / PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL, sniff kind
//!  ├─ 2. Rasterize  pdfium, one page at a time (spawn_blocking)
//!  ├─ 3. Composite  stack pages, centred, 10 px apart, white background
//!  ├─ 4. Encode     PNG → base64 ImageData
//!  ├─ 5. Generate   one call to gemini-2.5-flash / gpt / claude / …
//!  └─ 6. Clean      strip emphasis markers, tidy whitespace
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use studydesk::{Assistant, IntakeSession, StudyConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = StudyConfig::default();
//!     let session = IntakeSession::from_config(&config);
//!     session.select_pdf("chapter3.pdf").await?;
//!
//!     let assistant = Assistant::from_config(config)?;
//!     let explanation = assistant.explain_selection(&session, None).await?;
//!     println!("{}", explanation.answer);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `studydesk` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assistant;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod notes;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;
pub mod update;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assistant::{resolve_provider, Assistant, Explanation};
pub use config::{IntakeBudget, Language, StudyConfig, StudyConfigBuilder, DEFAULT_MODEL};
pub use connectivity::Connectivity;
pub use error::{IntakeError, IntakeErrorKind, StudyError};
pub use notes::{NewNote, NoteStore, SavedNote};
pub use pipeline::rasterize::{OpenDocument, PageSource, PdfFile};
pub use progress::{IntakeProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{CompositeRaster, IntakeSession, IntakeState, RasterInfo, SourceKind};
pub use update::{UpdateChecker, UpdateStatus, VersionInfo};
