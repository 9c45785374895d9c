//! Progress-callback trait for intake events.
//!
//! Inject an [`Arc<dyn IntakeProgressCallback>`] via
//! [`crate::config::StudyConfigBuilder::progress_callback`] to receive events
//! while a PDF is rasterised. The callback runs on the blocking worker that
//! does the rasterisation, so implementations must be `Send + Sync` and
//! should return quickly.
//!
//! # Example
//!
//! ```rust
//! use studydesk::{IntakeProgressCallback, StudyConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl IntakeProgressCallback for CountingCallback {
//!     fn on_page_rasterized(&self, page_num: usize, total_pages: usize, _w: u32, _h: u32) {
//!         let done = self.pages.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("page {page_num}/{total_pages} ({done} done)");
//!     }
//! }
//!
//! let config = StudyConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the intake pipeline as it works through a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait IntakeProgressCallback: Send + Sync {
    /// Called once the page count passed the budget check, before any page
    /// is rasterised.
    fn on_intake_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after each page has been rendered into its buffer.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    /// * `total_pages`: pages in the document
    /// * `width`, `height`: scaled raster size in pixels
    fn on_page_rasterized(&self, page_num: usize, total_pages: usize, width: u32, height: u32) {
        let _ = (page_num, total_pages, width, height);
    }

    /// Called when the composite raster is ready.
    fn on_intake_complete(&self, width: u32, height: u32) {
        let _ = (width, height);
    }

    /// Called when the intake fails, with the user-facing message.
    fn on_intake_error(&self, error: &str) {
        let _ = error;
    }

    /// Called when a newer selection, a clear or a dropped future cancelled
    /// the intake.
    fn on_intake_cancelled(&self) {}
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IntakeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::StudyConfig`].
pub type ProgressCallback = Arc<dyn IntakeProgressCallback>;
