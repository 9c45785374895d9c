//! Intake session: the user's current selection and its lifecycle.
//!
//! The session holds at most one [`CompositeRaster`]. Every new selection or
//! [`IntakeSession::clear`] releases the previous raster first and bumps a
//! generation counter; a PDF intake still running on a blocking worker polls
//! that counter between pages and abandons its work once superseded, so a
//! stale composite can never be installed.
//!
//! ```text
//!            select_pdf                    pages ok
//! Empty ──▶ Selecting ──▶ Rasterizing ──────────────▶ Ready
//!   ▲                          │ budget / decode error   │
//!   └──────────────────────────┴─────────────────────────┘
//!                                  clear / take
//! ```

use crate::config::{IntakeBudget, StudyConfig};
use crate::error::IntakeError;
use crate::pipeline::budget::{stacked_height, BudgetGuard};
use crate::pipeline::composite::composite;
use crate::pipeline::rasterize::{rasterize_document, OpenDocument, PageSource, PdfFile};
use crate::progress::{IntakeProgressCallback, ProgressCallback};
use image::{DynamicImage, ImageReader, Limits, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Where a raster came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    Camera,
    Image,
    Pdf,
}

/// Selection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeState {
    Empty,
    Selecting,
    Rasterizing,
    Ready,
}

/// The single analysable image produced by a successful intake.
///
/// Immutable once built. Dropping it releases the pixel buffer.
#[derive(Debug)]
pub struct CompositeRaster {
    image: RgbaImage,
    source_file_name: String,
    source_kind: SourceKind,
    page_count: usize,
}

impl CompositeRaster {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn source_file_name(&self) -> &str {
        &self.source_file_name
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    /// 1 for camera and image selections.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn byte_len(&self) -> usize {
        self.image.as_raw().len()
    }

    pub fn info(&self) -> RasterInfo {
        RasterInfo {
            width: self.width(),
            height: self.height(),
            source_file_name: self.source_file_name.clone(),
            source_kind: self.source_kind,
            page_count: self.page_count,
        }
    }
}

/// Metadata of a raster, without its pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RasterInfo {
    pub width: u32,
    pub height: u32,
    pub source_file_name: String,
    pub source_kind: SourceKind,
    pub page_count: usize,
}

#[derive(Debug)]
struct Inner {
    state: IntakeState,
    current: Option<CompositeRaster>,
    released: usize,
}

impl Inner {
    fn release_current(&mut self) {
        if let Some(old) = self.current.take() {
            debug!("Releasing {} ({} bytes)", old.source_file_name, old.byte_len());
            self.released += 1;
        }
    }
}

/// Owns the current selection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IntakeSession {
    inner: Arc<Mutex<Inner>>,
    generation: Arc<AtomicU64>,
    budget: IntakeBudget,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for IntakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeSession")
            .field("state", &self.state())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("budget", &self.budget)
            .finish()
    }
}

impl IntakeSession {
    pub fn new(budget: IntakeBudget) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: IntakeState::Empty,
                current: None,
                released: 0,
            })),
            generation: Arc::new(AtomicU64::new(0)),
            budget,
            progress: None,
        }
    }

    pub fn from_config(config: &StudyConfig) -> Self {
        let mut session = Self::new(config.budget);
        session.progress = config.progress_callback.clone();
        session
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn budget(&self) -> &IntakeBudget {
        &self.budget
    }

    pub fn state(&self) -> IntakeState {
        self.lock().state
    }

    pub fn has_selection(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Metadata of the held raster, if any.
    pub fn current(&self) -> Option<RasterInfo> {
        self.lock().current.as_ref().map(CompositeRaster::info)
    }

    /// Number of rasters this session has dropped (clear or replacement).
    /// Rasters handed out by [`take`](Self::take) are not counted.
    pub fn release_count(&self) -> usize {
        self.lock().released
    }

    /// Install a camera capture. Any previous raster is released and any
    /// running PDF intake is cancelled.
    pub fn select_camera(&self, capture: DynamicImage) -> RasterInfo {
        let raster = CompositeRaster {
            image: capture.into_rgba8(),
            source_file_name: format!("camera_{}.jpg", now_millis()),
            source_kind: SourceKind::Camera,
            page_count: 1,
        };
        self.replace(raster)
    }

    /// Decode an encoded camera frame and install it as a capture.
    ///
    /// Decoding runs under the same `max_total_bytes` ceiling as
    /// [`IntakeSession::select_image`]; on failure the previous selection
    /// is kept.
    pub fn select_camera_bytes(&self, bytes: &[u8]) -> Result<RasterInfo, IntakeError> {
        let image = decode_image(bytes, &self.budget)?;
        Ok(self.select_camera(DynamicImage::ImageRgba8(image)))
    }

    /// Decode `bytes` and install the image.
    ///
    /// Decoding happens before anything is touched: on
    /// [`IntakeError::DecodeFailure`] the previous selection stays as it was.
    /// Images whose decoded buffer would exceed `max_total_bytes` fail with
    /// [`IntakeError::OutOfMemory`].
    pub fn select_image(&self, bytes: &[u8]) -> Result<RasterInfo, IntakeError> {
        let image = decode_image(bytes, &self.budget)?;
        let raster = CompositeRaster {
            image,
            source_file_name: format!("image_{}.jpg", now_millis()),
            source_kind: SourceKind::Image,
            page_count: 1,
        };
        Ok(self.replace(raster))
    }

    /// Rasterise and composite the PDF at `path`.
    pub async fn select_pdf(&self, path: impl Into<PathBuf>) -> Result<RasterInfo, IntakeError> {
        self.select_document(PdfFile::new(path)).await
    }

    /// Run a full document intake on a blocking worker.
    ///
    /// The previous raster is released before the first page is rendered.
    /// Any failure leaves the session `Empty`; nothing is retried. If a newer
    /// selection or a clear happens meanwhile, the result is dropped and
    /// [`IntakeError::Cancelled`] is returned. Dropping the returned future
    /// cancels the intake the same way.
    pub async fn select_document<D: OpenDocument>(
        &self,
        document: D,
    ) -> Result<RasterInfo, IntakeError> {
        let generation = self.supersede(IntakeState::Rasterizing);
        let mut pending = PendingIntake {
            session: self,
            generation,
            done: false,
        };

        let budget = self.budget;
        let progress = self.progress.clone();
        let counter = Arc::clone(&self.generation);

        let outcome = tokio::task::spawn_blocking(move || {
            let is_cancelled = || counter.load(Ordering::SeqCst) != generation;
            document.with_pages(|source| {
                build_composite(source, budget, &is_cancelled, progress.as_deref())
            })
        })
        .await
        .unwrap_or_else(|e| Err(IntakeError::decode(format!("intake worker panicked: {e}"))));
        pending.done = true;

        let mut inner = self.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            // A newer selection owns the state now; drop whatever we built.
            drop(inner);
            debug!("Discarding superseded intake (generation {generation})");
            self.notify_cancelled();
            return Err(IntakeError::Cancelled);
        }

        match outcome {
            Ok((image, page_count)) => {
                let raster = CompositeRaster {
                    image,
                    source_file_name: format!("document_{}.pdf ({page_count} pages)", now_millis()),
                    source_kind: SourceKind::Pdf,
                    page_count,
                };
                let info = raster.info();
                info!(
                    "Intake ready: {} → {}x{} px",
                    info.source_file_name, info.width, info.height
                );
                inner.current = Some(raster);
                inner.state = IntakeState::Ready;
                Ok(info)
            }
            Err(e) => {
                warn!("Intake failed: {e}");
                inner.state = IntakeState::Empty;
                drop(inner);
                if let Some(cb) = &self.progress {
                    cb.on_intake_error(&e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Release the current raster and cancel any running intake.
    /// Calling it on an empty session does nothing.
    pub fn clear(&self) {
        let mut inner = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        inner.release_current();
        inner.state = IntakeState::Empty;
    }

    /// Hand the raster to an analysis request. The session becomes `Empty`.
    pub fn take(&self) -> Option<CompositeRaster> {
        let mut inner = self.lock();
        let raster = inner.current.take();
        if raster.is_some() {
            inner.state = IntakeState::Empty;
        }
        raster
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new selection: cancel running intakes, release the held
    /// raster, enter `next`. Returns the new generation.
    fn supersede(&self, next: IntakeState) -> u64 {
        let mut inner = self.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.release_current();
        inner.state = next;
        generation
    }

    /// Supersede and install `raster` in one step.
    fn replace(&self, raster: CompositeRaster) -> RasterInfo {
        let info = raster.info();
        let mut inner = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        inner.release_current();
        inner.current = Some(raster);
        inner.state = IntakeState::Ready;
        drop(inner);
        info!(
            "Selection ready: {} ({}x{})",
            info.source_file_name, info.width, info.height
        );
        info
    }

    fn notify_cancelled(&self) {
        if let Some(cb) = &self.progress {
            cb.on_intake_cancelled();
        }
    }
}

/// Cancels a document intake whose future is dropped before it finishes.
struct PendingIntake<'a> {
    session: &'a IntakeSession,
    generation: u64,
    done: bool,
}

impl Drop for PendingIntake<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = self.session.lock();
        // Only the intake that still owns the session may reset it.
        if self
            .session
            .generation
            .compare_exchange(
                self.generation,
                self.generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            inner.state = IntakeState::Empty;
            drop(inner);
            debug!("Intake {} dropped before completion", self.generation);
            self.session.notify_cancelled();
        }
    }
}

/// Budget-checked rasterise + composite of one document.
///
/// Returns the composite and the page count. Page buffers are dropped on
/// every error path before this returns.
pub fn build_composite(
    source: &dyn PageSource,
    budget: IntakeBudget,
    is_cancelled: &dyn Fn() -> bool,
    progress: Option<&dyn IntakeProgressCallback>,
) -> Result<(RgbaImage, usize), IntakeError> {
    let mut guard = BudgetGuard::new(budget);
    let pages = rasterize_document(source, &mut guard, is_cancelled, progress)?;
    if is_cancelled() {
        return Err(IntakeError::Cancelled);
    }

    let max_width = pages.iter().map(|p| p.width()).max().unwrap_or(0);
    let total_height = stacked_height(pages.iter().map(|p| p.height()), budget.inter_page_spacing);
    guard.check_final_byte_size(max_width, total_height)?;

    let page_count = pages.len();
    let image = composite(pages, budget.inter_page_spacing)?;
    if let Some(cb) = progress {
        cb.on_intake_complete(image.width(), image.height());
    }
    Ok((image, page_count))
}

fn decode_image(bytes: &[u8], budget: &IntakeBudget) -> Result<RgbaImage, IntakeError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| IntakeError::decode(e.to_string()))?;
    let mut limits = Limits::default();
    limits.max_alloc = Some(budget.max_total_bytes);
    reader.limits(limits);

    let decoded = reader.decode().map_err(|e| match e {
        image::ImageError::Limits(_) => IntakeError::OutOfMemory {
            requested_bytes: budget.max_total_bytes,
            pages: None,
        },
        other => IntakeError::decode(other.to_string()),
    })?;
    Ok(decoded.into_rgba8())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntakeErrorKind;
    use image::{ImageFormat, Rgba};

    struct Blank(Vec<(u32, u32)>);

    impl PageSource for Blank {
        fn page_count(&self) -> usize {
            self.0.len()
        }

        fn page_size(&self, index: usize) -> Result<(u32, u32), IntakeError> {
            Ok(self.0[index])
        }

        fn render_into(&self, _index: usize, _target: &mut RgbaImage) -> Result<(), IntakeError> {
            Ok(())
        }
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([9, 9, 9, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn new_session_is_empty() {
        let s = IntakeSession::new(IntakeBudget::default());
        assert_eq!(s.state(), IntakeState::Empty);
        assert!(s.current().is_none());
        assert_eq!(s.release_count(), 0);
    }

    #[test]
    fn camera_selection_names_file() {
        let s = IntakeSession::new(IntakeBudget::default());
        let info = s.select_camera(DynamicImage::new_rgba8(4, 3));
        assert_eq!(info.source_kind, SourceKind::Camera);
        assert!(info.source_file_name.starts_with("camera_"));
        assert!(info.source_file_name.ends_with(".jpg"));
        assert_eq!((info.width, info.height), (4, 3));
        assert_eq!(s.state(), IntakeState::Ready);
    }

    #[test]
    fn image_decode_failure_keeps_prior_selection() {
        let s = IntakeSession::new(IntakeBudget::default());
        s.select_image(&png_bytes(8, 8)).unwrap();
        let before = s.current().unwrap();

        let err = s.select_image(b"definitely not an image").unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::DecodeFailure);
        assert_eq!(s.current(), Some(before));
        assert_eq!(s.release_count(), 0);
        assert_eq!(s.state(), IntakeState::Ready);
    }

    #[test]
    fn oversized_image_is_out_of_memory() {
        let budget = IntakeBudget {
            max_total_bytes: 100,
            ..IntakeBudget::default()
        };
        let s = IntakeSession::new(budget);
        let err = s.select_image(&png_bytes(64, 64)).unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::OutOfMemory);
        assert!(!s.has_selection());
    }

    #[test]
    fn camera_bytes_respect_the_byte_ceiling() {
        let budget = IntakeBudget {
            max_total_bytes: 100,
            ..IntakeBudget::default()
        };
        let s = IntakeSession::new(budget);
        let err = s.select_camera_bytes(&png_bytes(64, 64)).unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::OutOfMemory);
        assert!(!s.has_selection());

        let s = IntakeSession::new(IntakeBudget::default());
        let info = s.select_camera_bytes(&png_bytes(6, 4)).unwrap();
        assert_eq!(info.source_kind, SourceKind::Camera);
        assert_eq!((info.width, info.height), (6, 4));
    }

    #[test]
    fn take_empties_without_counting_a_release() {
        let s = IntakeSession::new(IntakeBudget::default());
        s.select_camera(DynamicImage::new_rgba8(2, 2));
        let raster = s.take().unwrap();
        assert_eq!(raster.source_kind(), SourceKind::Camera);
        assert_eq!(s.state(), IntakeState::Empty);
        assert_eq!(s.release_count(), 0);
        assert!(s.take().is_none());
    }

    #[test]
    fn build_composite_rejects_oversized_bytes() {
        let budget = IntakeBudget {
            max_total_bytes: 1_000,
            ..IntakeBudget::default()
        };
        let err = build_composite(&Blank(vec![(20, 20)]), budget, &|| false, None).unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::SizeExceeded);
        assert_eq!(err.page_count_observed(), Some(1));
    }

    #[tokio::test]
    async fn document_intake_composites_pages() {
        let s = IntakeSession::new(IntakeBudget::default());
        let info = s.select_document(Blank(vec![(100, 50), (60, 40)])).await.unwrap();
        assert_eq!(info.source_kind, SourceKind::Pdf);
        assert_eq!((info.width, info.height), (100, 100));
        assert_eq!(info.page_count, 2);
        assert!(info.source_file_name.ends_with(".pdf (2 pages)"));
        assert_eq!(s.state(), IntakeState::Ready);
    }

    #[tokio::test]
    async fn failed_document_intake_leaves_session_empty() {
        let s = IntakeSession::new(IntakeBudget::default());
        s.select_camera(DynamicImage::new_rgba8(2, 2));

        let err = s.select_document(Blank(vec![(10, 10); 51])).await.unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::TooManyPages);
        assert_eq!(s.state(), IntakeState::Empty);
        assert!(!s.has_selection());
        assert_eq!(s.release_count(), 1);
    }
}
