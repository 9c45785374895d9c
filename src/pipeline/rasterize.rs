//! Page rasterisation: render one page at a time into a bounded RGBA buffer.
//!
//! ## Why cap width, not DPI?
//!
//! Study material is read top to bottom, so pages are stacked vertically and
//! only their width has to agree. Pages wider than `max_page_width` are
//! scaled down with their aspect ratio kept; narrower pages render at their
//! native size (one pixel per PDF point).
//!
//! Buffers are always 32-bit RGBA. A 16-bit format halves memory but was
//! found to corrupt rendered output, so it is never used.
//!
//! Rendering runs on a blocking worker (see [`crate::session`]); pdfium keeps
//! thread-local state and must not be driven from async tasks.

use crate::error::{IntakeError, StudyError};
use crate::pipeline::budget::{projected_bytes, BudgetGuard};
use crate::progress::IntakeProgressCallback;
use image::RgbaImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One rasterised page, owned by the running intake until it is moved into
/// the compositor. Dropping it releases the pixel buffer.
#[derive(Debug)]
pub struct RasterPage {
    /// 0-based page index in the source document.
    pub index: usize,
    pub pixels: RgbaImage,
}

impl RasterPage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// A paged document that can be rendered one page at a time.
///
/// `page_size` must be cheap: it is called before any buffer is allocated so
/// the budget guard can reject a page without rendering it.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Native size of page `index` in pixels (PDF points for pdfium).
    fn page_size(&self, index: usize) -> Result<(u32, u32), IntakeError>;

    /// Render page `index` into `target`, which is already sized and filled
    /// opaque white.
    fn render_into(&self, index: usize, target: &mut RgbaImage) -> Result<(), IntakeError>;
}

/// Scale `(width, height)` so the width does not exceed `max_width`.
///
/// Pages at or below the cap keep their native size. Scaled sizes are
/// truncated, matching integer pixel bitmaps.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled_h = u64::from(height) * u64::from(max_width) / u64::from(width);
    (max_width, (scaled_h as u32).max(1))
}

/// Allocate an opaque white RGBA buffer, reporting allocation failure as
/// [`IntakeError::OutOfMemory`] instead of aborting the process.
pub fn alloc_rgba(width: u32, height: u32) -> Result<RgbaImage, IntakeError> {
    let bytes = projected_bytes(width, u64::from(height));
    let oom = || IntakeError::OutOfMemory {
        requested_bytes: bytes,
        pages: None,
    };
    let len = usize::try_from(bytes).map_err(|_| oom())?;

    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| oom())?;
    buf.resize(len, 0xFF);

    RgbaImage::from_raw(width, height, buf).ok_or_else(oom)
}

/// Render a single page at its budgeted scale.
pub fn rasterize_page<S: PageSource + ?Sized>(
    source: &S,
    index: usize,
    max_page_width: u32,
) -> Result<RasterPage, IntakeError> {
    let (native_w, native_h) = source.page_size(index)?;
    let (w, h) = scaled_dimensions(native_w, native_h, max_page_width);
    let mut pixels = alloc_rgba(w, h)?;
    source.render_into(index, &mut pixels)?;
    Ok(RasterPage { index, pixels })
}

/// Rasterise every page of `source` in order under `guard`.
///
/// The running height is checked with each page's scaled height *before*
/// its buffer is allocated. On any failure the pages rendered so far are
/// dropped with the returned error. `is_cancelled` is polled between pages.
pub fn rasterize_document<S: PageSource + ?Sized>(
    source: &S,
    guard: &mut BudgetGuard,
    is_cancelled: &dyn Fn() -> bool,
    progress: Option<&dyn IntakeProgressCallback>,
) -> Result<Vec<RasterPage>, IntakeError> {
    let total = source.page_count();
    guard.check_page_count(total)?;
    if total == 0 {
        return Err(IntakeError::decode("document has no pages"));
    }
    if let Some(cb) = progress {
        cb.on_intake_start(total);
    }

    let max_width = guard.budget().max_page_width;
    let mut pages: Vec<RasterPage> = Vec::with_capacity(total);

    for index in 0..total {
        if is_cancelled() {
            debug!("Intake cancelled before page {}", index + 1);
            return Err(IntakeError::Cancelled);
        }

        let (native_w, native_h) = source.page_size(index)?;
        let (_, scaled_h) = scaled_dimensions(native_w, native_h, max_width);
        guard.check_height_after_page(scaled_h)?;

        let page = rasterize_page(source, index, max_width).map_err(|e| match e {
            IntakeError::OutOfMemory { requested_bytes, .. } => IntakeError::OutOfMemory {
                requested_bytes,
                pages: Some(index + 1),
            },
            other => other,
        })?;

        debug!(
            "Rasterised page {} → {}x{} px",
            index + 1,
            page.width(),
            page.height()
        );
        if let Some(cb) = progress {
            cb.on_page_rasterized(index + 1, total, page.width(), page.height());
        }
        pages.push(page);
    }

    Ok(pages)
}

// ── pdfium backend ───────────────────────────────────────────────────────

/// Bind to pdfium: `PDFIUM_LIB_PATH` (a directory or the library file)
/// first, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, StudyError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        let p = PathBuf::from(&path);
        if !p.exists() {
            return Err(StudyError::PdfiumBindingFailed(format!(
                "PDFIUM_LIB_PATH is set to '{path}' but the path does not exist"
            )));
        }
        let lib = if p.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            p
        };
        let bindings = Pdfium::bind_to_library(&lib)
            .map_err(|e| StudyError::PdfiumBindingFailed(format!("{}: {e}", lib.display())))?;
        return Ok(Pdfium::new(bindings));
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| StudyError::PdfiumBindingFailed(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}

/// [`PageSource`] over an open pdfium document.
pub struct PdfiumSource<'doc, 'lib> {
    document: &'doc PdfDocument<'lib>,
}

impl<'doc, 'lib> PdfiumSource<'doc, 'lib> {
    pub fn new(document: &'doc PdfDocument<'lib>) -> Self {
        Self { document }
    }

    fn page(&self, index: usize) -> Result<PdfPage<'lib>, IntakeError> {
        let idx = u16::try_from(index)
            .map_err(|_| IntakeError::decode(format!("page index {index} out of range")))?;
        self.document
            .pages()
            .get(idx)
            .map_err(|e| IntakeError::decode(format!("page {}: {e:?}", index + 1)))
    }
}

impl PageSource for PdfiumSource<'_, '_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_size(&self, index: usize) -> Result<(u32, u32), IntakeError> {
        let page = self.page(index)?;
        let w = page.width().value.round().max(1.0) as u32;
        let h = page.height().value.round().max(1.0) as u32;
        Ok((w, h))
    }

    fn render_into(&self, index: usize, target: &mut RgbaImage) -> Result<(), IntakeError> {
        let page = self.page(index)?;
        let config = PdfRenderConfig::new()
            .set_target_width(target.width() as i32)
            .set_target_height(target.height() as i32);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| IntakeError::decode(format!("render page {}: {e:?}", index + 1)))?;
        let rendered = bitmap.as_image().into_rgba8();
        image::imageops::overlay(target, &rendered, 0, 0);
        Ok(())
    }
}

/// Something that can open a paged document and lend it to one intake.
///
/// The document only lives for the duration of `with_pages`, which runs on
/// the intake's blocking worker. Any owned [`PageSource`] is an
/// `OpenDocument` already.
pub trait OpenDocument: Send + 'static {
    fn with_pages<T>(
        self,
        f: impl FnOnce(&dyn PageSource) -> Result<T, IntakeError>,
    ) -> Result<T, IntakeError>;
}

impl<S: PageSource + Send + 'static> OpenDocument for S {
    fn with_pages<T>(
        self,
        f: impl FnOnce(&dyn PageSource) -> Result<T, IntakeError>,
    ) -> Result<T, IntakeError> {
        f(&self)
    }
}

/// A PDF on disk, opened with pdfium when the intake starts.
#[derive(Debug, Clone)]
pub struct PdfFile {
    path: PathBuf,
}

impl PdfFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OpenDocument for PdfFile {
    fn with_pages<T>(
        self,
        f: impl FnOnce(&dyn PageSource) -> Result<T, IntakeError>,
    ) -> Result<T, IntakeError> {
        let pdfium = bind_pdfium().map_err(|e| IntakeError::decode(e.to_string()))?;
        // Load failures (corrupt file, password required) carry pdfium's detail.
        let document = pdfium
            .load_pdf_from_file(&self.path, None)
            .map_err(|e| IntakeError::decode(format!("{}: {e:?}", self.path.display())))?;
        info!(
            "PDF loaded: {} ({} pages)",
            self.path.display(),
            document.pages().len()
        );
        f(&PdfiumSource::new(&document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntakeBudget;
    use crate::error::IntakeErrorKind;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pages of fixed native sizes, each rendered as a solid colour.
    struct SolidPages {
        sizes: Vec<(u32, u32)>,
        renders: AtomicUsize,
    }

    impl SolidPages {
        fn new(sizes: &[(u32, u32)]) -> Self {
            Self {
                sizes: sizes.to_vec(),
                renders: AtomicUsize::new(0),
            }
        }
    }

    impl PageSource for SolidPages {
        fn page_count(&self) -> usize {
            self.sizes.len()
        }

        fn page_size(&self, index: usize) -> Result<(u32, u32), IntakeError> {
            Ok(self.sizes[index])
        }

        fn render_into(&self, index: usize, target: &mut RgbaImage) -> Result<(), IntakeError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            let shade = (index as u8).wrapping_mul(40);
            for px in target.pixels_mut() {
                *px = Rgba([shade, 0, 0, 255]);
            }
            Ok(())
        }
    }

    #[test]
    fn scaling_caps_width_and_keeps_aspect() {
        assert_eq!(scaled_dimensions(2000, 3000, 1536), (1536, 2304));
        assert_eq!(scaled_dimensions(1000, 3000, 1536), (1000, 3000));
        assert_eq!(scaled_dimensions(1536, 100, 1536), (1536, 100));
        assert_eq!(scaled_dimensions(1537, 1, 1536), (1536, 1));
    }

    #[test]
    fn alloc_is_opaque_white() {
        let img = alloc_rgba(3, 2).unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert!(img.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn absurd_allocation_is_out_of_memory() {
        let err = alloc_rgba(u32::MAX, u32::MAX).unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::OutOfMemory);
    }

    #[test]
    fn rasterize_page_scales_wide_page() {
        let src = SolidPages::new(&[(3072, 200)]);
        let page = rasterize_page(&src, 0, 1536).unwrap();
        assert_eq!((page.width(), page.height()), (1536, 100));
    }

    #[test]
    fn document_over_page_limit_renders_nothing() {
        let src = SolidPages::new(&vec![(10, 10); 51]);
        let mut guard = BudgetGuard::new(IntakeBudget::default());
        let err = rasterize_document(&src, &mut guard, &|| false, None).unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::TooManyPages);
        assert_eq!(src.renders.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn height_overflow_stops_before_rendering_the_page() {
        let src = SolidPages::new(&[(100, 20_000), (100, 9_000), (100, 5_000)]);
        let mut guard = BudgetGuard::new(IntakeBudget::default());
        let err = rasterize_document(&src, &mut guard, &|| false, None).unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::HeightExceeded);
        assert_eq!(err.page_count_observed(), Some(3));
        // Pages 1 and 2 were rendered; page 3 was rejected before allocation.
        assert_eq!(src.renders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancellation_is_polled_between_pages() {
        let src = SolidPages::new(&[(10, 10), (10, 10), (10, 10)]);
        let mut guard = BudgetGuard::new(IntakeBudget::default());
        let polls = AtomicUsize::new(0);
        let cancel_after_first = || polls.fetch_add(1, Ordering::SeqCst) >= 1;
        let err = rasterize_document(&src, &mut guard, &cancel_after_first, None).unwrap_err();
        assert_eq!(err, IntakeError::Cancelled);
        assert_eq!(src.renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_page_allocation_is_out_of_memory() {
        let budget = IntakeBudget {
            max_page_width: u32::MAX,
            max_total_height: u32::MAX,
            max_total_bytes: u64::MAX,
            ..IntakeBudget::default()
        };
        // Second page needs about 16 EiB, past any allocator's limit.
        let src = SolidPages::new(&[(10, 10), (u32::MAX / 2, u32::MAX / 2)]);
        let mut guard = BudgetGuard::new(budget);
        let err = rasterize_document(&src, &mut guard, &|| false, None).unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::OutOfMemory);
        assert_eq!(err.page_count_observed(), Some(2));
        assert_eq!(src.renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_document_is_a_decode_failure() {
        let src = SolidPages::new(&[]);
        let mut guard = BudgetGuard::new(IntakeBudget::default());
        let err = rasterize_document(&src, &mut guard, &|| false, None).unwrap_err();
        assert_eq!(err.kind(), IntakeErrorKind::DecodeFailure);
    }
}
