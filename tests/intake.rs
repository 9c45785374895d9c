//! Integration tests for document intake through the public session API.
//!
//! Documents are synthetic `PageSource`s that paint each page a solid
//! colour, so these run without pdfium or any network access.
//!
//! Run with:
//!   cargo test --test intake

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use studydesk::{
    IntakeBudget, IntakeError, IntakeErrorKind, IntakeProgressCallback, IntakeSession,
    IntakeState, PageSource, SourceKind,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Pages of fixed native sizes, each painted with its own colour.
struct Painted {
    pages: Vec<((u32, u32), Rgba<u8>)>,
    renders: Arc<AtomicUsize>,
    delay: Duration,
    started: Arc<AtomicBool>,
}

impl Painted {
    fn new(pages: Vec<((u32, u32), Rgba<u8>)>) -> Self {
        Self {
            pages,
            renders: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    fn uniform(count: usize, size: (u32, u32)) -> Self {
        Self::new(vec![(size, Rgba([40, 40, 40, 255])); count])
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl PageSource for Painted {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, index: usize) -> Result<(u32, u32), IntakeError> {
        Ok(self.pages[index].0)
    }

    fn render_into(&self, index: usize, target: &mut RgbaImage) -> Result<(), IntakeError> {
        self.started.store(true, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        let colour = self.pages[index].1;
        for px in target.pixels_mut() {
            *px = colour;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl IntakeProgressCallback for Recorder {
    fn on_intake_start(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("start {total_pages}"));
    }

    fn on_page_rasterized(&self, page_num: usize, total: usize, width: u32, height: u32) {
        self.events
            .lock()
            .unwrap()
            .push(format!("page {page_num}/{total} {width}x{height}"));
    }

    fn on_intake_complete(&self, width: u32, height: u32) {
        self.events.lock().unwrap().push(format!("done {width}x{height}"));
    }

    fn on_intake_error(&self, _error: &str) {
        self.events.lock().unwrap().push("error".to_string());
    }

    fn on_intake_cancelled(&self) {
        self.events.lock().unwrap().push("cancelled".to_string());
    }
}

fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

fn session() -> IntakeSession {
    IntakeSession::new(IntakeBudget::default())
}

// ── Budget ceilings ──────────────────────────────────────────────────────────

#[tokio::test]
async fn more_than_fifty_pages_is_rejected_before_rendering() {
    let doc = Painted::uniform(51, (100, 100));
    let renders = Arc::clone(&doc.renders);
    let s = session();

    let err = s.select_document(doc).await.unwrap_err();

    assert_eq!(err, IntakeError::TooManyPages { pages: 51, max: 50 });
    assert_eq!(
        err.to_string(),
        "PDF is too large! Maximum 50 pages allowed. Your PDF has 51 pages."
    );
    assert_eq!(renders.load(Ordering::SeqCst), 0);
    assert_eq!(s.state(), IntakeState::Empty);
}

#[tokio::test]
async fn exactly_fifty_pages_is_accepted() {
    let s = session();
    let info = s.select_document(Painted::uniform(50, (10, 10))).await.unwrap();
    assert_eq!(info.page_count, 50);
    // 50 pages of 10 px plus 49 gaps of 10 px.
    assert_eq!(info.height, 50 * 10 + 49 * 10);
}

#[tokio::test]
async fn running_height_overflow_stops_the_intake() {
    // Each page counts 2900 px plus a 10 px gap; the 11th crosses 30 000 px.
    let doc = Painted::uniform(11, (1000, 2900));
    let renders = Arc::clone(&doc.renders);
    let s = session();

    let err = s.select_document(doc).await.unwrap_err();

    assert_eq!(err.kind(), IntakeErrorKind::HeightExceeded);
    assert_eq!(err.page_count_observed(), Some(11));
    assert!(renders.load(Ordering::SeqCst) <= 10);
    assert!(!s.has_selection());
    assert_eq!(s.state(), IntakeState::Empty);
}

#[tokio::test]
async fn composite_byte_ceiling_is_enforced() {
    let budget = IntakeBudget {
        max_total_bytes: 4 * 100 * 100,
        ..IntakeBudget::default()
    };
    let s = IntakeSession::new(budget);

    // 100 x (60 + 10 + 60) = 13 000 px > 10 000 px allowed.
    let err = s
        .select_document(Painted::uniform(2, (100, 60)))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        IntakeError::SizeExceeded {
            bytes: 4 * 100 * 130,
            max: 40_000,
            pages: 2,
        }
    );
    assert!(!s.has_selection());
}

// ── Layout ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pages_are_stacked_in_order_centred_on_white() {
    let red = Rgba([200, 0, 0, 255]);
    let blue = Rgba([0, 0, 200, 255]);
    let s = session();

    let info = s
        .select_document(Painted::new(vec![((300, 100), red), ((200, 200), blue)]))
        .await
        .unwrap();
    assert_eq!((info.width, info.height), (300, 310));

    let raster = s.take().unwrap();
    let img = raster.image();

    // Page A fills rows 0..=99.
    assert_eq!(*img.get_pixel(0, 0), red);
    assert_eq!(*img.get_pixel(299, 99), red);
    // Gap rows 100..=109 are white.
    for y in 100..110 {
        assert_eq!(*img.get_pixel(150, y), WHITE, "row {y}");
    }
    // Page B spans rows 110..=309, centred at x 50..=249.
    assert_eq!(*img.get_pixel(50, 110), blue);
    assert_eq!(*img.get_pixel(249, 309), blue);
    assert_eq!(*img.get_pixel(49, 200), WHITE);
    assert_eq!(*img.get_pixel(250, 200), WHITE);
}

#[tokio::test]
async fn wide_pages_are_scaled_to_the_width_cap() {
    let s = session();
    let info = s
        .select_document(Painted::new(vec![
            ((2000, 3000), Rgba([1, 1, 1, 255])),
            ((1000, 3000), Rgba([2, 2, 2, 255])),
            ((1200, 3000), Rgba([3, 3, 3, 255])),
        ]))
        .await
        .unwrap();

    // 2304 + 10 + 3000 + 10 + 3000
    assert_eq!((info.width, info.height), (1536, 8324));
    assert_eq!(info.page_count, 3);
    assert_eq!(info.source_kind, SourceKind::Pdf);
    assert!(info.source_file_name.ends_with(".pdf (3 pages)"));
}

#[tokio::test]
async fn progress_is_reported_per_page() {
    let recorder = Arc::new(Recorder::default());
    let s = session().with_progress(recorder.clone());

    s.select_document(Painted::uniform(2, (40, 20))).await.unwrap();

    assert_eq!(
        recorder.events(),
        ["start 2", "page 1/2 40x20", "page 2/2 40x20", "done 40x50"]
    );
}

#[tokio::test]
async fn failed_intake_reports_error_to_progress() {
    let recorder = Arc::new(Recorder::default());
    let s = session().with_progress(recorder.clone());

    s.select_document(Painted::uniform(51, (10, 10)))
        .await
        .unwrap_err();

    assert_eq!(recorder.events().last().map(String::as_str), Some("error"));
}

// ── Session lifecycle ────────────────────────────────────────────────────────

#[test]
fn clearing_twice_is_a_no_op() {
    let s = session();
    s.select_image(&png_bytes(4, 4)).unwrap();

    s.clear();
    assert_eq!(s.release_count(), 1);
    s.clear();
    assert_eq!(s.release_count(), 1);
    assert_eq!(s.state(), IntakeState::Empty);
    assert!(s.current().is_none());
}

#[test]
fn new_selection_releases_the_previous_raster_once() {
    let s = session();
    s.select_image(&png_bytes(4, 4)).unwrap();
    let info = s.select_image(&png_bytes(8, 2)).unwrap();

    assert_eq!(s.release_count(), 1);
    assert_eq!((info.width, info.height), (8, 2));
    assert_eq!(s.current(), Some(info));
}

#[test]
fn camera_capture_replaces_an_image() {
    let s = session();
    s.select_image(&png_bytes(4, 4)).unwrap();
    let info = s.select_camera(DynamicImage::new_rgb8(6, 3));

    assert_eq!(info.source_kind, SourceKind::Camera);
    assert_eq!(info.page_count, 1);
    assert_eq!(s.release_count(), 1);
}

#[test]
fn undecodable_image_keeps_the_previous_selection() {
    let s = session();
    let before = s.select_image(&png_bytes(5, 5)).unwrap();

    let err = s.select_image(&[0x00, 0x01, 0x02, 0x03]).unwrap_err();

    assert_eq!(err.kind(), IntakeErrorKind::DecodeFailure);
    assert!(err.to_string().starts_with("Error processing file: "));
    assert_eq!(s.current(), Some(before));
    assert_eq!(s.state(), IntakeState::Ready);
}

#[tokio::test]
async fn missing_pdf_is_a_decode_failure() {
    let s = session();
    let dir = tempfile::tempdir().unwrap();

    let err = s
        .select_pdf(dir.path().join("does-not-exist.pdf"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), IntakeErrorKind::DecodeFailure);
    assert_eq!(s.state(), IntakeState::Empty);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clearing_during_intake_cancels_it() {
    let doc = Painted::uniform(20, (50, 50)).slow(Duration::from_millis(25));
    let renders = Arc::clone(&doc.renders);
    let started = Arc::clone(&doc.started);
    let s = session();

    let worker = {
        let s = s.clone();
        tokio::spawn(async move { s.select_document(doc).await })
    };

    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    s.clear();

    let result = worker.await.unwrap();
    assert_eq!(result.unwrap_err(), IntakeError::Cancelled);
    assert!(renders.load(Ordering::SeqCst) < 20);
    assert!(!s.has_selection());
    assert_eq!(s.state(), IntakeState::Empty);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_selection_wins_over_running_intake() {
    let doc = Painted::uniform(20, (50, 50)).slow(Duration::from_millis(25));
    let started = Arc::clone(&doc.started);
    let s = session();

    let worker = {
        let s = s.clone();
        tokio::spawn(async move { s.select_document(doc).await })
    };

    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let info = s.select_image(&png_bytes(3, 3)).unwrap();

    assert_eq!(worker.await.unwrap().unwrap_err(), IntakeError::Cancelled);
    assert_eq!(s.current(), Some(info));
    assert_eq!(s.state(), IntakeState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_intake_future_cancels_it() {
    let doc = Painted::uniform(20, (50, 50)).slow(Duration::from_millis(20));
    let renders = Arc::clone(&doc.renders);
    let recorder = Arc::new(Recorder::default());
    let s = session().with_progress(recorder.clone());

    let timed_out = tokio::time::timeout(Duration::from_millis(60), s.select_document(doc)).await;
    assert!(timed_out.is_err());
    assert_eq!(s.state(), IntakeState::Empty);

    // Give the worker time to notice and stop.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(renders.load(Ordering::SeqCst) < 20);
    assert_eq!(s.state(), IntakeState::Empty);
    assert!(!s.has_selection());
    assert_eq!(recorder.events().last().map(String::as_str), Some("cancelled"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_intake_does_not_touch_a_newer_selection() {
    let doc = Painted::uniform(20, (50, 50)).slow(Duration::from_millis(20));
    let started = Arc::clone(&doc.started);
    let s = session();

    let intake = {
        let s = s.clone();
        tokio::spawn(async move { s.select_document(doc).await })
    };
    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let info = s.select_camera(DynamicImage::new_rgb8(2, 2));
    intake.abort();
    let _ = intake.await;

    assert_eq!(s.current(), Some(info));
    assert_eq!(s.state(), IntakeState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn superseded_intake_reports_cancellation_to_progress() {
    let doc = Painted::uniform(20, (50, 50)).slow(Duration::from_millis(20));
    let started = Arc::clone(&doc.started);
    let recorder = Arc::new(Recorder::default());
    let s = session().with_progress(recorder.clone());

    let worker = {
        let s = s.clone();
        tokio::spawn(async move { s.select_document(doc).await })
    };
    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    s.clear();

    assert_eq!(worker.await.unwrap().unwrap_err(), IntakeError::Cancelled);
    let events = recorder.events();
    assert_eq!(events.first().map(String::as_str), Some("start 20"));
    assert_eq!(events.last().map(String::as_str), Some("cancelled"));
    assert!(!events.iter().any(|e| e == "error"));
}
