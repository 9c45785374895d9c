//! Page compositor: stack rasterised pages into one tall image.
//!
//! Pages go top to bottom in document order, `spacing` pixels apart, each
//! horizontally centred on a white canvas as wide as the widest page.

use crate::error::IntakeError;
use crate::pipeline::budget::stacked_height;
use crate::pipeline::rasterize::{alloc_rgba, RasterPage};
use image::RgbaImage;
use tracing::debug;

/// Where each page landed on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub index: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Canvas size and per-page offsets for pages of the given sizes.
pub fn layout(sizes: &[(u32, u32)], spacing: u32) -> ((u32, u64), Vec<Placement>) {
    let max_width = sizes.iter().map(|&(w, _)| w).max().unwrap_or(0);
    let total_height = stacked_height(sizes.iter().map(|&(_, h)| h), spacing);

    let mut y = 0u32;
    let placements = sizes
        .iter()
        .enumerate()
        .map(|(index, &(width, height))| {
            let p = Placement {
                index,
                x: (max_width - width) / 2,
                y,
                width,
                height,
            };
            y = y.saturating_add(height).saturating_add(spacing);
            p
        })
        .collect();

    ((max_width, total_height), placements)
}

/// Draw `pages` onto a fresh white canvas, consuming them.
///
/// Each page buffer is released as soon as it has been copied. The caller
/// must already have checked the projected size against the byte budget;
/// the canvas is still allocated fallibly.
pub fn composite(pages: Vec<RasterPage>, spacing: u32) -> Result<RgbaImage, IntakeError> {
    let sizes: Vec<(u32, u32)> = pages.iter().map(|p| (p.width(), p.height())).collect();
    let ((width, height), placements) = layout(&sizes, spacing);
    let page_count = pages.len();

    let height = u32::try_from(height).map_err(|_| IntakeError::OutOfMemory {
        requested_bytes: u64::from(width).saturating_mul(height).saturating_mul(4),
        pages: Some(page_count),
    })?;
    let mut canvas = alloc_rgba(width, height).map_err(|e| match e {
        IntakeError::OutOfMemory { requested_bytes, .. } => IntakeError::OutOfMemory {
            requested_bytes,
            pages: Some(page_count),
        },
        other => other,
    })?;

    for (page, at) in pages.into_iter().zip(placements) {
        image::imageops::replace(&mut canvas, &page.pixels, i64::from(at.x), i64::from(at.y));
        debug!("Placed page {} at ({}, {})", page.index + 1, at.x, at.y);
    }

    Ok(canvas)
}
