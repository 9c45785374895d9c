//! Size budget guard: page-count, running-height and byte-size ceilings.
//!
//! Checks are staged so an oversized document fails as early as possible:
//!
//! ```text
//! page count ──▶ running height (per page, before its buffer exists) ──▶ final bytes
//! ```
//!
//! The final byte check runs before the composite buffer is allocated, so no
//! committed buffer ever exceeds `max_total_bytes`.

use crate::config::IntakeBudget;
use crate::error::IntakeError;
use tracing::debug;

/// Bytes per pixel of the RGBA8 buffers used throughout intake.
pub const BYTES_PER_PIXEL: u64 = 4;

/// Running totals for one intake.
#[derive(Debug)]
pub struct BudgetGuard {
    budget: IntakeBudget,
    height_so_far: u64,
    pages_seen: usize,
}

impl BudgetGuard {
    pub fn new(budget: IntakeBudget) -> Self {
        Self {
            budget,
            height_so_far: 0,
            pages_seen: 0,
        }
    }

    pub fn budget(&self) -> &IntakeBudget {
        &self.budget
    }

    /// Running height, spacing after every page included.
    pub fn height_so_far(&self) -> u64 {
        self.height_so_far
    }

    pub fn pages_seen(&self) -> usize {
        self.pages_seen
    }

    /// Fails with [`IntakeError::TooManyPages`] when `n > max_pages`.
    pub fn check_page_count(&self, n: usize) -> Result<(), IntakeError> {
        if n > self.budget.max_pages {
            return Err(IntakeError::TooManyPages {
                pages: n,
                max: self.budget.max_pages,
            });
        }
        Ok(())
    }

    /// Add one page (plus the inter-page gap) to the running height.
    ///
    /// On [`IntakeError::HeightExceeded`] the caller must drop every page it
    /// holds, including the one just counted.
    pub fn check_height_after_page(&mut self, page_height: u32) -> Result<(), IntakeError> {
        self.pages_seen += 1;
        self.height_so_far += u64::from(page_height) + u64::from(self.budget.inter_page_spacing);
        debug!(
            "Budget: page {} adds {}px → running height {}",
            self.pages_seen, page_height, self.height_so_far
        );

        if self.height_so_far > u64::from(self.budget.max_total_height) {
            return Err(IntakeError::HeightExceeded {
                height: self.height_so_far,
                max: self.budget.max_total_height,
                pages: self.pages_seen,
            });
        }
        Ok(())
    }

    /// Project the composite size and fail with [`IntakeError::SizeExceeded`]
    /// when it is over `max_total_bytes`. Returns the projected byte count.
    pub fn check_final_byte_size(&self, max_width: u32, total_height: u64) -> Result<u64, IntakeError> {
        let bytes = projected_bytes(max_width, total_height);
        if bytes > self.budget.max_total_bytes {
            return Err(IntakeError::SizeExceeded {
                bytes,
                max: self.budget.max_total_bytes,
                pages: self.pages_seen,
            });
        }
        Ok(bytes)
    }
}

/// `width * height * 4`, saturating instead of overflowing.
pub fn projected_bytes(width: u32, height: u64) -> u64 {
    u64::from(width)
        .saturating_mul(height)
        .saturating_mul(BYTES_PER_PIXEL)
}

/// Height of pages stacked with `spacing` between neighbours (not after the last).
pub fn stacked_height(heights: impl IntoIterator<Item = u32>, spacing: u32) -> u64 {
    let mut total = 0u64;
    let mut count = 0u64;
    for h in heights {
        total += u64::from(h);
        count += 1;
    }
    total + u64::from(spacing) * count.saturating_sub(1)
}
