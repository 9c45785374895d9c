//! Pipeline stages from a user-supplied document to a model answer.
//!
//! Each submodule implements one transformation step and is testable on its
//! own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ rasterize ──▶ composite ──▶ encode ──▶ llm ──▶ postprocess
//! (path/URL) (per page,    (stack,      (base64)   (VLM)   (cleanup)
//!            under budget)  centre)
//! ```
//!
//! 1. [`input`]     resolve a path or URL to a local file and sniff its kind
//! 2. [`rasterize`] render pages one at a time into bounded RGBA buffers;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`budget`]    page-count, running-height and byte-size ceilings checked
//!    before each allocation
//! 4. [`composite`] stack accepted pages on a white canvas
//! 5. [`encode`]    PNG-encode and base64-wrap the composite
//! 6. [`llm`]       one generation call, no retry; the only stage with
//!    network I/O
//! 7. [`postprocess`] strip emphasis markers and tidy whitespace

pub mod budget;
pub mod composite;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod rasterize;
