//! # snapshot-forge – snapshot a region of a live document into a PDF
//!
//! An export takes one element of a [`page::Page`] and runs it through a
//! fixed sequence:
//!
//! 1. **Clone** – deep-copy the target and stage it off-screen ([`export`])
//! 2. **Normalize** – replace every `<canvas>` with a PNG `<img>` ([`normalize`])
//! 3. **Wait** – load the clone's images and block until each one has
//!    loaded or failed ([`loader`], [`barrier`])
//! 4. **Render** – lay out, paginate and encode via a [`render::Paginator`]
//! 5. **Save** – write the file, then remove the clone
//!
//! The live document model lives in [`dom`], with [`selector`] and [`css`]
//! covering the selector and inline-style subset it understands, and
//! [`surface`] holding canvas pixels.

pub mod barrier;
pub mod config;
pub mod css;
pub mod dom;
pub mod error;
pub mod export;
pub mod loader;
pub mod normalize;
pub mod page;
pub mod render;
pub mod selector;
pub mod surface;

// Re-exports for convenience
pub use barrier::{wait_for_images, ImageOutcome, ReadinessBarrier, ReadinessReport};
pub use config::ExportOptions;
pub use dom::{Document, DomNode, NodeId};
pub use error::ExportError;
pub use export::{export_html_file, export_pdf, ExportReport, Target};
pub use normalize::normalize_surfaces;
pub use page::Page;
pub use render::{Paginator, PdfPaginator, RenderOptions, RenderedDocument};
