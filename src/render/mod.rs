//! Rendering backend – turns a prepared subtree into a paginated PDF.
//!
//! The export pipeline only talks to the [`Paginator`] trait. The built-in
//! [`PdfPaginator`] runs four stages on a blocking worker:
//!
//! 1. **Style** – tag defaults and inline `style` declarations ([`style`])
//! 2. **Layout** – block/flex layout with Taffy at the reference window
//!    width, flattened into draw items ([`layout`])
//! 3. **Paginate** – split items across pages per [`AutoPaging`] ([`paging`])
//! 4. **Emit** – PDF bytes via printpdf ([`pdf`])

pub mod layout;
pub mod paging;
pub mod pdf;
pub mod style;

use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dom::DomNode;
use crate::error::RenderError;

/// Page orientation. A format whose sides disagree with the orientation is
/// swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Physical unit of `format`, `width`, `x` and `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Mm,
    Pt,
    In,
    Px,
}

impl Unit {
    /// PDF points per one of this unit.
    pub fn points(self) -> f32 {
        match self {
            Unit::Mm => 72.0 / 25.4,
            Unit::Pt => 1.0,
            Unit::In => 72.0,
            Unit::Px => 72.0 / 96.0,
        }
    }
}

/// How content taller than a page is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoPaging {
    /// Break before any text line or image that would be cut.
    #[default]
    Text,
    /// Cut at fixed page heights regardless of content.
    Slice,
    /// One page; overflow is dropped.
    Off,
}

/// Layout parameters handed to the paginator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub orientation: Orientation,
    pub unit: Unit,
    /// Page `[width, height]` in `unit`.
    pub format: [f32; 2],
    pub auto_paging: AutoPaging,
    /// Width the content is scaled to, in `unit`.
    pub width: f32,
    /// CSS px width the content is laid out at before scaling.
    pub window_width: f32,
    /// Content origin offset from the page's left edge, in `unit`.
    pub x: f32,
    /// Content origin offset from the page's top edge, in `unit`.
    pub y: f32,
    /// Document title embedded in the PDF metadata.
    pub title: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            orientation: Orientation::Portrait,
            unit: Unit::Mm,
            format: [210.0, 297.1],
            auto_paging: AutoPaging::Text,
            width: 190.0,
            window_width: 794.0,
            x: 0.0,
            y: 0.0,
            title: "snapshot-forge output".to_string(),
        }
    }
}

impl RenderOptions {
    /// Page size in points after applying the orientation.
    pub fn page_size_pt(&self) -> (f32, f32) {
        let k = self.unit.points();
        let (a, b) = (self.format[0] * k, self.format[1] * k);
        match self.orientation {
            Orientation::Portrait => (a.min(b), a.max(b)),
            Orientation::Landscape => (a.max(b), a.min(b)),
        }
    }

    /// Points per CSS px of laid-out content.
    pub fn scale(&self) -> f32 {
        if self.window_width <= 0.0 {
            return 1.0;
        }
        self.width * self.unit.points() / self.window_width
    }

    /// Origin offsets in points.
    pub fn origin_pt(&self) -> (f32, f32) {
        let k = self.unit.points();
        (self.x * k, self.y * k)
    }

    /// Height of one page's content window in CSS px.
    pub fn page_content_height_px(&self) -> f32 {
        let (_, page_h) = self.page_size_pt();
        let (_, oy) = self.origin_pt();
        ((page_h - oy) / self.scale()).max(1.0)
    }
}

/// A finished document ready to be written out.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

impl RenderedDocument {
    /// Write the PDF to `path`, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, &self.bytes).await
    }
}

/// Lays out and paginates a prepared subtree.
pub trait Paginator {
    fn render(
        &self,
        fragment: DomNode,
        options: &RenderOptions,
    ) -> impl Future<Output = Result<RenderedDocument, RenderError>> + Send;
}

/// The built-in Taffy + printpdf paginator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfPaginator;

impl Paginator for PdfPaginator {
    fn render(
        &self,
        fragment: DomNode,
        options: &RenderOptions,
    ) -> impl Future<Output = Result<RenderedDocument, RenderError>> + Send {
        let options = options.clone();
        async move {
            tokio::task::spawn_blocking(move || render_blocking(&fragment, &options))
                .await
                .map_err(|e| RenderError::Task(e.to_string()))?
        }
    }
}

/// Synchronous body of [`PdfPaginator::render`].
pub fn render_blocking(
    fragment: &DomNode,
    options: &RenderOptions,
) -> Result<RenderedDocument, RenderError> {
    let laid_out = layout::layout_fragment(fragment, options.window_width)?;
    let pages = paging::paginate(
        &laid_out.items,
        laid_out.height,
        options.page_content_height_px(),
        options.auto_paging,
    );
    let page_count = pages.len();
    let bytes = pdf::write_pdf(&pages, options)?;
    log::debug!("rendered {page_count} page(s), {} bytes", bytes.len());
    Ok(RenderedDocument { bytes, page_count })
}
