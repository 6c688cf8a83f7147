//! Export orchestrator – clone, stage, normalize, wait for images, render,
//! save, clean up.
//!
//! The clone lives in the shared page for the whole export so that image
//! loads and layout see it the way they would see any other attached node.
//! A [`CloneGuard`] removes it again on every exit path: success, early
//! error, panic, or the export future being dropped mid-await.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::barrier::{ReadinessBarrier, ReadinessReport};
use crate::config::{ExportOptions, StagingOptions};
use crate::dom::{Document, DomNode, NodeId};
use crate::error::{DomError, ExportError};
use crate::loader::start_image_loads;
use crate::normalize::normalize_surfaces;
use crate::page::Page;
use crate::render::Paginator;

/// What to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// First element matching a CSS selector, in document order.
    Selector(String),
    Node(NodeId),
}

impl From<&str> for Target {
    fn from(selector: &str) -> Self {
        Target::Selector(selector.to_string())
    }
}

impl From<String> for Target {
    fn from(selector: String) -> Self {
        Target::Selector(selector)
    }
}

impl From<NodeId> for Target {
    fn from(node: NodeId) -> Self {
        Target::Node(node)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Selector(s) => f.write_str(s),
            Target::Node(id) => write!(f, "node #{}", id.index()),
        }
    }
}

/// Summary of a finished export.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub path: PathBuf,
    pub page_count: usize,
    pub surfaces_converted: usize,
    pub surfaces_skipped: usize,
    pub images: ReadinessReport,
}

/// Owns one staged clone; dropping it detaches and frees the clone.
struct CloneGuard {
    page: Page,
    node: NodeId,
}

impl Drop for CloneGuard {
    fn drop(&mut self) {
        let node = self.node;
        self.page.with(|doc| doc.destroy(node));
        log::debug!("removed staged clone {node:?}");
    }
}

/// Export `target` from `page` as a paginated document.
///
/// Nothing is cloned when the target cannot be resolved. Otherwise the
/// steps run in strict order and the clone is gone from the page by the
/// time this returns, whatever the outcome.
pub async fn export_pdf<P: Paginator>(
    page: &Page,
    target: impl Into<Target>,
    options: &ExportOptions,
    paginator: &P,
) -> Result<ExportReport, ExportError> {
    let target = target.into();

    let clone = page.with(|doc| stage_clone(doc, &target, &options.staging))?;
    let guard = CloneGuard {
        page: page.clone(),
        node: clone,
    };
    log::debug!("staged clone {clone:?} of {target}");

    // Arm before any load starts so no event can slip past the barrier.
    let (normalized, barrier) = page.with(|doc| {
        let normalized = normalize_surfaces(doc, clone);
        (normalized, ReadinessBarrier::arm(doc, clone))
    });
    let loads = start_image_loads(page, clone, options.base_dir());
    log::debug!(
        "waiting on {} image(s), {} load(s) started",
        barrier.pending(),
        loads.len()
    );
    let images = match options.image_timeout {
        Some(limit) => barrier.wait_with_timeout(limit).await,
        None => barrier.wait().await,
    };

    let fragment: DomNode = page
        .with(|doc| doc.snapshot(clone))
        .ok_or(DomError::UnknownNode(clone))?;
    let rendered = paginator.render(fragment, &options.render).await?;

    let path = options.output_path();
    rendered
        .save(&path)
        .await
        .map_err(|source| ExportError::Save {
            path: path.clone(),
            source,
        })?;
    log::info!(
        "saved {} ({} page(s), {} bytes)",
        path.display(),
        rendered.page_count,
        rendered.bytes.len()
    );

    drop(guard);
    Ok(ExportReport {
        path,
        page_count: rendered.page_count,
        surfaces_converted: normalized.converted.len(),
        surfaces_skipped: normalized.skipped.len(),
        images,
    })
}

/// Read an HTML file into a fresh page and export `target` from it.
/// Relative image sources resolve next to the file unless
/// `options.base_dir` says otherwise.
pub async fn export_html_file<P: Paginator>(
    input: &Path,
    target: impl Into<Target>,
    options: &ExportOptions,
    paginator: &P,
) -> Result<ExportReport, ExportError> {
    let html = tokio::fs::read_to_string(input)
        .await
        .map_err(|source| ExportError::Read {
            path: input.to_path_buf(),
            source,
        })?;
    let page = Page::from_html(&html);

    let mut options = options.clone();
    if options.base_dir.is_none() {
        options.base_dir = input.parent().map(Path::to_path_buf);
    }
    export_pdf(&page, target, &options, paginator).await
}

fn resolve_target(doc: &Document, target: &Target) -> Result<NodeId, ExportError> {
    let found = match target {
        Target::Selector(selector) => doc.query_selector(selector)?,
        Target::Node(id) => doc.element(*id).map(|_| *id),
    };
    found.ok_or_else(|| ExportError::TargetNotFound(target.to_string()))
}

/// Resolve, clone and attach the clone off-screen. On failure after the
/// clone exists it is freed before returning.
fn stage_clone(
    doc: &mut Document,
    target: &Target,
    staging: &StagingOptions,
) -> Result<NodeId, ExportError> {
    let source = resolve_target(doc, target)?;
    let width = doc.offset_width(source);
    let clone = doc.deep_clone(source)?;

    let staged = (|| {
        let width = format!("{width}px");
        let z_index = staging.z_index.to_string();
        let declarations = [
            ("position", "fixed"),
            ("top", "0"),
            ("left", "0"),
            ("z-index", z_index.as_str()),
            ("width", width.as_str()),
            ("background", staging.background.as_str()),
            ("min-height", staging.min_height.as_str()),
        ];
        for (property, value) in declarations {
            doc.set_style_property(clone, property, value)?;
        }
        let body = doc.body();
        doc.append_child(body, clone)
    })();
    if let Err(err) = staged {
        doc.destroy(clone);
        return Err(err.into());
    }
    Ok(clone)
}
