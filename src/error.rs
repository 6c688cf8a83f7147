//! Error types for every stage of the export pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::dom::NodeId;

/// Tree manipulation and query failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("node {0:?} does not exist in this document")]
    UnknownNode(NodeId),

    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),

    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("node {0:?} already has a parent")]
    AlreadyAttached(NodeId),

    #[error("inserting {child:?} under {parent:?} would make it its own ancestor")]
    Cycle { parent: NodeId, child: NodeId },
}

/// Reasons a drawable surface cannot be snapshotted.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// Cross-origin pixels were drawn into the surface; reading it back is
    /// not allowed.
    #[error("surface is tainted by cross-origin content")]
    Tainted,

    #[error("surface has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Failures while fetching or decoding an `<img>` source.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("image has no src attribute")]
    MissingSrc,

    #[error("invalid data URI: {0}")]
    DataUri(String),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Failures raised by a [`crate::render::Paginator`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("layout failed: {0}")]
    Layout(String),

    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("render task aborted: {0}")]
    Task(String),
}

/// Failures loading an options file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level failure of one export operation.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("target element not found: {0}")]
    TargetNotFound(String),

    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("failed to save '{path}': {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_not_found_mentions_target() {
        let err = ExportError::TargetNotFound("#missing".to_string());
        assert_eq!(err.to_string(), "target element not found: #missing");
    }

    #[test]
    fn render_error_is_transparent() {
        let err: ExportError = RenderError::Pdf("boom".into()).into();
        assert_eq!(err.to_string(), "PDF generation failed: boom");
    }
}
