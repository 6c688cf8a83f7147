//! Readiness barrier – one signal for "every image in this subtree is done".
//!
//! Arming is synchronous and subscribes to every image that still needs an
//! event, so no load or error dispatched after [`ReadinessBarrier::arm`]
//! can be missed. Waiting is a fan-in join over one explicit
//! [`ImageOutcome`] per image; it never fails.

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;

use crate::dom::{Document, Element, ImageState, NodeId, Tag};
use crate::page::Page;

/// How one pending image finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    Loaded,
    /// Load error, element destroyed, or timed out.
    Failed,
}

/// Tally of a finished barrier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    /// Complete with a non-zero natural width when armed.
    pub already_complete: usize,
    pub loaded: usize,
    pub failed: usize,
}

impl ReadinessReport {
    pub fn total(&self) -> usize {
        self.already_complete + self.loaded + self.failed
    }
}

/// Armed barrier over the `<img>` descendants of one container.
#[derive(Debug)]
pub struct ReadinessBarrier {
    already_complete: usize,
    pending: Vec<(NodeId, watch::Receiver<ImageState>)>,
}

impl ReadinessBarrier {
    /// Inspect every `<img>` below `container`. Images that are complete
    /// with a non-zero natural width count as ready; every other image is
    /// subscribed to and must see a later load or error event.
    pub fn arm(doc: &Document, container: NodeId) -> Self {
        let mut already_complete = 0;
        let mut pending = Vec::new();
        for img in doc.elements_by_tag(container, &Tag::Img) {
            let Some(slot) = doc.element(img).and_then(Element::image) else {
                continue;
            };
            let state = slot.state();
            if state.is_complete() && state.natural_width() != 0 {
                already_complete += 1;
            } else {
                pending.push((img, slot.subscribe()));
            }
        }
        log::debug!(
            "readiness barrier armed: {already_complete} ready, {} pending",
            pending.len()
        );
        Self {
            already_complete,
            pending,
        }
    }

    /// Images still awaiting an event.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Resolve once every pending image has fired load or error. No
    /// timeout: an image that never fires stalls this forever.
    pub async fn wait(self) -> ReadinessReport {
        self.join(None).await
    }

    /// Like [`wait`](Self::wait), but an image silent for longer than
    /// `limit` counts as failed.
    pub async fn wait_with_timeout(self, limit: Duration) -> ReadinessReport {
        self.join(Some(limit)).await
    }

    async fn join(self, limit: Option<Duration>) -> ReadinessReport {
        let waits = self.pending.into_iter().map(move |(node, rx)| async move {
            match limit {
                None => next_terminal_event(rx).await,
                Some(limit) => match tokio::time::timeout(limit, next_terminal_event(rx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        log::warn!("image {node:?} did not finish within {limit:?}; continuing without it");
                        ImageOutcome::Failed
                    }
                },
            }
        });
        let outcomes = join_all(waits).await;

        let mut report = ReadinessReport {
            already_complete: self.already_complete,
            ..ReadinessReport::default()
        };
        for outcome in outcomes {
            match outcome {
                ImageOutcome::Loaded => report.loaded += 1,
                ImageOutcome::Failed => report.failed += 1,
            }
        }
        log::debug!(
            "readiness barrier resolved: {} loaded, {} failed",
            report.loaded,
            report.failed
        );
        report
    }
}

async fn next_terminal_event(mut rx: watch::Receiver<ImageState>) -> ImageOutcome {
    loop {
        if rx.changed().await.is_err() {
            // Element freed while we waited.
            return ImageOutcome::Failed;
        }
        match &*rx.borrow_and_update() {
            ImageState::Loaded { .. } => return ImageOutcome::Loaded,
            ImageState::Broken => return ImageOutcome::Failed,
            ImageState::Unrequested | ImageState::Loading => {}
        }
    }
}

/// Arm against the shared page and wait.
pub async fn wait_for_images(page: &Page, container: NodeId) -> ReadinessReport {
    let barrier = page.with(|doc| ReadinessBarrier::arm(doc, container));
    barrier.wait().await
}
