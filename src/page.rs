//! Shared handle to a live document.

use std::sync::{Arc, Mutex, PoisonError};

use crate::dom::Document;

/// A document shared by concurrent exports and background image loads.
///
/// Access goes through [`Page::with`], which keeps every lock scoped to a
/// synchronous closure; nothing holds the document across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct Page {
    inner: Arc<Mutex<Document>>,
}

impl Page {
    pub fn new(doc: Document) -> Self {
        Self {
            inner: Arc::new(Mutex::new(doc)),
        }
    }

    pub fn from_html(html: &str) -> Self {
        Self::new(Document::parse(html))
    }

    /// Run `f` with exclusive access to the document.
    pub fn with<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        // A panic inside another closure leaves the tree structurally valid,
        // so a poisoned lock is still usable.
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
