//! Pagination – splits laid-out items into page windows.
//!
//! Page windows are ranges of document y. Text lines and images are atoms:
//! in [`AutoPaging::Text`] mode a window ends early rather than cut one.
//! Backgrounds and borders are clipped to each window they overlap.

use crate::render::layout::{Item, ItemKind};
use crate::render::AutoPaging;

/// Sub-pixel slack when comparing layout edges.
const TOLERANCE: f32 = 0.5;

/// One output page: the document range `[start, end)` and the items drawn
/// on it, still in document coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSlice {
    pub start: f32,
    pub end: f32,
    pub items: Vec<Item>,
}

/// Split `items` into pages `page_height` px tall. Always returns at least
/// one page.
pub fn paginate(
    items: &[Item],
    doc_height: f32,
    page_height: f32,
    mode: AutoPaging,
) -> Vec<PageSlice> {
    let page_height = page_height.max(1.0);
    let starts = match mode {
        AutoPaging::Off => vec![0.0],
        AutoPaging::Slice => fixed_starts(doc_height, page_height),
        AutoPaging::Text => text_starts(items, doc_height, page_height),
    };

    let mut pages: Vec<PageSlice> = starts
        .iter()
        .enumerate()
        .map(|(i, &start)| PageSlice {
            start,
            end: starts.get(i + 1).copied().unwrap_or(start + page_height),
            items: Vec::new(),
        })
        .collect();

    for item in items {
        if item.kind.is_atom() {
            match mode {
                // Slicing shows every part of an atom that reaches a page.
                AutoPaging::Slice => {
                    for page in pages.iter_mut() {
                        if item.y < page.end && item.bottom() > page.start {
                            page.items.push(item.clone());
                        }
                    }
                }
                AutoPaging::Text | AutoPaging::Off => {
                    let last = pages.len() - 1;
                    let index = pages
                        .iter()
                        .position(|p| item.y < p.end - TOLERANCE)
                        .unwrap_or(last);
                    if mode == AutoPaging::Off && item.y >= pages[0].end {
                        continue;
                    }
                    pages[index].items.push(item.clone());
                }
            }
        } else {
            for page in pages.iter_mut() {
                if let Some(clipped) = clip(item, page.start, page.end) {
                    page.items.push(clipped);
                }
            }
        }
    }

    log::debug!(
        "paginated {} item(s) into {} page(s) ({mode:?})",
        items.len(),
        pages.len()
    );
    pages
}

fn fixed_starts(doc_height: f32, page_height: f32) -> Vec<f32> {
    let mut starts = vec![0.0f32];
    let mut next = page_height;
    while next < doc_height - TOLERANCE {
        starts.push(next);
        next += page_height;
    }
    starts
}

fn text_starts(items: &[Item], doc_height: f32, page_height: f32) -> Vec<f32> {
    let mut atoms: Vec<(f32, f32)> = items
        .iter()
        .filter(|i| i.kind.is_atom())
        .map(|i| (i.y, i.height))
        .collect();
    atoms.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut starts = vec![0.0f32];
    let mut start = 0.0f32;
    for (y, height) in atoms {
        while y >= start + page_height {
            start += page_height;
            starts.push(start);
        }
        let crosses = y + height > start + page_height + TOLERANCE;
        // Taller than a page: nowhere to move it.
        if crosses && y > start + TOLERANCE && height <= page_height {
            start = y;
            starts.push(start);
        }
    }
    while start + page_height < doc_height - TOLERANCE {
        start += page_height;
        starts.push(start);
    }
    starts
}

/// Clip a background or border to the window `[start, end)`.
fn clip(item: &Item, start: f32, end: f32) -> Option<Item> {
    let top = item.y.max(start);
    let bottom = item.bottom().min(end);
    if bottom - top <= 0.0 {
        return None;
    }
    // A border's edges belong to the box; skip slivers that only carry one.
    if matches!(item.kind, ItemKind::Border { .. }) && bottom - top < TOLERANCE {
        return None;
    }
    Some(Item {
        y: top,
        height: bottom - top,
        ..item.clone()
    })
}
