//! Image loading for `<img>` elements of a live page.
//!
//! Each unrequested image gets one background task that fetches its
//! source, decodes it far enough to learn the natural size, and then
//! dispatches a load or error event back into the document.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use tokio::task::JoinHandle;

use crate::dom::{ImageEvent, ImageState, NodeId, Tag};
use crate::error::LoadError;
use crate::page::Page;

/// A fetched and measured image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub natural_width: u32,
    pub natural_height: u32,
    /// Data URL of the bytes, when the source was not a data URL.
    pub resolved_src: Option<String>,
}

/// Start loading every unrequested `<img>` below `container`. Relative
/// paths resolve against `base_dir`. An `<img>` without a `src` is marked
/// broken on the spot.
pub fn start_image_loads(page: &Page, container: NodeId, base_dir: &Path) -> Vec<JoinHandle<()>> {
    let jobs: Vec<(NodeId, String)> = page.with(|doc| {
        let mut jobs = Vec::new();
        for img in doc.elements_by_tag(container, &Tag::Img) {
            if doc.image_state(img) != Some(ImageState::Unrequested) {
                continue;
            }
            match doc.attribute(img, "src").map(str::trim) {
                Some(src) if !src.is_empty() => {
                    let src = src.to_string();
                    doc.begin_image_load(img);
                    jobs.push((img, src));
                }
                _ => {
                    log::debug!("image {img:?}: {}", LoadError::MissingSrc);
                    doc.dispatch_image_event(img, ImageEvent::Error);
                }
            }
        }
        jobs
    });

    jobs.into_iter()
        .map(|(img, src)| {
            let page = page.clone();
            let base_dir = base_dir.to_path_buf();
            tokio::spawn(async move {
                let event = match fetch_image(&src, &base_dir).await {
                    Ok(fetched) => ImageEvent::Load {
                        natural_width: fetched.natural_width,
                        natural_height: fetched.natural_height,
                        resolved_src: fetched.resolved_src,
                    },
                    Err(err) => {
                        log::debug!("image {img:?} failed to load from {}: {err}", preview(&src));
                        ImageEvent::Error
                    }
                };
                page.with(|doc| doc.dispatch_image_event(img, event));
            })
        })
        .collect()
}

/// Fetch `src` (data URL, http(s) URL, `file://` URL or path) and measure
/// it.
pub async fn fetch_image(src: &str, base_dir: &Path) -> Result<FetchedImage, LoadError> {
    let (bytes, inline) = if src.starts_with("data:") {
        (decode_data_uri(src)?, true)
    } else if src.starts_with("http://") || src.starts_with("https://") {
        let response = reqwest::get(src).await?.error_for_status()?;
        (response.bytes().await?.to_vec(), false)
    } else {
        let path = resolve_path(src, base_dir);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| LoadError::Io { path, source })?;
        (bytes, false)
    };

    let decoded = image::load_from_memory(&bytes)?;
    let resolved_src = (!inline).then(|| to_data_url(&bytes));
    Ok(FetchedImage {
        natural_width: decoded.width(),
        natural_height: decoded.height(),
        resolved_src,
    })
}

fn resolve_path(src: &str, base_dir: &Path) -> PathBuf {
    let raw = src.strip_prefix("file://").unwrap_or(src);
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Decode a `data:<mime>;base64,<data>` URI into raw bytes.
pub fn decode_data_uri(src: &str) -> Result<Vec<u8>, LoadError> {
    let rest = src
        .strip_prefix("data:")
        .ok_or_else(|| LoadError::DataUri(format!("not a data URI: {}", preview(src))))?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| LoadError::DataUri("missing ',' between header and data".into()))?;
    if !header.contains(";base64") {
        return Err(LoadError::DataUri(
            "only base64-encoded data URIs are supported".into(),
        ));
    }
    BASE64_STD
        .decode(data.trim())
        .map_err(|e| LoadError::DataUri(format!("base64 decode error: {e}")))
}

/// Wrap raw image bytes in a data URL, sniffing the MIME type.
pub fn to_data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    format!("data:{mime};base64,{}", BASE64_STD.encode(bytes))
}

fn preview(src: &str) -> &str {
    match src.char_indices().nth(60) {
        Some((i, _)) => &src[..i],
        None => src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::ReadinessBarrier;
    use crate::surface::Surface;

    fn png_data_url(w: u32, h: u32) -> String {
        Surface::new(w, h).to_data_url().unwrap()
    }

    #[test]
    fn data_uri_decoding() {
        assert_eq!(decode_data_uri("data:text/plain;base64,aGk=").unwrap(), b"hi");
        assert!(matches!(
            decode_data_uri("data:text/plain,hi"),
            Err(LoadError::DataUri(_))
        ));
        assert!(matches!(decode_data_uri("logo.png"), Err(LoadError::DataUri(_))));
    }

    #[tokio::test]
    async fn fetch_measures_data_urls() {
        let fetched = fetch_image(&png_data_url(7, 3), Path::new(".")).await.unwrap();
        assert_eq!((fetched.natural_width, fetched.natural_height), (7, 3));
        assert_eq!(fetched.resolved_src, None);
    }

    #[tokio::test]
    async fn fetch_reads_relative_files() {
        let dir = tempfile::tempdir().unwrap();
        let png = Surface::new(5, 2).to_png().unwrap();
        std::fs::write(dir.path().join("pic.png"), &png).unwrap();

        let fetched = fetch_image("pic.png", dir.path()).await.unwrap();
        assert_eq!((fetched.natural_width, fetched.natural_height), (5, 2));
        assert!(fetched
            .resolved_src
            .unwrap()
            .starts_with("data:image/png;base64,"));

        assert!(matches!(
            fetch_image("missing.png", dir.path()).await,
            Err(LoadError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn loads_dispatch_events_the_barrier_sees() {
        let html = format!(
            r#"<div><img src="{}"><img src="data:image/png;base64,bm90IGFuIGltYWdl"><img></div>"#,
            png_data_url(2, 2)
        );
        let page = Page::from_html(&html);
        let div = page.with(|doc| doc.children(doc.body())[0]);

        let barrier = page.with(|doc| ReadinessBarrier::arm(doc, div));
        // The src-less image is broken before any task runs.
        let handles = start_image_loads(&page, div, Path::new("."));
        assert_eq!(handles.len(), 2);

        let report = barrier.wait().await;
        assert_eq!(report.loaded, 1);
        assert_eq!(report.failed, 2);

        let states: Vec<_> = page.with(|doc| {
            doc.elements_by_tag(div, &Tag::Img)
                .into_iter()
                .map(|i| doc.image_state(i).unwrap())
                .collect()
        });
        assert_eq!(
            states,
            vec![
                ImageState::Loaded {
                    natural_width: 2,
                    natural_height: 2
                },
                ImageState::Broken,
                ImageState::Broken,
            ]
        );
        // Nothing left to do a second time.
        assert!(start_image_loads(&page, div, Path::new(".")).is_empty());
        // Broken images would need a fresh event to satisfy a new barrier.
        let rearmed = page.with(|doc| ReadinessBarrier::arm(doc, div));
        assert_eq!(rearmed.pending(), 2);
    }
}
