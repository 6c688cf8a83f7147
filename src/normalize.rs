//! Surface normalizer – swaps every `<canvas>` in a subtree for a static
//! `<img>` carrying a PNG snapshot of its pixels.

use crate::dom::{Document, ImageEvent, NodeId, Tag};
use crate::error::{DomError, SurfaceError};

/// Outcome of one normalization pass.
#[derive(Debug, Default)]
pub struct NormalizeReport {
    /// `(canvas, replacement img)` pairs.
    pub converted: Vec<(NodeId, NodeId)>,
    /// Canvases left in place and why.
    pub skipped: Vec<(NodeId, SurfaceError)>,
}

/// Replace each `<canvas>` below `container` with an equivalent `<img>` at
/// the same child index. Best effort per element: a canvas whose snapshot
/// cannot be taken stays where it is and a warning is logged.
pub fn normalize_surfaces(doc: &mut Document, container: NodeId) -> NormalizeReport {
    let mut report = NormalizeReport::default();
    for canvas in doc.elements_by_tag(container, &Tag::Canvas) {
        match convert_canvas(doc, canvas) {
            Ok(Some(img)) => report.converted.push((canvas, img)),
            Ok(None) => {}
            Err(ConvertError::Surface(err)) => {
                log::warn!("canvas {canvas:?} left unconverted: {err}");
                report.skipped.push((canvas, err));
            }
            Err(ConvertError::Dom(err)) => {
                log::warn!("canvas {canvas:?} could not be replaced: {err}");
            }
        }
    }
    if !report.converted.is_empty() || !report.skipped.is_empty() {
        log::debug!(
            "normalized surfaces: {} converted, {} skipped",
            report.converted.len(),
            report.skipped.len()
        );
    }
    report
}

enum ConvertError {
    Surface(SurfaceError),
    Dom(DomError),
}

fn convert_canvas(doc: &mut Document, canvas: NodeId) -> Result<Option<NodeId>, ConvertError> {
    let Some(surface) = doc.surface(canvas) else {
        return Ok(None);
    };
    let src = surface.to_data_url().map_err(ConvertError::Surface)?;
    let (width, height) = (surface.width(), surface.height());
    let style = doc.style_text(canvas).to_string();
    let Some(parent) = doc.parent(canvas) else {
        return Ok(None);
    };

    let img = doc.create_element(Tag::Img);
    let built = (|| {
        doc.set_attribute(img, "src", &src)?;
        if !style.is_empty() {
            doc.set_attribute(img, "style", &style)?;
        }
        doc.set_attribute(img, "width", &width.to_string())?;
        doc.set_attribute(img, "height", &height.to_string())?;
        doc.replace_child(parent, img, canvas)
    })();
    if let Err(err) = built {
        doc.destroy(img);
        return Err(ConvertError::Dom(err));
    }
    // The pixels are already in hand, so the replacement is complete now.
    doc.dispatch_image_event(
        img,
        ImageEvent::Load {
            natural_width: width,
            natural_height: height,
            resolved_src: None,
        },
    );
    doc.destroy(canvas);
    Ok(Some(img))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ImageState;
    use crate::surface::Origin;
    use image::RgbaImage;

    #[test]
    fn replaces_canvas_in_place_with_attributes() {
        let mut doc = Document::parse(
            r##"<div><p>a</p><canvas width="40" height="20" style="border: 1px solid" data-fill="#ff0000"></canvas><p>b</p></div>"##,
        );
        let div = doc.children(doc.body())[0];
        let report = normalize_surfaces(&mut doc, div);
        assert_eq!(report.converted.len(), 1);
        assert!(report.skipped.is_empty());

        let img = doc.children(div)[1];
        assert_eq!(report.converted[0].1, img);
        assert_eq!(doc.tag(img), Some(&Tag::Img));
        assert_eq!(doc.attribute(img, "width"), Some("40"));
        assert_eq!(doc.attribute(img, "height"), Some("20"));
        assert_eq!(doc.attribute(img, "style"), Some("border: 1px solid"));
        assert!(doc
            .attribute(img, "src")
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(
            doc.image_state(img),
            Some(ImageState::Loaded {
                natural_width: 40,
                natural_height: 20
            })
        );
        assert!(doc.elements_by_tag(div, &Tag::Canvas).is_empty());
    }

    #[test]
    fn tainted_canvas_stays_and_siblings_convert() {
        let mut doc = Document::parse(
            "<div><canvas id='a'></canvas><canvas id='b'></canvas><span><canvas id='c'></canvas></span></div>",
        );
        let div = doc.children(doc.body())[0];
        let b = doc.query_selector("#b").unwrap().unwrap();
        doc.surface_mut(b)
            .unwrap()
            .draw_image(&RgbaImage::new(1, 1), 0, 0, Origin::CrossOrigin);

        let report = normalize_surfaces(&mut doc, div);
        assert_eq!(report.converted.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, b);
        assert!(matches!(report.skipped[0].1, SurfaceError::Tainted));

        // 'b' still occupies index 1.
        assert_eq!(doc.children(div)[1], b);
        assert_eq!(doc.tag(doc.children(div)[0]), Some(&Tag::Img));
        let span = doc.children(div)[2];
        assert_eq!(doc.tag(doc.children(span)[0]), Some(&Tag::Img));
    }

    #[test]
    fn empty_canvas_is_skipped() {
        let mut doc = Document::parse("<div><canvas width='0' height='5'></canvas></div>");
        let div = doc.children(doc.body())[0];
        let report = normalize_surfaces(&mut doc, div);
        assert!(report.converted.is_empty());
        assert!(matches!(report.skipped[0].1, SurfaceError::Empty { .. }));
        assert_eq!(doc.elements_by_tag(div, &Tag::Canvas).len(), 1);
    }

    #[test]
    fn nothing_to_do_without_canvases() {
        let mut doc = Document::parse("<div><img src='x'></div>");
        let div = doc.children(doc.body())[0];
        let report = normalize_surfaces(&mut doc, div);
        assert!(report.converted.is_empty() && report.skipped.is_empty());
    }
}
