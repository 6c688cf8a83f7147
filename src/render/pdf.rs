//! PDF emitter – draws paginated items with printpdf (v0.8 ops API).

use std::collections::HashMap;
use std::io::Cursor;

use printpdf::*;

use crate::error::RenderError;
use crate::loader::decode_data_uri;
use crate::render::layout::{Item, ItemKind, TextRun};
use crate::render::paging::PageSlice;
use crate::render::RenderOptions;

const MM_PER_PT: f32 = 0.352778;

/// A registered XObject and the pixel size of its source.
struct ImageResource {
    id: XObjectId,
    px_width: u32,
    px_height: u32,
}

/// Maps document px on one page to PDF points (origin bottom-left).
struct Frame {
    page_height: f32,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
    start: f32,
}

impl Frame {
    fn x(&self, px: f32) -> f32 {
        self.origin_x + px * self.scale
    }

    fn y(&self, px: f32) -> f32 {
        self.page_height - (self.origin_y + (px - self.start) * self.scale)
    }

    fn len(&self, px: f32) -> f32 {
        px * self.scale
    }
}

/// Encode `pages` into a PDF document.
pub fn write_pdf(pages: &[PageSlice], options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
    let (page_w, page_h) = options.page_size_pt();
    if page_w <= 0.0 || page_h <= 0.0 {
        return Err(RenderError::Pdf(format!(
            "page format must be positive, got {:?}",
            options.format
        )));
    }
    let (origin_x, origin_y) = options.origin_pt();
    let scale = options.scale();

    let mut doc = PdfDocument::new(&options.title);
    let images = register_images(&mut doc, pages);

    let mut pdf_pages = Vec::with_capacity(pages.len().max(1));
    for page in pages {
        let frame = Frame {
            page_height: page_h,
            origin_x,
            origin_y,
            scale,
            start: page.start,
        };
        let mut ops = Vec::new();
        for item in &page.items {
            draw_item(&mut ops, item, &frame, &images);
        }
        pdf_pages.push(PdfPage::new(
            Mm(page_w * MM_PER_PT),
            Mm(page_h * MM_PER_PT),
            ops,
        ));
    }
    if pdf_pages.is_empty() {
        pdf_pages.push(PdfPage::new(
            Mm(page_w * MM_PER_PT),
            Mm(page_h * MM_PER_PT),
            Vec::new(),
        ));
    }

    doc.with_pages(pdf_pages);
    Ok(doc.save(&PdfSaveOptions::default(), &mut Vec::new()))
}

/// Register every distinct image source once. Sources that fail to decode
/// are skipped with a warning.
fn register_images(doc: &mut PdfDocument, pages: &[PageSlice]) -> HashMap<String, ImageResource> {
    let mut images = HashMap::new();
    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    let sources = pages.iter().flat_map(|p| &p.items).filter_map(|i| match &i.kind {
        ItemKind::Image { src } => Some(src),
        _ => None,
    });
    for src in sources {
        if images.contains_key(src) {
            continue;
        }
        let bytes = match decode_data_uri(src) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("skipping image: {e}");
                continue;
            }
        };
        let dims = ::image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .ok()
            .and_then(|r| r.into_dimensions().ok());
        let Some((px_width, px_height)) = dims else {
            log::warn!("skipping image: unrecognised format");
            continue;
        };
        let raw = match RawImage::decode_from_bytes(&bytes, &mut warnings) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("skipping image: PDF encode error: {e}");
                continue;
            }
        };
        let id = doc.add_image(&raw);
        images.insert(
            src.clone(),
            ImageResource {
                id,
                px_width,
                px_height,
            },
        );
    }
    images
}

fn draw_item(ops: &mut Vec<Op>, item: &Item, frame: &Frame, images: &HashMap<String, ImageResource>) {
    let x1 = frame.x(item.x);
    let x2 = frame.x(item.x + item.width);
    let top = frame.y(item.y);
    let bottom = frame.y(item.bottom());

    match &item.kind {
        ItemKind::Fill { color } => {
            ops.push(Op::SetFillColor { col: rgb(color) });
            ops.push(Op::DrawPolygon {
                polygon: Polygon {
                    rings: vec![PolygonRing {
                        points: rect_points(x1, bottom, x2, top),
                    }],
                    mode: PaintMode::Fill,
                    winding_order: WindingOrder::NonZero,
                },
            });
        }
        ItemKind::Border { width, color } => {
            let thickness = frame.len(*width);
            let inset = thickness / 2.0;
            ops.push(Op::SetOutlineColor { col: rgb(color) });
            ops.push(Op::SetOutlineThickness { pt: Pt(thickness) });
            ops.push(Op::DrawLine {
                line: Line {
                    points: rect_points(x1 + inset, bottom + inset, x2 - inset, top - inset),
                    is_closed: true,
                },
            });
        }
        ItemKind::Text(run) => draw_text(ops, run, x1, top, frame.len(item.height), frame),
        ItemKind::Image { src } => {
            let Some(res) = images.get(src) else {
                return;
            };
            // At 72 dpi one image pixel is one point.
            let scale_x = (x2 - x1) / res.px_width.max(1) as f32;
            let scale_y = (top - bottom) / res.px_height.max(1) as f32;
            ops.push(Op::UseXobject {
                id: res.id.clone(),
                transform: XObjectTransform {
                    translate_x: Some(Pt(x1)),
                    translate_y: Some(Pt(bottom)),
                    dpi: Some(72.0),
                    scale_x: Some(scale_x),
                    scale_y: Some(scale_y),
                    rotate: None,
                },
            });
        }
    }
}

fn draw_text(ops: &mut Vec<Op>, run: &TextRun, x: f32, top: f32, line_height: f32, frame: &Frame) {
    let font = match (run.bold, run.italic) {
        (true, true) => BuiltinFont::HelveticaBoldOblique,
        (true, false) => BuiltinFont::HelveticaBold,
        (false, true) => BuiltinFont::HelveticaOblique,
        (false, false) => BuiltinFont::Helvetica,
    };
    let size = frame.len(run.font_size);
    // Centre the em box in the line box; the baseline sits ~0.8em down it.
    let baseline = top - (line_height - size) / 2.0 - size * 0.8;

    ops.push(Op::StartTextSection);
    ops.push(Op::SetTextCursor {
        pos: Point {
            x: Pt(x),
            y: Pt(baseline),
        },
    });
    ops.push(Op::SetFontSizeBuiltinFont { size: Pt(size), font });
    ops.push(Op::SetLineHeight { lh: Pt(line_height) });
    ops.push(Op::SetFillColor { col: rgb(&run.color) });
    ops.push(Op::WriteTextBuiltinFont {
        items: vec![TextItem::Text(to_winlatin(&run.text))],
        font,
    });
    ops.push(Op::EndTextSection);

    if run.underline {
        let y = baseline - size * 0.1;
        let width = frame.len(crate::render::layout::measure_text(
            &run.text,
            run.font_size,
            run.bold,
        ));
        ops.push(Op::SetOutlineThickness { pt: Pt(0.5) });
        ops.push(Op::SetOutlineColor { col: rgb(&run.color) });
        ops.push(Op::DrawLine {
            line: Line {
                points: vec![point(x, y), point(x + width, y)],
                is_closed: false,
            },
        });
    }
}

fn rgb(color: &[f32; 4]) -> Color {
    Color::Rgb(Rgb {
        r: color[0],
        g: color[1],
        b: color[2],
        icc_profile: None,
    })
}

fn point(x: f32, y: f32) -> LinePoint {
    LinePoint {
        p: Point { x: Pt(x), y: Pt(y) },
        bezier: false,
    }
}

fn rect_points(x1: f32, y1: f32, x2: f32, y2: f32) -> Vec<LinePoint> {
    vec![point(x1, y1), point(x2, y1), point(x2, y2), point(x1, y2)]
}

/// Re-encode UTF-8 as raw Windows-1252 bytes wrapped in a `String`, so
/// printpdf writes them unchanged for the WinAnsiEncoding builtin fonts.
fn to_winlatin(s: &str) -> String {
    let bytes: Vec<u8> = s
        .chars()
        .map(|c| match c {
            '\u{20AC}' => 0x80,
            '\u{2026}' => 0x85,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{00A0}' => 0x20,
            c if (c as u32) < 256 => c as u8,
            _ => b'?',
        })
        .collect();
    // SAFETY: bytes 0x80-0xFF are deliberately not UTF-8; printpdf copies
    // the string's bytes into the content stream without inspecting them.
    #[allow(unsafe_code)]
    unsafe {
        String::from_utf8_unchecked(bytes)
    }
}
