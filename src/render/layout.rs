//! Layout stage – builds a Taffy tree from the snapshot, computes block and
//! flex layout at the reference window width, then flattens the result into
//! absolutely positioned draw [`Item`]s in pre-order (backgrounds before the
//! content painted over them).

use std::collections::HashMap;
use std::io::Cursor;

use taffy::prelude::{
    AvailableSpace, Dimension, LengthPercentage, LengthPercentageAuto, Rect, Size, Style,
    TaffyTree,
};
use taffy::NodeId as LayoutNode;

use crate::css::{self, Length};
use crate::dom::{DomNode, ElementNode, Tag};
use crate::error::RenderError;
use crate::loader::decode_data_uri;
use crate::render::style::{resolve_style, BoxStyle, Display, FlexDirection, TextAlign};
use crate::surface::{DEFAULT_SURFACE_HEIGHT, DEFAULT_SURFACE_WIDTH, MAX_SURFACE_SIDE};

/// One positioned draw operation, in CSS px of document space.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub kind: ItemKind,
}

impl Item {
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Fill { color: [f32; 4] },
    Border { width: f32, color: [f32; 4] },
    /// One wrapped line of text; `height` is the line box.
    Text(TextRun),
    Image { src: String },
}

impl ItemKind {
    /// Atoms are never cut by a text-aware page break.
    pub fn is_atom(&self) -> bool {
        matches!(self, ItemKind::Text(_) | ItemKind::Image { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: [f32; 4],
}

/// Flattened layout of a whole fragment.
#[derive(Debug, Clone, Default)]
pub struct LaidOut {
    pub items: Vec<Item>,
    /// Total document height in CSS px.
    pub height: f32,
}

/// Lay `fragment` out inside a column `window_width` px wide.
pub fn layout_fragment(fragment: &DomNode, window_width: f32) -> Result<LaidOut, RenderError> {
    let window_width = window_width.max(1.0);
    let mut builder = LayoutBuilder::new();
    let base = BoxStyle::default();

    let mut children = Vec::new();
    match fragment {
        DomNode::Element(el) => {
            if let Some(node) = builder.build_element(el, &base, window_width, false)? {
                children.push(node);
            }
        }
        DomNode::Text(text) => {
            let collapsed = collapse_whitespace(text);
            if !collapsed.is_empty() {
                children.push(builder.build_text(&collapsed, &base, window_width, false)?);
            }
        }
    }

    let root_style = Style {
        display: taffy::Display::Flex,
        flex_direction: taffy::FlexDirection::Column,
        size: Size {
            width: Dimension::Length(window_width),
            height: Dimension::Auto,
        },
        ..Default::default()
    };
    let root = builder
        .taffy
        .new_with_children(root_style, &children)
        .map_err(layout_err)?;
    builder
        .taffy
        .compute_layout(
            root,
            Size {
                width: AvailableSpace::Definite(window_width),
                height: AvailableSpace::MaxContent,
            },
        )
        .map_err(layout_err)?;

    let mut items = Vec::new();
    builder.extract(root, 0.0, 0.0, &mut items)?;
    let height = builder.taffy.layout(root).map_err(layout_err)?.size.height;
    log::trace!("laid out {} item(s), {height:.1}px tall", items.len());
    Ok(LaidOut { items, height })
}

fn layout_err(err: taffy::TaffyError) -> RenderError {
    RenderError::Layout(err.to_string())
}

enum Content {
    Block(BoxStyle),
    Text { lines: Vec<String>, style: BoxStyle },
    Image { src: Option<String> },
}

struct LayoutBuilder {
    taffy: TaffyTree<()>,
    content: HashMap<LayoutNode, Content>,
    markers: HashMap<LayoutNode, (String, BoxStyle)>,
}

impl LayoutBuilder {
    fn new() -> Self {
        Self {
            taffy: TaffyTree::new(),
            content: HashMap::new(),
            markers: HashMap::new(),
        }
    }

    fn build_element(
        &mut self,
        el: &ElementNode,
        parent: &BoxStyle,
        available: f32,
        in_row: bool,
    ) -> Result<Option<LayoutNode>, RenderError> {
        let style = resolve_style(el, parent);
        if style.display == Display::None {
            return Ok(None);
        }
        match el.tag {
            Tag::Img => return self.build_image(el, &style, available).map(Some),
            Tag::Canvas => return self.build_canvas(el, &style).map(Some),
            _ => {}
        }

        let mut own_width = style.width.resolve(available).unwrap_or(available);
        if let Some(max) = style.max_width.resolve(available) {
            own_width = own_width.min(max);
        }
        let inner = (own_width
            - style.padding[1]
            - style.padding[3]
            - 2.0 * style.border_width)
            .max(1.0);

        let is_row = matches!(style.display, Display::Flex | Display::Inline)
            && style.flex_direction == FlexDirection::Row;
        let column_count = el
            .children
            .iter()
            .filter(|c| matches!(c, DomNode::Element(_)))
            .count()
            .max(1);
        let child_available = if is_row && style.display == Display::Flex {
            let gaps = style.gap * column_count.saturating_sub(1) as f32;
            ((inner - gaps) / column_count as f32).max(1.0)
        } else {
            inner
        };

        let mut child_nodes = Vec::new();
        let mut run: Vec<&DomNode> = Vec::new();
        let mut list_counter = 0u32;
        for child in &el.children {
            if is_inline(child, &style) {
                run.push(child);
                continue;
            }
            self.flush_run(&mut run, &style, child_available, is_row, &mut child_nodes)?;
            let DomNode::Element(child_el) = child else {
                continue;
            };
            let Some(node) = self.build_element(child_el, &style, child_available, is_row)? else {
                continue;
            };
            if child_el.tag == Tag::Li {
                list_counter += 1;
                let marker = if el.tag == Tag::Ol {
                    format!("{list_counter}.")
                } else {
                    "\u{2022}".to_string()
                };
                self.markers
                    .insert(node, (marker, resolve_style(child_el, &style)));
            }
            child_nodes.push(node);
        }
        self.flush_run(&mut run, &style, child_available, is_row, &mut child_nodes)?;

        let node = self
            .taffy
            .new_with_children(to_taffy(&style, &el.tag, in_row), &child_nodes)
            .map_err(layout_err)?;
        self.content.insert(node, Content::Block(style));
        Ok(Some(node))
    }

    /// Merge a run of inline siblings into one wrapped text leaf.
    fn flush_run(
        &mut self,
        run: &mut Vec<&DomNode>,
        parent: &BoxStyle,
        available: f32,
        in_row: bool,
        out: &mut Vec<LayoutNode>,
    ) -> Result<(), RenderError> {
        if run.is_empty() {
            return Ok(());
        }
        let mut segments = Vec::new();
        for node in run.drain(..) {
            collect_inline(node, parent, &mut segments);
        }
        let raw: String = segments.iter().map(|(t, _)| t.as_str()).collect();
        let text = collapse_whitespace(&raw);
        if text.is_empty() {
            return Ok(());
        }
        // A run styled uniformly (e.g. a lone <strong>) keeps that style.
        let mut styled = segments.iter().filter(|(t, _)| !t.trim().is_empty());
        let style = match styled.next() {
            Some((_, first)) if styled.all(|(_, s)| s == first) => first.clone(),
            _ => parent.clone(),
        };
        out.push(self.build_text(&text, &style, available, in_row)?);
        Ok(())
    }

    fn build_text(
        &mut self,
        text: &str,
        style: &BoxStyle,
        available: f32,
        in_row: bool,
    ) -> Result<LayoutNode, RenderError> {
        let lines = wrap_text(text, style.font_size, style.bold, available);
        let widest = lines
            .iter()
            .map(|l| measure_text(l, style.font_size, style.bold))
            .fold(0.0f32, f32::max);
        let height = lines.len() as f32 * style.line_height_px();

        let leaf = Style {
            size: Size {
                width: if in_row {
                    Dimension::Length(widest.min(available))
                } else {
                    Dimension::Auto
                },
                height: Dimension::Length(height),
            },
            flex_shrink: 0.0,
            ..Default::default()
        };
        let node = self.taffy.new_leaf(leaf).map_err(layout_err)?;
        self.content.insert(
            node,
            Content::Text {
                lines,
                style: style.clone(),
            },
        );
        Ok(node)
    }

    fn build_image(
        &mut self,
        el: &ElementNode,
        style: &BoxStyle,
        available: f32,
    ) -> Result<LayoutNode, RenderError> {
        let src = el.src().filter(|s| s.starts_with("data:")).map(str::to_string);
        let natural = src.as_deref().and_then(natural_size);

        let width = style
            .width
            .resolve(available)
            .or_else(|| attribute_px(el, "width"));
        let height = style.height.resolve(available).or_else(|| attribute_px(el, "height"));
        let (w, h) = match (width, height, natural) {
            (Some(w), Some(h), _) => (w, h),
            (Some(w), None, Some((nw, nh))) => (w, w * nh / nw),
            (None, Some(h), Some((nw, nh))) => (h * nw / nh, h),
            (None, None, Some((nw, nh))) => (nw, nh),
            (w, h, None) => (w.unwrap_or(0.0), h.unwrap_or(0.0)),
        };
        let (w, h) = match style.max_width.resolve(available) {
            Some(max) if w > max && w > 0.0 => (max, h * max / w),
            _ => (w, h),
        };

        let leaf = Style {
            size: Size {
                width: Dimension::Length(w),
                height: Dimension::Length(h),
            },
            margin: margin_rect(style),
            flex_shrink: 0.0,
            ..Default::default()
        };
        let node = self.taffy.new_leaf(leaf).map_err(layout_err)?;
        self.content.insert(node, Content::Image { src });
        Ok(node)
    }

    /// A canvas that survived normalization renders as an empty box.
    fn build_canvas(&mut self, el: &ElementNode, style: &BoxStyle) -> Result<LayoutNode, RenderError> {
        let max = MAX_SURFACE_SIDE as f32;
        let w = attribute_px(el, "width").unwrap_or(DEFAULT_SURFACE_WIDTH as f32).min(max);
        let h = attribute_px(el, "height").unwrap_or(DEFAULT_SURFACE_HEIGHT as f32).min(max);
        let leaf = Style {
            size: Size {
                width: Dimension::Length(w),
                height: Dimension::Length(h),
            },
            margin: margin_rect(style),
            flex_shrink: 0.0,
            ..Default::default()
        };
        let node = self.taffy.new_leaf(leaf).map_err(layout_err)?;
        self.content.insert(node, Content::Block(style.clone()));
        Ok(node)
    }

    fn extract(
        &self,
        node: LayoutNode,
        offset_x: f32,
        offset_y: f32,
        items: &mut Vec<Item>,
    ) -> Result<(), RenderError> {
        let layout = self.taffy.layout(node).map_err(layout_err)?;
        let x = offset_x + layout.location.x;
        let y = offset_y + layout.location.y;
        let (width, height) = (layout.size.width, layout.size.height);

        match self.content.get(&node) {
            Some(Content::Block(style)) => {
                if let Some(color) = style.background {
                    items.push(Item {
                        x,
                        y,
                        width,
                        height,
                        kind: ItemKind::Fill { color },
                    });
                }
                if style.border_width > 0.0 {
                    items.push(Item {
                        x,
                        y,
                        width,
                        height,
                        kind: ItemKind::Border {
                            width: style.border_width,
                            color: style.border_color,
                        },
                    });
                }
            }
            Some(Content::Text { lines, style }) => {
                let line_height = style.line_height_px();
                for (i, line) in lines.iter().enumerate() {
                    if line.is_empty() {
                        continue;
                    }
                    let line_width = measure_text(line, style.font_size, style.bold);
                    let slack = (width - line_width).max(0.0);
                    let indent = match style.text_align {
                        TextAlign::Left => 0.0,
                        TextAlign::Center => slack / 2.0,
                        TextAlign::Right => slack,
                    };
                    items.push(Item {
                        x: x + indent,
                        y: y + i as f32 * line_height,
                        width: line_width,
                        height: line_height,
                        kind: ItemKind::Text(text_run(line, style)),
                    });
                }
            }
            Some(Content::Image { src: Some(src) }) if width > 0.0 && height > 0.0 => {
                items.push(Item {
                    x,
                    y,
                    width,
                    height,
                    kind: ItemKind::Image { src: src.clone() },
                });
            }
            _ => {}
        }

        if let Some((marker, style)) = self.markers.get(&node) {
            let marker_width = measure_text(marker, style.font_size, false);
            items.push(Item {
                x: x - marker_width - 6.0,
                y: y + layout.padding.top + layout.border.top,
                width: marker_width,
                height: style.line_height_px(),
                kind: ItemKind::Text(TextRun {
                    bold: false,
                    italic: false,
                    underline: false,
                    ..text_run(marker, style)
                }),
            });
        }

        for &child in self.taffy.children(node).map_err(layout_err)?.iter() {
            self.extract(child, x, y, items)?;
        }
        Ok(())
    }
}

fn text_run(text: &str, style: &BoxStyle) -> TextRun {
    TextRun {
        text: text.to_string(),
        font_size: style.font_size,
        bold: style.bold,
        italic: style.italic,
        underline: style.underline,
        color: style.color,
    }
}

fn to_taffy(s: &BoxStyle, tag: &Tag, in_row: bool) -> Style {
    let mut ts = Style::default();
    match s.display {
        Display::Flex => {
            ts.display = taffy::Display::Flex;
            ts.flex_direction = match s.flex_direction {
                FlexDirection::Row => taffy::FlexDirection::Row,
                FlexDirection::Column => taffy::FlexDirection::Column,
            };
        }
        // Inline elements that hold block content lay out as wrapping rows.
        Display::Inline => {
            ts.display = taffy::Display::Flex;
            ts.flex_direction = taffy::FlexDirection::Row;
            ts.flex_wrap = taffy::FlexWrap::Wrap;
        }
        Display::Block | Display::None => {
            ts.display = taffy::Display::Flex;
            ts.flex_direction = taffy::FlexDirection::Column;
        }
    }

    ts.size = Size {
        width: to_dimension(s.width),
        height: to_dimension(s.height),
    };
    ts.min_size = Size {
        width: Dimension::Length(0.0),
        height: to_dimension(s.min_height),
    };
    ts.max_size = Size {
        width: to_dimension(s.max_width),
        height: Dimension::Auto,
    };

    ts.flex_grow = s.flex_grow;
    if in_row && matches!(tag, Tag::Td | Tag::Th) {
        // Equal columns.
        ts.flex_basis = Dimension::Length(0.0);
    }
    if matches!(tag, Tag::Tr) {
        ts.align_items = Some(taffy::AlignItems::Stretch);
    }
    // Block children of a column never shrink below their content.
    if !in_row {
        ts.flex_shrink = 0.0;
    }

    ts.margin = margin_rect(s);
    ts.padding = Rect {
        top: LengthPercentage::Length(s.padding[0]),
        right: LengthPercentage::Length(s.padding[1]),
        bottom: LengthPercentage::Length(s.padding[2]),
        left: LengthPercentage::Length(s.padding[3]),
    };
    ts.border = Rect {
        top: LengthPercentage::Length(s.border_width),
        right: LengthPercentage::Length(s.border_width),
        bottom: LengthPercentage::Length(s.border_width),
        left: LengthPercentage::Length(s.border_width),
    };
    ts.gap = Size {
        width: LengthPercentage::Length(s.gap),
        height: LengthPercentage::Length(s.gap),
    };
    ts
}

fn margin_rect(s: &BoxStyle) -> Rect<LengthPercentageAuto> {
    Rect {
        top: LengthPercentageAuto::Length(s.margin[0]),
        right: LengthPercentageAuto::Length(s.margin[1]),
        bottom: LengthPercentageAuto::Length(s.margin[2]),
        left: LengthPercentageAuto::Length(s.margin[3]),
    }
}

fn to_dimension(length: Length) -> Dimension {
    match length {
        Length::Auto => Dimension::Auto,
        Length::Px(v) => Dimension::Length(v),
        Length::Percent(p) => Dimension::Percent(p / 100.0),
    }
}

/// Text nodes and inline elements whose whole subtree is inline text.
fn is_inline(node: &DomNode, parent: &BoxStyle) -> bool {
    match node {
        DomNode::Text(_) => true,
        DomNode::Element(el) => {
            if matches!(el.tag, Tag::Img | Tag::Canvas) {
                return false;
            }
            let style = resolve_style(el, parent);
            style.display == Display::Inline && el.children.iter().all(|c| is_inline(c, &style))
        }
    }
}

fn collect_inline(node: &DomNode, parent: &BoxStyle, out: &mut Vec<(String, BoxStyle)>) {
    match node {
        DomNode::Text(text) => out.push((text.clone(), parent.clone())),
        DomNode::Element(el) => {
            let style = resolve_style(el, parent);
            for child in &el.children {
                collect_inline(child, &style, out);
            }
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attribute_px(el: &ElementNode, name: &str) -> Option<f32> {
    match css::parse_length(el.attribute(name)?, 16.0)? {
        Length::Px(v) => Some(v),
        _ => None,
    }
}

/// Natural pixel size of a data URL image, without a full decode.
fn natural_size(src: &str) -> Option<(f32, f32)> {
    let bytes = decode_data_uri(src).ok()?;
    let (w, h) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    (w > 0 && h > 0).then_some((w as f32, h as f32))
}

/// Helvetica-ish advance estimate: half an em per character, a little more
/// for bold.
pub fn measure_text(text: &str, font_size: f32, bold: bool) -> f32 {
    let factor = if bold { 0.55 } else { 0.5 };
    text.chars().count() as f32 * font_size * factor
}

/// Greedy word wrap to `max_width` px. A single word wider than the line
/// stays on its own line.
pub fn wrap_text(text: &str, font_size: f32, bold: bool, max_width: f32) -> Vec<String> {
    if max_width <= 0.0 || text.is_empty() {
        return vec![text.to_string()];
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if measure_text(&candidate, font_size, bold) > max_width && !current.is_empty() {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::surface::Surface;

    fn fragment(html: &str) -> DomNode {
        let doc = Document::parse(html);
        let first = doc.children(doc.body())[0];
        doc.snapshot(first).unwrap()
    }

    fn texts(items: &[Item]) -> Vec<&str> {
        items
            .iter()
            .filter_map(|i| match &i.kind {
                ItemKind::Text(run) => Some(run.text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn wrapping() {
        // 10 chars per 80px line at 16px.
        let lines = wrap_text("aaaa bbbb cccc dddd", 16.0, false, 80.0);
        assert_eq!(lines, vec!["aaaa bbbb", "cccc dddd"]);
        assert_eq!(wrap_text("supercalifragilistic", 16.0, false, 40.0).len(), 1);
        assert!((measure_text("Hello", 16.0, false) - 40.0).abs() < 0.01);
    }

    #[test]
    fn paragraphs_stack_vertically() {
        let laid = layout_fragment(
            &fragment("<div><p>first</p><p>second</p></div>"),
            794.0,
        )
        .unwrap();
        let lines: Vec<&Item> = laid
            .items
            .iter()
            .filter(|i| matches!(i.kind, ItemKind::Text(_)))
            .collect();
        assert_eq!(texts(&laid.items), vec!["first", "second"]);
        assert!(lines[1].y >= lines[0].bottom());
        assert!(laid.height >= lines[1].bottom());
    }

    #[test]
    fn inline_runs_merge_into_one_line() {
        let laid = layout_fragment(
            &fragment("<div><p>Hello <b>bold</b> world</p></div>"),
            794.0,
        )
        .unwrap();
        assert_eq!(texts(&laid.items), vec!["Hello bold world"]);
    }

    #[test]
    fn backgrounds_come_before_content() {
        let laid = layout_fragment(
            &fragment("<div style='background: #eee; padding: 10px'><p>x</p></div>"),
            794.0,
        )
        .unwrap();
        assert!(matches!(laid.items[0].kind, ItemKind::Fill { .. }));
        assert_eq!(laid.items[0].width, 794.0);
        let text = &laid.items[1];
        assert_eq!((text.x, text.y), (10.0, 10.0));
    }

    #[test]
    fn image_uses_natural_size_and_aspect() {
        let src = Surface::new(40, 20).to_data_url().unwrap();
        let laid = layout_fragment(
            &fragment(&format!(
                "<div><img src='{src}'><img src='{src}' width='100'></div>"
            )),
            794.0,
        )
        .unwrap();
        let images: Vec<&Item> = laid
            .items
            .iter()
            .filter(|i| matches!(i.kind, ItemKind::Image { .. }))
            .collect();
        assert_eq!((images[0].width, images[0].height), (40.0, 20.0));
        assert_eq!((images[1].width, images[1].height), (100.0, 50.0));
        assert_eq!(images[1].y, 20.0);
    }

    #[test]
    fn hidden_and_head_content_is_skipped() {
        let laid = layout_fragment(
            &fragment("<div><p style='display:none'>gone</p><script>x()</script><p>kept</p></div>"),
            794.0,
        )
        .unwrap();
        assert_eq!(texts(&laid.items), vec!["kept"]);
    }

    #[test]
    fn table_cells_share_the_row() {
        let laid = layout_fragment(
            &fragment("<table><tr><td>a</td><td>b</td></tr></table>"),
            400.0,
        )
        .unwrap();
        let cells: Vec<&Item> = laid
            .items
            .iter()
            .filter(|i| matches!(i.kind, ItemKind::Border { .. }))
            .collect();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].y, cells[1].y);
        assert!((cells[0].width - 200.0).abs() < 0.5);
        assert!((cells[1].x - 200.0).abs() < 0.5);
    }

    #[test]
    fn list_items_get_markers() {
        let laid = layout_fragment(&fragment("<ol><li>one</li><li>two</li></ol>"), 794.0).unwrap();
        assert_eq!(texts(&laid.items), vec!["1.", "one", "2.", "two"]);
    }

    #[test]
    fn unconverted_canvas_keeps_its_box() {
        let laid = layout_fragment(
            &fragment("<div><canvas width='50' height='30'></canvas><p>after</p></div>"),
            794.0,
        )
        .unwrap();
        let after = laid
            .items
            .iter()
            .find(|i| matches!(&i.kind, ItemKind::Text(r) if r.text == "after"))
            .unwrap();
        assert!(after.y >= 30.0);
    }

    #[test]
    fn oversized_canvas_box_is_capped() {
        let laid = layout_fragment(
            &fragment("<div><canvas width='4294967295' height='4294967295'></canvas></div>"),
            794.0,
        )
        .unwrap();
        assert!(laid.height <= MAX_SURFACE_SIDE as f32 + 1.0);
    }
}
