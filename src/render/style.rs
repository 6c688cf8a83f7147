//! Style resolver – tag defaults plus inline `style` declarations, flattened
//! into a [`BoxStyle`] for the layout stage.

use crate::css::{self, Length};
use crate::dom::{ElementNode, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    Flex,
    Inline,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexDirection {
    Row,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// Resolved style of one element. Edge arrays are `[top, right, bottom, left]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxStyle {
    pub display: Display,
    pub flex_direction: FlexDirection,
    pub flex_grow: f32,
    pub gap: f32,

    pub width: Length,
    pub height: Length,
    pub min_height: Length,
    pub max_width: Length,

    pub margin: [f32; 4],
    pub padding: [f32; 4],
    pub border_width: f32,
    pub border_color: [f32; 4],
    pub background: Option<[f32; 4]>,

    // Inherited
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: [f32; 4],
    pub text_align: TextAlign,
    /// Multiple of `font_size`.
    pub line_height: f32,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            display: Display::Block,
            flex_direction: FlexDirection::Row,
            flex_grow: 0.0,
            gap: 0.0,
            width: Length::Auto,
            height: Length::Auto,
            min_height: Length::Auto,
            max_width: Length::Auto,
            margin: [0.0; 4],
            padding: [0.0; 4],
            border_width: 0.0,
            border_color: [0.0, 0.0, 0.0, 1.0],
            background: None,
            font_size: 16.0,
            bold: false,
            italic: false,
            underline: false,
            color: [0.0, 0.0, 0.0, 1.0],
            text_align: TextAlign::Left,
            line_height: 1.4,
        }
    }
}

impl BoxStyle {
    /// A child's starting point: inherited text properties only.
    fn inherit(&self) -> Self {
        Self {
            font_size: self.font_size,
            bold: self.bold,
            italic: self.italic,
            underline: self.underline,
            color: self.color,
            text_align: self.text_align,
            line_height: self.line_height,
            ..Self::default()
        }
    }

    pub fn line_height_px(&self) -> f32 {
        self.font_size * self.line_height
    }
}

/// Resolve `element`'s style under `parent`.
pub fn resolve_style(element: &ElementNode, parent: &BoxStyle) -> BoxStyle {
    let mut s = parent.inherit();
    apply_tag_defaults(&mut s, &element.tag);
    for (prop, value) in css::parse_declarations(element.inline_style()) {
        apply_property(&mut s, &prop, &value);
    }
    s
}

fn apply_tag_defaults(s: &mut BoxStyle, tag: &Tag) {
    match tag {
        Tag::H1 => heading(s, 32.0, 16.0, 12.0),
        Tag::H2 => heading(s, 24.0, 14.0, 10.0),
        Tag::H3 => heading(s, 20.0, 12.0, 8.0),
        Tag::P => s.margin[2] = 10.0,
        Tag::Ul | Tag::Ol => {
            s.margin[2] = 10.0;
            s.padding[3] = 24.0;
        }
        Tag::Li => s.margin[2] = 4.0,
        Tag::Tr => {
            s.display = Display::Flex;
            s.flex_direction = FlexDirection::Row;
        }
        Tag::Td | Tag::Th => {
            s.flex_grow = 1.0;
            s.padding = [4.0, 8.0, 4.0, 8.0];
            s.border_width = 1.0;
            if *tag == Tag::Th {
                s.bold = true;
                s.background = Some([0.93, 0.93, 0.93, 1.0]);
            }
        }
        Tag::Span => s.display = Display::Inline,
        Tag::Head => s.display = Display::None,
        Tag::Other(name) => match name.as_str() {
            "b" | "strong" => {
                s.display = Display::Inline;
                s.bold = true;
            }
            "i" | "em" => {
                s.display = Display::Inline;
                s.italic = true;
            }
            "u" => {
                s.display = Display::Inline;
                s.underline = true;
            }
            "a" | "small" | "code" | "label" | "sup" | "sub" => s.display = Display::Inline,
            "script" | "style" | "title" | "meta" | "link" | "template" | "noscript" => {
                s.display = Display::None
            }
            _ => {}
        },
        _ => {}
    }
}

fn heading(s: &mut BoxStyle, size: f32, top: f32, bottom: f32) {
    s.font_size = size;
    s.bold = true;
    s.margin[0] = top;
    s.margin[2] = bottom;
}

fn apply_property(s: &mut BoxStyle, prop: &str, value: &str) {
    let fs = s.font_size;
    let px = |v: &str| match css::parse_length(v, fs) {
        Some(Length::Px(p)) => Some(p),
        _ => None,
    };
    match prop {
        "display" => {
            s.display = match value.trim() {
                "none" => Display::None,
                "flex" | "inline-flex" => Display::Flex,
                "inline" => Display::Inline,
                _ => Display::Block,
            }
        }
        "flex-direction" => {
            s.flex_direction = if value.trim().starts_with("column") {
                FlexDirection::Column
            } else {
                FlexDirection::Row
            }
        }
        "flex-grow" => s.flex_grow = value.trim().parse().unwrap_or(s.flex_grow),
        "flex" => {
            if let Some(grow) = value.split_whitespace().next().and_then(|v| v.parse().ok()) {
                s.flex_grow = grow;
            }
        }
        "gap" => s.gap = px(value).unwrap_or(s.gap),
        "width" => s.width = css::parse_length(value, fs).unwrap_or(s.width),
        "height" => s.height = css::parse_length(value, fs).unwrap_or(s.height),
        "min-height" => s.min_height = css::parse_length(value, fs).unwrap_or(s.min_height),
        "max-width" => s.max_width = css::parse_length(value, fs).unwrap_or(s.max_width),
        "margin" => s.margin = edges(value, fs).unwrap_or(s.margin),
        "padding" => s.padding = edges(value, fs).unwrap_or(s.padding),
        "margin-top" => s.margin[0] = px(value).unwrap_or(s.margin[0]),
        "margin-right" => s.margin[1] = px(value).unwrap_or(s.margin[1]),
        "margin-bottom" => s.margin[2] = px(value).unwrap_or(s.margin[2]),
        "margin-left" => s.margin[3] = px(value).unwrap_or(s.margin[3]),
        "padding-top" => s.padding[0] = px(value).unwrap_or(s.padding[0]),
        "padding-right" => s.padding[1] = px(value).unwrap_or(s.padding[1]),
        "padding-bottom" => s.padding[2] = px(value).unwrap_or(s.padding[2]),
        "padding-left" => s.padding[3] = px(value).unwrap_or(s.padding[3]),
        "border" => {
            for token in value.split_whitespace() {
                if let Some(w) = px(token) {
                    s.border_width = w;
                } else if let Some(c) = css::parse_color(token) {
                    s.border_color = c;
                } else if token == "none" {
                    s.border_width = 0.0;
                } else if s.border_width == 0.0 && matches!(token, "solid" | "dashed" | "dotted") {
                    s.border_width = 1.0;
                }
            }
        }
        "border-width" => s.border_width = px(value).unwrap_or(s.border_width),
        "border-color" => s.border_color = css::parse_color(value).unwrap_or(s.border_color),
        "background" | "background-color" => {
            if let Some(c) = value.split_whitespace().find_map(css::parse_color) {
                s.background = (c[3] > 0.001).then_some(c);
            }
        }
        "color" => s.color = css::parse_color(value).unwrap_or(s.color),
        "font-size" => s.font_size = px(value).unwrap_or(s.font_size),
        "font-weight" => {
            let v = value.trim();
            s.bold = v == "bold" || v == "bolder" || v.parse::<u32>().map_or(false, |w| w >= 600);
        }
        "font-style" => s.italic = matches!(value.trim(), "italic" | "oblique"),
        "text-decoration" | "text-decoration-line" => s.underline = value.contains("underline"),
        "text-align" => {
            s.text_align = match value.trim() {
                "center" => TextAlign::Center,
                "right" | "end" => TextAlign::Right,
                _ => TextAlign::Left,
            }
        }
        "line-height" => {
            let v = value.trim();
            if let Ok(factor) = v.parse::<f32>() {
                s.line_height = factor;
            } else if let Some(p) = px(v) {
                if fs > 0.0 {
                    s.line_height = p / fs;
                }
            }
        }
        _ => {}
    }
}

/// CSS 1–4 value edge shorthand.
fn edges(value: &str, font_size: f32) -> Option<[f32; 4]> {
    let parts: Vec<f32> = value
        .split_whitespace()
        .map(|p| match css::parse_length(p, font_size) {
            Some(Length::Px(v)) => Some(v),
            Some(Length::Auto) => Some(0.0),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [a] => Some([*a; 4]),
        [v, h] => Some([*v, *h, *v, *h]),
        [t, h, b] => Some([*t, *h, *b, *h]),
        [t, r, b, l] => Some([*t, *r, *b, *l]),
        _ => None,
    }
}
