//! Minimal inline-style handling: `style` attribute declarations and CSS
//! lengths. Shared by the document model (staging the clone, reading the
//! rendered width) and the renderer's style resolver.

/// A CSS length as far as this crate needs to understand one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Auto,
    Px(f32),
    Percent(f32),
}

impl Length {
    /// Resolve against a containing size; `Auto` resolves to `None`.
    pub fn resolve(self, container: f32) -> Option<f32> {
        match self {
            Length::Auto => None,
            Length::Px(v) => Some(v),
            Length::Percent(p) => Some(container * p / 100.0),
        }
    }
}

/// Split a `style` attribute into `(property, value)` pairs, in order.
/// Property names are lower-cased; empty declarations are dropped.
pub fn parse_declarations(style: &str) -> Vec<(String, String)> {
    split_declarations(style)
        .into_iter()
        .filter_map(|decl| {
            let (prop, val) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            let val = val.trim();
            if prop.is_empty() || val.is_empty() {
                None
            } else {
                Some((prop, val.to_string()))
            }
        })
        .collect()
}

/// Split on `;` outside quotes and parentheses, so `url(data:...;base64,...)`
/// and quoted strings stay whole.
fn split_declarations(style: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in style.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ';') if depth == 0 => {
                parts.push(&style[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&style[start..]);
    parts
}

/// Serialise declarations back into `style` attribute text.
pub fn serialize_declarations(decls: &[(String, String)]) -> String {
    decls
        .iter()
        .map(|(p, v)| format!("{p}: {v};"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Set (or replace) one property in `style` text, keeping the others.
pub fn set_declaration(style: &str, property: &str, value: &str) -> String {
    let property = property.trim().to_ascii_lowercase();
    let mut decls = parse_declarations(style);
    match decls.iter_mut().find(|(p, _)| *p == property) {
        Some(slot) => slot.1 = value.to_string(),
        None => decls.push((property, value.to_string())),
    }
    serialize_declarations(&decls)
}

/// Look up the last value declared for `property`.
pub fn get_declaration(style: &str, property: &str) -> Option<String> {
    parse_declarations(style)
        .into_iter()
        .rev()
        .find(|(p, _)| p == property)
        .map(|(_, v)| v)
}

/// Parse a length. Unitless numbers are treated as px (as the `width` and
/// `height` attributes are). `em`/`rem` use `font_size`.
pub fn parse_length(value: &str, font_size: f32) -> Option<Length> {
    let v = value.trim().to_ascii_lowercase();
    if v == "auto" {
        return Some(Length::Auto);
    }
    if let Some(n) = v.strip_suffix('%') {
        return n.trim().parse().ok().map(Length::Percent);
    }
    let (num, factor) = if let Some(n) = v.strip_suffix("px") {
        (n, 1.0)
    } else if let Some(n) = v.strip_suffix("rem") {
        (n, 16.0)
    } else if let Some(n) = v.strip_suffix("em") {
        (n, font_size)
    } else if let Some(n) = v.strip_suffix("pt") {
        (n, 96.0 / 72.0)
    } else if let Some(n) = v.strip_suffix("mm") {
        (n, 96.0 / 25.4)
    } else if let Some(n) = v.strip_suffix("cm") {
        (n, 96.0 / 2.54)
    } else if let Some(n) = v.strip_suffix("in") {
        (n, 96.0)
    } else {
        (v.as_str(), 1.0)
    };
    num.trim().parse::<f32>().ok().map(|n| Length::Px(n * factor))
}

/// Parse a colour value into RGBA in 0.0–1.0. Supports hex, `rgb()`,
/// `rgba()` and a handful of named colours.
pub fn parse_color(value: &str) -> Option<[f32; 4]> {
    let v = value.trim().to_ascii_lowercase();
    if v.starts_with('#') {
        let [r, g, b, a] = crate::surface::parse_hex_rgba(&v)?;
        return Some([
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        ]);
    }
    if let Some(inner) = v
        .strip_prefix("rgba(")
        .or_else(|| v.strip_prefix("rgb("))
        .and_then(|s| s.strip_suffix(')'))
    {
        let parts: Vec<f32> = inner
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect();
        return match parts.as_slice() {
            [r, g, b] => Some([r / 255.0, g / 255.0, b / 255.0, 1.0]),
            [r, g, b, a] => Some([r / 255.0, g / 255.0, b / 255.0, *a]),
            _ => None,
        };
    }
    let named = match v.as_str() {
        "white" => [1.0, 1.0, 1.0, 1.0],
        "black" => [0.0, 0.0, 0.0, 1.0],
        "red" => [1.0, 0.0, 0.0, 1.0],
        "green" => [0.0, 0.5, 0.0, 1.0],
        "blue" => [0.0, 0.0, 1.0, 1.0],
        "gray" | "grey" => [0.5, 0.5, 0.5, 1.0],
        "transparent" => [0.0, 0.0, 0.0, 0.0],
        _ => return None,
    };
    Some(named)
}
