//! Drawable surfaces – the pixel buffers behind `<canvas>` elements.
//!
//! A [`Surface`] holds RGBA pixels produced by imperative drawing calls. It
//! cannot be serialised as markup, so before export each surface is
//! snapshotted to a PNG data URL with [`Surface::to_data_url`].

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use image::{imageops, ImageFormat, Rgba, RgbaImage};

use crate::error::SurfaceError;

/// Default canvas size when no `width`/`height` attribute is present.
pub const DEFAULT_SURFACE_WIDTH: u32 = 300;
pub const DEFAULT_SURFACE_HEIGHT: u32 = 150;

/// Largest side and area a surface may allocate. Larger requests yield an
/// empty surface, which cannot be snapshotted.
pub const MAX_SURFACE_SIDE: u32 = 32_767;
pub const MAX_SURFACE_AREA: u64 = 268_435_456;

/// Where pixels handed to [`Surface::draw_image`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    SameOrigin,
    /// Drawing cross-origin pixels taints the surface for reading.
    CrossOrigin,
}

/// An RGBA pixel buffer with an origin-clean flag.
#[derive(Debug, Clone)]
pub struct Surface {
    pixels: RgbaImage,
    origin_clean: bool,
}

impl Surface {
    /// A fully transparent surface, or an empty one when the size is over
    /// [`MAX_SURFACE_SIDE`] or [`MAX_SURFACE_AREA`].
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = if fits_limits(width, height) {
            (width, height)
        } else {
            log::warn!("canvas {width}x{height} exceeds surface limits; left empty");
            (0, 0)
        };
        Self {
            pixels: RgbaImage::new(width, height),
            origin_clean: true,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn is_origin_clean(&self) -> bool {
        self.origin_clean
    }

    /// Fill a rectangle, clipped to the surface bounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 4]) {
        let x_end = x.saturating_add(width).min(self.width());
        let y_end = y.saturating_add(height).min(self.height());
        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                self.pixels.put_pixel(px, py, Rgba(color));
            }
        }
    }

    /// Composite `src` at (`x`, `y`).
    pub fn draw_image(&mut self, src: &RgbaImage, x: i64, y: i64, origin: Origin) {
        imageops::overlay(&mut self.pixels, src, x, y);
        if origin == Origin::CrossOrigin {
            self.origin_clean = false;
        }
    }

    pub fn clear(&mut self) {
        for p in self.pixels.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    /// Encode the current content as PNG bytes.
    pub fn to_png(&self) -> Result<Vec<u8>, SurfaceError> {
        if !self.origin_clean {
            return Err(SurfaceError::Tainted);
        }
        if self.width() == 0 || self.height() == 0 {
            return Err(SurfaceError::Empty {
                width: self.width(),
                height: self.height(),
            });
        }
        let mut buf = Cursor::new(Vec::new());
        self.pixels.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }

    /// Pixel-accurate `data:image/png;base64,...` snapshot.
    pub fn to_data_url(&self) -> Result<String, SurfaceError> {
        let png = self.to_png()?;
        Ok(format!("data:image/png;base64,{}", BASE64_STD.encode(png)))
    }
}

fn fits_limits(width: u32, height: u32) -> bool {
    width <= MAX_SURFACE_SIDE
        && height <= MAX_SURFACE_SIDE
        && u64::from(width) * u64::from(height) <= MAX_SURFACE_AREA
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` into RGBA bytes.
pub fn parse_hex_rgba(hex: &str) -> Option<[u8; 4]> {
    let hex = hex.trim().trim_start_matches('#');
    if !hex.is_ascii() {
        return None;
    }
    let byte = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let r = byte(&hex[0..1].repeat(2))?;
            let g = byte(&hex[1..2].repeat(2))?;
            let b = byte(&hex[2..3].repeat(2))?;
            Some([r, g, b, 255])
        }
        6 => Some([byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, 255]),
        8 => Some([
            byte(&hex[0..2])?,
            byte(&hex[2..4])?,
            byte(&hex[4..6])?,
            byte(&hex[6..8])?,
        ]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_pixels() {
        let mut s = Surface::new(4, 2);
        s.fill_rect(0, 0, 2, 2, [255, 0, 0, 255]);
        let url = s.to_data_url().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let b64 = url.trim_start_matches("data:image/png;base64,");
        let bytes = BASE64_STD.decode(b64).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 2));
        assert_eq!(decoded.get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
        assert_eq!(decoded.get_pixel(3, 1), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn cross_origin_draw_taints() {
        let mut s = Surface::new(8, 8);
        let foreign = RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255]));
        s.draw_image(&foreign, 1, 1, Origin::SameOrigin);
        assert!(s.to_data_url().is_ok());

        s.draw_image(&foreign, 3, 3, Origin::CrossOrigin);
        assert!(matches!(s.to_data_url(), Err(SurfaceError::Tainted)));
        // Clearing does not restore origin-cleanliness.
        s.clear();
        assert!(!s.is_origin_clean());
    }

    #[test]
    fn zero_sized_surface_is_rejected() {
        let s = Surface::new(0, 10);
        assert!(matches!(
            s.to_data_url(),
            Err(SurfaceError::Empty { width: 0, height: 10 })
        ));
    }

    #[test]
    fn fill_rect_clips_to_bounds() {
        let mut s = Surface::new(3, 3);
        s.fill_rect(2, 2, 10, 10, [1, 2, 3, 255]);
        assert_eq!(s.pixels().get_pixel(2, 2), &Rgba([1, 2, 3, 255]));
        assert_eq!(s.pixels().get_pixel(1, 1), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_rgba("#fff"), Some([255, 255, 255, 255]));
        assert_eq!(parse_hex_rgba("00ff0080"), Some([0, 255, 0, 128]));
        assert_eq!(parse_hex_rgba("#12"), None);
    }

    #[test]
    fn non_ascii_hex_is_rejected() {
        assert_eq!(parse_hex_rgba("#aé"), None);
        assert_eq!(parse_hex_rgba("#ééé"), None);
        assert_eq!(parse_hex_rgba("#ff00é"), None);
    }

    #[test]
    fn oversized_surfaces_are_empty() {
        let s = Surface::new(u32::MAX, u32::MAX);
        assert_eq!((s.width(), s.height()), (0, 0));
        assert!(matches!(s.to_png(), Err(SurfaceError::Empty { .. })));

        // Each side fits but the area does not.
        let s = Surface::new(20_000, 20_000);
        assert_eq!(s.width(), 0);

        let s = Surface::new(MAX_SURFACE_SIDE + 1, 1);
        assert_eq!(s.width(), 0);
        assert!(fits_limits(MAX_SURFACE_SIDE, 1));
    }
}
