//! Text measurement and rasterization for text watermarks.
//!
//! The compositor only needs two things from a font: how big a string is at
//! a given size, and a coverage mask to paint. [`BitmapFont`] provides both
//! from the embedded `font8x8` glyphs, scaled with nearest-neighbour so the
//! binary carries no font files.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{GrayImage, Luma};

/// Pixel size of rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextExtent {
    pub width: u32,
    pub height: u32,
}

/// Font metrics provider used by the watermark compositor.
pub trait FontMetrics: Send + Sync {
    fn measure(&self, text: &str, font_size: f32) -> TextExtent;

    /// Coverage mask of exactly [`measure`](Self::measure) size; 255 = ink.
    fn rasterize(&self, text: &str, font_size: f32) -> GrayImage;
}

const GLYPH_SIZE: u32 = 8;

/// The embedded 8×8 bitmap font.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitmapFont;

impl BitmapFont {
    pub fn new() -> Self {
        Self
    }

    /// Integer upscale for a requested pixel size.
    fn scale(font_size: f32) -> u32 {
        ((font_size / GLYPH_SIZE as f32).round() as u32).clamp(1, u32::MAX / GLYPH_SIZE)
    }

    fn glyph(ch: char) -> [u8; 8] {
        BASIC_FONTS
            .get(ch)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8])
    }
}

impl FontMetrics for BitmapFont {
    fn measure(&self, text: &str, font_size: f32) -> TextExtent {
        let count = text.chars().count() as u32;
        if count == 0 {
            return TextExtent {
                width: 0,
                height: 0,
            };
        }
        let scale = Self::scale(font_size);
        let glyph = GLYPH_SIZE * scale;
        // One `scale`-wide gap between glyphs, none after the last. Saturates
        // instead of wrapping; callers bound the size before rasterizing.
        TextExtent {
            width: count
                .saturating_mul(glyph)
                .saturating_add((count - 1).saturating_mul(scale)),
            height: glyph,
        }
    }

    fn rasterize(&self, text: &str, font_size: f32) -> GrayImage {
        let extent = self.measure(text, font_size);
        let mut mask = GrayImage::new(extent.width, extent.height);
        let scale = Self::scale(font_size);
        let advance = GLYPH_SIZE * scale + scale;

        for (index, ch) in text.chars().enumerate() {
            let origin_x = index as u32 * advance;
            for (row, &bits) in Self::glyph(ch).iter().enumerate() {
                for col in 0..GLYPH_SIZE {
                    if (bits >> col) & 1 == 0 {
                        continue;
                    }
                    let base_x = origin_x + col * scale;
                    let base_y = row as u32 * scale;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            mask.put_pixel(base_x + dx, base_y + dy, Luma([255]));
                        }
                    }
                }
            }
        }
        mask
    }
}
