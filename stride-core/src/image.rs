//! Decoded image entries held by the volatile tier.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::CacheCost;

/// An opaque 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `#rrggbb` form, as used by the UI layer for tinting.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A decoded, resized image together with its dominant colors.
///
/// Immutable once constructed. The pixel buffer is reference counted so
/// clones handed to callers never copy the bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImageEntry {
    width: u32,
    height: u32,
    /// RGBA8, row-major, `width * height * 4` bytes.
    pixels: Arc<[u8]>,
    colors: Vec<Rgb>,
}

impl CachedImageEntry {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, colors: Vec<Rgb>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
            colors,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Dominant colors, most prominent first.
    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    /// Decoded size in bytes; the cost charged against the memory budget.
    pub fn byte_footprint(&self) -> CacheCost {
        self.pixels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_hex() {
        assert_eq!(Rgb::new(255, 0, 16).to_hex(), "#ff0010");
        assert_eq!(format!("{}", Rgb::new(1, 2, 3)), "#010203");
    }

    #[test]
    fn test_footprint_is_pixel_bytes() {
        let entry = CachedImageEntry::new(2, 3, vec![0u8; 2 * 3 * 4], vec![Rgb::new(0, 0, 0)]);
        assert_eq!(entry.byte_footprint(), 24);
        assert_eq!(entry.width(), 2);
        assert_eq!(entry.height(), 3);
    }

    #[test]
    fn test_clone_shares_pixels() {
        let entry = CachedImageEntry::new(1, 1, vec![9, 9, 9, 255], vec![]);
        let copy = entry.clone();
        assert_eq!(entry, copy);
        assert!(std::ptr::eq(entry.pixels().as_ptr(), copy.pixels().as_ptr()));
    }
}
