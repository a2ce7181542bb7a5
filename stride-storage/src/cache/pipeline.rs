//! Derived value pipeline: bytes → decoded image → thumbnail → dominant colors.
//!
//! Every step is pure and synchronous. Callers on an async executor should run
//! it on the blocking pool (the image loader does).

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use stride_core::{CacheSettings, CachedImageEntry, PipelineError, Rgb};

/// Decoded RGBA8 bitmap.
pub type RawImage = RgbaImage;

/// Pixels with alpha below this are ignored by color extraction.
const MIN_OPAQUE_ALPHA: u8 = 128;

/// Bits kept per channel when bucketing colors.
const QUANT_BITS: u8 = 4;
const BUCKETS: usize = 1 << (3 * QUANT_BITS);

/// Output of a full derivation: the in-memory entry plus the encoded thumbnail
/// written to the persisted tier.
#[derive(Debug, Clone)]
pub struct DerivedImage {
    pub entry: CachedImageEntry,
    pub encoded: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedValuePipeline {
    target_width: u32,
    target_height: u32,
    color_count: usize,
}

#[derive(Clone, Copy, Default)]
struct Bucket {
    count: u64,
    r: u64,
    g: u64,
    b: u64,
}

impl DerivedValuePipeline {
    pub fn new(target_width: u32, target_height: u32, color_count: usize) -> Self {
        Self {
            target_width,
            target_height,
            color_count,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            settings.image_target_width,
            settings.image_target_height,
            settings.dominant_color_count,
        )
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Decode any supported format into RGBA8.
    pub fn decode(&self, bytes: &[u8]) -> Result<RawImage, PipelineError> {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgba8())
            .map_err(|e| PipelineError::DecodeFailed {
                reason: e.to_string(),
            })
    }

    /// Stretch to the fixed target footprint. Aspect ratio is not preserved.
    pub fn resize(&self, image: &RawImage) -> RawImage {
        if image.dimensions() == (self.target_width, self.target_height) {
            return image.clone();
        }
        imageops::resize(
            image,
            self.target_width,
            self.target_height,
            FilterType::Triangle,
        )
    }

    /// Most common colors, most prominent first.
    ///
    /// Opaque pixels are bucketed to 4 bits per channel; buckets are ranked by
    /// population with ties going to the lower bucket index, and each reports
    /// the mean color of its pixels. Deterministic for identical input.
    pub fn extract_dominant_colors(&self, image: &RawImage) -> Vec<Rgb> {
        let mut buckets = vec![Bucket::default(); BUCKETS];
        let shift = 8 - QUANT_BITS;

        for pixel in image.pixels() {
            let [r, g, b, a] = pixel.0;
            if a < MIN_OPAQUE_ALPHA {
                continue;
            }
            let index = ((r >> shift) as usize) << (2 * QUANT_BITS)
                | ((g >> shift) as usize) << QUANT_BITS
                | (b >> shift) as usize;
            let bucket = &mut buckets[index];
            bucket.count += 1;
            bucket.r += u64::from(r);
            bucket.g += u64::from(g);
            bucket.b += u64::from(b);
        }

        let mut ranked: Vec<(usize, Bucket)> = buckets
            .into_iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.count > 0)
            .collect();
        ranked.sort_by(|(ia, a), (ib, b)| b.count.cmp(&a.count).then(ia.cmp(ib)));

        ranked
            .into_iter()
            .take(self.color_count)
            .map(|(_, bucket)| {
                Rgb::new(
                    (bucket.r / bucket.count) as u8,
                    (bucket.g / bucket.count) as u8,
                    (bucket.b / bucket.count) as u8,
                )
            })
            .collect()
    }

    /// PNG-encode an image for the persisted tier.
    pub fn encode_png(&self, image: &RawImage) -> Result<Vec<u8>, PipelineError> {
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| PipelineError::EncodeFailed {
                reason: e.to_string(),
            })?;
        Ok(cursor.into_inner())
    }

    /// Full derivation for freshly fetched bytes.
    pub fn derive(&self, bytes: &[u8]) -> Result<DerivedImage, PipelineError> {
        let decoded = self.decode(bytes)?;
        let resized = self.resize(&decoded);
        let colors = self.extract_dominant_colors(&resized);
        let encoded = self.encode_png(&resized)?;
        Ok(DerivedImage {
            entry: into_entry(resized, colors),
            encoded,
        })
    }

    /// Feature extraction only, for bytes already resized and stored.
    pub fn features_from_stored(&self, bytes: &[u8]) -> Result<CachedImageEntry, PipelineError> {
        let decoded = self.decode(bytes)?;
        let colors = self.extract_dominant_colors(&decoded);
        Ok(into_entry(decoded, colors))
    }
}

fn into_entry(image: RawImage, colors: Vec<Rgb>) -> CachedImageEntry {
    let (width, height) = image.dimensions();
    CachedImageEntry::new(width, height, image.into_raw(), colors)
}
