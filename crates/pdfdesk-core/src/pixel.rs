//! Per-pixel enhancement of rendered pages
//!
//! The pipeline runs in a fixed order: stroke weighting, grayscale,
//! contrast, background cleanup, binarization, text darkening, inversion.
//! Each step works on the gray value produced by the previous one, so
//! reordering changes the output.

use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::raster::RasterBuffer;

/// Contrast multipliers indexed by text enhancement level
pub const TEXT_CONTRAST_LEVELS: [f32; 5] = [1.0, 1.1, 1.25, 1.5, 2.0];

/// Gray values above these become white, indexed by cleanup level
pub const BACKGROUND_THRESHOLDS: [u8; 5] = [255, 230, 200, 180, 150];

/// Binarization cutoff used when vectorizing without an explicit threshold
pub const DEFAULT_VECTORIZE_THRESHOLD: f32 = 160.0;

/// JPEG quality for pipeline output
pub const PIPELINE_JPEG_QUALITY: f32 = 0.8;

const MAX_LEVEL: u8 = 4;
const DARKEN_TEXT_LEVEL: u8 = 3;
const DARKEN_BELOW: u8 = 80;

/// Stroke-thickening offsets, cumulative by level
const WEIGHT_OFFSETS: [&[(i32, i32)]; 4] = [
    &[(1, 0), (0, 1)],
    &[(-1, 0), (0, -1)],
    &[(1, 1), (-1, -1)],
    &[(2, 0), (-2, 0), (0, 2), (0, -2)],
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PixelOptions {
    /// Binarize at this gray level (0-255)
    pub threshold: Option<f32>,
    pub contrast: f32,
    pub invert: bool,
    /// Binarize at 160 unless `threshold` is set
    pub vectorize: bool,
    pub enhance_weight: u8,
    pub clean_background: u8,
    pub enhance_text: u8,
    pub deskew: bool,
}

impl Default for PixelOptions {
    fn default() -> Self {
        Self {
            threshold: None,
            contrast: 1.0,
            invert: false,
            vectorize: false,
            enhance_weight: 0,
            clean_background: 0,
            enhance_text: 0,
            deskew: false,
        }
    }
}

impl PixelOptions {
    /// Clamp levels to 0-4, threshold to 0-255, and replace an unusable
    /// contrast with 1.0
    pub fn validated(mut self) -> Self {
        self.enhance_weight = self.enhance_weight.min(MAX_LEVEL);
        self.clean_background = self.clean_background.min(MAX_LEVEL);
        self.enhance_text = self.enhance_text.min(MAX_LEVEL);
        self.threshold = self
            .threshold
            .filter(|t| t.is_finite())
            .map(|t| t.clamp(0.0, 255.0));
        if !self.contrast.is_finite() || self.contrast == 0.0 {
            self.contrast = 1.0;
        }
        self
    }

    /// Active binarization cutoff, if any
    pub fn effective_threshold(&self) -> Option<f32> {
        self.threshold
            .or(self.vectorize.then_some(DEFAULT_VECTORIZE_THRESHOLD))
    }

    pub fn contrast_multiplier(&self) -> f32 {
        if self.enhance_text > 0 {
            TEXT_CONTRAST_LEVELS[self.enhance_text.min(MAX_LEVEL) as usize]
        } else {
            self.contrast
        }
    }

    /// Whether any option requires a raster round trip
    pub fn has_image_filters(&self) -> bool {
        self.invert
            || self.vectorize
            || self.clean_background > 0
            || self.enhance_text > 0
            || self.enhance_weight > 0
    }
}

/// Integer luminance approximation of 0.299/0.587/0.114
#[inline]
pub fn gray(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8) as u8
}

/// Clamp to a byte and round half to even
#[inline]
fn clamp_round(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0).round_ties_even() as u8
}

/// `clamp((g - 128) * k + 128)` for every gray level
pub fn contrast_lut(k: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (g, slot) in lut.iter_mut().enumerate() {
        *slot = clamp_round((g as f32 - 128.0) * k + 128.0);
    }
    lut
}

pub fn invert_lut() -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (g, slot) in lut.iter_mut().enumerate() {
        *slot = 255 - g as u8;
    }
    lut
}

/// Run the enhancement pipeline in place
pub fn apply(buffer: &mut RasterBuffer, options: &PixelOptions) {
    let options = options.clone().validated();

    if options.enhance_weight > 0 {
        thicken_strokes(buffer, options.enhance_weight);
    }

    let contrast = contrast_lut(options.contrast_multiplier());
    let background = (options.clean_background > 0)
        .then(|| BACKGROUND_THRESHOLDS[options.clean_background as usize]);
    let threshold = options.effective_threshold();
    let darken = options.enhance_text >= DARKEN_TEXT_LEVEL && threshold.is_none();
    let invert = options.invert.then(invert_lut);

    for px in buffer.pixels.chunks_exact_mut(4) {
        let mut g = contrast[gray(px[0], px[1], px[2]) as usize];

        if let Some(limit) = background {
            if g > limit {
                g = 255;
            }
        }
        if let Some(cutoff) = threshold {
            g = if g as f32 > cutoff { 255 } else { 0 };
        }
        if darken && g < DARKEN_BELOW {
            g = 0;
        }
        if let Some(lut) = &invert {
            g = lut[g as usize];
        }

        px[0] = g;
        px[1] = g;
        px[2] = g;
    }
}

/// Multiply shifted copies of the unweighted image onto itself
fn thicken_strokes(buffer: &mut RasterBuffer, level: u8) {
    let original = buffer.pixels.clone();
    let (width, height) = (buffer.width as i32, buffer.height as i32);

    for &(dx, dy) in WEIGHT_OFFSETS
        .iter()
        .take(level.min(MAX_LEVEL) as usize)
        .flat_map(|offsets| offsets.iter())
    {
        for y in 0..height {
            let sy = y - dy;
            if sy < 0 || sy >= height {
                continue;
            }
            for x in 0..width {
                let sx = x - dx;
                if sx < 0 || sx >= width {
                    continue;
                }
                let dst = ((y * width + x) * 4) as usize;
                let src = ((sy * width + sx) * 4) as usize;
                for c in 0..3 {
                    let product = buffer.pixels[dst + c] as u32 * original[src + c] as u32;
                    buffer.pixels[dst + c] = ((product + 127) / 255) as u8;
                }
            }
        }
    }
}

/// Invert colors, per channel or as inverted gray
pub fn invert_colors(buffer: &mut RasterBuffer, grayscale: bool) {
    for px in buffer.pixels.chunks_exact_mut(4) {
        if grayscale {
            let avg = ((px[0] as u32 + px[1] as u32 + px[2] as u32) / 3) as u8;
            let inverted = 255 - avg;
            px[0] = inverted;
            px[1] = inverted;
            px[2] = inverted;
        } else {
            px[0] = 255 - px[0];
            px[1] = 255 - px[1];
            px[2] = 255 - px[2];
        }
    }
}

/// Encode as baseline JPEG; `quality` is in 0.0-1.0
pub fn encode_jpeg(buffer: &RasterBuffer, quality: f32) -> Result<Vec<u8>> {
    let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&buffer.to_rgb_image())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn uniform(gray_value: u8, width: u32, height: u32) -> RasterBuffer {
        let mut buffer = RasterBuffer::blank(width, height, 1.0);
        for px in buffer.pixels.chunks_exact_mut(4) {
            px[..3].copy_from_slice(&[gray_value; 3]);
        }
        buffer
    }

    fn first_gray(buffer: &RasterBuffer) -> u8 {
        buffer.pixels[0]
    }

    #[test]
    fn test_gray_weights() {
        assert_eq!(gray(255, 255, 255), 255);
        assert_eq!(gray(0, 0, 0), 0);
        assert_eq!(gray(255, 0, 0), 76);
        assert_eq!(gray(0, 255, 0), 149);
        assert_eq!(gray(0, 0, 255), 28);
    }

    #[test]
    fn test_text_level_two_uses_exact_multiplier() {
        let options = PixelOptions {
            enhance_text: 2,
            ..Default::default()
        };
        assert_eq!(options.contrast_multiplier(), 1.25);
        assert_eq!(contrast_lut(1.25)[100], 93);

        let mut buffer = uniform(100, 1, 1);
        apply(&mut buffer, &options);
        assert_eq!(first_gray(&buffer), 93);
    }

    #[test]
    fn test_contrast_lut_rounds_half_to_even() {
        // (1 - 128) * 1.5 + 128 = -62.5 clamps to 0; (129 - 128) * 1.5 + 128 = 129.5
        let lut = contrast_lut(1.5);
        assert_eq!(lut[1], 0);
        assert_eq!(lut[129], 130);
        assert_eq!(contrast_lut(1.1)[133], 134);
    }

    #[test]
    fn test_validated_clamps_levels_and_contrast() {
        let options = PixelOptions {
            enhance_weight: 9,
            clean_background: 7,
            enhance_text: 5,
            contrast: 0.0,
            threshold: Some(400.0),
            ..Default::default()
        }
        .validated();
        assert_eq!(options.enhance_weight, 4);
        assert_eq!(options.clean_background, 4);
        assert_eq!(options.enhance_text, 4);
        assert_eq!(options.contrast, 1.0);
        assert_eq!(options.threshold, Some(255.0));
    }

    #[test]
    fn test_deserializes_camel_case_with_defaults() {
        let options: PixelOptions =
            serde_json::from_str(r#"{"cleanBackground":2,"enhanceText":1}"#).unwrap();
        assert_eq!(options.clean_background, 2);
        assert_eq!(options.enhance_text, 1);
        assert_eq!(options.contrast, 1.0);
        assert!(options.threshold.is_none());
    }

    #[test]
    fn test_background_cleanup_whitens_above_threshold() {
        let options = PixelOptions {
            clean_background: 2,
            ..Default::default()
        };
        let mut light = uniform(201, 1, 1);
        apply(&mut light, &options);
        assert_eq!(first_gray(&light), 255);

        let mut kept = uniform(200, 1, 1);
        apply(&mut kept, &options);
        assert_eq!(first_gray(&kept), 200);
    }

    #[test]
    fn test_vectorize_binarizes_at_default_threshold() {
        let options = PixelOptions {
            vectorize: true,
            ..Default::default()
        };
        assert_eq!(options.effective_threshold(), Some(160.0));

        let mut above = uniform(161, 1, 1);
        apply(&mut above, &options);
        assert_eq!(first_gray(&above), 255);

        let mut at = uniform(160, 1, 1);
        apply(&mut at, &options);
        assert_eq!(first_gray(&at), 0);
    }

    #[test]
    fn test_explicit_threshold_wins_over_vectorize() {
        let options = PixelOptions {
            vectorize: true,
            threshold: Some(100.0),
            ..Default::default()
        };
        assert_eq!(options.effective_threshold(), Some(100.0));
    }

    #[test]
    fn test_text_darkening_only_without_threshold() {
        // Level 3 multiplier 1.5: gray 90 -> (90-128)*1.5+128 = 71, then forced to 0
        let darken = PixelOptions {
            enhance_text: 3,
            ..Default::default()
        };
        let mut buffer = uniform(90, 1, 1);
        apply(&mut buffer, &darken);
        assert_eq!(first_gray(&buffer), 0);

        let mut light = uniform(100, 1, 1);
        apply(&mut light, &darken);
        assert_eq!(first_gray(&light), 86);

        let binarized = PixelOptions {
            enhance_text: 3,
            threshold: Some(50.0),
            ..Default::default()
        };
        let mut buffer = uniform(90, 1, 1);
        apply(&mut buffer, &binarized);
        assert_eq!(first_gray(&buffer), 255);
    }

    #[test]
    fn test_invert_runs_last() {
        let options = PixelOptions {
            invert: true,
            vectorize: true,
            ..Default::default()
        };
        let mut buffer = uniform(200, 1, 1);
        apply(&mut buffer, &options);
        assert_eq!(first_gray(&buffer), 0);
    }

    #[test]
    fn test_alpha_is_untouched() {
        let mut buffer = RasterBuffer::from_rgba(1, 1, 1.0, vec![10, 20, 30, 77]).unwrap();
        apply(
            &mut buffer,
            &PixelOptions {
                invert: true,
                ..Default::default()
            },
        );
        assert_eq!(buffer.pixels[3], 77);
        assert_eq!(buffer.pixels[0], buffer.pixels[1]);
        assert_eq!(buffer.pixels[1], buffer.pixels[2]);
    }

    #[test]
    fn test_double_invert_restores_grayscale() {
        let mut buffer = RasterBuffer::from_rgba(
            2,
            1,
            1.0,
            vec![12, 200, 90, 255, 250, 250, 250, 255],
        )
        .unwrap();
        apply(&mut buffer, &PixelOptions::default());
        let grayscale = buffer.clone();

        let invert = PixelOptions {
            invert: true,
            ..Default::default()
        };
        apply(&mut buffer, &invert);
        apply(&mut buffer, &invert);
        assert_eq!(buffer, grayscale);
    }

    #[test]
    fn test_weight_level_one_spreads_dark_pixel_right_and_down() {
        let mut buffer = uniform(255, 3, 3);
        buffer.pixels[16..19].copy_from_slice(&[0, 0, 0]);
        thicken_strokes(&mut buffer, 1);

        let at = |x: usize, y: usize| buffer.pixels[(y * 3 + x) * 4];
        assert_eq!(at(1, 1), 0);
        assert_eq!(at(2, 1), 0);
        assert_eq!(at(1, 2), 0);
        assert_eq!(at(0, 1), 255);
        assert_eq!(at(1, 0), 255);
        assert_eq!(at(2, 2), 255);
    }

    #[test]
    fn test_weight_level_three_includes_earlier_levels_and_diagonals() {
        let mut buffer = uniform(255, 3, 3);
        buffer.pixels[16..19].copy_from_slice(&[0, 0, 0]);
        thicken_strokes(&mut buffer, 3);

        let at = |x: usize, y: usize| buffer.pixels[(y * 3 + x) * 4];
        for (x, y) in [(0, 1), (2, 1), (1, 0), (1, 2), (0, 0), (2, 2)] {
            assert_eq!(at(x, y), 0, "({}, {})", x, y);
        }
        assert_eq!(at(2, 0), 255);
        assert_eq!(at(0, 2), 255);
    }

    #[test]
    fn test_invert_colors_per_channel_and_grayscale() {
        let mut color = RasterBuffer::from_rgba(1, 1, 1.0, vec![10, 20, 30, 255]).unwrap();
        invert_colors(&mut color, false);
        assert_eq!(color.pixels, vec![245, 235, 225, 255]);

        let mut mono = RasterBuffer::from_rgba(1, 1, 1.0, vec![10, 20, 30, 255]).unwrap();
        invert_colors(&mut mono, true);
        assert_eq!(mono.pixels, vec![235, 235, 235, 255]);
    }

    #[test]
    fn test_has_image_filters() {
        assert!(!PixelOptions::default().has_image_filters());
        assert!(!PixelOptions {
            deskew: true,
            ..Default::default()
        }
        .has_image_filters());
        assert!(PixelOptions {
            clean_background: 1,
            ..Default::default()
        }
        .has_image_filters());
    }

    #[test]
    fn test_encode_jpeg_produces_decodable_image() {
        let buffer = uniform(128, 8, 4);
        let jpeg = encode_jpeg(&buffer, PIPELINE_JPEG_QUALITY).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    proptest! {
        #[test]
        fn contrast_lut_matches_formula(k in 0.1f32..3.0, g in 0u8..=255) {
            let expected = ((g as f32 - 128.0) * k + 128.0).clamp(0.0, 255.0);
            let actual = contrast_lut(k)[g as usize] as f32;
            prop_assert!((actual - expected).abs() <= 0.5);
        }

        #[test]
        fn invert_lut_is_self_inverse(g in 0u8..=255) {
            let lut = invert_lut();
            prop_assert_eq!(lut[lut[g as usize] as usize], g);
        }

        #[test]
        fn threshold_output_is_binary(g in 0u8..=255, t in 0.0f32..255.0) {
            let mut buffer = uniform(g, 1, 1);
            apply(&mut buffer, &PixelOptions { threshold: Some(t), ..Default::default() });
            let out = buffer.pixels[0];
            prop_assert!(out == 0 || out == 255);
        }
    }
}
