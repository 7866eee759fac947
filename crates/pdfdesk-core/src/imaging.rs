//! Raster round-trip flows
//!
//! Each page is rendered, transformed in pixel space, re-encoded as JPEG and
//! placed on a fresh page of the original point size. Pages are processed
//! strictly one after another and each raster is dropped before the next is
//! rendered.

use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::document::{save_document, set_page_rotation, OutputDocument, SourceDocument};
use crate::error::Result;
use crate::pixel::{self, encode_jpeg, invert_colors, PixelOptions, PIPELINE_JPEG_QUALITY};
use crate::raster::{RasterBuffer, Rasterizer};

pub const COMPRESS_SCALE: f32 = 1.5;
pub const DEFAULT_COMPRESS_QUALITY: f32 = 0.5;

/// Render scale for clean, vectorize, optimize and invert
pub const HIGH_QUALITY_SCALE: f32 = 2.0;

pub const INVERT_JPEG_QUALITY: f32 = 0.85;

/// Orientation probing renders small
pub const DESKEW_SCALE: f32 = 0.5;

/// Detections at or below this confidence are ignored
pub const DESKEW_MIN_CONFIDENCE: f32 = 80.0;

/// Page orientation reported by an [`OrientationDetector`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationEstimate {
    /// Clockwise quarter-turn correction, e.g. 90 or 270
    pub degrees: i64,
    /// 0-100
    pub confidence: f32,
}

/// Estimates how a rendered page should be rotated to read upright
pub trait OrientationDetector {
    fn detect(&self, page: &RasterBuffer) -> Result<OrientationEstimate>;
}

/// Render every page at `scale`, encode each with `encode`, and assemble the
/// results as full-page images
fn rebuild<F>(
    rasterizer: &dyn Rasterizer,
    bytes: &[u8],
    scale: f32,
    cancel: &CancellationToken,
    mut encode: F,
) -> Result<Vec<u8>>
where
    F: FnMut(&mut RasterBuffer) -> Result<Vec<u8>>,
{
    let document = rasterizer.open(bytes)?;
    let mut output = OutputDocument::new();

    for index in 0..document.page_count() {
        cancel.check()?;
        let mut buffer = document.render(index, scale)?;
        let jpeg = encode(&mut buffer)?;
        let (width, height) = buffer.point_size();
        drop(buffer);

        let image = output.embed_jpeg(jpeg)?;
        let page = output.add_page(width, height);
        output.draw_image(page, &image, 0.0, 0.0, width, height)?;
        debug!("Page {} rebuilt at {:.0}x{:.0}pt", index + 1, width, height);
    }
    output.save()
}

/// Replace every page with a JPEG of `quality` (0.0-1.0)
pub fn compress(
    rasterizer: &dyn Rasterizer,
    bytes: &[u8],
    quality: f32,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let out = rebuild(rasterizer, bytes, COMPRESS_SCALE, cancel, |buffer| {
        encode_jpeg(buffer, quality)
    })?;
    info!("Compressed {} bytes to {}", bytes.len(), out.len());
    Ok(out)
}

/// Run the pixel pipeline over every page
pub fn apply_filters(
    rasterizer: &dyn Rasterizer,
    bytes: &[u8],
    options: &PixelOptions,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let options = options.clone().validated();
    rebuild(rasterizer, bytes, HIGH_QUALITY_SCALE, cancel, |buffer| {
        pixel::apply(buffer, &options);
        encode_jpeg(buffer, PIPELINE_JPEG_QUALITY)
    })
}

/// Mild contrast boost for scanned documents
pub fn clean(
    rasterizer: &dyn Rasterizer,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let options = PixelOptions {
        contrast: 1.2,
        ..Default::default()
    };
    apply_filters(rasterizer, bytes, &options, cancel)
}

/// Binarize pages to crisp black and white
pub fn vectorize(
    rasterizer: &dyn Rasterizer,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let options = PixelOptions {
        threshold: Some(pixel::DEFAULT_VECTORIZE_THRESHOLD),
        contrast: 1.5,
        ..Default::default()
    };
    apply_filters(rasterizer, bytes, &options, cancel)
}

/// Rotate pages the detector is confident are not upright
///
/// The correction is added to the existing rotation. A failed detection
/// leaves that page untouched.
pub fn deskew(
    rasterizer: &dyn Rasterizer,
    detector: &dyn OrientationDetector,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    let rendered = rasterizer.open(bytes)?;
    let mut corrections = Vec::new();

    for (index, page) in source.pages().iter().enumerate() {
        cancel.check()?;
        let buffer = rendered.render(index, DESKEW_SCALE)?;
        match detector.detect(&buffer) {
            Ok(estimate) => {
                debug!(
                    "Page {} orientation: {} deg ({:.0}%)",
                    index + 1,
                    estimate.degrees,
                    estimate.confidence
                );
                if estimate.confidence > DESKEW_MIN_CONFIDENCE && estimate.degrees != 0 {
                    corrections.push((page.id, page.rotation + estimate.degrees));
                }
            }
            Err(e) => warn!("Orientation detection failed for page {}: {}", index + 1, e),
        }
    }
    drop(rendered);

    info!("Deskew: rotating {} pages", corrections.len());
    let mut doc = source.into_document();
    for (page_id, rotation) in corrections {
        set_page_rotation(&mut doc, page_id, rotation)?;
    }
    save_document(doc)
}

/// Optional deskew followed by the pixel pipeline
///
/// Without any image filter the (possibly deskewed) input is returned as is.
pub fn optimize(
    rasterizer: &dyn Rasterizer,
    detector: Option<&dyn OrientationDetector>,
    bytes: &[u8],
    options: &PixelOptions,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let options = options.clone().validated();

    let deskewed = match (options.deskew, detector) {
        (true, Some(detector)) => Some(deskew(rasterizer, detector, bytes, cancel)?),
        (true, None) => {
            warn!("Deskew requested but no orientation detector is configured");
            None
        }
        (false, _) => None,
    };
    let current = deskewed.as_deref().unwrap_or(bytes);

    if !options.has_image_filters() {
        return Ok(current.to_vec());
    }
    apply_filters(rasterizer, current, &options, cancel)
}

/// Invert page colors, optionally collapsing to gray first
pub fn invert(
    rasterizer: &dyn Rasterizer,
    bytes: &[u8],
    grayscale: bool,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    rebuild(rasterizer, bytes, HIGH_QUALITY_SCALE, cancel, |buffer| {
        invert_colors(buffer, grayscale);
        encode_jpeg(buffer, INVERT_JPEG_QUALITY)
    })
}
