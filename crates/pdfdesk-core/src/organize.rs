//! Page-level edits on an existing document
//!
//! Rotation, deletion, watermarks, signatures and page numbers. These keep
//! the original page content and only touch the page tree or draw on top.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::document::{add_jpeg, add_png, save_document, set_page_rotation, SourceDocument};
use crate::error::{PdfDeskError, Result};
use crate::fonts::StandardFont;
use crate::overlay::{PageOverlay, Rgb, TextStyle};

pub const WATERMARK_FONT_SIZE: f32 = 50.0;
pub const SIGNATURE_SCALE: f32 = 0.5;
pub const SIGNATURE_MARGIN: f32 = 50.0;
pub const PAGE_NUMBER_FONT_SIZE: f32 = 12.0;
pub const PAGE_NUMBER_MARGIN: f32 = 30.0;

/// Add `angle` degrees to each listed page's rotation
///
/// Indices are 0-based; those outside the document are ignored.
pub fn rotate_pages(bytes: &[u8], rotations: &BTreeMap<usize, i64>) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    let changes: Vec<_> = rotations
        .iter()
        .filter_map(|(&index, &angle)| match source.pages().get(index) {
            Some(page) => Some((page.id, page.rotation + angle)),
            None => {
                debug!("Ignoring rotation for missing page index {}", index);
                None
            }
        })
        .collect();

    let mut doc = source.into_document();
    for (page_id, rotation) in changes {
        set_page_rotation(&mut doc, page_id, rotation)?;
    }
    save_document(doc)
}

/// Remove pages by 0-based index; indices outside the document are ignored
pub fn delete_pages(bytes: &[u8], indices: &[usize]) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    let count = source.page_count();
    let doomed: BTreeSet<usize> = indices.iter().copied().filter(|&i| i < count).collect();

    if doomed.len() == count {
        return Err(PdfDeskError::Range(
            "cannot delete every page of the document".into(),
        ));
    }

    let mut doc = source.into_document();
    // Highest first so earlier page numbers stay valid
    for index in doomed.iter().rev() {
        doc.delete_pages(&[*index as u32 + 1]);
    }
    info!("Deleted {} of {} pages", doomed.len(), count);
    save_document(doc)
}

/// Appearance of a diagonal text watermark
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkStyle {
    pub font_size: f32,
    pub color: Rgb,
    pub opacity: f32,
    pub rotation: f32,
}

impl Default for WatermarkStyle {
    fn default() -> Self {
        Self {
            font_size: WATERMARK_FONT_SIZE,
            color: Rgb::gray(0.75),
            opacity: 0.5,
            rotation: 45.0,
        }
    }
}

/// Stamp `text` in Helvetica across the middle of every page
///
/// The unrotated text box is centered on the page; rotation turns it around
/// its lower-left corner.
pub fn watermark(
    bytes: &[u8],
    text: &str,
    style: &WatermarkStyle,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    let pages = source.pages().to_vec();
    let mut doc = source.into_document();

    let font = StandardFont::Helvetica;
    let font_id = font.add_to(&mut doc);
    let encoded = font.encode(text);
    let text_width = font.width_of(text, style.font_size);
    let text_height = font.height_at(style.font_size);

    for page in &pages {
        cancel.check()?;
        let [llx, lly, _, _] = page.media_box;
        let x = llx + page.width() / 2.0 - text_width / 2.0;
        let y = lly + page.height() / 2.0 - text_height / 2.0;

        let mut overlay = PageOverlay::new(&mut doc, page.id);
        overlay.draw_text(
            encoded.clone(),
            font_id,
            style.font_size,
            x,
            y,
            TextStyle {
                color: style.color,
                rotation: style.rotation,
                opacity: Some(style.opacity),
            },
        );
        overlay.finish()?;
    }

    info!("Watermarked {} pages", pages.len());
    save_document(doc)
}

/// Place a signature image in the bottom-right corner of one page
///
/// `page` defaults to the last page. PNG and JPEG signatures are accepted.
pub fn sign(bytes: &[u8], signature: &[u8], page: Option<usize>) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    let index = match page {
        Some(index) => index,
        None => source.page_count().saturating_sub(1),
    };
    let Some(target) = source.pages().get(index).copied() else {
        warn!("Signature target page {} does not exist", index + 1);
        return save_document(source.into_document());
    };

    let mut doc = source.into_document();
    let image = match image::guess_format(signature) {
        Ok(ImageFormat::Png) => add_png(&mut doc, signature)?,
        Ok(ImageFormat::Jpeg) => add_jpeg(&mut doc, signature.to_vec())?,
        _ => {
            return Err(PdfDeskError::Image(
                "signature must be a PNG or JPEG image".into(),
            ))
        }
    };

    let width = image.width as f32 * SIGNATURE_SCALE;
    let height = image.height as f32 * SIGNATURE_SCALE;
    let [llx, lly, _, _] = target.media_box;
    let x = llx + target.width() - width - SIGNATURE_MARGIN;
    let y = lly + SIGNATURE_MARGIN;

    let mut overlay = PageOverlay::new(&mut doc, target.id);
    overlay.draw_image(image.id, x, y, width, height);
    overlay.finish()?;

    debug!("Signed page {} at ({:.1}, {:.1})", index + 1, x, y);
    save_document(doc)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageNumberPosition {
    #[default]
    BottomCenter,
    BottomRight,
    TopRight,
}

impl FromStr for PageNumberPosition {
    type Err = PdfDeskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bottom-center" => Ok(Self::BottomCenter),
            "bottom-right" => Ok(Self::BottomRight),
            "top-right" => Ok(Self::TopRight),
            other => Err(PdfDeskError::Operation(format!(
                "unknown page number position '{}'",
                other
            ))),
        }
    }
}

impl PageNumberPosition {
    /// Baseline origin of a label `text_width` wide on a page
    fn origin(self, page_width: f32, page_height: f32, text_width: f32) -> (f32, f32) {
        match self {
            Self::BottomCenter => (page_width / 2.0 - text_width / 2.0, PAGE_NUMBER_MARGIN),
            Self::BottomRight => (
                page_width - text_width - PAGE_NUMBER_MARGIN,
                PAGE_NUMBER_MARGIN,
            ),
            Self::TopRight => (
                page_width - text_width - PAGE_NUMBER_MARGIN,
                page_height - PAGE_NUMBER_MARGIN,
            ),
        }
    }
}

/// Label every page "Page N" in black Helvetica-Bold
pub fn add_page_numbers(
    bytes: &[u8],
    position: PageNumberPosition,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    let pages = source.pages().to_vec();
    let mut doc = source.into_document();

    let font = StandardFont::HelveticaBold;
    let font_id = font.add_to(&mut doc);

    for (index, page) in pages.iter().enumerate() {
        cancel.check()?;
        let label = format!("Page {}", index + 1);
        let text_width = font.width_of(&label, PAGE_NUMBER_FONT_SIZE);
        let (x, y) = position.origin(page.width(), page.height(), text_width);
        let [llx, lly, _, _] = page.media_box;

        let mut overlay = PageOverlay::new(&mut doc, page.id);
        overlay.draw_text(
            font.encode(&label),
            font_id,
            PAGE_NUMBER_FONT_SIZE,
            llx + x,
            lly + y,
            TextStyle::default(),
        );
        overlay.finish()?;
    }
    save_document(doc)
}
