//! Page rasterization
//!
//! The rest of the crate talks to a [`Rasterizer`], which opens a document
//! once and renders its pages one at a time. The pdfium-backed
//! implementation is compiled with the `pdfium` feature and configured
//! exactly once through [`RendererConfig`].

use serde::{Deserialize, Serialize};

use crate::error::{PdfDeskError, Result};

/// An RGBA, 8 bits per channel pixel grid
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    pub width: u32,
    pub height: u32,
    /// Pixels per PDF point used when rendering
    pub scale: f32,
    pub pixels: Vec<u8>,
}

impl RasterBuffer {
    /// Opaque white buffer
    pub fn blank(width: u32, height: u32, scale: f32) -> Self {
        Self {
            width,
            height,
            scale,
            pixels: vec![255; width as usize * height as usize * 4],
        }
    }

    pub fn from_rgba(width: u32, height: u32, scale: f32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(PdfDeskError::Image(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            scale,
            pixels,
        })
    }

    /// Pixel size of a `page_width` x `page_height` point page at `scale`
    pub fn dimensions_for(page_width: f32, page_height: f32, scale: f32) -> (u32, u32) {
        (
            (page_width * scale).ceil().max(1.0) as u32,
            (page_height * scale).ceil().max(1.0) as u32,
        )
    }

    /// Size of the rendered area back in PDF points
    pub fn point_size(&self) -> (f32, f32) {
        (
            self.width as f32 / self.scale,
            self.height as f32 / self.scale,
        )
    }

    pub fn to_rgb_image(&self) -> image::RgbImage {
        let rgb = self
            .pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        // Length is width * height * 3 by construction
        image::RgbImage::from_raw(self.width, self.height, rgb)
            .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
    }
}

/// Process-wide renderer configuration, fixed at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Directory or file path of the pdfium shared library; `None` searches
    /// the working directory and then the system library path
    pub library_path: Option<String>,
}

/// Opens documents for rendering
pub trait Rasterizer {
    fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn RasterDocument + 'a>>;
}

/// A document opened by a [`Rasterizer`]
pub trait RasterDocument {
    fn page_count(&self) -> usize;

    /// Page size in points as displayed (rotation applied)
    fn page_size(&self, index: usize) -> Result<(f32, f32)>;

    /// Render page `index` at `scale` pixels per point, without annotations
    /// or form widgets
    fn render(&self, index: usize, scale: f32) -> Result<RasterBuffer>;
}

#[cfg(feature = "pdfium")]
pub use pdfium_backend::PdfiumRasterizer;

#[cfg(feature = "pdfium")]
mod pdfium_backend {
    use pdfium_render::prelude::*;
    use tracing::info;

    use super::{RasterBuffer, RasterDocument, Rasterizer, RendererConfig};
    use crate::error::{PdfDeskError, Result};

    /// Renders through a dynamically bound pdfium library
    pub struct PdfiumRasterizer {
        pdfium: Pdfium,
    }

    impl PdfiumRasterizer {
        pub fn new(config: &RendererConfig) -> Result<Self> {
            let bindings = match &config.library_path {
                Some(path) => Pdfium::bind_to_library(
                    Pdfium::pdfium_platform_library_name_at_path(path.as_str()),
                )
                .or_else(|_| Pdfium::bind_to_library(path.as_str())),
                None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library()),
            }
            .map_err(|e| PdfDeskError::Operation(format!("Failed to bind pdfium: {}", e)))?;

            info!("pdfium bound");
            Ok(Self {
                pdfium: Pdfium::new(bindings),
            })
        }
    }

    impl Rasterizer for PdfiumRasterizer {
        fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn RasterDocument + 'a>> {
            let document = self
                .pdfium
                .load_pdf_from_byte_slice(bytes, None)
                .map_err(|e| PdfDeskError::Load(e.to_string()))?;
            Ok(Box::new(PdfiumDocument { document }))
        }
    }

    struct PdfiumDocument<'a> {
        document: PdfDocument<'a>,
    }

    impl PdfiumDocument<'_> {
        fn page(&self, index: usize) -> Result<PdfPage<'_>> {
            let page_index = PdfPageIndex::try_from(index).map_err(|_| PdfDeskError::Render {
                page: index,
                reason: "page index out of range".into(),
            })?;
            self.document
                .pages()
                .get(page_index)
                .map_err(|e| PdfDeskError::Render {
                    page: index,
                    reason: e.to_string(),
                })
        }
    }

    impl RasterDocument for PdfiumDocument<'_> {
        fn page_count(&self) -> usize {
            self.document.pages().len() as usize
        }

        fn page_size(&self, index: usize) -> Result<(f32, f32)> {
            let page = self.page(index)?;
            Ok((page.width().value, page.height().value))
        }

        fn render(&self, index: usize, scale: f32) -> Result<RasterBuffer> {
            let page = self.page(index)?;
            let (width, height) =
                RasterBuffer::dimensions_for(page.width().value, page.height().value, scale);

            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_target_height(height as i32)
                .render_annotations(false)
                .render_form_data(false);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| PdfDeskError::Render {
                    page: index,
                    reason: e.to_string(),
                })?;

            RasterBuffer::from_rgba(
                bitmap.width() as u32,
                bitmap.height() as u32,
                scale,
                bitmap.as_rgba_bytes(),
            )
        }
    }
}
