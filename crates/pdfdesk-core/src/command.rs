use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cancel::CancellationToken;
use crate::compositor::{Orientation, PaperSize};
use crate::error::{PdfDeskError, Result};
use crate::imaging::{OrientationDetector, DEFAULT_COMPRESS_QUALITY};
use crate::organize::{PageNumberPosition, WatermarkStyle};
use crate::pixel::PixelOptions;
use crate::raster::Rasterizer;
use crate::{convert, get_page_count, imaging, layout, merge, organize, security, split};

/// One document flow and its inputs
///
/// Translation is not listed here: it needs an async translator and is run
/// through [`crate::translate::translate_pdf`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PdfCommand {
    Merge {
        files: Vec<Vec<u8>>,
    },
    Split {
        file: Vec<u8>,
        ranges: String,
    },
    Compress {
        file: Vec<u8>,
        #[serde(default = "default_quality")]
        quality: f32,
    },
    Clean {
        file: Vec<u8>,
    },
    Vectorize {
        file: Vec<u8>,
    },
    Filter {
        file: Vec<u8>,
        #[serde(default)]
        options: PixelOptions,
    },
    Optimize {
        file: Vec<u8>,
        #[serde(default)]
        options: PixelOptions,
    },
    Invert {
        file: Vec<u8>,
        #[serde(default)]
        grayscale: bool,
    },
    NUp {
        file: Vec<u8>,
        n: u32,
        #[serde(default)]
        paper: PaperSize,
    },
    Resize {
        file: Vec<u8>,
        #[serde(default)]
        paper: PaperSize,
    },
    Booklet {
        file: Vec<u8>,
        #[serde(default)]
        paper: PaperSize,
    },
    Orient {
        file: Vec<u8>,
        orientation: Orientation,
    },
    Rotate {
        file: Vec<u8>,
        rotations: BTreeMap<usize, i64>,
    },
    Delete {
        file: Vec<u8>,
        pages: Vec<usize>,
    },
    Protect {
        file: Vec<u8>,
        password: String,
    },
    Watermark {
        file: Vec<u8>,
        text: String,
    },
    Sign {
        file: Vec<u8>,
        signature: Vec<u8>,
        #[serde(default)]
        page: Option<usize>,
    },
    PageNumbers {
        file: Vec<u8>,
        #[serde(default)]
        position: PageNumberPosition,
    },
    ImagesToPdf {
        images: Vec<Vec<u8>>,
    },
    PdfToImages {
        file: Vec<u8>,
    },
}

fn default_quality() -> f32 {
    DEFAULT_COMPRESS_QUALITY
}

/// Collaborators a command may need besides its own inputs
#[derive(Default)]
pub struct CommandContext<'a> {
    pub rasterizer: Option<&'a dyn Rasterizer>,
    pub detector: Option<&'a dyn OrientationDetector>,
    pub cancel: CancellationToken,
}

impl<'a> CommandContext<'a> {
    pub fn with_rasterizer(rasterizer: &'a dyn Rasterizer) -> Self {
        Self {
            rasterizer: Some(rasterizer),
            ..Self::default()
        }
    }

    fn rasterizer(&self) -> Result<&'a dyn Rasterizer> {
        self.rasterizer.ok_or_else(|| {
            PdfDeskError::Operation("this command needs a page renderer".into())
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub data: Vec<u8>,
    pub content_type: &'static str,
    pub metrics: ProcessMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: usize,
    pub processing_time_ms: u64,
}

impl PdfCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PdfCommand::Merge { .. } => "merge",
            PdfCommand::Split { .. } => "split",
            PdfCommand::Compress { .. } => "compress",
            PdfCommand::Clean { .. } => "clean",
            PdfCommand::Vectorize { .. } => "vectorize",
            PdfCommand::Filter { .. } => "filter",
            PdfCommand::Optimize { .. } => "optimize",
            PdfCommand::Invert { .. } => "invert",
            PdfCommand::NUp { .. } => "n-up",
            PdfCommand::Resize { .. } => "resize",
            PdfCommand::Booklet { .. } => "booklet",
            PdfCommand::Orient { .. } => "orient",
            PdfCommand::Rotate { .. } => "rotate",
            PdfCommand::Delete { .. } => "delete",
            PdfCommand::Protect { .. } => "protect",
            PdfCommand::Watermark { .. } => "watermark",
            PdfCommand::Sign { .. } => "sign",
            PdfCommand::PageNumbers { .. } => "page-numbers",
            PdfCommand::ImagesToPdf { .. } => "images-to-pdf",
            PdfCommand::PdfToImages { .. } => "pdf-to-images",
        }
    }

    /// Whether the flow rasterizes pages
    pub fn needs_renderer(&self) -> bool {
        matches!(
            self,
            PdfCommand::Compress { .. }
                | PdfCommand::Clean { .. }
                | PdfCommand::Vectorize { .. }
                | PdfCommand::Filter { .. }
                | PdfCommand::Optimize { .. }
                | PdfCommand::Invert { .. }
                | PdfCommand::PdfToImages { .. }
        )
    }

    fn input_size(&self) -> usize {
        match self {
            PdfCommand::Merge { files } => files.iter().map(Vec::len).sum(),
            PdfCommand::ImagesToPdf { images } => images.iter().map(Vec::len).sum(),
            PdfCommand::Sign {
                file, signature, ..
            } => file.len() + signature.len(),
            PdfCommand::Split { file, .. }
            | PdfCommand::Compress { file, .. }
            | PdfCommand::Clean { file }
            | PdfCommand::Vectorize { file }
            | PdfCommand::Filter { file, .. }
            | PdfCommand::Optimize { file, .. }
            | PdfCommand::Invert { file, .. }
            | PdfCommand::NUp { file, .. }
            | PdfCommand::Resize { file, .. }
            | PdfCommand::Booklet { file, .. }
            | PdfCommand::Orient { file, .. }
            | PdfCommand::Rotate { file, .. }
            | PdfCommand::Delete { file, .. }
            | PdfCommand::Protect { file, .. }
            | PdfCommand::Watermark { file, .. }
            | PdfCommand::PageNumbers { file, .. }
            | PdfCommand::PdfToImages { file } => file.len(),
        }
    }

    /// Run the flow, returning its output and size/time metrics
    pub fn execute(&self, ctx: &CommandContext<'_>) -> Result<ProcessResult> {
        let started = Instant::now();
        let cancel = &ctx.cancel;

        let data = match self {
            PdfCommand::Merge { files } => merge::merge_documents(files)?,
            PdfCommand::Split { file, ranges } => split::split_document(file, ranges)?,
            PdfCommand::Compress { file, quality } => {
                imaging::compress(ctx.rasterizer()?, file, *quality, cancel)?
            }
            PdfCommand::Clean { file } => imaging::clean(ctx.rasterizer()?, file, cancel)?,
            PdfCommand::Vectorize { file } => {
                imaging::vectorize(ctx.rasterizer()?, file, cancel)?
            }
            PdfCommand::Filter { file, options } => {
                imaging::apply_filters(ctx.rasterizer()?, file, options, cancel)?
            }
            PdfCommand::Optimize { file, options } => {
                imaging::optimize(ctx.rasterizer()?, ctx.detector, file, options, cancel)?
            }
            PdfCommand::Invert { file, grayscale } => {
                imaging::invert(ctx.rasterizer()?, file, *grayscale, cancel)?
            }
            PdfCommand::NUp { file, n, paper } => layout::n_up(file, *n, *paper, cancel)?,
            PdfCommand::Resize { file, paper } => layout::resize(file, *paper, cancel)?,
            PdfCommand::Booklet { file, paper } => layout::booklet(file, *paper, cancel)?,
            PdfCommand::Orient { file, orientation } => {
                layout::set_orientation(file, *orientation)?
            }
            PdfCommand::Rotate { file, rotations } => organize::rotate_pages(file, rotations)?,
            PdfCommand::Delete { file, pages } => organize::delete_pages(file, pages)?,
            PdfCommand::Protect { file, password } => security::protect(file, password)?,
            PdfCommand::Watermark { file, text } => {
                organize::watermark(file, text, &WatermarkStyle::default(), cancel)?
            }
            PdfCommand::Sign {
                file,
                signature,
                page,
            } => organize::sign(file, signature, *page)?,
            PdfCommand::PageNumbers { file, position } => {
                organize::add_page_numbers(file, *position, cancel)?
            }
            PdfCommand::ImagesToPdf { images } => convert::images_to_pdf(images, cancel)?,
            PdfCommand::PdfToImages { file } => {
                convert::pdf_to_images(ctx.rasterizer()?, file, cancel)?
            }
        };

        let (content_type, page_count) = match self {
            PdfCommand::PdfToImages { file } => ("application/zip", page_count_or_zero(file)),
            // Encrypted output cannot be reopened without the password
            PdfCommand::Protect { file, .. } => ("application/pdf", page_count_or_zero(file)),
            _ => ("application/pdf", page_count_or_zero(&data)),
        };

        let metrics = ProcessMetrics {
            input_size_bytes: self.input_size(),
            output_size_bytes: data.len(),
            page_count,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "{} finished in {}ms ({} -> {} bytes)",
            self.name(),
            metrics.processing_time_ms,
            metrics.input_size_bytes,
            metrics.output_size_bytes
        );

        Ok(ProcessResult {
            data,
            content_type,
            metrics,
        })
    }
}

fn page_count_or_zero(bytes: &[u8]) -> usize {
    get_page_count(bytes).unwrap_or(0)
}
