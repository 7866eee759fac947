//! pdfdesk command line
//!
//! Every document flow is a subcommand reading its inputs from files and
//! writing one output file. Raster flows (compress, clean, vectorize,
//! optimize, invert, pdf-to-images) need the `pdfium` feature.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pdfdesk_core::{
    get_page_count, parse_ranges, CommandContext, Orientation, PageNumberPosition, PaperSize,
    PdfCommand, PixelOptions, Rasterizer, RendererConfig,
};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pdfdesk")]
#[command(version)]
#[command(about = "Merge, split, impose, clean and convert PDF documents", long_about = None)]
struct Cli {
    /// Location of the pdfium shared library
    #[arg(long, global = true, env = "PDFIUM_LIB")]
    pdfium_lib: Option<String>,

    /// Print run metrics as JSON on stdout
    #[arg(long, global = true)]
    metrics: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Io {
    /// Input PDF file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Correct page orientation first (needs an orientation detector)
    #[arg(long)]
    deskew: bool,

    #[arg(long)]
    invert: bool,

    /// Binarize pages for a clean scanned-text look
    #[arg(long)]
    vectorize: bool,

    /// Binarization cutoff (0-255), overrides --vectorize's default
    #[arg(long)]
    threshold: Option<f32>,

    #[arg(long, default_value_t = 1.0)]
    contrast: f32,

    /// Whiten paper background, level 0-4
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=4))]
    clean_background: u8,

    /// Boost text contrast, level 0-4
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=4))]
    enhance_text: u8,

    /// Thicken dark strokes, level 0-4
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=4))]
    enhance_weight: u8,
}

impl FilterArgs {
    fn options(&self) -> PixelOptions {
        PixelOptions {
            threshold: self.threshold,
            contrast: self.contrast,
            invert: self.invert,
            vectorize: self.vectorize,
            enhance_weight: self.enhance_weight,
            clean_background: self.clean_background,
            enhance_text: self.enhance_text,
            deskew: self.deskew,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Concatenate PDFs in order
    Merge {
        #[arg(value_name = "FILES", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Keep only the selected pages
    Split {
        #[command(flatten)]
        io: Io,

        /// Page selection, e.g. "1-3, 5, 8-10"
        #[arg(long)]
        pages: String,
    },

    /// Re-render every page as a JPEG at reduced quality
    Compress {
        #[command(flatten)]
        io: Io,

        /// JPEG quality, 0-1
        #[arg(long, default_value_t = 0.5)]
        quality: f32,
    },

    /// Mild contrast boost for scans
    Clean {
        #[command(flatten)]
        io: Io,
    },

    /// Binarize pages to black and white
    Vectorize {
        #[command(flatten)]
        io: Io,
    },

    /// Deskew and apply pixel filters
    Optimize {
        #[command(flatten)]
        io: Io,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Invert page colors
    Invert {
        #[command(flatten)]
        io: Io,

        /// Collapse to gray before inverting
        #[arg(long)]
        grayscale: bool,
    },

    /// Place several pages on each sheet
    #[command(name = "n-up")]
    NUp {
        #[command(flatten)]
        io: Io,

        /// Pages per sheet: 2, 4, 6, 8 or 9
        #[arg(short, long, default_value_t = 2)]
        n: u32,

        #[arg(long, default_value = "a4")]
        paper: PaperSize,
    },

    /// Fit every page onto a standard paper size
    Resize {
        #[command(flatten)]
        io: Io,

        #[arg(long, default_value = "a4")]
        paper: PaperSize,
    },

    /// Impose pages for saddle-stitch printing
    Booklet {
        #[command(flatten)]
        io: Io,

        #[arg(long, default_value = "a4")]
        paper: PaperSize,
    },

    /// Turn pages to portrait or landscape
    Orient {
        #[command(flatten)]
        io: Io,

        #[arg(long)]
        orientation: Orientation,
    },

    /// Rotate individual pages, e.g. --page 2=90
    Rotate {
        #[command(flatten)]
        io: Io,

        #[arg(long = "page", value_name = "N=DEGREES", value_parser = parse_rotation, required = true)]
        rotations: Vec<(usize, i64)>,
    },

    /// Remove the selected pages
    Delete {
        #[command(flatten)]
        io: Io,

        /// Page selection, e.g. "2, 4-5"
        #[arg(long)]
        pages: String,
    },

    /// Require a password to open the document
    Protect {
        #[command(flatten)]
        io: Io,

        #[arg(long, env = "PDFDESK_PASSWORD")]
        password: String,
    },

    /// Stamp diagonal text across every page
    Watermark {
        #[command(flatten)]
        io: Io,

        #[arg(long)]
        text: String,
    },

    /// Place a signature image in the bottom-right corner
    Sign {
        #[command(flatten)]
        io: Io,

        /// PNG or JPEG signature image
        #[arg(long, value_name = "IMAGE")]
        signature: PathBuf,

        /// 1-based page to sign; defaults to the last page
        #[arg(long)]
        page: Option<usize>,
    },

    /// Label every page "Page N"
    PageNumbers {
        #[command(flatten)]
        io: Io,

        /// bottom-center, bottom-right or top-right
        #[arg(long, default_value = "bottom-center")]
        position: PageNumberPosition,
    },

    /// One page per JPEG or PNG image
    ImagesToPdf {
        #[arg(value_name = "IMAGES", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Render every page to JPEG inside a ZIP archive
    PdfToImages {
        #[command(flatten)]
        io: Io,
    },
}

/// Parse `N=DEGREES` with a 1-based page number
fn parse_rotation(value: &str) -> std::result::Result<(usize, i64), String> {
    let (page, degrees) = value
        .split_once('=')
        .ok_or_else(|| format!("expected N=DEGREES, got '{}'", value))?;
    let page: usize = page
        .trim()
        .parse()
        .map_err(|_| format!("invalid page number '{}'", page))?;
    if page == 0 {
        return Err("page numbers start at 1".to_string());
    }
    let degrees: i64 = degrees
        .trim()
        .parse()
        .map_err(|_| format!("invalid angle '{}'", degrees))?;
    if degrees % 90 != 0 {
        return Err(format!("angle must be a multiple of 90, got {}", degrees));
    }
    Ok((page - 1, degrees))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_all(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    paths.iter().map(|p| read(p)).collect()
}

/// Resolve the subcommand into a core command and its output path
fn into_command(command: Commands) -> Result<(PdfCommand, PathBuf)> {
    let resolved = match command {
        Commands::Merge { inputs, output } => (
            PdfCommand::Merge {
                files: read_all(&inputs)?,
            },
            output,
        ),
        Commands::Split { io, pages } => (
            PdfCommand::Split {
                file: read(&io.input)?,
                ranges: pages,
            },
            io.output,
        ),
        Commands::Compress { io, quality } => (
            PdfCommand::Compress {
                file: read(&io.input)?,
                quality,
            },
            io.output,
        ),
        Commands::Clean { io } => (
            PdfCommand::Clean {
                file: read(&io.input)?,
            },
            io.output,
        ),
        Commands::Vectorize { io } => (
            PdfCommand::Vectorize {
                file: read(&io.input)?,
            },
            io.output,
        ),
        Commands::Optimize { io, filters } => (
            PdfCommand::Optimize {
                file: read(&io.input)?,
                options: filters.options(),
            },
            io.output,
        ),
        Commands::Invert { io, grayscale } => (
            PdfCommand::Invert {
                file: read(&io.input)?,
                grayscale,
            },
            io.output,
        ),
        Commands::NUp { io, n, paper } => (
            PdfCommand::NUp {
                file: read(&io.input)?,
                n,
                paper,
            },
            io.output,
        ),
        Commands::Resize { io, paper } => (
            PdfCommand::Resize {
                file: read(&io.input)?,
                paper,
            },
            io.output,
        ),
        Commands::Booklet { io, paper } => (
            PdfCommand::Booklet {
                file: read(&io.input)?,
                paper,
            },
            io.output,
        ),
        Commands::Orient { io, orientation } => (
            PdfCommand::Orient {
                file: read(&io.input)?,
                orientation,
            },
            io.output,
        ),
        Commands::Rotate { io, rotations } => {
            let mut merged = std::collections::BTreeMap::new();
            for (index, degrees) in rotations {
                *merged.entry(index).or_insert(0) += degrees;
            }
            (
                PdfCommand::Rotate {
                    file: read(&io.input)?,
                    rotations: merged,
                },
                io.output,
            )
        }
        Commands::Delete { io, pages } => {
            let file = read(&io.input)?;
            let pages = parse_ranges(&pages, get_page_count(&file)?)?;
            (PdfCommand::Delete { file, pages }, io.output)
        }
        Commands::Protect { io, password } => (
            PdfCommand::Protect {
                file: read(&io.input)?,
                password,
            },
            io.output,
        ),
        Commands::Watermark { io, text } => (
            PdfCommand::Watermark {
                file: read(&io.input)?,
                text,
            },
            io.output,
        ),
        Commands::Sign {
            io,
            signature,
            page,
        } => {
            if page == Some(0) {
                bail!("page numbers start at 1");
            }
            (
                PdfCommand::Sign {
                    file: read(&io.input)?,
                    signature: read(&signature)?,
                    page: page.map(|p| p - 1),
                },
                io.output,
            )
        }
        Commands::PageNumbers { io, position } => (
            PdfCommand::PageNumbers {
                file: read(&io.input)?,
                position,
            },
            io.output,
        ),
        Commands::ImagesToPdf { inputs, output } => (
            PdfCommand::ImagesToPdf {
                images: read_all(&inputs)?,
            },
            output,
        ),
        Commands::PdfToImages { io } => (
            PdfCommand::PdfToImages {
                file: read(&io.input)?,
            },
            io.output,
        ),
    };
    Ok(resolved)
}

#[cfg(feature = "pdfium")]
fn open_rasterizer(config: &RendererConfig) -> Result<Box<dyn Rasterizer>> {
    Ok(Box::new(pdfdesk_core::PdfiumRasterizer::new(config)?))
}

#[cfg(not(feature = "pdfium"))]
fn open_rasterizer(_config: &RendererConfig) -> Result<Box<dyn Rasterizer>> {
    bail!("this command renders pages; rebuild pdfdesk with `--features pdfium`")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .init();

    let (command, output) = into_command(cli.command)?;

    let config = RendererConfig {
        library_path: cli.pdfium_lib,
    };
    let rasterizer = if command.needs_renderer() {
        Some(open_rasterizer(&config)?)
    } else {
        None
    };

    let ctx = CommandContext {
        rasterizer: rasterizer.as_deref(),
        ..CommandContext::default()
    };
    let result = command
        .execute(&ctx)
        .with_context(|| format!("{} failed", command.name()))?;

    fs::write(&output, &result.data)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        "Wrote {} ({} bytes, {} pages)",
        output.display(),
        result.metrics.output_size_bytes,
        result.metrics.page_count
    );

    if cli.metrics {
        println!("{}", serde_json::to_string_pretty(&result.metrics)?);
    }
    Ok(())
}
