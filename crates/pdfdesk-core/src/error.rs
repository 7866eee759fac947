use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfDeskError {
    #[error("Failed to load PDF: {0}")]
    Load(String),

    #[error("Failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },

    #[error("Invalid page selection: {0}")]
    Range(String),

    #[error("PDF operation failed: {0}")]
    Operation(String),

    #[error("Image processing failed: {0}")]
    Image(String),

    #[error("Font embedding failed: {0}")]
    FontEmbed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<lopdf::Error> for PdfDeskError {
    fn from(err: lopdf::Error) -> Self {
        PdfDeskError::Operation(err.to_string())
    }
}

impl From<image::ImageError> for PdfDeskError {
    fn from(err: image::ImageError) -> Self {
        PdfDeskError::Image(err.to_string())
    }
}

impl From<serde_json::Error> for PdfDeskError {
    fn from(err: serde_json::Error) -> Self {
        PdfDeskError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PdfDeskError>;
