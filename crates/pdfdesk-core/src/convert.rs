//! Conversion between PDFs and image files

use std::io::{Cursor, Write};

use image::ImageFormat;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::cancel::CancellationToken;
use crate::document::OutputDocument;
use crate::error::{PdfDeskError, Result};
use crate::imaging::{HIGH_QUALITY_SCALE, INVERT_JPEG_QUALITY};
use crate::pixel::encode_jpeg;
use crate::raster::Rasterizer;

/// JPEG quality of exported page images
pub const EXPORT_JPEG_QUALITY: f32 = INVERT_JPEG_QUALITY;

/// One page per image, sized to the image's pixel dimensions
///
/// JPEGs are embedded untouched and PNGs losslessly; anything else is
/// skipped with a warning.
pub fn images_to_pdf(images: &[Vec<u8>], cancel: &CancellationToken) -> Result<Vec<u8>> {
    let mut output = OutputDocument::new();

    for (index, data) in images.iter().enumerate() {
        cancel.check()?;
        let embedded = match image::guess_format(data) {
            Ok(ImageFormat::Jpeg) => output.embed_jpeg(data.clone())?,
            Ok(ImageFormat::Png) => output.embed_png(data)?,
            Ok(other) => {
                warn!("Skipping image {}: unsupported format {:?}", index + 1, other);
                continue;
            }
            Err(_) => {
                warn!("Skipping image {}: unrecognized data", index + 1);
                continue;
            }
        };

        let (width, height) = (embedded.width as f32, embedded.height as f32);
        let page = output.add_page(width, height);
        output.draw_image(page, &embedded, 0.0, 0.0, width, height)?;
        debug!("Image {} placed on a {}x{} page", index + 1, width, height);
    }

    info!("Converted {} of {} images", output.page_count(), images.len());
    output.save()
}

/// Render every page to JPEG and bundle them as `page-<n>.jpg` in a ZIP
pub fn pdf_to_images(
    rasterizer: &dyn Rasterizer,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let document = rasterizer.open(bytes)?;
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for index in 0..document.page_count() {
        cancel.check()?;
        let buffer = document.render(index, HIGH_QUALITY_SCALE)?;
        let jpeg = encode_jpeg(&buffer, EXPORT_JPEG_QUALITY)?;
        drop(buffer);

        zip.start_file(format!("page-{}.jpg", index + 1), options)
            .map_err(archive_error)?;
        zip.write_all(&jpeg)
            .map_err(|e| PdfDeskError::Operation(format!("archive write failed: {}", e)))?;
    }

    let archive = zip.finish().map_err(archive_error)?.into_inner();
    info!(
        "Exported {} pages ({} bytes)",
        document.page_count(),
        archive.len()
    );
    Ok(archive)
}

fn archive_error(err: zip::result::ZipError) -> PdfDeskError {
    PdfDeskError::Operation(format!("archive write failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{create_test_pdf, page_operations, tiny_jpeg, tiny_png};
    use crate::document::SourceDocument;
    use crate::raster::testing::FakeRasterizer;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_images_become_pages_at_pixel_size() {
        let images = vec![tiny_jpeg(40, 30), tiny_png(20, 50)];
        let out = images_to_pdf(&images, &CancellationToken::new()).unwrap();

        let source = SourceDocument::load(&out).unwrap();
        let sizes: Vec<_> = source.pages().iter().map(|p| (p.width(), p.height())).collect();
        assert_eq!(sizes, vec![(40.0, 30.0), (20.0, 50.0)]);

        let ops = page_operations(&out, 0);
        let cm = ops.iter().find(|op| op.operator == "cm").unwrap();
        let values: Vec<f32> = cm.operands.iter().map(|o| o.as_float().unwrap()).collect();
        assert_eq!(values, vec![40.0, 0.0, 0.0, 30.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unsupported_images_are_skipped() {
        let gif = b"GIF89a\x04\x00\x04\x00\x00\x00\x00;".to_vec();
        let images = vec![gif, b"plain text".to_vec(), tiny_jpeg(8, 8)];

        let out = images_to_pdf(&images, &CancellationToken::new()).unwrap();
        assert_eq!(SourceDocument::load(&out).unwrap().page_count(), 1);
    }

    #[test]
    fn test_pdf_to_images_names_entries_by_page() {
        let pdf = create_test_pdf(&[(100.0, 50.0), (60.0, 60.0)], "Z");
        let archive = pdf_to_images(&FakeRasterizer::new(), &pdf, &CancellationToken::new()).unwrap();

        let mut zip = ZipArchive::new(Cursor::new(archive)).unwrap();
        assert_eq!(zip.len(), 2);

        let mut entry = zip.by_name("page-1.jpg").unwrap();
        let mut jpeg = Vec::new();
        entry.read_to_end(&mut jpeg).unwrap();
        drop(entry);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));

        assert!(zip.by_name("page-2.jpg").is_ok());
    }

    #[test]
    fn test_pdf_to_images_propagates_render_failure() {
        let pdf = create_test_pdf(&[(100.0, 50.0)], "Z");
        let rasterizer = FakeRasterizer { fail_on: Some(0) };
        let result = pdf_to_images(&rasterizer, &pdf, &CancellationToken::new());
        assert!(matches!(result, Err(PdfDeskError::Render { .. })));
    }
}
