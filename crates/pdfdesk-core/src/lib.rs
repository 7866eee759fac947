//! PDF desk operations
//!
//! Page rasterization and pixel enhancement, sheet imposition, page-level
//! edits, and in-place translation overlay, built on lopdf.
//!
//! Every flow takes the input document as bytes and returns a new document;
//! the input buffer is never modified. Multi-page loops check a
//! [`CancellationToken`] between pages.

pub mod cancel;
pub mod command;
pub mod compositor;
pub mod convert;
pub mod document;
pub mod error;
pub mod extract;
pub mod fonts;
pub mod imaging;
pub mod layout;
pub mod merge;
pub mod organize;
pub mod overlay;
pub mod pixel;
pub mod raster;
pub mod security;
pub mod split;
pub mod translate;

pub use cancel::CancellationToken;
pub use command::{CommandContext, PdfCommand, ProcessMetrics, ProcessResult};
pub use compositor::{Orientation, PaperSize};
pub use document::SourceDocument;
pub use error::{PdfDeskError, Result};
pub use extract::{extract_text_runs, PositionedTextRun};
pub use fonts::TrueTypeFont;
pub use imaging::{OrientationDetector, OrientationEstimate};
pub use merge::merge_documents;
pub use organize::PageNumberPosition;
pub use pixel::PixelOptions;
pub use raster::{RasterBuffer, Rasterizer, RendererConfig};
pub use security::protect;
pub use split::split_document;
pub use translate::{
    translate_pdf, EchoTranslator, PageTranslation, TextTranslator, TranslationOutcome,
    DEFAULT_TARGET_LANGUAGE,
};

#[cfg(feature = "pdfium")]
pub use raster::PdfiumRasterizer;

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<usize> {
    Ok(SourceDocument::load(bytes)?.page_count())
}

/// Parse a page selection like "1-5, 8, 11-13" into sorted unique 0-indexed
/// pages of a `page_count`-page document
///
/// Pages outside `1..=page_count` and unparseable parts are ignored; a
/// selection that ends up empty is a `Range` error.
pub fn parse_ranges(input: &str, page_count: usize) -> Result<Vec<usize>> {
    use std::collections::BTreeSet;

    let mut pages = BTreeSet::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>())
            else {
                continue;
            };
            for page in start.max(1)..=end.min(page_count) {
                pages.insert(page - 1);
            }
        } else if let Ok(page) = part.parse::<usize>() {
            if (1..=page_count).contains(&page) {
                pages.insert(page - 1);
            }
        }
    }

    if pages.is_empty() {
        return Err(PdfDeskError::Range(format!(
            "'{}' selects no pages of a {}-page document",
            input, page_count
        )));
    }
    Ok(pages.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parse_ranges_single() {
        assert_eq!(parse_ranges("5", 10).unwrap(), vec![4]);
    }

    #[test]
    fn test_parse_ranges_range() {
        assert_eq!(parse_ranges("1-3", 10).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_ranges_complex() {
        assert_eq!(
            parse_ranges("1-5, 8, 11-13", 20).unwrap(),
            vec![0, 1, 2, 3, 4, 7, 10, 11, 12]
        );
    }

    #[test]
    fn test_parse_ranges_deduplicates() {
        assert_eq!(parse_ranges("1-3,2-4", 10).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_ranges_clamps_to_document() {
        assert_eq!(parse_ranges("0-2, 4-100", 5).unwrap(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_parse_ranges_skips_garbage_parts() {
        assert_eq!(parse_ranges("x, 2, 3-y, ,", 5).unwrap(), vec![1]);
    }

    #[test]
    fn test_parse_ranges_empty_selection_is_error() {
        for input in ["", "  ", "0", "6", "4-2", "a-b"] {
            assert!(
                matches!(parse_ranges(input, 5), Err(PdfDeskError::Range(_))),
                "{:?}",
                input
            );
        }
    }

    #[test]
    fn test_get_page_count() {
        let pdf = document::tests::letter_pdf(3, "C");
        assert_eq!(get_page_count(&pdf).unwrap(), 3);
        assert!(matches!(get_page_count(b"nope"), Err(PdfDeskError::Load(_))));
    }

    proptest! {
        #[test]
        fn prop_parse_ranges_sorted_unique_in_bounds(
            parts in prop::collection::vec((1usize..40, 0usize..10), 1..6),
            page_count in 1usize..30,
        ) {
            let input = parts
                .iter()
                .map(|(start, len)| format!("{}-{}", start, start + len))
                .collect::<Vec<_>>()
                .join(", ");

            if let Ok(pages) = parse_ranges(&input, page_count) {
                prop_assert!(pages.windows(2).all(|w| w[0] < w[1]));
                prop_assert!(pages.iter().all(|&p| p < page_count));
                for (start, len) in &parts {
                    for page in *start..=start + len {
                        if page <= page_count {
                            prop_assert!(pages.contains(&(page - 1)));
                        }
                    }
                }
            } else {
                prop_assert!(parts.iter().all(|(start, _)| *start > page_count));
            }
        }
    }
}
