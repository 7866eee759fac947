//! Page extraction
//!
//! Pages outside the selection are removed from the page tree and the
//! objects they alone referenced are pruned on save.

use tracing::info;

use crate::document::{save_document, SourceDocument};
use crate::error::{PdfDeskError, Result};
use crate::parse_ranges;

/// Keep only the pages selected by a range string such as `"1-3, 5"`
pub fn split_document(bytes: &[u8], ranges: &str) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    let keep = parse_ranges(ranges, source.page_count())?;
    extract_pages(source, &keep)
}

/// Keep the 0-indexed pages in `keep`, which must be sorted and non-empty
pub(crate) fn extract_pages(source: SourceDocument, keep: &[usize]) -> Result<Vec<u8>> {
    if keep.is_empty() {
        return Err(PdfDeskError::Range("no pages selected".into()));
    }
    let total = source.page_count();
    let mut doc = source.into_document();

    // Descending so earlier page numbers stay valid
    let to_delete: Vec<u32> = (1..=total as u32)
        .rev()
        .filter(|p| keep.binary_search(&(*p as usize - 1)).is_err())
        .collect();
    for page_number in &to_delete {
        doc.delete_pages(&[*page_number]);
    }

    info!("Kept {} of {} pages", total - to_delete.len(), total);
    save_document(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{letter_pdf, page_content};
    use crate::merge::merge_documents;
    use pretty_assertions::assert_eq;

    fn page_count(bytes: &[u8]) -> usize {
        SourceDocument::load(bytes).unwrap().page_count()
    }

    #[test]
    fn test_split_extracts_single_page() {
        let result = split_document(&letter_pdf(5, "S"), "1").unwrap();
        assert_eq!(page_count(&result), 1);
        assert!(page_content(&result, 0).contains("S-1"));
    }

    #[test]
    fn test_split_extracts_ranges_in_order() {
        let result = split_document(&letter_pdf(10, "S"), "8, 2-4").unwrap();
        assert_eq!(page_count(&result), 4);
        let contents: Vec<String> = (0..4).map(|i| page_content(&result, i)).collect();
        assert!(contents[0].contains("S-2"));
        assert!(contents[2].contains("S-4"));
        assert!(contents[3].contains("S-8"));
    }

    #[test]
    fn test_split_drops_out_of_range_pages() {
        let result = split_document(&letter_pdf(3, "S"), "2-9").unwrap();
        assert_eq!(page_count(&result), 2);
    }

    #[test]
    fn test_split_with_no_valid_pages_is_a_range_error() {
        for input in ["", "10", "0", "abc", "5-3"] {
            let result = split_document(&letter_pdf(5, "S"), input);
            assert!(
                matches!(result, Err(PdfDeskError::Range(_))),
                "input {:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_split_rejects_unparseable_document() {
        let result = split_document(b"not a pdf", "1");
        assert!(matches!(result, Err(PdfDeskError::Load(_))));
    }

    #[test]
    fn test_merge_then_split_round_trips_second_page() {
        let merged = merge_documents(&[letter_pdf(1, "One"), letter_pdf(1, "Two")]).unwrap();
        assert_eq!(page_count(&merged), 2);
        assert!(page_content(&merged, 0).contains("One-1"));

        let second = split_document(&merged, "2").unwrap();
        assert_eq!(page_count(&second), 1);
        let content = page_content(&second, 0);
        assert!(content.contains("Two-1"));
        assert!(!content.contains("One-1"));
    }
}
