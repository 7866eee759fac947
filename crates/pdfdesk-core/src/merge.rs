//! Document merging
//!
//! Objects of each later document are renumbered past the current maximum id
//! and copied into the first document; every page is then re-parented onto
//! the first document's page tree root.

use lopdf::{Document, Object, ObjectId};
use tracing::{debug, info};

use crate::document::{inherited_attribute, save_document, SourceDocument};
use crate::error::{PdfDeskError, Result};

/// Page attributes a page may inherit from its ancestors
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Concatenate `documents` in order, keeping every page's vector content
pub fn merge_documents(documents: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut loaded = documents
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            SourceDocument::load(bytes)
                .map(SourceDocument::into_document)
                .map_err(|e| match e {
                    PdfDeskError::Load(reason) => {
                        PdfDeskError::Load(format!("document {}: {}", i + 1, reason))
                    }
                    other => other,
                })
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter();

    let Some(mut dest) = loaded.next() else {
        return Err(PdfDeskError::Operation("No documents to merge".into()));
    };
    let pages_id = page_tree_root(&dest)?;
    let mut kids = detach_pages(&mut dest);

    for (index, mut source) in loaded.enumerate() {
        let offset = dest.max_id;
        let pages = detach_pages(&mut source);
        debug!(
            "Appending document {} ({} pages) at id offset {}",
            index + 2,
            pages.len(),
            offset
        );

        for ((num, gen), object) in source.objects {
            dest.objects
                .insert((num + offset, gen), remap_object_refs(object, offset));
        }
        kids.extend(pages.into_iter().map(|(num, gen)| (num + offset, gen)));
        dest.max_id = offset + source.max_id;
    }

    update_page_tree(&mut dest, pages_id, &kids)?;
    info!("Merged {} documents into {} pages", documents.len(), kids.len());
    save_document(dest)
}

/// Shift every indirect reference inside `obj` by `offset`
pub(crate) fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference((num, gen)) => Object::Reference((num + offset, gen)),
        Object::Array(items) => Object::Array(
            items
                .into_iter()
                .map(|o| remap_object_refs(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(std::mem::replace(value, Object::Null), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(std::mem::replace(value, Object::Null), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Copy inherited attributes onto each page so it no longer depends on its
/// original ancestors; returns the page ids in reading order
fn detach_pages(doc: &mut Document) -> Vec<ObjectId> {
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for &id in &page_ids {
        let inherited: Vec<(&[u8], Object)> = INHERITABLE
            .iter()
            .filter_map(|&key| inherited_attribute(doc, id, key).map(|v| (key, v.clone())))
            .collect();
        if let Ok(page) = doc.get_object_mut(id).and_then(Object::as_dict_mut) {
            for (key, value) in inherited {
                page.set(key, value);
            }
        }
    }
    page_ids
}

fn page_tree_root(doc: &Document) -> Result<ObjectId> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| PdfDeskError::Operation("No Root in trailer".into()))?;
    doc.get_object(catalog_id)
        .and_then(Object::as_dict)
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|_| PdfDeskError::Operation("Catalog has no page tree".into()))
}

/// Make `kids` the flat, ordered child list of the page tree root
fn update_page_tree(doc: &mut Document, pages_id: ObjectId, kids: &[ObjectId]) -> Result<()> {
    for &id in kids {
        if let Ok(page) = doc.get_object_mut(id).and_then(Object::as_dict_mut) {
            page.set("Parent", pages_id);
        }
    }

    let pages = doc
        .get_object_mut(pages_id)
        .and_then(Object::as_dict_mut)
        .map_err(|_| PdfDeskError::Operation("Invalid pages dictionary".into()))?;
    pages.set(
        "Kids",
        kids.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
    );
    pages.set("Count", kids.len() as i64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{create_test_pdf, letter_pdf, page_content};
    use lopdf::{content::Content, content::Operation, dictionary, Stream};
    use pretty_assertions::assert_eq;

    fn page_count(bytes: &[u8]) -> usize {
        SourceDocument::load(bytes).unwrap().page_count()
    }

    /// One page whose MediaBox and Resources live on the parent node
    fn inherited_box_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Tj", vec![Object::string_literal("Inherited")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 300.into(), 400.into()],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_merge_empty_fails() {
        let result = merge_documents(&[]);
        assert!(matches!(result, Err(PdfDeskError::Operation(_))));
    }

    #[test]
    fn test_merge_single_document_keeps_pages() {
        let merged = merge_documents(&[letter_pdf(2, "Single")]).unwrap();
        assert_eq!(page_count(&merged), 2);
    }

    #[test]
    fn test_merge_two_documents_combines_pages() {
        let merged = merge_documents(&[letter_pdf(2, "DocA"), letter_pdf(3, "DocB")]).unwrap();
        assert_eq!(page_count(&merged), 5);
    }

    #[test]
    fn test_merge_preserves_page_order_and_content() {
        let merged = merge_documents(&[
            letter_pdf(2, "First"),
            letter_pdf(1, "Second"),
            letter_pdf(2, "Third"),
        ])
        .unwrap();

        let labels: Vec<String> = (0..5).map(|i| page_content(&merged, i)).collect();
        assert!(labels[0].contains("First-1"));
        assert!(labels[1].contains("First-2"));
        assert!(labels[2].contains("Second-1"));
        assert!(labels[3].contains("Third-1"));
        assert!(labels[4].contains("Third-2"));
    }

    #[test]
    fn test_merge_keeps_page_sizes() {
        let merged = merge_documents(&[
            create_test_pdf(&[(612.0, 792.0)], "A"),
            create_test_pdf(&[(842.0, 595.0)], "B"),
        ])
        .unwrap();
        let source = SourceDocument::load(&merged).unwrap();
        assert_eq!(source.pages()[1].width(), 842.0);
        assert_eq!(source.pages()[1].height(), 595.0);
    }

    #[test]
    fn test_merge_carries_inherited_attributes() {
        let merged = merge_documents(&[letter_pdf(1, "Base"), inherited_box_pdf()]).unwrap();
        let source = SourceDocument::load(&merged).unwrap();
        assert_eq!(source.page_count(), 2);
        assert_eq!(source.pages()[1].width(), 300.0);
        assert_eq!(source.pages()[1].height(), 400.0);

        let doc = source.document();
        let page = doc.get_object(source.pages()[1].id).unwrap().as_dict().unwrap();
        assert!(page.get(b"Resources").is_ok());
        assert!(page_content(&merged, 1).contains("Inherited"));
    }

    #[test]
    fn test_merge_reports_which_document_failed() {
        let result = merge_documents(&[letter_pdf(1, "Ok"), b"broken".to_vec()]);
        match result {
            Err(PdfDeskError::Load(message)) => assert!(message.contains("document 2")),
            other => panic!("expected load error, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_remap_object_refs_shifts_nested_references() {
        let object = Object::Array(vec![
            Object::Reference((3, 0)),
            Object::Dictionary(dictionary! { "Kid" => (7, 0) }),
            Object::Integer(3),
        ]);
        let remapped = remap_object_refs(object, 10);
        let items = remapped.as_array().unwrap();
        assert_eq!(items[0].as_reference().unwrap(), (13, 0));
        let kid = items[1].as_dict().unwrap().get(b"Kid").unwrap();
        assert_eq!(kid.as_reference().unwrap(), (17, 0));
        assert_eq!(items[2].as_i64().unwrap(), 3);
    }
}
