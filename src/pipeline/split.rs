//! Page splitting: decompose a PDF into standalone single-page PDFs via lopdf.
//!
//! ## Why spawn_blocking?
//!
//! Parsing and re-serialising a PDF is CPU-bound and, for large scanned
//! documents, slow enough to stall a Tokio worker thread.
//! [`split_document`] moves the work onto the blocking pool.
//!
//! ## How a page is isolated
//!
//! The source is parsed once. Each unit is a fresh document holding only the
//! objects reachable from its page, under a new one-page `Pages` node and
//! catalog, so splitting costs the size of each page rather than the size of
//! the whole document per page. Attributes the page inherits from the tree
//! (`Resources`, `MediaBox`, `CropBox`, `Rotate`) are copied onto the page
//! itself, so every unit can be decoded without the original. References
//! into the rest of the page tree (e.g. a link to another page) are not
//! followed and dangle in the unit, which readers treat as `null`.

use crate::document::{Document, DocumentInfo, PageUnit};
use crate::error::{JobError, SplitError};
use lopdf::{dictionary, Dictionary, Document as PdfDocument, Object, ObjectId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Page attributes a page may inherit from its ancestors.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Split `bytes` into one [`PageUnit`] per page, in page order.
///
/// # Errors
/// - [`SplitError::Unreadable`]: not a decodable PDF
/// - [`SplitError::NoPages`]: the page tree is empty
/// - [`SplitError::PageWrite`]: a page could not be saved on its own
pub fn split(bytes: &[u8]) -> Result<Vec<PageUnit>, SplitError> {
    let source = load(bytes)?;
    let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(SplitError::NoPages);
    }
    let tree = page_tree_nodes(&source, &page_ids);

    let mut units = Vec::with_capacity(page_ids.len());
    for (index, &page_id) in page_ids.iter().enumerate() {
        let write_err = |detail: String| SplitError::PageWrite {
            page: index + 1,
            detail,
        };
        let mut page_doc = single_page(&source, page_id, &tree).map_err(write_err)?;

        let mut buf = Vec::new();
        page_doc
            .save_to(&mut buf)
            .map_err(|e| write_err(e.to_string()))?;

        debug!("Split page {} → {} bytes", index + 1, buf.len());
        units.push(PageUnit { index, bytes: buf });
    }

    Ok(units)
}

/// Every page and every ancestor node of the page tree.
fn page_tree_nodes(source: &PdfDocument, page_ids: &[ObjectId]) -> BTreeSet<ObjectId> {
    let mut nodes = BTreeSet::new();
    for &page_id in page_ids {
        let mut next = Some(page_id);
        while let Some(id) = next.filter(|id| nodes.insert(*id)) {
            next = source
                .get_object(id)
                .and_then(Object::as_dict)
                .and_then(|d| d.get(b"Parent"))
                .and_then(Object::as_reference)
                .ok();
        }
    }
    nodes
}

/// Build a standalone document holding `page_id` and what it references.
fn single_page(
    source: &PdfDocument,
    page_id: ObjectId,
    tree: &BTreeSet<ObjectId>,
) -> Result<PdfDocument, String> {
    let mut page: Dictionary = source
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| e.to_string())?
        .clone();

    let mut seen = BTreeSet::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    while let Some(id) = parent.filter(|id| seen.insert(*id)) {
        let Ok(node) = source.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    page.remove(b"Parent");

    let mut pending = Vec::new();
    for (_, value) in page.iter() {
        collect_references(value, &mut pending);
    }
    let mut visited = BTreeSet::from([page_id]);
    let mut objects = BTreeMap::new();
    while let Some(id) = pending.pop() {
        if tree.contains(&id) || !visited.insert(id) {
            continue;
        }
        if let Ok(object) = source.get_object(id) {
            collect_references(object, &mut pending);
            objects.insert(id, object.clone());
        }
    }

    let mut unit = PdfDocument::with_version(source.version.clone());
    unit.objects = objects;
    unit.max_id = source.max_id;
    let pages_id = unit.new_object_id();
    page.set("Parent", pages_id);
    unit.objects.insert(page_id, Object::Dictionary(page));
    unit.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1_i64,
        }),
    );
    let catalog_id = unit.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    unit.trailer.set("Root", catalog_id);
    Ok(unit)
}

fn collect_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|o| collect_references(o, out)),
        Object::Dictionary(dict) => dict.iter().for_each(|(_, o)| collect_references(o, out)),
        Object::Stream(stream) => stream
            .dict
            .iter()
            .for_each(|(_, o)| collect_references(o, out)),
        _ => {}
    }
}

/// Split a loaded [`Document`] on the blocking pool.
///
/// Wraps split failures in [`JobError::Split`] with the document name.
pub async fn split_document(document: &Document) -> Result<Vec<PageUnit>, JobError> {
    let bytes = document.bytes().to_vec();
    let units = tokio::task::spawn_blocking(move || split(&bytes))
        .await
        .map_err(|e| JobError::Internal(format!("Split task panicked: {}", e)))?
        .map_err(|source| JobError::Split {
            name: document.name().to_string(),
            source,
        })?;

    if units.len() != document.page_count() {
        return Err(JobError::Internal(format!(
            "split produced {} pages, document reports {}",
            units.len(),
            document.page_count()
        )));
    }

    info!("Split '{}' into {} pages", document.name(), units.len());
    Ok(units)
}

/// Read page count and version without splitting.
pub fn inspect(bytes: &[u8]) -> Result<DocumentInfo, SplitError> {
    let doc = load(bytes)?;
    let page_count = doc.get_pages().len();
    if page_count == 0 {
        return Err(SplitError::NoPages);
    }
    Ok(DocumentInfo {
        page_count,
        pdf_version: doc.version.clone(),
        byte_len: bytes.len(),
    })
}

fn load(bytes: &[u8]) -> Result<PdfDocument, SplitError> {
    if !bytes.starts_with(b"%PDF") {
        let head = &bytes[..bytes.len().min(4)];
        return Err(SplitError::Unreadable {
            detail: format!("missing %PDF header (first bytes: {:?})", head),
        });
    }
    PdfDocument::load_mem(bytes).map_err(|e| SplitError::Unreadable {
        detail: e.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{dictionary, Object, Stream};

    /// Build an in-memory PDF whose page `n` shows the text `Page n`.
    pub(crate) fn sample_pdf(pages: usize) -> Vec<u8> {
        let mut doc = PdfDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for n in 1..=pages {
            let content = format!("BT /F1 24 Tf 72 720 Td (Page {n}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).expect("sample pdf should serialise");
        buf
    }

    #[test]
    fn split_yields_one_unit_per_page_in_order() {
        let units = split(&sample_pdf(4)).expect("split should succeed");
        assert_eq!(units.len(), 4);
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.index, i);
            assert_eq!(unit.page_num(), i + 1);
        }
    }

    #[test]
    fn each_unit_is_a_standalone_single_page_pdf() {
        let units = split(&sample_pdf(3)).unwrap();
        for unit in &units {
            let doc = PdfDocument::load_mem(&unit.bytes).expect("unit must re-decode");
            let pages = doc.get_pages();
            assert_eq!(pages.len(), 1, "page {} has {} pages", unit.page_num(), pages.len());
            let page_id = *pages.values().next().unwrap();
            let content = doc.get_page_content(page_id).unwrap();
            let text = String::from_utf8_lossy(&content);
            assert!(
                text.contains(&format!("(Page {})", unit.page_num())),
                "unit {} carries the wrong page: {text}",
                unit.index
            );
        }
    }

    #[test]
    fn units_carry_only_their_own_page() {
        let units = split(&sample_pdf(4)).unwrap();
        for unit in &units {
            let doc = PdfDocument::load_mem(&unit.bytes).unwrap();
            let streams = doc
                .objects
                .values()
                .filter(|o| matches!(o, Object::Stream(_)))
                .count();
            assert_eq!(streams, 1, "unit {} holds {} content streams", unit.index, streams);

            let page_id = *doc.get_pages().values().next().unwrap();
            let page = doc.get_object(page_id).and_then(Object::as_dict).unwrap();
            assert!(page.has(b"MediaBox"), "inherited MediaBox is copied onto the page");
            assert!(page.has(b"Resources"), "inherited Resources are copied onto the page");
        }
    }

    #[test]
    fn links_to_other_pages_are_not_followed() {
        let mut doc = PdfDocument::load_mem(&sample_pdf(2)).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let link = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
            "Dest" => vec![Object::Reference(pages[1]), "Fit".into()],
        });
        doc.get_object_mut(pages[0])
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Annots", vec![Object::Reference(link)]);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let units = split(&bytes).unwrap();
        let first = PdfDocument::load_mem(&units[0].bytes).unwrap();
        assert_eq!(first.get_pages().len(), 1);
        let content = first
            .objects
            .values()
            .filter_map(|o| match o {
                Object::Stream(s) => Some(String::from_utf8_lossy(&s.content).into_owned()),
                _ => None,
            })
            .collect::<String>();
        assert!(content.contains("(Page 1)"));
        assert!(!content.contains("(Page 2)"), "page 2 leaked into unit 1");
    }

    #[test]
    fn split_does_not_mutate_input() {
        let bytes = sample_pdf(2);
        let copy = bytes.clone();
        let _ = split(&bytes).unwrap();
        assert_eq!(bytes, copy);
    }

    #[test]
    fn garbage_is_unreadable() {
        let err = split(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, SplitError::Unreadable { .. }), "got {err:?}");

        let err = split(b"%PDF-1.5\n garbage without xref").unwrap_err();
        assert!(matches!(err, SplitError::Unreadable { .. }), "got {err:?}");
    }

    #[test]
    fn zero_pages_is_rejected() {
        let err = split(&sample_pdf(0)).unwrap_err();
        assert_eq!(err, SplitError::NoPages);
        assert_eq!(inspect(&sample_pdf(0)).unwrap_err(), SplitError::NoPages);
    }

    #[test]
    fn inspect_counts_pages() {
        let bytes = sample_pdf(7);
        let info = inspect(&bytes).unwrap();
        assert_eq!(info.page_count, 7);
        assert_eq!(info.pdf_version, "1.5");
        assert_eq!(info.byte_len, bytes.len());
    }

    #[tokio::test]
    async fn split_document_matches_page_count() {
        let doc = Document::from_bytes("five.pdf", sample_pdf(5)).unwrap();
        let units = split_document(&doc).await.unwrap();
        assert_eq!(units.len(), doc.page_count());
    }
}
