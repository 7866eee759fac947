//! Source and output documents
//!
//! [`SourceDocument`] is a read-only view over a parsed PDF with resolved
//! per-page geometry. [`OutputDocument`] is an append-only builder: pages are
//! added in order, images and foreign pages are embedded as XObjects, and the
//! whole thing is serialized once by [`OutputDocument::save`].

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::{PdfDeskError, Result};
use crate::merge::remap_object_refs;

/// US Letter, used when neither the page nor its ancestors carry a MediaBox
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Guard against cyclic /Parent chains in malformed files
const MAX_TREE_DEPTH: usize = 32;

/// Geometry of one page, with inherited attributes already resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    pub id: ObjectId,
    /// `[llx, lly, urx, ury]`, normalized so that `ll < ur`
    pub media_box: [f32; 4],
    /// Cumulative /Rotate value as stored; not reduced modulo 360
    pub rotation: i64,
}

impl PageInfo {
    pub fn width(&self) -> f32 {
        self.media_box[2] - self.media_box[0]
    }

    pub fn height(&self) -> f32 {
        self.media_box[3] - self.media_box[1]
    }

    /// Width and height as displayed, swapping the axes for quarter turns
    pub fn effective_size(&self) -> (f32, f32) {
        if self.rotation.rem_euclid(180) != 0 {
            (self.height(), self.width())
        } else {
            (self.width(), self.height())
        }
    }
}

/// A parsed input PDF
#[derive(Debug, Clone)]
pub struct SourceDocument {
    doc: Document,
    pages: Vec<PageInfo>,
}

impl SourceDocument {
    /// Parse `bytes`, failing with `Load` on corrupt or encrypted input
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| PdfDeskError::Load(e.to_string()))?;
        Self::from_document(doc)
    }

    pub fn from_document(doc: Document) -> Result<Self> {
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(PdfDeskError::Load(
                "document is encrypted and no password was supplied".into(),
            ));
        }
        let pages = doc
            .get_pages()
            .values()
            .map(|&id| page_info(&doc, id))
            .collect();
        Ok(Self { doc, pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Result<&PageInfo> {
        self.pages.get(index).ok_or_else(|| {
            PdfDeskError::Operation(format!(
                "page index {} out of bounds (document has {} pages)",
                index,
                self.pages.len()
            ))
        })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }
}

fn page_info(doc: &Document, id: ObjectId) -> PageInfo {
    let media_box = inherited_attribute(doc, id, b"MediaBox")
        .and_then(|obj| parse_rect(doc, obj))
        .unwrap_or(DEFAULT_MEDIA_BOX);
    let rotation = inherited_attribute(doc, id, b"Rotate")
        .and_then(|obj| resolve(doc, obj).as_i64().ok())
        .unwrap_or(0);
    PageInfo {
        id,
        media_box,
        rotation,
    }
}

/// Follow a single level of indirection
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// Look up a page attribute, walking up the page tree for inheritable keys
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

pub(crate) fn parse_rect(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let values = resolve(doc, obj).as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let mut out = [0.0f32; 4];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = resolve(doc, value).as_float().ok()?;
    }
    Some([
        out[0].min(out[2]),
        out[1].min(out[3]),
        out[0].max(out[2]),
        out[1].max(out[3]),
    ])
}

/// An image XObject owned by an [`OutputDocument`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddedImage {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
}

/// A foreign page wrapped as a Form XObject, drawable at any scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddedPage {
    pub id: ObjectId,
    pub width: f32,
    pub height: f32,
}

/// Index of a page inside an [`OutputDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHandle(usize);

#[derive(Debug)]
struct PageCanvas {
    id: ObjectId,
    width: f32,
    height: f32,
    operations: Vec<Operation>,
    xobjects: Dictionary,
}

/// Append-only document builder
#[derive(Debug)]
pub struct OutputDocument {
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<PageCanvas>,
}

impl Default for OutputDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDocument {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            pages: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Append a blank page of the given size in points
    pub fn add_page(&mut self, width: f32, height: f32) -> PageHandle {
        let id = self.doc.new_object_id();
        self.pages.push(PageCanvas {
            id,
            width,
            height,
            operations: Vec::new(),
            xobjects: Dictionary::new(),
        });
        PageHandle(self.pages.len() - 1)
    }

    /// Embed JPEG bytes as-is with a DCTDecode filter
    pub fn embed_jpeg(&mut self, data: Vec<u8>) -> Result<EmbeddedImage> {
        add_jpeg(&mut self.doc, data)
    }

    /// Decode a PNG and embed it losslessly, with its alpha channel as a soft mask
    pub fn embed_png(&mut self, data: &[u8]) -> Result<EmbeddedImage> {
        add_png(&mut self.doc, data)
    }

    /// Wrap pages of `source` as Form XObjects, keeping their vector content
    ///
    /// Every object of the source is imported once with shifted ids; whatever
    /// the forms do not reach is pruned on save.
    pub fn embed_pages(
        &mut self,
        source: &SourceDocument,
        indices: &[usize],
    ) -> Result<Vec<EmbeddedPage>> {
        let src = source.document();
        let offset = self.doc.max_id;

        for (&(num, gen), object) in &src.objects {
            self.doc
                .objects
                .insert((num + offset, gen), remap_object_refs(object.clone(), offset));
        }
        self.doc.max_id = self.doc.max_id.max(src.max_id + offset);

        let mut embedded = Vec::with_capacity(indices.len());
        for &index in indices {
            let page = source.page(index)?;
            let content = src.get_page_content(page.id).map_err(|e| {
                PdfDeskError::Operation(format!("page {} content unreadable: {}", index + 1, e))
            })?;

            let [llx, lly, urx, ury] = page.media_box;
            let mut dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "FormType" => 1,
                "BBox" => vec![llx.into(), lly.into(), urx.into(), ury.into()],
                "Matrix" => vec![
                    1.into(), 0.into(), 0.into(), 1.into(),
                    Object::Real(-llx), Object::Real(-lly),
                ],
            };
            if let Some(resources) = inherited_attribute(src, page.id, b"Resources") {
                dict.set("Resources", remap_object_refs(resources.clone(), offset));
            }

            let id = self.doc.add_object(Stream::new(dict, content));
            debug!("Embedded page {} as form {:?}", index + 1, id);
            embedded.push(EmbeddedPage {
                id,
                width: page.width(),
                height: page.height(),
            });
        }
        Ok(embedded)
    }

    /// Draw an embedded page with its lower-left corner at `(x, y)`
    pub fn draw_page(
        &mut self,
        page: PageHandle,
        embedded: &EmbeddedPage,
        x: f32,
        y: f32,
        scale: f32,
    ) -> Result<()> {
        self.paint_xobject(page, embedded.id, "Pg", [scale, 0.0, 0.0, scale, x, y])
    }

    /// Draw an image stretched over the rectangle `(x, y, width, height)`
    pub fn draw_image(
        &mut self,
        page: PageHandle,
        image: &EmbeddedImage,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<()> {
        self.paint_xobject(page, image.id, "Im", [width, 0.0, 0.0, height, x, y])
    }

    fn paint_xobject(
        &mut self,
        page: PageHandle,
        id: ObjectId,
        prefix: &str,
        matrix: [f32; 6],
    ) -> Result<()> {
        let canvas = self
            .pages
            .get_mut(page.0)
            .ok_or_else(|| PdfDeskError::Operation(format!("no output page {}", page.0)))?;

        let existing = canvas
            .xobjects
            .iter()
            .find(|(_, value)| matches!(value, Object::Reference(r) if *r == id))
            .map(|(name, _)| name.clone());
        let name = match existing {
            Some(name) => name,
            None => {
                let name = format!("{}{}", prefix, canvas.xobjects.len()).into_bytes();
                canvas.xobjects.set(name.clone(), Object::Reference(id));
                name
            }
        };

        canvas.operations.extend([
            Operation::new("q", vec![]),
            Operation::new("cm", matrix.iter().map(|&v| Object::Real(v)).collect()),
            Operation::new("Do", vec![Object::Name(name)]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    /// Build the page tree and serialize
    pub fn save(mut self) -> Result<Vec<u8>> {
        let mut kids = Vec::with_capacity(self.pages.len());
        for canvas in std::mem::take(&mut self.pages) {
            let content = Content {
                operations: canvas.operations,
            }
            .encode()?;
            let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));

            let page = dictionary! {
                "Type" => "Page",
                "Parent" => self.pages_id,
                "MediaBox" => vec![0.into(), 0.into(), canvas.width.into(), canvas.height.into()],
                "Resources" => dictionary! { "XObject" => canvas.xobjects },
                "Contents" => content_id,
            };
            self.doc.objects.insert(canvas.id, Object::Dictionary(page));
            kids.push(Object::Reference(canvas.id));
        }

        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        save_document(self.doc)
    }
}

/// Add JPEG bytes to `doc` as an image XObject, without re-encoding
pub(crate) fn add_jpeg(doc: &mut Document, data: Vec<u8>) -> Result<EmbeddedImage> {
    let info = jpeg_info(&data)
        .ok_or_else(|| PdfDeskError::Image("unrecognized JPEG header".into()))?;

    let color_space = match info.components {
        1 => "DeviceGray",
        4 => "DeviceCMYK",
        _ => "DeviceRGB",
    };
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => info.width as i64,
        "Height" => info.height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
        "Filter" => "DCTDecode",
    };
    if info.components == 4 {
        // Adobe CMYK JPEGs are stored inverted
        dict.set(
            "Decode",
            Object::Array([1, 0, 1, 0, 1, 0, 1, 0].map(Object::Integer).to_vec()),
        );
    }

    let id = doc.add_object(Stream::new(dict, data).with_compression(false));
    Ok(EmbeddedImage {
        id,
        width: info.width,
        height: info.height,
    })
}

/// Add a decoded PNG to `doc`, with its alpha channel as a soft mask
pub(crate) fn add_png(doc: &mut Document, data: &[u8]) -> Result<EmbeddedImage> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Png)?;
    let (width, height) = (decoded.width(), decoded.height());

    let smask = if decoded.color().has_alpha() {
        let alpha: Vec<u8> = decoded.to_rgba8().pixels().map(|p| p.0[3]).collect();
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        };
        Some(doc.add_object(Stream::new(dict, deflate(&alpha)?)))
    } else {
        None
    };

    let rgb = decoded.to_rgb8();
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };
    if let Some(mask_id) = smask {
        dict.set("SMask", Object::Reference(mask_id));
    }
    let id = doc.add_object(Stream::new(dict, deflate(rgb.as_raw())?));
    Ok(EmbeddedImage { id, width, height })
}

/// Store `rotation` on the page itself, overriding any inherited value
pub(crate) fn set_page_rotation(
    doc: &mut Document,
    page_id: ObjectId,
    rotation: i64,
) -> Result<()> {
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| PdfDeskError::Operation(format!("page {:?}: {}", page_id, e)))?;
    page.set("Rotate", rotation);
    Ok(())
}

/// Prune unreachable objects, compress streams and serialize
pub(crate) fn save_document(mut doc: Document) -> Result<Vec<u8>> {
    doc.prune_objects();
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfDeskError::Operation(format!("Failed to save PDF: {}", e)))?;
    Ok(buffer)
}

pub(crate) fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PdfDeskError::Operation(format!("deflate failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PdfDeskError::Operation(format!("deflate failed: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct JpegInfo {
    width: u32,
    height: u32,
    components: u8,
}

/// Read dimensions and component count from the first SOF marker
fn jpeg_info(data: &[u8]) -> Option<JpegInfo> {
    if data.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = data[pos + 1];
        // Fill bytes and standalone markers carry no length
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let segment = data.get(pos + 4..pos + 2 + length)?;
            return Some(JpegInfo {
                height: u16::from_be_bytes([*segment.get(1)?, *segment.get(2)?]) as u32,
                width: u16::from_be_bytes([*segment.get(3)?, *segment.get(4)?]) as u32,
                components: *segment.get(5)?,
            });
        }
        pos += 2 + length;
    }
    None
}
