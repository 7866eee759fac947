//! Drawing on top of existing pages
//!
//! A [`PageOverlay`] collects operations for one page of a loaded document
//! and, on [`finish`](PageOverlay::finish), registers the resources they use
//! and appends them as a new content stream. The original content is
//! wrapped in `q`/`Q` first so a dangling transform in it cannot leak into
//! the overlay.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::document::{inherited_attribute, resolve};
use crate::error::{PdfDeskError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::gray(0.0);
    pub const WHITE: Rgb = Rgb::gray(1.0);

    pub const fn gray(level: f32) -> Self {
        Rgb {
            r: level,
            g: level,
            b: level,
        }
    }

    /// Parse `#RRGGBB` or `RRGGBB`; anything else is black
    pub fn from_hex(color: &str) -> Self {
        let hex = color.trim_start_matches('#');
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .map(|v| v as f32 / 255.0)
        };
        match (channel(0..2), channel(2..4), channel(4..6)) {
            (Some(r), Some(g), Some(b)) => Rgb { r, g, b },
            _ => Rgb::BLACK,
        }
    }

    fn operands(self) -> Vec<Object> {
        vec![self.r.into(), self.g.into(), self.b.into()]
    }
}

/// Text placement options beyond position and size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub color: Rgb,
    /// Counter-clockwise rotation around the text origin, in degrees
    pub rotation: f32,
    /// Fill opacity; `None` leaves the graphics state alone
    pub opacity: Option<f32>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            color: Rgb::BLACK,
            rotation: 0.0,
            opacity: None,
        }
    }
}

#[derive(Debug, Default)]
struct PendingResources {
    fonts: Vec<(String, ObjectId)>,
    xobjects: Vec<(String, ObjectId)>,
    states: Vec<(String, Dictionary)>,
}

pub struct PageOverlay<'d> {
    doc: &'d mut Document,
    page_id: ObjectId,
    operations: Vec<Operation>,
    resources: PendingResources,
}

impl<'d> PageOverlay<'d> {
    pub fn new(doc: &'d mut Document, page_id: ObjectId) -> Self {
        Self {
            doc,
            page_id,
            operations: Vec::new(),
            resources: PendingResources::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Access the underlying document, e.g. to add font objects
    pub fn document(&mut self) -> &mut Document {
        self.doc
    }

    pub fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgb) {
        self.operations.extend([
            Operation::new("q", vec![]),
            Operation::new("rg", color.operands()),
            Operation::new(
                "re",
                vec![x.into(), y.into(), width.into(), height.into()],
            ),
            Operation::new("f", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }

    /// Show pre-encoded `text` with the font object `font`
    pub fn draw_text(
        &mut self,
        text: Vec<u8>,
        font: ObjectId,
        size: f32,
        x: f32,
        y: f32,
        style: TextStyle,
    ) {
        let font_name = self.font_name(font);
        let (sin, cos) = style.rotation.to_radians().sin_cos();

        self.operations.push(Operation::new("q", vec![]));
        if let Some(opacity) = style.opacity {
            let state = self.opacity_state(opacity);
            self.operations
                .push(Operation::new("gs", vec![Object::Name(state.into_bytes())]));
        }
        self.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("rg", style.color.operands()),
            Operation::new(
                "Tf",
                vec![Object::Name(font_name.into_bytes()), size.into()],
            ),
            Operation::new(
                "Tm",
                vec![
                    cos.into(),
                    sin.into(),
                    (-sin).into(),
                    cos.into(),
                    x.into(),
                    y.into(),
                ],
            ),
            Operation::new("Tj", vec![Object::String(text, StringFormat::Hexadecimal)]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }

    pub fn draw_image(&mut self, image: ObjectId, x: f32, y: f32, width: f32, height: f32) {
        let name = self.xobject_name(image);
        self.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    x.into(),
                    y.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
    }

    fn font_name(&mut self, font: ObjectId) -> String {
        if let Some((name, _)) = self.resources.fonts.iter().find(|(_, id)| *id == font) {
            return name.clone();
        }
        let name = format!("PdxF{}", self.resources.fonts.len());
        self.resources.fonts.push((name.clone(), font));
        name
    }

    fn xobject_name(&mut self, object: ObjectId) -> String {
        if let Some((name, _)) = self.resources.xobjects.iter().find(|(_, id)| *id == object) {
            return name.clone();
        }
        let name = format!("PdxX{}", self.resources.xobjects.len());
        self.resources.xobjects.push((name.clone(), object));
        name
    }

    fn opacity_state(&mut self, opacity: f32) -> String {
        let name = format!("PdxG{}", self.resources.states.len());
        let state = dictionary! {
            "Type" => "ExtGState",
            "ca" => opacity,
            "CA" => opacity,
        };
        self.resources.states.push((name.clone(), state));
        name
    }

    /// Register resources and append the overlay to the page contents
    pub fn finish(self) -> Result<()> {
        if self.operations.is_empty() {
            return Ok(());
        }
        let PageOverlay {
            doc,
            page_id,
            operations,
            resources,
        } = self;

        let mut page_resources = match inherited_attribute(doc, page_id, b"Resources") {
            Some(obj) => resolve(doc, obj).as_dict().cloned().unwrap_or_default(),
            None => Dictionary::new(),
        };
        merge_into(
            doc,
            &mut page_resources,
            b"Font",
            resources
                .fonts
                .into_iter()
                .map(|(n, id)| (n, Object::Reference(id))),
        );
        merge_into(
            doc,
            &mut page_resources,
            b"XObject",
            resources
                .xobjects
                .into_iter()
                .map(|(n, id)| (n, Object::Reference(id))),
        );
        merge_into(
            doc,
            &mut page_resources,
            b"ExtGState",
            resources
                .states
                .into_iter()
                .map(|(n, state)| (n, Object::Dictionary(state))),
        );

        let overlay = Content { operations }.encode()?;
        let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        let mut close = b"Q\n".to_vec();
        close.extend_from_slice(&overlay);
        let close_id = doc.add_object(Stream::new(dictionary! {}, close));

        let existing = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map(|page| page.get(b"Contents").ok().cloned())
            .map_err(|e| PdfDeskError::Operation(format!("page {:?}: {}", page_id, e)))?;

        let mut contents = vec![Object::Reference(open_id)];
        match existing {
            Some(Object::Reference(id)) => match doc.get_object(id) {
                Ok(Object::Array(parts)) => contents.extend(parts.clone()),
                _ => contents.push(Object::Reference(id)),
            },
            Some(Object::Array(parts)) => contents.extend(parts),
            Some(Object::Stream(stream)) => contents.push(Object::Reference(doc.add_object(stream))),
            _ => {}
        }
        contents.push(Object::Reference(close_id));

        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| PdfDeskError::Operation(format!("page {:?}: {}", page_id, e)))?;
        page.set("Resources", Object::Dictionary(page_resources));
        page.set("Contents", Object::Array(contents));
        Ok(())
    }
}

/// Insert entries into the `category` sub-dictionary, inlining it if it was
/// referenced indirectly
fn merge_into(
    doc: &Document,
    resources: &mut Dictionary,
    category: &[u8],
    entries: impl Iterator<Item = (String, Object)>,
) {
    let mut entries = entries.peekable();
    if entries.peek().is_none() {
        return;
    }
    let mut sub = resources
        .get(category)
        .ok()
        .and_then(|obj| resolve(doc, obj).as_dict().ok())
        .cloned()
        .unwrap_or_default();
    for (name, value) in entries {
        sub.set(name.into_bytes(), value);
    }
    resources.set(category.to_vec(), Object::Dictionary(sub));
}
